// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]

//! # pseudoscope
//!
//! An architecture-agnostic decompiler core that lifts disassembled machine code
//! into structured, idiomatic pseudocode. Built in pure Rust, `pseudoscope` takes a
//! linear sequence of instructions (supplied by any disassembler backend through a
//! trait), converts it into a three-address-style IR, tags it with SSA version
//! indices, and iteratively rewrites it into loops, conditionals and boolean
//! expressions — eliminating gotos and dead definitions along the way.
//!
//! ## Features
//!
//! - **Mutable expression tree** - Parent-tracking arena with O(1) in-place rewrites
//! - **Copy-based SSA** - Version tagging with merge copies instead of φ-functions
//! - **Def-use chain engine** - Expression propagation, dead-code and restore elimination
//! - **Peephole simplifier** - Flag lowering, algebraic cleanup, negation normalization
//! - **Control-flow recovery** - `if/else`, `while`, `do-while`, `break`, `continue`
//! - **Backend-agnostic** - Bring your own disassembler behind one trait
//!
//! ## Quick Start
//!
//! Add `pseudoscope` to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! pseudoscope = "0.1"
//! ```
//!
//! ### Decompiling a function
//!
//! ```rust,ignore
//! use pseudoscope::prelude::*;
//!
//! // `arch` implements pseudoscope::arch::Architecture for your target.
//! let mut decompiler = Decompiler::new(&arch, 0x401000);
//! let flow = decompiler.run()?;
//! println!("{}", flow.to_pseudocode());
//! ```
//!
//! ### Driving the pipeline stage by stage
//!
//! The driver is a resumable state machine, so interactive consumers can render
//! every intermediate stage:
//!
//! ```rust,ignore
//! use pseudoscope::prelude::*;
//!
//! let mut decompiler = Decompiler::new(&arch, 0x401000);
//! while let Some(stage) = decompiler.step()? {
//!     println!("=== after {stage:?} ===");
//!     println!("{}", decompiler.flow().unwrap().to_pseudocode());
//! }
//! ```
//!
//! ## Architecture
//!
//! `pseudoscope` is organized into one module per pipeline component:
//!
//! - [`ir`] - Expression/statement model and the owning arena
//! - [`arch`] - Contracts with the disassembler backend and calling conventions
//! - [`flow`] - Basic-block discovery and instruction lifting
//! - [`ssa`] - SSA version tagging with merge-copy insertion
//! - [`chains`] - Def-use chains: propagation, dead code, restores, increment gluing
//! - [`simplify`] - Fixed-point peephole rules over expression trees
//! - [`restructure`] - Goto elimination and loop/conditional recovery
//! - [`rename`] - Stable `var0`/`arg0` naming of surviving locations
//! - [`decompiler`] - The staged driver tying everything together
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result`]. Internal invariant violations are
//! fatal per function and clearly separated from expected analysis degradations,
//! which are logged via `tracing` and never abort a function. See [`Error`].

pub(crate) mod error;

pub mod arch;
pub mod chains;
pub mod decompiler;
pub mod flow;
pub mod ir;
pub mod rename;
pub mod restructure;
pub mod simplify;
pub mod ssa;

/// Convenient re-exports of the most commonly used types.
///
/// # Example
///
/// ```rust,ignore
/// use pseudoscope::prelude::*;
///
/// let mut decompiler = Decompiler::new(&arch, 0x401000);
/// let flow = decompiler.run()?;
/// ```
pub mod prelude;

#[cfg(test)]
pub(crate) mod test;

pub use error::Error;

/// Crate-wide result alias over [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

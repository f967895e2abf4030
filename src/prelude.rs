//! Convenient re-exports of the most commonly used types.
//!
//! This module provides a curated selection of the most frequently used types
//! from across the pseudoscope library, allowing for convenient glob imports.
//!
//! # Example
//!
//! ```rust,ignore
//! use pseudoscope::prelude::*;
//!
//! let mut decompiler = Decompiler::new(&arch, 0x401000);
//! let flow = decompiler.run()?;
//! println!("{}", flow.to_pseudocode());
//! ```

pub use crate::{
    arch::{Architecture, BranchTarget, CallingConvention, Lifted},
    chains::{Chain, ChainEngine, ChainInstance, LocationFilter, PropagationFlags},
    decompiler::{Decompiler, Stage},
    flow::{Block, FlowGraph},
    ir::{BinaryOp, ContainerId, ExprId, ExprKind, IrArena, RegisterBank, StmtId, StmtKind, UnaryOp},
    rename::Renamer,
    restructure::Restructurer,
    ssa::SsaTagger,
    Error, Result,
};

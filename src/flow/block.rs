//! Basic block representation.

use crate::ir::ContainerId;

/// One basic block of the function being decompiled.
///
/// A block records the raw instruction addresses it covers (`items`), the container
/// of already-lowered IR statements, and its adjacency. The adjacency lists may
/// contain duplicates (two conditional branches to the same destination); passes
/// must tolerate that rather than assume set semantics.
#[derive(Debug)]
pub struct Block {
    /// Start address of the block.
    pub ea: u64,
    /// Raw instruction addresses belonging to this block, in document order.
    pub items: Vec<u64>,
    /// Container of lowered IR statements.
    pub container: ContainerId,
    /// Successor block addresses.
    pub jump_to: Vec<u64>,
    /// Predecessor block addresses.
    pub jump_from: Vec<u64>,
    /// Straight-line fallthrough successor, when the block does not end in an
    /// unconditional transfer.
    pub falls_into: Option<u64>,
}

impl Block {
    /// Creates an empty block starting at `ea` with the given statement container.
    #[must_use]
    pub fn new(ea: u64, container: ContainerId) -> Self {
        Self {
            ea,
            items: Vec::new(),
            container,
            jump_to: Vec::new(),
            jump_from: Vec::new(),
            falls_into: None,
        }
    }

    /// Removes every occurrence of `ea` from the successor list.
    pub fn remove_jump_to(&mut self, ea: u64) {
        self.jump_to.retain(|t| *t != ea);
    }

    /// Removes every occurrence of `ea` from the predecessor list.
    pub fn remove_jump_from(&mut self, ea: u64) {
        self.jump_from.retain(|t| *t != ea);
    }

    /// Returns the distinct predecessors of this block.
    #[must_use]
    pub fn distinct_predecessors(&self) -> Vec<u64> {
        let mut out = Vec::new();
        for p in &self.jump_from {
            if !out.contains(p) {
                out.push(*p);
            }
        }
        out
    }
}

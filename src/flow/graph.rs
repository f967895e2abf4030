//! Control-flow graph discovery and IR lowering for one function.
//!
//! [`FlowGraph::build`] discovers basic blocks over the raw instruction stream using
//! only the [`Architecture`] callbacks: every literal jump destination inside the
//! function gets a block, and a worklist walk fills in instruction membership and
//! adjacency. Destinations that are not compile-time literals, or that resolve
//! outside the function, are logged and skipped — they never abort discovery.
//!
//! [`FlowGraph::lower_to_ir`] then lifts each block's instructions into IR
//! statements, runs the peephole simplifier on every new statement, and appends a
//! synthetic `goto` to the fallthrough successor so that every block ends in an
//! explicit terminator. Later passes rely on that structural uniformity.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use tracing::{debug, warn};

use crate::{
    arch::{Architecture, BranchTarget, Lifted},
    flow::Block,
    ir::IrArena,
    simplify, Error, Result,
};

/// The control-flow graph and IR of one function.
///
/// Owns the [`IrArena`] for the function; every pass in the pipeline takes the graph
/// mutably and rewrites blocks and statements in place.
///
/// # Examples
///
/// ```rust,ignore
/// use pseudoscope::flow::FlowGraph;
///
/// let mut flow = FlowGraph::build(0x401000, &arch)?;
/// flow.lower_to_ir(&arch)?;
/// for ea in flow.iter_blocks() {
///     println!("block at {ea:#x}");
/// }
/// ```
#[derive(Debug)]
pub struct FlowGraph {
    /// Entry address of the function.
    pub entry_ea: u64,
    /// Arena owning every expression, statement and container of this function.
    pub ir: IrArena,
    /// Addresses of blocks ending in a return instruction.
    pub return_blocks: Vec<u64>,
    blocks: BTreeMap<u64, Block>,
}

impl FlowGraph {
    /// Creates an empty graph with no blocks.
    ///
    /// Mostly useful for consumers assembling a synthetic flow by hand (tests,
    /// custom frontends); normal use goes through [`build`](Self::build).
    #[must_use]
    pub fn new(entry_ea: u64) -> Self {
        Self {
            entry_ea,
            ir: IrArena::new(),
            return_blocks: Vec::new(),
            blocks: BTreeMap::new(),
        }
    }

    /// Adds an empty block starting at `ea`, returning its statement container.
    ///
    /// Replaces any existing block at the same address.
    pub fn add_block(&mut self, ea: u64) -> crate::ir::ContainerId {
        let container = self.ir.new_container();
        self.blocks.insert(ea, Block::new(ea, container));
        container
    }

    /// Discovers the basic blocks of the function at `entry_ea`.
    ///
    /// Allocates one block per jump target plus the entry address, then walks
    /// instructions from each block start until a return, a jump, or a fallthrough
    /// into another allocated block.
    ///
    /// # Arguments
    ///
    /// * `entry_ea` - Entry address of the function
    /// * `arch` - Disassembler backend
    ///
    /// # Errors
    ///
    /// Returns [`Error::GraphError`] if the function has no instructions or the
    /// entry address is not part of it; propagates backend decode failures.
    pub fn build(entry_ea: u64, arch: &dyn Architecture) -> Result<Self> {
        let items = arch.function_items(entry_ea)?;
        if items.is_empty() {
            return Err(Error::GraphError(format!(
                "function at {entry_ea:#x} has no instructions"
            )));
        }
        if !items.contains(&entry_ea) {
            return Err(Error::GraphError(format!(
                "entry {entry_ea:#x} is not part of its own function item set"
            )));
        }

        let mut ir = IrArena::new();

        // Every literal in-function jump destination starts a block.
        let mut starts: BTreeSet<u64> = BTreeSet::new();
        starts.insert(entry_ea);
        for ea in &items {
            if !arch.has_jump(*ea) {
                continue;
            }
            for target in arch.jump_branches(*ea) {
                match target {
                    BranchTarget::Literal(dest) if items.contains(&dest) => {
                        starts.insert(dest);
                    }
                    BranchTarget::Literal(dest) => {
                        debug!(ea, dest, "jump target outside function, not a block start");
                    }
                    BranchTarget::Computed => {
                        debug!(ea, "computed jump target, not a block start");
                    }
                }
            }
        }

        let mut blocks = BTreeMap::new();
        for start in &starts {
            blocks.insert(*start, Block::new(*start, ir.new_container()));
        }

        let mut flow = Self {
            entry_ea,
            ir,
            return_blocks: Vec::new(),
            blocks,
        };

        let mut pending = vec![entry_ea];
        let mut done: HashSet<u64> = HashSet::new();
        while let Some(block_ea) = pending.pop() {
            if !done.insert(block_ea) {
                continue;
            }
            flow.walk_block(block_ea, arch, &items, &mut pending)?;
        }

        Ok(flow)
    }

    /// Walks instructions of one block, recording items, edges and fallthrough.
    fn walk_block(
        &mut self,
        block_ea: u64,
        arch: &dyn Architecture,
        items: &BTreeSet<u64>,
        pending: &mut Vec<u64>,
    ) -> Result<()> {
        let mut cur = block_ea;
        loop {
            if !items.contains(&cur) {
                warn!(block_ea, cur, "instruction walk left the function item set");
                break;
            }
            self.blocks
                .get_mut(&block_ea)
                .expect("walked block must exist")
                .items
                .push(cur);

            if arch.is_return(cur) {
                self.return_blocks.push(block_ea);
                break;
            }

            if arch.has_jump(cur) {
                let next = arch.next_instruction_ea(cur)?;
                for target in arch.jump_branches(cur) {
                    match target {
                        BranchTarget::Literal(dest) if self.blocks.contains_key(&dest) => {
                            self.add_edge(block_ea, dest);
                            pending.push(dest);
                            if dest == next {
                                self.blocks
                                    .get_mut(&block_ea)
                                    .expect("walked block must exist")
                                    .falls_into = Some(dest);
                            }
                        }
                        BranchTarget::Literal(dest) => {
                            debug!(cur, dest, "edge to non-block destination skipped");
                        }
                        BranchTarget::Computed => {
                            debug!(cur, "edge to computed destination skipped");
                        }
                    }
                }
                break;
            }

            let next = arch.next_instruction_ea(cur)?;
            if next != block_ea && self.blocks.contains_key(&next) {
                self.add_edge(block_ea, next);
                self.blocks
                    .get_mut(&block_ea)
                    .expect("walked block must exist")
                    .falls_into = Some(next);
                pending.push(next);
                break;
            }
            if !items.contains(&next) {
                warn!(cur, next, "function ends without return or jump");
                break;
            }
            cur = next;
        }
        Ok(())
    }

    /// Lifts every block's instructions into IR statements.
    ///
    /// Each produced statement is immediately run through the peephole simplifier to
    /// fixed point, then appended to the block's container. Blocks with a recorded
    /// fallthrough successor receive a synthetic `goto` so every block ends in an
    /// explicit terminator.
    ///
    /// # Errors
    ///
    /// Propagates [`Error::UnsupportedInstruction`](crate::Error::UnsupportedInstruction)
    /// and other lifting failures from the backend.
    pub fn lower_to_ir(&mut self, arch: &dyn Architecture) -> Result<()> {
        let addresses: Vec<u64> = self.blocks.keys().copied().collect();
        for ea in addresses {
            let (container, item_list) = {
                let block = &self.blocks[&ea];
                (block.container, block.items.clone())
            };
            for item in item_list {
                for node in arch.lift_instruction(&mut self.ir, item)? {
                    let stmt = match node {
                        Lifted::Stmt(s) => s,
                        Lifted::Expr(e) => self.ir.stmt_expr(e)?,
                    };
                    for expr in self.ir.stmt(stmt).exprs() {
                        simplify::run(&mut self.ir, expr, true)?;
                    }
                    self.ir.push_stmt(container, stmt)?;
                }
            }

            if let Some(next) = self.blocks[&ea].falls_into {
                let needs_goto = match self.ir.container_stmts(container).last() {
                    Some(last) => !self.ir.stmt(*last).is_terminator(),
                    None => true,
                };
                if needs_goto {
                    let goto = self.ir.stmt_goto(next, 64)?;
                    self.ir.push_stmt(container, goto)?;
                }
            }
        }
        Ok(())
    }

    /// Returns a fresh traversal of reachable block addresses.
    ///
    /// The ordering starts at the entry block and follows `jump_to` edges
    /// breadth-first, visiting each block exactly once. A block encountered again
    /// while still pending is re-queued at the end, which biases the ordering
    /// towards natural fallthrough order. This is a processing convenience, not a
    /// dominance-correct order.
    #[must_use]
    pub fn iter_blocks(&self) -> std::vec::IntoIter<u64> {
        let mut order = Vec::new();
        let mut visited: HashSet<u64> = HashSet::new();
        let mut pending: VecDeque<u64> = VecDeque::new();
        pending.push_back(self.entry_ea);
        while let Some(ea) = pending.pop_front() {
            if !visited.insert(ea) {
                continue;
            }
            order.push(ea);
            let Some(block) = self.blocks.get(&ea) else {
                continue;
            };
            for succ in &block.jump_to {
                if visited.contains(succ) {
                    continue;
                }
                if let Some(pos) = pending.iter().position(|p| p == succ) {
                    pending.remove(pos);
                }
                pending.push_back(*succ);
            }
        }
        order.into_iter()
    }

    /// Returns the block starting at `ea`.
    #[must_use]
    pub fn block(&self, ea: u64) -> Option<&Block> {
        self.blocks.get(&ea)
    }

    /// Returns the block starting at `ea`, mutably.
    pub fn block_mut(&mut self, ea: u64) -> Option<&mut Block> {
        self.blocks.get_mut(&ea)
    }

    /// Returns true if a block starts at `ea`.
    #[must_use]
    pub fn contains_block(&self, ea: u64) -> bool {
        self.blocks.contains_key(&ea)
    }

    /// Returns every block address, in address order.
    #[must_use]
    pub fn block_addresses(&self) -> Vec<u64> {
        self.blocks.keys().copied().collect()
    }

    /// Removes the block at `ea` from the graph, returning it.
    ///
    /// Only adjacency changes; the block's container and statements stay in the
    /// arena (they have usually been spliced into another block already).
    pub fn remove_block(&mut self, ea: u64) -> Option<Block> {
        let block = self.blocks.remove(&ea)?;
        for other in self.blocks.values_mut() {
            other.remove_jump_from(ea);
            other.remove_jump_to(ea);
            if other.falls_into == Some(ea) {
                other.falls_into = None;
            }
        }
        self.return_blocks.retain(|r| *r != ea);
        Some(block)
    }

    /// Records a `from → to` edge on both blocks.
    pub fn add_edge(&mut self, from: u64, to: u64) {
        if let Some(b) = self.blocks.get_mut(&from) {
            b.jump_to.push(to);
        }
        if let Some(b) = self.blocks.get_mut(&to) {
            b.jump_from.push(from);
        }
    }

    /// Removes one recorded `from → to` edge from both blocks.
    pub fn remove_edge(&mut self, from: u64, to: u64) {
        if let Some(b) = self.blocks.get_mut(&from) {
            if let Some(pos) = b.jump_to.iter().position(|t| *t == to) {
                b.jump_to.remove(pos);
            }
        }
        if let Some(b) = self.blocks.get_mut(&to) {
            if let Some(pos) = b.jump_from.iter().position(|t| *t == from) {
                b.jump_from.remove(pos);
            }
        }
    }

    /// Renders the whole function as labelled pseudocode blocks.
    #[must_use]
    pub fn to_pseudocode(&self) -> String {
        let mut out = String::new();
        for ea in self.iter_blocks() {
            let Some(block) = self.block(ea) else { continue };
            out.push_str(&format!("loc_{ea:x}:\n"));
            out.push_str(&self.ir.display_container(block.container, 1));
        }
        out
    }
}

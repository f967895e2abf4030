//! The resumable decompilation driver.
//!
//! [`Decompiler`] runs the whole pipeline for one function as a strictly ordered
//! sequence of [`Stage`]s, each entered at most once per run:
//!
//! ```text
//! BasicBlocks → Ir → Ssa → Calls → Propagated → Pruned → Combined
//! ```
//!
//! The driver is resumable: [`step`](Decompiler::step) executes exactly one stage
//! and returns its marker, so an interactive consumer can render intermediate
//! results between stages. There is no suspension mid-stage, only between stages.
//! One driver instance serves one function; create a new driver per target address.

use crate::{
    arch::{Architecture, CallingConvention},
    chains::{ChainEngine, LocationFilter, PropagationFlags},
    flow::FlowGraph,
    ir::ExprId,
    rename::Renamer,
    restructure::Restructurer,
    ssa::SsaTagger,
    Error, Result,
};

/// One pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// Basic blocks discovered over the raw instruction stream.
    BasicBlocks,
    /// Instructions lifted into IR statements.
    Ir,
    /// SSA version indices stamped.
    Ssa,
    /// Flag cleanup, stack propagation, stack renaming, call-argument collection.
    Calls,
    /// Register/flag propagation, increment gluing, final single-use propagation.
    Propagated,
    /// Restore elimination, dead-code removal, register renaming.
    Pruned,
    /// Control flow restructured into loops and conditionals.
    Combined,
}

impl Stage {
    /// The stage executed after this one, if any.
    #[must_use]
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::BasicBlocks => Some(Stage::Ir),
            Stage::Ir => Some(Stage::Ssa),
            Stage::Ssa => Some(Stage::Calls),
            Stage::Calls => Some(Stage::Propagated),
            Stage::Propagated => Some(Stage::Pruned),
            Stage::Pruned => Some(Stage::Combined),
            Stage::Combined => None,
        }
    }
}

/// Drives the full pipeline for one function.
///
/// # Examples
///
/// ```rust,ignore
/// use pseudoscope::decompiler::{Decompiler, Stage};
///
/// let mut decompiler = Decompiler::new(&arch, 0x401000);
/// while let Some(stage) = decompiler.step()? {
///     println!("finished {stage:?}");
/// }
/// println!("{}", decompiler.flow().unwrap().to_pseudocode());
/// ```
pub struct Decompiler<'a> {
    arch: &'a dyn Architecture,
    convention: Option<&'a dyn CallingConvention>,
    entry_ea: u64,
    flow: Option<FlowGraph>,
    completed: Option<Stage>,
    renamer: Renamer,
    restored: Vec<ExprId>,
}

impl<'a> Decompiler<'a> {
    /// Creates a driver for the function at `entry_ea`.
    #[must_use]
    pub fn new(arch: &'a dyn Architecture, entry_ea: u64) -> Self {
        Self {
            arch,
            convention: None,
            entry_ea,
            flow: None,
            completed: None,
            renamer: Renamer::new(),
            restored: Vec::new(),
        }
    }

    /// Attaches a calling-convention analyzer for argument collection.
    #[must_use]
    pub fn with_convention(mut self, convention: &'a dyn CallingConvention) -> Self {
        self.convention = Some(convention);
        self
    }

    /// Returns the flow graph, available once [`Stage::BasicBlocks`] has run.
    #[must_use]
    pub fn flow(&self) -> Option<&FlowGraph> {
        self.flow.as_ref()
    }

    /// Returns the last completed stage.
    #[must_use]
    pub fn completed_stage(&self) -> Option<Stage> {
        self.completed
    }

    /// Returns the callee-saved locations the restore pass eliminated.
    ///
    /// Informational; populated after [`Stage::Pruned`].
    #[must_use]
    pub fn restored_locations(&self) -> &[ExprId] {
        &self.restored
    }

    /// Executes the next stage and returns its marker, or `None` when finished.
    ///
    /// # Errors
    ///
    /// Any stage error is fatal for this function. The driver stays in its current
    /// state; callers batch-processing functions should drop it and continue with
    /// the next target.
    pub fn step(&mut self) -> Result<Option<Stage>> {
        let stage = match self.completed {
            None => Stage::BasicBlocks,
            Some(stage) => match stage.next() {
                Some(next) => next,
                None => return Ok(None),
            },
        };
        self.execute(stage)?;
        self.completed = Some(stage);
        Ok(Some(stage))
    }

    /// Runs stages until `stage` (inclusive) has completed.
    ///
    /// # Errors
    ///
    /// Propagates the first stage failure.
    pub fn run_until(&mut self, stage: Stage) -> Result<()> {
        while self.completed.is_none_or(|done| done < stage) {
            if self.step()?.is_none() {
                break;
            }
        }
        Ok(())
    }

    /// Runs the whole pipeline and returns the finished flow graph.
    ///
    /// # Errors
    ///
    /// Propagates the first stage failure.
    pub fn run(&mut self) -> Result<&FlowGraph> {
        self.run_until(Stage::Combined)?;
        self.flow
            .as_ref()
            .ok_or_else(|| Error::Error("pipeline produced no flow".to_string()))
    }

    fn flow_mut(&mut self) -> Result<&mut FlowGraph> {
        self.flow
            .as_mut()
            .ok_or_else(|| Error::Error("stage requires a flow graph".to_string()))
    }

    fn execute(&mut self, stage: Stage) -> Result<()> {
        match stage {
            Stage::BasicBlocks => {
                self.flow = Some(FlowGraph::build(self.entry_ea, self.arch)?);
                Ok(())
            }
            Stage::Ir => {
                let arch = self.arch;
                self.flow_mut()?.lower_to_ir(arch)
            }
            Stage::Ssa => SsaTagger::new().tag(self.flow_mut()?),
            Stage::Calls => {
                let arch = self.arch;
                let convention = self.convention;
                let Some(flow) = self.flow.as_mut() else {
                    return Err(Error::Error("stage requires a flow graph".to_string()));
                };
                let mut engine = ChainEngine::new(&mut *flow, arch);
                engine.remove_unused_definitions(LocationFilter::FLAGS)?;
                engine.propagate_expressions(PropagationFlags::STACK_LOCATIONS)?;
                engine.remove_unused_definitions(LocationFilter::REGISTERS)?;
                drop(engine);
                self.renamer.rename_stack_variables(&mut *flow, arch)?;
                if let Some(convention) = convention {
                    let mut engine = ChainEngine::new(&mut *flow, arch);
                    engine.collect_argument_calls(convention)?;
                }
                Ok(())
            }
            Stage::Propagated => {
                let arch = self.arch;
                let flow = self.flow_mut()?;
                let mut engine = ChainEngine::new(flow, arch);
                engine.propagate_expressions(
                    PropagationFlags::REGISTERS | PropagationFlags::FLAGS,
                )?;
                engine.glue_increments()?;
                engine.propagate_expressions(
                    PropagationFlags::REGISTERS | PropagationFlags::FLAGS,
                )?;
                engine.propagate_expressions(
                    PropagationFlags::ANY | PropagationFlags::SINGLE_USES,
                )?;
                Ok(())
            }
            Stage::Pruned => {
                let arch = self.arch;
                let Some(flow) = self.flow.as_mut() else {
                    return Err(Error::Error("stage requires a flow graph".to_string()));
                };
                let mut engine = ChainEngine::new(&mut *flow, arch);
                let restored = engine.eliminate_restores()?;
                engine.remove_unused_definitions(LocationFilter::all())?;
                drop(engine);
                self.restored = restored;
                self.renamer.rename_registers(&mut *flow)?;
                Ok(())
            }
            Stage::Combined => {
                let arch = self.arch;
                let flow = self.flow_mut()?;
                Restructurer::new(flow, arch).run()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{lift, ScriptedArch};

    /// Each step yields the next stage marker exactly once, in order.
    #[test]
    fn test_stage_sequence() {
        let mut arch = ScriptedArch::new();
        arch.instruction(0x1000, 1, |ir| lift::assign_reg_value(ir, "eax", 0, 1));
        arch.ret(0x1001, 1);

        let mut decompiler = Decompiler::new(&arch, 0x1000);
        let mut stages = Vec::new();
        while let Some(stage) = decompiler.step().unwrap() {
            stages.push(stage);
        }
        assert_eq!(
            stages,
            vec![
                Stage::BasicBlocks,
                Stage::Ir,
                Stage::Ssa,
                Stage::Calls,
                Stage::Propagated,
                Stage::Pruned,
                Stage::Combined,
            ]
        );
        // A finished driver keeps returning None.
        assert!(decompiler.step().unwrap().is_none());
    }

    /// run_until stops at the requested stage.
    #[test]
    fn test_run_until() {
        let mut arch = ScriptedArch::new();
        arch.instruction(0x1000, 1, |ir| lift::assign_reg_value(ir, "eax", 0, 1));
        arch.ret(0x1001, 1);

        let mut decompiler = Decompiler::new(&arch, 0x1000);
        decompiler.run_until(Stage::Ssa).unwrap();
        assert_eq!(decompiler.completed_stage(), Some(Stage::Ssa));
        assert!(decompiler.flow().is_some());
    }

    /// An unsupported instruction surfaces as its own catchable error kind.
    #[test]
    fn test_unsupported_instruction_is_catchable() {
        let mut broken = ScriptedArch::new();
        broken.instruction(0x1000, 1, |ir| lift::assign_reg_value(ir, "eax", 0, 1));
        broken.instruction(0x1001, 1, |_| {
            Err(Error::UnsupportedInstruction {
                mnemonic: "fxsave".to_string(),
                address: 0x1001,
            })
        });
        broken.ret(0x1002, 1);

        let mut decompiler = Decompiler::new(&broken, 0x1000);
        let err = decompiler.run().unwrap_err();
        assert!(matches!(err, Error::UnsupportedInstruction { .. }));
    }
}

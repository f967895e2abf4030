use thiserror::Error;

macro_rules! invariant_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Invariant {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Invariant {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

pub(crate) use invariant_error;

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// This enum covers all possible error conditions that can occur while lifting a function
/// into IR, tagging it with SSA versions, and restructuring it into pseudocode. Each variant
/// provides specific context about the failure mode to enable appropriate error handling.
///
/// # Error Categories
///
/// ## Internal-Consistency Errors
/// - [`Error::Invariant`] - A pipeline invariant was violated (always a bug, never recoverable)
///
/// ## Lifting Errors
/// - [`Error::UnsupportedInstruction`] - An instruction with no translation rule
/// - [`Error::UndecodableInstruction`] - The backend could not decode an instruction
///
/// ## Analysis Errors
/// - [`Error::GraphError`] - Control-flow graph construction error
///
/// All *expected* analysis facts that cannot be resolved (a jump to a non-literal target,
/// a branch leaving the function) are not errors: they are logged as diagnostics and the
/// analysis degrades gracefully, per the contract of [`crate::flow::FlowGraph::build`].
///
/// # Batch Processing
///
/// Every variant is scoped to a single function being decompiled. A caller processing many
/// functions should catch the error at the driver boundary, mark that function as failed,
/// and continue with the rest. [`Error::UnsupportedInstruction`] is deliberately distinct
/// so such callers can count and report skipped functions separately from genuine bugs.
#[derive(Error, Debug)]
pub enum Error {
    /// A pipeline invariant was violated.
    ///
    /// This error indicates an internal-consistency violation: replacing an expression
    /// node that has no parent, attaching a node that is already attached, or encountering
    /// a statement kind in a pipeline stage that guarantees a closed set. It is always a
    /// programming error, never a property of the input, and processing of the current
    /// function must not attempt to recover from it.
    ///
    /// # Fields
    ///
    /// * `message` - Description of the violated invariant
    /// * `file` - Source file where the violation was detected
    /// * `line` - Source line where the violation was detected
    #[error("Invariant - {file}:{line}: {message}")]
    Invariant {
        /// The message to be printed for the Invariant error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An instruction has no translation rule.
    ///
    /// Lifting cannot proceed without knowing the semantics of every instruction in the
    /// function, so this is fatal for the current function. It is a distinct, catchable
    /// kind so batch callers can skip the function and continue with others.
    #[error("Unsupported instruction '{mnemonic}' at {address:#x}")]
    UnsupportedInstruction {
        /// Mnemonic reported by the backend
        mnemonic: String,
        /// Address of the instruction that could not be translated
        address: u64,
    },

    /// The backend failed to decode an instruction.
    ///
    /// Reported when the disassembler backend returns a zero instruction size or cannot
    /// produce an operand expression for an address inside the function.
    #[error("Could not decode instruction at {0:#x}")]
    UndecodableInstruction(u64),

    /// Control-flow graph construction error.
    ///
    /// Errors related to discovering basic blocks over the raw instruction stream, such
    /// as an entry address outside the function's known instruction set or an empty
    /// function body.
    #[error("{0}")]
    GraphError(String),

    /// Generic error for miscellaneous failures.
    ///
    /// Used for errors that don't fit into other categories or for wrapping collaborator
    /// errors with additional context.
    #[error("{0}")]
    Error(String),
}

//! Error types for the taylorjet crate.
//!
//! Two layers of errors can occur:
//!
//! - `BuilderError`: failures in the Cranelift JIT pipeline (unsupported host,
//!   codegen rejection, module errors).
//! - `Error`: the crate-level error returned by the public façade, covering
//!   input validation, decomposition-time singularities, and size overflows,
//!   and wrapping `BuilderError` for compilation failures.
//!
//! Numeric failures during stepping are not errors: they surface as status
//! codes from `TaylorStepper::step` (see [`crate::stepper::StepStatus`]),
//! which can be converted back into the matching error kind with
//! [`crate::stepper::StepStatus::into_result`].

use cranelift_codegen::CodegenError;
use cranelift_module::ModuleError;
use thiserror::Error;

/// Errors raised while JIT-compiling a jet function.
///
/// These cover the stages of the Cranelift pipeline in the order they run:
/// building a target description for the host, declaring the jet function
/// and its imported math symbols, defining the function body, and lowering
/// plus finalizing the module.
#[derive(Error, Debug)]
pub enum BuilderError {
    /// No JIT backend exists for the machine this process runs on
    #[error("no JIT backend for this host: {0}")]
    UnsupportedHost(String),
    /// A function or imported-symbol declaration was rejected
    #[error("declaring `{name}` failed: {detail}")]
    Declare {
        /// The function or symbol being declared
        name: String,
        /// What the JIT module reported
        detail: String,
    },
    /// The emitted IR was rejected while defining the jet function body
    #[error("defining the jet function failed: {0}")]
    Define(String),
    /// Lowering the function to machine code failed
    #[error(transparent)]
    Codegen(#[from] CodegenError),
    /// A JIT module operation failed
    #[error(transparent)]
    Module(#[from] ModuleError),
}

/// Crate-level errors raised by the public façade.
///
/// Validation errors (`InvalidInput`, `Overflow`) are raised at construction
/// and are not recoverable by retry. `SingularDivisor` and `SingularPow` are
/// raised when a Taylor recurrence is statically known to have an ill-defined
/// leading coefficient; singularities that only develop at run time surface
/// as non-finite state through the step status instead.
#[derive(Error, Debug)]
pub enum Error {
    /// Dimension mismatches, empty equation lists, malformed options
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The JIT backend rejected the emitted program
    #[error("JIT compilation failed: {0}")]
    CompilationFailure(#[from] BuilderError),
    /// Division whose divisor has a zero leading Taylor coefficient
    #[error("division by zero leading coefficient at decomposition entry {index}")]
    SingularDivisor {
        /// Index of the offending decomposition entry
        index: usize,
    },
    /// `pow` of a zero base with a non-integer exponent
    #[error("pow of zero base with non-integer exponent at decomposition entry {index}")]
    SingularPow {
        /// Index of the offending decomposition entry
        index: usize,
    },
    /// A state coordinate became NaN or infinite
    #[error("non-finite state coordinate")]
    NonFiniteState,
    /// The deduced step size is below the representable minimum
    #[error("step size underflow")]
    StepUnderflow,
    /// A size or range computation overflowed
    #[error("size computation overflowed: {0}")]
    Overflow(String),
}

//! High-precision ODE integration through JIT-compiled Taylor series.
//!
//! This crate implements an adaptive-order, adaptive-step Taylor integrator:
//! the user specifies an ODE system symbolically, the system is decomposed
//! into a straight-line program of elementary operations, and a specialized
//! native routine computing the Taylor coefficients of the solution is
//! compiled at runtime with [Cranelift](https://cranelift.dev). An adaptive
//! stepper then drives repeated jet evaluations, deducing each step size
//! from the highest-order coefficients and advancing the state by Horner
//! evaluation of the truncated series.
//!
//! # Example
//!
//! ```
//! use taylorjet::prelude::*;
//!
//! // the harmonic oscillator x'' = -x as a first-order system
//! let equations = vec![prime("x", var("v")), prime("v", -var("x"))];
//!
//! let mut stepper = TaylorStepper::<f64>::new(
//!     equations,
//!     &[1.0, 0.0],
//!     StepperOptions {
//!         tolerance: 1e-14,
//!         ..Default::default()
//!     },
//! )
//! .unwrap();
//!
//! stepper.propagate_until(std::f64::consts::TAU).unwrap();
//! assert!((stepper.state()[0] - 1.0).abs() < 1e-12);
//! ```
//!
//! # Features
//!
//! - Symbolic expression trees with the four arithmetic operators,
//!   `pow`/`sqrt`/`exp`/`log`/`sin`/`cos`, runtime parameters and balanced
//!   pairwise summation
//! - Common-subexpression elimination during Taylor decomposition
//! - Two code-generation modes producing bit-identical jets: fully unrolled
//!   native code, and a compact table-driven form for large systems
//! - `f32` and `f64` working precisions
//! - SIMD-style batch lanes with independent per-lane times and masking
//! - Optional compensated-Horner state updates (`high_accuracy`)

#![warn(missing_docs)]

pub use decomp::{decompose, DecompOp, Decomposition, Operand};
pub use errors::{BuilderError, Error};
pub use expr::{
    cos, exp, log, number, par, pow, prime, sin, sqrt, sum, var, Equation, Expr, Func,
};
pub use registry::{lookup, FuncDef};
pub use scalar::JetScalar;
pub use stepper::{StepStatus, StepperOptions, TaylorStepper};

/// Commonly used items.
pub mod prelude {
    pub use crate::decomp::{decompose, Decomposition};
    pub use crate::errors::Error;
    pub use crate::expr::{
        cos, exp, log, number, par, pow, prime, sin, sqrt, sum, var, Equation, Expr,
    };
    pub use crate::stepper::{StepStatus, StepperOptions, TaylorStepper};
}

/// JIT host: process-wide ISA, module plumbing, compilation lock
mod builder;
/// Jet emission: open-coded and compact coefficient kernels
mod codegen;
/// Taylor decomposition of an ODE system with CSE
pub mod decomp;
/// Error types and step status codes
pub mod errors;
/// Symbolic expression trees and ODE equations
pub mod expr;
/// Process-wide registry of named functions
pub mod registry;
/// Working-precision abstraction (f32/f64)
mod scalar;
/// Adaptive Taylor stepper and public façade
pub mod stepper;
/// Per-function Taylor recurrences and libm linking
pub(crate) mod operators {
    pub(crate) mod exp;
    pub(crate) mod ln;
    pub(crate) mod pow;
    pub(crate) mod sqrt;
    pub(crate) mod trigonometric;
}

//! Working-precision abstraction for the jet compiler.
//!
//! A [`JetScalar`] binds a floating point type to its Cranelift IR type and
//! to the libm symbols the generated code calls for order-zero
//! transcendentals. The recurrences for orders k ≥ 1 are pure arithmetic and
//! need no symbols.
//!
//! Supported precisions are `f32` and `f64`, the two floating types the IR
//! builder provides.

use std::fmt::{Debug, Display};

use cranelift::prelude::{types, Type};
use cranelift_jit::JITBuilder;
use num_traits::Float;

/// External math routines callable from generated code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtCall {
    /// Natural exponential
    Exp,
    /// Natural logarithm
    Log,
    /// Sine
    Sin,
    /// Cosine
    Cos,
    /// Power with float exponent
    Pow,
}

/// A floating point type the jet compiler can generate code for.
pub trait JetScalar: Float + Debug + Display + Send + Sync + 'static {
    /// Short type name, used in log output.
    const NAME: &'static str;

    /// The Cranelift IR type of this scalar.
    fn ir_type() -> Type;

    /// Size of one scalar in bytes.
    fn bytes() -> usize;

    /// Registers the libm symbols for this precision on a JIT builder.
    fn register_symbols(builder: &mut JITBuilder);

    /// Import name of an external math routine for this precision.
    fn symbol(call: ExtCall) -> &'static str;

    /// Converts from `f64` (rounding once for narrower types).
    fn from_f64(value: f64) -> Self;

    /// Converts to `f64`.
    fn to_f64(self) -> f64;
}

impl JetScalar for f64 {
    const NAME: &'static str = "f64";

    fn ir_type() -> Type {
        types::F64
    }

    fn bytes() -> usize {
        8
    }

    fn register_symbols(builder: &mut JITBuilder) {
        builder.symbol("exp", f64::exp as *const u8);
        builder.symbol("log", f64::ln as *const u8);
        builder.symbol("sin", f64::sin as *const u8);
        builder.symbol("cos", f64::cos as *const u8);
        builder.symbol("pow", f64::powf as *const u8);
    }

    fn symbol(call: ExtCall) -> &'static str {
        match call {
            ExtCall::Exp => "exp",
            ExtCall::Log => "log",
            ExtCall::Sin => "sin",
            ExtCall::Cos => "cos",
            ExtCall::Pow => "pow",
        }
    }

    fn from_f64(value: f64) -> Self {
        value
    }

    fn to_f64(self) -> f64 {
        self
    }
}

impl JetScalar for f32 {
    const NAME: &'static str = "f32";

    fn ir_type() -> Type {
        types::F32
    }

    fn bytes() -> usize {
        4
    }

    fn register_symbols(builder: &mut JITBuilder) {
        builder.symbol("expf", f32::exp as *const u8);
        builder.symbol("logf", f32::ln as *const u8);
        builder.symbol("sinf", f32::sin as *const u8);
        builder.symbol("cosf", f32::cos as *const u8);
        builder.symbol("powf", f32::powf as *const u8);
    }

    fn symbol(call: ExtCall) -> &'static str {
        match call {
            ExtCall::Exp => "expf",
            ExtCall::Log => "logf",
            ExtCall::Sin => "sinf",
            ExtCall::Cos => "cosf",
            ExtCall::Pow => "powf",
        }
    }

    fn from_f64(value: f64) -> Self {
        value as f32
    }

    fn to_f64(self) -> f64 {
        self as f64
    }
}

//! Power with constant exponent: libm linking for JIT-compiled code and the
//! Taylor recurrence in both emission modes.
//!
//! Order zero calls the external power routine of the working precision
//! (`pow`/`powf`) with the exponent splatted as a constant; higher orders
//! use
//!
//! `a(k) = (1/(k·b(0))) · Σ_{j=0..k−1} (α·(k−j) − j) · b(k−j) · a(j)`
//!
//! The per-term constants `α·(k−j) − j` are computed in f64 through
//! [`series_coeff`] and rounded once to the working precision, identically
//! in both modes.

use cranelift::prelude::*;
use cranelift_module::{FuncId, Linkage, Module};

use crate::codegen::{JetEmitter, SlabView};
use crate::decomp::Operand;
use crate::errors::BuilderError;
use crate::scalar::JetScalar;

/// Declares the external power routine to the module. The signature is
/// `(ty, ty) -> ty`.
pub(crate) fn link_powf(module: &mut dyn Module, ty: Type, name: &str) -> Result<FuncId, String> {
    let mut sig = module.make_signature();
    sig.params.push(AbiParam::new(ty)); // base
    sig.params.push(AbiParam::new(ty)); // exponent
    sig.returns.push(AbiParam::new(ty)); // result

    module
        .declare_function(name, Linkage::Import, &sig)
        .map_err(|e| e.to_string())
}

/// Generates the IR instructions calling the previously linked power
/// routine.
pub(crate) fn call_powf(
    builder: &mut FunctionBuilder,
    module: &mut dyn Module,
    func_id: FuncId,
    base: Value,
    exponent: Value,
) -> Value {
    let func = module.declare_func_in_func(func_id, builder.func);
    let call = builder.ins().call(func, &[base, exponent]);
    builder.inst_results(call)[0]
}

/// The j-th convolution constant of the pow recurrence at order k.
pub(crate) fn series_coeff(alpha: f64, k: usize, j: usize) -> f64 {
    alpha * ((k - j) as f64) - j as f64
}

/// Open-coded emission of one (order, lane) coefficient slot.
pub(crate) fn emit_coeff(
    em: &mut JetEmitter,
    k: usize,
    idx: usize,
    lane: usize,
    base: Operand,
    exponent: f64,
) -> Result<(), BuilderError> {
    let value = if k == 0 {
        let b0 = em.operand(base, 0, lane);
        let alpha = em.fconst(exponent);
        em.call_pow(b0, alpha)?
    } else {
        let mut acc = emit_term(em, k, idx, lane, base, exponent, 0);
        for j in 1..k {
            let t = emit_term(em, k, idx, lane, base, exponent, j);
            acc = em.builder.ins().fadd(acc, t);
        }
        let kc = em.fconst(k as f64);
        let b0 = em.operand(base, 0, lane);
        let denom = em.builder.ins().fmul(kc, b0);
        em.builder.ins().fdiv(acc, denom)
    };
    em.store(value, k, idx, lane);
    Ok(())
}

// (α·(k−j) − j) · (b(k−j) · a(j))
fn emit_term(
    em: &mut JetEmitter,
    k: usize,
    idx: usize,
    lane: usize,
    base: Operand,
    exponent: f64,
    j: usize,
) -> Value {
    let c = em.fconst(series_coeff(exponent, k, j));
    let b = em.operand(base, k - j, lane);
    let a = em.coeff(j, idx, lane);
    let ba = em.builder.ins().fmul(b, a);
    em.builder.ins().fmul(c, ba)
}

/// Compact-mode routine for one (order, lane) coefficient slot.
pub(crate) fn coeff_compact<T: JetScalar>(
    view: &SlabView<T>,
    pars: &[T],
    k: usize,
    idx: usize,
    lane: usize,
    base: Operand,
    exponent: f64,
) -> T {
    if k == 0 {
        view.operand(base, 0, lane, pars)
            .powf(T::from_f64(exponent))
    } else {
        let mut acc = term(view, pars, k, idx, lane, base, exponent, 0);
        for j in 1..k {
            acc = acc + term(view, pars, k, idx, lane, base, exponent, j);
        }
        let denom = T::from_f64(k as f64) * view.operand(base, 0, lane, pars);
        acc / denom
    }
}

fn term<T: JetScalar>(
    view: &SlabView<T>,
    pars: &[T],
    k: usize,
    idx: usize,
    lane: usize,
    base: Operand,
    exponent: f64,
    j: usize,
) -> T {
    let c = T::from_f64(series_coeff(exponent, k, j));
    let b = view.operand(base, k - j, lane, pars);
    let a = view.at(j, idx, lane);
    c * (b * a)
}

//! Sine and cosine: libm linking for JIT-compiled code and the coupled
//! Taylor recurrences in both emission modes.
//!
//! Sine and cosine of the same argument are decomposed as a pair of entries
//! referencing each other, because their recurrences are coupled:
//!
//! `s(k) =  (1/k) · Σ_{j=0..k−1} (k−j) · b(k−j) · c(j)`
//! `c(k) = −(1/k) · Σ_{j=0..k−1} (k−j) · b(k−j) · s(j)`
//!
//! where `b` is the argument, `s` the sine entry and `c` the cosine entry.
//! Each order-k slot only reads the partner at orders below k, so the two
//! entries can be evaluated in either order within an order pass.

use cranelift::prelude::*;
use cranelift_module::{FuncId, Linkage, Module};

use crate::codegen::{JetEmitter, SlabView};
use crate::decomp::Operand;
use crate::errors::BuilderError;
use crate::scalar::{ExtCall, JetScalar};

/// Declares the external sine to the module. The signature is `ty -> ty`.
pub(crate) fn link_sin(module: &mut dyn Module, ty: Type, name: &str) -> Result<FuncId, String> {
    let mut sig = module.make_signature();
    sig.params.push(AbiParam::new(ty));
    sig.returns.push(AbiParam::new(ty));

    module
        .declare_function(name, Linkage::Import, &sig)
        .map_err(|e| e.to_string())
}

/// Generates the IR instructions calling the previously linked sine.
pub(crate) fn call_sin(
    builder: &mut FunctionBuilder,
    module: &mut dyn Module,
    func_id: FuncId,
    arg: Value,
) -> Value {
    let func = module.declare_func_in_func(func_id, builder.func);
    let call = builder.ins().call(func, &[arg]);
    builder.inst_results(call)[0]
}

/// Declares the external cosine to the module. The signature is `ty -> ty`.
pub(crate) fn link_cos(module: &mut dyn Module, ty: Type, name: &str) -> Result<FuncId, String> {
    let mut sig = module.make_signature();
    sig.params.push(AbiParam::new(ty));
    sig.returns.push(AbiParam::new(ty));

    module
        .declare_function(name, Linkage::Import, &sig)
        .map_err(|e| e.to_string())
}

/// Generates the IR instructions calling the previously linked cosine.
pub(crate) fn call_cos(
    builder: &mut FunctionBuilder,
    module: &mut dyn Module,
    func_id: FuncId,
    arg: Value,
) -> Value {
    let func = module.declare_func_in_func(func_id, builder.func);
    let call = builder.ins().call(func, &[arg]);
    builder.inst_results(call)[0]
}

/// Open-coded emission of one sine (order, lane) coefficient slot.
pub(crate) fn emit_sin_coeff(
    em: &mut JetEmitter,
    k: usize,
    idx: usize,
    lane: usize,
    arg: Operand,
    cos_row: usize,
) -> Result<(), BuilderError> {
    let value = if k == 0 {
        let b0 = em.operand(arg, 0, lane);
        em.call1(ExtCall::Sin, b0)?
    } else {
        let acc = emit_convolution(em, k, lane, arg, cos_row);
        let kc = em.fconst(k as f64);
        em.builder.ins().fdiv(acc, kc)
    };
    em.store(value, k, idx, lane);
    Ok(())
}

/// Open-coded emission of one cosine (order, lane) coefficient slot.
pub(crate) fn emit_cos_coeff(
    em: &mut JetEmitter,
    k: usize,
    idx: usize,
    lane: usize,
    arg: Operand,
    sin_row: usize,
) -> Result<(), BuilderError> {
    let value = if k == 0 {
        let b0 = em.operand(arg, 0, lane);
        em.call1(ExtCall::Cos, b0)?
    } else {
        let acc = emit_convolution(em, k, lane, arg, sin_row);
        let neg = em.builder.ins().fneg(acc);
        let kc = em.fconst(k as f64);
        em.builder.ins().fdiv(neg, kc)
    };
    em.store(value, k, idx, lane);
    Ok(())
}

// Σ_{j=0..k−1} (k−j) · (b(k−j) · partner(j))
fn emit_convolution(
    em: &mut JetEmitter,
    k: usize,
    lane: usize,
    arg: Operand,
    partner_row: usize,
) -> Value {
    let mut acc = emit_term(em, k, lane, arg, partner_row, 0);
    for j in 1..k {
        let t = emit_term(em, k, lane, arg, partner_row, j);
        acc = em.builder.ins().fadd(acc, t);
    }
    acc
}

fn emit_term(
    em: &mut JetEmitter,
    k: usize,
    lane: usize,
    arg: Operand,
    partner_row: usize,
    j: usize,
) -> Value {
    let c = em.fconst((k - j) as f64);
    let b = em.operand(arg, k - j, lane);
    let p = em.coeff(j, partner_row, lane);
    let bp = em.builder.ins().fmul(b, p);
    em.builder.ins().fmul(c, bp)
}

/// Compact-mode routine for one sine (order, lane) coefficient slot.
pub(crate) fn sin_coeff_compact<T: JetScalar>(
    view: &SlabView<T>,
    pars: &[T],
    k: usize,
    _idx: usize,
    lane: usize,
    arg: Operand,
    cos_row: usize,
) -> T {
    if k == 0 {
        view.operand(arg, 0, lane, pars).sin()
    } else {
        convolution(view, pars, k, lane, arg, cos_row) / T::from_f64(k as f64)
    }
}

/// Compact-mode routine for one cosine (order, lane) coefficient slot.
pub(crate) fn cos_coeff_compact<T: JetScalar>(
    view: &SlabView<T>,
    pars: &[T],
    k: usize,
    _idx: usize,
    lane: usize,
    arg: Operand,
    sin_row: usize,
) -> T {
    if k == 0 {
        view.operand(arg, 0, lane, pars).cos()
    } else {
        (-convolution(view, pars, k, lane, arg, sin_row)) / T::from_f64(k as f64)
    }
}

fn convolution<T: JetScalar>(
    view: &SlabView<T>,
    pars: &[T],
    k: usize,
    lane: usize,
    arg: Operand,
    partner_row: usize,
) -> T {
    let mut acc = term(view, pars, k, lane, arg, partner_row, 0);
    for j in 1..k {
        acc = acc + term(view, pars, k, lane, arg, partner_row, j);
    }
    acc
}

fn term<T: JetScalar>(
    view: &SlabView<T>,
    pars: &[T],
    k: usize,
    lane: usize,
    arg: Operand,
    partner_row: usize,
    j: usize,
) -> T {
    let c = T::from_f64((k - j) as f64);
    let b = view.operand(arg, k - j, lane, pars);
    let p = view.at(j, partner_row, lane);
    c * (b * p)
}

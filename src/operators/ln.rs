//! Natural logarithm: libm linking for JIT-compiled code and the Taylor
//! recurrence in both emission modes.
//!
//! Order zero calls the external logarithm of the working precision
//! (`log`/`logf`); higher orders use
//!
//! `a(k) = (b(k) − (1/k) · Σ_{j=1..k−1} j · a(j) · b(k−j)) / b(0)`
//!
//! where the inner sum is empty for k = 1.

use cranelift::prelude::*;
use cranelift_module::{FuncId, Linkage, Module};

use crate::codegen::{JetEmitter, SlabView};
use crate::decomp::Operand;
use crate::errors::BuilderError;
use crate::scalar::{ExtCall, JetScalar};

/// Declares the external logarithm to the module. The signature is
/// `ty -> ty`.
pub(crate) fn link_ln(module: &mut dyn Module, ty: Type, name: &str) -> Result<FuncId, String> {
    let mut sig = module.make_signature();
    sig.params.push(AbiParam::new(ty));
    sig.returns.push(AbiParam::new(ty));

    module
        .declare_function(name, Linkage::Import, &sig)
        .map_err(|e| e.to_string())
}

/// Generates the IR instructions calling the previously linked logarithm.
pub(crate) fn call_ln(
    builder: &mut FunctionBuilder,
    module: &mut dyn Module,
    func_id: FuncId,
    arg: Value,
) -> Value {
    let func = module.declare_func_in_func(func_id, builder.func);
    let call = builder.ins().call(func, &[arg]);
    builder.inst_results(call)[0]
}

/// Open-coded emission of one (order, lane) coefficient slot.
pub(crate) fn emit_coeff(
    em: &mut JetEmitter,
    k: usize,
    idx: usize,
    lane: usize,
    arg: Operand,
) -> Result<(), BuilderError> {
    let value = if k == 0 {
        let b0 = em.operand(arg, 0, lane);
        em.call1(ExtCall::Log, b0)?
    } else if k == 1 {
        let b1 = em.operand(arg, 1, lane);
        let b0 = em.operand(arg, 0, lane);
        em.builder.ins().fdiv(b1, b0)
    } else {
        let mut inner = emit_term(em, k, idx, lane, arg, 1);
        for j in 2..k {
            let t = emit_term(em, k, idx, lane, arg, j);
            inner = em.builder.ins().fadd(inner, t);
        }
        let kc = em.fconst(k as f64);
        let scaled = em.builder.ins().fdiv(inner, kc);
        let bk = em.operand(arg, k, lane);
        let acc = em.builder.ins().fsub(bk, scaled);
        let b0 = em.operand(arg, 0, lane);
        em.builder.ins().fdiv(acc, b0)
    };
    em.store(value, k, idx, lane);
    Ok(())
}

// j · (a(j) · b(k−j))
fn emit_term(
    em: &mut JetEmitter,
    k: usize,
    idx: usize,
    lane: usize,
    arg: Operand,
    j: usize,
) -> Value {
    let c = em.fconst(j as f64);
    let a = em.coeff(j, idx, lane);
    let b = em.operand(arg, k - j, lane);
    let ab = em.builder.ins().fmul(a, b);
    em.builder.ins().fmul(c, ab)
}

/// Compact-mode routine for one (order, lane) coefficient slot.
pub(crate) fn coeff_compact<T: JetScalar>(
    view: &SlabView<T>,
    pars: &[T],
    k: usize,
    idx: usize,
    lane: usize,
    arg: Operand,
) -> T {
    if k == 0 {
        view.operand(arg, 0, lane, pars).ln()
    } else if k == 1 {
        view.operand(arg, 1, lane, pars) / view.operand(arg, 0, lane, pars)
    } else {
        let mut inner = term(view, pars, k, idx, lane, arg, 1);
        for j in 2..k {
            inner = inner + term(view, pars, k, idx, lane, arg, j);
        }
        let scaled = inner / T::from_f64(k as f64);
        let acc = view.operand(arg, k, lane, pars) - scaled;
        acc / view.operand(arg, 0, lane, pars)
    }
}

fn term<T: JetScalar>(
    view: &SlabView<T>,
    pars: &[T],
    k: usize,
    idx: usize,
    lane: usize,
    arg: Operand,
    j: usize,
) -> T {
    let c = T::from_f64(j as f64);
    let a = view.at(j, idx, lane);
    let b = view.operand(arg, k - j, lane, pars);
    c * (a * b)
}

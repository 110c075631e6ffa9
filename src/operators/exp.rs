//! Exponential: libm linking for JIT-compiled code and the Taylor
//! recurrence in both emission modes.
//!
//! Order zero calls the external exponential of the working precision
//! (`exp`/`expf`); higher orders use the recurrence
//!
//! `a(k) = (1/k) · Σ_{j=0..k−1} (k−j) · b(k−j) · a(j)`
//!
//! which is pure arithmetic over previously computed coefficients. The
//! open-coded emitter and the compact kernel perform the same operations in
//! the same order, so their results are bit-equal.

use cranelift::prelude::*;
use cranelift_module::{FuncId, Linkage, Module};

use crate::codegen::{JetEmitter, SlabView};
use crate::decomp::Operand;
use crate::errors::BuilderError;
use crate::scalar::{ExtCall, JetScalar};

/// Declares the external exponential to the module, making it available for
/// use in JIT-compiled code. The signature is `ty -> ty`.
pub(crate) fn link_exp(module: &mut dyn Module, ty: Type, name: &str) -> Result<FuncId, String> {
    let mut sig = module.make_signature();
    sig.params.push(AbiParam::new(ty));
    sig.returns.push(AbiParam::new(ty));

    module
        .declare_function(name, Linkage::Import, &sig)
        .map_err(|e| e.to_string())
}

/// Generates the IR instructions calling the previously linked exponential.
pub(crate) fn call_exp(
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
        let a0 = em.operand(arg, 0, lane);
        em.call1(ExtCall::Exp, a0)?
    } else {
        let mut acc = emit_term(em, k, idx, lane, arg, 0);
        for j in 1..k {
            let t = emit_term(em, k, idx, lane, arg, j);
            acc = em.builder.ins().fadd(acc, t);
        }
        let kc = em.fconst(k as f64);
        em.builder.ins().fdiv(acc, kc)
    };
    em.store(value, k, idx, lane);
    Ok(())
}

// (k−j) · (b(k−j) · a(j))
fn emit_term(
    em: &mut JetEmitter,
    k: usize,
    idx: usize,
    lane: usize,
    arg: Operand,
    j: usize,
) -> Value {
    let c = em.fconst((k - j) as f64);
    let b = em.operand(arg, k - j, lane);
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
    arg: Operand,
) -> T {
    if k == 0 {
        view.operand(arg, 0, lane, pars).exp()
    } else {
        let mut acc = term(view, pars, k, idx, lane, arg, 0);
        for j in 1..k {
            acc = acc + term(view, pars, k, idx, lane, arg, j);
        }
        acc / T::from_f64(k as f64)
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
    let c = T::from_f64((k - j) as f64);
    let b = view.operand(arg, k - j, lane, pars);
    let a = view.at(j, idx, lane);
    c * (b * a)
}

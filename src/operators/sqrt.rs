//! Square root: Taylor recurrence in both emission modes.
//!
//! Order zero uses the IR builder's native sqrt instruction (and
//! `Float::sqrt` in compact mode; both are correctly rounded per IEEE 754,
//! so the modes stay bit-equal without an imported symbol). Higher orders
//! use
//!
//! `a(k) = (b(k) − Σ_{j=1..k−1} a(j)·a(k−j)) / (2·a(0))`

use cranelift::prelude::*;

use crate::codegen::{JetEmitter, SlabView};
use crate::decomp::Operand;
use crate::errors::BuilderError;
use crate::scalar::JetScalar;

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
        em.builder.ins().sqrt(b0)
    } else {
        let mut acc = em.operand(arg, k, lane);
        for j in 1..k {
            let a = em.coeff(j, idx, lane);
            let b = em.coeff(k - j, idx, lane);
            let t = em.builder.ins().fmul(a, b);
            acc = em.builder.ins().fsub(acc, t);
        }
        let two = em.fconst(2.0);
        let a0 = em.coeff(0, idx, lane);
        let denom = em.builder.ins().fmul(two, a0);
        em.builder.ins().fdiv(acc, denom)
    };
    em.store(value, k, idx, lane);
    Ok(())
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
        view.operand(arg, 0, lane, pars).sqrt()
    } else {
        let mut acc = view.operand(arg, k, lane, pars);
        for j in 1..k {
            acc = acc - view.at(j, idx, lane) * view.at(k - j, idx, lane);
        }
        let denom = T::from_f64(2.0) * view.at(0, idx, lane);
        acc / denom
    }
}

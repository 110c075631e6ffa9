//! Jet code generation: turning a Taylor decomposition into an executable
//! coefficient kernel.
//!
//! A *jet* function fills a dense slab of Taylor coefficients. The slab has
//! shape `(|D|·(p+1), B)` row-major: row `k·|D| + i` holds the order-k
//! coefficients of decomposition entry `i`, one column per batch lane. The
//! caller seeds the order-0 state rows; the kernel evaluates every
//! intermediate and derivative row for k = 0…p, refreshing the state rows of
//! each order k ≥ 1 as `u_i(k) = d_i(k−1) / k` from the derivative tail of
//! the previous order.
//!
//! Two emission modes produce bit-identical slabs:
//!
//! - **Open-coded**: a single straight-line Cranelift function with every
//!   (order, entry, lane) slot fully unrolled and all slab offsets baked in
//!   as immediates. Order-zero transcendentals call imported libm symbols;
//!   higher orders are pure arithmetic. Code size grows with `|D|·p·B`.
//! - **Compact**: no code is generated at all; the decomposition itself is
//!   the indirection table, iterated with one precompiled routine per
//!   operator signature (the `coeff_compact` kernels in
//!   [`crate::operators`]). Code size is O(distinct operators).
//!
//! Compact mode is selected automatically above [`COMPACT_THRESHOLD`]
//! entries and can be forced either way through the stepper options.
//!
//! Within one slot both modes accumulate convolution sums ascending in j
//! with identical association, which is what makes them bit-equal and keeps
//! batch lanes bit-equal to a scalar run.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use cranelift::prelude::*;
use cranelift_codegen::ir::immediates::Offset32;
use cranelift_jit::JITModule;
use cranelift_module::Module;
use tracing::debug;

use crate::builder::{compile_and_finalize, create_module_and_context, host_isa, jit_lock};
use crate::decomp::{DecompOp, Decomposition, Operand};
use crate::errors::{BuilderError, Error};
use crate::operators;
use crate::scalar::{ExtCall, JetScalar};

/// Decomposition size above which compact mode is selected automatically.
pub const COMPACT_THRESHOLD: usize = 2048;

/// Open-coded emission context for one jet function.
///
/// Wraps the function builder together with the slab geometry so operator
/// emitters can load and store coefficient slots by (order, row, lane).
pub(crate) struct JetEmitter<'a, 'b> {
    pub(crate) builder: FunctionBuilder<'b>,
    pub(crate) module: &'a mut JITModule,
    slab: Value,
    pars: Value,
    ty: Type,
    bytes: usize,
    n: usize,
    batch: usize,
    symbol: fn(ExtCall) -> &'static str,
}

impl<'a, 'b> JetEmitter<'a, 'b> {
    fn offset(&self, k: usize, row: usize, lane: usize) -> i32 {
        (((k * self.n + row) * self.batch + lane) * self.bytes) as i32
    }

    /// A constant of the working precision.
    pub(crate) fn fconst(&mut self, value: f64) -> Value {
        if self.ty == types::F32 {
            self.builder.ins().f32const(value as f32)
        } else {
            self.builder.ins().f64const(value)
        }
    }

    /// Loads the order-k coefficient of entry `row` in `lane`.
    pub(crate) fn coeff(&mut self, k: usize, row: usize, lane: usize) -> Value {
        let flags = MemFlags::new().with_aligned().with_notrap();
        let off = Offset32::new(self.offset(k, row, lane));
        self.builder.ins().load(self.ty, flags, self.slab, off)
    }

    /// Stores the order-k coefficient of entry `row` in `lane`.
    pub(crate) fn store(&mut self, value: Value, k: usize, row: usize, lane: usize) {
        let flags = MemFlags::new().with_aligned().with_notrap();
        let off = Offset32::new(self.offset(k, row, lane));
        self.builder.ins().store(flags, value, self.slab, off);
    }

    /// The order-k Taylor coefficient of an operand. Constants and
    /// parameters only contribute at order zero.
    pub(crate) fn operand(&mut self, op: Operand, k: usize, lane: usize) -> Value {
        match op {
            Operand::U(row) => self.coeff(k, row, lane),
            Operand::Const(c) => {
                if k == 0 {
                    self.fconst(c)
                } else {
                    self.fconst(0.0)
                }
            }
            Operand::Par(i) => {
                if k == 0 {
                    let flags = MemFlags::new().with_aligned().with_readonly().with_notrap();
                    let off = Offset32::new((i * self.bytes) as i32);
                    self.builder.ins().load(self.ty, flags, self.pars, off)
                } else {
                    self.fconst(0.0)
                }
            }
        }
    }

    /// Calls a unary imported math routine in the working precision.
    pub(crate) fn call1(&mut self, call: ExtCall, arg: Value) -> Result<Value, BuilderError> {
        let name = (self.symbol)(call);
        let declare_err = |detail: String| BuilderError::Declare {
            name: name.to_string(),
            detail,
        };
        let value = match call {
            ExtCall::Exp => {
                let id = operators::exp::link_exp(&mut *self.module, self.ty, name)
                    .map_err(declare_err)?;
                operators::exp::call_exp(&mut self.builder, &mut *self.module, id, arg)
            }
            ExtCall::Log => {
                let id = operators::ln::link_ln(&mut *self.module, self.ty, name)
                    .map_err(declare_err)?;
                operators::ln::call_ln(&mut self.builder, &mut *self.module, id, arg)
            }
            ExtCall::Sin => {
                let id = operators::trigonometric::link_sin(&mut *self.module, self.ty, name)
                    .map_err(declare_err)?;
                operators::trigonometric::call_sin(&mut self.builder, &mut *self.module, id, arg)
            }
            ExtCall::Cos => {
                let id = operators::trigonometric::link_cos(&mut *self.module, self.ty, name)
                    .map_err(declare_err)?;
                operators::trigonometric::call_cos(&mut self.builder, &mut *self.module, id, arg)
            }
            ExtCall::Pow => {
                return Err(declare_err("pow is binary, use call_pow".to_string()))
            }
        };
        Ok(value)
    }

    /// Calls the imported power routine in the working precision.
    pub(crate) fn call_pow(&mut self, base: Value, exponent: Value) -> Result<Value, BuilderError> {
        let name = (self.symbol)(ExtCall::Pow);
        let func_id = operators::pow::link_powf(&mut *self.module, self.ty, name).map_err(
            |detail| BuilderError::Declare {
                name: name.to_string(),
                detail,
            },
        )?;
        Ok(operators::pow::call_powf(
            &mut self.builder,
            &mut *self.module,
            func_id,
            base,
            exponent,
        ))
    }
}

/// Mutable view of a coefficient slab used by the compact-mode kernels.
pub(crate) struct SlabView<'a, T> {
    data: &'a mut [T],
    n: usize,
    batch: usize,
}

impl<T: JetScalar> SlabView<'_, T> {
    /// The order-k coefficient of entry `row` in `lane`.
    pub(crate) fn at(&self, k: usize, row: usize, lane: usize) -> T {
        self.data[(k * self.n + row) * self.batch + lane]
    }

    pub(crate) fn set(&mut self, k: usize, row: usize, lane: usize, value: T) {
        self.data[(k * self.n + row) * self.batch + lane] = value;
    }

    /// The order-k Taylor coefficient of an operand, mirroring
    /// [`JetEmitter::operand`].
    pub(crate) fn operand(&self, op: Operand, k: usize, lane: usize, pars: &[T]) -> T {
        match op {
            Operand::U(row) => self.at(k, row, lane),
            Operand::Const(c) => {
                if k == 0 {
                    T::from_f64(c)
                } else {
                    T::zero()
                }
            }
            Operand::Par(i) => {
                if k == 0 {
                    pars[i]
                } else {
                    T::zero()
                }
            }
        }
    }
}

struct CompiledJet {
    module: Option<JITModule>,
    entry: *const u8,
}

impl Drop for CompiledJet {
    fn drop(&mut self) {
        if let Some(module) = self.module.take() {
            // SAFETY: the code pointer is only reachable through the owning
            // Jet, which is being dropped with us; nothing can call into the
            // freed memory afterwards.
            unsafe { module.free_memory() };
        }
    }
}

enum JetKernel {
    Compiled(CompiledJet),
    Compact,
}

/// A compiled jet: the callable Taylor-coefficient kernel for one
/// decomposition, order, batch width and precision.
pub(crate) struct Jet<T: JetScalar> {
    decomp: Arc<Decomposition>,
    order: usize,
    batch: usize,
    kernel: JetKernel,
    _marker: PhantomData<T>,
}

impl<T: JetScalar> Jet<T> {
    /// Compiles a jet kernel. With `compact` set no native code is
    /// generated; otherwise the open-coded function is built and finalized
    /// under the process-wide JIT lock.
    pub(crate) fn new(
        decomp: Arc<Decomposition>,
        order: usize,
        batch: usize,
        compact: bool,
    ) -> Result<Self, Error> {
        let slots = slab_len(&decomp, order, batch)?;
        let kernel = if compact {
            JetKernel::Compact
        } else {
            // open-coded addressing bakes byte offsets into 32-bit immediates
            if slots
                .checked_mul(T::bytes())
                .map_or(true, |bytes| bytes > i32::MAX as usize)
            {
                return Err(Error::Overflow(
                    "slab exceeds addressable open-coded range".into(),
                ));
            }
            JetKernel::Compiled(emit_open_coded::<T>(&decomp, order, batch)?)
        };
        Ok(Jet {
            decomp,
            order,
            batch,
            kernel,
            _marker: PhantomData,
        })
    }

    pub(crate) fn is_compact(&self) -> bool {
        matches!(self.kernel, JetKernel::Compact)
    }

    /// Evaluates the jet in place. `slab` must hold
    /// `|D|·(order+1)·batch` elements with the order-0 state rows seeded;
    /// `pars` must cover every referenced parameter index.
    pub(crate) fn run(&self, slab: &mut [T], pars: &[T]) {
        debug_assert_eq!(
            slab.len(),
            self.decomp.len() * (self.order + 1) * self.batch
        );
        debug_assert!(pars.len() >= self.decomp.n_pars());
        match &self.kernel {
            JetKernel::Compiled(code) => {
                // SAFETY: the function was compiled for exactly this slab
                // geometry with a (slab, pars) pointer signature, and the
                // module owning the code is alive for the lifetime of self.
                unsafe {
                    let jet_fn = std::mem::transmute::<*const u8, extern "C" fn(*mut T, *const T)>(
                        code.entry,
                    );
                    jet_fn(slab.as_mut_ptr(), pars.as_ptr());
                }
            }
            JetKernel::Compact => run_compact(&self.decomp, self.order, self.batch, slab, pars),
        }
    }
}

/// Total slab length in elements, checked.
pub(crate) fn slab_len(decomp: &Decomposition, order: usize, batch: usize) -> Result<usize, Error> {
    decomp
        .len()
        .checked_mul(order + 1)
        .and_then(|v| v.checked_mul(batch))
        .ok_or_else(|| Error::Overflow("slab size".into()))
}

fn emit_open_coded<T: JetScalar>(
    decomp: &Decomposition,
    order: usize,
    batch: usize,
) -> Result<CompiledJet, Error> {
    let _guard = jit_lock();
    let started = Instant::now();

    let isa = host_isa()?;
    let (mut module, mut ctx) = create_module_and_context::<T>(isa);
    let ptr_ty = module.target_config().pointer_type();
    let mut sig = module.make_signature();
    sig.params.push(AbiParam::new(ptr_ty)); // slab
    sig.params.push(AbiParam::new(ptr_ty)); // pars
    ctx.func.signature = sig;

    let mut builder_ctx = FunctionBuilderContext::new();
    let mut func_builder = FunctionBuilder::new(&mut ctx.func, &mut builder_ctx);
    let entry_block = func_builder.create_block();
    func_builder.append_block_params_for_function_params(entry_block);
    func_builder.switch_to_block(entry_block);
    func_builder.seal_block(entry_block);
    let slab = func_builder.block_params(entry_block)[0];
    let pars = func_builder.block_params(entry_block)[1];

    let mut em = JetEmitter {
        builder: func_builder,
        module: &mut module,
        slab,
        pars,
        ty: T::ir_type(),
        bytes: T::bytes(),
        n: decomp.len(),
        batch,
        symbol: T::symbol,
    };

    let s = decomp.n_state();
    for k in 0..=order {
        if k > 0 {
            // u_i(k) = d_i(k-1) / k
            for i in 0..s {
                for lane in 0..batch {
                    let prev = em.coeff(k - 1, decomp.derivative_index(i), lane);
                    let kc = em.fconst(k as f64);
                    let v = em.builder.ins().fdiv(prev, kc);
                    em.store(v, k, i, lane);
                }
            }
        }
        for idx in s..decomp.len() {
            for lane in 0..batch {
                emit_entry(&mut em, &decomp.entries()[idx], k, idx, lane)?;
            }
        }
    }

    em.builder.ins().return_(&[]);
    let JetEmitter { builder, .. } = em;
    builder.finalize();

    let entry = compile_and_finalize(&mut module, &mut ctx, "taylor_jet")?;
    debug!(
        precision = T::NAME,
        n_entries = decomp.len(),
        order,
        batch,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "open-coded jet compiled"
    );
    Ok(CompiledJet {
        module: Some(module),
        entry,
    })
}

fn emit_entry(
    em: &mut JetEmitter,
    entry: &DecompOp,
    k: usize,
    idx: usize,
    lane: usize,
) -> Result<(), BuilderError> {
    let value = match entry {
        // heads are seeded (k = 0) or refreshed (k ≥ 1) outside this loop
        DecompOp::Var(_) => return Ok(()),

        DecompOp::Ident(src) => em.operand(*src, k, lane),

        DecompOp::Add(a, b) => {
            let x = em.operand(*a, k, lane);
            let y = em.operand(*b, k, lane);
            em.builder.ins().fadd(x, y)
        }

        DecompOp::Sub(a, b) => {
            let x = em.operand(*a, k, lane);
            let y = em.operand(*b, k, lane);
            em.builder.ins().fsub(x, y)
        }

        // a(k) = Σ_{j=0..k} b(j)·c(k−j)
        DecompOp::Mul(a, b) => {
            let mut acc = {
                let x = em.operand(*a, 0, lane);
                let y = em.operand(*b, k, lane);
                em.builder.ins().fmul(x, y)
            };
            for j in 1..=k {
                let x = em.operand(*a, j, lane);
                let y = em.operand(*b, k - j, lane);
                let t = em.builder.ins().fmul(x, y);
                acc = em.builder.ins().fadd(acc, t);
            }
            acc
        }

        // a(k) = (b(k) − Σ_{j=0..k−1} a(j)·c(k−j)) / c(0)
        DecompOp::Div(num, den) => {
            let mut acc = em.operand(*num, k, lane);
            for j in 0..k {
                let aj = em.coeff(j, idx, lane);
                let ck = em.operand(*den, k - j, lane);
                let t = em.builder.ins().fmul(aj, ck);
                acc = em.builder.ins().fsub(acc, t);
            }
            let c0 = em.operand(*den, 0, lane);
            em.builder.ins().fdiv(acc, c0)
        }

        DecompOp::Pow { base, exponent } => {
            return operators::pow::emit_coeff(em, k, idx, lane, *base, *exponent)
        }
        DecompOp::Sqrt(arg) => return operators::sqrt::emit_coeff(em, k, idx, lane, *arg),
        DecompOp::Exp(arg) => return operators::exp::emit_coeff(em, k, idx, lane, *arg),
        DecompOp::Log(arg) => return operators::ln::emit_coeff(em, k, idx, lane, *arg),
        DecompOp::Sin { arg, cos } => {
            return operators::trigonometric::emit_sin_coeff(em, k, idx, lane, *arg, *cos)
        }
        DecompOp::Cos { arg, sin } => {
            return operators::trigonometric::emit_cos_coeff(em, k, idx, lane, *arg, *sin)
        }
    };
    em.store(value, k, idx, lane);
    Ok(())
}

/// Compact-mode evaluation: iterate the decomposition as an indirection
/// table, dispatching each entry to its operator routine. Mirrors the
/// open-coded emission slot for slot.
fn run_compact<T: JetScalar>(
    decomp: &Decomposition,
    order: usize,
    batch: usize,
    slab: &mut [T],
    pars: &[T],
) {
    let mut view = SlabView {
        data: slab,
        n: decomp.len(),
        batch,
    };
    let s = decomp.n_state();
    for k in 0..=order {
        if k > 0 {
            for i in 0..s {
                for lane in 0..batch {
                    let prev = view.at(k - 1, decomp.derivative_index(i), lane);
                    let v = prev / T::from_f64(k as f64);
                    view.set(k, i, lane, v);
                }
            }
        }
        for idx in s..decomp.len() {
            for lane in 0..batch {
                step_entry(&mut view, pars, &decomp.entries()[idx], k, idx, lane);
            }
        }
    }
}

fn step_entry<T: JetScalar>(
    view: &mut SlabView<T>,
    pars: &[T],
    entry: &DecompOp,
    k: usize,
    idx: usize,
    lane: usize,
) {
    let value = match entry {
        DecompOp::Var(_) => return,

        DecompOp::Ident(src) => view.operand(*src, k, lane, pars),

        DecompOp::Add(a, b) => {
            view.operand(*a, k, lane, pars) + view.operand(*b, k, lane, pars)
        }

        DecompOp::Sub(a, b) => {
            view.operand(*a, k, lane, pars) - view.operand(*b, k, lane, pars)
        }

        DecompOp::Mul(a, b) => {
            let mut acc = view.operand(*a, 0, lane, pars) * view.operand(*b, k, lane, pars);
            for j in 1..=k {
                acc = acc + view.operand(*a, j, lane, pars) * view.operand(*b, k - j, lane, pars);
            }
            acc
        }

        DecompOp::Div(num, den) => {
            let mut acc = view.operand(*num, k, lane, pars);
            for j in 0..k {
                acc = acc - view.at(j, idx, lane) * view.operand(*den, k - j, lane, pars);
            }
            acc / view.operand(*den, 0, lane, pars)
        }

        DecompOp::Pow { base, exponent } => {
            operators::pow::coeff_compact(view, pars, k, idx, lane, *base, *exponent)
        }
        DecompOp::Sqrt(arg) => operators::sqrt::coeff_compact(view, pars, k, idx, lane, *arg),
        DecompOp::Exp(arg) => operators::exp::coeff_compact(view, pars, k, idx, lane, *arg),
        DecompOp::Log(arg) => operators::ln::coeff_compact(view, pars, k, idx, lane, *arg),
        DecompOp::Sin { arg, cos } => {
            operators::trigonometric::sin_coeff_compact(view, pars, k, idx, lane, *arg, *cos)
        }
        DecompOp::Cos { arg, sin } => {
            operators::trigonometric::cos_coeff_compact(view, pars, k, idx, lane, *arg, *sin)
        }
    };
    view.set(k, idx, lane, value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decomp::decompose;
    use crate::expr::{exp, log, number, par, pow, prime, sin, sqrt, var, Equation};
    use approx::assert_relative_eq;

    fn jet_slab<T: JetScalar>(
        eqs: &[Equation],
        state: &[T],
        order: usize,
        batch: usize,
        compact: bool,
    ) -> Vec<T> {
        let decomp = Arc::new(decompose(eqs).unwrap());
        let jet = Jet::<T>::new(decomp.clone(), order, batch, compact).unwrap();
        let mut slab = vec![T::zero(); slab_len(&decomp, order, batch).unwrap()];
        slab[..state.len()].copy_from_slice(state);
        jet.run(&mut slab, &[]);
        slab
    }

    fn jet_slab_pars<T: JetScalar>(
        eqs: &[Equation],
        state: &[T],
        pars: &[T],
        order: usize,
        compact: bool,
    ) -> Vec<T> {
        let decomp = Arc::new(decompose(eqs).unwrap());
        let jet = Jet::<T>::new(decomp.clone(), order, 1, compact).unwrap();
        let mut slab = vec![T::zero(); slab_len(&decomp, order, 1).unwrap()];
        slab[..state.len()].copy_from_slice(state);
        jet.run(&mut slab, pars);
        slab
    }

    #[test]
    fn test_oscillator_jet() {
        // x' = v, v' = -x from (1, 0): x = cos t, v = -sin t
        let eqs = vec![prime("x", var("v")), prime("v", -var("x"))];
        for compact in [false, true] {
            let slab = jet_slab::<f64>(&eqs, &[1.0, 0.0], 5, 1, compact);
            let n = 5;
            // cos series: 1, 0, -1/2, 0, 1/24, 0
            let cos_coeffs = [1.0, 0.0, -0.5, 0.0, 1.0 / 24.0, 0.0];
            // -sin series: 0, -1, 0, 1/6, 0, -1/120
            let sin_coeffs = [0.0, -1.0, 0.0, 1.0 / 6.0, 0.0, -1.0 / 120.0];
            for k in 0..=5 {
                assert_relative_eq!(slab[k * n], cos_coeffs[k], max_relative = 1e-15);
                assert_relative_eq!(slab[k * n + 1], sin_coeffs[k], max_relative = 1e-15);
            }
        }
    }

    #[test]
    fn test_exponential_jet_with_parameter() {
        // x' = par[0]·x from x = 1: x(k) = λ^k / k!
        let eqs = vec![prime("x", par(0) * var("x"))];
        let lambda = 2.0_f64;
        for compact in [false, true] {
            let slab = jet_slab_pars::<f64>(&eqs, &[1.0], &[lambda], 8, compact);
            let n = 3; // x, par·x, tail
            let mut expected = 1.0;
            for k in 0..=8 {
                assert_relative_eq!(slab[k * n], expected, max_relative = 1e-14);
                expected *= lambda / (k + 1) as f64;
            }
        }
    }

    #[test]
    fn test_linear_system_jet_matches_matrix_powers() {
        // x' = A·x with A = [[0, 1], [-3, -2]]; jet order k must be A^k·x/k!
        let eqs = vec![
            prime("x", var("y")),
            prime("y", number(-3.0) * var("x") + number(-2.0) * var("y")),
        ];
        let x0 = [0.7, -0.2];
        let slab = jet_slab::<f64>(&eqs, &x0, 6, 1, false);
        let n = decompose(&eqs).unwrap().len();

        let a = [[0.0, 1.0], [-3.0, -2.0]];
        let mut v = x0;
        let mut factorial = 1.0;
        for k in 0..=6 {
            assert_relative_eq!(slab[k * n], v[0] / factorial, max_relative = 1e-12);
            assert_relative_eq!(slab[k * n + 1], v[1] / factorial, max_relative = 1e-12);
            let next = [
                a[0][0] * v[0] + a[0][1] * v[1],
                a[1][0] * v[0] + a[1][1] * v[1],
            ];
            v = next;
            factorial *= (k + 1) as f64;
        }
    }

    fn mixed_ops_system() -> Vec<Equation> {
        vec![
            prime(
                "x",
                exp(var("y")) * sin(var("x")) + pow(var("x"), number(2.5)) / sqrt(1.0 + var("y") * var("y")),
            ),
            prime("y", log(var("x")) - var("y") / (var("x") + 2.0)),
        ]
    }

    #[test]
    fn test_compact_mode_bit_equality_f64() {
        let eqs = mixed_ops_system();
        let open = jet_slab::<f64>(&eqs, &[0.7, 0.3], 12, 1, false);
        let compact = jet_slab::<f64>(&eqs, &[0.7, 0.3], 12, 1, true);
        for (a, b) in open.iter().zip(&compact) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_compact_mode_bit_equality_f32() {
        let eqs = mixed_ops_system();
        let open = jet_slab::<f32>(&eqs, &[0.7, 0.3], 8, 1, false);
        let compact = jet_slab::<f32>(&eqs, &[0.7, 0.3], 8, 1, true);
        for (a, b) in open.iter().zip(&compact) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_batch_lanes_match_scalar() {
        let eqs = mixed_ops_system();
        let scalar = jet_slab::<f64>(&eqs, &[0.7, 0.3], 6, 1, false);
        // four identical lanes, coordinate-major seeding
        let batched = jet_slab::<f64>(
            &eqs,
            &[0.7, 0.7, 0.7, 0.7, 0.3, 0.3, 0.3, 0.3],
            6,
            4,
            false,
        );
        let n = decompose(&eqs).unwrap().len();
        for k in 0..=6 {
            for row in 0..n {
                for lane in 0..4 {
                    assert_eq!(
                        batched[(k * n + row) * 4 + lane].to_bits(),
                        scalar[k * n + row].to_bits()
                    );
                }
            }
        }
    }

    #[test]
    fn test_sincos_jet() {
        // x' = sin(x) from x = 1: check the first few derivatives directly.
        // x(1) = sin x0, x(2) = sin x0 · cos x0 / 2
        let eqs = vec![prime("x", sin(var("x")))];
        let x0 = 1.0_f64;
        let slab = jet_slab::<f64>(&eqs, &[x0], 3, 1, false);
        let n = decompose(&eqs).unwrap().len();
        assert_relative_eq!(slab[n], x0.sin(), max_relative = 1e-15);
        assert_relative_eq!(
            slab[2 * n],
            x0.sin() * x0.cos() / 2.0,
            max_relative = 1e-14
        );
    }
}

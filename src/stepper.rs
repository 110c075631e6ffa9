//! Adaptive Taylor stepper: the public façade of the crate.
//!
//! A [`TaylorStepper`] binds an ODE system to a compiled jet kernel, a state
//! buffer and a step-control loop. Each step evaluates the jet at the
//! current expansion point, deduces a step size from the last two Taylor
//! coefficient blocks of the state rows, and advances the state by Horner
//! evaluation of the truncated series.
//!
//! Step size deduction, per lane:
//!
//! `h* = min(ρ·(ε/M_p)^(1/p), ρ·(ε/M_{p−1})^(1/(p−1)))`
//!
//! where `M_p` and `M_{p−1}` are the ∞-norms of the two highest-order state
//! coefficient blocks, `ρ = e^(−7/10)` is the safety factor, and the
//! tolerance ε is blended relative/absolute by scaling with
//! `max(1, ‖x‖_∞)`. A degenerate norm (zero or non-finite) falls back to
//! the other block; if both degenerate the step defaults to
//! `T::max_value().sqrt()`.
//!
//! Batch lanes advance together under a shared control loop: the step
//! magnitude of an outer iteration is the per-lane minimum over active
//! lanes, each lane then applies its own direction sign and end clamp. A
//! lane that has reached its target keeps a zero step, which holds its
//! state and time bit-exactly without branching in the update loops.
//!
//! A stepper is not thread-safe; construct one per thread instead. The
//! compiled jet, the coefficient slab and the parameter buffer live exactly
//! as long as the stepper.

use std::sync::Arc;

use num_traits::Float;
use tracing::debug;

use crate::codegen::{slab_len, Jet, COMPACT_THRESHOLD};
use crate::decomp::{decompose, Decomposition};
use crate::errors::Error;
use crate::expr::Equation;
use crate::scalar::JetScalar;

/// Outcome of a single step or a propagation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepStatus {
    /// The step was taken with the deduced step size
    Success,
    /// Every lane reached the requested final time
    TimeLimitReached,
    /// A state coordinate became NaN or infinite
    ErrNonFiniteState,
    /// The maximum step count was exhausted before reaching the target
    ErrMaxIters,
    /// The deduced step underflowed (t + h == t)
    ErrMinStep,
}

impl StepStatus {
    /// True for the error statuses.
    pub fn is_err(self) -> bool {
        matches!(
            self,
            StepStatus::ErrNonFiniteState | StepStatus::ErrMaxIters | StepStatus::ErrMinStep
        )
    }

    /// Converts the status into a `Result`, mapping the error statuses onto
    /// the matching [`Error`] kinds.
    pub fn into_result(self) -> Result<(), Error> {
        match self {
            StepStatus::Success | StepStatus::TimeLimitReached => Ok(()),
            StepStatus::ErrNonFiniteState => Err(Error::NonFiniteState),
            StepStatus::ErrMinStep => Err(Error::StepUnderflow),
            StepStatus::ErrMaxIters => Err(Error::InvalidInput(
                "maximum step count exhausted before reaching the target time".into(),
            )),
        }
    }
}

/// Configuration for a [`TaylorStepper`].
///
/// The defaults follow the working precision: machine-epsilon tolerance and
/// the order `⌈−ln ε / 2⌉ + 1` derived from it.
#[derive(Clone, Debug)]
pub struct StepperOptions<T> {
    /// Relative/absolute tolerance applied to the Taylor norm test
    pub tolerance: T,
    /// Taylor order override; `None` derives it from the tolerance
    pub order: Option<usize>,
    /// Number of SIMD lanes advanced together
    pub batch: usize,
    /// Force compact emission on or off; `None` selects automatically
    pub compact_mode: Option<bool>,
    /// Use Kahan-compensated Horner evaluation for the polynomial step
    pub high_accuracy: bool,
    /// Runtime parameter vector, shared across lanes
    pub params: Vec<T>,
    /// Maximum number of steps for `propagate_until` / `propagate_for`
    pub max_steps: usize,
}

impl Default for StepperOptions<f64> {
    fn default() -> Self {
        Self {
            tolerance: f64::EPSILON,
            order: None,
            batch: 1,
            compact_mode: None,
            high_accuracy: false,
            params: Vec::new(),
            max_steps: 500_000,
        }
    }
}

impl Default for StepperOptions<f32> {
    fn default() -> Self {
        Self {
            tolerance: f32::EPSILON,
            order: None,
            batch: 1,
            compact_mode: None,
            high_accuracy: false,
            params: Vec::new(),
            max_steps: 500_000,
        }
    }
}

/// An adaptive-order, adaptive-step Taylor integrator for one ODE system.
pub struct TaylorStepper<T: JetScalar> {
    decomp: Arc<Decomposition>,
    jet: Jet<T>,
    /// Current state, coordinate-major: `state[i·B + lane]`
    state: Vec<T>,
    /// Current time, one per lane
    time: Vec<T>,
    pars: Vec<T>,
    /// Taylor slab of the last jet evaluation
    slab: Vec<T>,
    /// Step applied to each lane in the last step
    h_last: Vec<T>,
    order: usize,
    batch: usize,
    tol: T,
    high_accuracy: bool,
    max_steps: usize,
}

impl<T: JetScalar> TaylorStepper<T> {
    /// Builds a stepper from an ODE system, an initial state and options.
    ///
    /// `initial_state` is coordinate-major: S·B values, the B lanes of the
    /// first coordinate first. Validation failures, decomposition-time
    /// singularities and compilation failures are reported as [`Error`].
    pub fn new(
        equations: Vec<Equation>,
        initial_state: &[T],
        options: StepperOptions<T>,
    ) -> Result<Self, Error> {
        let StepperOptions {
            tolerance,
            order,
            batch,
            compact_mode,
            high_accuracy,
            params,
            max_steps,
        } = options;

        if batch == 0 {
            return Err(Error::InvalidInput("batch width must be at least 1".into()));
        }
        if !tolerance.is_finite() || tolerance <= T::zero() {
            return Err(Error::InvalidInput(
                "tolerance must be positive and finite".into(),
            ));
        }

        let decomp = Arc::new(decompose(&equations)?);
        let s = decomp.n_state();

        if initial_state.len() != s * batch {
            return Err(Error::InvalidInput(format!(
                "initial state has {} values, expected {} (S = {s}, batch = {batch})",
                initial_state.len(),
                s * batch
            )));
        }
        if initial_state.iter().any(|v| !v.is_finite()) {
            return Err(Error::NonFiniteState);
        }
        if params.len() < decomp.n_pars() {
            return Err(Error::InvalidInput(format!(
                "parameter vector has {} values, system references {}",
                params.len(),
                decomp.n_pars()
            )));
        }

        let order = match order {
            Some(p) if p >= 2 => p,
            Some(p) => {
                return Err(Error::InvalidInput(format!(
                    "order must be at least 2, got {p}"
                )))
            }
            None => default_order(tolerance.to_f64()),
        };

        let compact = match compact_mode {
            Some(forced) => forced,
            None => {
                decomp.len() > COMPACT_THRESHOLD
                    || slab_len(&decomp, order, batch)?
                        .checked_mul(T::bytes())
                        .map_or(true, |bytes| bytes > i32::MAX as usize)
            }
        };

        let jet = Jet::new(decomp.clone(), order, batch, compact)?;
        let slab = vec![T::zero(); slab_len(&decomp, order, batch)?];

        debug!(
            precision = T::NAME,
            n_state = s,
            n_entries = decomp.len(),
            order,
            batch,
            compact,
            "taylor stepper constructed"
        );

        Ok(TaylorStepper {
            decomp,
            jet,
            state: initial_state.to_vec(),
            time: vec![T::zero(); batch],
            pars: params,
            slab,
            h_last: vec![T::zero(); batch],
            order,
            batch,
            tol: tolerance,
            high_accuracy,
            max_steps,
        })
    }

    /// Takes one forward step with the deduced step size.
    ///
    /// Returns the status and the step applied to the first lane; the
    /// per-lane steps are available through
    /// [`last_step_sizes`](Self::last_step_sizes).
    pub fn step(&mut self) -> (StepStatus, T) {
        self.step_impl(None)
    }

    /// Propagates every lane until time `t_f`, stepping adaptively and
    /// clamping the last step to land exactly on `t_f`. The direction is
    /// the sign of `t_f` minus the current time, per lane.
    pub fn propagate_until(&mut self, t_f: T) -> Result<StepStatus, Error> {
        if !t_f.is_finite() {
            return Err(Error::InvalidInput("non-finite target time".into()));
        }
        let targets = vec![t_f; self.batch];
        Ok(self.propagate_to(&targets))
    }

    /// Propagates every lane for a time span `delta` from its own current
    /// time. Defined as `propagate_until(t + delta)` per lane.
    pub fn propagate_for(&mut self, delta: T) -> Result<StepStatus, Error> {
        if !delta.is_finite() {
            return Err(Error::InvalidInput("non-finite time span".into()));
        }
        let targets: Vec<T> = self.time.iter().map(|&t| t + delta).collect();
        Ok(self.propagate_to(&targets))
    }

    fn propagate_to(&mut self, targets: &[T]) -> StepStatus {
        for _ in 0..self.max_steps {
            let (status, _) = self.step_impl(Some(targets));
            match status {
                StepStatus::Success => continue,
                done => return done,
            }
        }
        StepStatus::ErrMaxIters
    }

    fn step_impl(&mut self, targets: Option<&[T]>) -> (StepStatus, T) {
        let s = self.decomp.n_state();
        let b = self.batch;
        let p = self.order;

        if let Some(tg) = targets {
            if self.time.iter().zip(tg).all(|(t, f)| t == f) {
                return (StepStatus::TimeLimitReached, T::zero());
            }
        }

        // Expansion point: order-0 state rows are the leading slab rows.
        self.slab[..s * b].copy_from_slice(&self.state);
        self.jet.run(&mut self.slab, &self.pars);

        // Per-lane step magnitude from the two highest coefficient blocks.
        let rho = T::from_f64((-7.0_f64 / 10.0).exp());
        for lane in 0..b {
            if !self.lane_active(targets, lane) {
                self.h_last[lane] = T::zero();
                continue;
            }
            let mut m_p = T::zero();
            let mut m_pm1 = T::zero();
            let mut x_inf = T::zero();
            for i in 0..s {
                m_p = m_p.max(self.coeff_at(p, i, lane).abs());
                m_pm1 = m_pm1.max(self.coeff_at(p - 1, i, lane).abs());
                x_inf = x_inf.max(self.state[i * b + lane].abs());
            }
            let eps = self.tol * T::one().max(x_inf);
            let top = step_candidate(rho, eps, m_p, p);
            let next = step_candidate(rho, eps, m_pm1, p - 1);
            self.h_last[lane] = match (top, next) {
                (Some(a), Some(c)) => a.min(c),
                (Some(a), None) => a,
                (None, Some(c)) => c,
                (None, None) => T::max_value().sqrt(),
            };
        }

        // Shared control loop: the common magnitude is the per-lane minimum
        // over active lanes.
        let mut common = T::infinity();
        for lane in 0..b {
            if self.lane_active(targets, lane) {
                common = common.min(self.h_last[lane]);
            }
        }

        // Sign, end clamp and underflow check per lane.
        for lane in 0..b {
            if !self.lane_active(targets, lane) {
                self.h_last[lane] = T::zero();
                continue;
            }
            match targets {
                None => {
                    if self.time[lane] + common == self.time[lane] {
                        return (StepStatus::ErrMinStep, T::zero());
                    }
                    self.h_last[lane] = common;
                }
                Some(tg) => {
                    let remaining = tg[lane] - self.time[lane];
                    if remaining.abs() <= common {
                        self.h_last[lane] = remaining;
                    } else {
                        let signed = if remaining >= T::zero() { common } else { -common };
                        if self.time[lane] + signed == self.time[lane] {
                            return (StepStatus::ErrMinStep, T::zero());
                        }
                        self.h_last[lane] = signed;
                    }
                }
            }
        }

        // Polynomial step: Horner on the state coefficient rows. A masked
        // lane has h = 0 and reproduces its order-0 coefficient bit-exactly.
        for i in 0..s {
            for lane in 0..b {
                let h = self.h_last[lane];
                let value = if self.high_accuracy {
                    self.horner_compensated(i, lane, h)
                } else {
                    self.horner(i, lane, h)
                };
                self.state[i * b + lane] = value;
            }
        }
        for lane in 0..b {
            match targets {
                Some(tg) if self.h_last[lane] == tg[lane] - self.time[lane] => {
                    // clamped step: land exactly on the target
                    self.time[lane] = tg[lane];
                }
                _ => self.time[lane] = self.time[lane] + self.h_last[lane],
            }
        }

        if self.state.iter().any(|v| !v.is_finite()) {
            return (StepStatus::ErrNonFiniteState, self.h_last[0]);
        }

        let status = match targets {
            Some(tg) if self.time.iter().zip(tg).all(|(t, f)| t == f) => {
                StepStatus::TimeLimitReached
            }
            _ => StepStatus::Success,
        };
        (status, self.h_last[0])
    }

    fn lane_active(&self, targets: Option<&[T]>, lane: usize) -> bool {
        targets.map_or(true, |tg| self.time[lane] != tg[lane])
    }

    fn coeff_at(&self, k: usize, row: usize, lane: usize) -> T {
        self.slab[(k * self.decomp.len() + row) * self.batch + lane]
    }

    fn horner(&self, i: usize, lane: usize, h: T) -> T {
        let mut acc = self.coeff_at(self.order, i, lane);
        for k in (0..self.order).rev() {
            acc = self.coeff_at(k, i, lane) + h * acc;
        }
        acc
    }

    /// Compensated Horner: TwoProd/TwoSum error-free transformations with
    /// the accumulated error folded back in at the end.
    fn horner_compensated(&self, i: usize, lane: usize, h: T) -> T {
        let mut acc = self.coeff_at(self.order, i, lane);
        let mut err = T::zero();
        for k in (0..self.order).rev() {
            let (prod, e_prod) = two_prod(acc, h);
            let (sum, e_sum) = two_sum(prod, self.coeff_at(k, i, lane));
            acc = sum;
            err = err * h + (e_prod + e_sum);
        }
        acc + err
    }

    /// Current state, coordinate-major (`state[i·B + lane]`).
    pub fn state(&self) -> &[T] {
        &self.state
    }

    /// Current time, one per lane.
    pub fn time(&self) -> &[T] {
        &self.time
    }

    /// Sets the time of every lane.
    pub fn set_time(&mut self, t: T) -> Result<(), Error> {
        if !t.is_finite() {
            return Err(Error::InvalidInput("non-finite time".into()));
        }
        self.time.fill(t);
        Ok(())
    }

    /// Sets per-lane times.
    pub fn set_times(&mut self, times: &[T]) -> Result<(), Error> {
        if times.len() != self.batch {
            return Err(Error::InvalidInput(format!(
                "expected {} lane times, got {}",
                self.batch,
                times.len()
            )));
        }
        if times.iter().any(|t| !t.is_finite()) {
            return Err(Error::InvalidInput("non-finite time".into()));
        }
        self.time.copy_from_slice(times);
        Ok(())
    }

    /// The runtime parameter vector.
    pub fn params(&self) -> &[T] {
        &self.pars
    }

    /// Replaces the runtime parameter vector between steps.
    pub fn set_params(&mut self, params: &[T]) -> Result<(), Error> {
        if params.len() < self.decomp.n_pars() {
            return Err(Error::InvalidInput(format!(
                "parameter vector has {} values, system references {}",
                params.len(),
                self.decomp.n_pars()
            )));
        }
        self.pars.clear();
        self.pars.extend_from_slice(params);
        Ok(())
    }

    /// The Taylor coefficient slab of the last jet evaluation, shape
    /// `(|D|·(order+1), batch)` row-major. Rows `k·|D| + i` for i < S hold
    /// the order-k coefficients of the state variables at the expansion
    /// point of the last step.
    pub fn coefficients(&self) -> &[T] {
        &self.slab
    }

    /// Step applied to each lane in the last step.
    pub fn last_step_sizes(&self) -> &[T] {
        &self.h_last
    }

    /// The Taylor order p.
    pub fn order(&self) -> usize {
        self.order
    }

    /// The batch width B.
    pub fn batch(&self) -> usize {
        self.batch
    }

    /// The tolerance ε.
    pub fn tolerance(&self) -> T {
        self.tol
    }

    /// The underlying decomposition.
    pub fn decomposition(&self) -> &Decomposition {
        &self.decomp
    }

    /// True when the jet kernel runs in compact mode.
    pub fn is_compact(&self) -> bool {
        self.jet.is_compact()
    }
}

/// `ρ·(ε/M)^(1/q)`, or `None` when the norm is degenerate.
fn step_candidate<T: JetScalar>(rho: T, eps: T, m: T, q: usize) -> Option<T> {
    if !m.is_finite() || m <= T::zero() {
        return None;
    }
    Some(rho * (eps / m).powf(T::one() / T::from_f64(q as f64)))
}

/// Default order: `⌈−ln ε / 2⌉ + 1`, at least 2.
fn default_order(tolerance: f64) -> usize {
    let p = (-tolerance.ln() / 2.0).ceil() as usize + 1;
    p.max(2)
}

fn two_sum<T: Float>(a: T, b: T) -> (T, T) {
    let s = a + b;
    let z = s - a;
    let e = (a - (s - z)) + (b - z);
    (s, e)
}

fn two_prod<T: Float>(a: T, b: T) -> (T, T) {
    let p = a * b;
    let e = a.mul_add(b, -p);
    (p, e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{number, par, pow, prime, sum, var, Expr};
    use approx::assert_abs_diff_eq;
    use std::f64::consts::{PI, TAU};

    fn oscillator() -> Vec<Equation> {
        vec![prime("x", var("v")), prime("v", -var("x"))]
    }

    fn opts_f64(tol: f64) -> StepperOptions<f64> {
        StepperOptions {
            tolerance: tol,
            ..Default::default()
        }
    }

    #[test]
    fn test_harmonic_oscillator_round_trip() {
        let mut stepper =
            TaylorStepper::<f64>::new(oscillator(), &[1.0, 0.0], opts_f64(1e-14)).unwrap();
        let status = stepper.propagate_until(TAU).unwrap();
        assert_eq!(status, StepStatus::TimeLimitReached);
        assert_eq!(stepper.time()[0], TAU);
        assert_abs_diff_eq!(stepper.state()[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(stepper.state()[1], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_energy_conservation() {
        let mut stepper =
            TaylorStepper::<f64>::new(oscillator(), &[1.0, 0.0], opts_f64(1e-14)).unwrap();
        let e0 = 0.5 * (1.0_f64 * 1.0 + 0.0 * 0.0);
        stepper.propagate_until(50.0).unwrap();
        let (x, v) = (stepper.state()[0], stepper.state()[1]);
        let e = 0.5 * (x * x + v * v);
        // documented bound: relative drift below 10·ε
        assert!(((e - e0) / e0).abs() <= 10.0 * 1e-14);
    }

    #[test]
    fn test_time_reversal() {
        let mut stepper =
            TaylorStepper::<f64>::new(oscillator(), &[1.0, 0.0], opts_f64(1e-14)).unwrap();
        stepper.propagate_until(3.0).unwrap();
        let status = stepper.propagate_until(0.0).unwrap();
        assert_eq!(status, StepStatus::TimeLimitReached);
        assert_abs_diff_eq!(stepper.state()[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(stepper.state()[1], 0.0, epsilon = 1e-12);
    }

    fn kepler() -> Vec<Equation> {
        // planar two-body problem, GM = 1
        let r2 = var("x") * var("x") + var("y") * var("y");
        let r3 = pow(r2, number(1.5));
        vec![
            prime("x", var("vx")),
            prime("y", var("vy")),
            prime("vx", -var("x") / r3.clone()),
            prime("vy", -var("y") / r3),
        ]
    }

    #[test]
    fn test_kepler_circular_orbit() {
        let mut stepper =
            TaylorStepper::<f64>::new(kepler(), &[1.0, 0.0, 0.0, 1.0], opts_f64(1e-14)).unwrap();
        stepper.propagate_until(TAU).unwrap();
        let st = stepper.state();
        let radius = (st[0] * st[0] + st[1] * st[1]).sqrt();
        let angle = st[1].atan2(st[0]);
        assert_abs_diff_eq!(radius, 1.0, epsilon = 1e-12);
        assert!(angle.abs() <= 1e-11, "angle error {angle}");
    }

    /// Planar N-body acceleration sum for one coordinate, with massless
    /// bodies contributing no terms (the way a model builder would write
    /// it).
    fn nbody_accel(target: usize, coord: &str, masses: &[f64]) -> Expr {
        let mut terms = Vec::new();
        for (j, &m) in masses.iter().enumerate() {
            if j == target || m == 0.0 {
                continue;
            }
            let dx = var(format!("x{j}")) - var(format!("x{target}"));
            let dy = var(format!("y{j}")) - var(format!("y{target}"));
            let d3 = pow(dx.clone() * dx.clone() + dy.clone() * dy.clone(), number(1.5));
            let dc = if coord == "x" { dx } else { dy };
            terms.push(number(m) * dc / d3);
        }
        sum(terms)
    }

    #[test]
    fn test_three_body_massless_coincident() {
        // masses [1, 0, 0]: the massless pair feels only the massive body,
        // so making them coincident must not produce a singularity.
        let masses = [1.0, 0.0, 0.0];
        let mut eqs = Vec::new();
        for i in 0..3 {
            eqs.push(prime(format!("x{i}"), var(format!("vx{i}"))));
            eqs.push(prime(format!("y{i}"), var(format!("vy{i}"))));
            eqs.push(prime(format!("vx{i}"), nbody_accel(i, "x", &masses)));
            eqs.push(prime(format!("vy{i}"), nbody_accel(i, "y", &masses)));
        }
        // per body: x, y, vx, vy; bodies 1 and 2 coincident on a circular
        // orbit around body 0
        let init = [
            0.0, 0.0, 0.0, 0.0, // body 0 at rest
            1.0, 0.0, 0.0, 1.0, // body 1
            1.0, 0.0, 0.0, 1.0, // body 2, coincident with body 1
        ];
        let mut stepper = TaylorStepper::<f64>::new(eqs, &init, opts_f64(1e-12)).unwrap();
        let status = stepper.propagate_until(PI).unwrap();
        assert_eq!(status, StepStatus::TimeLimitReached);

        let st = stepper.state();
        assert!(st.iter().all(|v| v.is_finite()));
        // body 0 never moves: it feels no massless bodies
        assert_abs_diff_eq!(st[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(st[1], 0.0, epsilon = 1e-12);
        // the coincident massless bodies stay coincident
        for c in 0..4 {
            assert_eq!(st[4 + c].to_bits(), st[8 + c].to_bits());
        }
        // and follow the circular orbit: at t = π they sit at (-1, 0)
        assert_abs_diff_eq!(st[4], -1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(st[5], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_batch_matches_scalar_bit_exactly() {
        let mut scalar =
            TaylorStepper::<f64>::new(oscillator(), &[1.0, 0.0], opts_f64(1e-14)).unwrap();
        let mut batched = TaylorStepper::<f64>::new(
            oscillator(),
            &[1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0],
            StepperOptions {
                tolerance: 1e-14,
                batch: 4,
                ..Default::default()
            },
        )
        .unwrap();
        scalar.propagate_until(1.5).unwrap();
        batched.propagate_until(1.5).unwrap();
        for i in 0..2 {
            for lane in 0..4 {
                assert_eq!(
                    batched.state()[i * 4 + lane].to_bits(),
                    scalar.state()[i].to_bits()
                );
            }
        }
    }

    #[test]
    fn test_lane_masking_with_per_lane_times() {
        // lane 1 starts halfway to the target, finishes first and must hold
        // its state while lane 0 keeps stepping
        let mut stepper = TaylorStepper::<f64>::new(
            oscillator(),
            &[1.0, 1.0, 0.0, 0.0],
            StepperOptions {
                tolerance: 1e-14,
                batch: 2,
                ..Default::default()
            },
        )
        .unwrap();
        stepper.set_times(&[0.0, 0.5]).unwrap();
        let status = stepper.propagate_until(1.0).unwrap();
        assert_eq!(status, StepStatus::TimeLimitReached);
        assert_eq!(stepper.time(), &[1.0, 1.0][..]);
        // lane 0 integrated for 1.0, lane 1 for 0.5; both start at (1, 0),
        // so lane k holds cos/-sin of the integrated span
        assert_abs_diff_eq!(stepper.state()[0], 1.0_f64.cos(), epsilon = 1e-12);
        assert_abs_diff_eq!(stepper.state()[1], 0.5_f64.cos(), epsilon = 1e-12);
        assert_abs_diff_eq!(stepper.state()[2], -(1.0_f64.sin()), epsilon = 1e-12);
        assert_abs_diff_eq!(stepper.state()[3], -(0.5_f64.sin()), epsilon = 1e-12);
    }

    #[test]
    fn test_step_control_scaling() {
        // halving ε shrinks the step by ≈ 2^(1/p) at fixed order
        let order = 14;
        let mut h = [0.0_f64; 2];
        for (slot, tol) in [(0_usize, 1e-10), (1, 5e-11)] {
            let mut stepper = TaylorStepper::<f64>::new(
                oscillator(),
                &[1.0, 0.0],
                StepperOptions {
                    tolerance: tol,
                    order: Some(order),
                    ..Default::default()
                },
            )
            .unwrap();
            let (status, step) = stepper.step();
            assert_eq!(status, StepStatus::Success);
            h[slot] = step;
        }
        let ratio = h[0] / h[1];
        let lo = 2.0_f64.powf(1.0 / order as f64);
        let hi = 2.0_f64.powf(1.0 / (order - 1) as f64);
        assert!(
            ratio >= lo * 0.98 && ratio <= hi * 1.02,
            "step ratio {ratio}, expected within [{lo}, {hi}]"
        );
    }

    #[test]
    fn test_compact_and_open_coded_propagate_bit_equally() {
        let run = |compact: bool| {
            let mut stepper = TaylorStepper::<f64>::new(
                kepler(),
                &[1.0, 0.0, 0.0, 1.0],
                StepperOptions {
                    tolerance: 1e-12,
                    compact_mode: Some(compact),
                    ..Default::default()
                },
            )
            .unwrap();
            assert_eq!(stepper.is_compact(), compact);
            stepper.propagate_for(0.75).unwrap();
            stepper.state().to_vec()
        };
        let open = run(false);
        let compact = run(true);
        for (a, b) in open.iter().zip(&compact) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_parameter_update_between_steps() {
        // x' = par[0]·x
        let eqs = vec![prime("x", par(0) * var("x"))];
        let mut stepper = TaylorStepper::<f64>::new(
            eqs,
            &[1.0],
            StepperOptions {
                tolerance: 1e-14,
                params: vec![1.0],
                ..Default::default()
            },
        )
        .unwrap();
        stepper.propagate_until(1.0).unwrap();
        let x1 = stepper.state()[0];
        assert_abs_diff_eq!(x1, 1.0_f64.exp(), epsilon = 1e-12);

        // switch to decay and integrate back down
        stepper.set_params(&[-1.0]).unwrap();
        stepper.propagate_until(2.0).unwrap();
        assert_abs_diff_eq!(stepper.state()[0], 1.0, epsilon = 1e-11);
    }

    #[test]
    fn test_singular_blowup_is_reported() {
        // x' = x² from x = 1 blows up at t = 1
        let eqs = vec![prime("x", var("x") * var("x"))];
        let mut stepper = TaylorStepper::<f64>::new(
            eqs,
            &[1.0],
            StepperOptions {
                tolerance: 1e-12,
                max_steps: 2_000,
                ..Default::default()
            },
        )
        .unwrap();
        let status = stepper.propagate_until(2.0).unwrap();
        assert!(status.is_err(), "blow-up reported {status:?}");
        assert!(status.into_result().is_err());
    }

    #[test]
    fn test_high_accuracy_mode() {
        let mut plain = TaylorStepper::<f64>::new(
            oscillator(),
            &[1.0, 0.0],
            opts_f64(1e-14),
        )
        .unwrap();
        let mut compensated = TaylorStepper::<f64>::new(
            oscillator(),
            &[1.0, 0.0],
            StepperOptions {
                tolerance: 1e-14,
                high_accuracy: true,
                ..Default::default()
            },
        )
        .unwrap();
        plain.propagate_until(TAU).unwrap();
        compensated.propagate_until(TAU).unwrap();
        assert_abs_diff_eq!(compensated.state()[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(compensated.state()[1], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(plain.state()[0], compensated.state()[0], epsilon = 1e-13);
    }

    #[test]
    fn test_f32_oscillator() {
        let mut stepper = TaylorStepper::<f32>::new(
            oscillator(),
            &[1.0_f32, 0.0],
            StepperOptions {
                tolerance: 1e-6,
                ..Default::default()
            },
        )
        .unwrap();
        let status = stepper.propagate_until(std::f32::consts::TAU).unwrap();
        assert_eq!(status, StepStatus::TimeLimitReached);
        assert!((stepper.state()[0] - 1.0).abs() <= 1e-3);
        assert!(stepper.state()[1].abs() <= 1e-3);
    }

    #[test]
    fn test_validation_errors() {
        assert!(matches!(
            TaylorStepper::<f64>::new(vec![], &[], StepperOptions::default()),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            TaylorStepper::<f64>::new(oscillator(), &[1.0], StepperOptions::default()),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            TaylorStepper::<f64>::new(
                oscillator(),
                &[1.0, 0.0],
                StepperOptions {
                    tolerance: -1.0,
                    ..Default::default()
                }
            ),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            TaylorStepper::<f64>::new(
                oscillator(),
                &[1.0, 0.0],
                StepperOptions {
                    order: Some(1),
                    ..Default::default()
                }
            ),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            TaylorStepper::<f64>::new(oscillator(), &[1.0, f64::NAN], StepperOptions::default()),
            Err(Error::NonFiniteState)
        ));
        // missing parameter vector entry
        let eqs = vec![prime("x", par(0) * var("x"))];
        assert!(matches!(
            TaylorStepper::<f64>::new(eqs, &[1.0], StepperOptions::default()),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_max_iters() {
        let mut stepper = TaylorStepper::<f64>::new(
            oscillator(),
            &[1.0, 0.0],
            StepperOptions {
                tolerance: 1e-14,
                max_steps: 2,
                ..Default::default()
            },
        )
        .unwrap();
        let status = stepper.propagate_until(100.0).unwrap();
        assert_eq!(status, StepStatus::ErrMaxIters);
    }

    #[test]
    fn test_default_order_from_tolerance() {
        // ⌈-ln(1e-14)/2⌉ + 1 = 18
        assert_eq!(default_order(1e-14), 18);
        assert_eq!(default_order(2.0), 2);
        let stepper =
            TaylorStepper::<f64>::new(oscillator(), &[1.0, 0.0], opts_f64(1e-14)).unwrap();
        assert_eq!(stepper.order(), 18);
    }
}

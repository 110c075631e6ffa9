//! Taylor decomposition: rewriting an ODE system into a straight-line
//! program of elementary assignments.
//!
//! Each right-hand side is walked bottom-up and flattened into a sequence of
//! three-address entries `u_k := op(args…)` whose operands are numeric
//! constants, parameter references, or earlier entries `u_j` (j < k). The
//! first S entries name the state variables, the last S entries record the
//! derivative of each state variable, and the intermediates live in between.
//!
//! Common subexpressions are eliminated while walking: every emitted entry
//! is keyed by its rewritten right-hand side, with the operand pair sorted
//! for the commutative operators, and an entry with a known key is reused
//! instead of re-emitted. `sin` and `cos` of the same argument are allocated
//! as a cross-referencing pair, since their Taylor recurrences are coupled.
//!
//! The output is deterministic: emission order is equation order and visit
//! order, and nothing iterates a hash map while building.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use itertools::Itertools;
use tracing::debug;

use crate::errors::Error;
use crate::expr::{Equation, Expr, Func};

/// An operand of a decomposition entry.
#[derive(Clone, Copy, Debug)]
pub enum Operand {
    /// A numeric constant
    Const(f64),
    /// An indexed reference into the runtime parameter vector
    Par(usize),
    /// A reference to an earlier decomposition entry
    U(usize),
}

impl PartialEq for Operand {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Operand::Const(a), Operand::Const(b)) => a.to_bits() == b.to_bits(),
            (Operand::Par(a), Operand::Par(b)) => a == b,
            (Operand::U(a), Operand::U(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Operand {}

impl Hash for Operand {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Operand::Const(v) => {
                state.write_u8(0);
                state.write_u64(v.to_bits());
            }
            Operand::Par(i) => {
                state.write_u8(1);
                i.hash(state);
            }
            Operand::U(i) => {
                state.write_u8(2);
                i.hash(state);
            }
        }
    }
}

impl Operand {
    /// Total ordering key used for commutative normalisation.
    fn sort_key(&self) -> (u8, u64) {
        match self {
            Operand::Const(v) => (0, v.to_bits()),
            Operand::Par(i) => (1, *i as u64),
            Operand::U(i) => (2, *i as u64),
        }
    }

    /// The referenced entry index, if this operand is a `U` reference.
    pub fn index(&self) -> Option<usize> {
        match self {
            Operand::U(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Const(v) => write!(f, "{v}"),
            Operand::Par(i) => write!(f, "par[{i}]"),
            Operand::U(i) => write!(f, "u_{i}"),
        }
    }
}

/// One three-address entry of a decomposition.
#[derive(Clone, Debug, PartialEq)]
pub enum DecompOp {
    /// Head entry naming a state variable; carries no right-hand side
    Var(String),
    /// Tail entry recording the derivative of a state variable
    Ident(Operand),
    /// `u = a + b`
    Add(Operand, Operand),
    /// `u = a - b`
    Sub(Operand, Operand),
    /// `u = a * b`
    Mul(Operand, Operand),
    /// `u = a / b`
    Div(Operand, Operand),
    /// `u = base ^ exponent` with a constant exponent
    Pow {
        /// The base operand
        base: Operand,
        /// The constant exponent
        exponent: f64,
    },
    /// `u = sqrt(a)`
    Sqrt(Operand),
    /// `u = exp(a)`
    Exp(Operand),
    /// `u = log(a)`
    Log(Operand),
    /// `u = sin(arg)`, coupled with the `cos` entry of the same argument
    Sin {
        /// The argument operand
        arg: Operand,
        /// Index of the paired cosine entry
        cos: usize,
    },
    /// `u = cos(arg)`, coupled with the `sin` entry of the same argument
    Cos {
        /// The argument operand
        arg: Operand,
        /// Index of the paired sine entry
        sin: usize,
    },
}

impl DecompOp {
    /// The operands referenced by this entry.
    pub fn operands(&self) -> Vec<Operand> {
        match self {
            DecompOp::Var(_) => vec![],
            DecompOp::Ident(a)
            | DecompOp::Sqrt(a)
            | DecompOp::Exp(a)
            | DecompOp::Log(a)
            | DecompOp::Pow { base: a, .. }
            | DecompOp::Sin { arg: a, .. }
            | DecompOp::Cos { arg: a, .. } => vec![*a],
            DecompOp::Add(a, b)
            | DecompOp::Sub(a, b)
            | DecompOp::Mul(a, b)
            | DecompOp::Div(a, b) => vec![*a, *b],
        }
    }
}

/// CSE key: a rewritten right-hand side with commutative operands sorted.
#[derive(PartialEq, Eq, Hash)]
enum CseKey {
    Add(Operand, Operand),
    Sub(Operand, Operand),
    Mul(Operand, Operand),
    Div(Operand, Operand),
    Pow(Operand, u64),
    Sqrt(Operand),
    Exp(Operand),
    Log(Operand),
    SinCos(Operand),
}

/// A straight-line three-address program defining the Taylor recurrences of
/// an ODE system.
///
/// Entries are topologically ordered: every operand of `entries[k]` refers
/// to an entry with index below k. The first [`n_state`](Self::n_state)
/// entries are the state identities, the last `n_state` entries are the
/// derivative references, intermediates sit in between.
#[derive(Clone, Debug, PartialEq)]
pub struct Decomposition {
    entries: Vec<DecompOp>,
    var_names: Vec<String>,
    n_pars: usize,
}

impl Decomposition {
    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the decomposition has no entries (never for valid input).
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// State dimension S.
    pub fn n_state(&self) -> usize {
        self.var_names.len()
    }

    /// One past the largest referenced parameter index.
    pub fn n_pars(&self) -> usize {
        self.n_pars
    }

    /// The entries in topological order.
    pub fn entries(&self) -> &[DecompOp] {
        &self.entries
    }

    /// The state variable names, in equation order.
    pub fn var_names(&self) -> &[String] {
        &self.var_names
    }

    /// Index of the tail entry holding the derivative of state variable `i`.
    pub fn derivative_index(&self, i: usize) -> usize {
        self.entries.len() - self.n_state() + i
    }
}

impl fmt::Display for Decomposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, entry) in self.entries.iter().enumerate() {
            match entry {
                DecompOp::Var(name) => writeln!(f, "u_{k} = {name}")?,
                DecompOp::Ident(a) => writeln!(f, "u_{k} = {a}")?,
                DecompOp::Add(a, b) => writeln!(f, "u_{k} = {a} + {b}")?,
                DecompOp::Sub(a, b) => writeln!(f, "u_{k} = {a} - {b}")?,
                DecompOp::Mul(a, b) => writeln!(f, "u_{k} = {a} * {b}")?,
                DecompOp::Div(a, b) => writeln!(f, "u_{k} = {a} / {b}")?,
                DecompOp::Pow { base, exponent } => {
                    writeln!(f, "u_{k} = pow({base}, {exponent})")?
                }
                DecompOp::Sqrt(a) => writeln!(f, "u_{k} = sqrt({a})")?,
                DecompOp::Exp(a) => writeln!(f, "u_{k} = exp({a})")?,
                DecompOp::Log(a) => writeln!(f, "u_{k} = log({a})")?,
                DecompOp::Sin { arg, .. } => writeln!(f, "u_{k} = sin({arg})")?,
                DecompOp::Cos { arg, .. } => writeln!(f, "u_{k} = cos({arg})")?,
            }
        }
        Ok(())
    }
}

struct Builder {
    entries: Vec<DecompOp>,
    cse: HashMap<CseKey, usize>,
    state_index: HashMap<String, usize>,
    n_pars: usize,
}

impl Builder {
    fn push(&mut self, key: CseKey, op: DecompOp) -> Operand {
        if let Some(&idx) = self.cse.get(&key) {
            return Operand::U(idx);
        }
        let idx = self.entries.len();
        self.entries.push(op);
        self.cse.insert(key, idx);
        Operand::U(idx)
    }

    /// Allocates the coupled sin/cos pair for `arg` if not yet present and
    /// returns the requested half.
    fn push_sincos(&mut self, arg: Operand, want_sin: bool) -> Operand {
        let sin_idx = match self.cse.get(&CseKey::SinCos(arg)) {
            Some(&idx) => idx,
            None => {
                let idx = self.entries.len();
                self.entries.push(DecompOp::Sin { arg, cos: idx + 1 });
                self.entries.push(DecompOp::Cos { arg, sin: idx });
                self.cse.insert(CseKey::SinCos(arg), idx);
                idx
            }
        };
        Operand::U(if want_sin { sin_idx } else { sin_idx + 1 })
    }

    fn visit(&mut self, expr: &Expr) -> Result<Operand, Error> {
        match expr {
            Expr::Number(v) => Ok(Operand::Const(*v)),

            Expr::Var(name) => match self.state_index.get(name) {
                Some(&idx) => Ok(Operand::U(idx)),
                None => Err(Error::InvalidInput(format!(
                    "unknown identifier `{name}` in right-hand side"
                ))),
            },

            Expr::Par(idx) => {
                self.n_pars = self.n_pars.max(idx + 1);
                Ok(Operand::Par(*idx))
            }

            Expr::Add(l, r) => {
                let a = self.visit(l)?;
                let b = self.visit(r)?;
                let (x, y) = commute(a, b);
                Ok(self.push(CseKey::Add(x, y), DecompOp::Add(a, b)))
            }

            Expr::Sub(l, r) => {
                let a = self.visit(l)?;
                let b = self.visit(r)?;
                Ok(self.push(CseKey::Sub(a, b), DecompOp::Sub(a, b)))
            }

            Expr::Mul(l, r) => {
                let a = self.visit(l)?;
                let b = self.visit(r)?;
                let (x, y) = commute(a, b);
                Ok(self.push(CseKey::Mul(x, y), DecompOp::Mul(a, b)))
            }

            Expr::Div(l, r) => {
                let a = self.visit(l)?;
                let b = self.visit(r)?;
                if matches!(b, Operand::Const(c) if c == 0.0) {
                    return Err(Error::SingularDivisor {
                        index: self.entries.len(),
                    });
                }
                Ok(self.push(CseKey::Div(a, b), DecompOp::Div(a, b)))
            }

            Expr::Func(func, args) => self.visit_func(*func, args),
        }
    }

    fn visit_func(&mut self, func: Func, args: &[Expr]) -> Result<Operand, Error> {
        if args.len() != func.arity() {
            return Err(Error::InvalidInput(format!(
                "`{}` takes {} argument(s), got {}",
                func.name(),
                func.arity(),
                args.len()
            )));
        }
        match func {
            Func::Pow => {
                let exponent = match &args[1] {
                    Expr::Number(e) => *e,
                    other => {
                        return Err(Error::InvalidInput(format!(
                            "`pow` exponent must be a constant, got `{other}`"
                        )))
                    }
                };
                let base = self.visit(&args[0])?;
                if matches!(base, Operand::Const(c) if c == 0.0) && exponent.fract() != 0.0 {
                    return Err(Error::SingularPow {
                        index: self.entries.len(),
                    });
                }
                // Squaring is a plain product: cheaper recurrence, and it
                // lines up with explicit `b * b` occurrences for CSE.
                if exponent == 2.0 {
                    let (x, y) = commute(base, base);
                    return Ok(self.push(CseKey::Mul(x, y), DecompOp::Mul(base, base)));
                }
                Ok(self.push(
                    CseKey::Pow(base, exponent.to_bits()),
                    DecompOp::Pow { base, exponent },
                ))
            }
            Func::Sqrt => {
                let arg = self.visit(&args[0])?;
                Ok(self.push(CseKey::Sqrt(arg), DecompOp::Sqrt(arg)))
            }
            Func::Exp => {
                let arg = self.visit(&args[0])?;
                Ok(self.push(CseKey::Exp(arg), DecompOp::Exp(arg)))
            }
            Func::Log => {
                let arg = self.visit(&args[0])?;
                Ok(self.push(CseKey::Log(arg), DecompOp::Log(arg)))
            }
            Func::Sin => {
                let arg = self.visit(&args[0])?;
                Ok(self.push_sincos(arg, true))
            }
            Func::Cos => {
                let arg = self.visit(&args[0])?;
                Ok(self.push_sincos(arg, false))
            }
        }
    }
}

fn commute(a: Operand, b: Operand) -> (Operand, Operand) {
    if a.sort_key() <= b.sort_key() {
        (a, b)
    } else {
        (b, a)
    }
}

/// Decomposes an ODE system into a straight-line three-address program.
///
/// The equations must have distinct, non-empty variable names, and every
/// identifier occurring in a right-hand side must be one of the defined
/// variables.
pub fn decompose(equations: &[Equation]) -> Result<Decomposition, Error> {
    if equations.is_empty() {
        return Err(Error::InvalidInput("empty equation list".into()));
    }
    if equations.iter().any(|eq| eq.lhs().is_empty()) {
        return Err(Error::InvalidInput("empty variable name".into()));
    }
    if let Some(dup) = equations.iter().map(Equation::lhs).duplicates().next() {
        return Err(Error::InvalidInput(format!(
            "duplicate variable name `{dup}`"
        )));
    }

    let var_names: Vec<String> = equations.iter().map(|eq| eq.lhs().to_string()).collect();
    let state_index: HashMap<String, usize> = var_names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), i))
        .collect();

    let mut builder = Builder {
        entries: var_names.iter().cloned().map(DecompOp::Var).collect(),
        cse: HashMap::new(),
        state_index,
        n_pars: 0,
    };

    // Intermediates, one equation at a time, then the derivative tail.
    let mut tops = Vec::with_capacity(equations.len());
    for eq in equations {
        tops.push(builder.visit(eq.rhs())?);
    }
    for top in tops {
        builder.entries.push(DecompOp::Ident(top));
    }

    debug!(
        n_state = var_names.len(),
        n_entries = builder.entries.len(),
        n_pars = builder.n_pars,
        "taylor decomposition built"
    );

    let decomp = Decomposition {
        entries: builder.entries,
        var_names,
        n_pars: builder.n_pars,
    };
    debug_assert!(decomp
        .entries
        .iter()
        .enumerate()
        .all(|(k, e)| e.operands().iter().all(|op| op.index().map_or(true, |j| j < k))));
    Ok(decomp)
}

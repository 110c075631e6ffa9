//! Symbolic expression trees for specifying ODE right-hand sides.
//!
//! This module defines the core expression types used to describe an ODE
//! system symbolically before it is decomposed and JIT compiled:
//!
//! - `Expr`: an enum over numeric constants, state variables, runtime
//!   parameters, the four binary operators and named functions
//! - `Func`: the set of named functions with native Taylor recurrences
//! - `Equation`: a state variable paired with its right-hand side, built
//!   with [`prime`]
//!
//! Expressions are immutable values with structural equality and a total
//! hash (numeric constants compare and hash by their bit pattern). The
//! algebra is deliberately non-simplifying: construction folds exactly the
//! trivial cases (`const ∘ const`, `x + 0`, `x * 1`, `x - 0`, `x / 1`,
//! `pow(x, 0)`, `pow(x, 1)`) and nothing else, so the structure the user
//! writes is the structure the decomposer sees and common-subexpression
//! elimination stays predictable.
//!
//! Long additive reductions should be built with [`sum`], which produces a
//! balanced pairwise tree: error growth is O(√N) ulps instead of O(N) for a
//! left fold, and repeated subtrees line up for CSE.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops;

use crate::registry;

/// A named function applied inside an expression.
///
/// Each function has a fixed arity and a native Taylor recurrence; the
/// process-wide registry (see [`crate::registry`]) maps canonical names to
/// these tags and to their symbolic partial derivatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Func {
    /// `pow(base, exponent)` with a constant exponent
    Pow,
    /// Square root
    Sqrt,
    /// Natural exponential
    Exp,
    /// Natural logarithm
    Log,
    /// Sine (radians)
    Sin,
    /// Cosine (radians)
    Cos,
}

/// An expression tree node.
///
/// The tree is built recursively with `Box<Expr>` children; sharing happens
/// by index once the decomposer rewrites the tree into a straight-line
/// program, so a plain owned tree is enough here.
#[derive(Debug, Clone)]
pub enum Expr {
    /// A floating point constant
    Number(f64),
    /// A named state variable
    Var(String),
    /// An indexed reference into the runtime parameter vector
    Par(usize),
    /// Addition of two expressions
    Add(Box<Expr>, Box<Expr>),
    /// Subtraction of two expressions
    Sub(Box<Expr>, Box<Expr>),
    /// Multiplication of two expressions
    Mul(Box<Expr>, Box<Expr>),
    /// Division of two expressions
    Div(Box<Expr>, Box<Expr>),
    /// A named function applied to an argument list
    Func(Func, Vec<Expr>),
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Expr::Number(a), Expr::Number(b)) => a.to_bits() == b.to_bits(),
            (Expr::Var(a), Expr::Var(b)) => a == b,
            (Expr::Par(a), Expr::Par(b)) => a == b,
            (Expr::Add(a, b), Expr::Add(c, d))
            | (Expr::Sub(a, b), Expr::Sub(c, d))
            | (Expr::Mul(a, b), Expr::Mul(c, d))
            | (Expr::Div(a, b), Expr::Div(c, d)) => a == c && b == d,
            (Expr::Func(f, a), Expr::Func(g, b)) => f == g && a == b,
            _ => false,
        }
    }
}

impl Eq for Expr {}

impl Hash for Expr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Expr::Number(v) => {
                state.write_u8(0);
                state.write_u64(v.to_bits());
            }
            Expr::Var(name) => {
                state.write_u8(1);
                name.hash(state);
            }
            Expr::Par(idx) => {
                state.write_u8(2);
                idx.hash(state);
            }
            Expr::Add(l, r) => {
                state.write_u8(3);
                l.hash(state);
                r.hash(state);
            }
            Expr::Sub(l, r) => {
                state.write_u8(4);
                l.hash(state);
                r.hash(state);
            }
            Expr::Mul(l, r) => {
                state.write_u8(5);
                l.hash(state);
                r.hash(state);
            }
            Expr::Div(l, r) => {
                state.write_u8(6);
                l.hash(state);
                r.hash(state);
            }
            Expr::Func(f, args) => {
                state.write_u8(7);
                f.hash(state);
                args.hash(state);
            }
        }
    }
}

/// Creates a numeric constant expression.
pub fn number(value: f64) -> Expr {
    Expr::Number(value)
}

/// Creates a state variable reference.
pub fn var(name: impl Into<String>) -> Expr {
    Expr::Var(name.into())
}

/// Creates an indexed reference into the runtime parameter vector.
pub fn par(index: usize) -> Expr {
    Expr::Par(index)
}

/// Raises `base` to `exponent`.
///
/// The Taylor recurrence for `pow` requires a constant exponent; the
/// decomposer rejects anything that does not fold to a number. Exponents of
/// zero and one fold away at construction.
pub fn pow(base: Expr, exponent: Expr) -> Expr {
    match exponent {
        Expr::Number(e) if e == 0.0 => Expr::Number(1.0),
        Expr::Number(e) if e == 1.0 => base,
        exponent => Expr::Func(Func::Pow, vec![base, exponent]),
    }
}

/// Square root of an expression.
pub fn sqrt(arg: Expr) -> Expr {
    Expr::Func(Func::Sqrt, vec![arg])
}

/// Natural exponential of an expression.
pub fn exp(arg: Expr) -> Expr {
    Expr::Func(Func::Exp, vec![arg])
}

/// Natural logarithm of an expression.
pub fn log(arg: Expr) -> Expr {
    Expr::Func(Func::Log, vec![arg])
}

/// Sine of an expression (radians).
pub fn sin(arg: Expr) -> Expr {
    Expr::Func(Func::Sin, vec![arg])
}

/// Cosine of an expression (radians).
pub fn cos(arg: Expr) -> Expr {
    Expr::Func(Func::Cos, vec![arg])
}

/// Sums a list of expressions as a balanced pairwise tree.
///
/// The operand list is split recursively in half, the left half taking the
/// extra operand when the count is odd, and the two halves are added. This
/// bounds floating point error growth at O(√N) ulps and maximises the
/// chances that repeated subtrees are deduplicated by the decomposer.
///
/// An empty list sums to `0`.
pub fn sum(terms: Vec<Expr>) -> Expr {
    sum_slice(&terms)
}

fn sum_slice(terms: &[Expr]) -> Expr {
    match terms {
        [] => Expr::Number(0.0),
        [term] => term.clone(),
        _ => {
            let mid = (terms.len() + 1) / 2;
            sum_slice(&terms[..mid]) + sum_slice(&terms[mid..])
        }
    }
}

/// An ODE equation: a state variable paired with its right-hand side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Equation {
    lhs: String,
    rhs: Expr,
}

/// Attaches a right-hand side to a state variable, forming the ODE equation
/// `d(name)/dt = rhs`.
pub fn prime(name: impl Into<String>, rhs: Expr) -> Equation {
    Equation {
        lhs: name.into(),
        rhs,
    }
}

impl Equation {
    /// The state variable this equation defines.
    pub fn lhs(&self) -> &str {
        &self.lhs
    }

    /// The right-hand side expression.
    pub fn rhs(&self) -> &Expr {
        &self.rhs
    }
}

impl Expr {
    /// Collects the names of all state variables referenced by the
    /// expression, in sorted order.
    pub fn variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Number(_) | Expr::Par(_) => {}
            Expr::Var(name) => {
                out.insert(name.clone());
            }
            Expr::Add(l, r) | Expr::Sub(l, r) | Expr::Mul(l, r) | Expr::Div(l, r) => {
                l.collect_variables(out);
                r.collect_variables(out);
            }
            Expr::Func(_, args) => {
                for arg in args {
                    arg.collect_variables(out);
                }
            }
        }
    }

    /// Depth of the expression tree (a leaf has depth 1).
    pub fn depth(&self) -> usize {
        match self {
            Expr::Number(_) | Expr::Var(_) | Expr::Par(_) => 1,
            Expr::Add(l, r) | Expr::Sub(l, r) | Expr::Mul(l, r) | Expr::Div(l, r) => {
                1 + l.depth().max(r.depth())
            }
            Expr::Func(_, args) => 1 + args.iter().map(Expr::depth).max().unwrap_or(0),
        }
    }

    /// Computes the symbolic derivative with respect to a state variable.
    ///
    /// Parameters and constants differentiate to zero. Named functions
    /// dispatch through the registry's partial derivatives and the chain
    /// rule.
    pub fn derivative(&self, with_respect_to: &str) -> Expr {
        match self {
            Expr::Number(_) | Expr::Par(_) => Expr::Number(0.0),

            Expr::Var(name) => {
                if name == with_respect_to {
                    Expr::Number(1.0)
                } else {
                    Expr::Number(0.0)
                }
            }

            // d(f + g) = df + dg
            Expr::Add(l, r) => l.derivative(with_respect_to) + r.derivative(with_respect_to),

            // d(f - g) = df - dg
            Expr::Sub(l, r) => l.derivative(with_respect_to) - r.derivative(with_respect_to),

            // d(f * g) = f * dg + g * df
            Expr::Mul(l, r) => {
                dprod((**l).clone(), r.derivative(with_respect_to))
                    + dprod((**r).clone(), l.derivative(with_respect_to))
            }

            // d(f / g) = (g * df - f * dg) / (g * g)
            Expr::Div(l, r) => {
                (dprod((**r).clone(), l.derivative(with_respect_to))
                    - dprod((**l).clone(), r.derivative(with_respect_to)))
                    / ((**r).clone() * (**r).clone())
            }

            Expr::Func(func, args) => {
                let partials = (registry::def(*func).partials)(args);
                let mut total = Expr::Number(0.0);
                for (partial, arg) in partials.into_iter().zip(args) {
                    total = total + dprod(partial, arg.derivative(with_respect_to));
                }
                total
            }
        }
    }
}

/// Product used when assembling derivatives: zero and one chain-rule
/// factors fold away so the result stays readable.
fn dprod(f: Expr, df: Expr) -> Expr {
    match df {
        Expr::Number(z) if z == 0.0 => Expr::Number(0.0),
        Expr::Number(o) if o == 1.0 => f,
        df => f * df,
    }
}

fn fold_add(l: Expr, r: Expr) -> Expr {
    match (l, r) {
        (Expr::Number(a), Expr::Number(b)) => Expr::Number(a + b),
        (x, Expr::Number(z)) if z == 0.0 => x,
        (Expr::Number(z), x) if z == 0.0 => x,
        (l, r) => Expr::Add(Box::new(l), Box::new(r)),
    }
}

fn fold_sub(l: Expr, r: Expr) -> Expr {
    match (l, r) {
        (Expr::Number(a), Expr::Number(b)) => Expr::Number(a - b),
        (x, Expr::Number(z)) if z == 0.0 => x,
        (l, r) => Expr::Sub(Box::new(l), Box::new(r)),
    }
}

fn fold_mul(l: Expr, r: Expr) -> Expr {
    match (l, r) {
        (Expr::Number(a), Expr::Number(b)) => Expr::Number(a * b),
        (x, Expr::Number(o)) if o == 1.0 => x,
        (Expr::Number(o), x) if o == 1.0 => x,
        (l, r) => Expr::Mul(Box::new(l), Box::new(r)),
    }
}

fn fold_div(l: Expr, r: Expr) -> Expr {
    match (l, r) {
        (Expr::Number(a), Expr::Number(b)) if b != 0.0 => Expr::Number(a / b),
        (x, Expr::Number(o)) if o == 1.0 => x,
        (l, r) => Expr::Div(Box::new(l), Box::new(r)),
    }
}

macro_rules! impl_binop {
    ($trait:ident, $method:ident, $fold:ident) => {
        impl ops::$trait for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                $fold(self, rhs)
            }
        }

        impl ops::$trait<f64> for Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                $fold(self, Expr::Number(rhs))
            }
        }

        impl ops::$trait<Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                $fold(Expr::Number(self), rhs)
            }
        }
    };
}

impl_binop!(Add, add, fold_add);
impl_binop!(Sub, sub, fold_sub);
impl_binop!(Mul, mul, fold_mul);
impl_binop!(Div, div, fold_div);

impl ops::Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        match self {
            Expr::Number(v) => Expr::Number(-v),
            e => Expr::Sub(Box::new(Expr::Number(0.0)), Box::new(e)),
        }
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Number(value)
    }
}

/// Formats expressions in standard mathematical notation. Binary operations
/// are parenthesized, functions use call notation, parameters print as
/// `par[i]`.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(v) => write!(f, "{v}"),
            Expr::Var(name) => write!(f, "{name}"),
            Expr::Par(idx) => write!(f, "par[{idx}]"),
            Expr::Add(l, r) => write!(f, "({l} + {r})"),
            Expr::Sub(l, r) => write!(f, "({l} - {r})"),
            Expr::Mul(l, r) => write!(f, "({l} * {r})"),
            Expr::Div(l, r) => write!(f, "({l} / {r})"),
            Expr::Func(func, args) => {
                write!(f, "{}(", func.name())?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for Equation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}' = {}", self.lhs, self.rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(e: &Expr) -> u64 {
        let mut h = DefaultHasher::new();
        e.hash(&mut h);
        h.finish()
    }

    #[test]
    fn test_construction_folds() {
        // const ∘ const
        assert_eq!(number(2.0) + number(3.0), number(5.0));
        assert_eq!(number(2.0) - number(3.0), number(-1.0));
        assert_eq!(number(2.0) * number(3.0), number(6.0));
        assert_eq!(number(6.0) / number(3.0), number(2.0));

        // identities
        assert_eq!(var("x") + 0.0, var("x"));
        assert_eq!(0.0 + var("x"), var("x"));
        assert_eq!(var("x") - 0.0, var("x"));
        assert_eq!(var("x") * 1.0, var("x"));
        assert_eq!(1.0 * var("x"), var("x"));
        assert_eq!(var("x") / 1.0, var("x"));

        // pow exponent folds
        assert_eq!(pow(var("x"), number(0.0)), number(1.0));
        assert_eq!(pow(var("x"), number(1.0)), var("x"));

        // nothing else simplifies
        assert_eq!(
            var("x") * 0.0,
            Expr::Mul(Box::new(var("x")), Box::new(number(0.0)))
        );
        assert_eq!(
            var("x") - var("x"),
            Expr::Sub(Box::new(var("x")), Box::new(var("x")))
        );
    }

    #[test]
    fn test_structural_equality_and_hash() {
        let a = var("x") * var("y") + exp(var("x"));
        let b = var("x") * var("y") + exp(var("x"));
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        // operand order matters
        let c = var("y") * var("x") + exp(var("x"));
        assert_ne!(a, c);

        // numbers compare by bits, so NaN == NaN structurally
        assert_eq!(number(f64::NAN), number(f64::NAN));
        assert_ne!(number(0.0), number(-0.0));
    }

    #[test]
    fn test_neg() {
        assert_eq!(-number(3.0), number(-3.0));
        assert_eq!(
            -var("x"),
            Expr::Sub(Box::new(number(0.0)), Box::new(var("x")))
        );
    }

    #[test]
    fn test_variables() {
        let e = sin(var("x")) * var("y") + par(0) * var("x");
        let vars: Vec<_> = e.variables().into_iter().collect();
        assert_eq!(vars, vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn test_derivative() {
        assert_eq!(number(5.0).derivative("x"), number(0.0));
        assert_eq!(par(2).derivative("x"), number(0.0));
        assert_eq!(var("x").derivative("x"), number(1.0));
        assert_eq!(var("y").derivative("x"), number(0.0));

        // d(x*y)/dx = x*0 + y*1 = y (after trivial folds)
        assert_eq!((var("x") * var("y")).derivative("x"), var("y"));

        // d(sin x)/dx = cos x
        assert_eq!(sin(var("x")).derivative("x"), cos(var("x")));

        // d(exp x)/dx = exp x
        assert_eq!(exp(var("x")).derivative("x"), exp(var("x")));

        // d(x^3)/dx = 3*x^2
        let d = pow(var("x"), number(3.0)).derivative("x");
        assert_eq!(d, number(3.0) * pow(var("x"), number(2.0)));
    }

    #[test]
    fn test_sum_is_balanced_and_left_leaning() {
        let terms: Vec<Expr> = (0..4096).map(|i| var(format!("v{i}"))).collect();
        let tree = sum(terms);
        // ⌈log2 4096⌉ + 1 = 13 levels including the leaves
        assert_eq!(tree.depth(), 13);

        // odd count: the left half takes the extra operand
        let tree = sum(vec![var("a"), var("b"), var("c")]);
        assert_eq!(tree, (var("a") + var("b")) + var("c"));

        assert_eq!(sum(vec![]), number(0.0));
        assert_eq!(sum(vec![var("a")]), var("a"));
    }

    #[test]
    fn test_pairwise_sum_accuracy() {
        // Alternating-sign terms of varying magnitude: constant folding at
        // construction evaluates the pairwise tree, so `sum` of numbers is
        // the pairwise-reduced value.
        let values: Vec<f64> = (0..4096)
            .map(|i| {
                let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
                sign * (1.0 + (i as f64 * 0.7).sin().abs()) * 1e3
            })
            .collect();

        // Kahan reference
        let (mut acc, mut comp) = (0.0_f64, 0.0_f64);
        for &v in &values {
            let y = v - comp;
            let t = acc + y;
            comp = (t - acc) - y;
            acc = t;
        }
        let reference = acc;

        let pairwise = match sum(values.iter().map(|&v| number(v)).collect()) {
            Expr::Number(v) => v,
            other => panic!("expected folded constant, got {other}"),
        };
        let naive: f64 = values.iter().sum();

        let pairwise_err = (pairwise - reference).abs();
        let naive_err = (naive - reference).abs();
        assert!(pairwise_err <= naive_err);
        // a few ulps at the accumulated magnitude (~1e6 intermediate sums)
        assert!(pairwise_err <= 1e-7, "pairwise error {pairwise_err}");
    }

    #[test]
    fn test_display() {
        let e = (var("x") + number(1.0)) * sin(par(0) * var("y"));
        assert_eq!(e.to_string(), "((x + 1) * sin((par[0] * y)))");
        assert_eq!(prime("x", var("v")).to_string(), "x' = v");
        assert_eq!(
            pow(var("x"), number(1.5)).to_string(),
            "pow(x, 1.5)"
        );
    }
}

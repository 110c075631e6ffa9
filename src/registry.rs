//! Process-wide registry of named functions.
//!
//! Each named function usable in an expression supplies its canonical name,
//! its arity, and its symbolic partial derivatives. The table is built once
//! on first access and is read-only afterwards; [`Func::from_name`] and the
//! arity checks resolve through it.
//!
//! The Taylor recurrences themselves (open-coded IR emission and the
//! compact-mode kernels) live in the per-function modules under
//! [`crate::operators`]: `Pow` in `operators::pow`, `Sqrt` in
//! `operators::sqrt`, `Exp` in `operators::exp`, `Log` in `operators::ln`,
//! and the paired `Sin`/`Cos` in `operators::trigonometric`.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::expr::{cos, log, number, pow, sin, sqrt, Expr, Func};

/// Registry record for one named function.
pub struct FuncDef {
    /// Canonical name, as accepted by [`Func::from_name`]
    pub name: &'static str,
    /// The function tag
    pub func: Func,
    /// Number of arguments
    pub arity: usize,
    /// Symbolic partial derivatives with respect to each argument
    pub partials: fn(&[Expr]) -> Vec<Expr>,
}

fn pow_partials(args: &[Expr]) -> Vec<Expr> {
    // ∂/∂b b^α = α·b^(α−1); ∂/∂α b^α = b^α·log b (unused: α must be constant)
    let base = args[0].clone();
    let alpha = args[1].clone();
    vec![
        alpha.clone() * pow(base.clone(), alpha.clone() - 1.0),
        pow(base.clone(), alpha) * log(base),
    ]
}

fn sqrt_partials(args: &[Expr]) -> Vec<Expr> {
    vec![number(0.5) / sqrt(args[0].clone())]
}

fn exp_partials(args: &[Expr]) -> Vec<Expr> {
    vec![crate::expr::exp(args[0].clone())]
}

fn log_partials(args: &[Expr]) -> Vec<Expr> {
    vec![number(1.0) / args[0].clone()]
}

fn sin_partials(args: &[Expr]) -> Vec<Expr> {
    vec![cos(args[0].clone())]
}

fn cos_partials(args: &[Expr]) -> Vec<Expr> {
    vec![-sin(args[0].clone())]
}

const DEFS: &[FuncDef] = &[
    FuncDef {
        name: "pow",
        func: Func::Pow,
        arity: 2,
        partials: pow_partials,
    },
    FuncDef {
        name: "sqrt",
        func: Func::Sqrt,
        arity: 1,
        partials: sqrt_partials,
    },
    FuncDef {
        name: "exp",
        func: Func::Exp,
        arity: 1,
        partials: exp_partials,
    },
    FuncDef {
        name: "log",
        func: Func::Log,
        arity: 1,
        partials: log_partials,
    },
    FuncDef {
        name: "sin",
        func: Func::Sin,
        arity: 1,
        partials: sin_partials,
    },
    FuncDef {
        name: "cos",
        func: Func::Cos,
        arity: 1,
        partials: cos_partials,
    },
];

static REGISTRY: OnceLock<HashMap<&'static str, &'static FuncDef>> = OnceLock::new();

/// The name-indexed registry table.
pub fn registry() -> &'static HashMap<&'static str, &'static FuncDef> {
    REGISTRY.get_or_init(|| DEFS.iter().map(|def| (def.name, def)).collect())
}

/// Looks up a function definition by canonical name.
pub fn lookup(name: &str) -> Option<&'static FuncDef> {
    registry().get(name).copied()
}

/// The registry record for a function tag.
pub fn def(func: Func) -> &'static FuncDef {
    // DEFS covers every Func variant, so the search always succeeds.
    DEFS.iter()
        .find(|d| d.func == func)
        .unwrap_or(&DEFS[0])
}

impl Func {
    /// Canonical name of the function.
    pub fn name(self) -> &'static str {
        def(self).name
    }

    /// Number of arguments the function takes.
    pub fn arity(self) -> usize {
        def(self).arity
    }

    /// Resolves a canonical name to a function tag.
    pub fn from_name(name: &str) -> Option<Func> {
        lookup(name).map(|d| d.func)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::var;

    #[test]
    fn test_lookup_and_arity() {
        assert_eq!(Func::from_name("sin"), Some(Func::Sin));
        assert_eq!(Func::from_name("pow"), Some(Func::Pow));
        assert_eq!(Func::from_name("tan"), None);
        assert_eq!(Func::Pow.arity(), 2);
        assert_eq!(Func::Exp.arity(), 1);
        assert_eq!(Func::Cos.name(), "cos");
    }

    #[test]
    fn test_partials() {
        let args = vec![var("x")];
        assert_eq!((def(Func::Exp).partials)(&args), vec![crate::expr::exp(var("x"))]);
        assert_eq!((def(Func::Sin).partials)(&args), vec![cos(var("x"))]);

        let pow_args = vec![var("x"), number(3.0)];
        let parts = (def(Func::Pow).partials)(&pow_args);
        assert_eq!(parts[0], number(3.0) * pow(var("x"), number(2.0)));
    }
}

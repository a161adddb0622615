//! Expansion of the schema-authoring macros `default`, `oneof` and `index`
//! into standard CEL.
//!
//! | macro | expansion |
//! |---|---|
//! | `default(self.x, D)` | `has(self.x) ? self.x : D` |
//! | `oneof(self.a, self.b)` | `(has(self.a) ? 1 : 0) + (has(self.b) ? 1 : 0) <= 1` |
//! | `self.index(F, a, b)` | `has(self.a) ? (has(self.a.b) ? self.a.b : F) : F` |
//!
//! Expansion is a bottom-up rewrite of the parsed tree, so macros nested in
//! arguments are expanded before the enclosing call. The output never contains
//! a macro call and the printer is canonical, which makes `expand` idempotent.

use crate::{
    ast::{BinaryOp, Expr, Literal},
    error::CelError,
    parser::parse_expr,
};

pub const MACRO_DEFAULT: &str = "default";
pub const MACRO_ONEOF:   &str = "oneof";
pub const MACRO_INDEX:   &str = "index";

/// Expands every macro invocation in `expr` and returns the canonical text.
pub fn expand(expr: &str) -> Result<String, CelError> {
    let tree = parse_expr(expr)?;
    Ok(expand_expr(tree)?.to_string())
}

/// Tree form of [`expand`].
pub fn expand_expr(expr: Expr) -> Result<Expr, CelError> {
    let expr = expand_children(expr)?;
    match expr {
        Expr::Call { target: None, function, args } if function == MACRO_DEFAULT => {
            expand_default(args)
        }
        Expr::Call { target: None, function, args } if function == MACRO_ONEOF => {
            expand_oneof(args)
        }
        Expr::Call { target: Some(target), function, args } if function == MACRO_INDEX => {
            expand_index(*target, args)
        }
        other => Ok(other),
    }
}

/// Reports whether `expr` still contains a macro invocation.
pub fn contains_macro(expr: &Expr) -> bool {
    expr.any(&|e| match e {
        Expr::Call { target: None, function, .. } => {
            function == MACRO_DEFAULT || function == MACRO_ONEOF
        }
        Expr::Call { target: Some(_), function, .. } => function == MACRO_INDEX,
        _ => false,
    })
}

fn expand_children(expr: Expr) -> Result<Expr, CelError> {
    let boxed = |e: Box<Expr>| expand_expr(*e).map(Box::new);
    Ok(match expr {
        Expr::Literal(_) | Expr::Ident(_) => expr,
        Expr::Select { operand, field } => Expr::Select { operand: boxed(operand)?, field },
        Expr::Index { operand, index } => Expr::Index {
            operand: boxed(operand)?,
            index:   boxed(index)?,
        },
        Expr::Call { target, function, args } => Expr::Call {
            target: target.map(boxed).transpose()?,
            function,
            args: args.into_iter().map(expand_expr).collect::<Result<_, _>>()?,
        },
        Expr::List(items) => Expr::List(items.into_iter().map(expand_expr).collect::<Result<_, _>>()?),
        Expr::Map(entries) => Expr::Map(
            entries
                .into_iter()
                .map(|(k, v)| Ok((expand_expr(k)?, expand_expr(v)?)))
                .collect::<Result<_, CelError>>()?,
        ),
        Expr::Unary { op, operand } => Expr::Unary { op, operand: boxed(operand)? },
        Expr::Binary { op, lhs, rhs } => Expr::Binary {
            op,
            lhs: boxed(lhs)?,
            rhs: boxed(rhs)?,
        },
        Expr::Conditional { cond, then, otherwise } => Expr::Conditional {
            cond:      boxed(cond)?,
            then:      boxed(then)?,
            otherwise: boxed(otherwise)?,
        },
    })
}

fn expand_default(args: Vec<Expr>) -> Result<Expr, CelError> {
    let [field, fallback]: [Expr; 2] = args.try_into().map_err(|args: Vec<Expr>| {
        CelError::malformed(MACRO_DEFAULT, format!("expected 2 arguments, got {}", args.len()))
    })?;
    if !matches!(field, Expr::Select { .. }) || !field.is_field_path() {
        return Err(CelError::malformed(
            MACRO_DEFAULT,
            format!("first argument must be a field selection, got {}", field),
        ));
    }
    Ok(Expr::conditional(Expr::has(field.clone()), field, fallback))
}

fn expand_oneof(args: Vec<Expr>) -> Result<Expr, CelError> {
    if args.len() < 2 {
        return Err(CelError::malformed(
            MACRO_ONEOF,
            format!("expected at least 2 arguments, got {}", args.len()),
        ));
    }

    let mut sum: Option<Expr> = None;
    for arg in args {
        if !matches!(arg, Expr::Select { .. }) || !arg.is_field_path() {
            return Err(CelError::malformed(
                MACRO_ONEOF,
                format!("arguments must be field selections, got {}", arg),
            ));
        }
        let flag = Expr::conditional(
            Expr::has(arg),
            Expr::Literal(Literal::Int(1)),
            Expr::Literal(Literal::Int(0)),
        );
        sum = Some(match sum {
            None => flag,
            Some(acc) => Expr::binary(BinaryOp::Add, acc, flag),
        });
    }

    // `sum` is set because at least two arguments were checked above.
    let sum = sum.ok_or_else(|| CelError::malformed(MACRO_ONEOF, "no arguments"))?;
    Ok(Expr::binary(BinaryOp::Le, sum, Expr::Literal(Literal::Int(1))))
}

fn expand_index(receiver: Expr, args: Vec<Expr>) -> Result<Expr, CelError> {
    if !receiver.is_field_path() {
        return Err(CelError::malformed(
            MACRO_INDEX,
            format!("receiver must be a field path, got {}", receiver),
        ));
    }
    if args.len() < 2 {
        return Err(CelError::malformed(
            MACRO_INDEX,
            format!("expected a fallback and at least one field, got {} arguments", args.len()),
        ));
    }

    let mut args = args.into_iter();
    let fallback = args.next().ok_or_else(|| CelError::malformed(MACRO_INDEX, "missing fallback"))?;

    let mut paths = Vec::new();
    let mut path  = receiver;
    for segment in args {
        match segment {
            Expr::Ident(name) => {
                path = Expr::select(path, &name);
                paths.push(path.clone());
            }
            other => {
                return Err(CelError::malformed(
                    MACRO_INDEX,
                    format!("path segments must be field names, got {}", other),
                ))
            }
        }
    }

    // Innermost access first, then guard it with one presence test per segment.
    let mut expanded = path;
    for guard in paths.into_iter().rev() {
        expanded = Expr::conditional(Expr::has(guard), expanded, fallback.clone());
    }
    Ok(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_default() {
        assert_eq!(
            expand("default(self.x, 'D')").unwrap(),
            "has(self.x) ? self.x : 'D'"
        );
    }

    #[test]
    fn test_expand_default_inside_binary() {
        assert_eq!(
            expand("default(self.port, 80) > 0").unwrap(),
            "(has(self.port) ? self.port : 80) > 0"
        );
    }

    #[test]
    fn test_expand_oneof() {
        assert_eq!(
            expand("oneof(self.a, self.b, self.c)").unwrap(),
            "(has(self.a) ? 1 : 0) + (has(self.b) ? 1 : 0) + (has(self.c) ? 1 : 0) <= 1"
        );
    }

    #[test]
    fn test_expand_index() {
        assert_eq!(
            expand("self.index({}, a, b)").unwrap(),
            "has(self.a) ? (has(self.a.b) ? self.a.b : {}) : {}"
        );
    }

    #[test]
    fn test_expand_nested_macros() {
        let out = expand("default(self.x, self.index('', y, z))").unwrap();
        assert_eq!(
            out,
            "has(self.x) ? self.x : has(self.y) ? (has(self.y.z) ? self.y.z : '') : ''"
        );
        assert!(!contains_macro(&parse_expr(&out).unwrap()));
    }

    #[test]
    fn test_expand_leaves_plain_cel_alone() {
        let input = "self.hosts.all(h, h.size() <= 255)";
        assert_eq!(expand(input).unwrap(), input);
    }

    #[test]
    fn test_expand_idempotent() {
        for input in [
            "default(self.x, 'D')",
            "oneof(self.a, self.b) && default(self.c, 1) == 1",
            "self.index({}, a, b, c).size() > 0",
            "!oneof(self.a.b, self.a.c)",
        ] {
            let once = expand(input).unwrap();
            assert_eq!(expand(&once).unwrap(), once, "input {}", input);
        }
    }

    #[test]
    fn test_malformed_macros() {
        for input in [
            "default(self.x)",
            "default(self.x, 1, 2)",
            "default(x, 1)",
            "oneof(self.a)",
            "oneof(self.a, 1)",
            "self.index({})",
            "self.index({}, a.b)",
            "self.f().index({}, a)",
        ] {
            let err = expand(input).unwrap_err();
            assert!(
                matches!(err, CelError::MalformedMacro { .. }),
                "expected MalformedMacro for {} but got {:?}",
                input,
                err
            );
        }
    }
}

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    /// Doubles keep their source spelling so printing is stable.
    Double { raw: String, value: f64 },
    String { raw: String, value: String },
    Bytes { raw: String, value: Vec<u8> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or  => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq  => "==",
            BinaryOp::Ne  => "!=",
            BinaryOp::Lt  => "<",
            BinaryOp::Le  => "<=",
            BinaryOp::Gt  => ">",
            BinaryOp::Ge  => ">=",
            BinaryOp::In  => "in",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
        }
    }

    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => PREC_OR,
            BinaryOp::And => PREC_AND,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge
            | BinaryOp::In => PREC_RELATION,
            BinaryOp::Add | BinaryOp::Sub => PREC_ADD,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => PREC_MUL,
        }
    }
}

pub const PREC_CONDITIONAL: u8 = 1;
pub const PREC_OR:          u8 = 2;
pub const PREC_AND:         u8 = 3;
pub const PREC_RELATION:    u8 = 4;
pub const PREC_ADD:         u8 = 5;
pub const PREC_MUL:         u8 = 6;
pub const PREC_UNARY:       u8 = 7;
pub const PREC_PRIMARY:     u8 = 8;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Ident(String),
    Select {
        operand: Box<Expr>,
        field:   String,
    },
    Index {
        operand: Box<Expr>,
        index:   Box<Expr>,
    },
    Call {
        target:   Option<Box<Expr>>,
        function: String,
        args:     Vec<Expr>,
    },
    List(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    Unary {
        op:      UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op:  BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Conditional {
        cond:      Box<Expr>,
        then:      Box<Expr>,
        otherwise: Box<Expr>,
    },
}

impl Expr {
    pub fn ident(name: &str) -> Expr {
        Expr::Ident(name.to_string())
    }

    pub fn select(operand: Expr, field: &str) -> Expr {
        Expr::Select {
            operand: Box::new(operand),
            field:   field.to_string(),
        }
    }

    pub fn call(function: &str, args: Vec<Expr>) -> Expr {
        Expr::Call {
            target:   None,
            function: function.to_string(),
            args,
        }
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn conditional(cond: Expr, then: Expr, otherwise: Expr) -> Expr {
        Expr::Conditional {
            cond:      Box::new(cond),
            then:      Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    pub fn has(operand: Expr) -> Expr {
        Expr::call("has", vec![operand])
    }

    /// True for identifiers and chains of field selections rooted at one.
    pub fn is_field_path(&self) -> bool {
        match self {
            Expr::Ident(_) => true,
            Expr::Select { operand, .. } => operand.is_field_path(),
            _ => false,
        }
    }

    /// Binding strength used by the printer to decide where parentheses go.
    pub fn precedence(&self) -> u8 {
        match self {
            Expr::Conditional { .. } => PREC_CONDITIONAL,
            Expr::Binary { op, .. } => op.precedence(),
            Expr::Unary { .. } => PREC_UNARY,
            Expr::Literal(Literal::Int(v)) if *v < 0 => PREC_UNARY,
            Expr::Literal(Literal::Double { raw, .. }) if raw.starts_with('-') => PREC_UNARY,
            _ => PREC_PRIMARY,
        }
    }

    /// Walks the tree and reports whether any node satisfies `pred`.
    pub fn any(&self, pred: &dyn Fn(&Expr) -> bool) -> bool {
        if pred(self) {
            return true;
        }
        match self {
            Expr::Literal(_) | Expr::Ident(_) => false,
            Expr::Select { operand, .. } => operand.any(pred),
            Expr::Index { operand, index } => operand.any(pred) || index.any(pred),
            Expr::Call { target, args, .. } => {
                target.as_ref().map_or(false, |t| t.any(pred)) || args.iter().any(|a| a.any(pred))
            }
            Expr::List(items) => items.iter().any(|i| i.any(pred)),
            Expr::Map(entries) => entries.iter().any(|(k, v)| k.any(pred) || v.any(pred)),
            Expr::Unary { operand, .. } => operand.any(pred),
            Expr::Binary { lhs, rhs, .. } => lhs.any(pred) || rhs.any(pred),
            Expr::Conditional { cond, then, otherwise } => {
                cond.any(pred) || then.any(pred) || otherwise.any(pred)
            }
        }
    }
}

fn write_wrapped(f: &mut fmt::Formatter<'_>, expr: &Expr, wrap: bool) -> fmt::Result {
    if wrap {
        write!(f, "({})", expr)
    } else {
        write!(f, "{}", expr)
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => f.write_str("null"),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Int(v) => write!(f, "{}", v),
            Literal::Uint(v) => write!(f, "{}u", v),
            Literal::Double { raw, .. } => f.write_str(raw),
            Literal::String { raw, .. } => f.write_str(raw),
            Literal::Bytes { raw, .. } => f.write_str(raw),
        }
    }
}

/// Canonical printer. Re-parsing the output yields the same tree, which is what
/// keeps macro expansion idempotent.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(lit) => write!(f, "{}", lit),
            Expr::Ident(name) => f.write_str(name),
            Expr::Select { operand, field } => {
                write_wrapped(f, operand, operand.precedence() < PREC_PRIMARY)?;
                write!(f, ".{}", field)
            }
            Expr::Index { operand, index } => {
                write_wrapped(f, operand, operand.precedence() < PREC_PRIMARY)?;
                write!(f, "[{}]", index)
            }
            Expr::Call { target, function, args } => {
                if let Some(target) = target {
                    write_wrapped(f, target, target.precedence() < PREC_PRIMARY)?;
                    f.write_str(".")?;
                }
                write!(f, "{}(", function)?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Expr::List(items) => {
                f.write_str("[")?;
                write_list(f, items)?;
                f.write_str("]")
            }
            Expr::Map(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                f.write_str("}")
            }
            Expr::Unary { op, operand } => {
                f.write_str(match op {
                    UnaryOp::Not => "!",
                    UnaryOp::Neg => "-",
                })?;
                write_wrapped(f, operand, operand.precedence() < PREC_UNARY)
            }
            Expr::Binary { op, lhs, rhs } => {
                let prec = op.precedence();
                write_wrapped(f, lhs, lhs.precedence() < prec)?;
                write!(f, " {} ", op.symbol())?;
                write_wrapped(f, rhs, rhs.precedence() <= prec)
            }
            Expr::Conditional { cond, then, otherwise } => {
                write_wrapped(f, cond, cond.precedence() <= PREC_CONDITIONAL)?;
                f.write_str(" ? ")?;
                write_wrapped(f, then, then.precedence() <= PREC_CONDITIONAL)?;
                f.write_str(" : ")?;
                write!(f, "{}", otherwise)
            }
        }
    }
}

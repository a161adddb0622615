//! Tree-walking evaluator for the CEL subset used by CRD validation rules.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use regex::Regex;

use crate::{
    ast::{BinaryOp, Expr, Literal, UnaryOp},
    error::CelError,
    macros::expand,
    parser::parse_expr,
    value::{format_duration, parse_duration, Value},
};

/// Variable bindings visible to an expression.
#[derive(Debug, Clone, Default)]
pub struct Activation {
    vars: HashMap<String, Value>,
}

impl Activation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, name: &str, value: Value) -> Self {
        self.vars.insert(name.to_string(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }
}

/// Expands macros in `rule`, then evaluates it with `self` bound to `value`.
/// A rule must produce a boolean.
pub fn evaluate_rule(rule: &str, value: &Value) -> Result<bool, CelError> {
    let expanded = expand(rule)?;
    let expr = parse_expr(&expanded)?;
    let act = Activation::new().bind("self", value.clone());
    match evaluate(&expr, &act)? {
        Value::Bool(b) => Ok(b),
        other => Err(CelError::eval(format!(
            "rule must evaluate to bool, got {}",
            other.type_name()
        ))),
    }
}

pub fn evaluate(expr: &Expr, act: &Activation) -> Result<Value, CelError> {
    match expr {
        Expr::Literal(lit) => Ok(literal_value(lit)),
        Expr::Ident(name) => act
            .get(name)
            .cloned()
            .ok_or_else(|| CelError::eval(format!("undeclared reference to '{}'", name))),
        Expr::Select { operand, field } => {
            let operand = evaluate(operand, act)?;
            select(&operand, field)
        }
        Expr::Index { operand, index } => {
            let operand = evaluate(operand, act)?;
            let index = evaluate(index, act)?;
            index_value(&operand, &index)
        }
        Expr::Call { target: None, function, args } if function == "has" => has(args, act),
        Expr::Call { target: Some(target), function, args }
            if is_comprehension(function) =>
        {
            let range = evaluate(target, act)?;
            comprehension(&range, function, args, act)
        }
        Expr::Call { target, function, args } => {
            let receiver = target.as_ref().map(|t| evaluate(t, act)).transpose()?;
            let args = args
                .iter()
                .map(|a| evaluate(a, act))
                .collect::<Result<Vec<_>, _>>()?;
            call(receiver, function, args)
        }
        Expr::List(items) => Ok(Value::List(
            items.iter().map(|i| evaluate(i, act)).collect::<Result<_, _>>()?,
        )),
        Expr::Map(entries) => {
            let mut map = BTreeMap::new();
            for (key, value) in entries {
                let key = match evaluate(key, act)? {
                    Value::String(s) => s,
                    other => {
                        return Err(CelError::eval(format!(
                            "unsupported map key type {}",
                            other.type_name()
                        )))
                    }
                };
                map.insert(key, evaluate(value, act)?);
            }
            Ok(Value::Map(map))
        }
        Expr::Unary { op, operand } => {
            let operand = evaluate(operand, act)?;
            unary(*op, operand)
        }
        Expr::Binary { op: BinaryOp::And, lhs, rhs } => logical(true, lhs, rhs, act),
        Expr::Binary { op: BinaryOp::Or, lhs, rhs } => logical(false, lhs, rhs, act),
        Expr::Binary { op, lhs, rhs } => {
            let lhs = evaluate(lhs, act)?;
            let rhs = evaluate(rhs, act)?;
            binary(*op, lhs, rhs)
        }
        Expr::Conditional { cond, then, otherwise } => match evaluate(cond, act)? {
            Value::Bool(true) => evaluate(then, act),
            Value::Bool(false) => evaluate(otherwise, act),
            other => Err(no_overload("_?_:_", &[&other])),
        },
    }
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::Uint(u) => Value::Uint(*u),
        Literal::Double { value, .. } => Value::Double(*value),
        Literal::String { value, .. } => Value::String(value.clone()),
        Literal::Bytes { value, .. } => Value::Bytes(value.clone()),
    }
}

fn no_overload(function: &str, args: &[&Value]) -> CelError {
    let types: Vec<&str> = args.iter().map(|a| a.type_name()).collect();
    CelError::eval(format!(
        "no such overload: {}({})",
        function,
        types.join(", ")
    ))
}

fn select(operand: &Value, field: &str) -> Result<Value, CelError> {
    match operand {
        Value::Map(map) => map
            .get(field)
            .cloned()
            .ok_or_else(|| CelError::eval(format!("no such key: {}", field))),
        other => Err(CelError::eval(format!(
            "type '{}' does not support field selection",
            other.type_name()
        ))),
    }
}

fn index_value(operand: &Value, index: &Value) -> Result<Value, CelError> {
    match (operand, index) {
        (Value::List(items), Value::Int(_) | Value::Uint(_)) => {
            let i = match *index {
                Value::Int(i) => usize::try_from(i).ok(),
                Value::Uint(u) => usize::try_from(u).ok(),
                _ => None,
            };
            i.and_then(|i| items.get(i))
                .cloned()
                .ok_or_else(|| CelError::eval(format!("index out of range: {}", index)))
        }
        (Value::Map(map), Value::String(key)) => map
            .get(key)
            .cloned()
            .ok_or_else(|| CelError::eval(format!("no such key: {}", key))),
        _ => Err(no_overload("_[_]", &[operand, index])),
    }
}

fn has(args: &[Expr], act: &Activation) -> Result<Value, CelError> {
    match args {
        [Expr::Select { operand, field }] => match evaluate(operand, act)? {
            Value::Map(map) => Ok(Value::Bool(map.contains_key(field))),
            other => Err(CelError::eval(format!(
                "has() does not support type '{}'",
                other.type_name()
            ))),
        },
        _ => Err(CelError::eval("invalid argument to has() macro")),
    }
}

fn is_comprehension(function: &str) -> bool {
    matches!(function, "all" | "exists" | "exists_one" | "filter" | "map")
}

fn comprehension(
    range: &Value,
    function: &str,
    args: &[Expr],
    act: &Activation,
) -> Result<Value, CelError> {
    let (var, body, transform) = match args {
        [Expr::Ident(var), body] => (var, body, None),
        [Expr::Ident(var), filter, transform] if function == "map" => (var, filter, Some(transform)),
        _ => {
            return Err(CelError::eval(format!(
                "{}() expects an iteration variable and a predicate",
                function
            )))
        }
    };

    let items: Vec<Value> = match range {
        Value::List(items) => items.clone(),
        Value::Map(map) => map.keys().cloned().map(Value::String).collect(),
        other => return Err(no_overload(function, &[other])),
    };

    let mut first_error = None;
    let mut matched = 0usize;
    let mut output = Vec::new();

    for item in items {
        let scope = act.clone().bind(var, item.clone());
        let result = evaluate(body, &scope);
        match function {
            "all" => match result {
                Ok(Value::Bool(false)) => return Ok(Value::Bool(false)),
                Ok(Value::Bool(true)) => {}
                Ok(other) => return Err(no_overload(function, &[&other])),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            },
            "exists" => match result {
                Ok(Value::Bool(true)) => return Ok(Value::Bool(true)),
                Ok(Value::Bool(false)) => {}
                Ok(other) => return Err(no_overload(function, &[&other])),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            },
            "exists_one" => match result? {
                Value::Bool(true) => matched += 1,
                Value::Bool(false) => {}
                other => return Err(no_overload(function, &[&other])),
            },
            "filter" => match result? {
                Value::Bool(true) => output.push(item),
                Value::Bool(false) => {}
                other => return Err(no_overload(function, &[&other])),
            },
            _ => match transform {
                Some(transform) => match result? {
                    Value::Bool(true) => output.push(evaluate(transform, &scope)?),
                    Value::Bool(false) => {}
                    other => return Err(no_overload(function, &[&other])),
                },
                None => output.push(result?),
            },
        }
    }

    match function {
        "all" => first_error.map_or(Ok(Value::Bool(true)), Err),
        "exists" => first_error.map_or(Ok(Value::Bool(false)), Err),
        "exists_one" => Ok(Value::Bool(matched == 1)),
        _ => Ok(Value::List(output)),
    }
}

/// `&&` and `||` are commutative over errors: a decisive operand wins even if
/// the other one failed to evaluate.
fn logical(is_and: bool, lhs: &Expr, rhs: &Expr, act: &Activation) -> Result<Value, CelError> {
    let decisive = !is_and;
    let name = if is_and { "_&&_" } else { "_||_" };

    let left = evaluate(lhs, act);
    if let Ok(Value::Bool(b)) = left {
        if b == decisive {
            return Ok(Value::Bool(decisive));
        }
    }
    let right = evaluate(rhs, act);
    if let Ok(Value::Bool(b)) = right {
        if b == decisive {
            return Ok(Value::Bool(decisive));
        }
    }

    match (left?, right?) {
        (Value::Bool(_), Value::Bool(_)) => Ok(Value::Bool(!decisive)),
        (l, r) => Err(no_overload(name, &[&l, &r])),
    }
}

fn unary(op: UnaryOp, operand: Value) -> Result<Value, CelError> {
    match (op, operand) {
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Neg, Value::Int(i)) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| CelError::eval("int overflow")),
        (UnaryOp::Neg, Value::Double(d)) => Ok(Value::Double(-d)),
        (UnaryOp::Neg, Value::Duration(d)) => d
            .checked_neg()
            .map(Value::Duration)
            .ok_or_else(|| CelError::eval("duration overflow")),
        (UnaryOp::Not, other) => Err(no_overload("!_", &[&other])),
        (UnaryOp::Neg, other) => Err(no_overload("-_", &[&other])),
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, CelError> {
    let overflow = || CelError::eval(format!("overflow in {}", op.symbol()));
    match op {
        BinaryOp::Eq => Ok(Value::Bool(lhs.cel_eq(&rhs))),
        BinaryOp::Ne => Ok(Value::Bool(!lhs.cel_eq(&rhs))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ord = lhs
                .cel_cmp(&rhs)
                .ok_or_else(|| no_overload(op.symbol(), &[&lhs, &rhs]))?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Le => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }))
        }
        BinaryOp::In => match &rhs {
            Value::List(items) => Ok(Value::Bool(items.iter().any(|i| i.cel_eq(&lhs)))),
            Value::Map(map) => match &lhs {
                Value::String(key) => Ok(Value::Bool(map.contains_key(key))),
                _ => Ok(Value::Bool(false)),
            },
            _ => Err(no_overload("@in", &[&lhs, &rhs])),
        },
        BinaryOp::Add => match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
            (Value::Uint(a), Value::Uint(b)) => a.checked_add(b).map(Value::Uint).ok_or_else(overflow),
            (Value::Double(a), Value::Double(b)) => Ok(Value::Double(a + b)),
            (Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
            (Value::Bytes(mut a), Value::Bytes(b)) => {
                a.extend(b);
                Ok(Value::Bytes(a))
            }
            (Value::List(mut a), Value::List(b)) => {
                a.extend(b);
                Ok(Value::List(a))
            }
            (Value::Duration(a), Value::Duration(b)) => {
                a.checked_add(b).map(Value::Duration).ok_or_else(overflow)
            }
            (a, b) => Err(no_overload("_+_", &[&a, &b])),
        },
        BinaryOp::Sub => match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
            (Value::Uint(a), Value::Uint(b)) => a.checked_sub(b).map(Value::Uint).ok_or_else(overflow),
            (Value::Double(a), Value::Double(b)) => Ok(Value::Double(a - b)),
            (Value::Duration(a), Value::Duration(b)) => {
                a.checked_sub(b).map(Value::Duration).ok_or_else(overflow)
            }
            (a, b) => Err(no_overload("_-_", &[&a, &b])),
        },
        BinaryOp::Mul => match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
            (Value::Uint(a), Value::Uint(b)) => a.checked_mul(b).map(Value::Uint).ok_or_else(overflow),
            (Value::Double(a), Value::Double(b)) => Ok(Value::Double(a * b)),
            (a, b) => Err(no_overload("_*_", &[&a, &b])),
        },
        BinaryOp::Div | BinaryOp::Mod => {
            let is_div = op == BinaryOp::Div;
            match (lhs, rhs) {
                (Value::Int(_), Value::Int(0)) | (Value::Uint(_), Value::Uint(0)) => {
                    Err(CelError::eval(if is_div { "division by zero" } else { "modulus by zero" }))
                }
                (Value::Int(a), Value::Int(b)) => {
                    let r = if is_div { a.checked_div(b) } else { a.checked_rem(b) };
                    r.map(Value::Int).ok_or_else(overflow)
                }
                (Value::Uint(a), Value::Uint(b)) => {
                    Ok(Value::Uint(if is_div { a / b } else { a % b }))
                }
                (Value::Double(a), Value::Double(b)) if is_div => Ok(Value::Double(a / b)),
                (a, b) => Err(no_overload(op.symbol(), &[&a, &b])),
            }
        }
        BinaryOp::And | BinaryOp::Or => Err(CelError::eval("logical operators are evaluated lazily")),
    }
}

fn size_of(value: &Value) -> Result<Value, CelError> {
    let n = match value {
        Value::String(s) => s.chars().count(),
        Value::Bytes(b)  => b.len(),
        Value::List(l)   => l.len(),
        Value::Map(m)    => m.len(),
        other => return Err(no_overload("size", &[other])),
    };
    i64::try_from(n)
        .map(Value::Int)
        .map_err(|_| CelError::eval("size overflow"))
}

fn call(receiver: Option<Value>, function: &str, args: Vec<Value>) -> Result<Value, CelError> {
    // Global and receiver-style calls share one argument list.
    let mut all = Vec::with_capacity(args.len() + 1);
    let is_method = receiver.is_some();
    all.extend(receiver);
    all.extend(args);

    match (function, all.as_slice()) {
        ("size", [v]) => size_of(v),
        ("contains", [Value::String(s), Value::String(sub)]) if is_method => {
            Ok(Value::Bool(s.contains(sub.as_str())))
        }
        ("startsWith", [Value::String(s), Value::String(p)]) if is_method => {
            Ok(Value::Bool(s.starts_with(p.as_str())))
        }
        ("endsWith", [Value::String(s), Value::String(p)]) if is_method => {
            Ok(Value::Bool(s.ends_with(p.as_str())))
        }
        ("matches", [Value::String(s), Value::String(pattern)]) => {
            let re = Regex::new(pattern)
                .map_err(|e| CelError::eval(format!("invalid regex {:?}: {}", pattern, e)))?;
            Ok(Value::Bool(re.is_match(s)))
        }
        ("lowerAscii", [Value::String(s)]) if is_method => Ok(Value::String(s.to_ascii_lowercase())),
        ("upperAscii", [Value::String(s)]) if is_method => Ok(Value::String(s.to_ascii_uppercase())),
        ("int", [v]) if !is_method => to_int(v),
        ("uint", [v]) if !is_method => to_uint(v),
        ("double", [v]) if !is_method => to_double(v),
        ("string", [v]) if !is_method => to_string(v),
        ("duration", [Value::String(s)]) if !is_method => {
            parse_duration(s).map(Value::Duration).map_err(CelError::Eval)
        }
        ("duration", [Value::Duration(d)]) if !is_method => Ok(Value::Duration(*d)),
        _ => {
            let refs: Vec<&Value> = all.iter().collect();
            Err(no_overload(function, &refs))
        }
    }
}

fn to_int(v: &Value) -> Result<Value, CelError> {
    let out_of_range = || CelError::eval(format!("int() argument out of range: {}", v));
    match v {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Uint(u) => i64::try_from(*u).map(Value::Int).map_err(|_| out_of_range()),
        Value::Double(d) => {
            if d.is_finite() && *d >= i64::MIN as f64 && *d < i64::MAX as f64 {
                Ok(Value::Int(d.trunc() as i64))
            } else {
                Err(out_of_range())
            }
        }
        Value::String(s) => s
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| CelError::eval(format!("cannot convert {:?} to int", s))),
        Value::Duration(d) => Ok(Value::Int(*d / 1_000_000_000)),
        other => Err(no_overload("int", &[other])),
    }
}

fn to_uint(v: &Value) -> Result<Value, CelError> {
    let out_of_range = || CelError::eval(format!("uint() argument out of range: {}", v));
    match v {
        Value::Uint(u) => Ok(Value::Uint(*u)),
        Value::Int(i) => u64::try_from(*i).map(Value::Uint).map_err(|_| out_of_range()),
        Value::Double(d) => {
            if d.is_finite() && *d >= 0.0 && *d < u64::MAX as f64 {
                Ok(Value::Uint(d.trunc() as u64))
            } else {
                Err(out_of_range())
            }
        }
        Value::String(s) => s
            .parse::<u64>()
            .map(Value::Uint)
            .map_err(|_| CelError::eval(format!("cannot convert {:?} to uint", s))),
        other => Err(no_overload("uint", &[other])),
    }
}

fn to_double(v: &Value) -> Result<Value, CelError> {
    match v {
        Value::Double(d) => Ok(Value::Double(*d)),
        Value::Int(i) => Ok(Value::Double(*i as f64)),
        Value::Uint(u) => Ok(Value::Double(*u as f64)),
        Value::String(s) => s
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|_| CelError::eval(format!("cannot convert {:?} to double", s))),
        other => Err(no_overload("double", &[other])),
    }
}

fn to_string(v: &Value) -> Result<Value, CelError> {
    match v {
        Value::String(s) => Ok(Value::String(s.clone())),
        Value::Int(i) => Ok(Value::String(i.to_string())),
        Value::Uint(u) => Ok(Value::String(u.to_string())),
        Value::Double(d) => Ok(Value::String(d.to_string())),
        Value::Bool(b) => Ok(Value::String(b.to_string())),
        Value::Bytes(b) => String::from_utf8(b.clone())
            .map(Value::String)
            .map_err(|_| CelError::eval("bytes are not valid UTF-8")),
        Value::Duration(d) => Ok(Value::String(format_duration(*d))),
        other => Err(no_overload("string", &[other])),
    }
}

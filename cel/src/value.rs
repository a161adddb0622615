use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Dynamic CEL value produced by the evaluator.
///
/// Maps are keyed by strings only: rules evaluated here always run against
/// decoded YAML/JSON objects, whose keys are strings.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    /// Nanoseconds.
    Duration(i64),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null        => "null_type",
            Value::Bool(_)     => "bool",
            Value::Int(_)      => "int",
            Value::Uint(_)     => "uint",
            Value::Double(_)   => "double",
            Value::String(_)   => "string",
            Value::Bytes(_)    => "bytes",
            Value::Duration(_) => "google.protobuf.Duration",
            Value::List(_)     => "list",
            Value::Map(_)      => "map",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// CEL equality, which treats `int`, `uint` and `double` as one numeric space.
    pub fn cel_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.cel_eq(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.get(k).map_or(false, |w| v.cel_eq(w)))
            }
            _ => match numeric_cmp(self, other) {
                Some(ord) => ord == Ordering::Equal,
                None => self == other,
            },
        }
    }

    /// Ordering for the relational operators; `None` when the pair is not comparable.
    pub fn cel_cmp(&self, other: &Value) -> Option<Ordering> {
        if let Some(ord) = numeric_cmp(self, other) {
            return Some(ord);
        }
        match (self, other) {
            (Value::String(a), Value::String(b))     => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b))       => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b))         => Some(a.cmp(b)),
            (Value::Duration(a), Value::Duration(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

fn numeric_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y))   => Some(x.cmp(y)),
        (Value::Uint(x), Value::Uint(y)) => Some(x.cmp(y)),
        (Value::Int(x), Value::Uint(y))  => Some((*x as i128).cmp(&(*y as i128))),
        (Value::Uint(x), Value::Int(y))  => Some((*x as i128).cmp(&(*y as i128))),
        (Value::Double(x), _) => as_f64(b).and_then(|y| x.partial_cmp(&y)),
        (_, Value::Double(y)) => as_f64(a).and_then(|x| x.partial_cmp(y)),
        _ => None,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match *v {
        Value::Int(i)    => Some(i as f64),
        Value::Uint(u)   => Some(u as f64),
        Value::Double(d) => Some(d),
        _ => None,
    }
}

impl From<&serde_json::Value> for Value {
    fn from(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::Uint(u)
                } else {
                    Value::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => Value::List(items.iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => Value::Map(
                map.iter().map(|(k, v)| (k.clone(), Value::from(v))).collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from(&json)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Uint(u) => write!(f, "{}u", u),
            Value::Double(d) => write!(f, "{}", d),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => write!(f, "b{:?}", String::from_utf8_lossy(b)),
            Value::Duration(nanos) => write!(f, "duration({:?})", format_duration(*nanos)),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Map(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{:?}: {}", k, v)?;
                }
                f.write_str("}")
            }
        }
    }
}

const NANOS_PER_UNIT: [(&str, i64); 7] = [
    ("ns", 1),
    ("us", 1_000),
    ("µs", 1_000),
    ("ms", 1_000_000),
    ("s", 1_000_000_000),
    ("m", 60 * 1_000_000_000),
    ("h", 3_600 * 1_000_000_000),
];

/// Parses a Go-style duration string (`1h30m`, `1.5s`, `100ms`) into nanoseconds.
pub fn parse_duration(text: &str) -> Result<i64, String> {
    let (negative, mut rest) = match text.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    if rest == "0" {
        return Ok(0);
    }
    if rest.is_empty() {
        return Err(format!("invalid duration {:?}", text));
    }

    let mut total: i128 = 0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration {:?}", text))?;
        if number_len == 0 {
            return Err(format!("invalid duration {:?}", text));
        }
        let number: f64 = rest[..number_len]
            .parse()
            .map_err(|_| format!("invalid duration {:?}", text))?;
        rest = &rest[number_len..];

        // Longest unit first so `ms` wins over `m`.
        let (unit, scale) = NANOS_PER_UNIT
            .iter()
            .filter(|(unit, _)| rest.starts_with(unit))
            .max_by_key(|(unit, _)| unit.len())
            .ok_or_else(|| format!("unknown unit in duration {:?}", text))?;
        rest = &rest[unit.len()..];
        total += (number * *scale as f64).round() as i128;
    }

    let total = if negative { -total } else { total };
    i64::try_from(total).map_err(|_| format!("duration {:?} out of range", text))
}

/// Formats nanoseconds as seconds the way CEL prints durations (`1.5s`).
pub fn format_duration(nanos: i64) -> String {
    let secs = nanos / 1_000_000_000;
    let frac = (nanos % 1_000_000_000).abs();
    if frac == 0 {
        return format!("{}s", secs);
    }
    let sign = if nanos < 0 && secs == 0 { "-" } else { "" };
    let frac = format!("{:09}", frac);
    format!("{}{}.{}s", sign, secs, frac.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("1s"), Ok(1_000_000_000));
        assert_eq!(parse_duration("1ms"), Ok(1_000_000));
        assert_eq!(parse_duration("1h30m"), Ok(5_400_000_000_000));
        assert_eq!(parse_duration("1.5s"), Ok(1_500_000_000));
        assert_eq!(parse_duration("-2m"), Ok(-120_000_000_000));
        assert_eq!(parse_duration("0"), Ok(0));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("1x").is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(1_500_000_000), "1.5s");
        assert_eq!(format_duration(2_000_000_000), "2s");
        assert_eq!(format_duration(-500_000_000), "-0.5s");
    }

    #[test]
    fn test_numeric_equality_across_kinds() {
        assert!(Value::Int(1).cel_eq(&Value::Uint(1)));
        assert!(Value::Double(2.0).cel_eq(&Value::Int(2)));
        assert!(!Value::Int(-1).cel_eq(&Value::Uint(u64::MAX)));
        assert_eq!(Value::Int(-1).cel_cmp(&Value::Uint(0)), Some(Ordering::Less));
    }

    #[test]
    fn test_from_json() {
        let json = serde_json::json!({"a": [1, "x", true, null, 1.5]});
        let value = Value::from(&json);
        let mut expected = BTreeMap::new();
        expected.insert(
            "a".to_string(),
            Value::List(vec![
                Value::Int(1),
                Value::String("x".into()),
                Value::Bool(true),
                Value::Null,
                Value::Double(1.5),
            ]),
        );
        assert_eq!(value, Value::Map(expected));
    }
}

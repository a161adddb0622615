use proptest::prelude::*;
use serde_json::json;

use protocrd_cel::{evaluate_rule, expand, parse_expr, Activation, CelError, Value, evaluate};

fn eval_expanded(expr: &str, self_value: serde_json::Value) -> Result<Value, CelError> {
    let expanded = expand(expr)?;
    let tree = parse_expr(&expanded)?;
    evaluate(&tree, &Activation::new().bind("self", Value::from(&self_value)))
}

#[test]
fn test_default_uses_fallback_when_unset() {
    assert_eq!(
        eval_expanded("default(self.x, 'D')", json!({})),
        Ok(Value::String("D".into()))
    );
    assert_eq!(
        eval_expanded("default(self.x, 'D')", json!({"x": "V"})),
        Ok(Value::String("V".into()))
    );
}

#[test]
fn test_oneof_counts_set_fields() {
    let rule = "oneof(self.x, self.y)";
    assert_eq!(evaluate_rule(rule, &Value::from(json!({}))), Ok(true));
    assert_eq!(evaluate_rule(rule, &Value::from(json!({"x": 1}))), Ok(true));
    assert_eq!(evaluate_rule(rule, &Value::from(json!({"y": "a"}))), Ok(true));
    assert_eq!(evaluate_rule(rule, &Value::from(json!({"x": 1, "y": "a"}))), Ok(false));
}

#[test]
fn test_oneof_many_arguments() {
    let rule = "oneof(self.a, self.b, self.c, self.d)";
    assert_eq!(evaluate_rule(rule, &Value::from(json!({"c": true}))), Ok(true));
    assert_eq!(
        evaluate_rule(rule, &Value::from(json!({"a": 1, "d": 2}))),
        Ok(false)
    );
}

#[test]
fn test_index_short_circuits_on_unset_segment() {
    assert_eq!(
        eval_expanded("self.index({}, a, b)", json!({})),
        Ok(Value::Map(Default::default()))
    );
    assert_eq!(
        eval_expanded("self.index({}, a, b)", json!({"a": {}})),
        Ok(Value::Map(Default::default()))
    );
    assert_eq!(
        eval_expanded("self.index({}, a, b)", json!({"a": {"b": {"c": 1}}})),
        Ok(Value::from(json!({"c": 1})))
    );
}

#[test]
fn test_unexpanded_access_would_fail() {
    // The same access without the macro raises an evaluation error.
    assert!(eval_expanded("self.a.b", json!({})).is_err());
}

#[test]
fn test_macro_in_rule_with_plain_cel() {
    let rule = "self.index([], spec, hosts).all(h, h.size() <= 5)";
    assert_eq!(evaluate_rule(rule, &Value::from(json!({}))), Ok(true));
    assert_eq!(
        evaluate_rule(rule, &Value::from(json!({"spec": {"hosts": ["abc", "toolong"]}}))),
        Ok(false)
    );
}

#[test]
fn test_deeply_nested_input_is_rejected() {
    let text = format!("{}self.a{}", "(".repeat(50_000), ")".repeat(50_000));
    match expand(&text) {
        Err(CelError::Parse { msg, .. }) => assert_eq!(msg, "expression nested too deeply"),
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(expand("((((default(self.a, 1)))))"), Ok("has(self.a) ? self.a : 1".to_string()));
}

fn field() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["a", "b", "c", "spec", "port"]).prop_map(|f| format!("self.{}", f))
}

fn leaf() -> impl Strategy<Value = String> {
    prop_oneof![
        field(),
        (0i64..100).prop_map(|n| n.to_string()),
        prop::sample::select(vec!["'x'", "\"y\"", "true", "null", "{}", "[]"]).prop_map(String::from),
        (field(), leaf_literal()).prop_map(|(f, d)| format!("default({}, {})", f, d)),
        prop::collection::vec(field(), 2..5).prop_map(|fs| format!("oneof({})", fs.join(", "))),
        prop::collection::vec(
            prop::sample::select(vec!["a", "b", "c"]),
            1..4
        )
        .prop_map(|segs| format!("self.index({{}}, {})", segs.join(", "))),
    ]
}

fn leaf_literal() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["0", "'D'", "{}", "-1"]).prop_map(String::from)
}

fn expression() -> impl Strategy<Value = String> {
    leaf().prop_recursive(4, 32, 3, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone(), prop::sample::select(vec!["+", "-", "==", "<=", "&&", "||", "*"]))
                .prop_map(|(l, r, op)| format!("({}) {} ({})", l, op, r)),
            (inner.clone(), inner.clone(), inner.clone())
                .prop_map(|(c, t, e)| format!("({}) ? ({}) : ({})", c, t, e)),
            inner.clone().prop_map(|e| format!("!({})", e)),
            inner.clone().prop_map(|e| format!("({}).size()", e)),
            prop::collection::vec(inner, 0..3).prop_map(|items| format!("[{}]", items.join(", "))),
        ]
    })
}

proptest! {
    #[test]
    fn prop_expand_is_idempotent(expr in expression()) {
        let once = expand(&expr).expect("generated expressions are well formed");
        let twice = expand(&once).expect("expanded output must re-parse");
        prop_assert_eq!(twice, once);
    }
}

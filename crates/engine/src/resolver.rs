//! Input resolution — turns a node's incoming edges, the other nodes'
//! already-computed outputs, and its own
//! `config` into the single JSON value an [`nodes::ExecutableNode`] actually
//! runs against.
//!
//! Three passes, in order:
//! 1. **Edge consumption** — for every incoming edge whose `condition`
//!    evaluates truthy, pull the named output alias off the source node's
//!    result, apply the edge's `transform`, and merge it in.
//! 2. **Config overrides** — fields present in `config` but missing (or
//!    empty) from the merged edge data fill the gap, template-rendered if
//!    the value contains `{{`.
//! 3. Whatever comes out is hand to the node verbatim as `input`.
//!
//! Condition and transform expressions are parsed as a single Python
//! expression via `rustpython-parser` (the same crate `nodes::code_executor`
//! already depends on for its sandbox) and walked by a restricted
//! interpreter here — never `exec`'d, never handed to a real Python
//! process. The grammar is deliberately tiny: literals, `value`/`input`/
//! `context`, subscripts, list/tuple/dict literals, boolean connectives,
//! and comparisons for conditions; a short whitelist of pure functions for
//! transforms. An edge with no explicit (or non-declared) `target_input`
//! lands under whichever of the target node's declared inputs the
//! `prompt`/`query`/`data`/`text` priority list picks, falling back to the
//! node's first declared input.

use std::collections::HashMap;

use rustpython_parser::ast::{self, Constant, Expr};
use rustpython_parser::Parse;
use serde_json::{Map, Value};

use nodes::template::{self, Namespaces};

use crate::models::{Edge, Node, WorkflowDefinition};

/// Priority list used when an edge doesn't name an explicit
/// `source_output`/`target_input`: the first key present on the source
/// node's output object wins.
const OUTPUT_ALIAS_PRIORITY: &[&str] = &["content", "result", "documents", "data"];

/// Priority list used to pick a target key once the edge's `target_input`
/// doesn't name one of the target node's declared inputs directly.
const TARGET_FALLBACK_PRIORITY: &[&str] = &["data", "prompt", "text"];

/// Build the `node id -> declared output names` map [`resolve_inputs`]
/// needs for its last-resort source-key fallback. Computed once per
/// execution (or per scheduler run) and shared across every node's input
/// resolution, since it never changes over the lifetime of a definition
/// snapshot.
pub fn source_output_names(def: &WorkflowDefinition) -> HashMap<String, Vec<String>> {
    def.nodes
        .iter()
        .map(|n| (n.id.clone(), n.signature.outputs.iter().map(|p| p.name.clone()).collect()))
        .collect()
}

/// Resolve the input a single node should run with.
///
/// `node_outputs` holds every upstream node's already-computed output,
/// keyed by node id. `incoming` is this node's incoming edges, already
/// filtered to the ones whose `source` has run. `source_output_names` maps
/// each upstream node id to its declared output port names, used only as
/// the last-resort fallback when none of the priority-list keys are
/// present in that node's output payload.
pub fn resolve_inputs(
    node: &Node,
    incoming: &[&Edge],
    node_outputs: &HashMap<String, Value>,
    execution_input: &Value,
    global_context: &Value,
    source_output_names: &HashMap<String, Vec<String>>,
) -> Value {
    let mut merged = Map::new();
    let mut contributed = false;
    let target_inputs: Vec<&str> = node.signature.inputs.iter().map(|p| p.name.as_str()).collect();

    for edge in incoming {
        let Some(source_value) = node_outputs.get(&edge.source) else {
            continue;
        };

        let ns = Namespaces {
            data: source_value,
            input: execution_input,
            context: global_context,
        };

        if let Some(condition) = edge.condition.as_deref() {
            match eval_condition(condition, &ns) {
                Ok(true) => {}
                Ok(false) => continue,
                // Parse/eval failure at runtime fails open — the edge fires
                // rather than silently dropping data the author expected to
                // flow. Parse-time failures are instead surfaced as
                // validation errors before execution starts.
                Err(_) => {}
            }
        }

        let default_names: Vec<String> = Vec::new();
        let source_names = source_output_names.get(&edge.source).unwrap_or(&default_names);
        let (mut value, found) = extract_output(source_value, edge.source_output.as_deref(), source_names);
        if value.is_null() && !found {
            // Null only skips the edge when it's standing in for a
            // genuinely missing/unaliased key (the whole-payload fallback).
            // A null found *at* the named key is a real value and is
            // assigned below like any other.
            continue;
        }

        if let Some(transform) = edge.transform.as_deref() {
            match eval_transform(transform, &value, &ns) {
                Ok(transformed) => value = transformed,
                Err(_) => {
                    // Original value survives; the failure is logged by the
                    // caller (the driver has the node/step context to
                    // attribute it to).
                }
            }
        }

        let dst_key = resolve_target_input(edge.target_input.as_deref(), &target_inputs);
        set_key(&mut merged, &dst_key, value);
        contributed = true;
    }

    // No inbound edge contributed a value (source node) — fall back to the
    // execution's own input_data rather than handing the node an empty
    // object.
    let mut result = if contributed {
        Value::Object(merged)
    } else {
        execution_input.clone()
    };
    apply_config_overrides(&mut result, &node.config, execution_input, global_context);
    result
}

/// Pull the aliased output off a source node's result. An explicit alias
/// (not the universal `output`/`output-N` markers) that is actually
/// present on the payload is looked up directly; otherwise the priority
/// list decides, falling back to the source node's first declared output
/// name, and finally to the whole payload.
///
/// Returns `(value, found)`: `found` is `true` whenever `value` came from an
/// actual key lookup (alias hit, priority-list hit, or declared-name hit) —
/// including a hit whose value happens to be JSON `null` — and `false` only
/// when nothing matched and the whole source payload was used as a
/// last-resort fallback.
fn extract_output(source_value: &Value, alias: Option<&str>, source_output_names: &[String]) -> (Value, bool) {
    if let Some(name) = alias {
        if let Some(v) = source_value.get(name) {
            return (v.clone(), true);
        }
        if !Edge::is_output_alias(name) {
            // An explicit, non-alias key that isn't present falls straight
            // through to the whole-payload fallback — it never consults
            // the priority list (that's reserved for the universal alias).
            return (source_value.clone(), false);
        }
    }

    if let Some(obj) = source_value.as_object() {
        for key in OUTPUT_ALIAS_PRIORITY {
            if let Some(v) = obj.get(*key) {
                return (v.clone(), true);
            }
        }
        for name in source_output_names {
            if let Some(v) = obj.get(name.as_str()) {
                return (v.clone(), true);
            }
        }
    }

    (source_value.clone(), false)
}

/// Mirrors the original executor's `resolve_target_input`: an edge's
/// `target_input` that names one of the node's declared inputs wins
/// outright; the universal `input`/`input-N` alias (or an unset
/// `target_input`) prefers `prompt`/`query` for nodes that declare them,
/// then falls back to the fixed priority list, then to the node's first
/// declared input, then to the literal name as a last resort.
fn resolve_target_input(target_input: Option<&str>, target_inputs: &[&str]) -> String {
    let const_key = match target_input {
        Some(name) if Edge::is_input_alias(name) => "input",
        Some(name) => name,
        None => "input",
    };

    if !const_key.is_empty() && target_inputs.contains(&const_key) {
        return const_key.to_string();
    }
    if const_key == "input" {
        if target_inputs.contains(&"prompt") {
            return "prompt".to_string();
        }
        if target_inputs.contains(&"query") {
            return "query".to_string();
        }
    }
    for candidate in TARGET_FALLBACK_PRIORITY {
        if target_inputs.contains(candidate) {
            return candidate.to_string();
        }
    }
    target_inputs.first().map(|s| s.to_string()).unwrap_or_else(|| const_key.to_string())
}

/// Assign `value` at `key`, shallow-merging into an already-present object
/// when `key == "data"` and both the existing and new values are objects;
/// otherwise last-write-wins.
fn set_key(merged: &mut Map<String, Value>, key: &str, value: Value) {
    if key == "data" {
        if let (Some(Value::Object(existing)), Value::Object(new)) = (merged.get_mut(key), &value) {
            for (k, v) in new {
                existing.insert(k.clone(), v.clone());
            }
            return;
        }
    }
    merged.insert(key.to_string(), value);
}

fn apply_config_overrides(input: &mut Value, config: &Value, execution_input: &Value, global_context: &Value) {
    let Some(config_obj) = config.as_object() else {
        return;
    };
    let Value::Object(input_obj) = input else {
        return;
    };

    for (key, raw) in config_obj {
        let missing_or_empty = match input_obj.get(key) {
            None => true,
            Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(Value::Object(o)) => o.is_empty(),
            Some(Value::Array(a)) => a.is_empty(),
            Some(_) => false,
        };
        if !missing_or_empty {
            continue;
        }

        let rendered = match raw {
            Value::String(s) if s.contains("{{") => Value::String(template::render(
                s,
                Namespaces {
                    data: input,
                    input: execution_input,
                    context: global_context,
                },
            )),
            other => other.clone(),
        };
        input_obj.insert(key.clone(), rendered);
    }
}

// ---------------------------------------------------------------------------
// Restricted condition interpreter
// ---------------------------------------------------------------------------

/// Parse-time check, used by the validator to reject conditions it can
/// never evaluate rather than discovering that at execution time.
pub fn condition_parses(expression: &str) -> Result<(), String> {
    ast::Expr::parse(expression, "<condition>")
        .map(|_| ())
        .map_err(|e| e.to_string())
}

pub fn eval_condition(expression: &str, ns: &Namespaces<'_>) -> Result<bool, String> {
    let trimmed = expression.trim();
    if trimmed == "true" || trimmed == "True" {
        return Ok(true);
    }
    if trimmed == "false" || trimmed == "False" {
        return Ok(false);
    }

    let expr = ast::Expr::parse(trimmed, "<condition>").map_err(|e| e.to_string())?;
    let value = eval_expr(&expr, ns)?;
    Ok(truthy(&value))
}

pub fn eval_transform(expression: &str, value: &Value, ns: &Namespaces<'_>) -> Result<Value, String> {
    let expr = ast::Expr::parse(expression.trim(), "<transform>").map_err(|e| e.to_string())?;
    let ns_with_value = Namespaces {
        data: value,
        input: ns.input,
        context: ns.context,
    };
    eval_expr(&expr, &ns_with_value)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

const TRANSFORM_CALL_NAMES: &[&str] = &["len", "str", "int", "float", "list", "dict"];

fn eval_expr(expr: &Expr, ns: &Namespaces<'_>) -> Result<Value, String> {
    match expr {
        Expr::Constant(c) => constant_to_value(&c.value),
        Expr::Name(n) => resolve_name(n.id.as_str(), ns),
        Expr::Subscript(s) => {
            let base = eval_expr(&s.value, ns)?;
            let index = eval_expr(&s.slice, ns)?;
            subscript(&base, &index)
        }
        Expr::Attribute(a) => {
            // Only `value`/`input`/`context` namespace attribute access
            // (`value.field`) is meaningful here; treat it as a subscript.
            let base = eval_expr(&a.value, ns)?;
            subscript(&base, &Value::String(a.attr.to_string()))
        }
        Expr::List(l) => Ok(Value::Array(
            l.elts.iter().map(|e| eval_expr(e, ns)).collect::<Result<_, _>>()?,
        )),
        Expr::Tuple(t) => Ok(Value::Array(
            t.elts.iter().map(|e| eval_expr(e, ns)).collect::<Result<_, _>>()?,
        )),
        Expr::Dict(d) => {
            let mut map = Map::new();
            for (k, v) in d.keys.iter().zip(d.values.iter()) {
                let key = match k {
                    Some(k) => match eval_expr(k, ns)? {
                        Value::String(s) => s,
                        other => other.to_string(),
                    },
                    None => return Err("dict unpacking is not supported".into()),
                };
                map.insert(key, eval_expr(v, ns)?);
            }
            Ok(Value::Object(map))
        }
        Expr::UnaryOp(u) => {
            let operand = eval_expr(&u.operand, ns)?;
            match u.op {
                ast::UnaryOp::Not => Ok(Value::Bool(!truthy(&operand))),
                _ => Err("only boolean 'not' is supported".into()),
            }
        }
        Expr::BoolOp(b) => {
            let is_and = matches!(b.op, ast::BoolOp::And);
            let mut last = Value::Bool(is_and);
            for v in &b.values {
                last = eval_expr(v, ns)?;
                if is_and && !truthy(&last) {
                    return Ok(last);
                }
                if !is_and && truthy(&last) {
                    return Ok(last);
                }
            }
            Ok(last)
        }
        Expr::Compare(c) => eval_compare(c, ns),
        Expr::Call(call) => eval_transform_call(call, ns),
        _ => Err("unsupported expression in condition/transform".into()),
    }
}

fn resolve_name(id: &str, ns: &Namespaces<'_>) -> Result<Value, String> {
    match id {
        "value" | "data" => Ok(ns.data.clone()),
        "input" => Ok(ns.input.clone()),
        "context" => Ok(ns.context.clone()),
        "None" => Ok(Value::Null),
        "True" => Ok(Value::Bool(true)),
        "False" => Ok(Value::Bool(false)),
        other => template::resolve(other, *ns).cloned().ok_or_else(|| {
            format!("name '{other}' is not defined in condition/transform scope")
        }),
    }
}

fn subscript(base: &Value, index: &Value) -> Result<Value, String> {
    match (base, index) {
        (Value::Object(map), Value::String(key)) => {
            Ok(map.get(key).cloned().unwrap_or(Value::Null))
        }
        (Value::Array(arr), Value::Number(n)) => {
            let i = n.as_i64().ok_or("array index must be an integer")?;
            let idx = if i < 0 { arr.len() as i64 + i } else { i };
            Ok(arr.get(idx as usize).cloned().unwrap_or(Value::Null))
        }
        _ => Ok(Value::Null),
    }
}

fn eval_compare(c: &ast::ExprCompare, ns: &Namespaces<'_>) -> Result<bool, String> {
    let mut left = eval_expr(&c.left, ns)?;
    for (op, comparator) in c.ops.iter().zip(c.comparators.iter()) {
        let right = eval_expr(comparator, ns)?;
        let ok = match op {
            ast::CmpOp::Eq => values_equal(&left, &right),
            ast::CmpOp::NotEq => !values_equal(&left, &right),
            ast::CmpOp::Lt => compare_numeric(&left, &right, |a, b| a < b)?,
            ast::CmpOp::LtE => compare_numeric(&left, &right, |a, b| a <= b)?,
            ast::CmpOp::Gt => compare_numeric(&left, &right, |a, b| a > b)?,
            ast::CmpOp::GtE => compare_numeric(&left, &right, |a, b| a >= b)?,
            ast::CmpOp::In => contains(&right, &left),
            ast::CmpOp::NotIn => !contains(&right, &left),
            ast::CmpOp::Is => values_equal(&left, &right),
            ast::CmpOp::IsNot => !values_equal(&left, &right),
        };
        if !ok {
            return Ok(false);
        }
        left = right;
    }
    Ok(true)
}

fn values_equal(a: &Value, b: &Value) -> bool {
    a == b
}

fn compare_numeric(a: &Value, b: &Value, op: impl Fn(f64, f64) -> bool) -> Result<bool, String> {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => Ok(op(x, y)),
        _ => match (a.as_str(), b.as_str()) {
            (Some(x), Some(y)) => {
                let ordering = x.cmp(y) as i32 as f64;
                Ok(op(ordering, 0.0))
            }
            _ => Err("ordering comparison requires two numbers or two strings".into()),
        },
    }
}

fn contains(container: &Value, needle: &Value) -> bool {
    match container {
        Value::Array(arr) => arr.contains(needle),
        Value::String(s) => needle.as_str().map(|n| s.contains(n)).unwrap_or(false),
        Value::Object(map) => needle.as_str().map(|k| map.contains_key(k)).unwrap_or(false),
        _ => false,
    }
}

fn eval_transform_call(call: &ast::ExprCall, ns: &Namespaces<'_>) -> Result<Value, String> {
    let name = match call.func.as_ref() {
        Expr::Name(n) => n.id.as_str(),
        Expr::Attribute(a) => {
            let module = match a.value.as_ref() {
                Expr::Name(n) => n.id.as_str(),
                _ => return Err("unsupported call target in transform".into()),
            };
            return eval_json_module_call(module, a.attr.as_str(), &call.args, ns);
        }
        _ => return Err("unsupported call target in transform".into()),
    };

    if !TRANSFORM_CALL_NAMES.contains(&name) {
        return Err(format!("call not allowed in transform: {name}"));
    }

    let args = call
        .args
        .iter()
        .map(|a| eval_expr(a, ns))
        .collect::<Result<Vec<_>, _>>()?;
    let arg = args.first().cloned().unwrap_or(Value::Null);

    let result = match name {
        "len" => Value::Number(match &arg {
            Value::Array(a) => a.len() as u64,
            Value::Object(o) => o.len() as u64,
            Value::String(s) => s.chars().count() as u64,
            _ => return Err("len() requires a string, array, or object".into()),
        }.into()),
        "str" => Value::String(match &arg {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }),
        "int" => Value::Number(
            (arg.as_f64().ok_or("int() requires a numeric value")? as i64).into(),
        ),
        "float" => serde_json::Number::from_f64(arg.as_f64().ok_or("float() requires a numeric value")?)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        "list" => match arg {
            Value::Array(_) => arg,
            Value::Null => Value::Array(vec![]),
            other => Value::Array(vec![other]),
        },
        "dict" => match arg {
            Value::Object(_) => arg,
            _ => Value::Object(Map::new()),
        },
        _ => unreachable!(),
    };
    Ok(result)
}

fn eval_json_module_call(
    module: &str,
    attr: &str,
    args: &[Expr],
    ns: &Namespaces<'_>,
) -> Result<Value, String> {
    if module != "json" {
        return Err(format!("module not allowed in transform: {module}"));
    }
    let first = args.first().ok_or("json.dumps/loads requires one argument")?;
    let arg = eval_expr(first, ns)?;
    match attr {
        "dumps" => Ok(Value::String(serde_json::to_string(&arg).map_err(|e| e.to_string())?)),
        "loads" => {
            let s = arg.as_str().ok_or("json.loads requires a string")?;
            serde_json::from_str(s).map_err(|e| e.to_string())
        }
        other => Err(format!("json.{other} is not allowed in transform")),
    }
}

fn constant_to_value(c: &Constant) -> Result<Value, String> {
    Ok(match c {
        Constant::None => Value::Null,
        Constant::Bool(b) => Value::Bool(*b),
        Constant::Str(s) => Value::String(s.clone()),
        Constant::Int(i) => serde_json::Number::from_f64(i.to_string().parse::<f64>().unwrap_or(0.0))
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Constant::Float(f) => serde_json::Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        _ => return Err("unsupported literal in condition/transform".into()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn empty_ns<'a>(data: &'a Value, input: &'a Value, context: &'a Value) -> Namespaces<'a> {
        Namespaces { data, input, context }
    }

    #[test]
    fn condition_compares_subscripted_value() {
        let data = json!({"score": 0.9});
        let (input, context) = (Value::Null, Value::Null);
        let ns = empty_ns(&data, &input, &context);
        assert!(eval_condition("value['score'] > 0.5", &ns).unwrap());
    }

    #[test]
    fn condition_in_operator_checks_membership() {
        let data = json!("hello world");
        let (input, context) = (Value::Null, Value::Null);
        let ns = empty_ns(&data, &input, &context);
        assert!(eval_condition("'world' in value", &ns).unwrap());
    }

    #[test]
    fn transform_len_counts_string_chars() {
        let value = json!("hello");
        let (input, context) = (Value::Null, Value::Null);
        let ns = empty_ns(&value, &input, &context);
        let out = eval_transform("len(value)", &value, &ns).unwrap();
        assert_eq!(out, json!(5));
    }

    #[test]
    fn disallowed_call_is_rejected() {
        let value = json!("hello");
        let (input, context) = (Value::Null, Value::Null);
        let ns = empty_ns(&value, &input, &context);
        assert!(eval_transform("open(value)", &value, &ns).is_err());
    }

    #[test]
    fn resolve_inputs_routes_unaliased_output_into_declared_prompt_input() {
        use crate::models::{NodeSignature, PortSpec, ValueType};

        let node = Node {
            id: "b".into(),
            node_type: "llm".into(),
            name: String::new(),
            config: Value::Null,
            position: Default::default(),
            signature: NodeSignature {
                inputs: vec![PortSpec {
                    name: "prompt".into(),
                    value_type: ValueType::String,
                    required: true,
                    default: None,
                    description: String::new(),
                }],
                outputs: vec![],
            },
        };
        let edge = Edge {
            id: "a-b".into(),
            source: "a".into(),
            target: "b".into(),
            source_output: None,
            target_input: None,
            condition: None,
            transform: None,
        };
        let mut node_outputs = HashMap::new();
        node_outputs.insert("a".to_string(), json!({"content": "hi"}));
        let source_output_names = HashMap::new();

        let result = resolve_inputs(
            &node,
            &[&edge],
            &node_outputs,
            &Value::Null,
            &Value::Null,
            &source_output_names,
        );
        assert_eq!(result.get("prompt").unwrap(), "hi");
    }

    #[test]
    fn resolve_inputs_falls_back_to_data_when_no_inputs_declared() {
        let node = Node {
            id: "b".into(),
            node_type: "data_transformer".into(),
            name: String::new(),
            config: Value::Null,
            position: Default::default(),
            signature: Default::default(),
        };
        let edge = Edge {
            id: "a-b".into(),
            source: "a".into(),
            target: "b".into(),
            source_output: None,
            target_input: None,
            condition: None,
            transform: None,
        };
        let mut node_outputs = HashMap::new();
        node_outputs.insert("a".to_string(), json!({"content": "hi"}));
        let source_output_names = HashMap::new();

        let result = resolve_inputs(
            &node,
            &[&edge],
            &node_outputs,
            &Value::Null,
            &Value::Null,
            &source_output_names,
        );
        assert_eq!(result.get("input").unwrap(), "hi");
    }

    /// A source key that's present but holds JSON `null` is a real value —
    /// it must be assigned to the target input, not treated as missing.
    #[test]
    fn present_null_source_value_is_assigned_not_skipped() {
        use crate::models::{NodeSignature, PortSpec, ValueType};

        let node = Node {
            id: "b".into(),
            node_type: "data_transformer".into(),
            name: String::new(),
            config: Value::Null,
            position: Default::default(),
            signature: NodeSignature {
                inputs: vec![PortSpec {
                    name: "value".into(),
                    value_type: ValueType::Object,
                    required: false,
                    default: None,
                    description: String::new(),
                }],
                outputs: vec![],
            },
        };
        let edge = Edge {
            id: "a-b".into(),
            source: "a".into(),
            target: "b".into(),
            source_output: Some("maybe_null".into()),
            target_input: Some("value".into()),
            condition: None,
            transform: None,
        };
        let mut node_outputs = HashMap::new();
        node_outputs.insert("a".to_string(), json!({"maybe_null": null, "other": "x"}));
        let source_output_names = HashMap::new();

        let result = resolve_inputs(
            &node,
            &[&edge],
            &node_outputs,
            &Value::Null,
            &Value::Null,
            &source_output_names,
        );
        assert_eq!(result.get("value"), Some(&Value::Null));
    }

    /// A genuinely missing/unaliased output key still skips the edge's
    /// contribution, falling back to the execution's own input.
    #[test]
    fn absent_source_key_skips_the_edge_and_falls_back_to_execution_input() {
        let node = Node {
            id: "b".into(),
            node_type: "data_transformer".into(),
            name: String::new(),
            config: Value::Null,
            position: Default::default(),
            signature: Default::default(),
        };
        let edge = Edge {
            id: "a-b".into(),
            source: "a".into(),
            target: "b".into(),
            source_output: Some("nonexistent".into()),
            target_input: None,
            condition: None,
            transform: None,
        };
        let mut node_outputs = HashMap::new();
        node_outputs.insert("a".to_string(), Value::Null);
        let source_output_names = HashMap::new();

        let result = resolve_inputs(
            &node,
            &[&edge],
            &node_outputs,
            &json!({"fallback": true}),
            &Value::Null,
            &source_output_names,
        );
        assert_eq!(result, json!({"fallback": true}));
    }
}

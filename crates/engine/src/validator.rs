//! Full workflow validation — builds a [`ValidationReport`] instead of
//! failing fast, so callers (the API's `/validate` route, the CLI's
//! `validate` subcommand) can show every problem in one pass.
//!
//! [`crate::dag::validate_dag`] remains the fast, fail-on-first-error check
//! used internally before execution; `validate` reuses it for the
//! structural (duplicate id / unknown reference / cycle) checks and adds
//! the softer alias and isolated-node checks on top.

use std::collections::HashSet;

use serde_json::Value;

use crate::dag::validate_dag;
use crate::models::{Edge, Node, WorkflowDefinition};
use crate::resolver::condition_parses;
use crate::EngineError;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ValidationIssue {
    pub code: &'static str,
    pub message: String,
    pub node_id: Option<String>,
}

impl ValidationIssue {
    fn new(code: &'static str, message: impl Into<String>, node_id: Option<&str>) -> Self {
        Self {
            code,
            message: message.into(),
            node_id: node_id.map(str::to_owned),
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ValidationReport {
    pub ok: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub suggestions: Vec<String>,
}

/// Validate `workflow`'s structure: duplicate ids, unknown edge endpoints,
/// cycles, and alias mismatches (all blocking), plus isolated nodes
/// (non-blocking, reported as a warning).
pub fn validate(workflow: &WorkflowDefinition) -> ValidationReport {
    let mut report = ValidationReport::default();

    match validate_dag(workflow) {
        Ok(_) => {}
        Err(EngineError::DuplicateNodeId(id)) => report.errors.push(ValidationIssue::new(
            "duplicate_node_id",
            format!("duplicate node id '{id}'"),
            Some(&id),
        )),
        Err(EngineError::UnknownNodeReference { node_id, side }) => {
            report.errors.push(ValidationIssue::new(
                "unknown_node_reference",
                format!("edge references unknown node '{node_id}' ({side} side)"),
                Some(&node_id),
            ));
        }
        Err(EngineError::CycleDetected) => {
            report
                .errors
                .push(ValidationIssue::new("cycle_detected", "workflow graph contains a cycle", None));
        }
        Err(other) => report.errors.push(ValidationIssue::new(
            "structural_error",
            other.to_string(),
            None,
        )),
    }

    // Only run the softer checks if the structural pass found no blocking
    // errors — alias/isolation checks assume unique ids and valid edges.
    if report.errors.is_empty() {
        check_isolated_nodes(workflow, &mut report);
        check_aliases(workflow, &mut report);
        check_conditions_parse(workflow, &mut report);

        if workflow.output_nodes().next().is_none() {
            report.suggestions.push(
                "workflow has no 'output' node; the final output falls back to the last \
                 topologically-ordered node's result"
                    .to_string(),
            );
        }
    }

    report.ok = report.errors.is_empty();
    report
}

fn check_isolated_nodes(workflow: &WorkflowDefinition, report: &mut ValidationReport) {
    let mut connected: HashSet<&str> = HashSet::new();
    for edge in &workflow.edges {
        connected.insert(edge.source.as_str());
        connected.insert(edge.target.as_str());
    }

    for node in &workflow.nodes {
        let is_only_node = workflow.nodes.len() == 1;
        if !is_only_node && !connected.contains(node.id.as_str()) {
            report.warnings.push(ValidationIssue::new(
                "isolated_node",
                format!("node '{}' has no incoming or outgoing edges", node.id),
                Some(&node.id),
            ));
        }
    }
}

/// An edge `condition` that fails to parse is a blocking error — unlike a
/// runtime evaluation failure (which fails open to `true`), an expression
/// the author can never satisfy should be caught before execution starts.
fn check_conditions_parse(workflow: &WorkflowDefinition, report: &mut ValidationReport) {
    for edge in &workflow.edges {
        if let Some(condition) = edge.condition.as_deref() {
            let trimmed = condition.trim();
            if trimmed == "true" || trimmed == "false" || trimmed == "True" || trimmed == "False" {
                continue;
            }
            if let Err(e) = condition_parses(trimmed) {
                report.errors.push(ValidationIssue::new(
                    "unparseable_condition",
                    format!("edge '{}' condition failed to parse: {e}", edge.id),
                    Some(&edge.source),
                ));
            }
        }
    }
}

fn check_aliases(workflow: &WorkflowDefinition, report: &mut ValidationReport) {
    let by_id: std::collections::HashMap<&str, &Node> =
        workflow.nodes.iter().map(|n| (n.id.as_str(), n)).collect();

    for edge in &workflow.edges {
        if let Some(source) = by_id.get(edge.source.as_str()) {
            check_output_port(source, edge, report);
        }
        if let Some(target) = by_id.get(edge.target.as_str()) {
            check_input_port(target, edge, report);
        }
    }
}

fn check_output_port(source: &Node, edge: &Edge, report: &mut ValidationReport) {
    let Some(name) = edge.source_output.as_deref() else {
        return;
    };
    if Edge::is_output_alias(name) {
        return;
    }
    if source.signature.outputs.iter().any(|p| p.name == name) {
        return;
    }
    report.errors.push(ValidationIssue::new(
        "unknown_output_port",
        format!(
            "edge from '{}' names output port '{name}', which isn't declared in its signature",
            source.id
        ),
        Some(&source.id),
    ));
}

fn check_input_port(target: &Node, edge: &Edge, report: &mut ValidationReport) {
    let Some(name) = edge.target_input.as_deref() else {
        return;
    };
    if Edge::is_input_alias(name) {
        return;
    }
    if target.signature.inputs.iter().any(|p| p.name == name) {
        return;
    }
    report.errors.push(ValidationIssue::new(
        "unknown_input_port",
        format!(
            "edge into '{}' names input port '{name}', which isn't declared in its signature",
            target.id
        ),
        Some(&target.id),
    ));
}

/// Validate caller-supplied `input_data` against the workflow's
/// `metadata.ui.inputs` declaration, up front before the first node runs,
/// so a malformed call fails fast instead of partway through execution.
///
/// `ui.inputs` is an array of `{name, required, type}` objects. Only
/// presence and the coarse JSON type are checked; deeper validation is left
/// to node-level config (mirroring how node `config` itself is never
/// schema-validated beyond what each node does defensively).
pub fn validate_inputs(workflow: &WorkflowDefinition, input_data: &Value) -> Result<(), EngineError> {
    let Some(inputs) = workflow
        .metadata
        .get("ui")
        .and_then(|ui| ui.get("inputs"))
        .and_then(|v| v.as_array())
    else {
        return Ok(());
    };

    for spec in inputs {
        let Some(name) = spec.get("name").and_then(|v| v.as_str()) else {
            continue;
        };
        let required = spec.get("required").and_then(|v| v.as_bool()).unwrap_or(false);
        let declared_type = spec.get("type").and_then(|v| v.as_str());

        let value = input_data.get(name);
        match value {
            None | Some(Value::Null) => {
                if required {
                    return Err(EngineError::InputValidationFailed {
                        field: name.to_string(),
                        reason: "required input is missing".into(),
                    });
                }
            }
            Some(v) => {
                if let Some(expected) = declared_type {
                    if !value_matches_type(v, expected) {
                        return Err(EngineError::InputValidationFailed {
                            field: name.to_string(),
                            reason: format!("expected type '{expected}', got '{}'", json_type_name(v)),
                        });
                    }
                }
            }
        }
    }

    Ok(())
}

fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        // File/Image/Audio/Video inputs are carried as opaque strings
        // (a URL or base64 blob) at this layer.
        "file" | "image" | "audio" | "video" => value.is_string(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Node;
    use serde_json::json;

    fn node(id: &str, node_type: &str) -> Node {
        Node {
            id: id.into(),
            node_type: node_type.into(),
            name: String::new(),
            config: Value::Null,
            position: Default::default(),
            signature: Default::default(),
        }
    }

    fn edge(source: &str, target: &str) -> Edge {
        Edge {
            id: format!("{source}-{target}"),
            source: source.into(),
            target: target.into(),
            source_output: None,
            target_input: None,
            condition: None,
            transform: None,
        }
    }

    #[test]
    fn clean_linear_workflow_has_no_issues() {
        let wf = WorkflowDefinition::new(
            "wf",
            vec![node("a", "input"), node("b", "output")],
            vec![edge("a", "b")],
        );
        let report = validate(&wf);
        assert!(report.ok);
        assert!(report.errors.is_empty());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn isolated_node_is_a_warning_not_an_error() {
        let wf = WorkflowDefinition::new(
            "wf",
            vec![node("a", "input"), node("b", "output"), node("stray", "llm")],
            vec![edge("a", "b")],
        );
        let report = validate(&wf);
        assert!(report.ok);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].code, "isolated_node");
    }

    #[test]
    fn unknown_output_port_is_a_blocking_error() {
        let wf = WorkflowDefinition::new(
            "wf",
            vec![node("a", "input"), node("b", "output")],
            vec![Edge {
                source_output: Some("nonexistent".into()),
                ..edge("a", "b")
            }],
        );
        let report = validate(&wf);
        assert!(!report.ok);
        assert_eq!(report.errors[0].code, "unknown_output_port");
    }

    #[test]
    fn unknown_input_port_is_a_blocking_error() {
        let wf = WorkflowDefinition::new(
            "wf",
            vec![node("a", "input"), node("b", "output")],
            vec![Edge {
                target_input: Some("nonexistent".into()),
                ..edge("a", "b")
            }],
        );
        let report = validate(&wf);
        assert!(!report.ok);
        assert_eq!(report.errors[0].code, "unknown_input_port");
    }

    #[test]
    fn cycle_is_a_blocking_error() {
        let wf = WorkflowDefinition::new(
            "wf",
            vec![node("a", "llm"), node("b", "llm")],
            vec![edge("a", "b"), edge("b", "a")],
        );
        let report = validate(&wf);
        assert!(!report.ok);
        assert_eq!(report.errors[0].code, "cycle_detected");
    }

    #[test]
    fn missing_required_input_is_rejected() {
        let mut wf = WorkflowDefinition::new("wf", vec![node("a", "input")], vec![]);
        wf.metadata = json!({"ui": {"inputs": [{"name": "query", "required": true, "type": "string"}]}});
        let err = validate_inputs(&wf, &json!({})).unwrap_err();
        assert!(matches!(err, EngineError::InputValidationFailed { field, .. } if field == "query"));
    }

    #[test]
    fn wrong_type_input_is_rejected() {
        let mut wf = WorkflowDefinition::new("wf", vec![node("a", "input")], vec![]);
        wf.metadata = json!({"ui": {"inputs": [{"name": "query", "required": true, "type": "string"}]}});
        let err = validate_inputs(&wf, &json!({"query": 5})).unwrap_err();
        assert!(matches!(err, EngineError::InputValidationFailed { field, .. } if field == "query"));
    }

    #[test]
    fn absent_ui_inputs_declaration_accepts_anything() {
        let wf = WorkflowDefinition::new("wf", vec![node("a", "input")], vec![]);
        assert!(validate_inputs(&wf, &json!({"whatever": true})).is_ok());
    }
}

// ABOUTME: Structural validation for workflow definitions
// ABOUTME: Checks entry node, transition targets, gateway shape, and graph reachability

use base64::Engine as _;
use petgraph::graph::NodeIndex;
use petgraph::visit::Dfs;
use petgraph::Graph;
use std::collections::{HashMap, HashSet};
use tracing::warn;

use super::definition::{Definition, Node, NodeType, START_NODE_ID};
use super::error::ValidationError;

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct DefinitionValidator;

impl DefinitionValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a definition's structure. Errors make the definition
    /// unusable; warnings flag shapes that can fail at runtime.
    pub fn validate(&self, definition: &Definition) -> ValidationReport {
        let mut report = ValidationReport::default();

        let mut seen = HashSet::new();
        for node in &definition.nodes {
            if !seen.insert(node.id.as_str()) {
                report.errors.push(ValidationError::DuplicateNode {
                    node: node.id.clone(),
                });
            }
        }

        match definition.start_node() {
            None => report.errors.push(ValidationError::MissingStartNode {
                entry: START_NODE_ID.to_string(),
            }),
            Some(start) if start.node_type != NodeType::Start => {
                report.errors.push(ValidationError::WrongStartNodeType {
                    entry: START_NODE_ID.to_string(),
                    found: start.node_type.to_string(),
                })
            }
            Some(_) => {}
        }

        for node in &definition.nodes {
            self.check_transitions(definition, node, &mut report);
            self.check_payload(node, &mut report);
        }

        self.check_reachability(definition, &mut report);

        for warning in &report.warnings {
            warn!("Definition '{}': {}", definition.id, warning);
        }

        report
    }

    fn check_transitions(
        &self,
        definition: &Definition,
        node: &Node,
        report: &mut ValidationReport,
    ) {
        for target in node.transition_targets() {
            if definition.node(target).is_none() {
                report.errors.push(ValidationError::DanglingTransition {
                    node: node.id.clone(),
                    target: target.to_string(),
                });
            }
        }

        if let Some(timeout) = &node.timeout {
            if let Err(e) = timeout.duration() {
                report.errors.push(ValidationError::InvalidDuration {
                    node: node.id.clone(),
                    duration: timeout.duration.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    fn check_payload(&self, node: &Node, report: &mut ValidationReport) {
        match node.node_type {
            NodeType::Start | NodeType::Script => {
                if node.next.is_none() {
                    report.errors.push(ValidationError::MissingTransition {
                        node: node.id.clone(),
                        node_type: node.node_type.to_string(),
                    });
                }
            }
            NodeType::Form => {
                if node.next.is_none() {
                    report
                        .warnings
                        .push(format!("form node '{}' has no next transition", node.id));
                }
                for field in &node.fields {
                    if field.name.trim().is_empty() {
                        report.errors.push(ValidationError::UnnamedFormField {
                            node: node.id.clone(),
                        });
                    }
                }
            }
            NodeType::Gateway => {
                if node.conditions.is_empty() {
                    report.errors.push(ValidationError::EmptyGateway {
                        node: node.id.clone(),
                    });
                } else if !node.conditions.iter().any(|c| c.otherwise) {
                    report.warnings.push(format!(
                        "gateway '{}' has no else branch; unmatched contexts will fail at runtime",
                        node.id
                    ));
                }
            }
            NodeType::End => {}
        }

        if node.node_type == NodeType::Script {
            match &node.script {
                None => report.errors.push(ValidationError::MissingScript {
                    node: node.id.clone(),
                }),
                Some(script) => {
                    if let Err(e) = base64::engine::general_purpose::STANDARD.decode(&script.code) {
                        report.errors.push(ValidationError::InvalidScriptEncoding {
                            node: node.id.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }
    }

    /// Walk the transition graph from the entry node and warn about nodes
    /// that can never be entered.
    fn check_reachability(&self, definition: &Definition, report: &mut ValidationReport) {
        if definition.start_node().is_none() {
            return;
        }

        let mut graph: Graph<&str, ()> = Graph::new();
        let mut indices: HashMap<&str, NodeIndex> = HashMap::new();

        for node in &definition.nodes {
            let index = graph.add_node(node.id.as_str());
            indices.insert(node.id.as_str(), index);
        }
        for node in &definition.nodes {
            let from = indices[node.id.as_str()];
            for target in node.transition_targets() {
                if let Some(&to) = indices.get(target) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        let mut reached = HashSet::new();
        let mut dfs = Dfs::new(&graph, indices[START_NODE_ID]);
        while let Some(index) = dfs.next(&graph) {
            reached.insert(graph[index]);
        }

        for node in &definition.nodes {
            if !reached.contains(node.id.as_str()) {
                report.warnings.push(format!(
                    "node '{}' is unreachable from {}",
                    node.id, START_NODE_ID
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Definition {
        Definition::from_json(json).unwrap()
    }

    #[test]
    fn test_valid_definition_passes() {
        let definition = parse(
            r#"{
                "id": "wf", "name": "wf",
                "nodes": [
                    {"id": "start_node", "type": "start", "next": "gate"},
                    {"id": "gate", "type": "gateway", "conditions": [
                        {"when": "x > 1", "next": "a"},
                        {"else": true, "next": "b"}
                    ]},
                    {"id": "a", "type": "end"},
                    {"id": "b", "type": "end"}
                ]
            }"#,
        );

        let report = DefinitionValidator::new().validate(&definition);
        assert!(report.is_valid(), "unexpected errors: {:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_missing_start_node() {
        let definition = parse(
            r#"{"id": "wf", "name": "wf",
                "nodes": [{"id": "only", "type": "end"}]}"#,
        );

        let report = DefinitionValidator::new().validate(&definition);
        assert!(!report.is_valid());
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::MissingStartNode { .. })));
    }

    #[test]
    fn test_dangling_transition() {
        let definition = parse(
            r#"{"id": "wf", "name": "wf",
                "nodes": [{"id": "start_node", "type": "start", "next": "nowhere"}]}"#,
        );

        let report = DefinitionValidator::new().validate(&definition);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::DanglingTransition { .. })));
    }

    #[test]
    fn test_gateway_without_else_warns() {
        let definition = parse(
            r#"{"id": "wf", "name": "wf",
                "nodes": [
                    {"id": "start_node", "type": "start", "next": "gate"},
                    {"id": "gate", "type": "gateway",
                     "conditions": [{"when": "x == 1", "next": "a"}]},
                    {"id": "a", "type": "end"}
                ]}"#,
        );

        let report = DefinitionValidator::new().validate(&definition);
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("no else branch"));
    }

    #[test]
    fn test_unreachable_node_warns() {
        let definition = parse(
            r#"{"id": "wf", "name": "wf",
                "nodes": [
                    {"id": "start_node", "type": "start", "next": "a"},
                    {"id": "a", "type": "end"},
                    {"id": "orphan", "type": "end"}
                ]}"#,
        );

        let report = DefinitionValidator::new().validate(&definition);
        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("'orphan' is unreachable")));
    }

    #[test]
    fn test_script_node_requires_code() {
        let definition = parse(
            r#"{"id": "wf", "name": "wf",
                "nodes": [
                    {"id": "start_node", "type": "start", "next": "s"},
                    {"id": "s", "type": "script", "next": "e"},
                    {"id": "e", "type": "end"}
                ]}"#,
        );

        let report = DefinitionValidator::new().validate(&definition);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::MissingScript { .. })));
    }

    #[test]
    fn test_bad_timeout_duration() {
        let definition = parse(
            r#"{"id": "wf", "name": "wf",
                "nodes": [
                    {"id": "start_node", "type": "start", "next": "e",
                     "timeout": {"duration": "eventually", "next": "e"}},
                    {"id": "e", "type": "end"}
                ]}"#,
        );

        let report = DefinitionValidator::new().validate(&definition);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidDuration { .. })));
    }
}

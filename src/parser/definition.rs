// ABOUTME: Core workflow definition data structures and JSON parsing
// ABOUTME: Defines the Definition graph, node payloads, and timeout duration handling

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::error::{ParserError, Result};

/// Well-known ID of the entry node every definition must contain.
pub const START_NODE_ID: &str = "start_node";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Meta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FormField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<ScriptConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<GatewayBranch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<EndConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<TimeoutConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<SignalConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Start,
    Form,
    Script,
    Gateway,
    End,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NodeType::Start => "start",
            NodeType::Form => "form",
            NodeType::Script => "script",
            NodeType::Gateway => "gateway",
            NodeType::End => "end",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Base64-encoded script source.
    pub code: String,
}

/// One branch of a gateway's ordered condition list. A branch matches when
/// its `when` expression or `script` predicate evaluates to true, or
/// unconditionally when `else` is set. The target node accepts both the
/// `next` and `then` spellings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayBranch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<ScriptConfig>,
    #[serde(rename = "else", default, skip_serializing_if = "std::ops::Not::not")]
    pub otherwise: bool,
    #[serde(alias = "then")]
    pub next: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<SignalConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EndConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<SignalConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Compact duration string such as "50ms", "30s", "1m", "1h".
    pub duration: String,
    pub next: String,
}

impl TimeoutConfig {
    pub fn duration(&self) -> Result<Duration> {
        humantime::parse_duration(&self.duration)
            .map_err(|e| ParserError::InvalidFormat(format!("bad duration '{}': {}", self.duration, e)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SignalConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throw: Option<String>,
}

impl Definition {
    /// Parse a definition from a JSON file.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json(&content)
    }

    /// Parse a definition from a JSON string. Unknown fields are ignored.
    pub fn from_json(content: &str) -> Result<Self> {
        let definition: Definition = serde_json::from_str(content)?;

        if definition.id.trim().is_empty() {
            return Err(ParserError::MissingField("id".to_string()));
        }
        if definition.nodes.is_empty() {
            return Err(ParserError::InvalidFormat(
                "definition has no nodes".to_string(),
            ));
        }

        Ok(definition)
    }

    /// Look up a node by its definition-local ID.
    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    /// The entry node, if the definition declares one.
    pub fn start_node(&self) -> Option<&Node> {
        self.node(START_NODE_ID)
    }

    pub fn node_ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }
}

impl Node {
    /// The signal this node pauses for on entry, if any.
    pub fn catch_signal(&self) -> Option<&str> {
        self.signal.as_ref().and_then(|s| s.catch.as_deref())
    }

    /// The signal an end node emits on entry, if any.
    pub fn emit_signal(&self) -> Option<&str> {
        self.end
            .as_ref()
            .and_then(|e| e.signal.as_ref())
            .and_then(|s| s.emit.as_deref())
    }

    /// Every transition target this node can reach directly.
    pub fn transition_targets(&self) -> Vec<&str> {
        let mut targets = Vec::new();
        if let Some(next) = &self.next {
            targets.push(next.as_str());
        }
        if let Some(timeout) = &self.timeout {
            targets.push(timeout.next.as_str());
        }
        for branch in &self.conditions {
            targets.push(branch.next.as_str());
        }
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINEAR_JSON: &str = r#"{
        "id": "onboarding",
        "name": "Onboarding",
        "meta": {"description": "hire flow"},
        "nodes": [
            {"id": "start_node", "type": "start", "name": "Start", "next": "collect"},
            {"id": "collect", "type": "form", "name": "Collect",
             "fields": [{"name": "email", "type": "email", "required": true}],
             "next": "finish"},
            {"id": "finish", "type": "end", "name": "Done",
             "end": {"html": "<p>done {{email}}</p>"}}
        ]
    }"#;

    #[test]
    fn test_parse_linear_definition() {
        let definition = Definition::from_json(LINEAR_JSON).unwrap();

        assert_eq!(definition.id, "onboarding");
        assert_eq!(definition.nodes.len(), 3);
        assert_eq!(
            definition.meta.as_ref().unwrap().description.as_deref(),
            Some("hire flow")
        );

        let start = definition.start_node().unwrap();
        assert_eq!(start.node_type, NodeType::Start);
        assert_eq!(start.next.as_deref(), Some("collect"));

        let form = definition.node("collect").unwrap();
        assert_eq!(form.fields.len(), 1);
        assert!(form.fields[0].required);
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let json = r#"{
            "id": "wf", "name": "wf", "unknown_top": 1,
            "nodes": [{"id": "start_node", "type": "start", "next": "e", "cron": "*"},
                      {"id": "e", "type": "end"}]
        }"#;
        assert!(Definition::from_json(json).is_ok());
    }

    #[test]
    fn test_gateway_branch_accepts_then_alias() {
        let json = r#"{
            "id": "wf", "name": "wf",
            "nodes": [
                {"id": "start_node", "type": "start", "next": "gate"},
                {"id": "gate", "type": "gateway", "conditions": [
                    {"when": "age >= 30", "then": "a"},
                    {"else": true, "next": "b"}
                ]},
                {"id": "a", "type": "end"},
                {"id": "b", "type": "end"}
            ]
        }"#;
        let definition = Definition::from_json(json).unwrap();
        let gate = definition.node("gate").unwrap();

        assert_eq!(gate.conditions[0].next, "a");
        assert_eq!(gate.conditions[1].next, "b");
        assert!(gate.conditions[1].otherwise);
    }

    #[test]
    fn test_definition_round_trip() {
        let definition = Definition::from_json(LINEAR_JSON).unwrap();
        let serialized = serde_json::to_string(&definition).unwrap();
        let reparsed = Definition::from_json(&serialized).unwrap();

        assert_eq!(definition, reparsed);
    }

    #[test]
    fn test_timeout_duration_parsing() {
        let config = TimeoutConfig {
            duration: "50ms".to_string(),
            next: "t".to_string(),
        };
        assert_eq!(config.duration().unwrap(), Duration::from_millis(50));

        let config = TimeoutConfig {
            duration: "1h".to_string(),
            next: "t".to_string(),
        };
        assert_eq!(config.duration().unwrap(), Duration::from_secs(3600));

        let bad = TimeoutConfig {
            duration: "soon".to_string(),
            next: "t".to_string(),
        };
        assert!(bad.duration().is_err());
    }

    #[test]
    fn test_empty_nodes_rejected() {
        let json = r#"{"id": "wf", "name": "wf", "nodes": []}"#;
        assert!(Definition::from_json(json).is_err());
    }

    #[test]
    fn test_transition_targets() {
        let definition = Definition::from_json(
            r#"{
                "id": "wf", "name": "wf",
                "nodes": [
                    {"id": "start_node", "type": "start", "next": "f",
                     "timeout": {"duration": "1m", "next": "late"}},
                    {"id": "f", "type": "end"},
                    {"id": "late", "type": "end"}
                ]
            }"#,
        )
        .unwrap();

        let start = definition.start_node().unwrap();
        assert_eq!(start.transition_targets(), vec!["f", "late"]);
    }
}

// ABOUTME: Command line argument definitions and parsing using Clap
// ABOUTME: Defines the main CLI structure and subcommands for flowline

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "flowline")]
#[command(about = "A persistent workflow engine executing BPMN-inspired JSON definitions")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Path to configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Disable colored output")]
    pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate workflow definition files without deploying them
    Validate {
        #[arg(help = "Path to a definition JSON file or a directory of them")]
        path: PathBuf,
    },

    /// Create a new instance of a workflow and start executing it
    Start {
        #[arg(help = "Workflow definition ID")]
        workflow_id: String,
    },

    /// Show the current status of an instance
    Status {
        #[arg(help = "Instance ID")]
        instance_id: String,
    },

    /// Submit form data for an instance parked at a form node
    Submit {
        #[arg(help = "Instance ID")]
        instance_id: String,

        #[arg(short = 'F', long = "field", help = "Form field values (name=value)")]
        fields: Vec<String>,
    },

    /// Emit a signal, waking every instance that catches it
    Signal {
        #[arg(help = "Signal name")]
        name: String,
    },

    /// Fire all expired node timeouts
    Tick,
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Parse form fields from name=value format
    pub fn parse_fields(
        fields: &[String],
    ) -> anyhow::Result<std::collections::HashMap<String, String>> {
        let mut parsed = std::collections::HashMap::new();

        for field in fields {
            if let Some((name, value)) = field.split_once('=') {
                parsed.insert(name.to_string(), value.to_string());
            } else {
                return Err(anyhow::anyhow!(
                    "Invalid field format '{}'. Expected 'name=value'",
                    field
                ));
            }
        }

        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fields() {
        let fields = vec!["name=alice".to_string(), "age=31".to_string()];

        let parsed = Args::parse_fields(&fields).unwrap();

        assert_eq!(parsed.get("name"), Some(&"alice".to_string()));
        assert_eq!(parsed.get("age"), Some(&"31".to_string()));
    }

    #[test]
    fn test_parse_fields_invalid() {
        let fields = vec!["no_equals_sign".to_string()];
        let result = Args::parse_fields(&fields);
        assert!(result.is_err());
    }
}

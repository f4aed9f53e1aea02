//! Testcase configuration: what to feed the program and what to expect back.
//!
//! A testcase is described by two grader-authored JSON files, the execute
//! config (inputs + run options) and the test config (expected tokens +
//! match options). Their file mtimes are the version indicators the rollback
//! detector compares against recorded results.

use super::bytes::FileBytes;
use super::ids::FileId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One expected output token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExpectedToken {
    /// Matches a token by string equality, or by edit distance when
    /// `allowable_edit_distance > 0`.
    Text { value: String },
    /// Matches a token that parses as a number within `float_tolerance`.
    Float { value: f64 },
}

impl ExpectedToken {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text {
            value: value.into(),
        }
    }

    pub fn float(value: f64) -> Self {
        Self::Float { value }
    }
}

/// Run options for the execute stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteOptions {
    /// Wall-clock limit for one run of the student program.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Inputs for one run of the student program. `STDIN` feeds the process's
/// standard input; every other key is dropped into the sandbox as a file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecuteConfig {
    #[serde(default)]
    pub input_files: BTreeMap<FileId, FileBytes>,
    #[serde(default)]
    pub options: ExecuteOptions,
}

impl ExecuteConfig {
    pub fn stdin_bytes(&self) -> Option<&[u8]> {
        self.input_files.get(&FileId::Stdin).map(|b| b.as_slice())
    }
}

/// Match options for the test stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOptions {
    /// When true, matched tokens must keep the expected-list order.
    #[serde(default = "default_ordered_matching")]
    pub ordered_matching: bool,
    /// Absolute tolerance for float tokens.
    #[serde(default = "default_float_tolerance")]
    pub float_tolerance: f64,
    /// Maximum Levenshtein distance for text tokens; 0 means exact equality.
    #[serde(default = "default_allowable_edit_distance")]
    pub allowable_edit_distance: usize,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            ordered_matching: default_ordered_matching(),
            float_tolerance: default_float_tolerance(),
            allowable_edit_distance: default_allowable_edit_distance(),
        }
    }
}

/// Expected outputs for one testcase, keyed by produced file (or `STDOUT`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TestConfig {
    #[serde(default)]
    pub expected_output_files: BTreeMap<FileId, Vec<ExpectedToken>>,
    #[serde(default)]
    pub options: TestOptions,
}

/// Both halves of a testcase's configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCaseConfig {
    pub execute: ExecuteConfig,
    pub test: TestConfig,
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_ordered_matching() -> bool {
    true
}

fn default_float_tolerance() -> f64 {
    1e-6
}

fn default_allowable_edit_distance() -> usize {
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_config_defaults_apply() {
        let cfg: ExecuteConfig = serde_json::from_str("{}").unwrap();
        assert!(cfg.input_files.is_empty());
        assert_eq!(cfg.options.timeout_secs, 10);
        assert_eq!(cfg.stdin_bytes(), None);
    }

    #[test]
    fn execute_config_parses_stdin_entry() {
        let json = r#"{
            "input_files": {"STDIN": "MSAyCg==", "data.txt": "eA=="},
            "options": {"timeout_secs": 3}
        }"#;
        let cfg: ExecuteConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.stdin_bytes(), Some("1 2\n".as_bytes()));
        assert_eq!(
            cfg.input_files.get(&FileId::file("data.txt")),
            Some(&FileBytes::from("x"))
        );
        assert_eq!(cfg.options.timeout_secs, 3);
    }

    #[test]
    fn test_config_defaults_apply() {
        let cfg: TestConfig = serde_json::from_str("{}").unwrap();
        assert!(cfg.expected_output_files.is_empty());
        assert!(cfg.options.ordered_matching);
        assert_eq!(cfg.options.allowable_edit_distance, 0);
    }

    #[test]
    fn expected_tokens_use_type_discriminator() {
        let json = r#"{
            "expected_output_files": {
                "STDOUT": [
                    {"type": "text", "value": "x"},
                    {"type": "float", "value": 1.0}
                ]
            },
            "options": {"ordered_matching": false, "float_tolerance": 0.01}
        }"#;
        let cfg: TestConfig = serde_json::from_str(json).unwrap();
        let tokens = &cfg.expected_output_files[&FileId::Stdout];
        assert_eq!(tokens[0], ExpectedToken::text("x"));
        assert_eq!(tokens[1], ExpectedToken::float(1.0));
        assert!(!cfg.options.ordered_matching);
    }
}

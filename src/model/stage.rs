//! Stages and stage paths.
//!
//! Every student advances along one stage path per configured testcase:
//! `Build → Compile → Execute(t) → Test(t)`. Build and Compile are shared
//! across all of a student's paths; Execute and Test belong to one testcase.

use super::ids::{IdError, TestCaseId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The four kinds of stage, without testcase parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageType {
    Build,
    Compile,
    Execute,
    Test,
}

impl fmt::Display for StageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageType::Build => "build",
            StageType::Compile => "compile",
            StageType::Execute => "execute",
            StageType::Test => "test",
        };
        f.write_str(s)
    }
}

/// One node of the pipeline. Execute and Test carry the testcase they
/// belong to; equality includes it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Stage {
    Build,
    Compile,
    Execute(TestCaseId),
    Test(TestCaseId),
}

impl Stage {
    pub fn stage_type(&self) -> StageType {
        match self {
            Stage::Build => StageType::Build,
            Stage::Compile => StageType::Compile,
            Stage::Execute(_) => StageType::Execute,
            Stage::Test(_) => StageType::Test,
        }
    }

    pub fn testcase_id(&self) -> Option<&TestCaseId> {
        match self {
            Stage::Execute(t) | Stage::Test(t) => Some(t),
            _ => None,
        }
    }

    /// The stage this stage directly depends on; `None` for Build.
    pub fn parent(&self) -> Option<Stage> {
        match self {
            Stage::Build => None,
            Stage::Compile => Some(Stage::Build),
            Stage::Execute(_) => Some(Stage::Compile),
            Stage::Test(t) => Some(Stage::Execute(t.clone())),
        }
    }

    /// Stable serialization name, also used as the durable row key.
    pub fn serialized_name(&self) -> String {
        match self {
            Stage::Build => "build".to_string(),
            Stage::Compile => "compile".to_string(),
            Stage::Execute(t) => format!("execute_{t}"),
            Stage::Test(t) => format!("test_{t}"),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialized_name())
    }
}

/// Error parsing a serialized stage name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageParseError {
    #[error("unknown stage name {0:?}")]
    UnknownName(String),
    #[error("bad testcase id in stage name: {0}")]
    BadTestCaseId(#[from] IdError),
}

impl FromStr for Stage {
    type Err = StageParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "build" => Ok(Stage::Build),
            "compile" => Ok(Stage::Compile),
            other => {
                if let Some(t) = other.strip_prefix("execute_") {
                    Ok(Stage::Execute(TestCaseId::new(t)?))
                } else if let Some(t) = other.strip_prefix("test_") {
                    Ok(Stage::Test(TestCaseId::new(t)?))
                } else {
                    Err(StageParseError::UnknownName(other.to_string()))
                }
            }
        }
    }
}

impl TryFrom<String> for Stage {
    type Error = StageParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Stage> for String {
    fn from(value: Stage) -> Self {
        value.serialized_name()
    }
}

/// An ordered run of stages from Build to a leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePath(Vec<Stage>);

impl StagePath {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self(stages)
    }

    /// The full path for one testcase.
    pub fn for_testcase(testcase_id: TestCaseId) -> Self {
        Self(vec![
            Stage::Build,
            Stage::Compile,
            Stage::Execute(testcase_id.clone()),
            Stage::Test(testcase_id),
        ])
    }

    /// The prefix-only path used when no testcases are configured.
    pub fn prefix_only() -> Self {
        Self(vec![Stage::Build, Stage::Compile])
    }

    pub fn stages(&self) -> &[Stage] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The testcase this path belongs to, if it reaches past Compile.
    pub fn testcase_id(&self) -> Option<&TestCaseId> {
        self.0.iter().find_map(|s| s.testcase_id())
    }

    pub fn get_stage_by_stage_type(&self, stage_type: StageType) -> Option<&Stage> {
        self.0.iter().find(|s| s.stage_type() == stage_type)
    }
}

impl fmt::Display for StagePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.0.iter().map(|s| s.serialized_name()).collect();
        write!(f, "[{}]", names.join(" -> "))
    }
}

/// Enumerate the stage paths for a testcase set. One path per testcase, in
/// sorted testcase order; the bare `[Build, Compile]` path when the set is
/// empty.
pub fn list_paths(testcase_ids: &[TestCaseId]) -> Vec<StagePath> {
    if testcase_ids.is_empty() {
        return vec![StagePath::prefix_only()];
    }
    let mut ids: Vec<&TestCaseId> = testcase_ids.iter().collect();
    ids.sort();
    ids.into_iter()
        .map(|t| StagePath::for_testcase(t.clone()))
        .collect()
}

//! Shared harness for the integration tests.
//!
//! Pipelines run against a fake `cc`: a shell script that copies the
//! "source" to the requested output path and marks it executable. A
//! submission's `main.c` is therefore itself a shell script, and the
//! compiled program is that script. A source containing `SYNTAX_ERROR`
//! fails to compile with a diagnostic on stderr, like a real compiler
//! would.

#![allow(dead_code)]

use gradepipe::layout::Layout;
use gradepipe::model::{
    ExecuteConfig, ExecuteOptions, ExpectedToken, FileBytes, FileId, TestConfig, TestOptions,
};
use gradepipe::{GraderConfig, PipelineDriver, ResultStore, StudentId, TestCaseId};
use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

pub const STUDENT: &str = "12A3456789B";

const FAKE_CC: &str = r#"#!/bin/sh
out=""
src=""
while [ "$#" -gt 0 ]; do
    case "$1" in
        -o) shift; out="$1" ;;
        *) src="$1" ;;
    esac
    shift
done
if grep -q SYNTAX_ERROR "$src"; then
    echo "$src:1: error: expected declaration" >&2
    exit 1
fi
cp "$src" "$out"
chmod +x "$out"
"#;

pub struct TestEnv {
    pub root: tempfile::TempDir,
    pub config: GraderConfig,
    pub layout: Layout,
    pub store: Arc<ResultStore>,
}

impl TestEnv {
    pub fn new() -> Self {
        gradepipe::logging::init();

        let root = tempfile::tempdir().unwrap();
        let cc_path = root.path().join("cc");
        std::fs::write(&cc_path, FAKE_CC).unwrap();
        std::fs::set_permissions(&cc_path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let data_root = root.path().join("data");
        let config = GraderConfig::new(&data_root).with_compiler_path(&cc_path);
        let layout = Layout::new(&data_root);
        let store = Arc::new(ResultStore::new(layout.clone()));
        Self {
            root,
            config,
            layout,
            store,
        }
    }

    pub fn driver(&self) -> PipelineDriver {
        PipelineDriver::new(&self.config, self.store.clone()).unwrap()
    }

    pub fn student(&self) -> StudentId {
        sid(STUDENT)
    }

    /// Place a one-file submission. The `main.c` body is what the fake
    /// toolchain will end up running.
    pub fn write_submission(&self, student: &StudentId, source: &str) {
        let dir = self.layout.submission_dir(student);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("main.c"), source).unwrap();
    }

    pub fn write_execute_config(&self, testcase: &TestCaseId, config: &ExecuteConfig) {
        write_json(&self.layout.execute_config_path(testcase), config);
    }

    pub fn write_test_config(&self, testcase: &TestCaseId, config: &TestConfig) {
        write_json(&self.layout.test_config_path(testcase), config);
    }

    pub fn testcase(&self, id: &str, execute: &ExecuteConfig, test: &TestConfig) -> TestCaseId {
        let testcase = TestCaseId::new(id).unwrap();
        self.write_execute_config(&testcase, execute);
        self.write_test_config(&testcase, test);
        testcase
    }
}

pub fn sid(raw: &str) -> StudentId {
    StudentId::new(raw).unwrap()
}

/// Execute config feeding `stdin` to the program.
pub fn execute_config(stdin: Option<&str>, timeout_secs: u64) -> ExecuteConfig {
    let mut input_files = BTreeMap::new();
    if let Some(text) = stdin {
        input_files.insert(FileId::Stdin, FileBytes::from(text));
    }
    ExecuteConfig {
        input_files,
        options: ExecuteOptions { timeout_secs },
    }
}

/// Test config expecting the given tokens on stdout, default options.
pub fn expect_stdout(tokens: Vec<ExpectedToken>) -> TestConfig {
    expect_files(vec![(FileId::Stdout, tokens)], TestOptions::default())
}

pub fn expect_files(
    expected: Vec<(FileId, Vec<ExpectedToken>)>,
    options: TestOptions,
) -> TestConfig {
    TestConfig {
        expected_output_files: expected.into_iter().collect(),
        options,
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, serde_json::to_vec_pretty(value).unwrap()).unwrap();
}

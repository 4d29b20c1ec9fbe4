//! Executor module for processing execution requests
//!
//! This module is the request orchestrator: it validates a submission, picks
//! plain execution or grading, drives the sandbox through write/compile/run,
//! and guarantees the sandbox is torn down on every path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::core::{cap_stream, classify_command_failure, ExecuteError};
use crate::harness::{self, GradingOutcome, HarnessKind};
use crate::languages::{ExecutionPlan, LanguageConfig, LanguageRegistry};
use crate::models::{ExecutionResponse, ExecutionResult, GradedResult, Submission, TestCase};
use crate::sandbox::{CommandSpec, Sandbox, SandboxProvider, SandboxSpec};

/// Fixed execution ceilings; never taken from the request
#[derive(Debug, Clone)]
pub struct ExecutionLimits {
    /// Per-command timeout when the request names none
    pub default_timeout: Duration,
    /// Ceiling for any requested per-command timeout
    pub max_timeout: Duration,
    /// Overall lifetime of one sandbox context
    pub sandbox_lifetime: Duration,
    /// Largest accepted source, in bytes
    pub max_code_bytes: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(5),
            max_timeout: Duration::from_secs(10),
            sandbox_lifetime: Duration::from_secs(60),
            max_code_bytes: 50 * 1024,
        }
    }
}

impl ExecutionLimits {
    /// Clamp a requested timeout (seconds) to `1..=max_timeout`
    pub fn clamp_timeout(&self, requested_secs: Option<i64>) -> Duration {
        let max_secs = self.max_timeout.as_secs().max(1);
        match requested_secs {
            Some(secs) => Duration::from_secs(secs.clamp(1, max_secs as i64) as u64),
            None => self.default_timeout.min(self.max_timeout),
        }
    }
}

/// Which path a validated submission takes
enum Mode<'a> {
    Plain,
    Grading {
        harness: HarnessKind,
        function_name: &'a str,
        tests: &'a [TestCase],
    },
}

/// Request orchestrator
pub struct Executor {
    languages: LanguageRegistry,
    sandboxes: Arc<dyn SandboxProvider>,
    limits: ExecutionLimits,
}

impl Executor {
    pub fn new(
        languages: LanguageRegistry,
        sandboxes: Arc<dyn SandboxProvider>,
        limits: ExecutionLimits,
    ) -> Self {
        Self {
            languages,
            sandboxes,
            limits,
        }
    }

    pub fn languages(&self) -> &LanguageRegistry {
        &self.languages
    }

    /// Run one submission to completion. Always yields a well-formed response.
    pub async fn execute(&self, submission: &Submission) -> ExecutionResponse {
        match self.try_execute(submission).await {
            Ok(response) => response,
            Err(err) => {
                info!("Execution ended with error: {}", err);
                err.into()
            }
        }
    }

    async fn try_execute(&self, submission: &Submission) -> Result<ExecutionResponse, ExecuteError> {
        let code = submission.code.as_str();
        if code.trim().is_empty() {
            return Err(ExecuteError::validation("Empty code"));
        }
        if code.len() > self.limits.max_code_bytes {
            return Err(ExecuteError::validation(format!(
                "Code exceeds {}KB limit",
                self.limits.max_code_bytes / 1024
            )));
        }

        let language = submission.language();
        let lang_config = self
            .languages
            .resolve(&language)
            .ok_or_else(|| ExecuteError::validation(format!("Unsupported language: {}", language)))?;

        let timeout = self.limits.clamp_timeout(submission.timeout);
        let mode = select_mode(submission, lang_config)?;

        info!(
            "Executing submission: language={}, mode={}, timeout={:?}",
            lang_config.name,
            match mode {
                Mode::Plain => "plain",
                Mode::Grading { .. } => "grading",
            },
            timeout
        );

        let sandbox = self
            .sandboxes
            .create(&SandboxSpec::isolated(self.limits.sandbox_lifetime))
            .await
            .map_err(|e| {
                error!("Failed to create {} sandbox: {:#}", self.sandboxes.name(), e);
                ExecuteError::provisioning("Failed to create sandbox")
            })?;

        // Backstop for a wedged sandbox; the context enforces its own lifetime too
        let outcome = tokio::time::timeout(
            self.limits.sandbox_lifetime,
            self.run_mode(sandbox.as_ref(), lang_config, code, &mode, timeout),
        )
        .await
        .unwrap_or(Err(ExecuteError::Timeout));

        if let Err(e) = sandbox.terminate().await {
            warn!("Sandbox teardown failed: {:#}", e);
        }

        outcome
    }

    async fn run_mode(
        &self,
        sandbox: &dyn Sandbox,
        lang_config: &LanguageConfig,
        code: &str,
        mode: &Mode<'_>,
        timeout: Duration,
    ) -> Result<ExecutionResponse, ExecuteError> {
        match mode {
            Mode::Plain => {
                let plan = lang_config.plan(code, timeout);
                run_plain(sandbox, &plan, code, timeout).await
            }
            Mode::Grading {
                harness,
                function_name,
                tests,
            } => {
                run_grading(sandbox, lang_config, *harness, code, function_name, tests, timeout)
                    .await
            }
        }
    }
}

fn select_mode<'a>(
    submission: &'a Submission,
    lang_config: &LanguageConfig,
) -> Result<Mode<'a>, ExecuteError> {
    let tests = submission.test_cases();
    let function_name = submission
        .function_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty());

    match (tests.is_empty(), function_name) {
        (true, _) => Ok(Mode::Plain),
        (false, None) => Err(ExecuteError::validation(
            "function_name is required when test_cases are provided",
        )),
        (false, Some(function_name)) => match lang_config.harness {
            Some(harness) => Ok(Mode::Grading {
                harness,
                function_name,
                tests,
            }),
            None => Err(ExecuteError::validation(format!(
                "Test cases are not supported for language: {}",
                lang_config.name
            ))),
        },
    }
}

async fn run_plain(
    sandbox: &dyn Sandbox,
    plan: &ExecutionPlan,
    code: &str,
    timeout: Duration,
) -> Result<ExecutionResponse, ExecuteError> {
    write_file(sandbox, &plan.source_path, code.as_bytes(), "Failed to write code to sandbox").await?;

    if let Some(compile) = &plan.compile {
        let output = sandbox
            .execute(&compile.command, compile.timeout)
            .await
            .map_err(|e| classify_command_failure(&e))?;

        if output.exit_code != Some(0) {
            info!("Compilation failed with exit code {:?}", output.exit_code);
            return Ok(ExecutionResponse::Completed(ExecutionResult {
                stdout: String::new(),
                stderr: cap_stream(&output.stderr),
                exit_code: output.exit_code.unwrap_or(1),
                duration_ms: 0,
            }));
        }
    }

    let result = run_command(sandbox, &plan.run, timeout).await?;
    Ok(ExecutionResponse::Completed(result))
}

async fn run_grading(
    sandbox: &dyn Sandbox,
    lang_config: &LanguageConfig,
    kind: HarnessKind,
    code: &str,
    function_name: &str,
    tests: &[TestCase],
    timeout: Duration,
) -> Result<ExecutionResponse, ExecuteError> {
    let program = harness::synthesize(kind, code, function_name, tests).map_err(|e| {
        error!("Failed to synthesize harness: {:#}", e);
        ExecuteError::Internal("Failed to build test harness".to_string())
    })?;

    write_file(sandbox, &program.path, program.source.as_bytes(), "Failed to write test harness").await?;

    let result = run_command(sandbox, &lang_config.run_command_for(&program.path), timeout).await?;

    match harness::parse_report(&result.stdout) {
        Some(GradingOutcome::Graded(test_results)) => {
            let graded = GradedResult::new(result, test_results);
            info!("Grading finished: {}/{} passed", graded.passed, graded.total);
            Ok(ExecutionResponse::Graded(graded))
        }
        Some(GradingOutcome::Aborted(message)) => Err(ExecuteError::Validation(message)),
        None => {
            warn!("Harness output was not a result report; returning raw output");
            Ok(ExecutionResponse::Completed(result))
        }
    }
}

async fn write_file(
    sandbox: &dyn Sandbox,
    path: &str,
    contents: &[u8],
    failure_message: &str,
) -> Result<(), ExecuteError> {
    sandbox.write(path, contents).await.map_err(|e| {
        match classify_command_failure(&e) {
            ExecuteError::Timeout => ExecuteError::Timeout,
            _ => {
                error!("{}: {:#}", failure_message, e);
                ExecuteError::provisioning(failure_message)
            }
        }
    })
}

/// Run one command, capping both streams and timing it
async fn run_command(
    sandbox: &dyn Sandbox,
    command: &CommandSpec,
    timeout: Duration,
) -> Result<ExecutionResult, ExecuteError> {
    let started = Instant::now();
    let output = sandbox.execute(command, timeout).await.map_err(|e| {
        let classified = classify_command_failure(&e);
        warn!("Command {} failed: {}", command.program, classified);
        classified
    })?;

    Ok(ExecutionResult {
        stdout: cap_stream(&output.stdout),
        stderr: cap_stream(&output.stderr),
        exit_code: output.exit_code.unwrap_or(0),
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::output::{MAX_OUTPUT_BYTES, TRUNCATION_MARKER};
    use crate::sandbox::CommandOutput;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records every interaction and replays scripted command results
    #[derive(Default)]
    struct FakeSandbox {
        writes: Mutex<Vec<(String, Vec<u8>)>>,
        commands: Mutex<Vec<(Vec<String>, Duration)>>,
        responses: Mutex<VecDeque<anyhow::Result<CommandOutput>>>,
        fail_writes: bool,
        terminations: AtomicUsize,
    }

    impl FakeSandbox {
        fn with_responses(responses: Vec<anyhow::Result<CommandOutput>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                ..Default::default()
            })
        }

        fn written(&self, path: &str) -> Option<String> {
            self.writes
                .lock()
                .unwrap()
                .iter()
                .find(|(p, _)| p == path)
                .map(|(_, bytes)| String::from_utf8(bytes.clone()).unwrap())
        }

        fn commands(&self) -> Vec<Vec<String>> {
            self.commands.lock().unwrap().iter().map(|(c, _)| c.clone()).collect()
        }
    }

    #[async_trait]
    impl Sandbox for FakeSandbox {
        async fn write(&self, path: &str, contents: &[u8]) -> anyhow::Result<()> {
            if self.fail_writes {
                anyhow::bail!("disk full");
            }
            self.writes.lock().unwrap().push((path.to_string(), contents.to_vec()));
            Ok(())
        }

        async fn execute(&self, command: &CommandSpec, timeout: Duration) -> anyhow::Result<CommandOutput> {
            self.commands.lock().unwrap().push((command.to_vec(), timeout));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(CommandOutput::default()))
        }

        async fn terminate(&self) -> anyhow::Result<()> {
            let previous = self.terminations.fetch_add(1, Ordering::SeqCst);
            if previous > 0 {
                // A second teardown must never reach callers as a failure
                anyhow::bail!("already terminated");
            }
            Ok(())
        }
    }

    struct FakeProvider {
        sandbox: Arc<FakeSandbox>,
        created: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl SandboxProvider for FakeProvider {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn create(&self, spec: &SandboxSpec) -> anyhow::Result<Arc<dyn Sandbox>> {
            assert_eq!(spec.lifetime, Duration::from_secs(60));
            assert_eq!(spec.network, crate::sandbox::NetworkPolicy::Disabled);
            self.created.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("quota exceeded");
            }
            Ok(self.sandbox.clone())
        }
    }

    fn executor_with(sandbox: Arc<FakeSandbox>) -> (Executor, Arc<FakeProvider>) {
        let provider = Arc::new(FakeProvider {
            sandbox,
            created: AtomicUsize::new(0),
            fail: false,
        });
        let executor = Executor::new(
            LanguageRegistry::builtin().unwrap(),
            provider.clone(),
            ExecutionLimits::default(),
        );
        (executor, provider)
    }

    fn output(stdout: &str, stderr: &str, exit_code: Option<i32>) -> anyhow::Result<CommandOutput> {
        Ok(CommandOutput {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code,
        })
    }

    fn submission(code: &str, language: &str) -> Submission {
        Submission {
            code: code.to_string(),
            language: Some(language.to_string()),
            ..Default::default()
        }
    }

    fn add_case(a: i64, b: i64, expected: i64) -> TestCase {
        TestCase {
            input: json!({"a": a, "b": b}).as_object().unwrap().clone(),
            expected_output: json!(expected),
        }
    }

    #[test]
    fn test_clamp_timeout() {
        let limits = ExecutionLimits::default();
        assert_eq!(limits.clamp_timeout(None), Duration::from_secs(5));
        assert_eq!(limits.clamp_timeout(Some(3)), Duration::from_secs(3));
        assert_eq!(limits.clamp_timeout(Some(60)), Duration::from_secs(10));
        assert_eq!(limits.clamp_timeout(Some(0)), Duration::from_secs(1));
        assert_eq!(limits.clamp_timeout(Some(-4)), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_empty_code_rejected_without_sandbox() {
        let (executor, provider) = executor_with(FakeSandbox::with_responses(vec![]));

        let response = executor.execute(&submission("   \n\t", "python")).await;

        assert_eq!(response, ExecutionResponse::error("Empty code"));
        assert_eq!(provider.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_oversized_code_rejected() {
        let (executor, provider) = executor_with(FakeSandbox::with_responses(vec![]));

        let response = executor.execute(&submission(&"x".repeat(51 * 1024), "python")).await;

        assert_eq!(response, ExecutionResponse::error("Code exceeds 50KB limit"));
        assert_eq!(provider.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unsupported_language_rejected_without_sandbox() {
        let (executor, provider) = executor_with(FakeSandbox::with_responses(vec![]));

        let response = executor.execute(&submission("puts 1", "ruby")).await;

        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"error": "Unsupported language: ruby"})
        );
        assert_eq!(provider.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_python_plain_execution() {
        let sandbox = FakeSandbox::with_responses(vec![output("hello\n", "", Some(0))]);
        let (executor, _) = executor_with(sandbox.clone());

        let mut request = submission("print('hello')", "python");
        request.timeout = Some(30);
        let response = executor.execute(&request).await;

        let ExecutionResponse::Completed(result) = response else {
            panic!("expected plain result, got {:?}", response);
        };
        assert_eq!(result.stdout, "hello\n");
        assert_eq!(result.exit_code, 0);
        assert_eq!(sandbox.written("/tmp/main.py").as_deref(), Some("print('hello')"));
        assert_eq!(sandbox.commands(), vec![vec!["python3", "/tmp/main.py"]]);
        // Requested 30s is clamped to the 10s ceiling
        assert_eq!(sandbox.commands.lock().unwrap()[0].1, Duration::from_secs(10));
        assert_eq!(sandbox.terminations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_default_language_is_python() {
        let sandbox = FakeSandbox::with_responses(vec![output("", "", Some(0))]);
        let (executor, _) = executor_with(sandbox.clone());

        let request = Submission {
            code: "print(1)".to_string(),
            ..Default::default()
        };
        executor.execute(&request).await;

        assert_eq!(sandbox.commands(), vec![vec!["python3", "/tmp/main.py"]]);
    }

    #[tokio::test]
    async fn test_javascript_alias_dispatch() {
        let sandbox = FakeSandbox::with_responses(vec![output("1\n", "", Some(0))]);
        let (executor, _) = executor_with(sandbox.clone());

        executor.execute(&submission("console.log(1)", "Node")).await;

        assert!(sandbox.written("/tmp/main.js").is_some());
        assert_eq!(sandbox.commands(), vec![vec!["node", "/tmp/main.js"]]);
    }

    #[tokio::test]
    async fn test_runtime_failure_is_a_normal_result() {
        let sandbox = FakeSandbox::with_responses(vec![output("", "ZeroDivisionError\n", Some(1))]);
        let (executor, _) = executor_with(sandbox);

        let response = executor.execute(&submission("1/0", "python")).await;

        let ExecutionResponse::Completed(result) = response else {
            panic!("expected plain result");
        };
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.stderr, "ZeroDivisionError\n");
    }

    #[tokio::test]
    async fn test_missing_exit_code_reported_as_zero() {
        let sandbox = FakeSandbox::with_responses(vec![output("ok", "", None)]);
        let (executor, _) = executor_with(sandbox);

        let response = executor.execute(&submission("print('ok')", "python")).await;

        assert!(matches!(response, ExecutionResponse::Completed(r) if r.exit_code == 0));
    }

    #[tokio::test]
    async fn test_java_compile_and_run() {
        let sandbox = FakeSandbox::with_responses(vec![
            output("", "", Some(0)),
            output("solved\n", "", Some(0)),
        ]);
        let (executor, _) = executor_with(sandbox.clone());

        let code = "public class Solver {\n  public static void main(String[] args) {}\n}";
        let response = executor.execute(&submission(code, "java")).await;

        assert!(matches!(response, ExecutionResponse::Completed(ref r) if r.stdout == "solved\n"));
        assert_eq!(sandbox.written("/tmp/Solver.java").as_deref(), Some(code));
        assert_eq!(
            sandbox.commands(),
            vec![
                vec!["javac", "/tmp/Solver.java"],
                vec!["java", "-cp", "/tmp", "Solver"],
            ]
        );
    }

    #[tokio::test]
    async fn test_java_compile_failure_skips_run() {
        let sandbox = FakeSandbox::with_responses(vec![output(
            "",
            "Main.java:1: error: ';' expected",
            Some(2),
        )]);
        let (executor, _) = executor_with(sandbox.clone());

        let response = executor.execute(&submission("class Main { int x }", "java")).await;

        assert_eq!(
            response,
            ExecutionResponse::Completed(ExecutionResult {
                stdout: String::new(),
                stderr: "Main.java:1: error: ';' expected".to_string(),
                exit_code: 2,
                duration_ms: 0,
            })
        );
        assert_eq!(sandbox.commands().len(), 1);
        assert_eq!(sandbox.terminations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_java_compile_failure_without_exit_code() {
        let sandbox = FakeSandbox::with_responses(vec![output("", "javac crashed", None)]);
        let (executor, _) = executor_with(sandbox);

        let response = executor.execute(&submission("public class Main {}", "java")).await;

        assert!(matches!(response, ExecutionResponse::Completed(r) if r.exit_code == 1));
    }

    #[tokio::test]
    async fn test_timeout_reported_uniformly() {
        let sandbox = FakeSandbox::with_responses(vec![Err(anyhow::anyhow!(
            "command timed out after 5s"
        ))]);
        let (executor, _) = executor_with(sandbox.clone());

        let response = executor.execute(&submission("import time; time.sleep(60)", "python")).await;

        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"error": "Execution timed out"})
        );
        assert_eq!(sandbox.terminations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_generic_failure_truncated() {
        let sandbox = FakeSandbox::with_responses(vec![Err(anyhow::anyhow!("{}", "e".repeat(900)))]);
        let (executor, _) = executor_with(sandbox);

        let response = executor.execute(&submission("print(1)", "python")).await;

        let ExecutionResponse::Failed { error } = response else {
            panic!("expected error");
        };
        assert_eq!(error.len(), 500);
    }

    #[tokio::test]
    async fn test_output_streams_capped() {
        let huge = "x".repeat(MAX_OUTPUT_BYTES + 10);
        let sandbox = FakeSandbox::with_responses(vec![output(&huge, &huge, Some(0))]);
        let (executor, _) = executor_with(sandbox);

        let response = executor.execute(&submission("print('x' * 99999)", "python")).await;

        let ExecutionResponse::Completed(result) = response else {
            panic!("expected plain result");
        };
        assert_eq!(result.stdout.len(), MAX_OUTPUT_BYTES + TRUNCATION_MARKER.len());
        assert!(result.stderr.ends_with(TRUNCATION_MARKER));
    }

    #[tokio::test]
    async fn test_write_failure_tears_down() {
        let sandbox = Arc::new(FakeSandbox {
            fail_writes: true,
            ..Default::default()
        });
        let (executor, _) = executor_with(sandbox.clone());

        let response = executor.execute(&submission("print(1)", "python")).await;

        assert_eq!(response, ExecutionResponse::error("Failed to write code to sandbox"));
        assert!(sandbox.commands().is_empty());
        assert_eq!(sandbox.terminations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sandbox_creation_failure() {
        let provider = Arc::new(FakeProvider {
            sandbox: FakeSandbox::with_responses(vec![]),
            created: AtomicUsize::new(0),
            fail: true,
        });
        let executor = Executor::new(
            LanguageRegistry::builtin().unwrap(),
            provider,
            ExecutionLimits::default(),
        );

        let response = executor.execute(&submission("print(1)", "python")).await;

        assert_eq!(response, ExecutionResponse::error("Failed to create sandbox"));
    }

    #[tokio::test]
    async fn test_grading_add_function() {
        let report = r#"[{"index": 0, "passed": true, "input": {"a": 1, "b": 2}, "expected": 3, "actual": 3}]"#;
        let sandbox = FakeSandbox::with_responses(vec![output(report, "", Some(0))]);
        let (executor, _) = executor_with(sandbox.clone());

        let request = Submission {
            code: "def add(a, b):\n    return a + b\n".to_string(),
            language: Some("python".to_string()),
            test_cases: Some(vec![add_case(1, 2, 3)]),
            function_name: Some("add".to_string()),
            ..Default::default()
        };
        let response = executor.execute(&request).await;

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["passed"], json!(1));
        assert_eq!(value["total"], json!(1));
        assert_eq!(
            value["testResults"][0],
            json!({"index": 0, "passed": true, "input": {"a": 1, "b": 2}, "expected": 3, "actual": 3})
        );
        assert_eq!(value["stdout"], json!(report));

        assert!(sandbox.written("/tmp/harness.py").is_some());
        assert!(sandbox.written("/tmp/main.py").is_none());
        assert_eq!(sandbox.commands(), vec![vec!["python3", "/tmp/harness.py"]]);
        assert_eq!(sandbox.terminations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_grading_counts_passed() {
        let report = concat!(
            r#"[{"index": 0, "passed": true, "input": {}, "expected": 1, "actual": 1},"#,
            r#" {"index": 1, "passed": false, "input": {}, "expected": 2, "actual": 3},"#,
            r#" {"index": 2, "passed": false, "input": {}, "expected": 2, "actual": null, "error": "boom"}]"#
        );
        let sandbox = FakeSandbox::with_responses(vec![output(report, "", Some(0))]);
        let (executor, _) = executor_with(sandbox);

        let request = Submission {
            code: "def f():\n    return 1\n".to_string(),
            test_cases: Some(vec![TestCase::default(); 3]),
            function_name: Some("f".to_string()),
            ..Default::default()
        };
        let response = executor.execute(&request).await;

        let ExecutionResponse::Graded(graded) = response else {
            panic!("expected graded result");
        };
        assert_eq!((graded.passed, graded.total), (1, 3));
        assert_eq!(graded.test_results[2].error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_grading_missing_function_is_error() {
        let sandbox = FakeSandbox::with_responses(vec![output(
            "[{\"error\": \"Function solve not found\"}]\n",
            "",
            Some(0),
        )]);
        let (executor, _) = executor_with(sandbox);

        let request = Submission {
            code: "def other():\n    pass\n".to_string(),
            test_cases: Some(vec![add_case(1, 2, 3)]),
            function_name: Some("solve".to_string()),
            ..Default::default()
        };
        let response = executor.execute(&request).await;

        assert_eq!(response, ExecutionResponse::error("Function solve not found"));
    }

    #[tokio::test]
    async fn test_grading_unparseable_output_falls_back_to_raw() {
        let sandbox = FakeSandbox::with_responses(vec![output(
            "",
            "SyntaxError: invalid syntax",
            Some(1),
        )]);
        let (executor, _) = executor_with(sandbox);

        let request = Submission {
            code: "def add(a, b) return a + b".to_string(),
            test_cases: Some(vec![add_case(1, 2, 3)]),
            function_name: Some("add".to_string()),
            ..Default::default()
        };
        let response = executor.execute(&request).await;

        let ExecutionResponse::Completed(result) = response else {
            panic!("expected raw result, got {:?}", response);
        };
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.stderr, "SyntaxError: invalid syntax");
    }

    #[tokio::test]
    async fn test_grading_timeout_not_parsed() {
        let sandbox = FakeSandbox::with_responses(vec![Err(anyhow::anyhow!("Timeout waiting for exec"))]);
        let (executor, _) = executor_with(sandbox);

        let request = Submission {
            code: "def add(a, b):\n    while True: pass\n".to_string(),
            test_cases: Some(vec![add_case(1, 2, 3)]),
            function_name: Some("add".to_string()),
            ..Default::default()
        };
        let response = executor.execute(&request).await;

        assert_eq!(response, ExecutionResponse::error("Execution timed out"));
    }

    #[tokio::test]
    async fn test_grading_write_failure() {
        let sandbox = Arc::new(FakeSandbox {
            fail_writes: true,
            ..Default::default()
        });
        let (executor, _) = executor_with(sandbox.clone());

        let request = Submission {
            code: "def add(a, b):\n    return a + b\n".to_string(),
            test_cases: Some(vec![add_case(1, 2, 3)]),
            function_name: Some("add".to_string()),
            ..Default::default()
        };
        let response = executor.execute(&request).await;

        assert_eq!(response, ExecutionResponse::error("Failed to write test harness"));
        assert_eq!(sandbox.terminations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_grading_requires_function_name() {
        let (executor, provider) = executor_with(FakeSandbox::with_responses(vec![]));

        let request = Submission {
            code: "def add(a, b):\n    return a + b\n".to_string(),
            test_cases: Some(vec![add_case(1, 2, 3)]),
            function_name: Some("  ".to_string()),
            ..Default::default()
        };
        let response = executor.execute(&request).await;

        assert_eq!(
            response,
            ExecutionResponse::error("function_name is required when test_cases are provided")
        );
        assert_eq!(provider.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_grading_rejected_for_languages_without_harness() {
        let (executor, provider) = executor_with(FakeSandbox::with_responses(vec![]));

        let request = Submission {
            code: "function add(a, b) { return a + b; }".to_string(),
            language: Some("js".to_string()),
            test_cases: Some(vec![add_case(1, 2, 3)]),
            function_name: Some("add".to_string()),
            ..Default::default()
        };
        let response = executor.execute(&request).await;

        assert_eq!(
            response,
            ExecutionResponse::error("Test cases are not supported for language: javascript")
        );
        assert_eq!(provider.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_function_name_without_tests_runs_plain() {
        let sandbox = FakeSandbox::with_responses(vec![output("", "", Some(0))]);
        let (executor, _) = executor_with(sandbox.clone());

        let request = Submission {
            code: "print(1)".to_string(),
            test_cases: Some(vec![]),
            function_name: Some("solve".to_string()),
            ..Default::default()
        };
        let response = executor.execute(&request).await;

        assert!(matches!(response, ExecutionResponse::Completed(_)));
        assert_eq!(sandbox.commands(), vec![vec!["python3", "/tmp/main.py"]]);
    }

    #[tokio::test]
    async fn test_teardown_failure_does_not_change_result() {
        let sandbox = FakeSandbox::with_responses(vec![output("ok\n", "", Some(0))]);
        // Pre-terminated: the executor's own teardown call now fails
        sandbox.terminate().await.unwrap();
        let (executor, _) = executor_with(sandbox.clone());

        let response = executor.execute(&submission("print('ok')", "python")).await;

        assert!(matches!(response, ExecutionResponse::Completed(r) if r.stdout == "ok\n"));
        assert_eq!(sandbox.terminations.load(Ordering::SeqCst), 2);
    }

    fn local_executor() -> Option<Executor> {
        let available = std::process::Command::new("python3")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);
        if !available {
            eprintln!("python3 not available, skipping");
            return None;
        }
        Some(Executor::new(
            LanguageRegistry::builtin().unwrap(),
            Arc::new(crate::sandbox::LocalProvider::new(1024 * 1024)),
            ExecutionLimits::default(),
        ))
    }

    fn grading_request(code: &str, function: &str, cases: Value) -> Submission {
        Submission {
            code: code.to_string(),
            language: Some("python".to_string()),
            test_cases: Some(serde_json::from_value(cases).unwrap()),
            function_name: Some(function.to_string()),
            ..Default::default()
        }
    }

    async fn grade_locally(executor: &Executor, request: &Submission) -> GradedResult {
        match executor.execute(request).await {
            ExecutionResponse::Graded(graded) => graded,
            other => panic!("expected graded result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_local_python_plain_run() {
        let Some(executor) = local_executor() else { return };

        let response = executor
            .execute(&submission("import sys\nprint('hi')\nsys.exit(4)", "py"))
            .await;

        let ExecutionResponse::Completed(result) = response else {
            panic!("expected plain result, got {:?}", response);
        };
        assert_eq!(result.stdout, "hi\n");
        assert_eq!(result.exit_code, 4);
    }

    #[tokio::test]
    async fn test_local_python_grading_comparisons() {
        let Some(executor) = local_executor() else { return };

        let code = r#"
def solve(kind):
    print("noise from user code")
    if kind == "float":
        return 0.1 + 0.2
    if kind == "list":
        return [2, 1]
    if kind == "dict":
        return {"b": 2, "a": 1}
    if kind == "number":
        return 3
    if kind == "tuple":
        return (1, 2)
    raise ValueError("bad kind")
"#;
        let request = grading_request(
            code,
            "solve",
            json!([
                {"input": {"kind": "float"}, "expected_output": 0.3},
                {"input": {"kind": "list"}, "expected_output": [1, 2]},
                {"input": {"kind": "dict"}, "expected_output": {"a": 1, "b": 2}},
                {"input": {"kind": "number"}, "expected_output": "3"},
                {"input": {"kind": "tuple"}, "expected_output": [1, 2]},
                {"input": {"kind": "other"}, "expected_output": null},
            ]),
        );

        let graded = grade_locally(&executor, &request).await;

        let passed: Vec<bool> = graded.test_results.iter().map(|r| r.passed).collect();
        assert_eq!(passed, vec![true, false, true, true, true, false]);
        assert_eq!((graded.passed, graded.total), (4, 6));
        assert_eq!(graded.test_results[5].error.as_deref(), Some("bad kind"));
        assert_eq!(graded.test_results[5].actual, Value::Null);
        assert!(graded.execution.stdout.contains("noise from user code"));
    }

    #[tokio::test]
    async fn test_local_python_grading_missing_function() {
        let Some(executor) = local_executor() else { return };

        let request = grading_request(
            "def other():\n    return 1\n",
            "solve",
            json!([{"input": {}, "expected_output": 1}]),
        );
        let response = executor.execute(&request).await;

        assert_eq!(response, ExecutionResponse::error("Function solve not found"));
    }

    #[tokio::test]
    async fn test_local_python_grading_dataclass_with_future_annotations() {
        let Some(executor) = local_executor() else { return };

        let code = r#"from __future__ import annotations
from dataclasses import dataclass
import typing


@dataclass
class Point:
    x: int
    y: int


def solve(a, b):
    hints = typing.get_type_hints(Point)
    return Point(a, b).x + Point(a, b).y + len(hints)
"#;
        let request = grading_request(
            code,
            "solve",
            json!([{"input": {"a": 1, "b": 2}, "expected_output": 5}]),
        );

        let graded = grade_locally(&executor, &request).await;

        assert_eq!((graded.passed, graded.total), (1, 1));
        assert!(graded.test_results[0].error.is_none());
    }

    #[tokio::test]
    async fn test_local_python_grading_non_callable_name_fails_per_test() {
        let Some(executor) = local_executor() else { return };

        let request = grading_request(
            "solve = 5\n",
            "solve",
            json!([
                {"input": {}, "expected_output": 5},
                {"input": {}, "expected_output": 6},
            ]),
        );

        let graded = grade_locally(&executor, &request).await;

        assert_eq!((graded.passed, graded.total), (0, 2));
        for result in &graded.test_results {
            assert_eq!(result.error.as_deref(), Some("'int' object is not callable"));
        }
    }

    #[tokio::test]
    async fn test_local_python_timeout() {
        let Some(executor) = local_executor() else { return };

        let mut request = submission("import time\ntime.sleep(30)", "python");
        request.timeout = Some(1);
        let response = executor.execute(&request).await;

        assert_eq!(response, ExecutionResponse::error("Execution timed out"));
    }
}

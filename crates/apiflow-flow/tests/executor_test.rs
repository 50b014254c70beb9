use apiflow_backend::{BackendError, StepRunner};
use apiflow_flow::{FlowError, FlowExecutor, SessionStore};
use apiflow_protocol::models::{
    Endpoint, FlowConfig, FlowStatus, FlowStep, MaterializedRequest, StepResponse,
};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// In-memory step runner: URLs containing "fail" error out, everything else
/// answers 200 with a small JSON body. Tracks call counts and the maximum
/// number of overlapping executions.
struct MockRunner {
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockRunner {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StepRunner for MockRunner {
    async fn execute(
        &self,
        request: &MaterializedRequest,
        _timeout: Option<Duration>,
    ) -> Result<StepResponse, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if request.url.contains("fail") {
            return Err(BackendError::Http("connection refused".to_string()));
        }

        Ok(StepResponse {
            status: 200,
            headers: HashMap::new(),
            body: json!({ "url": request.url, "token": "abc" }),
            elapsed_ms: self.delay.as_millis() as u64,
        })
    }
}

fn executor(runner: Arc<MockRunner>) -> FlowExecutor {
    FlowExecutor::new(SessionStore::new(), runner)
}

#[tokio::test]
async fn sequential_flow_passes_outputs_forward() {
    let runner = MockRunner::new(Duration::from_millis(1));
    let executor = executor(runner.clone());

    let steps = vec![
        FlowStep::get("s1", "https://api.test/login"),
        FlowStep::get("s2", "https://api.test/use/{{step.s1.body.token}}"),
    ];

    let report = executor
        .run("chain", steps, FlowConfig::default(), HashMap::new())
        .await
        .expect("run flow");

    assert_eq!(report.status, FlowStatus::Completed);
    assert_eq!(report.completed_steps, 2);
    assert_eq!(report.results.len(), 2);
    assert_eq!(report.results[1].request.url, "https://api.test/use/abc");
    assert_eq!(runner.calls(), 2);
}

#[tokio::test]
async fn flow_inputs_reach_requests() {
    let runner = MockRunner::new(Duration::from_millis(1));
    let executor = executor(runner.clone());

    let steps = vec![FlowStep::get("greet", "https://api.test/users/{{input.name}}")];
    let mut inputs = HashMap::new();
    inputs.insert("name".to_string(), json!("Ada"));

    let report = executor
        .run("inputs", steps, FlowConfig::default(), inputs)
        .await
        .expect("run flow");

    assert_eq!(report.results[0].request.url, "https://api.test/users/Ada");
}

#[tokio::test]
async fn stop_on_error_halts_remaining_steps() {
    let runner = MockRunner::new(Duration::from_millis(1));
    let executor = executor(runner.clone());

    let steps = vec![
        FlowStep::get("s1", "https://api.test/ok"),
        FlowStep::get("s2", "https://api.test/fail"),
        FlowStep::get("s3", "https://api.test/never"),
    ];

    let report = executor
        .run("halting", steps, FlowConfig::default(), HashMap::new())
        .await
        .expect("run flow");

    assert_eq!(report.status, FlowStatus::Failed);
    assert_eq!(report.results.len(), 2);
    assert_eq!(report.failed_steps, 1);
    // Step 3 was never attempted.
    assert_eq!(runner.calls(), 2);
}

#[tokio::test]
async fn continue_on_error_attempts_every_step() {
    let runner = MockRunner::new(Duration::from_millis(1));
    let executor = executor(runner.clone());

    let steps = vec![
        FlowStep::get("s1", "https://api.test/ok"),
        FlowStep::get("s2", "https://api.test/fail"),
        FlowStep::get("s3", "https://api.test/also-ok"),
    ];
    let config = FlowConfig::default().with_stop_on_error(false);

    let report = executor
        .run("tolerant", steps, config, HashMap::new())
        .await
        .expect("run flow");

    assert_eq!(report.status, FlowStatus::Failed);
    assert_eq!(report.results.len(), 3);
    assert_eq!(report.failed_steps, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(runner.calls(), 3);
}

#[tokio::test]
async fn parallel_execution_respects_concurrency_bound() {
    let runner = MockRunner::new(Duration::from_millis(20));
    let executor = executor(runner.clone());

    let steps: Vec<FlowStep> = (1..=5)
        .map(|i| FlowStep::get(format!("s{}", i), format!("https://api.test/{}", i)))
        .collect();

    let report = executor
        .run("fanout", steps, FlowConfig::parallel(2), HashMap::new())
        .await
        .expect("run flow");

    assert_eq!(report.status, FlowStatus::Completed);
    assert_eq!(report.results.len(), 5);
    assert_eq!(runner.calls(), 5);
    assert!(
        runner.max_in_flight() <= 2,
        "observed {} overlapping executions",
        runner.max_in_flight()
    );
}

#[tokio::test]
async fn parallel_stop_on_error_skips_undispatched_steps() {
    let runner = MockRunner::new(Duration::from_millis(10));
    let executor = executor(runner.clone());

    // One lane: the failure is observed before later steps dispatch.
    let steps = vec![
        FlowStep::get("s1", "https://api.test/fail"),
        FlowStep::get("s2", "https://api.test/ok"),
        FlowStep::get("s3", "https://api.test/ok2"),
    ];

    let report = executor
        .run("bail", steps, FlowConfig::parallel(1), HashMap::new())
        .await
        .expect("run flow");

    assert_eq!(report.status, FlowStatus::Failed);
    assert_eq!(report.results.len(), 1);
    assert_eq!(runner.calls(), 1);
}

#[tokio::test]
async fn validation_failure_executes_nothing() {
    let runner = MockRunner::new(Duration::from_millis(1));
    let executor = executor(runner.clone());

    let steps = vec![
        FlowStep::get("dup", "https://api.test/a"),
        FlowStep::get("dup", "https://api.test/b"),
    ];

    let result = executor
        .run("invalid", steps, FlowConfig::default(), HashMap::new())
        .await;

    match result {
        Err(FlowError::Validation(errors)) => {
            assert!(errors.iter().any(|e| e.contains("duplicate")));
        }
        other => panic!("expected validation error, got {:?}", other.map(|r| r.status)),
    }
    assert_eq!(runner.calls(), 0);
}

#[tokio::test]
async fn unresolved_reference_fails_step_before_dispatch() {
    let runner = MockRunner::new(Duration::from_millis(1));
    let executor = executor(runner.clone());

    let steps = vec![FlowStep::get("s1", "https://api.test/{{bogus.value}}")];

    let report = executor
        .run("unresolved", steps, FlowConfig::default(), HashMap::new())
        .await
        .expect("run flow");

    assert_eq!(report.status, FlowStatus::Failed);
    assert_eq!(report.results.len(), 1);
    assert!(report.results[0]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("unresolved references")));
    // The step runner was never invoked.
    assert_eq!(runner.calls(), 0);
}

#[tokio::test]
async fn endpoint_reference_supplies_request_defaults() {
    let runner = MockRunner::new(Duration::from_millis(1));
    let executor = executor(runner.clone());

    executor
        .register_endpoint(Endpoint {
            id: "ep-ping".to_string(),
            project_id: "p1".to_string(),
            folder_id: None,
            name: "Ping".to_string(),
            method: "POST".to_string(),
            url: "https://api.test/ping".to_string(),
            headers: Some(HashMap::from([(
                "X-Source".to_string(),
                "workbench".to_string(),
            )])),
            body: None,
            timeout_ms: None,
        })
        .await;

    let steps = vec![FlowStep::from_endpoint("s1", "ep-ping")];
    let report = executor
        .run("endpoint", steps, FlowConfig::default(), HashMap::new())
        .await
        .expect("run flow");

    assert_eq!(report.status, FlowStatus::Completed);
    let request = &report.results[0].request;
    assert_eq!(request.method, "POST");
    assert_eq!(request.url, "https://api.test/ping");
    assert_eq!(request.headers.get("X-Source").map(String::as_str), Some("workbench"));
}

#[tokio::test]
async fn unknown_endpoint_fails_the_step() {
    let runner = MockRunner::new(Duration::from_millis(1));
    let executor = executor(runner.clone());

    let steps = vec![FlowStep::from_endpoint("s1", "nope")];
    let report = executor
        .run("missing-endpoint", steps, FlowConfig::default(), HashMap::new())
        .await
        .expect("run flow");

    assert_eq!(report.status, FlowStatus::Failed);
    assert!(report.results[0]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("unknown endpoint")));
    assert_eq!(runner.calls(), 0);
}

#[tokio::test]
async fn flow_timeout_fails_remaining_steps() {
    let runner = MockRunner::new(Duration::from_millis(200));
    let executor = executor(runner.clone());

    let steps = vec![
        FlowStep::get("slow1", "https://api.test/slow"),
        FlowStep::get("slow2", "https://api.test/slower"),
    ];
    let config = FlowConfig::default().with_timeout_ms(50);

    let report = executor
        .run("deadline", steps, config, HashMap::new())
        .await
        .expect("run flow");

    assert_eq!(report.status, FlowStatus::Failed);
    assert!(report.errors.iter().any(|e| e.contains("deadline")));
    assert!(report
        .errors
        .iter()
        .any(|e| e.contains("slow2") && e.contains("did not complete")));
}

#[tokio::test]
async fn stop_request_cancels_cooperatively() {
    let runner = MockRunner::new(Duration::from_millis(50));
    let exec = executor(runner.clone());

    let steps = vec![
        FlowStep::get("s1", "https://api.test/a"),
        FlowStep::get("s2", "https://api.test/b"),
        FlowStep::get("s3", "https://api.test/c"),
    ];

    let background = {
        let exec = exec.clone();
        tokio::spawn(async move {
            exec.run("stoppable", steps, FlowConfig::default(), HashMap::new())
                .await
        })
    };

    // Let the first step start, then cancel.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(exec.request_stop("stoppable").await);

    let report = background
        .await
        .expect("join")
        .expect("run flow");

    assert_eq!(report.status, FlowStatus::Stopped);
    // The in-flight step finished; nothing new was dispatched.
    assert!(report.results.len() < 3);
    assert!(runner.calls() < 3);
}

#[tokio::test]
async fn duplicate_live_flow_id_is_rejected() {
    let runner = MockRunner::new(Duration::from_millis(100));
    let exec = executor(runner.clone());

    let slow_steps = vec![FlowStep::get("s1", "https://api.test/slow")];
    let background = {
        let exec = exec.clone();
        let steps = slow_steps.clone();
        tokio::spawn(async move {
            exec.run("unique", steps, FlowConfig::default(), HashMap::new())
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = exec
        .run("unique", slow_steps, FlowConfig::default(), HashMap::new())
        .await;
    assert!(matches!(second, Err(FlowError::DuplicateFlow(_))));

    let first = background.await.expect("join").expect("run flow");
    assert_eq!(first.status, FlowStatus::Completed);
}

#[tokio::test]
async fn header_scope_is_visible_to_the_running_step() {
    let runner = MockRunner::new(Duration::from_millis(1));
    let executor = executor(runner.clone());

    let steps = vec![FlowStep::new("s1", "POST", "https://api.test/audit")
        .with_header("X-Trace", "trace-7")
        .with_body(json!({"trace": "{{header.X-Trace}}"}))];

    let report = executor
        .run("headers", steps, FlowConfig::default(), HashMap::new())
        .await
        .expect("run flow");

    assert_eq!(report.status, FlowStatus::Completed);
    assert_eq!(
        report.results[0].request.body,
        Some(json!({"trace": "trace-7"}))
    );
}

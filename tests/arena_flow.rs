use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use arena_harness::arena::{
    run_arena, ArenaObserver, ArenaRequest, CancelToken, ContestantConfig, JudgeConfig,
    JudgeOutcome, NoopObserver, Phase, Progress,
};
use arena_harness::gateway::siliconflow::SiliconFlowAdapter;
use arena_harness::gateway::{CompletionClient, CompletionGateway, GatewayConfig};
use arena_harness::search::{SearchError, SearchProvider};

fn gateway_for(server: &MockServer) -> Arc<dyn CompletionGateway> {
    let adapter =
        SiliconFlowAdapter::with_config("sk-test", server.uri(), Duration::from_secs(5)).unwrap();
    Arc::new(CompletionClient::with_config(
        adapter,
        GatewayConfig {
            max_retries: 2,
            server_retry_delay: Duration::from_millis(0),
            network_retry_delay: Duration::from_millis(0),
        },
    ))
}

async fn mock_answer(server: &MockServer, model: &str, answer: &str) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({ "model": model })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": answer } }]
        })))
        .mount(server)
        .await;
}

/// Observer that records phase transitions and completion callbacks.
#[derive(Default)]
struct RecordingObserver {
    phases: Mutex<Vec<Phase>>,
    contestant_calls: AtomicUsize,
    judge_calls: AtomicUsize,
}

impl ArenaObserver for RecordingObserver {
    fn phase_changed(&self, phase: Phase) {
        self.phases.lock().unwrap().push(phase);
    }

    fn contestant_finished(&self, _name: &str, _content: &str, _progress: Progress) {
        self.contestant_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn judge_finished(&self, _outcome: &JudgeOutcome, _progress: Progress) {
        self.judge_calls.fetch_add(1, Ordering::SeqCst);
    }
}

// Scenario from the design notes: 3 contestants, no search, no judge.
// Two succeed, one hits a persistent 500 and lands as an error marker.
#[tokio::test]
async fn three_contestants_no_judge_mixed_results() {
    let server = MockServer::start().await;
    mock_answer(&server, "m1", "answer one").await;
    mock_answer(&server, "m2", "answer two").await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({ "model": "m3" })))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let req = ArenaRequest::new(
        "question",
        vec![
            ContestantConfig::new("m1"),
            ContestantConfig::new("m2"),
            ContestantConfig::new("m3"),
        ],
    );

    let observer = RecordingObserver::default();
    let outcome = run_arena(
        gateway_for(&server),
        None,
        req,
        &observer,
        CancelToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.phase, Phase::Completed);
    assert_eq!(outcome.results.len(), 3);
    assert_eq!(outcome.results["m1"].content, "answer one");
    assert_eq!(outcome.results["m2"].content, "answer two");
    assert!(outcome.results["m3"].failed);
    assert!(outcome.results["m3"].content.starts_with("[Error]"));
    assert_eq!(outcome.judge, JudgeOutcome::Skipped);
    assert_eq!(outcome.progress, Progress { completed: 4, total: 4 });

    // The failing contestant burned its 3 attempts; the others one each.
    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 5);

    assert_eq!(observer.contestant_calls.load(Ordering::SeqCst), 3);
    assert_eq!(observer.judge_calls.load(Ordering::SeqCst), 1);
    // Contesting is entered exactly once and left exactly once.
    let phases = observer.phases.lock().unwrap().clone();
    assert_eq!(
        phases,
        vec![Phase::Contesting, Phase::JudgePending, Phase::Completed]
    );
}

#[tokio::test]
async fn strict_judge_returns_structured_verdict() {
    let server = MockServer::start().await;
    mock_answer(&server, "m1", "the answer").await;
    mock_answer(
        &server,
        "judge-model",
        r#"{"reviews":[{"model":"m1","score":8,"comment":"ok"}],"best_model":"m1","fusion_result":"final"}"#,
    )
    .await;

    let req = ArenaRequest::single("question", "m1")
        .judge(JudgeConfig::new("judge-model").strict());

    let outcome = run_arena(
        gateway_for(&server),
        None,
        req,
        &NoopObserver,
        CancelToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.phase, Phase::Completed);
    match &outcome.judge {
        JudgeOutcome::Structured(verdict) => {
            assert_eq!(verdict.best_model.as_deref(), Some("m1"));
            assert_eq!(verdict.fusion_result, "final");
            assert_eq!(verdict.reviews.len(), 1);
            assert_eq!(verdict.reviews[0].comment, "ok");
        }
        other => panic!("expected structured verdict, got {other:?}"),
    }
    assert_eq!(outcome.progress, Progress { completed: 2, total: 2 });
}

#[tokio::test]
async fn strict_judge_prose_degrades_to_raw_outcome() {
    let server = MockServer::start().await;
    mock_answer(&server, "m1", "the answer").await;
    mock_answer(&server, "judge-model", "honestly, model one was best").await;

    let req = ArenaRequest::single("question", "m1")
        .judge(JudgeConfig::new("judge-model").strict());

    let outcome = run_arena(
        gateway_for(&server),
        None,
        req,
        &NoopObserver,
        CancelToken::new(),
    )
    .await
    .unwrap();

    // Degraded, not failed: the round still completes with full progress.
    assert_eq!(outcome.phase, Phase::Completed);
    match &outcome.judge {
        JudgeOutcome::Raw { marker, raw } => {
            assert!(marker.starts_with("[Error]"));
            assert_eq!(raw, "honestly, model one was best");
        }
        other => panic!("expected raw outcome, got {other:?}"),
    }
    assert_eq!(outcome.progress, Progress { completed: 2, total: 2 });
}

#[tokio::test]
async fn lenient_judge_takes_text_as_fused_answer() {
    let server = MockServer::start().await;
    mock_answer(&server, "m1", "the answer").await;
    mock_answer(&server, "judge-model", "a thoughtful fused answer").await;

    let req = ArenaRequest::single("question", "m1").judge(JudgeConfig::new("judge-model"));

    let outcome = run_arena(
        gateway_for(&server),
        None,
        req,
        &NoopObserver,
        CancelToken::new(),
    )
    .await
    .unwrap();

    match &outcome.judge {
        JudgeOutcome::Structured(verdict) => {
            assert_eq!(verdict.fusion_result, "a thoughtful fused answer");
            assert!(verdict.reviews.is_empty());
            assert_eq!(verdict.best_model, None);
        }
        other => panic!("expected structured outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn override_keeps_configured_name_as_aggregation_key() {
    let server = MockServer::start().await;
    mock_answer(&server, "Pro/vendor/model", "from the pro tier").await;

    let req = ArenaRequest::new(
        "question",
        vec![ContestantConfig::new("vendor/model").with_override("Pro/vendor/model")],
    );

    let outcome = run_arena(
        gateway_for(&server),
        None,
        req,
        &NoopObserver,
        CancelToken::new(),
    )
    .await
    .unwrap();

    // Keyed by the configured name even though the wire saw the override.
    assert!(outcome.results.contains_key("vendor/model"));
    assert_eq!(outcome.results["vendor/model"].content, "from the pro tier");

    let received = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["model"], "Pro/vendor/model");
}

struct FailingSearch;

#[async_trait]
impl SearchProvider for FailingSearch {
    async fn search(
        &self,
        _query: &str,
        _max_results: usize,
        _cookie: Option<&str>,
    ) -> Result<String, SearchError> {
        Err(SearchError::Status(503))
    }
}

#[tokio::test]
async fn search_failure_becomes_marker_and_round_still_completes() {
    let server = MockServer::start().await;
    mock_answer(&server, "m1", "answer").await;

    let req = ArenaRequest::single("question", "m1").search(5);

    let outcome = run_arena(
        gateway_for(&server),
        Some(Arc::new(FailingSearch)),
        req,
        &NoopObserver,
        CancelToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.phase, Phase::Completed);
    let enrichment = outcome.enrichment.as_deref().unwrap();
    assert!(enrichment.starts_with("[search failed:"));

    // The marker block was spliced into what the contestant saw.
    let received = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    let content = body["messages"][0]["content"].as_str().unwrap();
    assert!(content.starts_with("question"));
    assert!(content.contains("[web search context]"));
    assert!(content.contains("[search failed:"));
}

#[tokio::test]
async fn pre_cancelled_round_dispatches_nothing() {
    let server = MockServer::start().await;
    mock_answer(&server, "m1", "answer").await;

    let cancel = CancelToken::new();
    cancel.cancel();

    let req = ArenaRequest::single("question", "m1");
    let outcome = run_arena(gateway_for(&server), None, req, &NoopObserver, cancel)
        .await
        .unwrap();

    assert_eq!(outcome.phase, Phase::Cancelled);
    assert!(outcome.results.is_empty());
    assert_eq!(outcome.judge, JudgeOutcome::Skipped);
    assert_eq!(outcome.progress.completed, 0);

    let received = server.received_requests().await.unwrap();
    assert!(received.is_empty());
}

#[tokio::test]
async fn cancellation_suppresses_in_flight_results_and_skips_judge() {
    let server = MockServer::start().await;

    // Contestant answers arrive slowly enough for the stop to land first.
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({ "model": "m1" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(400))
                .set_body_json(json!({
                    "choices": [{ "message": { "content": "late answer" } }]
                })),
        )
        .mount(&server)
        .await;
    mock_answer(&server, "judge-model", "verdict").await;

    let req = ArenaRequest::single("question", "m1").judge(JudgeConfig::new("judge-model"));

    let cancel = CancelToken::new();
    let gateway = gateway_for(&server);
    let handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { run_arena(gateway, None, req, &NoopObserver, cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let outcome = handle.await.unwrap().unwrap();
    assert_eq!(outcome.phase, Phase::Cancelled);
    // The in-flight result was suppressed, not recorded.
    assert!(outcome.results.is_empty());
    assert_eq!(outcome.judge, JudgeOutcome::Skipped);

    // Only the contestant call ever went out; the judge was never invoked.
    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
}

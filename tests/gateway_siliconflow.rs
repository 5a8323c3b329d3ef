use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use arena_harness::gateway::siliconflow::{ChatProvider, SiliconFlowAdapter};
use arena_harness::gateway::{
    ChatRequest, CompletionClient, ErrorKind, GatewayConfig, Message, SamplingOptions,
};

fn zero_delay_config() -> GatewayConfig {
    GatewayConfig {
        max_retries: 2,
        server_retry_delay: Duration::from_millis(0),
        network_retry_delay: Duration::from_millis(0),
    }
}

fn adapter_for(server: &MockServer) -> SiliconFlowAdapter {
    SiliconFlowAdapter::with_config("sk-test", server.uri(), Duration::from_secs(5)).unwrap()
}

fn simple_request() -> ChatRequest {
    ChatRequest::new("deepseek-ai/DeepSeek-V3", vec![Message::user("hi")])
}

#[tokio::test]
async fn parses_success_content() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": "hello" } }]
        })))
        .mount(&server)
        .await;

    let resp = adapter_for(&server).chat(&simple_request()).await.unwrap();
    assert_eq!(resp.content, "hello");
}

#[tokio::test]
async fn persistent_5xx_makes_exactly_three_attempts_then_server_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let client = CompletionClient::with_config(adapter_for(&server), zero_delay_config());
    let err = client.chat(simple_request()).await.unwrap_err();
    assert!(matches!(err, ErrorKind::ServerError { .. }), "{err:?}");

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 3);
}

#[tokio::test]
async fn client_4xx_fails_on_first_attempt() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(401)
                .insert_header("x-request-id", "req-9")
                .set_body_string("invalid api key"),
        )
        .mount(&server)
        .await;

    let client = CompletionClient::with_config(adapter_for(&server), zero_delay_config());
    let err = client.chat(simple_request()).await.unwrap_err();
    match &err {
        ErrorKind::ClientError { context, .. } => {
            assert_eq!(context.http_status, Some(401));
            assert_eq!(context.request_id.as_deref(), Some("req-9"));
        }
        other => panic!("expected ClientError, got {other:?}"),
    }

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
}

#[derive(Clone)]
struct FlipResponder {
    calls: Arc<AtomicUsize>,
    first: ResponseTemplate,
    second: ResponseTemplate,
}

impl Respond for FlipResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            self.first.clone()
        } else {
            self.second.clone()
        }
    }
}

#[tokio::test]
async fn transient_5xx_is_retried_and_succeeds() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(FlipResponder {
            calls: Arc::new(AtomicUsize::new(0)),
            first: ResponseTemplate::new(500).set_body_string("transient"),
            second: ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "content": "ok" } }]
            })),
        })
        .mount(&server)
        .await;

    let client = CompletionClient::with_config(adapter_for(&server), zero_delay_config());
    let resp = client.chat(simple_request()).await.unwrap();
    assert_eq!(resp.content, "ok");

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 2);
}

#[tokio::test]
async fn malformed_success_body_is_protocol_mismatch_and_not_retried() {
    let server = MockServer::start().await;

    // 200 but with no choices: retrying is futile, the server answered.
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"object": "chat.completion"})),
        )
        .mount(&server)
        .await;

    let client = CompletionClient::with_config(adapter_for(&server), zero_delay_config());
    let err = client.chat(simple_request()).await.unwrap_err();
    assert!(matches!(err, ErrorKind::ProtocolMismatch { .. }), "{err:?}");

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
}

#[tokio::test]
async fn non_json_success_body_is_protocol_mismatch() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&server)
        .await;

    let err = adapter_for(&server)
        .chat(&simple_request())
        .await
        .unwrap_err();
    assert!(matches!(err, ErrorKind::ProtocolMismatch { .. }), "{err:?}");
}

#[tokio::test]
async fn connection_failure_is_retried_then_network_failure() {
    // Port 9 (discard) refuses connections immediately.
    let adapter = SiliconFlowAdapter::with_config(
        "sk-test",
        "http://127.0.0.1:9",
        Duration::from_secs(1),
    )
    .unwrap();
    let client = CompletionClient::with_config(adapter, zero_delay_config());

    let err = client.chat(simple_request()).await.unwrap_err();
    assert!(matches!(err, ErrorKind::NetworkFailure(_)), "{err:?}");
}

#[tokio::test]
async fn request_payload_carries_only_supplied_sampling_keys() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": "ok" } }]
        })))
        .mount(&server)
        .await;

    let sampling = SamplingOptions::default().temperature(0.7).max_tokens(512);
    let req = simple_request().sampling(sampling);
    adapter_for(&server).chat(&req).await.unwrap();

    let received = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();

    assert_eq!(body["model"], "deepseek-ai/DeepSeek-V3");
    assert_eq!(body["stream"], false);
    let temperature = body["temperature"].as_f64().unwrap();
    assert!((temperature - 0.7).abs() < 1e-6, "got {temperature}");
    assert_eq!(body["max_tokens"], 512);
    assert!(body.get("top_p").is_none());
    assert!(body.get("frequency_penalty").is_none());
}

//! Integration tests for the chat-completions client against a stand-in
//! provider.
//!
//! A local axum server plays the OpenAI-compatible endpoint so the real
//! client, response parsing, and error mapping are exercised end to end.

use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use octopus_tutor::{
    create_router, AppState, ChatCompletionsClient, Config, LlmConfig, LlmProvider, Store,
};
use serde_json::{json, Value};

/// What the stand-in provider answers, and what it was asked.
struct Provider {
    status: StatusCode,
    content: String,
    requests: Mutex<Vec<(Option<String>, Value)>>,
}

async fn chat_completions(
    State(provider): State<Arc<Provider>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);
    provider.requests.lock().expect("lock poisoned").push((auth, body));

    if !provider.status.is_success() {
        return (provider.status, Json(json!({ "error": { "message": "scripted failure" } })));
    }
    (
        StatusCode::OK,
        Json(json!({
            "choices": [{ "message": { "role": "assistant", "content": provider.content } }]
        })),
    )
}

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

async fn serve(router: Router) -> (String, tokio::task::JoinHandle<()>) {
    let port = find_available_port();
    let addr = format!("127.0.0.1:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://{addr}"), handle)
}

/// Starts the stand-in provider and an Octopus server wired to it.
///
/// Returns the Octopus API base URL, the provider, and both server handles.
async fn spawn_stack(
    status: StatusCode,
    content: &str,
) -> (String, Arc<Provider>, Vec<tokio::task::JoinHandle<()>>) {
    let provider = Arc::new(Provider {
        status,
        content: content.to_string(),
        requests: Mutex::new(Vec::new()),
    });
    let upstream = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(Arc::clone(&provider));
    let (upstream_url, upstream_handle) = serve(upstream).await;

    let mut config = Config::default();
    config.llm = LlmConfig {
        base_url: format!("{upstream_url}/v1/"),
        api_key: Some("gsk_integration".to_string()),
        request_timeout_secs: Some(5),
        ..LlmConfig::for_provider(LlmProvider::Groq)
    };
    let client = ChatCompletionsClient::new(config.llm.clone()).expect("Failed to build client");
    let store = Store::open_in_memory().expect("Failed to open store");
    let state = AppState::new(config, Arc::new(store), Arc::new(client));
    let (octopus_url, octopus_handle) = serve(create_router(state)).await;

    (
        format!("{octopus_url}/api"),
        provider,
        vec![upstream_handle, octopus_handle],
    )
}

async fn signup(http: &reqwest::Client, base_url: &str) -> String {
    let response = http
        .post(format!("{base_url}/auth/signup"))
        .json(&json!({
            "email": "solo@example.com",
            "password": "correct horse",
            "name": "Solo",
            "role": "individual",
        }))
        .send()
        .await
        .expect("Signup request failed");
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    let body: Value = response.json().await.expect("Signup body");
    body["token"].as_str().expect("token missing").to_string()
}

async fn analyze(base_url: &str, problem: &str) -> (reqwest::StatusCode, Value) {
    let http = reqwest::Client::new();
    let token = signup(&http, base_url).await;
    let response = http
        .post(format!("{base_url}/analyze"))
        .bearer_auth(token)
        .json(&json!({ "problem": problem }))
        .send()
        .await
        .expect("Analyze request failed");
    let status = response.status();
    (status, response.json().await.expect("Analyze body"))
}

fn shutdown(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        handle.abort();
    }
}

#[tokio::test]
async fn test_generation_round_trip_normalizes_forest() {
    let content = json!({
        "prerequisites": [{
            "id": "lin",
            "label": "Linear equations",
            "description": "Equations of degree one",
            "completed": true,
            "children": [{
                "id": "inv",
                "label": "Inverse operations",
                "children": [{ "id": "deep", "label": "Too deep" }]
            }]
        }],
        "similarProblem": "Solve 3x + 2 = 11",
        "similarSolution": [
            { "step": "Subtract 2", "explanation": "Keep both sides equal", "prerequisiteIds": ["inv"] }
        ]
    })
    .to_string();
    let (base_url, provider, handles) = spawn_stack(StatusCode::OK, &content).await;

    let (status, problem) = analyze(&base_url, "  Solve 2x + 3 = 7  ").await;
    assert_eq!(status, reqwest::StatusCode::OK, "{problem}");
    assert_eq!(problem["originalProblem"], "Solve 2x + 3 = 7");
    assert_eq!(problem["prerequisites"][0]["completed"], false);
    assert_eq!(problem["prerequisites"][0]["children"][0]["id"], "inv");
    assert!(problem["prerequisites"][0]["children"][0].get("children").is_none());
    assert_eq!(problem["similarSolution"][0]["prerequisiteIds"][0], "inv");

    let requests = provider.requests.lock().expect("lock poisoned");
    assert_eq!(requests.len(), 1);
    let (auth, body) = &requests[0];
    assert_eq!(auth.as_deref(), Some("Bearer gsk_integration"));
    assert_eq!(body["response_format"]["type"], "json_object");
    assert_eq!(body["messages"][0]["role"], "system");
    assert!(body["messages"][1]["content"]
        .as_str()
        .unwrap_or_default()
        .contains("Solve 2x + 3 = 7"));
    drop(requests);

    shutdown(handles);
}

#[tokio::test]
async fn test_rejected_key_maps_to_bad_gateway() {
    let (base_url, _provider, handles) = spawn_stack(StatusCode::UNAUTHORIZED, "").await;

    let (status, body) = analyze(&base_url, "Solve 2x = 4").await;
    assert_eq!(status, reqwest::StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "Invalid Groq API key. Please check your key.");

    shutdown(handles);
}

#[tokio::test]
async fn test_rate_limit_maps_to_service_unavailable() {
    let (base_url, _provider, handles) = spawn_stack(StatusCode::TOO_MANY_REQUESTS, "").await;

    let (status, body) = analyze(&base_url, "Solve 2x = 4").await;
    assert_eq!(status, reqwest::StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap_or_default().contains("429"));

    shutdown(handles);
}

#[tokio::test]
async fn test_non_json_content_maps_to_bad_gateway() {
    let (base_url, _provider, handles) = spawn_stack(StatusCode::OK, "Sure! Here are the concepts:").await;

    let (status, _) = analyze(&base_url, "Solve 2x = 4").await;
    assert_eq!(status, reqwest::StatusCode::BAD_GATEWAY);

    shutdown(handles);
}

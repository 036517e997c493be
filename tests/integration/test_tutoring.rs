//! End-to-end tests for the tutoring API over a real socket.
//!
//! These tests drive a learner from signup through the prerequisite map to
//! the unlocked solution, then check what the linked teacher can see.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use octopus_tutor::{
    create_router, AppState, ChatMessage, Config, GeneratedProblem, PrerequisiteNode, Result,
    SolutionStep, Store, TeachingReply, TutorModel,
};
use reqwest::StatusCode;
use serde_json::{json, Value};

/// Model that answers from a fixed script.
struct ScriptedModel;

#[async_trait]
impl TutorModel for ScriptedModel {
    async fn generate(&self, _problem: &str) -> Result<GeneratedProblem> {
        Ok(GeneratedProblem {
            prerequisites: vec![
                PrerequisiteNode::new("frac", "Fractions")
                    .with_child(PrerequisiteNode::new("lcd", "Common denominators")),
                PrerequisiteNode::new("ratio", "Ratios"),
            ],
            similar_problem: Some("What is 1/3 + 1/6?".to_string()),
            similar_solution: vec![
                SolutionStep::new("Rewrite 1/3 as 2/6", "Match denominators").referencing("lcd"),
                SolutionStep::new("Add to get 3/6 = 1/2", "Simplify").referencing("frac"),
            ],
        })
    }

    async fn teach(&self, concept: &str, history: &[ChatMessage]) -> Result<TeachingReply> {
        Ok(TeachingReply {
            text: format!("Let's look at {concept} ({} messages so far)", history.len()),
            illustration_prompt: None,
        })
    }

    async fn summarize_class(&self, _activity_json: &str) -> Result<String> {
        Ok("The class is close to mastering fractions.".to_string())
    }
}

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Spawns the test server and returns its API base URL.
async fn spawn_test_server(state: AppState) -> (String, tokio::task::JoinHandle<()>) {
    let port = find_available_port();
    let addr = format!("127.0.0.1:{port}");
    let base_url = format!("http://{addr}/api");

    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (base_url, handle)
}

fn test_state() -> AppState {
    let store = Store::open_in_memory().expect("Failed to open store");
    AppState::new(Config::default(), Arc::new(store), Arc::new(ScriptedModel))
}

/// Thin client that remembers the base URL and an optional bearer token.
struct Client {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl Client {
    fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.to_string(),
            token: None,
        }
    }

    fn authed(&self, token: &str) -> Self {
        Self {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            token: Some(token.to_string()),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> (StatusCode, String) {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.send().await.expect("Request failed");
        let status = response.status();
        let text = response.text().await.expect("Failed to read body");
        (status, text)
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let (status, text) = self.send(self.http.get(format!("{}{path}", self.base_url))).await;
        (status, parse(&text))
    }

    async fn get_text(&self, path: &str) -> (StatusCode, String) {
        self.send(self.http.get(format!("{}{path}", self.base_url))).await
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let request = self.http.post(format!("{}{path}", self.base_url)).json(&body);
        let (status, text) = self.send(request).await;
        (status, parse(&text))
    }

    async fn signup(&self, email: &str, role: &str, teacher_code: Option<&str>) -> (Self, Value) {
        let (status, body) = self
            .post(
                "/auth/signup",
                json!({
                    "email": email,
                    "password": "correct horse",
                    "name": email.split('@').next().unwrap_or(email),
                    "role": role,
                    "teacherCode": teacher_code,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "signup failed: {body}");
        let token = body["token"].as_str().expect("token missing");
        (self.authed(token), body["user"].clone())
    }
}

fn parse(text: &str) -> Value {
    if text.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(text).expect("Failed to parse JSON body")
    }
}

#[tokio::test]
async fn test_learner_reaches_solution_and_teacher_sees_progress() {
    let (base_url, handle) = spawn_test_server(test_state()).await;
    let anonymous = Client::new(&base_url);

    let (teacher, teacher_user) = anonymous.signup("ms.frizzle@school.test", "teacher", None).await;
    let code = teacher_user["teacherCode"].as_str().expect("teacher code missing");
    let (student, student_user) = anonymous
        .signup("arnold@school.test", "student", Some(&code.to_lowercase()))
        .await;
    assert_eq!(student_user["teacherId"], teacher_user["id"]);

    // Submit a problem and land on the map
    let (status, body) = student
        .post("/session/problem", json!({ "problem": "What is 1/2 + 1/4?" }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["session"]["view"], "tree");
    assert_eq!(body["session"]["problem"]["prerequisites"].as_array().map(Vec::len), Some(2));
    assert!(body.get("newBadges").is_none());

    // The solution stays locked until every concept is understood
    let (status, body) = student.post("/session/solution", json!({})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap_or_default().contains("3 remaining"));

    // Learn the child concept through a short conversation
    let (status, body) = student.post("/session/learn", json!({ "id": "lcd" })).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["session"]["view"], "learning");
    assert_eq!(body["session"]["activeConceptLabel"], "Common denominators");

    let (status, body) = student
        .post("/session/teach", json!({ "message": "Why do denominators need to match?" }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["reply"]["text"]
        .as_str()
        .unwrap_or_default()
        .starts_with("Let's look at Common denominators"));
    assert_eq!(body["session"]["transcript"].as_array().map(Vec::len), Some(3));

    let (status, body) = student.post("/session/complete", json!({})).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["session"]["view"], "tree");

    // The remaining two concepts are checked off directly on the map
    for id in ["frac", "ratio"] {
        let (status, _) = student.post("/session/toggle", json!({ "id": id })).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = student.post("/session/solution", json!({})).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["session"]["view"], "solution");
    assert_eq!(body["newBadges"][0]["name"], "First Solve");
    let steps = &body["session"]["solution"]["steps"];
    assert_eq!(steps[0]["concepts"][0]["label"], "Common denominators");
    assert_eq!(steps[1]["concepts"][0]["label"], "Fractions");

    // The teacher sees the linked student and their activity
    let (status, students) = teacher.get("/teacher/students").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(students.as_array().map(Vec::len), Some(1));
    assert_eq!(students[0]["email"], "arnold@school.test");

    let student_id = student_user["id"].as_i64().expect("student id");
    let (status, detail) = teacher.get(&format!("/teacher/student/{student_id}")).await;
    assert_eq!(status, StatusCode::OK);
    let kinds: Vec<&str> = detail["activities"]
        .as_array()
        .expect("activities")
        .iter()
        .filter_map(|a| a["type"].as_str())
        .collect();
    assert!(kinds.contains(&"analyze"));
    assert!(kinds.contains(&"complete"));
    assert!(kinds.contains(&"solve"));

    let (status, report) = teacher.get_text("/teacher/report").await;
    assert_eq!(status, StatusCode::OK);
    assert!(report.starts_with("# Octopus Class Report: ms.frizzle"));
    assert!(report.contains("| arnold |"));

    // Students cannot read the dashboard
    let (status, _) = student.get("/teacher/students").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    handle.abort();
}

#[tokio::test]
async fn test_sessions_are_isolated_per_user() {
    let (base_url, handle) = spawn_test_server(test_state()).await;
    let anonymous = Client::new(&base_url);

    let (first, _) = anonymous.signup("first@example.com", "individual", None).await;
    let (second, _) = anonymous.signup("second@example.com", "individual", None).await;

    let (status, _) = first
        .post("/session/problem", json!({ "problem": "Simplify 6/8" }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, snapshot) = second.get("/session").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["view"], "input");
    assert!(snapshot["problem"].is_null());

    let (_, snapshot) = first.get("/session").await;
    assert_eq!(snapshot["view"], "tree");
    assert_eq!(snapshot["problem"]["originalProblem"], "Simplify 6/8");

    handle.abort();
}

#[tokio::test]
async fn test_requests_without_token_are_rejected() {
    let (base_url, handle) = spawn_test_server(test_state()).await;
    let anonymous = Client::new(&base_url);

    let (status, body) = anonymous.get("/session").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");

    let forged = anonymous.authed("not-a-jwt");
    let (status, _) = forged.get("/me").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = anonymous.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    handle.abort();
}

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use serde_json::Value;
use tower::ServiceExt;

use quiz_arena_back::{
    config::AppConfig,
    dao::{
        game::GameRepository,
        game_store::{DocumentStore, memory::MemoryStore},
    },
    routes,
    services::auth_service,
    state::{AppState, SharedState, clock::ManualClock},
};

pub const ADMIN_EMAIL: &str = "quizmaster@example.org";
pub const SECRET: &str = "integration-secret";

pub struct TestApp {
    pub router: Router,
    pub state: SharedState,
    pub clock: Arc<ManualClock>,
}

/// Router over a fresh in-memory store with default documents, or no store at all.
pub async fn create_test_app(with_store: bool) -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let config = AppConfig::new(vec![ADMIN_EMAIL.into()], SECRET);
    let state = AppState::new(config, clock.clone());
    if with_store {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        GameRepository::new(store.clone())
            .init_defaults()
            .await
            .expect("default documents");
        state.set_game_store(store).await;
    }

    TestApp {
        router: routes::router(state.clone()),
        state,
        clock,
    }
}

pub fn admin_token() -> String {
    auth_service::issue_token(SECRET, ADMIN_EMAIL, 600).expect("token")
}

impl TestApp {
    /// Send a request and decode the JSON response body (`Null` when empty).
    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::String(
                String::from_utf8_lossy(&bytes).into_owned(),
            ))
        };
        (status, json)
    }

    pub async fn admin(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.send(method, uri, Some(&admin_token()), body).await
    }

    /// Send raw text as a JSON body.
    pub async fn send_raw(&self, uri: &str, body: &str) -> StatusCode {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap();
        self.router
            .clone()
            .oneshot(request)
            .await
            .unwrap()
            .status()
    }
}

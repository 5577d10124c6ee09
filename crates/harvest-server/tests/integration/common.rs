use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::Request;
use http_body_util::BodyExt;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use tower::ServiceExt;

use harvest_client::{DefaultCrawlerFactory, HtmdCleaner, OpenAiCompletion, ReqwestFetcher};
use harvest_core::{CollectionConfig, CollectionOrchestrator, DeepCollectionService};
use harvest_db::Database;
use harvest_server::routes;
use harvest_server::state::AppState;

pub const TEST_API_KEY: &str = "test-secret-key";

pub struct TestApp {
    pub router: Router,
    pub db: Database,
    _container: ContainerAsync<GenericImage>,
}

impl TestApp {
    pub fn get(&self, uri: &str) -> Request<Body> {
        Request::get(uri)
            .header("authorization", format!("Bearer {TEST_API_KEY}"))
            .body(Body::empty())
            .unwrap()
    }

    pub fn delete(&self, uri: &str) -> Request<Body> {
        Request::delete(uri)
            .header("authorization", format!("Bearer {TEST_API_KEY}"))
            .body(Body::empty())
            .unwrap()
    }

    pub fn post_json(&self, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("authorization", format!("Bearer {TEST_API_KEY}"))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    /// Send a request and return status plus the body as text.
    pub async fn send(&self, request: Request<Body>) -> (axum::http::StatusCode, String) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    pub async fn send_json(&self, request: Request<Body>) -> (axum::http::StatusCode, serde_json::Value) {
        let (status, body) = self.send(request).await;
        let json = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&body).unwrap()
        };
        (status, json)
    }
}

/// App without an LLM: deep-collection endpoints answer 503.
pub async fn setup_test_app() -> TestApp {
    build_app(None).await
}

/// App whose LLM client points at `llm_base_url`.
pub async fn setup_test_app_with_llm(llm_base_url: &str) -> TestApp {
    build_app(Some(llm_base_url.to_string())).await
}

async fn build_app(llm_base_url: Option<String>) -> TestApp {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "harvest_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let url = format!("postgresql://postgres:postgres@{host}:{port}/harvest_test");
    let db = Database::from_pool(retry_connect(&url).await);
    db.migrate().await.expect("Failed to run migrations");

    let collections = CollectionOrchestrator::new(
        db.clone(),
        DefaultCrawlerFactory::default(),
        CollectionConfig::default(),
    );
    let deep = llm_base_url.map(|base| {
        DeepCollectionService::new(
            ReqwestFetcher::new().unwrap(),
            HtmdCleaner::new(),
            OpenAiCompletion::with_base_url("llm-key", "test-model", &base).unwrap(),
            db.clone(),
            "test-model".to_string(),
        )
    });

    let state = Arc::new(AppState {
        db: db.clone(),
        collections,
        deep,
        api_key: TEST_API_KEY.to_string(),
    });

    TestApp {
        router: routes::router(state),
        db,
        _container: container,
    }
}

async fn retry_connect(url: &str) -> PgPool {
    for _ in 0..30 {
        if let Ok(pool) = PgPoolOptions::new().max_connections(5).connect(url).await {
            return pool;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    panic!("Failed to connect to test database");
}

/// JSON payloads of every `data:` line in an SSE body.
pub fn sse_payloads(body: &str) -> Vec<serde_json::Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim()).unwrap())
        .collect()
}

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use harvest_core::source::RawSourceConfig;
use mockito::{Matcher, Server};
use serde_json::json;

use crate::integration::common::{
    TestApp, setup_test_app, setup_test_app_with_llm, sse_payloads,
};

const RESULTS_PAGE: &str = r#"
    <html><body>
      <div class="item"><h3>Rust 1.0</h3><cite>https://a.example.com</cite><p>Stable release</p></div>
      <div class="item"><h3>Tokio</h3><cite>https://b.example.com</cite><p>Async runtime https://img.example.com/t.png</p></div>
    </body></html>
"#;

async fn create_source(app: &TestApp, name: &str, url: String) -> i64 {
    app.db
        .sources()
        .create(&RawSourceConfig {
            name: name.into(),
            url: Some(url),
            data_selector: Some(r#"{"type": "css", "selector": "div.item"}"#.into()),
            title_selector: Some("h3".into()),
            url_selector: Some("cite".into()),
            summary_selector: Some("p".into()),
            ..Default::default()
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn health_returns_200() {
    let app = setup_test_app().await;

    let (status, json) = app
        .send_json(Request::get("/health").body(Body::empty()).unwrap())
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["database"], "ok");
}

#[tokio::test]
async fn missing_or_wrong_key_returns_401() {
    let app = setup_test_app().await;

    let (status, _) = app
        .send(Request::get("/v1/sources").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, json) = app
        .send_json(
            Request::get("/v1/sources")
                .header("authorization", "Bearer wrong-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "unauthorized");
}

#[tokio::test]
async fn lists_active_sources() {
    let app = setup_test_app().await;
    create_source(&app, "news", "https://example.com/?q={keyword}".into()).await;

    let (status, json) = app.send_json(app.get("/v1/sources")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 1);
    assert_eq!(json["sources"][0]["name"], "news");
    assert_eq!(json["sources"][0]["sourceType"], "custom");
    assert_eq!(json["sources"][0]["method"], "GET");
}

#[tokio::test]
async fn collect_stream_and_save_end_to_end() {
    let mut site = Server::new_async().await;
    site.mock("GET", "/search")
        .match_query(Matcher::UrlEncoded("q".into(), "rust".into()))
        .with_status(200)
        .with_body(RESULTS_PAGE)
        .create_async()
        .await;

    let app = setup_test_app().await;
    let source_id = create_source(&app, "local", format!("{}/search?q={{keyword}}", site.url())).await;

    let (status, json) = app
        .send_json(app.post_json(
            "/v1/collections",
            json!({"keyword": "rust", "sourceIds": [source_id]}),
        ))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = json["jobId"].as_str().unwrap().to_string();

    let (status, body) = app
        .send(app.get(&format!("/v1/collections/{job_id}/stream")))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("event: record"));

    let events = sse_payloads(&body);
    let kinds: Vec<_> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
    assert_eq!(kinds, ["record", "record", "completed"]);
    assert_eq!(events[0]["title"], "Rust 1.0");
    assert_eq!(events[0]["url"], "https://a.example.com");
    assert_eq!(events[0]["jobId"], job_id.as_str());
    assert_eq!(events[1]["image"], "https://img.example.com/t.png");

    let (status, json) = app
        .send_json(app.get(&format!("/v1/collections/{job_id}")))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "completed");
    assert_eq!(json["keyword"], "rust");

    let records: Vec<_> = events[..2].to_vec();
    let (status, json) = app
        .send_json(app.post_json("/v1/collections/save", json!({"records": records})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["saved"], 2);

    let (status, json) = app.send_json(app.get("/v1/records?keyword=rus")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 2);
    assert_eq!(json["records"][0]["keyword"], "rust");
}

#[tokio::test]
async fn stream_can_be_attached_once() {
    let app = setup_test_app().await;

    let (_, json) = app
        .send_json(app.post_json(
            "/v1/collections",
            json!({"keyword": "rust", "sourceIds": [999]}),
        ))
        .await;
    let job_id = json["jobId"].as_str().unwrap().to_string();

    let (status, body) = app
        .send(app.get(&format!("/v1/collections/{job_id}/stream")))
        .await;
    assert_eq!(status, StatusCode::OK);
    // Unknown sources are skipped; the job still completes.
    let events = sse_payloads(&body);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "completed");

    let (status, _) = app
        .send(app.get(&format!("/v1/collections/{job_id}/stream")))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_collection_request_returns_400() {
    let app = setup_test_app().await;

    let (status, json) = app
        .send_json(app.post_json(
            "/v1/collections",
            json!({"keyword": "   ", "sourceIds": [1]}),
        ))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "validation_error");
}

#[tokio::test]
async fn unknown_job_returns_404() {
    let app = setup_test_app().await;

    let (status, _) = app.send(app.get("/v1/collections/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.send(app.delete("/v1/collections/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.send(app.get("/v1/collections/nope/stream")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stopping_a_finished_job_conflicts() {
    let app = setup_test_app().await;

    let (_, json) = app
        .send_json(app.post_json(
            "/v1/collections",
            json!({"keyword": "rust", "sourceIds": [999]}),
        ))
        .await;
    let job_id = json["jobId"].as_str().unwrap().to_string();
    // Drain the stream so the job is known to be finished.
    app.send(app.get(&format!("/v1/collections/{job_id}/stream")))
        .await;

    let (status, json) = app
        .send_json(app.delete(&format!("/v1/collections/{job_id}")))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "conflict");
}

#[tokio::test]
async fn stopping_a_running_job_returns_204_then_conflicts() {
    let mut site = Server::new_async().await;
    site.mock("GET", Matcher::Any)
        .with_status(200)
        .with_body(RESULTS_PAGE)
        .create_async()
        .await;

    let app = setup_test_app().await;
    let source_id = create_source(&app, "slow", format!("{}/search?p={{page}}", site.url())).await;

    let (_, json) = app
        .send_json(app.post_json(
            "/v1/collections",
            json!({"keyword": "rust", "sourceIds": [source_id], "pages": 10000}),
        ))
        .await;
    let job_id = json["jobId"].as_str().unwrap().to_string();

    let (status, _) = app.send(app.delete(&format!("/v1/collections/{job_id}"))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, json) = app
        .send_json(app.get(&format!("/v1/collections/{job_id}")))
        .await;
    assert_eq!(json["status"], "stopped");

    let (status, json) = app
        .send_json(app.delete(&format!("/v1/collections/{job_id}")))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "conflict");
}

#[tokio::test]
async fn delete_record_returns_404_when_missing() {
    let app = setup_test_app().await;

    let (status, _) = app.send(app.delete("/v1/records/4242")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deep_collection_without_llm_returns_503() {
    let app = setup_test_app().await;

    let (status, json) = app
        .send_json(app.post_json("/v1/deep-collections", json!({"recordIds": [1]})))
        .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["error"], "config_error");
}

#[tokio::test]
async fn deep_collection_enriches_saved_record() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/article")
        .with_status(200)
        .with_body("<article><h1>Rust 1.0</h1><p>Released in 2015.</p></article>")
        .create_async()
        .await;
    server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "choices": [{"message": {"content": "```json\n{\"sentiment\": \"positive\"}\n```"}}],
                "usage": {"total_tokens": 42}
            })
            .to_string(),
        )
        .create_async()
        .await;

    let app = setup_test_app_with_llm(&server.url()).await;
    let (_, json) = app
        .send_json(app.post_json(
            "/v1/collections/save",
            json!({"records": [{
                "title": "Rust 1.0",
                "url": format!("{}/article", server.url()),
                "keyword": "rust"
            }]}),
        ))
        .await;
    assert_eq!(json["saved"], 1);

    let (_, json) = app.send_json(app.get("/v1/records")).await;
    let record_id = json["records"][0]["id"].as_i64().unwrap();

    let (status, json) = app
        .send_json(app.post_json(
            "/v1/deep-collections",
            json!({"recordIds": [record_id]}),
        ))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let task_id = json["taskId"].as_str().unwrap().to_string();

    let mut finished = serde_json::Value::Null;
    for _ in 0..50 {
        let (_, json) = app
            .send_json(app.get(&format!("/v1/deep-collections/{task_id}")))
            .await;
        if json["status"] == "completed" {
            finished = json;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(finished["total"], 1);
    assert_eq!(finished["completed"], 1);
    assert_eq!(finished["failed"], 0);

    let (status, json) = app
        .send_json(app.get(&format!("/v1/records/{record_id}/deep")))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "completed");
    assert_eq!(json["analysisResult"], r#"{"sentiment": "positive"}"#);
    assert_eq!(json["tokensUsed"], 42);

    let (_, json) = app.send_json(app.get("/v1/records")).await;
    assert_eq!(json["records"][0]["hasDeepCollected"], true);
}

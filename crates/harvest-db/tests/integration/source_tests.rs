use harvest_core::source::{HttpMethod, RawSourceConfig, Selectors};
use harvest_core::traits::CollectionStore;

use crate::integration::common::setup_test_db;

fn raw(name: &str) -> RawSourceConfig {
    RawSourceConfig {
        name: name.into(),
        url: Some("https://example.com/search?q={keyword}&page={page}".into()),
        data_selector: Some(r#"{"type": "css", "selector": "div.result"}"#.into()),
        title_selector: Some("h3".into()),
        url_selector: Some("h3 a".into()),
        ..Default::default()
    }
}

#[tokio::test]
async fn create_and_get_parses_row() {
    let (db, _container) = setup_test_db().await;
    let repo = db.sources();

    let mut source = raw("news");
    source.method = Some("POST".into());
    source.headers = Some(r#"{"Referer": "https://example.com"}"#.into());
    source.body_template = Some(r#"{"q": "{keyword}"}"#.into());
    let id = repo.create(&source).await.unwrap();

    let config = repo.get(id).await.unwrap().expect("source should exist");
    assert_eq!(config.id, id);
    assert_eq!(config.name, "news");
    assert_eq!(config.source_type, "custom");
    assert_eq!(config.method, HttpMethod::Post);
    assert_eq!(config.headers["Referer"], "https://example.com");
    assert!(matches!(config.selectors, Selectors::Container { .. }));
    assert!(config.is_active());
}

#[tokio::test]
async fn list_active_skips_inactive_and_malformed() {
    let (db, _container) = setup_test_db().await;
    let repo = db.sources();

    let first = repo.create(&raw("first")).await.unwrap();
    let inactive = repo.create(&raw("inactive")).await.unwrap();
    repo.set_status(inactive, false).await.unwrap();

    let mut broken = raw("broken");
    broken.headers = Some("{not json".into());
    let broken = repo.create(&broken).await.unwrap();

    let active = db.list_active_sources().await.unwrap();
    let names: Vec<_> = active.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["first"]);
    assert_eq!(active[0].id, first);

    // Malformed rows look missing to the orchestrator.
    assert!(db.get_source(broken).await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_source_is_none() {
    let (db, _container) = setup_test_db().await;
    assert!(db.sources().get(4242).await.unwrap().is_none());
    assert!(!db.sources().set_status(4242, true).await.unwrap());
}

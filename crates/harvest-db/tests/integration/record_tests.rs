use chrono::Utc;
use harvest_core::models::{CollectedRecord, SavedRecordQuery};
use harvest_core::traits::CollectionStore;

use crate::integration::common::setup_test_db;

fn record(title: &str, keyword: &str, source_type: &str) -> CollectedRecord {
    CollectedRecord {
        job_id: "job".into(),
        title: title.into(),
        url: format!("https://example.com/{title}"),
        summary: "summary".into(),
        image: "https://example.com/a.png".into(),
        source: "news".into(),
        keyword: keyword.into(),
        source_type: source_type.into(),
        source_name: "news".into(),
        collected_at: Utc::now(),
        raw_data: format!(r#"{{"title":"{title}"}}"#),
    }
}

#[tokio::test]
async fn save_and_list_newest_first() {
    let (db, _container) = setup_test_db().await;

    let saved = db
        .save_records(&[record("one", "rust", "custom")])
        .await
        .unwrap();
    assert_eq!(saved, 1);
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    db.save_records(&[record("two", "rust lang", "baidu")])
        .await
        .unwrap();

    let all = db.records().list(&SavedRecordQuery::default()).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].title, "two");
    assert_eq!(all[1].title, "one");
    assert_eq!(all[1].image_url, "https://example.com/a.png");
    assert_eq!(all[1].raw_data, r#"{"title":"one"}"#);
    assert!(!all[0].has_deep_collected);
}

#[tokio::test]
async fn list_filters_by_keyword_substring_and_type() {
    let (db, _container) = setup_test_db().await;
    db.save_records(&[
        record("a", "rust async", "custom"),
        record("b", "python", "custom"),
        record("c", "learn rust", "baidu"),
    ])
    .await
    .unwrap();

    let rust = db
        .records()
        .list(&SavedRecordQuery {
            keyword: Some("rust".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(rust.len(), 2);

    let baidu_rust = db
        .records()
        .list(&SavedRecordQuery {
            keyword: Some("rust".into()),
            source_type: Some("baidu".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(baidu_rust.len(), 1);
    assert_eq!(baidu_rust[0].title, "c");
}

#[tokio::test]
async fn list_applies_limit_and_offset() {
    let (db, _container) = setup_test_db().await;
    let records: Vec<_> = (0..5)
        .map(|i| record(&format!("r{i}"), "rust", "custom"))
        .collect();
    db.save_records(&records).await.unwrap();

    let page = db
        .records()
        .list(&SavedRecordQuery {
            limit: 2,
            offset: 1,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.len(), 2);
}

#[tokio::test]
async fn delete_reports_whether_row_existed() {
    let (db, _container) = setup_test_db().await;
    db.save_records(&[record("gone", "rust", "custom")])
        .await
        .unwrap();
    let id = db.records().list(&SavedRecordQuery::default()).await.unwrap()[0].id;

    assert!(db.records().delete(id).await.unwrap());
    assert!(!db.records().delete(id).await.unwrap());
    assert!(db.records().get(id).await.unwrap().is_none());
}

#[tokio::test]
async fn saving_nothing_is_zero() {
    let (db, _container) = setup_test_db().await;
    assert_eq!(db.save_records(&[]).await.unwrap(), 0);
}

#[tokio::test]
async fn health_check_succeeds() {
    let (db, _container) = setup_test_db().await;
    db.health_check().await.unwrap();
}

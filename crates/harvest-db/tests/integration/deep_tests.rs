use chrono::Utc;
use harvest_core::models::{CollectedRecord, SavedRecordQuery};
use harvest_core::traits::{CollectionStore, DeepCollectionStore, DeepOutcome};
use harvest_db::Database;

use crate::integration::common::setup_test_db;

async fn saved_record_id(db: &Database) -> i64 {
    db.save_records(&[CollectedRecord {
        job_id: "job".into(),
        title: "Deep".into(),
        url: "https://example.com/deep".into(),
        summary: "summary".into(),
        image: String::new(),
        source: "news".into(),
        keyword: "rust".into(),
        source_type: "custom".into(),
        source_name: "news".into(),
        collected_at: Utc::now(),
        raw_data: String::new(),
    }])
    .await
    .unwrap();
    db.records().list(&SavedRecordQuery::default()).await.unwrap()[0].id
}

#[tokio::test]
async fn completed_outcome_flags_record() {
    let (db, _container) = setup_test_db().await;
    let id = saved_record_id(&db).await;

    let outcome = DeepOutcome::Completed {
        deep_content: "# Deep".into(),
        analysis_result: r#"{"sentiment":"positive"}"#.into(),
        tokens_used: 321,
    };
    db.save_deep_result(id, "gpt-4o-mini", &outcome).await.unwrap();

    let row = db.deep().get_for_record(id).await.unwrap().expect("row");
    assert_eq!(row.status, "completed");
    assert_eq!(row.deep_content.as_deref(), Some("# Deep"));
    assert_eq!(row.tokens_used, 321);
    assert_eq!(row.model, "gpt-4o-mini");

    let record = db.get_saved_record(id).await.unwrap().expect("record");
    assert!(record.has_deep_collected);
}

#[tokio::test]
async fn failed_outcome_does_not_flag_and_rerun_replaces() {
    let (db, _container) = setup_test_db().await;
    let id = saved_record_id(&db).await;

    db.save_deep_result(
        id,
        "m",
        &DeepOutcome::Failed {
            error_message: "timeout".into(),
        },
    )
    .await
    .unwrap();

    let row = db.deep().get_for_record(id).await.unwrap().expect("row");
    assert_eq!(row.status, "failed");
    assert_eq!(row.error_message.as_deref(), Some("timeout"));
    assert!(!db.get_saved_record(id).await.unwrap().unwrap().has_deep_collected);

    db.save_deep_result(
        id,
        "m",
        &DeepOutcome::Completed {
            deep_content: "c".into(),
            analysis_result: "{}".into(),
            tokens_used: 1,
        },
    )
    .await
    .unwrap();

    let row = db.deep().get_for_record(id).await.unwrap().expect("row");
    assert_eq!(row.status, "completed");
    assert!(row.error_message.is_none());
}

#[tokio::test]
async fn delete_clears_rows_and_flag() {
    let (db, _container) = setup_test_db().await;
    let id = saved_record_id(&db).await;
    db.save_deep_result(
        id,
        "m",
        &DeepOutcome::Completed {
            deep_content: "c".into(),
            analysis_result: "{}".into(),
            tokens_used: 1,
        },
    )
    .await
    .unwrap();

    assert_eq!(db.deep().delete_for_records(&[id]).await.unwrap(), 1);
    assert!(db.deep().get_for_record(id).await.unwrap().is_none());
    assert!(!db.get_saved_record(id).await.unwrap().unwrap().has_deep_collected);
}

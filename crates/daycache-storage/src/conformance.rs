//! Behaviour every storage backend must share.
//!
//! Each backend's test module runs these against its own instance.

use daycache_core::{DateKey, Payload, Record, StorageBackend, Summary};
use serde_json::json;

pub(crate) fn date(s: &str) -> DateKey {
    s.parse().unwrap()
}

/// Payload of `n` simple records.
pub(crate) fn payload(n: usize) -> Payload {
    let records: Vec<Record> = (0..n)
        .map(|i| {
            let mut row = Record::new();
            row.insert("track_id".into(), json!(format!("AL{i:02}2024")));
            row.insert("lead_time".into(), json!(i * 21_600));
            row.insert("radius".into(), serde_json::Value::Null);
            row
        })
        .collect();
    Payload::from_records(&records).unwrap()
}

pub(crate) async fn get_missing_returns_none(storage: &dyn StorageBackend) {
    let result = storage.get(date("2024-08-13")).await.unwrap();
    assert!(result.is_none());
}

pub(crate) async fn put_then_get(storage: &dyn StorageBackend) {
    let d = date("2024-08-13");
    let record = storage
        .put(d, &payload(3), &Summary::new(3, "weatherlab"))
        .await
        .unwrap();
    assert_eq!(record.date, d);
    assert_eq!(record.record_count, 3);
    assert_eq!(record.source, "weatherlab");
    assert_eq!(record.checksum, payload(3).checksum());

    let stored = storage.get(d).await.unwrap().unwrap();
    assert_eq!(stored.record, record);
    assert_eq!(stored.payload, payload(3));
    assert_eq!(stored.payload.records().unwrap().len(), 3);
}

pub(crate) async fn identical_put_is_idempotent(storage: &dyn StorageBackend) {
    let d = date("2024-08-13");
    let summary = Summary::new(2, "weatherlab");
    let first = storage.put(d, &payload(2), &summary).await.unwrap();
    let second = storage.put(d, &payload(2), &summary).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(storage.list_dates().await.unwrap(), vec![d]);
    let stored = storage.get(d).await.unwrap().unwrap();
    assert_eq!(stored.record, first);
}

pub(crate) async fn changed_content_upserts(storage: &dyn StorageBackend) {
    let d = date("2024-08-13");
    let first = storage
        .put(d, &payload(2), &Summary::new(2, "weatherlab"))
        .await
        .unwrap();
    let second = storage
        .put(d, &payload(5), &Summary::new(5, "weatherlab"))
        .await
        .unwrap();

    assert_ne!(first.checksum, second.checksum);
    assert_eq!(storage.list_dates().await.unwrap(), vec![d]);
    let stored = storage.get(d).await.unwrap().unwrap();
    assert_eq!(stored.record, second);
    assert_eq!(stored.payload, payload(5));
}

pub(crate) async fn list_dates_ascending(storage: &dyn StorageBackend) {
    assert!(storage.list_dates().await.unwrap().is_empty());

    for d in ["2024-09-23", "2024-08-13", "2024-08-14"] {
        storage
            .put(date(d), &payload(1), &Summary::new(1, "weatherlab"))
            .await
            .unwrap();
    }

    assert_eq!(
        storage.list_dates().await.unwrap(),
        vec![date("2024-08-13"), date("2024-08-14"), date("2024-09-23")]
    );
}

pub(crate) async fn concurrent_puts_stay_readable(storage: &dyn StorageBackend) {
    let d = date("2024-08-13");
    let (small, large) = (payload(2), payload(5));
    let (small_summary, large_summary) = (
        Summary::new(2, "weatherlab"),
        Summary::new(5, "weatherlab"),
    );

    for _ in 0..8 {
        let (a, b, c) = tokio::join!(
            storage.put(d, &large, &large_summary),
            storage.put(d, &small, &small_summary),
            storage.put(d, &large, &large_summary),
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();

        let stored = storage.get(d).await.unwrap().unwrap();
        assert!(stored.payload == small || stored.payload == large);
        assert_eq!(stored.record.checksum, stored.payload.checksum());
    }
    assert_eq!(storage.list_dates().await.unwrap(), vec![d]);
}

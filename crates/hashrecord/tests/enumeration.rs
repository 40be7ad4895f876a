//! Prefix enumeration through the record facade.

use std::sync::{Arc, Once, OnceLock};

use futures::TryStreamExt;
use hashrecord::fakes::MemoryHashStore;
use hashrecord::{
    add_connection, ColumnType, EntityBuilder, EntityType, Record, SaveOptions, Value,
};

struct Listed;
impl EntityType for Listed {}

fn store() -> &'static Arc<MemoryHashStore> {
    static STORE: OnceLock<Arc<MemoryHashStore>> = OnceLock::new();
    STORE.get_or_init(|| Arc::new(MemoryHashStore::new()))
}

/// Seeds `p-0` .. `p-9` plus a few records outside the `p-` prefix.
async fn setup() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        EntityBuilder::<Listed>::new("Listed", "enumeration")
            .id()
            .column("rank", ColumnType::Number)
            .register()
            .unwrap();
        add_connection("enumeration", store().clone()).unwrap();
    });

    for i in 0..10i32 {
        let record = Record::<Listed>::new([
            ("id", Value::from(format!("p-{}", i))),
            ("rank", Value::from(i)),
        ]);
        if Record::<Listed>::find(&format!("p-{}", i)).await.unwrap().is_none() {
            // a racing test may have seeded it in between
            let _ = record.create(SaveOptions::default()).await;
        }
    }
    for id in ["q-1", "q-2", "other"] {
        let _ = Record::<Listed>::new([("id", id)])
            .create(SaveOptions::default())
            .await;
    }
}

fn expected() -> Vec<String> {
    let mut ids: Vec<String> = (0..10).map(|i| format!("p-{}", i)).collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn find_all_ids_returns_every_match() {
    setup().await;
    let mut ids = Record::<Listed>::find_all_ids("p-").await.unwrap();
    ids.sort();
    assert_eq!(ids, expected());

    let all = Record::<Listed>::find_all_ids("").await.unwrap();
    for id in expected().iter().map(String::as_str).chain(["q-1", "q-2", "other"]) {
        assert!(all.iter().any(|found| found == id), "missing {}", id);
    }
}

#[tokio::test]
async fn scan_all_ids_batches_cover_every_match() {
    setup().await;
    let scan = Record::<Listed>::scan_all_ids("p-").unwrap();
    let batches: Vec<Vec<String>> = scan.try_collect().await.unwrap();
    assert!(batches.iter().all(|batch| !batch.is_empty()));

    let mut ids = batches.concat();
    ids.sort();
    assert_eq!(ids, expected());
}

#[tokio::test]
async fn find_all_loads_records() {
    setup().await;
    let mut records = Record::<Listed>::find_all("p-").await.unwrap();
    records.sort_by(|a, b| {
        a.get("rank")
            .as_f64()
            .partial_cmp(&b.get("rank").as_f64())
            .unwrap()
    });
    assert_eq!(records.len(), 10);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.id(), &Value::from(format!("p-{}", i)));
        assert_eq!(record.get("rank"), &Value::from(i as i32));
    }
}

#[tokio::test]
async fn find_all_skips_keys_without_a_record() {
    setup().await;
    // a hash left behind without an id field is not a record
    store().insert_raw("Listed:ghost-1", &[("rank", "n|1")]);
    let real = Record::<Listed>::new([("id", "ghost-2")]);
    let _ = real.create(SaveOptions::default()).await;

    let ids = Record::<Listed>::find_all_ids("ghost-").await.unwrap();
    assert_eq!(ids.len(), 2);

    let records = Record::<Listed>::find_all("ghost-").await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id(), &Value::from("ghost-2"));
}

#[tokio::test]
async fn unmatched_prefix_is_empty() {
    setup().await;
    assert!(Record::<Listed>::find_all_ids("zzz").await.unwrap().is_empty());
    let mut scan = Record::<Listed>::scan_all_ids("zzz").unwrap();
    assert!(scan.next_batch().await.is_none());
    assert!(Record::<Listed>::find_all("zzz").await.unwrap().is_empty());
}

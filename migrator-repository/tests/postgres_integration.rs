//! Integration tests against a live PostgreSQL instance.
//!
//! Run with a scratch database:
//! `OLD_DATABASE_URL=postgres://... cargo test -- --ignored`
use migrator_repository::{CopyTransaction, DestinationStore, PostgresStore, SourceStore};
use migrator_shared::{EntityType, EntityTypeId, FieldSpec, Record, SqlValue};

fn database_url() -> String {
    std::env::var("OLD_DATABASE_URL").expect("OLD_DATABASE_URL not set")
}

fn orders_entity() -> EntityType {
    EntityType {
        id: EntityTypeId::new("shop", "order"),
        table: "migrator_test_orders".to_string(),
        fields: vec![
            FieldSpec {
                name: "id".to_string(),
                references: None,
                primary_key: true,
                auto_generated: true,
                deferred: false,
            },
            FieldSpec::plain("total"),
        ],
    }
}

#[tokio::test]
#[ignore]
async fn catalog_probe_and_bulk_insert_round_trip() {
    let store = PostgresStore::connect(&database_url(), 5).await.unwrap();

    sqlx::query("DROP TABLE IF EXISTS migrator_test_orders")
        .execute(store.pool())
        .await
        .unwrap();
    sqlx::query("CREATE TABLE migrator_test_orders (id BIGSERIAL PRIMARY KEY, total BIGINT)")
        .execute(store.pool())
        .await
        .unwrap();

    assert!(SourceStore::table_exists(&store, "migrator_test_orders")
        .await
        .unwrap());
    assert!(!SourceStore::table_exists(&store, "migrator_test_missing")
        .await
        .unwrap());

    let entity = orders_entity();
    let columns = vec!["id".to_string(), "total".to_string()];
    let rows: Vec<Record> = (1..=10)
        .map(|i| Record::from_pairs([("id", SqlValue::Int(i)), ("total", SqlValue::Int(i * 100))]))
        .collect();

    let mut tx = store.begin_copy().await.unwrap();
    tx.suspend_constraints().await.unwrap();
    let inserted = tx.insert_ignore(&entity, &columns, &rows, 5000).await.unwrap();
    assert_eq!(inserted, 10);
    tx.restore_constraints().await.unwrap();
    tx.commit().await.unwrap();

    // rerun skips every conflicting row
    let mut tx = store.begin_copy().await.unwrap();
    let inserted = tx.insert_ignore(&entity, &columns, &rows, 5000).await.unwrap();
    assert_eq!(inserted, 0);
    tx.commit().await.unwrap();

    assert_eq!(
        SourceStore::estimate_count(&store, "migrator_test_orders")
            .await
            .unwrap(),
        10
    );

    let max = store.max_primary_key(&entity).await.unwrap();
    assert_eq!(max, Some(10));
    store.reset_sequence(&entity, 10).await.unwrap();

    let row = sqlx::query_scalar::<_, i64>("SELECT nextval(pg_get_serial_sequence('migrator_test_orders', 'id'))")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert!(row > 10);

    sqlx::query("DROP TABLE migrator_test_orders")
        .execute(store.pool())
        .await
        .unwrap();
}

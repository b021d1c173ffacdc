//! End-to-end copier behavior over the in-memory mock store: batching,
//! transaction discipline, idempotent reruns, sequence repair, and the
//! deferred-field second pass.
use std::collections::HashSet;

use migrator_pipeline::copier::statement_batch_size;
use migrator_pipeline::{
    BatchCopier, DEFAULT_BATCH_SIZE, FieldMapping, MigrationPlan, MigrationPlanner, Orchestrator,
    build_field_mappings,
};
use migrator_repository::MockStore;
use migrator_shared::{EntityType, EntityTypeId, FieldSpec, Record, SqlValue};

fn pk_field() -> FieldSpec {
    FieldSpec {
        name: "id".to_string(),
        references: None,
        primary_key: true,
        auto_generated: true,
        deferred: false,
    }
}

fn deferred_field(name: &str) -> FieldSpec {
    FieldSpec {
        name: name.to_string(),
        references: None,
        primary_key: false,
        auto_generated: false,
        deferred: true,
    }
}

/// Seven plain fields, the common narrow-row shape.
fn order_entity() -> EntityType {
    let mut fields = vec![pk_field()];
    for name in ["user_id", "status", "total", "created_at", "updated_at", "note"] {
        fields.push(FieldSpec::plain(name));
    }
    EntityType {
        id: EntityTypeId::new("shop", "order"),
        table: "shop_order".to_string(),
        fields,
    }
}

/// Eleven fields, two of them deferred blob-like columns.
fn profile_entity() -> EntityType {
    let mut fields = vec![pk_field()];
    for name in ["user_id", "phone", "address", "city", "zip", "country", "birthday", "gender"] {
        fields.push(FieldSpec::plain(name));
    }
    fields.push(deferred_field("photo_id"));
    fields.push(deferred_field("card"));
    EntityType {
        id: EntityTypeId::new("member", "profile"),
        table: "member_profile".to_string(),
        fields,
    }
}

fn mapping_for(entity: &EntityType) -> FieldMapping {
    FieldMapping {
        columns: entity.field_names(),
    }
}

fn columns_of(entity: &EntityType) -> Vec<&str> {
    entity.fields.iter().map(|f| f.name.as_str()).collect()
}

fn order_row(id: i64) -> Record {
    Record::from_pairs([
        ("id", SqlValue::Int(id)),
        ("user_id", SqlValue::Int(id % 100)),
        ("status", SqlValue::Text("paid".to_string())),
        ("total", SqlValue::Int(id * 10)),
        ("created_at", SqlValue::Text("2024-01-01".to_string())),
        ("updated_at", SqlValue::Text("2024-01-02".to_string())),
        ("note", SqlValue::Null),
    ])
}

fn seed_orders(store: &MockStore, count: i64) {
    store.seed_rows("shop_order", (1..=count).map(order_row).collect());
}

#[tokio::test]
async fn twelve_thousand_orders_flush_in_three_batches() {
    let entity = order_entity();
    let source = MockStore::new();
    source.create_table("shop_order", &columns_of(&entity));
    seed_orders(&source, 12_000);
    let destination = MockStore::new();
    destination.create_table("shop_order", &columns_of(&entity));

    let copier = BatchCopier::new(DEFAULT_BATCH_SIZE);
    let stats = copier
        .copy_entity(&entity, &mapping_for(&entity), &source, &destination)
        .await
        .unwrap();

    assert_eq!(stats.records, 12_000);
    assert_eq!(stats.batches, 3);
    assert_eq!(destination.insert_call_sizes(), vec![5000, 5000, 2000]);
    assert_eq!(destination.row_count("shop_order"), 12_000);
    assert_eq!(destination.events(), vec!["suspend", "restore", "commit"]);
}

#[tokio::test]
async fn rerun_inserts_nothing_new() {
    let entity = order_entity();
    let source = MockStore::new();
    source.create_table("shop_order", &columns_of(&entity));
    seed_orders(&source, 250);
    let destination = MockStore::new();
    destination.create_table("shop_order", &columns_of(&entity));

    let copier = BatchCopier::new(DEFAULT_BATCH_SIZE);
    let mapping = mapping_for(&entity);
    copier
        .copy_entity(&entity, &mapping, &source, &destination)
        .await
        .unwrap();
    assert_eq!(destination.row_count("shop_order"), 250);

    // second run sees every row conflict and skips it
    let stats = copier
        .copy_entity(&entity, &mapping, &source, &destination)
        .await
        .unwrap();
    assert_eq!(stats.records, 250);
    assert_eq!(destination.row_count("shop_order"), 250);
}

#[tokio::test]
async fn sequence_is_advanced_past_the_maximum_key() {
    let entity = order_entity();
    let source = MockStore::new();
    source.create_table("shop_order", &columns_of(&entity));
    seed_orders(&source, 42);
    let destination = MockStore::new();
    destination.create_table("shop_order", &columns_of(&entity));

    BatchCopier::new(DEFAULT_BATCH_SIZE)
        .copy_entity(&entity, &mapping_for(&entity), &source, &destination)
        .await
        .unwrap();

    assert_eq!(destination.sequence_resets(), vec![("shop_order".to_string(), 42)]);
}

#[tokio::test]
async fn natural_keys_leave_the_sequence_alone() {
    let mut entity = order_entity();
    entity.fields[0].auto_generated = false;
    let source = MockStore::new();
    source.create_table("shop_order", &columns_of(&entity));
    seed_orders(&source, 5);
    let destination = MockStore::new();
    destination.create_table("shop_order", &columns_of(&entity));

    BatchCopier::new(DEFAULT_BATCH_SIZE)
        .copy_entity(&entity, &mapping_for(&entity), &source, &destination)
        .await
        .unwrap();

    assert!(destination.sequence_resets().is_empty());
}

#[tokio::test]
async fn failed_insert_restores_constraints_and_rolls_back() {
    let entity = order_entity();
    let source = MockStore::new();
    source.create_table("shop_order", &columns_of(&entity));
    seed_orders(&source, 12_000);
    let destination = MockStore::new();
    destination.create_table("shop_order", &columns_of(&entity));
    destination.fail_inserts_after(1);

    let result = BatchCopier::new(DEFAULT_BATCH_SIZE)
        .copy_entity(&entity, &mapping_for(&entity), &source, &destination)
        .await;

    assert!(result.is_err());
    assert_eq!(destination.row_count("shop_order"), 0);
    assert_eq!(destination.events(), vec!["suspend", "restore", "rollback"]);
}

fn profile_row(id: i64, photo: SqlValue, card: SqlValue) -> Record {
    Record::from_pairs([
        ("id", SqlValue::Int(id)),
        ("user_id", SqlValue::Int(id)),
        ("phone", SqlValue::Text(format!("555-{id:04}"))),
        ("address", SqlValue::Text("1 Main St".to_string())),
        ("city", SqlValue::Text("Springfield".to_string())),
        ("zip", SqlValue::Text("00000".to_string())),
        ("country", SqlValue::Text("US".to_string())),
        ("birthday", SqlValue::Null),
        ("gender", SqlValue::Null),
        ("photo_id", photo),
        ("card", card),
    ])
}

#[tokio::test]
async fn deferred_fields_arrive_in_a_second_pass() {
    let entity = profile_entity();
    let source = MockStore::new();
    source.create_table("member_profile", &columns_of(&entity));
    source.seed_rows(
        "member_profile",
        vec![
            profile_row(1, SqlValue::Text("photos/1.jpg".to_string()), SqlValue::Null),
            profile_row(2, SqlValue::Text(String::new()), SqlValue::Null),
            profile_row(3, SqlValue::Null, SqlValue::Bytes(vec![0xCA, 0xFE])),
        ],
    );
    let destination = MockStore::new();
    destination.create_table("member_profile", &columns_of(&entity));

    let stats = BatchCopier::new(DEFAULT_BATCH_SIZE)
        .copy_entity(&entity, &mapping_for(&entity), &source, &destination)
        .await
        .unwrap();

    assert_eq!(stats.records, 3);
    // the bulk pass carried no deferred columns, so rows 1 and 3 were
    // completed by updates and row 2 (empty blobs) was left alone
    assert_eq!(stats.deferred_updates, 2);
    let rows = destination.rows("member_profile");
    let by_id = |id: i64| {
        rows.iter()
            .find(|r| r.get_or_null("id") == &SqlValue::Int(id))
            .unwrap()
    };
    assert_eq!(
        by_id(1).get_or_null("photo_id"),
        &SqlValue::Text("photos/1.jpg".to_string())
    );
    assert_eq!(by_id(1).get_or_null("card"), &SqlValue::Null);
    assert_eq!(by_id(2).get_or_null("photo_id"), &SqlValue::Null);
    assert_eq!(by_id(3).get_or_null("card"), &SqlValue::Bytes(vec![0xCA, 0xFE]));
}

#[tokio::test]
async fn deferred_pass_skips_columns_dropped_by_validation() {
    // "card" is declared deferred but absent on the source table; the
    // second pass must query only the surviving deferred column
    let entity = profile_entity();
    let source = MockStore::new();
    let source_columns: Vec<&str> = columns_of(&entity)
        .into_iter()
        .filter(|c| *c != "card")
        .collect();
    source.create_table("member_profile", &source_columns);
    source.seed_rows(
        "member_profile",
        vec![
            profile_row(1, SqlValue::Text("photos/1.jpg".to_string()), SqlValue::Null),
            profile_row(2, SqlValue::Null, SqlValue::Null),
        ],
    );
    let destination = MockStore::new();
    destination.create_table("member_profile", &columns_of(&entity));

    let plan = MigrationPlan {
        ordered: vec![entity.clone()],
        skipped: vec![],
    };
    let mappings = build_field_mappings(&plan, &source, &destination)
        .await
        .unwrap();

    let stats = BatchCopier::new(DEFAULT_BATCH_SIZE)
        .copy_entity(&entity, &mappings[&entity.id], &source, &destination)
        .await
        .unwrap();

    assert_eq!(stats.records, 2);
    assert_eq!(stats.deferred_updates, 1);
    let rows = destination.rows("member_profile");
    let row = rows
        .iter()
        .find(|r| r.get_or_null("id") == &SqlValue::Int(1))
        .unwrap();
    assert_eq!(
        row.get_or_null("photo_id"),
        &SqlValue::Text("photos/1.jpg".to_string())
    );
    assert_eq!(row.get_or_null("card"), &SqlValue::Null);
}

#[tokio::test]
async fn deferred_pass_continues_past_a_missing_destination_row() {
    let entity = profile_entity();
    let source = MockStore::new();
    source.create_table("member_profile", &columns_of(&entity));
    source.seed_rows(
        "member_profile",
        vec![
            profile_row(1, SqlValue::Text("photos/1.jpg".to_string()), SqlValue::Null),
            profile_row(2, SqlValue::Text("photos/2.jpg".to_string()), SqlValue::Null),
        ],
    );
    let destination = MockStore::new();
    destination.create_table("member_profile", &columns_of(&entity));
    destination.report_row_missing(&SqlValue::Int(1));

    let stats = BatchCopier::new(DEFAULT_BATCH_SIZE)
        .copy_entity(&entity, &mapping_for(&entity), &source, &destination)
        .await
        .unwrap();

    // row 1's update was reported not found and skipped; row 2 still landed
    assert_eq!(stats.records, 2);
    assert_eq!(stats.deferred_updates, 1);
    let rows = destination.rows("member_profile");
    let by_id = |id: i64| {
        rows.iter()
            .find(|r| r.get_or_null("id") == &SqlValue::Int(id))
            .unwrap()
    };
    assert_eq!(by_id(1).get_or_null("photo_id"), &SqlValue::Null);
    assert_eq!(
        by_id(2).get_or_null("photo_id"),
        &SqlValue::Text("photos/2.jpg".to_string())
    );
}

#[test]
fn wide_rows_stay_within_the_statement_cap() {
    // 11 fields doubles the batch, the cap brings it back to 5000
    assert_eq!(statement_batch_size(DEFAULT_BATCH_SIZE, profile_entity().fields.len()), 5000);
    // 7 fields stays at the configured batch
    assert_eq!(statement_batch_size(DEFAULT_BATCH_SIZE, order_entity().fields.len()), 5000);
}

#[tokio::test]
async fn orchestrator_copies_dependencies_first() {
    let user = EntityType {
        id: EntityTypeId::new("auth", "user"),
        table: "auth_user".to_string(),
        fields: vec![pk_field(), FieldSpec::plain("username")],
    };
    let order = EntityType {
        id: EntityTypeId::new("shop", "order"),
        table: "shop_order".to_string(),
        fields: vec![
            pk_field(),
            FieldSpec {
                name: "user_id".to_string(),
                references: Some(EntityTypeId::new("auth", "user")),
                primary_key: false,
                auto_generated: false,
                deferred: false,
            },
        ],
    };

    let source = MockStore::new();
    source.create_table("auth_user", &["id", "username"]);
    source.create_table("shop_order", &["id", "user_id"]);
    source.seed_rows(
        "auth_user",
        vec![Record::from_pairs([
            ("id", SqlValue::Int(1)),
            ("username", SqlValue::Text("ada".to_string())),
        ])],
    );
    source.seed_rows(
        "shop_order",
        vec![Record::from_pairs([
            ("id", SqlValue::Int(1)),
            ("user_id", SqlValue::Int(1)),
        ])],
    );
    let destination = MockStore::new();
    destination.create_table("auth_user", &["id", "username"]);
    destination.create_table("shop_order", &["id", "user_id"]);

    // declared orderitem-style dependency: order must come after user
    let planner = MigrationPlanner::new(vec![order, user], HashSet::new());
    let orchestrator = Orchestrator::new(planner, BatchCopier::new(DEFAULT_BATCH_SIZE));
    let summary = orchestrator.run(&source, &destination).await.unwrap();

    let names: Vec<&str> = summary.copied.iter().map(|(id, _)| id.name.as_str()).collect();
    assert_eq!(names, vec!["user", "order"]);
    assert_eq!(summary.total_records, 2);
}

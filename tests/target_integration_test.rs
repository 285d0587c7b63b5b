// ABOUTME: Integration tests for the PostgreSQL target writer
// ABOUTME: Requires TEST_TARGET_URL pointing at a scratch database; run with --ignored

use datalake_sync::control::SourceObjectDefinition;
use datalake_sync::datalake::Record;
use datalake_sync::sync::{ReconcileOutcome, Reconciler};
use datalake_sync::target::{PgTarget, TargetStore};
use serde_json::json;
use std::env;

/// Helper to get the test database URL from environment
fn get_test_url() -> Option<String> {
    env::var("TEST_TARGET_URL").ok()
}

async fn connect(url: &str) -> anyhow::Result<tokio_postgres::Client> {
    let (client, connection) = tokio_postgres::connect(url, tokio_postgres::NoTls).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            eprintln!("connection error: {}", e);
        }
    });
    Ok(client)
}

async fn setup_table(client: &tokio_postgres::Client, table: &str) -> anyhow::Result<()> {
    let ddl = format!(
        r#"
        DROP TABLE IF EXISTS "public"."{table}";
        CREATE TABLE "public"."{table}" (
            "F_externalId" TEXT NOT NULL,
            "F_line" INTEGER NOT NULL,
            "F_name" TEXT,
            "F_amount" NUMERIC(12, 2),
            "F_active" BOOLEAN,
            "F_createdAt" TIMESTAMPTZ,
            "F_payload" JSONB
        )
        "#
    );
    client.batch_execute(&ddl).await?;
    Ok(())
}

async fn cleanup_table(client: &tokio_postgres::Client, table: &str) {
    let ddl = format!(r#"DROP TABLE IF EXISTS "public"."{}" CASCADE"#, table);
    let _ = client.batch_execute(&ddl).await;
}

fn definition(table: &str) -> SourceObjectDefinition {
    SourceObjectDefinition::from_lists(
        1,
        table,
        "F_",
        "externalId,line",
        "externalId,line,name,amount,active,createdAt,payload,deleted",
    )
    .unwrap()
}

fn record(value: serde_json::Value) -> Record {
    Record::from_value(value).unwrap()
}

#[tokio::test]
#[ignore]
async fn test_reconcile_lifecycle_against_postgres() {
    let url = get_test_url().expect("TEST_TARGET_URL must be set");
    let table = "datalake_sync_lifecycle";
    let setup_client = connect(&url).await.unwrap();
    setup_table(&setup_client, table).await.unwrap();

    let target = PgTarget::new(connect(&url).await.unwrap(), "public");
    let reconciler = Reconciler::new(&target);
    let def = definition(table);

    let inserted = reconciler
        .reconcile(
            &def,
            &record(json!({
                "externalId": "X1",
                "line": "1",
                "name": "Foo",
                "amount": "12.50",
                "active": "true",
                "createdAt": "2024-01-02T03:04:05.000Z",
                "payload": {"tags": ["a", "b"]},
                "timestamp": "2024-01-02T03:04:05.000Z"
            })),
        )
        .await
        .unwrap();
    assert_eq!(inserted, ReconcileOutcome::Inserted);

    let updated = reconciler
        .reconcile(
            &def,
            &record(json!({"externalId": "X1", "line": 1, "name": "Bar", "amount": 7})),
        )
        .await
        .unwrap();
    assert_eq!(updated, ReconcileOutcome::Updated);

    let row = setup_client
        .query_one(
            &format!(
                r#"SELECT "F_name", "F_amount"::text, "F_active" FROM "public"."{}""#,
                table
            ),
            &[],
        )
        .await
        .unwrap();
    let name: String = row.get(0);
    let amount: String = row.get(1);
    let active: bool = row.get(2);
    assert_eq!(name, "Bar");
    assert_eq!(amount, "7.00");
    assert!(active);

    let deleted = reconciler
        .reconcile(
            &def,
            &record(json!({"externalId": "X1", "line": 1, "deleted": true})),
        )
        .await
        .unwrap();
    assert_eq!(deleted, ReconcileOutcome::Deleted);

    let count = target
        .count_matching(table, &[("F_externalId".to_string(), json!("X1"))])
        .await
        .unwrap();
    assert_eq!(count, 0);

    cleanup_table(&setup_client, table).await;
}

#[tokio::test]
#[ignore]
async fn test_unconvertible_value_is_record_level_error() {
    let url = get_test_url().expect("TEST_TARGET_URL must be set");
    let table = "datalake_sync_bad_value";
    let setup_client = connect(&url).await.unwrap();
    setup_table(&setup_client, table).await.unwrap();

    let target = PgTarget::new(connect(&url).await.unwrap(), "public");
    let reconciler = Reconciler::new(&target);

    let err = reconciler
        .reconcile(
            &definition(table),
            &record(json!({"externalId": "X1", "line": "not a number"})),
        )
        .await
        .unwrap_err();
    assert!(err.is_record_level());

    cleanup_table(&setup_client, table).await;
}

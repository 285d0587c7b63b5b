// ABOUTME: Reconciler behavior against an in-memory target table
// ABOUTME: Covers insert/update/delete decisions, key safety and protected fields

mod common;

use common::{customer_definition, record, row, MemoryTarget};
use datalake_sync::control::SourceObjectDefinition;
use datalake_sync::sync::{ReconcileOutcome, Reconciler};
use datalake_sync::SyncError;
use serde_json::json;

#[tokio::test]
async fn test_insert_update_delete_lifecycle() {
    let target = MemoryTarget::new();
    let reconciler = Reconciler::new(&target);
    let definition = customer_definition();

    // Empty target: insert
    let outcome = reconciler
        .reconcile(&definition, &record(json!({"externalId": "X1", "name": "Foo"})))
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Inserted);
    assert_eq!(
        target.rows("Customer"),
        vec![row(&[("F_externalId", json!("X1")), ("F_name", json!("Foo"))])]
    );

    // Existing row: update non-key columns only
    let outcome = reconciler
        .reconcile(&definition, &record(json!({"externalId": "X1", "name": "Bar"})))
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Updated);
    assert_eq!(
        target.rows("Customer"),
        vec![row(&[("F_externalId", json!("X1")), ("F_name", json!("Bar"))])]
    );

    // Deleted flag on an existing row: delete
    let outcome = reconciler
        .reconcile(&definition, &record(json!({"externalId": "X1", "deleted": true})))
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Deleted);
    assert!(target.rows("Customer").is_empty());

    assert_eq!(
        target.statements(),
        vec![
            "COUNT Customer",
            "INSERT Customer",
            "COUNT Customer",
            "UPDATE Customer",
            "COUNT Customer",
            "DELETE Customer",
        ]
    );
}

#[tokio::test]
async fn test_same_record_twice_inserts_then_updates() {
    let target = MemoryTarget::new();
    let reconciler = Reconciler::new(&target);
    let definition = customer_definition();
    let rec = record(json!({"externalId": "X9", "name": "Same"}));

    let first = reconciler.reconcile(&definition, &rec).await.unwrap();
    let second = reconciler.reconcile(&definition, &rec).await.unwrap();

    assert_eq!(first, ReconcileOutcome::Inserted);
    assert_eq!(second, ReconcileOutcome::Updated);
    assert_eq!(target.rows("Customer").len(), 1);
}

#[tokio::test]
async fn test_record_without_key_is_skipped_even_when_deleted() {
    let target = MemoryTarget::new();
    let reconciler = Reconciler::new(&target);
    let definition = customer_definition();

    for value in [
        json!({"name": "No key"}),
        json!({"name": "No key", "deleted": true}),
        json!({"externalId": null, "name": "Null key"}),
    ] {
        let outcome = reconciler.reconcile(&definition, &record(value)).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Skipped);
    }

    // No statement at all: existence was never tested
    assert!(target.statements().is_empty());
    assert!(target.rows("Customer").is_empty());
}

#[tokio::test]
async fn test_delete_of_absent_row_is_noop() {
    let target = MemoryTarget::new();
    target.insert_fixture("Customer", row(&[("F_externalId", json!("OTHER"))]));
    let reconciler = Reconciler::new(&target);

    let outcome = reconciler
        .reconcile(
            &customer_definition(),
            &record(json!({"externalId": "X1", "deleted": "TRUE"})),
        )
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::Skipped);
    assert_eq!(target.statements(), vec!["COUNT Customer"]);
    assert_eq!(target.rows("Customer").len(), 1);
}

#[tokio::test]
async fn test_insert_excludes_protected_fields() {
    let target = MemoryTarget::new();
    let reconciler = Reconciler::new(&target);
    let definition = SourceObjectDefinition::from_lists(
        2,
        "Invoice",
        "",
        "number",
        "number,amount,accountingEntity,variationNumber,timestamp,deleted",
    )
    .unwrap();

    let outcome = reconciler
        .reconcile(
            &definition,
            &record(json!({
                "number": "INV-1",
                "amount": 12.5,
                "accountingEntity": "AE1",
                "variationNumber": 4,
                "timestamp": "2024-01-02T03:04:05.000Z",
                "deleted": false
            })),
        )
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::Inserted);
    assert_eq!(
        target.rows("Invoice"),
        vec![row(&[("amount", json!(12.5)), ("number", json!("INV-1"))])]
    );
}

#[tokio::test]
async fn test_composite_key_uses_present_columns() {
    let target = MemoryTarget::new();
    target.insert_fixture(
        "OrderLine",
        row(&[
            ("order", json!("O1")),
            ("line", json!(1)),
            ("qty", json!(1)),
        ]),
    );
    let reconciler = Reconciler::new(&target);
    let definition =
        SourceObjectDefinition::from_lists(3, "OrderLine", "", "order,line", "order,line,qty")
            .unwrap();

    let outcome = reconciler
        .reconcile(
            &definition,
            &record(json!({"order": "O1", "line": 1, "qty": 7})),
        )
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::Updated);
    assert_eq!(target.rows("OrderLine")[0].get("qty"), Some(&json!(7)));
}

#[tokio::test]
async fn test_update_with_only_key_columns_reports_updated() {
    let target = MemoryTarget::new();
    target.insert_fixture("Customer", row(&[("F_externalId", json!("X1"))]));
    let reconciler = Reconciler::new(&target);

    let outcome = reconciler
        .reconcile(&customer_definition(), &record(json!({"externalId": "X1"})))
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::Updated);
    assert_eq!(target.statements(), vec!["COUNT Customer"]);
}

#[tokio::test]
async fn test_write_failure_is_record_level() {
    let target = MemoryTarget::new();
    target.fail_writes_for("BAD");
    let reconciler = Reconciler::new(&target);

    let err = reconciler
        .reconcile(
            &customer_definition(),
            &record(json!({"externalId": "BAD", "name": "x"})),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::TargetWrite { .. }));
    assert!(err.is_record_level());
}

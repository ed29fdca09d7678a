mod common;

use assert_matches::assert_matches;
use common::{day, issue_request, key, TestStock, MYOB, PART};
use factory_stock_api::{
    errors::ServiceError,
    events::Event,
    services::TransactionPatch,
    stock::PartKey,
};

#[tokio::test]
async fn issue_draws_oldest_lot_first_and_updates_counters() {
    let harness = TestStock::new().await;
    let july = harness.receive(150, day(2024, 7, 15)).await;
    let august = harness.receive(200, day(2024, 8, 10)).await;

    let issued = harness.issue(180, day(2024, 8, 20)).await.unwrap();

    let draws: Vec<(i64, _)> = issued
        .iter()
        .map(|tx| {
            let draw = tx.as_issuance().unwrap();
            (draw.quantity, draw.lot_received_date)
        })
        .collect();
    assert_eq!(
        draws,
        vec![
            (150, Some(day(2024, 7, 15))),
            (30, Some(day(2024, 8, 10))),
        ]
    );

    assert_eq!(harness.drawn(&july).await, 150);
    assert_eq!(harness.drawn(&august).await, 30);

    let balance = harness.service.get_balance(&key()).await.unwrap();
    assert_eq!(balance.total_received, 350);
    assert_eq!(balance.total_issued, 180);
    assert_eq!(balance.balance, 170);
    assert!(harness.service.verify(&key()).await.unwrap().is_consistent());
}

#[tokio::test]
async fn issuance_records_inherit_lot_details() {
    let harness = TestStock::new().await;
    harness.receive(10, day(2024, 1, 1)).await;

    let issued = harness.issue(4, day(2024, 1, 5)).await.unwrap();
    assert_eq!(issued.len(), 1);

    let record = &issued[0];
    assert_eq!(record.part.part_name.as_deref(), Some("Clutch housing"));
    assert_eq!(record.part.model.as_deref(), Some("KTJ"));
    let draw = record.as_issuance().unwrap();
    assert_eq!(draw.supplier.as_deref(), Some("Kyoto Metal"));
    assert_eq!(draw.po_number.as_deref(), Some("PO-2024-118"));
    assert_eq!(draw.invoice_number.as_deref(), Some("INV-5521"));
    assert_eq!(draw.issue_date, day(2024, 1, 5));
}

#[tokio::test]
async fn supplier_override_replaces_lot_supplier() {
    let harness = TestStock::new().await;
    harness.receive(10, day(2024, 1, 1)).await;

    let mut request = issue_request(MYOB, PART, 2, day(2024, 1, 2));
    request.supplier = Some("Osaka Tooling".to_string());
    let issued = harness.service.issue(request).await.unwrap();

    assert_eq!(
        issued[0].as_issuance().unwrap().supplier.as_deref(),
        Some("Osaka Tooling")
    );
}

#[tokio::test]
async fn fifo_skips_newest_lot_when_not_needed() {
    let harness = TestStock::new().await;
    // received out of date order on purpose
    let third = harness.receive(10, day(2024, 3, 1)).await;
    let first = harness.receive(10, day(2024, 1, 1)).await;
    let second = harness.receive(10, day(2024, 2, 1)).await;

    harness.issue(15, day(2024, 3, 5)).await.unwrap();

    assert_eq!(harness.drawn(&first).await, 10);
    assert_eq!(harness.drawn(&second).await, 5);
    assert_eq!(harness.drawn(&third).await, 0);
}

#[tokio::test]
async fn insufficient_stock_commits_nothing() {
    let harness = TestStock::new().await;
    let lot = harness.receive(10, day(2024, 1, 1)).await;
    harness.receive(5, day(2024, 1, 2)).await;
    let before = harness.record_count().await;

    let result = harness.issue(16, day(2024, 1, 3)).await;
    assert_matches!(result, Err(ServiceError::InsufficientStock(_)));

    assert_eq!(harness.record_count().await, before);
    assert_eq!(harness.drawn(&lot).await, 0);
    assert_eq!(harness.service.get_balance(&key()).await.unwrap().balance, 15);
}

#[tokio::test]
async fn issuing_against_unknown_part_is_insufficient() {
    let harness = TestStock::new().await;
    assert_matches!(
        harness.issue(1, day(2024, 1, 1)).await,
        Err(ServiceError::InsufficientStock(_))
    );
}

#[tokio::test]
async fn zero_or_negative_quantities_fail_validation() {
    let harness = TestStock::new().await;
    harness.receive(10, day(2024, 1, 1)).await;

    assert_matches!(
        harness.issue(0, day(2024, 1, 2)).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        harness.service.check_issue(&key(), -3).await,
        Err(ServiceError::ValidationError(_))
    );
}

#[tokio::test]
async fn oversized_quantities_fail_validation() {
    let harness = TestStock::new().await;
    let lot = harness.receive(1_000_000_000, day(2024, 1, 1)).await;

    assert_matches!(
        harness
            .service
            .receive(common::receive_request(MYOB, PART, i64::MAX, day(2024, 1, 2)))
            .await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        harness.issue(1_000_000_001, day(2024, 1, 3)).await,
        Err(ServiceError::ValidationError(_))
    );
    let grow = TransactionPatch {
        quantity: Some(i64::MAX),
        ..Default::default()
    };
    assert_matches!(
        harness.service.update_transaction(lot.id, grow).await,
        Err(ServiceError::ValidationError(_))
    );

    let balance = harness.service.get_balance(&key()).await.unwrap();
    assert_eq!(balance.total_received, 1_000_000_000);
    assert_eq!(harness.record_count().await, 1);
}

#[tokio::test]
async fn check_issue_guards_against_the_balance() {
    let harness = TestStock::new().await;
    harness.receive(10, day(2024, 1, 1)).await;

    let summary = harness.service.check_issue(&key(), 10).await.unwrap();
    assert_eq!(summary.balance, 10);
    assert_matches!(
        harness.service.check_issue(&key(), 11).await,
        Err(ServiceError::ValidationError(_))
    );
}

#[tokio::test]
async fn identifier_spellings_share_one_stock_pool() {
    let harness = TestStock::new().await;
    harness
        .receive_part(MYOB, "41201 KTJ EM00", 6, day(2024, 1, 1))
        .await;
    harness
        .receive_part("hr050057", "41201-ktj-em00", 4, day(2024, 1, 2))
        .await;

    let issued = harness
        .service
        .issue(issue_request(MYOB, PART, 8, day(2024, 1, 3)))
        .await
        .unwrap();
    assert_eq!(issued.len(), 2);

    let balance = harness
        .service
        .get_balance(&PartKey::new("HR050057", "41201–KTJ–EM00"))
        .await
        .unwrap();
    assert_eq!(balance.balance, 2);
}

#[tokio::test]
async fn blank_identifiers_are_rejected() {
    let harness = TestStock::new().await;
    let result = harness
        .service
        .receive(common::receive_request(MYOB, "  - ", 5, day(2024, 1, 1)))
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn concurrent_issues_never_overdraw() {
    let harness = TestStock::new().await;
    harness.receive(10, day(2024, 1, 1)).await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let service = harness.service.clone();
        tasks.push(tokio::spawn(async move {
            service
                .issue(issue_request(MYOB, PART, 3, day(2024, 1, 2)))
                .await
                .is_ok()
        }));
    }

    let mut succeeded = 0;
    for task in tasks {
        if task.await.unwrap() {
            succeeded += 1;
        }
    }

    assert_eq!(succeeded, 3);
    let balance = harness.service.get_balance(&key()).await.unwrap();
    assert_eq!(balance.balance, 1);
    assert!(harness.service.verify(&key()).await.unwrap().is_consistent());
}

#[tokio::test]
async fn receipt_edit_cannot_shrink_below_draws() {
    let harness = TestStock::new().await;
    let lot = harness.receive(10, day(2024, 1, 1)).await;
    harness.issue(6, day(2024, 1, 2)).await.unwrap();

    let shrink = TransactionPatch {
        quantity: Some(5),
        ..Default::default()
    };
    assert_matches!(
        harness.service.update_transaction(lot.id, shrink).await,
        Err(ServiceError::InvalidOperation(_))
    );

    let grow = TransactionPatch {
        quantity: Some(12),
        remarks: Some("recount".to_string()),
        ..Default::default()
    };
    let updated = harness.service.update_transaction(lot.id, grow).await.unwrap();
    assert_eq!(updated.as_receipt().unwrap().quantity, 12);
    assert_eq!(updated.remarks.as_deref(), Some("recount"));
    assert_eq!(harness.service.get_balance(&key()).await.unwrap().balance, 6);
}

#[tokio::test]
async fn events_follow_committed_writes() {
    let (harness, mut rx) = TestStock::with_events().await;
    let lot = harness.receive(5, day(2024, 1, 1)).await;
    let issued = harness.issue(2, day(2024, 1, 2)).await.unwrap();
    let _ = harness.issue(50, day(2024, 1, 3)).await;

    assert_matches!(
        rx.recv().await,
        Some(Event::StockReceived { transaction_id, quantity: 5, .. }) if transaction_id == lot.id
    );
    assert_matches!(
        rx.recv().await,
        Some(Event::StockIssued { quantity: 2, lots_drawn: 1, issuance_ids, .. })
            if issuance_ids == vec![issued[0].id]
    );
    // the rejected issue published nothing
    assert!(rx.try_recv().is_err());
}

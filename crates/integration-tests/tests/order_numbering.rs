//! Order number allocation across the fulfillment flow.

use chrono::Utc;

use wandersim_integration_tests::{Harness, payment_event};
use wandersim_server::services::fulfillment::FulfillmentOutcome;

#[tokio::test]
async fn order_numbers_increment_within_a_day() {
    let h = Harness::new();

    for session in ["cs_a", "cs_b", "cs_c"] {
        h.service
            .handle_payment_completed(payment_event(session))
            .await
            .expect("fulfillment should succeed");
    }

    let day = Utc::now().date_naive().format("%Y%m%d").to_string();
    let numbers: Vec<String> = h
        .store
        .orders()
        .iter()
        .map(|o| o.order_number.to_string())
        .collect();

    assert_eq!(
        numbers,
        vec![
            format!("WS-{day}-001"),
            format!("WS-{day}-002"),
            format!("WS-{day}-003"),
        ]
    );
}

#[tokio::test]
async fn replays_do_not_consume_sequence_numbers() {
    let h = Harness::new();

    h.service
        .handle_payment_completed(payment_event("cs_one"))
        .await
        .expect("fulfillment should succeed");
    h.service
        .handle_payment_completed(payment_event("cs_one"))
        .await
        .expect("replay should be acknowledged");
    h.service
        .handle_payment_completed(payment_event("cs_two"))
        .await
        .expect("fulfillment should succeed");

    let day = Utc::now().date_naive().format("%Y%m%d").to_string();
    let order_two = h.order("cs_two");
    assert_eq!(order_two.order_number.to_string(), format!("WS-{day}-002"));
}

#[tokio::test]
async fn lost_allocation_race_re_allocates_a_fresh_number() {
    let h = Harness::new();

    h.service
        .handle_payment_completed(payment_event("cs_first"))
        .await
        .expect("fulfillment should succeed");

    // The next allocation hands back the already-taken 001; the insert
    // collides and the orchestrator allocates again.
    h.store.return_stale_allocations(1);
    let outcome = h
        .service
        .handle_payment_completed(payment_event("cs_second"))
        .await
        .expect("collision should be recovered by re-allocation");

    let day = Utc::now().date_naive().format("%Y%m%d").to_string();
    match outcome {
        FulfillmentOutcome::Processed { order_number, .. } => {
            assert_eq!(order_number.to_string(), format!("WS-{day}-002"));
        }
        other => panic!("expected Processed, got {other:?}"),
    }
    assert_eq!(h.store.orders().len(), 2);
}

#[tokio::test]
async fn repeated_allocation_collision_is_named_as_such() {
    let h = Harness::new();

    h.service
        .handle_payment_completed(payment_event("cs_first"))
        .await
        .expect("fulfillment should succeed");

    // Both the original allocation and the retry collide.
    h.store.return_stale_allocations(2);
    let err = h
        .service
        .handle_payment_completed(payment_event("cs_unlucky"))
        .await
        .expect_err("a second collision must propagate");

    assert!(
        err.to_string().contains("order number collision"),
        "error should name the numbering collision, got: {err}"
    );
}

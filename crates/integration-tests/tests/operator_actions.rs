//! Operator retry and resend semantics.
//!
//! Retry is for orders whose provisioning failed; resend is for re-delivering
//! an email whose QR code already exists. Both reject states where the action
//! would double-provision or send nothing useful.

use wandersim_core::FulfillmentState;
use wandersim_integration_tests::{Harness, ScriptedProvisioner, payment_event};
use wandersim_server::services::fulfillment::FulfillmentError;

/// Drive a session into the provision-failed state.
async fn failed_order(h: &Harness, session_id: &str) {
    h.provisioner.fail_next("provider down");
    h.service
        .handle_payment_completed(payment_event(session_id))
        .await
        .expect("webhook pass should complete");
    assert_eq!(
        h.order(session_id).fulfillment_state(),
        FulfillmentState::ProvisionFailed
    );
}

#[tokio::test]
async fn retry_provisions_and_sends_the_qr_email() {
    let h = Harness::new();
    failed_order(&h, "cs_retry").await;
    assert_eq!(h.mailer.sent_count(), 1, "degraded email already went out");

    let order_number = h
        .service
        .retry("cs_retry")
        .await
        .expect("retry should succeed");
    assert_eq!(order_number, h.order("cs_retry").order_number);

    let order = h.order("cs_retry");
    assert!(order.qr_code.is_some());
    assert_eq!(order.fulfillment_state(), FulfillmentState::Complete);

    let sent = h.mailer.sent();
    assert_eq!(sent.len(), 2);
    assert!(
        sent[1].1.activation_code.is_some(),
        "retry email carries the fresh QR code"
    );
}

#[tokio::test]
async fn retry_uses_bundle_learned_from_a_redelivery() {
    let h = Harness::new();

    // First delivery has no bundle metadata: the order is created and the
    // degraded email goes out, but nothing can be provisioned.
    let mut event = payment_event("cs_late_bundle");
    event.bundle_name = None;
    h.service
        .handle_payment_completed(event)
        .await
        .expect("webhook pass should complete");
    assert_eq!(h.provisioner.calls(), 0);
    assert!(h.order("cs_late_bundle").bundle_name.is_none());

    // The redelivery carries the bundle; provisioning fails this time, but
    // the learned bundle must stick to the row.
    h.provisioner.fail_next("provider down");
    h.service
        .handle_payment_completed(payment_event("cs_late_bundle"))
        .await
        .expect("redelivery should be acknowledged");

    let order = h.order("cs_late_bundle");
    assert_eq!(order.bundle_name.as_deref(), Some("jp-7day-5gb"));
    assert_eq!(order.fulfillment_state(), FulfillmentState::ProvisionFailed);

    h.service
        .retry("cs_late_bundle")
        .await
        .expect("retry should provision with the learned bundle");
    assert_eq!(
        h.order("cs_late_bundle").fulfillment_state(),
        FulfillmentState::Complete
    );
}

#[tokio::test]
async fn retry_rejects_unknown_sessions() {
    let h = Harness::new();

    let err = h
        .service
        .retry("cs_missing")
        .await
        .expect_err("unknown session must be rejected");
    assert!(matches!(err, FulfillmentError::OrderNotFound(_)));
}

#[tokio::test]
async fn retry_rejects_already_provisioned_orders() {
    let h = Harness::new();
    h.service
        .handle_payment_completed(payment_event("cs_done"))
        .await
        .expect("webhook pass should complete");

    let err = h
        .service
        .retry("cs_done")
        .await
        .expect_err("provisioned order must be rejected");
    assert!(matches!(err, FulfillmentError::AlreadyProvisioned(_)));

    assert_eq!(h.provisioner.calls(), 1, "no second provisioning call");
}

#[tokio::test]
async fn retry_rejects_orders_without_a_bundle() {
    let h = Harness::new();

    let mut event = payment_event("cs_bundleless");
    event.bundle_name = None;
    h.service
        .handle_payment_completed(event)
        .await
        .expect("webhook pass should complete");

    let err = h
        .service
        .retry("cs_bundleless")
        .await
        .expect_err("nothing to provision");
    assert!(matches!(err, FulfillmentError::NoBundle(_)));
}

#[tokio::test]
async fn retry_surfaces_a_repeated_provider_failure() {
    let h = Harness::new();
    failed_order(&h, "cs_still_down").await;

    h.provisioner.fail_next("provider still down");
    let err = h
        .service
        .retry("cs_still_down")
        .await
        .expect_err("provider failure must surface to the operator");
    assert!(matches!(err, FulfillmentError::Provisioning(_)));

    let order = h.order("cs_still_down");
    assert!(order.qr_code.is_none());
    assert_eq!(order.fulfillment_state(), FulfillmentState::ProvisionFailed);
}

#[tokio::test]
async fn resend_repeats_the_qr_email() {
    let h = Harness::new();
    h.service
        .handle_payment_completed(payment_event("cs_resend"))
        .await
        .expect("webhook pass should complete");

    let order_number = h
        .service
        .resend("cs_resend")
        .await
        .expect("resend should succeed");
    assert_eq!(order_number, h.order("cs_resend").order_number);

    let sent = h.mailer.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(
        sent[0].1.activation_code, sent[1].1.activation_code,
        "resend uses the stored payload"
    );
    assert_eq!(h.provisioner.calls(), 1, "resend never provisions");
}

#[tokio::test]
async fn resend_completes_an_order_whose_first_email_failed() {
    let h = Harness::new();
    h.mailer.fail_next(1);
    h.service
        .handle_payment_completed(payment_event("cs_email_retry"))
        .await
        .expect("webhook pass should complete");
    assert!(!h.order("cs_email_retry").confirmation_email_sent);

    h.service
        .resend("cs_email_retry")
        .await
        .expect("resend should succeed");

    let order = h.order("cs_email_retry");
    assert!(order.confirmation_email_sent);
    assert_eq!(order.fulfillment_state(), FulfillmentState::Complete);
    assert_eq!(h.mailer.sent_count(), 1);
}

#[tokio::test]
async fn resend_rejects_orders_without_a_qr_code() {
    let h = Harness::new();
    failed_order(&h, "cs_nothing").await;

    let err = h
        .service
        .resend("cs_nothing")
        .await
        .expect_err("no QR code to send");
    assert!(matches!(err, FulfillmentError::NothingToResend(_)));
}

#[tokio::test]
async fn resend_rejects_unknown_sessions() {
    let h = Harness::new();

    let err = h
        .service
        .resend("cs_missing")
        .await
        .expect_err("unknown session must be rejected");
    assert!(matches!(err, FulfillmentError::OrderNotFound(_)));
}

#[tokio::test]
async fn retry_failure_uses_a_fresh_provisioner_state() {
    // A retry that succeeds after an operator-visible failure.
    let provisioner = ScriptedProvisioner::new();
    provisioner.fail_next("provider down");
    provisioner.fail_next("provider still down");
    let h = Harness::with_provisioner(provisioner);

    h.service
        .handle_payment_completed(payment_event("cs_two_failures"))
        .await
        .expect("webhook pass should complete");

    h.service
        .retry("cs_two_failures")
        .await
        .expect_err("second failure surfaces");

    h.service
        .retry("cs_two_failures")
        .await
        .expect("third attempt succeeds");

    let order = h.order("cs_two_failures");
    assert!(order.qr_code.is_some());
    assert_eq!(order.fulfillment_state(), FulfillmentState::Complete);
    assert_eq!(h.provisioner.calls(), 3);
}

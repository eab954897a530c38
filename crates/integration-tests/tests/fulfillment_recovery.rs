//! Failure and resume behavior of the fulfillment flow.
//!
//! Each side effect must run at most once per order across any number of
//! deliveries, and a failed step must not block the other: a provisioning
//! failure still sends the degraded email, an email failure leaves the flag
//! unset so a later pass (or operator) can finish the job.

use wandersim_core::{EsimStatus, FulfillmentState};
use wandersim_integration_tests::{Harness, ScriptedProvisioner, payment_event};
use wandersim_server::services::fulfillment::FulfillmentOutcome;

#[tokio::test]
async fn provisioning_failure_still_sends_degraded_email() {
    let provisioner = ScriptedProvisioner::new();
    provisioner.fail_next("no stock");
    let h = Harness::with_provisioner(provisioner);

    let outcome = h
        .service
        .handle_payment_completed(payment_event("cs_fail"))
        .await
        .expect("pass should complete despite provider failure");

    assert!(matches!(
        outcome,
        FulfillmentOutcome::Processed {
            esim_provisioned: false,
            email_sent: true,
            ..
        }
    ));

    let order = h.order("cs_fail");
    assert!(order.qr_code.is_none());
    assert_eq!(order.esim_status, Some(EsimStatus::Failed));
    assert!(order.confirmation_email_sent);
    assert_eq!(order.fulfillment_state(), FulfillmentState::ProvisionFailed);

    let sent = h.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.activation_code.is_none());
}

#[tokio::test]
async fn redelivery_after_provider_failure_resumes_provisioning_only() {
    let provisioner = ScriptedProvisioner::new();
    provisioner.fail_next("transient outage");
    let h = Harness::with_provisioner(provisioner);

    h.service
        .handle_payment_completed(payment_event("cs_resume"))
        .await
        .expect("first delivery should complete");
    assert_eq!(h.mailer.sent_count(), 1);

    // Gateway redelivers; the provider has recovered.
    let outcome = h
        .service
        .handle_payment_completed(payment_event("cs_resume"))
        .await
        .expect("redelivery should complete");

    assert!(matches!(
        outcome,
        FulfillmentOutcome::Processed {
            esim_provisioned: true,
            email_sent: true,
            ..
        }
    ));

    let order = h.order("cs_resume");
    assert!(order.qr_code.is_some());
    assert_eq!(order.esim_status, Some(EsimStatus::Ordered));
    assert_eq!(order.fulfillment_state(), FulfillmentState::Complete);

    assert_eq!(h.provisioner.calls(), 2, "one failed, one successful");
    assert_eq!(h.mailer.sent_count(), 1, "email never repeats");
    assert_eq!(h.store.orders().len(), 1);
}

#[tokio::test]
async fn email_failure_leaves_flag_unset_for_a_later_pass() {
    let h = Harness::new();
    h.mailer.fail_next(1);

    let outcome = h
        .service
        .handle_payment_completed(payment_event("cs_email_fail"))
        .await
        .expect("pass should complete despite email failure");

    assert!(matches!(
        outcome,
        FulfillmentOutcome::Processed {
            esim_provisioned: true,
            email_sent: false,
            ..
        }
    ));

    let order = h.order("cs_email_fail");
    assert!(order.qr_code.is_some());
    assert!(!order.confirmation_email_sent);
    assert_eq!(order.fulfillment_state(), FulfillmentState::Provisioned);
    assert_eq!(h.mailer.sent_count(), 0);

    // Redelivery finishes the email step without touching provisioning.
    let outcome = h
        .service
        .handle_payment_completed(payment_event("cs_email_fail"))
        .await
        .expect("redelivery should complete");

    assert!(matches!(
        outcome,
        FulfillmentOutcome::Processed {
            esim_provisioned: true,
            email_sent: true,
            ..
        }
    ));

    assert_eq!(h.provisioner.calls(), 1, "QR code is immutable once set");
    assert_eq!(h.mailer.sent_count(), 1);

    let sent = h.mailer.sent();
    assert!(
        sent[0].1.activation_code.is_some(),
        "resumed email carries the stored QR code"
    );
    assert_eq!(
        h.order("cs_email_fail").fulfillment_state(),
        FulfillmentState::Complete
    );
}

#[tokio::test]
async fn concurrent_deliveries_fulfill_exactly_once() {
    let provisioner = ScriptedProvisioner::with_delay(std::time::Duration::from_millis(50));
    let h = Harness::with_provisioner(provisioner);

    let (first, second) = tokio::join!(
        h.service.handle_payment_completed(payment_event("cs_race")),
        h.service.handle_payment_completed(payment_event("cs_race")),
    );

    let outcomes = [
        first.expect("first delivery should complete"),
        second.expect("second delivery should complete"),
    ];

    let processed = outcomes
        .iter()
        .filter(|o| matches!(o, FulfillmentOutcome::Processed { .. }))
        .count();
    let duplicates = outcomes
        .iter()
        .filter(|o| matches!(o, FulfillmentOutcome::Duplicate { .. }))
        .count();
    assert_eq!(processed, 1, "exactly one delivery does the work");
    assert_eq!(duplicates, 1, "the other observes the finished order");

    assert_eq!(h.store.orders().len(), 1);
    assert_eq!(h.provisioner.calls(), 1);
    assert_eq!(h.mailer.sent_count(), 1);
}

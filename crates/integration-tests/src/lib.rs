//! In-process test harness for the fulfillment orchestrator.
//!
//! Provides in-memory doubles for the three orchestrator seams (order store,
//! provisioner, mailer) so the full webhook-to-email flow can be exercised
//! without Postgres, the inventory provider, or an SMTP relay. The doubles
//! honor the same contracts the production implementations do: conditional
//! provisioning writes, a one-shot email flag, and conflict on duplicate
//! payment sessions.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use wandersim_core::{
    ActivationCode, CustomerId, Email, EsimStatus, OrderId, OrderNumber, OrderStatus,
};
use wandersim_server::db::{OrderStore, RepositoryError};
use wandersim_server::models::{Customer, EsimProfile, NewOrder, Order};
use wandersim_server::services::email::{EmailError, Mailer, OrderConfirmation};
use wandersim_server::services::esim::{EsimError, Provisioner};
use wandersim_server::services::fulfillment::{FulfillmentService, PaymentCompleted};

// =============================================================================
// Harness
// =============================================================================

/// The orchestrator wired to in-memory doubles, with handles kept for
/// assertions.
pub struct Harness {
    pub store: Arc<MemoryOrderStore>,
    pub provisioner: Arc<ScriptedProvisioner>,
    pub mailer: Arc<RecordingMailer>,
    pub service: FulfillmentService,
}

impl Harness {
    /// Harness with default doubles and the `WS` order prefix.
    #[must_use]
    pub fn new() -> Self {
        Self::with_provisioner(ScriptedProvisioner::new())
    }

    /// Harness over a pre-configured provisioner.
    #[must_use]
    pub fn with_provisioner(provisioner: ScriptedProvisioner) -> Self {
        let store = Arc::new(MemoryOrderStore::new());
        let provisioner = Arc::new(provisioner);
        let mailer = Arc::new(RecordingMailer::new());
        let service = FulfillmentService::new(
            Arc::clone(&store) as Arc<dyn OrderStore>,
            Arc::clone(&provisioner) as Arc<dyn Provisioner>,
            Arc::clone(&mailer) as Arc<dyn Mailer>,
            "WS",
        );
        Self {
            store,
            provisioner,
            mailer,
            service,
        }
    }

    /// The single stored order for `session_id`.
    ///
    /// # Panics
    ///
    /// Panics if no order exists for the session.
    #[must_use]
    pub fn order(&self, session_id: &str) -> Order {
        self.store
            .orders()
            .into_iter()
            .find(|o| o.stripe_session_id == session_id)
            .expect("order should exist for session")
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Event Builder
// =============================================================================

/// A fully populated payment event for `session_id`, overridable per test.
#[must_use]
pub fn payment_event(session_id: &str) -> PaymentCompleted {
    PaymentCompleted {
        session_id: session_id.to_string(),
        payment_intent: Some(format!("pi_{session_id}")),
        amount: Decimal::new(1999, 2),
        currency: "USD".to_string(),
        customer_email: Some("traveler@example.com".to_string()),
        customer_name: Some("Avery Traveler".to_string()),
        customer_phone: None,
        destination_slug: Some("japan".to_string()),
        duration_days: Some(7),
        locale: Some("en".to_string()),
        bundle_name: Some("jp-7day-5gb".to_string()),
    }
}

// =============================================================================
// In-Memory Order Store
// =============================================================================

#[derive(Default)]
struct StoreInner {
    customers: Vec<Customer>,
    orders: Vec<Order>,
    destinations: HashMap<String, String>,
}

/// In-memory [`OrderStore`] honoring the production contracts.
#[derive(Default)]
pub struct MemoryOrderStore {
    inner: Mutex<StoreInner>,
    stale_allocations: AtomicUsize,
}

impl MemoryOrderStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` order-number allocations return the day's
    /// current maximum instead of the next free number, simulating a
    /// concurrent allocator reading the same maximum.
    pub fn return_stale_allocations(&self, count: usize) {
        self.stale_allocations.store(count, Ordering::SeqCst);
    }

    /// Seed a destination catalog entry.
    pub fn seed_destination(&self, slug: &str, display_name: &str) {
        self.lock()
            .destinations
            .insert(slug.to_string(), display_name.to_string());
    }

    /// Snapshot of all stored orders.
    #[must_use]
    pub fn orders(&self) -> Vec<Order> {
        self.lock().orders.clone()
    }

    /// Snapshot of all stored customers.
    #[must_use]
    pub fn customers(&self) -> Vec<Customer> {
        self.lock().customers.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn find_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        Ok(self
            .lock()
            .orders
            .iter()
            .find(|o| o.stripe_session_id == session_id)
            .cloned())
    }

    async fn upsert_customer(
        &self,
        email: &Email,
        name: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Customer, RepositoryError> {
        let mut inner = self.lock();
        let now = Utc::now();

        if let Some(customer) = inner.customers.iter_mut().find(|c| &c.email == email) {
            // New non-null values win, nulls keep the old.
            if let Some(name) = name {
                customer.name = Some(name.to_string());
            }
            if let Some(phone) = phone {
                customer.phone = Some(phone.to_string());
            }
            customer.updated_at = now;
            return Ok(customer.clone());
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let id = CustomerId::new(inner.customers.len() as i32 + 1);
        let customer = Customer {
            id,
            email: email.clone(),
            name: name.map(String::from),
            phone: phone.map(String::from),
            created_at: now,
            updated_at: now,
        };
        inner.customers.push(customer.clone());
        Ok(customer)
    }

    async fn find_customer(&self, id: CustomerId) -> Result<Option<Customer>, RepositoryError> {
        Ok(self.lock().customers.iter().find(|c| c.id == id).cloned())
    }

    async fn destination_name(&self, slug: &str) -> Result<Option<String>, RepositoryError> {
        Ok(self.lock().destinations.get(slug).cloned())
    }

    async fn next_order_number(
        &self,
        prefix: &str,
        date: NaiveDate,
    ) -> Result<OrderNumber, RepositoryError> {
        let inner = self.lock();
        let max = inner
            .orders
            .iter()
            .map(|o| &o.order_number)
            .filter(|n| n.prefix() == prefix && n.date() == Some(date))
            .map(OrderNumber::sequence)
            .max();

        if let Some(max) = max {
            let stale = self.stale_allocations.load(Ordering::SeqCst);
            if stale > 0 {
                self.stale_allocations.store(stale - 1, Ordering::SeqCst);
                return Ok(OrderNumber::new(prefix, date, max));
            }
        }

        Ok(OrderNumber::new(prefix, date, max.unwrap_or(0) + 1))
    }

    async fn create_order(&self, new_order: NewOrder) -> Result<Order, RepositoryError> {
        let mut inner = self.lock();

        if inner
            .orders
            .iter()
            .any(|o| o.stripe_session_id == new_order.stripe_session_id)
        {
            return Err(RepositoryError::Conflict(format!(
                "duplicate session {}",
                new_order.stripe_session_id
            )));
        }
        if inner
            .orders
            .iter()
            .any(|o| o.order_number == new_order.order_number)
        {
            return Err(RepositoryError::OrderNumberCollision(
                new_order.order_number.to_string(),
            ));
        }

        let now = Utc::now();
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let id = OrderId::new(inner.orders.len() as i32 + 1);
        let order = Order {
            id,
            order_number: new_order.order_number,
            customer_id: new_order.customer_id,
            destination_slug: new_order.destination_slug,
            destination_name: new_order.destination_name,
            duration_days: new_order.duration_days,
            bundle_name: new_order.bundle_name,
            amount: new_order.amount,
            currency: new_order.currency,
            status: OrderStatus::Paid,
            stripe_session_id: new_order.stripe_session_id,
            stripe_payment_intent: new_order.stripe_payment_intent,
            iccid: None,
            smdp_address: None,
            matching_id: None,
            qr_code: None,
            provisioned_at: None,
            esim_status: None,
            confirmation_email_sent: false,
            paid_at: Some(now),
            locale: new_order.locale,
            created_at: now,
        };
        inner.orders.push(order.clone());
        Ok(order)
    }

    async fn record_provisioning(
        &self,
        order_id: OrderId,
        profile: &EsimProfile,
        qr_code: &ActivationCode,
        provisioned_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut inner = self.lock();
        let order = inner
            .orders
            .iter_mut()
            .find(|o| o.id == order_id)
            .ok_or(RepositoryError::NotFound)?;

        if order.qr_code.is_some() {
            return Ok(false);
        }

        order.iccid = Some(profile.iccid.clone());
        order.smdp_address = Some(profile.smdp_address.clone());
        order.matching_id = Some(profile.matching_id.clone());
        order.qr_code = Some(qr_code.clone());
        order.provisioned_at = Some(provisioned_at);
        order.esim_status = Some(EsimStatus::Ordered);
        Ok(true)
    }

    async fn set_bundle_name(
        &self,
        order_id: OrderId,
        bundle_name: &str,
    ) -> Result<(), RepositoryError> {
        let mut inner = self.lock();
        let order = inner
            .orders
            .iter_mut()
            .find(|o| o.id == order_id)
            .ok_or(RepositoryError::NotFound)?;

        if order.bundle_name.is_none() {
            order.bundle_name = Some(bundle_name.to_string());
        }
        Ok(())
    }

    async fn mark_provisioning_failed(&self, order_id: OrderId) -> Result<(), RepositoryError> {
        let mut inner = self.lock();
        let order = inner
            .orders
            .iter_mut()
            .find(|o| o.id == order_id)
            .ok_or(RepositoryError::NotFound)?;

        if order.qr_code.is_none() {
            order.esim_status = Some(EsimStatus::Failed);
        }
        Ok(())
    }

    async fn mark_email_sent(&self, order_id: OrderId) -> Result<(), RepositoryError> {
        let mut inner = self.lock();
        let order = inner
            .orders
            .iter_mut()
            .find(|o| o.id == order_id)
            .ok_or(RepositoryError::NotFound)?;

        order.confirmation_email_sent = true;
        Ok(())
    }
}

// =============================================================================
// Scripted Provisioner
// =============================================================================

/// Provisioner double with a script of outcomes.
///
/// Each call consumes the next scripted outcome; with an empty script every
/// call succeeds with a profile derived from the order number. An optional
/// per-call delay widens race windows for concurrency tests.
#[derive(Default)]
pub struct ScriptedProvisioner {
    script: Mutex<VecDeque<Result<EsimProfile, String>>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedProvisioner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold each provisioning call for `delay` before answering.
    #[must_use]
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Queue a failure for the next call.
    pub fn fail_next(&self, message: &str) {
        self.lock().push_back(Err(message.to_string()));
    }

    /// Queue a specific profile for the next call.
    pub fn succeed_next(&self, profile: EsimProfile) {
        self.lock().push_back(Ok(profile));
    }

    /// Number of provisioning calls made so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<EsimProfile, String>>> {
        self.script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn default_profile(order_number: &OrderNumber) -> EsimProfile {
        EsimProfile {
            iccid: format!("8944{:015}", 42),
            smdp_address: "rsp.test.example".to_string(),
            matching_id: format!("STUB-{order_number}"),
        }
    }
}

#[async_trait]
impl Provisioner for ScriptedProvisioner {
    async fn provision(
        &self,
        _bundle_name: &str,
        order_number: &OrderNumber,
    ) -> Result<EsimProfile, EsimError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.lock().pop_front();
        match scripted {
            Some(Ok(profile)) => Ok(profile),
            Some(Err(message)) => Err(EsimError::Api {
                status: 502,
                message,
            }),
            None => Ok(Self::default_profile(order_number)),
        }
    }
}

// =============================================================================
// Recording Mailer
// =============================================================================

/// Mailer double that records every send and can fail on demand.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<(Email, OrderConfirmation)>>,
    fail_remaining: AtomicUsize,
}

impl RecordingMailer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` sends before recovering.
    pub fn fail_next(&self, count: usize) {
        self.fail_remaining.store(count, Ordering::SeqCst);
    }

    /// Every recorded (recipient, confirmation) pair, in send order.
    #[must_use]
    pub fn sent(&self) -> Vec<(Email, OrderConfirmation)> {
        self.lock().clone()
    }

    /// Number of successful sends.
    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(Email, OrderConfirmation)>> {
        self.sent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_confirmation(
        &self,
        to: &Email,
        confirmation: &OrderConfirmation,
    ) -> Result<(), EmailError> {
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(EmailError::InvalidAddress("scripted failure".to_string()));
        }

        self.lock().push((to.clone(), confirmation.clone()));
        Ok(())
    }
}

//! Postgres-backed order store and admin listing queries.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, QueryBuilder};

use wandersim_core::{
    ActivationCode, CustomerId, Email, EsimStatus, FulfillmentState, OrderId, OrderNumber,
    OrderStatus,
};

use super::{OrderStore, RepositoryError};
use crate::models::{Customer, EsimProfile, NewOrder, Order};

const ORDER_COLUMNS: &str = "id, order_number, customer_id, destination_slug, destination_name, \
     duration_days, bundle_name, amount, currency, status, stripe_session_id, \
     stripe_payment_intent, iccid, smdp_address, matching_id, qr_code, provisioned_at, \
     esim_status, confirmation_email_sent, paid_at, locale, created_at";

// =============================================================================
// Internal Row Types
// =============================================================================

/// Internal row type for `PostgreSQL` customer queries.
#[derive(Debug, sqlx::FromRow)]
struct CustomerRow {
    id: i32,
    email: String,
    name: Option<String>,
    phone: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CustomerRow> for Customer {
    type Error = RepositoryError;

    fn try_from(row: CustomerRow) -> Result<Self, Self::Error> {
        let email = Email::parse(&row.email).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid email in database: {e}"))
        })?;

        Ok(Self {
            id: CustomerId::new(row.id),
            email,
            name: row.name,
            phone: row.phone,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Internal row type for `PostgreSQL` order queries.
#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: i32,
    order_number: String,
    customer_id: i32,
    destination_slug: String,
    destination_name: String,
    duration_days: i32,
    bundle_name: Option<String>,
    amount: Decimal,
    currency: String,
    status: OrderStatus,
    stripe_session_id: String,
    stripe_payment_intent: Option<String>,
    iccid: Option<String>,
    smdp_address: Option<String>,
    matching_id: Option<String>,
    qr_code: Option<String>,
    provisioned_at: Option<DateTime<Utc>>,
    esim_status: Option<EsimStatus>,
    confirmation_email_sent: bool,
    paid_at: Option<DateTime<Utc>>,
    locale: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = RepositoryError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let order_number: OrderNumber = row.order_number.parse().map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid order number in database: {e}"))
        })?;

        Ok(Self {
            id: OrderId::new(row.id),
            order_number,
            customer_id: CustomerId::new(row.customer_id),
            destination_slug: row.destination_slug,
            destination_name: row.destination_name,
            duration_days: row.duration_days,
            bundle_name: row.bundle_name,
            amount: row.amount,
            currency: row.currency,
            status: row.status,
            stripe_session_id: row.stripe_session_id,
            stripe_payment_intent: row.stripe_payment_intent,
            iccid: row.iccid,
            smdp_address: row.smdp_address,
            matching_id: row.matching_id,
            qr_code: row.qr_code.map(ActivationCode::from_payload),
            provisioned_at: row.provisioned_at,
            esim_status: row.esim_status,
            confirmation_email_sent: row.confirmation_email_sent,
            paid_at: row.paid_at,
            locale: row.locale,
            created_at: row.created_at,
        })
    }
}

// =============================================================================
// Store
// =============================================================================

/// Postgres-backed [`OrderStore`].
#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    /// Create a new store over a connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn find_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE stripe_session_id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn upsert_customer(
        &self,
        email: &Email,
        name: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Customer, RepositoryError> {
        let row = sqlx::query_as::<_, CustomerRow>(
            r"
            INSERT INTO customer (email, name, phone)
            VALUES ($1, $2, $3)
            ON CONFLICT (email) DO UPDATE SET
                name = COALESCE(EXCLUDED.name, customer.name),
                phone = COALESCE(EXCLUDED.phone, customer.phone),
                updated_at = now()
            RETURNING id, email, name, phone, created_at, updated_at
            ",
        )
        .bind(email.as_str())
        .bind(name)
        .bind(phone)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn find_customer(&self, id: CustomerId) -> Result<Option<Customer>, RepositoryError> {
        let row = sqlx::query_as::<_, CustomerRow>(
            "SELECT id, email, name, phone, created_at, updated_at FROM customer WHERE id = $1",
        )
        .bind(id.as_i32())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn destination_name(&self, slug: &str) -> Result<Option<String>, RepositoryError> {
        let name = sqlx::query_scalar::<_, String>(
            "SELECT display_name FROM destination WHERE slug = $1",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        Ok(name)
    }

    async fn next_order_number(
        &self,
        prefix: &str,
        date: NaiveDate,
    ) -> Result<OrderNumber, RepositoryError> {
        let pattern = format!("{prefix}-{}-%", date.format("%Y%m%d"));

        // LENGTH first so a widened 4-digit suffix still sorts above 999.
        let latest = sqlx::query_scalar::<_, String>(
            r"
            SELECT order_number FROM orders
            WHERE order_number LIKE $1
            ORDER BY LENGTH(order_number) DESC, order_number DESC
            LIMIT 1
            ",
        )
        .bind(&pattern)
        .fetch_optional(&self.pool)
        .await?;

        let next = match latest {
            Some(raw) => {
                let current: OrderNumber = raw.parse().map_err(|e| {
                    RepositoryError::DataCorruption(format!(
                        "invalid order number in database: {e}"
                    ))
                })?;
                current.next()
            }
            None => OrderNumber::new(prefix, date, 1),
        };

        Ok(next)
    }

    async fn create_order(&self, new_order: NewOrder) -> Result<Order, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            r"
            INSERT INTO orders (
                order_number, customer_id, destination_slug, destination_name,
                duration_days, bundle_name, amount, currency, status,
                stripe_session_id, stripe_payment_intent, paid_at, locale
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'paid', $9, $10, now(), $11)
            RETURNING {ORDER_COLUMNS}
            "
        ))
        .bind(new_order.order_number.as_str())
        .bind(new_order.customer_id.as_i32())
        .bind(&new_order.destination_slug)
        .bind(&new_order.destination_name)
        .bind(new_order.duration_days)
        .bind(&new_order.bundle_name)
        .bind(new_order.amount)
        .bind(&new_order.currency)
        .bind(&new_order.stripe_session_id)
        .bind(&new_order.stripe_payment_intent)
        .bind(&new_order.locale)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                // Two distinct unique constraints can fire here: the session
                // id (duplicate delivery) and the order number (lost
                // allocation race). The caller recovers differently from each.
                if db_err.constraint() == Some("orders_order_number_key") {
                    return RepositoryError::OrderNumberCollision(
                        new_order.order_number.to_string(),
                    );
                }
                return RepositoryError::Conflict(
                    "order already exists for this payment session".to_owned(),
                );
            }
            RepositoryError::Database(e)
        })?;

        row.try_into()
    }

    async fn set_bundle_name(
        &self,
        order_id: OrderId,
        bundle_name: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE orders SET bundle_name = $2 WHERE id = $1 AND bundle_name IS NULL")
            .bind(order_id.as_i32())
            .bind(bundle_name)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn record_provisioning(
        &self,
        order_id: OrderId,
        profile: &EsimProfile,
        qr_code: &ActivationCode,
        provisioned_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE orders
            SET iccid = $2, smdp_address = $3, matching_id = $4, qr_code = $5,
                provisioned_at = $6, esim_status = 'ordered'
            WHERE id = $1 AND qr_code IS NULL
            ",
        )
        .bind(order_id.as_i32())
        .bind(&profile.iccid)
        .bind(&profile.smdp_address)
        .bind(&profile.matching_id)
        .bind(qr_code.as_str())
        .bind(provisioned_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_provisioning_failed(&self, order_id: OrderId) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE orders SET esim_status = 'failed' WHERE id = $1 AND qr_code IS NULL")
            .bind(order_id.as_i32())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn mark_email_sent(&self, order_id: OrderId) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            UPDATE orders
            SET confirmation_email_sent = TRUE
            WHERE id = $1 AND confirmation_email_sent = FALSE
            ",
        )
        .bind(order_id.as_i32())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// =============================================================================
// Admin Listing
// =============================================================================

/// Filters for the read-only admin order listing.
#[derive(Debug, Clone, Default)]
pub struct OrderListFilter {
    /// Matches order number, customer email, or destination name.
    pub search: Option<String>,
    /// Derived fulfillment state to filter on.
    pub state: Option<FulfillmentState>,
    pub page: u32,
    pub per_page: u32,
}

/// One page of admin listing results.
#[derive(Debug)]
pub struct OrderListPage {
    pub orders: Vec<(Order, Email)>,
    pub total: i64,
}

/// Run the paginated admin listing query.
///
/// Pure CRUD over the `orders` table; not part of the fulfillment contract.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if a query fails, or
/// `RepositoryError::DataCorruption` if a row fails conversion.
pub async fn list_orders(
    pool: &PgPool,
    filter: &OrderListFilter,
) -> Result<OrderListPage, RepositoryError> {
    let per_page = i64::from(filter.per_page.clamp(1, 100));
    let offset = i64::from(filter.page.saturating_sub(1)) * per_page;

    let mut query = QueryBuilder::new(
        "SELECT o.id, o.order_number, o.customer_id, o.destination_slug, o.destination_name, \
         o.duration_days, o.bundle_name, o.amount, o.currency, o.status, o.stripe_session_id, \
         o.stripe_payment_intent, o.iccid, o.smdp_address, o.matching_id, o.qr_code, \
         o.provisioned_at, o.esim_status, o.confirmation_email_sent, o.paid_at, o.locale, \
         o.created_at, c.email AS customer_email \
         FROM orders o JOIN customer c ON c.id = o.customer_id",
    );
    let mut count = QueryBuilder::new(
        "SELECT COUNT(*) FROM orders o JOIN customer c ON c.id = o.customer_id",
    );

    for builder in [&mut query, &mut count] {
        push_filters(builder, filter);
    }

    query
        .push(" ORDER BY o.created_at DESC LIMIT ")
        .push_bind(per_page)
        .push(" OFFSET ")
        .push_bind(offset);

    let rows: Vec<ListedOrderRow> = query.build_query_as().fetch_all(pool).await?;
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let orders = rows
        .into_iter()
        .map(|row| {
            let email = Email::parse(&row.customer_email).map_err(|e| {
                RepositoryError::DataCorruption(format!("invalid email in database: {e}"))
            })?;
            let order: Order = row.order.try_into()?;
            Ok((order, email))
        })
        .collect::<Result<Vec<_>, RepositoryError>>()?;

    Ok(OrderListPage { orders, total })
}

#[derive(sqlx::FromRow)]
struct ListedOrderRow {
    #[sqlx(flatten)]
    order: OrderRow,
    customer_email: String,
}

fn push_filters(builder: &mut QueryBuilder<'_, sqlx::Postgres>, filter: &OrderListFilter) {
    let mut first = true;
    let mut push_clause = |builder: &mut QueryBuilder<'_, sqlx::Postgres>| {
        builder.push(if first { " WHERE " } else { " AND " });
        first = false;
    };

    if let Some(search) = filter.search.as_deref().filter(|s| !s.is_empty()) {
        push_clause(builder);
        let pattern = format!("%{search}%");
        builder
            .push("(o.order_number ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR c.email ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR o.destination_name ILIKE ")
            .push_bind(pattern)
            .push(")");
    }

    match filter.state {
        Some(FulfillmentState::Complete) => {
            push_clause(builder);
            builder.push("o.qr_code IS NOT NULL AND o.confirmation_email_sent");
        }
        Some(FulfillmentState::ProvisionFailed) => {
            push_clause(builder);
            builder.push("o.qr_code IS NULL AND o.esim_status = 'failed'");
        }
        Some(FulfillmentState::New | FulfillmentState::Provisioned) | None => {
            if filter.state.is_some() {
                // Anything not complete and not failed counts as in flight.
                push_clause(builder);
                builder.push(
                    "NOT (o.qr_code IS NOT NULL AND o.confirmation_email_sent) \
                     AND NOT (o.qr_code IS NULL AND o.esim_status = 'failed')",
                );
            }
        }
    }
}

//! # Application State
//!
//! Shared state for the Axum application, passed to all route handlers
//! via the `State` extractor.
//!
//! ## Architecture
//!
//! In-memory stores are authoritative while the process runs. When a
//! database pool is configured, every mutation is written through to
//! Postgres after it has been applied in memory, and the stores are
//! hydrated from Postgres on startup.
//!
//! Money lives only in the [`Ledger`]. Order and funding-request handlers
//! call the ledger while holding the record's store lock, so the status
//! change and its money movement happen together. Lock order is always
//! store first, then ledger; the ledger never takes a store lock.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use linkex_core::Money;
use linkex_ledger::{FeeSchedule, HoldChange, Ledger, LedgerParts, Posting};
use linkex_state::{
    ExchangeStatus, OrderStatus, RequestKind, RequestStatus, SiteStatus, TicketStatus,
    TransitionRecord,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::{AuditLog, NewAuditEvent};
use crate::auth::Role;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::middleware::metrics::ApiMetrics;

// -- Generic In-Memory Store --------------------------------------------------

/// Thread-safe, cloneable in-memory key-value store.
///
/// The lock is `parking_lot` and never held across `.await` points.
#[derive(Debug)]
pub struct Store<T: Clone + Send + Sync> {
    data: Arc<RwLock<HashMap<Uuid, T>>>,
}

impl<T: Clone + Send + Sync> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }
}

impl<T: Clone + Send + Sync> Store<T> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert a record, returning the previous value if the key existed.
    pub fn insert(&self, id: Uuid, value: T) -> Option<T> {
        self.data.write().insert(id, value)
    }

    /// Retrieve a record by ID.
    pub fn get(&self, id: &Uuid) -> Option<T> {
        self.data.read().get(id).cloned()
    }

    /// List all records.
    pub fn list(&self) -> Vec<T> {
        self.data.read().values().cloned().collect()
    }

    /// Records matching `pred`.
    pub fn filter(&self, pred: impl Fn(&T) -> bool) -> Vec<T> {
        self.data
            .read()
            .values()
            .filter(|v| pred(v))
            .cloned()
            .collect()
    }

    /// Whether any record matches `pred`.
    pub fn any(&self, pred: impl Fn(&T) -> bool) -> bool {
        self.data.read().values().any(pred)
    }

    /// Count records matching `pred`.
    pub fn count(&self, pred: impl Fn(&T) -> bool) -> usize {
        self.data.read().values().filter(|v| pred(v)).count()
    }

    /// Update a record in place. Returns the updated record, or `None` if not found.
    pub fn update(&self, id: &Uuid, f: impl FnOnce(&mut T)) -> Option<T> {
        let mut guard = self.data.write();
        let entry = guard.get_mut(id)?;
        f(entry);
        Some(entry.clone())
    }

    /// Atomically read-validate-update a record.
    ///
    /// The closure runs under the store's write lock. Returns `None` if the
    /// record doesn't exist, or `Some(result)` with the closure's `Result`.
    pub fn try_update<R, E>(
        &self,
        id: &Uuid,
        f: impl FnOnce(&mut T) -> Result<R, E>,
    ) -> Option<Result<R, E>> {
        self.data.write().get_mut(id).map(f)
    }

    /// Apply `f` to every record matching `pred`; returns the changed records.
    pub fn update_where(&self, pred: impl Fn(&T) -> bool, f: impl Fn(&mut T)) -> Vec<T> {
        let mut guard = self.data.write();
        guard
            .values_mut()
            .filter(|v| pred(v))
            .map(|v| {
                f(v);
                v.clone()
            })
            .collect()
    }

    /// Remove a record by ID.
    pub fn remove(&self, id: &Uuid) -> Option<T> {
        self.data.write().remove(id)
    }

    /// Return the number of records.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Send + Sync> Default for Store<T> {
    fn default() -> Self {
        Self::new()
    }
}

// -- Sessions -----------------------------------------------------------------

/// A login session. Keyed by the SHA-256 of its bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub token_hash: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Session store keyed by token hash.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    data: Arc<RwLock<HashMap<String, SessionRecord>>>,
}

impl SessionStore {
    pub fn insert(&self, session: SessionRecord) {
        self.data.write().insert(session.token_hash.clone(), session);
    }

    pub fn get(&self, token_hash: &str) -> Option<SessionRecord> {
        self.data.read().get(token_hash).cloned()
    }

    pub fn remove(&self, token_hash: &str) -> Option<SessionRecord> {
        self.data.write().remove(token_hash)
    }

    /// Remove every session of `user_id` except `keep`. Returns the removed hashes.
    pub fn revoke_user(&self, user_id: Uuid, keep: Option<&str>) -> Vec<String> {
        let mut guard = self.data.write();
        let doomed: Vec<String> = guard
            .values()
            .filter(|s| s.user_id == user_id && Some(s.token_hash.as_str()) != keep)
            .map(|s| s.token_hash.clone())
            .collect();
        for hash in &doomed {
            guard.remove(hash);
        }
        doomed
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// -- Record Types -------------------------------------------------------------

/// A marketplace account.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserRecord {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub role: Role,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    /// ISO 3166-1 alpha-2 code.
    pub country: Option<String>,
    pub referral_code: String,
    /// User whose referral code was used at registration.
    pub referred_by: Option<Uuid>,
    pub banned: bool,
    pub ban_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
impl UserRecord {
    /// Minimal record for unit tests. The password hash never verifies.
    pub fn new_for_tests(username: &str, role: Role) -> Self {
        let id = Uuid::new_v4();
        let now = Utc::now();
        Self {
            id,
            username: username.to_string(),
            email: format!("{username}@example.com"),
            password_hash: String::new(),
            role,
            display_name: None,
            bio: None,
            country: None,
            referral_code: linkex_core::ReferralCode::for_user(&id).as_str().to_string(),
            referred_by: None,
            banned: false,
            ban_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A website registered by its owner.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SiteRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    /// Normalized hostname, unique across the marketplace.
    pub domain: String,
    pub title: String,
    pub category: String,
    pub language: String,
    /// 0–100.
    pub domain_authority: i32,
    pub monthly_traffic: i64,
    pub allows_exchange: bool,
    /// Moderation status (PENDING, APPROVED, REJECTED, SUSPENDED).
    #[schema(value_type = String)]
    pub status: SiteStatus,
    /// Reason given for the latest rejection or suspension.
    pub moderation_note: Option<String>,
    #[schema(value_type = Vec<Object>)]
    pub history: Vec<TransitionRecord<SiteStatus>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a listing sells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListingKind {
    /// A new article written for the buyer.
    GuestPost,
    /// A link added to an existing article.
    LinkInsertion,
}

impl ListingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GuestPost => "GUEST_POST",
            Self::LinkInsertion => "LINK_INSERTION",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "GUEST_POST" => Some(Self::GuestPost),
            "LINK_INSERTION" => Some(Self::LinkInsertion),
            _ => None,
        }
    }
}

/// `rel` attribute of the placed link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkType {
    Dofollow,
    Nofollow,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dofollow => "DOFOLLOW",
            Self::Nofollow => "NOFOLLOW",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "DOFOLLOW" => Some(Self::Dofollow),
            "NOFOLLOW" => Some(Self::Nofollow),
            _ => None,
        }
    }
}

/// A seller's offer on one of their sites.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ListingRecord {
    pub id: Uuid,
    pub site_id: Uuid,
    pub seller_id: Uuid,
    pub kind: ListingKind,
    pub title: String,
    pub description: String,
    /// Price in cents.
    #[schema(value_type = i64)]
    pub price: Money,
    pub turnaround_days: i32,
    pub link_type: LinkType,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A purchase of a listing.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderRecord {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub site_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    /// Listing price at the time of purchase, in cents.
    #[schema(value_type = i64)]
    pub price: Money,
    pub target_url: String,
    pub anchor_text: String,
    pub notes: Option<String>,
    /// URL of the published placement, set on delivery.
    pub live_url: Option<String>,
    pub revision_note: Option<String>,
    pub dispute_reason: Option<String>,
    #[schema(value_type = String)]
    pub status: OrderStatus,
    #[schema(value_type = Vec<Object>)]
    pub history: Vec<TransitionRecord<OrderStatus>>,
    /// Platform commission, set on completion.
    #[schema(value_type = Option<i64>)]
    pub fee: Option<Money>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderRecord {
    /// Whether `user_id` is the buyer or the seller.
    pub fn is_party(&self, user_id: Uuid) -> bool {
        self.buyer_id == user_id || self.seller_id == user_id
    }

    /// The other party.
    pub fn counterparty(&self, user_id: Uuid) -> Uuid {
        if user_id == self.buyer_id {
            self.seller_id
        } else {
            self.buyer_id
        }
    }
}

/// A reciprocal link arrangement between two sites.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExchangeRecord {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub requester_site_id: Uuid,
    pub target_id: Uuid,
    pub target_site_id: Uuid,
    pub message: Option<String>,
    /// Where the requester placed the target's link.
    pub requester_placement_url: Option<String>,
    /// Where the target placed the requester's link.
    pub target_placement_url: Option<String>,
    #[schema(value_type = String)]
    pub status: ExchangeStatus,
    #[schema(value_type = Vec<Object>)]
    pub history: Vec<TransitionRecord<ExchangeStatus>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExchangeRecord {
    pub fn is_party(&self, user_id: Uuid) -> bool {
        self.requester_id == user_id || self.target_id == user_id
    }

    pub fn counterparty(&self, user_id: Uuid) -> Uuid {
        if user_id == self.requester_id {
            self.target_id
        } else {
            self.requester_id
        }
    }

    /// Whether the exchange links the two sites, in either direction.
    pub fn connects(&self, a: Uuid, b: Uuid) -> bool {
        (self.requester_site_id == a && self.target_site_id == b)
            || (self.requester_site_id == b && self.target_site_id == a)
    }
}

/// A deposit or withdrawal awaiting admin approval.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FundingRequestRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    #[schema(value_type = String)]
    pub kind: RequestKind,
    #[schema(value_type = i64)]
    pub amount: Money,
    /// Payment method, e.g. "paypal" or "bank_transfer".
    pub method: String,
    /// External payment reference (deposits) or payout details (withdrawals).
    pub details: String,
    #[schema(value_type = String)]
    pub status: RequestStatus,
    /// Admin note on approval or rejection.
    pub note: Option<String>,
    /// Amount actually paid out, set when a withdrawal is approved.
    #[schema(value_type = Option<i64>)]
    pub net_payout: Option<Money>,
    pub decided_by: Option<Uuid>,
    pub decided_at: Option<DateTime<Utc>>,
    #[schema(value_type = Vec<Object>)]
    pub history: Vec<TransitionRecord<RequestStatus>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An in-app notification.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Dotted event name, e.g. `order.delivered`.
    pub kind: String,
    pub message: String,
    pub reference_id: Option<Uuid>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// One message in a support ticket thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TicketMessage {
    pub author_id: Option<Uuid>,
    /// Written by an employee or admin.
    pub staff: bool,
    pub body: String,
    pub at: DateTime<Utc>,
}

/// A support ticket.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TicketRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subject: String,
    pub order_id: Option<Uuid>,
    #[schema(value_type = String)]
    pub status: TicketStatus,
    pub messages: Vec<TicketMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// -- Application State --------------------------------------------------------

/// Shared application state accessible to all route handlers.
///
/// Clone-friendly via `Arc` internals.
#[derive(Debug, Clone)]
pub struct AppState {
    pub users: Store<UserRecord>,
    pub sessions: SessionStore,
    pub sites: Store<SiteRecord>,
    pub listings: Store<ListingRecord>,
    pub orders: Store<OrderRecord>,
    pub exchanges: Store<ExchangeRecord>,
    pub funding_requests: Store<FundingRequestRecord>,
    pub notifications: Store<NotificationRecord>,
    pub tickets: Store<TicketRecord>,

    /// Wallets, escrow, fees and referral payouts.
    pub ledger: Arc<Ledger>,
    /// Current fee schedule. Admins may replace it at runtime.
    pub fees: Arc<RwLock<FeeSchedule>>,

    pub audit: AuditLog,
    pub metrics: ApiMetrics,

    /// Serializes check-then-insert on unique keys (username, email,
    /// site domain, open exchange between two sites).
    pub catalog_lock: Arc<Mutex<()>>,
    /// Serializes ledger write-through so the database sees postings in order.
    pub ledger_writes: Arc<tokio::sync::Mutex<()>>,

    /// When `Some`, mutations are written through to Postgres.
    pub db_pool: Option<PgPool>,

    pub config: AppConfig,
}

impl AppState {
    /// In-memory state with the given configuration.
    pub fn with_config(config: AppConfig) -> Result<Self, prometheus::Error> {
        Self::with_pool(config, None)
    }

    /// State with an optional database pool.
    pub fn with_pool(config: AppConfig, db_pool: Option<PgPool>) -> Result<Self, prometheus::Error> {
        Ok(Self {
            users: Store::new(),
            sessions: SessionStore::default(),
            sites: Store::new(),
            listings: Store::new(),
            orders: Store::new(),
            exchanges: Store::new(),
            funding_requests: Store::new(),
            notifications: Store::new(),
            tickets: Store::new(),
            ledger: Arc::new(Ledger::new()),
            fees: Arc::new(RwLock::new(config.fees)),
            audit: AuditLog::new(),
            metrics: ApiMetrics::new()?,
            catalog_lock: Arc::new(Mutex::new(())),
            ledger_writes: Arc::new(tokio::sync::Mutex::new(())),
            db_pool,
            config,
        })
    }

    /// Snapshot of the current fee schedule.
    pub fn fee_schedule(&self) -> FeeSchedule {
        *self.fees.read()
    }

    /// Hydrate in-memory stores from the database.
    ///
    /// Called once on startup when a database pool is available.
    pub async fn hydrate_from_db(&self) -> Result<(), sqlx::Error> {
        let Some(pool) = &self.db_pool else {
            return Ok(());
        };

        let users = crate::db::users::load_all(pool).await?;
        let user_count = users.len();
        for record in users {
            self.users.insert(record.id, record);
        }

        let sessions = crate::db::sessions::load_active(pool, Utc::now()).await?;
        for session in sessions {
            self.sessions.insert(session);
        }

        let sites = crate::db::sites::load_all(pool).await?;
        let site_count = sites.len();
        for record in sites {
            self.sites.insert(record.id, record);
        }

        for record in crate::db::listings::load_all(pool).await? {
            self.listings.insert(record.id, record);
        }

        let orders = crate::db::orders::load_all(pool).await?;
        let order_count = orders.len();
        for record in orders {
            self.orders.insert(record.id, record);
        }

        for record in crate::db::exchanges::load_all(pool).await? {
            self.exchanges.insert(record.id, record);
        }
        for record in crate::db::funding::load_all(pool).await? {
            self.funding_requests.insert(record.id, record);
        }
        for record in crate::db::support::load_notifications(pool).await? {
            self.notifications.insert(record.id, record);
        }
        for record in crate::db::support::load_tickets(pool).await? {
            self.tickets.insert(record.id, record);
        }

        let parts: LedgerParts = crate::db::ledger::load_parts(pool).await?;
        let wallet_count = parts.wallets.len();
        self.ledger.restore(parts);

        if let Some(schedule) = crate::db::settings::load_fee_schedule(pool).await? {
            *self.fees.write() = schedule;
        }

        let events = crate::db::audit::load_all(pool).await?;
        let audit_count = events.len();
        self.audit.restore(events);

        let report = self.ledger.reconcile();
        if !report.balanced {
            tracing::error!(
                held = %report.held,
                expected = %report.expected,
                "ledger loaded from database does not reconcile"
            );
        }

        tracing::info!(
            users = user_count,
            sites = site_count,
            orders = order_count,
            wallets = wallet_count,
            audit_events = audit_count,
            "Hydrated in-memory stores from database"
        );

        Ok(())
    }

    // -- Write-through --------------------------------------------------------

    pub async fn persist_user(&self, record: &UserRecord) -> Result<(), AppError> {
        if let Some(pool) = &self.db_pool {
            crate::db::users::upsert(pool, record)
                .await
                .map_err(|e| persist_failed("user", e))?;
        }
        Ok(())
    }

    pub async fn persist_session(&self, session: &SessionRecord) -> Result<(), AppError> {
        if let Some(pool) = &self.db_pool {
            crate::db::sessions::insert(pool, session)
                .await
                .map_err(|e| persist_failed("session", e))?;
        }
        Ok(())
    }

    pub async fn forget_sessions(&self, token_hashes: &[String]) -> Result<(), AppError> {
        if let Some(pool) = &self.db_pool {
            crate::db::sessions::delete_many(pool, token_hashes)
                .await
                .map_err(|e| persist_failed("session revocation", e))?;
        }
        Ok(())
    }

    pub async fn persist_site(&self, record: &SiteRecord) -> Result<(), AppError> {
        if let Some(pool) = &self.db_pool {
            crate::db::sites::upsert(pool, record)
                .await
                .map_err(|e| persist_failed("site", e))?;
        }
        Ok(())
    }

    pub async fn forget_site(&self, id: Uuid) -> Result<(), AppError> {
        if let Some(pool) = &self.db_pool {
            crate::db::sites::delete(pool, id)
                .await
                .map_err(|e| persist_failed("site deletion", e))?;
        }
        Ok(())
    }

    pub async fn persist_listing(&self, record: &ListingRecord) -> Result<(), AppError> {
        if let Some(pool) = &self.db_pool {
            crate::db::listings::upsert(pool, record)
                .await
                .map_err(|e| persist_failed("listing", e))?;
        }
        Ok(())
    }

    pub async fn persist_order(&self, record: &OrderRecord) -> Result<(), AppError> {
        if let Some(pool) = &self.db_pool {
            crate::db::orders::upsert(pool, record)
                .await
                .map_err(|e| persist_failed("order", e))?;
        }
        Ok(())
    }

    pub async fn persist_exchange(&self, record: &ExchangeRecord) -> Result<(), AppError> {
        if let Some(pool) = &self.db_pool {
            crate::db::exchanges::upsert(pool, record)
                .await
                .map_err(|e| persist_failed("exchange", e))?;
        }
        Ok(())
    }

    pub async fn persist_funding_request(
        &self,
        record: &FundingRequestRecord,
    ) -> Result<(), AppError> {
        if let Some(pool) = &self.db_pool {
            crate::db::funding::upsert(pool, record)
                .await
                .map_err(|e| persist_failed("funding request", e))?;
        }
        Ok(())
    }

    pub async fn persist_ticket(&self, record: &TicketRecord) -> Result<(), AppError> {
        if let Some(pool) = &self.db_pool {
            crate::db::support::upsert_ticket(pool, record)
                .await
                .map_err(|e| persist_failed("ticket", e))?;
        }
        Ok(())
    }

    pub async fn persist_notifications(
        &self,
        records: &[NotificationRecord],
    ) -> Result<(), AppError> {
        if let Some(pool) = &self.db_pool {
            for record in records {
                crate::db::support::upsert_notification(pool, record)
                    .await
                    .map_err(|e| persist_failed("notification", e))?;
            }
        }
        Ok(())
    }

    /// Write a ledger posting through in one transaction.
    ///
    /// Postings may reach this point in a different order than the ledger
    /// applied them, so wallets and holds are written as they stand in the
    /// ledger now rather than as the posting captured them. Writes are
    /// serialized, which makes the last write always carry the newest state.
    pub async fn persist_posting(&self, posting: &Posting) -> Result<(), AppError> {
        let Some(pool) = &self.db_pool else {
            return Ok(());
        };
        let _guard = self.ledger_writes.lock().await;
        let current = self.current_posting(posting);
        if let Some(hold) = describe_hold(&current) {
            tracing::debug!(entries = current.entries.len(), hold = %hold, "writing ledger posting");
        }
        crate::db::ledger::write_posting(pool, &current)
            .await
            .map_err(|e| persist_failed("ledger posting", e))
    }

    fn current_posting(&self, posting: &Posting) -> Posting {
        let wallets = posting
            .wallets
            .iter()
            .map(|w| self.ledger.wallet(w.user_id).unwrap_or_else(|| w.clone()))
            .collect();
        let hold = posting.hold.as_ref().map(|change| match change {
            HoldChange::EscrowPlaced(h) => self.current_escrow(h.order_id),
            HoldChange::EscrowCleared(id) => self.current_escrow(*id),
            HoldChange::WithdrawalPlaced(h) => self.current_withdrawal(h.request_id),
            HoldChange::WithdrawalCleared(id) => self.current_withdrawal(*id),
        });
        Posting {
            wallets,
            hold,
            ..posting.clone()
        }
    }

    fn current_escrow(&self, order_id: Uuid) -> HoldChange {
        self.ledger
            .escrow_for(order_id)
            .map_or(HoldChange::EscrowCleared(order_id), HoldChange::EscrowPlaced)
    }

    fn current_withdrawal(&self, request_id: Uuid) -> HoldChange {
        self.ledger
            .withdrawal_hold(request_id)
            .map_or(HoldChange::WithdrawalCleared(request_id), HoldChange::WithdrawalPlaced)
    }

    pub async fn persist_fee_schedule(&self, schedule: &FeeSchedule) -> Result<(), AppError> {
        if let Some(pool) = &self.db_pool {
            crate::db::settings::save_fee_schedule(pool, schedule)
                .await
                .map_err(|e| persist_failed("fee schedule", e))?;
        }
        Ok(())
    }

    // -- Side records ---------------------------------------------------------

    /// Append an audit event and write it through. A failed write is logged;
    /// the mutation it describes has already been committed.
    pub async fn audit(&self, event: NewAuditEvent) {
        let record = self.audit.append(event);
        tracing::debug!(
            event_type = %record.event_type,
            resource_id = %record.resource_id,
            "audit event recorded"
        );
        if let Some(pool) = &self.db_pool {
            if let Err(e) = crate::db::audit::insert(pool, &record).await {
                tracing::error!(error = %e, event_id = %record.id, "failed to persist audit event");
            }
        }
    }

    /// Create a notification for `user_id`. A failed write is logged.
    pub async fn notify(
        &self,
        user_id: Uuid,
        kind: &str,
        message: impl Into<String>,
        reference_id: Option<Uuid>,
    ) {
        let record = NotificationRecord {
            id: Uuid::new_v4(),
            user_id,
            kind: kind.to_string(),
            message: message.into(),
            reference_id,
            read: false,
            created_at: Utc::now(),
        };
        self.notifications.insert(record.id, record.clone());
        if let Some(pool) = &self.db_pool {
            if let Err(e) = crate::db::support::upsert_notification(pool, &record).await {
                tracing::error!(error = %e, user_id = %user_id, "failed to persist notification");
            }
        }
    }
}

/// Log a failed write-through of a record that is already committed in
/// memory, for handlers that still answer with success. A later write of
/// the same record or wallet persists it again.
pub(crate) fn warn_unpersisted(result: Result<(), AppError>, record: &str, id: Uuid) {
    if let Err(e) = result {
        tracing::warn!(error = %e, record, id = %id, "committed in memory but not persisted");
    }
}

fn persist_failed(what: &str, err: sqlx::Error) -> AppError {
    tracing::error!(error = %err, record = what, "database write-through failed");
    AppError::Internal(format!(
        "{what} recorded in-memory but database persist failed"
    ))
}

/// Open escrow or withdrawal holds in a posting, for logging.
pub fn describe_hold(posting: &Posting) -> Option<String> {
    posting.hold.as_ref().map(|h| match h {
        HoldChange::EscrowPlaced(e) => format!("escrow placed for order {}", e.order_id),
        HoldChange::EscrowCleared(id) => format!("escrow cleared for order {id}"),
        HoldChange::WithdrawalPlaced(w) => format!("withdrawal held for request {}", w.request_id),
        HoldChange::WithdrawalCleared(id) => format!("withdrawal released for request {id}"),
    })
}

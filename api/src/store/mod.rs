//! Database store for the collections core.
//!
//! ## Design Decisions
//!
//! ### Derived balances
//! - Cash-box balances are never stored. Every balance is an aggregate of
//!   `ledger_entries` (debits minus credits) filtered by owner, account,
//!   and currency, so the journal stays the single source of truth.
//!
//! ### Transactions
//! - Every public mutation runs inside one sqlx transaction. Ledger pairs
//!   are written debit leg first, credit leg second; the pair commits or
//!   rolls back as a unit.
//! - Debt state is recomputed from allocations rather than materialized.
//!   The payment poster locks the member row before re-checking balances,
//!   which serializes concurrent posts for the same member.
//!
//! ### Time Source Dependency
//! - Functions that need the current time accept a `TimeSource` parameter
//!   instead of creating their own, so time can be mocked during tests.
//!
//! ### Type Safety
//! - Id newtypes implement `sqlx::Type` and bind directly in queries.
//!   Enum columns use Postgres enum types matching the serde wire forms.

use jiff::Timestamp;
use jiff_sqlx::Timestamp as SqlxTs;
use jiff_sqlx::ToSqlx;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

use payloads::{
    AccountCode, AgentId, AllocationStatus, Currency, EntryKind, EntrySide,
    GroupId, LedgerEntryId, MemberId, MemberRole, OptionalTimestamp,
    PaymentId, PaymentKind, PaymentMethod, PaymentStatus, Period, Role,
    UserId, responses,
};

use crate::allocator::AllocationError;
use crate::pricing::PricingClient;
use crate::time::TimeSource;

pub mod cash;
pub mod debt;
pub mod ledger;
pub mod payments;
pub mod queries;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    // validation
    #[error("Amount must be a positive value")]
    InvalidAmount,
    #[error("Invalid period '{raw}'")]
    InvalidPeriod { raw: String },
    #[error("Invalid allocation breakdown")]
    InvalidBreakdown,
    #[error("Account {account} is not valid for this operation")]
    InvalidAccount { account: AccountCode },
    #[error("Field too long")]
    FieldTooLong,
    #[error("Currency mismatch between the legs of a pair")]
    CurrencyMismatch,

    // scope
    #[error("Member is outside the acting agent's portfolio")]
    OutOfScope,
    #[error("Operation not permitted for this role")]
    NotAuthorized,

    // not found
    #[error("Member not found")]
    MemberNotFound,
    #[error("Agent not found")]
    AgentNotFound,
    #[error("User not found")]
    UserNotFound,
    #[error("Payment not found")]
    PaymentNotFound,

    // business
    #[error("Client has no outstanding balance")]
    ClientUpToDate,
    #[error("Member has {months} months in arrears (cutoff {cutoff})")]
    ArrearsCutoff { months: u32, cutoff: u32 },
    #[error("Period {period} is in the future")]
    PeriodInFuture { period: Period },
    #[error(
        "Period {period} would be overpaid: requested {requested}, \
         balance {balance}"
    )]
    OverpayPeriod {
        period: Period,
        requested: Decimal,
        balance: Decimal,
    },
    #[error("Breakdown total {breakdown_total} exceeds amount {amount}")]
    BreakdownExceedsAmount {
        breakdown_total: Decimal,
        amount: Decimal,
    },
    #[error("Nothing to allocate: {leftover} could not be placed")]
    NothingToAllocate { leftover: Decimal },
    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds {
        available: Decimal,
        requested: Decimal,
    },

    // concurrency
    #[error("Allocation lost a race: period {period} no longer covers it")]
    RaceConditionOverpay { period: Period },
    #[error("A ledger pair already exists for payment {payment_id}")]
    DuplicatePosting { payment_id: PaymentId },

    // infrastructure
    #[error("Unique constraint violation")]
    NotUnique(#[source] sqlx::Error),
    #[error("Database error")]
    Database(#[source] sqlx::Error),
    #[error("Unexpected error")]
    UnexpectedError(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::NotUnique(e)
            }
            _ => StoreError::Database(e),
        }
    }
}

impl From<AllocationError> for StoreError {
    fn from(e: AllocationError) -> Self {
        match e {
            AllocationError::InvalidPeriod { raw } => {
                StoreError::InvalidPeriod { raw }
            }
            AllocationError::PeriodInFuture { period } => {
                StoreError::PeriodInFuture { period }
            }
            AllocationError::InvalidAmount { .. } => StoreError::InvalidAmount,
            AllocationError::OverpayPeriod {
                period,
                requested,
                balance,
            } => StoreError::OverpayPeriod {
                period,
                requested,
                balance,
            },
            AllocationError::BreakdownExceedsAmount {
                breakdown_total,
                amount,
            } => StoreError::BreakdownExceedsAmount {
                breakdown_total,
                amount,
            },
        }
    }
}

impl StoreError {
    /// Stable machine code surfaced in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAmount => "INVALID_AMOUNT",
            Self::InvalidPeriod { .. } => "INVALID_PERIOD",
            Self::InvalidBreakdown => "INVALID_BREAKDOWN",
            Self::InvalidAccount { .. } => "INVALID_ACCOUNT",
            Self::FieldTooLong => "FIELD_TOO_LONG",
            Self::CurrencyMismatch => "CURRENCY_MISMATCH",
            Self::OutOfScope => "OUT_OF_SCOPE",
            Self::NotAuthorized => "NOT_AUTHORIZED",
            Self::MemberNotFound => "MEMBER_NOT_FOUND",
            Self::AgentNotFound => "AGENT_NOT_FOUND",
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::PaymentNotFound => "PAYMENT_NOT_FOUND",
            Self::ClientUpToDate => "CLIENT_UP_TO_DATE",
            Self::ArrearsCutoff { .. } => "ARREARS_CUTOFF",
            Self::PeriodInFuture { .. } => "PERIOD_IN_FUTURE",
            Self::OverpayPeriod { .. } => "OVERPAY_PERIOD",
            Self::BreakdownExceedsAmount { .. } => "BREAKDOWN_EXCEEDS_AMOUNT",
            Self::NothingToAllocate { .. } => "NOTHING_TO_ALLOCATE",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::RaceConditionOverpay { .. } => "RACE_CONDITION_OVERPAY",
            Self::DuplicatePosting { .. } => "DUPLICATE_POSTING",
            Self::NotUnique(_) => "NOT_UNIQUE",
            Self::Database(_) | Self::UnexpectedError(_) => {
                "STORAGE_UNAVAILABLE"
            }
        }
    }

    /// Diagnostic context for the error body, when the kind carries any.
    pub fn context(&self) -> Option<serde_json::Value> {
        match self {
            Self::ArrearsCutoff { months, cutoff } => Some(
                serde_json::json!({ "months": months, "cutoff": cutoff }),
            ),
            Self::OverpayPeriod {
                period,
                requested,
                balance,
            } => Some(serde_json::json!({
                "period": period,
                "requested": requested,
                "balance": balance,
            })),
            Self::BreakdownExceedsAmount {
                breakdown_total,
                amount,
            } => Some(serde_json::json!({
                "breakdown_total": breakdown_total,
                "amount": amount,
            })),
            Self::NothingToAllocate { leftover } => {
                Some(serde_json::json!({ "leftover": leftover }))
            }
            Self::InsufficientFunds {
                available,
                requested,
            } => Some(serde_json::json!({
                "available": available,
                "requested": requested,
            })),
            Self::RaceConditionOverpay { period } => {
                Some(serde_json::json!({ "period": period }))
            }
            _ => None,
        }
    }
}

/// A cash-box-holding user row.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub display_name: Option<String>,
    pub role: Role,
    pub agent_id: Option<AgentId>,
    #[sqlx(try_from = "SqlxTs")]
    pub created_at: Timestamp,
}

impl User {
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

/// Nullable date column wrapper, same shape as `OptionalTimestamp`.
#[derive(Debug, Clone, sqlx::Type)]
#[sqlx(transparent)]
pub struct OptionalDate(pub Option<jiff_sqlx::Date>);

impl TryFrom<OptionalDate> for Option<jiff::civil::Date> {
    type Error = <jiff::civil::Date as TryFrom<jiff_sqlx::Date>>::Error;

    fn try_from(value: OptionalDate) -> Result<Self, Self::Error> {
        value.0.map(jiff::civil::Date::try_from).transpose()
    }
}

/// A plan member row.
#[derive(Debug, Clone, FromRow)]
pub struct Member {
    pub id: MemberId,
    pub group_id: GroupId,
    pub position: i32,
    pub full_name: String,
    pub role: MemberRole,
    #[sqlx(try_from = "OptionalDate")]
    pub birth_date: Option<jiff::civil::Date>,
    pub cremation: bool,
    pub plot: bool,
    pub agent_id: AgentId,
    #[sqlx(try_from = "SqlxTs")]
    pub joined_at: Timestamp,
    #[sqlx(try_from = "OptionalTimestamp")]
    pub cancelled_at: Option<Timestamp>,
    pub active: bool,
    pub historical_fee: Decimal,
    pub ideal_fee: Decimal,
    pub use_ideal: bool,
    #[sqlx(try_from = "SqlxTs")]
    pub created_at: Timestamp,
    #[sqlx(try_from = "SqlxTs")]
    pub updated_at: Timestamp,
}

impl Member {
    /// The fee currently billable: ideal when the flag selects it,
    /// otherwise the grandfathered historical fee.
    pub fn effective_fee(&self) -> Decimal {
        if self.use_ideal {
            self.ideal_fee
        } else {
            self.historical_fee
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancelled_at.is_none() && self.active
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Payment {
    pub id: PaymentId,
    pub kind: PaymentKind,
    pub status: PaymentStatus,
    pub member_id: MemberId,
    pub group_id: GroupId,
    pub agent_id: AgentId,
    pub agent_user_id: UserId,
    pub amount: Decimal,
    pub currency: Currency,
    pub method: PaymentMethod,
    pub channel: Option<String>,
    pub notes: Option<String>,
    pub idempotency_key: String,
    pub external_ref: Option<String>,
    pub intended_period: Option<String>,
    pub meta: Option<Json<serde_json::Value>>,
    #[sqlx(try_from = "SqlxTs")]
    pub created_at: Timestamp,
    #[sqlx(try_from = "OptionalTimestamp")]
    pub posted_at: Option<Timestamp>,
}

impl Payment {
    pub fn into_response(
        self,
        allocations: Vec<payloads::Allocation>,
    ) -> responses::Payment {
        responses::Payment {
            id: self.id,
            kind: self.kind,
            status: self.status,
            member_id: self.member_id,
            group_id: self.group_id,
            agent_id: self.agent_id,
            agent_user_id: self.agent_user_id,
            amount: self.amount,
            currency: self.currency,
            method: self.method,
            channel: self.channel,
            notes: self.notes,
            external_ref: self.external_ref,
            created_at: self.created_at,
            posted_at: self.posted_at,
            allocations,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct AllocationRow {
    pub payment_id: PaymentId,
    pub member_id: MemberId,
    pub period: Period,
    pub amount_applied: Decimal,
    pub status_after: AllocationStatus,
}

impl From<AllocationRow> for payloads::Allocation {
    fn from(row: AllocationRow) -> Self {
        Self {
            period: row.period,
            amount_applied: row.amount_applied,
            status_after: row.status_after,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct LedgerEntryRow {
    pub id: LedgerEntryId,
    pub payment_id: PaymentId,
    pub owner_user_id: Option<UserId>,
    pub kind: EntryKind,
    pub side: EntrySide,
    pub account_code: AccountCode,
    pub amount: Decimal,
    pub currency: Currency,
    #[sqlx(try_from = "SqlxTs")]
    pub posted_at: Timestamp,
    pub from_user_label: String,
    pub to_user_label: String,
    pub from_account_code: AccountCode,
    pub to_account_code: AccountCode,
    pub agent_id: Option<AgentId>,
    pub member_group_id: Option<GroupId>,
    pub channel: Option<String>,
    pub plan: Option<String>,
    pub note: Option<String>,
}

impl From<LedgerEntryRow> for responses::LedgerEntry {
    fn from(row: LedgerEntryRow) -> Self {
        Self {
            id: row.id,
            payment_id: row.payment_id,
            owner_user_id: row.owner_user_id,
            kind: row.kind,
            side: row.side,
            account_code: row.account_code,
            amount: row.amount,
            currency: row.currency,
            posted_at: row.posted_at,
            from_user_label: row.from_user_label,
            to_user_label: row.to_user_label,
            from_account_code: row.from_account_code,
            to_account_code: row.to_account_code,
            agent_id: row.agent_id,
            member_group_id: row.member_group_id,
            channel: row.channel,
            plan: row.plan,
            note: row.note,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ReceiptRow {
    pub payment_id: PaymentId,
    pub serial_number: i64,
    pub year: i16,
    pub qr_payload: String,
    pub pdf_uri: Option<String>,
    pub pdf_failed: bool,
    pub voided: bool,
    #[sqlx(try_from = "SqlxTs")]
    pub created_at: Timestamp,
}

impl From<ReceiptRow> for responses::Receipt {
    fn from(row: ReceiptRow) -> Self {
        Self {
            payment_id: row.payment_id,
            serial_number: row.serial_number,
            year: row.year,
            qr_payload: row.qr_payload,
            pdf_uri: row.pdf_uri,
            pdf_failed: row.pdf_failed,
            voided: row.voided,
        }
    }
}

pub async fn read_user(
    pool: &PgPool,
    id: &UserId,
) -> Result<User, StoreError> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => StoreError::UserNotFound,
            e => StoreError::Database(e),
        })
}

pub async fn read_member(
    pool: &PgPool,
    id: &MemberId,
) -> Result<Member, StoreError> {
    sqlx::query_as::<_, Member>("SELECT * FROM members WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => StoreError::MemberNotFound,
            e => StoreError::Database(e),
        })
}

/// Active members of a group, titular first.
pub async fn active_group_members(
    pool: &PgPool,
    group_id: GroupId,
) -> Result<Vec<Member>, StoreError> {
    let members = sqlx::query_as::<_, Member>(
        r#"
        SELECT * FROM members
        WHERE group_id = $1 AND cancelled_at IS NULL AND active
        ORDER BY position
        "#,
    )
    .bind(group_id)
    .fetch_all(pool)
    .await?;

    Ok(members)
}

/// Per-member pricing of a group, as the pricing service last persisted it.
#[derive(Debug, Clone, Serialize)]
pub struct MemberPricing {
    pub member_id: MemberId,
    pub full_name: String,
    pub effective_fee: Decimal,
    pub historical_fee: Decimal,
    pub ideal_fee: Decimal,
    pub use_ideal: bool,
}

pub async fn group_pricing(
    pool: &PgPool,
    group_id: GroupId,
) -> Result<Vec<MemberPricing>, StoreError> {
    let members = active_group_members(pool, group_id).await?;
    Ok(members
        .into_iter()
        .map(|m| MemberPricing {
            member_id: m.id,
            full_name: m.full_name.clone(),
            effective_fee: m.effective_fee(),
            historical_fee: m.historical_fee,
            ideal_fee: m.ideal_fee,
            use_ideal: m.use_ideal,
        })
        .collect())
}

#[derive(Debug)]
pub struct CancelOutcome {
    pub member: Member,
    /// The dependent promoted to titular, when the titular was cancelled.
    pub promoted: Option<Member>,
}

/// Cancel a member, promoting the oldest active dependent when the titular
/// leaves and resequencing dependent positions to `1..n`.
///
/// Pricing recompute is requested after the transaction commits; the
/// mutation never waits on the external service.
pub async fn cancel_member(
    member_id: &MemberId,
    time_source: &TimeSource,
    pricing: &PricingClient,
    pool: &PgPool,
) -> Result<CancelOutcome, StoreError> {
    let now = time_source.now();
    let mut tx = pool.begin().await?;

    let member = sqlx::query_as::<_, Member>(
        "SELECT * FROM members WHERE id = $1 FOR UPDATE",
    )
    .bind(member_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| match e {
        sqlx::Error::RowNotFound => StoreError::MemberNotFound,
        e => StoreError::Database(e),
    })?;

    if member.cancelled_at.is_some() {
        // already cancelled; nothing to mutate
        return Ok(CancelOutcome {
            member,
            promoted: None,
        });
    }

    sqlx::query(
        r#"
        UPDATE members SET cancelled_at = $1, active = false WHERE id = $2
        "#,
    )
    .bind(now.to_sqlx())
    .bind(member_id)
    .execute(&mut *tx)
    .await?;

    let promoted = if member.role == MemberRole::Titular {
        let candidate = sqlx::query_as::<_, Member>(
            r#"
            SELECT * FROM members
            WHERE group_id = $1
              AND role = 'dependent'
              AND cancelled_at IS NULL AND active
              AND id != $2
            ORDER BY birth_date ASC NULLS LAST, position ASC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(member.group_id)
        .bind(member_id)
        .fetch_optional(&mut *tx)
        .await?;

        match candidate {
            Some(candidate) => {
                sqlx::query(
                    r#"
                    UPDATE members SET role = 'titular', position = 0
                    WHERE id = $1
                    "#,
                )
                .bind(candidate.id)
                .execute(&mut *tx)
                .await?;
                Some(candidate)
            }
            None => None,
        }
    } else {
        None
    };

    resequence_dependents(&mut tx, member.group_id).await?;

    tx.commit().await?;

    // Fire-and-check: a pricing outage must not undo the cancellation.
    if let Err(e) = pricing.recompute_group_pricing(member.group_id).await {
        crate::telemetry::log_error(e);
    }

    Ok(CancelOutcome { member, promoted })
}

/// Close position gaps so active dependents sit at `1..n`.
async fn resequence_dependents(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    group_id: GroupId,
) -> Result<(), StoreError> {
    let ids: Vec<MemberId> = sqlx::query_scalar(
        r#"
        SELECT id FROM members
        WHERE group_id = $1
          AND role = 'dependent'
          AND cancelled_at IS NULL AND active
        ORDER BY position, created_at
        "#,
    )
    .bind(group_id)
    .fetch_all(&mut **tx)
    .await?;

    for (index, id) in ids.iter().enumerate() {
        sqlx::query("UPDATE members SET position = $1 WHERE id = $2")
            .bind(index as i32 + 1)
            .bind(id)
            .execute(&mut **tx)
            .await?;
    }

    Ok(())
}

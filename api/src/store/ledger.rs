//! Ledger operations: balanced pair posting and balance derivation.
//!
//! The journal is append-only. A posting is always two rows sharing one
//! `payment_id`: a debit on the receiving account and a credit on the
//! sending account, equal amount, same currency. Balances are derived by
//! aggregation; nothing caches them.

use jiff::Timestamp;
use jiff_sqlx::ToSqlx;
use payloads::{
    AccountCode, AgentId, Currency, EntryKind, GroupId, LedgerEntryId,
    PaymentId, UserId,
};
use rust_decimal::Decimal;
use sqlx::PgExecutor;

use super::{LedgerEntryRow, StoreError};
use crate::accounts;

/// One side of a pair: the account and, for per-user accounts, whose
/// balance moves.
#[derive(Debug, Clone)]
pub struct Leg {
    pub account: AccountCode,
    pub owner: Option<UserId>,
}

impl Leg {
    pub fn global(account: AccountCode) -> Self {
        Self {
            account,
            owner: None,
        }
    }

    pub fn owned(account: AccountCode, owner: UserId) -> Self {
        Self {
            account,
            owner: Some(owner),
        }
    }
}

/// Reporting dimensions copied onto both legs.
#[derive(Debug, Clone, Default)]
pub struct Dimensions {
    pub agent_id: Option<AgentId>,
    pub member_group_id: Option<GroupId>,
    pub channel: Option<String>,
    pub plan: Option<String>,
    /// Free text; synthetic transfers embed their idempotency scope here.
    pub note: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PostPair {
    pub payment_id: PaymentId,
    pub kind: EntryKind,
    pub currency: Currency,
    pub amount: Decimal,
    pub debit: Leg,
    pub credit: Leg,
    pub from_user_label: String,
    pub to_user_label: String,
    pub dimensions: Dimensions,
    pub posted_at: Timestamp,
    /// For synthetic transfers: reject a matching `(kind, currency, note)`
    /// pair younger than this many seconds.
    pub note_dedup_window_secs: Option<i64>,
}

fn check_leg(leg: &Leg) -> Result<(), StoreError> {
    // Per-user accounts must name whose balance moves. Global accounts may
    // carry a provenance owner (petty-cash tranches track the depositing
    // admin) or none; their balance derivation ignores it either way.
    if !accounts::is_global(leg.account) && leg.owner.is_none() {
        return Err(StoreError::InvalidAccount {
            account: leg.account,
        });
    }
    Ok(())
}

/// Post both legs of a pair inside the caller's transaction.
///
/// Debit leg is written first, credit leg second; the transaction boundary
/// makes them atomic. A second pair for the same `payment_id`, or (for
/// synthetic transfers) a matching note-scoped pair inside the dedup
/// window, is rejected with `DUPLICATE_POSTING`.
pub async fn post_pair(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    pair: &PostPair,
) -> Result<(LedgerEntryId, LedgerEntryId), StoreError> {
    if pair.amount <= Decimal::ZERO {
        return Err(StoreError::InvalidAmount);
    }
    check_leg(&pair.debit)?;
    check_leg(&pair.credit)?;

    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM ledger_entries WHERE payment_id = $1)",
    )
    .bind(pair.payment_id)
    .fetch_one(&mut **tx)
    .await?;
    if exists {
        return Err(StoreError::DuplicatePosting {
            payment_id: pair.payment_id,
        });
    }

    if let (Some(window), Some(note)) =
        (pair.note_dedup_window_secs, pair.dimensions.note.as_deref())
    {
        let duplicate = find_note_scoped(
            &mut **tx,
            pair.kind,
            &pair.currency,
            note,
            pair.posted_at,
            window,
        )
        .await?;
        if let Some(payment_id) = duplicate {
            return Err(StoreError::DuplicatePosting { payment_id });
        }
    }

    let debit_id = insert_leg(tx, pair, &pair.debit, "debit").await?;
    let credit_id = insert_leg(tx, pair, &pair.credit, "credit").await?;
    Ok((debit_id, credit_id))
}

/// A prior synthetic pair with the same scope note, if one is on the books
/// inside the window. Cash movements use this to answer replays without
/// re-posting.
pub async fn find_note_scoped<'e, E: PgExecutor<'e>>(
    executor: E,
    kind: EntryKind,
    currency: &Currency,
    note: &str,
    now: Timestamp,
    window_secs: i64,
) -> Result<Option<PaymentId>, StoreError> {
    let cutoff = now - jiff::Span::new().seconds(window_secs);
    let found: Option<PaymentId> = sqlx::query_scalar(
        r#"
        SELECT payment_id FROM ledger_entries
        WHERE kind = $1 AND currency = $2 AND note = $3 AND posted_at > $4
        LIMIT 1
        "#,
    )
    .bind(kind)
    .bind(currency)
    .bind(note)
    .bind(cutoff.to_sqlx())
    .fetch_optional(executor)
    .await?;

    Ok(found)
}

async fn insert_leg(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    pair: &PostPair,
    leg: &Leg,
    side: &str,
) -> Result<LedgerEntryId, StoreError> {
    let id: LedgerEntryId = sqlx::query_scalar(
        r#"
        INSERT INTO ledger_entries (
            payment_id, owner_user_id, kind, side, account_code, amount,
            currency, posted_at, from_user_label, to_user_label,
            from_account_code, to_account_code, agent_id, member_group_id,
            channel, plan, note
        )
        VALUES ($1, $2, $3, $4::entry_side, $5, $6, $7, $8, $9, $10, $11,
                $12, $13, $14, $15, $16, $17)
        RETURNING id
        "#,
    )
    .bind(pair.payment_id)
    .bind(leg.owner)
    .bind(pair.kind)
    .bind(side)
    .bind(leg.account)
    .bind(pair.amount)
    .bind(&pair.currency)
    .bind(pair.posted_at.to_sqlx())
    .bind(&pair.from_user_label)
    .bind(&pair.to_user_label)
    .bind(pair.credit.account)
    .bind(pair.debit.account)
    .bind(pair.dimensions.agent_id)
    .bind(pair.dimensions.member_group_id)
    .bind(&pair.dimensions.channel)
    .bind(&pair.dimensions.plan)
    .bind(&pair.dimensions.note)
    .fetch_one(&mut **tx)
    .await?;

    Ok(id)
}

/// Derived balance: `Σ debits − Σ credits` under the filter. `owner` is
/// `None` for the global balance of an account.
pub async fn balance<'e, E: PgExecutor<'e>>(
    executor: E,
    owner: Option<&UserId>,
    account: AccountCode,
    currency: &Currency,
    window: (Option<Timestamp>, Option<Timestamp>),
) -> Result<Decimal, StoreError> {
    let sum: Option<Decimal> = sqlx::query_scalar(
        r#"
        SELECT SUM(CASE WHEN side = 'debit' THEN amount ELSE -amount END)
        FROM ledger_entries
        WHERE account_code = $1
          AND currency = $2
          AND ($3::uuid IS NULL OR owner_user_id = $3)
          AND ($4::timestamptz IS NULL OR posted_at >= $4)
          AND ($5::timestamptz IS NULL OR posted_at <= $5)
        "#,
    )
    .bind(account)
    .bind(currency)
    .bind(owner)
    .bind(window.0.map(|t| t.to_sqlx()))
    .bind(window.1.map(|t| t.to_sqlx()))
    .fetch_one(executor)
    .await?;

    Ok(sum.unwrap_or(Decimal::ZERO))
}

/// Per-owner balances of one account, highest first.
pub async fn balance_by_owner<'e, E: PgExecutor<'e>>(
    executor: E,
    account: AccountCode,
    currency: &Currency,
    window: (Option<Timestamp>, Option<Timestamp>),
) -> Result<Vec<(Option<UserId>, Decimal)>, StoreError> {
    let rows: Vec<(Option<UserId>, Option<Decimal>)> = sqlx::query_as(
        r#"
        SELECT owner_user_id,
               SUM(CASE WHEN side = 'debit' THEN amount ELSE -amount END)
        FROM ledger_entries
        WHERE account_code = $1
          AND currency = $2
          AND ($3::timestamptz IS NULL OR posted_at >= $3)
          AND ($4::timestamptz IS NULL OR posted_at <= $4)
        GROUP BY owner_user_id
        ORDER BY 2 DESC
        "#,
    )
    .bind(account)
    .bind(currency)
    .bind(window.0.map(|t| t.to_sqlx()))
    .bind(window.1.map(|t| t.to_sqlx()))
    .fetch_all(executor)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(owner, sum)| (owner, sum.unwrap_or(Decimal::ZERO)))
        .collect())
}

/// Whether a pair has been posted for this payment.
pub async fn exists<'e, E: PgExecutor<'e>>(
    executor: E,
    payment_id: &PaymentId,
) -> Result<bool, StoreError> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM ledger_entries WHERE payment_id = $1)",
    )
    .bind(payment_id)
    .fetch_one(executor)
    .await?;

    Ok(exists)
}

/// Both legs of a payment's pair, debit first.
pub async fn entries_for_payment<'e, E: PgExecutor<'e>>(
    executor: E,
    payment_id: &PaymentId,
) -> Result<Vec<LedgerEntryRow>, StoreError> {
    let entries = sqlx::query_as::<_, LedgerEntryRow>(
        r#"
        SELECT * FROM ledger_entries
        WHERE payment_id = $1
        ORDER BY side = 'credit', id
        "#,
    )
    .bind(payment_id)
    .fetch_all(executor)
    .await?;

    Ok(entries)
}

/// Currencies with activity on an account for one owner. Drives per-source
/// sweeps that must touch every currency an agent has collected in.
pub async fn currencies_for_owner<'e, E: PgExecutor<'e>>(
    executor: E,
    owner: &UserId,
    account: AccountCode,
) -> Result<Vec<Currency>, StoreError> {
    let currencies: Vec<Currency> = sqlx::query_scalar(
        r#"
        SELECT DISTINCT currency FROM ledger_entries
        WHERE owner_user_id = $1 AND account_code = $2
        ORDER BY currency
        "#,
    )
    .bind(owner)
    .bind(account)
    .fetch_all(executor)
    .await?;

    Ok(currencies)
}

//! Ownership-aware accounting queries: box listings, movement detail, and
//! the raw ledger tail.
//!
//! Visibility matrix: super-admins see everything including the virtual
//! global rows; admins see agent boxes (and their own detail) but never
//! `CAJA_SUPERADMIN` rows nor credit legs on `CAJA_GRANDE`; agents see
//! only themselves.

use jiff::Timestamp;
use jiff_sqlx::ToSqlx;
use payloads::{
    AccountCode, Actor, AgentId, Currency, OptionalTimestamp, Role, UserId,
    requests, responses,
};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};

use super::{LedgerEntryRow, StoreError, User, read_user};
use crate::accounts;

/// Accounts that can also be matched through `dimensions.agent_id`, for
/// entries written before an agent had their user linked.
const AGENT_ACCOUNTS: &[AccountCode] = &[
    AccountCode::CajaCobrador,
    AccountCode::ARendirCobrador,
    AccountCode::ComisionCobrador,
];

fn permitted_accounts(role: Role) -> &'static [AccountCode] {
    match role {
        Role::Agent => AGENT_ACCOUNTS,
        Role::Admin => &[AccountCode::CajaAdmin],
        Role::SuperAdmin => &[AccountCode::CajaSuperadmin],
    }
}

fn parse_account(text: &str) -> Option<AccountCode> {
    serde_json::from_value(serde_json::Value::String(text.to_string())).ok()
}

#[derive(Debug, FromRow)]
struct BoxAggRow {
    user_id: UserId,
    account_code: AccountCode,
    currency: Currency,
    debits: Decimal,
    credits: Decimal,
    #[sqlx(try_from = "OptionalTimestamp")]
    last_movement: Option<Timestamp>,
    payment_count: i64,
}

#[derive(Debug, FromRow)]
struct GlobalAggRow {
    account_code: AccountCode,
    currency: Currency,
    debits: Decimal,
    credits: Decimal,
    #[sqlx(try_from = "OptionalTimestamp")]
    last_movement: Option<Timestamp>,
    payment_count: i64,
}

fn hierarchy_rank(role: Role) -> u8 {
    match role {
        Role::SuperAdmin => 1,
        Role::Admin => 2,
        Role::Agent => 3,
    }
}

/// Users-with-boxes the viewer may see, each with per-currency activity
/// per account. Super-admin viewers additionally get virtual rows for the
/// global vault accounts.
#[tracing::instrument(skip(query, pool))]
pub async fn list_boxes_by_user(
    query: &requests::BoxesQuery,
    pool: &PgPool,
) -> Result<responses::BoxesList, StoreError> {
    let viewer_role = query.actor_role;
    let visible_roles: Vec<Role> = match viewer_role {
        Role::SuperAdmin => vec![Role::SuperAdmin, Role::Admin, Role::Agent],
        Role::Admin => vec![Role::Agent],
        Role::Agent => return Err(StoreError::NotAuthorized),
    };

    let limit = query.limit.unwrap_or(100).clamp(1, 500);
    let offset = query.offset.unwrap_or(0).max(0);
    let q_like = query.q.as_deref().map(|q| format!("%{}%", q.trim()));

    let users = sqlx::query_as::<_, User>(
        r#"
        SELECT * FROM users
        WHERE role = ANY($1)
          AND ($2::user_role IS NULL OR role = $2)
          AND ($3::text IS NULL
               OR username ILIKE $3 OR display_name ILIKE $3)
        ORDER BY username
        LIMIT $4 OFFSET $5
        "#,
    )
    .bind(&visible_roles)
    .bind(query.role)
    .bind(&q_like)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let user_ids: Vec<UserId> = users.iter().map(|u| u.id).collect();
    let aggregates = sqlx::query_as::<_, BoxAggRow>(
        r#"
        SELECT u.id AS user_id,
               le.account_code,
               le.currency,
               SUM(CASE WHEN le.side = 'debit' THEN le.amount ELSE 0 END)
                   AS debits,
               SUM(CASE WHEN le.side = 'credit' THEN le.amount ELSE 0 END)
                   AS credits,
               MAX(le.posted_at) AS last_movement,
               COUNT(DISTINCT le.payment_id) AS payment_count
        FROM users u
        JOIN ledger_entries le
          ON le.owner_user_id = u.id
          OR (u.agent_id IS NOT NULL
              AND le.agent_id = u.agent_id
              AND le.account_code = ANY($2))
        WHERE u.id = ANY($1)
          AND ($3::timestamptz IS NULL OR le.posted_at >= $3)
          AND ($4::timestamptz IS NULL OR le.posted_at <= $4)
        GROUP BY u.id, le.account_code, le.currency
        "#,
    )
    .bind(&user_ids)
    .bind(AGENT_ACCOUNTS)
    .bind(query.date_from.map(|t| t.to_sqlx()))
    .bind(query.date_to.map(|t| t.to_sqlx()))
    .fetch_all(pool)
    .await?;

    let mut rows: Vec<responses::BoxRow> = users
        .iter()
        .map(|user| responses::BoxRow {
            owner: responses::BoxOwner {
                user_id: Some(user.id),
                display_name: Some(user.label().to_string()),
                role: Some(user.role),
                global_account: None,
            },
            boxes: Vec::new(),
        })
        .collect();
    for agg in aggregates {
        if let Some(row) = rows
            .iter_mut()
            .find(|r| r.owner.user_id == Some(agg.user_id))
        {
            row.boxes.push(responses::BoxBalance {
                account_code: agg.account_code,
                currency: agg.currency,
                debits: agg.debits,
                credits: agg.credits,
                balance: agg.debits - agg.credits,
                last_movement: agg.last_movement,
                payment_count: agg.payment_count,
            });
        }
    }

    let mut global_rows: Vec<responses::BoxRow> = Vec::new();
    if viewer_role == Role::SuperAdmin {
        let aggregates = sqlx::query_as::<_, GlobalAggRow>(
            r#"
            SELECT account_code,
                   currency,
                   SUM(CASE WHEN side = 'debit' THEN amount ELSE 0 END)
                       AS debits,
                   SUM(CASE WHEN side = 'credit' THEN amount ELSE 0 END)
                       AS credits,
                   MAX(posted_at) AS last_movement,
                   COUNT(DISTINCT payment_id) AS payment_count
            FROM ledger_entries
            WHERE account_code = ANY($1)
              AND ($2::timestamptz IS NULL OR posted_at >= $2)
              AND ($3::timestamptz IS NULL OR posted_at <= $3)
            GROUP BY account_code, currency
            "#,
        )
        .bind(accounts::GLOBAL_BOX_ACCOUNTS)
        .bind(query.date_from.map(|t| t.to_sqlx()))
        .bind(query.date_to.map(|t| t.to_sqlx()))
        .fetch_all(pool)
        .await?;

        for account in accounts::GLOBAL_BOX_ACCOUNTS {
            let boxes: Vec<responses::BoxBalance> = aggregates
                .iter()
                .filter(|a| a.account_code == *account)
                .map(|a| responses::BoxBalance {
                    account_code: a.account_code,
                    currency: a.currency.clone(),
                    debits: a.debits,
                    credits: a.credits,
                    balance: a.debits - a.credits,
                    last_movement: a.last_movement,
                    payment_count: a.payment_count,
                })
                .collect();
            if !boxes.is_empty() {
                global_rows.push(responses::BoxRow {
                    owner: responses::BoxOwner {
                        user_id: None,
                        display_name: Some(
                            accounts::meta(*account).label.to_string(),
                        ),
                        role: None,
                        global_account: Some(*account),
                    },
                    boxes,
                });
            }
        }
    }

    let ordered = match query.order_mode {
        Some(requests::BoxOrderMode::Hierarchy) => {
            rows.sort_by_key(|r| {
                r.owner.role.map(hierarchy_rank).unwrap_or(0)
            });
            let mut all = global_rows;
            all.extend(rows);
            all
        }
        _ => {
            let mut all = rows;
            all.extend(global_rows);
            all
        }
    };

    Ok(responses::BoxesList {
        ok: true,
        rows: ordered,
    })
}

/// What `movement_detail` resolved its target to.
enum DetailTarget {
    Global(AccountCode),
    UserBoxes {
        owner: UserId,
        accounts: Vec<AccountCode>,
        agent_id: Option<AgentId>,
    },
}

async fn resolve_target(
    target: &str,
    actor: &Actor,
    pool: &PgPool,
) -> Result<DetailTarget, StoreError> {
    if let Some(raw) = target.strip_prefix("GLOBAL:") {
        let account = parse_account(raw).ok_or(StoreError::UserNotFound)?;
        if !accounts::is_global(account) {
            return Err(StoreError::InvalidAccount { account });
        }
        if !actor.is_ge_admin() {
            return Err(StoreError::NotAuthorized);
        }
        return Ok(DetailTarget::Global(account));
    }

    let user_id = target
        .parse::<uuid::Uuid>()
        .map(UserId)
        .map_err(|_| StoreError::UserNotFound)?;
    let user = read_user(pool, &user_id).await?;

    let allowed = match actor.role {
        Role::SuperAdmin => true,
        Role::Admin => {
            user.role == Role::Agent || user.id == actor.user_id
        }
        Role::Agent => user.id == actor.user_id,
    };
    if !allowed {
        return Err(StoreError::NotAuthorized);
    }

    Ok(DetailTarget::UserBoxes {
        owner: user.id,
        accounts: permitted_accounts(user.role).to_vec(),
        agent_id: user.agent_id,
    })
}

/// Raw entries plus running totals for one box (or one global account).
#[tracing::instrument(skip(query, pool))]
pub async fn movement_detail(
    target: &str,
    actor: &Actor,
    query: &requests::MovementDetailQuery,
    pool: &PgPool,
) -> Result<responses::MovementDetail, StoreError> {
    let resolved = resolve_target(target, actor, pool).await?;

    let (owner, account_filter, agent_dim): (
        Option<UserId>,
        Vec<AccountCode>,
        Option<AgentId>,
    ) = match resolved {
        DetailTarget::Global(account) => (None, vec![account], None),
        DetailTarget::UserBoxes {
            owner,
            accounts,
            agent_id,
        } => {
            if let Some(requested) = query.account {
                if !accounts.contains(&requested) {
                    return Err(StoreError::InvalidAccount {
                        account: requested,
                    });
                }
                (Some(owner), vec![requested], agent_id)
            } else {
                (Some(owner), accounts, agent_id)
            }
        }
    };

    // non-super-admins never see the vault drain side nor the wallet
    let hide_restricted = !actor.is_super_admin();
    let limit = query.limit.unwrap_or(100).clamp(1, 500);
    let offset = query.offset.unwrap_or(0).max(0);

    let filter_sql = r#"
        FROM ledger_entries le
        WHERE le.account_code = ANY($1)
          AND ($2::uuid IS NULL
               OR le.owner_user_id = $2
               OR ($3::bigint IS NOT NULL AND le.agent_id = $3))
          AND ($4::text IS NULL OR le.currency = $4)
          AND ($5::timestamptz IS NULL OR le.posted_at >= $5)
          AND ($6::timestamptz IS NULL OR le.posted_at <= $6)
          AND (NOT $7
               OR (le.account_code != 'CAJA_SUPERADMIN'
                   AND NOT (le.account_code = 'CAJA_GRANDE'
                            AND le.side = 'credit')))
    "#;

    let entries = sqlx::query_as::<_, LedgerEntryRow>(&format!(
        r#"
        SELECT le.* {filter_sql}
        ORDER BY le.posted_at DESC, le.id DESC
        LIMIT $8 OFFSET $9
        "#
    ))
    .bind(&account_filter)
    .bind(owner)
    .bind(agent_dim)
    .bind(query.currency.as_ref())
    .bind(query.date_from.map(|t| t.to_sqlx()))
    .bind(query.date_to.map(|t| t.to_sqlx()))
    .bind(hide_restricted)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    #[derive(FromRow)]
    struct Totals {
        debits: Option<Decimal>,
        credits: Option<Decimal>,
        #[sqlx(try_from = "OptionalTimestamp")]
        last_movement: Option<Timestamp>,
        payment_count: i64,
    }

    let totals = sqlx::query_as::<_, Totals>(&format!(
        r#"
        SELECT
            SUM(CASE WHEN le.side = 'debit' THEN le.amount ELSE 0 END)
                AS debits,
            SUM(CASE WHEN le.side = 'credit' THEN le.amount ELSE 0 END)
                AS credits,
            MAX(le.posted_at) AS last_movement,
            COUNT(DISTINCT le.payment_id) AS payment_count
        {filter_sql}
        "#
    ))
    .bind(&account_filter)
    .bind(owner)
    .bind(agent_dim)
    .bind(query.currency.as_ref())
    .bind(query.date_from.map(|t| t.to_sqlx()))
    .bind(query.date_to.map(|t| t.to_sqlx()))
    .bind(hide_restricted)
    .fetch_one(pool)
    .await?;

    let debits = totals.debits.unwrap_or(Decimal::ZERO);
    let credits = totals.credits.unwrap_or(Decimal::ZERO);

    Ok(responses::MovementDetail {
        ok: true,
        entries: entries.into_iter().map(Into::into).collect(),
        totals: responses::MovementTotals {
            debits,
            credits,
            balance: debits - credits,
            last_movement: totals.last_movement,
            payment_count: totals.payment_count,
        },
    })
}

/// The admin-visible ledger tail with per-currency totals over the
/// filtered slice.
#[tracing::instrument(skip(query, pool))]
pub async fn ledger_tail(
    query: &requests::LedgerEntriesQuery,
    pool: &PgPool,
) -> Result<responses::LedgerTail, StoreError> {
    let viewer_role = query.actor_role;
    if viewer_role == Role::Agent {
        return Err(StoreError::NotAuthorized);
    }
    let hide_restricted = viewer_role != Role::SuperAdmin;
    let limit = query.limit.unwrap_or(100).clamp(1, 500);
    let offset = query.offset.unwrap_or(0).max(0);

    let filter_sql = r#"
        FROM ledger_entries le
        WHERE ($1::account_code IS NULL OR le.account_code = $1)
          AND ($2::text IS NULL OR le.currency = $2)
          AND ($3::bigint IS NULL OR le.agent_id = $3)
          AND ($4::timestamptz IS NULL OR le.posted_at >= $4)
          AND ($5::timestamptz IS NULL OR le.posted_at <= $5)
          AND (NOT $6
               OR (le.account_code != 'CAJA_SUPERADMIN'
                   AND NOT (le.account_code = 'CAJA_GRANDE'
                            AND le.side = 'credit')))
    "#;

    let entries = sqlx::query_as::<_, LedgerEntryRow>(&format!(
        r#"
        SELECT le.* {filter_sql}
        ORDER BY le.posted_at DESC, le.id DESC
        LIMIT $7 OFFSET $8
        "#
    ))
    .bind(query.account)
    .bind(query.currency.as_ref())
    .bind(query.agent_id)
    .bind(query.date_from.map(|t| t.to_sqlx()))
    .bind(query.date_to.map(|t| t.to_sqlx()))
    .bind(hide_restricted)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    #[derive(FromRow)]
    struct CurrencyRow {
        currency: Currency,
        debits: Decimal,
        credits: Decimal,
        lines: i64,
    }

    let totals = sqlx::query_as::<_, CurrencyRow>(&format!(
        r#"
        SELECT le.currency,
               SUM(CASE WHEN le.side = 'debit' THEN le.amount ELSE 0 END)
                   AS debits,
               SUM(CASE WHEN le.side = 'credit' THEN le.amount ELSE 0 END)
                   AS credits,
               COUNT(*) AS lines
        {filter_sql}
        GROUP BY le.currency
        ORDER BY le.currency
        "#
    ))
    .bind(query.account)
    .bind(query.currency.as_ref())
    .bind(query.agent_id)
    .bind(query.date_from.map(|t| t.to_sqlx()))
    .bind(query.date_to.map(|t| t.to_sqlx()))
    .bind(hide_restricted)
    .fetch_all(pool)
    .await?;

    Ok(responses::LedgerTail {
        ok: true,
        entries: entries.into_iter().map(Into::into).collect(),
        totals: totals
            .into_iter()
            .map(|row| responses::CurrencyTotals {
                currency: row.currency,
                debits: row.debits,
                credits: row.credits,
                net: row.debits - row.credits,
                lines: row.lines,
            })
            .collect(),
    })
}

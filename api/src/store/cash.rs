//! Cash movements between boxes: arqueo sweeps, petty-cash deposits,
//! vault ingress/egress, and commission payouts.
//!
//! Every operation posts one ledger pair per `(source_account, currency)`
//! inside a single transaction, checks available balance first, and is
//! idempotent on a deterministic scope string carried in the pair's note.
//! Replaying a scope inside the dedup window returns the prior pair
//! instead of posting again.

use jiff::Timestamp;
use jiff_sqlx::Timestamp as SqlxTs;
use jiff_sqlx::ToSqlx;
use payloads::{
    AccountCode, Actor, Currency, EntryKind, PaymentId, Period, Role,
    UserId, requests, responses,
};
use rust_decimal::{Decimal, RoundingStrategy};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{StoreError, ledger, read_user};
use crate::commission::{CommissionConfig, days_between};
use crate::time::TimeSource;
use crate::{AppConfig, accounts, periods};

const ARQUEO_DEFAULT_SOURCES: &[AccountCode] =
    &[AccountCode::CajaCobrador, AccountCode::ARendirCobrador];

/// Accounts a commission payout may draw from.
const PAYOUT_SOURCES: &[AccountCode] = &[
    AccountCode::CajaAdmin,
    AccountCode::CajaChica,
    AccountCode::CajaGrande,
];

fn round2(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Minute-granular bucket embedded in sweep scopes, so an accidental
/// double submit lands on the same scope string.
fn minute_bucket(now: Timestamp) -> i64 {
    now.as_second() / 60
}

struct Transfer<'a> {
    kind: EntryKind,
    currency: &'a Currency,
    amount: Decimal,
    debit: ledger::Leg,
    credit: ledger::Leg,
    from_label: String,
    to_label: String,
    agent_id: Option<payloads::AgentId>,
    scope: String,
}

/// Post one movement pair unless its scope already exists in the window.
async fn post_transfer(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    config: &AppConfig,
    transfer: Transfer<'_>,
    now: Timestamp,
) -> Result<responses::CashMovement, StoreError> {
    let prior = ledger::find_note_scoped(
        &mut **tx,
        transfer.kind,
        transfer.currency,
        &transfer.scope,
        now,
        config.ledger_dedup_window_secs,
    )
    .await?;

    if let Some(payment_id) = prior {
        return Ok(responses::CashMovement {
            payment_id,
            source_account: transfer.credit.account,
            destination_account: transfer.debit.account,
            currency: transfer.currency.clone(),
            amount: transfer.amount,
            replayed: true,
        });
    }

    let payment_id = PaymentId(Uuid::new_v4());
    ledger::post_pair(
        tx,
        &ledger::PostPair {
            payment_id,
            kind: transfer.kind,
            currency: transfer.currency.clone(),
            amount: transfer.amount,
            debit: transfer.debit.clone(),
            credit: transfer.credit.clone(),
            from_user_label: transfer.from_label,
            to_user_label: transfer.to_label,
            dimensions: ledger::Dimensions {
                agent_id: transfer.agent_id,
                member_group_id: None,
                channel: None,
                plan: None,
                note: Some(transfer.scope),
            },
            posted_at: now,
            note_dedup_window_secs: Some(config.ledger_dedup_window_secs),
        },
    )
    .await?;

    Ok(responses::CashMovement {
        payment_id,
        source_account: transfer.credit.account,
        destination_account: transfer.debit.account,
        currency: transfer.currency.clone(),
        amount: transfer.amount,
        replayed: false,
    })
}

fn collect_result(
    movements: Vec<responses::CashMovement>,
) -> responses::CashMoveResult {
    let total_moved = movements
        .iter()
        .filter(|m| !m.replayed)
        .map(|m| m.amount)
        .sum();
    responses::CashMoveResult {
        ok: true,
        movements,
        total_moved,
    }
}

/// Arqueo: sweep an agent's positive balances into an administrator's box.
/// One pair per `(source_account, currency)`.
#[tracing::instrument(skip(request, config, time_source, pool), fields(agent = %request.agent_user_id))]
pub async fn arqueo(
    request: &requests::Arqueo,
    config: &AppConfig,
    time_source: &TimeSource,
    pool: &PgPool,
) -> Result<responses::CashMoveResult, StoreError> {
    let actor = &request.actor;
    if !actor.is_ge_admin() {
        return Err(StoreError::NotAuthorized);
    }

    let agent = read_user(pool, &request.agent_user_id).await?;
    if agent.role != Role::Agent {
        return Err(StoreError::AgentNotFound);
    }
    let executor = read_user(pool, &actor.user_id).await?;

    let sources = request
        .accounts
        .clone()
        .unwrap_or_else(|| ARQUEO_DEFAULT_SOURCES.to_vec());
    for source in &sources {
        if accounts::is_global(*source) {
            return Err(StoreError::InvalidAccount { account: *source });
        }
    }

    let destination = request
        .destination_account
        .unwrap_or(AccountCode::CajaAdmin);
    if destination == AccountCode::CajaCobrador {
        return Err(StoreError::InvalidAccount {
            account: destination,
        });
    }
    let destination_leg = if accounts::is_global(destination) {
        ledger::Leg::global(destination)
    } else {
        ledger::Leg::owned(destination, actor.user_id)
    };

    let window = (request.date_from, request.date_to);
    let min_amount = request.min_amount.unwrap_or(Decimal::ZERO);
    let now = time_source.now();
    let bucket = minute_bucket(now);

    let mut tx = pool.begin().await?;
    let mut movements = Vec::new();

    for source in sources {
        let currencies =
            ledger::currencies_for_owner(&mut *tx, &agent.id, source).await?;
        for currency in currencies {
            let balance = ledger::balance(
                &mut *tx,
                Some(&agent.id),
                source,
                &currency,
                window,
            )
            .await?;
            if balance <= Decimal::ZERO || balance < min_amount {
                continue;
            }

            let scope = format!(
                "arqueo:{}:{}:{}:{}:{}",
                agent.agent_id.map(|a| a.0).unwrap_or_default(),
                source,
                destination,
                currency,
                bucket,
            );
            let movement = post_transfer(
                &mut tx,
                config,
                Transfer {
                    kind: EntryKind::Arqueo,
                    currency: &currency,
                    amount: round2(balance),
                    debit: destination_leg.clone(),
                    credit: ledger::Leg::owned(source, agent.id),
                    from_label: agent.label().to_string(),
                    to_label: executor.label().to_string(),
                    agent_id: agent.agent_id,
                    scope,
                },
                now,
            )
            .await?;
            movements.push(movement);
        }
    }

    tx.commit().await?;
    Ok(collect_result(movements))
}

/// Move the whole of an admin's `CAJA_ADMIN` into the global petty cash.
#[tracing::instrument(skip(request, config, time_source, pool))]
pub async fn petty_deposit(
    request: &requests::PettyDeposit,
    config: &AppConfig,
    time_source: &TimeSource,
    pool: &PgPool,
) -> Result<responses::CashMoveResult, StoreError> {
    let actor = &request.actor;
    let admin_user_id = request.admin_user_id.unwrap_or(actor.user_id);

    // only the box's own admin, or a super-admin, may empty it
    if !(actor.is_super_admin()
        || (actor.role == Role::Admin && actor.user_id == admin_user_id))
    {
        return Err(StoreError::NotAuthorized);
    }

    let admin = read_user(pool, &admin_user_id).await?;
    if admin.role != Role::Admin {
        return Err(StoreError::UserNotFound);
    }

    let now = time_source.now();
    let bucket = minute_bucket(now);

    let mut tx = pool.begin().await?;
    let mut movements = Vec::new();

    let currencies = ledger::currencies_for_owner(
        &mut *tx,
        &admin.id,
        AccountCode::CajaAdmin,
    )
    .await?;
    for currency in currencies {
        let balance = ledger::balance(
            &mut *tx,
            Some(&admin.id),
            AccountCode::CajaAdmin,
            &currency,
            (None, None),
        )
        .await?;
        if balance <= Decimal::ZERO {
            continue;
        }

        let scope =
            format!("admin->chica:{}:{}:{}", admin.id, currency, bucket);
        let movement = post_transfer(
            &mut tx,
            config,
            Transfer {
                kind: EntryKind::PettyDeposit,
                currency: &currency,
                amount: round2(balance),
                // the chica tranche keeps the depositing admin as owner so
                // vault ingress can drain per admin
                debit: ledger::Leg {
                    account: AccountCode::CajaChica,
                    owner: Some(admin.id),
                },
                credit: ledger::Leg::owned(AccountCode::CajaAdmin, admin.id),
                from_label: admin.label().to_string(),
                to_label: accounts::meta(AccountCode::CajaChica)
                    .label
                    .to_string(),
                agent_id: None,
                scope,
            },
            now,
        )
        .await?;
        movements.push(movement);
    }

    tx.commit().await?;
    Ok(collect_result(movements))
}

/// Drain admin-held petty-cash tranches into the grand vault, largest
/// first, until the requested amount (or everything) has moved.
#[tracing::instrument(skip(request, config, time_source, pool))]
pub async fn vault_ingress(
    request: &requests::VaultIngress,
    config: &AppConfig,
    time_source: &TimeSource,
    pool: &PgPool,
) -> Result<responses::CashMoveResult, StoreError> {
    let actor = &request.actor;
    if !actor.is_super_admin() {
        return Err(StoreError::NotAuthorized);
    }

    let currency = request
        .currency
        .clone()
        .unwrap_or_else(|| config.default_currency.clone());
    let now = time_source.now();

    let mut tx = pool.begin().await?;

    let tranches: Vec<(UserId, Decimal)> = ledger::balance_by_owner(
        &mut *tx,
        AccountCode::CajaChica,
        &currency,
        (None, None),
    )
    .await?
    .into_iter()
    .filter_map(|(owner, balance)| {
        owner.filter(|_| balance > Decimal::ZERO).map(|o| (o, balance))
    })
    .collect();

    let available: Decimal = tranches.iter().map(|(_, b)| *b).sum();
    let target = if request.move_all {
        available
    } else {
        let requested = request.amount.ok_or(StoreError::InvalidAmount)?;
        if requested <= Decimal::ZERO {
            return Err(StoreError::InvalidAmount);
        }
        if requested > available {
            return Err(StoreError::InsufficientFunds {
                available,
                requested,
            });
        }
        requested
    };

    let mut remaining = round2(target);
    let mut movements = Vec::new();

    for (admin_id, balance) in tranches {
        if remaining <= Decimal::ZERO {
            break;
        }
        let take = round2(remaining.min(balance));
        let admin = read_user(pool, &admin_id).await?;

        let scope = format!(
            "chica->grande:{}:{}:{}:{}",
            actor.user_id, currency, take, admin_id,
        );
        let movement = post_transfer(
            &mut tx,
            config,
            Transfer {
                kind: EntryKind::VaultIngress,
                currency: &currency,
                amount: take,
                debit: ledger::Leg::global(AccountCode::CajaGrande),
                credit: ledger::Leg {
                    account: AccountCode::CajaChica,
                    owner: Some(admin_id),
                },
                from_label: admin.label().to_string(),
                to_label: accounts::meta(AccountCode::CajaGrande)
                    .label
                    .to_string(),
                agent_id: None,
                scope,
            },
            now,
        )
        .await?;
        remaining = round2(remaining - take);
        movements.push(movement);
    }

    tx.commit().await?;
    Ok(collect_result(movements))
}

/// Move from the grand vault into the super-admin's wallet.
#[tracing::instrument(skip(request, config, time_source, pool))]
pub async fn vault_egress(
    request: &requests::VaultEgress,
    config: &AppConfig,
    time_source: &TimeSource,
    pool: &PgPool,
) -> Result<responses::CashMoveResult, StoreError> {
    let actor = &request.actor;
    if !actor.is_super_admin() {
        return Err(StoreError::NotAuthorized);
    }
    if request.amount <= Decimal::ZERO {
        return Err(StoreError::InvalidAmount);
    }

    let currency = request
        .currency
        .clone()
        .unwrap_or_else(|| config.default_currency.clone());
    let amount = round2(request.amount);
    let now = time_source.now();
    let super_admin = read_user(pool, &actor.user_id).await?;

    let mut tx = pool.begin().await?;

    let available = ledger::balance(
        &mut *tx,
        None,
        AccountCode::CajaGrande,
        &currency,
        (None, None),
    )
    .await?;
    if amount > available {
        return Err(StoreError::InsufficientFunds {
            available,
            requested: amount,
        });
    }

    let scope = format!(
        "grande->superadmin:{}:{}:{}:{}",
        actor.user_id,
        currency,
        amount,
        minute_bucket(now),
    );
    let movement = post_transfer(
        &mut tx,
        config,
        Transfer {
            kind: EntryKind::VaultEgress,
            currency: &currency,
            amount,
            debit: ledger::Leg::owned(
                AccountCode::CajaSuperadmin,
                super_admin.id,
            ),
            credit: ledger::Leg::global(AccountCode::CajaGrande),
            from_label: accounts::meta(AccountCode::CajaGrande)
                .label
                .to_string(),
            to_label: super_admin.label().to_string(),
            agent_id: None,
            scope,
        },
        now,
    )
    .await?;

    tx.commit().await?;
    Ok(collect_result(vec![movement]))
}

/// Pay an agent's commission out of a configurable source account.
#[tracing::instrument(skip(request, config, time_source, pool), fields(agent = %request.agent_user_id))]
pub async fn commission_payout(
    request: &requests::CommissionPayout,
    config: &AppConfig,
    time_source: &TimeSource,
    pool: &PgPool,
) -> Result<responses::CashMoveResult, StoreError> {
    let actor = &request.actor;
    if !actor.is_ge_admin() {
        return Err(StoreError::NotAuthorized);
    }
    if request.amount <= Decimal::ZERO {
        return Err(StoreError::InvalidAmount);
    }

    let agent = read_user(pool, &request.agent_user_id).await?;
    if agent.role != Role::Agent {
        return Err(StoreError::AgentNotFound);
    }

    let source = request.source_account.unwrap_or(match actor.role {
        Role::SuperAdmin => AccountCode::CajaGrande,
        _ => accounts::default_cash_account(actor.role),
    });
    if !PAYOUT_SOURCES.contains(&source) {
        return Err(StoreError::InvalidAccount { account: source });
    }
    let source_owner = match source {
        AccountCode::CajaAdmin => Some(actor.user_id),
        AccountCode::CajaChica if !actor.is_super_admin() => {
            Some(actor.user_id)
        }
        _ => None,
    };

    let currency = request
        .currency
        .clone()
        .unwrap_or_else(|| config.default_currency.clone());
    let amount = round2(request.amount);
    let now = time_source.now();
    let executor = read_user(pool, &actor.user_id).await?;

    let mut tx = pool.begin().await?;

    let available = ledger::balance(
        &mut *tx,
        source_owner.as_ref(),
        source,
        &currency,
        (None, None),
    )
    .await?;
    if amount > available {
        return Err(StoreError::InsufficientFunds {
            available,
            requested: amount,
        });
    }

    let scope = format!(
        "commission_payout:{}:{}:{}:{}:{}",
        agent.id, request.period, source, currency, amount,
    );
    let movement = post_transfer(
        &mut tx,
        config,
        Transfer {
            kind: EntryKind::CommissionPayout,
            currency: &currency,
            amount,
            debit: ledger::Leg::owned(AccountCode::ComisionCobrador, agent.id),
            credit: ledger::Leg {
                account: source,
                owner: source_owner,
            },
            from_label: executor.label().to_string(),
            to_label: agent.label().to_string(),
            agent_id: agent.agent_id,
            scope,
        },
        now,
    )
    .await?;

    tx.commit().await?;
    Ok(collect_result(vec![movement]))
}

/// Stored per-agent commission parameters, zeroed when none were set.
async fn commission_config(
    pool: &PgPool,
    agent_user_id: &UserId,
) -> Result<CommissionConfig, StoreError> {
    let row: Option<(Decimal, i32, Decimal)> = sqlx::query_as(
        r#"
        SELECT base_rate, grace_days, penalty_per_day
        FROM agent_commission_configs
        WHERE agent_user_id = $1
        "#,
    )
    .bind(agent_user_id)
    .fetch_optional(pool)
    .await?;

    let (base, grace, penalty) =
        row.unwrap_or((Decimal::ZERO, 0, Decimal::ZERO));
    Ok(CommissionConfig::normalized(base, grace as i64, penalty))
}

/// Expected / earned / already-paid commission for one agent and period.
#[tracing::instrument(skip(actor, config, time_source, pool))]
pub async fn commission_report(
    actor: &Actor,
    agent_user_id: &UserId,
    period: &Period,
    currency: Option<Currency>,
    config: &AppConfig,
    time_source: &TimeSource,
    pool: &PgPool,
) -> Result<responses::CommissionReport, StoreError> {
    if !(actor.is_ge_admin() || actor.user_id == *agent_user_id) {
        return Err(StoreError::NotAuthorized);
    }

    let agent = read_user(pool, agent_user_id).await?;
    if agent.role != Role::Agent {
        return Err(StoreError::AgentNotFound);
    }
    let agent_id = agent.agent_id.ok_or(StoreError::AgentNotFound)?;

    let currency =
        currency.unwrap_or_else(|| config.default_currency.clone());
    let now = time_source.now();
    let rates = commission_config(pool, &agent.id).await?;

    // earned: the agent's collections allocated to the reporting period,
    // each at the rate after hold-time decay
    #[derive(FromRow)]
    struct CollectedRow {
        amount_applied: Decimal,
        #[sqlx(try_from = "SqlxTs")]
        posted_at: Timestamp,
    }

    let collected = sqlx::query_as::<_, CollectedRow>(
        r#"
        SELECT a.amount_applied, p.posted_at
        FROM allocations a
        JOIN payments p ON a.payment_id = p.id
        WHERE p.agent_user_id = $1
          AND p.status IN ('posted', 'settled')
          AND p.currency = $2
          AND a.period = $3
        "#,
    )
    .bind(agent.id)
    .bind(&currency)
    .bind(period)
    .fetch_all(pool)
    .await?;

    let payments = collected.len() as u32;
    let mut earned = Decimal::ZERO;
    for row in collected {
        let rate = rates.effective_rate(days_between(row.posted_at, now));
        earned += row.amount_applied * rate;
    }
    earned = round2(earned);

    // expected: the agent's active book at the base rate
    let fees: Option<Decimal> = sqlx::query_scalar(
        r#"
        SELECT SUM(CASE WHEN use_ideal THEN ideal_fee ELSE historical_fee END)
        FROM members
        WHERE agent_id = $1 AND cancelled_at IS NULL AND active
        "#,
    )
    .bind(agent_id)
    .fetch_one(pool)
    .await?;
    let expected = round2(fees.unwrap_or(Decimal::ZERO) * rates.base_rate);

    let (window_start, window_end) =
        periods::period_bounds(period, &config.timezone);
    let paid: Option<Decimal> = sqlx::query_scalar(
        r#"
        SELECT SUM(amount) FROM ledger_entries
        WHERE account_code = 'COMISION_COBRADOR'
          AND side = 'debit'
          AND owner_user_id = $1
          AND kind = 'commission_payout'
          AND currency = $2
          AND posted_at >= $3 AND posted_at < $4
        "#,
    )
    .bind(agent.id)
    .bind(&currency)
    .bind(window_start.to_sqlx())
    .bind(window_end.to_sqlx())
    .fetch_one(pool)
    .await?;

    Ok(responses::CommissionReport {
        ok: true,
        agent_user_id: agent.id,
        period: period.clone(),
        currency,
        expected,
        earned,
        paid: paid.unwrap_or(Decimal::ZERO),
        payments,
    })
}

//! Payment posting and listing.
//!
//! `post_payment` is the collection pipeline: validation, allocation,
//! ledger pair, receipt numbering, and the outbox event all commit in one
//! transaction. The only recoverable failure inside it is PDF rendering;
//! the receipt then persists with a flag and no document.

use jiff::Timestamp;
use jiff_sqlx::ToSqlx;
use payloads::{
    AccountCode, AllocationStatus, AllocationStrategy, EntryKind,
    IdempotencyKey, PaymentId, Period,
    requests::{self, NOTES_MAX_LEN},
    responses,
};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    AllocationRow, Member, Payment, ReceiptRow, StoreError, User, debt,
    ledger, read_member,
};
use crate::pdf::{PdfService, ReceiptRender};
use crate::time::TimeSource;
use crate::{AppConfig, allocator, periods};

#[derive(Debug)]
pub struct PostOutcome {
    pub payment: responses::Payment,
    pub receipt: responses::Receipt,
    pub replayed: bool,
}

/// Post a collection end-to-end. See the module docs for the transaction
/// shape; every error except PDF rendering rolls the whole thing back.
#[tracing::instrument(
    skip(request, config, time_source, pdf, pool),
    fields(member_id = %request.member_id, strategy = ?request.strategy)
)]
pub async fn post_payment(
    request: &requests::CreatePayment,
    config: &AppConfig,
    time_source: &TimeSource,
    pdf: &PdfService,
    pool: &PgPool,
) -> Result<PostOutcome, StoreError> {
    let actor = &request.actor;
    if let Some(notes) = &request.notes
        && notes.len() > NOTES_MAX_LEN
    {
        return Err(StoreError::FieldTooLong);
    }

    let member = read_member(pool, &request.member_id).await?;
    if let Some(expected_group) = request.member_legacy_group_id
        && expected_group != member.group_id
    {
        return Err(StoreError::MemberNotFound);
    }
    // Agents only collect inside their own portfolio; admins bypass.
    if !actor.is_ge_admin() && actor.agent_id != Some(member.agent_id) {
        return Err(StoreError::OutOfScope);
    }

    let agent_user = user_for_agent(pool, &member).await?;

    let now = time_source.now();
    let now_period = periods::now_period(time_source, &config.timezone);

    let state = debt::period_state(
        pool,
        &member,
        None,
        None,
        false,
        &now_period,
        &config.timezone,
    )
    .await?;

    if state.totals.balance <= Decimal::ZERO {
        return Err(StoreError::ClientUpToDate);
    }
    if state.totals.arrears_months >= config.arrears_cutoff_months {
        return Err(StoreError::ArrearsCutoff {
            months: state.totals.arrears_months,
            cutoff: config.arrears_cutoff_months,
        });
    }

    let final_amount = match request.amount {
        Some(amount) => amount,
        None => match request.strategy {
            AllocationStrategy::Auto => state.totals.balance,
            AllocationStrategy::Manual => member.effective_fee(),
        },
    };
    if final_amount <= Decimal::ZERO {
        return Err(StoreError::InvalidAmount);
    }

    let idempotency_key = request
        .idempotency_key
        .as_ref()
        .map(|k| k.normalized())
        .unwrap_or_else(|| IdempotencyKey(Uuid::new_v4().to_string()));

    if let Some(prior) =
        find_by_idempotency_key(pool, &idempotency_key).await?
    {
        return Ok(prior);
    }

    let plan = match request.strategy {
        AllocationStrategy::Auto => {
            allocator::fifo_until_now(&state.rows, &now_period, final_amount)
        }
        AllocationStrategy::Manual => {
            let breakdown = request.breakdown.as_deref().unwrap_or_default();
            allocator::manual(
                &state.rows,
                &now_period,
                breakdown,
                final_amount,
            )?
        }
    };
    if plan.allocations.is_empty() || plan.leftover > Decimal::ZERO {
        return Err(StoreError::NothingToAllocate {
            leftover: plan.leftover,
        });
    }

    let posted_at = request.collected_at.unwrap_or(now);

    let mut tx = pool.begin().await?;

    // Serializes concurrent posts for this member; the re-check below then
    // sees any allocation that beat us here.
    sqlx::query("SELECT id FROM members WHERE id = $1 FOR UPDATE")
        .bind(member.id)
        .execute(&mut *tx)
        .await?;

    let paid_now = debt::paid_by_period(&mut *tx, &member.id).await?;
    let fee = member.effective_fee();
    let mut statuses = Vec::with_capacity(plan.allocations.len());
    for alloc in &plan.allocations {
        let paid = paid_now
            .get(&alloc.period)
            .copied()
            .unwrap_or(Decimal::ZERO);
        let balance = (fee - paid).max(Decimal::ZERO);
        if alloc.amount > balance {
            return Err(StoreError::RaceConditionOverpay {
                period: alloc.period.clone(),
            });
        }
        statuses.push(if paid + alloc.amount >= fee {
            AllocationStatus::Paid
        } else {
            AllocationStatus::Partial
        });
    }

    let insert = sqlx::query_as::<_, Payment>(
        r#"
        INSERT INTO payments (
            kind, status, member_id, group_id, agent_id, agent_user_id,
            amount, currency, method, channel, notes, idempotency_key,
            external_ref, intended_period, meta, created_at
        )
        VALUES ('payment', 'draft', $1, $2, $3, $4, $5, $6, $7, $8, $9,
                $10, $11, $12, $13, $14)
        RETURNING *
        "#,
    )
    .bind(member.id)
    .bind(member.group_id)
    .bind(member.agent_id)
    .bind(agent_user.id)
    .bind(final_amount)
    .bind(&config.default_currency)
    .bind(request.method)
    .bind(&request.channel)
    .bind(&request.notes)
    .bind(&idempotency_key.0)
    .bind(&request.external_ref)
    .bind(request.intended_period.as_ref().map(|p| p.as_str()))
    .bind(request.meta.as_ref().map(sqlx::types::Json))
    .bind(now.to_sqlx())
    .fetch_one(&mut *tx)
    .await;

    let draft = match insert {
        Ok(draft) => draft,
        // A concurrent request with the same key won the insert; hand back
        // its payment with replay semantics.
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            drop(tx);
            return find_by_idempotency_key(pool, &idempotency_key)
                .await?
                .ok_or(StoreError::PaymentNotFound);
        }
        Err(e) => return Err(e.into()),
    };

    let payment = sqlx::query_as::<_, Payment>(
        r#"
        UPDATE payments SET status = 'posted', posted_at = $1
        WHERE id = $2
        RETURNING *
        "#,
    )
    .bind(posted_at.to_sqlx())
    .bind(draft.id)
    .fetch_one(&mut *tx)
    .await?;

    let mut allocations = Vec::with_capacity(plan.allocations.len());
    for (alloc, status) in plan.allocations.iter().zip(statuses) {
        sqlx::query(
            r#"
            INSERT INTO allocations
                (payment_id, member_id, period, amount_applied, status_after)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(payment.id)
        .bind(member.id)
        .bind(&alloc.period)
        .bind(alloc.amount)
        .bind(status)
        .execute(&mut *tx)
        .await?;
        allocations.push(payloads::Allocation {
            period: alloc.period.clone(),
            amount_applied: alloc.amount,
            status_after: status,
        });
    }

    ledger::post_pair(
        &mut tx,
        &ledger::PostPair {
            payment_id: payment.id,
            kind: EntryKind::Payment,
            currency: payment.currency.clone(),
            amount: payment.amount,
            debit: ledger::Leg::owned(
                AccountCode::CajaCobrador,
                agent_user.id,
            ),
            credit: ledger::Leg::global(AccountCode::IngresosCuotas),
            from_user_label: member.full_name.clone(),
            to_user_label: agent_user.label().to_string(),
            dimensions: ledger::Dimensions {
                agent_id: Some(member.agent_id),
                member_group_id: Some(member.group_id),
                channel: request.channel.clone(),
                plan: None,
                note: request.notes.clone(),
            },
            posted_at,
            note_dedup_window_secs: None,
        },
    )
    .await?;

    let receipt = issue_receipt(
        &mut tx,
        config,
        pdf,
        &payment,
        allocations.clone(),
        posted_at,
        now,
    )
    .await?;

    let periods_applied: Vec<&Period> =
        allocations.iter().map(|a| &a.period).collect();
    emit_outbox(
        &mut tx,
        "payment.posted",
        serde_json::json!({
            "payment_id": payment.id,
            "group_id": payment.group_id,
            "member_id": payment.member_id,
            "amount": payment.amount,
            "currency": payment.currency,
            "method": payment.method,
            "channel": payment.channel,
            "posted_at": posted_at.to_string(),
            "agent_id": payment.agent_id,
            "agent_user_id": payment.agent_user_id,
            "external_ref": payment.external_ref,
            "periods_applied": periods_applied,
            "arrears_months_at_payment": state.totals.arrears_months,
        }),
        now,
    )
    .await?;

    tx.commit().await?;

    Ok(PostOutcome {
        payment: payment.into_response(allocations),
        receipt,
        replayed: false,
    })
}

/// The user wearing the member's assigned agent number.
async fn user_for_agent(
    pool: &PgPool,
    member: &Member,
) -> Result<User, StoreError> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE agent_id = $1")
        .bind(member.agent_id)
        .fetch_one(pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => StoreError::AgentNotFound,
            e => StoreError::Database(e),
        })
}

/// Allocate the per-year serial, render the PDF (best effort), and persist
/// the receipt.
async fn issue_receipt(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    config: &AppConfig,
    pdf: &PdfService,
    payment: &Payment,
    allocations: Vec<payloads::Allocation>,
    posted_at: Timestamp,
    now: Timestamp,
) -> Result<responses::Receipt, StoreError> {
    let year = periods::period_at(posted_at, &config.timezone).year();

    let serial: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO counters (key, value) VALUES ($1, 1)
        ON CONFLICT (key) DO UPDATE SET value = counters.value + 1
        RETURNING value
        "#,
    )
    .bind(format!("receipt:{year}"))
    .fetch_one(&mut **tx)
    .await?;

    let qr_payload = format!("recibo:{year}-{serial:06}:{}", payment.id);

    let payment_body = payment.clone().into_response(allocations);
    let render = ReceiptRender {
        payment_id: payment.id,
        serial_number: serial,
        year,
        qr_payload: &qr_payload,
        payment: &payment_body,
    };
    let (pdf_uri, pdf_failed) = match pdf.render_receipt(&render).await {
        Ok(uri) => (Some(uri), false),
        Err(e) => {
            // the payment stays posted; only the document is missing
            crate::telemetry::log_error(e);
            (None, true)
        }
    };

    let receipt = sqlx::query_as::<_, ReceiptRow>(
        r#"
        INSERT INTO receipts
            (payment_id, serial_number, year, qr_payload, pdf_uri,
             pdf_failed, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(payment.id)
    .bind(serial)
    .bind(year)
    .bind(&qr_payload)
    .bind(&pdf_uri)
    .bind(pdf_failed)
    .bind(now.to_sqlx())
    .fetch_one(&mut **tx)
    .await?;

    Ok(receipt.into())
}

pub async fn emit_outbox(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    topic: &str,
    payload: serde_json::Value,
    now: Timestamp,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO outbox_events (topic, payload, created_at)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(topic)
    .bind(sqlx::types::Json(payload))
    .bind(now.to_sqlx())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// The prior payment for a key, with its receipt, marked as a replay.
pub async fn find_by_idempotency_key(
    pool: &PgPool,
    key: &IdempotencyKey,
) -> Result<Option<PostOutcome>, StoreError> {
    let payment = sqlx::query_as::<_, Payment>(
        "SELECT * FROM payments WHERE idempotency_key = $1",
    )
    .bind(&key.0)
    .fetch_optional(pool)
    .await?;

    let Some(payment) = payment else {
        return Ok(None);
    };

    let receipt = sqlx::query_as::<_, ReceiptRow>(
        "SELECT * FROM receipts WHERE payment_id = $1",
    )
    .bind(payment.id)
    .fetch_one(pool)
    .await?;

    let allocations = allocations_for(pool, &[payment.id]).await?;

    Ok(Some(PostOutcome {
        payment: payment.into_response(
            allocations.into_iter().map(Into::into).collect(),
        ),
        receipt: receipt.into(),
        replayed: true,
    }))
}

async fn allocations_for(
    pool: &PgPool,
    payment_ids: &[PaymentId],
) -> Result<Vec<AllocationRow>, StoreError> {
    let rows = sqlx::query_as::<_, AllocationRow>(
        r#"
        SELECT * FROM allocations
        WHERE payment_id = ANY($1)
        ORDER BY period
        "#,
    )
    .bind(payment_ids)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

const SORTABLE: &[(requests::PaymentSortKey, &str)] = &[
    (requests::PaymentSortKey::PostedAt, "p.posted_at"),
    (requests::PaymentSortKey::CreatedAt, "p.created_at"),
    (requests::PaymentSortKey::Amount, "p.amount"),
    (requests::PaymentSortKey::GroupId, "p.group_id"),
    (requests::PaymentSortKey::Method, "p.method"),
    (requests::PaymentSortKey::Status, "p.status"),
];

/// List payments visible to the actor. Agents see their own collections;
/// admins and super-admins see everything.
pub async fn list_payments(
    query: &requests::ListPayments,
    pool: &PgPool,
) -> Result<Vec<responses::Payment>, StoreError> {
    let actor = query.actor();
    let agent_scope = if actor.is_ge_admin() {
        None
    } else {
        Some(actor.agent_id.ok_or(StoreError::AgentNotFound)?)
    };

    let sort_column = SORTABLE
        .iter()
        .find(|(key, _)| {
            *key == query.sort.unwrap_or(requests::PaymentSortKey::PostedAt)
        })
        .map(|(_, column)| *column)
        .expect("whitelist covers every sort key");
    let direction = match query.dir {
        Some(requests::SortDir::Asc) => "ASC",
        _ => "DESC",
    };
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let offset = query.offset.unwrap_or(0).max(0);

    // numeric free text doubles as a group id probe
    let q_raw = query.q.as_deref().map(str::trim);
    let q_group: Option<i64> = q_raw.and_then(|q| q.parse().ok());
    let q_like = q_raw.map(|q| format!("%{q}%"));

    let sql = format!(
        r#"
        SELECT p.* FROM payments p
        JOIN members m ON p.member_id = m.id
        LEFT JOIN receipts r ON r.payment_id = p.id
        WHERE ($1::bigint IS NULL OR p.agent_id = $1)
          AND ($2::timestamptz IS NULL OR p.posted_at >= $2)
          AND ($3::timestamptz IS NULL OR p.posted_at <= $3)
          AND ($4::uuid IS NULL OR p.member_id = $4)
          AND ($5::payment_method IS NULL OR p.method = $5)
          AND ($6::payment_status IS NULL OR p.status = $6)
          AND ($7::text IS NULL
               OR m.full_name ILIKE $7
               OR p.external_ref ILIKE $7
               OR r.serial_number::text = $8
               OR p.group_id = $9)
        ORDER BY {sort_column} {direction}
        LIMIT $10 OFFSET $11
        "#
    );

    let rows = sqlx::query_as::<_, Payment>(&sql)
        .bind(agent_scope)
        .bind(query.date_from.map(|t| t.to_sqlx()))
        .bind(query.date_to.map(|t| t.to_sqlx()))
        .bind(query.member_id)
        .bind(query.method)
        .bind(query.status)
        .bind(&q_like)
        .bind(q_raw)
        .bind(q_group)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

    let ids: Vec<PaymentId> = rows.iter().map(|p| p.id).collect();
    let mut allocations_by_payment: std::collections::HashMap<
        PaymentId,
        Vec<payloads::Allocation>,
    > = std::collections::HashMap::new();
    for row in allocations_for(pool, &ids).await? {
        allocations_by_payment
            .entry(row.payment_id)
            .or_default()
            .push(row.into());
    }

    Ok(rows
        .into_iter()
        .map(|payment| {
            let allocations = allocations_by_payment
                .remove(&payment.id)
                .unwrap_or_default();
            payment.into_response(allocations)
        })
        .collect())
}

use actix_web::{HttpResponse, get, post, web};
use payloads::{MemberId, requests, responses};
use sqlx::PgPool;

use super::ApiError;
use crate::pricing::PricingClient;
use crate::store::StoreError;
use crate::time::TimeSource;
use crate::{AppConfig, periods, store};

#[tracing::instrument(skip(query, pool, time_source, config))]
#[get("/members/{member_id}/debt")]
pub async fn member_debt(
    path: web::Path<MemberId>,
    query: web::Query<requests::DebtQuery>,
    pool: web::Data<PgPool>,
    time_source: web::Data<TimeSource>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, ApiError> {
    let member_id = path.into_inner();
    let member = store::read_member(&pool, &member_id).await?;
    let now_period = periods::now_period(&time_source, &config.timezone);

    let state = store::debt::period_state(
        pool.get_ref(),
        &member,
        query.from.clone(),
        query.to.clone(),
        query.include_future.unwrap_or(false),
        &now_period,
        &config.timezone,
    )
    .await?;

    Ok(HttpResponse::Ok().json(responses::DebtState {
        ok: true,
        member_id,
        periods: state.rows,
        grand_totals: state.totals,
        summary: responses::DebtSummary {
            now_period: state.now_period,
        },
    }))
}

/// Cancel a member. Cancelling the titular promotes the oldest active
/// dependent; group pricing is recomputed afterwards.
#[tracing::instrument(skip(details, pool, time_source, pricing))]
#[post("/members/{member_id}/cancel")]
pub async fn cancel_member(
    path: web::Path<MemberId>,
    details: web::Json<requests::CancelMember>,
    pool: web::Data<PgPool>,
    time_source: web::Data<TimeSource>,
    pricing: web::Data<PricingClient>,
) -> Result<HttpResponse, ApiError> {
    if !details.actor.is_ge_admin() {
        return Err(StoreError::NotAuthorized.into());
    }

    let member_id = path.into_inner();
    let outcome = store::cancel_member(
        &member_id,
        &time_source,
        &pricing,
        &pool,
    )
    .await?;

    Ok(HttpResponse::Ok().json(responses::MemberCancelled {
        ok: true,
        member_id,
        promoted_member_id: outcome.promoted.map(|m| m.id),
    }))
}

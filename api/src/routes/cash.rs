use actix_web::{HttpResponse, get, post, web};
use payloads::{Actor, requests};
use sqlx::PgPool;

use super::ApiError;
use crate::time::TimeSource;
use crate::{AppConfig, store};

#[tracing::instrument(skip(details, pool, time_source, config))]
#[post("/cash/arqueo")]
pub async fn arqueo(
    details: web::Json<requests::Arqueo>,
    pool: web::Data<PgPool>,
    time_source: web::Data<TimeSource>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, ApiError> {
    let result =
        store::cash::arqueo(&details, &config, &time_source, &pool).await?;
    Ok(HttpResponse::Ok().json(result))
}

#[tracing::instrument(skip(details, pool, time_source, config))]
#[post("/cash/petty-deposit")]
pub async fn petty_deposit(
    details: web::Json<requests::PettyDeposit>,
    pool: web::Data<PgPool>,
    time_source: web::Data<TimeSource>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, ApiError> {
    let result =
        store::cash::petty_deposit(&details, &config, &time_source, &pool)
            .await?;
    Ok(HttpResponse::Ok().json(result))
}

#[tracing::instrument(skip(details, pool, time_source, config))]
#[post("/cash/vault-ingress")]
pub async fn vault_ingress(
    details: web::Json<requests::VaultIngress>,
    pool: web::Data<PgPool>,
    time_source: web::Data<TimeSource>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, ApiError> {
    let result =
        store::cash::vault_ingress(&details, &config, &time_source, &pool)
            .await?;
    Ok(HttpResponse::Ok().json(result))
}

#[tracing::instrument(skip(details, pool, time_source, config))]
#[post("/cash/vault-egress")]
pub async fn vault_egress(
    details: web::Json<requests::VaultEgress>,
    pool: web::Data<PgPool>,
    time_source: web::Data<TimeSource>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, ApiError> {
    let result =
        store::cash::vault_egress(&details, &config, &time_source, &pool)
            .await?;
    Ok(HttpResponse::Ok().json(result))
}

#[tracing::instrument(skip(details, pool, time_source, config))]
#[post("/cash/commission-payout")]
pub async fn commission_payout(
    details: web::Json<requests::CommissionPayout>,
    pool: web::Data<PgPool>,
    time_source: web::Data<TimeSource>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, ApiError> {
    let result = store::cash::commission_payout(
        &details,
        &config,
        &time_source,
        &pool,
    )
    .await?;
    Ok(HttpResponse::Ok().json(result))
}

#[tracing::instrument(skip(query, pool, time_source, config))]
#[get("/cash/commission")]
pub async fn commission_report(
    query: web::Query<requests::CommissionReportQuery>,
    pool: web::Data<PgPool>,
    time_source: web::Data<TimeSource>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, ApiError> {
    let actor = Actor {
        user_id: query.actor_user_id,
        role: query.actor_role,
        agent_id: query.actor_agent_id,
    };
    let report = store::cash::commission_report(
        &actor,
        &query.agent_user_id,
        &query.period,
        query.currency.clone(),
        &config,
        &time_source,
        &pool,
    )
    .await?;
    Ok(HttpResponse::Ok().json(report))
}

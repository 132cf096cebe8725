use actix_web::{HttpResponse, get, web};
use payloads::{Actor, requests};
use sqlx::PgPool;

use super::ApiError;
use crate::store;

#[tracing::instrument(skip(query, pool))]
#[get("/cash/boxes")]
pub async fn boxes(
    query: web::Query<requests::BoxesQuery>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let list = store::queries::list_boxes_by_user(&query, &pool).await?;
    Ok(HttpResponse::Ok().json(list))
}

/// `target` is a user id, or `GLOBAL:<account>` for the pooled accounts.
#[tracing::instrument(skip(query, pool))]
#[get("/cash/boxes/{target}/detail")]
pub async fn box_detail(
    path: web::Path<String>,
    query: web::Query<requests::MovementDetailQuery>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let actor = Actor {
        user_id: query.actor_user_id,
        role: query.actor_role,
        agent_id: query.actor_agent_id,
    };
    let detail = store::queries::movement_detail(
        &path.into_inner(),
        &actor,
        &query,
        &pool,
    )
    .await?;
    Ok(HttpResponse::Ok().json(detail))
}

#[tracing::instrument(skip(query, pool))]
#[get("/ledger/entries")]
pub async fn ledger_entries(
    query: web::Query<requests::LedgerEntriesQuery>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let tail = store::queries::ledger_tail(&query, &pool).await?;
    Ok(HttpResponse::Ok().json(tail))
}

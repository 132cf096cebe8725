use actix_web::{HttpResponse, get, post, web};
use payloads::{requests, responses};
use sqlx::PgPool;

use super::ApiError;
use crate::pdf::PdfService;
use crate::time::TimeSource;
use crate::{AppConfig, store};

/// Post a collection. 201 on first success, 200 on an idempotency-key
/// replay; the replayed body is identical apart from the hint.
#[tracing::instrument(skip(details, pool, time_source, config, pdf))]
#[post("/payments")]
pub async fn create_payment(
    details: web::Json<requests::CreatePayment>,
    pool: web::Data<PgPool>,
    time_source: web::Data<TimeSource>,
    config: web::Data<AppConfig>,
    pdf: web::Data<PdfService>,
) -> Result<HttpResponse, ApiError> {
    let outcome = store::payments::post_payment(
        &details,
        &config,
        &time_source,
        &pdf,
        &pool,
    )
    .await?;

    let body = responses::PaymentPosted {
        ok: true,
        replayed: outcome.replayed,
        payment: outcome.payment,
        receipt: outcome.receipt,
    };
    let response = if outcome.replayed {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::Created().json(body)
    };
    Ok(response)
}

#[tracing::instrument(skip(query, pool))]
#[get("/payments")]
pub async fn list_payments(
    query: web::Query<requests::ListPayments>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let payments = store::payments::list_payments(&query, &pool).await?;
    Ok(HttpResponse::Ok().json(responses::PaymentList {
        ok: true,
        payments,
    }))
}

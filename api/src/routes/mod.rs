pub mod cash;
pub mod debt;
pub mod ledger;
pub mod payments;

use actix_web::{
    HttpResponse, Responder, ResponseError, body::BoxBody,
    dev::HttpServiceFactory, get, http::StatusCode, web,
};
use payloads::responses::ErrorBody;

use crate::store::StoreError;

pub fn api_services() -> impl HttpServiceFactory {
    web::scope("/api")
        .service(health_check)
        .service(payments::create_payment)
        .service(payments::list_payments)
        .service(debt::member_debt)
        .service(debt::cancel_member)
        .service(cash::arqueo)
        .service(cash::petty_deposit)
        .service(cash::vault_ingress)
        .service(cash::vault_egress)
        .service(cash::commission_payout)
        .service(cash::commission_report)
        .service(ledger::boxes)
        .service(ledger::box_detail)
        .service(ledger::ledger_entries)
}

#[get("/health_check")]
pub async fn health_check() -> impl Responder {
    HttpResponse::Ok().body("healthy")
}

/// Store errors annotated with the HTTP class they surface as. Every
/// response body is the structured `{ok:false, code, message, context?}`
/// form.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Bad request")]
    BadRequest(#[source] StoreError),
    #[error("Forbidden")]
    Forbidden(#[source] StoreError),
    #[error("Not found")]
    NotFound(#[source] StoreError),
    #[error("Conflict")]
    Conflict(#[source] StoreError),
    #[error("Something went wrong")]
    Unexpected(#[source] StoreError),
}

impl ApiError {
    fn store_error(&self) -> &StoreError {
        match self {
            Self::BadRequest(e)
            | Self::Forbidden(e)
            | Self::NotFound(e)
            | Self::Conflict(e)
            | Self::Unexpected(e) => e,
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse<BoxBody> {
        let store_error = self.store_error();
        // internals stay out of 500 bodies; the chain goes to the log
        let message = match self {
            Self::Unexpected(_) => {
                crate::telemetry::log_error(anyhow::anyhow!(
                    "{:#}",
                    store_error
                ));
                self.to_string()
            }
            _ => store_error.to_string(),
        };
        HttpResponse::build(self.status_code()).json(ErrorBody {
            ok: false,
            code: store_error.code().to_string(),
            message,
            context: store_error.context(),
        })
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidAmount
            | StoreError::InvalidPeriod { .. }
            | StoreError::InvalidBreakdown
            | StoreError::InvalidAccount { .. }
            | StoreError::FieldTooLong
            | StoreError::CurrencyMismatch => ApiError::BadRequest(e),

            StoreError::OutOfScope | StoreError::NotAuthorized => {
                ApiError::Forbidden(e)
            }

            StoreError::MemberNotFound
            | StoreError::AgentNotFound
            | StoreError::UserNotFound
            | StoreError::PaymentNotFound => ApiError::NotFound(e),

            StoreError::ClientUpToDate
            | StoreError::ArrearsCutoff { .. }
            | StoreError::PeriodInFuture { .. }
            | StoreError::OverpayPeriod { .. }
            | StoreError::BreakdownExceedsAmount { .. }
            | StoreError::NothingToAllocate { .. }
            | StoreError::InsufficientFunds { .. }
            | StoreError::RaceConditionOverpay { .. }
            | StoreError::DuplicatePosting { .. } => ApiError::Conflict(e),

            StoreError::NotUnique(_)
            | StoreError::Database(_)
            | StoreError::UnexpectedError(_) => ApiError::Unexpected(e),
        }
    }
}

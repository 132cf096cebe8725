use reqwest::StatusCode;
use serde::Serialize;

use crate::{MemberId, requests, responses};

type ReqwestResult = Result<reqwest::Response, reqwest::Error>;

/// A typed client for the collections API. Used by integration tests and
/// by operator tooling; there are no sessions, every call carries its
/// actor explicitly.
pub struct ApiClient {
    pub address: String,
    pub inner_client: reqwest::Client,
}

/// Helper methods for http actions
impl ApiClient {
    fn format_url(&self, path: &str) -> String {
        format!("{}/api/{path}", &self.address)
    }

    async fn post(&self, path: &str, body: &impl Serialize) -> ReqwestResult {
        self.inner_client
            .post(self.format_url(path))
            .json(body)
            .send()
            .await
    }

    async fn get(&self, path: &str, query: &impl Serialize) -> ReqwestResult {
        self.inner_client
            .get(self.format_url(path))
            .query(query)
            .send()
            .await
    }

    async fn empty_get(&self, path: &str) -> ReqwestResult {
        self.inner_client.get(self.format_url(path)).send().await
    }
}

/// Methods on the API
impl ApiClient {
    pub async fn health_check(&self) -> Result<(), ClientError> {
        let response = self.empty_get("health_check").await?;
        ok_empty(response).await
    }

    /// Post a collection. Returns the body plus whether the server replied
    /// 201 (created) or 200 (idempotent replay).
    pub async fn post_payment(
        &self,
        details: &requests::CreatePayment,
    ) -> Result<responses::PaymentPosted, ClientError> {
        let response = self.post("payments", details).await?;
        ok_body(response).await
    }

    pub async fn list_payments(
        &self,
        query: &requests::ListPayments,
    ) -> Result<responses::PaymentList, ClientError> {
        let response = self.get("payments", query).await?;
        ok_body(response).await
    }

    pub async fn member_debt(
        &self,
        member_id: &MemberId,
        query: &requests::DebtQuery,
    ) -> Result<responses::DebtState, ClientError> {
        let response =
            self.get(&format!("members/{member_id}/debt"), query).await?;
        ok_body(response).await
    }

    pub async fn cancel_member(
        &self,
        member_id: &MemberId,
        details: &requests::CancelMember,
    ) -> Result<responses::MemberCancelled, ClientError> {
        let response = self
            .post(&format!("members/{member_id}/cancel"), details)
            .await?;
        ok_body(response).await
    }

    pub async fn arqueo(
        &self,
        details: &requests::Arqueo,
    ) -> Result<responses::CashMoveResult, ClientError> {
        let response = self.post("cash/arqueo", details).await?;
        ok_body(response).await
    }

    pub async fn petty_deposit(
        &self,
        details: &requests::PettyDeposit,
    ) -> Result<responses::CashMoveResult, ClientError> {
        let response = self.post("cash/petty-deposit", details).await?;
        ok_body(response).await
    }

    pub async fn vault_ingress(
        &self,
        details: &requests::VaultIngress,
    ) -> Result<responses::CashMoveResult, ClientError> {
        let response = self.post("cash/vault-ingress", details).await?;
        ok_body(response).await
    }

    pub async fn vault_egress(
        &self,
        details: &requests::VaultEgress,
    ) -> Result<responses::CashMoveResult, ClientError> {
        let response = self.post("cash/vault-egress", details).await?;
        ok_body(response).await
    }

    pub async fn commission_payout(
        &self,
        details: &requests::CommissionPayout,
    ) -> Result<responses::CashMoveResult, ClientError> {
        let response = self.post("cash/commission-payout", details).await?;
        ok_body(response).await
    }

    pub async fn commission_report(
        &self,
        query: &requests::CommissionReportQuery,
    ) -> Result<responses::CommissionReport, ClientError> {
        let response = self.get("cash/commission", query).await?;
        ok_body(response).await
    }

    pub async fn boxes(
        &self,
        query: &requests::BoxesQuery,
    ) -> Result<responses::BoxesList, ClientError> {
        let response = self.get("cash/boxes", query).await?;
        ok_body(response).await
    }

    /// `target` is a user id or `GLOBAL:<account>`.
    pub async fn box_detail(
        &self,
        target: &str,
        query: &requests::MovementDetailQuery,
    ) -> Result<responses::MovementDetail, ClientError> {
        let response =
            self.get(&format!("cash/boxes/{target}/detail"), query).await?;
        ok_body(response).await
    }

    pub async fn ledger_entries(
        &self,
        query: &requests::LedgerEntriesQuery,
    ) -> Result<responses::LedgerTail, ClientError> {
        let response = self.get("ledger/entries", query).await?;
        ok_body(response).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// An unhandled API error to display, containing response text.
    #[error("{1}")]
    ApiError(StatusCode, String),
    #[error("Network error. Please check your connection.")]
    Network(#[from] reqwest::Error),
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::ApiError(status, _) => Some(*status),
            Self::Network(_) => None,
        }
    }

    /// The machine code out of a structured `{ok:false, code, ...}` body.
    pub fn code(&self) -> Option<String> {
        match self {
            Self::ApiError(_, body) => {
                serde_json::from_str::<responses::ErrorBody>(body)
                    .ok()
                    .map(|b| b.code)
            }
            Self::Network(_) => None,
        }
    }
}

/// Deserialize a successful request into the desired type, or return an
/// appropriate error.
pub async fn ok_body<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ClientError> {
    if !response.status().is_success() {
        return Err(ClientError::ApiError(
            response.status(),
            response.text().await?,
        ));
    }
    Ok(response.json::<T>().await?)
}

/// Check that an empty response is OK, returning a ClientError if not.
pub async fn ok_empty(response: reqwest::Response) -> Result<(), ClientError> {
    if !response.status().is_success() {
        return Err(ClientError::ApiError(
            response.status(),
            response.text().await?,
        ));
    }
    Ok(())
}

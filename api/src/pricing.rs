//! Client for the external pricing service.
//!
//! Ideal fees are computed elsewhere from age / cremation / group-size
//! rules and persisted onto the member rows. This client only asks for a
//! recompute after a member mutation commits; it never runs inside the
//! mutating transaction.

#[cfg(not(feature = "mock-pricing"))]
use anyhow::Context;
use anyhow::Result;
use payloads::GroupId;
#[cfg(not(feature = "mock-pricing"))]
use serde::Serialize;

pub struct PricingClient {
    #[cfg(not(feature = "mock-pricing"))]
    client: reqwest::Client,
    service_url: String,
}

#[cfg(not(feature = "mock-pricing"))]
#[derive(Debug, Serialize)]
struct RecomputeRequest {
    group_id: GroupId,
}

impl PricingClient {
    #[cfg(not(feature = "mock-pricing"))]
    pub fn new(service_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            service_url,
        }
    }

    #[cfg(feature = "mock-pricing")]
    pub fn new(service_url: String) -> Self {
        Self { service_url }
    }

    #[tracing::instrument(skip(self))]
    #[cfg(not(feature = "mock-pricing"))]
    pub async fn recompute_group_pricing(
        &self,
        group_id: GroupId,
    ) -> Result<()> {
        self.client
            .post(format!("{}/recompute", self.service_url))
            .json(&RecomputeRequest { group_id })
            .send()
            .await
            .context("Failed to reach the pricing service")?
            .error_for_status()
            .context("Pricing service rejected the recompute")?;

        tracing::info!("Group pricing recompute requested");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    #[cfg(feature = "mock-pricing")]
    pub async fn recompute_group_pricing(
        &self,
        group_id: GroupId,
    ) -> Result<()> {
        tracing::info!(
            "Test mode: mock pricing recompute for group {} against {}",
            group_id,
            self.service_url
        );
        Ok(())
    }
}

//! Receipt-PDF rendering adapter.
//!
//! Rendering itself is a separate service; this client hands it the receipt
//! data and stores whatever URI comes back. Callers treat failure as
//! recoverable: the receipt keeps its serial and is flagged, the payment
//! stays posted.

#[cfg(not(feature = "mock-pdf"))]
use anyhow::Context;
use anyhow::Result;
use payloads::{PaymentId, responses};
#[cfg(not(feature = "mock-pdf"))]
use serde::Deserialize;
use serde::Serialize;

pub struct PdfService {
    #[cfg(not(feature = "mock-pdf"))]
    client: reqwest::Client,
    backend_url: String,
}

#[derive(Debug, Serialize)]
pub struct ReceiptRender<'a> {
    pub payment_id: PaymentId,
    pub serial_number: i64,
    pub year: i16,
    pub qr_payload: &'a str,
    pub payment: &'a responses::Payment,
}

#[cfg(not(feature = "mock-pdf"))]
#[derive(Debug, Deserialize)]
struct RenderResponse {
    uri: String,
}

impl PdfService {
    #[cfg(not(feature = "mock-pdf"))]
    pub fn new(backend_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            backend_url,
        }
    }

    #[cfg(feature = "mock-pdf")]
    pub fn new(backend_url: String) -> Self {
        Self { backend_url }
    }

    /// Render a receipt and return the URI of the stored document.
    #[tracing::instrument(skip(self, render), fields(payment_id = %render.payment_id))]
    #[cfg(not(feature = "mock-pdf"))]
    pub async fn render_receipt(
        &self,
        render: &ReceiptRender<'_>,
    ) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/render/receipt", self.backend_url))
            .json(render)
            .send()
            .await
            .context("Failed to reach the PDF renderer")?
            .error_for_status()
            .context("PDF renderer rejected the receipt")?;

        let body: RenderResponse = response
            .json()
            .await
            .context("PDF renderer returned an invalid body")?;

        tracing::info!(uri = %body.uri, "Receipt rendered");
        Ok(body.uri)
    }

    #[tracing::instrument(skip(self, render), fields(payment_id = %render.payment_id))]
    #[cfg(feature = "mock-pdf")]
    pub async fn render_receipt(
        &self,
        render: &ReceiptRender<'_>,
    ) -> Result<String> {
        tracing::info!(
            "Test mode: mock receipt {}-{:06} rendered against {}",
            render.year,
            render.serial_number,
            self.backend_url
        );
        Ok(format!(
            "mock://receipts/{}/{:06}.pdf",
            render.year, render.serial_number
        ))
    }
}

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{DeliveryContext, DeliveryError, DeliveryModule};
use crate::db;
use crate::models::SubmissionStatus;

/// POSTs the submission payload as JSON to `submission.destination`.
pub struct WebhookDelivery {
    client: reqwest::Client,
}

impl WebhookDelivery {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DeliveryModule for WebhookDelivery {
    fn id(&self) -> &str {
        "webhook"
    }

    async fn attempt_delivery(&self, ctx: &DeliveryContext<'_>) -> Result<(), DeliveryError> {
        let submission = ctx.submission;
        let url = submission.destination.as_str();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(DeliveryError::from(format!(
                "Destination is not an http(s) URL: {url}"
            )));
        }

        let body = json!({
            "submission_id": submission.id,
            "payload": &submission.payload,
            "attempt": ctx.attempt,
            "created_at": submission.created_at,
        });

        let resp = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("Idempotency-Key", submission.id.to_string())
            .json(&body)
            .send()
            .await
            .map_err(|e| DeliveryError::from(format!("Webhook request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let resp_body = resp
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(512)
                .collect::<String>();
            return Err(DeliveryError::from(format!(
                "Destination responded with {}: {resp_body}",
                status.as_u16()
            )));
        }

        db::submissions::update_status(ctx.pool, submission.id, SubmissionStatus::Submitted, None)
            .await
            .map_err(|e| DeliveryError::from(format!("Delivered but failed to record status: {e}")))?;

        Ok(())
    }
}

//! Billing usage queries.
//!
//! Fetches month-to-date spend and the subscription hard limit in parallel.
//! The provider reports spend in cents; both figures are normalized to
//! dollars rounded to two decimals.

use chrono::{Duration, Utc};
use serde::Deserialize;

use crate::api::error::{ApiError, ApiResult};
use crate::api::transport::{ChatTransport, REQUEST_TIMEOUT};

/// Month-to-date usage against the account's hard limit, in dollars.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsageReport {
    pub used: f64,
    pub subscription: f64,
}

#[derive(Deserialize)]
struct UsageResponse {
    #[serde(default)]
    total_usage: Option<f64>,
    #[serde(default)]
    error: Option<ProviderError>,
}

#[derive(Deserialize)]
struct SubscriptionResponse {
    #[serde(default)]
    hard_limit_usd: Option<f64>,
    #[serde(default)]
    error: Option<ProviderError>,
}

#[derive(Deserialize)]
struct ProviderError {
    message: String,
}

/// Round to two decimal places for display as a dollar amount.
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl ChatTransport {
    /// Query month-to-date usage and the subscription limit.
    pub async fn request_usage(&self) -> ApiResult<UsageReport> {
        let now = Utc::now();
        let start_date = now.format("%Y-%m-01").to_string();
        let end_date = (now + Duration::days(1)).format("%Y-%m-%d").to_string();

        let usage_path = format!(
            "dashboard/billing/usage?start_date={start_date}&end_date={end_date}"
        );
        let subscription_path = "dashboard/billing/subscription";

        let (usage, subscription) = tokio::join!(
            self.billing_get::<UsageResponse>(&usage_path),
            self.billing_get::<SubscriptionResponse>(subscription_path),
        );
        let usage = usage?;
        let subscription = subscription?;

        if let Some(e) = usage.error {
            return Err(ApiError::Provider(e.message));
        }
        if let Some(e) = subscription.error {
            return Err(ApiError::Provider(e.message));
        }

        let total_usage = usage.total_usage.ok_or_else(|| {
            ApiError::MalformedResponse("usage response has no total_usage".to_string())
        })?;
        let hard_limit_usd = subscription.hard_limit_usd.ok_or_else(|| {
            ApiError::MalformedResponse("subscription response has no hard_limit_usd".to_string())
        })?;

        Ok(UsageReport {
            used: round2(total_usage / 100.0),
            subscription: round2(hard_limit_usd),
        })
    }

    async fn billing_get<T: serde::de::DeserializeOwned>(&self, proxy_path: &str) -> ApiResult<T> {
        let builder = self.client().get(self.endpoint("api/openai"));
        let send = self.apply_headers(builder, proxy_path).send();

        let response = match tokio::time::timeout(REQUEST_TIMEOUT, send).await {
            Ok(result) => result?,
            Err(_) => return Err(ApiError::Timeout),
        };

        let response = Self::check_status(response)?;
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round2_truncates_to_cents() {
        assert_eq!(round2(12.3456), 12.35);
        assert_eq!(round2(12.344), 12.34);
        assert_eq!(round2(0.0), 0.0);
    }

    #[test]
    fn usage_response_parses_error_object() {
        let body = r#"{"error":{"message":"quota exceeded","type":"billing"}}"#;
        let parsed: UsageResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.total_usage.is_none());
        assert_eq!(parsed.error.unwrap().message, "quota exceeded");
    }

    #[test]
    fn usage_response_parses_totals() {
        let body = r#"{"total_usage":1234.5}"#;
        let parsed: UsageResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.total_usage, Some(1234.5));
    }
}

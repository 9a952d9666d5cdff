use std::time::Duration;

use consumption_core::{Fluid, RawReading};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{macros::format_description, OffsetDateTime, Time};
use tokio::sync::OnceCell;

use super::consumption_payload::{decode_reading, ConsumptionPayload};
use crate::config::PortalConfig;

/// Days of history requested per poll.
const REQUEST_WINDOW_DAYS: i64 = 30;

#[derive(thiserror::Error, Debug)]
pub enum PortalError {
    #[error("portal request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("portal returned HTTP {status} for {url}")]
    Status { status: u16, url: String },
    #[error("no dwelling found for this account")]
    NoDwelling,
    #[error("invalid portal configuration: {0}")]
    Config(String),
}

/// Fetches one raw reading per requested fluid.
///
/// Implementations drop fluids they could not fetch; the engine reports
/// those as unavailable.
#[async_trait::async_trait]
pub trait PortalClient: Send + Sync {
    async fn fetch(&self, fluids: &[Fluid]) -> Result<Vec<RawReading>, PortalError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsumptionRequest {
    pub debut: String,
    pub fin: String,
    pub granularity: &'static str,
}

impl ConsumptionRequest {
    /// Window of the last 30 days ending at today's UTC midnight.
    pub fn ending_at(now: OffsetDateTime) -> Self {
        let end = now.to_offset(time::UtcOffset::UTC).replace_time(Time::MIDNIGHT);
        let start = end - time::Duration::days(REQUEST_WINDOW_DAYS);
        Self {
            debut: format_utc(start),
            fin: format_utc(end),
            granularity: "Month",
        }
    }
}

fn format_utc(ts: OffsetDateTime) -> String {
    ts.format(format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
    ))
    .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct Resident {
    #[serde(default)]
    occupations: Vec<Occupation>,
}

#[derive(Debug, Deserialize)]
struct Occupation {
    #[serde(default, rename = "logementId")]
    logement_id: Option<Value>,
}

fn dwelling_id(resident: &Resident) -> Option<String> {
    match resident.occupations.first()?.logement_id.as_ref()? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Resident portal client authenticated with a pre-obtained bearer token.
pub struct HttpPortalClient {
    client: reqwest::Client,
    base_url: String,
    local_id: OnceCell<String>,
}

impl HttpPortalClient {
    pub fn new(cfg: &PortalConfig) -> Result<Self, PortalError> {
        use reqwest::header;

        let mut auth_value = header::HeaderValue::from_str(&format!("Bearer {}", cfg.access_token))
            .map_err(|e| PortalError::Config(format!("access token is not a valid header: {e}")))?;
        auth_value.set_sensitive(true);

        let mut headers = header::HeaderMap::new();
        headers.insert(header::AUTHORIZATION, auth_value);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;

        let local_id = match &cfg.local_id {
            Some(id) => OnceCell::new_with(Some(id.clone())),
            None => OnceCell::new(),
        };

        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            local_id,
        })
    }

    async fn local_id(&self) -> Result<&str, PortalError> {
        let id = self
            .local_id
            .get_or_try_init(|| async {
                let url = format!("{}/resident", self.base_url);
                let resp = self.client.get(&url).send().await?;
                if !resp.status().is_success() {
                    return Err(PortalError::Status {
                        status: resp.status().as_u16(),
                        url,
                    });
                }
                let resident: Resident = resp.json().await?;
                let id = dwelling_id(&resident).ok_or(PortalError::NoDwelling)?;
                tracing::info!(local_id = %id, "resolved dwelling id from resident profile");
                Ok::<_, PortalError>(id)
            })
            .await?;
        Ok(id.as_str())
    }

    async fn fetch_fluid(
        &self,
        local_id: &str,
        fluid: Fluid,
        request: &ConsumptionRequest,
    ) -> Result<RawReading, PortalError> {
        let url = format!("{}/local/{}/conso/{}", self.base_url, local_id, fluid.api_name());
        let resp = self.client.post(&url).json(request).send().await?;
        if !resp.status().is_success() {
            return Err(PortalError::Status {
                status: resp.status().as_u16(),
                url,
            });
        }
        let payload: ConsumptionPayload = resp.json().await?;
        Ok(decode_reading(fluid, &payload))
    }
}

#[async_trait::async_trait]
impl PortalClient for HttpPortalClient {
    async fn fetch(&self, fluids: &[Fluid]) -> Result<Vec<RawReading>, PortalError> {
        let local_id = self.local_id().await?;
        let request = ConsumptionRequest::ending_at(OffsetDateTime::now_utc());

        let mut readings = Vec::with_capacity(fluids.len());
        for fluid in fluids {
            match self.fetch_fluid(local_id, *fluid, &request).await {
                Ok(reading) => readings.push(reading),
                Err(e) => {
                    tracing::warn!(%fluid, error = %e, "failed to fetch fluid consumption");
                    metrics::counter!("portal_fluid_failures_total", "fluid" => fluid.key())
                        .increment(1);
                }
            }
        }

        Ok(readings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn request_window_covers_last_thirty_days_at_utc_midnight() {
        let req = ConsumptionRequest::ending_at(datetime!(2024-03-05 14:22:10.5 +01:00));

        assert_eq!(req.fin, "2024-03-05T00:00:00.000Z");
        assert_eq!(req.debut, "2024-02-04T00:00:00.000Z");
        assert_eq!(req.granularity, "Month");
    }

    #[test]
    fn request_serializes_with_portal_field_names() {
        let req = ConsumptionRequest::ending_at(datetime!(2024-03-05 00:00 UTC));
        let json = serde_json::to_value(&req).unwrap();

        assert_eq!(json["debut"], "2024-02-04T00:00:00.000Z");
        assert_eq!(json["fin"], "2024-03-05T00:00:00.000Z");
        assert_eq!(json["granularity"], "Month");
    }

    #[test]
    fn dwelling_id_accepts_strings_and_numbers() {
        let resident: Resident =
            serde_json::from_str(r#"{"occupations": [{"logementId": 1234}]}"#).unwrap();
        assert_eq!(dwelling_id(&resident).as_deref(), Some("1234"));

        let resident: Resident =
            serde_json::from_str(r#"{"occupations": [{"logementId": "ab-12"}]}"#).unwrap();
        assert_eq!(dwelling_id(&resident).as_deref(), Some("ab-12"));

        let resident: Resident = serde_json::from_str(r#"{"occupations": []}"#).unwrap();
        assert_eq!(dwelling_id(&resident), None);
    }

    #[test]
    fn invalid_token_is_a_config_error() {
        let cfg = PortalConfig {
            base_url: "http://localhost".to_string(),
            access_token: "bad\ntoken".to_string(),
            local_id: None,
            timeout_secs: 5,
        };
        assert!(matches!(HttpPortalClient::new(&cfg), Err(PortalError::Config(_))));
    }
}

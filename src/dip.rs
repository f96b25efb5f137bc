//! DIP API client for HDO tariff signals
//!
//! Fetching the tariff feed is a two-step dance: a short-lived request token
//! first, then the per-supply-point signals endpoint with that token. During
//! planned outages the portal answers these endpoints with an HTML
//! maintenance page (or HTTP 400/503), which must be told apart from a
//! genuine fetch failure because it self-resolves.

use crate::auth::DEFAULT_USER_AGENT;
use crate::error::{ElektraError, Result};
use crate::logging::get_logger;
use crate::session::{Cookie, cookie_header};
use async_trait::async_trait;
use serde::Deserialize;

/// DIP portal base URL
pub const DIP_PORTAL_URL: &str = "https://dip.cezdistribuce.cz/irj/portal";

const TOKEN_PATH: &str = "rest-auth-api?path=/token/get";

/// One signal entry of the tariff feed
#[derive(Debug, Clone, Deserialize)]
pub struct HdoSignal {
    /// Signal label, e.g. `EVV2`
    #[serde(default)]
    pub signal: String,

    /// Day name as served by the portal
    #[serde(default)]
    pub den: String,

    /// Date as served by the portal
    #[serde(default)]
    pub datum: String,

    /// Semicolon-separated low-tariff windows, e.g. `00:00-08:00; 09:00-12:00`
    #[serde(default)]
    pub casy: String,
}

/// Tariff feed payload: the signal list for one supply point
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HdoFeed {
    /// Signal entries; the first one is authoritative
    #[serde(default)]
    pub signals: Vec<HdoSignal>,
}

/// Tariff feed collaborator: pulls the HDO signals for one supply point
#[async_trait]
pub trait TariffFeedFetcher: Send + Sync {
    /// Fetch the feed; fails with `Maintenance` during a planned outage,
    /// `SessionExpired` on an authorization failure, or a generic fetch
    /// failure otherwise
    async fn fetch_tariff_feed(&self, cookies: &[Cookie], ean: &str) -> Result<HdoFeed>;
}

/// HTTP client for the DIP signals endpoints
pub struct DipClient {
    client: reqwest::Client,
    logger: crate::logging::StructuredLogger,
}

impl DipClient {
    /// Create a new DIP client
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            logger: get_logger("dip"),
        })
    }

    fn signals_url(ean: &str) -> String {
        format!(
            "{}/prehled-om?path=supply-point-detail/signals/{}",
            DIP_PORTAL_URL, ean
        )
    }

    /// Whether a Content-Type header indicates an HTML maintenance page
    fn is_html_content_type(content_type: Option<&str>) -> bool {
        content_type
            .map(|ct| ct.to_lowercase().contains("text/html"))
            .unwrap_or(false)
    }

    /// Map common failure statuses shared by both endpoints
    fn check_status(status: reqwest::StatusCode, endpoint: &str) -> Result<()> {
        if status == reqwest::StatusCode::BAD_REQUEST
            || status == reqwest::StatusCode::SERVICE_UNAVAILABLE
        {
            return Err(ElektraError::maintenance(format!(
                "{} endpoint unavailable (HTTP {})",
                endpoint,
                status.as_u16()
            )));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ElektraError::session_expired(format!(
                "{} endpoint returned 401",
                endpoint
            )));
        }
        if !status.is_success() {
            return Err(ElektraError::fetch(format!(
                "{} request failed: HTTP {}",
                endpoint,
                status.as_u16()
            )));
        }
        Ok(())
    }

    async fn get_json(
        &self,
        url: &str,
        cookies: &[Cookie],
        token: Option<&str>,
        endpoint: &str,
    ) -> Result<serde_json::Value> {
        let mut request = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, DEFAULT_USER_AGENT)
            .header(reqwest::header::COOKIE, cookie_header(cookies));
        if let Some(token) = token {
            request = request.header("x-request-token", token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ElektraError::fetch(format!("{} fetch failed: {}", endpoint, e)))?;

        Self::check_status(response.status(), endpoint)?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if Self::is_html_content_type(content_type.as_deref()) {
            return Err(ElektraError::maintenance(format!(
                "{} endpoint returned HTML (maintenance page)",
                endpoint
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ElektraError::fetch(format!("{} response decode failed: {}", endpoint, e)))
    }
}

#[async_trait]
impl TariffFeedFetcher for DipClient {
    async fn fetch_tariff_feed(&self, cookies: &[Cookie], ean: &str) -> Result<HdoFeed> {
        // Step 1: request token
        let token_url = format!("{}/{}", DIP_PORTAL_URL, TOKEN_PATH);
        let token_body = self.get_json(&token_url, cookies, None, "Token").await?;
        let token = token_body
            .get("token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ElektraError::fetch("Token missing from response"))?
            .to_string();

        // Step 2: signals with the x-request-token header
        let signals_body = self
            .get_json(&Self::signals_url(ean), cookies, Some(&token), "Signals")
            .await?;
        let data = signals_body
            .get("data")
            .cloned()
            .ok_or_else(|| ElektraError::fetch("Data missing from response"))?;

        let feed: HdoFeed = serde_json::from_value(data)
            .map_err(|e| ElektraError::fetch(format!("Signals decode failed: {}", e)))?;

        self.logger.debug(&format!(
            "Fetched HDO feed for EAN {}: {} signal(s)",
            ean,
            feed.signals.len()
        ));
        Ok(feed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_content_type_detection() {
        assert!(DipClient::is_html_content_type(Some("text/html")));
        assert!(DipClient::is_html_content_type(Some(
            "Text/HTML; charset=utf-8"
        )));
        assert!(!DipClient::is_html_content_type(Some("application/json")));
        assert!(!DipClient::is_html_content_type(None));
    }

    #[test]
    fn status_mapping() {
        assert!(
            DipClient::check_status(reqwest::StatusCode::BAD_REQUEST, "Token")
                .unwrap_err()
                .is_maintenance()
        );
        assert!(
            DipClient::check_status(reqwest::StatusCode::SERVICE_UNAVAILABLE, "Signals")
                .unwrap_err()
                .is_maintenance()
        );
        assert!(
            DipClient::check_status(reqwest::StatusCode::UNAUTHORIZED, "Token")
                .unwrap_err()
                .is_session_expired()
        );
        assert!(matches!(
            DipClient::check_status(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "Token"),
            Err(ElektraError::Fetch { .. })
        ));
        assert!(DipClient::check_status(reqwest::StatusCode::OK, "Token").is_ok());
    }

    #[test]
    fn feed_deserialization() {
        let json = r#"{
            "signals": [{
                "signal": "EVV2",
                "den": "Neděle",
                "datum": "15.02.2026",
                "casy": "00:00-08:00;   09:00-12:00"
            }]
        }"#;
        let feed: HdoFeed = serde_json::from_str(json).unwrap();
        assert_eq!(feed.signals.len(), 1);
        assert_eq!(feed.signals[0].signal, "EVV2");
        assert!(feed.signals[0].casy.contains("09:00-12:00"));

        let empty: HdoFeed = serde_json::from_str("{}").unwrap();
        assert!(empty.signals.is_empty());
    }

    #[test]
    fn signals_url_embeds_ean() {
        assert_eq!(
            DipClient::signals_url("859182400100000000"),
            "https://dip.cezdistribuce.cz/irj/portal/prehled-om?path=supply-point-detail/signals/859182400100000000"
        );
    }
}

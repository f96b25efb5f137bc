//! PND data API client
//!
//! This module owns the report descriptors, the raw wire payload model, and
//! the HTTP client that pulls one report from the portal's data endpoint
//! using the authenticated session cookies.

use crate::auth::{DEFAULT_USER_AGENT, PND_BASE_URL};
use crate::error::{ElektraError, Result};
use crate::logging::get_logger;
use crate::session::{Cookie, cookie_header};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashMap;

/// One vendor-defined report kind
#[derive(Debug, Clone, Copy)]
pub struct ReportDescriptor {
    /// Vendor assembly id sent in the request body
    pub assembly_id: i32,

    /// Stable name used for logging and result keying
    pub name: &'static str,

    /// Whether "no data for today" falls back to yesterday's window
    pub fallback_yesterday: bool,
}

/// The six report kinds fetched every cycle, in fetch order
pub const REPORTS: [ReportDescriptor; 6] = [
    ReportDescriptor {
        assembly_id: -1003,
        name: "profile_all",
        fallback_yesterday: false,
    },
    ReportDescriptor {
        assembly_id: -1012,
        name: "profile_consumption_reactive",
        fallback_yesterday: false,
    },
    ReportDescriptor {
        assembly_id: -1011,
        name: "profile_production_reactive",
        fallback_yesterday: false,
    },
    ReportDescriptor {
        assembly_id: -1021,
        name: "daily_consumption",
        fallback_yesterday: false,
    },
    ReportDescriptor {
        assembly_id: -1022,
        name: "daily_production",
        fallback_yesterday: false,
    },
    // Register readings are only posted at end of day, so an empty "today"
    // is expected until then and yesterday's values are substituted.
    ReportDescriptor {
        assembly_id: -1027,
        name: "daily_registers",
        fallback_yesterday: true,
    },
];

/// One column descriptor from the report header
#[derive(Debug, Clone, Deserialize)]
pub struct RawColumn {
    /// Opaque column id the rows key their cells by
    #[serde(default)]
    pub id: String,

    /// Display name the roles are discovered from
    #[serde(default)]
    pub name: String,
}

/// One cell: value string plus vendor status code
#[derive(Debug, Clone, Deserialize)]
pub struct RawCell {
    /// Raw value in the vendor's locale format
    #[serde(default)]
    pub v: Option<String>,

    /// Vendor status code for the cell
    #[serde(default)]
    pub s: Option<i64>,
}

/// One row: map from column id to cell
pub type RawRow = HashMap<String, RawCell>;

/// The vendor's columnar payload for one report kind
#[derive(Debug, Clone, Deserialize)]
pub struct RawReport {
    /// Whether the window contained any data
    #[serde(rename = "hasData", default)]
    pub has_data: bool,

    /// Row count as reported by the vendor
    #[serde(default)]
    pub size: i64,

    /// Column descriptors, unordered
    #[serde(default)]
    pub columns: Vec<RawColumn>,

    /// Data rows, vendor-ordered chronologically
    #[serde(default)]
    pub values: Vec<RawRow>,
}

/// Format a window boundary as the vendor expects: `DD.MM.YYYY 00:00`
pub fn format_window_start(date: NaiveDate) -> String {
    date.format("%d.%m.%Y 00:00").to_string()
}

/// Build the data endpoint request body
pub fn build_report_payload(
    descriptor: &ReportDescriptor,
    meter_id: &str,
    date_from: &str,
    date_to: &str,
) -> serde_json::Value {
    serde_json::json!({
        "format": "table",
        "idAssembly": descriptor.assembly_id,
        "idDeviceSet": null,
        "intervalFrom": date_from,
        "intervalTo": date_to,
        "compareFrom": null,
        "opmId": null,
        "electrometerId": meter_id,
    })
}

/// Report fetch collaborator: pulls one raw report for one meter
#[async_trait]
pub trait ReportFetcher: Send + Sync {
    /// Fetch one report; fails with `SessionExpired` on an authorization
    /// failure, or a generic fetch failure otherwise
    async fn fetch_report(
        &self,
        cookies: &[Cookie],
        descriptor: &ReportDescriptor,
        meter_id: &str,
        date_from: &str,
        date_to: &str,
    ) -> Result<RawReport>;
}

/// HTTP client for the PND external data endpoint
pub struct PndClient {
    client: reqwest::Client,
    logger: crate::logging::StructuredLogger,
}

impl PndClient {
    /// Create a new PND client
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            logger: get_logger("pnd"),
        })
    }

    fn data_url() -> String {
        format!("{}/external/data", PND_BASE_URL)
    }
}

#[async_trait]
impl ReportFetcher for PndClient {
    async fn fetch_report(
        &self,
        cookies: &[Cookie],
        descriptor: &ReportDescriptor,
        meter_id: &str,
        date_from: &str,
        date_to: &str,
    ) -> Result<RawReport> {
        let payload = build_report_payload(descriptor, meter_id, date_from, date_to);

        let response = self
            .client
            .post(Self::data_url())
            .header(reqwest::header::USER_AGENT, DEFAULT_USER_AGENT)
            .header(reqwest::header::COOKIE, cookie_header(cookies))
            .json(&payload)
            .send()
            .await
            .map_err(|e| ElektraError::fetch(format!("PND fetch failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ElektraError::session_expired("PND API returned 401"));
        }
        if !status.is_success() {
            return Err(ElektraError::fetch(format!(
                "PND API returned {}",
                status.as_u16()
            )));
        }

        let report: RawReport = response
            .json()
            .await
            .map_err(|e| ElektraError::fetch(format!("PND response decode failed: {}", e)))?;

        self.logger.debug(&format!(
            "Fetched {} for meter {}: hasData={} rows={}",
            descriptor.name,
            meter_id,
            report.has_data,
            report.values.len()
        ));
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_table_shape() {
        assert_eq!(REPORTS.len(), 6);

        // Assembly ids are unique
        let mut ids: Vec<i32> = REPORTS.iter().map(|r| r.assembly_id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 6);

        // Exactly the register report carries the fallback flag
        let fallback: Vec<&str> = REPORTS
            .iter()
            .filter(|r| r.fallback_yesterday)
            .map(|r| r.name)
            .collect();
        assert_eq!(fallback, vec!["daily_registers"]);
    }

    #[test]
    fn window_start_formatting() {
        let date = NaiveDate::from_ymd_opt(2026, 2, 14).unwrap();
        assert_eq!(format_window_start(date), "14.02.2026 00:00");
    }

    #[test]
    fn report_payload_shape() {
        let payload = build_report_payload(
            &REPORTS[0],
            "784703",
            "14.02.2026 00:00",
            "14.02.2026 00:00",
        );
        assert_eq!(payload["format"], "table");
        assert_eq!(payload["idAssembly"], -1003);
        assert_eq!(payload["electrometerId"], "784703");
        assert_eq!(payload["intervalFrom"], "14.02.2026 00:00");
        assert!(payload["idDeviceSet"].is_null());
        assert!(payload["opmId"].is_null());
    }

    #[test]
    fn raw_report_deserialization() {
        let json = r#"{
            "hasData": true,
            "size": 1,
            "columns": [
                {"id": "1000", "name": "Datum", "unit": null},
                {"id": "1001", "name": "+A/784703", "unit": "kW"}
            ],
            "values": [
                {"1000": {"v": "14.02.2026 09:15", "s": 1}, "1001": {"v": "1,42"}}
            ],
            "statuses": {"1": {"n": "ok"}}
        }"#;
        let report: RawReport = serde_json::from_str(json).unwrap();
        assert!(report.has_data);
        assert_eq!(report.columns.len(), 2);
        assert_eq!(report.values.len(), 1);
        let cell = &report.values[0]["1001"];
        assert_eq!(cell.v.as_deref(), Some("1,42"));
        assert_eq!(cell.s, None);
    }

    #[test]
    fn raw_report_missing_fields_default() {
        let report: RawReport = serde_json::from_str("{}").unwrap();
        assert!(!report.has_data);
        assert_eq!(report.size, 0);
        assert!(report.columns.is_empty());
        assert!(report.values.is_empty());
    }
}

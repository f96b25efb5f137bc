//! Multi-report fetch coordination
//!
//! Pulls the six report kinds for one meter in a fixed order, giving each
//! its own bounded retry and, for the register report, the previous-day
//! fallback. A failing report degrades to "absent" instead of aborting the
//! cycle; only the session-expiry signal propagates, so the caller can
//! decide whether to re-authenticate mid-cycle.

use crate::error::{ElektraError, Result};
use crate::logging::get_logger;
use crate::parser::ReadingParser;
use crate::pnd::{RawReport, REPORTS, ReportDescriptor, ReportFetcher, format_window_start};
use crate::session::Cookie;
use chrono::{Duration, NaiveDate};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Successfully fetched reports for one meter, in fetch order
pub type ReportSet = Vec<(&'static str, RawReport)>;

/// Merged sensor values per meter id
pub type MergedMeterState = BTreeMap<String, BTreeMap<&'static str, f64>>;

/// Orchestrates the six-report fetch-with-fallback sequence for one meter
pub struct FetchCoordinator {
    fetcher: Arc<dyn ReportFetcher>,
    max_retries: u32,
    retry_base_delay: std::time::Duration,
    logger: crate::logging::StructuredLogger,
}

impl FetchCoordinator {
    /// Create a coordinator over the given fetch collaborator
    pub fn new(
        fetcher: Arc<dyn ReportFetcher>,
        max_retries: u32,
        retry_base_delay_seconds: f64,
    ) -> Self {
        Self {
            fetcher,
            max_retries: max_retries.max(1),
            retry_base_delay: std::time::Duration::from_secs_f64(
                retry_base_delay_seconds.max(0.0),
            ),
            logger: get_logger("coordinator"),
        }
    }

    /// Fetch all six reports for one meter
    ///
    /// Reports are fetched strictly sequentially in descriptor order; the
    /// portal session does not tolerate concurrent use. Per-report failures
    /// are logged with the report name and excluded from the result. Only
    /// `SessionExpired` aborts the sequence and propagates.
    pub async fn fetch_all_reports(
        &self,
        cookies: &[Cookie],
        meter_id: &str,
        today: NaiveDate,
    ) -> Result<ReportSet> {
        let mut results = ReportSet::new();

        for descriptor in &REPORTS {
            match self
                .fetch_with_fallback(cookies, descriptor, meter_id, today)
                .await
            {
                Ok(report) if report.has_data => {
                    results.push((descriptor.name, report));
                }
                Ok(_) => {
                    self.logger.warn(&format!(
                        "[NO_DATA_AVAILABLE] Report {} has no data for meter {}",
                        descriptor.name, meter_id
                    ));
                }
                Err(e) if e.is_session_expired() => return Err(e),
                Err(e) => {
                    self.logger.error(&format!(
                        "[FETCH_ERROR] Report {} failed for meter {}: {} - continuing with others",
                        descriptor.name, meter_id, e
                    ));
                }
            }
        }

        Ok(results)
    }

    /// Fetch one report, substituting yesterday's window when flagged
    async fn fetch_with_fallback(
        &self,
        cookies: &[Cookie],
        descriptor: &ReportDescriptor,
        meter_id: &str,
        today: NaiveDate,
    ) -> Result<RawReport> {
        let today_window = format_window_start(today);
        let report = self
            .fetch_with_retry(cookies, descriptor, meter_id, &today_window, &today_window)
            .await?;

        if descriptor.fallback_yesterday && !report.has_data {
            self.logger.warn(&format!(
                "[NO_DATA_AVAILABLE] Report {} has no data for today, retrying yesterday",
                descriptor.name
            ));
            let yesterday_window = format_window_start(today - Duration::days(1));
            return self
                .fetch_with_retry(cookies, descriptor, meter_id, &yesterday_window, &today_window)
                .await;
        }

        Ok(report)
    }

    /// Fetch one report with bounded retry and exponential backoff
    ///
    /// `SessionExpired` is not retried; fresh tokens are needed first.
    async fn fetch_with_retry(
        &self,
        cookies: &[Cookie],
        descriptor: &ReportDescriptor,
        meter_id: &str,
        date_from: &str,
        date_to: &str,
    ) -> Result<RawReport> {
        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            match self
                .fetcher
                .fetch_report(cookies, descriptor, meter_id, date_from, date_to)
                .await
            {
                Ok(report) => return Ok(report),
                Err(e) if e.is_session_expired() => return Err(e),
                Err(e) => {
                    if attempt < self.max_retries {
                        let delay = self.retry_base_delay.mul_f64(f64::from(1 << (attempt - 1)));
                        self.logger.warn(&format!(
                            "Report {} fetch failed (attempt {}/{}): {} - retrying in {:.1}s",
                            descriptor.name,
                            attempt,
                            self.max_retries,
                            e,
                            delay.as_secs_f64()
                        ));
                        tokio::time::sleep(delay).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ElektraError::fetch(format!("Report {} failed", descriptor.name))))
    }

    /// Merge the latest reading of every fetched report into per-meter state
    ///
    /// The meter id detected from the column headers wins over the configured
    /// one. Fields never collide because each sensor key is produced by
    /// exactly one report kind.
    pub fn merge_readings(
        &self,
        reports: &ReportSet,
        configured_meter_id: &str,
    ) -> MergedMeterState {
        let mut state = MergedMeterState::new();

        for (name, report) in reports {
            let parser = ReadingParser::new(report);
            let Some(reading) = parser.latest_reading() else {
                self.logger
                    .debug(&format!("Report {} produced no readings", name));
                continue;
            };
            let meter_id = parser
                .electrometer_id()
                .unwrap_or(configured_meter_id)
                .to_string();
            let entry = state.entry(meter_id).or_default();
            for (key, value) in reading.sensor_values() {
                entry.insert(key, value);
            }
        }

        state
    }
}

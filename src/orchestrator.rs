//! Polling orchestrator
//!
//! Drives the fetch-parse-publish cycle on a fixed schedule and owns all
//! partial-failure policy: an authentication problem skips the whole cycle
//! (stale data is never republished), a single report or meter degrades in
//! isolation, and the PND and HDO paths never block each other.

use crate::auth::AuthManager;
use crate::config::{Config, MeterConfig};
use crate::coordinator::{FetchCoordinator, MergedMeterState, ReportSet};
use crate::dip::TariffFeedFetcher;
use crate::error::Result;
use crate::hdo;
use crate::logging::get_logger;
use crate::mqtt::StatePublisher;
use crate::session::Cookie;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Coordinates fetch-parse-publish cycles on a polling schedule
pub struct Orchestrator {
    meters: Vec<MeterConfig>,
    poll_interval: Duration,
    timezone: chrono_tz::Tz,
    auth: AuthManager,
    coordinator: FetchCoordinator,
    tariff_fetcher: Option<Arc<dyn TariffFeedFetcher>>,
    publisher: Arc<dyn StatePublisher>,
    logger: crate::logging::StructuredLogger,
}

impl Orchestrator {
    /// Create an orchestrator over the given collaborators
    pub fn new(
        config: &Config,
        auth: AuthManager,
        coordinator: FetchCoordinator,
        tariff_fetcher: Option<Arc<dyn TariffFeedFetcher>>,
        publisher: Arc<dyn StatePublisher>,
    ) -> Self {
        Self {
            meters: config.meters.clone(),
            poll_interval: Duration::from_secs(config.polling.poll_interval_seconds),
            timezone: config.portal_timezone(),
            auth,
            coordinator,
            tariff_fetcher,
            publisher,
            logger: get_logger("orchestrator"),
        }
    }

    /// Start the polling loop; runs until the task is cancelled
    ///
    /// Discovery metadata is published once at startup; cycles are fully
    /// serialized, with cancellation taking effect at the sleep boundary.
    pub async fn run_loop(&self) -> Result<()> {
        self.logger.info(&format!(
            "Orchestrator starting - poll interval: {}s, {} electrometer(s)",
            self.poll_interval.as_secs(),
            self.meters.len()
        ));

        self.publisher.start().await?;
        self.publisher.publish_discovery().await?;

        loop {
            self.run_once().await;
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Execute a single fetch-parse-publish cycle
    ///
    /// Never returns an error; every failure mode is handled here so the
    /// loop cannot crash.
    pub async fn run_once(&self) {
        let cycle_start = std::time::Instant::now();

        let session = match self.auth.ensure_session().await {
            Ok(session) => session,
            Err(e) if e.is_maintenance() => {
                self.logger
                    .warn(&format!("[DIP_MAINTENANCE] {} - skipping cycle", e));
                return;
            }
            Err(e) => {
                self.logger.error(&format!(
                    "[AUTH_ERROR] Cannot obtain session: {} - skipping cycle",
                    e
                ));
                return;
            }
        };

        if !session.reused {
            self.logger.info("Established fresh portal session");
        }

        // Tokens are read-only for the rest of the cycle; a mid-cycle
        // re-authentication replaces them wholesale.
        let mut cookies = session.cookies;
        let today = self.portal_today();

        let mut state = MergedMeterState::new();
        for meter in &self.meters {
            let Some(reports) = self
                .fetch_meter_reports(&mut cookies, &meter.electrometer_id, today)
                .await
            else {
                continue;
            };
            if reports.is_empty() {
                continue;
            }
            let merged = self
                .coordinator
                .merge_readings(&reports, &meter.electrometer_id);
            for (meter_id, readings) in merged {
                state.entry(meter_id).or_default().extend(readings);
            }
        }

        if state.is_empty() {
            self.logger
                .info("No data available in PND response, skipping publish");
        } else if let Err(e) = self.publisher.publish_state(&state).await {
            self.logger.error(&format!(
                "[MQTT_PUBLISH_ERROR] MQTT publish failed - broker may be unavailable: {}",
                e
            ));
        } else {
            self.logger
                .debug(&format!("Published state for {} meter(s)", state.len()));
        }

        self.process_tariff_feeds(&cookies).await;

        self.logger.info(&format!(
            "Poll cycle completed in {:.2}s for {} electrometer(s)",
            cycle_start.elapsed().as_secs_f64(),
            self.meters.len()
        ));
    }

    /// Fetch all reports for one meter, re-authenticating once on expiry
    async fn fetch_meter_reports(
        &self,
        cookies: &mut Vec<Cookie>,
        meter_id: &str,
        today: NaiveDate,
    ) -> Option<ReportSet> {
        match self
            .coordinator
            .fetch_all_reports(cookies, meter_id, today)
            .await
        {
            Ok(reports) => Some(reports),
            Err(e) if e.is_session_expired() => {
                self.logger.warn(
                    "[SESSION_EXPIRED] Session expired - attempting re-authentication",
                );
                match self.auth.refresh_session().await {
                    Ok(session) => *cookies = session.cookies,
                    Err(e) => {
                        self.logger.error(&format!(
                            "[SESSION_EXPIRED] Re-authentication failed: {} - aborting meter {}",
                            e, meter_id
                        ));
                        return None;
                    }
                }
                match self
                    .coordinator
                    .fetch_all_reports(cookies, meter_id, today)
                    .await
                {
                    Ok(reports) => Some(reports),
                    Err(e) => {
                        self.logger.error(&format!(
                            "[SESSION_EXPIRED] Session still rejected after re-auth: {} - aborting meter {}",
                            e, meter_id
                        ));
                        None
                    }
                }
            }
            Err(e) => {
                self.logger.error(&format!(
                    "[FETCH_ERROR] Report fetch failed for meter {}: {}",
                    meter_id, e
                ));
                None
            }
        }
    }

    /// Fetch, evaluate, and publish the tariff feed for every meter with an
    /// EAN, each in isolation from the others and from the PND path
    async fn process_tariff_feeds(&self, cookies: &[Cookie]) {
        let Some(tariff_fetcher) = &self.tariff_fetcher else {
            return;
        };

        for meter in &self.meters {
            if meter.ean.is_empty() {
                continue;
            }
            let meter_id = &meter.electrometer_id;
            let result = self
                .publish_tariff_state(tariff_fetcher.as_ref(), cookies, meter)
                .await;
            match result {
                Ok(()) => {}
                Err(e) if e.is_maintenance() => {
                    self.logger.warn(&format!(
                        "[DIP_MAINTENANCE] {} for meter {} - skipping HDO this cycle",
                        e, meter_id
                    ));
                }
                Err(e) => {
                    self.logger.error(&format!(
                        "[HDO_FETCH_ERROR] HDO fetch/parse/publish failed for meter {}: {} - PND unaffected",
                        meter_id, e
                    ));
                }
            }
        }
    }

    async fn publish_tariff_state(
        &self,
        tariff_fetcher: &dyn TariffFeedFetcher,
        cookies: &[Cookie],
        meter: &MeterConfig,
    ) -> Result<()> {
        let feed = tariff_fetcher.fetch_tariff_feed(cookies, &meter.ean).await?;
        let hdo_state = hdo::evaluate(&feed, self.portal_now())?;
        self.publisher
            .publish_hdo_state(&meter.electrometer_id, &hdo_state)
            .await
    }

    /// Today's date in the portal's timezone
    fn portal_today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.timezone).date_naive()
    }

    /// Current portal-local wall time
    fn portal_now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.timezone).naive_local()
    }
}

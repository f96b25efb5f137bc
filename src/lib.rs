//! # Elektra - CEZ PND portal bridge for MQTT
//!
//! A Rust implementation of an unattended bridge between the CEZ Distribuce
//! PND metering portal (which exposes no public API) and an MQTT broker,
//! publishing normalized meter readings and HDO tariff state using Home
//! Assistant's MQTT Discovery convention.
//!
//! ## Features
//!
//! - **Session reuse**: persisted login cookies survive restarts; re-login
//!   only happens when the session actually expired
//! - **Six report kinds per cycle**: profile, daily, and register data with
//!   per-report retry and a previous-day fallback for registers
//! - **Locale-aware parsing**: Czech decimal commas, `DD.MM.YYYY HH:MM`
//!   timestamps with the `24:00` convention, dynamic column discovery
//! - **HDO tariff evaluation**: low-tariff window membership and next-switch
//!   computation, including midnight wraparound
//! - **Failure isolation**: one report, one meter, or one feed failing never
//!   aborts sibling work, and the polling loop never crashes
//!
//! ## Architecture
//!
//! The application follows a modular architecture with clear separation of concerns:
//!
//! - `config`: Configuration management and validation
//! - `logging`: Structured logging and tracing
//! - `session`: Credentials and persisted session state
//! - `auth`: Session reuse decisions and the CAS login flow
//! - `pnd`: Report descriptors and the PND data API client
//! - `parser`: Locale-aware report payload parsing
//! - `dip`: HDO tariff feed client
//! - `hdo`: Tariff window parsing and evaluation
//! - `coordinator`: Multi-report fetch orchestration and merging
//! - `mqtt`: MQTT Discovery and state publishing
//! - `orchestrator`: Polling loop and partial-failure policy

pub mod auth;
pub mod config;
pub mod coordinator;
pub mod dip;
pub mod error;
pub mod hdo;
pub mod logging;
pub mod mqtt;
pub mod orchestrator;
pub mod parser;
pub mod pnd;
pub mod session;

// Re-export commonly used types
pub use config::Config;
pub use error::{ElektraError, Result};
pub use orchestrator::Orchestrator;

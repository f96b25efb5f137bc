//! PND report payload parser
//!
//! Translates one raw columnar report into typed readings. The report schema
//! is not contractually documented and varies by report kind, so column roles
//! are discovered from the display names at parse time rather than assumed by
//! position. Handles the vendor's Czech locale conventions: comma decimal
//! separators and `DD.MM.YYYY HH:MM` timestamps where hour `24` means
//! midnight of the following day.

use crate::pnd::{RawReport, RawRow};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;

/// Logical role of a metric column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricRole {
    /// +A, instantaneous active import (kW)
    Consumption,
    /// -A, instantaneous active export (kW)
    Production,
    /// Rv, reactive power (kW)
    Reactive,
    /// Ri+, reactive import inductive (var)
    ReactiveImportInductive,
    /// Rc-, reactive export capacitive (var)
    ReactiveExportCapacitive,
    /// Ri-, reactive export inductive (var)
    ReactiveExportInductive,
    /// Rc+, reactive import capacitive (var)
    ReactiveImportCapacitive,
    /// +A d, daily active import aggregate (kWh)
    DailyConsumption,
    /// -A d, daily active export aggregate (kWh)
    DailyProduction,
    /// +E, cumulative import register (kWh)
    RegisterConsumption,
    /// -E, cumulative export register (kWh)
    RegisterProduction,
    /// +E NT, low-tariff import register (kWh)
    RegisterLowTariff,
    /// +E VT, high-tariff import register (kWh)
    RegisterHighTariff,
}

impl MetricRole {
    /// Sensor key used for publishing
    pub fn sensor_key(self) -> &'static str {
        match self {
            MetricRole::Consumption => "consumption",
            MetricRole::Production => "production",
            MetricRole::Reactive => "reactive",
            MetricRole::ReactiveImportInductive => "reactive_import_inductive",
            MetricRole::ReactiveExportCapacitive => "reactive_export_capacitive",
            MetricRole::ReactiveExportInductive => "reactive_export_inductive",
            MetricRole::ReactiveImportCapacitive => "reactive_import_capacitive",
            MetricRole::DailyConsumption => "daily_consumption",
            MetricRole::DailyProduction => "daily_production",
            MetricRole::RegisterConsumption => "register_consumption",
            MetricRole::RegisterProduction => "register_production",
            MetricRole::RegisterLowTariff => "register_low_tariff",
            MetricRole::RegisterHighTariff => "register_high_tariff",
        }
    }

    /// All roles, in publishing order
    pub fn all() -> &'static [MetricRole] {
        &[
            MetricRole::Consumption,
            MetricRole::Production,
            MetricRole::Reactive,
            MetricRole::ReactiveImportInductive,
            MetricRole::ReactiveExportCapacitive,
            MetricRole::ReactiveExportInductive,
            MetricRole::ReactiveImportCapacitive,
            MetricRole::DailyConsumption,
            MetricRole::DailyProduction,
            MetricRole::RegisterConsumption,
            MetricRole::RegisterProduction,
            MetricRole::RegisterLowTariff,
            MetricRole::RegisterHighTariff,
        ]
    }
}

/// Vendor column-name label for the timestamp column
const TIMESTAMP_LABEL: &str = "Datum";

/// Fixed table of (name prefix, role) matchers, evaluated in order.
///
/// More specific prefixes come first so that register-tariff columns are not
/// shadowed by the plain register prefix. A prefix ending in `/` may be
/// followed by the electrometer id the column belongs to.
const METRIC_MATCHERS: &[(&str, MetricRole)] = &[
    ("+A d/", MetricRole::DailyConsumption),
    ("-A d/", MetricRole::DailyProduction),
    ("+E_NT/", MetricRole::RegisterLowTariff),
    ("+E_VT/", MetricRole::RegisterHighTariff),
    ("+E/", MetricRole::RegisterConsumption),
    ("-E/", MetricRole::RegisterProduction),
    ("+A/", MetricRole::Consumption),
    ("-A/", MetricRole::Production),
    ("Rv/", MetricRole::Reactive),
    ("Profil +Ri", MetricRole::ReactiveImportInductive),
    ("Profil -Rc", MetricRole::ReactiveExportCapacitive),
    ("Profil -Ri", MetricRole::ReactiveExportInductive),
    ("Profil +Rc", MetricRole::ReactiveImportCapacitive),
];

/// Convert a Czech decimal string to a float
///
/// `"1,42"` parses to `1.42`. Absent, empty, or unparsable input yields
/// `None`, never an error.
pub fn parse_czech_decimal(value: Option<&str>) -> Option<f64> {
    let value = value?;
    if value.is_empty() {
        return None;
    }
    value.replace(',', ".").parse::<f64>().ok()
}

/// Convert a Czech timestamp `DD.MM.YYYY HH:MM` to a naive datetime
///
/// The vendor encodes end-of-day as hour `24`, which is normalized to
/// `00:00` of the following day. Malformed input yields `None`.
pub fn parse_czech_timestamp(value: &str) -> Option<NaiveDateTime> {
    let mut tokens = value.split_whitespace();
    let date_part = tokens.next()?;
    let time_part = tokens.next()?;
    if tokens.next().is_some() {
        return None;
    }

    let date_fields: Vec<&str> = date_part.split('.').collect();
    if date_fields.len() != 3
        || date_fields[0].len() != 2
        || date_fields[1].len() != 2
        || date_fields[2].len() != 4
    {
        return None;
    }
    let day: u32 = date_fields[0].parse().ok()?;
    let month: u32 = date_fields[1].parse().ok()?;
    let year: i32 = date_fields[2].parse().ok()?;

    let time_fields: Vec<&str> = time_part.split(':').collect();
    if time_fields.len() != 2 || time_fields[0].len() != 2 || time_fields[1].len() != 2 {
        return None;
    }
    let hour: u32 = time_fields[0].parse().ok()?;
    let minute: u32 = time_fields[1].parse().ok()?;

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    if hour == 24 && minute == 0 {
        return date.succ_opt()?.and_hms_opt(0, 0, 0);
    }
    date.and_hms_opt(hour, minute, 0)
}

/// One timestamped row translated into typed metric values
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReading {
    /// Interval timestamp, portal-local
    pub timestamp: NaiveDateTime,

    pub consumption_kw: Option<f64>,
    pub production_kw: Option<f64>,
    pub reactive_kw: Option<f64>,
    pub reactive_import_inductive_var: Option<f64>,
    pub reactive_export_capacitive_var: Option<f64>,
    pub reactive_export_inductive_var: Option<f64>,
    pub reactive_import_capacitive_var: Option<f64>,
    pub daily_consumption_kwh: Option<f64>,
    pub daily_production_kwh: Option<f64>,
    pub register_consumption_kwh: Option<f64>,
    pub register_production_kwh: Option<f64>,
    pub register_low_tariff_kwh: Option<f64>,
    pub register_high_tariff_kwh: Option<f64>,
}

impl ParsedReading {
    fn empty(timestamp: NaiveDateTime) -> Self {
        Self {
            timestamp,
            consumption_kw: None,
            production_kw: None,
            reactive_kw: None,
            reactive_import_inductive_var: None,
            reactive_export_capacitive_var: None,
            reactive_export_inductive_var: None,
            reactive_import_capacitive_var: None,
            daily_consumption_kwh: None,
            daily_production_kwh: None,
            register_consumption_kwh: None,
            register_production_kwh: None,
            register_low_tariff_kwh: None,
            register_high_tariff_kwh: None,
        }
    }

    /// Value of one metric role, if present
    pub fn metric(&self, role: MetricRole) -> Option<f64> {
        match role {
            MetricRole::Consumption => self.consumption_kw,
            MetricRole::Production => self.production_kw,
            MetricRole::Reactive => self.reactive_kw,
            MetricRole::ReactiveImportInductive => self.reactive_import_inductive_var,
            MetricRole::ReactiveExportCapacitive => self.reactive_export_capacitive_var,
            MetricRole::ReactiveExportInductive => self.reactive_export_inductive_var,
            MetricRole::ReactiveImportCapacitive => self.reactive_import_capacitive_var,
            MetricRole::DailyConsumption => self.daily_consumption_kwh,
            MetricRole::DailyProduction => self.daily_production_kwh,
            MetricRole::RegisterConsumption => self.register_consumption_kwh,
            MetricRole::RegisterProduction => self.register_production_kwh,
            MetricRole::RegisterLowTariff => self.register_low_tariff_kwh,
            MetricRole::RegisterHighTariff => self.register_high_tariff_kwh,
        }
    }

    fn set_metric(&mut self, role: MetricRole, value: Option<f64>) {
        match role {
            MetricRole::Consumption => self.consumption_kw = value,
            MetricRole::Production => self.production_kw = value,
            MetricRole::Reactive => self.reactive_kw = value,
            MetricRole::ReactiveImportInductive => self.reactive_import_inductive_var = value,
            MetricRole::ReactiveExportCapacitive => self.reactive_export_capacitive_var = value,
            MetricRole::ReactiveExportInductive => self.reactive_export_inductive_var = value,
            MetricRole::ReactiveImportCapacitive => self.reactive_import_capacitive_var = value,
            MetricRole::DailyConsumption => self.daily_consumption_kwh = value,
            MetricRole::DailyProduction => self.daily_production_kwh = value,
            MetricRole::RegisterConsumption => self.register_consumption_kwh = value,
            MetricRole::RegisterProduction => self.register_production_kwh = value,
            MetricRole::RegisterLowTariff => self.register_low_tariff_kwh = value,
            MetricRole::RegisterHighTariff => self.register_high_tariff_kwh = value,
        }
    }

    /// Non-absent fields as `(sensor key, value)` pairs, in publishing order
    pub fn sensor_values(&self) -> Vec<(&'static str, f64)> {
        MetricRole::all()
            .iter()
            .filter_map(|&role| self.metric(role).map(|v| (role.sensor_key(), v)))
            .collect()
    }
}

/// Parses one raw report payload with dynamic column discovery
pub struct ReadingParser<'a> {
    report: &'a RawReport,
    timestamp_col: Option<String>,
    metric_cols: HashMap<MetricRole, String>,
    electrometer_id: Option<String>,
}

impl<'a> ReadingParser<'a> {
    /// Discover column roles and build a parser over the report
    pub fn new(report: &'a RawReport) -> Self {
        let mut parser = Self {
            report,
            timestamp_col: None,
            metric_cols: HashMap::new(),
            electrometer_id: None,
        };
        parser.discover_columns();
        parser
    }

    /// Map logical roles to column ids based on column display names
    fn discover_columns(&mut self) {
        for column in &self.report.columns {
            if column.name == TIMESTAMP_LABEL {
                self.timestamp_col = Some(column.id.clone());
                continue;
            }
            for (prefix, role) in METRIC_MATCHERS {
                if column.name.starts_with(prefix) {
                    self.metric_cols.insert(*role, column.id.clone());
                    if self.electrometer_id.is_none() && prefix.ends_with('/') {
                        let suffix = &column.name[prefix.len()..];
                        if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) {
                            self.electrometer_id = Some(suffix.to_string());
                        }
                    }
                    break;
                }
            }
        }
    }

    /// The electrometer id detected from the column headers, if any
    pub fn electrometer_id(&self) -> Option<&str> {
        self.electrometer_id.as_deref()
    }

    fn cell_value<'r>(row: &'r RawRow, col_id: Option<&String>) -> Option<&'r str> {
        let cell = row.get(col_id?)?;
        cell.v.as_deref()
    }

    /// Parse all value rows into readings
    ///
    /// Rows without a parsable timestamp are skipped entirely; every other
    /// field parses independently and defaults to absent on failure, so one
    /// bad cell never discards a row.
    pub fn parse_records(&self) -> Vec<ParsedReading> {
        let mut records = Vec::new();
        for row in &self.report.values {
            let ts_str = Self::cell_value(row, self.timestamp_col.as_ref());
            let Some(timestamp) = ts_str.and_then(parse_czech_timestamp) else {
                continue;
            };

            let mut reading = ParsedReading::empty(timestamp);
            for (role, col_id) in &self.metric_cols {
                let value = parse_czech_decimal(Self::cell_value(row, Some(col_id)));
                reading.set_metric(*role, value);
            }
            records.push(reading);
        }
        records
    }

    /// The most recent reading (rows are vendor-ordered chronologically)
    pub fn latest_reading(&self) -> Option<ParsedReading> {
        self.parse_records().into_iter().next_back()
    }
}

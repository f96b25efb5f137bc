//! MQTT Discovery and state publisher for the meter sensors
//!
//! Publishes Home Assistant MQTT Discovery payloads and sensor state values
//! for every configured electrometer.
//!
//! Identity strategy (multi-electrometer safe):
//!   unique_id   : cez_pnd_{electrometer_id}_{sensor_key}
//!   device_id   : cez_pnd_{electrometer_id}
//!   device_name : CEZ PND {electrometer_id}
//!
//! Topic scheme (deterministic, no ad-hoc per run):
//!   Config : homeassistant/sensor/cez_pnd_{electrometer_id}/{key}/config
//!   State  : cez_pnd/{electrometer_id}/{key}/state
//!   Avail  : cez_pnd/{electrometer_id}/availability

use crate::config::{MeterConfig, MqttConfig};
use crate::coordinator::MergedMeterState;
use crate::error::{ElektraError, Result};
use crate::hdo::HdoState;
use crate::logging::get_logger;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use rumqttc::{AsyncClient, EventLoop, LastWill, MqttOptions, QoS};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

/// One Home Assistant sensor entity
#[derive(Debug, Clone, Copy)]
pub struct SensorDefinition {
    pub key: &'static str,
    pub name: &'static str,
    pub unit_of_measurement: Option<&'static str>,
    pub device_class: Option<&'static str>,
    pub state_class: Option<&'static str>,
    pub icon: Option<&'static str>,
}

/// The thirteen meter sensors, one per parsed metric field
pub const SENSOR_DEFINITIONS: [SensorDefinition; 13] = [
    SensorDefinition {
        key: "consumption",
        name: "CEZ {id} Consumption Power / Odběr",
        unit_of_measurement: Some("kW"),
        device_class: Some("power"),
        state_class: Some("measurement"),
        icon: Some("mdi:flash"),
    },
    SensorDefinition {
        key: "production",
        name: "CEZ {id} Production Power / Dodávka",
        unit_of_measurement: Some("kW"),
        device_class: Some("power"),
        state_class: Some("measurement"),
        icon: Some("mdi:solar-power"),
    },
    SensorDefinition {
        key: "reactive",
        name: "CEZ {id} Reactive Power / Jalový výkon",
        unit_of_measurement: Some("kW"),
        device_class: Some("reactive_power"),
        state_class: Some("measurement"),
        icon: Some("mdi:sine-wave"),
    },
    SensorDefinition {
        key: "reactive_import_inductive",
        name: "CEZ {id} Reactive Import Ri+ / Import induktivní",
        unit_of_measurement: Some("var"),
        device_class: Some("reactive_power"),
        state_class: Some("measurement"),
        icon: Some("mdi:sine-wave"),
    },
    SensorDefinition {
        key: "reactive_export_capacitive",
        name: "CEZ {id} Reactive Export Rc- / Export kapacitivní",
        unit_of_measurement: Some("var"),
        device_class: Some("reactive_power"),
        state_class: Some("measurement"),
        icon: Some("mdi:sine-wave"),
    },
    SensorDefinition {
        key: "reactive_export_inductive",
        name: "CEZ {id} Reactive Export Ri- / Export induktivní",
        unit_of_measurement: Some("var"),
        device_class: Some("reactive_power"),
        state_class: Some("measurement"),
        icon: Some("mdi:sine-wave"),
    },
    SensorDefinition {
        key: "reactive_import_capacitive",
        name: "CEZ {id} Reactive Import Rc+ / Import kapacitivní",
        unit_of_measurement: Some("var"),
        device_class: Some("reactive_power"),
        state_class: Some("measurement"),
        icon: Some("mdi:sine-wave"),
    },
    SensorDefinition {
        key: "daily_consumption",
        name: "CEZ {id} Daily Consumption / Denní odběr",
        unit_of_measurement: Some("kWh"),
        device_class: Some("energy"),
        state_class: Some("total_increasing"),
        icon: Some("mdi:flash"),
    },
    SensorDefinition {
        key: "daily_production",
        name: "CEZ {id} Daily Production / Denní dodávka",
        unit_of_measurement: Some("kWh"),
        device_class: Some("energy"),
        state_class: Some("total_increasing"),
        icon: Some("mdi:solar-power"),
    },
    SensorDefinition {
        key: "register_consumption",
        name: "CEZ {id} Register Consumption (+E) / Registr odběr",
        unit_of_measurement: Some("kWh"),
        device_class: Some("energy"),
        state_class: Some("total_increasing"),
        icon: Some("mdi:counter"),
    },
    SensorDefinition {
        key: "register_production",
        name: "CEZ {id} Register Production (-E) / Registr dodávka",
        unit_of_measurement: Some("kWh"),
        device_class: Some("energy"),
        state_class: Some("total_increasing"),
        icon: Some("mdi:counter"),
    },
    SensorDefinition {
        key: "register_low_tariff",
        name: "CEZ {id} Register Low Tariff (NT) / Registr nízký tarif",
        unit_of_measurement: Some("kWh"),
        device_class: Some("energy"),
        state_class: Some("total_increasing"),
        icon: Some("mdi:cash-minus"),
    },
    SensorDefinition {
        key: "register_high_tariff",
        name: "CEZ {id} Register High Tariff (VT) / Registr vysoký tarif",
        unit_of_measurement: Some("kWh"),
        device_class: Some("energy"),
        state_class: Some("total_increasing"),
        icon: Some("mdi:cash-plus"),
    },
];

/// The four HDO tariff sensors
pub const HDO_SENSOR_DEFINITIONS: [SensorDefinition; 4] = [
    SensorDefinition {
        key: "hdo_low_tariff_active",
        name: "CEZ {id} HDO Low Tariff Active / HDO Nízký tarif aktivní",
        unit_of_measurement: None,
        device_class: Some("binary_sensor"),
        state_class: None,
        icon: None,
    },
    SensorDefinition {
        key: "hdo_next_switch",
        name: "CEZ {id} HDO Next Switch / HDO Další přepnutí",
        unit_of_measurement: None,
        device_class: Some("timestamp"),
        state_class: None,
        icon: None,
    },
    SensorDefinition {
        key: "hdo_schedule_today",
        name: "CEZ {id} HDO Schedule Today / HDO Rozvrh dnes",
        unit_of_measurement: None,
        device_class: None,
        state_class: None,
        icon: None,
    },
    SensorDefinition {
        key: "hdo_signal",
        name: "CEZ {id} HDO Signal / HDO Signál",
        unit_of_measurement: None,
        device_class: None,
        state_class: None,
        icon: None,
    },
];

static VALID_SENSOR_KEYS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| SENSOR_DEFINITIONS.iter().map(|s| s.key).collect());

/// Discovery config topic for one sensor
pub fn config_topic(electrometer_id: &str, key: &str) -> String {
    format!(
        "homeassistant/sensor/cez_pnd_{}/{}/config",
        electrometer_id, key
    )
}

/// State topic for one sensor
pub fn state_topic(electrometer_id: &str, key: &str) -> String {
    format!("cez_pnd/{}/{}/state", electrometer_id, key)
}

/// Availability topic for one meter
pub fn availability_topic(electrometer_id: &str) -> String {
    format!("cez_pnd/{}/availability", electrometer_id)
}

/// Build an HA-compliant MQTT Discovery payload for a single sensor
///
/// When an EAN is configured, a `configuration_url` pointing at the portal
/// dashboard is added to the device metadata so the supply-point context is
/// reachable from the Home Assistant device page.
pub fn build_discovery_payload(
    sensor: &SensorDefinition,
    electrometer_id: &str,
    ean: &str,
) -> serde_json::Value {
    let device_id = format!("cez_pnd_{}", electrometer_id);

    let mut device_meta = serde_json::json!({
        "identifiers": [device_id],
        "name": format!("CEZ PND {}", electrometer_id),
        "manufacturer": "CEZ Distribuce",
        "model": "PND Electrometer",
    });
    if !ean.is_empty() {
        device_meta["configuration_url"] = serde_json::json!(format!(
            "https://pnd.cezdistribuce.cz/cezpnd2/dashboard/?ean={}",
            ean
        ));
    }

    let mut payload = serde_json::json!({
        "unique_id": format!("{}_{}", device_id, sensor.key),
        "name": sensor.name.replace("{id}", electrometer_id),
        "state_topic": state_topic(electrometer_id, sensor.key),
        "availability_topic": availability_topic(electrometer_id),
        "unit_of_measurement": sensor.unit_of_measurement,
        "device_class": sensor.device_class,
        "state_class": sensor.state_class,
        "device": device_meta,
    });
    if let Some(icon) = sensor.icon {
        payload["icon"] = serde_json::json!(icon);
    }

    payload
}

/// Render the four HDO sensor values for one tariff state
fn hdo_values(state: &HdoState) -> Vec<(&'static str, String)> {
    vec![
        (
            "hdo_low_tariff_active",
            if state.is_low_tariff { "ON" } else { "OFF" }.to_string(),
        ),
        (
            "hdo_next_switch",
            state.next_switch.format("%Y-%m-%dT%H:%M:%S").to_string(),
        ),
        ("hdo_schedule_today", state.schedule_string()),
        ("hdo_signal", state.signal_name.clone()),
    ]
}

/// Publish sink: accepts normalized readings for publication
#[async_trait]
pub trait StatePublisher: Send + Sync {
    /// Connect and announce availability
    async fn start(&self) -> Result<()>;

    /// Publish retained discovery configs for every sensor of every meter
    async fn publish_discovery(&self) -> Result<()>;

    /// Publish sensor values per meter
    async fn publish_state(&self, state: &MergedMeterState) -> Result<()>;

    /// Publish the HDO tariff state for one meter
    async fn publish_hdo_state(&self, electrometer_id: &str, state: &HdoState) -> Result<()>;

    /// Announce offline and disconnect
    async fn stop(&self) -> Result<()>;
}

/// Multi-electrometer MQTT publisher for HA Discovery and state
pub struct MqttPublisher {
    client: AsyncClient,
    meters: Vec<MeterConfig>,
    event_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    logger: crate::logging::StructuredLogger,
}

impl MqttPublisher {
    /// Create a publisher and start driving the MQTT event loop
    ///
    /// The LWT marks the first meter offline (one will per connection is an
    /// MQTT limitation); clean shutdown publishes offline for every meter.
    pub fn new(config: &MqttConfig, meters: Vec<MeterConfig>) -> Result<Self> {
        if meters.is_empty() {
            return Err(ElektraError::config(
                "MQTT publisher requires at least one meter",
            ));
        }

        let client_id = format!("elektra-{}", std::process::id());
        let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if !config.username.is_empty() {
            options.set_credentials(config.username.clone(), config.password.clone());
        }
        options.set_last_will(LastWill::new(
            availability_topic(&meters[0].electrometer_id),
            "offline",
            QoS::AtLeastOnce,
            true,
        ));

        let (client, event_loop) = AsyncClient::new(options, 50);
        let event_task = tokio::spawn(drive_event_loop(event_loop));

        Ok(Self {
            client,
            meters,
            event_task: Mutex::new(Some(event_task)),
            logger: get_logger("mqtt"),
        })
    }

    async fn publish(&self, topic: String, payload: String) -> Result<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, true, payload)
            .await
            .map_err(|e| ElektraError::mqtt(e.to_string()))
    }

    async fn publish_readings_for_meter(
        &self,
        meter_id: &str,
        readings: &std::collections::BTreeMap<&'static str, f64>,
    ) -> Result<()> {
        for (key, value) in readings {
            if !VALID_SENSOR_KEYS.contains(key) {
                self.logger
                    .warn(&format!("Ignoring unknown sensor key: {}", key));
                continue;
            }
            let topic = state_topic(meter_id, key);
            self.publish(topic.clone(), value.to_string()).await?;
            self.logger
                .debug(&format!("Published state: {} = {}", topic, value));
        }
        Ok(())
    }
}

/// Keep the connection alive; rumqttc requires the event loop to be polled
async fn drive_event_loop(mut event_loop: EventLoop) {
    let logger = get_logger("mqtt");
    loop {
        match event_loop.poll().await {
            Ok(_) => {}
            Err(e) => {
                logger.warn(&format!("MQTT connection error: {} - reconnecting", e));
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

#[async_trait]
impl StatePublisher for MqttPublisher {
    async fn start(&self) -> Result<()> {
        for meter in &self.meters {
            self.publish(
                availability_topic(&meter.electrometer_id),
                "online".to_string(),
            )
            .await?;
        }
        self.logger.info(&format!(
            "MQTT publisher started, {} electrometer(s) online",
            self.meters.len()
        ));
        Ok(())
    }

    async fn publish_discovery(&self) -> Result<()> {
        for meter in &self.meters {
            for sensor in SENSOR_DEFINITIONS.iter().chain(HDO_SENSOR_DEFINITIONS.iter()) {
                let topic = config_topic(&meter.electrometer_id, sensor.key);
                let payload =
                    build_discovery_payload(sensor, &meter.electrometer_id, &meter.ean);
                self.publish(topic.clone(), payload.to_string()).await?;
                self.logger.debug(&format!("Published discovery: {}", topic));
            }
        }
        Ok(())
    }

    async fn publish_state(&self, state: &MergedMeterState) -> Result<()> {
        for (meter_id, readings) in state {
            self.publish_readings_for_meter(meter_id, readings).await?;
        }
        Ok(())
    }

    async fn publish_hdo_state(&self, electrometer_id: &str, state: &HdoState) -> Result<()> {
        for (key, value) in hdo_values(state) {
            let topic = state_topic(electrometer_id, key);
            self.publish(topic.clone(), value.clone()).await?;
            self.logger
                .debug(&format!("Published HDO state: {} = {}", topic, value));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        for meter in &self.meters {
            let _ = self
                .publish(
                    availability_topic(&meter.electrometer_id),
                    "offline".to_string(),
                )
                .await;
        }
        let _ = self.client.disconnect().await;
        if let Ok(mut guard) = self.event_task.lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }
        self.logger
            .info("MQTT publisher stopped, availability=offline");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hdo::TariffWindow;
    use chrono::NaiveDate;

    #[test]
    fn topic_templates() {
        assert_eq!(
            config_topic("784703", "consumption"),
            "homeassistant/sensor/cez_pnd_784703/consumption/config"
        );
        assert_eq!(
            state_topic("784703", "consumption"),
            "cez_pnd/784703/consumption/state"
        );
        assert_eq!(availability_topic("784703"), "cez_pnd/784703/availability");
    }

    #[test]
    fn sensor_definitions_are_unique() {
        let mut keys: Vec<&str> = SENSOR_DEFINITIONS
            .iter()
            .chain(HDO_SENSOR_DEFINITIONS.iter())
            .map(|s| s.key)
            .collect();
        let total = keys.len();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), total);
        assert_eq!(SENSOR_DEFINITIONS.len(), 13);
        assert_eq!(HDO_SENSOR_DEFINITIONS.len(), 4);
    }

    #[test]
    fn discovery_payload_shape() {
        let payload = build_discovery_payload(&SENSOR_DEFINITIONS[0], "784703", "");
        assert_eq!(payload["unique_id"], "cez_pnd_784703_consumption");
        assert_eq!(payload["name"], "CEZ 784703 Consumption Power / Odběr");
        assert_eq!(payload["state_topic"], "cez_pnd/784703/consumption/state");
        assert_eq!(payload["availability_topic"], "cez_pnd/784703/availability");
        assert_eq!(payload["unit_of_measurement"], "kW");
        assert_eq!(payload["device_class"], "power");
        assert_eq!(payload["icon"], "mdi:flash");
        assert_eq!(payload["device"]["identifiers"][0], "cez_pnd_784703");
        assert_eq!(payload["device"]["manufacturer"], "CEZ Distribuce");
        assert!(payload["device"].get("configuration_url").is_none());
    }

    #[test]
    fn discovery_payload_carries_ean_url() {
        let payload =
            build_discovery_payload(&SENSOR_DEFINITIONS[0], "784703", "859182400100000000");
        assert_eq!(
            payload["device"]["configuration_url"],
            "https://pnd.cezdistribuce.cz/cezpnd2/dashboard/?ean=859182400100000000"
        );
    }

    #[test]
    fn hdo_payload_rendering() {
        let state = HdoState {
            is_low_tariff: true,
            next_switch: NaiveDate::from_ymd_opt(2026, 2, 15)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap(),
            today_schedule: vec![
                TariffWindow {
                    start_min: 0,
                    end_min: 480,
                },
                TariffWindow {
                    start_min: 1200,
                    end_min: 1440,
                },
            ],
            signal_name: "EVV2".to_string(),
        };
        let values = hdo_values(&state);
        assert_eq!(
            values,
            vec![
                ("hdo_low_tariff_active", "ON".to_string()),
                ("hdo_next_switch", "2026-02-15T08:00:00".to_string()),
                ("hdo_schedule_today", "00:00-08:00; 20:00-24:00".to_string()),
                ("hdo_signal", "EVV2".to_string()),
            ]
        );

        let high = HdoState {
            is_low_tariff: false,
            ..state
        };
        assert_eq!(hdo_values(&high)[0].1, "OFF");
    }

    #[test]
    fn sensor_keys_cover_parser_roles() {
        for role in crate::parser::MetricRole::all() {
            assert!(
                VALID_SENSOR_KEYS.contains(role.sensor_key()),
                "missing sensor definition for {}",
                role.sensor_key()
            );
        }
    }
}

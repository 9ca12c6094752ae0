// MIT License - Copyright (c) 2026 Peter Wright
// Local security module: arming, alarm, sensors and home mode

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::config::PlcConfig;
use crate::error::{PlcError, Result};
use crate::event::{EventSender, PlcEvent};
use crate::gpio::{Gpio, GpioPin};
use crate::scenario::ScenarioEngine;

/// Whether the occupants are at home. Gates scenario evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HomeMode {
    InHome,
    OutHome,
}

impl HomeMode {
    /// Mode implied by the arming state: armed means nobody is home.
    pub fn for_armed(armed: bool) -> Self {
        if armed { HomeMode::OutHome } else { HomeMode::InHome }
    }
}

impl fmt::Display for HomeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HomeMode::InHome => write!(f, "in-home"),
            HomeMode::OutHome => write!(f, "out-of-home"),
        }
    }
}

/// Detector technology of a security sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorType {
    /// Magnetic door/window contact
    Reed,
    /// Passive infrared motion detector
    Pir,
    /// Microwave motion detector
    Microwave,
}

/// Snapshot of one sensor as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecuritySensor {
    pub name: String,
    #[serde(rename = "type")]
    pub sensor_type: SensorType,
    pub detected: bool,
}

#[derive(Debug)]
struct SecurityState {
    status: bool,
    alarm: bool,
    sensors: Vec<SecuritySensor>,
    home_mode: HomeMode,
}

/// Security state of the local unit.
///
/// Remote units are never shadowed here; their state is only reachable
/// through [`crate::rpc::Rpc`].
pub struct Security {
    state: RwLock<SecurityState>,
    /// Held across a home mode switch and its scenario run, so transitions
    /// apply their rules in the order they were committed.
    transition: Mutex<()>,
    /// Input pin per sensor, parallel to `state.sensors`
    sensor_pins: Vec<Option<GpioPin>>,
    alarm_pin: Option<GpioPin>,
    gpio: Arc<dyn Gpio>,
    scenario: Option<Arc<ScenarioEngine>>,
    event_tx: EventSender,
    poll_interval: Duration,
}

impl Security {
    /// Disarmed, no alarm, in-home, no sensors.
    pub fn new(config: &PlcConfig, gpio: Arc<dyn Gpio>, event_tx: EventSender) -> Self {
        Self {
            state: RwLock::new(SecurityState {
                status: false,
                alarm: false,
                sensors: Vec::new(),
                home_mode: HomeMode::InHome,
            }),
            transition: Mutex::new(()),
            sensor_pins: Vec::new(),
            alarm_pin: None,
            gpio,
            scenario: None,
            event_tx,
            poll_interval: config.sensor_poll_interval(),
        }
    }

    /// Register a sensor. Without a pin the sensor is reported but never polled.
    pub fn add_sensor(
        &mut self,
        name: impl Into<String>,
        sensor_type: SensorType,
        pin: Option<GpioPin>,
    ) -> Result<()> {
        let name = name.into();
        let state = self.state.get_mut();
        if state.sensors.iter().any(|s| s.name == name) {
            return Err(PlcError::config(format!("duplicate security sensor \"{}\"", name)));
        }

        info!("Add Security sensor \"{}\" type: {:?}", name, sensor_type);
        state.sensors.push(SecuritySensor {
            name,
            sensor_type,
            detected: false,
        });
        self.sensor_pins.push(pin);
        Ok(())
    }

    /// Output pin mirroring the alarm flag (LED or buzzer).
    pub fn set_alarm_pin(&mut self, pin: GpioPin) {
        self.alarm_pin = Some(pin);
    }

    /// Engine evaluated on every local home mode transition.
    pub fn set_scenario(&mut self, engine: Arc<ScenarioEngine>) {
        self.scenario = Some(engine);
    }

    pub async fn status(&self) -> bool {
        self.state.read().await.status
    }

    /// Arm or disarm. Home mode follows, and disarming clears the alarm.
    pub async fn set_status(&self, status: bool) -> Result<()> {
        let _transition = self.transition.lock().await;
        let changed_mode = {
            let mut state = self.state.write().await;
            if state.status != status {
                info!("Security {}", if status { "armed" } else { "disarmed" });
                state.status = status;
                let _ = self.event_tx.send(PlcEvent::SecurityStatusChanged { status });
            }
            if !status && state.alarm {
                if let Err(e) = self.apply_alarm(&mut state, false) {
                    warn!("Failed to clear alarm on disarm: {}", e);
                }
            }
            self.switch_mode(&mut state, HomeMode::for_armed(status))
        };

        if let Some(mode) = changed_mode {
            self.run_scenario(mode).await;
        }
        Ok(())
    }

    pub async fn alarm(&self) -> bool {
        self.state.read().await.alarm
    }

    /// Raise or clear the alarm flag and drive the alarm pin if configured.
    ///
    /// The flag keeps the requested value when the pin write fails.
    pub async fn set_alarm(&self, alarm: bool) -> Result<()> {
        let mut state = self.state.write().await;
        self.apply_alarm(&mut state, alarm)
    }

    /// Sensors in registration order.
    pub async fn sensors(&self) -> Vec<SecuritySensor> {
        self.state.read().await.sensors.clone()
    }

    pub async fn home_mode(&self) -> HomeMode {
        self.state.read().await.home_mode
    }

    /// Switch home mode directly. Returns whether it changed.
    pub async fn set_home_mode(&self, mode: HomeMode) -> bool {
        let _transition = self.transition.lock().await;
        let changed_mode = {
            let mut state = self.state.write().await;
            self.switch_mode(&mut state, mode)
        };
        match changed_mode {
            Some(mode) => {
                self.run_scenario(mode).await;
                true
            }
            None => false,
        }
    }

    fn apply_alarm(&self, state: &mut SecurityState, alarm: bool) -> Result<()> {
        let changed = state.alarm != alarm;
        state.alarm = alarm;
        if changed {
            if alarm {
                warn!("Security alarm raised");
            } else {
                info!("Security alarm cleared");
            }
            let _ = self.event_tx.send(PlcEvent::AlarmChanged { alarm });
        }
        if let Some(pin) = &self.alarm_pin {
            self.gpio.write(pin, alarm)?;
        }
        Ok(())
    }

    fn switch_mode(&self, state: &mut SecurityState, mode: HomeMode) -> Option<HomeMode> {
        if state.home_mode == mode {
            return None;
        }
        info!("Home mode: {}", mode);
        state.home_mode = mode;
        let _ = self.event_tx.send(PlcEvent::HomeModeChanged { mode });
        Some(mode)
    }

    async fn run_scenario(&self, mode: HomeMode) {
        if let Some(engine) = &self.scenario {
            engine.apply_mode(mode).await;
        }
    }

    /// Read every sensor pin once and refresh `detected`.
    ///
    /// A new detection while armed raises the alarm. Returns the names of
    /// sensors whose state changed.
    pub async fn poll_sensors(&self) -> Vec<String> {
        let mut levels = Vec::with_capacity(self.sensor_pins.len());
        for (idx, pin) in self.sensor_pins.iter().enumerate() {
            let Some(pin) = pin else { continue };
            match self.gpio.read(pin) {
                Ok(level) => levels.push((idx, level)),
                Err(e) => error!("Failed to read GPIO \"{}\": {}", pin.name, e),
            }
        }

        let mut state = self.state.write().await;
        let armed = state.status;
        let mut changed = Vec::new();
        let mut trigger = None;
        for (idx, detected) in levels {
            let sensor = &mut state.sensors[idx];
            if sensor.detected == detected {
                continue;
            }
            sensor.detected = detected;
            if detected {
                info!("Sensor \"{}\" detected", sensor.name);
                if armed && trigger.is_none() {
                    trigger = Some(sensor.name.clone());
                }
            } else {
                debug!("Sensor \"{}\" clear", sensor.name);
            }
            changed.push(sensor.name.clone());
        }

        if let Some(name) = trigger {
            if !state.alarm {
                warn!("Intrusion on sensor \"{}\"", name);
                if let Err(e) = self.apply_alarm(&mut state, true) {
                    error!("Failed to drive alarm output: {}", e);
                }
            }
        }
        changed
    }

    /// Start the sensor poll loop if any sensor has a pin.
    pub fn start(self: &Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        if self.sensor_pins.iter().all(Option::is_none) {
            return None;
        }
        info!("Starting Security sensor poller");
        let security = self.clone();
        Some(tokio::spawn(async move {
            loop {
                security.poll_sensors().await;
                sleep(security.poll_interval).await;
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::event_channel;
    use crate::gpio::MemoryGpio;

    fn security() -> (Security, Arc<MemoryGpio>) {
        let gpio = Arc::new(MemoryGpio::new());
        let (event_tx, _) = event_channel(64);
        let mut security = Security::new(&PlcConfig::default(), gpio.clone(), event_tx);
        security
            .add_sensor("hall", SensorType::Pir, Some(GpioPin::new("hall_pir", 5)))
            .unwrap();
        security
            .add_sensor("door", SensorType::Reed, Some(GpioPin::new("door_reed", 6)))
            .unwrap();
        security.add_sensor("attic", SensorType::Microwave, None).unwrap();
        security.set_alarm_pin(GpioPin::new("siren", 7));
        (security, gpio)
    }

    #[tokio::test]
    async fn test_status_and_home_mode() {
        let (security, _gpio) = security();
        assert!(!security.status().await);
        assert_eq!(security.home_mode().await, HomeMode::InHome);

        security.set_status(true).await.unwrap();
        assert!(security.status().await);
        assert_eq!(security.home_mode().await, HomeMode::OutHome);

        security.set_status(false).await.unwrap();
        assert_eq!(security.home_mode().await, HomeMode::InHome);

        assert!(security.set_home_mode(HomeMode::OutHome).await);
        assert!(!security.set_home_mode(HomeMode::OutHome).await);
    }

    #[tokio::test]
    async fn test_alarm_drives_pin() {
        let (security, gpio) = security();
        security.set_alarm(true).await.unwrap();
        assert!(security.alarm().await);
        assert_eq!(gpio.level("siren"), Some(true));

        security.set_status(true).await.unwrap();
        security.set_status(false).await.unwrap();
        assert!(!security.alarm().await);
        assert_eq!(gpio.level("siren"), Some(false));
    }

    #[tokio::test]
    async fn test_alarm_pin_failure() {
        let (security, gpio) = security();
        gpio.fail_writes("siren", true);
        let err = security.set_alarm(true).await.unwrap_err();
        assert!(matches!(err, PlcError::Hardware { .. }));
        assert!(security.alarm().await);
    }

    #[tokio::test]
    async fn test_detection_while_armed_raises_alarm() {
        let (security, gpio) = security();
        security.set_status(true).await.unwrap();

        gpio.set_level("door_reed", true);
        assert_eq!(security.poll_sensors().await, ["door"]);
        assert!(security.alarm().await);
        assert_eq!(gpio.level("siren"), Some(true));

        let sensors = security.sensors().await;
        let names: Vec<_> = sensors.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["hall", "door", "attic"]);
        assert!(sensors[1].detected);
        assert!(!sensors[0].detected);
    }

    #[tokio::test]
    async fn test_detection_while_disarmed() {
        let (security, gpio) = security();
        gpio.set_level("hall_pir", true);
        assert_eq!(security.poll_sensors().await, ["hall"]);
        assert!(!security.alarm().await);
        assert!(security.poll_sensors().await.is_empty());

        gpio.set_level("hall_pir", false);
        gpio.fail_reads("door_reed", true);
        assert_eq!(security.poll_sensors().await, ["hall"]);
    }

    #[test]
    fn test_duplicate_sensor_rejected() {
        let (mut security, _gpio) = security();
        assert!(matches!(
            security.add_sensor("hall", SensorType::Reed, None),
            Err(PlcError::Configuration { .. })
        ));
    }

    #[test]
    fn test_sensor_wire_format() {
        let sensor = SecuritySensor {
            name: "hall".to_string(),
            sensor_type: SensorType::Pir,
            detected: true,
        };
        let json = serde_json::to_value(&sensor).unwrap();
        assert_eq!(json["type"], "pir");
        assert_eq!(serde_json::to_value(HomeMode::OutHome).unwrap(), "outhome");
    }
}

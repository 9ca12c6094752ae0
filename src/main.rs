// MIT License - Copyright (c) 2026 Peter Wright
// Controller daemon

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info, warn};

use plc_stack::{
    Gpio, GpioDirection, GpioPin, MemoryGpio, Plc, PlcConfig, PlcEvent, ScenarioRule,
    SensorType, Socket, SocketGroup, SqliteDatabase, StackUnit, SysfsGpio, UnitId,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "plcd")]
#[command(about = "Home controller unit: sockets, security, scenarios and stack RPC")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "plcd.toml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct Config {
    plc: PlcToml,
    #[serde(default)]
    gpio: Vec<GpioToml>,
    #[serde(default)]
    stack: Vec<StackUnit>,
    #[serde(default)]
    socket: Vec<SocketToml>,
    #[serde(default)]
    sensor: Vec<SensorToml>,
    #[serde(default)]
    scenario: Vec<ScenarioRule>,
}

#[derive(Debug, Clone, Deserialize)]
struct PlcToml {
    /// Stack id of this unit
    unit: UnitId,
    #[serde(default = "default_rpc_bind_ip")]
    rpc_bind_ip: String,
    #[serde(default = "default_rpc_port")]
    rpc_port: u16,
    #[serde(default = "default_rpc_timeout")]
    rpc_timeout_ms: u64,
    #[serde(default = "default_poll_interval")]
    poll_interval_ms: u64,
    #[serde(default = "default_debounce")]
    debounce_ms: u64,
    #[serde(default = "default_sensor_poll_interval")]
    sensor_poll_interval_ms: u64,
    #[serde(default = "default_socket_db")]
    socket_db: String,
    #[serde(default)]
    gpio_backend: GpioBackend,
    #[serde(default = "default_gpio_root")]
    gpio_root: String,
    /// Name of a `[[gpio]]` output mirroring the alarm flag
    #[serde(default)]
    alarm_pin: Option<String>,
}

fn default_rpc_bind_ip() -> String {
    PlcConfig::default().rpc_bind_ip
}
fn default_rpc_port() -> u16 {
    PlcConfig::default().rpc_port
}
fn default_rpc_timeout() -> u64 {
    PlcConfig::default().rpc_timeout_ms
}
fn default_poll_interval() -> u64 {
    PlcConfig::default().poll_interval_ms
}
fn default_debounce() -> u64 {
    PlcConfig::default().debounce_ms
}
fn default_sensor_poll_interval() -> u64 {
    PlcConfig::default().sensor_poll_interval_ms
}
fn default_socket_db() -> String {
    PlcConfig::default().socket_db
}
fn default_gpio_root() -> String {
    "/sys/class/gpio".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum GpioBackend {
    #[default]
    Sysfs,
    Memory,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum DirectionToml {
    In,
    Out,
}

#[derive(Debug, Clone, Deserialize)]
struct GpioToml {
    name: String,
    pin: u32,
    direction: DirectionToml,
}

#[derive(Debug, Clone, Deserialize)]
struct SocketToml {
    name: String,
    button: String,
    relay: String,
    #[serde(default = "default_socket_group")]
    group: SocketGroup,
}

fn default_socket_group() -> SocketGroup {
    SocketGroup::Socket
}

#[derive(Debug, Clone, Deserialize)]
struct SensorToml {
    name: String,
    #[serde(rename = "type")]
    sensor_type: SensorType,
    #[serde(default)]
    pin: Option<String>,
}

fn load_config(path: &str) -> Result<Config> {
    let text = std::fs::read_to_string(path).context("Failed to read config file")?;
    toml::from_str(&text).context("Failed to parse config file")
}

fn build_plc_config(toml: &PlcToml) -> PlcConfig {
    PlcConfig::builder()
        .rpc_bind_ip(&toml.rpc_bind_ip)
        .rpc_port(toml.rpc_port)
        .rpc_timeout_ms(toml.rpc_timeout_ms)
        .poll_interval_ms(toml.poll_interval_ms)
        .debounce_ms(toml.debounce_ms)
        .sensor_poll_interval_ms(toml.sensor_poll_interval_ms)
        .socket_db(&toml.socket_db)
        .build()
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

struct PinTable {
    pins: HashMap<String, (GpioPin, GpioDirection)>,
}

impl PinTable {
    fn new(defs: &[GpioToml]) -> Result<Self> {
        let mut pins = HashMap::new();
        for def in defs {
            let direction = match def.direction {
                DirectionToml::In => GpioDirection::Input,
                DirectionToml::Out => GpioDirection::Output,
            };
            let pin = GpioPin::new(&def.name, def.pin);
            if pins.insert(def.name.clone(), (pin, direction)).is_some() {
                anyhow::bail!("Duplicate GPIO name: {}", def.name);
            }
        }
        Ok(Self { pins })
    }

    fn get(&self, name: &str, direction: GpioDirection) -> Result<GpioPin> {
        match self.pins.get(name) {
            Some((pin, dir)) if *dir == direction => Ok(pin.clone()),
            Some(_) => anyhow::bail!("GPIO \"{name}\" has the wrong direction"),
            None => anyhow::bail!("Unknown GPIO: {name}"),
        }
    }
}

fn build_gpio(config: &Config, pins: &PinTable) -> Result<Arc<dyn Gpio>> {
    match config.plc.gpio_backend {
        GpioBackend::Memory => {
            info!("Using in-memory GPIO (dry run)");
            let gpio: Arc<dyn Gpio> = Arc::new(MemoryGpio::new());
            Ok(gpio)
        }
        GpioBackend::Sysfs => {
            let sysfs = SysfsGpio::new(&config.plc.gpio_root);
            for (pin, direction) in pins.pins.values() {
                sysfs
                    .export(pin, *direction)
                    .with_context(|| format!("Failed to export GPIO \"{}\"", pin.name))?;
            }
            let gpio: Arc<dyn Gpio> = Arc::new(sysfs);
            Ok(gpio)
        }
    }
}

fn build_plc(config: &Config) -> Result<Plc> {
    let pins = PinTable::new(&config.gpio)?;
    let gpio = build_gpio(config, &pins)?;
    let plc_config = build_plc_config(&config.plc);
    let database = SqliteDatabase::new();

    let mut builder = Plc::builder(plc_config, config.plc.unit)
        .gpio(gpio)
        .database(Arc::new(database));

    for unit in &config.stack {
        builder = builder.unit(unit.clone());
    }
    for socket in &config.socket {
        let button = pins.get(&socket.button, GpioDirection::Input)?;
        let relay = pins.get(&socket.relay, GpioDirection::Output)?;
        builder = builder.socket(Socket::new(&socket.name, button, relay, socket.group));
    }
    for sensor in &config.sensor {
        let pin = match &sensor.pin {
            Some(name) => Some(pins.get(name, GpioDirection::Input)?),
            None => None,
        };
        builder = builder.sensor(&sensor.name, sensor.sensor_type, pin);
    }
    if let Some(name) = &config.plc.alarm_pin {
        builder = builder.alarm_pin(pins.get(name, GpioDirection::Output)?);
    }
    for rule in &config.scenario {
        builder = builder.rule(rule.clone());
    }

    builder.build().context("Invalid controller configuration")
}

fn log_event(event: &PlcEvent) {
    match event {
        PlcEvent::SaveFailed { name, reason } => {
            warn!("Socket \"{name}\" status not saved: {reason}")
        }
        PlcEvent::ScenarioApplied {
            unit,
            mode,
            applied,
            failed,
        } if *failed > 0 => {
            warn!("Scenario {mode} for unit {unit}: {failed} of {} rules failed", applied + failed)
        }
        other => debug!("Event: {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity (e.g. RUST_LOG=debug or RUST_LOG=plc_stack=trace).
    // Default: info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // systemd journal already adds timestamps, so omit them when running under systemd
    if std::env::var_os("JOURNAL_STREAM").is_some() {
        tracing_subscriber::fmt().without_time().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        let mut plc = build_plc(&config)?;
        let mut events = plc.subscribe();
        plc.start().await.context("Failed to start controller")?;

        let event_handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => log_event(&event),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Event logger lagged, {n} events dropped")
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        info!("plcd running. Send SIGHUP to reload, SIGINT/SIGTERM to stop.");
        let restart = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down...");
                false
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                false
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP, reloading config...");
                true
            }
        };

        event_handle.abort();
        plc.shutdown().await;

        if !restart {
            break;
        }

        // Keep the previous config if the new one does not load.
        info!("Reloading config from {}", cli.config);
        match load_config(&cli.config) {
            Ok(new_config) => {
                config = new_config;
                info!("Config reloaded successfully");
            }
            Err(e) => warn!("Failed to reload config, keeping previous: {e:#}"),
        }
    }

    info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [plc]
        unit = 1
        rpc_port = 9100
        gpio_backend = "memory"
        alarm_pin = "siren"

        [[gpio]]
        name = "porch_btn"
        pin = 17
        direction = "in"

        [[gpio]]
        name = "porch_relay"
        pin = 27
        direction = "out"

        [[gpio]]
        name = "siren"
        pin = 22
        direction = "out"

        [[stack]]
        id = 1
        name = "House"
        ip = "127.0.0.1"
        port = 9100

        [[socket]]
        name = "porch"
        button = "porch_btn"
        relay = "porch_relay"
        group = "light"

        [[sensor]]
        name = "attic"
        type = "microwave"

        [[scenario]]
        unit = 1
        mode = "outhome"
        action = { ctrl = "socket", name = "porch", status = true }
    "#;

    #[test]
    fn test_parse_config() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.plc.unit, 1);
        assert_eq!(config.plc.gpio_backend, GpioBackend::Memory);
        assert_eq!(config.plc.debounce_ms, 800);
        assert_eq!(config.stack[0].name, "House");
        assert_eq!(config.socket[0].group, SocketGroup::Light);
        assert_eq!(config.scenario.len(), 1);

        let plc_config = build_plc_config(&config.plc);
        assert_eq!(plc_config.rpc_bind_addr(), "0.0.0.0:9100");
    }

    #[test]
    fn test_pin_table() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let pins = PinTable::new(&config.gpio).unwrap();
        assert_eq!(pins.get("porch_btn", GpioDirection::Input).unwrap().pin, 17);
        assert!(pins.get("porch_btn", GpioDirection::Output).is_err());
        assert!(pins.get("nope", GpioDirection::Input).is_err());
    }

    #[tokio::test]
    async fn test_build_plc_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.plc.socket_db = dir.path().join("socket.db").display().to_string();

        let plc = build_plc(&config).unwrap();
        assert!(plc.sockets().find("porch").is_some());
        assert_eq!(plc.scenario().rules().len(), 1);

        config.socket[0].relay = "porch_btn".to_string();
        assert!(build_plc(&config).is_err());
    }
}

// MIT License - Copyright (c) 2026 Peter Wright
// Controller world context

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::PlcConfig;
use crate::database::{Database, SqliteDatabase};
use crate::devices::security::{Security, SensorType};
use crate::devices::socket::{Socket, SocketController};
use crate::error::{PlcError, Result};
use crate::event::{event_channel, EventReceiver, EventSender};
use crate::gpio::{Gpio, GpioPin, MemoryGpio};
use crate::rpc::{Rpc, RpcClient, RpcServer};
use crate::scenario::{ScenarioEngine, ScenarioRule};
use crate::stack::{Stack, StackUnit, UnitId};

struct SensorDef {
    name: String,
    sensor_type: SensorType,
    pin: Option<GpioPin>,
}

/// Collects the device tables of one unit before wiring them together.
pub struct PlcBuilder {
    config: PlcConfig,
    local: UnitId,
    gpio: Option<Arc<dyn Gpio>>,
    database: Option<Arc<dyn Database>>,
    units: Vec<StackUnit>,
    sockets: Vec<Socket>,
    sensors: Vec<SensorDef>,
    alarm_pin: Option<GpioPin>,
    rules: Vec<ScenarioRule>,
}

impl PlcBuilder {
    pub fn gpio(mut self, gpio: Arc<dyn Gpio>) -> Self {
        self.gpio = Some(gpio);
        self
    }

    pub fn database(mut self, database: Arc<dyn Database>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn unit(mut self, unit: StackUnit) -> Self {
        self.units.push(unit);
        self
    }

    pub fn socket(mut self, socket: Socket) -> Self {
        self.sockets.push(socket);
        self
    }

    pub fn sensor(mut self, name: impl Into<String>, sensor_type: SensorType, pin: Option<GpioPin>) -> Self {
        self.sensors.push(SensorDef {
            name: name.into(),
            sensor_type,
            pin,
        });
        self
    }

    pub fn alarm_pin(mut self, pin: GpioPin) -> Self {
        self.alarm_pin = Some(pin);
        self
    }

    pub fn rule(mut self, rule: ScenarioRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Wire everything together. Any configuration error aborts the build.
    ///
    /// Must be called from within a tokio runtime. Without a GPIO backend the
    /// unit runs on an in-memory pin bank; without a database it uses SQLite.
    pub fn build(self) -> Result<Plc> {
        let (event_tx, _) = event_channel(self.config.event_capacity);

        let mut stack = Stack::new(self.local);
        for unit in self.units {
            stack.add(unit)?;
        }
        if stack.resolve_by_id(self.local).is_none() {
            return Err(PlcError::config(format!(
                "local unit {} is not part of the stack",
                self.local
            )));
        }
        let stack = Arc::new(stack);

        let gpio: Arc<dyn Gpio> = match self.gpio {
            Some(gpio) => gpio,
            None => {
                warn!("No GPIO backend configured, using in-memory pins");
                Arc::new(MemoryGpio::new())
            }
        };
        let database: Arc<dyn Database> = match self.database {
            Some(database) => database,
            None => Arc::new(SqliteDatabase::new()),
        };

        let mut sockets = SocketController::new(&self.config, gpio.clone(), database, event_tx.clone());
        for socket in self.sockets {
            sockets.register(socket)?;
        }
        let sockets = Arc::new(sockets);

        let client = RpcClient::new(self.config.rpc_timeout());
        let mut scenario = ScenarioEngine::new(stack.clone(), sockets.clone(), client.clone(), event_tx.clone());
        for rule in self.rules {
            scenario.add(rule)?;
        }
        let scenario = Arc::new(scenario);

        let mut security = Security::new(&self.config, gpio, event_tx.clone());
        for sensor in self.sensors {
            security.add_sensor(sensor.name, sensor.sensor_type, sensor.pin)?;
        }
        if let Some(pin) = self.alarm_pin {
            security.set_alarm_pin(pin);
        }
        security.set_scenario(scenario.clone());
        let security = Arc::new(security);

        let rpc = Rpc::new(stack.clone(), security.clone(), sockets.clone(), client);
        let server = Arc::new(RpcServer::new(security.clone(), sockets.clone()));

        Ok(Plc {
            config: self.config,
            stack,
            sockets,
            security,
            scenario,
            rpc,
            server,
            event_tx,
            tasks: Vec::new(),
        })
    }
}

/// One unit's controller: registry, devices, scenarios and RPC, wired
/// together and owned in one place.
pub struct Plc {
    config: PlcConfig,
    stack: Arc<Stack>,
    sockets: Arc<SocketController>,
    security: Arc<Security>,
    scenario: Arc<ScenarioEngine>,
    rpc: Rpc,
    server: Arc<RpcServer>,
    event_tx: EventSender,
    tasks: Vec<JoinHandle<()>>,
}

impl Plc {
    /// Start describing the unit whose stack id is `local`.
    pub fn builder(config: PlcConfig, local: UnitId) -> PlcBuilder {
        PlcBuilder {
            config,
            local,
            gpio: None,
            database: None,
            units: Vec::new(),
            sockets: Vec::new(),
            sensors: Vec::new(),
            alarm_pin: None,
            rules: Vec::new(),
        }
    }

    pub fn config(&self) -> &PlcConfig {
        &self.config
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn sockets(&self) -> &SocketController {
        &self.sockets
    }

    pub fn security(&self) -> &Security {
        &self.security
    }

    pub fn scenario(&self) -> &ScenarioEngine {
        &self.scenario
    }

    pub fn rpc(&self) -> &Rpc {
        &self.rpc
    }

    /// Subscribe to controller events.
    pub fn subscribe(&self) -> EventReceiver {
        self.event_tx.subscribe()
    }

    /// Resolve a user-supplied unit name to its id.
    pub fn unit_id(&self, name: &str) -> Result<UnitId> {
        self.stack
            .resolve_by_name(name)
            .map(|unit| unit.id)
            .ok_or_else(|| PlcError::UnitNotFound {
                name: name.to_string(),
            })
    }

    /// Restore sockets, bind the RPC server on the configured address and
    /// start the background loops. Returns the bound address.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        let listener = RpcServer::bind(&self.config.rpc_bind_addr()).await?;
        self.start_on(listener).await
    }

    /// [`Self::start`] with an already bound listener.
    pub async fn start_on(&mut self, listener: TcpListener) -> Result<SocketAddr> {
        let addr = listener.local_addr()?;
        let restored = self.sockets.restore().await;
        info!("Restored {} of {} sockets", restored, self.sockets.len());

        self.tasks.push(self.server.start(listener));
        self.tasks.push(self.sockets.start());
        if let Some(handle) = self.security.start() {
            self.tasks.push(handle);
        }
        info!("Unit {} running, RPC on {}", self.stack.local_id(), addr);
        Ok(addr)
    }

    /// Stop the background loops.
    pub fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    /// Stop the background loops and wait until they are gone, so the RPC
    /// port is free again.
    pub async fn shutdown(mut self) {
        let tasks: Vec<_> = self.tasks.drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }
        info!("Unit {} stopped", self.stack.local_id());
    }
}

impl Drop for Plc {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryDatabase;
    use crate::devices::security::HomeMode;
    use crate::devices::socket::SocketGroup;
    use crate::event::PlcEvent;
    use crate::scenario::ScenarioAction;
    use crate::stack::LOCAL_UNIT;

    fn socket(name: &str, pin: u32) -> Socket {
        Socket::new(
            name,
            GpioPin::new(format!("{name}_btn"), pin),
            GpioPin::new(format!("{name}_relay"), pin + 1),
            SocketGroup::Socket,
        )
    }

    fn builder(gpio: Arc<MemoryGpio>) -> PlcBuilder {
        Plc::builder(PlcConfig::default(), 1)
            .gpio(gpio)
            .database(Arc::new(MemoryDatabase::new()))
            .unit(StackUnit::new(1, "House", "127.0.0.1", 8090))
            .unit(StackUnit::new(2, "Garage", "127.0.0.1", 8091))
            .socket(socket("porch", 10))
            .socket(socket("garden", 12))
    }

    #[tokio::test]
    async fn test_arming_applies_scenario() {
        let gpio = Arc::new(MemoryGpio::new());
        let plc = builder(gpio.clone())
            .rule(ScenarioRule::new(1, HomeMode::OutHome, ScenarioAction::socket("porch", true)))
            .rule(ScenarioRule::new(LOCAL_UNIT, HomeMode::OutHome, ScenarioAction::socket("garden", false)))
            .rule(ScenarioRule::new(1, HomeMode::InHome, ScenarioAction::socket("porch", false)))
            .build()
            .unwrap();
        let mut events = plc.subscribe();

        plc.rpc().security_status_set(LOCAL_UNIT, true).await.unwrap();
        assert_eq!(plc.security().home_mode().await, HomeMode::OutHome);
        assert!(plc.sockets().find("porch").unwrap().status());
        assert_eq!(gpio.level("porch_relay"), Some(true));
        assert_eq!(gpio.level("garden_relay"), Some(false));

        // Re-arming is not a mode transition.
        let writes = gpio.write_count("porch_relay");
        plc.rpc().security_status_set(1, true).await.unwrap();
        assert_eq!(gpio.write_count("porch_relay"), writes);

        plc.rpc().security_status_set(1, false).await.unwrap();
        assert!(!plc.sockets().find("porch").unwrap().status());

        let mut applied = 0;
        while let Ok(event) = events.try_recv() {
            if let PlcEvent::ScenarioApplied { unit, failed, .. } = event {
                assert_eq!(unit, 1);
                assert_eq!(failed, 0);
                applied += 1;
            }
        }
        assert_eq!(applied, 2);
    }

    #[tokio::test]
    async fn test_racing_arm_and_disarm_apply_in_order() {
        // Garage accepts connections but never answers, so the out-of-home
        // run stalls on its remote rule until the RPC timeout.
        let garage = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let garage_port = garage.local_addr().unwrap().port();
        let config = PlcConfig::builder().rpc_timeout_ms(300).build();

        let gpio = Arc::new(MemoryGpio::new());
        let plc = Plc::builder(config, 1)
            .gpio(gpio.clone())
            .database(Arc::new(MemoryDatabase::new()))
            .unit(StackUnit::new(1, "House", "127.0.0.1", 8090))
            .unit(StackUnit::new(2, "Garage", "127.0.0.1", garage_port))
            .socket(socket("porch", 10))
            .rule(ScenarioRule::new(2, HomeMode::OutHome, ScenarioAction::socket("pump", false)))
            .rule(ScenarioRule::new(1, HomeMode::OutHome, ScenarioAction::socket("porch", true)))
            .rule(ScenarioRule::new(1, HomeMode::InHome, ScenarioAction::socket("porch", false)))
            .build()
            .unwrap();

        let security = plc.security();
        let (armed, disarmed) = tokio::join!(security.set_status(true), async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            security.set_status(false).await
        });
        armed.unwrap();
        disarmed.unwrap();

        assert!(!security.status().await);
        assert_eq!(security.home_mode().await, HomeMode::InHome);
        assert!(!plc.sockets().find("porch").unwrap().status());
        assert_eq!(gpio.level("porch_relay"), Some(false));
        drop(garage);
    }

    #[tokio::test]
    async fn test_build_rejects_bad_config() {
        let gpio = Arc::new(MemoryGpio::new());
        let err = builder(gpio.clone())
            .unit(StackUnit::new(3, "Garage", "127.0.0.1", 8092))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, PlcError::DuplicateUnitName { .. }));

        let err = builder(gpio.clone())
            .socket(socket("porch", 20))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, PlcError::DuplicateSocket { .. }));

        let err = builder(gpio.clone())
            .rule(ScenarioRule::new(1, HomeMode::InHome, ScenarioAction::socket("shed", true)))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, PlcError::Configuration { .. }));

        let err = Plc::builder(PlcConfig::default(), 5)
            .gpio(gpio)
            .database(Arc::new(MemoryDatabase::new()))
            .unit(StackUnit::new(1, "House", "127.0.0.1", 8090))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, PlcError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_unit_lookup() {
        let plc = builder(Arc::new(MemoryGpio::new())).build().unwrap();
        assert_eq!(plc.unit_id("Garage").unwrap(), 2);
        assert!(plc.unit_id("Barn").unwrap_err().is_not_found());
        assert!(plc.stack().is_known_name("House"));
    }

    #[tokio::test]
    async fn test_start_restores_sockets() {
        let gpio = Arc::new(MemoryGpio::new());
        let db = MemoryDatabase::new();
        db.seed(
            crate::devices::socket::SOCKET_TABLE,
            &[
                crate::database::Assignment::new("name", "garden"),
                crate::database::Assignment::new("status", true),
            ],
        );
        let config = PlcConfig::builder().rpc_bind_ip("127.0.0.1").rpc_port(0).build();
        let mut plc = Plc::builder(config, 1)
            .gpio(gpio.clone())
            .database(Arc::new(db))
            .unit(StackUnit::new(1, "House", "127.0.0.1", 8090))
            .socket(socket("garden", 12))
            .build()
            .unwrap();

        let addr = plc.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert!(plc.sockets().find("garden").unwrap().status());
        assert_eq!(gpio.level("garden_relay"), Some(true));
        plc.stop();
    }
}

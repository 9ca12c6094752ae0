// MIT License - Copyright (c) 2026 Peter Wright
// Home controller core
//
//! # plc-stack
//!
//! Core of a home/building controller unit running on an embedded Linux
//! board. A unit drives GPIO relays ("sockets") with push buttons, keeps a
//! local security state (arming, alarm, sensors, home mode) and applies
//! scenario rules when the home mode changes. Several units form a stack and
//! reach each other's security and sockets over a small JSON-line RPC.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use plc_stack::{
//!     GpioPin, HomeMode, MemoryGpio, Plc, PlcConfig, ScenarioAction, ScenarioRule, Socket,
//!     SocketGroup, StackUnit, LOCAL_UNIT,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut plc = Plc::builder(PlcConfig::default(), 1)
//!         .gpio(Arc::new(MemoryGpio::new()))
//!         .unit(StackUnit::new(1, "House", "10.0.0.10", 8090))
//!         .unit(StackUnit::new(2, "Garage", "10.0.0.11", 8090))
//!         .socket(Socket::new(
//!             "porch",
//!             GpioPin::new("porch_btn", 17),
//!             GpioPin::new("porch_relay", 27),
//!             SocketGroup::Light,
//!         ))
//!         .rule(ScenarioRule::new(1, HomeMode::OutHome, ScenarioAction::socket("porch", true)))
//!         .build()?;
//!
//!     let mut events = plc.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     plc.start().await?;
//!     plc.rpc().security_status_set(LOCAL_UNIT, true).await?;
//!     let garage = plc.unit_id("Garage")?;
//!     let armed = plc.rpc().security_status_get(garage).await?;
//!     println!("Garage armed: {armed}");
//!
//!     tokio::signal::ctrl_c().await?;
//!     plc.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod database;
pub mod devices;
pub mod error;
pub mod event;
pub mod gpio;
pub mod plc;
pub mod rpc;
pub mod scenario;
pub mod stack;

// Re-exports for convenience
pub use config::{PlcConfig, PlcConfigBuilder};
pub use database::{Assignment, Connection, Database, MemoryDatabase, SqliteDatabase, Value};
pub use devices::security::{HomeMode, Security, SecuritySensor, SensorType};
pub use devices::socket::{SaveHandle, Socket, SocketController, SocketGroup, SocketUpdate};
pub use error::{PlcError, Result, RpcErrorCode};
pub use event::{ChangeSource, EventReceiver, PlcEvent};
pub use gpio::{Gpio, GpioDirection, GpioPin, MemoryGpio, SysfsGpio};
pub use plc::{Plc, PlcBuilder};
pub use rpc::{Rpc, RpcClient, RpcRequest, RpcResponse, RpcResult, RpcServer};
pub use scenario::{ScenarioAction, ScenarioEngine, ScenarioRule};
pub use stack::{Stack, StackUnit, UnitId, LOCAL_UNIT};

// MIT License - Copyright (c) 2026 Peter Wright
// Local device modules

pub mod security;
pub mod socket;

pub use security::{HomeMode, Security, SecuritySensor, SensorType};
pub use socket::{SaveHandle, Socket, SocketController, SocketGroup, SocketUpdate};

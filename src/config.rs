// MIT License - Copyright (c) 2026 Peter Wright
// Core runtime configuration

use std::time::Duration;

/// Runtime parameters of the controller core.
///
/// Device tables (units, sockets, sensors, scenarios) are not part of this
/// struct; they are registered on the [`crate::plc::PlcBuilder`].
#[derive(Debug, Clone)]
pub struct PlcConfig {
    /// Address the RPC server binds to
    pub rpc_bind_ip: String,
    /// Port the RPC server listens on
    pub rpc_port: u16,
    /// Upper bound for a whole RPC round trip (connect, send, receive)
    pub rpc_timeout_ms: u64,
    /// Button poll interval of the socket controller
    pub poll_interval_ms: u64,
    /// Extra quiescent window after a detected button press
    pub debounce_ms: u64,
    /// Sensor poll interval of the security module
    pub sensor_poll_interval_ms: u64,
    /// Store id handed to the persistence port for socket status rows
    pub socket_db: String,
    /// Capacity of the pending-save queue
    pub save_queue_capacity: usize,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for PlcConfig {
    fn default() -> Self {
        Self {
            rpc_bind_ip: "0.0.0.0".to_string(),
            rpc_port: 8090,
            rpc_timeout_ms: 5000,
            poll_interval_ms: 200,
            debounce_ms: 800,
            sensor_poll_interval_ms: 500,
            socket_db: "socket.db".to_string(),
            save_queue_capacity: 32,
            event_capacity: 256,
        }
    }
}

impl PlcConfig {
    /// Create a new config builder starting from defaults.
    pub fn builder() -> PlcConfigBuilder {
        PlcConfigBuilder::default()
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn sensor_poll_interval(&self) -> Duration {
        Duration::from_millis(self.sensor_poll_interval_ms)
    }

    /// `ip:port` the RPC server binds to.
    pub fn rpc_bind_addr(&self) -> String {
        format!("{}:{}", self.rpc_bind_ip, self.rpc_port)
    }
}

/// Builder for PlcConfig.
#[derive(Debug, Clone, Default)]
pub struct PlcConfigBuilder {
    config: PlcConfig,
}

impl PlcConfigBuilder {
    pub fn rpc_bind_ip(mut self, ip: impl Into<String>) -> Self {
        self.config.rpc_bind_ip = ip.into();
        self
    }

    pub fn rpc_port(mut self, port: u16) -> Self {
        self.config.rpc_port = port;
        self
    }

    pub fn rpc_timeout_ms(mut self, ms: u64) -> Self {
        self.config.rpc_timeout_ms = ms;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.config.debounce_ms = ms;
        self
    }

    pub fn sensor_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.sensor_poll_interval_ms = ms;
        self
    }

    pub fn socket_db(mut self, store: impl Into<String>) -> Self {
        self.config.socket_db = store.into();
        self
    }

    pub fn save_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.save_queue_capacity = capacity.max(1);
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> PlcConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = PlcConfig::builder().build();
        assert_eq!(config.poll_interval(), Duration::from_millis(200));
        assert_eq!(config.debounce(), Duration::from_millis(800));
        assert_eq!(config.rpc_timeout(), Duration::from_secs(5));
        assert_eq!(config.rpc_bind_addr(), "0.0.0.0:8090");
    }

    #[test]
    fn test_config_builder() {
        let config = PlcConfig::builder()
            .rpc_bind_ip("127.0.0.1")
            .rpc_port(9000)
            .rpc_timeout_ms(250)
            .socket_db("/var/lib/plc/socket.db")
            .build();

        assert_eq!(config.rpc_bind_addr(), "127.0.0.1:9000");
        assert_eq!(config.rpc_timeout_ms, 250);
        assert_eq!(config.socket_db, "/var/lib/plc/socket.db");
    }

    #[test]
    fn test_capacities_never_zero() {
        let config = PlcConfig::builder()
            .save_queue_capacity(0)
            .event_capacity(0)
            .build();
        assert_eq!(config.save_queue_capacity, 1);
        assert_eq!(config.event_capacity, 1);
    }
}

// MIT License - Copyright (c) 2026 Peter Wright
// RPC facade: in-process short-circuit for the local unit, network otherwise

pub mod client;
pub mod protocol;
pub mod server;

use std::sync::Arc;

use tracing::warn;

use crate::devices::security::{Security, SecuritySensor};
use crate::devices::socket::SocketController;
use crate::error::{PlcError, Result};
use crate::stack::{Stack, UnitId};

pub use client::RpcClient;
pub use protocol::{RpcRequest, RpcResponse, RpcResult};
pub use server::RpcServer;

/// Entry point front ends use to reach any unit's security and sockets.
///
/// Calls addressed to the local unit are served by the local modules and
/// fail only the way those modules fail. Calls to any other unit fail with
/// [`PlcError::CommandFailed`] whatever went wrong; the detail is logged.
pub struct Rpc {
    stack: Arc<Stack>,
    security: Arc<Security>,
    sockets: Arc<SocketController>,
    client: RpcClient,
}

impl Rpc {
    pub fn new(
        stack: Arc<Stack>,
        security: Arc<Security>,
        sockets: Arc<SocketController>,
        client: RpcClient,
    ) -> Self {
        Self {
            stack,
            security,
            sockets,
            client,
        }
    }

    async fn call(&self, unit: UnitId, request: RpcRequest) -> Result<Option<RpcResult>> {
        if self.stack.is_local(unit) {
            return server::serve_local(&self.security, &self.sockets, request).await;
        }

        let Some(target) = self.stack.resolve_by_id(unit) else {
            warn!("RPC {}: unknown unit {}", request.op_name(), unit);
            return Err(PlcError::CommandFailed { unit });
        };
        self.client.call(target, &request).await.map_err(|e| {
            warn!(
                "RPC {} to \"{}\" ({}) failed: {}",
                request.op_name(),
                target.name,
                target.addr(),
                e
            );
            PlcError::CommandFailed { unit }
        })
    }

    async fn call_flag(&self, unit: UnitId, request: RpcRequest) -> Result<bool> {
        let op = request.op_name();
        match self.call(unit, request).await? {
            Some(RpcResult::Flag(flag)) => Ok(flag),
            other => {
                warn!("RPC {} to unit {}: unexpected result {:?}", op, unit, other);
                Err(PlcError::CommandFailed { unit })
            }
        }
    }

    async fn call_done(&self, unit: UnitId, request: RpcRequest) -> Result<()> {
        self.call(unit, request).await.map(|_| ())
    }

    pub async fn security_status_get(&self, unit: UnitId) -> Result<bool> {
        self.call_flag(unit, RpcRequest::SecurityStatusGet).await
    }

    pub async fn security_status_set(&self, unit: UnitId, status: bool) -> Result<()> {
        self.call_done(unit, RpcRequest::SecurityStatusSet { status })
            .await
    }

    pub async fn security_alarm_get(&self, unit: UnitId) -> Result<bool> {
        self.call_flag(unit, RpcRequest::SecurityAlarmGet).await
    }

    pub async fn security_alarm_set(&self, unit: UnitId, alarm: bool) -> Result<()> {
        self.call_done(unit, RpcRequest::SecurityAlarmSet { alarm })
            .await
    }

    pub async fn security_sensors_get(&self, unit: UnitId) -> Result<Vec<SecuritySensor>> {
        match self.call(unit, RpcRequest::SecuritySensorsGet).await? {
            Some(RpcResult::Sensors(sensors)) => Ok(sensors),
            other => {
                warn!("RPC security_sensors_get to unit {}: unexpected result {:?}", unit, other);
                Err(PlcError::CommandFailed { unit })
            }
        }
    }

    pub async fn socket_status_get(&self, unit: UnitId, name: &str) -> Result<bool> {
        self.call_flag(
            unit,
            RpcRequest::SocketStatusGet {
                name: name.to_string(),
            },
        )
        .await
    }

    /// Drive a socket on any unit; the status is persisted by the owning unit.
    pub async fn socket_status_set(&self, unit: UnitId, name: &str, status: bool) -> Result<()> {
        self.call_done(
            unit,
            RpcRequest::SocketStatusSet {
                name: name.to_string(),
                status,
            },
        )
        .await
    }
}

// MIT License - Copyright (c) 2026 Peter Wright
// Inbound RPC adapter

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::devices::security::Security;
use crate::devices::socket::SocketController;
use crate::error::{PlcError, Result, RpcErrorCode};
use crate::event::ChangeSource;
use crate::rpc::protocol::{self, RpcRequest, RpcResponse, RpcResult, MAX_LINE_LEN};

/// Serve one request against the local modules.
///
/// Shared by the server and by the in-process short-circuit, so both paths
/// have the same contract.
pub(crate) async fn serve_local(
    security: &Security,
    sockets: &SocketController,
    request: RpcRequest,
) -> Result<Option<RpcResult>> {
    match request {
        RpcRequest::SecurityStatusGet => Ok(Some(RpcResult::Flag(security.status().await))),
        RpcRequest::SecurityStatusSet { status } => {
            security.set_status(status).await?;
            Ok(None)
        }
        RpcRequest::SecurityAlarmGet => Ok(Some(RpcResult::Flag(security.alarm().await))),
        RpcRequest::SecurityAlarmSet { alarm } => {
            security.set_alarm(alarm).await?;
            Ok(None)
        }
        RpcRequest::SecuritySensorsGet => Ok(Some(RpcResult::Sensors(security.sensors().await))),
        RpcRequest::SocketStatusGet { name } => {
            let socket = sockets
                .find(&name)
                .ok_or(PlcError::SocketNotFound { name })?;
            Ok(Some(RpcResult::Flag(sockets.get_status(&socket))))
        }
        RpcRequest::SocketStatusSet { name, status } => {
            sockets
                .set_status_from(&name, status, true, ChangeSource::Command)
                .await?;
            Ok(None)
        }
    }
}

/// Accepts RPC connections and dispatches them to the local unit.
///
/// Holds no state of its own; each connection carries one request.
pub struct RpcServer {
    security: Arc<Security>,
    sockets: Arc<SocketController>,
}

impl RpcServer {
    pub fn new(security: Arc<Security>, sockets: Arc<SocketController>) -> Self {
        Self { security, sockets }
    }

    /// Bind the listening socket.
    pub async fn bind(addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            error!("Failed to bind RPC listener on {}: {}", addr, e);
            e
        })?;
        info!("RPC server listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Accept connections forever, one task per connection.
    pub fn start(self: &Arc<Self>, listener: TcpListener) -> tokio::task::JoinHandle<()> {
        let server = self.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let server = server.clone();
                        tokio::spawn(async move {
                            if let Err(e) = server.handle_connection(stream, peer).await {
                                warn!("RPC connection from {} failed: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept RPC connection: {}", e),
                }
            }
        })
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader).take(MAX_LINE_LEN);
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            debug!("RPC peer {} closed without request", peer);
            return Ok(());
        }

        let response = match protocol::decode_line::<RpcRequest>(&line) {
            Ok(request) => {
                debug!("RPC {} from {}", request.op_name(), peer);
                self.dispatch(request).await
            }
            Err(e) => {
                warn!("Bad RPC request from {}: {}", peer, e);
                RpcResponse::failed(RpcErrorCode::BadRequest)
            }
        };

        writer
            .write_all(protocol::encode_line(&response)?.as_bytes())
            .await?;
        writer.shutdown().await?;
        Ok(())
    }

    /// Run a decoded request and build its response.
    pub async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        let op = request.op_name();
        match serve_local(&self.security, &self.sockets, request).await {
            Ok(result) => RpcResponse::ok(result),
            Err(e) => {
                warn!("RPC {} failed: {}", op, e);
                RpcResponse::failed(RpcErrorCode::for_error(&e))
            }
        }
    }
}

// MIT License - Copyright (c) 2026 Peter Wright
// Network leg of the RPC client

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tracing::debug;

use crate::error::{PlcError, Result};
use crate::rpc::protocol::{self, RpcRequest, RpcResponse, RpcResult, MAX_LINE_LEN};
use crate::stack::StackUnit;

/// Sends one request per connection to a remote unit.
///
/// Errors are detailed (refused, timeout, protocol, remote code); callers
/// going through [`crate::rpc::Rpc`] only see them collapsed.
#[derive(Debug, Clone)]
pub struct RpcClient {
    timeout: Duration,
}

impl RpcClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one request against `unit`. Connect, send and receive share one
    /// deadline.
    pub async fn call(&self, unit: &StackUnit, request: &RpcRequest) -> Result<Option<RpcResult>> {
        debug!("RPC {} -> \"{}\" ({})", request.op_name(), unit.name, unit.addr());
        match timeout(self.timeout, exchange(unit, request)).await {
            Ok(result) => result,
            Err(_) => Err(PlcError::Timeout { unit: unit.id }),
        }
    }
}

async fn exchange(unit: &StackUnit, request: &RpcRequest) -> Result<Option<RpcResult>> {
    let mut stream = TcpStream::connect(unit.addr()).await?;
    stream
        .write_all(protocol::encode_line(request)?.as_bytes())
        .await?;

    let mut reader = BufReader::new(stream).take(MAX_LINE_LEN);
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(PlcError::Protocol {
            details: "connection closed before response".to_string(),
        });
    }

    let response: RpcResponse = protocol::decode_line(&line)?;
    response.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn peer(reply: &'static str) -> StackUnit {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            reader.get_mut().write_all(reply.as_bytes()).await.unwrap();
        });
        StackUnit::new(2, "Garage", "127.0.0.1", port)
    }

    #[tokio::test]
    async fn test_call_ok() {
        let unit = peer("{\"success\":true,\"result\":{\"kind\":\"flag\",\"value\":true}}\n").await;
        let client = RpcClient::new(Duration::from_secs(2));
        let result = client.call(&unit, &RpcRequest::SecurityStatusGet).await.unwrap();
        assert_eq!(result, Some(RpcResult::Flag(true)));
    }

    #[tokio::test]
    async fn test_call_malformed_response() {
        let unit = peer("garbage\n").await;
        let client = RpcClient::new(Duration::from_secs(2));
        let err = client.call(&unit, &RpcRequest::SecurityAlarmGet).await.unwrap_err();
        assert!(matches!(err, PlcError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_call_closed_without_response() {
        let unit = peer("").await;
        let client = RpcClient::new(Duration::from_secs(2));
        let err = client.call(&unit, &RpcRequest::SecurityAlarmGet).await.unwrap_err();
        assert!(matches!(err, PlcError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_call_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let unit = StackUnit::new(2, "Garage", "127.0.0.1", port);
        let client = RpcClient::new(Duration::from_secs(2));
        let err = client.call(&unit, &RpcRequest::SecurityStatusGet).await.unwrap_err();
        assert!(matches!(err, PlcError::Io(_)));
    }

    #[tokio::test]
    async fn test_call_times_out() {
        // Accepts but never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let hold = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let unit = StackUnit::new(2, "Garage", "127.0.0.1", port);
        let client = RpcClient::new(Duration::from_millis(200));
        let started = std::time::Instant::now();
        let err = client.call(&unit, &RpcRequest::SecurityStatusGet).await.unwrap_err();
        assert!(matches!(err, PlcError::Timeout { unit: 2 }));
        assert!(started.elapsed() < Duration::from_secs(2));
        hold.abort();
    }
}

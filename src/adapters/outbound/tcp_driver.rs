//! TCP Database Driver
//!
//! Transport-level implementation of DatabaseDriver. A handle is one TCP
//! session to the endpoint; liveness is checked on the held session and by
//! a fresh connect, without speaking the database's wire protocol.
//! Fresh probe sessions are capped at the node's connection limit and wait
//! at most the pool timeout for a free slot.

use crate::domain::entities::NodeConfig;
use crate::domain::ports::{ConnectError, DatabaseConnection, DatabaseDriver, DbConnection};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Semaphore};

/// Driver that opens plain TCP sessions.
#[derive(Debug, Clone, Default)]
pub struct TcpDatabaseDriver;

impl TcpDatabaseDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DatabaseDriver for TcpDatabaseDriver {
    async fn connect(&self, config: &NodeConfig) -> Result<DbConnection, ConnectError> {
        let endpoint = config.endpoint();
        let stream = open(&endpoint, config.connect_timeout).await?;

        Ok(Arc::new(TcpConnection {
            endpoint,
            connect_timeout: config.connect_timeout,
            pool_timeout: config.pool_timeout,
            sessions: Semaphore::new(config.connection_limit.max(1) as usize),
            stream: Mutex::new(Some(stream)),
        }))
    }
}

async fn open(endpoint: &str, timeout: Duration) -> Result<TcpStream, ConnectError> {
    match tokio::time::timeout(timeout, TcpStream::connect(endpoint)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(ConnectError::Unreachable {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Err(ConnectError::Timeout {
            endpoint: endpoint.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

/// A TCP session to a database endpoint.
#[derive(Debug)]
pub struct TcpConnection {
    endpoint: String,
    connect_timeout: Duration,
    pool_timeout: Duration,
    sessions: Semaphore,
    stream: Mutex<Option<TcpStream>>,
}

#[async_trait]
impl DatabaseConnection for TcpConnection {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn ping(&self) -> Result<(), String> {
        {
            let guard = self.stream.lock().await;
            let stream = guard.as_ref().ok_or_else(|| "connection closed".to_string())?;

            let mut buf = [0u8; 1];
            match stream.try_read(&mut buf) {
                Ok(0) => return Err("connection closed by server".to_string()),
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(format!("connection error: {}", e)),
            }
        }

        let _slot = match tokio::time::timeout(self.pool_timeout, self.sessions.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err("connection closed".to_string()),
            Err(_) => {
                return Err(format!(
                    "no free connection slot within {}ms",
                    self.pool_timeout.as_millis()
                ))
            }
        };

        let mut probe = open(&self.endpoint, self.connect_timeout)
            .await
            .map_err(|e| e.to_string())?;
        let _ = probe.shutdown().await;
        Ok(())
    }

    async fn replication_lag(&self) -> Option<u64> {
        None
    }

    async fn disconnect(&self) -> Result<(), String> {
        let stream = self.stream.lock().await.take();
        match stream {
            Some(mut stream) => stream.shutdown().await.map_err(|e| e.to_string()),
            None => Ok(()),
        }
    }
}

use std::collections::HashMap;
use std::net::SocketAddr;

use anyhow::Result;
use tokio::sync::oneshot;

use larder_server::config::ServerConfig;
use larder_server::service::spawn_server;

/// A larder server running on a random port, shut down on drop.
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn spawn() -> Result<Self> {
        Self::spawn_with(Self::default_config()).await
    }

    pub async fn spawn_with(config: ServerConfig) -> Result<Self> {
        let (addr, shutdown_tx) = spawn_server(config, vec!["*".to_string()]).await?;
        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// Random port, fast heartbeat, and two known household members.
    pub fn default_config() -> ServerConfig {
        let mut tokens = HashMap::new();
        tokens.insert("alice-token".to_string(), "alice".to_string());
        tokens.insert("bob-token".to_string(), "bob".to_string());
        ServerConfig {
            listen: "127.0.0.1:0".to_string(),
            heartbeat_interval_secs: 1,
            write_timeout_ms: 500,
            tokens,
            ..ServerConfig::default()
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.addr.port())
    }

    pub fn events_url(&self) -> String {
        format!("{}/api/events", self.base_url())
    }

    /// Shut the server down explicitly (drop does the same).
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

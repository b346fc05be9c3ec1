//! # Master Client
//!
//! Advertises a running server to an external master (directory) service.
//!
//! [`MasterHeartbeat::start`] spawns a tokio task that sends an `announce`
//! datagram every interval. The server hands fresh summaries to the task
//! through [`MasterHeartbeat::update`]; the task only ever sees copies.
//! [`MasterHeartbeat::stop`] asks the task to finish, which sends a
//! best-effort `deregister` datagram, and waits a bounded time before
//! aborting it.
//!
//! ## Wire format
//!
//! Each datagram is one JSON object:
//!
//! ```json
//! {"type":"announce","address":"0.0.0.0","port":25565,"players":3,
//!  "max_players":64,"motd":"Welcome","version":"0.1.0","protocol":1}
//! {"type":"deregister","address":"0.0.0.0","port":25565}
//! ```
//!
//! Delivery is best effort. Failures are logged and retried on the next
//! interval, and never reach the server loop.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default bound on how long shutdown waits for the heartbeat task.
pub const DEFAULT_JOIN_GRACE: Duration = Duration::from_secs(3);

/// Errors of a single heartbeat attempt. None of them are fatal.
#[derive(Error, Debug)]
pub enum HeartbeatError {
    #[error("master server {0} is unreachable: {1}")]
    Unreachable(String, std::io::Error),

    #[error("sending to master server {0} timed out")]
    Timeout(String),

    #[error("failed to bind heartbeat socket: {0}")]
    Bind(std::io::Error),

    #[error("failed to encode heartbeat: {0}")]
    Encode(#[from] serde_json::Error),
}

/// What the master server is told about this server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSummary {
    pub address: String,
    pub port: u16,
    pub players: usize,
    pub max_players: usize,
    pub motd: String,
    pub version: String,
    pub protocol: u32,
}

/// One datagram sent to the master server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MasterPacket {
    Announce(ServerSummary),
    Deregister { address: String, port: u16 },
}

impl MasterPacket {
    pub fn encode(&self) -> Result<Vec<u8>, HeartbeatError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Where and how often to report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    pub master_address: String,
    pub master_port: u16,
    pub interval: Duration,
    /// Upper bound for a single send, including name resolution
    pub send_timeout: Duration,
}

impl HeartbeatConfig {
    pub fn new(master_address: impl Into<String>, master_port: u16, interval: Duration) -> Self {
        Self {
            master_address: master_address.into(),
            master_port,
            interval,
            send_timeout: Duration::from_secs(2),
        }
    }

    fn target(&self) -> String {
        format!("{}:{}", self.master_address, self.master_port)
    }
}

/// Owned handle to the heartbeat task.
pub struct MasterHeartbeat {
    summary_tx: watch::Sender<ServerSummary>,
    stop_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl MasterHeartbeat {
    /// Spawns the heartbeat task on the current tokio runtime. The first
    /// announcement is sent immediately.
    pub fn start(config: HeartbeatConfig, summary: ServerSummary) -> Self {
        let (summary_tx, summary_rx) = watch::channel(summary);
        let (stop_tx, stop_rx) = watch::channel(false);

        info!(
            "📣 Announcing to master server {} every {:?}",
            config.target(),
            config.interval
        );
        let handle = tokio::spawn(run(config, summary_rx, stop_rx));

        Self {
            summary_tx,
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Replaces the summary sent with the next announcement.
    pub fn update(&self, summary: ServerSummary) {
        self.summary_tx.send_replace(summary);
    }

    /// The summary the next announcement will carry.
    pub fn summary(&self) -> ServerSummary {
        self.summary_tx.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the task and waits at most `grace` for it to deregister.
    ///
    /// Returns `true` if the task finished on its own, `false` if it had to
    /// be aborted.
    pub async fn stop(mut self, grace: Duration) -> bool {
        let _ = self.stop_tx.send(true);
        let Some(mut handle) = self.handle.take() else {
            return true;
        };

        match tokio::time::timeout(grace, &mut handle).await {
            Ok(_) => {
                info!("📣 Master heartbeat stopped");
                true
            }
            Err(_) => {
                warn!(
                    "⚠️ Master heartbeat did not stop within {:?}, aborting it",
                    grace
                );
                handle.abort();
                false
            }
        }
    }
}

impl Drop for MasterHeartbeat {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn run(
    config: HeartbeatConfig,
    summary_rx: watch::Receiver<ServerSummary>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut socket: Option<UdpSocket> = None;
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let packet = MasterPacket::Announce(summary_rx.borrow().clone());
                match send(&mut socket, &config, &packet).await {
                    Ok(()) => debug!("📣 Heartbeat sent to {}", config.target()),
                    Err(e) => warn!("⚠️ Heartbeat failed, retrying next interval: {}", e),
                }
            }
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
    }

    let summary = summary_rx.borrow().clone();
    let packet = MasterPacket::Deregister {
        address: summary.address,
        port: summary.port,
    };
    match send(&mut socket, &config, &packet).await {
        Ok(()) => info!("👋 Deregistered from master server {}", config.target()),
        Err(e) => warn!("⚠️ Could not deregister from master server: {}", e),
    }
}

async fn send(
    socket: &mut Option<UdpSocket>,
    config: &HeartbeatConfig,
    packet: &MasterPacket,
) -> Result<(), HeartbeatError> {
    let bytes = packet.encode()?;

    if socket.is_none() {
        let bound = UdpSocket::bind(("0.0.0.0", 0))
            .await
            .map_err(HeartbeatError::Bind)?;
        *socket = Some(bound);
    }
    let Some(udp) = socket.as_ref() else {
        return Err(HeartbeatError::Timeout(config.target()));
    };

    let target = (config.master_address.as_str(), config.master_port);
    match tokio::time::timeout(config.send_timeout, udp.send_to(&bytes, target)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(HeartbeatError::Unreachable(config.target(), e)),
        Err(_) => Err(HeartbeatError::Timeout(config.target())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(players: usize) -> ServerSummary {
        ServerSummary {
            address: "127.0.0.1".into(),
            port: 25565,
            players,
            max_players: 50,
            motd: "Welcome".into(),
            version: "0.1.0".into(),
            protocol: 1,
        }
    }

    async fn recv_packet(socket: &UdpSocket) -> MasterPacket {
        let mut buf = vec![0u8; 2048];
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
            .await
            .expect("no packet within 5s")
            .unwrap();
        serde_json::from_slice(&buf[..len]).unwrap()
    }

    #[test]
    fn test_packet_encoding() {
        let bytes = MasterPacket::Announce(summary(3)).encode().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["type"], "announce");
        assert_eq!(json["players"], 3);
        assert_eq!(json["max_players"], 50);
        assert_eq!(json["motd"], "Welcome");

        let bytes = MasterPacket::Deregister {
            address: "127.0.0.1".into(),
            port: 1,
        }
        .encode()
        .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["type"], "deregister");
    }

    #[tokio::test]
    async fn test_announce_update_and_deregister() {
        let master = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = master.local_addr().unwrap().port();

        let config = HeartbeatConfig::new("127.0.0.1", port, Duration::from_millis(50));
        let heartbeat = MasterHeartbeat::start(config, summary(0));
        assert!(heartbeat.is_running());

        assert_eq!(recv_packet(&master).await, MasterPacket::Announce(summary(0)));

        heartbeat.update(summary(7));
        assert_eq!(heartbeat.summary().players, 7);
        loop {
            if recv_packet(&master).await == MasterPacket::Announce(summary(7)) {
                break;
            }
        }

        assert!(heartbeat.stop(Duration::from_secs(3)).await);
        loop {
            if let MasterPacket::Deregister { address, port } = recv_packet(&master).await {
                assert_eq!(address, "127.0.0.1");
                assert_eq!(port, 25565);
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_unreachable_master_does_not_block_stop() {
        // port 9 on localhost normally has no listener; sends still succeed
        // or fail quickly and the task keeps running
        let config = HeartbeatConfig::new("127.0.0.1", 9, Duration::from_millis(10));
        let heartbeat = MasterHeartbeat::start(config, summary(0));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(heartbeat.is_running());
        assert!(heartbeat.stop(DEFAULT_JOIN_GRACE).await);
    }

    #[tokio::test]
    async fn test_stop_aborts_task_that_outlives_grace() {
        let (summary_tx, _) = watch::channel(summary(0));
        let (stop_tx, _) = watch::channel(false);
        let (dropped_tx, dropped_rx) = tokio::sync::oneshot::channel::<()>();
        // ignores the stop flag; only abort can end it
        let handle = tokio::spawn(async move {
            let _guard = dropped_tx;
            std::future::pending::<()>().await
        });
        let heartbeat = MasterHeartbeat {
            summary_tx,
            stop_tx,
            handle: Some(handle),
        };
        assert!(heartbeat.is_running());

        assert!(!heartbeat.stop(Duration::from_millis(20)).await);
        // the task was dropped, releasing the sender it owned
        let released = tokio::time::timeout(Duration::from_secs(1), dropped_rx).await;
        assert!(matches!(released, Ok(Err(_))));
    }
}

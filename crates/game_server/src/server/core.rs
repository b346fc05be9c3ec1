//! Core server loop implementation.
//!
//! [`ServerLoop`] owns the script runtime, the transport and the optional
//! master heartbeat, and drives them from a single task through
//! `Initializing → Running → Draining → Stopped`.

use crate::{
    config::ServerConfig,
    error::{ServerError, EXIT_CLEAN, EXIT_SCRIPT_FATAL, EXIT_TRANSPORT_FATAL},
    shutdown::ShutdownState,
    transport::Transport,
};
use master_client::{HeartbeatConfig, MasterHeartbeat, ServerSummary};
use script_bridge::{Runtime, RuntimeOptions, ScriptValue, ServerEvent};
use script_host::{RhaiEngine, ScriptManager};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Lifecycle of the server loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Initializing,
    Running,
    Draining,
    Stopped,
}

/// The single-task server loop.
///
/// Network-triggered callbacks and timer callbacks all run on the task that
/// calls [`run`](ServerLoop::run), so scripts never observe concurrency.
///
/// # Tick
///
/// 1. Poll the transport and dispatch every surfaced event
/// 2. Flush commands scripts queued (chat, kicks)
/// 3. Advance timers by the wall-clock time since the previous tick
/// 4. Flush again and refresh the master heartbeat summary
/// 5. Sleep for the configured tick interval
pub struct ServerLoop {
    pub(crate) config: ServerConfig,
    pub(crate) runtime: Arc<Runtime>,
    scripts: ScriptManager,
    pub(crate) transport: Box<dyn Transport>,
    heartbeat: Option<MasterHeartbeat>,
    shutdown: ShutdownState,
    state: ServerState,
    local_addr: Option<SocketAddr>,
    script_failed: bool,
    announced_players: usize,
}

impl ServerLoop {
    /// Creates a server loop with a fresh runtime and a Rhai engine rooted
    /// at `<plugin_home>/scripts`. Nothing is loaded or bound yet.
    pub fn new(
        config: ServerConfig,
        transport: Box<dyn Transport>,
        shutdown: ShutdownState,
    ) -> Result<Self, ServerError> {
        let runtime = Runtime::new(RuntimeOptions {
            max_players: config.max_players,
            ..RuntimeOptions::default()
        })?;
        let scripts = ScriptManager::new(runtime.clone(), &config.plugin_home);
        runtime.add_engine(Arc::new(RhaiEngine::new(&runtime, &scripts.scripts_dir())));

        Ok(Self {
            config,
            runtime,
            scripts,
            transport,
            heartbeat: None,
            shutdown,
            state: ServerState::Initializing,
            local_addr: None,
            script_failed: false,
            announced_players: 0,
        })
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn scripts(&self) -> &ScriptManager {
        &self.scripts
    }

    /// Address the transport is bound to, once running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn heartbeat_active(&self) -> bool {
        self.heartbeat.is_some()
    }

    fn set_state(&mut self, state: ServerState) {
        info!("🔄 Server state: {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Loads scripts, binds the transport, starts the heartbeat when a
    /// master server is configured and dispatches `OnServerInit`.
    pub async fn initialize(&mut self) -> Result<(), ServerError> {
        if self.state != ServerState::Initializing {
            return Err(ServerError::InvalidState {
                expected: "initializing",
            });
        }

        let loaded = self.scripts.load_scripts(&self.config.scripts)?;
        info!("📜 {} script(s) loaded: {:?}", loaded, self.scripts.script_names());

        let local_addr = self
            .transport
            .startup(self.config.bind_address, self.config.max_players)
            .await?;
        self.local_addr = Some(local_addr);
        info!("🚀 Server listening on {} ({} players max)", local_addr, self.config.max_players);

        match self.config.master.clone() {
            Some(master) => {
                let heartbeat = HeartbeatConfig::new(master.address, master.port, master.interval);
                self.heartbeat = Some(MasterHeartbeat::start(heartbeat, self.summary()));
            }
            None => info!("📭 Master server announcements disabled"),
        }

        self.set_state(ServerState::Running);
        self.dispatch(ServerEvent::ServerInit, Vec::new());
        self.flush_commands();
        Ok(())
    }

    /// Runs the server until something asks it to stop, then drains it.
    ///
    /// # Returns
    ///
    /// The process exit code: `0` on a clean stop, `1` when startup failed,
    /// `2` on a transport failure, `3` on a fatal script failure, or the code
    /// a script passed to `StopServer`.
    pub async fn run(mut self) -> i32 {
        if self.state == ServerState::Initializing {
            if let Err(e) = self.initialize().await {
                error!("❌ Startup failed: {}", e);
                self.transport.shutdown().await;
                self.set_state(ServerState::Stopped);
                self.shutdown.complete_shutdown();
                return e.exit_code();
            }
        }

        let interval = self.config.tick_interval();
        let mut last_tick = Instant::now();
        let code = loop {
            if let Some(code) = self.stop_code() {
                break code;
            }

            let elapsed = last_tick.elapsed().as_millis() as u64;
            // carry the sub-millisecond remainder into the next tick
            last_tick += Duration::from_millis(elapsed);

            if let Some(code) = self.tick(elapsed as i64) {
                break code;
            }
            tokio::time::sleep(interval).await;
        };

        self.drain(code).await
    }

    /// Runs one tick with `elapsed_ms` of timer time.
    ///
    /// Returns the exit code when the server should drain.
    pub fn tick(&mut self, elapsed_ms: i64) -> Option<i32> {
        match self.transport.poll() {
            Ok(events) => {
                for event in events {
                    self.handle_transport_event(event);
                }
            }
            Err(e) if e.is_fatal() => {
                error!("💥 Transport failed: {}", e);
                return Some(EXIT_TRANSPORT_FATAL);
            }
            Err(e) => warn!("⚠️ Transport poll error: {}", e),
        }
        self.flush_commands();

        let report = self.runtime.tick_timers(elapsed_ms);
        if report.failures > 0 {
            self.note_script_failures("timer callbacks", report.failures);
        }
        self.flush_commands();

        self.refresh_heartbeat();
        self.stop_code()
    }

    /// Why the server should stop, if it should.
    pub fn stop_code(&self) -> Option<i32> {
        if let Some(code) = self.runtime.control().stop_requested() {
            return Some(code);
        }
        if self.script_failed {
            return Some(EXIT_SCRIPT_FATAL);
        }
        if self.shutdown.is_shutdown_initiated() {
            return Some(EXIT_CLEAN);
        }
        None
    }

    /// Dispatches `OnServerExit`, stops the heartbeat and the transport.
    pub async fn drain(&mut self, code: i32) -> i32 {
        self.set_state(ServerState::Draining);
        info!("🧹 Draining server with exit code {}", code);

        self.dispatch(ServerEvent::ServerExit, vec![ScriptValue::Bool(code != EXIT_CLEAN)]);
        self.flush_commands();

        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.stop(self.config.heartbeat_grace).await;
        }
        self.transport.shutdown().await;

        self.set_state(ServerState::Stopped);
        self.shutdown.complete_shutdown();
        code
    }

    /// Dispatches `event` and reports whether the default behaviour should
    /// go ahead.
    pub(crate) fn dispatch(&mut self, event: ServerEvent, args: Vec<ScriptValue>) -> bool {
        match self.runtime.dispatch(event, &args) {
            Ok(outcome) => {
                if outcome.failures > 0 {
                    self.note_script_failures(event.name(), outcome.failures);
                }
                outcome.verdict
            }
            Err(e) => {
                error!("❌ Cannot dispatch {}: {}", event, e);
                true
            }
        }
    }

    fn note_script_failures(&mut self, source: &str, failures: usize) {
        if self.config.stop_on_script_error && !self.script_failed {
            error!(
                "💥 {} script failure(s) in {} with stop_on_script_error set, stopping",
                failures, source
            );
            self.script_failed = true;
        }
    }

    fn summary(&self) -> ServerSummary {
        let options = self.runtime.options();
        let bound = self.local_addr.unwrap_or(self.config.bind_address);
        ServerSummary {
            address: bound.ip().to_string(),
            port: bound.port(),
            players: self.runtime.player_count(),
            max_players: self.config.max_players,
            motd: self.config.motd.clone(),
            version: options.server_version.clone(),
            protocol: options.protocol_version,
        }
    }

    fn refresh_heartbeat(&mut self) {
        let players = self.runtime.player_count();
        if players == self.announced_players {
            return;
        }
        self.announced_players = players;
        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.update(self.summary());
        }
    }
}

impl Drop for ServerLoop {
    fn drop(&mut self) {
        if self.state == ServerState::Running {
            warn!("⚠️ Server loop dropped while running; transport was not drained");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::MasterServerConfig;
    use crate::messaging::ServerMessage;
    use crate::transport::{TransportError, TransportEvent};
    use async_trait::async_trait;
    use script_bridge::PlayerId;
    use std::fs;
    use std::sync::{Mutex, MutexGuard};
    use tempfile::TempDir;

    #[derive(Default)]
    pub struct MockState {
        pub bound: Option<(SocketAddr, usize)>,
        pub incoming: Vec<TransportEvent>,
        pub sent: Vec<(PlayerId, ServerMessage)>,
        pub disconnected: Vec<PlayerId>,
        pub shut_down: bool,
        pub fail_bind: bool,
        /// Returned once by the next poll
        pub poll_error: Option<TransportError>,
    }

    /// In-memory transport; clones share state with the test.
    #[derive(Clone, Default)]
    pub struct MockTransport(Arc<Mutex<MockState>>);

    impl MockTransport {
        pub fn state(&self) -> MutexGuard<'_, MockState> {
            self.0.lock().unwrap()
        }

        pub fn push(&self, event: TransportEvent) {
            self.state().incoming.push(event);
        }

        pub fn connect(&self, player: PlayerId) {
            self.push(TransportEvent::Connected {
                player,
                addr: "127.0.0.1:40000".parse().unwrap(),
            });
        }

        pub fn message(&self, player: PlayerId, text: &str) {
            self.push(TransportEvent::Message {
                player,
                payload: text.as_bytes().to_vec(),
            });
        }

        pub fn chat_for(&self, player: PlayerId) -> Vec<String> {
            self.state()
                .sent
                .iter()
                .filter_map(|(to, message)| match message {
                    ServerMessage::Chat { message } if *to == player => Some(message.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn startup(&mut self, address: SocketAddr, max_players: usize) -> Result<SocketAddr, TransportError> {
            let mut state = self.state();
            if state.fail_bind {
                let source = std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use");
                return Err(TransportError::BindFailed { address, source });
            }
            state.bound = Some((address, max_players));
            Ok(address)
        }

        fn poll(&mut self) -> Result<Vec<TransportEvent>, TransportError> {
            let mut state = self.state();
            if let Some(error) = state.poll_error.take() {
                return Err(error);
            }
            Ok(std::mem::take(&mut state.incoming))
        }

        fn send(&mut self, player: PlayerId, payload: Vec<u8>) -> Result<(), TransportError> {
            let message = serde_json::from_slice(&payload).unwrap();
            self.state().sent.push((player, message));
            Ok(())
        }

        fn disconnect(&mut self, player: PlayerId) -> Result<(), TransportError> {
            let mut state = self.state();
            state.disconnected.push(player);
            state.incoming.push(TransportEvent::Disconnected { player });
            Ok(())
        }

        async fn shutdown(&mut self) {
            self.state().shut_down = true;
        }
    }

    pub struct Harness {
        pub server: ServerLoop,
        pub transport: MockTransport,
        pub shutdown: ShutdownState,
        _home: TempDir,
    }

    pub fn harness(scripts: &[(&str, &str)], configure: impl FnOnce(&mut ServerConfig)) -> Harness {
        let home = TempDir::new().unwrap();
        let dir = home.path().join("scripts");
        fs::create_dir_all(&dir).unwrap();
        for (name, source) in scripts {
            fs::write(dir.join(name), source).unwrap();
        }

        let mut config = ServerConfig {
            bind_address: "127.0.0.1:25565".parse().unwrap(),
            max_players: 50,
            plugin_home: home.path().to_path_buf(),
            scripts: scripts.iter().map(|(name, _)| name.to_string()).collect(),
            master: None,
            ..ServerConfig::default()
        };
        configure(&mut config);

        let transport = MockTransport::default();
        let shutdown = ShutdownState::new();
        let server = ServerLoop::new(config, Box::new(transport.clone()), shutdown.clone()).unwrap();
        Harness {
            server,
            transport,
            shutdown,
            _home: home,
        }
    }

    #[tokio::test]
    async fn test_startup_without_master_then_clean_stop() {
        let mut h = harness(&[], |_| {});
        h.server.initialize().await.unwrap();

        assert_eq!(h.server.state(), ServerState::Running);
        assert!(!h.server.heartbeat_active());
        assert_eq!(
            h.transport.state().bound,
            Some(("127.0.0.1:25565".parse().unwrap(), 50))
        );
        assert_eq!(h.server.runtime().max_players(), 50);

        h.shutdown.initiate_shutdown();
        assert_eq!(h.server.run().await, EXIT_CLEAN);
        assert!(h.transport.state().shut_down);
        assert!(h.shutdown.is_shutdown_complete());
    }

    #[tokio::test]
    async fn test_initialize_twice_is_rejected() {
        let mut h = harness(&[], |_| {});
        h.server.initialize().await.unwrap();
        assert!(matches!(
            h.server.initialize().await,
            Err(ServerError::InvalidState { .. })
        ));
        h.server.drain(EXIT_CLEAN).await;
    }

    #[tokio::test]
    async fn test_master_configured_starts_heartbeat() {
        let mut h = harness(&[], |config| {
            config.master = Some(MasterServerConfig {
                address: "127.0.0.1".into(),
                port: 9,
                interval: Duration::from_secs(60),
            });
        });
        h.server.initialize().await.unwrap();
        assert!(h.server.heartbeat_active());
        h.server.drain(EXIT_CLEAN).await;
        assert!(!h.server.heartbeat_active());
        assert_eq!(h.server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_connect_runs_handlers_in_load_order() {
        let mut h = harness(
            &[
                ("first.rhai", r#"fn OnPlayerConnect(pid) { SendMessage(pid, "first:" + pid, false); true }"#),
                ("second.rhai", r#"fn OnPlayerConnect(pid) { SendMessage(pid, "second:" + pid, false); true }"#),
            ],
            |_| {},
        );
        h.server.initialize().await.unwrap();

        h.transport.connect(7);
        assert_eq!(h.server.tick(0), None);

        assert_eq!(h.transport.chat_for(7), vec!["first:7", "second:7"]);
        assert!(h.server.runtime().is_player_connected(7));
        assert!(matches!(
            h.transport.state().sent.first(),
            Some((7, ServerMessage::Welcome { player_id: 7, .. }))
        ));
        h.server.drain(EXIT_CLEAN).await;
    }

    #[tokio::test]
    async fn test_vetoed_connect_disconnects_player() {
        let mut h = harness(&[("gate.rhai", "fn OnPlayerConnect(pid) { pid != 3 }")], |_| {});
        h.server.initialize().await.unwrap();

        h.transport.connect(3);
        h.transport.connect(4);
        h.server.tick(0);

        assert_eq!(h.transport.state().disconnected, vec![3]);
        assert_eq!(h.server.runtime().players(), vec![4]);

        // the refused session's disconnect must not count as a departure
        h.server.tick(0);
        assert_eq!(h.server.runtime().players(), vec![4]);
        h.server.drain(EXIT_CLEAN).await;
    }

    #[tokio::test]
    async fn test_chat_broadcast_unless_vetoed() {
        let mut h = harness(
            &[("chat.rhai", r#"fn OnPlayerSendMessage(pid, message) { message != "secret" }"#)],
            |_| {},
        );
        h.server.initialize().await.unwrap();
        h.transport.connect(1);
        h.transport.connect(2);
        h.transport.message(1, r#"{"event":"chat","data":{"message":"hello"}}"#);
        h.transport.message(1, r#"{"event":"chat","data":{"message":"secret"}}"#);
        h.server.tick(0);

        assert_eq!(h.transport.chat_for(1), vec!["Player 1: hello"]);
        assert_eq!(h.transport.chat_for(2), vec!["Player 1: hello"]);
        h.server.drain(EXIT_CLEAN).await;
    }

    #[tokio::test]
    async fn test_kick_disconnects_and_notifies_scripts() {
        let mut h = harness(
            &[(
                "rules.rhai",
                r#"
                fn OnPlayerDeath(pid) { Kick(pid); }
                fn OnPlayerDisconnect(pid) { SendMessage(pid, "bye", true); }
                "#,
            )],
            |_| {},
        );
        h.server.initialize().await.unwrap();
        h.transport.connect(0);
        h.transport.connect(1);
        h.transport.message(0, r#"{"event":"death"}"#);
        h.server.tick(0);
        assert_eq!(h.transport.state().disconnected, vec![0]);

        h.server.tick(0);
        assert_eq!(h.server.runtime().players(), vec![1]);
        assert_eq!(h.transport.chat_for(1), vec!["bye"]);
        h.server.drain(EXIT_CLEAN).await;
    }

    #[tokio::test]
    async fn test_timers_fire_from_tick() {
        let mut h = harness(
            &[(
                "timer.rhai",
                r#"
                fn OnServerInit() { CreateTimer("Expire", 100); }
                fn Expire() { StopServer(9); }
                "#,
            )],
            |_| {},
        );
        h.server.initialize().await.unwrap();
        assert_eq!(h.server.tick(50), None);
        assert_eq!(h.server.tick(60), Some(9));
        assert_eq!(h.server.drain(9).await, 9);
    }

    #[tokio::test]
    async fn test_stop_server_from_init_sets_exit_code() {
        let h = harness(&[("stop.rhai", "fn OnServerInit() { StopServer(4); }")], |_| {});
        let transport = h.transport.clone();
        assert_eq!(h.server.run().await, 4);
        assert!(transport.state().shut_down);
    }

    #[tokio::test]
    async fn test_bind_failure_exits_with_startup_code() {
        let h = harness(&[], |_| {});
        h.transport.state().fail_bind = true;
        assert_eq!(h.server.run().await, crate::error::EXIT_STARTUP_FAILURE);
    }

    #[tokio::test]
    async fn test_missing_script_exits_with_startup_code() {
        let h = harness(&[], |config| config.scripts = vec!["ghost.rhai".into()]);
        let transport = h.transport.clone();
        assert_eq!(h.server.run().await, crate::error::EXIT_STARTUP_FAILURE);
        assert!(transport.state().bound.is_none());
    }

    #[tokio::test]
    async fn test_transport_failure_drains_with_error_flag() {
        let mut h = harness(
            &[("exit.rhai", r#"fn OnServerExit(failed) { if failed { LogMessage(3, "stopped after a failure"); } }"#)],
            |_| {},
        );
        h.server.initialize().await.unwrap();
        h.transport.state().poll_error = Some(TransportError::Fatal("mock failure".into()));
        assert_eq!(h.server.run().await, EXIT_TRANSPORT_FATAL);
    }

    #[tokio::test]
    async fn test_recoverable_poll_error_keeps_running() {
        let mut h = harness(&[], |_| {});
        h.server.initialize().await.unwrap();

        h.transport.state().poll_error = Some(TransportError::Handshake("bad upgrade".into()));
        h.transport.connect(2);
        assert_eq!(h.server.tick(0), None);
        assert_eq!(h.server.state(), ServerState::Running);

        // the event queued during the failed poll is picked up next tick
        assert_eq!(h.server.tick(0), None);
        assert!(h.server.runtime().is_player_connected(2));

        h.transport.state().poll_error = Some(TransportError::NotStarted);
        assert_eq!(h.server.tick(0), Some(EXIT_TRANSPORT_FATAL));
        h.server.drain(EXIT_TRANSPORT_FATAL).await;
    }

    #[tokio::test]
    async fn test_script_failure_is_fatal_only_when_configured() {
        let script = [("boom.rhai", r#"fn OnPlayerConnect(pid) { throw "boom"; }"#)];

        let mut lenient = harness(&script, |_| {});
        lenient.server.initialize().await.unwrap();
        lenient.transport.connect(1);
        assert_eq!(lenient.server.tick(0), None);
        // a failing handler does not veto
        assert!(lenient.server.runtime().is_player_connected(1));
        lenient.server.drain(EXIT_CLEAN).await;

        let mut strict = harness(&script, |config| config.stop_on_script_error = true);
        strict.server.initialize().await.unwrap();
        strict.transport.connect(1);
        assert_eq!(strict.server.tick(0), Some(EXIT_SCRIPT_FATAL));
        strict.server.drain(EXIT_SCRIPT_FATAL).await;
    }
}

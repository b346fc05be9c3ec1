//! WebSocket transport built on tokio-tungstenite.
//!
//! An accept task hands every connection to its own task. Connection tasks
//! surface events through one bounded channel that [`Transport::poll`]
//! drains, and receive outbound frames through a bounded per-session
//! channel. A peer that fills either queue is disconnected.

use super::{Transport, TransportError, TransportEvent};
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use script_bridge::PlayerId;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, trace, warn};

/// Frames queued for one session before it counts as too slow.
pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;
/// Events queued for the server loop across all sessions.
pub const DEFAULT_EVENT_QUEUE: usize = 4096;

enum Outbound {
    Text(String),
    Close,
}

enum Surfaced {
    Event(TransportEvent),
    Failed(String),
}

#[derive(Clone)]
struct Session {
    outbound: mpsc::Sender<Outbound>,
    /// Closes the connection when the outbound queue is full
    kick: Arc<Notify>,
}

impl Session {
    /// Queues a close frame behind pending messages, or closes at once if
    /// the queue is full. False if the connection is already gone.
    fn close(&self) -> bool {
        match self.outbound.try_send(Outbound::Close) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.kick.notify_one();
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

struct Shared {
    sessions: DashMap<PlayerId, Session>,
    /// Ids in use, including sessions whose disconnect is not yet surfaced
    ids: Mutex<BTreeSet<PlayerId>>,
    max_players: usize,
    outbound_queue: usize,
    events: mpsc::Sender<Surfaced>,
}

impl Shared {
    /// Reserves the lowest free id, or `None` when the server is full.
    fn allocate(&self) -> Option<PlayerId> {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        if ids.len() >= self.max_players {
            return None;
        }
        let id = (0..=PlayerId::MAX).find(|id| !ids.contains(id))?;
        ids.insert(id);
        Some(id)
    }

    fn release(&self, player: PlayerId) {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&player);
    }

    /// Waits for room in the event queue; lifecycle events are never dropped.
    async fn surface(&self, event: TransportEvent) {
        // the receiver is gone only after shutdown
        let _ = self.events.send(Surfaced::Event(event)).await;
    }

    /// Queues a message without waiting. False if the queue is full.
    fn surface_message(&self, player: PlayerId, payload: Vec<u8>) -> bool {
        match self.events.try_send(Surfaced::Event(TransportEvent::Message { player, payload })) {
            Ok(()) | Err(TrySendError::Closed(_)) => true,
            Err(TrySendError::Full(_)) => false,
        }
    }
}

/// WebSocket implementation of [`Transport`].
pub struct WebSocketTransport {
    shared: Option<Arc<Shared>>,
    events: Option<mpsc::Receiver<Surfaced>>,
    accept_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
    outbound_queue: usize,
    event_queue: usize,
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::with_queue_limits(DEFAULT_OUTBOUND_QUEUE, DEFAULT_EVENT_QUEUE)
    }
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a transport with explicit queue capacities (at least 1).
    pub fn with_queue_limits(outbound_queue: usize, event_queue: usize) -> Self {
        Self {
            shared: None,
            events: None,
            accept_task: None,
            local_addr: None,
            outbound_queue: outbound_queue.max(1),
            event_queue: event_queue.max(1),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn session_count(&self) -> usize {
        self.shared.as_ref().map(|s| s.sessions.len()).unwrap_or(0)
    }

    fn session(&self, player: PlayerId) -> Result<Session, TransportError> {
        let shared = self.shared.as_ref().ok_or(TransportError::NotStarted)?;
        shared
            .sessions
            .get(&player)
            .map(|session| session.clone())
            .ok_or(TransportError::UnknownPlayer(player))
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn startup(&mut self, address: SocketAddr, max_players: usize) -> Result<SocketAddr, TransportError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| TransportError::BindFailed { address, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransportError::BindFailed { address, source })?;

        let (events_tx, events_rx) = mpsc::channel(self.event_queue);
        let shared = Arc::new(Shared {
            sessions: DashMap::new(),
            ids: Mutex::new(BTreeSet::new()),
            max_players,
            outbound_queue: self.outbound_queue,
            events: events_tx,
        });

        self.accept_task = Some(tokio::spawn(accept_loop(listener, shared.clone())));
        self.shared = Some(shared);
        self.events = Some(events_rx);
        self.local_addr = Some(local_addr);

        info!("🌐 WebSocket transport listening on {}", local_addr);
        Ok(local_addr)
    }

    fn poll(&mut self) -> Result<Vec<TransportEvent>, TransportError> {
        let events = self.events.as_mut().ok_or(TransportError::NotStarted)?;
        let mut surfaced = Vec::new();
        loop {
            match events.try_recv() {
                Ok(Surfaced::Event(event)) => surfaced.push(event),
                Ok(Surfaced::Failed(reason)) => return Err(TransportError::Fatal(reason)),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    return Err(TransportError::Fatal("event channel closed".to_string()))
                }
            }
        }
        Ok(surfaced)
    }

    fn send(&mut self, player: PlayerId, payload: Vec<u8>) -> Result<(), TransportError> {
        let text = String::from_utf8_lossy(&payload).into_owned();
        let session = self.session(player)?;
        match session.outbound.try_send(Outbound::Text(text)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!("🐌 Player {} is not reading its messages, disconnecting", player);
                session.kick.notify_one();
                Err(TransportError::SlowPeer(player))
            }
            Err(TrySendError::Closed(_)) => Err(TransportError::UnknownPlayer(player)),
        }
    }

    fn disconnect(&mut self, player: PlayerId) -> Result<(), TransportError> {
        if self.session(player)?.close() {
            Ok(())
        } else {
            Err(TransportError::UnknownPlayer(player))
        }
    }

    async fn shutdown(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
            let _ = task.await;
        }
        if let Some(shared) = self.shared.take() {
            for session in shared.sessions.iter() {
                session.value().close();
            }
            info!("🔌 Closed {} open session(s)", shared.sessions.len());
        }
        self.events = None;
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let shared = shared.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, addr, shared).await {
                        debug!("Connection from {} ended early: {}", addr, e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                let _ = shared.events.send(Surfaced::Failed(e.to_string())).await;
                break;
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, addr: SocketAddr, shared: Arc<Shared>) -> Result<(), TransportError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| TransportError::Handshake(e.to_string()))?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let Some(player) = shared.allocate() else {
        warn!("🚫 Refusing {}: server is full ({} players)", addr, shared.max_players);
        let close = Message::Close(Some(CloseFrame {
            code: CloseCode::Again,
            reason: "Server is full".to_string().into(),
        }));
        let _ = ws_sender.send(close).await;
        return Ok(());
    };

    let (outbound_tx, mut outbound_rx) = mpsc::channel(shared.outbound_queue);
    let kick = Arc::new(Notify::new());
    shared.sessions.insert(
        player,
        Session {
            outbound: outbound_tx,
            kick: kick.clone(),
        },
    );
    shared.surface(TransportEvent::Connected { player, addr }).await;

    loop {
        tokio::select! {
            incoming = ws_receiver.next() => {
                let payload = match incoming {
                    Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
                    Some(Ok(Message::Binary(data))) => data.to_vec(),
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_sender.send(Message::Pong(data)).await;
                        continue;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("🔌 Player {} closed the connection", player);
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!("WebSocket error for player {}: {}", player, e);
                        break;
                    }
                };
                if !shared.surface_message(player, payload) {
                    warn!("🌊 Player {} is sending faster than the server reads, disconnecting", player);
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            }
            _ = kick.notified() => {
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }
            outgoing = outbound_rx.recv() => match outgoing {
                Some(Outbound::Text(text)) => {
                    trace!("📤 {} bytes to player {}", text.len(), player);
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        debug!("Failed to send to player {}: {}", player, e);
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            },
        }
    }

    shared.sessions.remove(&player);
    shared.surface(TransportEvent::Disconnected { player }).await;
    shared.release(player);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_tungstenite::connect_async;

    async fn poll_until(transport: &mut WebSocketTransport, count: usize) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        for _ in 0..200 {
            events.extend(transport.poll().unwrap());
            if events.len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        events
    }

    async fn started(max_players: usize) -> (WebSocketTransport, String) {
        let mut transport = WebSocketTransport::new();
        let addr = transport
            .startup("127.0.0.1:0".parse().unwrap(), max_players)
            .await
            .unwrap();
        (transport, format!("ws://{}", addr))
    }

    #[tokio::test]
    async fn test_poll_before_startup_fails() {
        let mut transport = WebSocketTransport::new();
        assert!(matches!(transport.poll(), Err(TransportError::NotStarted)));
        assert!(matches!(transport.send(0, vec![]), Err(TransportError::NotStarted)));
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let (first, url) = started(4).await;
        let address = first.local_addr().unwrap();
        let mut second = WebSocketTransport::new();
        let result = second.startup(address, 4).await;
        assert!(matches!(result, Err(TransportError::BindFailed { .. })), "rebinding {} must fail", url);
    }

    #[tokio::test]
    async fn test_connect_message_disconnect_sequence() {
        let (mut transport, url) = started(4).await;

        let (mut client, _) = connect_async(url.as_str()).await.unwrap();
        client.send(Message::text("hello".to_string())).await.unwrap();

        let events = poll_until(&mut transport, 2).await;
        assert!(matches!(events[0], TransportEvent::Connected { player: 0, .. }));
        assert_eq!(
            events[1],
            TransportEvent::Message {
                player: 0,
                payload: b"hello".to_vec()
            }
        );

        transport.send(0, b"welcome".to_vec()).unwrap();
        let reply = client.next().await.unwrap().unwrap();
        assert_eq!(reply.into_text().unwrap().as_str(), "welcome");

        transport.disconnect(0).unwrap();
        let events = poll_until(&mut transport, 1).await;
        assert_eq!(events, vec![TransportEvent::Disconnected { player: 0 }]);
        assert!(matches!(transport.send(0, vec![]), Err(TransportError::UnknownPlayer(0))));

        transport.shutdown().await;
    }

    #[tokio::test]
    async fn test_peer_that_stops_reading_is_disconnected() {
        let mut transport = WebSocketTransport::with_queue_limits(1, DEFAULT_EVENT_QUEUE);
        let addr = transport.startup("127.0.0.1:0".parse().unwrap(), 4).await.unwrap();
        let (mut client, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        let _ = poll_until(&mut transport, 1).await;

        // no await in between, so the connection task cannot drain the queue
        transport.send(0, b"first".to_vec()).unwrap();
        assert!(matches!(transport.send(0, b"second".to_vec()), Err(TransportError::SlowPeer(0))));

        let events = poll_until(&mut transport, 1).await;
        assert_eq!(events, vec![TransportEvent::Disconnected { player: 0 }]);
        let mut saw_close = false;
        while let Some(Ok(frame)) = client.next().await {
            if frame.is_close() {
                saw_close = true;
                break;
            }
        }
        assert!(saw_close);

        transport.shutdown().await;
    }

    #[tokio::test]
    async fn test_flooding_peer_is_disconnected() {
        let mut transport = WebSocketTransport::with_queue_limits(DEFAULT_OUTBOUND_QUEUE, 2);
        let addr = transport.startup("127.0.0.1:0".parse().unwrap(), 4).await.unwrap();
        let (mut client, _) = connect_async(format!("ws://{}", addr)).await.unwrap();

        for i in 0..5 {
            if client.send(Message::text(format!("spam {i}"))).await.is_err() {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut events = Vec::new();
        for _ in 0..200 {
            events.extend(transport.poll().unwrap());
            if events.contains(&TransportEvent::Disconnected { player: 0 }) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(matches!(events[0], TransportEvent::Connected { player: 0, .. }));
        assert_eq!(events.last(), Some(&TransportEvent::Disconnected { player: 0 }));
        let messages = events
            .iter()
            .filter(|e| matches!(e, TransportEvent::Message { .. }))
            .count();
        assert!(messages < 5);

        transport.shutdown().await;
    }

    #[tokio::test]
    async fn test_lowest_free_id_and_capacity() {
        let (mut transport, url) = started(2).await;

        let (mut first, _) = connect_async(url.as_str()).await.unwrap();
        let _ = poll_until(&mut transport, 1).await;
        let (_second, _) = connect_async(url.as_str()).await.unwrap();
        let events = poll_until(&mut transport, 1).await;
        assert!(matches!(events[0], TransportEvent::Connected { player: 1, .. }));

        // third connection is refused with a close frame
        let (mut third, _) = connect_async(url.as_str()).await.unwrap();
        let refused = third.next().await.unwrap().unwrap();
        assert!(refused.is_close());
        assert_eq!(transport.session_count(), 2);

        first.close(None).await.unwrap();
        let events = poll_until(&mut transport, 1).await;
        assert_eq!(events, vec![TransportEvent::Disconnected { player: 0 }]);

        let (_fourth, _) = connect_async(url.as_str()).await.unwrap();
        let events = poll_until(&mut transport, 1).await;
        assert!(matches!(events[0], TransportEvent::Connected { player: 0, .. }));

        transport.shutdown().await;
    }
}

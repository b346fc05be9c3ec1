//! Handling of transport events and script-issued commands.
//!
//! Both run inside [`ServerLoop::tick`]; nothing here blocks.

use crate::{
    messaging::{route_client_message, ServerMessage},
    server::ServerLoop,
    transport::TransportEvent,
};
use script_bridge::{PlayerId, ScriptValue, ServerCommand, ServerEvent};
use std::net::SocketAddr;
use tracing::{debug, info, trace, warn};

impl ServerLoop {
    pub(crate) fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { player, addr } => self.on_connect(player, addr),
            TransportEvent::Disconnected { player } => self.on_disconnect(player),
            TransportEvent::Message { player, payload } => self.on_message(player, &payload),
        }
    }

    /// Registers the player and lets scripts veto the connection.
    fn on_connect(&mut self, player: PlayerId, addr: SocketAddr) {
        info!("🔗 Player {} connected from {}", player, addr);
        if !self.runtime.player_connected(player) {
            warn!("⚠️ Player {} connected twice without disconnecting", player);
        }

        if !self.dispatch(ServerEvent::PlayerConnect, vec![ScriptValue::from(player)]) {
            info!("🚫 Scripts refused player {}", player);
            self.runtime.player_disconnected(player);
            self.send_to(
                player,
                &ServerMessage::Disconnected {
                    reason: "Connection refused".to_string(),
                },
            );
            self.disconnect(player);
            return;
        }

        let options = self.runtime.options();
        let welcome = ServerMessage::Welcome {
            player_id: player,
            server_version: options.server_version.clone(),
            protocol_version: options.protocol_version,
            motd: self.config.motd.clone(),
        };
        self.send_to(player, &welcome);
    }

    fn on_disconnect(&mut self, player: PlayerId) {
        if !self.runtime.is_player_connected(player) {
            // refused during connect, scripts never saw it join
            debug!("Refused player {} closed its connection", player);
            return;
        }
        self.dispatch(ServerEvent::PlayerDisconnect, vec![ScriptValue::from(player)]);
        self.runtime.player_disconnected(player);
        info!("❌ Player {} disconnected", player);
    }

    fn on_message(&mut self, player: PlayerId, payload: &[u8]) {
        if !self.runtime.is_player_connected(player) {
            trace!("Ignoring message from refused player {}", player);
            return;
        }

        let routed = match route_client_message(player, payload) {
            Ok(Some(routed)) => routed,
            Ok(None) => return,
            Err(e) => {
                debug!("❌ Message routing error from player {}: {}", player, e);
                return;
            }
        };

        let chat_line = match routed.event {
            ServerEvent::PlayerSendMessage => routed.args.get(1).and_then(|v| v.as_str()).map(str::to_string),
            _ => None,
        };

        let accepted = self.dispatch(routed.event, routed.args);
        if let (true, Some(line)) = (accepted, chat_line) {
            self.broadcast(&ServerMessage::Chat {
                message: format!("Player {}: {}", player, line),
            });
        }
    }

    /// Carries out every command scripts queued since the last flush.
    pub(crate) fn flush_commands(&mut self) {
        for command in self.runtime.control().drain() {
            match command {
                ServerCommand::SendMessage {
                    message,
                    broadcast: true,
                    ..
                } => self.broadcast(&ServerMessage::Chat { message }),
                ServerCommand::SendMessage { player, message, .. } => {
                    self.send_to(player, &ServerMessage::Chat { message })
                }
                ServerCommand::CleanChat { player } => self.send_to(player, &ServerMessage::CleanChat),
                ServerCommand::Kick { player } => {
                    self.send_to(
                        player,
                        &ServerMessage::Disconnected {
                            reason: "Kicked by server".to_string(),
                        },
                    );
                    self.disconnect(player);
                }
            }
        }
    }

    fn send_to(&mut self, player: PlayerId, message: &ServerMessage) {
        if let Err(e) = self.transport.send(player, message.to_bytes()) {
            debug!("📪 Dropping message for player {}: {}", player, e);
        }
    }

    fn broadcast(&mut self, message: &ServerMessage) {
        let payload = message.to_bytes();
        let players = self.runtime.players();
        for player in &players {
            if let Err(e) = self.transport.send(*player, payload.clone()) {
                debug!("📪 Dropping broadcast for player {}: {}", player, e);
            }
        }
        trace!("📡 Broadcast to {} player(s)", players.len());
    }

    fn disconnect(&mut self, player: PlayerId) {
        if let Err(e) = self.transport.disconnect(player) {
            debug!("Player {} was already gone: {}", player, e);
        }
    }
}

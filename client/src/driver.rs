//! Client half of the login/ping/acknowledge handshake

use log::{debug, info, warn};
use shared::game::{AcknowledgeEvent, LoginEvent, PingEvent};
use shared::protocol::{LoginMessage, PingMessage, WireMessage, INVALID_SESSION};
use shared::session::{SessionDriver, TickContext};
use std::net::{SocketAddr, SocketAddrV4};
use std::time::{Duration, Instant};

/// Minimum time between login attempts while waiting for a session
pub const LOGIN_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Minimum time between pings once logged in
pub const PING_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// Return address advertised in login requests
    pub client_addr: SocketAddrV4,
    pub server_addr: SocketAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    New,
    LoggedIn,
    Disconnected,
}

fn is_due(last: Option<Instant>, now: Instant, interval: Duration) -> bool {
    last.map_or(true, |last| now.saturating_duration_since(last) >= interval)
}

#[derive(Debug)]
pub struct ClientDriver {
    config: ClientConfig,
    state: ClientState,
    player_id: Option<u32>,
    last_login_attempt: Option<Instant>,
    login_attempts: u32,
    last_ping: Option<Instant>,
}

impl ClientDriver {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            state: ClientState::New,
            player_id: None,
            last_login_attempt: None,
            login_attempts: 0,
            last_ping: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Session id assigned by the server, once logged in
    pub fn player_id(&self) -> Option<u32> {
        self.player_id
    }

    /// Stops the client; the next tick ends the loop
    pub fn disconnect(&mut self) {
        if self.state != ClientState::Disconnected {
            info!("Disconnecting from {}", self.config.server_addr);
            self.state = ClientState::Disconnected;
        }
    }

    fn try_login(&mut self, ctx: &mut TickContext<'_>) {
        if !is_due(self.last_login_attempt, ctx.now, LOGIN_RETRY_INTERVAL) {
            return;
        }
        self.last_login_attempt = Some(ctx.now);

        let mut login = LoginMessage::new(
            INVALID_SESSION,
            *self.config.client_addr.ip(),
            self.config.client_addr.port(),
        );
        login.message.message_id = self.login_attempts;
        self.login_attempts = self.login_attempts.wrapping_add(1);

        let Some(bytes) = login.to_bytes() else {
            warn!("Failed to encode login request");
            return;
        };

        match ctx.transport.send_to(self.config.server_addr, &bytes) {
            Ok(()) => debug!(
                "Sent login attempt {} to {}",
                login.message.message_id, self.config.server_addr
            ),
            Err(e) => warn!(
                "Failed to send login to {}: {}",
                self.config.server_addr, e
            ),
        }
    }

    fn try_ping(&mut self, ctx: &mut TickContext<'_>) {
        if !is_due(self.last_ping, ctx.now, PING_INTERVAL) {
            return;
        }

        let Some(id) = self.player_id else {
            return;
        };
        let Some(state) = ctx.game.player_mut(id) else {
            warn!("Own player {} missing from the player table", id);
            return;
        };
        self.last_ping = Some(ctx.now);

        let mut ping = PingMessage::new(id, u64::from(state.ack_count));
        ping.message.message_id = state.next_message_id();
        state.send_tracked(ctx.transport, self.config.server_addr, &mut ping);
    }

    /// Registers another session the server told us about
    fn register_remote(&mut self, ctx: &mut TickContext<'_>, session: u32) {
        if Some(session) == self.player_id {
            debug!("Ignoring repeated login reply for own session {}", session);
            return;
        }

        match ctx.game.create_player(session, ctx.now) {
            Some(_) => info!("Registered remote player {}", session),
            None => warn!("Player {} is already registered, dropping login", session),
        }
    }
}

impl SessionDriver for ClientDriver {
    fn handle_login(&mut self, ctx: &mut TickContext<'_>, ev: LoginEvent) {
        let login = ev.login;
        if !login.has_session() {
            warn!("Login reply from {} carries no session id", ev.from);
            return;
        }

        match self.state {
            ClientState::New => {
                let Some(state) = ctx.game.create_player(login.session, ctx.now) else {
                    warn!(
                        "Session {} is already registered, dropping login",
                        login.session
                    );
                    return;
                };
                state.endpoint = Some(SocketAddr::V4(self.config.client_addr));

                self.player_id = Some(login.session);
                self.state = ClientState::LoggedIn;
                info!(
                    "Logged in to {} as player {}",
                    self.config.server_addr, login.session
                );
            }
            ClientState::LoggedIn => self.register_remote(ctx, login.session),
            ClientState::Disconnected => {
                debug!("Ignoring login for session {} while disconnected", login.session);
            }
        }
    }

    fn handle_ping(&mut self, _ctx: &mut TickContext<'_>, ev: PingEvent) {
        debug!(
            "Ignoring ping from player {} at {}",
            ev.ping.player_id, ev.from
        );
    }

    fn handle_acknowledge(&mut self, _ctx: &mut TickContext<'_>, ev: AcknowledgeEvent) {
        debug!(
            "Server acknowledged message {}",
            ev.ack.acked_message_id
        );
    }

    fn on_tick(&mut self, ctx: &mut TickContext<'_>) -> bool {
        match self.state {
            ClientState::New => self.try_login(ctx),
            ClientState::LoggedIn => self.try_ping(ctx),
            ClientState::Disconnected => return false,
        }
        true
    }
}

//! Server half of the login/ping/acknowledge handshake
//!
//! This module answers client requests for the authoritative server:
//! - Login requests create or resume a session keyed by the client's endpoint
//! - Pings from known sessions refresh activity and are acknowledged
//! - Silent sessions are reported once they exceed the configured timeout
//!
//! Replies are sent through the player's tracked send path so the exact
//! bytes remain available under their outgoing message id.

use log::{debug, info, warn};
use shared::game::{AcknowledgeEvent, LoginEvent, PingEvent};
use shared::protocol::{AcknowledgeMessage, LoginMessage, INVALID_PLAYER};
use shared::session::{SessionDriver, TickContext};
use std::collections::HashSet;
use std::net::{SocketAddr, SocketAddrV4};

/// Ticks between periodic status lines
const SUMMARY_INTERVAL_TICKS: u64 = 100;

/// Event handlers for the server role
///
/// Holds only what the game state does not: which sessions have already
/// been reported as stale, so each one is logged once per silence.
#[derive(Debug, Default)]
pub struct ServerDriver {
    stale: HashSet<u32>,
}

impl ServerDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sessions currently reported as stale
    pub fn stale_sessions(&self) -> &HashSet<u32> {
        &self.stale
    }

    /// Refreshes the stale set and logs sessions that just went silent or
    /// came back
    fn report_stale(&mut self, ctx: &TickContext<'_>) {
        let stale: HashSet<u32> = ctx.game.stale_players(ctx.now).into_iter().collect();

        for id in stale.difference(&self.stale) {
            warn!(
                "Player {} silent for more than {:?}",
                id,
                ctx.game.params().player_timeout
            );
        }
        for id in self.stale.difference(&stale) {
            info!("Player {} is active again", id);
        }

        self.stale = stale;
    }
}

impl SessionDriver for ServerDriver {
    /// Creates or resumes the session for the login's return endpoint and
    /// echoes the login back carrying the assigned session id
    ///
    /// The session is keyed by the address and port the client put in the
    /// payload, which is also where the reply goes.
    fn handle_login(&mut self, ctx: &mut TickContext<'_>, ev: LoginEvent) {
        let login = ev.login;
        let endpoint = SocketAddr::V4(SocketAddrV4::new(login.address, login.port));

        let (state, created) = match ctx.game.create_or_get_player(endpoint, ctx.now) {
            Ok(result) => result,
            Err(e) => {
                warn!("Rejecting login from {} (sent from {}): {}", endpoint, ev.from, e);
                return;
            }
        };

        if created {
            info!("Player {} created for {}", state.id, endpoint);
        } else {
            debug!("Player {} logged in again from {}", state.id, endpoint);
        }
        state.touch(ctx.now);

        let mut reply = LoginMessage::new(state.id, login.address, login.port);
        reply.message.message_id = state.next_message_id();

        if state.send_tracked(ctx.transport, endpoint, &mut reply) {
            debug!("Sent login reply to player {} at {}", state.id, endpoint);
        }
    }

    /// Acknowledges a ping from a known session, echoing its last ack id
    fn handle_ping(&mut self, ctx: &mut TickContext<'_>, ev: PingEvent) {
        let ping = ev.ping;
        if ping.player_id == INVALID_PLAYER {
            warn!("Dropping ping without a player id from {}", ev.from);
            return;
        }

        let Some(state) = ctx.game.player_mut(ping.player_id) else {
            warn!(
                "Dropping ping for unknown player {} from {}",
                ping.player_id, ev.from
            );
            return;
        };

        state.touch(ctx.now);

        let mut reply = AcknowledgeMessage::new(ping.last_ack_id);
        reply.message.message_id = state.next_message_id();
        let target = state.endpoint.unwrap_or(ev.from);
        state.send_tracked(ctx.transport, target, &mut reply);
    }

    fn handle_acknowledge(&mut self, _ctx: &mut TickContext<'_>, ev: AcknowledgeEvent) {
        debug!(
            "Ignoring acknowledgment of message {} from {}",
            ev.ack.acked_message_id, ev.from
        );
    }

    fn on_tick(&mut self, ctx: &mut TickContext<'_>) -> bool {
        self.report_stale(ctx);

        let ticks = ctx.game.ticks();
        if ticks % SUMMARY_INTERVAL_TICKS == 0 {
            debug!(
                "Tick {}: {} players, {} stale",
                ticks,
                ctx.game.player_count(),
                self.stale.len()
            );
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::game::{Game, GameParams};
    use shared::protocol::{PingMessage, WireMessage, INVALID_SESSION};
    use shared::transport::{Datagram, MemoryTransport};
    use std::net::Ipv4Addr;
    use std::time::{Duration, Instant};

    /// Per-thread record of log lines so tests can check levels
    mod captured_logs {
        use log::{Level, LevelFilter, Log, Metadata, Record};
        use std::cell::RefCell;
        use std::sync::Once;

        thread_local! {
            static RECORDS: RefCell<Vec<(Level, String)>> = RefCell::new(Vec::new());
        }

        struct Capture;

        impl Log for Capture {
            fn enabled(&self, _: &Metadata) -> bool {
                true
            }

            fn log(&self, record: &Record) {
                RECORDS.with(|r| {
                    r.borrow_mut()
                        .push((record.level(), record.args().to_string()))
                });
            }

            fn flush(&self) {}
        }

        static LOGGER: Capture = Capture;
        static INIT: Once = Once::new();

        pub fn start() {
            INIT.call_once(|| {
                let _ = log::set_logger(&LOGGER);
                log::set_max_level(LevelFilter::Debug);
            });
            RECORDS.with(|r| r.borrow_mut().clear());
        }

        pub fn take() -> Vec<(Level, String)> {
            RECORDS.with(|r| std::mem::take(&mut *r.borrow_mut()))
        }
    }

    fn test_addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn login_from(port: u16) -> Datagram {
        let mut login = LoginMessage::new(INVALID_SESSION, Ipv4Addr::LOCALHOST, port);
        Datagram::new(
            SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
            login.to_bytes().unwrap(),
        )
    }

    fn ping_from(player_id: u32, last_ack_id: u64) -> Datagram {
        let mut ping = PingMessage::new(player_id, last_ack_id);
        Datagram::new(test_addr(), ping.to_bytes().unwrap())
    }

    fn tick(game: &mut Game, driver: &mut ServerDriver, transport: &MemoryTransport) {
        game.tick(driver, transport, Instant::now());
    }

    #[test]
    fn test_login_creates_player_and_replies() {
        let mut game = Game::new(GameParams::default());
        let mut driver = ServerDriver::new();
        let transport = MemoryTransport::new();

        game.on_message(shared::Action::Login, &login_from(40000));
        tick(&mut game, &mut driver, &transport);

        let sent = transport.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target, test_addr());

        let reply = LoginMessage::decode(&sent[0].bytes).unwrap();
        assert_eq!(reply.session, 1);
        assert_eq!(reply.address, Ipv4Addr::LOCALHOST);
        assert_eq!(reply.port, 40000);
        assert_eq!(reply.message.message_id, 0);

        let player = game.player(1).unwrap();
        assert_eq!(player.endpoint, Some(test_addr()));
        assert_eq!(player.sent.get(0), Some(&sent[0].bytes));
    }

    #[test]
    fn test_repeated_login_reuses_session() {
        let mut game = Game::new(GameParams::default());
        let mut driver = ServerDriver::new();
        let transport = MemoryTransport::new();

        game.on_message(shared::Action::Login, &login_from(40000));
        game.on_message(shared::Action::Login, &login_from(40000));
        game.on_message(shared::Action::Login, &login_from(40001));
        tick(&mut game, &mut driver, &transport);

        let sessions: Vec<(u32, u32)> = transport
            .take()
            .iter()
            .map(|out| {
                let reply = LoginMessage::decode(&out.bytes).unwrap();
                (reply.session, reply.message.message_id)
            })
            .collect();
        assert_eq!(sessions, vec![(1, 0), (1, 1), (2, 0)]);
        assert_eq!(game.player_count(), 2);
    }

    #[test]
    fn test_repeated_login_logs_info_only_on_create() {
        let mut game = Game::new(GameParams::default());
        let mut driver = ServerDriver::new();
        let transport = MemoryTransport::new();

        captured_logs::start();
        game.on_message(shared::Action::Login, &login_from(40000));
        game.on_message(shared::Action::Login, &login_from(40000));
        game.on_message(shared::Action::Login, &login_from(40000));
        tick(&mut game, &mut driver, &transport);

        let info: Vec<String> = captured_logs::take()
            .into_iter()
            .filter(|(level, _)| *level <= log::Level::Info)
            .map(|(_, line)| line)
            .collect();
        assert_eq!(info, vec!["Player 1 created for 127.0.0.1:40000".to_string()]);
        assert_eq!(transport.len(), 3);
    }

    #[test]
    fn test_full_server_sends_nothing() {
        let mut game = Game::new(GameParams {
            max_players: 1,
            ..GameParams::default()
        });
        let mut driver = ServerDriver::new();
        let transport = MemoryTransport::new();

        game.on_message(shared::Action::Login, &login_from(40000));
        game.on_message(shared::Action::Login, &login_from(40001));
        tick(&mut game, &mut driver, &transport);

        assert_eq!(transport.take().len(), 1);
        assert_eq!(game.player_count(), 1);
    }

    #[test]
    fn test_ping_is_acknowledged() {
        let mut game = Game::new(GameParams::default());
        let mut driver = ServerDriver::new();
        let transport = MemoryTransport::new();

        game.on_message(shared::Action::Login, &login_from(40000));
        tick(&mut game, &mut driver, &transport);
        transport.take();

        game.on_message(shared::Action::Ping, &ping_from(1, 0));
        tick(&mut game, &mut driver, &transport);

        let sent = transport.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target, test_addr());
        let ack = AcknowledgeMessage::decode(&sent[0].bytes).unwrap();
        assert_eq!(ack.acked_message_id, 0);
        assert_eq!(ack.message.message_id, 1);
        assert_eq!(game.player(1).unwrap().sent.len(), 2);
    }

    #[test]
    fn test_ping_from_unknown_or_invalid_player_is_dropped() {
        let mut game = Game::new(GameParams::default());
        let mut driver = ServerDriver::new();
        let transport = MemoryTransport::new();

        game.on_message(shared::Action::Ping, &ping_from(INVALID_PLAYER, 0));
        game.on_message(shared::Action::Ping, &ping_from(7, 0));
        tick(&mut game, &mut driver, &transport);

        assert!(transport.is_empty());
        assert_eq!(game.player_count(), 0);
    }

    #[test]
    fn test_failed_send_keeps_session() {
        let mut game = Game::new(GameParams::default());
        let mut driver = ServerDriver::new();
        let transport = MemoryTransport::new();
        transport.set_failing(true);

        game.on_message(shared::Action::Login, &login_from(40000));
        tick(&mut game, &mut driver, &transport);

        let player = game.player(1).unwrap();
        assert!(player.sent.is_empty());
        assert_eq!(player.next_message, 1);
    }

    #[test]
    fn test_stale_sessions_are_reported_not_evicted() {
        let mut game = Game::new(GameParams {
            player_timeout: Duration::from_millis(100),
            ..GameParams::default()
        });
        let mut driver = ServerDriver::new();
        let transport = MemoryTransport::new();
        let start = Instant::now();

        game.on_message(shared::Action::Login, &login_from(40000));
        assert!(game.tick(&mut driver, &transport, start));
        assert!(driver.stale_sessions().is_empty());

        let later = start + Duration::from_secs(1);
        assert!(game.tick(&mut driver, &transport, later));
        assert!(driver.stale_sessions().contains(&1));
        assert!(game.player(1).is_some());

        game.on_message(shared::Action::Ping, &ping_from(1, 0));
        assert!(game.tick(&mut driver, &transport, later));
        assert!(driver.stale_sessions().is_empty());
    }
}

//! Role-specific event handling on top of [`Game`]
//!
//! A [`SessionDriver`] decides what a role does with each decoded message;
//! [`GameLoop`] ties a driver, its game state and an outgoing transport
//! together and plugs them into the datagram loop in [`crate::net`].

use crate::game::{AcknowledgeEvent, Game, GameParams, LoginEvent, PingEvent};
use crate::net::DatagramHandler;
use crate::protocol::Message;
use crate::transport::{Datagram, Transport};
use log::{debug, warn};
use std::time::Instant;

/// What a handler may touch while a tick is running
pub struct TickContext<'a> {
    pub game: &'a mut Game,
    pub transport: &'a dyn Transport,
    pub now: Instant,
}

/// One handler per message kind, implemented once per role
pub trait SessionDriver {
    fn handle_login(&mut self, ctx: &mut TickContext<'_>, ev: LoginEvent);

    fn handle_ping(&mut self, ctx: &mut TickContext<'_>, ev: PingEvent);

    fn handle_acknowledge(&mut self, ctx: &mut TickContext<'_>, ev: AcknowledgeEvent);

    /// Runs after the event queue is drained. Returning false stops the loop.
    fn on_tick(&mut self, _ctx: &mut TickContext<'_>) -> bool {
        true
    }
}

pub struct GameLoop<D, T> {
    game: Game,
    driver: D,
    transport: T,
}

impl<D: SessionDriver, T: Transport> GameLoop<D, T> {
    pub fn new(params: GameParams, driver: D, transport: T) -> Self {
        Self {
            game: Game::new(params),
            driver,
            transport,
        }
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    pub fn game_mut(&mut self) -> &mut Game {
        &mut self.game
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Peeks the action of a received datagram and queues it for the next tick
    pub fn on_datagram(&mut self, datagram: Datagram) {
        let message = match Message::decode(&datagram.bytes) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    "Dropping {} byte datagram from {}: {}",
                    datagram.bytes.len(),
                    datagram.from,
                    e
                );
                return;
            }
        };

        debug!(
            "Received {:?} message {} from {} ({} payload bytes, hash {:#018x})",
            message.action,
            message.message_id,
            datagram.from,
            message.header.payload_size,
            message.header.hash
        );

        self.game.on_message(message.action, &datagram);
    }

    pub fn tick_at(&mut self, now: Instant) -> bool {
        self.game.tick(&mut self.driver, &self.transport, now)
    }
}

impl<D: SessionDriver, T: Transport> DatagramHandler for GameLoop<D, T> {
    fn on_datagram(&mut self, datagram: Datagram) {
        GameLoop::on_datagram(self, datagram);
    }

    fn on_tick(&mut self) -> bool {
        self.tick_at(Instant::now())
    }
}

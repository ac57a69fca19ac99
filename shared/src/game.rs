use crate::player::{PlayerState, Position, PositionState};
use crate::protocol::{AcknowledgeMessage, Action, LoginMessage, PingMessage, WireMessage};
use crate::session::{SessionDriver, TickContext};
use crate::transport::{Datagram, Transport};
use log::{debug, warn};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameParams {
    pub height: u32,
    pub width: u32,
    pub max_players: u32,
    pub player_timeout: Duration,
}

impl Default for GameParams {
    fn default() -> Self {
        Self {
            height: 64,
            width: 64,
            max_players: 8,
            player_timeout: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("server is full ({0} players)")]
    ServerFull(u32),

    #[error("unknown player {0}")]
    UnknownPlayer(u32),

    #[error("cell ({x}, {y}) is occupied by player {occupant}")]
    PositionOccupied { x: u32, y: u32, occupant: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginEvent {
    pub from: SocketAddr,
    pub login: LoginMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingEvent {
    pub from: SocketAddr,
    pub ping: PingMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcknowledgeEvent {
    pub from: SocketAddr,
    pub ack: AcknowledgeMessage,
}

/// A decoded datagram waiting for the next tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Login(LoginEvent),
    Ping(PingEvent),
    Acknowledge(AcknowledgeEvent),
}

impl Event {
    pub fn action(&self) -> Action {
        match self {
            Event::Login(_) => Action::Login,
            Event::Ping(_) => Action::Ping,
            Event::Acknowledge(_) => Action::Acknowledge,
        }
    }

    pub fn sender(&self) -> SocketAddr {
        match self {
            Event::Login(ev) => ev.from,
            Event::Ping(ev) => ev.from,
            Event::Acknowledge(ev) => ev.from,
        }
    }
}

/// Grid, player table and inbound event queue for one role.
///
/// Datagrams are turned into events by [`Game::on_message`] as they arrive,
/// but nothing acts on them until [`Game::tick`] drains the queue.
#[derive(Debug)]
pub struct Game {
    params: GameParams,
    grid: Vec<PositionState>,
    players: HashMap<u32, PlayerState>,
    events: VecDeque<Event>,
    next_player_id: u32,
    ticks: u64,
}

impl Game {
    pub fn new(params: GameParams) -> Self {
        let mut grid = Vec::with_capacity((params.width as usize) * (params.height as usize));
        for y in 0..params.height {
            for x in 0..params.width {
                grid.push(PositionState {
                    pos: Position::new(x, y),
                    player: None,
                });
            }
        }

        Self {
            params,
            grid,
            players: HashMap::new(),
            events: VecDeque::new(),
            next_player_id: 1,
            ticks: 0,
        }
    }

    pub fn params(&self) -> &GameParams {
        &self.params
    }

    pub fn is_valid_position(&self, x: u32, y: u32) -> bool {
        x < self.params.width && y < self.params.height
    }

    fn cell_index(&self, x: u32, y: u32) -> usize {
        assert!(
            self.is_valid_position(x, y),
            "position ({}, {}) outside {}x{} grid",
            x,
            y,
            self.params.width,
            self.params.height
        );
        (y as usize) * (self.params.width as usize) + (x as usize)
    }

    /// Panics if `(x, y)` is outside the grid
    pub fn position(&self, x: u32, y: u32) -> &PositionState {
        &self.grid[self.cell_index(x, y)]
    }

    /// Panics if `(x, y)` is outside the grid
    pub fn position_mut(&mut self, x: u32, y: u32) -> &mut PositionState {
        let index = self.cell_index(x, y);
        &mut self.grid[index]
    }

    /// Moves a player onto a cell, freeing the cell it stood on before
    pub fn place_player(&mut self, id: u32, x: u32, y: u32) -> Result<(), SessionError> {
        let previous = self
            .players
            .get(&id)
            .ok_or(SessionError::UnknownPlayer(id))?
            .position;

        match self.position(x, y).player {
            Some(occupant) if occupant != id => {
                return Err(SessionError::PositionOccupied { x, y, occupant })
            }
            _ => {}
        }

        if let Some(previous) = previous {
            self.position_mut(previous.x, previous.y).player = None;
        }
        self.position_mut(x, y).player = Some(id);
        if let Some(player) = self.players.get_mut(&id) {
            player.position = Some(Position::new(x, y));
        }

        Ok(())
    }

    /// The player standing on `(x, y)`, resolved through the player table
    pub fn occupant(&self, x: u32, y: u32) -> Option<&PlayerState> {
        self.position(x, y)
            .player
            .and_then(|id| self.players.get(&id))
    }

    /// Returns the session for `endpoint`, creating one with the next id if
    /// the endpoint has none. The flag is true when a session was created.
    pub fn create_or_get_player(
        &mut self,
        endpoint: SocketAddr,
        now: Instant,
    ) -> Result<(&mut PlayerState, bool), SessionError> {
        let existing = self
            .players
            .values()
            .find(|player| player.endpoint == Some(endpoint))
            .map(|player| player.id);

        if let Some(id) = existing {
            let player = self
                .players
                .get_mut(&id)
                .ok_or(SessionError::UnknownPlayer(id))?;
            return Ok((player, false));
        }

        if self.players.len() >= self.params.max_players as usize {
            return Err(SessionError::ServerFull(self.params.max_players));
        }

        let id = self.next_player_id;
        self.next_player_id = self.next_player_id.wrapping_add(1);

        let player = self
            .players
            .entry(id)
            .or_insert_with(|| PlayerState::new(id, Some(endpoint), now));
        Ok((player, true))
    }

    /// Registers a player under an id chosen elsewhere. Returns `None` when
    /// the id is already taken, leaving the existing entry alone.
    pub fn create_player(&mut self, id: u32, now: Instant) -> Option<&mut PlayerState> {
        match self.players.entry(id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => Some(slot.insert(PlayerState::new(id, None, now))),
        }
    }

    pub fn player(&self, id: u32) -> Option<&PlayerState> {
        self.players.get(&id)
    }

    pub fn player_mut(&mut self, id: u32) -> Option<&mut PlayerState> {
        self.players.get_mut(&id)
    }

    pub fn players(&self) -> impl Iterator<Item = &PlayerState> {
        self.players.values()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Ids of players silent for longer than the configured timeout, in
    /// ascending order
    pub fn stale_players(&self, now: Instant) -> Vec<u32> {
        let mut stale: Vec<u32> = self
            .players
            .values()
            .filter(|player| player.is_timed_out(now, self.params.player_timeout))
            .map(|player| player.id)
            .collect();
        stale.sort_unstable();
        stale
    }

    /// Decodes `datagram` as `action` and queues the result. Undecodable
    /// datagrams are logged and dropped. Returns whether an event was queued.
    pub fn on_message(&mut self, action: Action, datagram: &Datagram) -> bool {
        let from = datagram.from;
        let bytes = datagram.bytes.as_ref();

        let decoded = match action {
            Action::Login => {
                LoginMessage::decode(bytes).map(|login| Event::Login(LoginEvent { from, login }))
            }
            Action::Ping => {
                PingMessage::decode(bytes).map(|ping| Event::Ping(PingEvent { from, ping }))
            }
            Action::Acknowledge => AcknowledgeMessage::decode(bytes)
                .map(|ack| Event::Acknowledge(AcknowledgeEvent { from, ack })),
            Action::None => {
                debug!("Ignoring message without an action from {}", from);
                return false;
            }
        };

        match decoded {
            Ok(event) => {
                self.events.push_back(event);
                true
            }
            Err(e) => {
                warn!("Dropping {:?} datagram from {}: {}", action, from, e);
                false
            }
        }
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Drains every queued event in arrival order through `driver`, then
    /// lets the driver run its per-tick work. Returns false when the driver
    /// wants the loop to stop.
    pub fn tick<D: SessionDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        transport: &dyn Transport,
        now: Instant,
    ) -> bool {
        self.ticks += 1;

        while let Some(event) = self.events.pop_front() {
            debug!("Handling {:?} from {}", event.action(), event.sender());
            let mut ctx = TickContext {
                game: &mut *self,
                transport,
                now,
            };
            match event {
                Event::Login(ev) => driver.handle_login(&mut ctx, ev),
                Event::Ping(ev) => driver.handle_ping(&mut ctx, ev),
                Event::Acknowledge(ev) => driver.handle_acknowledge(&mut ctx, ev),
            }
        }

        let mut ctx = TickContext {
            game: &mut *self,
            transport,
            now,
        };
        driver.on_tick(&mut ctx)
    }
}

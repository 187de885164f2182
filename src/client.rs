//! Client context
//!
//! Single owner of the connection manager, session controller and game
//! store. Socket events, timers and user commands are all processed on the
//! one task running [`ClientContext::run`], so no state here is locked.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::auth::SessionController;
use crate::config::{ClientConfig, ConfigError};
use crate::game::{GameStore, ItemRef};
use crate::metrics::Metrics;
use crate::net::connection::{ConnectionManager, ConnectionState, Outbox};
use crate::net::protocol::{self, InboundMessage, MessageKind, OutboundMessage, ProtocolError};
use crate::net::transport::{Connector, SocketEvent, SocketEventKind};
use crate::notify::Notifier;

/// Read access to the context from outside the event loop
pub type Inspect = Box<dyn FnOnce(&ClientContext) + Send>;

/// User-initiated calls into the event loop
pub enum Command {
    Swap { cell: usize, other: usize },
    Merge { cell: usize, other: usize },
    Buy { cell: usize, item: ItemRef },
    Sell { cell: usize },
    /// Re-request the full inventory now
    RefreshInventory,
    Inspect(Inspect),
    Shutdown,
}

/// Application context owning all client state
pub struct ClientContext {
    ready: bool,
    initialized: bool,
    socket: ConnectionManager<ClientContext>,
    session: Arc<SessionController>,
    game: GameStore,
    notifier: Box<dyn Notifier>,
    metrics: Arc<Metrics>,
}

impl ClientContext {
    pub fn new(
        config: &ClientConfig,
        connector: Box<dyn Connector>,
        session: Arc<SessionController>,
        notifier: Box<dyn Notifier>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, ConfigError> {
        let socket = ConnectionManager::new(
            config.socket_url()?,
            connector,
            config.reconnect_policy(),
            metrics.clone(),
        );

        Ok(Self {
            ready: false,
            initialized: false,
            socket,
            session,
            game: GameStore::new(config.inventory_poll_interval),
            notifier,
            metrics,
        })
    }

    /// Connect for the first time; later calls only warn
    pub fn init(&mut self) -> bool {
        if self.initialized {
            warn!("Client already initialized");
            return false;
        }
        self.initialized = true;
        self.connect();
        true
    }

    /// Open a fresh socket, abandoning the current one
    pub fn connect(&mut self) {
        self.ready = false;
        self.socket.open();
        self.socket.add_listener(MessageKind::Session, on_session);
        self.socket.add_listener(MessageKind::Toast, on_toast);
    }

    /// Register the game listeners, request the game state and start the poll
    pub fn init_game(&mut self) -> bool {
        if self.game.is_initialized() {
            warn!("Game already initialized");
            return false;
        }
        for kind in GameStore::KINDS {
            self.socket.add_listener(kind, on_game_message);
        }
        self.game.init(&mut self.socket)
    }

    /// True once the server pushed the session for this connection
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn game(&self) -> &GameStore {
        &self.game
    }

    pub fn session(&self) -> &Arc<SessionController> {
        &self.session
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.socket.state()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Feed one transport event through the lifecycle handlers
    pub fn handle_event(&mut self, event: SocketEvent) {
        if !self.socket.is_current(event.attempt) {
            trace!("Dropping event of stale attempt {}", event.attempt);
            return;
        }

        match event.kind {
            SocketEventKind::Open => self.on_open(),
            SocketEventKind::Message(raw) => self.on_message(&raw),
            SocketEventKind::Error(error) => self.on_error(&error),
            SocketEventKind::Closed { clean, code, reason } => self.on_close(clean, code, &reason),
        }
    }

    fn on_open(&mut self) {
        info!("Socket open");
        let token = self.session.token();
        self.socket.handle_open(token.as_deref());

        // Catch up on whatever was pushed while disconnected
        if self.game.is_initialized() {
            self.game.poll_game_state(&mut self.socket);
        }
    }

    fn on_message(&mut self, raw: &str) {
        self.metrics.record_frame_received(raw.len());

        let message = match protocol::decode(raw) {
            Ok(message) => message,
            Err(ProtocolError::ServerError(reason)) => {
                warn!("Server error: {}", reason);
                Metrics::incr(&self.metrics.server_errors);
                return;
            }
            Err(ProtocolError::UnknownKind(kind)) => {
                warn!("No listener for '{}', dropping", kind);
                Metrics::incr(&self.metrics.unhandled_messages);
                return;
            }
            Err(e) => {
                warn!("Dropping frame: {}", e);
                Metrics::incr(&self.metrics.malformed_frames);
                return;
            }
        };

        let kind = message.kind();
        match self.socket.listener(kind) {
            Some(listener) => listener(self, message),
            None => {
                warn!("No listener for '{}', dropping", kind);
                Metrics::incr(&self.metrics.unhandled_messages);
            }
        }
    }

    fn on_error(&mut self, error: &str) {
        // A close event follows and does the recovery
        warn!("Socket error: {}", error);
    }

    fn on_close(&mut self, clean: bool, code: Option<u16>, reason: &str) {
        if clean {
            info!("Socket closed (code {:?}) {}", code, reason);
        } else {
            warn!("Socket lost {}", reason);
        }
        self.ready = false;
        self.socket.handle_close();
    }

    /// Reconnect and poll when their deadlines passed
    pub fn tick(&mut self, now: Instant) {
        if self
            .socket
            .reconnect_deadline()
            .map_or(false, |deadline| now >= deadline)
        {
            self.connect();
        }

        if self.game.poll_if_due(now, &mut self.socket) {
            Metrics::incr(&self.metrics.inventory_polls);
        }
    }

    /// Earliest timer deadline, if any timer is armed
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.socket.reconnect_deadline(), self.game.next_poll()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    // Actions: premove locally, then tell the server

    pub fn swap(&mut self, cell: usize, other: usize) {
        let applied = self.game.premove_swap(cell, other);
        self.record_premove(applied);
        self.socket.send(OutboundMessage::ActionSwap { cell, other });
    }

    pub fn merge(&mut self, cell: usize, other: usize) {
        let applied = self.game.premove_merge(cell, other);
        self.record_premove(applied);
        self.socket.send(OutboundMessage::ActionMerge { cell, other });
    }

    pub fn buy(&mut self, cell: usize, item: ItemRef) {
        let applied = self.game.premove_place(cell, item.as_str());
        self.record_premove(applied);
        self.socket.send(OutboundMessage::ActionBuy { cell, item });
    }

    pub fn sell(&mut self, cell: usize) {
        let applied = self.game.premove_remove(cell);
        self.record_premove(applied);
        self.socket.send(OutboundMessage::ActionSell { cell });
    }

    pub fn refresh_inventory(&mut self) {
        self.game.poll_inventory_state(&mut self.socket);
    }

    fn record_premove(&self, applied: bool) {
        if applied {
            Metrics::incr(&self.metrics.premoves_applied);
        }
    }

    /// Run one user command; `false` asks the loop to stop
    pub fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Swap { cell, other } => self.swap(cell, other),
            Command::Merge { cell, other } => self.merge(cell, other),
            Command::Buy { cell, item } => self.buy(cell, item),
            Command::Sell { cell } => self.sell(cell),
            Command::RefreshInventory => self.refresh_inventory(),
            Command::Inspect(inspect) => inspect(&*self),
            Command::Shutdown => return false,
        }
        true
    }

    /// Event loop: socket events, timers and commands until shutdown
    ///
    /// Call [`init`](Self::init) and, for a game client,
    /// [`init_game`](Self::init_game) first.
    pub async fn run(
        &mut self,
        mut events: mpsc::UnboundedReceiver<SocketEvent>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        loop {
            let deadline = self.next_deadline();

            tokio::select! {
                // Socket events first so commands see the latest pushes
                biased;

                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        warn!("Socket event channel closed");
                        break;
                    }
                },
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            debug!("Shutdown requested");
                            break;
                        }
                    }
                    None => break,
                },
                _ = wait_until(deadline) => self.tick(Instant::now()),
            }
        }

        self.socket.shutdown();
        info!(
            "Client stopped after {} frames sent",
            self.metrics.frames_sent.load(Ordering::Relaxed)
        );
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn on_session(ctx: &mut ClientContext, message: InboundMessage) {
    if let InboundMessage::Session(session) = message {
        ctx.session.apply_session(session);
        ctx.ready = true;
    }
}

fn on_toast(ctx: &mut ClientContext, message: InboundMessage) {
    if let InboundMessage::Toast(text) = message {
        ctx.notifier.notify(&text);
    }
}

fn on_game_message(ctx: &mut ClientContext, message: InboundMessage) {
    let kind = message.kind();
    if let Err(e) = ctx.game.apply(message) {
        warn!("Could not apply '{}': {}", kind, e);
        if e.needs_resync() {
            Metrics::incr(&ctx.metrics.resyncs_requested);
            ctx.game.poll_inventory_state(&mut ctx.socket);
        }
    }
}

//! Connection manager
//!
//! Owns the socket attempt, the FIFO send queue, the kind -> listener table
//! and the reconnect schedule. Lifecycle events are fed in by the owner, which
//! also performs the dispatch, so listeners can borrow the whole owner.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashMap;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::metrics::Metrics;
use crate::net::protocol::{encode, Envelope, Handshake, InboundMessage, MessageKind, OutboundMessage};
use crate::net::transport::{AttemptId, Connector, Transport};

/// Server message handler, invoked with the owning context
pub type Listener<C> = fn(&mut C, InboundMessage);

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected, sends are dropped
    Disconnected,
    /// Attempt in flight, sends are queued
    Connecting,
    /// Handshake sent, sends go straight out
    Open,
    /// Lost, waiting for the reconnect; sends are dropped
    Closed,
}

/// Delay between a close and the next attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    Fixed(Duration),
    /// Doubles per consecutive failure, capped at `max`
    Backoff { initial: Duration, max: Duration },
}

impl ReconnectPolicy {
    /// Delay after `failures` closes without a successful open in between
    pub fn delay(&self, failures: u32) -> Duration {
        match *self {
            ReconnectPolicy::Fixed(delay) => delay,
            ReconnectPolicy::Backoff { initial, max } => {
                let factor = 2u32.saturating_pow(failures.min(16));
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

/// Anything client messages can be handed to
pub trait Outbox {
    fn send(&mut self, message: OutboundMessage);
}

impl Outbox for Vec<OutboundMessage> {
    fn send(&mut self, message: OutboundMessage) {
        self.push(message);
    }
}

/// Socket connection manager
pub struct ConnectionManager<C> {
    url: Url,
    connector: Box<dyn Connector>,
    transport: Option<Box<dyn Transport>>,
    state: ConnectionState,
    attempt: AttemptId,
    connect_started: Option<Instant>,
    send_queue: VecDeque<Envelope>,
    listeners: HashMap<MessageKind, Listener<C>>,
    policy: ReconnectPolicy,
    failures: u32,
    reconnect_at: Option<Instant>,
    metrics: Arc<Metrics>,
}

impl<C> ConnectionManager<C> {
    pub fn new(
        url: Url,
        connector: Box<dyn Connector>,
        policy: ReconnectPolicy,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            url,
            connector,
            transport: None,
            state: ConnectionState::Disconnected,
            attempt: 0,
            connect_started: None,
            send_queue: VecDeque::new(),
            listeners: HashMap::new(),
            policy,
            failures: 0,
            reconnect_at: None,
            metrics,
        }
    }

    /// Start a new attempt, abandoning any previous one
    pub fn open(&mut self) -> AttemptId {
        if let Some(mut previous) = self.transport.take() {
            debug!("Abandoning attempt {}", self.attempt);
            previous.close();
        }

        self.attempt += 1;
        self.state = ConnectionState::Connecting;
        self.reconnect_at = None;
        self.connect_started = Some(Instant::now());
        self.transport = Some(self.connector.open(&self.url, self.attempt));
        Metrics::incr(&self.metrics.connect_attempts);

        info!("Connecting to {} (attempt {})", self.url, self.attempt);
        self.attempt
    }

    /// Whether an event from `attempt` concerns the live socket
    pub fn is_current(&self, attempt: AttemptId) -> bool {
        self.transport.is_some() && attempt == self.attempt
    }

    /// Socket opened: send the handshake, then drain the queue in order
    pub fn handle_open(&mut self, token: Option<&str>) {
        self.state = ConnectionState::Open;
        self.failures = 0;
        self.metrics.connected.store(1, Ordering::Relaxed);
        if let Some(started) = self.connect_started.take() {
            self.metrics.record_connect_time(started.elapsed());
        }

        match encode(&Handshake { token }) {
            Ok(frame) => {
                if !self.transmit(frame) {
                    return;
                }
            }
            Err(e) => warn!("Failed to encode handshake: {}", e),
        }

        let queued = self.send_queue.len();
        while let Some(envelope) = self.send_queue.pop_front() {
            let frame = match encode(&envelope) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Dropping queued '{}': {}", envelope.kind, e);
                    continue;
                }
            };
            if !self.transmit(frame) {
                // Keep order for the next open
                self.send_queue.push_front(envelope);
                return;
            }
        }

        if queued > 0 {
            debug!("Flushed {} queued messages", queued);
        }
    }

    /// Socket closed: schedule exactly one reconnect
    pub fn handle_close(&mut self) -> Duration {
        self.transport = None;
        self.state = ConnectionState::Closed;
        self.metrics.connected.store(0, Ordering::Relaxed);

        let delay = self.policy.delay(self.failures);
        self.failures = self.failures.saturating_add(1);
        self.reconnect_at = Some(Instant::now() + delay);
        Metrics::incr(&self.metrics.reconnects);

        info!("Reconnecting in {:?}", delay);
        delay
    }

    /// Close for good, no reconnect
    pub fn shutdown(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.state = ConnectionState::Disconnected;
        self.reconnect_at = None;
        self.metrics.connected.store(0, Ordering::Relaxed);
    }

    /// Send or queue an envelope depending on the socket state
    pub fn send_envelope(&mut self, envelope: Envelope) {
        match self.state {
            ConnectionState::Disconnected => {
                warn!("Socket not initialized, dropping '{}'", envelope.kind);
                Metrics::incr(&self.metrics.sends_dropped);
            }
            ConnectionState::Closed => {
                warn!("Socket closed, dropping '{}'", envelope.kind);
                Metrics::incr(&self.metrics.sends_dropped);
            }
            ConnectionState::Connecting => {
                debug!("Socket not open, queueing '{}'", envelope.kind);
                Metrics::incr(&self.metrics.messages_queued);
                self.send_queue.push_back(envelope);
            }
            ConnectionState::Open => match encode(&envelope) {
                Ok(frame) => {
                    if !self.transmit(frame) {
                        self.send_queue.push_back(envelope);
                    }
                }
                Err(e) => warn!("Failed to encode '{}': {}", envelope.kind, e),
            },
        }
    }

    /// Register the listener for a kind, replacing any previous one
    pub fn add_listener(&mut self, kind: MessageKind, listener: Listener<C>) {
        if self.listeners.insert(kind, listener).is_some() {
            debug!("Replaced listener for '{}'", kind);
        }
    }

    pub fn listener(&self, kind: MessageKind) -> Option<Listener<C>> {
        self.listeners.get(&kind).copied()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn queued(&self) -> usize {
        self.send_queue.len()
    }

    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect_at
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Write a frame to the live transport, false if it is gone
    fn transmit(&mut self, frame: String) -> bool {
        let Some(transport) = self.transport.as_mut() else {
            return false;
        };
        let bytes = frame.len();
        match transport.send_text(frame) {
            Ok(()) => {
                self.metrics.record_frame_sent(bytes);
                true
            }
            Err(e) => {
                warn!("Send failed on attempt {}: {}", self.attempt, e);
                false
            }
        }
    }
}

impl<C> Outbox for ConnectionManager<C> {
    fn send(&mut self, message: OutboundMessage) {
        self.send_envelope(message.into_envelope());
    }
}

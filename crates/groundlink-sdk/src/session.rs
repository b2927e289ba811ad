//! The link session: connection lifecycle, reader loop, heartbeat loop.
//!
//! A [`LinkSession`] owns at most one active connection at a time and runs
//! it through an explicit state machine:
//!
//! ```text
//! Idle → Connecting → Connected → Disconnecting → Idle
//!            └→ Faulted → Idle          (verification failure)
//!                  Connected → Faulted → Idle   (transport failure)
//! ```
//!
//! While `Connected`, two loops run: the reader loop (on the blocking
//! pool, since transport reads block with a timeout) and, for MAVLink only, the
//! heartbeat loop (plain tokio task). Both observe a shared
//! [`watch`](tokio::sync::watch) stop signal at every suspension point, so
//! `disconnect` can join them within a bound set by the read timeout.
//!
//! Decoded messages and state transitions fan out to subscribers over a
//! [`broadcast`](tokio::sync::broadcast) channel: dispatch order equals
//! decode order, and a slow subscriber lags rather than backpressuring the
//! reader loop.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use groundlink_models::command::CommandIntent;
use groundlink_models::mavlink::{self, MSG_HEARTBEAT};
use groundlink_models::microlink;
use groundlink_models::value::{FieldMap, FieldValue};
use groundlink_models::{CatalogEntry, MessageSchema};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapter::{CommandEncoder, ProtocolAdapter, ProtocolKind};
use crate::error::LinkError;
use crate::stats::MessageStats;
use crate::transport::{self, SerialTransport, SharedTransport, Transport, UdpTransport};

/// How long connection verification waits for a liveness frame.
pub const VERIFY_TIMEOUT: Duration = Duration::from_secs(2);
/// Upper bound on one reader-loop suspension; also the shutdown latency.
pub const READ_DEADLINE: Duration = Duration::from_secs(1);
/// Keepalive period of the heartbeat loop.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
/// Bound on joining each loop during disconnect.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);
/// Event channel depth before slow subscribers start lagging.
const EVENT_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Session lifecycle state.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum LinkState {
    /// No connection; the only state accepting `connect`.
    Idle,
    /// Transport opening and liveness verification in progress.
    Connecting,
    /// Loops running, telemetry flowing.
    Connected,
    /// `disconnect` in progress; loops winding down.
    Disconnecting,
    /// A failure was detected; transitions to `Idle` immediately after.
    Faulted,
}

/// Where and how to connect.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkDescriptor {
    /// Homebrew FC on a serial port.
    SerialMicroLink {
        /// OS device path.
        port: String,
        /// Baud rate.
        baud: u32,
    },
    /// MAVLink autopilot on a serial port.
    SerialMavlink {
        /// OS device path.
        port: String,
        /// Baud rate.
        baud: u32,
    },
    /// MAVLink autopilot over UDP (listen side; the autopilot talks first).
    UdpMavlink {
        /// Local address to bind.
        bind_host: String,
        /// Local port to bind.
        bind_port: u16,
    },
}

impl LinkDescriptor {
    /// The protocol this descriptor selects.
    pub fn protocol(&self) -> ProtocolKind {
        match self {
            LinkDescriptor::SerialMicroLink { .. } => ProtocolKind::MicroLink,
            LinkDescriptor::SerialMavlink { .. } | LinkDescriptor::UdpMavlink { .. } => {
                ProtocolKind::Mavlink
            }
        }
    }

    fn validate(&self) -> Result<(), LinkError> {
        match self {
            LinkDescriptor::SerialMicroLink { port, baud }
            | LinkDescriptor::SerialMavlink { port, baud } => {
                if port.is_empty() {
                    return Err(LinkError::Config("no serial port selected".to_string()));
                }
                if *baud == 0 {
                    return Err(LinkError::Config("no baud rate selected".to_string()));
                }
            }
            LinkDescriptor::UdpMavlink { bind_host, .. } => {
                if bind_host.is_empty() {
                    return Err(LinkError::Config("no bind host given".to_string()));
                }
            }
        }
        Ok(())
    }
}

/// One decoded, timestamped telemetry message.
#[derive(Debug, Clone)]
pub struct DecodedMessage {
    /// Message id.
    pub id: u32,
    /// Fields in schema order.
    pub fields: FieldMap,
    /// Monotonic arrival timestamp.
    pub arrival: Instant,
}

impl DecodedMessage {
    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }
}

/// Events fanned out to subscribers.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// One decoded frame; fired exactly once per frame, in decode order.
    Message(DecodedMessage),
    /// The session changed state.
    StateChanged(LinkState),
}

/// Summary of the active connection.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    /// Active wire protocol.
    pub protocol: ProtocolKind,
    /// The descriptor the session was opened with.
    pub descriptor: LinkDescriptor,
}

// ---------------------------------------------------------------------------
// Session internals
// ---------------------------------------------------------------------------

pub(crate) struct Shared {
    inner: Mutex<Inner>,
    stats: Mutex<MessageStats>,
    catalog: Mutex<Vec<MessageSchema>>,
    events: broadcast::Sender<LinkEvent>,
}

struct Inner {
    state: LinkState,
    descriptor: Option<LinkDescriptor>,
    transport: Option<SharedTransport>,
    encoder: Option<Arc<Mutex<CommandEncoder>>>,
    stop: Option<watch::Sender<bool>>,
    reader: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
}

impl Shared {
    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lock_stats(&self) -> MutexGuard<'_, MessageStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_catalog(&self) -> MutexGuard<'_, Vec<MessageSchema>> {
        self.catalog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit_state(&self, state: LinkState) {
        let _ = self.events.send(LinkEvent::StateChanged(state));
    }

    /// Add a newly observed MAVLink id to the session catalog.
    fn observe(&self, protocol: ProtocolKind, id: u32) {
        if protocol != ProtocolKind::Mavlink {
            return;
        }
        let mut catalog = self.lock_catalog();
        if catalog.iter().all(|s| s.id != id) {
            catalog.push(mavlink::schema_for(id));
            catalog.sort_unstable_by_key(|s| s.id);
        }
    }

    /// Implicit disconnect from inside the reader loop: a dead transport is
    /// a disconnect, never something to retry or block on.
    fn fault(&self, error: &LinkError) {
        let mut inner = self.lock_inner();
        if inner.state != LinkState::Connected {
            // A stop racing a failure: the explicit disconnect wins.
            return;
        }
        warn!(%error, "link faulted");
        inner.state = LinkState::Faulted;
        self.emit_state(LinkState::Faulted);
        if let Some(stop) = &inner.stop {
            let _ = stop.send(true);
        }
        inner.stop = None;
        inner.transport = None;
        inner.encoder = None;
        inner.descriptor = None;
        inner.reader = None;
        inner.heartbeat = None;
        inner.state = LinkState::Idle;
        self.emit_state(LinkState::Idle);
        drop(inner);
        self.lock_stats().reset();
        self.lock_catalog().clear();
    }
}

// ---------------------------------------------------------------------------
// LinkSession
// ---------------------------------------------------------------------------

/// Manager for one telemetry link.
///
/// Cheap to clone through its internal `Arc`; all methods take `&self`.
#[derive(Clone)]
pub struct LinkSession {
    shared: Arc<Shared>,
}

impl Default for LinkSession {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkSession {
    /// A session in the `Idle` state.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        LinkSession {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: LinkState::Idle,
                    descriptor: None,
                    transport: None,
                    encoder: None,
                    stop: None,
                    reader: None,
                    heartbeat: None,
                }),
                stats: Mutex::new(MessageStats::new()),
                catalog: Mutex::new(Vec::new()),
                events,
            }),
        }
    }

    /// Subscribe to decoded messages and state changes.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.shared.events.subscribe()
    }

    /// Current session state.
    pub fn state(&self) -> LinkState {
        self.shared.lock_inner().state
    }

    /// Protocol and endpoint of the active connection, if any.
    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        let inner = self.shared.lock_inner();
        inner.descriptor.as_ref().map(|d| ConnectionInfo {
            protocol: d.protocol(),
            descriptor: d.clone(),
        })
    }

    /// Cumulative arrival rate of `id` in Hz for the current session.
    pub fn message_rate(&self, id: u32) -> f64 {
        self.shared.lock_stats().rate(id)
    }

    /// The session catalog, sorted by id and annotated with current rates.
    ///
    /// The MAVLink heartbeat is bookkeeping, not telemetry, and is omitted.
    pub fn catalog(&self) -> Vec<CatalogEntry> {
        let catalog = self.shared.lock_catalog();
        let stats = self.shared.lock_stats();
        catalog
            .iter()
            .filter(|s| s.id != MSG_HEARTBEAT)
            .map(|s| CatalogEntry::from_schema(s, stats.rate(s.id)))
            .collect()
    }

    /// Connect using `descriptor`, resolving the transport from it.
    ///
    /// Rejected without any state change unless the session is `Idle`.
    /// On verification timeout or transport error the session passes
    /// through `Faulted` back to `Idle` with nothing leaked.
    pub async fn connect(&self, descriptor: LinkDescriptor) -> Result<(), LinkError> {
        descriptor.validate()?;
        // Refuse before opening any device; connect_with re-checks under
        // the state lock.
        let state = self.state();
        if state != LinkState::Idle {
            return Err(LinkError::Config(format!("connect rejected while {state}")));
        }
        let transport: Box<dyn Transport> = match &descriptor {
            LinkDescriptor::SerialMicroLink { port, baud }
            | LinkDescriptor::SerialMavlink { port, baud } => {
                Box::new(SerialTransport::open(port, *baud)?)
            }
            LinkDescriptor::UdpMavlink {
                bind_host,
                bind_port,
            } => Box::new(UdpTransport::bind(bind_host, *bind_port)?),
        };
        self.connect_with(descriptor, transport).await
    }

    /// Connect over an already-open transport.
    ///
    /// The seam used by simulators and the test suite; `connect` delegates
    /// here after opening the real device.
    pub async fn connect_with(
        &self,
        descriptor: LinkDescriptor,
        transport: Box<dyn Transport>,
    ) -> Result<(), LinkError> {
        descriptor.validate()?;
        {
            let mut inner = self.shared.lock_inner();
            if inner.state != LinkState::Idle {
                return Err(LinkError::Config(format!(
                    "connect rejected while {}",
                    inner.state
                )));
            }
            inner.state = LinkState::Connecting;
            inner.descriptor = Some(descriptor.clone());
            self.shared.emit_state(LinkState::Connecting);
        }

        match self.establish(descriptor, transport).await {
            Ok(()) => Ok(()),
            Err(error) => {
                warn!(%error, "connect failed");
                let mut inner = self.shared.lock_inner();
                inner.state = LinkState::Faulted;
                self.shared.emit_state(LinkState::Faulted);
                inner.descriptor = None;
                inner.transport = None;
                inner.encoder = None;
                inner.state = LinkState::Idle;
                self.shared.emit_state(LinkState::Idle);
                Err(error)
            }
        }
    }

    async fn establish(
        &self,
        descriptor: LinkDescriptor,
        transport: Box<dyn Transport>,
    ) -> Result<(), LinkError> {
        let protocol = descriptor.protocol();
        let transport = transport::shared(transport);
        let (adapter, encoder) = ProtocolAdapter::build(protocol, Arc::clone(&transport));

        // Liveness verification runs on the blocking pool; the serial port
        // being open proves nothing about the device on the other end.
        let deadline = Instant::now() + VERIFY_TIMEOUT;
        let (adapter, verified) = tokio::task::spawn_blocking(move || {
            let mut adapter = adapter;
            let result = verify_link(&mut adapter, deadline);
            (adapter, result)
        })
        .await
        .map_err(|e| LinkError::Transport(format!("verification task failed: {e}")))?;
        verified?;
        debug!(%protocol, "liveness verified");

        {
            let mut catalog = self.shared.lock_catalog();
            catalog.clear();
            match protocol {
                ProtocolKind::MicroLink => catalog.extend_from_slice(microlink::catalog()),
                // Grows as traffic arrives; the heartbeat was just observed.
                ProtocolKind::Mavlink => catalog.push(mavlink::schema_for(MSG_HEARTBEAT)),
            }
        }
        self.shared.lock_stats().reset();

        let (stop_tx, stop_rx) = watch::channel(false);
        let encoder = Arc::new(Mutex::new(encoder));

        // Spawn and publish `Connected` under one lock: should the loops
        // fail instantly, their fault handling must observe the final state.
        let mut inner = self.shared.lock_inner();
        let reader = {
            let shared = Arc::clone(&self.shared);
            let stop = stop_rx.clone();
            tokio::task::spawn_blocking(move || reader_loop(shared, adapter, stop))
        };
        let heartbeat = (protocol == ProtocolKind::Mavlink).then(|| {
            tokio::spawn(heartbeat_loop(
                Arc::clone(&transport),
                Arc::clone(&encoder),
                stop_rx,
            ))
        });
        inner.transport = Some(transport);
        inner.encoder = Some(encoder);
        inner.stop = Some(stop_tx);
        inner.reader = Some(reader);
        inner.heartbeat = heartbeat;
        inner.state = LinkState::Connected;
        self.shared.emit_state(LinkState::Connected);
        info!(%protocol, "link connected");
        Ok(())
    }

    /// Disconnect, stopping and joining both loops before returning.
    ///
    /// Rejected when no session is `Connected`; calling it while `Idle` is
    /// a no-op failure, not a crash.
    pub async fn disconnect(&self) -> Result<(), LinkError> {
        let (stop, reader, heartbeat) = {
            let mut inner = self.shared.lock_inner();
            if inner.state != LinkState::Connected {
                return Err(LinkError::Config(format!(
                    "disconnect rejected while {}",
                    inner.state
                )));
            }
            inner.state = LinkState::Disconnecting;
            self.shared.emit_state(LinkState::Disconnecting);
            (inner.stop.take(), inner.reader.take(), inner.heartbeat.take())
        };

        if let Some(stop) = &stop {
            let _ = stop.send(true);
        }
        for handle in [reader, heartbeat].into_iter().flatten() {
            if tokio::time::timeout(JOIN_TIMEOUT, handle).await.is_err() {
                warn!("loop did not stop within {JOIN_TIMEOUT:?}");
            }
        }

        {
            let mut inner = self.shared.lock_inner();
            inner.transport = None;
            inner.encoder = None;
            inner.descriptor = None;
            inner.state = LinkState::Idle;
            self.shared.emit_state(LinkState::Idle);
        }
        self.shared.lock_stats().reset();
        self.shared.lock_catalog().clear();
        info!("link disconnected");
        Ok(())
    }

    /// Writer-side handles for the command interface.
    pub(crate) fn command_handles(
        &self,
    ) -> Result<(SharedTransport, Arc<Mutex<CommandEncoder>>), LinkError> {
        let inner = self.shared.lock_inner();
        if inner.state != LinkState::Connected {
            return Err(LinkError::not_connected());
        }
        match (&inner.transport, &inner.encoder) {
            (Some(t), Some(e)) => Ok((Arc::clone(t), Arc::clone(e))),
            _ => Err(LinkError::not_connected()),
        }
    }

    /// Encode `intent` and write it, serialized on the writer lock.
    pub(crate) fn send_intent(&self, intent: &CommandIntent) -> Result<(), LinkError> {
        let (transport, encoder) = self.command_handles()?;
        let bytes = encoder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .encode(intent)?;
        let result = transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write_all(&bytes);
        result
    }
}

// ---------------------------------------------------------------------------
// Verification and loops
// ---------------------------------------------------------------------------

/// Bounded proof that a live peer is on the other end.
///
/// MicroLink: select the liveness message and wait for any valid frame.
/// MAVLink: wait for the autopilot's heartbeat (which also teaches the
/// adapter the peer identity).
fn verify_link(adapter: &mut ProtocolAdapter, deadline: Instant) -> Result<(), LinkError> {
    match adapter.protocol() {
        ProtocolKind::MicroLink => {
            adapter.select(u32::from(microlink::LIVENESS_ID))?;
            match adapter.read_frame(deadline)? {
                Some(_) => Ok(()),
                None => Err(LinkError::ConnectTimeout(VERIFY_TIMEOUT)),
            }
        }
        ProtocolKind::Mavlink => loop {
            match adapter.read_frame(deadline)? {
                Some((MSG_HEARTBEAT, _)) => return Ok(()),
                Some(_) => continue,
                None => return Err(LinkError::ConnectTimeout(VERIFY_TIMEOUT)),
            }
        },
    }
}

/// The reader loop: decode, record stats, dispatch, repeat.
///
/// MicroLink round-robins every catalog id so each message type gets equal
/// airtime. Any transport-level failure is an implicit disconnect.
fn reader_loop(shared: Arc<Shared>, mut adapter: ProtocolAdapter, stop: watch::Receiver<bool>) {
    debug!("reader loop started");
    let protocol = adapter.protocol();

    // MicroLink starts with the liveness message still selected from
    // verification, which is the first catalog id; the rotation picks up
    // from there.
    let round_robin: Vec<u32> = match protocol {
        ProtocolKind::MicroLink => shared.lock_catalog().iter().map(|s| s.id).collect(),
        ProtocolKind::Mavlink => Vec::new(),
    };
    let mut next = 0usize;

    while !*stop.borrow() {
        match adapter.read_frame(Instant::now() + READ_DEADLINE) {
            Ok(Some((id, fields))) => {
                shared.observe(protocol, id);
                shared.lock_stats().record(id);
                let _ = shared.events.send(LinkEvent::Message(DecodedMessage {
                    id,
                    fields,
                    arrival: Instant::now(),
                }));
                if protocol == ProtocolKind::MicroLink {
                    next = (next + 1) % round_robin.len();
                    if let Err(error) = adapter.select(round_robin[next]) {
                        shared.fault(&error);
                        return;
                    }
                }
            }
            Ok(None) => {}
            Err(error) => {
                shared.fault(&error);
                return;
            }
        }
    }
    debug!("reader loop stopped");
}

/// The heartbeat loop: announce this ground station every second.
///
/// Write failures are logged and left for the reader loop to classify;
/// failure detection is its job, not ours.
async fn heartbeat_loop(
    transport: SharedTransport,
    encoder: Arc<Mutex<CommandEncoder>>,
    mut stop: watch::Receiver<bool>,
) {
    debug!("heartbeat loop started");
    let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = interval.tick() => {
                let frame = encoder
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .encode(&CommandIntent::Heartbeat);
                match frame {
                    Ok(bytes) => {
                        let result = transport
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .write_all(&bytes);
                        if let Err(error) = result {
                            warn!(%error, "heartbeat send failed");
                        }
                    }
                    Err(error) => warn!(%error, "heartbeat encode failed"),
                }
            }
        }
    }
    debug!("heartbeat loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_idle() {
        let session = LinkSession::new();
        assert_eq!(session.state(), LinkState::Idle);
        assert!(session.connection_info().is_none());
        assert!(session.catalog().is_empty());
        assert_eq!(session.message_rate(30), 0.0);
    }

    #[test]
    fn descriptor_validation() {
        assert!(LinkDescriptor::SerialMicroLink {
            port: String::new(),
            baud: 115_200,
        }
        .validate()
        .is_err());
        assert!(LinkDescriptor::SerialMavlink {
            port: "/dev/ttyACM0".to_string(),
            baud: 0,
        }
        .validate()
        .is_err());
        assert!(LinkDescriptor::UdpMavlink {
            bind_host: "0.0.0.0".to_string(),
            bind_port: 14550,
        }
        .validate()
        .is_ok());
    }

    #[test]
    fn descriptor_protocols() {
        let serial = LinkDescriptor::SerialMicroLink {
            port: "/dev/ttyUSB0".to_string(),
            baud: 115_200,
        };
        assert_eq!(serial.protocol(), ProtocolKind::MicroLink);
        let udp = LinkDescriptor::UdpMavlink {
            bind_host: "0.0.0.0".to_string(),
            bind_port: 14550,
        };
        assert_eq!(udp.protocol(), ProtocolKind::Mavlink);
    }

    #[tokio::test]
    async fn connect_with_invalid_descriptor_keeps_idle() {
        let session = LinkSession::new();
        let result = session
            .connect(LinkDescriptor::SerialMavlink {
                port: String::new(),
                baud: 57_600,
            })
            .await;
        assert!(matches!(result, Err(LinkError::Config(_))));
        assert_eq!(session.state(), LinkState::Idle);
    }

    #[tokio::test]
    async fn disconnect_while_idle_is_rejected() {
        let session = LinkSession::new();
        let result = session.disconnect().await;
        assert!(matches!(result, Err(LinkError::Config(_))));
        assert_eq!(session.state(), LinkState::Idle);
    }

    #[test]
    fn decoded_message_field_lookup() {
        let msg = DecodedMessage {
            id: 30,
            fields: vec![("roll", FieldValue::F32(0.5))],
            arrival: Instant::now(),
        };
        assert_eq!(msg.field("roll"), Some(&FieldValue::F32(0.5)));
        assert!(msg.field("pitch").is_none());
    }

    #[test]
    fn states_render_lowercase() {
        assert_eq!(LinkState::Connected.to_string(), "connected");
        assert_eq!(LinkState::Idle.to_string(), "idle");
    }
}

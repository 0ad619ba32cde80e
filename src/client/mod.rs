//! Request/response correlation engine.
//!
//! An [`IsiModem`] owns one transport and a dispatch task routing every
//! inbound message to the request waiting for it. [`IsiClient`]s are
//! handles bound to one resource; several may share a resource.
//!
//! Per request:
//! ```text
//! begin() ──► Submitted ──┬──► Completed      (reply with matching id)
//!    │                    ├──► TimedOut       (deadline passed)
//!    │                    └──► TransportError (error event, close, destroy)
//!    └──► Err             (no free id, transport refused)
//! ```
//!
//! Replies are matched on `(resource, transaction id)`, never on order.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use isi_client::IsiModem;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> isi_client::Result<()> {
//! let (modem, mut peer) = IsiModem::builder().in_memory()?;
//! let client = modem.create_client(0x1B);
//!
//! let exchange = client.begin(&[0x15, 0x07], Duration::from_secs(5))?;
//! let request = peer.recv().await.unwrap();
//! peer.reply(&request, &[0x16, 0x00, 0x00]).await?;
//!
//! assert_eq!(&exchange.wait().await?[..], &[0x16, 0x00, 0x00]);
//! # Ok(())
//! # }
//! ```

mod pending;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{duration_to_millis, ModemConfig};
use crate::error::{IsiError, Result};
use crate::protocol::PhonetAddress;
use crate::transport::{
    MemoryPeer, MemoryTransport, OutboundMessage, StreamTransport, Transport, TransportEvent,
    TransportEvents,
};

use pending::PendingTable;

/// Message id shared by every resource for common messages.
pub const COMMON_MESSAGE: u8 = 0xF0;
/// Ask a resource for its ISI version.
pub const COMM_ISI_VERSION_GET_REQ: u8 = 0x12;
pub const COMM_ISI_VERSION_GET_RESP: u8 = 0x13;
/// Sent instead of a reply when the addressed resource does not exist.
pub const COMM_ISA_ENTITY_NOT_REACHABLE_RESP: u8 = 0x14;

const VERSION_GET_REQ: [u8; 3] = [COMMON_MESSAGE, COMM_ISI_VERSION_GET_REQ, 0x00];

/// ISI version reported by a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct IsiVersion {
    pub major: u8,
    pub minor: u8,
}

impl fmt::Display for IsiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}.{:03}", self.major, self.minor)
    }
}

/// Outcome of a liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Reachable(IsiVersion),
    Unreachable,
}

impl Reachability {
    #[inline]
    pub fn is_reachable(&self) -> bool {
        matches!(self, Reachability::Reachable(_))
    }
}

struct Routes {
    tables: HashMap<u8, PendingTable>,
    closed: bool,
}

struct ModemShared {
    transport: Arc<dyn Transport>,
    routes: Mutex<Routes>,
    config: ModemConfig,
    next_owner: AtomicU64,
    next_serial: AtomicU64,
}

impl ModemShared {
    fn routes(&self) -> MutexGuard<'_, Routes> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, resource: u8, id: u8, serial: u64) {
        if let Some(table) = self.routes().tables.get_mut(&resource) {
            table.release(id, serial);
        }
    }

    fn handle_event(&self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Message(message) => {
                let Some(&id) = message.payload.first() else {
                    tracing::warn!(
                        "Empty message from resource 0x{:02X}, discarding",
                        message.resource
                    );
                    return true;
                };
                let body = message.payload.slice(1..);

                let delivered = self
                    .routes()
                    .tables
                    .get_mut(&message.resource)
                    .is_some_and(|table| table.complete(id, Ok(body)));

                if !delivered {
                    tracing::debug!(
                        "Discarding late or unsolicited message 0x{:02X} from resource 0x{:02X}",
                        id,
                        message.resource
                    );
                }
                true
            }
            TransportEvent::Error {
                resource,
                transaction_id,
                reason,
            } => {
                let mut routes = self.routes();
                let Some(table) = routes.tables.get_mut(&resource) else {
                    return true;
                };
                match transaction_id {
                    Some(id) => {
                        table.complete(id, Err(IsiError::Transport(reason)));
                    }
                    None => {
                        let failed = table.fail_all(|| IsiError::Transport(reason.clone()));
                        tracing::warn!(
                            "Transport error on resource 0x{:02X} failed {} request(s): {}",
                            resource,
                            failed,
                            reason
                        );
                    }
                }
                true
            }
            TransportEvent::Closed => false,
        }
    }

    fn close(&self) {
        let mut routes = self.routes();
        if routes.closed {
            return;
        }
        routes.closed = true;
        let failed: usize = routes
            .tables
            .values_mut()
            .map(|table| table.fail_all(|| IsiError::ConnectionClosed))
            .sum();
        if failed > 0 {
            tracing::debug!("Transport closed with {} request(s) in flight", failed);
        }
    }
}

/// Dispatch loop - routes transport events until the transport closes.
async fn dispatch_loop(shared: Arc<ModemShared>, mut events: TransportEvents) {
    while let Some(event) = events.recv().await {
        if !shared.handle_event(event) {
            break;
        }
    }
    shared.close();
}

/// Builder for an [`IsiModem`].
pub struct ModemBuilder {
    config: ModemConfig,
}

impl ModemBuilder {
    pub fn new() -> Self {
        Self {
            config: ModemConfig::default(),
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ModemConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the in-flight request limit per resource.
    ///
    /// Default: 32
    pub fn max_pending_per_resource(mut self, limit: usize) -> Self {
        self.config.max_pending_per_resource = limit;
        self
    }

    /// Set the reachability check timeout.
    ///
    /// Default: 1 second
    pub fn verify_timeout(mut self, timeout: Duration) -> Self {
        self.config.verify_timeout_ms = duration_to_millis(timeout);
        self
    }

    /// Set the supplementary services timeout.
    ///
    /// Default: 15 seconds
    pub fn ss_timeout(mut self, timeout: Duration) -> Self {
        self.config.ss_timeout_ms = duration_to_millis(timeout);
        self
    }

    /// Set the phone info timeout.
    ///
    /// Default: 5 seconds
    pub fn info_timeout(mut self, timeout: Duration) -> Self {
        self.config.info_timeout_ms = duration_to_millis(timeout);
        self
    }

    /// Set the outbound queue capacity.
    ///
    /// Default: 256
    pub fn outbound_capacity(mut self, capacity: usize) -> Self {
        self.config.outbound_capacity = capacity;
        self
    }

    /// Set the inbound event queue capacity.
    ///
    /// Default: 256
    pub fn inbound_capacity(mut self, capacity: usize) -> Self {
        self.config.inbound_capacity = capacity;
        self
    }

    /// Set PhoNet addressing for stream transports.
    pub fn addressing(mut self, addressing: PhonetAddress) -> Self {
        self.config.media = addressing.media;
        self.config.local_dev = addressing.local_dev;
        self.config.remote_dev = addressing.remote_dev;
        self.config.local_obj = addressing.local_obj;
        self
    }

    /// Build over an existing transport and its event stream.
    pub fn build<T: Transport>(self, transport: T, events: TransportEvents) -> Result<IsiModem> {
        IsiModem::start(Arc::new(transport), events, self.config)
    }

    /// Build over a PhoNet byte stream.
    pub fn connect<S>(self, stream: S) -> Result<IsiModem>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.config.validate()?;
        let (transport, events) = StreamTransport::spawn(stream, self.config.stream_config());
        self.build(transport, events)
    }

    /// Build over an in-process transport and return the modem-side peer.
    pub fn in_memory(self) -> Result<(IsiModem, MemoryPeer)> {
        let (transport, events, peer) = MemoryTransport::pair(self.config.inbound_capacity);
        let modem = self.build(transport, events)?;
        Ok((modem, peer))
    }
}

impl Default for ModemBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A modem connection.
///
/// Dropping the modem stops dispatch and fails every request still in
/// flight with [`IsiError::ConnectionClosed`].
pub struct IsiModem {
    shared: Arc<ModemShared>,
    dispatch_task: JoinHandle<()>,
}

impl IsiModem {
    /// Create a new modem builder.
    pub fn builder() -> ModemBuilder {
        ModemBuilder::new()
    }

    fn start(
        transport: Arc<dyn Transport>,
        events: TransportEvents,
        config: ModemConfig,
    ) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(ModemShared {
            transport,
            routes: Mutex::new(Routes {
                tables: HashMap::new(),
                closed: false,
            }),
            config,
            next_owner: AtomicU64::new(1),
            next_serial: AtomicU64::new(1),
        });

        let dispatch_task = tokio::spawn(dispatch_loop(shared.clone(), events));

        Ok(Self {
            shared,
            dispatch_task,
        })
    }

    /// Create a client bound to `resource`.
    pub fn create_client(&self, resource: u8) -> IsiClient {
        let owner = self.shared.next_owner.fetch_add(1, Ordering::Relaxed);
        IsiClient {
            resource,
            owner,
            destroyed: AtomicBool::new(false),
            shared: self.shared.clone(),
        }
    }

    #[inline]
    pub fn config(&self) -> &ModemConfig {
        &self.shared.config
    }

    /// Whether the transport has closed.
    pub fn is_closed(&self) -> bool {
        self.shared.routes().closed
    }

    /// Requests in flight on `resource`, across all clients.
    pub fn pending_requests(&self, resource: u8) -> usize {
        self.shared
            .routes()
            .tables
            .get(&resource)
            .map_or(0, PendingTable::len)
    }
}

impl Drop for IsiModem {
    fn drop(&mut self) {
        self.dispatch_task.abort();
        self.shared.close();
    }
}

/// Client handle bound to one resource.
pub struct IsiClient {
    resource: u8,
    owner: u64,
    destroyed: AtomicBool,
    shared: Arc<ModemShared>,
}

impl IsiClient {
    /// Resource this client talks to.
    #[inline]
    pub fn resource(&self) -> u8 {
        self.resource
    }

    /// Send `message` and return an [`Exchange`] for its reply.
    ///
    /// # Errors
    ///
    /// - `ClientDestroyed` after [`destroy`](Self::destroy)
    /// - `ConnectionClosed` once the transport has closed
    /// - `ResourceExhausted` when every transaction id is in use
    /// - the transport's error if it refuses the message
    pub fn begin(&self, message: &[u8], timeout: Duration) -> Result<Exchange> {
        self.begin_inner(message, timeout, false)
    }

    fn begin_inner(&self, message: &[u8], timeout: Duration, raw: bool) -> Result<Exchange> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(IsiError::ClientDestroyed);
        }

        let (tx, rx) = oneshot::channel();
        let serial = self.shared.next_serial.fetch_add(1, Ordering::Relaxed);
        let id = {
            let mut routes = self.shared.routes();
            if routes.closed {
                return Err(IsiError::ConnectionClosed);
            }
            let capacity = self.shared.config.max_pending_per_resource;
            routes
                .tables
                .entry(self.resource)
                .or_insert_with(|| PendingTable::new(self.resource, capacity))
                .allocate(self.owner, serial, tx)?
        };

        let guard = SlotGuard {
            shared: self.shared.clone(),
            resource: self.resource,
            id,
            serial,
        };

        let mut payload = BytesMut::with_capacity(message.len() + 1);
        payload.put_u8(id);
        payload.put_slice(message);

        // Dropping the guard on refusal frees the id again.
        self.shared.transport.send(OutboundMessage {
            resource: self.resource,
            payload: payload.freeze(),
        })?;

        tracing::debug!(
            "Sent message 0x{:02X} to resource 0x{:02X} as transaction 0x{:02X}",
            message.first().copied().unwrap_or_default(),
            self.resource,
            id
        );

        Ok(Exchange {
            rx,
            deadline: deadline_after(timeout),
            timeout,
            raw,
            guard,
        })
    }

    /// Send `message` and wait for its reply.
    pub async fn request(&self, message: &[u8], timeout: Duration) -> Result<Bytes> {
        self.begin(message, timeout)?.wait().await
    }

    /// Callback form of [`request`](Self::request).
    ///
    /// `on_complete` runs exactly once on a spawned task, also when the
    /// request fails before anything was sent. Must be called from within
    /// a tokio runtime.
    pub fn submit<F>(&self, message: &[u8], timeout: Duration, on_complete: F)
    where
        F: FnOnce(Result<Bytes>) + Send + 'static,
    {
        let exchange = self.begin(message, timeout);
        tokio::spawn(async move {
            let result = match exchange {
                Ok(exchange) => exchange.wait().await,
                Err(e) => Err(e),
            };
            on_complete(result);
        });
    }

    /// Check that the resource answers, and with which version.
    ///
    /// Every failure (timeout, transport error, entity not reachable,
    /// garbled reply) reads as [`Reachability::Unreachable`].
    pub async fn verify(&self) -> Reachability {
        let timeout = self.shared.config.verify_timeout();
        let result = match self.begin_inner(&VERSION_GET_REQ, timeout, true) {
            Ok(exchange) => exchange.wait().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(reply) => parse_version_reply(&reply),
            Err(e) => {
                tracing::debug!(
                    "Reachability check of resource 0x{:02X} failed: {}",
                    self.resource,
                    e
                );
                Reachability::Unreachable
            }
        }
    }

    /// Fail this client's in-flight requests and refuse new ones.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let failed = self
            .shared
            .routes()
            .tables
            .get_mut(&self.resource)
            .map_or(0, |table| {
                table.fail_owned_by(self.owner, || IsiError::ClientDestroyed)
            });
        tracing::debug!(
            "Client of resource 0x{:02X} destroyed, {} request(s) failed",
            self.resource,
            failed
        );
    }

    /// Whether [`destroy`](Self::destroy) has been called.
    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// This client's requests still in flight.
    pub fn pending_requests(&self) -> usize {
        self.shared
            .routes()
            .tables
            .get(&self.resource)
            .map_or(0, |table| table.owned_by(self.owner))
    }
}

impl fmt::Debug for IsiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsiClient")
            .field("resource", &self.resource)
            .field("owner", &self.owner)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

fn parse_version_reply(reply: &[u8]) -> Reachability {
    match reply {
        [COMMON_MESSAGE, COMM_ISI_VERSION_GET_RESP, major, minor, ..] => {
            Reachability::Reachable(IsiVersion {
                major: *major,
                minor: *minor,
            })
        }
        _ => Reachability::Unreachable,
    }
}

/// Frees the transaction id when the exchange goes away.
struct SlotGuard {
    shared: Arc<ModemShared>,
    resource: u8,
    id: u8,
    serial: u64,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.shared.release(self.resource, self.id, self.serial);
    }
}

/// A submitted request waiting for its reply.
///
/// Dropping it abandons the request; a reply arriving later is discarded.
pub struct Exchange {
    rx: oneshot::Receiver<Result<Bytes>>,
    deadline: Instant,
    timeout: Duration,
    raw: bool,
    guard: SlotGuard,
}

impl Exchange {
    /// Transaction id carried on the wire.
    #[inline]
    pub fn transaction_id(&self) -> u8 {
        self.guard.id
    }

    #[inline]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait for the reply (transaction id stripped), an error, or the deadline.
    pub async fn wait(self) -> Result<Bytes> {
        let Exchange {
            rx,
            deadline,
            timeout,
            raw,
            guard,
        } = self;

        let resource = guard.resource;
        let result = match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(IsiError::ConnectionClosed),
            Err(_) => {
                tracing::debug!(
                    "Transaction 0x{:02X} on resource 0x{:02X} timed out after {:?}",
                    guard.id,
                    resource,
                    timeout
                );
                Err(IsiError::Timeout(timeout))
            }
        };
        drop(guard);

        match result {
            Ok(reply) if !raw && is_not_reachable(&reply) => Err(IsiError::Unreachable(resource)),
            other => other,
        }
    }
}

/// Longest wait a deadline is computed for (about 30 years).
const MAX_WAIT: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline_after(timeout: Duration) -> Instant {
    Instant::now() + timeout.min(MAX_WAIT)
}

fn is_not_reachable(reply: &[u8]) -> bool {
    matches!(reply, [COMMON_MESSAGE, COMM_ISA_ENTITY_NOT_REACHABLE_RESP, ..])
}

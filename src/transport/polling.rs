//! Long-polling transport with a server-side replay buffer.
//!
//! A polling transport keeps one upstream agent socket per session alive
//! across stateless HTTP requests. Agent output accumulates in a bounded
//! buffer addressed by an absolute cursor: a monotonic count of bytes ever
//! produced. Evicting from the head advances the cursor floor, so a client
//! that fell behind can detect the gap (`missed`) instead of silently
//! re-reading old bytes.

use crate::env;
use crate::session::{SessionManager, SessionRef};
use crate::transport::{
    CMD_OUTPUT, Result, TransportError, connect_agent, input_frame, resize_frame,
};
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::agent::AgentSocket;

/// Result of one poll call.
#[derive(Debug, PartialEq, Eq)]
pub struct PollOutcome {
    /// Absolute cursor after the returned data; pass back on the next poll.
    pub cursor: u64,
    /// Output bytes since the effective cursor; empty on timeout.
    pub data: Vec<u8>,
    /// True when bytes between the client cursor and the buffer head were
    /// evicted; the client should treat its screen as desynchronized.
    pub missed: bool,
}

struct BufferState {
    data: Vec<u8>,
    /// Absolute offset of `data[0]`.
    head: u64,
    alive: bool,
    last_activity: Instant,
}

/// Bounded output buffer with absolute cursor addressing and parked waiters.
pub(crate) struct OutputBuffer {
    capacity: usize,
    state: Mutex<BufferState>,
    notify: Notify,
}

impl OutputBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(BufferState {
                data: Vec::new(),
                head: 0,
                alive: true,
                last_activity: Instant::now(),
            }),
            notify: Notify::new(),
        }
    }

    /// Append agent output, evicting from the head past capacity, and wake
    /// every parked waiter.
    pub(crate) fn append(&self, bytes: &[u8]) {
        {
            let mut state = self.state.lock().unwrap();
            state.data.extend_from_slice(bytes);
            if state.data.len() > self.capacity {
                let drop = state.data.len() - self.capacity;
                state.data.drain(..drop);
                state.head += drop as u64;
            }
        }
        self.notify.notify_waiters();
    }

    /// Mark the transport disconnected and wake every parked waiter.
    pub(crate) fn close(&self) {
        self.state.lock().unwrap().alive = false;
        self.notify.notify_waiters();
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.state.lock().unwrap().alive
    }

    pub(crate) fn touch(&self) {
        self.state.lock().unwrap().last_activity = Instant::now();
    }

    pub(crate) fn idle_for(&self) -> Duration {
        self.state.lock().unwrap().last_activity.elapsed()
    }

    /// Read output at `cursor`, parking up to `timeout` when the buffer has
    /// nothing newer.
    pub(crate) async fn poll_since(&self, cursor: u64, timeout: Duration) -> Result<PollOutcome> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Arm the waiter before inspecting the buffer so an append
            // between the check and the park still wakes us.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.state.lock().unwrap();
                if !state.alive {
                    return Err(TransportError::Gone);
                }
                let tail = state.head + state.data.len() as u64;
                let effective = cursor.max(state.head);
                if effective < tail {
                    let offset = (effective - state.head) as usize;
                    return Ok(PollOutcome {
                        cursor: tail,
                        data: state.data[offset..].to_vec(),
                        missed: cursor < state.head,
                    });
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let state = self.state.lock().unwrap();
                if !state.alive {
                    return Err(TransportError::Gone);
                }
                let tail = state.head + state.data.len() as u64;
                return Ok(PollOutcome {
                    cursor: tail,
                    data: Vec::new(),
                    missed: false,
                });
            }
        }
    }
}

/// One session's polling transport: the upstream socket, its reader task,
/// and the replay buffer.
pub struct PollingTransport {
    session: SessionRef,
    writer: AsyncMutex<SplitSink<AgentSocket, Message>>,
    buffer: Arc<OutputBuffer>,
    reader: JoinHandle<()>,
}

impl PollingTransport {
    async fn open(session: SessionRef, columns: u16, rows: u16) -> Result<Arc<Self>> {
        let socket = connect_agent(session.host_port, columns, rows).await?;
        let (writer, mut reader) = socket.split();

        let buffer = Arc::new(OutputBuffer::new(env::POLL_BUFFER_CAPACITY));
        let reader_buffer = buffer.clone();
        let sid = session.id.clone();

        let reader = tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(Message::Binary(data)) => ingest(&reader_buffer, &data),
                    Ok(Message::Text(text)) => ingest(&reader_buffer, text.as_bytes()),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!("Polling upstream for {} errored: {}", short(&sid), e);
                        break;
                    }
                }
            }
            reader_buffer.close();
        });

        Ok(Arc::new(Self {
            session,
            writer: AsyncMutex::new(writer),
            buffer,
            reader,
        }))
    }

    /// Send a command-prefixed frame upstream, marking the transport dead on
    /// failure.
    async fn send(&self, frame: Vec<u8>) -> Result<()> {
        let mut writer = self.writer.lock().await;
        match writer.send(Message::Binary(frame.into())).await {
            Ok(()) => Ok(()),
            Err(e) => {
                debug!("Polling upstream send failed: {}", e);
                self.buffer.close();
                Err(TransportError::Gone)
            }
        }
    }

    fn teardown(&self) {
        self.reader.abort();
        self.buffer.close();
    }
}

/// Routes terminal agent frames into the replay buffer.
fn ingest(buffer: &OutputBuffer, frame: &[u8]) {
    match frame.first() {
        Some(&CMD_OUTPUT) => buffer.append(&frame[1..]),
        // Title and preference frames have no replay value.
        Some(_) | None => {}
    }
}

/// Table of live polling transports, one per attached session.
pub struct PollingStation {
    manager: Arc<SessionManager>,
    transports: Mutex<HashMap<String, Arc<PollingTransport>>>,
}

impl PollingStation {
    /// Create an empty station over the session manager.
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self {
            manager,
            transports: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, sid: &str) -> Option<Arc<PollingTransport>> {
        self.transports.lock().unwrap().get(sid).cloned()
    }

    /// Attach a polling transport for `sid`, or resize the live one.
    ///
    /// A transport whose upstream is demonstrably dead is discarded and
    /// replaced. The resize doubles as the liveness probe: a failed send
    /// tears the old transport down.
    pub async fn connect(&self, sid: &str, columns: u16, rows: u16) -> Result<()> {
        if let Some(existing) = self.get(sid) {
            if existing.buffer.is_alive()
                && existing.send(resize_frame(columns, rows)).await.is_ok()
            {
                existing.buffer.touch();
                existing.session.touch();
                return Ok(());
            }
            self.discard(sid);
        }

        let session = self.manager.acquire_ref(sid)?;
        session.touch();
        let transport = PollingTransport::open(session, columns, rows).await?;
        transport.buffer.touch();

        let replaced = self
            .transports
            .lock()
            .unwrap()
            .insert(sid.to_string(), transport);
        if let Some(old) = replaced {
            old.teardown();
        }
        info!("Polling transport attached for session {}", short(sid));
        Ok(())
    }

    /// Long-poll for output. `timeout_secs` is clamped to the allowed range.
    pub async fn poll(&self, sid: &str, cursor: u64, timeout_secs: u64) -> Result<PollOutcome> {
        let transport = self.get(sid).ok_or(TransportError::Gone)?;
        let timeout = Duration::from_secs(
            timeout_secs.clamp(env::POLL_TIMEOUT_MIN_SECS, env::POLL_TIMEOUT_MAX_SECS),
        );
        transport.buffer.touch();
        transport.session.touch();
        transport.buffer.poll_since(cursor, timeout).await
    }

    /// Forward raw terminal input upstream.
    pub async fn input(&self, sid: &str, body: &[u8]) -> Result<()> {
        let transport = self.get(sid).ok_or(TransportError::Gone)?;
        transport.send(input_frame(body)).await?;
        transport.buffer.touch();
        transport.session.touch();
        Ok(())
    }

    /// Forward a resize upstream.
    pub async fn resize(&self, sid: &str, columns: u16, rows: u16) -> Result<()> {
        let transport = self.get(sid).ok_or(TransportError::Gone)?;
        transport.send(resize_frame(columns, rows)).await?;
        transport.buffer.touch();
        transport.session.touch();
        Ok(())
    }

    /// Tear down the transport for `sid`. Returns whether one existed.
    pub fn discard(&self, sid: &str) -> bool {
        let removed = self.transports.lock().unwrap().remove(sid);
        match removed {
            Some(transport) => {
                transport.teardown();
                info!("Polling transport for session {} discarded", short(sid));
                true
            }
            None => false,
        }
    }

    /// Drop transports that are idle past the deadline or whose upstream
    /// died. Called by the reconciler.
    pub fn reap(&self) -> usize {
        let stale: Vec<String> = {
            let transports = self.transports.lock().unwrap();
            transports
                .iter()
                .filter(|(_, t)| {
                    !t.buffer.is_alive() || t.buffer.idle_for() > env::POLL_IDLE_TIMEOUT
                })
                .map(|(sid, _)| sid.clone())
                .collect()
        };

        for sid in &stale {
            if self.discard(sid) {
                warn!("Reaped stale polling transport for session {}", short(sid));
            }
        }
        stale.len()
    }

    /// Number of live transports.
    pub fn len(&self) -> usize {
        self.transports.lock().unwrap().len()
    }

    /// Whether no transports are attached.
    pub fn is_empty(&self) -> bool {
        self.transports.lock().unwrap().is_empty()
    }
}

fn short(sid: &str) -> &str {
    sid.get(..env::CONTAINER_NAME_ID_LEN).unwrap_or(sid)
}

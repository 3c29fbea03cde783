//! Listener registry and fan-out
//!
//! Each listener owns a bounded queue of audio chunks. [`ClientRegistry::broadcast`]
//! pushes a chunk into every queue without waiting: a listener whose queue is
//! full or whose reader is gone is dropped on the spot.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Chunks buffered per listener before it is considered too slow
pub const DEFAULT_LISTENER_BUFFER: usize = 64;

/// Unique listener identifier, never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ListenerId(Uuid);

impl ListenerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One connected listener
#[derive(Debug)]
pub struct ListenerConnection {
    pub id: ListenerId,
    sink: mpsc::Sender<Bytes>,
    pub connected_at: DateTime<Utc>,
}

/// Public view of a listener
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "server", derive(utoipa::ToSchema))]
pub struct ListenerInfo {
    #[cfg_attr(feature = "server", schema(value_type = String))]
    pub id: ListenerId,
    pub connected_at: DateTime<Utc>,
}

struct RegistryInner {
    listeners: Mutex<HashMap<ListenerId, ListenerConnection>>,
    buffer_chunks: usize,
}

impl RegistryInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<ListenerId, ListenerConnection>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: ListenerId) -> bool {
        self.lock().remove(&id).is_some()
    }
}

/// Shared set of listeners
#[derive(Clone)]
pub struct ClientRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_LISTENER_BUFFER)
    }
}

impl ClientRegistry {
    /// `buffer_chunks` bounds each listener's queue
    pub fn new(buffer_chunks: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                listeners: Mutex::new(HashMap::new()),
                buffer_chunks: buffer_chunks.max(1),
            }),
        }
    }

    /// Registers a new listener and returns its byte stream
    ///
    /// Dropping the stream unregisters the listener.
    pub fn add(&self) -> ListenerStream {
        let (tx, rx) = mpsc::channel(self.inner.buffer_chunks);
        let id = ListenerId::new();
        let conn = ListenerConnection {
            id,
            sink: tx,
            connected_at: Utc::now(),
        };

        let count = {
            let mut listeners = self.inner.lock();
            listeners.insert(id, conn);
            listeners.len()
        };
        info!(listener = %id, listeners = count, "Listener connected");

        ListenerStream {
            id,
            rx,
            pending: Bytes::new(),
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Unregisters a listener; unknown ids are ignored
    pub fn remove(&self, id: ListenerId) -> bool {
        let removed = self.inner.remove(id);
        if removed {
            info!(listener = %id, "Listener disconnected");
        }
        removed
    }

    /// Queues `chunk` for every listener and returns how many accepted it
    pub fn broadcast(&self, chunk: Bytes) -> usize {
        if chunk.is_empty() {
            return 0;
        }

        let mut delivered = 0;
        self.inner.lock().retain(|id, conn| {
            match conn.sink.try_send(chunk.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(listener = %id, "Listener too slow, disconnecting");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(listener = %id, "Listener gone, pruning");
                    false
                }
            }
        });
        delivered
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: ListenerId) -> bool {
        self.inner.lock().contains_key(&id)
    }

    /// Snapshot of the connected listeners, oldest first
    pub fn listeners(&self) -> Vec<ListenerInfo> {
        let mut all: Vec<ListenerInfo> = self
            .inner
            .lock()
            .values()
            .map(|c| ListenerInfo {
                id: c.id,
                connected_at: c.connected_at,
            })
            .collect();
        all.sort_by_key(|l| l.connected_at);
        all
    }
}

/// AsyncRead over a listener's chunk queue.
///
/// Ends when the registry drops the listener and the queue is drained.
pub struct ListenerStream {
    id: ListenerId,
    rx: mpsc::Receiver<Bytes>,
    pending: Bytes,
    registry: Weak<RegistryInner>,
}

impl ListenerStream {
    pub fn id(&self) -> ListenerId {
        self.id
    }
}

impl AsyncRead for ListenerStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            if !self.pending.is_empty() {
                let n = self.pending.len().min(buf.remaining());
                buf.put_slice(&self.pending[..n]);
                self.pending.advance(n);
                return Poll::Ready(Ok(()));
            }

            match self.rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => self.pending = chunk,
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for ListenerStream {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if registry.remove(self.id) {
                info!(listener = %self.id, "Listener disconnected");
            }
        }
    }
}

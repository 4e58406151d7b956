//! Durable FIFO queue serializing single-flight provider requests.
//!
//! Entries are opaque byte payloads stored as sequence-numbered nodes on a
//! [`CoordinationBackend`]. Dequeue is at-most-once: an entry is removed
//! before its payload is handed out, and nothing is written back if the
//! consumer later fails.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub mod fs;

pub use fs::FsCoordinationBackend;

/// Default polling interval for blocking dequeues.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Errors raised by the queue and its backends.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum QueueError {
    /// Raised when the backend cannot be reached or written.
    #[error("queue backend {location} unavailable: {message}")]
    Unavailable {
        /// Backend location (for example the queue directory).
        location: String,
        /// Description of the failure.
        message: String,
    },
}

/// Sequential-node store underneath [`ModSanQueue`].
///
/// Node names sort in insertion order. `read` and `remove` return `None` /
/// `false` when another consumer already took the node.
pub trait CoordinationBackend: Send + Sync {
    /// Appends a payload as a new node and returns its name.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Unavailable`] when the node cannot be written.
    fn append(&self, payload: &[u8]) -> Result<String, QueueError>;

    /// Lists current node names in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Unavailable`] when the backend cannot be read.
    fn children(&self) -> Result<Vec<String>, QueueError>;

    /// Reads a node's payload, or `None` if it no longer exists.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Unavailable`] when the backend cannot be read.
    fn read(&self, node: &str) -> Result<Option<Vec<u8>>, QueueError>;

    /// Removes a node, returning `false` if it no longer exists.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Unavailable`] when the backend cannot be written.
    fn remove(&self, node: &str) -> Result<bool, QueueError>;
}

/// FIFO queue of pending SAN certificate modifications.
#[derive(Clone)]
pub struct ModSanQueue {
    backend: Arc<dyn CoordinationBackend>,
    poll_interval: Duration,
}

impl std::fmt::Debug for ModSanQueue {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ModSanQueue")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl ModSanQueue {
    /// Wraps a backend using [`DEFAULT_POLL_INTERVAL`].
    #[must_use]
    pub fn new(backend: Arc<dyn CoordinationBackend>) -> Self {
        Self {
            backend,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Overrides how often a blocking dequeue re-checks an empty queue.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Appends a payload at the tail.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Unavailable`] when the backend rejects the write.
    pub fn enqueue(&self, payload: &[u8]) -> Result<(), QueueError> {
        let node = self.backend.append(payload)?;
        tracing::debug!(node = %node, bytes = payload.len(), "enqueued mod-san request");
        Ok(())
    }

    /// Removes and returns the oldest payload.
    ///
    /// A non-blocking call returns `None` on an empty queue. A blocking call
    /// polls until an entry appears.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Unavailable`] when the backend fails.
    pub async fn dequeue(&self, block: bool) -> Result<Option<Vec<u8>>, QueueError> {
        loop {
            if let Some(payload) = self.take_head()? {
                return Ok(Some(payload));
            }
            if !block {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Returns every current payload in FIFO order without removing any.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Unavailable`] when the backend fails.
    pub fn traverse(&self) -> Result<Vec<Vec<u8>>, QueueError> {
        let mut payloads = Vec::new();
        for node in self.backend.children()? {
            if let Some(payload) = self.backend.read(&node)? {
                payloads.push(payload);
            }
        }
        Ok(payloads)
    }

    /// Number of pending entries.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Unavailable`] when the backend fails.
    pub fn len(&self) -> Result<usize, QueueError> {
        Ok(self.backend.children()?.len())
    }

    /// Reports whether no entries are pending.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Unavailable`] when the backend fails.
    pub fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len()? == 0)
    }

    fn take_head(&self) -> Result<Option<Vec<u8>>, QueueError> {
        for node in self.backend.children()? {
            // Another consumer may take the node between listing and removal.
            let Some(payload) = self.backend.read(&node)? else {
                continue;
            };
            if self.backend.remove(&node)? {
                tracing::debug!(node = %node, "dequeued mod-san request");
                return Ok(Some(payload));
            }
        }
        Ok(None)
    }
}

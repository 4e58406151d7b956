//! Shared fixtures for queue BDD scenarios.

use std::sync::{Arc, Mutex, MutexGuard};

use camino::Utf8PathBuf;
use edgeward::model::ModSanRequest;
use edgeward::queue::{FsCoordinationBackend, ModSanQueue};
use rstest::fixture;
use tempfile::TempDir;

#[derive(Debug, Default)]
pub struct Observed {
    pub queue: Option<ModSanQueue>,
    pub traversal: Vec<ModSanRequest>,
    pub dequeued: Vec<Option<ModSanRequest>>,
}

#[derive(Clone)]
pub struct QueueContext {
    pub dir: Arc<TempDir>,
    pub observed: Arc<Mutex<Observed>>,
}

impl QueueContext {
    pub fn path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(self.dir.path().join("mod_san_queue"))
            .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()))
    }

    pub fn observed(&self) -> MutexGuard<'_, Observed> {
        self.observed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Opens a fresh queue handle over the scenario directory.
    pub fn open(&self) -> ModSanQueue {
        let backend = FsCoordinationBackend::open(&self.path())
            .unwrap_or_else(|err| panic!("queue should open: {err}"));
        let queue = ModSanQueue::new(Arc::new(backend));
        self.observed().queue = Some(queue.clone());
        queue
    }

    pub fn queue(&self) -> ModSanQueue {
        let current = self.observed().queue.clone();
        current.unwrap_or_else(|| self.open())
    }
}

#[fixture]
pub fn queue_context() -> QueueContext {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    QueueContext {
        dir: Arc::new(dir),
        observed: Arc::new(Mutex::new(Observed::default())),
    }
}

pub fn decode(payload: &[u8]) -> ModSanRequest {
    ModSanRequest::from_payload(payload)
        .unwrap_or_else(|err| panic!("queued payload should decode: {err}"))
}

pub fn domains(requests: &[ModSanRequest]) -> Vec<String> {
    requests
        .iter()
        .map(|request| request.domain_name.clone())
        .collect()
}

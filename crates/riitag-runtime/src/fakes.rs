//! In-memory stand-ins for the presence host and the RiiTag endpoint.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use riitag_api::{ApiError, StateSource};
use riitag_core::{PresencePayload, RemoteState};

use crate::error::RpcError;
use crate::rpc::PresenceIpc;

#[derive(Debug, Default)]
pub struct FakeLog {
    pub activities: Vec<PresencePayload>,
    pub clears: usize,
    pub connects: usize,
    pub closed: bool,
    /// Every activity operation fails while set.
    pub fail_ops: bool,
    /// Number of upcoming connects to refuse.
    pub refuse_connects: usize,
    pub refuse_all: bool,
}

pub struct FakeIpc {
    log: Arc<Mutex<FakeLog>>,
}

impl FakeIpc {
    pub fn new() -> (Self, Arc<Mutex<FakeLog>>) {
        let log = Arc::new(Mutex::new(FakeLog::default()));
        (Self { log: log.clone() }, log)
    }

    /// A host that is never there.
    pub fn refusing() -> (Self, Arc<Mutex<FakeLog>>) {
        let (fake, log) = Self::new();
        log.lock().unwrap().refuse_all = true;
        (fake, log)
    }
}

impl PresenceIpc for FakeIpc {
    fn connect(&mut self) -> Result<(), RpcError> {
        let mut log = self.log.lock().unwrap();
        log.connects += 1;
        if log.refuse_all {
            return Err(RpcError::Ipc("connection refused".into()));
        }
        if log.refuse_connects > 0 {
            log.refuse_connects -= 1;
            return Err(RpcError::Ipc("connection refused".into()));
        }
        log.closed = false;
        Ok(())
    }

    fn set_activity(&mut self, payload: &PresencePayload) -> Result<(), RpcError> {
        let mut log = self.log.lock().unwrap();
        if log.fail_ops {
            return Err(RpcError::Ipc("broken pipe".into()));
        }
        log.activities.push(payload.clone());
        Ok(())
    }

    fn clear_activity(&mut self) -> Result<(), RpcError> {
        let mut log = self.log.lock().unwrap();
        if log.fail_ops {
            return Err(RpcError::Ipc("broken pipe".into()));
        }
        log.clears += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), RpcError> {
        self.log.lock().unwrap().closed = true;
        Ok(())
    }
}

/// Replays a fixed list of responses; the last one repeats forever.
#[derive(Clone)]
pub struct ScriptedSource {
    script: Arc<Mutex<VecDeque<Scripted>>>,
    calls: Arc<AtomicUsize>,
}

#[derive(Clone)]
pub enum Scripted {
    State(RemoteState),
    NotFound,
    Unavailable,
}

impl ScriptedSource {
    pub fn new(script: impl IntoIterator<Item = Scripted>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into_iter().collect())),
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self) -> Scripted {
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front().unwrap_or(Scripted::Unavailable)
        } else {
            script.front().cloned().unwrap_or(Scripted::Unavailable)
        }
    }
}

impl StateSource for ScriptedSource {
    async fn fetch_state(&self, user_id: &str) -> Result<RemoteState, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next() {
            Scripted::State(state) => Ok(state),
            Scripted::NotFound => Err(ApiError::NotFound(format!("{user_id}: not found"))),
            Scripted::Unavailable => Err(ApiError::Api {
                status: 503,
                message: "Service Unavailable".into(),
            }),
        }
    }
}

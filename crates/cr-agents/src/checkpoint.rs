//! Run checkpoints, keyed by run id.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use cr_core::{Error, Result};

use crate::state::{AgentState, RunId};

#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Store the latest state of a run, replacing any earlier one.
    async fn save(&self, state: &AgentState) -> Result<()>;

    async fn load(&self, run_id: &RunId) -> Result<Option<AgentState>>;
}

/// In-process store holding the most recent `capacity` runs.
pub struct MemoryCheckpointer {
    capacity: usize,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    states: HashMap<RunId, AgentState>,
    order: VecDeque<RunId>,
}

impl MemoryCheckpointer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.states.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCheckpointer {
    fn default() -> Self {
        Self::new(1024)
    }
}

fn poisoned() -> Error {
    Error::Unknown("checkpoint store lock poisoned".to_string())
}

#[async_trait]
impl Checkpointer for MemoryCheckpointer {
    async fn save(&self, state: &AgentState) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| poisoned())?;
        if inner.states.insert(state.run_id, state.clone()).is_none() {
            inner.order.push_back(state.run_id);
        }
        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.states.remove(&oldest);
            }
        }
        Ok(())
    }

    async fn load(&self, run_id: &RunId) -> Result<Option<AgentState>> {
        let inner = self.inner.lock().map_err(|_| poisoned())?;
        Ok(inner.states.get(run_id).cloned())
    }
}

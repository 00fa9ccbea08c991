//! Local node identity.
//!
//! A [`Node`] carries the `name@host` identity, the shared cookie, and
//! the `creation` that distinguishes this incarnation from earlier ones
//! with the same name. It mints the pids and references that outbound
//! traffic carries. The identity is shared read-only by every
//! connection originating from it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use rand::Rng;

use girder_etf::{Pid, Reference};

use crate::NodeError;

struct NodeInner {
    name: String,
    cookie: String,
    creation: u32,
    next_pid: AtomicU32,
    ref_salt: u32,
}

/// A local node identity. Cheap to clone; all clones share one
/// identity.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// Create a local identity. `name` must have the `name@host` form.
    pub fn new(name: impl Into<String>, cookie: impl Into<String>) -> Result<Node, NodeError> {
        let name = name.into();
        match name.split_once('@') {
            Some((alive, host)) if !alive.is_empty() && !host.is_empty() => {}
            _ => {
                return Err(NodeError::InitFailed(format!(
                    "node name {name:?} is not of the form name@host"
                )))
            }
        }

        let mut rng = rand::thread_rng();
        // Creations below 4 are reserved for historic incarnation
        // counting; modern nodes draw a random one above.
        let creation = rng.gen_range(4..=u32::MAX);
        let ref_salt = rng.gen();

        Ok(Node {
            inner: Arc::new(NodeInner {
                name,
                cookie: cookie.into(),
                creation,
                next_pid: AtomicU32::new(1),
                ref_salt,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn cookie(&self) -> &str {
        &self.inner.cookie
    }

    pub fn creation(&self) -> u32 {
        self.inner.creation
    }

    /// The pid this node presents as the sender of its traffic.
    pub fn self_pid(&self) -> Pid {
        Pid {
            node: self.inner.name.clone(),
            num: 0,
            serial: 1,
            creation: self.inner.creation,
        }
    }

    /// Mint a fresh local pid.
    pub fn make_pid(&self) -> Pid {
        let num = self.inner.next_pid.fetch_add(1, Ordering::Relaxed);
        Pid {
            node: self.inner.name.clone(),
            num,
            serial: 1,
            creation: self.inner.creation,
        }
    }

    /// Mint a reference that embeds a 64-bit correlation id in its
    /// first two words. [`call_id_of`] recovers the id on the way back.
    pub fn call_ref(&self, call_id: u64) -> Reference {
        Reference {
            node: self.inner.name.clone(),
            creation: self.inner.creation,
            ids: vec![
                call_id as u32,
                (call_id >> 32) as u32,
                self.inner.ref_salt,
            ],
        }
    }
}

/// Recover the correlation id embedded by [`Node::call_ref`].
pub fn call_id_of(reference: &Reference) -> Option<u64> {
    match reference.ids.as_slice() {
        [lo, hi, ..] => Some(*lo as u64 | (*hi as u64) << 32),
        _ => None,
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.inner.name)
            .field("creation", &self.inner.creation)
            .finish()
    }
}

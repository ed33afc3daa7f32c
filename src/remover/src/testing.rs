//! Deterministic in-memory [`RemoteTree`] for tests.
//!
//! The tree is built from JSON: objects are branches and numbers are leaves
//! whose value is their size. A delete call succeeds only when the total leaf
//! size it would remove is at most the tree's threshold, which stands in for
//! the remote's hidden per-request limit.
//!
//! ```rust,ignore
//! use remover::testing::InMemoryTree;
//! use serde_json::json;
//!
//! let tree = InMemoryTree::new(json!({"users": {"alice": 3, "bob": 9}}), 10);
//! ```

use crate::path::NodePath;
use crate::remote::{RemoteError, RemoteResult, RemoteTree};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub use crate::remote::MockRemoteTree;

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf(u64),
    Branch(BTreeMap<String, Node>),
}

impl Node {
    fn empty() -> Self {
        Node::Branch(BTreeMap::new())
    }

    fn from_json(value: &Value) -> Self {
        match value {
            Value::Object(map) => Node::Branch(
                map.iter()
                    .map(|(key, value)| (key.clone(), Node::from_json(value)))
                    .collect(),
            ),
            Value::Array(items) => Node::Branch(
                items
                    .iter()
                    .enumerate()
                    .map(|(index, value)| (index.to_string(), Node::from_json(value)))
                    .collect(),
            ),
            Value::Number(size) => Node::Leaf(size.as_u64().unwrap_or(1)),
            Value::String(text) => Node::Leaf(text.len() as u64),
            Value::Bool(_) => Node::Leaf(1),
            Value::Null => Node::empty(),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Node::Leaf(size) => Value::from(*size),
            Node::Branch(children) => Value::Object(
                children
                    .iter()
                    .map(|(key, child)| (key.clone(), child.to_json()))
                    .collect::<Map<_, _>>(),
            ),
        }
    }

    fn size(&self) -> u64 {
        match self {
            Node::Leaf(size) => *size,
            Node::Branch(children) => children.values().map(Node::size).sum(),
        }
    }

    fn is_empty_branch(&self) -> bool {
        matches!(self, Node::Branch(children) if children.is_empty())
    }

    fn get(&self, segments: &[String]) -> Option<&Node> {
        match segments.split_first() {
            None => Some(self),
            Some((first, rest)) => match self {
                Node::Branch(children) => children.get(first)?.get(rest),
                Node::Leaf(_) => None,
            },
        }
    }

    /// Remove the node at `segments`, pruning branches left without children.
    fn remove(&mut self, segments: &[String]) {
        let Some((first, rest)) = segments.split_first() else {
            *self = Node::empty();
            return;
        };
        let Node::Branch(children) = self else {
            return;
        };
        if rest.is_empty() {
            children.remove(first);
        } else if let Some(child) = children.get_mut(first) {
            child.remove(rest);
            if child.is_empty_branch() {
                children.remove(first);
            }
        }
    }
}

/// One call received by an [`InMemoryTree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    DeletePath {
        path: String,
        size: u64,
        accepted: bool,
    },
    DeleteSubPath {
        path: String,
        children: Vec<String>,
        size: u64,
        accepted: bool,
    },
    ListPath {
        path: String,
        limit: usize,
        returned: usize,
    },
}

impl RemoteCall {
    /// Whether this is a delete call the tree carried out.
    pub fn is_accepted_delete(&self) -> bool {
        matches!(
            self,
            RemoteCall::DeletePath { accepted: true, .. }
                | RemoteCall::DeleteSubPath { accepted: true, .. }
        )
    }

    pub fn is_list(&self) -> bool {
        matches!(self, RemoteCall::ListPath { .. })
    }
}

/// In-memory tree with a fixed per-call size threshold.
#[derive(Debug)]
pub struct InMemoryTree {
    root: Mutex<Node>,
    threshold: u64,
    calls: Mutex<Vec<RemoteCall>>,
    transport_failures: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryTree {
    pub fn new(data: Value, threshold: u64) -> Self {
        let mut root = Node::from_json(&data);
        if let Node::Leaf(_) = root {
            // a bare number is a tree holding one leaf at the root
            root = Node::Branch(BTreeMap::from([(String::from("value"), root)]));
        }
        Self {
            root: Mutex::new(root),
            threshold,
            calls: Mutex::new(Vec::new()),
            transport_failures: AtomicUsize::new(0),
        }
    }

    /// Fail the next `count` calls of any kind with a transport error.
    pub fn with_transport_failures(self, count: usize) -> Self {
        self.transport_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Current contents in the same shape the tree was built from.
    pub fn snapshot(&self) -> Value {
        lock(&self.root).to_json()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.root).is_empty_branch()
    }

    /// Total leaf size beneath `path`, 0 when it does not exist.
    pub fn size_of(&self, path: &NodePath) -> u64 {
        lock(&self.root)
            .get(path.segments())
            .map(Node::size)
            .unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        lock(&self.calls).clone()
    }

    pub fn accepted_deletes(&self) -> u64 {
        lock(&self.calls)
            .iter()
            .filter(|call| call.is_accepted_delete())
            .count() as u64
    }

    fn inject_failure(&self) -> RemoteResult<()> {
        let injected = self
            .transport_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            return Err(RemoteError::Transport("injected failure".to_string()));
        }
        Ok(())
    }

    fn record(&self, call: RemoteCall) {
        lock(&self.calls).push(call);
    }
}

#[async_trait]
impl RemoteTree for InMemoryTree {
    async fn delete_path(&self, path: &NodePath) -> RemoteResult<bool> {
        self.inject_failure()?;

        let mut root = lock(&self.root);
        let size = root.get(path.segments()).map(Node::size).unwrap_or(0);
        let accepted = size <= self.threshold;
        if accepted {
            root.remove(path.segments());
        }
        drop(root);

        self.record(RemoteCall::DeletePath {
            path: path.to_string(),
            size,
            accepted,
        });
        Ok(accepted)
    }

    async fn delete_sub_path(&self, path: &NodePath, children: &[String]) -> RemoteResult<bool> {
        self.inject_failure()?;

        let mut root = lock(&self.root);
        let size = children
            .iter()
            .filter_map(|key| root.get(path.child(key).segments()))
            .map(Node::size)
            .sum::<u64>();
        let accepted = size <= self.threshold;
        if accepted {
            for key in children {
                root.remove(path.child(key).segments());
            }
        }
        drop(root);

        self.record(RemoteCall::DeleteSubPath {
            path: path.to_string(),
            children: children.to_vec(),
            size,
            accepted,
        });
        Ok(accepted)
    }

    async fn list_path(&self, path: &NodePath, limit: usize) -> RemoteResult<Vec<String>> {
        self.inject_failure()?;

        let keys: Vec<String> = match lock(&self.root).get(path.segments()) {
            Some(Node::Branch(children)) => children.keys().take(limit).cloned().collect(),
            _ => Vec::new(),
        };

        self.record(RemoteCall::ListPath {
            path: path.to_string(),
            limit,
            returned: keys.len(),
        });
        Ok(keys)
    }
}

//! Live sessions keyed by id, with parent/child links.
//!
//! The registry only tracks sessions; stopping them is the caller's job.
//! [`remove_tree`](SessionRegistry::remove_tree) hands back a session and all
//! its descendants, children first, so the caller can stop them in that order.

use crate::session::Session;
use aidb_core::{Error, Result, SessionId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

struct Entry {
    session: Arc<Session>,
    parent: Option<SessionId>,
    children: Vec<SessionId>,
}

pub struct SessionRegistry {
    entries: Mutex<HashMap<SessionId, Entry>>,
    capacity: usize,
}

impl SessionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Register a top-level session
    pub async fn insert(&self, session: Arc<Session>) -> Result<()> {
        let mut entries = self.entries.lock().await;
        Self::check_room(&entries, self.capacity, session.id())?;
        debug!(session = %session.id(), "Registered session");
        entries.insert(
            session.id().clone(),
            Entry {
                session,
                parent: None,
                children: Vec::new(),
            },
        );
        Ok(())
    }

    /// Register `child` under `parent`
    pub async fn insert_child(&self, parent: &SessionId, child: Arc<Session>) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if !entries.contains_key(parent) {
            return Err(Error::SessionNotFound(parent.to_string()));
        }
        Self::check_room(&entries, self.capacity, child.id())?;

        let child_id = child.id().clone();
        if let Some(entry) = entries.get_mut(parent) {
            entry.children.push(child_id.clone());
        }
        debug!(session = %child_id, parent = %parent, "Registered child session");
        entries.insert(
            child_id,
            Entry {
                session: child,
                parent: Some(parent.clone()),
                children: Vec::new(),
            },
        );
        Ok(())
    }

    fn check_room(entries: &HashMap<SessionId, Entry>, capacity: usize, id: &SessionId) -> Result<()> {
        if entries.contains_key(id) {
            return Err(Error::Internal(format!("session {} already registered", id)));
        }
        if entries.len() >= capacity {
            return Err(Error::RegistryFull(capacity));
        }
        Ok(())
    }

    pub async fn get(&self, id: &SessionId) -> Result<Arc<Session>> {
        self.entries
            .lock()
            .await
            .get(id)
            .map(|e| e.session.clone())
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))
    }

    pub async fn contains(&self, id: &SessionId) -> bool {
        self.entries.lock().await.contains_key(id)
    }

    pub async fn children(&self, id: &SessionId) -> Vec<SessionId> {
        self.entries
            .lock()
            .await
            .get(id)
            .map(|e| e.children.clone())
            .unwrap_or_default()
    }

    /// Unregister `id` and every descendant. Children come before their
    /// parent in the result. Empty when `id` is unknown.
    pub async fn remove_tree(&self, id: &SessionId) -> Vec<Arc<Session>> {
        let mut entries = self.entries.lock().await;
        let Some(parent) = entries.get(id).and_then(|e| e.parent.clone()) else {
            return Self::take_subtree(&mut entries, id);
        };
        if let Some(entry) = entries.get_mut(&parent) {
            entry.children.retain(|c| c != id);
        }
        Self::take_subtree(&mut entries, id)
    }

    /// Post-order removal without recursion
    fn take_subtree(entries: &mut HashMap<SessionId, Entry>, root: &SessionId) -> Vec<Arc<Session>> {
        let mut order = Vec::new();
        let mut stack = vec![(root.clone(), false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                if let Some(entry) = entries.remove(&id) {
                    order.push(entry.session);
                }
                continue;
            }
            let Some(entry) = entries.get(&id) else {
                continue;
            };
            stack.push((id.clone(), true));
            for child in entry.children.iter().rev() {
                stack.push((child.clone(), false));
            }
        }
        order
    }

    pub async fn ids(&self) -> Vec<SessionId> {
        self.entries.lock().await.keys().cloned().collect()
    }

    pub async fn sessions(&self) -> Vec<Arc<Session>> {
        self.entries
            .lock()
            .await
            .values()
            .map(|e| e.session.clone())
            .collect()
    }

    /// Sessions without a parent
    pub async fn roots(&self) -> Vec<SessionId> {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|(_, e)| e.parent.is_none())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

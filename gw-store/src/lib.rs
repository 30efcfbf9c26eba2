//! A uniform, key-addressable document store façade.
//!
//! The persistence backend itself is an external collaborator (a real
//! deployment would point this at MongoDB, per `mongo_uri` in the server
//! config); this crate only specifies the interface every caller needs and
//! ships an in-memory implementation that satisfies it. Callers never see
//! the backend, only [`DocumentStore`].

use indexmap::IndexMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Anything stored in a collection must be addressable by a stable string id.
pub trait Identifiable {
    fn id(&self) -> &str;
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    #[error("no document with that id exists")]
    NotFound,
    #[error("a document with that id already exists")]
    IdConflict,
}

/// A single named collection of documents of type `T`.
///
/// Guarantees (per the façade contract): `insert` is atomic with respect to
/// id — if two callers race to insert the same id, exactly one observes
/// `Ok(())` and the other observes `StoreError::IdConflict`. This is what
/// lets the gateway registry's interning (§4.C) resolve races by re-reading
/// rather than needing a lock of its own.
#[derive(Clone)]
pub struct Collection<T> {
    inner: Arc<RwLock<IndexMap<String, T>>>,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(RwLock::new(IndexMap::new())),
        }
    }
}

impl<T: Identifiable + Clone> Collection<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &str) -> Option<T> {
        self.inner.read().await.get(id).cloned()
    }

    /// Returns the first document matching `predicate`. `predicate` plays
    /// the role of the façade's equality-map filter, but as a typed Rust
    /// closure rather than an untyped map, since every caller already has a
    /// concrete `T` in hand.
    pub async fn find_one<F>(&self, predicate: F) -> Option<T>
    where
        F: Fn(&T) -> bool,
    {
        self.inner.read().await.values().find(|d| predicate(d)).cloned()
    }

    /// Inserts `document` under `document.id()`. Atomic: concurrent inserts
    /// of the same id resolve with exactly one winner.
    pub async fn insert(&self, document: T) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if guard.contains_key(document.id()) {
            return Err(StoreError::IdConflict);
        }
        guard.insert(document.id().to_string(), document);
        Ok(())
    }

    /// Applies `patch` to the stored document with id `id`, in place.
    pub async fn update<F>(&self, id: &str, patch: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut T),
    {
        let mut guard = self.inner.write().await;
        match guard.get_mut(id) {
            Some(doc) => {
                patch(doc);
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    /// Lists documents matching `filter`, sorted by `sort` (stable), then
    /// paginated by `skip`/`limit`. Returns the page alongside the total
    /// count of documents matching `filter` (pre-pagination), as the total
    /// is needed for `meta.data_available` on the caller's side.
    pub async fn list<F, S>(
        &self,
        filter: F,
        sort: Option<S>,
        skip: usize,
        limit: usize,
    ) -> (Vec<T>, usize)
    where
        F: Fn(&T) -> bool,
        S: Fn(&T, &T) -> std::cmp::Ordering,
    {
        let guard = self.inner.read().await;
        let mut matched: Vec<T> = guard.values().filter(|d| filter(d)).cloned().collect();
        let total = matched.len();
        if let Some(cmp) = sort {
            matched.sort_by(cmp);
        }
        let page = matched.into_iter().skip(skip).take(limit).collect();
        (page, total)
    }
}

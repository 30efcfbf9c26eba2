//! Gateway registry: canonicalises a database set into a stable gateway id.
//!
//! Structured like `locator::locator::Locator` — a cheap, `Clone`-able
//! handle wrapping shared state, with a typed error enum describing every
//! way resolution can fail.

use gw_model::{Database, DatabaseId, Gateway};
use gw_store::{Collection, StoreError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum RegistryError {
    #[error("a gateway with the given explicit id already exists")]
    GatewayExists,
    #[error("database '{0}' is not registered and was given only by id")]
    UnknownDatabase(DatabaseId),
    #[error("registry inconsistency: insert raced twice on the same canonical set")]
    Inconsistent,
}

/// Either a full database descriptor, or a reference to an already-known one.
#[derive(Debug, Clone)]
pub enum DatabaseRef {
    Known(DatabaseId),
    Full(Database),
}

#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    gateways: Collection<Gateway>,
    known_databases: Collection<Database>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                gateways: Collection::new(),
                known_databases: Collection::new(),
            }),
        }
    }

    /// Registers (or re-registers) a database descriptor so it can later be
    /// referenced by id alone.
    pub async fn register_database(&self, database: Database) {
        let id = database.id.clone();
        if self.inner.known_databases.insert(database.clone()).await.is_err() {
            // Already registered: explicit re-register overwrites in place.
            let _ = self.inner.known_databases.update(&id, |d| *d = database).await;
        }
    }

    async fn resolve_refs(&self, refs: Vec<DatabaseRef>) -> Result<Vec<Database>, RegistryError> {
        let mut databases = Vec::with_capacity(refs.len());
        for r in refs {
            match r {
                DatabaseRef::Full(db) => databases.push(db),
                DatabaseRef::Known(id) => {
                    let db = self
                        .inner
                        .known_databases
                        .get(&id)
                        .await
                        .ok_or_else(|| RegistryError::UnknownDatabase(id.clone()))?;
                    databases.push(db);
                }
            }
        }
        Ok(databases)
    }

    /// Resolves an existing gateway matching `databases`, or creates one.
    /// Returns `(gateway, newly_created)`.
    ///
    /// Algorithm (§4.C):
    /// 1. explicit id given: insert under that id verbatim; a conflict means
    ///    the id is taken, which is a client error (`gateway_exists`).
    /// 2. no explicit id: canonicalise the set and look it up; a hit returns
    ///    the existing record.
    /// 3. on a miss: generate a fresh id and insert; a conflict here is a
    ///    race against another resolver for the same set — re-run the
    ///    lookup once, and treat a second miss as `registry_inconsistent`.
    pub async fn resolve_or_create(
        &self,
        database_refs: Vec<DatabaseRef>,
        explicit_id: Option<String>,
    ) -> Result<(Gateway, bool), RegistryError> {
        let databases = self.resolve_refs(database_refs).await?;

        for db in &databases {
            self.register_database(db.clone()).await;
        }

        if let Some(id) = explicit_id {
            let gateway = Gateway::new(id, databases);
            return match self.inner.gateways.insert(gateway.clone()).await {
                Ok(()) => Ok((gateway, true)),
                Err(StoreError::IdConflict) => Err(RegistryError::GatewayExists),
                Err(e) => unreachable!("insert only returns IdConflict: {e}"),
            };
        }

        let canonical = gw_model::canonical_id_set(&databases);
        if let Some(existing) = self.find_by_set(&canonical).await {
            return Ok((existing, false));
        }

        let fresh_id = generate_gateway_id();
        let gateway = Gateway::new(fresh_id, databases.clone());
        match self.inner.gateways.insert(gateway.clone()).await {
            Ok(()) => Ok((gateway, true)),
            Err(StoreError::IdConflict) => {
                // Another resolver won the race; re-read.
                match self.find_by_set(&canonical).await {
                    Some(existing) => Ok((existing, false)),
                    None => {
                        tracing::error!(?canonical, "registry inconsistent after insert race");
                        Err(RegistryError::Inconsistent)
                    }
                }
            }
            Err(e) => unreachable!("insert only returns IdConflict: {e}"),
        }
    }

    async fn find_by_set(&self, canonical: &[DatabaseId]) -> Option<Gateway> {
        self.inner
            .gateways
            .find_one(|g| g.database_id_set == canonical)
            .await
    }

    pub async fn get(&self, id: &str) -> Option<Gateway> {
        self.inner.gateways.get(id).await
    }

    pub async fn list(
        &self,
        skip: usize,
        limit: usize,
    ) -> (Vec<Gateway>, usize) {
        self.inner
            .gateways
            .list(|_: &Gateway| true, None::<fn(&Gateway, &Gateway) -> std::cmp::Ordering>, skip, limit)
            .await
    }
}

fn generate_gateway_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn db(id: &str) -> Database {
        Database {
            id: id.to_string(),
            name: id.to_string(),
            base_url: Url::parse("https://example.org/optimade").unwrap(),
            version: "1.1".to_string(),
            provider: Default::default(),
        }
    }

    #[tokio::test]
    async fn resolve_or_create_interns_by_set() {
        let registry = Registry::new();
        let refs = vec![DatabaseRef::Full(db("a")), DatabaseRef::Full(db("b"))];

        let (first, created1) = registry.resolve_or_create(refs.clone(), None).await.unwrap();
        assert!(created1);

        let (second, created2) = registry.resolve_or_create(refs, None).await.unwrap();
        assert!(!created2);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn resolve_or_create_is_order_insensitive_for_interning() {
        let registry = Registry::new();
        let (g1, _) = registry
            .resolve_or_create(vec![DatabaseRef::Full(db("a")), DatabaseRef::Full(db("b"))], None)
            .await
            .unwrap();
        let (g2, created) = registry
            .resolve_or_create(vec![DatabaseRef::Full(db("b")), DatabaseRef::Full(db("a"))], None)
            .await
            .unwrap();

        assert!(!created);
        assert_eq!(g1.id, g2.id);
    }

    #[tokio::test]
    async fn explicit_id_collision_fails() {
        let registry = Registry::new();
        registry
            .resolve_or_create(vec![DatabaseRef::Full(db("a"))], Some("g1".to_string()))
            .await
            .unwrap();

        let err = registry
            .resolve_or_create(vec![DatabaseRef::Full(db("b"))], Some("g1".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err, RegistryError::GatewayExists);
    }

    #[tokio::test]
    async fn unknown_database_reference_fails() {
        let registry = Registry::new();
        let err = registry
            .resolve_or_create(vec![DatabaseRef::Known("nope".to_string())], None)
            .await
            .unwrap_err();
        assert_eq!(err, RegistryError::UnknownDatabase("nope".to_string()));
    }

    #[tokio::test]
    async fn known_database_reference_resolves_after_registration() {
        let registry = Registry::new();
        registry.register_database(db("a")).await;

        let (gateway, _) = registry
            .resolve_or_create(vec![DatabaseRef::Known("a".to_string())], None)
            .await
            .unwrap();
        assert_eq!(gateway.databases[0].id, "a");
    }

    #[tokio::test]
    async fn concurrent_resolve_without_explicit_id_yields_one_gateway() {
        let registry = Registry::new();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .resolve_or_create(
                        vec![DatabaseRef::Full(db("a")), DatabaseRef::Full(db("b"))],
                        None,
                    )
                    .await
                    .unwrap()
                    .0
                    .id
            }));
        }

        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap());
        }

        let (_, total) = registry.list(0, 100).await;
        assert_eq!(total, 1, "exactly one gateway record should exist");
        assert!(ids.iter().all(|id| *id == ids[0]));
    }
}

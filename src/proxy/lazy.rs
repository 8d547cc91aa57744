use crate::core::{DbError, Result};
use crate::record::EntityRecord;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::OnceCell;
use tracing::{Level, event};

/// Lookups a [`LazyRef`] performs on first access. Implemented by the
/// persistence session; tests substitute counting mocks.
#[async_trait]
pub trait EntityResolver: Send + Sync {
    /// Loads `type_name` by primary key, failing with `NotFound` if absent.
    async fn resolve_id(&self, type_name: &str, id: i64) -> Result<EntityRecord>;

    /// Loads the `owner_type` row whose `owning_field` points at `inverse_id`.
    async fn resolve_owner(
        &self,
        owner_type: &str,
        owning_field: &str,
        inverse_id: i64,
    ) -> Result<Option<EntityRecord>>;
}

/// What a lazy reference points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceKey {
    /// A row by primary key, e.g. the value of an owning side's foreign key.
    Id { type_name: String, id: i64 },
    /// The owner row whose foreign key references `inverse_id`; used from
    /// the inverse side, which stores nothing itself.
    OwnedBy {
        owner_type: String,
        owning_field: String,
        inverse_id: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Unresolved,
    Resolving,
    Resolved,
    Failed,
}

type Outcome = Result<Option<Arc<EntityRecord>>>;

struct LazyInner {
    key: ReferenceKey,
    resolver: Arc<dyn EntityResolver>,
    in_flight: AtomicUsize,
    outcome: OnceCell<Outcome>,
}

/// Placeholder for a related entity that is loaded on first access.
///
/// The first [`get`](Self::get) performs exactly one lookup; concurrent
/// callers wait for it. The outcome, success or failure, is kept for the
/// lifetime of the reference and shared by all of its clones.
#[derive(Clone)]
pub struct LazyRef {
    inner: Arc<LazyInner>,
}

impl LazyRef {
    pub fn new(key: ReferenceKey, resolver: Arc<dyn EntityResolver>) -> Self {
        Self {
            inner: Arc::new(LazyInner {
                key,
                resolver,
                in_flight: AtomicUsize::new(0),
                outcome: OnceCell::new(),
            }),
        }
    }

    pub fn key(&self) -> &ReferenceKey {
        &self.inner.key
    }

    /// Primary key of the target if it is known without a lookup.
    pub fn known_id(&self) -> Option<i64> {
        match &self.inner.key {
            ReferenceKey::Id { id, .. } => Some(*id),
            ReferenceKey::OwnedBy { .. } => self.peek().and_then(|record| record.id()),
        }
    }

    pub fn state(&self) -> ProxyState {
        match self.inner.outcome.get() {
            Some(Ok(_)) => ProxyState::Resolved,
            Some(Err(_)) => ProxyState::Failed,
            None if self.inner.in_flight.load(Ordering::Acquire) > 0 => ProxyState::Resolving,
            None => ProxyState::Unresolved,
        }
    }

    /// The resolved target, without triggering resolution.
    pub fn peek(&self) -> Option<Arc<EntityRecord>> {
        match self.inner.outcome.get() {
            Some(Ok(record)) => record.clone(),
            _ => None,
        }
    }

    pub async fn get(&self) -> Result<Option<Arc<EntityRecord>>> {
        let _in_flight = InFlight::enter(&self.inner.in_flight);
        self.inner
            .outcome
            .get_or_init(|| self.resolve())
            .await
            .clone()
    }

    async fn resolve(&self) -> Outcome {
        let resolver = &self.inner.resolver;

        let outcome = match &self.inner.key {
            ReferenceKey::Id { type_name, id } => match resolver.resolve_id(type_name, *id).await {
                Ok(record) => Ok(Some(Arc::new(record))),
                Err(DbError::NotFound { type_name, id }) => {
                    Err(DbError::DanglingReference { type_name, id })
                }
                Err(err) => Err(err),
            },
            ReferenceKey::OwnedBy {
                owner_type,
                owning_field,
                inverse_id,
            } => resolver
                .resolve_owner(owner_type, owning_field, *inverse_id)
                .await
                .map(|owner| owner.map(Arc::new)),
        };

        match &outcome {
            Ok(_) => event!(Level::DEBUG, key = ?self.inner.key, "lazy reference resolved"),
            Err(err) => event!(Level::WARN, key = ?self.inner.key, error = %err, "lazy reference failed"),
        }
        outcome
    }
}

/// Counts a caller of [`LazyRef::get`] until dropped, including when the
/// caller's future is cancelled mid-lookup.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

// Shows what the reference points at and how far it got; never the target.
impl fmt::Debug for LazyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyRef")
            .field("key", &self.inner.key)
            .field("state", &self.state())
            .finish()
    }
}

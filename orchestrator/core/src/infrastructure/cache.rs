// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Invalidating Cache
//!
//! [`Cached`] holds at most one materialized value built from a
//! zero-argument builder. Values derived from mutable sources (TLS
//! contexts, computed configuration) are wrapped in a `Cached` and
//! invalidated whenever the source changes.
//!
//! Who may invalidate a cache is tracked by an [`Invalidator`], an explicit
//! relationship table `cache id -> cache`. Registering a cache with an
//! invalidator also leaves a dropper on the cache, so that retiring the
//! cache through [`Cached::drop_invalidators`] removes it from every table
//! it was registered in.
//!
//! Callers must not keep the `Arc<T>` returned by [`Cached::get`] if they
//! expect to observe later invalidations; call `get` again for each use.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::domain::config::CacheConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheId(pub Uuid);

impl CacheId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CacheId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CacheId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type-erased view of a cache, so one [`Invalidator`] can manage caches of
/// any value type.
pub trait Invalidate: Send + Sync {
    fn cache_id(&self) -> CacheId;
    fn invalidate(&self);
}

type Builder<T> = Box<dyn Fn() -> T + Send + Sync>;
type Dropper<T> = Box<dyn FnOnce(&Cached<T>) + Send>;

pub struct Cached<T> {
    id: CacheId,
    builder: Builder<T>,
    lazy: bool,
    value: RwLock<Option<Arc<T>>>,
    droppers: Mutex<Vec<Dropper<T>>>,
}

impl<T> fmt::Debug for Cached<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cached")
            .field("id", &self.id)
            .field("lazy", &self.lazy)
            .field("materialized", &self.is_materialized())
            .field("droppers", &self.dropper_count())
            .finish()
    }
}

impl<T> Cached<T> {
    /// Lazy cache: the value is built on the first [`get`](Self::get).
    pub fn new(builder: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self::with_laziness(builder, true)
    }

    /// A non-lazy cache rebuilds synchronously inside every
    /// [`invalidate`](Self::invalidate). It is still built on first use.
    pub fn with_laziness(builder: impl Fn() -> T + Send + Sync + 'static, lazy: bool) -> Self {
        Self {
            id: CacheId::new(),
            builder: Box::new(builder),
            lazy,
            value: RwLock::new(None),
            droppers: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(builder: impl Fn() -> T + Send + Sync + 'static, config: &CacheConfig) -> Self {
        Self::with_laziness(builder, config.lazy)
    }

    pub fn id(&self) -> CacheId {
        self.id
    }

    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    pub fn is_materialized(&self) -> bool {
        self.value.read().is_some()
    }

    /// Returns the materialized value, building it if absent.
    ///
    /// Two racing callers may both run the builder, but only the first
    /// stored value is kept and both receive that same instance.
    pub fn get(&self) -> Arc<T> {
        if let Some(value) = self.value.read().as_ref() {
            return Arc::clone(value);
        }

        let built = Arc::new((self.builder)());
        metrics::counter!("bro_cache_rebuilds_total").increment(1);
        debug!(cache_id = %self.id, "Built cached value");

        let mut slot = self.value.write();
        Arc::clone(slot.get_or_insert(built))
    }

    pub fn invalidate(&self) {
        *self.value.write() = None;
        debug!(cache_id = %self.id, lazy = self.lazy, "Invalidated cached value");
        if !self.lazy {
            self.get();
        }
    }

    /// Registers a callback that `drop_invalidators` will hand this cache
    /// to, telling its registering party to stop invalidating it.
    pub fn add_dropper(&self, dropper: impl FnOnce(&Cached<T>) + Send + 'static) {
        self.droppers.lock().push(Box::new(dropper));
    }

    pub fn dropper_count(&self) -> usize {
        self.droppers.lock().len()
    }

    /// Invokes every registered dropper once and forgets them.
    ///
    /// Returns how many droppers ran. Droppers run outside the lock, so a
    /// dropper may register a new one without deadlocking.
    pub fn drop_invalidators(&self) -> usize {
        let droppers = std::mem::take(&mut *self.droppers.lock());
        let count = droppers.len();
        for dropper in droppers {
            dropper(self);
        }
        if count > 0 {
            debug!(cache_id = %self.id, count, "Dropped cache invalidators");
        }
        count
    }
}

impl<T: Send + Sync> Invalidate for Cached<T> {
    fn cache_id(&self) -> CacheId {
        self.id
    }

    fn invalidate(&self) {
        Cached::invalidate(self)
    }
}

type RelationshipTable = Mutex<HashMap<CacheId, Weak<dyn Invalidate>>>;

/// Registry of the caches one source of change must invalidate.
///
/// Holds weak references only: a cache dropped by its owner silently falls
/// out of the table on the next [`invalidate_all`](Self::invalidate_all).
#[derive(Clone, Default)]
pub struct Invalidator {
    table: Arc<RelationshipTable>,
}

impl fmt::Debug for Invalidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invalidator").field("managed", &self.len()).finish()
    }
}

impl Invalidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `cache` and leaves a dropper on it that unregisters it.
    pub fn manage<T: Send + Sync + 'static>(&self, cache: &Arc<Cached<T>>) {
        let id = cache.id();
        let erased: Arc<dyn Invalidate> = Arc::clone(cache) as Arc<dyn Invalidate>;
        self.table.lock().insert(id, Arc::downgrade(&erased));

        let table = Arc::downgrade(&self.table);
        cache.add_dropper(move |cache: &Cached<T>| {
            if let Some(table) = table.upgrade() {
                table.lock().remove(&cache.id());
            }
        });
    }

    /// Explicit unregister step. Returns whether the cache was managed.
    pub fn unmanage(&self, id: CacheId) -> bool {
        self.table.lock().remove(&id).is_some()
    }

    pub fn is_managing(&self, id: CacheId) -> bool {
        self.table.lock().contains_key(&id)
    }

    /// Invalidates every live managed cache and returns how many were
    /// invalidated.
    pub fn invalidate_all(&self) -> usize {
        let live: Vec<Arc<dyn Invalidate>> = {
            let mut table = self.table.lock();
            table.retain(|_, cache| cache.strong_count() > 0);
            table.values().filter_map(Weak::upgrade).collect()
        };

        // eager caches rebuild here, so the table lock must not be held
        for cache in &live {
            cache.invalidate();
        }
        live.len()
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }
}

// Per-key build-once caches shared by the codec front ends.

use crate::analyze::DecodeProgram;
use crate::error::AvrowResult;
use crate::host::HostType;
use crate::schema::Schema;
use std::any::TypeId;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// A map of lazily initialised cells. Lookups take the shared lock; a miss
/// takes the exclusive lock only to insert an empty cell, and the value is
/// built inside the cell, so builds of unrelated keys never wait on each
/// other.
pub(crate) struct OnceMap<K, C> {
    cells: RwLock<HashMap<K, Arc<C>>>,
}

impl<K: Eq + Hash + Clone, C: Default> OnceMap<K, C> {
    pub(crate) fn new() -> Self {
        OnceMap {
            cells: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn cell(&self, key: &K) -> Arc<C> {
        if let Some(cell) = self
            .cells
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
        {
            return cell.clone();
        }
        self.cells
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key.clone())
            .or_default()
            .clone()
    }

    // Drops every cell for which `keep` is false.
    pub(crate) fn retain(&self, mut keep: impl FnMut(&C) -> bool) {
        self.cells
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|_, cell| keep(cell));
    }
}

impl<K: Eq + Hash + Clone, C: Default> Default for OnceMap<K, C> {
    fn default() -> Self {
        OnceMap::new()
    }
}

type SyncCell<V> = once_cell::sync::OnceCell<V>;

/// Memoizes a fallible computation per key, errors included.
pub(crate) struct ResultCache<K, V> {
    cells: OnceMap<K, SyncCell<AvrowResult<V>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> ResultCache<K, V> {
    pub(crate) fn new() -> Self {
        ResultCache {
            cells: OnceMap::new(),
        }
    }

    pub(crate) fn get_or_init(&self, key: K, f: impl FnOnce() -> AvrowResult<V>) -> AvrowResult<V> {
        self.cells.cell(&key).get_or_init(f).clone()
    }
}

/// Writer schemas by registry ID. Failed lookups are remembered, except
/// for cancellations: a cancelled or dropped lookup leaves the cell empty so
/// the next caller fetches again.
pub(crate) struct WriterSchemas {
    cells: OnceMap<i64, tokio::sync::OnceCell<AvrowResult<Schema>>>,
}

impl WriterSchemas {
    pub(crate) fn new() -> Self {
        WriterSchemas {
            cells: OnceMap::new(),
        }
    }

    pub(crate) async fn get_or_fetch<F, Fut>(&self, id: i64, fetch: F) -> AvrowResult<Schema>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AvrowResult<Schema>>,
    {
        let cell = self.cells.cell(&id);
        let res = cell
            .get_or_try_init(|| async move {
                match fetch().await {
                    Err(e) if e.is_cancelled() => Err(e),
                    res => {
                        if let Err(e) = &res {
                            log::debug!("caching failed lookup of schema {}: {}", id, e);
                        }
                        Ok(res)
                    }
                }
            })
            .await?;
        res.clone()
    }

    pub(crate) fn clear_failures(&self) {
        self.cells
            .retain(|cell| !matches!(cell.get(), Some(Err(_))));
    }
}

/// Analyzed programs by (destination type, writer schema ID), each built at
/// most once. Counts the builds it performs.
pub(crate) struct Programs {
    cells: OnceMap<(TypeId, i64), SyncCell<AvrowResult<Arc<DecodeProgram>>>>,
    built: AtomicUsize,
}

impl Programs {
    pub(crate) fn new() -> Self {
        Programs {
            cells: OnceMap::new(),
            built: AtomicUsize::new(0),
        }
    }

    pub(crate) fn get_or_build(
        &self,
        host: &HostType,
        id: i64,
        build: impl FnOnce() -> AvrowResult<Arc<DecodeProgram>>,
    ) -> AvrowResult<Arc<DecodeProgram>> {
        let cell = self.cells.cell(&(host.id(), id));
        cell.get_or_init(|| {
            self.built.fetch_add(1, Ordering::SeqCst);
            log::debug!("building decode program for {:?} from schema {}", host, id);
            build()
        })
        .clone()
    }

    pub(crate) fn built(&self) -> usize {
        self.built.load(Ordering::SeqCst)
    }

    pub(crate) fn clear_failures(&self) {
        self.cells
            .retain(|cell| !matches!(cell.get(), Some(Err(_))));
    }
}

//! Compiled-artifact cache — bounded, fingerprint-keyed, FIFO eviction.
//!
//! The only state deliberately shared across requests. Read-mostly with
//! append-on-miss, guarded by a mutex; the artifacts themselves are `Arc`s,
//! so a hit clones a pointer, never an AST.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rhai::AST;
use stratbox_core::fingerprint::CodeFingerprint;

/// Default number of compiled artifacts kept in memory.
pub const DEFAULT_CAPACITY: usize = 100;

struct CacheInner {
    map: HashMap<CodeFingerprint, Arc<AST>>,
    /// Insertion order, oldest first.
    order: VecDeque<CodeFingerprint>,
}

/// Bounded compile cache keyed by `CodeFingerprint`.
pub struct CompiledCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CompiledCache {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "cache capacity must be >= 1");
        Self {
            inner: Mutex::new(CacheInner {
                map: HashMap::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
            }),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a compiled artifact. Counts a hit or a miss.
    pub fn get(&self, fingerprint: &CodeFingerprint) -> Option<Arc<AST>> {
        let inner = self.inner.lock().expect("cache lock");
        match inner.map.get(fingerprint) {
            Some(ast) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(ast))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert an artifact, evicting the oldest entry when full.
    ///
    /// A concurrent insert of the same fingerprint is harmless: the second
    /// insert replaces an identical artifact without disturbing the order.
    pub fn insert(&self, fingerprint: CodeFingerprint, ast: Arc<AST>) {
        let mut inner = self.inner.lock().expect("cache lock");
        if inner.map.insert(fingerprint.clone(), ast).is_some() {
            return;
        }
        inner.order.push_back(fingerprint);
        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.map.remove(&oldest);
            }
        }
    }

    pub fn contains(&self, fingerprint: &CodeFingerprint) -> bool {
        self.inner.lock().expect("cache lock").map.contains_key(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock").map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl Default for CompiledCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

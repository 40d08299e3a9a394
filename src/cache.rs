//! Lazily-computed, awaitable caches keyed by document URI.
//!
//! [`MemoizedMap`] is the primitive: a keyed store of installed-but-not-yet-
//! evaluated computations, each forced at most once. Two concurrent reads of
//! an in-flight key await the same computation — duplicates are impossible
//! by construction (`tokio::sync::OnceCell` serializes initialization).
//!
//! [`DocCache`] and [`WorkspaceCache`] wrap the map with workspace event
//! subscriptions: the former loads documents on demand and invalidates on
//! change/delete, the latter eagerly seeds an entry per known document on
//! first use and tracks create/change/delete. Invalidation installs a fresh
//! lazy computation; nothing is recomputed until the next read.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;
use tower_lsp::lsp_types::Url;

use crate::document::Document;
use crate::event::Subscription;
use crate::workspace::Workspace;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A per-document computation, e.g. "links of this document".
pub type ComputeFn<T> = Arc<dyn Fn(Document) -> BoxFuture<T> + Send + Sync>;

struct LazyValue<V> {
    cell: OnceCell<V>,
    init: Mutex<Option<BoxFuture<V>>>,
}

impl<V: Clone + Send + Sync + 'static> LazyValue<V> {
    fn new(init: BoxFuture<V>) -> LazyValue<V> {
        LazyValue {
            cell: OnceCell::new(),
            init: Mutex::new(Some(init)),
        }
    }

    /// Evaluates the installed computation at most once; concurrent callers
    /// await the same evaluation. `None` only if the thunk was already
    /// consumed without producing a value.
    async fn force(&self) -> Option<V> {
        self.cell
            .get_or_try_init(|| {
                let init = self.init.lock().expect("lazy init lock poisoned").take();
                async move {
                    match init {
                        Some(init) => Ok(init.await),
                        None => Err(()),
                    }
                }
            })
            .await
            .ok()
            .cloned()
    }
}

pub struct MemoizedMap<K, V> {
    entries: Mutex<HashMap<K, Arc<LazyValue<V>>>>,
}

impl<K: Eq + Hash + Clone, V: Clone + Send + Sync + 'static> MemoizedMap<K, V> {
    pub fn new() -> MemoizedMap<K, V> {
        MemoizedMap {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Installs a not-yet-evaluated computation, replacing any previous
    /// entry for the key.
    pub fn set(&self, key: K, init: impl Future<Output = V> + Send + 'static) {
        self.entries
            .lock()
            .expect("cache entries poisoned")
            .insert(key, Arc::new(LazyValue::new(Box::pin(init))));
    }

    pub fn has(&self, key: &K) -> bool {
        self.entries
            .lock()
            .expect("cache entries poisoned")
            .contains_key(key)
    }

    /// Forces and returns the memoized computation for `key`, or `None` if
    /// no computation is installed.
    pub async fn get(&self, key: &K) -> Option<V> {
        let entry = self
            .entries
            .lock()
            .expect("cache entries poisoned")
            .get(key)
            .cloned()?;
        entry.force().await
    }

    pub fn delete(&self, key: &K) -> bool {
        self.entries
            .lock()
            .expect("cache entries poisoned")
            .remove(key)
            .is_some()
    }

    pub fn keys(&self) -> Vec<K> {
        self.entries
            .lock()
            .expect("cache entries poisoned")
            .keys()
            .cloned()
            .collect()
    }

    fn get_or_insert_with(
        &self,
        key: &K,
        make: impl FnOnce() -> BoxFuture<V>,
    ) -> Arc<LazyValue<V>> {
        let mut entries = self.entries.lock().expect("cache entries poisoned");
        entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(LazyValue::new(make())))
            .clone()
    }

    /// Removes `key` only while it still maps to `entry`. Guards a caller
    /// that decided to evict based on a value it read earlier against
    /// clobbering an entry installed in the meantime.
    fn delete_entry(&self, key: &K, entry: &Arc<LazyValue<V>>) {
        let mut entries = self.entries.lock().expect("cache entries poisoned");
        if entries.get(key).is_some_and(|cur| Arc::ptr_eq(cur, entry)) {
            entries.remove(key);
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone + Send + Sync + 'static> Default for MemoizedMap<K, V> {
    fn default() -> Self {
        MemoizedMap::new()
    }
}

/// One lazily-computed value per document URI. Entries are invalidated by
/// document change notifications and evicted on delete; a `get` miss loads
/// the document from the workspace, with concurrent loads of the same
/// resource deduplicated.
pub struct DocCache<T: Clone + Send + Sync + 'static> {
    workspace: Arc<dyn Workspace>,
    map: MemoizedMap<Url, Option<T>>,
    compute: ComputeFn<T>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl<T: Clone + Send + Sync + 'static> DocCache<T> {
    pub fn new(workspace: Arc<dyn Workspace>, compute: ComputeFn<T>) -> Arc<DocCache<T>> {
        let cache = Arc::new(DocCache {
            workspace: workspace.clone(),
            map: MemoizedMap::new(),
            compute,
            subscriptions: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&cache);
        let on_changed = workspace.on_did_change_markdown_document(Arc::new(move |doc: &Document| {
            if let Some(cache) = weak.upgrade() {
                cache.invalidate(doc.clone());
            }
        }));

        let weak = Arc::downgrade(&cache);
        let on_deleted = workspace.on_did_delete_markdown_document(Arc::new(move |uri: &Url| {
            if let Some(cache) = weak.upgrade() {
                cache.map.delete(uri);
            }
        }));

        cache
            .subscriptions
            .lock()
            .expect("subscription list poisoned")
            .extend([on_changed, on_deleted]);
        cache
    }

    /// Installs a lazy recompute from the changed document; evaluated on
    /// the next read.
    fn invalidate(&self, doc: Document) {
        let compute = self.compute.clone();
        self.map
            .set(doc.uri().clone(), async move { Some(compute(doc).await) });
    }

    /// Returns the cached value, loading the document from the workspace on
    /// a miss. Resolves to `None` when the workspace cannot produce the
    /// document; the failed load is not memoized.
    pub async fn get(&self, uri: &Url) -> Option<T> {
        let entry = self.map.get_or_insert_with(uri, || {
            let workspace = self.workspace.clone();
            let compute = self.compute.clone();
            let uri = uri.clone();
            Box::pin(async move {
                match workspace.open_markdown_document(&uri).await {
                    Some(doc) => Some(compute(doc).await),
                    None => None,
                }
            })
        });
        match entry.force().await {
            Some(Some(value)) => Some(value),
            _ => {
                self.map.delete_entry(uri, &entry);
                None
            }
        }
    }

    /// Like [`DocCache::get`] but skips the load when the caller already
    /// holds the document.
    pub async fn get_for_document(&self, doc: &Document) -> T {
        let entry = self.map.get_or_insert_with(doc.uri(), || {
            let compute = self.compute.clone();
            let doc = doc.clone();
            Box::pin(async move { Some(compute(doc).await) })
        });
        match entry.force().await {
            Some(Some(value)) => value,
            // The entry raced an eviction or a failed load; compute
            // directly from the document in hand, uncached.
            _ => (self.compute)(doc.clone()).await,
        }
    }

    pub fn dispose(&self) {
        let subscriptions = std::mem::take(
            &mut *self
                .subscriptions
                .lock()
                .expect("subscription list poisoned"),
        );
        for subscription in &subscriptions {
            subscription.dispose();
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Drop for DocCache<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// One lazily-computed value per document across the whole workspace,
/// eagerly seeded on first use and kept current by create/change/delete
/// notifications rather than by lazy miss.
pub struct WorkspaceCache<T: Clone + Send + Sync + 'static> {
    workspace: Arc<dyn Workspace>,
    map: MemoizedMap<Url, T>,
    compute: ComputeFn<T>,
    populated: OnceCell<()>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl<T: Clone + Send + Sync + 'static> WorkspaceCache<T> {
    pub fn new(workspace: Arc<dyn Workspace>, compute: ComputeFn<T>) -> Arc<WorkspaceCache<T>> {
        let cache = Arc::new(WorkspaceCache {
            workspace: workspace.clone(),
            map: MemoizedMap::new(),
            compute,
            populated: OnceCell::new(),
            subscriptions: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&cache);
        let on_created = workspace.on_did_create_markdown_document(Arc::new(move |doc: &Document| {
            if let Some(cache) = weak.upgrade() {
                cache.install(doc.clone());
            }
        }));

        let weak = Arc::downgrade(&cache);
        let on_changed = workspace.on_did_change_markdown_document(Arc::new(move |doc: &Document| {
            if let Some(cache) = weak.upgrade() {
                cache.install(doc.clone());
            }
        }));

        let weak = Arc::downgrade(&cache);
        let on_deleted = workspace.on_did_delete_markdown_document(Arc::new(move |uri: &Url| {
            if let Some(cache) = weak.upgrade() {
                cache.map.delete(uri);
            }
        }));

        cache
            .subscriptions
            .lock()
            .expect("subscription list poisoned")
            .extend([on_created, on_changed, on_deleted]);
        cache
    }

    fn install(&self, doc: Document) {
        let compute = self.compute.clone();
        self.map
            .set(doc.uri().clone(), async move { compute(doc).await });
    }

    async fn ensure_populated(&self) {
        self.populated
            .get_or_init(|| async {
                for doc in self.workspace.get_all_markdown_documents().await {
                    // Entries installed by notifications before first use
                    // are newer; keep them.
                    if !self.map.has(doc.uri()) {
                        self.install(doc);
                    }
                }
            })
            .await;
    }

    pub async fn entries(&self) -> Vec<(Url, T)> {
        self.ensure_populated().await;
        let mut out = Vec::new();
        for key in self.map.keys() {
            if let Some(value) = self.map.get(&key).await {
                out.push((key, value));
            }
        }
        out
    }

    pub async fn values(&self) -> Vec<T> {
        self.entries().await.into_iter().map(|(_, v)| v).collect()
    }

    pub async fn get_for_docs(&self, docs: &[Document]) -> Vec<T> {
        self.ensure_populated().await;
        let mut out = Vec::new();
        for doc in docs {
            if !self.map.has(doc.uri()) {
                self.install(doc.clone());
            }
            if let Some(value) = self.map.get(doc.uri()).await {
                out.push(value);
            }
        }
        out
    }

    pub fn dispose(&self) {
        let subscriptions = std::mem::take(
            &mut *self
                .subscriptions
                .lock()
                .expect("subscription list poisoned"),
        );
        for subscription in &subscriptions {
            subscription.dispose();
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Drop for WorkspaceCache<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::InMemoryWorkspace;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn doc(uri: &str, text: &str) -> Document {
        Document::new(Url::parse(uri).unwrap(), 0, text)
    }

    fn versioned(uri: &str, version: i32, text: &str) -> Document {
        Document::new(Url::parse(uri).unwrap(), version, text)
    }

    /// A compute function that counts invocations and returns the document
    /// text.
    fn counting_compute(counter: Arc<AtomicUsize>) -> ComputeFn<String> {
        Arc::new(move |doc: Document| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                doc.text().to_string()
            })
        })
    }

    /// Test: a memoized computation runs once; later reads reuse it.
    #[tokio::test]
    async fn test_memoized_map_computes_once() {
        let map: MemoizedMap<u32, String> = MemoizedMap::new();
        let count = Arc::new(AtomicUsize::new(0));

        let count2 = count.clone();
        map.set(1, async move {
            count2.fetch_add(1, Ordering::SeqCst);
            "value".to_string()
        });

        assert_eq!(map.get(&1).await.as_deref(), Some("value"));
        assert_eq!(map.get(&1).await.as_deref(), Some("value"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(map.get(&2).await, None);
    }

    /// Test: delete removes an entry and is a no-op for absent keys.
    #[tokio::test]
    async fn test_memoized_map_delete() {
        let map: MemoizedMap<u32, u32> = MemoizedMap::new();
        map.set(1, async { 10 });

        assert!(map.delete(&1));
        assert!(!map.delete(&1));
        assert_eq!(map.get(&1).await, None);
    }

    /// Test: two overlapping gets for an uncached document issue a single
    /// computation.
    #[tokio::test]
    async fn test_doc_cache_deduplicates_concurrent_loads() {
        let ws = Arc::new(InMemoryWorkspace::new(None));
        ws.add_document(doc("file:///a.md", "text"));

        let count = Arc::new(AtomicUsize::new(0));
        let cache = DocCache::new(ws.clone(), counting_compute(count.clone()));

        let uri = Url::parse("file:///a.md").unwrap();
        let (first, second) = tokio::join!(cache.get(&uri), cache.get(&uri));

        assert_eq!(first.as_deref(), Some("text"));
        assert_eq!(second.as_deref(), Some("text"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    /// Test: a change notification invalidates the entry; the next read
    /// reflects the new content without the caller re-supplying it.
    #[tokio::test]
    async fn test_doc_cache_invalidated_by_change() {
        let ws = Arc::new(InMemoryWorkspace::new(None));
        ws.add_document(doc("file:///a.md", "old"));

        let count = Arc::new(AtomicUsize::new(0));
        let cache = DocCache::new(ws.clone(), counting_compute(count.clone()));

        let uri = Url::parse("file:///a.md").unwrap();
        assert_eq!(cache.get(&uri).await.as_deref(), Some("old"));

        ws.update_document(versioned("file:///a.md", 1, "new"));
        assert_eq!(cache.get(&uri).await.as_deref(), Some("new"));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    /// Test: after a delete notification a lookup behaves as if the
    /// document never existed.
    #[tokio::test]
    async fn test_doc_cache_evicts_on_delete() {
        let ws = Arc::new(InMemoryWorkspace::new(None));
        ws.add_document(doc("file:///a.md", "text"));

        let cache = DocCache::new(ws.clone(), counting_compute(Arc::new(AtomicUsize::new(0))));
        let uri = Url::parse("file:///a.md").unwrap();
        assert!(cache.get(&uri).await.is_some());

        ws.remove_document(&uri);
        assert_eq!(cache.get(&uri).await, None);
    }

    /// Test: an unresolvable URI resolves to None without poisoning the
    /// cache — once the document appears, the next get loads it.
    #[tokio::test]
    async fn test_doc_cache_missing_document_not_memoized() {
        let ws = Arc::new(InMemoryWorkspace::new(None));
        let cache = DocCache::new(ws.clone(), counting_compute(Arc::new(AtomicUsize::new(0))));

        let uri = Url::parse("file:///late.md").unwrap();
        assert_eq!(cache.get(&uri).await, None);

        ws.add_document(doc("file:///late.md", "here now"));
        assert_eq!(cache.get(&uri).await.as_deref(), Some("here now"));
    }

    /// Test: get_for_document skips the workspace load entirely.
    #[tokio::test]
    async fn test_doc_cache_get_for_document() {
        let ws = Arc::new(InMemoryWorkspace::new(None));
        let count = Arc::new(AtomicUsize::new(0));
        let cache = DocCache::new(ws.clone(), counting_compute(count.clone()));

        // Never added to the workspace; only the caller holds it.
        let untracked = doc("file:///untracked.md", "body");
        assert_eq!(cache.get_for_document(&untracked).await, "body");
        assert_eq!(cache.get_for_document(&untracked).await, "body");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    /// Test: the workspace cache eagerly seeds every known document on
    /// first use and tracks later creates and deletes.
    #[tokio::test]
    async fn test_workspace_cache_populates_and_tracks() {
        let ws = Arc::new(InMemoryWorkspace::new(None));
        ws.add_document(doc("file:///a.md", "a"));
        ws.add_document(doc("file:///b.md", "b"));

        let cache = WorkspaceCache::new(ws.clone(), counting_compute(Arc::new(AtomicUsize::new(0))));
        let mut values = cache.values().await;
        values.sort();
        assert_eq!(values, vec!["a".to_string(), "b".to_string()]);

        ws.add_document(doc("file:///c.md", "c"));
        ws.remove_document(&Url::parse("file:///a.md").unwrap());

        let mut values = cache.values().await;
        values.sort();
        assert_eq!(values, vec!["b".to_string(), "c".to_string()]);
    }

    /// Test: disposal detaches the cache from workspace notifications.
    #[tokio::test]
    async fn test_doc_cache_dispose_detaches() {
        let ws = Arc::new(InMemoryWorkspace::new(None));
        ws.add_document(doc("file:///a.md", "old"));

        let count = Arc::new(AtomicUsize::new(0));
        let cache = DocCache::new(ws.clone(), counting_compute(count.clone()));
        let uri = Url::parse("file:///a.md").unwrap();
        assert_eq!(cache.get(&uri).await.as_deref(), Some("old"));

        cache.dispose();
        ws.update_document(versioned("file:///a.md", 1, "new"));

        // Nothing invalidates the entry after disposal.
        assert_eq!(cache.get(&uri).await.as_deref(), Some("old"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}

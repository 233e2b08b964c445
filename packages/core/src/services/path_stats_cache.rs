//! Path & Statistics Cache
//!
//! Keeps, for every node reachable from a root, its ancestor path and its
//! aggregate counts so that depth/path/count reads are a single map lookup.
//!
//! # Consistency
//!
//! The cache is advisory. It is derived entirely from the node table plus
//! the external item counts, and [`PathStatsCache::rebuild_all`] recreates
//! it from scratch at any time.
//!
//! Writers take a [`CacheWriter`] via [`PathStatsCache::begin_update`] and
//! hold it across the structural mutation *and* the follow-up rebuild.
//! Readers block on the same lock, so they see either the state before the
//! mutation or the state after the rebuild, never a half-applied one.
//!
//! # Invalidation
//!
//! A stale flag forces a full rebuild on the next access. It is set when the
//! cache is created, when [`invalidate`](PathStatsCache::invalidate) is
//! called, and when an incremental rebuild fails.

use crate::db::{ItemStore, NodeBackend};
use crate::models::{CacheStats, DerivedStats, Node, NodeId};
use crate::services::error::{Result, TreeError};
use crate::services::node_store::sort_by_name;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockWriteGuard};

#[derive(Debug, Clone)]
struct CacheEntry {
    /// Ancestor ids, root first, parent last
    path: Vec<NodeId>,
    children: Vec<NodeId>,
    stats: DerivedStats,
}

#[derive(Debug, Default)]
struct CacheIndex {
    entries: HashMap<NodeId, CacheEntry>,
    last_rebuild: Option<DateTime<Utc>>,
    rebuild_count: u64,
}

/// Adjacency and item counts for the part of the tree being indexed
#[derive(Default)]
struct Snapshot {
    children: HashMap<NodeId, Vec<NodeId>>,
    direct: HashMap<NodeId, u64>,
}

impl Snapshot {
    /// Index `root` and everything below it into `entries`
    fn index_subtree(
        &self,
        entries: &mut HashMap<NodeId, CacheEntry>,
        root: NodeId,
        base_path: Vec<NodeId>,
        now: DateTime<Utc>,
    ) {
        // Pre-order walk; reversed it visits every child before its parent
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![(root, base_path)];
        while let Some((id, path)) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(children) = self.children.get(&id) {
                let mut child_path = path.clone();
                child_path.push(id);
                for child in children {
                    stack.push((*child, child_path.clone()));
                }
            }
            order.push((id, path));
        }

        for (id, path) in order.into_iter().rev() {
            let children = self.children.get(&id).cloned().unwrap_or_default();
            let direct = self.direct.get(&id).copied().unwrap_or(0);
            let (descendants, total) = aggregate(entries, &children, direct);
            entries.insert(
                id,
                CacheEntry {
                    stats: DerivedStats {
                        question_count: total,
                        direct_question_count: direct,
                        child_count: children.len(),
                        descendant_count: descendants,
                        depth: path.len(),
                        last_updated: now,
                    },
                    path,
                    children,
                },
            );
        }
    }
}

/// Sum descendant and item counts over already-indexed children
fn aggregate(
    entries: &HashMap<NodeId, CacheEntry>,
    children: &[NodeId],
    direct: u64,
) -> (usize, u64) {
    children
        .iter()
        .filter_map(|child| entries.get(child))
        .fold((0, direct), |(descendants, total), entry| {
            (
                descendants + 1 + entry.stats.descendant_count,
                total + entry.stats.question_count,
            )
        })
}

fn child_ids(mut nodes: Vec<Node>) -> Vec<NodeId> {
    sort_by_name(&mut nodes);
    nodes.into_iter().map(|node| node.id).collect()
}

/// Derived ancestor-path and aggregate-count index
pub struct PathStatsCache {
    index: RwLock<CacheIndex>,
    stale: AtomicBool,
    backend: Arc<dyn NodeBackend>,
    items: Arc<dyn ItemStore>,
    max_walk_depth: usize,
}

impl PathStatsCache {
    /// Create an empty cache; it is populated on first access
    pub fn new(
        backend: Arc<dyn NodeBackend>,
        items: Arc<dyn ItemStore>,
        max_walk_depth: usize,
    ) -> Self {
        Self {
            index: RwLock::new(CacheIndex::default()),
            stale: AtomicBool::new(true),
            backend,
            items,
            max_walk_depth,
        }
    }

    /// Lock the cache for a structural mutation
    ///
    /// Reads wait until the returned writer is dropped.
    pub async fn begin_update(&self) -> CacheWriter<'_> {
        CacheWriter {
            cache: self,
            index: self.index.write().await,
        }
    }

    /// Discard everything and re-derive from the node table
    pub async fn rebuild_all(&self) -> Result<()> {
        self.begin_update().await.rebuild_all().await
    }

    /// Force a full rebuild on next access
    pub fn invalidate(&self) {
        self.stale.store(true, Ordering::Release);
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    async fn ensure_fresh(&self) -> Result<()> {
        if self.is_stale() {
            let mut writer = self.begin_update().await;
            // Another reader may have rebuilt while we waited for the lock
            if self.is_stale() {
                writer.rebuild_all().await?;
            }
        }
        Ok(())
    }

    async fn read_entry<T>(&self, id: NodeId, read: impl FnOnce(&CacheEntry) -> T) -> Result<T> {
        self.ensure_fresh().await?;
        let index = self.index.read().await;
        index
            .entries
            .get(&id)
            .map(read)
            .ok_or_else(|| TreeError::node_not_found(id))
    }

    /// Roots have depth 0
    pub async fn depth(&self, id: NodeId) -> Result<usize> {
        self.read_entry(id, |entry| entry.stats.depth).await
    }

    /// Ancestor ids from root to parent
    pub async fn path(&self, id: NodeId) -> Result<Vec<NodeId>> {
        self.read_entry(id, |entry| entry.path.clone()).await
    }

    /// Items filed anywhere in the node's subtree
    pub async fn question_count(&self, id: NodeId) -> Result<u64> {
        self.read_entry(id, |entry| entry.stats.question_count).await
    }

    pub async fn child_count(&self, id: NodeId) -> Result<usize> {
        self.read_entry(id, |entry| entry.stats.child_count).await
    }

    pub async fn descendant_count(&self, id: NodeId) -> Result<usize> {
        self.read_entry(id, |entry| entry.stats.descendant_count)
            .await
    }

    pub async fn node_stats(&self, id: NodeId) -> Result<DerivedStats> {
        self.read_entry(id, |entry| entry.stats.clone()).await
    }

    /// Deepest indexed depth (0 for an empty tree)
    pub async fn max_depth(&self) -> Result<usize> {
        self.ensure_fresh().await?;
        let index = self.index.read().await;
        Ok(index
            .entries
            .values()
            .map(|entry| entry.stats.depth)
            .max()
            .unwrap_or(0))
    }

    pub async fn stats(&self) -> CacheStats {
        let index = self.index.read().await;
        CacheStats {
            entries: index.entries.len(),
            is_stale: self.is_stale(),
            last_rebuild: index.last_rebuild,
            rebuild_count: index.rebuild_count,
        }
    }
}

/// Exclusive handle used while a structural mutation is in flight
pub struct CacheWriter<'a> {
    cache: &'a PathStatsCache,
    index: RwLockWriteGuard<'a, CacheIndex>,
}

impl CacheWriter<'_> {
    /// Give up on incremental maintenance; the next read rebuilds everything
    pub fn mark_stale(&mut self) {
        self.cache.invalidate();
    }

    /// Recompute `root` and every descendant, then the aggregates above it
    ///
    /// Used after a node is created or moved: the node's whole ancestor chain
    /// may have changed, and so has every descendant's.
    pub async fn rebuild_subtree(&mut self, root: NodeId) -> Result<()> {
        if self.cache.is_stale() {
            return self.rebuild_all().await;
        }

        let root_node = self
            .cache
            .backend
            .get_node(root)
            .await?
            .ok_or_else(|| TreeError::node_not_found(root))?;

        let base_path = match root_node.parent_id {
            None => Vec::new(),
            Some(parent_id) => {
                let parent_path = self.index.entries.get(&parent_id).map(|parent| {
                    let mut path = parent.path.clone();
                    path.push(parent_id);
                    path
                });
                match parent_path {
                    Some(path) => path,
                    // Parent was never indexed; incremental state can't be trusted
                    None => return self.rebuild_all().await,
                }
            }
        };

        let mut snapshot = Snapshot::default();
        let mut queue = VecDeque::from([root]);
        let mut seen = HashSet::from([root]);
        while let Some(current) = queue.pop_front() {
            let children = self.cache.backend.list_children(Some(current)).await?;
            let ids = child_ids(children);
            for child in &ids {
                if seen.insert(*child) {
                    queue.push_back(*child);
                }
            }
            snapshot
                .direct
                .insert(current, self.cache.items.count_items_under(current).await?);
            snapshot.children.insert(current, ids);
        }

        snapshot.index_subtree(&mut self.index.entries, root, base_path, Utc::now());
        self.refresh_ancestors(root_node.parent_id).await
    }

    /// Recompute counts for `start` and each of its ancestors
    pub async fn refresh_ancestors(&mut self, start: Option<NodeId>) -> Result<()> {
        if self.cache.is_stale() {
            return self.rebuild_all().await;
        }

        let mut current = start;
        let mut steps = 0;
        while let Some(id) = current {
            steps += 1;
            if steps > self.cache.max_walk_depth {
                return Err(TreeError::cycle(format!(
                    "Parent chain above {:?} exceeds {} steps",
                    start, self.cache.max_walk_depth
                )));
            }

            let Some(node) = self.cache.backend.get_node(id).await? else {
                self.index.entries.remove(&id);
                break;
            };
            let children = child_ids(self.cache.backend.list_children(Some(id)).await?);
            let direct = self.cache.items.count_items_under(id).await?;

            if children
                .iter()
                .any(|child| !self.index.entries.contains_key(child))
            {
                return self.rebuild_all().await;
            }
            let (descendants, total) = aggregate(&self.index.entries, &children, direct);

            if !self.index.entries.contains_key(&id) {
                return self.rebuild_all().await;
            }
            if let Some(entry) = self.index.entries.get_mut(&id) {
                entry.stats.child_count = children.len();
                entry.stats.descendant_count = descendants;
                entry.stats.question_count = total;
                entry.stats.direct_question_count = direct;
                entry.stats.last_updated = Utc::now();
                entry.children = children;
            }

            current = node.parent_id;
        }
        Ok(())
    }

    /// Drop the entries of removed nodes
    pub fn remove_subtree(&mut self, ids: &[NodeId]) {
        for id in ids {
            self.index.entries.remove(id);
        }
    }

    /// Re-derive every entry from the node table
    pub async fn rebuild_all(&mut self) -> Result<()> {
        let nodes = self.cache.backend.list_nodes().await?;
        let known: HashSet<NodeId> = nodes.iter().map(|node| node.id).collect();

        let mut snapshot = Snapshot::default();
        let mut roots = Vec::new();
        let mut grouped: HashMap<NodeId, Vec<Node>> = HashMap::new();
        for node in &nodes {
            snapshot
                .direct
                .insert(node.id, self.cache.items.count_items_under(node.id).await?);
            match node.parent_id {
                Some(parent_id) if known.contains(&parent_id) => {
                    grouped.entry(parent_id).or_default().push(node.clone())
                }
                // Dangling parents are indexed as roots
                _ => roots.push(node.id),
            }
        }
        snapshot.children = grouped
            .into_iter()
            .map(|(parent, children)| (parent, child_ids(children)))
            .collect();

        let now = Utc::now();
        let mut entries = HashMap::with_capacity(nodes.len());
        for root in roots {
            snapshot.index_subtree(&mut entries, root, Vec::new(), now);
        }

        self.index.entries = entries;
        self.index.last_rebuild = Some(now);
        self.index.rebuild_count += 1;
        self.cache.stale.store(false, Ordering::Release);
        tracing::debug!(
            entries = self.index.entries.len(),
            "Rebuilt path/stats cache"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TreeConfig;
    use crate::db::{MemoryBackend, MemoryItemStore};
    use crate::models::{Level, NewNode};
    use crate::services::node_store::NodeStore;

    struct Fixture {
        store: NodeStore,
        cache: PathStatsCache,
        items: Arc<MemoryItemStore>,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(MemoryBackend::new());
        let items = Arc::new(MemoryItemStore::new());
        let config = Arc::new(TreeConfig::default());
        Fixture {
            store: NodeStore::new(backend.clone(), items.clone(), config.clone()),
            cache: PathStatsCache::new(backend, items.clone(), config.max_walk_depth),
            items,
        }
    }

    #[tokio::test]
    async fn test_new_cache_is_stale_and_rebuilds_on_read() {
        let f = fixture();
        let math = f
            .store
            .create(NewNode::new("Math", Level::Subject))
            .await
            .unwrap();

        let stats = f.cache.stats().await;
        assert!(stats.is_stale);
        assert_eq!(stats.rebuild_count, 0);

        assert_eq!(f.cache.depth(math.id).await.unwrap(), 0);
        let stats = f.cache.stats().await;
        assert!(!stats.is_stale);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.rebuild_count, 1);
    }

    #[tokio::test]
    async fn test_incremental_rebuild_updates_ancestor_counts() {
        let f = fixture();
        let math = f
            .store
            .create(NewNode::new("Math", Level::Subject))
            .await
            .unwrap();
        f.cache.rebuild_all().await.unwrap();

        let algebra = f
            .store
            .create(NewNode::new("Algebra", Level::Chapter).with_parent(math.id))
            .await
            .unwrap();
        f.items.file_item("q1", algebra.id).await;
        f.items.file_item("q2", algebra.id).await;
        {
            let mut writer = f.cache.begin_update().await;
            writer.rebuild_subtree(algebra.id).await.unwrap();
        }

        assert_eq!(f.cache.depth(algebra.id).await.unwrap(), 1);
        assert_eq!(f.cache.path(algebra.id).await.unwrap(), vec![math.id]);
        assert_eq!(f.cache.child_count(math.id).await.unwrap(), 1);
        assert_eq!(f.cache.descendant_count(math.id).await.unwrap(), 1);
        assert_eq!(f.cache.question_count(math.id).await.unwrap(), 2);
        assert_eq!(
            f.cache.node_stats(algebra.id).await.unwrap().direct_question_count,
            2
        );
        // Incremental maintenance never needed a second full rebuild
        assert_eq!(f.cache.stats().await.rebuild_count, 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_full_rebuild() {
        let f = fixture();
        let math = f
            .store
            .create(NewNode::new("Math", Level::Subject))
            .await
            .unwrap();
        f.cache.rebuild_all().await.unwrap();

        f.items.file_item("q1", math.id).await;
        // Not notified yet, so the cached count lags
        assert_eq!(f.cache.question_count(math.id).await.unwrap(), 0);

        f.cache.invalidate();
        assert_eq!(f.cache.question_count(math.id).await.unwrap(), 1);
        assert_eq!(f.cache.stats().await.rebuild_count, 2);
    }

    #[tokio::test]
    async fn test_unknown_node_is_not_found() {
        let f = fixture();
        let err = f.cache.depth(NodeId::new()).await.unwrap_err();
        assert!(matches!(err, TreeError::NotFound { .. }));
        assert_eq!(f.cache.max_depth().await.unwrap(), 0);
    }
}

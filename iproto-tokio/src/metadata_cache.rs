//! The metadata cache (`spec.md` §4.6, Property P5).
//!
//! `ArcSwap<MetadataSnapshot>` gives readers an atomic, immutable view: a
//! lookup either sees the snapshot from before a refresh or the one after,
//! never a partially populated one.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use iproto_protocol::{IndexMetadata, SpaceMetadata};

/// An immutable bundle of the four lookup maps described in `spec.md` §3:
/// "for every entry present in one direction a matching entry exists in the
/// other".
#[derive(Default)]
pub struct MetadataSnapshot {
    space_by_name: HashMap<String, Arc<SpaceMetadata>>,
    space_by_id: HashMap<u32, Arc<SpaceMetadata>>,
    index_by_name: HashMap<(u32, String), Arc<IndexMetadata>>,
    index_by_id: HashMap<(u32, u32), Arc<IndexMetadata>>,
}

impl MetadataSnapshot {
    fn build(spaces: Vec<SpaceMetadata>, indexes: Vec<IndexMetadata>) -> Self {
        let mut space_by_name = HashMap::with_capacity(spaces.len());
        let mut space_by_id = HashMap::with_capacity(spaces.len());
        for space in spaces {
            let space = Arc::new(space);
            space_by_name.insert(space.name.clone(), space.clone());
            space_by_id.insert(space.space_id, space);
        }

        let mut index_by_name = HashMap::with_capacity(indexes.len());
        let mut index_by_id = HashMap::with_capacity(indexes.len());
        for index in indexes {
            let index = Arc::new(index);
            index_by_name.insert((index.space_id, index.name.clone()), index.clone());
            index_by_id.insert((index.space_id, index.index_id), index);
        }

        MetadataSnapshot {
            space_by_name,
            space_by_id,
            index_by_name,
            index_by_id,
        }
    }
}

/// `spec.md` §4.6: "converts human-readable space/index names into the
/// numeric identifiers required by every CRUD request."
pub struct MetadataCache {
    snapshot: ArcSwap<MetadataSnapshot>,
}

impl MetadataCache {
    pub fn new() -> Self {
        MetadataCache {
            snapshot: ArcSwap::from_pointee(MetadataSnapshot::default()),
        }
    }

    /// Atomically replaces the cached snapshot (`spec.md` §4.6:
    /// "atomically swap the snapshot").
    pub fn install(&self, spaces: Vec<SpaceMetadata>, indexes: Vec<IndexMetadata>) {
        self.snapshot
            .store(Arc::new(MetadataSnapshot::build(spaces, indexes)));
    }

    pub fn space_by_name(&self, name: &str) -> Option<Arc<SpaceMetadata>> {
        self.snapshot.load().space_by_name.get(name).cloned()
    }

    pub fn space_by_id(&self, space_id: u32) -> Option<Arc<SpaceMetadata>> {
        self.snapshot.load().space_by_id.get(&space_id).cloned()
    }

    pub fn index_by_name(&self, space_id: u32, name: &str) -> Option<Arc<IndexMetadata>> {
        self.snapshot
            .load()
            .index_by_name
            .get(&(space_id, name.to_string()))
            .cloned()
    }

    pub fn index_by_id(&self, space_id: u32, index_id: u32) -> Option<Arc<IndexMetadata>> {
        self.snapshot.load().index_by_id.get(&(space_id, index_id)).cloned()
    }

    pub fn is_populated(&self) -> bool {
        !self.snapshot.load().space_by_id.is_empty()
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space(id: u32, name: &str) -> SpaceMetadata {
        SpaceMetadata {
            space_id: id,
            name: name.to_string(),
            engine: "memtx".to_string(),
            fields: vec![],
        }
    }

    fn index(space_id: u32, index_id: u32, name: &str) -> IndexMetadata {
        IndexMetadata {
            space_id,
            index_id,
            name: name.to_string(),
            index_type: "tree".to_string(),
            unique: true,
            parts: vec![],
        }
    }

    #[test]
    fn lookups_agree_across_both_directions() {
        let cache = MetadataCache::new();
        cache.install(vec![space(512, "test")], vec![index(512, 0, "primary")]);

        let by_name = cache.space_by_name("test").unwrap();
        let by_id = cache.space_by_id(512).unwrap();
        assert_eq!(by_name.space_id, by_id.space_id);

        let idx_by_name = cache.index_by_name(512, "primary").unwrap();
        let idx_by_id = cache.index_by_id(512, 0).unwrap();
        assert_eq!(idx_by_name.index_id, idx_by_id.index_id);
    }

    #[test]
    fn missing_entries_return_none() {
        let cache = MetadataCache::new();
        assert!(cache.space_by_name("nope").is_none());
        assert!(cache.index_by_name(1, "nope").is_none());
    }

    #[test]
    fn refresh_replaces_the_whole_snapshot_atomically() {
        let cache = MetadataCache::new();
        cache.install(vec![space(1, "a")], vec![]);
        assert!(cache.space_by_name("a").is_some());

        cache.install(vec![space(2, "b")], vec![]);
        assert!(cache.space_by_name("a").is_none());
        assert!(cache.space_by_name("b").is_some());
    }
}

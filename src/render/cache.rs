//! Two-generation tile cache with a separate thumbnail pool
//!
//! Regular tiles live in an *active* and a *passive* generation. Every
//! planning pass starts by folding active into passive; tiles requested again
//! during the pass are promoted back to active. Under pressure passive tiles
//! are evicted before active ones, lowest rank first, which approximates LRU
//! without maintaining a full recency chain.

use std::collections::{BTreeMap, HashMap, VecDeque};

use log::trace;

use super::tile::{Tile, TileKey};

/// Result of [`TileCache::insert`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The tile was stored after evicting `evicted` older tiles
    Inserted { evicted: usize },
    /// An equal tile was already cached; the incoming copy was dropped
    AlreadyCached,
}

/// Occupancy counters for diagnostics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub active: usize,
    pub passive: usize,
    pub thumbnails: usize,
    pub capacity: usize,
    pub thumbnail_capacity: usize,
}

/// Bit pattern of a [`TileKey`], hashable unlike the key's floats
type KeyBits = (usize, usize, [u32; 6]);

fn key_bits(key: &TileKey) -> KeyBits {
    // Adding 0.0 folds -0.0 into 0.0, which compare equal as floats
    let bits = |value: f32| (value + 0.0).to_bits();
    (
        key.user_page,
        key.document_page,
        [
            bits(key.pixel_width),
            bits(key.pixel_height),
            bits(key.bounds.left),
            bits(key.bounds.top),
            bits(key.bounds.right),
            bits(key.bounds.bottom),
        ],
    )
}

/// One generation of tiles ordered by `(rank, insertion sequence)`, with an
/// index from tile identity to that slot
#[derive(Default)]
struct Generation {
    tiles: BTreeMap<(u32, u64), Tile>,
    slots: HashMap<KeyBits, (u32, u64)>,
}

impl Generation {
    fn len(&self) -> usize {
        self.tiles.len()
    }

    fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    fn insert(&mut self, seq: u64, tile: Tile) {
        let slot = (tile.rank(), seq);
        self.slots.insert(key_bits(tile.key()), slot);
        self.tiles.insert(slot, tile);
    }

    fn pop_lowest(&mut self) -> Option<Tile> {
        let (_, tile) = self.tiles.pop_first()?;
        self.slots.remove(&key_bits(tile.key()));
        Some(tile)
    }

    fn take(&mut self, key: &TileKey) -> Option<Tile> {
        let slot = self.slots.remove(&key_bits(key))?;
        self.tiles.remove(&slot)
    }

    fn contains(&self, key: &TileKey) -> bool {
        self.slots.contains_key(&key_bits(key))
    }

    fn absorb(&mut self, other: &mut Generation) {
        self.tiles.append(&mut other.tiles);
        self.slots.extend(other.slots.drain());
    }

    fn iter(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.values()
    }

    fn clear(&mut self) {
        self.tiles.clear();
        self.slots.clear();
    }
}

/// Bounded store of rendered tiles
pub struct TileCache {
    capacity: usize,
    thumbnail_capacity: usize,
    active: Generation,
    passive: Generation,
    thumbnails: VecDeque<Tile>,
    next_seq: u64,
}

impl TileCache {
    /// Create a cache holding at most `capacity` tiles and
    /// `thumbnail_capacity` thumbnails. Both are raised to at least 1.
    #[must_use]
    pub fn new(capacity: usize, thumbnail_capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            thumbnail_capacity: thumbnail_capacity.max(1),
            active: Generation::default(),
            passive: Generation::default(),
            thumbnails: VecDeque::new(),
            next_seq: 0,
        }
    }

    /// Store a freshly rendered tile.
    ///
    /// Room is made before the tile is added, so the capacity is never
    /// exceeded, even transiently. A tile equal to one already cached is
    /// dropped and the cached copy is promoted instead.
    pub fn insert(&mut self, tile: Tile) -> InsertOutcome {
        if tile.is_thumbnail() {
            return self.insert_thumbnail(tile);
        }

        if self.promote_if_present(tile.key(), tile.rank()) {
            trace!("Tile {:?} already cached, dropping duplicate", tile.key());
            return InsertOutcome::AlreadyCached;
        }

        let evicted = self.make_space();
        let seq = self.next_seq();
        self.active.insert(seq, tile);
        debug_assert!(self.len() <= self.capacity);
        InsertOutcome::Inserted { evicted }
    }

    fn insert_thumbnail(&mut self, tile: Tile) -> InsertOutcome {
        if self.contains_thumbnail(tile.key()) {
            return InsertOutcome::AlreadyCached;
        }

        let mut evicted = 0;
        while self.thumbnails.len() >= self.thumbnail_capacity {
            if let Some(oldest) = self.thumbnails.pop_front() {
                trace!("Evicting thumbnail of page {}", oldest.key().user_page);
                evicted += 1;
            }
        }
        self.thumbnails.push_back(tile);
        InsertOutcome::Inserted { evicted }
    }

    /// Release tiles until one more fits, passive generation first.
    /// Returns the number of evicted tiles.
    pub fn make_space(&mut self) -> usize {
        let mut evicted = 0;

        while self.len() >= self.capacity {
            let Some(tile) = self.passive.pop_lowest() else {
                break;
            };
            trace!("Evicting passive tile {:?} (rank {})", tile.key(), tile.rank());
            evicted += 1;
        }

        while self.len() >= self.capacity {
            let Some(tile) = self.active.pop_lowest() else {
                break;
            };
            trace!("Evicting active tile {:?} (rank {})", tile.key(), tile.rank());
            evicted += 1;
        }

        evicted
    }

    /// Fold the active generation into the passive one.
    ///
    /// Must run before a planning pass promotes or inserts anything.
    pub fn begin_new_generation(&mut self) {
        self.passive.absorb(&mut self.active);
    }

    /// Look a tile up by identity.
    ///
    /// A passive hit moves the tile to the active generation with `rank`; an
    /// active hit leaves it in place. Returns false on a miss.
    pub fn promote_if_present(&mut self, key: &TileKey, rank: u32) -> bool {
        if let Some(mut tile) = self.passive.take(key) {
            tile.set_rank(rank);
            let seq = self.next_seq();
            self.active.insert(seq, tile);
            return true;
        }

        self.active.contains(key)
    }

    /// Membership test for the thumbnail pool
    #[must_use]
    pub fn contains_thumbnail(&self, key: &TileKey) -> bool {
        self.thumbnails.iter().any(|tile| tile.key() == key)
    }

    /// Regular tiles in draw order: passive first, then active
    #[must_use]
    pub fn snapshot_for_draw(&self) -> Vec<&Tile> {
        self.passive.iter().chain(self.active.iter()).collect()
    }

    /// Cached thumbnails, oldest first
    pub fn thumbnails(&self) -> impl Iterator<Item = &Tile> {
        self.thumbnails.iter()
    }

    /// Drop every tile. Safe to call repeatedly.
    pub fn clear(&mut self) {
        self.active.clear();
        self.passive.clear();
        self.thumbnails.clear();
    }

    /// Number of regular tiles (both generations)
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len() + self.passive.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty() && self.passive.is_empty() && self.thumbnails.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn thumbnail_capacity(&self) -> usize {
        self.thumbnail_capacity
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            active: self.active.len(),
            passive: self.passive.len(),
            thumbnails: self.thumbnails.len(),
            capacity: self.capacity,
            thumbnail_capacity: self.thumbnail_capacity,
        }
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::types::{Bitmap, RelativeRect};

    fn key(index: usize) -> TileKey {
        let left = index as f32 / 100.0;
        TileKey::new(0, 0, 256.0, 256.0, RelativeRect::new(left, 0.0, left + 0.01, 0.1))
    }

    fn tile(index: usize, rank: u32) -> Tile {
        Tile::new(key(index), false, rank, Bitmap::new(1, 1))
    }

    fn thumbnail(page: usize) -> Tile {
        Tile::new(
            TileKey::new(page, page, 20.0, 30.0, RelativeRect::FULL_PAGE),
            true,
            0,
            Bitmap::new(1, 1),
        )
    }

    fn cached_keys(cache: &TileCache) -> Vec<TileKey> {
        cache.snapshot_for_draw().iter().map(|t| *t.key()).collect()
    }

    #[test]
    fn insert_respects_capacity() {
        let mut cache = TileCache::new(3, 2);
        for i in 0..10 {
            cache.insert(tile(i, i as u32));
            assert!(cache.len() <= 3);
        }
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn duplicate_insert_is_a_promotion() {
        let mut cache = TileCache::new(5, 2);
        assert_eq!(
            cache.insert(tile(1, 0)),
            InsertOutcome::Inserted { evicted: 0 }
        );
        cache.begin_new_generation();
        assert_eq!(cache.insert(tile(1, 7)), InsertOutcome::AlreadyCached);

        assert_eq!(cache.len(), 1);
        let stats = cache.stats();
        assert_eq!(stats.active, 1);
        assert_eq!(stats.passive, 0);
        assert_eq!(cache.snapshot_for_draw()[0].rank(), 7);
    }

    #[test]
    fn passive_tiles_are_evicted_before_active_ones() {
        let mut cache = TileCache::new(4, 2);
        cache.insert(tile(0, 5));
        cache.insert(tile(1, 1));
        cache.begin_new_generation();
        cache.insert(tile(2, 0));
        cache.insert(tile(3, 2));

        // Full: passive {0 (rank 5), 1 (rank 1)}, active {2, 3}
        cache.insert(tile(4, 3));
        let keys = cached_keys(&cache);
        assert!(!keys.contains(&key(1)), "lowest passive rank goes first");
        assert!(keys.contains(&key(0)));
        assert!(keys.contains(&key(2)));

        cache.insert(tile(5, 4));
        let keys = cached_keys(&cache);
        assert!(!keys.contains(&key(0)));
        assert_eq!(cache.stats().passive, 0);

        // Only active tiles left: lowest active rank goes
        cache.insert(tile(6, 9));
        let keys = cached_keys(&cache);
        assert!(!keys.contains(&key(2)));
        assert_eq!(keys.len(), 4);
    }

    #[test]
    fn promote_moves_passive_tile_to_active() {
        let mut cache = TileCache::new(10, 2);
        cache.insert(tile(0, 3));
        cache.begin_new_generation();

        assert!(cache.promote_if_present(&key(0), 11));
        assert_eq!(cache.stats().active, 1);
        assert_eq!(cache.stats().passive, 0);

        // Already active: stays put, rank untouched
        assert!(cache.promote_if_present(&key(0), 42));
        assert_eq!(cache.snapshot_for_draw()[0].rank(), 11);

        assert!(!cache.promote_if_present(&key(1), 0));
    }

    #[test]
    fn snapshot_lists_passive_before_active() {
        let mut cache = TileCache::new(10, 2);
        cache.insert(tile(0, 0));
        cache.begin_new_generation();
        cache.insert(tile(1, 0));

        assert_eq!(cached_keys(&cache), vec![key(0), key(1)]);
    }

    #[test]
    fn thumbnails_use_fifo_pool() {
        let mut cache = TileCache::new(2, 2);
        cache.insert(thumbnail(0));
        cache.insert(thumbnail(1));
        assert_eq!(
            cache.insert(thumbnail(2)),
            InsertOutcome::Inserted { evicted: 1 }
        );

        let pages: Vec<usize> = cache.thumbnails().map(|t| t.key().user_page).collect();
        assert_eq!(pages, vec![1, 2]);
        assert!(!cache.contains_thumbnail(thumbnail(0).key()));
        assert!(cache.contains_thumbnail(thumbnail(2).key()));
        assert_eq!(cache.len(), 0, "thumbnails do not count as tiles");
    }

    #[test]
    fn lookups_follow_eviction_and_promotion() {
        let mut cache = TileCache::new(2, 1);
        cache.insert(tile(0, 5));
        cache.insert(tile(1, 6));
        cache.begin_new_generation();

        // Promoted tile leaves the passive index and joins the active one
        assert!(cache.promote_if_present(&key(1), 0));
        assert!(cache.promote_if_present(&key(1), 1));

        // Evicts the remaining passive tile; its key is gone from the index
        cache.insert(tile(2, 2));
        assert!(!cache.promote_if_present(&key(0), 3));
        assert_eq!(cached_keys(&cache), vec![key(1), key(2)]);

        // Negative zero is the same identity as zero
        let mut signed = key(3);
        signed.bounds.top = -0.0;
        cache.insert(Tile::new(signed, false, 4, Bitmap::new(1, 1)));
        assert!(cache.promote_if_present(&key(3), 4));
    }

    #[test]
    fn clear_is_idempotent() {
        let mut cache = TileCache::new(4, 2);
        cache.insert(tile(0, 0));
        cache.insert(thumbnail(0));
        cache.clear();
        assert!(cache.is_empty());
        cache.clear();
        assert!(cache.is_empty());
    }
}

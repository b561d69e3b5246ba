use hashbrown::{HashMap, HashSet};
use std::collections::BTreeMap;
use stratum_blocks::{Block, FloatingObject, ObjectId, TilePayload, VariantRules};
use stratum_geom::{CellBox, CellPos, OrientationTransform, chunk_of};

use crate::access::{ClientId, WorldAccess};

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryWorldStats {
    pub chunk_entries: usize,
    pub voxel_writes: u64,
    pub neighbor_notifications: u64,
    pub light_recomputes: u64,
    pub resends_queued: u64,
    pub settle_ticks: u64,
}

/// Chunk-keyed in-memory world. Cells that were never written read as air.
pub struct MemoryWorld {
    y_min: i32,
    y_max: i32,
    // key=(cx,cz) -> world coords -> Block
    inner: HashMap<(i32, i32), HashMap<CellPos, Block>>,
    light: HashMap<CellPos, u8>,
    tiles: HashMap<CellPos, TilePayload>,
    objects: BTreeMap<ObjectId, FloatingObject>,
    next_object: ObjectId,
    rules: VariantRules,
    unloaded: HashSet<(i32, i32)>,
    refused: HashSet<CellPos>,
    clients: Vec<ClientId>,
    resend_queue: Vec<((i32, i32), Vec<ClientId>)>,
    stats: MemoryWorldStats,
}

impl MemoryWorld {
    pub fn new(y_min: i32, y_max: i32) -> Self {
        assert!(y_min < y_max, "empty vertical range");
        Self {
            y_min,
            y_max,
            inner: HashMap::new(),
            light: HashMap::new(),
            tiles: HashMap::new(),
            objects: BTreeMap::new(),
            next_object: 1,
            rules: VariantRules::new(),
            unloaded: HashSet::new(),
            refused: HashSet::new(),
            clients: Vec::new(),
            resend_queue: Vec::new(),
            stats: MemoryWorldStats::default(),
        }
    }

    pub fn with_variant_rules(mut self, rules: VariantRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn add_client(&mut self, client: ClientId) {
        if !self.clients.contains(&client) {
            self.clients.push(client);
        }
    }

    pub fn unload_chunk(&mut self, cx: i32, cz: i32) {
        self.unloaded.insert((cx, cz));
    }

    /// Make `set_voxel` at `p` fail, as a host would for a protected cell.
    pub fn refuse_writes_at(&mut self, p: CellPos) {
        self.refused.insert(p);
    }

    pub fn stats(&self) -> MemoryWorldStats {
        MemoryWorldStats {
            chunk_entries: self.inner.len(),
            ..self.stats
        }
    }

    /// Fill every cell of `bounds` with `f(pos)`, bypassing change tracking.
    pub fn fill_box(&mut self, bounds: &CellBox, f: impl Fn(CellPos) -> Block) {
        for y in bounds.min.y..=bounds.max.y {
            for z in bounds.min.z..=bounds.max.z {
                for x in bounds.min.x..=bounds.max.x {
                    let p = CellPos::new(x, y, z);
                    self.put(p, f(p));
                }
            }
        }
    }

    pub fn objects(&self) -> impl Iterator<Item = &FloatingObject> {
        self.objects.values()
    }

    pub fn take_resend_queue(&mut self) -> Vec<((i32, i32), Vec<ClientId>)> {
        std::mem::take(&mut self.resend_queue)
    }

    #[inline]
    fn chunk_key(p: CellPos) -> (i32, i32) {
        (chunk_of(p.x), chunk_of(p.z))
    }

    fn put(&mut self, p: CellPos, b: Block) {
        let k = Self::chunk_key(p);
        if b.is_air() {
            if let Some(m) = self.inner.get_mut(&k) {
                m.remove(&p);
                if m.is_empty() {
                    self.inner.remove(&k);
                }
            }
        } else {
            self.inner.entry(k).or_default().insert(p, b);
        }
    }

    fn in_vertical_range(&self, y: i32) -> bool {
        y >= self.y_min && y < self.y_max
    }
}

impl WorldAccess for MemoryWorld {
    fn vertical_range(&self) -> (i32, i32) {
        (self.y_min, self.y_max)
    }

    fn is_column_loaded(&self, x: i32, z: i32) -> bool {
        !self.unloaded.contains(&(chunk_of(x), chunk_of(z)))
    }

    fn voxel(&self, p: CellPos) -> Block {
        self.inner
            .get(&Self::chunk_key(p))
            .and_then(|m| m.get(&p).copied())
            .unwrap_or(Block::AIR)
    }

    fn set_voxel(&mut self, p: CellPos, block: Block) -> bool {
        if !self.in_vertical_range(p.y) || self.refused.contains(&p) {
            return false;
        }
        self.put(p, block);
        self.stats.voxel_writes += 1;
        true
    }

    fn tile_payload(&self, p: CellPos) -> Option<TilePayload> {
        self.tiles.get(&p).cloned()
    }

    fn set_tile_payload(&mut self, p: CellPos, payload: Option<TilePayload>) {
        match payload {
            Some(t) => {
                self.tiles.insert(p, t);
            }
            None => {
                self.tiles.remove(&p);
            }
        }
    }

    fn light(&self, p: CellPos) -> u8 {
        self.light.get(&p).copied().unwrap_or(0)
    }

    fn set_light(&mut self, p: CellPos, light: u8) {
        if light == 0 {
            self.light.remove(&p);
        } else {
            self.light.insert(p, light);
        }
    }

    fn floating_objects_in_box(&self, bounds: &CellBox) -> Vec<FloatingObject> {
        self.objects
            .values()
            .filter(|o| bounds.contains(o.anchor))
            .cloned()
            .collect()
    }

    fn remove_floating_object(&mut self, id: ObjectId) -> bool {
        self.objects.remove(&id).is_some()
    }

    fn spawn_floating_object(&mut self, object: FloatingObject) -> Option<ObjectId> {
        // one object per anchor and facing
        let occupied = self
            .objects
            .values()
            .any(|o| o.anchor == object.anchor && o.facing == object.facing);
        if occupied || !self.in_vertical_range(object.anchor.y) {
            log::debug!("spawn refused at {:?}", object.anchor);
            return None;
        }
        let id = self.next_object;
        self.next_object += 1;
        self.objects.insert(
            id,
            FloatingObject {
                id: Some(id),
                ..object
            },
        );
        Some(id)
    }

    fn notify_neighbors_changed(&mut self, _p: CellPos) {
        self.stats.neighbor_notifications += 1;
    }

    fn recompute_derived_lighting(&mut self, _chunk_x: i32, _chunk_z: i32) {
        self.stats.light_recomputes += 1;
    }

    fn interested_clients(&self, _chunk_x: i32, _chunk_z: i32) -> Vec<ClientId> {
        self.clients.clone()
    }

    fn queue_chunk_resend(&mut self, chunk_x: i32, chunk_z: i32, clients: &[ClientId]) {
        self.stats.resends_queued += 1;
        self.resend_queue.push(((chunk_x, chunk_z), clients.to_vec()));
    }

    fn settle_tick(&mut self, _p: CellPos, _block: Block) {
        self.stats.settle_ticks += 1;
    }

    fn orient_variant(&self, block: Block, transform: &OrientationTransform) -> Block {
        self.rules.apply(block, transform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_geom::Facing;

    fn make_world() -> MemoryWorld {
        MemoryWorld::new(0, 256)
    }

    #[test]
    fn unwritten_cells_read_as_air() {
        let mut w = make_world();
        let p = CellPos::new(-40, 12, 99);
        assert_eq!(w.voxel(p), Block::AIR);
        assert!(w.set_voxel(p, Block::new(3, 1)));
        assert_eq!(w.voxel(p), Block::new(3, 1));
        assert!(w.set_voxel(p, Block::AIR));
        assert_eq!(w.stats().chunk_entries, 0);
    }

    #[test]
    fn writes_outside_vertical_range_are_refused() {
        let mut w = make_world();
        assert!(!w.set_voxel(CellPos::new(0, 256, 0), Block::new(1, 0)));
        assert!(!w.set_voxel(CellPos::new(0, -1, 0), Block::new(1, 0)));
        w.refuse_writes_at(CellPos::new(1, 1, 1));
        assert!(!w.set_voxel(CellPos::new(1, 1, 1), Block::new(1, 0)));
        assert_eq!(w.stats().voxel_writes, 0);
    }

    #[test]
    fn objects_are_found_by_anchor() {
        let mut w = make_world();
        let id = w
            .spawn_floating_object(FloatingObject::new(CellPos::new(2, 2, 2), Facing::South, 1, vec![7]))
            .unwrap();
        // same anchor and facing is occupied
        assert!(w
            .spawn_floating_object(FloatingObject::new(CellPos::new(2, 2, 2), Facing::South, 1, vec![8]))
            .is_none());
        let found = w.floating_objects_in_box(&CellBox::new(CellPos::new(0, 0, 0), CellPos::new(3, 3, 3)));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, Some(id));
        assert!(w.remove_floating_object(id));
        assert_eq!(w.objects().count(), 0);
    }

    #[test]
    fn unloaded_chunks_are_reported() {
        let mut w = make_world();
        w.unload_chunk(1, 0);
        assert!(w.is_column_loaded(15, 0));
        assert!(!w.is_column_loaded(16, 15));
    }
}

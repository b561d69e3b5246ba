use hashbrown::HashMap;
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;
use stratum_blocks::{Block, BlockId, FloatingObject, TilePayload, Variant};
use stratum_geom::{CellPos, OrientationTransform};
use stratum_mask::VoxelMask;
use stratum_task::run_to_completion;
use stratum_world::WorldAccess;

use crate::read::FragmentRead;
use crate::store::VoxelStore;
use crate::write::FragmentWrite;

#[derive(Debug)]
pub(crate) struct FragmentData {
    pub(crate) voxels: VoxelStore,
    pub(crate) tiles: HashMap<usize, TilePayload>,
    // anchors are fragment-local
    pub(crate) objects: HashMap<usize, Vec<FloatingObject>>,
    pub(crate) stored: VoxelMask,
}

impl FragmentData {
    fn empty(x: usize, y: usize, z: usize) -> Self {
        Self {
            voxels: VoxelStore::sparse(),
            tiles: HashMap::new(),
            objects: HashMap::new(),
            stored: VoxelMask::new(x, y, z),
        }
    }
}

/// Captured attributes of a cuboid of voxels. Only cells set in the stored mask
/// hold valid data; reading any other cell is a caller bug and panics.
///
/// The attribute stores sit behind a shared handle. [`shallow_copy`](Self::shallow_copy)
/// yields another handle onto the same stores, so writes through either are seen by
/// both; [`deep_copy`](Self::deep_copy) yields an independent fragment.
#[derive(Debug)]
pub struct RegionFragment {
    x_count: usize,
    y_count: usize,
    z_count: usize,
    data: Rc<RefCell<FragmentData>>,
}

impl RegionFragment {
    pub fn new(x_count: usize, y_count: usize, z_count: usize) -> Self {
        assert!(
            VoxelMask::is_valid_size(x_count, y_count, z_count),
            "invalid fragment size [{x_count}, {y_count}, {z_count}]"
        );
        Self {
            x_count,
            y_count,
            z_count,
            data: Rc::new(RefCell::new(FragmentData::empty(x_count, y_count, z_count))),
        }
    }

    /// Another handle onto the same attribute stores.
    pub fn shallow_copy(&self) -> RegionFragment {
        RegionFragment {
            x_count: self.x_count,
            y_count: self.y_count,
            z_count: self.z_count,
            data: Rc::clone(&self.data),
        }
    }

    pub fn deep_copy(&self) -> RegionFragment {
        let d = self.data.borrow();
        RegionFragment {
            x_count: self.x_count,
            y_count: self.y_count,
            z_count: self.z_count,
            data: Rc::new(RefCell::new(FragmentData {
                voxels: d.voxels.clone(),
                tiles: d.tiles.clone(),
                objects: d.objects.clone(),
                stored: d.stored.clone(),
            })),
        }
    }

    /// True when other handles share these stores.
    pub fn is_shared(&self) -> bool {
        Rc::strong_count(&self.data) > 1
    }

    pub fn shares_storage_with(&self, other: &RegionFragment) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }

    #[inline]
    pub fn size(&self) -> (usize, usize, usize) {
        (self.x_count, self.y_count, self.z_count)
    }

    #[inline]
    pub fn x_count(&self) -> usize {
        self.x_count
    }

    #[inline]
    pub fn y_count(&self) -> usize {
        self.y_count
    }

    #[inline]
    pub fn z_count(&self) -> usize {
        self.z_count
    }

    pub fn is_dense(&self) -> bool {
        self.data.borrow().voxels.is_dense()
    }

    pub fn stored_mask(&self) -> Ref<'_, VoxelMask> {
        Ref::map(self.data.borrow(), |d| &d.stored)
    }

    /// Out-of-range cells are simply not stored.
    pub fn is_stored(&self, x: i32, y: i32, z: i32) -> bool {
        self.data.borrow().stored.get(x, y, z)
    }

    pub(crate) fn data(&self) -> Ref<'_, FragmentData> {
        self.data.borrow()
    }

    pub(crate) fn data_mut(&self) -> RefMut<'_, FragmentData> {
        self.data.borrow_mut()
    }

    #[inline]
    pub(crate) fn offset(&self, x: usize, y: usize, z: usize) -> usize {
        assert!(
            x < self.x_count && y < self.y_count && z < self.z_count,
            "voxel [{x}, {y}, {z}] outside fragment [{}, {}, {}]",
            self.x_count,
            self.y_count,
            self.z_count
        );
        (y * self.z_count + z) * self.x_count + x
    }

    fn stored_offset(&self, d: &FragmentData, x: usize, y: usize, z: usize) -> usize {
        let idx = self.offset(x, y, z);
        assert!(
            d.stored.get(x as i32, y as i32, z as i32),
            "voxel [{x}, {y}, {z}] has no stored data"
        );
        idx
    }

    pub fn block(&self, x: usize, y: usize, z: usize) -> Block {
        let d = self.data.borrow();
        let idx = self.stored_offset(&d, x, y, z);
        d.voxels.block(idx)
    }

    pub fn block_type(&self, x: usize, y: usize, z: usize) -> BlockId {
        self.block(x, y, z).id
    }

    pub fn variant(&self, x: usize, y: usize, z: usize) -> Variant {
        self.block(x, y, z).variant
    }

    pub fn light(&self, x: usize, y: usize, z: usize) -> u8 {
        let d = self.data.borrow();
        let idx = self.stored_offset(&d, x, y, z);
        d.voxels.light(idx)
    }

    pub fn tile_payload(&self, x: usize, y: usize, z: usize) -> Option<TilePayload> {
        let d = self.data.borrow();
        let idx = self.stored_offset(&d, x, y, z);
        d.tiles.get(&idx).cloned()
    }

    /// Objects anchored in this cell, anchors in fragment-local coordinates.
    pub fn floating_objects_at(&self, x: usize, y: usize, z: usize) -> Vec<FloatingObject> {
        let d = self.data.borrow();
        let idx = self.stored_offset(&d, x, y, z);
        d.objects.get(&idx).cloned().unwrap_or_default()
    }

    /// Sets type and variant and marks the cell stored.
    pub fn set_block(&mut self, x: usize, y: usize, z: usize, block: Block) {
        let idx = self.offset(x, y, z);
        let mut d = self.data.borrow_mut();
        d.voxels.set_block(idx, block);
        d.stored.set(x as i32, y as i32, z as i32);
    }

    pub fn set_block_type(&mut self, x: usize, y: usize, z: usize, id: BlockId) {
        let idx = self.offset(x, y, z);
        let current = self.data.borrow().voxels.block(idx);
        self.set_block(x, y, z, Block::new(id, current.variant));
    }

    pub fn set_variant(&mut self, x: usize, y: usize, z: usize, variant: Variant) {
        let idx = self.offset(x, y, z);
        let current = self.data.borrow().voxels.block(idx);
        self.set_block(x, y, z, Block::new(current.id, variant));
    }

    pub fn set_light(&mut self, x: usize, y: usize, z: usize, light: u8) {
        let idx = self.offset(x, y, z);
        self.data.borrow_mut().voxels.set_light(idx, light);
    }

    pub fn set_tile_payload(&mut self, x: usize, y: usize, z: usize, payload: Option<TilePayload>) {
        let idx = self.offset(x, y, z);
        let mut d = self.data.borrow_mut();
        match payload {
            Some(t) => {
                d.tiles.insert(idx, t);
            }
            None => {
                d.tiles.remove(&idx);
            }
        }
    }

    /// Attach an object to the cell at its (fragment-local) anchor.
    pub fn add_floating_object(&mut self, object: FloatingObject) {
        let a = object.anchor;
        assert!(a.x >= 0 && a.y >= 0 && a.z >= 0, "object anchor {a:?} outside fragment");
        let idx = self.offset(a.x as usize, a.y as usize, a.z as usize);
        self.data
            .borrow_mut()
            .objects
            .entry(idx)
            .or_default()
            .push(object.detached());
    }

    /// Every stored object, anchors in fragment-local coordinates.
    pub fn all_floating_objects(&self) -> Vec<FloatingObject> {
        let d = self.data.borrow();
        let mut out: Vec<(usize, FloatingObject)> = d
            .objects
            .iter()
            .flat_map(|(idx, list)| list.iter().map(move |o| (*idx, o.clone())))
            .collect();
        out.sort_by_key(|(idx, _)| *idx);
        out.into_iter().map(|(_, o)| o).collect()
    }

    /// Forget all stored data and switch to the requested backing.
    pub(crate) fn reset(&self, dense: bool) {
        let mut d = self.data.borrow_mut();
        d.voxels = if dense {
            VoxelStore::dense(self.x_count * self.y_count * self.z_count)
        } else {
            VoxelStore::sparse()
        };
        d.tiles.clear();
        d.objects.clear();
        d.stored.clear_all();
    }

    /// Type, variant, and tile payload agree at (x, y, z) in both fragments.
    /// Payload positions are ignored.
    pub fn does_voxel_match(&self, other: &RegionFragment, x: usize, y: usize, z: usize) -> bool {
        if self.block(x, y, z) != other.block(x, y, z) {
            return false;
        }
        match (self.tile_payload(x, y, z), other.tile_payload(x, y, z)) {
            (None, None) => true,
            (Some(a), Some(b)) => a.same_content(&b),
            _ => false,
        }
    }

    /// Copy type, variant, light, tile payload, and floating objects from a cell of
    /// `src` into a cell of this fragment, replacing whatever was there.
    pub fn copy_voxel_contents(
        &mut self,
        dest: (usize, usize, usize),
        src: &RegionFragment,
        from: (usize, usize, usize),
    ) {
        let (block, light, tile, objects) = {
            let (x, y, z) = from;
            (
                src.block(x, y, z),
                src.light(x, y, z),
                src.tile_payload(x, y, z),
                src.floating_objects_at(x, y, z),
            )
        };
        let (x, y, z) = dest;
        let shift = CellPos::new(x as i32, y as i32, z as i32)
            - CellPos::new(from.0 as i32, from.1 as i32, from.2 as i32);
        self.set_block(x, y, z, block);
        self.set_light(x, y, z, light);
        self.set_tile_payload(x, y, z, tile);
        let idx = self.offset(x, y, z);
        let moved: Vec<FloatingObject> = objects
            .into_iter()
            .map(|o| FloatingObject {
                anchor: o.anchor + shift,
                ..o
            })
            .collect();
        let mut d = self.data.borrow_mut();
        if moved.is_empty() {
            d.objects.remove(&idx);
        } else {
            d.objects.insert(idx, moved);
        }
    }

    /// Staged read of `world` starting at `origin`. `None` selects every cell.
    pub fn read_from_world_async(&self, origin: CellPos, selection: Option<VoxelMask>) -> FragmentRead {
        FragmentRead::new(self.shallow_copy(), origin, selection)
    }

    /// Read in a single call.
    pub fn read_from_world<W: WorldAccess + ?Sized>(
        &mut self,
        world: &mut W,
        origin: CellPos,
        selection: Option<&VoxelMask>,
    ) {
        let mut task = self.read_from_world_async(origin, selection.cloned());
        run_to_completion(&mut task, world);
    }

    /// Staged write into `world` with local (0,0,0) placed at `origin` after
    /// `transform`. `None` writes every stored cell.
    pub fn write_to_world_async(
        &self,
        origin: CellPos,
        write_mask: Option<VoxelMask>,
        transform: OrientationTransform,
    ) -> FragmentWrite {
        FragmentWrite::new(self.shallow_copy(), origin, write_mask, transform)
    }

    /// Write in a single call.
    pub fn write_to_world<W: WorldAccess + ?Sized>(
        &self,
        world: &mut W,
        origin: CellPos,
        write_mask: Option<&VoxelMask>,
        transform: OrientationTransform,
    ) {
        let mut task = self.write_to_world_async(origin, write_mask.cloned(), transform);
        run_to_completion(&mut task, world);
    }

    /// Identity transform over this fragment's footprint.
    pub fn identity_transform(&self) -> OrientationTransform {
        OrientationTransform::identity(self.x_count, self.z_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_geom::Facing;

    #[test]
    fn offsets_are_y_major() {
        let f = RegionFragment::new(3, 4, 5);
        assert_eq!(f.offset(0, 0, 0), 0);
        assert_eq!(f.offset(1, 0, 0), 1);
        assert_eq!(f.offset(0, 0, 1), 3);
        assert_eq!(f.offset(0, 1, 0), 15);
    }

    #[test]
    #[should_panic(expected = "no stored data")]
    fn reading_unstored_voxel_panics() {
        let f = RegionFragment::new(2, 2, 2);
        let _ = f.block(1, 1, 1);
    }

    #[test]
    fn shallow_copies_share_writes() {
        let mut a = RegionFragment::new(2, 2, 2);
        let b = a.shallow_copy();
        a.set_block(1, 0, 1, Block::new(5, 2));
        assert!(b.is_shared());
        assert_eq!(b.block(1, 0, 1), Block::new(5, 2));

        let mut c = a.deep_copy();
        c.set_block(1, 0, 1, Block::new(6, 0));
        assert_eq!(a.block(1, 0, 1), Block::new(5, 2));
        assert!(!c.shares_storage_with(&a));
    }

    #[test]
    fn copy_between_cells_moves_objects_with_the_cell() {
        let mut src = RegionFragment::new(3, 1, 3);
        src.set_block(0, 0, 0, Block::new(7, 1));
        src.set_tile_payload(0, 0, 0, Some(TilePayload::new(CellPos::ZERO, vec![1, 2])));
        src.add_floating_object(FloatingObject::new(CellPos::new(0, 0, 0), Facing::East, 1, vec![3]));
        let mut dest = RegionFragment::new(3, 1, 3);
        dest.copy_voxel_contents((2, 0, 1), &src, (0, 0, 0));
        assert_eq!(dest.block(2, 0, 1), Block::new(7, 1));
        assert!(dest.does_voxel_match(&dest, 2, 0, 1));
        let objs = dest.floating_objects_at(2, 0, 1);
        assert_eq!(objs.len(), 1);
        assert_eq!(objs[0].anchor, CellPos::new(2, 0, 1));
    }

    #[test]
    fn copy_within_one_shared_store_does_not_double_borrow() {
        let mut a = RegionFragment::new(2, 1, 1);
        a.set_block(0, 0, 0, Block::new(9, 0));
        let view = a.shallow_copy();
        a.copy_voxel_contents((1, 0, 0), &view, (0, 0, 0));
        assert_eq!(view.block(1, 0, 0), Block::new(9, 0));
    }

    #[test]
    fn voxel_match_ignores_payload_position() {
        let mut a = RegionFragment::new(1, 1, 1);
        let mut b = RegionFragment::new(1, 1, 1);
        a.set_block(0, 0, 0, Block::new(54, 2));
        b.set_block(0, 0, 0, Block::new(54, 2));
        a.set_tile_payload(0, 0, 0, Some(TilePayload::new(CellPos::new(1, 2, 3), vec![4])));
        b.set_tile_payload(0, 0, 0, Some(TilePayload::new(CellPos::new(9, 9, 9), vec![4])));
        assert!(a.does_voxel_match(&b, 0, 0, 0));
        b.set_tile_payload(0, 0, 0, None);
        assert!(!a.does_voxel_match(&b, 0, 0, 0));
    }
}

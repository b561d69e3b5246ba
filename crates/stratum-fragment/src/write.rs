use hashbrown::HashSet;
use stratum_blocks::FloatingObject;
use stratum_geom::{CellBox, CellPos, OrientationTransform};
use stratum_mask::VoxelMask;
use stratum_task::{ColumnCursor, InterruptAt, Stage, StagedTask, TaskCore, overall_fraction};
use stratum_world::WorldAccess;

use crate::fragment::RegionFragment;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteStage {
    Setup,
    WriteVoxels(ColumnCursor),
    RecomputeDerived(usize),
    Propagate(ColumnCursor),
    SpawnFloatingObjects,
    SettleTick(ColumnCursor),
    Complete,
}

impl Stage for WriteStage {
    fn ordinal(&self) -> usize {
        match self {
            WriteStage::Setup => 0,
            WriteStage::WriteVoxels(_) => 1,
            WriteStage::RecomputeDerived(_) => 2,
            WriteStage::Propagate(_) => 3,
            WriteStage::SpawnFloatingObjects => 4,
            WriteStage::SettleTick(_) => 5,
            WriteStage::Complete => 6,
        }
    }

    fn weights() -> &'static [f64] {
        &[0.1, 0.3, 0.1, 0.2, 0.2, 0.1, 0.0]
    }

    fn is_terminal(&self) -> bool {
        matches!(self, WriteStage::Complete)
    }
}

/// Staged copy of a [`RegionFragment`] into the world under an orientation.
///
/// Aborting does not stop the write half way: the remaining stages still run so
/// lighting, notifications, and objects match whatever voxels were placed. Only the
/// settle tick is skipped.
pub struct FragmentWrite {
    fragment: RegionFragment,
    origin: CellPos,
    requested_mask: Option<VoxelMask>,
    mask: VoxelMask,
    transform: OrientationTransform,
    stage: WriteStage,
    core: TaskCore,
    y_lo: usize,
    y_hi: usize,
    touched: Vec<(i32, i32)>,
}

impl FragmentWrite {
    pub(crate) fn new(
        fragment: RegionFragment,
        origin: CellPos,
        write_mask: Option<VoxelMask>,
        transform: OrientationTransform,
    ) -> Self {
        assert_eq!(
            transform.footprint(),
            (fragment.x_count(), fragment.z_count()),
            "transform footprint must match the fragment"
        );
        Self {
            fragment,
            origin,
            requested_mask: write_mask,
            mask: VoxelMask::new(1, 1, 1),
            transform,
            stage: WriteStage::Setup,
            core: TaskCore::new(),
            y_lo: 0,
            y_hi: 0,
            touched: Vec::new(),
        }
    }

    pub fn stage(&self) -> WriteStage {
        self.stage
    }

    pub fn set_interrupt(&mut self, when: InterruptAt) {
        self.core.set_interrupt(when);
    }

    pub fn is_complete(&self) -> bool {
        self.stage.is_terminal()
    }

    pub fn is_aborted(&self) -> bool {
        self.core.is_aborting() && self.is_complete()
    }

    pub fn fraction_complete(&self) -> f64 {
        overall_fraction(&self.stage, self.core.stage_fraction())
    }

    pub fn abort(&mut self) {
        if !self.is_complete() {
            log::debug!(target: "fragment", "write at {:?} aborting at {:?}", self.origin, self.stage);
        }
        self.core.request_abort();
    }

    fn enter(&mut self, stage: WriteStage) {
        log::trace!(target: "fragment", "write at {:?}: {:?} -> {:?}", self.origin, self.stage, stage);
        self.stage = stage;
        self.core.enter_stage();
    }

    #[inline]
    fn world_pos(&self, x: usize, y: usize, z: usize) -> CellPos {
        let (mx, mz) = self.transform.map_xz(x as i32, z as i32);
        self.origin.offset(mx, y as i32, mz)
    }

    fn destination_box(&self) -> CellBox {
        let (w, d) = self.transform.oriented_footprint();
        CellBox::from_origin_size(self.origin, (w, self.fragment.y_count(), d))
    }

    fn setup<W: WorldAccess + ?Sized>(&mut self, world: &mut W) {
        let stored = self.fragment.stored_mask().clone();
        let mask = match self.requested_mask.take() {
            Some(m) => {
                assert_eq!(m.size(), stored.size(), "write mask size must match the fragment");
                assert!(stored.contains_all(&m), "write mask covers voxels the fragment never stored");
                m
            }
            None => stored,
        };
        self.mask = mask;
        let (y_min, y_max) = world.vertical_range();
        let y_count = self.fragment.y_count() as i32;
        self.y_lo = (y_min - self.origin.y).clamp(0, y_count) as usize;
        self.y_hi = (y_max - self.origin.y).clamp(0, y_count) as usize;

        let mut removed = 0usize;
        for obj in world.floating_objects_in_box(&self.destination_box()) {
            let rel = obj.anchor - self.origin;
            let (lx, lz) = self.transform.inverse_xz(rel.x, rel.z);
            if !self.mask.get(lx, rel.y, lz) {
                continue;
            }
            if let Some(id) = obj.id {
                if world.remove_floating_object(id) {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            log::debug!(target: "fragment", "removed {} floating objects before write at {:?}", removed, self.origin);
        }
        self.enter(WriteStage::WriteVoxels(ColumnCursor::default()));
    }

    fn write_voxels<W: WorldAccess + ?Sized>(&mut self, world: &mut W, mut cursor: ColumnCursor) -> bool {
        let (x_count, _, z_count) = self.fragment.size();
        let mut touched: HashSet<(i32, i32)> = self.touched.iter().copied().collect();
        let mut refused = 0usize;
        while let Some((x, z)) = cursor.next_column(x_count, z_count) {
            for y in self.y_lo..self.y_hi {
                if !self.mask.get(x as i32, y as i32, z as i32) {
                    continue;
                }
                let p = self.world_pos(x, y, z);
                let block = world.orient_variant(self.fragment.block(x, y, z), &self.transform);
                if !world.set_voxel(p, block) {
                    // the old voxel stays, so its tile and light stay with it
                    refused += 1;
                    continue;
                }
                let tile = self.fragment.tile_payload(x, y, z).map(|t| t.relocated(p));
                world.set_tile_payload(p, tile);
                world.set_light(p, self.fragment.light(x, y, z));
                if touched.insert(p.chunk_xz()) {
                    self.touched.push(p.chunk_xz());
                }
            }
            if self.core.is_time_to_interrupt() {
                self.log_refused(refused);
                self.core.set_stage_fraction(cursor.fraction(x_count, z_count));
                self.stage = WriteStage::WriteVoxels(cursor);
                return false;
            }
        }
        self.log_refused(refused);
        self.touched.sort_unstable();
        self.enter(WriteStage::RecomputeDerived(0));
        true
    }

    fn log_refused(&self, refused: usize) {
        if refused > 0 {
            log::warn!(target: "fragment", "host refused {} voxel writes near {:?}", refused, self.origin);
        }
    }

    fn recompute_derived<W: WorldAccess + ?Sized>(&mut self, world: &mut W, mut next: usize) -> bool {
        while next < self.touched.len() {
            let (cx, cz) = self.touched[next];
            world.recompute_derived_lighting(cx, cz);
            next += 1;
            if self.core.is_time_to_interrupt() && next < self.touched.len() {
                self.core.set_stage_fraction(next as f64 / self.touched.len() as f64);
                self.stage = WriteStage::RecomputeDerived(next);
                return false;
            }
        }
        self.enter(WriteStage::Propagate(ColumnCursor::default()));
        true
    }

    fn propagate<W: WorldAccess + ?Sized>(&mut self, world: &mut W, mut cursor: ColumnCursor) -> bool {
        let (x_count, _, z_count) = self.fragment.size();
        while let Some((x, z)) = cursor.next_column(x_count, z_count) {
            for y in self.y_lo..self.y_hi {
                if self.mask.get(x as i32, y as i32, z as i32) {
                    world.notify_neighbors_changed(self.world_pos(x, y, z));
                }
            }
            if self.core.is_time_to_interrupt() {
                self.core.set_stage_fraction(cursor.fraction(x_count, z_count));
                self.stage = WriteStage::Propagate(cursor);
                return false;
            }
        }
        for &(cx, cz) in &self.touched {
            let clients = world.interested_clients(cx, cz);
            world.queue_chunk_resend(cx, cz, &clients);
        }
        self.enter(WriteStage::SpawnFloatingObjects);
        true
    }

    /// Place `obj` (fragment-local anchor) at its oriented world position. A mirrored
    /// wide object keeps covering the same cells, so its anchor moves to the far end.
    fn oriented_object(&self, obj: &FloatingObject) -> FloatingObject {
        let a = obj.anchor;
        let facing = self.transform.map_facing(obj.facing);
        let (mx, mz) = self.transform.map_xz(a.x, a.z);
        let mut anchor = self.origin.offset(mx, a.y, mz);
        if self.transform.is_mirrored() && obj.width > 1 {
            let (dx, dz) = facing.rotated_cw(1).step();
            let span = i32::from(obj.width) - 1;
            anchor = anchor.offset(-dx * span, 0, -dz * span);
        }
        FloatingObject {
            id: None,
            anchor,
            facing,
            width: obj.width,
            payload: obj.payload.clone(),
        }
    }

    fn spawn_objects<W: WorldAccess + ?Sized>(&mut self, world: &mut W) {
        for obj in self.fragment.all_floating_objects() {
            if !self.mask.get_at(obj.anchor) {
                continue;
            }
            let placed = self.oriented_object(&obj);
            let at = placed.anchor;
            if world.spawn_floating_object(placed).is_none() {
                log::warn!(target: "fragment", "could not place floating object at {:?}", at);
            }
        }
        self.enter(WriteStage::SettleTick(ColumnCursor::default()));
    }

    fn settle<W: WorldAccess + ?Sized>(&mut self, world: &mut W, mut cursor: ColumnCursor) -> bool {
        if self.core.is_aborting() {
            self.enter(WriteStage::Complete);
            return true;
        }
        let (x_count, _, z_count) = self.fragment.size();
        while let Some((x, z)) = cursor.next_column(x_count, z_count) {
            for y in self.y_lo..self.y_hi {
                if !self.mask.get(x as i32, y as i32, z as i32) {
                    continue;
                }
                let p = self.world_pos(x, y, z);
                let block = world.voxel(p);
                if !block.is_air() {
                    world.settle_tick(p, block);
                }
            }
            if self.core.is_time_to_interrupt() {
                self.core.set_stage_fraction(cursor.fraction(x_count, z_count));
                self.stage = WriteStage::SettleTick(cursor);
                return false;
            }
        }
        self.enter(WriteStage::Complete);
        true
    }

    fn run<W: WorldAccess + ?Sized>(&mut self, world: &mut W) {
        loop {
            let finished_stage = match self.stage {
                WriteStage::Setup => {
                    self.setup(world);
                    true
                }
                WriteStage::WriteVoxels(c) => self.write_voxels(world, c),
                WriteStage::RecomputeDerived(i) => self.recompute_derived(world, i),
                WriteStage::Propagate(c) => self.propagate(world, c),
                WriteStage::SpawnFloatingObjects => {
                    self.spawn_objects(world);
                    true
                }
                WriteStage::SettleTick(c) => self.settle(world, c),
                WriteStage::Complete => return,
            };
            if !finished_stage || self.core.is_time_to_interrupt() {
                return;
            }
        }
    }
}

impl<W: WorldAccess + ?Sized> StagedTask<W> for FragmentWrite {
    fn set_interrupt(&mut self, when: InterruptAt) {
        FragmentWrite::set_interrupt(self, when);
    }

    fn continue_processing(&mut self, world: &mut W) {
        self.run(world);
    }

    fn abort_processing(&mut self) {
        self.abort();
    }

    fn fraction_complete(&self) -> f64 {
        FragmentWrite::fraction_complete(self)
    }

    fn is_complete(&self) -> bool {
        FragmentWrite::is_complete(self)
    }

    fn is_aborted(&self) -> bool {
        FragmentWrite::is_aborted(self)
    }
}

use stratum_blocks::FloatingObject;
use stratum_geom::{CellBox, CellPos};
use stratum_mask::VoxelMask;
use stratum_task::{ColumnCursor, InterruptAt, Stage, StagedTask, TaskCore, overall_fraction};
use stratum_world::WorldAccess;

use crate::DENSE_FILL_THRESHOLD;
use crate::fragment::RegionFragment;

/// Objects this far outside the fragment may still be anchored inside it.
const OBJECT_SEARCH_MARGIN: i32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadStage {
    Setup,
    BulkCopy(ColumnCursor),
    FloatingObjects,
    Complete,
}

impl Stage for ReadStage {
    fn ordinal(&self) -> usize {
        match self {
            ReadStage::Setup => 0,
            ReadStage::BulkCopy(_) => 1,
            ReadStage::FloatingObjects => 2,
            ReadStage::Complete => 3,
        }
    }

    fn weights() -> &'static [f64] {
        &[0.1, 0.7, 0.2, 0.0]
    }

    fn is_terminal(&self) -> bool {
        matches!(self, ReadStage::Complete)
    }
}

/// Staged copy of world voxels into a [`RegionFragment`].
pub struct FragmentRead {
    fragment: RegionFragment,
    origin: CellPos,
    selection: VoxelMask,
    stage: ReadStage,
    core: TaskCore,
    aborted: bool,
    y_lo: usize,
    y_hi: usize,
}

impl FragmentRead {
    pub(crate) fn new(fragment: RegionFragment, origin: CellPos, selection: Option<VoxelMask>) -> Self {
        let (x, y, z) = fragment.size();
        let selection = selection.unwrap_or_else(|| VoxelMask::filled(x, y, z));
        assert_eq!(
            selection.size(),
            fragment.size(),
            "selection size must match the fragment"
        );
        Self {
            fragment,
            origin,
            selection,
            stage: ReadStage::Setup,
            core: TaskCore::new(),
            aborted: false,
            y_lo: 0,
            y_hi: 0,
        }
    }

    pub fn stage(&self) -> ReadStage {
        self.stage
    }

    pub fn set_interrupt(&mut self, when: InterruptAt) {
        self.core.set_interrupt(when);
    }

    pub fn is_complete(&self) -> bool {
        self.stage.is_terminal()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn fraction_complete(&self) -> f64 {
        overall_fraction(&self.stage, self.core.stage_fraction())
    }

    /// Discard partial progress at once; reads have nothing to clean up in the world.
    pub fn abort(&mut self) {
        if self.is_complete() {
            return;
        }
        self.fragment.reset(false);
        self.stage = ReadStage::Complete;
        self.aborted = true;
        log::debug!(target: "fragment", "read at {:?} aborted", self.origin);
    }

    fn enter(&mut self, stage: ReadStage) {
        log::trace!(target: "fragment", "read at {:?}: {:?} -> {:?}", self.origin, self.stage, stage);
        self.stage = stage;
        self.core.enter_stage();
    }

    fn setup<W: WorldAccess + ?Sized>(&mut self, world: &W) {
        let fill = self.selection.set_count() as f64 / self.selection.volume() as f64;
        self.fragment.reset(fill > DENSE_FILL_THRESHOLD);
        let (y_min, y_max) = world.vertical_range();
        let y_count = self.fragment.y_count() as i32;
        self.y_lo = (y_min - self.origin.y).clamp(0, y_count) as usize;
        self.y_hi = (y_max - self.origin.y).clamp(0, y_count) as usize;
        self.enter(ReadStage::BulkCopy(ColumnCursor::default()));
    }

    /// Returns false if interrupted before the stage finished.
    fn bulk_copy<W: WorldAccess + ?Sized>(&mut self, world: &W, mut cursor: ColumnCursor) -> bool {
        let (x_count, _, z_count) = self.fragment.size();
        while let Some((x, z)) = cursor.next_column(x_count, z_count) {
            let mut d = self.fragment.data_mut();
            for y in self.y_lo..self.y_hi {
                if !self.selection.get(x as i32, y as i32, z as i32) {
                    continue;
                }
                let p = self.origin.offset(x as i32, y as i32, z as i32);
                let idx = self.fragment.offset(x, y, z);
                d.voxels.set_block(idx, world.voxel(p));
                d.voxels.set_light(idx, world.light(p));
                if let Some(tile) = world.tile_payload(p) {
                    d.tiles.insert(idx, tile);
                }
                d.stored.set(x as i32, y as i32, z as i32);
            }
            drop(d);
            if self.core.is_time_to_interrupt() {
                self.core.set_stage_fraction(cursor.fraction(x_count, z_count));
                self.stage = ReadStage::BulkCopy(cursor);
                return false;
            }
        }
        self.enter(ReadStage::FloatingObjects);
        true
    }

    fn collect_objects<W: WorldAccess + ?Sized>(&mut self, world: &W) {
        let bounds = CellBox::from_origin_size(self.origin, self.fragment.size()).expanded(OBJECT_SEARCH_MARGIN);
        for obj in world.floating_objects_in_box(&bounds) {
            let local = obj.anchor - self.origin;
            if self.selection.get_at(local) && self.fragment.is_stored(local.x, local.y, local.z) {
                self.fragment.add_floating_object(FloatingObject { anchor: local, ..obj });
            }
        }
        self.enter(ReadStage::Complete);
    }

    fn run<W: WorldAccess + ?Sized>(&mut self, world: &mut W) {
        loop {
            match self.stage {
                ReadStage::Setup => self.setup(world),
                ReadStage::BulkCopy(cursor) => {
                    if !self.bulk_copy(world, cursor) {
                        return;
                    }
                }
                ReadStage::FloatingObjects => self.collect_objects(world),
                ReadStage::Complete => return,
            }
            if self.core.is_time_to_interrupt() {
                return;
            }
        }
    }
}

impl<W: WorldAccess + ?Sized> StagedTask<W> for FragmentRead {
    fn set_interrupt(&mut self, when: InterruptAt) {
        FragmentRead::set_interrupt(self, when);
    }

    fn continue_processing(&mut self, world: &mut W) {
        self.run(world);
    }

    fn abort_processing(&mut self) {
        self.abort();
    }

    fn fraction_complete(&self) -> f64 {
        FragmentRead::fraction_complete(self)
    }

    fn is_complete(&self) -> bool {
        FragmentRead::is_complete(self)
    }

    fn is_aborted(&self) -> bool {
        FragmentRead::is_aborted(self)
    }
}

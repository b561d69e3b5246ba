use stratum_fragment::{FragmentRead, FragmentWrite, RegionFragment};
use stratum_geom::{CellPos, OrientationTransform};
use stratum_mask::{MAX_DIM, VoxelMask, VoxelMaskWithOrigin};
use stratum_task::{InterruptAt, Stage, StagedTask, TaskCore, drive_sub_task, overall_fraction};
use stratum_world::WorldAccess;

use crate::BORDER_WIDTH;
use crate::layer::UndoLayer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureStage {
    Setup,
    ReadUndoImage,
    WriteFragment,
    UpdateChangedMask,
    Complete,
}

impl Stage for CaptureStage {
    fn ordinal(&self) -> usize {
        match self {
            CaptureStage::Setup => 0,
            CaptureStage::ReadUndoImage => 1,
            CaptureStage::WriteFragment => 2,
            CaptureStage::UpdateChangedMask => 3,
            CaptureStage::Complete => 4,
        }
    }

    fn weights() -> &'static [f64] {
        &[0.1, 0.2, 0.6, 0.1, 0.0]
    }

    fn is_terminal(&self) -> bool {
        matches!(self, CaptureStage::Complete)
    }
}

/// Writes a fragment into the world while building the [`UndoLayer`] that reverts it.
///
/// The pre-image covers the written cells plus a one-cell border, since placing
/// voxels can disturb their neighbours. Border cells the write left alone are dropped
/// from the changed mask at the end. Aborting before the write starts leaves an empty
/// layer; once writing has begun the remaining stages run so the layer matches what
/// actually reached the world.
pub struct CaptureAndWrite {
    fragment: RegionFragment,
    dest: CellPos,
    transform: OrientationTransform,
    stage: CaptureStage,
    core: TaskCore,
    layer: UndoLayer,
    expanded: VoxelMaskWithOrigin,
    border: VoxelMask,
    read: Option<FragmentRead>,
    write: Option<FragmentWrite>,
    border_after: Option<RegionFragment>,
}

impl CaptureAndWrite {
    pub(crate) fn new(fragment: &RegionFragment, dest: CellPos, transform: OrientationTransform) -> Self {
        let (x, y, z) = fragment.size();
        let room = MAX_DIM - 2 * BORDER_WIDTH;
        assert!(
            x <= room && y <= room && z <= room,
            "fragment [{x}, {y}, {z}] leaves no room for an undo border"
        );
        Self {
            fragment: fragment.shallow_copy(),
            dest,
            transform,
            stage: CaptureStage::Setup,
            core: TaskCore::new(),
            layer: UndoLayer::empty(dest),
            expanded: VoxelMaskWithOrigin::new(dest, 1, 1, 1),
            border: VoxelMask::new(1, 1, 1),
            read: None,
            write: None,
            border_after: None,
        }
    }

    pub fn stage(&self) -> CaptureStage {
        self.stage
    }

    pub fn destination(&self) -> CellPos {
        self.dest
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
        if !self.core.is_aborting() && !self.is_complete() {
            log::info!(target: "undo", "capture at {:?} aborting during {:?}", self.dest, self.stage);
        }
        self.core.request_abort();
    }

    /// World cells this task may still touch: the selection plus its border. `None`
    /// before setup and after completion.
    pub fn locked_region(&self) -> Option<&VoxelMaskWithOrigin> {
        match self.stage {
            CaptureStage::Setup | CaptureStage::Complete => None,
            _ => Some(&self.expanded),
        }
    }

    pub fn layer(&self) -> &UndoLayer {
        &self.layer
    }

    /// The finished layer, or `None` while work remains.
    pub fn into_layer(self) -> Option<UndoLayer> {
        self.is_complete().then_some(self.layer)
    }

    fn enter(&mut self, stage: CaptureStage) {
        log::trace!(target: "undo", "capture at {:?}: {:?} -> {:?}", self.dest, self.stage, stage);
        self.stage = stage;
        self.core.enter_stage();
    }

    fn finish_empty(&mut self) {
        self.layer = UndoLayer::empty(self.layer.origin);
        self.read = None;
        self.write = None;
        self.enter(CaptureStage::Complete);
    }

    fn setup<W: WorldAccess + ?Sized>(&mut self, world: &W) {
        if self.core.is_aborting() {
            self.finish_empty();
            return;
        }
        let stored = self.fragment.stored_mask().clone();
        let (mut expanded, (min_x, min_z)) = stored.reoriented_copy_with_border(&self.transform, BORDER_WIDTH);
        let mut border = expanded.border_mask();
        expanded.union(&border);
        let w = BORDER_WIDTH as i32;
        let origin = self.dest.offset(min_x - w, -w, min_z - w);

        let (y_min, y_max) = world.vertical_range();
        let (lo, hi) = (y_min - origin.y, y_max - 1 - origin.y);
        expanded.clip_to_y_range(lo, hi);
        border.clip_to_y_range(lo, hi);

        let (x, y, z) = expanded.size();
        self.layer = UndoLayer {
            origin,
            undo_image: RegionFragment::new(x, y, z),
            changed: VoxelMask::new(1, 1, 1),
        };
        self.read = Some(self.layer.undo_image.read_from_world_async(origin, Some(expanded.clone())));
        self.expanded = VoxelMaskWithOrigin::from_mask(origin, expanded);
        self.border = border;
        log::debug!(
            target: "undo",
            "capture at {:?}: {} cells locked, {} border",
            self.dest,
            self.expanded.mask().set_count(),
            self.border.set_count()
        );
        self.enter(CaptureStage::ReadUndoImage);
    }

    fn read_undo_image<W: WorldAccess + ?Sized>(&mut self, world: &mut W) -> bool {
        let Some(read) = self.read.as_mut() else {
            log::error!(target: "undo", "capture at {:?} lost its pre-image read", self.dest);
            self.finish_empty();
            return true;
        };
        if self.core.is_aborting() {
            read.abort();
        }
        let (done, fraction) = drive_sub_task(read, self.core.interrupt(), world);
        self.core.set_stage_fraction(fraction);
        if !done {
            return false;
        }
        self.read = None;
        if self.core.is_aborting() {
            self.finish_empty();
            return true;
        }
        self.write = Some(self.fragment.write_to_world_async(self.dest, None, self.transform));
        self.enter(CaptureStage::WriteFragment);
        true
    }

    fn write_fragment<W: WorldAccess + ?Sized>(&mut self, world: &mut W) -> bool {
        if let Some(write) = self.write.as_mut() {
            if self.core.is_aborting() {
                write.abort();
            }
            let (done, fraction) = drive_sub_task(write, self.core.interrupt(), world);
            self.core.set_stage_fraction(fraction);
            if !done {
                return false;
            }
        }
        self.write = None;
        let (x, y, z) = self.border.size();
        let after = RegionFragment::new(x, y, z);
        self.read = Some(after.read_from_world_async(self.layer.origin, Some(self.border.clone())));
        self.border_after = Some(after);
        self.enter(CaptureStage::UpdateChangedMask);
        true
    }

    fn update_changed_mask<W: WorldAccess + ?Sized>(&mut self, world: &mut W) -> bool {
        if let Some(read) = self.read.as_mut() {
            let (done, fraction) = drive_sub_task(read, self.core.interrupt(), world);
            self.core.set_stage_fraction(fraction);
            if !done {
                return false;
            }
        }
        self.read = None;
        let mut changed = self.expanded.mask().clone();
        if let Some(after) = self.border_after.take() {
            let before = &self.layer.undo_image;
            let mut unchanged = 0usize;
            for (x, y, z) in self.border.iter_set() {
                let (xi, yi, zi) = (x as i32, y as i32, z as i32);
                if after.is_stored(xi, yi, zi) && before.is_stored(xi, yi, zi) && after.does_voxel_match(before, x, y, z) {
                    changed.clear(xi, yi, zi);
                    unchanged += 1;
                }
            }
            log::debug!(target: "undo", "capture at {:?}: {} border cells untouched", self.dest, unchanged);
        }
        self.layer.changed = changed;
        self.enter(CaptureStage::Complete);
        true
    }

    fn run<W: WorldAccess + ?Sized>(&mut self, world: &mut W) {
        loop {
            let finished_stage = match self.stage {
                CaptureStage::Setup => {
                    self.setup(world);
                    true
                }
                CaptureStage::ReadUndoImage => self.read_undo_image(world),
                CaptureStage::WriteFragment => self.write_fragment(world),
                CaptureStage::UpdateChangedMask => self.update_changed_mask(world),
                CaptureStage::Complete => return,
            };
            if !finished_stage || self.core.is_time_to_interrupt() {
                return;
            }
        }
    }
}

impl<W: WorldAccess + ?Sized> StagedTask<W> for CaptureAndWrite {
    fn set_interrupt(&mut self, when: InterruptAt) {
        CaptureAndWrite::set_interrupt(self, when);
    }

    fn continue_processing(&mut self, world: &mut W) {
        self.run(world);
    }

    fn abort_processing(&mut self) {
        self.abort();
    }

    fn fraction_complete(&self) -> f64 {
        CaptureAndWrite::fraction_complete(self)
    }

    fn is_complete(&self) -> bool {
        CaptureAndWrite::is_complete(self)
    }

    fn is_aborted(&self) -> bool {
        CaptureAndWrite::is_aborted(self)
    }
}

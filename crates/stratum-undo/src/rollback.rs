use std::rc::Rc;

use stratum_fragment::FragmentWrite;
use stratum_mask::VoxelMask;
use stratum_task::{ColumnCursor, InterruptAt, Stage, StagedTask, TaskCore, drive_sub_task, overall_fraction};
use stratum_world::WorldAccess;

use crate::layer::SharedUndoLayer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UndoStage {
    Setup,
    AdjustMask(ColumnCursor),
    Undo,
    Complete,
}

impl Stage for UndoStage {
    fn ordinal(&self) -> usize {
        match self {
            UndoStage::Setup => 0,
            UndoStage::AdjustMask(_) => 1,
            UndoStage::Undo => 2,
            UndoStage::Complete => 3,
        }
    }

    fn weights() -> &'static [f64] {
        &[0.1, 0.1, 0.8, 0.0]
    }

    fn is_terminal(&self) -> bool {
        matches!(self, UndoStage::Complete)
    }
}

/// Rolls one layer back while later layers stay undoable.
///
/// Each changed voxel that a later layer also claims is not written; its pre-image
/// moves into the earliest such layer instead, so undoing that layer later restores
/// the right content. Every other changed voxel is restored in the world.
pub struct UndoChanges {
    layer: SharedUndoLayer,
    subsequent: Vec<SharedUndoLayer>,
    overlapping: Vec<SharedUndoLayer>,
    write_mask: VoxelMask,
    write: Option<FragmentWrite>,
    transferred: usize,
    stage: UndoStage,
    core: TaskCore,
}

impl UndoChanges {
    pub(crate) fn new(layer: SharedUndoLayer, subsequent: Vec<SharedUndoLayer>) -> Self {
        Self {
            layer,
            subsequent,
            overlapping: Vec::new(),
            write_mask: VoxelMask::new(1, 1, 1),
            write: None,
            transferred: 0,
            stage: UndoStage::Setup,
            core: TaskCore::new(),
        }
    }

    pub fn layer(&self) -> &SharedUndoLayer {
        &self.layer
    }

    pub fn stage(&self) -> UndoStage {
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

    /// Before any pre-image has moved the undo is simply dropped; after that it runs
    /// to the end so the layers stay consistent with each other.
    pub fn abort(&mut self) {
        self.core.request_abort();
        if let Some(write) = self.write.as_mut() {
            write.abort();
        }
    }

    /// Voxels handed over to later layers so far.
    pub fn transferred(&self) -> usize {
        self.transferred
    }

    fn enter(&mut self, stage: UndoStage) {
        log::trace!(target: "undo", "undo {:?} -> {:?}", self.stage, stage);
        self.stage = stage;
        self.core.enter_stage();
    }

    fn setup(&mut self) {
        if self.core.is_aborting() {
            self.enter(UndoStage::Complete);
            return;
        }
        let this = self.layer.borrow();
        let bounds = this.bounding_box();
        let overlapping: Vec<SharedUndoLayer> = self
            .subsequent
            .iter()
            .filter(|later| !Rc::ptr_eq(later, &self.layer))
            .filter(|later| later.borrow().bounding_box().overlaps(&bounds))
            .cloned()
            .collect();
        let (x, y, z) = this.changed.size();
        log::debug!(
            target: "undo",
            "undo layer at {:?}: {} of {} later layers overlap",
            this.origin,
            overlapping.len(),
            self.subsequent.len()
        );
        drop(this);
        self.overlapping = overlapping;
        self.write_mask = VoxelMask::new(x, y, z);
        self.enter(UndoStage::AdjustMask(ColumnCursor::default()));
    }

    fn adjust_mask(&mut self, mut cursor: ColumnCursor) -> bool {
        if cursor == ColumnCursor::default() && self.core.is_aborting() {
            self.enter(UndoStage::Complete);
            return true;
        }
        let this = self.layer.borrow();
        let (x_count, y_count, z_count) = this.changed.size();
        while let Some((x, z)) = cursor.next_column(x_count, z_count) {
            for y in 0..y_count {
                let (xi, yi, zi) = (x as i32, y as i32, z as i32);
                if !this.changed.get(xi, yi, zi) {
                    continue;
                }
                let world = this.origin.offset(xi, yi, zi);
                let claimed = self.overlapping.iter().any(|later| {
                    let mut later = later.borrow_mut();
                    let local = world - later.origin;
                    if !later.changed.get_at(local) {
                        return false;
                    }
                    let dest = (local.x as usize, local.y as usize, local.z as usize);
                    later.undo_image.copy_voxel_contents(dest, &this.undo_image, (x, y, z));
                    true
                });
                if claimed {
                    self.transferred += 1;
                } else {
                    self.write_mask.set(xi, yi, zi);
                }
            }
            if self.core.is_time_to_interrupt() && cursor.z < z_count {
                self.core.set_stage_fraction(cursor.fraction(x_count, z_count));
                self.stage = UndoStage::AdjustMask(cursor);
                return false;
            }
        }
        let origin = this.origin;
        let write = this
            .undo_image
            .write_to_world_async(origin, Some(self.write_mask.clone()), this.undo_image.identity_transform());
        drop(this);
        log::debug!(
            target: "undo",
            "undo layer at {:?}: restoring {} voxels, {} handed to later layers",
            origin,
            self.write_mask.set_count(),
            self.transferred
        );
        self.write = Some(write);
        self.enter(UndoStage::Undo);
        true
    }

    fn undo<W: WorldAccess + ?Sized>(&mut self, world: &mut W) -> bool {
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
        log::info!(target: "undo", "undo of layer at {:?} complete", self.layer.borrow().origin);
        self.enter(UndoStage::Complete);
        true
    }

    fn run<W: WorldAccess + ?Sized>(&mut self, world: &mut W) {
        loop {
            let finished_stage = match self.stage {
                UndoStage::Setup => {
                    self.setup();
                    true
                }
                UndoStage::AdjustMask(cursor) => self.adjust_mask(cursor),
                UndoStage::Undo => self.undo(world),
                UndoStage::Complete => return,
            };
            if !finished_stage || self.core.is_time_to_interrupt() {
                return;
            }
        }
    }
}

impl<W: WorldAccess + ?Sized> StagedTask<W> for UndoChanges {
    fn set_interrupt(&mut self, when: InterruptAt) {
        UndoChanges::set_interrupt(self, when);
    }

    fn continue_processing(&mut self, world: &mut W) {
        self.run(world);
    }

    fn abort_processing(&mut self) {
        self.abort();
    }

    fn fraction_complete(&self) -> f64 {
        UndoChanges::fraction_complete(self)
    }

    fn is_complete(&self) -> bool {
        UndoChanges::is_complete(self)
    }

    fn is_aborted(&self) -> bool {
        UndoChanges::is_aborted(self)
    }
}

/// Undo of one action whose layer may have been split into several parts. Parts run
/// one after another, newest first.
pub struct UndoTransaction {
    parts: Vec<UndoChanges>,
    current: usize,
    interrupt: InterruptAt,
}

impl UndoTransaction {
    pub fn new(parts: Vec<UndoChanges>) -> Self {
        Self {
            parts,
            current: 0,
            interrupt: InterruptAt::Never,
        }
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    pub fn is_complete(&self) -> bool {
        self.current >= self.parts.len()
    }

    pub fn fraction_complete(&self) -> f64 {
        match self.parts.get(self.current) {
            None => 1.0,
            Some(part) => (self.current as f64 + part.fraction_complete()) / self.parts.len() as f64,
        }
    }

    pub fn abort(&mut self) {
        for part in &mut self.parts[self.current..] {
            part.abort();
        }
    }

    pub fn transferred(&self) -> usize {
        self.parts.iter().map(UndoChanges::transferred).sum()
    }

    fn run<W: WorldAccess + ?Sized>(&mut self, world: &mut W) {
        while let Some(part) = self.parts.get_mut(self.current) {
            part.set_interrupt(self.interrupt);
            part.run(world);
            if !part.is_complete() {
                return;
            }
            self.current += 1;
            if self.interrupt.has_passed() {
                return;
            }
        }
    }
}

impl<W: WorldAccess + ?Sized> StagedTask<W> for UndoTransaction {
    fn set_interrupt(&mut self, when: InterruptAt) {
        self.interrupt = when;
    }

    fn continue_processing(&mut self, world: &mut W) {
        self.run(world);
    }

    fn abort_processing(&mut self) {
        self.abort();
    }

    fn fraction_complete(&self) -> f64 {
        UndoTransaction::fraction_complete(self)
    }

    fn is_complete(&self) -> bool {
        UndoTransaction::is_complete(self)
    }

    fn is_aborted(&self) -> bool {
        self.parts.iter().any(UndoChanges::is_aborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::UndoLayer;
    use stratum_blocks::Block;
    use stratum_fragment::RegionFragment;
    use stratum_geom::{CellBox, CellPos};
    use stratum_task::{run_to_completion, step_until_complete};
    use stratum_world::MemoryWorld;

    fn world_of(origin: CellPos, x: usize, y: usize, z: usize) -> CellPos {
        origin.offset(x as i32, y as i32, z as i32)
    }

    fn make_world() -> MemoryWorld {
        let mut w = MemoryWorld::new(0, 32);
        w.fill_box(&CellBox::new(CellPos::new(0, 0, 0), CellPos::new(11, 3, 11)), |p| {
            Block::new(1 + ((p.x + p.z) % 3) as u16, (p.y % 4) as u8)
        });
        w
    }

    fn solid(size: usize, id: u16) -> RegionFragment {
        let mut f = RegionFragment::new(size, 2, size);
        for z in 0..size {
            for y in 0..2 {
                for x in 0..size {
                    f.set_block(x, y, z, Block::new(id, 0));
                }
            }
        }
        f
    }

    fn apply(world: &mut MemoryWorld, f: &RegionFragment, dest: CellPos) -> SharedUndoLayer {
        let mut task = UndoLayer::capture_and_write(f, dest, f.identity_transform());
        run_to_completion(&mut task, world);
        task.into_layer().unwrap().into_shared()
    }

    #[test]
    fn claimed_voxels_move_to_the_later_layer() {
        let mut world = make_world();
        let before = world.voxel(CellPos::new(4, 1, 4));
        let a = apply(&mut world, &solid(4, 10), CellPos::new(2, 1, 2));
        let b = apply(&mut world, &solid(4, 11), CellPos::new(4, 1, 4));
        let mut undo = UndoLayer::undo_changes(&a, vec![Rc::clone(&b)]);
        run_to_completion(&mut undo, &mut world);
        assert_eq!(undo.transferred(), 2 * 2 * 2);
        // B still owns the overlap; A's region outside it is restored
        assert_eq!(world.voxel(CellPos::new(4, 1, 4)), Block::new(11, 0));
        assert_eq!(world.voxel(CellPos::new(2, 1, 2)), Block::new(1 + (4 % 3), 1));
        // B's image now holds what was there before A
        let b_ref = b.borrow();
        let local = CellPos::new(4, 1, 4) - b_ref.origin();
        let held = b_ref.undo_image().block(local.x as usize, local.y as usize, local.z as usize);
        assert_eq!(held, before);
    }

    #[test]
    fn layer_in_its_own_subsequent_list_is_ignored() {
        let mut world = make_world();
        let original = world.voxel(CellPos::new(3, 1, 3));
        let a = apply(&mut world, &solid(2, 10), CellPos::new(3, 1, 3));
        let mut undo = UndoLayer::undo_changes(&a, vec![Rc::clone(&a)]);
        run_to_completion(&mut undo, &mut world);
        assert_eq!(undo.transferred(), 0);
        assert_eq!(world.voxel(CellPos::new(3, 1, 3)), original);
    }

    #[test]
    fn abort_before_adjusting_writes_nothing() {
        let mut world = make_world();
        let a = apply(&mut world, &solid(2, 10), CellPos::new(3, 1, 3));
        let writes = world.stats().voxel_writes;
        let mut undo = UndoLayer::undo_changes(&a, Vec::new());
        undo.abort();
        step_until_complete(&mut undo, &mut world);
        assert!(undo.is_aborted());
        assert_eq!(world.stats().voxel_writes, writes);
        assert_eq!(world.voxel(CellPos::new(3, 1, 3)), Block::new(10, 0));
    }

    #[test]
    fn stepped_undo_matches_single_call() {
        let mut world = make_world();
        let a = apply(&mut world, &solid(4, 12), CellPos::new(1, 0, 1));
        let mut undo = UndoLayer::undo_changes(&a, Vec::new());
        let calls = step_until_complete(&mut undo, &mut world);
        assert!(calls > 3);
        let layer = a.borrow();
        for (x, y, z) in layer.changed_mask().iter_set() {
            let p = world_of(layer.origin(), x, y, z);
            assert_eq!(world.voxel(p), layer.undo_image().block(x, y, z));
        }
    }
}

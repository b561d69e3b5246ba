use std::collections::VecDeque;
use std::time::Instant;

use stratum_blocks::Block;
use stratum_geom::{CellBox, CellPos};
use stratum_mask::{MAX_DIM, VoxelMask, VoxelMaskWithOrigin};
use stratum_task::{ColumnCursor, InterruptAt, Stage, StagedTask, TaskCore, overall_fraction};
use stratum_world::WorldAccess;

use crate::BORDER_ALLOWANCE;
use crate::strategy::FillStrategy;

/// Fill steps between deadline checks.
const FILL_CHECK_INTERVAL: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectStage {
    Gather,
    Shrink,
    Complete,
}

impl Stage for SelectStage {
    fn ordinal(&self) -> usize {
        match self {
            SelectStage::Gather => 0,
            SelectStage::Shrink => 1,
            SelectStage::Complete => 2,
        }
    }

    fn weights() -> &'static [f64] {
        &[0.9, 0.1, 0.0]
    }

    fn is_terminal(&self) -> bool {
        matches!(self, SelectStage::Complete)
    }
}

enum Probe {
    Match,
    NoMatch,
    NotLoaded,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("fill start {start:?} lies outside {bounds:?}")]
    StartOutsideBounds { start: CellPos, bounds: CellBox },
}

/// Builds a selection from the world a slice at a time. Cells in columns the host
/// has not loaded go to a separate unavailable mask instead of the selection.
pub struct SelectionBuilder {
    strategy: FillStrategy,
    selection: VoxelMaskWithOrigin,
    unavailable: VoxelMaskWithOrigin,
    stage: SelectStage,
    core: TaskCore,
    start_block: Option<Block>,
    cursor: ColumnCursor,
    queue: VecDeque<CellPos>,
    queued: VoxelMask,
    offsets: Vec<CellPos>,
    processed: usize,
    // inclusive local range of cells touched in either mask
    range: Option<(CellPos, CellPos)>,
}

impl SelectionBuilder {
    pub fn new<W: WorldAccess + ?Sized>(world: &W, strategy: FillStrategy) -> Result<Self, SelectionError> {
        let bounds = selection_bounds(world.vertical_range(), &strategy)?;
        let (x, y, z) = bounds.size();
        let start = strategy.start();
        log::debug!(target: "select", "selection over {:?} size [{}, {}, {}]", bounds.min, x, y, z);
        let mut queue = VecDeque::new();
        let mut queued = VoxelMask::new(1, 1, 1);
        if strategy.is_fill() {
            queued = VoxelMask::new(x, y, z);
            let local = start - bounds.min;
            queued.set(local.x, local.y, local.z);
            queue.push_back(local);
        }
        Ok(Self {
            strategy,
            selection: VoxelMaskWithOrigin::new(bounds.min, x, y, z),
            unavailable: VoxelMaskWithOrigin::new(bounds.min, x, y, z),
            stage: SelectStage::Gather,
            core: TaskCore::new(),
            start_block: None,
            cursor: ColumnCursor::default(),
            queue,
            queued,
            offsets: strategy.neighbour_offsets(),
            processed: 0,
            range: None,
        })
    }

    pub fn strategy(&self) -> &FillStrategy {
        &self.strategy
    }

    pub fn stage(&self) -> SelectStage {
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

    /// Stop gathering; whatever was found so far is kept and shrunk.
    pub fn abort(&mut self) {
        if self.stage == SelectStage::Gather {
            self.core.request_abort();
            self.enter(SelectStage::Shrink);
        }
    }

    pub fn selection(&self) -> &VoxelMaskWithOrigin {
        &self.selection
    }

    pub fn unavailable(&self) -> &VoxelMaskWithOrigin {
        &self.unavailable
    }

    pub fn contains_unavailable(&self) -> bool {
        !self.unavailable.mask().is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.selection.mask().is_empty()
    }

    pub fn into_selection(self) -> VoxelMaskWithOrigin {
        self.selection
    }

    /// Work until `deadline`. Returns the estimated fraction while work remains and
    /// `None` once the selection is complete.
    pub fn continue_generation<W: WorldAccess + ?Sized>(&mut self, world: &mut W, deadline: Instant) -> Option<f32> {
        self.set_interrupt(InterruptAt::Deadline(deadline));
        self.run(world);
        if self.is_complete() {
            None
        } else {
            Some(self.fraction_complete() as f32)
        }
    }

    fn enter(&mut self, stage: SelectStage) {
        self.stage = stage;
        self.core.enter_stage();
    }

    fn expand_range(&mut self, p: CellPos) {
        self.range = Some(match self.range {
            None => (p, p),
            Some((lo, hi)) => (
                CellPos::new(lo.x.min(p.x), lo.y.min(p.y), lo.z.min(p.z)),
                CellPos::new(hi.x.max(p.x), hi.y.max(p.y), hi.z.max(p.z)),
            ),
        });
    }

    fn probe<W: WorldAccess + ?Sized>(&self, world: &W, start: Block, p: CellPos) -> Probe {
        if !world.is_column_loaded(p.x, p.z) {
            return Probe::NotLoaded;
        }
        let (y_min, y_max) = world.vertical_range();
        if p.y < y_min || p.y >= y_max {
            return Probe::NoMatch;
        }
        if self.strategy.matcher().accepts(start, world.voxel(p)) {
            Probe::Match
        } else {
            Probe::NoMatch
        }
    }

    fn scan_box<W: WorldAccess + ?Sized>(&mut self, world: &W, start: Block) -> bool {
        let (x_count, y_count, z_count) = self.selection.mask().size();
        let origin = self.selection.origin();
        while let Some((x, z)) = self.cursor.next_column(x_count, z_count) {
            let loaded = world.is_column_loaded(origin.x + x as i32, origin.z + z as i32);
            for y in 0..y_count {
                let local = CellPos::new(x as i32, y as i32, z as i32);
                if !loaded {
                    self.unavailable.mask_mut().set(local.x, local.y, local.z);
                    self.expand_range(local);
                    continue;
                }
                if let Probe::Match = self.probe(world, start, origin + local) {
                    self.selection.mask_mut().set(local.x, local.y, local.z);
                    self.expand_range(local);
                }
            }
            if self.core.is_time_to_interrupt() {
                self.core.set_stage_fraction(self.cursor.fraction(x_count, z_count));
                return false;
            }
        }
        true
    }

    fn flood<W: WorldAccess + ?Sized>(&mut self, world: &W, start: Block) -> bool {
        let origin = self.selection.origin();
        while let Some(local) = self.queue.pop_front() {
            self.processed += 1;
            match self.probe(world, start, origin + local) {
                Probe::NotLoaded => {
                    self.unavailable.mask_mut().set(local.x, local.y, local.z);
                    self.expand_range(local);
                }
                Probe::NoMatch => {}
                Probe::Match => {
                    self.selection.mask_mut().set(local.x, local.y, local.z);
                    self.expand_range(local);
                    for i in 0..self.offsets.len() {
                        let n = local + self.offsets[i];
                        if in_mask(&self.queued, n) && !self.queued.get_at(n) {
                            self.queued.set(n.x, n.y, n.z);
                            self.queue.push_back(n);
                        }
                    }
                }
            }
            if self.processed % FILL_CHECK_INTERVAL == 0 && self.core.is_time_to_interrupt() {
                let pending = self.queue.len();
                self.core
                    .set_stage_fraction(self.processed as f64 / (self.processed + pending) as f64);
                return false;
            }
        }
        true
    }

    fn gather<W: WorldAccess + ?Sized>(&mut self, world: &W) -> bool {
        let start = match self.start_block {
            Some(b) => b,
            None => {
                let b = world.voxel(self.strategy.start());
                self.start_block = Some(b);
                b
            }
        };
        let done = if self.strategy.is_fill() {
            self.flood(world, start)
        } else {
            self.scan_box(world, start)
        };
        if done {
            log::debug!(
                target: "select",
                "gathered {} cells, {} unavailable",
                self.selection.mask().set_count(),
                self.unavailable.mask().set_count()
            );
            self.enter(SelectStage::Shrink);
        }
        done
    }

    /// Replace both masks with their smallest common enclosing cuboid. An empty
    /// result becomes a single clear cell at the original origin.
    fn shrink(&mut self) {
        let size = self.selection.mask().size();
        let (lo, hi) = self.range.unwrap_or((CellPos::ZERO, CellPos::ZERO));
        let full = (hi - lo).offset(1, 1, 1);
        if lo == CellPos::ZERO && (full.x as usize, full.y as usize, full.z as usize) == size {
            self.enter(SelectStage::Complete);
            return;
        }
        let new_size = (full.x as usize, full.y as usize, full.z as usize);
        self.selection = shrunk(&self.selection, lo, new_size);
        self.unavailable = shrunk(&self.unavailable, lo, new_size);
        self.queued = VoxelMask::new(1, 1, 1);
        self.queue.clear();
        self.enter(SelectStage::Complete);
    }

    fn run<W: WorldAccess + ?Sized>(&mut self, world: &mut W) {
        loop {
            match self.stage {
                SelectStage::Gather => {
                    if !self.gather(world) {
                        return;
                    }
                }
                SelectStage::Shrink => self.shrink(),
                SelectStage::Complete => return,
            }
            if self.core.is_time_to_interrupt() {
                return;
            }
        }
    }
}

impl<W: WorldAccess + ?Sized> StagedTask<W> for SelectionBuilder {
    fn set_interrupt(&mut self, when: InterruptAt) {
        SelectionBuilder::set_interrupt(self, when);
    }

    fn continue_processing(&mut self, world: &mut W) {
        self.run(world);
    }

    fn abort_processing(&mut self) {
        self.abort();
    }

    fn fraction_complete(&self) -> f64 {
        SelectionBuilder::fraction_complete(self)
    }

    fn is_complete(&self) -> bool {
        SelectionBuilder::is_complete(self)
    }

    fn is_aborted(&self) -> bool {
        SelectionBuilder::is_aborted(self)
    }
}

#[inline]
fn in_mask(mask: &VoxelMask, p: CellPos) -> bool {
    let (x, y, z) = mask.size();
    p.x >= 0 && p.y >= 0 && p.z >= 0 && (p.x as usize) < x && (p.y as usize) < y && (p.z as usize) < z
}

fn shrunk(src: &VoxelMaskWithOrigin, lo: CellPos, size: (usize, usize, usize)) -> VoxelMaskWithOrigin {
    let mut out = VoxelMaskWithOrigin::new(src.origin() + lo, size.0, size.1, size.2);
    for (x, y, z) in src.mask().iter_set() {
        let p = CellPos::new(x as i32, y as i32, z as i32) - lo;
        out.mask_mut().set(p.x, p.y, p.z);
    }
    out
}

/// World cuboid a strategy may select from, never larger than a mask allows. An
/// oversized request is cut down to a window around the start cell.
fn selection_bounds(vertical: (i32, i32), strategy: &FillStrategy) -> Result<CellBox, SelectionError> {
    let (y_min, y_max) = vertical;
    let start = strategy.start();
    let requested = match *strategy {
        FillStrategy::Box { corner1, corner2 } => CellBox::spanning(corner1, corner2),
        FillStrategy::FloodFill { bounds: Some(b), .. } | FillStrategy::Contour { bounds: Some(b), .. } => b,
        FillStrategy::FloodFill { bounds: None, .. } | FillStrategy::Contour { bounds: None, .. } => {
            let half = MAX_DIM as i32 / 2 - BORDER_ALLOWANCE;
            let lo_y = start.y.max(y_min);
            let hi_y = (lo_y + MAX_DIM as i32 - 2 * BORDER_ALLOWANCE).min(y_max - 1).max(lo_y);
            CellBox::new(
                CellPos::new(start.x - half, lo_y, start.z - half),
                CellPos::new(start.x + half, hi_y, start.z + half),
            )
        }
    };
    if !requested.contains(start) {
        return Err(SelectionError::StartOutsideBounds {
            start,
            bounds: requested,
        });
    }
    let (x_lo, x_hi) = window(requested.min.x, requested.max.x, start.x);
    let (y_lo, y_hi) = window(requested.min.y, requested.max.y, start.y);
    let (z_lo, z_hi) = window(requested.min.z, requested.max.z, start.z);
    let clamped = CellBox::new(CellPos::new(x_lo, y_lo, z_lo), CellPos::new(x_hi, y_hi, z_hi));
    if clamped != requested {
        log::warn!(target: "select", "selection bounds {:?} clamped to {:?}", requested, clamped);
    }
    Ok(clamped)
}

/// At most `MAX_DIM` cells of `lo..=hi` centred on `at` where the range allows.
fn window(lo: i32, hi: i32, at: i32) -> (i32, i32) {
    let limit = MAX_DIM as i32 - 1;
    if hi - lo <= limit {
        return (lo, hi);
    }
    let first = (at - limit / 2).max(lo);
    let last = (first + limit).min(hi);
    ((last - limit).max(lo), last)
}

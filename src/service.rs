//! Command surface: owns one world, its undo history, and at most one in-flight task.
//!
//! Callers hand in a selection (generated here or received over the wire), start an
//! action that copies the selected cells to a destination under a rotation/mirror,
//! and undo actions afterwards. All heavy work happens in [`RegionService::tick`],
//! which never runs past the configured budget by more than one unit of work.

use hashbrown::HashMap;
use std::time::Instant;
use stratum_blocks::MaterialEquivalence;
use stratum_fragment::{FragmentMismatch, FragmentRead, RegionFragment, compare_fragments};
use stratum_geom::{CellPos, OrientationTransform};
use stratum_mask::{MAX_DIM, MaskDecodeError, VoxelMaskWithOrigin};
use stratum_select::{FillStrategy, SelectionBuilder, SelectionError};
use stratum_task::{InterruptAt, drive_sub_task};
use stratum_undo::{BORDER_WIDTH, CaptureAndWrite, OwnerId, TransactionId, UndoLayer, UndoTransaction, WorldHistory};
use stratum_world::WorldAccess;

use crate::config::ServiceConfig;

/// Why a command was not started. `Display` is the reason shown to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Refusal {
    #[error("no selection stored")]
    NoSelection,
    #[error("selection of {volume} voxels exceeds the limit of {max}")]
    SelectionTooLarge { volume: usize, max: usize },
    #[error("selection is {extent} voxels across, the limit is {max}")]
    SelectionTooWide { extent: usize, max: usize },
    #[error("busy with another task")]
    Busy,
    #[error("nothing to undo")]
    NothingToUndo,
    #[error("no action of yours is in progress")]
    UnknownAction,
    #[error("malformed selection: {0}")]
    MalformedSelection(#[from] MaskDecodeError),
    #[error("invalid selection request: {0}")]
    InvalidSelection(#[from] SelectionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Idle,
    Selecting { percent: u8 },
    PerformingAction { percent: u8 },
    Undoing { percent: u8 },
}

/// Issues transaction ids; never hands out the same id twice.
#[derive(Debug, Default)]
pub struct TransactionIds {
    last: TransactionId,
}

impl TransactionIds {
    pub fn issue(&mut self) -> TransactionId {
        self.last += 1;
        self.last
    }
}

struct CopyJob {
    owner: OwnerId,
    transaction: TransactionId,
    source: RegionFragment,
    read: FragmentRead,
    dest: CellPos,
    quarter_turns: u8,
    mirrored: bool,
}

struct ApplyJob {
    owner: OwnerId,
    transaction: TransactionId,
    task: CaptureAndWrite,
    undo_requested: bool,
    history_split: bool,
}

enum Job {
    Select { owner: OwnerId, builder: SelectionBuilder },
    Copy(CopyJob),
    Apply(ApplyJob),
    Undo { transaction: TransactionId, task: UndoTransaction },
}

// share of an action's progress spent reading the source
const COPY_SHARE: f64 = 0.25;

fn percent(fraction: f64) -> u8 {
    (fraction.clamp(0.0, 1.0) * 100.0).round() as u8
}

pub struct RegionService<W: WorldAccess> {
    world: W,
    config: ServiceConfig,
    equivalence: MaterialEquivalence,
    history: WorldHistory,
    ids: TransactionIds,
    selections: HashMap<OwnerId, VoxelMaskWithOrigin>,
    job: Option<Job>,
}

impl<W: WorldAccess> RegionService<W> {
    pub fn new(world: W, config: ServiceConfig) -> Self {
        let history = WorldHistory::new(config.history_capacity, config.history_depth);
        let equivalence = config.equivalence();
        Self {
            world,
            config,
            equivalence,
            history,
            ids: TransactionIds::default(),
            selections: HashMap::new(),
            job: None,
        }
    }

    pub fn world(&self) -> &W {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut W {
        &mut self.world
    }

    pub fn history(&self) -> &WorldHistory {
        &self.history
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn selection(&self, owner: OwnerId) -> Option<&VoxelMaskWithOrigin> {
        self.selections.get(&owner)
    }

    pub fn is_idle(&self) -> bool {
        self.job.is_none()
    }

    /// Store a selection sent by a client: a 12-byte origin, then the mask encoding.
    pub fn receive_selection(&mut self, owner: OwnerId, bytes: &[u8]) -> Result<(), Refusal> {
        let selection = VoxelMaskWithOrigin::decode(bytes)?;
        log::debug!(
            target: "service",
            "owner {} sent a selection of {} cells at {:?}",
            owner,
            selection.mask().set_count(),
            selection.origin()
        );
        self.selections.insert(owner, selection);
        Ok(())
    }

    /// Generate a selection from the world over the next ticks.
    pub fn start_selection(&mut self, owner: OwnerId, strategy: FillStrategy) -> Result<(), Refusal> {
        if self.job.is_some() {
            return Err(Refusal::Busy);
        }
        let builder = SelectionBuilder::new(&self.world, strategy)?;
        self.job = Some(Job::Select { owner, builder });
        Ok(())
    }

    /// Copy the owner's selection so that its minimum corner lands at `dest`, turned
    /// `quarter_turns` clockwise after an optional mirror across X.
    pub fn start_region_action(
        &mut self,
        owner: OwnerId,
        dest: CellPos,
        quarter_turns: u8,
        mirrored: bool,
    ) -> Result<TransactionId, Refusal> {
        if self.job.is_some() {
            return Err(Refusal::Busy);
        }
        let selection = self.selections.get(&owner).ok_or(Refusal::NoSelection)?;
        let volume = selection.mask().set_count();
        if volume == 0 {
            return Err(Refusal::NoSelection);
        }
        let (x, y, z) = selection.mask().size();
        let limit = MAX_DIM - 2 * BORDER_WIDTH;
        let extent = x.max(y).max(z);
        if extent > limit {
            return Err(Refusal::SelectionTooWide { extent, max: limit });
        }
        if volume > self.config.max_selection_volume {
            return Err(Refusal::SelectionTooLarge {
                volume,
                max: self.config.max_selection_volume,
            });
        }

        let transaction = self.ids.issue();
        let source = RegionFragment::new(x, y, z);
        let read = source.read_from_world_async(selection.origin(), Some(selection.mask().clone()));
        log::info!(
            target: "service",
            "transaction {}: owner {} copies {} voxels from {:?} to {:?}",
            transaction,
            owner,
            volume,
            selection.origin(),
            dest
        );
        self.job = Some(Job::Copy(CopyJob {
            owner,
            transaction,
            source,
            read,
            dest,
            quarter_turns,
            mirrored,
        }));
        Ok(transaction)
    }

    /// Undo the owner's newest recorded action.
    pub fn undo_last(&mut self, owner: OwnerId) -> Result<TransactionId, Refusal> {
        if self.job.is_some() {
            return Err(Refusal::Busy);
        }
        let (transaction, task) = self.history.begin_undo_last(owner).ok_or(Refusal::NothingToUndo)?;
        self.job = Some(Job::Undo { transaction, task });
        Ok(transaction)
    }

    /// Stop the owner's in-flight action and undo whatever it already wrote.
    pub fn undo_current(&mut self, owner: OwnerId) -> Result<TransactionId, Refusal> {
        match self.job.as_mut() {
            Some(Job::Copy(copy)) if copy.owner == owner => {
                let transaction = copy.transaction;
                log::info!(target: "service", "transaction {} dropped before writing", transaction);
                self.job = None;
                Ok(transaction)
            }
            Some(Job::Apply(apply)) if apply.owner == owner => {
                apply.task.abort();
                apply.undo_requested = true;
                log::info!(target: "service", "transaction {} aborting, undo follows", apply.transaction);
                Ok(apply.transaction)
            }
            _ => Err(Refusal::UnknownAction),
        }
    }

    pub fn status(&self) -> ServiceStatus {
        match &self.job {
            None => ServiceStatus::Idle,
            Some(Job::Select { builder, .. }) => ServiceStatus::Selecting {
                percent: percent(builder.fraction_complete()),
            },
            Some(Job::Copy(copy)) => ServiceStatus::PerformingAction {
                percent: percent(copy.read.fraction_complete() * COPY_SHARE),
            },
            Some(Job::Apply(apply)) => ServiceStatus::PerformingAction {
                percent: percent(COPY_SHARE + apply.task.fraction_complete() * (1.0 - COPY_SHARE)),
            },
            Some(Job::Undo { task, .. }) => ServiceStatus::Undoing {
                percent: percent(task.fraction_complete()),
            },
        }
    }

    /// Advance the in-flight task until `now` plus the tick budget.
    pub fn tick(&mut self, now: Instant) -> ServiceStatus {
        let deadline = now + self.config.tick_budget();
        if let Some(job) = self.job.take() {
            self.job = self.advance(job, deadline);
        }
        self.status()
    }

    /// Tick until nothing is in flight; returns the number of ticks.
    pub fn run_until_idle(&mut self) -> usize {
        let mut ticks = 0;
        while !self.is_idle() {
            self.tick(Instant::now());
            ticks += 1;
        }
        ticks
    }

    fn advance(&mut self, job: Job, deadline: Instant) -> Option<Job> {
        let interrupt = InterruptAt::Deadline(deadline);
        match job {
            Job::Select { owner, mut builder } => {
                if builder.continue_generation(&mut self.world, deadline).is_some() {
                    return Some(Job::Select { owner, builder });
                }
                self.finish_selection(owner, builder);
                None
            }
            Job::Copy(mut copy) => {
                let (done, _) = drive_sub_task(&mut copy.read, interrupt, &mut self.world);
                if !done {
                    return Some(Job::Copy(copy));
                }
                let (x, _, z) = copy.source.size();
                let transform = OrientationTransform::new(x, z, copy.quarter_turns, copy.mirrored);
                let task = UndoLayer::capture_and_write(&copy.source, copy.dest, transform);
                Some(Job::Apply(ApplyJob {
                    owner: copy.owner,
                    transaction: copy.transaction,
                    task,
                    undo_requested: false,
                    history_split: false,
                }))
            }
            Job::Apply(mut apply) => {
                let (done, _) = drive_sub_task(&mut apply.task, interrupt, &mut self.world);
                if !apply.history_split {
                    if let Some(locked) = apply.task.locked_region() {
                        self.history.split_by_locked_region(locked);
                        apply.history_split = true;
                    }
                }
                if !done {
                    return Some(Job::Apply(apply));
                }
                self.finish_action(apply)
            }
            Job::Undo { transaction, mut task } => {
                let (done, _) = drive_sub_task(&mut task, interrupt, &mut self.world);
                if !done {
                    return Some(Job::Undo { transaction, task });
                }
                log::info!(
                    target: "service",
                    "transaction {} undone, {} voxels deferred to later actions",
                    transaction,
                    task.transferred()
                );
                None
            }
        }
    }

    fn finish_selection(&mut self, owner: OwnerId, builder: SelectionBuilder) {
        if builder.contains_unavailable() {
            log::warn!(target: "service", "selection for owner {} reaches into unloaded columns", owner);
        }
        if builder.is_empty() {
            log::info!(target: "service", "selection for owner {} is empty", owner);
            self.selections.remove(&owner);
            return;
        }
        let selection = builder.into_selection();
        log::info!(
            target: "service",
            "owner {} selected {} voxels at {:?}",
            owner,
            selection.mask().set_count(),
            selection.origin()
        );
        self.selections.insert(owner, selection);
    }

    fn finish_action(&mut self, apply: ApplyJob) -> Option<Job> {
        let ApplyJob {
            owner,
            transaction,
            task,
            undo_requested,
            ..
        } = apply;
        let Some(layer) = task.into_layer() else {
            log::error!(target: "service", "transaction {} finished without an undo layer", transaction);
            return None;
        };
        if !undo_requested {
            log::info!(target: "service", "transaction {} complete", transaction);
            self.history.record(owner, transaction, layer);
            return None;
        }
        if layer.is_empty() {
            log::info!(target: "service", "transaction {} aborted before writing", transaction);
            return None;
        }
        // newest layer: nothing was recorded after it
        let shared = layer.into_shared();
        let task = UndoTransaction::new(vec![UndoLayer::undo_changes(&shared, Vec::new())]);
        Some(Job::Undo { transaction, task })
    }

    /// Read the world cells of a cuboid.
    pub fn snapshot(&mut self, origin: CellPos, size: (usize, usize, usize)) -> RegionFragment {
        let mut fragment = RegionFragment::new(size.0, size.1, size.2);
        fragment.read_from_world(&mut self.world, origin, None);
        fragment
    }

    /// Compare the world at `origin` against `expected`, allowing the configured
    /// equivalent materials.
    pub fn verify_region(&mut self, expected: &RegionFragment, origin: CellPos) -> Result<(), FragmentMismatch> {
        let actual = self.snapshot(origin, expected.size());
        compare_fragments(expected, &actual, &self.equivalence)
    }
}

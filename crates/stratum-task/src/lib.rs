//! Resumable, deadline-aware multi-stage tasks driven from a host tick loop.
//!
//! A task is advanced by repeated calls to [`StagedTask::continue_processing`]. Each
//! call does work until the task finishes or its [`InterruptAt`] says to yield; the
//! next call resumes from the saved cursor. Stages carry relative weights summing
//! to 1.0 so progress can be reported as a single fraction.
#![forbid(unsafe_code)]

use std::time::{Duration, Instant};

/// When a running task must yield back to its caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterruptAt {
    /// Run to completion in one call.
    Never,
    /// Yield after the smallest unit of work (one column, one stage step).
    Immediately,
    /// Yield once this instant has passed.
    Deadline(Instant),
}

impl InterruptAt {
    pub fn after(budget: Duration) -> Self {
        InterruptAt::Deadline(Instant::now() + budget)
    }

    #[inline]
    pub fn has_passed(&self) -> bool {
        match self {
            InterruptAt::Never => false,
            InterruptAt::Immediately => true,
            InterruptAt::Deadline(at) => Instant::now() >= *at,
        }
    }
}

/// A resumable operation over some context `C` (usually the host world).
pub trait StagedTask<C: ?Sized> {
    fn set_interrupt(&mut self, when: InterruptAt);

    /// Resume work. Calling this after completion does nothing.
    fn continue_processing(&mut self, ctx: &mut C);

    /// Ask the task to stop early. Read-side tasks stop at once; write-side tasks
    /// keep running their remaining stages cheaply so the context stays consistent.
    fn abort_processing(&mut self);

    fn fraction_complete(&self) -> f64;

    fn is_complete(&self) -> bool;

    /// Finished because of an abort rather than normally.
    fn is_aborted(&self) -> bool;
}

/// Stage enumeration of a task. `ordinal` indexes into `weights`; the terminal
/// stage has weight zero.
pub trait Stage {
    fn ordinal(&self) -> usize;
    fn weights() -> &'static [f64];
    fn is_terminal(&self) -> bool;
}

/// Overall progress: completed stage weights plus the current stage's share.
pub fn overall_fraction<S: Stage>(stage: &S, stage_fraction: f64) -> f64 {
    if stage.is_terminal() {
        return 1.0;
    }
    let weights = S::weights();
    let ord = stage.ordinal();
    let done: f64 = weights[..ord].iter().sum();
    (done + weights[ord] * stage_fraction.clamp(0.0, 1.0)).min(1.0)
}

/// Interrupt, abort, and stage-progress bookkeeping shared by every task.
#[derive(Clone, Debug)]
pub struct TaskCore {
    interrupt: InterruptAt,
    aborting: bool,
    stage_fraction: f64,
}

impl Default for TaskCore {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskCore {
    pub fn new() -> Self {
        Self {
            interrupt: InterruptAt::Never,
            aborting: false,
            stage_fraction: 0.0,
        }
    }

    #[inline]
    pub fn set_interrupt(&mut self, when: InterruptAt) {
        self.interrupt = when;
    }

    #[inline]
    pub fn interrupt(&self) -> InterruptAt {
        self.interrupt
    }

    #[inline]
    pub fn is_time_to_interrupt(&self) -> bool {
        self.interrupt.has_passed()
    }

    pub fn request_abort(&mut self) {
        self.aborting = true;
    }

    #[inline]
    pub fn is_aborting(&self) -> bool {
        self.aborting
    }

    #[inline]
    pub fn stage_fraction(&self) -> f64 {
        self.stage_fraction
    }

    pub fn set_stage_fraction(&mut self, f: f64) {
        self.stage_fraction = f;
    }

    /// Call on every stage change.
    pub fn enter_stage(&mut self) {
        self.stage_fraction = 0.0;
    }
}

/// Position of a resumable walk over the (z, x) columns of a cuboid, z outermost.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ColumnCursor {
    pub z: usize,
    pub x: usize,
}

impl ColumnCursor {
    /// Current column, advancing the cursor past it.
    pub fn next_column(&mut self, x_count: usize, z_count: usize) -> Option<(usize, usize)> {
        if x_count == 0 || self.z >= z_count {
            return None;
        }
        let out = (self.x, self.z);
        self.x += 1;
        if self.x >= x_count {
            self.x = 0;
            self.z += 1;
        }
        Some(out)
    }

    pub fn fraction(&self, x_count: usize, z_count: usize) -> f64 {
        let total = x_count * z_count;
        if total == 0 {
            return 1.0;
        }
        ((self.z * x_count + self.x) as f64 / total as f64).min(1.0)
    }
}

/// Advance `sub` as one step of a parent stage, forwarding the parent's interrupt.
/// Returns whether the sub-task is complete, and its fraction for the parent stage.
pub fn drive_sub_task<C: ?Sized, T: StagedTask<C> + ?Sized>(
    sub: &mut T,
    interrupt: InterruptAt,
    ctx: &mut C,
) -> (bool, f64) {
    sub.set_interrupt(interrupt);
    sub.continue_processing(ctx);
    (sub.is_complete(), sub.fraction_complete())
}

/// Synchronous wrapper: run `task` to completion in a single call.
pub fn run_to_completion<C: ?Sized, T: StagedTask<C> + ?Sized>(task: &mut T, ctx: &mut C) {
    task.set_interrupt(InterruptAt::Never);
    task.continue_processing(ctx);
    debug_assert!(task.is_complete(), "task yielded without an interrupt");
}

/// Drive `task` one unit of work per call until it completes, returning the call count.
pub fn step_until_complete<C: ?Sized, T: StagedTask<C> + ?Sized>(task: &mut T, ctx: &mut C) -> usize {
    task.set_interrupt(InterruptAt::Immediately);
    let mut calls = 0;
    while !task.is_complete() {
        task.continue_processing(ctx);
        calls += 1;
    }
    calls
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum CountStage {
        Count(ColumnCursor),
        Finish,
        Complete,
    }

    impl Stage for CountStage {
        fn ordinal(&self) -> usize {
            match self {
                CountStage::Count(_) => 0,
                CountStage::Finish => 1,
                CountStage::Complete => 2,
            }
        }
        fn weights() -> &'static [f64] {
            &[0.75, 0.25, 0.0]
        }
        fn is_terminal(&self) -> bool {
            matches!(self, CountStage::Complete)
        }
    }

    struct Counter {
        stage: CountStage,
        core: TaskCore,
        visited: Vec<(usize, usize)>,
    }

    impl Counter {
        fn new() -> Self {
            Self {
                stage: CountStage::Count(ColumnCursor::default()),
                core: TaskCore::new(),
                visited: Vec::new(),
            }
        }
    }

    impl StagedTask<u32> for Counter {
        fn set_interrupt(&mut self, when: InterruptAt) {
            self.core.set_interrupt(when);
        }
        fn continue_processing(&mut self, ctx: &mut u32) {
            loop {
                match self.stage {
                    CountStage::Count(mut cursor) => {
                        while let Some(col) = cursor.next_column(3, 2) {
                            self.visited.push(col);
                            *ctx += 1;
                            if self.core.is_time_to_interrupt() {
                                self.core.set_stage_fraction(cursor.fraction(3, 2));
                                self.stage = CountStage::Count(cursor);
                                return;
                            }
                        }
                        self.stage = CountStage::Finish;
                        self.core.enter_stage();
                    }
                    CountStage::Finish => {
                        self.stage = CountStage::Complete;
                    }
                    CountStage::Complete => return,
                }
                if self.core.is_time_to_interrupt() {
                    return;
                }
            }
        }
        fn abort_processing(&mut self) {
            self.core.request_abort();
        }
        fn fraction_complete(&self) -> f64 {
            overall_fraction(&self.stage, self.core.stage_fraction())
        }
        fn is_complete(&self) -> bool {
            self.stage.is_terminal()
        }
        fn is_aborted(&self) -> bool {
            self.core.is_aborting() && self.is_complete()
        }
    }

    #[test]
    fn immediate_interrupt_does_one_column_per_call() {
        let mut t = Counter::new();
        let mut ctx = 0u32;
        t.set_interrupt(InterruptAt::Immediately);
        t.continue_processing(&mut ctx);
        assert_eq!(ctx, 1);
        assert!((t.fraction_complete() - 0.75 / 6.0).abs() < 1e-9);
        let calls = step_until_complete(&mut t, &mut ctx);
        assert!(calls >= 5);
        assert_eq!(ctx, 6);
        assert_eq!(t.visited, vec![(0, 0), (1, 0), (2, 0), (0, 1), (1, 1), (2, 1)]);
    }

    #[test]
    fn no_deadline_runs_to_completion() {
        let mut t = Counter::new();
        let mut ctx = 0u32;
        run_to_completion(&mut t, &mut ctx);
        assert!(t.is_complete());
        assert_eq!(t.fraction_complete(), 1.0);
        // further calls are no-ops
        t.continue_processing(&mut ctx);
        assert_eq!(ctx, 6);
        assert!(!t.is_aborted());
    }

    #[test]
    fn sub_task_reports_fraction_to_parent() {
        let mut t = Counter::new();
        let mut ctx = 0u32;
        let (done, f) = drive_sub_task(&mut t, InterruptAt::Immediately, &mut ctx);
        assert!(!done);
        assert!(f > 0.0 && f < 1.0);
        let (done, f) = drive_sub_task(&mut t, InterruptAt::Never, &mut ctx);
        assert!(done);
        assert_eq!(f, 1.0);
    }

    #[test]
    fn elapsed_deadline_interrupts() {
        assert!(InterruptAt::Deadline(Instant::now()).has_passed());
        assert!(!InterruptAt::after(Duration::from_secs(3600)).has_passed());
        assert!(!InterruptAt::Never.has_passed());
    }

    #[test]
    fn cursor_walks_z_outermost() {
        let mut c = ColumnCursor::default();
        let mut cols = Vec::new();
        while let Some(col) = c.next_column(2, 2) {
            cols.push(col);
        }
        assert_eq!(cols, vec![(0, 0), (1, 0), (0, 1), (1, 1)]);
        assert_eq!(c.fraction(2, 2), 1.0);
    }
}

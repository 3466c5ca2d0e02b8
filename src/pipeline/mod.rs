//! Step contract, cancellation token, and the pipeline runner.
//!
//! Steps execute sequentially on a single control path. The runner owns the
//! one correctness property everything else leans on: `cleanup` is invoked
//! for exactly the steps whose `execute` ran, in exact reverse order, on
//! every exit path.

pub mod binfmt;
pub mod context;
pub mod copy;
pub mod download;
pub mod extra_mounts;
pub mod map;
pub mod mount;
pub mod provision;
pub mod qemu;
pub mod resize_fs;
pub mod resize_partition;

pub use context::BuildContext;

use anyhow::Error;
use std::sync::{Arc, Condvar, Mutex};

use crate::ui::Ui;

/// What a step asks the runner to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Proceed to the next step.
    Continue,
    /// Stop dispatch; the step recorded its error in the context.
    Halt,
    /// Stop dispatch because of external cancellation.
    Cancel,
}

/// One pipeline stage.
///
/// `execute` may only read context fields written by earlier steps and must
/// write exactly the fields it declares. `cleanup` must be idempotent and
/// must not escalate failures: teardown problems are warned through the UI so
/// they never mask the run's primary error.
pub trait Step {
    /// Short name for progress and warning messages.
    fn name(&self) -> &'static str;

    fn execute(&mut self, ctx: &mut BuildContext, ui: &dyn Ui) -> StepOutcome;

    fn cleanup(&mut self, ctx: &mut BuildContext, ui: &dyn Ui);
}

/// Record an error in the context and halt.
///
/// The usual tail of a step's `execute`:
/// `match work() { Ok(..) => StepOutcome::Continue, Err(e) => halt(ctx, e) }`
pub fn halt(ctx: &mut BuildContext, err: Error) -> StepOutcome {
    ctx.error = Some(err);
    StepOutcome::Halt
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenState {
    Running,
    Cancelled,
    Finished,
}

/// Cooperative cancellation flag shared between the run, its watcher thread,
/// and external callers.
///
/// `cancel()` requests a stop; the runner honors it at its next step
/// boundary, and blocking hooks are expected to poll it between external
/// commands. `wait()` lets the watcher block until cancel-or-finish without
/// spinning.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<(Mutex<TokenState>, Condvar)>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(TokenState::Running), Condvar::new())),
        }
    }

    /// Request cancellation. Idempotent; a no-op after `finish()`.
    pub fn cancel(&self) {
        let (lock, cond) = &*self.inner;
        let mut state = lock.lock().unwrap_or_else(|e| e.into_inner());
        if *state == TokenState::Running {
            *state = TokenState::Cancelled;
            cond.notify_all();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(|e| e.into_inner()) == TokenState::Cancelled
    }

    /// Mark the run complete so waiting watchers unblock.
    pub fn finish(&self) {
        let (lock, cond) = &*self.inner;
        let mut state = lock.lock().unwrap_or_else(|e| e.into_inner());
        if *state == TokenState::Running {
            *state = TokenState::Finished;
            cond.notify_all();
        }
    }

    /// Block until the token leaves the running state. Returns true if the
    /// run was cancelled, false if it finished normally.
    pub fn wait(&self) -> bool {
        let (lock, cond) = &*self.inner;
        let mut state = lock.lock().unwrap_or_else(|e| e.into_inner());
        while *state == TokenState::Running {
            state = cond.wait(state).unwrap_or_else(|e| e.into_inner());
        }
        *state == TokenState::Cancelled
    }
}

/// Owned sequential scheduler with a reverse-order cleanup sweep.
pub struct Runner {
    steps: Vec<Box<dyn Step>>,
    token: CancelToken,
}

impl Runner {
    pub fn new(steps: Vec<Box<dyn Step>>, token: CancelToken) -> Self {
        Self { steps, token }
    }

    /// Execute the steps, then clean up.
    ///
    /// Dispatch stops at a Halt or Cancel outcome or when the token is
    /// cancelled between steps. Every step that executed is cleaned up in
    /// reverse order regardless of where dispatch stopped.
    pub fn run(&mut self, ctx: &mut BuildContext, ui: &dyn Ui) {
        let token = self.token.clone();
        let mut executed = 0;

        for step in self.steps.iter_mut() {
            if token.is_cancelled() {
                ctx.cancelled = true;
                break;
            }
            executed += 1;
            match step.execute(ctx, ui) {
                StepOutcome::Continue => {}
                StepOutcome::Halt => {
                    ctx.halted = true;
                    break;
                }
                StepOutcome::Cancel => {
                    ctx.cancelled = true;
                    break;
                }
            }
        }

        // A cancel signal that arrived during the final step still counts.
        if token.is_cancelled() {
            ctx.cancelled = true;
        }

        for step in self.steps[..executed].iter_mut().rev() {
            step.cleanup(ctx, ui);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

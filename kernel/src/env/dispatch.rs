//! Dispatcher
//!
//! Dispatching is split in two. [`EnvTable::prepare_run`] does the
//! bookkeeping under the table lock and says what should happen next; the
//! caller then drops the lock and acts on it through a [`Machine`], which
//! never returns.

use log::debug;

use super::id::EnvId;
use super::status::EnvStatus;
use super::table::EnvTable;
use super::trapframe::{env_pop_tf, TrapFrame};
use crate::error::KernelError;

/// The two ways control leaves the environment core.
pub trait Machine: Sync {
    /// Restore `tf` and continue executing it.
    fn enter(&self, tf: &TrapFrame) -> !;

    /// Hand the CPU to the scheduler.
    fn sched_yield(&self) -> !;
}

/// Outcome of [`EnvTable::prepare_run`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Resume this frame
    Enter(TrapFrame),
    /// Nothing to run; go back to the scheduler
    Yield,
}

impl<const N: usize> EnvTable<N> {
    /// Make `target` the current environment.
    ///
    /// A DYING current environment is freed here. So is a DYING target, in
    /// which case there is nothing to run and the result is
    /// [`Dispatch::Yield`]. A RUNNING current environment is preempted back
    /// to RUNNABLE.
    pub fn prepare_run(&mut self, target: EnvId) -> Result<Dispatch, KernelError> {
        let slot = self.resolve(target, false)?;

        if let Some(cur) = self.current {
            match self.envs[cur].status {
                EnvStatus::Dying => {
                    self.free_slot(cur);
                    if cur == slot {
                        return Ok(Dispatch::Yield);
                    }
                }
                EnvStatus::Running => self.envs[cur].status.transition(EnvStatus::Runnable),
                _ => {}
            }
        }

        if self.envs[slot].status == EnvStatus::Dying {
            self.free_slot(slot);
            return Ok(Dispatch::Yield);
        }

        debug!("envrun {}: {}", self.envs[slot].status, slot);

        self.current = Some(slot);
        let env = &mut self.envs[slot];
        env.status.transition(EnvStatus::Running);
        env.runs = env.runs.wrapping_add(1);
        Ok(Dispatch::Enter(env.tf))
    }
}

/// [`Machine`] for the real CPU.
pub struct X86Machine {
    scheduler: fn() -> !,
}

impl X86Machine {
    /// `scheduler` picks the next environment and calls back into
    /// [`super::run`]; it must not return.
    pub const fn new(scheduler: fn() -> !) -> Self {
        Self { scheduler }
    }
}

impl Machine for X86Machine {
    fn enter(&self, tf: &TrapFrame) -> ! {
        // SAFETY: frames only come out of `prepare_run`, so they were set up
        // by `alloc` with valid selectors and saved by the trap path since.
        unsafe { env_pop_tf(tf) }
    }

    fn sched_yield(&self) -> ! {
        (self.scheduler)()
    }
}

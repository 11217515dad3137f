//! Environment lifecycle
//!
//! Allocation, destruction and freeing on top of [`EnvTable`]. Every status
//! change goes through [`EnvStatus::transition`].

use log::{info, warn};

use super::id::EnvId;
use super::status::EnvStatus;
use super::table::{EnvTable, EnvType};
use super::trapframe::{Segments, TrapFrame};
use crate::config::USTACKSIZE;
use crate::error::KernelError;
use crate::gdt::{GD_KD, GD_KT, GD_UD, GD_UT};
use crate::loader::{self, AddressSpace, SymbolResolver};

/// What [`EnvTable::destroy`] did with its target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destroyed {
    /// Marked DYING; reclaimed when next seen by the dispatcher
    Dying,
    /// Was the current environment and has been freed; the caller must
    /// yield to the scheduler
    FreedCurrent,
}

/// Selectors a new environment of type `env_type` starts with.
pub fn initial_segments(env_type: EnvType) -> Segments {
    if cfg!(feature = "kspace") || env_type == EnvType::Kernel {
        Segments {
            code: GD_KT,
            data: GD_KD,
        }
    } else {
        Segments {
            code: GD_UT,
            data: GD_UD,
        }
    }
}

impl<const N: usize> EnvTable<N> {
    /// Identifier of the caller for log lines, zero outside any environment.
    fn log_prefix(&self) -> EnvId {
        self.current().unwrap_or(EnvId::NONE)
    }

    /// Allocate and initialize a new environment.
    ///
    /// The new environment is RUNNABLE with a fresh identifier, zeroed
    /// registers, the initial selectors for `env_type` and its own stack.
    /// Nothing changes if there is no free slot or no stack space left.
    pub fn alloc(&mut self, parent_id: EnvId, env_type: EnvType) -> Result<EnvId, KernelError> {
        let slot = self.free_list.ok_or(KernelError::NoFreeEnv)?;
        let stack_top = self.stack_top;
        let next_stack_top = stack_top.checked_sub(USTACKSIZE).ok_or(KernelError::NoMem)?;

        let env = &mut self.envs[slot];
        let generation = EnvId::next_generation(env.id, N);
        let id = EnvId::encode(generation, slot);
        let next_free = env.link;

        env.id = id;
        env.parent_id = parent_id;
        env.env_type = env_type;
        env.runs = 0;
        env.link = None;
        env.tf = TrapFrame::initial(initial_segments(env_type), stack_top);
        env.status.transition(EnvStatus::Runnable);

        self.free_list = next_free;
        self.stack_top = next_stack_top;

        info!("[{}] new env {}", self.log_prefix(), id);
        Ok(id)
    }

    /// Return a slot to the free list.
    ///
    /// The record is left as is; the next allocation overwrites it.
    pub(super) fn free_slot(&mut self, slot: usize) {
        info!("[{}] free env {}", self.log_prefix(), self.envs[slot].id);

        let env = &mut self.envs[slot];
        env.status.transition(EnvStatus::Free);
        env.link = self.free_list;
        self.free_list = Some(slot);

        if self.current == Some(slot) {
            self.current = None;
        }
    }

    /// Free the environment `id`.
    pub fn free(&mut self, id: EnvId) -> Result<(), KernelError> {
        let slot = self.resolve(id, false)?;
        self.free_slot(slot);
        Ok(())
    }

    /// Request destruction of `id`.
    ///
    /// The current environment is freed on the spot; anything else is left
    /// DYING for the dispatcher to reclaim.
    pub fn destroy(&mut self, id: EnvId) -> Result<Destroyed, KernelError> {
        let slot = self.resolve(id, false)?;

        let status = &mut self.envs[slot].status;
        if *status != EnvStatus::Dying {
            status.transition(EnvStatus::Dying);
        }

        if self.current == Some(slot) {
            self.free_slot(slot);
            Ok(Destroyed::FreedCurrent)
        } else {
            Ok(Destroyed::Dying)
        }
    }

    /// Load `binary` into `mem` and allocate an environment to run it.
    ///
    /// The image is validated, loaded and bound before a slot is taken, so
    /// a rejected executable leaves the table as it was.
    pub fn create(
        &mut self,
        binary: &[u8],
        env_type: EnvType,
        mem: &mut dyn AddressSpace,
        resolver: &dyn SymbolResolver,
    ) -> Result<EnvId, KernelError> {
        let resolver = cfg!(feature = "kspace").then_some(resolver);
        let image = loader::load_icode(binary, mem, resolver).map_err(|err| {
            warn!("Rejected executable: {}", err);
            KernelError::from(err)
        })?;

        let id = self.alloc(EnvId::NONE, env_type)?;
        self.envs[id.slot(N)].tf.rip = image.entry;
        Ok(id)
    }
}

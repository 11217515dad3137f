//! Environment Table
//!
//! Fixed array of environment records plus the free list threading the
//! unused ones. The table owns every environment for the lifetime of the
//! kernel; slots are never added or removed, only recycled.

use super::id::EnvId;
use super::status::EnvStatus;
use super::trapframe::TrapFrame;
use crate::config::{ENVGENSHIFT, NENV, USTACKTOP};
use crate::error::KernelError;

/// Addressing mode an environment was created for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvType {
    /// Runs with kernel privilege in the kernel's address space
    Kernel,
    /// Ordinary environment
    #[default]
    User,
}

/// A single environment record
#[derive(Debug, Clone)]
pub struct Env {
    /// Saved registers, valid while not running
    pub(super) tf: TrapFrame,
    /// Next free slot, only meaningful while on the free list
    pub(super) link: Option<usize>,
    /// Identifier currently bound to this slot
    pub(super) id: EnvId,
    /// Creator, or `EnvId::NONE`
    pub(super) parent_id: EnvId,
    pub(super) env_type: EnvType,
    pub(super) status: EnvStatus,
    /// Number of times dispatched
    pub(super) runs: u32,
}

impl Env {
    const EMPTY: Env = Env {
        tf: TrapFrame::new(),
        link: None,
        id: EnvId::NONE,
        parent_id: EnvId::NONE,
        env_type: EnvType::User,
        status: EnvStatus::Free,
        runs: 0,
    };

    pub fn id(&self) -> EnvId {
        self.id
    }

    pub fn parent_id(&self) -> EnvId {
        self.parent_id
    }

    pub fn env_type(&self) -> EnvType {
        self.env_type
    }

    pub fn status(&self) -> EnvStatus {
        self.status
    }

    pub fn runs(&self) -> u32 {
        self.runs
    }

    pub fn trapframe(&self) -> &TrapFrame {
        &self.tf
    }

    pub fn trapframe_mut(&mut self) -> &mut TrapFrame {
        &mut self.tf
    }

    /// Change status, e.g. to block on an event or to mark an environment
    /// running on another CPU as DYING. Slots go back to FREE only through
    /// [`EnvTable::free`].
    pub fn set_status(&mut self, status: EnvStatus) {
        debug_assert!(status != EnvStatus::Free, "use EnvTable::free to release a slot");
        if status != EnvStatus::Free {
            self.status.transition(status);
        }
    }

    pub fn is_free(&self) -> bool {
        self.status == EnvStatus::Free
    }
}

/// Global environment table
///
/// `N` is the number of slots. It must be a power of two no larger than
/// `1 << ENVGENSHIFT` so slot indices and generations never overlap.
pub struct EnvTable<const N: usize = NENV> {
    pub(super) envs: [Env; N],
    /// Head of the free list
    pub(super) free_list: Option<usize>,
    /// Slot of the environment this CPU is running
    pub(super) current: Option<usize>,
    /// Top of the next environment stack
    pub(super) stack_top: u64,
}

impl<const N: usize> EnvTable<N> {
    const VALID_CAPACITY: () = assert!(
        N.is_power_of_two() && N <= 1 << ENVGENSHIFT,
        "environment table capacity must be a power of two within the generation shift"
    );

    /// Create a table with every slot free.
    ///
    /// The free list is in ascending order, so the first allocation gets
    /// slot 0.
    pub const fn new() -> Self {
        let () = Self::VALID_CAPACITY;

        let mut table = Self {
            envs: [Env::EMPTY; N],
            free_list: None,
            current: None,
            stack_top: USTACKTOP,
        };
        table.seed_free_list();
        table
    }

    /// Reset to the freshly created state.
    pub fn init(&mut self) {
        for env in self.envs.iter_mut() {
            *env = Env::EMPTY;
        }
        self.current = None;
        self.stack_top = USTACKTOP;
        self.seed_free_list();
    }

    const fn seed_free_list(&mut self) {
        let mut slot = N;
        let mut head = None;
        while slot > 0 {
            slot -= 1;
            self.envs[slot].link = head;
            head = Some(slot);
        }
        self.free_list = head;
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Identifier of the environment this CPU is running.
    pub fn current(&self) -> Option<EnvId> {
        self.current.map(|slot| self.envs[slot].id)
    }

    pub fn current_env(&self) -> Option<&Env> {
        self.current.map(|slot| &self.envs[slot])
    }

    pub fn current_env_mut(&mut self) -> Option<&mut Env> {
        self.current.map(|slot| &mut self.envs[slot])
    }

    /// Raw slot access, regardless of status.
    pub fn get(&self, slot: usize) -> Option<&Env> {
        self.envs.get(slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Env> {
        self.envs.iter()
    }

    /// Number of slots on the free list.
    pub fn free_count(&self) -> usize {
        let mut count = 0;
        let mut next = self.free_list;
        while let Some(slot) = next {
            count += 1;
            next = self.envs[slot].link;
        }
        count
    }

    /// Resolve `id` to a slot index.
    ///
    /// `EnvId::NONE` names the current environment. Otherwise the slot must
    /// be in use and hold exactly `id`. With `check_perm`, the result must
    /// be the current environment or one of its immediate children.
    pub(super) fn resolve(&self, id: EnvId, check_perm: bool) -> Result<usize, KernelError> {
        let slot = if id.is_none() {
            self.current.ok_or(KernelError::BadEnv)?
        } else {
            let slot = id.slot(N);
            let env = &self.envs[slot];
            if env.is_free() || env.id != id {
                return Err(KernelError::BadEnv);
            }
            slot
        };

        if check_perm {
            let caller = self.current().ok_or(KernelError::BadEnv)?;
            let env = &self.envs[slot];
            if env.id != caller && env.parent_id != caller {
                return Err(KernelError::BadEnv);
            }
        }

        Ok(slot)
    }

    /// Look up a live environment by identifier.
    pub fn lookup(&self, id: EnvId, check_perm: bool) -> Result<&Env, KernelError> {
        let slot = self.resolve(id, check_perm)?;
        Ok(&self.envs[slot])
    }

    pub fn lookup_mut(&mut self, id: EnvId, check_perm: bool) -> Result<&mut Env, KernelError> {
        let slot = self.resolve(id, check_perm)?;
        Ok(&mut self.envs[slot])
    }
}

impl<const N: usize> Default for EnvTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_table_is_free() {
        let table = EnvTable::<8>::new();
        assert_eq!(table.capacity(), 8);
        assert_eq!(table.free_count(), 8);
        assert!(table.current().is_none());
        assert!(table.iter().all(|env| env.is_free() && env.id().is_none()));
    }

    #[test]
    fn test_free_list_ascending() {
        let table = EnvTable::<4>::new();
        assert_eq!(table.free_list, Some(0));
        assert_eq!(table.envs[0].link, Some(1));
        assert_eq!(table.envs[2].link, Some(3));
        assert_eq!(table.envs[3].link, None);
    }

    #[test]
    fn test_lookup_free_slot_fails() {
        let table = EnvTable::<4>::new();
        assert_eq!(
            table.lookup(EnvId::encode(EnvId::MIN_GENERATION, 1), false).err(),
            Some(KernelError::BadEnv)
        );
    }

    #[test]
    fn test_lookup_zero_without_current_fails() {
        let table = EnvTable::<4>::new();
        assert_eq!(table.lookup(EnvId::NONE, false).err(), Some(KernelError::BadEnv));
    }
}

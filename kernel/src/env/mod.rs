//! Environments
//!
//! An environment is the kernel's unit of isolated execution. This module
//! holds the environment table and everything that moves environments
//! through their lifecycle:
//!
//! - [`id`]: identifier layout (slot index plus generation)
//! - [`table`]: the fixed table, its free list and lookup
//! - [`lifecycle`]: allocation, destruction, freeing, image loading
//! - [`dispatch`]: making an environment current and entering it
//!
//! [`EnvManager`] wraps a table in a lock together with the [`Machine`]
//! used to leave the core, and is what the rest of the kernel talks to
//! through the global [`ENV_MANAGER`].

pub mod dispatch;
pub mod id;
pub mod lifecycle;
pub mod status;
pub mod table;
pub mod trapframe;

pub use dispatch::{Dispatch, Machine, X86Machine};
pub use id::EnvId;
pub use lifecycle::Destroyed;
pub use status::EnvStatus;
pub use table::{Env, EnvTable, EnvType};
pub use trapframe::{env_pop_tf, PushRegs, Segments, TrapFrame};

use log::error;
use spin::{Mutex, Once};

use crate::config::{NENV, UTOP};
use crate::error::KernelError;
use crate::loader::{AddressSpace, FlatMemory, SymbolResolver};
use crate::symbols::KERNEL_SYMBOLS;

/// The environment table and the way out of the core
pub struct EnvManager<const N: usize = NENV> {
    table: Mutex<EnvTable<N>>,
    machine: Once<&'static dyn Machine>,
}

impl<const N: usize> EnvManager<N> {
    pub const fn new() -> Self {
        Self {
            table: Mutex::new(EnvTable::new()),
            machine: Once::new(),
        }
    }

    /// Reset the table and register the machine. Only the first machine
    /// registered is kept.
    pub fn init(&self, machine: &'static dyn Machine) {
        self.table.lock().init();
        self.machine.call_once(|| machine);
    }

    /// The locked table, for the scheduler and diagnostics.
    pub fn table(&self) -> &Mutex<EnvTable<N>> {
        &self.table
    }

    fn machine(&self) -> &'static dyn Machine {
        match self.machine.get() {
            Some(machine) => *machine,
            None => panic!("env: no machine registered"),
        }
    }

    /// Create an environment from `binary`, reporting failures.
    pub fn try_create(
        &self,
        binary: &[u8],
        env_type: EnvType,
        mem: &mut dyn AddressSpace,
        resolver: &dyn SymbolResolver,
    ) -> Result<EnvId, KernelError> {
        self.table.lock().create(binary, env_type, mem, resolver)
    }

    /// Boot-time creation. Failure is fatal.
    pub fn create_in(
        &self,
        binary: &[u8],
        env_type: EnvType,
        mem: &mut dyn AddressSpace,
        resolver: &dyn SymbolResolver,
    ) -> EnvId {
        if binary.is_empty() {
            panic!("env_create: empty binary");
        }
        match self.try_create(binary, env_type, mem, resolver) {
            Ok(id) => id,
            Err(KernelError::InvalidExe) => panic!("env_create: Can't load ELF image"),
            Err(err) => panic!("env_create: Can't allocate new environment: {}", err),
        }
    }

    /// Dispatch `target`. Never returns.
    ///
    /// Panics if `target` does not name a live environment.
    pub fn run(&self, target: EnvId) -> ! {
        let next = self.table.lock().prepare_run(target);
        let machine = self.machine();

        match next {
            Ok(Dispatch::Enter(tf)) => machine.enter(&tf),
            Ok(Dispatch::Yield) => machine.sched_yield(),
            Err(err) => {
                error!("env_run: {} is not runnable: {}", target, err);
                panic!("env_run: bad target {}", target);
            }
        }
    }

    /// Destroy `id`.
    ///
    /// Returns once the target is DYING. Destroying the current environment
    /// does not return: it is freed and the CPU goes back to the scheduler.
    pub fn destroy(&self, id: EnvId) -> Result<(), KernelError> {
        let outcome = self.table.lock().destroy(id)?;
        if outcome == Destroyed::FreedCurrent {
            self.machine().sched_yield();
        }
        Ok(())
    }

    /// Terminate the calling environment.
    pub fn exit_current(&self) -> ! {
        let current = self.table.lock().current();
        let Some(id) = current else {
            error!("env_exit: no current environment");
            panic!("env_exit: no current environment");
        };

        if let Err(err) = self.destroy(id) {
            panic!("env_exit: cannot destroy {}: {}", id, err);
        }
        unreachable!("env_exit: destroyed environment {} kept running", id);
    }

    /// Save `tf` into the calling environment and yield.
    pub fn yield_current(&self, tf: &TrapFrame) -> ! {
        {
            let mut table = self.table.lock();
            let Some(env) = table.current_env_mut() else {
                error!("env_yield: no current environment");
                panic!("env_yield: no current environment");
            };
            *env.trapframe_mut() = *tf;
        }
        self.machine().sched_yield()
    }
}

impl<const N: usize> Default for EnvManager<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Global environment manager
pub static ENV_MANAGER: EnvManager = EnvManager::new();

/// Seed the global table, register `machine` and load this CPU's segments.
pub fn init(machine: &'static dyn Machine) {
    ENV_MANAGER.init(machine);
    crate::gdt::init_percpu();
}

/// Load `binary` as a new environment in the flat address space below
/// `UTOP`. Panics on failure.
pub fn create(binary: &[u8], env_type: EnvType) -> EnvId {
    // SAFETY: before paging, everything below UTOP is identity mapped and
    // reserved for environments.
    let mut mem = unsafe { FlatMemory::new(UTOP) };
    let symbols = KERNEL_SYMBOLS.read();
    ENV_MANAGER.create_in(binary, env_type, &mut mem, &*symbols)
}

pub fn run(target: EnvId) -> ! {
    ENV_MANAGER.run(target)
}

pub fn destroy(id: EnvId) -> Result<(), KernelError> {
    ENV_MANAGER.destroy(id)
}

pub fn exit_current() -> ! {
    ENV_MANAGER.exit_current()
}

pub fn yield_current(tf: &TrapFrame) -> ! {
    ENV_MANAGER.yield_current(tf)
}

//! Kernel configuration constants.
//!
//! This module contains compile-time configuration for the environment
//! core. Values here affect the environment table geometry, identifier
//! layout and the flat memory layout environments are loaded into.

/// Page size (4 KB).
pub const PAGE_SIZE: usize = 4096;

/// log2 of the environment table capacity.
pub const LOG2NENV: u32 = 10;

/// Number of environment slots.
pub const NENV: usize = 1 << LOG2NENV;

/// Bit position where the generation part of an environment ID starts.
///
/// Must be at least `LOG2NENV`.
pub const ENVGENSHIFT: u32 = 12;

/// Top of the stack handed to the first environment.
///
/// Every later allocation gets the range right below the previous one.
pub const USTACKTOP: u64 = 0x0200_0000;

/// Stack size per environment (two pages).
pub const USTACKSIZE: u64 = 2 * PAGE_SIZE as u64;

/// Upper address bound for loaded images. No environment segment may reach it.
pub const UTOP: u64 = 0x0000_0080_0000_0000;

const _: () = assert!(ENVGENSHIFT >= LOG2NENV);

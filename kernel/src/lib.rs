//! Environment core of a teaching x86_64 kernel
//!
//! This crate allocates, loads, identifies and dispatches environments, the
//! kernel's unit of isolated execution.
//!
//! # Layout
//!
//! - [`env`]: environment table, lifecycle and dispatcher
//! - [`loader`]: ELF64 validation, segment loading and symbol binding
//! - [`symbols`]: kernel function symbols for the binder
//! - [`gdt`], [`rtc`], [`serial`]: the hardware the core touches
//!
//! The crate is `no_std`. Under `cargo test` it links `std` so everything
//! except the hardware paths runs on the host.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod config;
pub mod env;
pub mod error;
pub mod gdt;
pub mod loader;
pub mod rtc;
pub mod serial;
pub mod symbols;

#[cfg(all(not(test), target_os = "none"))]
pub mod panic;

#[cfg(test)]
mod tests;

pub use env::{EnvId, EnvStatus, EnvType};
pub use error::KernelError;

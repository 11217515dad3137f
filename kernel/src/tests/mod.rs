//! Kernel Unit Tests Module
//!
//! Scenario tests that cross module boundaries: loading images into
//! environments, lifecycle sequences and dispatch.

mod elf_builder;

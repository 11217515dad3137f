//! Kernel error codes.
//!
//! Every recoverable failure of the environment core is reported as one of
//! these. The numeric codes match the classic negative `-E_*` convention
//! used at the system call boundary.

use core::fmt;

/// Recoverable error reported to the immediate caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Environment doesn't exist, is stale, or the caller may not touch it.
    BadEnv,
    /// Every slot of the environment table is in use.
    NoFreeEnv,
    /// Ran out of memory (environment stack watermark exhausted).
    NoMem,
    /// The executable image failed validation.
    InvalidExe,
}

impl KernelError {
    /// Negative error code as returned through the system call ABI.
    pub const fn code(self) -> i32 {
        match self {
            Self::BadEnv => -2,
            Self::NoMem => -4,
            Self::NoFreeEnv => -5,
            Self::InvalidExe => -8,
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadEnv => write!(f, "bad environment"),
            Self::NoFreeEnv => write!(f, "out of environments"),
            Self::NoMem => write!(f, "out of memory"),
            Self::InvalidExe => write!(f, "invalid executable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_negative_and_distinct() {
        let errors = [
            KernelError::BadEnv,
            KernelError::NoFreeEnv,
            KernelError::NoMem,
            KernelError::InvalidExe,
        ];
        for (i, a) in errors.iter().enumerate() {
            assert!(a.code() < 0);
            for b in &errors[i + 1..] {
                assert_ne!(a.code(), b.code());
            }
        }
    }
}

//! Environment lifecycle states.

use core::fmt;

/// Lifecycle status of an environment slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvStatus {
    /// Slot is on the free list.
    #[default]
    Free,
    /// Destruction requested; reclaimed the next time the dispatcher sees it.
    Dying,
    /// Ready to be dispatched.
    Runnable,
    /// Currently dispatched.
    Running,
    /// Blocked on an event. Not produced by this core, but preserved.
    NotRunnable,
}

impl EnvStatus {
    /// Name as printed in dispatch traces.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Free => "FREE",
            Self::Dying => "DYING",
            Self::Runnable => "RUNNABLE",
            Self::Running => "RUNNING",
            Self::NotRunnable => "NOT_RUNNABLE",
        }
    }

    /// Whether moving from `self` to `to` is a legal lifecycle step.
    pub const fn can_transition_to(self, to: EnvStatus) -> bool {
        use EnvStatus::*;

        matches!(
            (self, to),
            (Free, Runnable)
                | (Runnable, Running)
                | (Runnable, NotRunnable)
                | (Running, Runnable)
                | (Running, NotRunnable)
                | (NotRunnable, Runnable)
                | (Runnable | Running | NotRunnable, Dying)
                | (Dying | Runnable | Running | NotRunnable, Free)
        )
    }

    /// Move to `to`, asserting legality in debug builds.
    pub fn transition(&mut self, to: EnvStatus) {
        debug_assert!(
            self.can_transition_to(to),
            "illegal env transition {} -> {}",
            self.name(),
            to.name()
        );
        *self = to;
    }
}

impl fmt::Display for EnvStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_path() {
        let mut status = EnvStatus::Free;
        status.transition(EnvStatus::Runnable);
        status.transition(EnvStatus::Running);
        status.transition(EnvStatus::Runnable);
        status.transition(EnvStatus::Running);
        status.transition(EnvStatus::Dying);
        status.transition(EnvStatus::Free);
        assert_eq!(status, EnvStatus::Free);
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!EnvStatus::Free.can_transition_to(EnvStatus::Running));
        assert!(!EnvStatus::Free.can_transition_to(EnvStatus::Free));
        assert!(!EnvStatus::Dying.can_transition_to(EnvStatus::Running));
        assert!(!EnvStatus::Dying.can_transition_to(EnvStatus::Runnable));
        assert!(!EnvStatus::NotRunnable.can_transition_to(EnvStatus::Running));
    }

    #[test]
    #[should_panic(expected = "illegal env transition")]
    #[cfg(debug_assertions)]
    fn test_illegal_transition_asserts() {
        let mut status = EnvStatus::Dying;
        status.transition(EnvStatus::Running);
    }
}

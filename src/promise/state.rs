//! Settlement state tracking for promises
//!
//! A promise owns exactly one `StateCell`, which enforces the
//! single-assignment rule: one transition out of `Pending`, ever.

/// The three-state lifecycle of a promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    /// Not yet settled.
    Pending,
    /// Settled with a success value.
    Resolved,
    /// Settled with a rejection value.
    Rejected,
}

impl PromiseState {
    /// Returns `true` if the state is no longer pending.
    pub fn is_settled(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for PromiseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Resolved => f.write_str("resolved"),
            Self::Rejected => f.write_str("rejected"),
        }
    }
}

/// Single-assignment state holder with a cancellation latch.
///
/// `settle` succeeds at most once; cancellation freezes the cell in its
/// current state and refuses every later transition.
#[derive(Debug)]
pub(crate) struct StateCell {
    current: PromiseState,
    cancelled: bool,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        Self {
            current: PromiseState::Pending,
            cancelled: false,
        }
    }

    pub(crate) fn current(&self) -> PromiseState {
        self.current
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Attempt the transition to `next`. Returns `false` if the cell is
    /// already settled or cancelled, in which case nothing changes.
    pub(crate) fn settle(&mut self, next: PromiseState) -> bool {
        if self.cancelled || self.current.is_settled() || !next.is_settled() {
            return false;
        }
        self.current = next;
        true
    }

    /// Freeze the cell in its current state.
    pub(crate) fn cancel(&mut self) {
        self.cancelled = true;
    }
}

use serde::{Deserialize, Serialize};

/// Side-effect class of a CRM operation.
/// Ordered by how hard the effect is to take back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Effect {
    /// Local only. Nothing leaves the client.
    Pure,
    /// Reads backend state (fetch, export). Safe to repeat.
    Observe,
    /// Patches backend state. The previous value can be written back.
    Mutate,
    /// Deletes backend state. There is no undo.
    Irreversible,
}

impl Effect {
    /// What a caller may do after a failed operation of this class.
    /// Nothing retries automatically; this is only surfaced to the user.
    pub fn recovery(&self) -> Recovery {
        match self {
            Effect::Pure | Effect::Observe => Recovery::Retry,
            Effect::Mutate => Recovery::CheckAndRetry,
            Effect::Irreversible => Recovery::ManualReview,
        }
    }

    /// Whether the UI must ask before running the operation.
    pub fn requires_confirmation(&self) -> bool {
        matches!(self, Effect::Irreversible)
    }

    /// Whether an optimistic local apply can be compensated on failure.
    pub fn compensable(&self) -> bool {
        matches!(self, Effect::Pure | Effect::Mutate)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recovery {
    /// Safe to re-run as is.
    Retry,
    /// Re-fetch first; the record may have changed underneath.
    CheckAndRetry,
    /// A person has to look at what is left.
    ManualReview,
}

/// Any operation with a classified effect.
pub trait Effectful {
    fn effect(&self) -> Effect;
}

/// A change that can be applied to local state ahead of the backend and
/// undone from a snapshot if the backend rejects it.
pub trait Compensable: Effectful {
    /// The local state the change is applied to.
    type Target;
    /// State captured before applying, enough to undo.
    type Snapshot: Clone;

    fn snapshot(&self, target: &Self::Target) -> Self::Snapshot;

    fn apply(&self, target: &mut Self::Target);

    fn compensate(&self, target: &mut Self::Target, snapshot: Self::Snapshot);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptimisticState {
    Applied,
    Confirmed,
    RolledBack,
}

/// Apply / confirm / rollback around a [`Compensable`] change.
///
/// `apply` writes the change locally and keeps the snapshot. `confirm` drops
/// the snapshot once the backend acknowledged. `rollback` restores it.
pub struct Optimistic<C: Compensable> {
    change: C,
    snapshot: Option<C::Snapshot>,
    state: OptimisticState,
}

impl<C: Compensable> Optimistic<C> {
    pub fn apply(change: C, target: &mut C::Target) -> Self {
        let snapshot = change.snapshot(target);
        change.apply(target);
        Self {
            change,
            snapshot: Some(snapshot),
            state: OptimisticState::Applied,
        }
    }

    pub fn change(&self) -> &C {
        &self.change
    }

    pub fn state(&self) -> OptimisticState {
        self.state
    }

    pub fn confirm(&mut self) {
        if self.state == OptimisticState::Applied {
            self.snapshot = None;
            self.state = OptimisticState::Confirmed;
        }
    }

    /// Restore the pre-apply snapshot. Returns false if there is nothing left
    /// to undo (already confirmed or rolled back).
    pub fn rollback(&mut self, target: &mut C::Target) -> bool {
        if self.state != OptimisticState::Applied {
            return false;
        }
        let Some(snapshot) = self.snapshot.take() else {
            return false;
        };
        self.change.compensate(target, snapshot);
        self.state = OptimisticState::RolledBack;
        true
    }
}

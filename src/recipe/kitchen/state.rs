// src/recipe/kitchen/state.rs

//! Pipeline state machine
//!
//! ```text
//! Start -> ResolvingBottle -> UsingBottle -> Verifying -> Installing -> Testing -> Done
//!                          \-> Fetching  -> Verifying -> Patching -> Building -> Installing ...
//! ```
//!
//! Any non-terminal state may end in a [`CookFailure`] naming that state.

use crate::error::Error;
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// A named stage of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CookState {
    Start,
    ResolvingBottle,
    UsingBottle,
    Fetching,
    Verifying,
    Patching,
    Building,
    Installing,
    Testing,
    Done,
}

impl CookState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "Start",
            Self::ResolvingBottle => "ResolvingBottle",
            Self::UsingBottle => "UsingBottle",
            Self::Fetching => "Fetching",
            Self::Verifying => "Verifying",
            Self::Patching => "Patching",
            Self::Building => "Building",
            Self::Installing => "Installing",
            Self::Testing => "Testing",
            Self::Done => "Done",
        }
    }

    /// Whether `next` may follow `self`
    ///
    /// `via_bottle` selects the branch taken out of `Verifying`.
    pub fn can_advance_to(self, next: CookState, via_bottle: bool) -> bool {
        use CookState::*;
        match (self, next) {
            (Start, ResolvingBottle)
            | (ResolvingBottle, UsingBottle)
            | (ResolvingBottle, Fetching)
            | (UsingBottle, Verifying)
            | (Fetching, Verifying)
            | (Patching, Building)
            | (Building, Installing)
            | (Installing, Testing)
            | (Testing, Done) => true,
            (Verifying, Installing) => via_bottle,
            (Verifying, Patching) => !via_bottle,
            _ => false,
        }
    }

    /// Process exit code reported when the pipeline fails in this state
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ResolvingBottle => 10,
            Self::UsingBottle => 11,
            Self::Fetching => 12,
            Self::Verifying => 13,
            Self::Patching => 14,
            Self::Building => 15,
            Self::Installing => 16,
            Self::Testing => 17,
            Self::Start | Self::Done => 1,
        }
    }
}

impl fmt::Display for CookState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of a pipeline run: the stage that failed and why
#[derive(Debug, Error)]
#[error("{stage} failed: {cause}")]
pub struct CookFailure {
    pub stage: CookState,
    #[source]
    pub cause: Error,
    /// States visited before the failure, starting with `Start`
    pub trace: Vec<CookState>,
}

impl CookFailure {
    pub fn new(stage: CookState, cause: Error, trace: Vec<CookState>) -> Self {
        Self {
            stage,
            cause,
            trace,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.stage.exit_code()
    }
}

/// Tracks the current state and the path taken through the pipeline
#[derive(Debug)]
pub(crate) struct Pipeline {
    state: CookState,
    trace: Vec<CookState>,
    via_bottle: bool,
}

impl Pipeline {
    pub(crate) fn new() -> Self {
        Self {
            state: CookState::Start,
            trace: vec![CookState::Start],
            via_bottle: false,
        }
    }

    pub(crate) fn state(&self) -> CookState {
        self.state
    }

    pub(crate) fn trace(&self) -> &[CookState] {
        &self.trace
    }

    /// Move to `next`, rejecting transitions outside the table
    pub(crate) fn enter(&mut self, next: CookState) -> Result<(), CookFailure> {
        if !self.state.can_advance_to(next, self.via_bottle) {
            return Err(self.fail(Error::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            }));
        }
        debug!("Pipeline: {} -> {}", self.state, next);
        if next == CookState::UsingBottle {
            self.via_bottle = true;
        }
        self.state = next;
        self.trace.push(next);
        Ok(())
    }

    /// Enter `next` and run `f` there, attributing any error to `next`
    pub(crate) fn run<T>(
        &mut self,
        next: CookState,
        f: impl FnOnce() -> crate::error::Result<T>,
    ) -> Result<T, CookFailure> {
        self.enter(next)?;
        f().map_err(|cause| self.fail(cause))
    }

    /// Build a failure for the current state
    pub(crate) fn fail(&self, cause: Error) -> CookFailure {
        CookFailure::new(self.state, cause, self.trace.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CookState::*;

    #[test]
    fn test_source_path_is_valid() {
        let mut p = Pipeline::new();
        for s in [ResolvingBottle, Fetching, Verifying, Patching, Building, Installing, Testing, Done] {
            p.enter(s).unwrap();
        }
        assert_eq!(p.trace().len(), 9);
        assert_eq!(p.state(), Done);
    }

    #[test]
    fn test_bottle_path_skips_build() {
        let mut p = Pipeline::new();
        for s in [ResolvingBottle, UsingBottle, Verifying, Installing, Testing, Done] {
            p.enter(s).unwrap();
        }
        assert!(!p.trace().contains(&Fetching));
        assert!(!p.trace().contains(&Building));
    }

    #[test]
    fn test_branch_out_of_verifying_follows_path() {
        let mut bottle = Pipeline::new();
        bottle.enter(ResolvingBottle).unwrap();
        bottle.enter(UsingBottle).unwrap();
        bottle.enter(Verifying).unwrap();
        let err = bottle.enter(Patching).unwrap_err();
        assert_eq!(err.stage, Verifying);
        assert!(matches!(err.cause, Error::InvalidTransition { .. }));

        let mut source = Pipeline::new();
        source.enter(ResolvingBottle).unwrap();
        source.enter(Fetching).unwrap();
        source.enter(Verifying).unwrap();
        assert!(source.enter(Installing).is_err());
    }

    #[test]
    fn test_cannot_skip_resolution() {
        let mut p = Pipeline::new();
        assert!(p.enter(Fetching).is_err());
    }

    #[test]
    fn test_run_attributes_failure_to_stage() {
        let mut p = Pipeline::new();
        p.enter(ResolvingBottle).unwrap();
        p.enter(Fetching).unwrap();
        let failure = p
            .run(Verifying, || -> crate::error::Result<()> {
                Err(Error::ChecksumMismatch {
                    expected: "sha256:aa".into(),
                    actual: "sha256:bb".into(),
                })
            })
            .unwrap_err();
        assert_eq!(failure.stage, Verifying);
        assert_eq!(failure.exit_code(), 13);
        assert_eq!(failure.trace.last(), Some(&Verifying));
        assert!(failure.to_string().starts_with("Verifying failed"));
    }
}

//! Session state and the phase machine for one arena round.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use super::judge::JudgeConfig;
use super::types::{ArenaError, ArenaRequest, ContestantConfig};

/// Phases of one arena round. `SearchPending` only occurs when search is
/// enabled, `JudgePending` is entered even when the judge is skipped (the
/// skip is a zero-latency transition out of it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    SearchPending,
    Contesting,
    JudgePending,
    Completed,
    Cancelled,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Cancelled)
    }

    fn allowed_transitions(&self) -> &'static [Phase] {
        match self {
            Phase::Idle => &[Phase::SearchPending, Phase::Contesting],
            Phase::SearchPending => &[Phase::Contesting],
            Phase::Contesting => &[Phase::JudgePending],
            Phase::JudgePending => &[Phase::Completed],
            Phase::Completed | Phase::Cancelled => &[],
        }
    }

    /// `Cancelled` is reachable from any non-terminal phase; everything else
    /// follows the forward table.
    pub fn can_transition(&self, to: Phase) -> bool {
        if to == Phase::Cancelled {
            return !self.is_terminal();
        }
        self.allowed_transitions().contains(&to)
    }
}

/// Cooperative cancellation token shared between the coordinator and its
/// workers. Cancelling does not interrupt in-flight network calls; workers
/// check the token at entry and again before reporting, and suppress their
/// report when it is set.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// One user-initiated round, owned exclusively by the coordinator. Created
/// on start, discarded when the round completes or is cancelled.
#[derive(Debug)]
pub struct ArenaSession {
    id: Uuid,
    prompt: String,
    enrichment: Option<String>,
    phase: Phase,
    contestants: Vec<ContestantConfig>,
    judge: Option<JudgeConfig>,
    cancel: CancelToken,
}

impl ArenaSession {
    pub fn new(req: &ArenaRequest, cancel: CancelToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: req.prompt.clone(),
            enrichment: None,
            phase: Phase::Idle,
            contestants: req.contestants.clone(),
            judge: req.judge.clone(),
            cancel,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn contestants(&self) -> &[ContestantConfig] {
        &self.contestants
    }

    pub fn judge(&self) -> Option<&JudgeConfig> {
        self.judge.as_ref()
    }

    pub fn enrichment(&self) -> Option<&str> {
        self.enrichment.as_deref()
    }

    pub fn set_enrichment(&mut self, block: String) {
        self.enrichment = Some(block);
    }

    pub fn take_enrichment(&mut self) -> Option<String> {
        self.enrichment.take()
    }

    /// Advance the phase machine. Illegal transitions are coordinator bugs
    /// and surface as errors rather than silently corrupting the round.
    pub fn advance(&mut self, to: Phase) -> Result<(), ArenaError> {
        if !self.phase.can_transition(to) {
            return Err(ArenaError::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        Ok(())
    }

    /// Cancel the round: sets the shared token and moves to `Cancelled`
    /// unless the round already reached a terminal phase.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        if !self.phase.is_terminal() {
            self.phase = Phase::Cancelled;
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_follow_the_table() {
        assert!(Phase::Idle.can_transition(Phase::SearchPending));
        assert!(Phase::Idle.can_transition(Phase::Contesting));
        assert!(Phase::SearchPending.can_transition(Phase::Contesting));
        assert!(Phase::Contesting.can_transition(Phase::JudgePending));
        assert!(Phase::JudgePending.can_transition(Phase::Completed));

        assert!(!Phase::Idle.can_transition(Phase::JudgePending));
        assert!(!Phase::Idle.can_transition(Phase::Completed));
        assert!(!Phase::SearchPending.can_transition(Phase::JudgePending));
        assert!(!Phase::Contesting.can_transition(Phase::Completed));
        assert!(!Phase::JudgePending.can_transition(Phase::Contesting));
    }

    #[test]
    fn cancelled_is_reachable_from_every_non_terminal_phase() {
        for phase in [
            Phase::Idle,
            Phase::SearchPending,
            Phase::Contesting,
            Phase::JudgePending,
        ] {
            assert!(phase.can_transition(Phase::Cancelled), "{phase:?}");
        }
        assert!(!Phase::Completed.can_transition(Phase::Cancelled));
        assert!(!Phase::Cancelled.can_transition(Phase::Cancelled));
    }

    #[test]
    fn terminal_phases_admit_nothing() {
        for to in [
            Phase::Idle,
            Phase::SearchPending,
            Phase::Contesting,
            Phase::JudgePending,
            Phase::Completed,
        ] {
            assert!(!Phase::Completed.can_transition(to), "{to:?}");
            assert!(!Phase::Cancelled.can_transition(to), "{to:?}");
        }
    }

    #[test]
    fn session_advance_rejects_illegal_transition() {
        let req = ArenaRequest::single("prompt", "model-a");
        let mut session = ArenaSession::new(&req, CancelToken::new());
        let err = session.advance(Phase::Completed).unwrap_err();
        assert!(matches!(
            err,
            ArenaError::InvalidTransition {
                from: Phase::Idle,
                to: Phase::Completed
            }
        ));
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[test]
    fn session_cancel_sets_token_and_phase() {
        let req = ArenaRequest::single("prompt", "model-a");
        let token = CancelToken::new();
        let mut session = ArenaSession::new(&req, token.clone());
        session.advance(Phase::Contesting).unwrap();
        session.cancel();
        assert_eq!(session.phase(), Phase::Cancelled);
        assert!(token.is_cancelled());
    }
}

//! Arena coordinator: validation, phase sequencing, fan-out and fan-in.
//!
//! One round: optional search enrichment, concurrent dispatch of every
//! contestant, a fan-in barrier counted against the dispatched total, then
//! the judge stage (or its zero-latency skip). All worker completions
//! serialize through a single mpsc consumption loop, so only the
//! coordinator ever touches the aggregate.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::attach;
use crate::gateway::CompletionGateway;
use crate::search::{self, SearchProvider};

use super::contestant::run_contestant;
use super::judge::{self, JudgeOutcome};
use super::session::{ArenaSession, CancelToken, Phase};
use super::types::{
    ArenaError, ArenaObserver, ArenaOutcome, ArenaRequest, Progress, ResultAggregate,
};

/// Validate a request before any dispatch. Violations reject synchronously
/// with no state change and no network traffic.
pub fn validate_request(req: &ArenaRequest) -> Result<(), ArenaError> {
    if req.prompt.trim().is_empty() {
        return Err(ArenaError::InvalidRequest("prompt must not be empty".into()));
    }
    if req.contestants.is_empty() {
        return Err(ArenaError::InvalidRequest(
            "at least one contestant must be selected".into(),
        ));
    }

    let mut names: HashSet<&str> = HashSet::new();
    for contestant in &req.contestants {
        if contestant.name.trim().is_empty() {
            return Err(ArenaError::InvalidRequest(
                "contestant name must not be empty".into(),
            ));
        }
        if !names.insert(contestant.name.as_str()) {
            return Err(ArenaError::InvalidRequest(format!(
                "duplicate contestant name: {}",
                contestant.name
            )));
        }
    }

    if let Some(judge) = &req.judge {
        if judge.model.trim().is_empty() {
            return Err(ArenaError::InvalidRequest(
                "judge model must not be empty".into(),
            ));
        }
    }

    if req.search_enabled && req.search_result_count == 0 {
        return Err(ArenaError::InvalidRequest(
            "search_result_count must be >= 1".into(),
        ));
    }

    Ok(())
}

/// Run one arena round to completion or cancellation.
///
/// The returned outcome's `phase` is `Completed` or `Cancelled`; a cancelled
/// round carries whatever results were recorded before the stop and a
/// `Skipped` judge slot. Errors are returned only for request validation
/// and phase-machine misuse - contestant and judge failures are contained
/// as marker text per the result types.
pub async fn run_arena(
    gateway: Arc<dyn CompletionGateway>,
    search_provider: Option<Arc<dyn SearchProvider>>,
    req: ArenaRequest,
    observer: &dyn ArenaObserver,
    cancel: CancelToken,
) -> Result<ArenaOutcome, ArenaError> {
    validate_request(&req)?;

    let mut session = ArenaSession::new(&req, cancel.clone());
    let dispatched = req.contestants.len();
    let total_slots = dispatched + 1;

    tracing::info!(
        session = %session.id(),
        contestants = dispatched,
        search = req.search_enabled,
        judge = req.judge.is_some(),
        "arena round started"
    );

    // --- Search phase (optional) ---
    if req.search_enabled {
        session.advance(Phase::SearchPending)?;
        observer.phase_changed(session.phase());

        let block = match &search_provider {
            Some(provider) => {
                search::run_search(
                    provider.as_ref(),
                    &req.prompt,
                    req.search_result_count,
                    req.search_cookie.as_deref(),
                )
                .await
            }
            None => "[search failed: no search provider configured]".to_string(),
        };
        session.set_enrichment(block);
    }

    if cancel.is_cancelled() {
        session.cancel();
        return Ok(finish(session, ResultAggregate::new(dispatched), JudgeOutcome::Skipped, total_slots));
    }

    // --- Contest phase ---
    session.advance(Phase::Contesting)?;
    observer.phase_changed(session.phase());

    let final_prompt = search::compose_prompt(&req.prompt, session.enrichment());

    let (tx, mut rx) = mpsc::channel(dispatched);
    for config in req.contestants.iter().cloned() {
        let message = attach::build_user_message(
            &final_prompt,
            &req.attachments,
            config.effective_model(),
            &req.vision_models,
        );
        tokio::spawn(run_contestant(
            gateway.clone(),
            config,
            message,
            cancel.clone(),
            tx.clone(),
        ));
    }
    // The coordinator holds no sender: when every worker has reported or
    // suppressed its report, the channel closes and the loop below ends.
    drop(tx);

    let mut aggregate = ResultAggregate::new(dispatched);
    while !aggregate.is_complete() {
        match rx.recv().await {
            Some(result) => {
                if cancel.is_cancelled() {
                    break;
                }
                let name = result.name.clone();
                let content = result.content.clone();
                if aggregate.record(result) {
                    observer.contestant_finished(
                        &name,
                        &content,
                        Progress {
                            completed: aggregate.received(),
                            total: total_slots,
                        },
                    );
                }
            }
            // Senders only vanish without reporting when cancellation
            // suppressed them.
            None => break,
        }
    }

    if cancel.is_cancelled() || !aggregate.is_complete() {
        session.cancel();
        tracing::info!(
            session = %session.id(),
            received = aggregate.received(),
            dispatched,
            "arena round cancelled during contest"
        );
        return Ok(finish(session, aggregate, JudgeOutcome::Skipped, total_slots));
    }

    // --- Judge phase ---
    session.advance(Phase::JudgePending)?;
    observer.phase_changed(session.phase());

    let judge_outcome = match &req.judge {
        // Degenerate zero-latency transition: no judge, no call.
        None => JudgeOutcome::Skipped,
        Some(config) => {
            judge::run_judge(gateway.as_ref(), config, &req.prompt, &aggregate).await
        }
    };

    if cancel.is_cancelled() {
        session.cancel();
        return Ok(finish(session, aggregate, JudgeOutcome::Skipped, total_slots));
    }

    observer.judge_finished(
        &judge_outcome,
        Progress {
            completed: total_slots,
            total: total_slots,
        },
    );

    session.advance(Phase::Completed)?;
    observer.phase_changed(session.phase());

    tracing::info!(session = %session.id(), "arena round completed");
    Ok(finish(session, aggregate, judge_outcome, total_slots))
}

fn finish(
    mut session: ArenaSession,
    aggregate: ResultAggregate,
    judge: JudgeOutcome,
    total_slots: usize,
) -> ArenaOutcome {
    let phase = session.phase();
    let judge_slot = match phase {
        Phase::Completed => 1,
        _ => 0,
    };
    let completed = aggregate.received() + judge_slot;

    ArenaOutcome {
        session_id: session.id(),
        phase,
        enrichment: session.take_enrichment(),
        results: aggregate.into_results(),
        judge,
        progress: Progress {
            completed,
            total: total_slots,
        },
    }
}

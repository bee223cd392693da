use std::collections::HashSet;

use thiserror::Error;

use crate::store::StepLogEntry;
use crate::workflow::types::{Phase, VerificationStatus};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrailError {
    #[error("entry {sequence} belongs to a different run")]
    MixedRuns { sequence: u32 },

    #[error("entry {sequence} is out of order")]
    OutOfOrder { sequence: u32 },

    #[error("entry {sequence}: illegal transition {} -> {to}", from.map(|p| p.as_str()).unwrap_or("START"))]
    IllegalTransition {
        sequence: u32,
        from: Option<Phase>,
        to: Phase,
    },

    #[error("entry {sequence}: expected iteration {expected}, found {found}")]
    IterationMismatch {
        sequence: u32,
        expected: u32,
        found: u32,
    },

    #[error("entry {sequence}: iteration {iteration} exceeds limit {max}")]
    IterationLimit { sequence: u32, iteration: u32, max: u32 },

    #[error("entry {sequence}: {phase} at iteration {iteration} logged twice")]
    DuplicateStep {
        sequence: u32,
        phase: Phase,
        iteration: u32,
    },

    #[error("entry {sequence} follows a terminal entry")]
    AfterTerminal { sequence: u32 },
}

/// The phases of a trail in order.
pub fn phase_path(entries: &[StepLogEntry]) -> Vec<Phase> {
    entries.iter().map(|e| e.phase).collect()
}

fn logged_status(entry: &StepLogEntry) -> VerificationStatus {
    VerificationStatus::from_label(entry.metadata.get("status").and_then(|s| s.as_str()))
}

/// Replay one run's entries, in sequence order, against the state machine.
///
/// An empty trail is valid: a run that failed at INIT logs nothing.
pub fn validate_trail(entries: &[StepLogEntry], max_iterations: u32) -> Result<(), TrailError> {
    let Some(first) = entries.first() else {
        return Ok(());
    };
    let run_id = first.run_id;

    let mut seen: HashSet<(Phase, u32)> = HashSet::new();
    let mut prev: Option<&StepLogEntry> = None;

    for entry in entries {
        let sequence = entry.sequence;

        if entry.run_id != run_id {
            return Err(TrailError::MixedRuns { sequence });
        }

        if let Some(p) = prev {
            // Wall-clock timestamps may step backwards; the sequence may not.
            if entry.sequence <= p.sequence {
                return Err(TrailError::OutOfOrder { sequence });
            }
            if p.is_error() || p.phase == Phase::Refine {
                return Err(TrailError::AfterTerminal { sequence });
            }
        }

        let illegal = || TrailError::IllegalTransition {
            sequence,
            from: prev.map(|p| p.phase),
            to: entry.phase,
        };

        let expected_iteration = match (prev, entry.phase) {
            (None, Phase::Research) => 0,
            (Some(p), Phase::Draft) if p.phase == Phase::Research => 0,
            (Some(p), Phase::Draft)
                if p.phase == Phase::Verify && logged_status(p) == VerificationStatus::Failed =>
            {
                p.iteration.saturating_add(1)
            }
            (Some(p), Phase::Verify) if p.phase == Phase::Draft => p.iteration,
            (Some(p), Phase::Refine) if p.phase == Phase::Verify => {
                if logged_status(p) == VerificationStatus::Passed {
                    p.iteration
                } else if p.iteration.saturating_add(1) >= max_iterations {
                    // Fail-open: the counter has been advanced to the budget.
                    p.iteration.saturating_add(1).min(max_iterations)
                } else {
                    return Err(illegal());
                }
            }
            _ => return Err(illegal()),
        };

        if entry.iteration != expected_iteration {
            return Err(TrailError::IterationMismatch {
                sequence,
                expected: expected_iteration,
                found: entry.iteration,
            });
        }

        // DRAFT and VERIFY run at iterations 0..max (at least once); REFINE may
        // sit at the budget itself after failing open.
        let over_limit = match entry.phase {
            Phase::Draft | Phase::Verify => entry.iteration >= max_iterations.max(1),
            _ => entry.iteration > max_iterations,
        };
        if over_limit {
            return Err(TrailError::IterationLimit {
                sequence,
                iteration: entry.iteration,
                max: max_iterations,
            });
        }

        if matches!(entry.phase, Phase::Draft | Phase::Verify)
            && !seen.insert((entry.phase, entry.iteration))
        {
            return Err(TrailError::DuplicateStep {
                sequence,
                phase: entry.phase,
                iteration: entry.iteration,
            });
        }

        prev = Some(entry);
    }

    Ok(())
}

//! Per-request answer pipeline: classify, route, retrieve, stream.

pub mod engine;

pub use engine::{Answer, AnswerPipeline};

use uuid::Uuid;

use crate::error::PipelineError;

/// Lifecycle of one answer.
///
/// `Idle -> Classifying -> (ShortCircuitRedirect | Retrieving)`,
/// `Retrieving -> Generating -> Finalizing -> Closed`,
/// `ShortCircuitRedirect -> Finalizing`. Any open state may jump to `Closed`
/// when the run is aborted.
///
/// `Retrieving` covers question condensation as well as the vector search,
/// since the search runs on the condensed question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Classifying,
    ShortCircuitRedirect,
    Retrieving,
    Generating,
    Finalizing,
    Closed,
}

impl PipelineState {
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Idle, Classifying)
                | (Classifying, ShortCircuitRedirect)
                | (Classifying, Retrieving)
                | (ShortCircuitRedirect, Finalizing)
                | (Retrieving, Generating)
                | (Generating, Finalizing)
        ) || (self != Closed && next == Closed)
    }

    pub fn is_terminal(self) -> bool {
        self == PipelineState::Closed
    }
}

/// State of a single run, tagged with a request id for log correlation.
#[derive(Debug)]
pub struct PipelineRun {
    id: Uuid,
    state: PipelineState,
}

impl Default for PipelineRun {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineRun {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: PipelineState::Idle,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn advance(&mut self, next: PipelineState) -> Result<(), PipelineError> {
        if !self.state.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(request_id = %self.id, from = ?self.state, to = ?next, "Pipeline transition");
        self.state = next;
        Ok(())
    }
}

//! The unit of work dispatched to every worker.

use crate::tokens::TokenEstimator;
use crate::Result;

/// Instructions plus resolved content, with the job's total token estimate.
///
/// Immutable once built; dispatch tasks share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    instructions: String,
    content: String,
    payload: String,
    total_tokens: usize,
}

impl Job {
    /// Build a job and estimate its total token count with `estimator`.
    pub fn new(
        instructions: impl Into<String>,
        content: impl Into<String>,
        estimator: &dyn TokenEstimator,
    ) -> Result<Self> {
        let instructions = instructions.into();
        let content = content.into();
        let payload = compose(&instructions, &content);
        let total_tokens = estimator.count_tokens(&payload)?;
        Ok(Self {
            instructions,
            content,
            payload,
            total_tokens,
        })
    }

    /// Build a job with a token estimate computed elsewhere.
    pub fn with_token_estimate(
        instructions: impl Into<String>,
        content: impl Into<String>,
        total_tokens: usize,
    ) -> Self {
        let instructions = instructions.into();
        let content = content.into();
        let payload = compose(&instructions, &content);
        Self {
            instructions,
            content,
            payload,
            total_tokens,
        }
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// The full text sent to a worker: instructions, a blank line, then content.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }
}

fn compose(instructions: &str, content: &str) -> String {
    match (instructions.is_empty(), content.is_empty()) {
        (_, true) => instructions.to_string(),
        (true, false) => content.to_string(),
        (false, false) => format!("{}\n\n{}", instructions, content),
    }
}

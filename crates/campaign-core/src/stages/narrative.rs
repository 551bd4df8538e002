//! Graded narrative generation shared by the analysis and optimization stages

use crate::clients::CompletionService;
use crate::guards::{GradeResult, Grader};
use std::sync::Arc;

/// Result of asking for a narrative
#[derive(Debug, Clone, PartialEq)]
pub enum Narrative {
    /// Text to keep, with its grade when grading is enabled
    Accepted {
        text: String,
        grade: Option<GradeResult>,
    },
    /// The grader flagged the text; it must not be committed
    Rejected { grade: GradeResult },
    /// The completion service failed
    Unavailable { error: String },
}

pub struct NarrativeWriter {
    completion: Arc<dyn CompletionService>,
    grader: Option<Arc<Grader>>,
}

impl NarrativeWriter {
    pub fn new(completion: Arc<dyn CompletionService>) -> Self {
        Self {
            completion,
            grader: None,
        }
    }

    pub fn with_grader(mut self, grader: Arc<Grader>) -> Self {
        self.grader = Some(grader);
        self
    }

    pub async fn write(&self, prompt: &str, instructions: &str, source_data: &str) -> Narrative {
        let text = match self.completion.complete(prompt, Some(instructions)).await {
            Ok(text) => text,
            Err(e) => {
                return Narrative::Unavailable {
                    error: e.to_string(),
                }
            }
        };

        let Some(grader) = &self.grader else {
            return Narrative::Accepted { text, grade: None };
        };

        let grade = grader.grade(&text, Some(prompt), Some(source_data)).await;
        if grade.is_hallucination {
            Narrative::Rejected { grade }
        } else {
            Narrative::Accepted {
                text,
                grade: Some(grade),
            }
        }
    }
}

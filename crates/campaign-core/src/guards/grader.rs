//! Factual-validity grader for generated text

use crate::clients::CompletionService;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const EVALUATOR_INSTRUCTIONS: &str =
    "You are a factual accuracy evaluator for marketing campaign analysis outputs. \
     Your job is to detect hallucinations, false claims, or unsupported statements \
     in AI-generated content.\n\
     Evaluate the provided output for factual accuracy, logical coherence, made-up statistics, \
     and consistency with the provided context and data.\n\
     Respond with ONLY:\n\
     - \"VALID\" if the output appears factually sound and well-reasoned\n\
     - \"HALLUCINATION\" if you detect false claims, inconsistencies, or unsupported statements";

static VERDICT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(VALID|HALLUCINATION)\b").expect("Failed to compile verdict regex")
});

/// Grader verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeResult {
    pub is_hallucination: bool,
    pub confidence: f64,
    pub reason: String,
    pub raw_evaluation: String,
}

impl GradeResult {
    /// Fail-open verdict used when the completion service is unavailable
    fn service_error(error: impl std::fmt::Display) -> Self {
        Self {
            is_hallucination: false,
            confidence: 0.0,
            reason: format!("Grading error: {}", error),
            raw_evaluation: "ERROR".to_string(),
        }
    }

    fn from_evaluation(evaluation: String) -> Self {
        let verdicts: Vec<&str> = VERDICT.find_iter(&evaluation).map(|m| m.as_str()).collect();
        let is_hallucination = verdicts.contains(&"HALLUCINATION");
        let confidence = if verdicts.is_empty() { 0.5 } else { 0.9 };
        let reason = if is_hallucination {
            "Detected potential hallucination or unsupported claims"
        } else {
            "Output appears factually sound"
        };

        Self {
            is_hallucination,
            confidence,
            reason: reason.to_string(),
            raw_evaluation: evaluation,
        }
    }
}

/// Classifies text as VALID or HALLUCINATION through a completion service
pub struct Grader {
    completion: Arc<dyn CompletionService>,
}

impl Grader {
    pub fn new(completion: Arc<dyn CompletionService>) -> Self {
        Self { completion }
    }

    /// Grade `output`, optionally against the prompt context and the source
    /// data it should be grounded in. Never fails: a service error yields a
    /// non-hallucination verdict with zero confidence.
    pub async fn grade(
        &self,
        output: &str,
        context: Option<&str>,
        source_data: Option<&str>,
    ) -> GradeResult {
        let mut prompt = format!("**Output to Evaluate:**\n{}", output);
        if let Some(context) = context {
            prompt.push_str(&format!("\n\n**Original Context:**\n{}", context));
        }
        if let Some(source_data) = source_data {
            prompt.push_str(&format!("\n\n**Source Data:**\n{}", source_data));
        }
        prompt.push_str("\n\n**Evaluation:** Is this output factually accurate and well-reasoned?");

        match self.completion.complete(&prompt, Some(EVALUATOR_INSTRUCTIONS)).await {
            Ok(reply) => {
                let result = GradeResult::from_evaluation(reply.trim().to_uppercase());
                log::info!(
                    "Grade: {} (confidence: {})",
                    if result.is_hallucination { "HALLUCINATION" } else { "VALID" },
                    result.confidence
                );
                result
            }
            Err(e) => {
                log::error!("Grading failed, treating output as valid: {}", e);
                GradeResult::service_error(e)
            }
        }
    }
}

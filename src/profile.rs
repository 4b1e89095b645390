//! Model capability profiles.
//!
//! A generation model's parameter count, inferred from its name, selects
//! the grounding mode and the retrieval/prompt budgets the ask pipeline
//! runs with. Small models are unreliable at strict structured-citation
//! output, so they get the loose marker-annotated schema and tighter
//! budgets while still being required to ground their answers.

use serde::Serialize;

/// Output-validation schema for generated answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GroundingMode {
    Strict,
    Loose,
}

/// Defaults that parameterize profile selection.
#[derive(Debug, Clone, PartialEq)]
pub struct AskDefaults {
    /// Models at or below this size (in billions) are classified small.
    pub ask_small_model_max_billions: f64,
    pub small_top_k: usize,
    pub standard_top_k: usize,
    pub small_max_prompt_chunk_chars: usize,
    pub standard_max_prompt_chunk_chars: usize,
    pub small_num_ctx: usize,
    pub standard_num_ctx: usize,
    pub small_min_citations: usize,
    pub standard_min_citations: usize,
}

impl Default for AskDefaults {
    fn default() -> Self {
        Self {
            ask_small_model_max_billions: 4.0,
            small_top_k: 4,
            standard_top_k: 8,
            small_max_prompt_chunk_chars: 1200,
            standard_max_prompt_chunk_chars: 2400,
            small_num_ctx: 4096,
            standard_num_ctx: 8192,
            small_min_citations: 1,
            standard_min_citations: 2,
        }
    }
}

/// Derived, stateless pipeline configuration for one generation model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelProfile {
    pub size_billions: Option<f64>,
    pub is_small_model: bool,
    pub recommended_mode: GroundingMode,
    pub top_k: usize,
    pub max_prompt_chunk_chars: usize,
    pub num_ctx: usize,
    pub min_citations_overall: usize,
}

/// Infer a model's parameter count in billions from its name.
///
/// Looks for a `<number>b` token (billions) or `<number>m` token
/// (millions, divided by 1000). Names without a size hint yield `None`.
///
/// # Examples
///
/// ```
/// use grounder::profile::infer_model_size_billions;
///
/// assert_eq!(infer_model_size_billions("qwen3:4b"), Some(4.0));
/// assert_eq!(infer_model_size_billions("tiny:350m"), Some(0.35));
/// assert_eq!(infer_model_size_billions("unknown-model"), None);
/// ```
pub fn infer_model_size_billions(model_name: &str) -> Option<f64> {
    for token in model_name
        .split(|c: char| matches!(c, ':' | '/' | '-' | '_' | ' ' | '(' | ')' | ','))
    {
        let token = token.trim().to_ascii_lowercase();
        if token.len() < 2 {
            continue;
        }
        let (number, unit) = token.split_at(token.len() - 1);
        // Divide rather than multiply by a reciprocal so 350m comes out
        // as exactly 0.35.
        let divisor = match unit {
            "b" => 1.0,
            "m" => 1000.0,
            _ => continue,
        };
        if let Ok(value) = number.parse::<f64>()
            && value > 0.0
        {
            return Some(value / divisor);
        }
    }
    None
}

/// Classify a generation model and pick the ask-pipeline parameters.
///
/// A model whose inferred size is at most
/// `defaults.ask_small_model_max_billions` is small: loose mode and the
/// smaller budgets. Anything else, including models whose size cannot
/// be inferred, is standard: strict mode and the larger budgets. Pure
/// function, no I/O.
pub fn ask_model_profile(
    model_name: &str,
    defaults: &AskDefaults,
) -> ModelProfile {
    let size_billions = infer_model_size_billions(model_name);
    let is_small_model = size_billions
        .is_some_and(|size| size <= defaults.ask_small_model_max_billions);

    if is_small_model {
        ModelProfile {
            size_billions,
            is_small_model: true,
            recommended_mode: GroundingMode::Loose,
            top_k: defaults.small_top_k,
            max_prompt_chunk_chars: defaults.small_max_prompt_chunk_chars,
            num_ctx: defaults.small_num_ctx,
            min_citations_overall: defaults.small_min_citations,
        }
    } else {
        ModelProfile {
            size_billions,
            is_small_model: false,
            recommended_mode: GroundingMode::Strict,
            top_k: defaults.standard_top_k,
            max_prompt_chunk_chars: defaults.standard_max_prompt_chunk_chars,
            num_ctx: defaults.standard_num_ctx,
            min_citations_overall: defaults.standard_min_citations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_inference() {
        assert_eq!(infer_model_size_billions("qwen3:4b"), Some(4.0));
        assert_eq!(infer_model_size_billions("tiny:350m"), Some(0.35));
        assert_eq!(infer_model_size_billions("unknown-model"), None);
        assert_eq!(infer_model_size_billions("llama-3.1-8b-instruct"), Some(8.0));
        assert_eq!(infer_model_size_billions("gemma:2b"), Some(2.0));
        assert_eq!(infer_model_size_billions("mistral:7b-instruct"), Some(7.0));
        // A trailing 'b' on a non-numeric token is not a size hint.
        assert_eq!(infer_model_size_billions("rnb-model"), None);
        assert_eq!(infer_model_size_billions(""), None);
    }

    #[test]
    fn small_model_gets_loose_mode() {
        let profile = ask_model_profile("qwen3:4b", &AskDefaults::default());
        assert!(profile.is_small_model);
        assert_eq!(profile.recommended_mode, GroundingMode::Loose);
        assert_eq!(profile.size_billions, Some(4.0));
        let defaults = AskDefaults::default();
        assert_eq!(profile.top_k, defaults.small_top_k);
        assert_eq!(profile.num_ctx, defaults.small_num_ctx);
        assert_eq!(profile.min_citations_overall, defaults.small_min_citations);
    }

    #[test]
    fn large_model_gets_strict_mode() {
        let profile =
            ask_model_profile("llama-3.1-70b", &AskDefaults::default());
        assert!(!profile.is_small_model);
        assert_eq!(profile.recommended_mode, GroundingMode::Strict);
        assert_eq!(profile.size_billions, Some(70.0));
    }

    #[test]
    fn unknown_model_defaults_to_strict() {
        let profile =
            ask_model_profile("unknown-model", &AskDefaults::default());
        assert!(!profile.is_small_model);
        assert_eq!(profile.recommended_mode, GroundingMode::Strict);
        assert_eq!(profile.size_billions, None);
        let defaults = AskDefaults::default();
        assert_eq!(profile.top_k, defaults.standard_top_k);
        assert_eq!(
            profile.min_citations_overall,
            defaults.standard_min_citations
        );
    }

    #[test]
    fn threshold_is_inclusive() {
        let defaults = AskDefaults::default();
        assert!(ask_model_profile("m:4b", &defaults).is_small_model);
        assert!(!ask_model_profile("m:4.1b", &defaults).is_small_model);
    }
}

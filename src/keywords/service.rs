// Keyword extraction service: generator output through the post-processor.
//
// "Nothing usable came out" and "something broke" are different outcomes:
// the first is Ok(Extraction::Insufficient), the second is Err. The HTTP
// layer maps them to 400 and 500 respectively.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use super::traits::KeywordGenerator;
use crate::output::truncate_chars;
use crate::postprocess::PostProcessor;

/// User-facing message for an extraction that produced no usable phrases.
pub const INSUFFICIENT_INPUT_MESSAGE: &str = "Недостаточно данных для извлечения ключевых фраз. \
     Пожалуйста, введите более содержательный текст.";

/// User-facing message for a failed extraction. Internal details stay in logs.
pub const INTERNAL_ERROR_MESSAGE: &str =
    "Не удалось извлечь ключевые фразы. Попробуйте повторить операцию позже.";

/// User-facing message for an extraction that ran past the request timeout.
pub const TIMEOUT_MESSAGE: &str =
    "Извлечение ключевых фраз заняло слишком много времени. Попробуйте повторить операцию позже.";

/// Outcome of a successful extraction run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// Cleaned key phrases, in model output order
    Keywords(Vec<String>),
    /// The model produced nothing that survived post-processing
    Insufficient,
}

impl Extraction {
    pub fn from_phrases(phrases: Vec<String>) -> Self {
        if phrases.is_empty() {
            Extraction::Insufficient
        } else {
            Extraction::Keywords(phrases)
        }
    }

    pub fn keywords(&self) -> Option<&[String]> {
        match self {
            Extraction::Keywords(k) => Some(k.as_slice()),
            Extraction::Insufficient => None,
        }
    }
}

/// Shared, long-lived service. Construct once at startup.
pub struct KeywordExtractionService {
    generator: Arc<dyn KeywordGenerator>,
    post_processor: PostProcessor,
}

impl KeywordExtractionService {
    pub fn new(generator: Arc<dyn KeywordGenerator>, post_processor: PostProcessor) -> Self {
        Self {
            generator,
            post_processor,
        }
    }

    pub fn post_processor(&self) -> &PostProcessor {
        &self.post_processor
    }

    /// Generate candidates for `text` and clean them.
    pub async fn extract_keywords(&self, text: &str) -> Result<Extraction> {
        let raw = self
            .generator
            .generate(text)
            .await
            .context("Keyword generation failed")?;

        debug!(
            raw_count = raw.len(),
            text_preview = %truncate_chars(text, 50),
            "Model produced raw candidates"
        );

        let cleaned = self
            .post_processor
            .process(&raw)
            .context("Keyword post-processing failed")?;

        let extraction = Extraction::from_phrases(cleaned);
        match &extraction {
            Extraction::Keywords(k) => info!(
                raw_count = raw.len(),
                keywords = k.len(),
                "Extracted key phrases"
            ),
            Extraction::Insufficient => info!(
                raw_count = raw.len(),
                "No usable key phrases extracted"
            ),
        }

        Ok(extraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_phrases_empty_is_insufficient() {
        assert_eq!(Extraction::from_phrases(vec![]), Extraction::Insufficient);
        assert!(Extraction::Insufficient.keywords().is_none());
    }

    #[test]
    fn test_from_phrases_non_empty() {
        let e = Extraction::from_phrases(vec!["кабель".to_string()]);
        assert_eq!(e.keywords(), Some(&["кабель".to_string()][..]));
    }
}

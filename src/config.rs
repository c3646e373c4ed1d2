use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::postprocess::morph::DEFAULT_LEMMA_CACHE_SIZE;
use crate::postprocess::NestedMatch;

/// Default cap on request text length, in characters.
pub const DEFAULT_MAX_TEXT_CHARS: usize = 10_000;

/// Default overall timeout for one extraction request.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Central configuration loaded from environment variables.
///
/// The .env file is loaded automatically at startup via dotenvy.
/// `MODEL_PATH` and `MAX_INPUT_LENGTH` keep their unprefixed names so
/// existing deployments' env files still work.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory with the ONNX encoder/decoder and tokenizer (MODEL_PATH)
    pub model_path: Option<PathBuf>,
    /// Token count the input text is truncated to (MAX_INPUT_LENGTH)
    pub max_input_length: Option<usize>,
    /// How nested phrases are detected (KEYPHRASE_NESTED_MATCH)
    pub nested_match: NestedMatch,
    /// Optional `form<TAB>lemma` dictionary (KEYPHRASE_LEMMA_DICT)
    pub lemma_dict: Option<PathBuf>,
    /// Tokens kept in the lemma cache (KEYPHRASE_LEMMA_CACHE_SIZE)
    pub lemma_cache_size: usize,
    /// Longest accepted request text, in characters
    pub max_text_chars: usize,
    /// Overall timeout for one extraction request
    pub request_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Nothing here is required to load; the model settings are checked by
    /// `require_model` only for commands that run inference.
    pub fn load() -> Result<Self> {
        let max_input_length = match env::var("MAX_INPUT_LENGTH") {
            Ok(value) if !value.trim().is_empty() => Some(
                value
                    .trim()
                    .parse::<usize>()
                    .with_context(|| format!("MAX_INPUT_LENGTH is not an integer: {value}"))?,
            ),
            _ => None,
        };

        let nested_match = nested_match_from_env(non_empty_var("KEYPHRASE_NESTED_MATCH"))?;
        let lemma_cache_size =
            parse_or_default("KEYPHRASE_LEMMA_CACHE_SIZE", DEFAULT_LEMMA_CACHE_SIZE)?;
        if lemma_cache_size == 0 {
            anyhow::bail!("KEYPHRASE_LEMMA_CACHE_SIZE must be at least 1");
        }

        let max_text_chars = parse_or_default("KEYPHRASE_MAX_TEXT_CHARS", DEFAULT_MAX_TEXT_CHARS)?;
        let timeout_secs =
            parse_or_default("KEYPHRASE_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?;

        Ok(Self {
            model_path: non_empty_var("MODEL_PATH").map(PathBuf::from),
            max_input_length,
            nested_match,
            lemma_dict: non_empty_var("KEYPHRASE_LEMMA_DICT").map(PathBuf::from),
            lemma_cache_size,
            max_text_chars,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Check that the model settings are present and the model directory exists.
    /// Call this before any operation that runs inference.
    ///
    /// Returns the model directory and the input truncation length.
    pub fn require_model(&self) -> Result<(PathBuf, usize)> {
        let Some(model_path) = self.model_path.clone() else {
            anyhow::bail!(
                "MODEL_PATH not set. Add it to your .env file.\n\
                 It must point at a directory with encoder_model.onnx, \
                 decoder_model.onnx and tokenizer.json."
            );
        };
        if !model_path.exists() {
            anyhow::bail!("Model path not found: {}", model_path.display());
        }

        let Some(max_input_length) = self.max_input_length else {
            anyhow::bail!("MAX_INPUT_LENGTH not set. Add it to your .env file.");
        };

        Ok((model_path, max_input_length))
    }
}

/// Unset means the default mode; a set but unrecognized value is an error.
fn nested_match_from_env(value: Option<String>) -> Result<NestedMatch> {
    match value {
        Some(v) => v
            .parse::<NestedMatch>()
            .context("Invalid KEYPHRASE_NESTED_MATCH"),
        None => Ok(NestedMatch::default()),
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or_default<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match non_empty_var(name) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("{name} has an invalid value: {value}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        Config {
            model_path: None,
            max_input_length: None,
            nested_match: NestedMatch::Substring,
            lemma_dict: None,
            lemma_cache_size: DEFAULT_LEMMA_CACHE_SIZE,
            max_text_chars: DEFAULT_MAX_TEXT_CHARS,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    #[test]
    fn test_require_model_without_path_fails() {
        let config = Config {
            max_input_length: Some(512),
            ..base()
        };
        let err = config.require_model().unwrap_err();
        assert!(err.to_string().contains("MODEL_PATH"));
    }

    #[test]
    fn test_require_model_with_missing_dir_fails() {
        let config = Config {
            model_path: Some(std::env::temp_dir().join("keyphrase-test-no-such-model")),
            max_input_length: Some(512),
            ..base()
        };
        let err = config.require_model().unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_require_model_without_max_length_fails() {
        let config = Config {
            model_path: Some(std::env::temp_dir()),
            ..base()
        };
        let err = config.require_model().unwrap_err();
        assert!(err.to_string().contains("MAX_INPUT_LENGTH"));
    }

    #[test]
    fn test_require_model_ok() {
        let config = Config {
            model_path: Some(std::env::temp_dir()),
            max_input_length: Some(512),
            ..base()
        };
        let (path, len) = config.require_model().unwrap();
        assert_eq!(path, std::env::temp_dir());
        assert_eq!(len, 512);
    }

    #[test]
    fn test_nested_match_from_env() {
        assert_eq!(nested_match_from_env(None).unwrap(), NestedMatch::Substring);
        assert_eq!(
            nested_match_from_env(Some("token".to_string())).unwrap(),
            NestedMatch::TokenBoundary
        );
    }

    #[test]
    fn test_nested_match_from_env_rejects_typo() {
        let err = nested_match_from_env(Some("tokne".to_string())).unwrap_err();
        assert!(
            format!("{err:#}").contains("KEYPHRASE_NESTED_MATCH"),
            "got: {err:#}"
        );
    }
}

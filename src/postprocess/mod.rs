// Post-processing: turns the model's raw candidate list into clean key phrases.
//
// The model frequently repeats itself: the same phrase twice, the same concept
// in two grammatical cases, or a short phrase that is just a piece of a longer
// one. Four stages, strictly in order:
//
//   1. trim and drop blank entries
//   2. drop exact duplicates (first occurrence wins)
//   3. drop morphological duplicates (same lemma as an earlier phrase)
//   4. drop phrases nested inside a longer surviving phrase
//
// Surviving phrases keep their original surface form and relative order.

pub mod morph;

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use self::morph::MorphAnalyzer;

/// How stage 4 decides that one lemma is "inside" another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NestedMatch {
    /// Raw character containment. A short lemma can match inside an unrelated
    /// longer word ("кот" inside "закоток"); kept as the default for
    /// compatibility with existing outputs.
    #[default]
    Substring,
    /// The shorter lemma's tokens must appear as a contiguous run of the longer
    /// lemma's tokens.
    TokenBoundary,
}

impl FromStr for NestedMatch {
    type Err = anyhow::Error;

    /// Parse a config value, case-insensitively. Anything other than the
    /// known mode names is an error.
    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "substring" => Ok(NestedMatch::Substring),
            "token" | "token_boundary" | "token-boundary" => Ok(NestedMatch::TokenBoundary),
            other => anyhow::bail!(
                "Unknown nested match mode {other:?} (expected \"substring\" or \"token\")"
            ),
        }
    }
}

/// A phrase that survived morphological dedup, with its lemma.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LemmatizedPhrase {
    pub phrase: String,
    pub lemma: String,
}

/// The four-stage phrase cleaner.
///
/// Holds a shared analyzer; construct once per process and reuse.
pub struct PostProcessor {
    analyzer: Arc<dyn MorphAnalyzer>,
    nested_match: NestedMatch,
}

impl PostProcessor {
    pub fn new(analyzer: Arc<dyn MorphAnalyzer>) -> Self {
        Self {
            analyzer,
            nested_match: NestedMatch::default(),
        }
    }

    pub fn with_nested_match(mut self, nested_match: NestedMatch) -> Self {
        self.nested_match = nested_match;
        self
    }

    pub fn nested_match(&self) -> NestedMatch {
        self.nested_match
    }

    /// Run the full pipeline. An empty result is a valid value: nothing
    /// usable survived. `Err` only comes from the analyzer.
    pub fn process(&self, raw: &[String]) -> Result<Vec<String>> {
        let trimmed = clean_empty(raw);
        let unique = remove_exact_duplicates(trimmed);
        let lemmatized = self.remove_morphological_duplicates(unique)?;
        let cleaned = remove_nested_phrases(lemmatized, self.nested_match);

        debug!(
            raw = raw.len(),
            cleaned = cleaned.len(),
            mode = ?self.nested_match,
            "Post-processed candidate phrases"
        );

        Ok(cleaned)
    }

    /// Lemma of a phrase: lowercase, split on whitespace, normalize each
    /// token, rejoin with single spaces.
    pub fn lemmatize(&self, phrase: &str) -> Result<String> {
        let lemmas = phrase
            .to_lowercase()
            .split_whitespace()
            .map(|word| self.analyzer.normal_form(word))
            .collect::<Result<Vec<_>>>()?;
        Ok(lemmas.join(" "))
    }

    /// Stage 3: keep the first phrase seen for each lemma.
    ///
    /// Returns the lemma alongside each survivor so stage 4 doesn't
    /// lemmatize again.
    pub fn remove_morphological_duplicates(
        &self,
        phrases: Vec<String>,
    ) -> Result<Vec<LemmatizedPhrase>> {
        let mut seen: HashSet<String> = HashSet::with_capacity(phrases.len());
        let mut unique = Vec::with_capacity(phrases.len());

        for phrase in phrases {
            let lemma = self.lemmatize(&phrase)?;
            if seen.insert(lemma.clone()) {
                unique.push(LemmatizedPhrase { phrase, lemma });
            } else {
                debug!(phrase = %phrase, lemma = %lemma, "Dropped morphological duplicate");
            }
        }

        Ok(unique)
    }
}

/// Stage 1: trim each entry and drop the ones left empty.
pub fn clean_empty(phrases: &[String]) -> Vec<String> {
    phrases
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Stage 2: drop repeated strings, keeping each at its first position.
pub fn remove_exact_duplicates(phrases: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::with_capacity(phrases.len());
    phrases
        .into_iter()
        .filter(|p| seen.insert(p.clone()))
        .collect()
}

/// Stage 4: drop every phrase whose lemma is nested in a strictly longer
/// lemma of another survivor.
pub fn remove_nested_phrases(phrases: Vec<LemmatizedPhrase>, mode: NestedMatch) -> Vec<String> {
    let nested: Vec<bool> = phrases
        .iter()
        .enumerate()
        .map(|(i, inner)| {
            phrases
                .iter()
                .enumerate()
                .any(|(j, outer)| i != j && is_nested(&inner.lemma, &outer.lemma, mode))
        })
        .collect();

    phrases
        .into_iter()
        .zip(nested)
        .filter_map(|(p, is_nested)| {
            if is_nested {
                debug!(phrase = %p.phrase, "Dropped nested phrase");
                None
            } else {
                Some(p.phrase)
            }
        })
        .collect()
}

/// True when `inner` is contained in `outer` and strictly shorter.
/// Lengths are compared in characters, not bytes.
pub fn is_nested(inner: &str, outer: &str, mode: NestedMatch) -> bool {
    if inner.chars().count() >= outer.chars().count() {
        return false;
    }

    match mode {
        NestedMatch::Substring => outer.contains(inner),
        NestedMatch::TokenBoundary => {
            let inner_tokens: Vec<&str> = inner.split(' ').collect();
            let outer_tokens: Vec<&str> = outer.split(' ').collect();
            outer_tokens
                .windows(inner_tokens.len())
                .any(|window| window == inner_tokens.as_slice())
        }
    }
}

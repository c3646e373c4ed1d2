// Morphological analysis: maps a single word token to its normal form.
//
// The post-processor only ever asks one question of the analyzer: "what is
// the dictionary form of this word?". Everything behind that question is
// swappable via the MorphAnalyzer trait, the same way the generator sits
// behind KeywordGenerator.
//
// Implementations:
// - OpenCorporaAnalyzer: first parse of the OpenCorpora dictionary (the
//   default), Snowball for words it cannot parse
// - DictionaryAnalyzer: exact form → lemma overrides from a TSV file,
//   falling back to another analyzer for everything else
// - SnowballAnalyzer: Russian Snowball stemmer, used only as a fallback
// - CachedAnalyzer: bounded process-wide LRU in front of any analyzer

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use lru::LruCache;
use rust_stemmers::{Algorithm, Stemmer};
use tracing::{debug, info};

/// Default number of tokens kept by the process-wide lemma cache.
pub const DEFAULT_LEMMA_CACHE_SIZE: usize = 50_000;

/// Trait for resolving a word token to its normal (dictionary) form.
///
/// Implementations must be deterministic and safe to call from many request
/// handlers at once. Errors mean the analyzer itself is broken and must not
/// be masked as an empty result by callers.
pub trait MorphAnalyzer: Send + Sync {
    /// Return the normal form of a single lowercase word token.
    fn normal_form(&self, token: &str) -> Result<String>;
}

/// Snowball stemmer for Russian.
///
/// A stem is not a lemma ("узла" becomes "узл", "медь" becomes "мед"), so this
/// only serves as a last resort for tokens the dictionary analyzers can't
/// handle.
pub struct SnowballAnalyzer {
    stemmer: Stemmer,
}

impl SnowballAnalyzer {
    pub fn russian() -> Self {
        Self {
            stemmer: Stemmer::create(Algorithm::Russian),
        }
    }
}

impl Default for SnowballAnalyzer {
    fn default() -> Self {
        Self::russian()
    }
}

impl MorphAnalyzer for SnowballAnalyzer {
    fn normal_form(&self, token: &str) -> Result<String> {
        // The Russian stemmer treats "ё" and "е" as distinct letters; the model
        // output uses both interchangeably.
        let token = token.replace('ё', "е");
        Ok(self.stemmer.stem(&token).into_owned())
    }
}

mod opencorpora {
    use rsmorphy::prelude::*;

    /// Loads the bundled Russian OpenCorpora dictionary.
    pub fn load() -> MorphAnalyzer {
        MorphAnalyzer::from_file(rsmorphy_dict_ru::DICT_PATH)
    }

    /// Normal form of the highest-ranked parse, if there is any parse at all.
    pub fn first_normal_form(morph: &MorphAnalyzer, token: &str) -> Option<String> {
        morph
            .parse(token)
            .first()
            .map(|parsed| parsed.lex.get_normal_form(morph).to_string())
    }
}

/// Dictionary lemmatizer over OpenCorpora (the pymorphy dictionary).
///
/// Takes the analyzer's first, most probable parse without any context
/// disambiguation. Unknown words still get a parse from the suffix
/// predictor; only when there is none at all does the fallback run.
pub struct OpenCorporaAnalyzer {
    morph: rsmorphy::prelude::MorphAnalyzer,
    fallback: Box<dyn MorphAnalyzer>,
}

impl OpenCorporaAnalyzer {
    /// Load the Russian dictionary with Snowball as the fallback.
    pub fn russian() -> Self {
        let morph = opencorpora::load();
        debug!("Loaded OpenCorpora Russian dictionary");
        Self {
            morph,
            fallback: Box::new(SnowballAnalyzer::russian()),
        }
    }
}

impl MorphAnalyzer for OpenCorporaAnalyzer {
    fn normal_form(&self, token: &str) -> Result<String> {
        match opencorpora::first_normal_form(&self.morph, token) {
            Some(lemma) if !lemma.is_empty() => Ok(lemma.to_lowercase()),
            _ => self.fallback.normal_form(token),
        }
    }
}

/// Dictionary lookup with a fallback analyzer for out-of-vocabulary words.
pub struct DictionaryAnalyzer {
    lemmas: HashMap<String, String>,
    fallback: Box<dyn MorphAnalyzer>,
}

impl DictionaryAnalyzer {
    pub fn new(lemmas: HashMap<String, String>, fallback: Box<dyn MorphAnalyzer>) -> Self {
        Self { lemmas, fallback }
    }

    /// Load a `form<TAB>lemma` file, one entry per line.
    ///
    /// Blank lines and lines starting with `#` are skipped. Forms are
    /// lowercased on load so lookups match the lemmatizer's lowercased tokens.
    /// If a form appears more than once, the first entry wins (it is the most
    /// frequent parse in OpenCorpora-style exports).
    pub fn load(path: &Path, fallback: Box<dyn MorphAnalyzer>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read lemma dictionary {}", path.display()))?;
        let lemmas = parse_dictionary(&contents)
            .with_context(|| format!("Malformed lemma dictionary {}", path.display()))?;

        info!(
            entries = lemmas.len(),
            path = %path.display(),
            "Loaded lemma dictionary"
        );

        Ok(Self::new(lemmas, fallback))
    }

    pub fn len(&self) -> usize {
        self.lemmas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lemmas.is_empty()
    }
}

impl MorphAnalyzer for DictionaryAnalyzer {
    fn normal_form(&self, token: &str) -> Result<String> {
        match self.lemmas.get(token) {
            Some(lemma) => Ok(lemma.clone()),
            None => self.fallback.normal_form(token),
        }
    }
}

/// Parse the TSV body of a lemma dictionary.
fn parse_dictionary(contents: &str) -> Result<HashMap<String, String>> {
    let mut lemmas = HashMap::new();

    for (line_no, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (form, lemma) = line
            .split_once('\t')
            .with_context(|| format!("line {}: expected `form<TAB>lemma`", line_no + 1))?;
        let (form, lemma) = (form.trim(), lemma.trim());
        if form.is_empty() || lemma.is_empty() {
            anyhow::bail!("line {}: empty form or lemma", line_no + 1);
        }

        lemmas
            .entry(form.to_lowercase())
            .or_insert_with(|| lemma.to_lowercase());
    }

    Ok(lemmas)
}

/// Memoizing wrapper, shared across requests.
///
/// Generated phrases draw on a small technical vocabulary, so the same words
/// come back request after request. The cache holds at most `capacity`
/// tokens and evicts the least recently used one beyond that. A miss
/// computes outside the lock and then inserts.
pub struct CachedAnalyzer {
    inner: Arc<dyn MorphAnalyzer>,
    cache: Mutex<LruCache<String, String>>,
}

impl CachedAnalyzer {
    pub fn new(inner: Arc<dyn MorphAnalyzer>, capacity: NonZeroUsize) -> Self {
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Number of distinct tokens cached right now.
    pub fn cached_tokens(&self) -> Result<usize> {
        let cache = self
            .cache
            .lock()
            .map_err(|e| anyhow::anyhow!("Lemma cache lock poisoned: {}", e))?;
        Ok(cache.len())
    }
}

impl MorphAnalyzer for CachedAnalyzer {
    fn normal_form(&self, token: &str) -> Result<String> {
        {
            let mut cache = self
                .cache
                .lock()
                .map_err(|e| anyhow::anyhow!("Lemma cache lock poisoned: {}", e))?;
            if let Some(lemma) = cache.get(token) {
                return Ok(lemma.clone());
            }
        }

        let lemma = self.inner.normal_form(token)?;

        let mut cache = self
            .cache
            .lock()
            .map_err(|e| anyhow::anyhow!("Lemma cache lock poisoned: {}", e))?;
        cache.put(token.to_string(), lemma.clone());

        Ok(lemma)
    }
}

/// Build the process-wide analyzer: optional TSV overrides over OpenCorpora,
/// wrapped in a token cache of `cache_size` entries.
pub fn build_analyzer(
    lemma_dict: Option<&Path>,
    cache_size: usize,
) -> Result<Arc<dyn MorphAnalyzer>> {
    let capacity =
        NonZeroUsize::new(cache_size).context("Lemma cache size must be at least 1")?;

    let base: Arc<dyn MorphAnalyzer> = match lemma_dict {
        Some(path) => Arc::new(DictionaryAnalyzer::load(
            path,
            Box::new(OpenCorporaAnalyzer::russian()),
        )?),
        None => Arc::new(OpenCorporaAnalyzer::russian()),
    };

    Ok(Arc::new(CachedAnalyzer::new(base, capacity)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts how many times the inner analyzer is reached.
    struct CountingAnalyzer {
        calls: AtomicUsize,
    }

    impl MorphAnalyzer for CountingAnalyzer {
        fn normal_form(&self, token: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(token.to_uppercase())
        }
    }

    #[test]
    fn test_snowball_collapses_case_inflections() {
        let analyzer = SnowballAnalyzer::russian();
        let a = analyzer.normal_form("устройства").unwrap();
        let b = analyzer.normal_form("устройство").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_snowball_treats_yo_as_ye() {
        let analyzer = SnowballAnalyzer::russian();
        assert_eq!(
            analyzer.normal_form("ёмкость").unwrap(),
            analyzer.normal_form("емкость").unwrap()
        );
    }

    #[test]
    fn test_parse_dictionary_skips_comments_and_blanks() {
        let lemmas = parse_dictionary("# header\n\nкошки\tкошка\nКОТА\tкот\n").unwrap();
        assert_eq!(lemmas.len(), 2);
        assert_eq!(lemmas["кошки"], "кошка");
        assert_eq!(lemmas["кота"], "кот");
    }

    #[test]
    fn test_parse_dictionary_first_entry_wins() {
        let lemmas = parse_dictionary("стали\tсталь\nстали\tстать\n").unwrap();
        assert_eq!(lemmas["стали"], "сталь");
    }

    #[test]
    fn test_parse_dictionary_rejects_missing_tab() {
        let err = parse_dictionary("кошки кошка\n").unwrap_err();
        assert!(err.to_string().contains("line 1"), "got: {err}");
    }

    #[test]
    fn test_dictionary_falls_back_for_unknown_words() {
        let mut lemmas = HashMap::new();
        lemmas.insert("провода".to_string(), "провод".to_string());
        let analyzer = DictionaryAnalyzer::new(lemmas, Box::new(SnowballAnalyzer::russian()));

        assert_eq!(analyzer.normal_form("провода").unwrap(), "провод");
        assert_eq!(
            analyzer.normal_form("кабеля").unwrap(),
            SnowballAnalyzer::russian().normal_form("кабеля").unwrap()
        );
    }

    #[test]
    fn test_dictionary_load_missing_file_fails() {
        let path = std::env::temp_dir().join("keyphrase-test-missing-dict.tsv");
        let result = DictionaryAnalyzer::load(&path, Box::new(SnowballAnalyzer::russian()));
        assert!(result.is_err());
    }

    #[test]
    fn test_cached_analyzer_hits_inner_once_per_token() {
        let inner = Arc::new(CountingAnalyzer {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedAnalyzer::new(inner.clone(), NonZeroUsize::new(16).unwrap());

        for _ in 0..3 {
            assert_eq!(cached.normal_form("трос").unwrap(), "ТРОС");
        }
        cached.normal_form("провод").unwrap();

        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cached.cached_tokens().unwrap(), 2);
    }

    #[test]
    fn test_cached_analyzer_concurrent_reads() {
        let cached = Arc::new(CachedAnalyzer::new(
            Arc::new(SnowballAnalyzer::russian()),
            NonZeroUsize::new(16).unwrap(),
        ));
        let expected = SnowballAnalyzer::russian().normal_form("волокна").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cached = Arc::clone(&cached);
                std::thread::spawn(move || cached.normal_form("волокна").unwrap())
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
        assert_eq!(cached.cached_tokens().unwrap(), 1);
    }

    #[test]
    fn test_cached_analyzer_is_bounded() {
        let inner = Arc::new(CountingAnalyzer {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedAnalyzer::new(inner.clone(), NonZeroUsize::new(2).unwrap());

        for token in ["узел", "ремень", "медь", "трос"] {
            cached.normal_form(token).unwrap();
        }
        assert_eq!(cached.cached_tokens().unwrap(), 2);

        // "узел" was evicted and has to be recomputed; "трос" is still cached
        cached.normal_form("трос").unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 4);
        cached.normal_form("узел").unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 5);
        assert_eq!(cached.cached_tokens().unwrap(), 2);
    }

    #[test]
    fn test_build_analyzer_rejects_zero_cache_size() {
        assert!(build_analyzer(None, 0).is_err());
    }

    #[test]
    fn test_opencorpora_gives_dictionary_forms() {
        let analyzer = OpenCorporaAnalyzer::russian();
        assert_eq!(analyzer.normal_form("узла").unwrap(), "узел");
        assert_eq!(analyzer.normal_form("ремня").unwrap(), "ремень");
        assert_eq!(analyzer.normal_form("медь").unwrap(), "медь");
        assert_eq!(analyzer.normal_form("устройства").unwrap(), "устройство");
    }
}

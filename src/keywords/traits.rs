// Keyword generator trait: the swap-ready abstraction over the model.
//
// The default implementation runs a local ONNX seq2seq model. Anything that
// can turn a text into a list of raw candidate phrases can stand in for it,
// which is also how the service and API tests run without model files.

use anyhow::Result;
use async_trait::async_trait;

/// Trait for producing raw candidate key phrases from a text.
///
/// Implementations return phrases in the order the model emitted them, with
/// no trimming, deduplication or filtering applied; that is the
/// post-processor's job.
#[async_trait]
pub trait KeywordGenerator: Send + Sync {
    async fn generate(&self, text: &str) -> Result<Vec<String>>;
}

// Local ONNX keyword generator for a T5-style seq2seq model.
//
// The model was fine-tuned to read a patent text and emit its key phrases as
// one string separated by ";". We run it locally via ONNX Runtime: the
// encoder once per request, then the decoder once per beam-search step.
//
// Expected files (Optimum export layout):
//   encoder_model.onnx, decoder_model.onnx, tokenizer.json
//
// The decoder is run without past key/values, re-reading the whole prefix on
// every step. Outputs are at most 64 tokens, so the extra work is small.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::debug;

use super::beam::{beam_search, GenerationParams};
use super::traits::KeywordGenerator;

pub const ENCODER_FILE: &str = "encoder_model.onnx";
pub const DECODER_FILE: &str = "decoder_model.onnx";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// Separator the model places between phrases in its output.
pub const PHRASE_DELIMITER: char = ';';

/// Check whether all three model files exist in `dir`.
pub fn model_files_present(dir: &Path) -> bool {
    [ENCODER_FILE, DECODER_FILE, TOKENIZER_FILE]
        .iter()
        .all(|f| dir.join(f).exists())
}

/// Tells a blocking generation run to stop before its next model call.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Err once the flag is set.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            anyhow::bail!("Keyword generation cancelled");
        }
        Ok(())
    }

    /// Guard that sets the flag when dropped.
    pub fn guard(&self) -> CancelOnDrop {
        CancelOnDrop(self.clone())
    }
}

/// Sets its flag on drop. Held by the awaiting future, so a caller that
/// gives up (request timeout) stops the detached inference thread.
pub struct CancelOnDrop(CancelFlag);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Seq2seq keyword generator. Sessions sit behind Arc<Mutex> because
/// ort::Session::run takes &mut self and inference runs on spawn_blocking
/// threads.
pub struct OnnxKeywordGenerator {
    encoder: Arc<Mutex<Session>>,
    decoder: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
    params: GenerationParams,
}

impl OnnxKeywordGenerator {
    /// Load encoder, decoder and tokenizer from `model_dir`.
    ///
    /// Input texts are truncated to `max_input_length` tokens.
    pub fn load(model_dir: &Path, max_input_length: usize) -> Result<Self> {
        for file in [ENCODER_FILE, DECODER_FILE, TOKENIZER_FILE] {
            let path = model_dir.join(file);
            if !path.exists() {
                anyhow::bail!("Model file not found: {}", path.display());
            }
        }

        let encoder = load_session(&model_dir.join(ENCODER_FILE))?;
        let decoder = load_session(&model_dir.join(DECODER_FILE))?;

        let mut tokenizer = Tokenizer::from_file(model_dir.join(TOKENIZER_FILE))
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: max_input_length,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("Failed to configure truncation: {}", e))?;

        debug!(
            max_input_length,
            "Loaded ONNX keyword model from {}",
            model_dir.display()
        );

        Ok(Self {
            encoder: Arc::new(Mutex::new(encoder)),
            decoder: Arc::new(Mutex::new(decoder)),
            tokenizer: Arc::new(tokenizer),
            params: GenerationParams::default(),
        })
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }
}

fn load_session(path: &Path) -> Result<Session> {
    Session::builder()
        .context("Failed to create ONNX session builder")?
        .commit_from_file(path)
        .with_context(|| format!("Failed to load ONNX model from {}", path.display()))
}

#[async_trait]
impl KeywordGenerator for OnnxKeywordGenerator {
    async fn generate(&self, text: &str) -> Result<Vec<String>> {
        let encoder = Arc::clone(&self.encoder);
        let decoder = Arc::clone(&self.decoder);
        let tokenizer = Arc::clone(&self.tokenizer);
        let params = self.params.clone();
        let text = text.to_string();
        let cancel = CancelFlag::new();
        let _cancel_on_drop = cancel.guard();

        tokio::task::spawn_blocking(move || {
            generate_sync(&encoder, &decoder, &tokenizer, &params, &text, &cancel)
        })
        .await
        .context("spawn_blocking panicked")?
    }
}

/// Tokenize, encode, beam-search decode, detokenize, split.
fn generate_sync(
    encoder: &Mutex<Session>,
    decoder: &Mutex<Session>,
    tokenizer: &Tokenizer,
    params: &GenerationParams,
    text: &str,
    cancel: &CancelFlag,
) -> Result<Vec<String>> {
    cancel.check()?;
    let encoding = tokenizer
        .encode(text, true)
        .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;

    let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
    let attention_mask: Vec<i64> = encoding
        .get_attention_mask()
        .iter()
        .map(|&m| m as i64)
        .collect();
    let seq_len = input_ids.len();
    if seq_len == 0 {
        return Ok(Vec::new());
    }

    // Encoder: [1, seq_len] -> last_hidden_state [1, seq_len, hidden]
    let (hidden_states, hidden_size) = {
        let shape = [1i64, seq_len as i64];
        let ids_tensor = Tensor::from_array((shape, input_ids))
            .context("Failed to create input_ids tensor")?;
        let mask_tensor = Tensor::from_array((shape, attention_mask.clone()))
            .context("Failed to create attention_mask tensor")?;

        let mut session = encoder
            .lock()
            .map_err(|e| anyhow::anyhow!("Encoder lock poisoned: {}", e))?;
        let outputs = session
            .run(ort::inputs! {
                "input_ids" => ids_tensor,
                "attention_mask" => mask_tensor
            })
            .context("ONNX encoder inference failed")?;

        let (out_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("Failed to extract encoder output")?;
        let dims: Vec<i64> = out_shape.iter().copied().collect();
        if dims.len() != 3 {
            anyhow::bail!("Unexpected encoder output shape {:?}", dims);
        }
        (data.to_vec(), dims[2] as usize)
    };

    let next_logits = |beams: &[Vec<u32>]| -> Result<Vec<Vec<f32>>> {
        cancel.check()?;
        decoder_step(decoder, beams, &hidden_states, hidden_size, &attention_mask)
    };
    let token_ids = beam_search(params, next_logits)?;

    let decoded = tokenizer
        .decode(&token_ids, true)
        .map_err(|e| anyhow::anyhow!("Detokenization failed: {}", e))?;

    debug!(
        generated_tokens = token_ids.len(),
        output = %crate::output::truncate_chars(&decoded, 80),
        "Generated keyword string"
    );

    Ok(split_phrases(&decoded))
}

/// One decoder pass over all live beams; returns last-position logits per beam.
fn decoder_step(
    decoder: &Mutex<Session>,
    beams: &[Vec<u32>],
    hidden_states: &[f32],
    hidden_size: usize,
    attention_mask: &[i64],
) -> Result<Vec<Vec<f32>>> {
    let batch = beams.len();
    let cur_len = beams.first().map(|b| b.len()).unwrap_or(0);
    let seq_len = attention_mask.len();

    let decoder_ids: Vec<i64> = beams
        .iter()
        .flat_map(|b| b.iter().map(|&t| t as i64))
        .collect();
    // The encoder ran once; every beam attends to the same states.
    let encoder_states: Vec<f32> = hidden_states
        .iter()
        .copied()
        .cycle()
        .take(batch * hidden_states.len())
        .collect();
    let encoder_mask: Vec<i64> = attention_mask
        .iter()
        .copied()
        .cycle()
        .take(batch * seq_len)
        .collect();

    let ids_tensor = Tensor::from_array(([batch as i64, cur_len as i64], decoder_ids))
        .context("Failed to create decoder input_ids tensor")?;
    let mask_tensor = Tensor::from_array(([batch as i64, seq_len as i64], encoder_mask))
        .context("Failed to create encoder_attention_mask tensor")?;
    let states_tensor = Tensor::from_array((
        [batch as i64, seq_len as i64, hidden_size as i64],
        encoder_states,
    ))
    .context("Failed to create encoder_hidden_states tensor")?;

    let mut session = decoder
        .lock()
        .map_err(|e| anyhow::anyhow!("Decoder lock poisoned: {}", e))?;
    let outputs = session
        .run(ort::inputs! {
            "input_ids" => ids_tensor,
            "encoder_attention_mask" => mask_tensor,
            "encoder_hidden_states" => states_tensor
        })
        .context("ONNX decoder inference failed")?;

    // Output shape: [batch, cur_len, vocab]
    let (out_shape, data) = outputs[0]
        .try_extract_tensor::<f32>()
        .context("Failed to extract decoder logits")?;
    let dims: Vec<i64> = out_shape.iter().copied().collect();

    last_position_rows(data, &dims, batch, cur_len)
}

/// Slice the final-position logits row for each batch entry out of a flat
/// `[batch, cur_len, vocab]` buffer. Any other shape is an error.
fn last_position_rows(
    data: &[f32],
    dims: &[i64],
    batch: usize,
    cur_len: usize,
) -> Result<Vec<Vec<f32>>> {
    let [b, len, vocab] = dims else {
        anyhow::bail!("Unexpected decoder output shape {:?}", dims);
    };
    if *b != batch as i64 || *len != cur_len as i64 || *vocab <= 0 || cur_len == 0 {
        anyhow::bail!(
            "Unexpected decoder output shape {:?}, expected [{}, {}, vocab]",
            dims,
            batch,
            cur_len
        );
    }
    let vocab = *vocab as usize;
    if data.len() != batch * cur_len * vocab {
        anyhow::bail!(
            "Decoder output has {} values for shape {:?}",
            data.len(),
            dims
        );
    }

    Ok((0..batch)
        .map(|b| {
            let offset = (b * cur_len + cur_len - 1) * vocab;
            data[offset..offset + vocab].to_vec()
        })
        .collect())
}

/// Split the decoded model output into raw phrases.
///
/// Entries are left untrimmed; blank segments (trailing ";" and the like)
/// are removed by the post-processor.
pub fn split_phrases(decoded: &str) -> Vec<String> {
    decoded.split(PHRASE_DELIMITER).map(str::to_string).collect()
}

// Beam search decoding for the seq2seq keyword model.
//
// Kept independent of ONNX: the search only needs a callback that, given the
// current token sequences of all live beams, returns the next-token logits for
// each of them. The ONNX generator supplies that callback by running the
// decoder; tests supply hand-built logits.

use std::cmp::Ordering;

use anyhow::Result;

/// Generation settings. Defaults match how the keyword model was trained to
/// be decoded: 5 beams, at most 64 tokens, stop once 5 hypotheses finish.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    /// Maximum sequence length, counting the decoder start token
    pub max_length: usize,
    pub num_beams: usize,
    /// Exponent applied to sequence length when ranking finished hypotheses
    pub length_penalty: f64,
    /// Stop as soon as `num_beams` hypotheses have finished
    pub early_stopping: bool,
    /// T5 starts decoding from the pad token
    pub decoder_start_token_id: u32,
    pub eos_token_id: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_length: 64,
            num_beams: 5,
            length_penalty: 1.0,
            early_stopping: true,
            decoder_start_token_id: 0,
            eos_token_id: 1,
        }
    }
}

#[derive(Debug, Clone)]
struct Beam {
    tokens: Vec<u32>,
    /// Sum of token log-probabilities
    score: f64,
}

#[derive(Debug, Clone)]
struct Hypothesis {
    tokens: Vec<u32>,
    /// Length-normalized score
    score: f64,
}

/// Run beam search and return the best sequence's generated tokens
/// (decoder start token and EOS stripped).
///
/// `next_logits` receives one token sequence per live beam, all of equal
/// length, and must return one logits row per beam in the same order.
pub fn beam_search<F>(params: &GenerationParams, mut next_logits: F) -> Result<Vec<u32>>
where
    F: FnMut(&[Vec<u32>]) -> Result<Vec<Vec<f32>>>,
{
    if params.num_beams == 0 {
        anyhow::bail!("num_beams must be at least 1");
    }

    let mut beams = vec![Beam {
        tokens: vec![params.decoder_start_token_id],
        score: 0.0,
    }];
    let mut finished: Vec<Hypothesis> = Vec::new();

    while beams[0].tokens.len() < params.max_length {
        let sequences: Vec<Vec<u32>> = beams.iter().map(|b| b.tokens.clone()).collect();
        let logits = next_logits(&sequences)?;
        if logits.len() != beams.len() {
            anyhow::bail!(
                "Decoder returned {} logit rows for {} beams",
                logits.len(),
                beams.len()
            );
        }

        // Each beam proposes its 2*num_beams best continuations, so that even
        // if every beam's top token is EOS there are enough live candidates.
        let mut candidates: Vec<(f64, usize, u32)> = Vec::new();
        for (beam_idx, row) in logits.iter().enumerate() {
            let log_probs = log_softmax(row);
            for (token, lp) in top_k(&log_probs, 2 * params.num_beams) {
                candidates.push((beams[beam_idx].score + lp, beam_idx, token as u32));
            }
        }
        candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

        let mut next_beams = Vec::with_capacity(params.num_beams);
        for (rank, &(score, beam_idx, token)) in candidates.iter().enumerate() {
            if token == params.eos_token_id {
                // An EOS outside the top num_beams is not a real contender
                if rank < params.num_beams {
                    add_hypothesis(
                        &mut finished,
                        beams[beam_idx].tokens.clone(),
                        score,
                        params,
                    );
                }
                continue;
            }

            let mut tokens = beams[beam_idx].tokens.clone();
            tokens.push(token);
            next_beams.push(Beam { tokens, score });
            if next_beams.len() == params.num_beams {
                break;
            }
        }

        if next_beams.is_empty() || is_done(&finished, &next_beams, params) {
            beams = next_beams;
            break;
        }
        beams = next_beams;
    }

    // Hit max_length (or stopped early) without enough finished hypotheses:
    // the live beams compete too.
    if finished.len() < params.num_beams {
        for beam in beams {
            add_hypothesis(&mut finished, beam.tokens, beam.score, params);
        }
    }

    let best = finished
        .into_iter()
        .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal));

    Ok(best
        .map(|h| h.tokens.into_iter().skip(1).collect())
        .unwrap_or_default())
}

fn normalized(score: f64, len: usize, params: &GenerationParams) -> f64 {
    score / (len as f64).powf(params.length_penalty)
}

/// Insert a finished hypothesis, keeping only the `num_beams` best.
fn add_hypothesis(
    finished: &mut Vec<Hypothesis>,
    tokens: Vec<u32>,
    score: f64,
    params: &GenerationParams,
) {
    let score = normalized(score, tokens.len(), params);
    finished.push(Hypothesis { tokens, score });
    if finished.len() > params.num_beams {
        finished.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        finished.truncate(params.num_beams);
    }
}

fn is_done(finished: &[Hypothesis], live: &[Beam], params: &GenerationParams) -> bool {
    if finished.len() < params.num_beams {
        return false;
    }
    if params.early_stopping {
        return true;
    }

    // Without early stopping, continue only while the best live beam could
    // still beat the worst finished hypothesis.
    let worst = finished
        .iter()
        .map(|h| h.score)
        .fold(f64::INFINITY, f64::min);
    let best_live = live
        .iter()
        .map(|b| normalized(b.score, b.tokens.len(), params))
        .fold(f64::NEG_INFINITY, f64::max);
    best_live <= worst
}

/// Numerically stable log-softmax over one logits row.
pub fn log_softmax(logits: &[f32]) -> Vec<f64> {
    let max = logits
        .iter()
        .copied()
        .fold(f32::NEG_INFINITY, f32::max) as f64;
    let sum: f64 = logits.iter().map(|&x| (x as f64 - max).exp()).sum();
    let log_sum = sum.ln();
    logits.iter().map(|&x| x as f64 - max - log_sum).collect()
}

/// Indices and values of the `k` largest entries, largest first.
pub fn top_k(values: &[f64], k: usize) -> Vec<(usize, f64)> {
    let mut indexed: Vec<(usize, f64)> = values.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    indexed.truncate(k);
    indexed
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAD: u32 = 0;
    const EOS: u32 = 1;

    fn peaked(vocab: usize, token: u32) -> Vec<f32> {
        let mut row = vec![-10.0; vocab];
        row[token as usize] = 10.0;
        row
    }

    #[test]
    fn test_log_softmax_sums_to_one() {
        let lp = log_softmax(&[1.0, 2.0, 3.0]);
        let total: f64 = lp.iter().map(|x| x.exp()).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(lp[2] > lp[1] && lp[1] > lp[0]);
    }

    #[test]
    fn test_log_softmax_large_values_stay_finite() {
        let lp = log_softmax(&[1000.0, 1000.0]);
        assert!(lp.iter().all(|x| x.is_finite()));
        assert!((lp[0] - (0.5f64).ln()).abs() < 1e-9);
    }

    #[test]
    fn test_top_k_orders_descending() {
        let top = top_k(&[0.1, 0.7, 0.3, 0.5], 2);
        assert_eq!(top.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_beam_search_follows_greedy_path_to_eos() {
        let params = GenerationParams::default();
        let result = beam_search(&params, |beams| {
            Ok(beams
                .iter()
                .map(|seq| match seq.len() {
                    1 => peaked(6, 4),
                    2 => peaked(6, 5),
                    _ => peaked(6, EOS),
                })
                .collect())
        })
        .unwrap();
        assert_eq!(result, vec![4, 5]);
    }

    #[test]
    fn test_beam_search_sees_start_token_first() {
        let params = GenerationParams::default();
        let mut first_call = true;
        beam_search(&params, |beams| {
            if first_call {
                assert_eq!(beams, &[vec![PAD]]);
                first_call = false;
            }
            Ok(beams.iter().map(|_| peaked(4, EOS)).collect())
        })
        .unwrap();
    }

    #[test]
    fn test_beam_search_stops_at_max_length() {
        let params = GenerationParams {
            max_length: 4,
            ..Default::default()
        };
        let mut calls = 0;
        let result = beam_search(&params, |beams| {
            calls += 1;
            Ok(beams.iter().map(|_| peaked(8, 3)).collect())
        })
        .unwrap();
        // max_length counts the start token, so three generated tokens
        assert_eq!(result, vec![3, 3, 3]);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_beam_search_prefers_higher_probability_sequence() {
        // First step: token 2 slightly preferred over token 3. After 2 the model
        // is uncertain; after 3 it is confident about EOS. Beam search should
        // recover the overall better sequence [3].
        let params = GenerationParams {
            num_beams: 2,
            ..Default::default()
        };
        let result = beam_search(&params, |beams| {
            Ok(beams
                .iter()
                .map(|seq| match seq.last().copied() {
                    Some(PAD) => vec![-10.0, -10.0, 1.1, 1.0, -10.0, -10.0],
                    Some(2) => vec![-10.0, 0.0, -10.0, -10.0, 0.0, 0.0],
                    Some(3) => vec![-10.0, 10.0, -10.0, -10.0, -10.0, -10.0],
                    _ => peaked(6, EOS),
                })
                .collect())
        })
        .unwrap();
        assert_eq!(result, vec![3]);
    }

    #[test]
    fn test_beam_search_immediate_eos_yields_empty() {
        let params = GenerationParams::default();
        let result = beam_search(&params, |beams| Ok(beams.iter().map(|_| peaked(4, EOS)).collect()))
            .unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_beam_search_rejects_row_count_mismatch() {
        let params = GenerationParams::default();
        let result = beam_search(&params, |_| Ok(Vec::new()));
        assert!(result.is_err());
    }

    #[test]
    fn test_beam_search_propagates_callback_error() {
        let params = GenerationParams::default();
        let result = beam_search(&params, |_| anyhow::bail!("decoder failed"));
        assert!(result.unwrap_err().to_string().contains("decoder failed"));
    }
}

// ============================================================
// Layer 4 — Causal LM Batcher
// ============================================================
// Implements Burn's Batcher trait to turn a Vec<TokenizedExample>
// into input / target tensors for next-token prediction.
//
// Each example keeps its prompt and labels as separate sequences.
// Here they are joined for teacher forcing:
//
//   sequence = input_ids ++ labels          e.g. [p1 p2 p3 l1 l2]
//   inputs   = sequence[..n-1]                   [p1 p2 p3 l1]
//   targets  = sequence[1..], prompt masked      [ ·  ·  l1 l2]
//
// Masked positions hold the pad token id, which the loss
// ignores. Sequences longer than the model context are cut
// from the end, then every row is right-padded to the longest
// row in the batch.
//
// Reference: Burn Book §4 (Batcher)

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::domain::record::TokenizedExample;

// ─── SftBatch ─────────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct SftBatch<B: Backend> {
    /// Model input tokens — shape: [batch_size, seq_len]
    pub inputs: Tensor<B, 2, Int>,

    /// Next-token targets — shape: [batch_size, seq_len]
    /// Positions equal to the pad id are excluded from the loss
    pub targets: Tensor<B, 2, Int>,
}

// ─── SftBatcher ───────────────────────────────────────────────────────────────
#[derive(Clone, Debug)]
pub struct SftBatcher<B: Backend> {
    pub device:       B::Device,
    pub pad_token_id: u32,
    /// Longest input row the model accepts (its position count)
    pub max_seq_len:  usize,
}

impl<B: Backend> SftBatcher<B> {
    pub fn new(device: B::Device, pad_token_id: u32, max_seq_len: usize) -> Self {
        Self { device, pad_token_id, max_seq_len }
    }
}

/// Build the (inputs, targets) rows for one example, unpadded.
///
/// Both rows always have the same length, at least 1 and at most
/// `max_seq_len`. Only label tokens appear as real targets.
pub fn training_rows(
    example:      &TokenizedExample,
    pad_token_id: u32,
    max_seq_len:  usize,
) -> (Vec<u32>, Vec<u32>) {
    let prompt_len = example.input_ids.len();

    let mut sequence: Vec<u32> = Vec::with_capacity(example.sequence_len());
    sequence.extend_from_slice(&example.input_ids);
    sequence.extend_from_slice(&example.labels);
    sequence.truncate(max_seq_len + 1);

    if sequence.len() < 2 {
        let first = sequence.first().copied().unwrap_or(pad_token_id);
        return (vec![first], vec![pad_token_id]);
    }

    let inputs = sequence[..sequence.len() - 1].to_vec();
    let targets = (1..sequence.len())
        .map(|pos| if pos >= prompt_len { sequence[pos] } else { pad_token_id })
        .collect();

    (inputs, targets)
}

impl<B: Backend> Batcher<TokenizedExample, SftBatch<B>> for SftBatcher<B> {
    fn batch(&self, items: Vec<TokenizedExample>) -> SftBatch<B> {
        let rows: Vec<(Vec<u32>, Vec<u32>)> = items
            .iter()
            .map(|ex| training_rows(ex, self.pad_token_id, self.max_seq_len))
            .collect();

        let batch_size = rows.len();
        let seq_len    = rows.iter().map(|(i, _)| i.len()).max().unwrap_or(1);
        let pad        = self.pad_token_id as i32;

        // ── Flatten with right padding ────────────────────────────────────────
        let mut input_flat:  Vec<i32> = Vec::with_capacity(batch_size * seq_len);
        let mut target_flat: Vec<i32> = Vec::with_capacity(batch_size * seq_len);

        for (inputs, targets) in &rows {
            input_flat.extend(inputs.iter().map(|&x| x as i32));
            input_flat.extend(std::iter::repeat(pad).take(seq_len - inputs.len()));
            target_flat.extend(targets.iter().map(|&x| x as i32));
            target_flat.extend(std::iter::repeat(pad).take(seq_len - targets.len()));
        }

        let inputs = Tensor::<B, 1, Int>::from_ints(
            input_flat.as_slice(), &self.device
        ).reshape([batch_size, seq_len]);

        let targets = Tensor::<B, 1, Int>::from_ints(
            target_flat.as_slice(), &self.device
        ).reshape([batch_size, seq_len]);

        SftBatch { inputs, targets }
    }
}

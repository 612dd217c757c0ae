use anyhow::{bail, Result};
use burn::{
    nn::{
        attention::generate_autoregressive_mask,
        Embedding, EmbeddingConfig,
        LayerNorm, LayerNormConfig,
        LinearConfig,
    },
    prelude::*,
    tensor::activation::{gelu, log_softmax, softmax},
};

use crate::ml::lora::{AdapterWeights, LoraConfig, LoraLinear};

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize
// internally — do NOT add them again or you get conflicting impls.
#[derive(Config, Debug)]
pub struct CausalLmConfig {
    pub vocab_size: usize,
    #[config(default = 1024)]
    pub max_position_embeddings: usize,
    #[config(default = 128)]
    pub d_model: usize,
    #[config(default = 4)]
    pub num_heads: usize,
    #[config(default = 2)]
    pub num_layers: usize,
    #[config(default = 512)]
    pub d_ff: usize,
    #[config(default = 0)]
    pub pad_token_id: u32,
}

impl CausalLmConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_heads == 0 || self.d_model % self.num_heads != 0 {
            bail!(
                "d_model ({}) must be divisible by num_heads ({})",
                self.d_model, self.num_heads
            );
        }
        if self.pad_token_id as usize >= self.vocab_size {
            bail!("pad_token_id {} is outside the vocabulary", self.pad_token_id);
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> CausalLm<B> {
        let token_embedding    = EmbeddingConfig::new(self.vocab_size, self.d_model).init(device);
        let position_embedding = EmbeddingConfig::new(self.max_position_embeddings, self.d_model).init(device);
        let layers: Vec<DecoderBlock<B>> = (0..self.num_layers)
            .map(|_| self.build_decoder_block(device))
            .collect();
        let final_norm = LayerNormConfig::new(self.d_model).init(device);
        let lm_head    = self.projection(self.d_model, self.vocab_size, device);
        CausalLm {
            token_embedding, position_embedding, layers,
            final_norm, lm_head,
            max_position_embeddings: self.max_position_embeddings,
        }
    }

    fn projection<B: Backend>(&self, d_in: usize, d_out: usize, device: &B::Device) -> LoraLinear<B> {
        LoraLinear::new(LinearConfig::new(d_in, d_out).init(device))
    }

    fn build_decoder_block<B: Backend>(&self, device: &B::Device) -> DecoderBlock<B> {
        let self_attn = CausalSelfAttention {
            q_proj:    self.projection(self.d_model, self.d_model, device),
            k_proj:    self.projection(self.d_model, self.d_model, device),
            v_proj:    self.projection(self.d_model, self.d_model, device),
            o_proj:    self.projection(self.d_model, self.d_model, device),
            num_heads: self.num_heads,
        };
        let mlp = Mlp {
            up_proj:   self.projection(self.d_model, self.d_ff, device),
            down_proj: self.projection(self.d_ff, self.d_model, device),
        };
        let input_norm          = LayerNormConfig::new(self.d_model).init(device);
        let post_attention_norm = LayerNormConfig::new(self.d_model).init(device);
        DecoderBlock { input_norm, self_attn, post_attention_norm, mlp }
    }
}

#[derive(Module, Debug)]
pub struct CausalSelfAttention<B: Backend> {
    pub q_proj:    LoraLinear<B>,
    pub k_proj:    LoraLinear<B>,
    pub v_proj:    LoraLinear<B>,
    pub o_proj:    LoraLinear<B>,
    pub num_heads: usize,
}

impl<B: Backend> CausalSelfAttention<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch_size, seq_len, d_model] = x.dims();
        let head_dim = d_model / self.num_heads;

        // [batch, seq, d_model] → [batch, heads, seq, head_dim]
        let split_heads = |t: Tensor<B, 3>| {
            t.reshape([batch_size, seq_len, self.num_heads, head_dim])
                .swap_dims(1, 2)
        };
        let q = split_heads(self.q_proj.forward(x.clone()));
        let k = split_heads(self.k_proj.forward(x.clone()));
        let v = split_heads(self.v_proj.forward(x));

        let scores = q
            .matmul(k.swap_dims(2, 3))
            .div_scalar((head_dim as f64).sqrt());

        // Position i may only attend to positions <= i.
        let mask = generate_autoregressive_mask::<B>(batch_size, seq_len, &scores.device())
            .unsqueeze_dim::<4>(1)
            .repeat_dim(1, self.num_heads);
        let weights = softmax(scores.mask_fill(mask, -1.0e4), 3);

        let context = weights
            .matmul(v)
            .swap_dims(1, 2)
            .reshape([batch_size, seq_len, d_model]);
        self.o_proj.forward(context)
    }
}

#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    pub up_proj:   LoraLinear<B>,
    pub down_proj: LoraLinear<B>,
}

impl<B: Backend> Mlp<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        self.down_proj.forward(gelu(self.up_proj.forward(x)))
    }
}

#[derive(Module, Debug)]
pub struct DecoderBlock<B: Backend> {
    pub input_norm:          LayerNorm<B>,
    pub self_attn:           CausalSelfAttention<B>,
    pub post_attention_norm: LayerNorm<B>,
    pub mlp:                 Mlp<B>,
}

impl<B: Backend> DecoderBlock<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = x.clone() + self.self_attn.forward(self.input_norm.forward(x));
        x.clone() + self.mlp.forward(self.post_attention_norm.forward(x))
    }
}

#[derive(Module, Debug)]
pub struct CausalLm<B: Backend> {
    pub token_embedding:         Embedding<B>,
    pub position_embedding:      Embedding<B>,
    pub layers:                  Vec<DecoderBlock<B>>,
    pub final_norm:              LayerNorm<B>,
    pub lm_head:                 LoraLinear<B>,
    pub max_position_embeddings: usize,
}

impl<B: Backend> CausalLm<B> {
    /// input_ids: [batch, seq_len] → logits: [batch, seq_len, vocab]
    pub fn forward(&self, input_ids: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let [batch_size, seq_len] = input_ids.dims();

        let tok_emb = self.token_embedding.forward(input_ids);
        let positions = Tensor::<B, 1, Int>::arange(0..seq_len as i64, &tok_emb.device())
            .unsqueeze::<2>()
            .expand([batch_size, seq_len]);
        let pos_emb = self.position_embedding.forward(positions);

        let mut x = tok_emb + pos_emb;
        for layer in &self.layers {
            x = layer.forward(x);
        }
        self.lm_head.forward(self.final_norm.forward(x))
    }

    /// Mean next-token cross-entropy over positions whose target is
    /// not `ignore_id`. Returns 0 when every position is ignored.
    pub fn forward_loss(
        &self,
        input_ids: Tensor<B, 2, Int>,
        targets:   Tensor<B, 2, Int>,
        ignore_id: u32,
    ) -> Tensor<B, 1> {
        let logits = self.forward(input_ids);
        let [batch_size, seq_len, vocab] = logits.dims();
        let n = batch_size * seq_len;

        let log_probs = log_softmax(logits.reshape([n, vocab]), 1);
        let targets   = targets.reshape([n, 1]);
        let picked    = log_probs.gather(1, targets.clone()).reshape([n]);

        let keep  = targets.reshape([n]).not_equal_elem(ignore_id as i32).float();
        let count = keep.clone().sum().clamp_min(1.0);

        (picked * keep).sum().neg() / count
    }

    // ─── Projection traversal ─────────────────────────────────────────────────
    // Dotted names follow the usual decoder layout so that LoRA target
    // names like "q_proj" match the same way they do on larger models.

    pub fn projections(&self) -> Vec<(String, &LoraLinear<B>)> {
        let mut out = Vec::new();
        for (i, layer) in self.layers.iter().enumerate() {
            let attn = &layer.self_attn;
            out.push((format!("layers.{i}.self_attn.q_proj"), &attn.q_proj));
            out.push((format!("layers.{i}.self_attn.k_proj"), &attn.k_proj));
            out.push((format!("layers.{i}.self_attn.v_proj"), &attn.v_proj));
            out.push((format!("layers.{i}.self_attn.o_proj"), &attn.o_proj));
            out.push((format!("layers.{i}.mlp.up_proj"),      &layer.mlp.up_proj));
            out.push((format!("layers.{i}.mlp.down_proj"),    &layer.mlp.down_proj));
        }
        out.push(("lm_head".to_string(), &self.lm_head));
        out
    }

    /// Rebuild the model with `f` applied to every projection, in the
    /// same order as `projections()`.
    pub fn map_projections<F>(mut self, mut f: F) -> Self
    where
        F: FnMut(&str, LoraLinear<B>) -> LoraLinear<B>,
    {
        self.layers = self.layers
            .into_iter()
            .enumerate()
            .map(|(i, mut layer)| {
                let attn = layer.self_attn;
                layer.self_attn = CausalSelfAttention {
                    q_proj:    f(&format!("layers.{i}.self_attn.q_proj"), attn.q_proj),
                    k_proj:    f(&format!("layers.{i}.self_attn.k_proj"), attn.k_proj),
                    v_proj:    f(&format!("layers.{i}.self_attn.v_proj"), attn.v_proj),
                    o_proj:    f(&format!("layers.{i}.self_attn.o_proj"), attn.o_proj),
                    num_heads: attn.num_heads,
                };
                let mlp = layer.mlp;
                layer.mlp = Mlp {
                    up_proj:   f(&format!("layers.{i}.mlp.up_proj"),   mlp.up_proj),
                    down_proj: f(&format!("layers.{i}.mlp.down_proj"), mlp.down_proj),
                };
                layer
            })
            .collect();
        self.lm_head = f("lm_head", self.lm_head);
        self
    }

    // ─── LoRA ─────────────────────────────────────────────────────────────────

    /// Freeze every base weight, then add adapters to the targeted
    /// projections and re-enable the biases the bias mode trains.
    pub fn inject_lora(self, cfg: &LoraConfig, device: &B::Device) -> Result<Self> {
        cfg.validate()?;

        let matched = self
            .projections()
            .iter()
            .filter(|(name, _)| cfg.targets(name))
            .count();
        if matched == 0 {
            bail!(
                "LoRA target modules {:?} match no projection in the model",
                cfg.target_modules
            );
        }

        let model = self.no_grad().map_projections(|name, proj| {
            let adapted = cfg.targets(name);
            let proj = if adapted { proj.with_adapter(cfg, device) } else { proj };
            if cfg.bias.trains_bias(adapted) {
                proj.with_trainable_bias()
            } else {
                proj
            }
        });

        tracing::info!(
            "Injected LoRA (r={}, alpha={}) into {} projections",
            cfg.r, cfg.lora_alpha, matched
        );
        Ok(model)
    }

    /// Number of parameters the optimizer will update
    pub fn trainable_params(&self, cfg: &LoraConfig) -> usize {
        self.projections()
            .iter()
            .map(|(_, proj)| {
                let adapter = proj.adapter.as_ref().map_or(0, |a| a.num_params());
                let bias = if cfg.bias.trains_bias(proj.is_adapted()) {
                    proj.bias_params()
                } else {
                    0
                };
                adapter + bias
            })
            .sum()
    }

    pub fn adapter_weights(&self, cfg: &LoraConfig) -> AdapterWeights<B> {
        AdapterWeights {
            projections: self
                .projections()
                .into_iter()
                .map(|(_, proj)| proj.delta(cfg.bias))
                .collect(),
        }
    }

    pub fn apply_adapter_weights(self, weights: AdapterWeights<B>) -> Self {
        let mut deltas = weights.projections.into_iter();
        self.map_projections(|_, proj| match deltas.next() {
            Some(delta) => proj.apply_delta(delta),
            None        => proj,
        })
    }
}

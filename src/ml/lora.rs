// ============================================================
// Layer 5 — Low-Rank Adaptation (LoRA)
// ============================================================
// A LoRA-capable linear projection:
//
//   y = W·x + b + scaling · B(A(dropout(x)))
//
//   W, b     frozen base weights            [d_in, d_out], [d_out]
//   A        trainable down-projection       [d_in, r]
//   B        trainable up-projection         [r, d_out]
//   scaling  lora_alpha / r
//
// B starts at zero, so a freshly injected projection computes
// exactly what the base projection computes.
//
// Only A, B (and biases, depending on the bias mode) are saved
// as "adapter weights" — see AdapterWeights.
//
// Reference: Hu et al. (2021) LoRA: Low-Rank Adaptation of LLMs

use anyhow::{bail, Result};
use burn::{
    module::Param,
    nn::{Dropout, DropoutConfig, Linear},
    prelude::*,
    tensor::Distribution,
};
use serde::{Deserialize, Serialize};

// ─── Configuration ────────────────────────────────────────────────────────────

/// Which biases are trained alongside the adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LoraBias {
    /// All biases stay frozen
    None,
    /// Every projection bias is trained
    All,
    /// Only biases of adapted projections are trained
    #[value(name = "lora_only")]
    LoraOnly,
}

impl LoraBias {
    pub fn trains_bias(self, adapted: bool) -> bool {
        match self {
            LoraBias::None     => false,
            LoraBias::All      => true,
            LoraBias::LoraOnly => adapted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeftType {
    #[serde(rename = "LORA")]
    Lora,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskType {
    #[serde(rename = "CAUSAL_LM")]
    CausalLm,
}

/// Adapter-injection settings, written verbatim to `adapter_config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoraConfig {
    pub peft_type:      PeftType,
    pub task_type:      TaskType,
    pub r:              usize,
    pub lora_alpha:     f64,
    pub target_modules: Vec<String>,
    pub lora_dropout:   f64,
    pub bias:           LoraBias,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_model_name_or_path: Option<String>,
}

impl Default for LoraConfig {
    fn default() -> Self {
        Self {
            peft_type:      PeftType::Lora,
            task_type:      TaskType::CausalLm,
            r:              8,
            lora_alpha:     32.0,
            target_modules: vec!["q_proj".to_string(), "v_proj".to_string()],
            lora_dropout:   0.05,
            bias:           LoraBias::None,
            base_model_name_or_path: None,
        }
    }
}

impl LoraConfig {
    pub fn scaling(&self) -> f64 {
        self.lora_alpha / self.r as f64
    }

    /// A projection is targeted when its dotted name equals a target
    /// or ends with `.{target}` (e.g. `layers.3.self_attn.q_proj`).
    pub fn targets(&self, name: &str) -> bool {
        self.target_modules.iter().any(|t| {
            name == t
                || (name.len() > t.len()
                    && name.ends_with(t.as_str())
                    && name.as_bytes()[name.len() - t.len() - 1] == b'.')
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.r == 0 {
            bail!("LoRA rank must be at least 1");
        }
        if self.target_modules.is_empty() {
            bail!("LoRA needs at least one target module");
        }
        if !(0.0..1.0).contains(&self.lora_dropout) {
            bail!("LoRA dropout must be in [0, 1), got {}", self.lora_dropout);
        }
        Ok(())
    }
}

// ─── LoraAdapter ──────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct LoraAdapter<B: Backend> {
    /// Down-projection `[d_in, r]`
    pub lora_a:  Param<Tensor<B, 2>>,
    /// Up-projection `[r, d_out]`
    pub lora_b:  Param<Tensor<B, 2>>,
    pub dropout: Dropout,
    pub scaling: f64,
}

impl<B: Backend> LoraAdapter<B> {
    pub fn new(d_in: usize, d_out: usize, cfg: &LoraConfig, device: &B::Device) -> Self {
        // Kaiming-uniform bound for fan_in = d_in
        let bound  = 1.0 / (d_in as f64).sqrt();
        let lora_a = Tensor::<B, 2>::random([d_in, cfg.r], Distribution::Uniform(-bound, bound), device);
        let lora_b = Tensor::<B, 2>::zeros([cfg.r, d_out], device);

        Self {
            lora_a:  Param::from_tensor(lora_a),
            lora_b:  Param::from_tensor(lora_b),
            dropout: DropoutConfig::new(cfg.lora_dropout).init(),
            scaling: cfg.scaling(),
        }
    }

    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        self.dropout
            .forward(x)
            .matmul(self.lora_a.val().unsqueeze())
            .matmul(self.lora_b.val().unsqueeze())
            .mul_scalar(self.scaling)
    }

    pub fn num_params(&self) -> usize {
        self.lora_a.shape().num_elements() + self.lora_b.shape().num_elements()
    }
}

// ─── LoraLinear ───────────────────────────────────────────────────────────────

/// A base `Linear` plus an optional adapter. Models are built and
/// loaded with no adapter; `with_adapter` injects one.
#[derive(Module, Debug)]
pub struct LoraLinear<B: Backend> {
    pub base:    Linear<B>,
    pub adapter: Option<LoraAdapter<B>>,
}

impl<B: Backend> LoraLinear<B> {
    pub fn new(base: Linear<B>) -> Self {
        Self { base, adapter: None }
    }

    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match &self.adapter {
            Some(adapter) => self.base.forward(x.clone()) + adapter.forward(x),
            None          => self.base.forward(x),
        }
    }

    pub fn with_adapter(mut self, cfg: &LoraConfig, device: &B::Device) -> Self {
        let [d_in, d_out] = self.base.weight.shape().dims();
        self.adapter = Some(LoraAdapter::new(d_in, d_out, cfg, device));
        self
    }

    pub fn with_trainable_bias(mut self) -> Self {
        self.base.bias = self.base.bias.map(|b| b.map(|t| t.set_require_grad(true)));
        self
    }

    pub fn is_adapted(&self) -> bool {
        self.adapter.is_some()
    }

    pub fn bias_params(&self) -> usize {
        self.base.bias.as_ref().map_or(0, |b| b.shape().num_elements())
    }

    /// Copy of the parts that are saved as adapter weights
    pub fn delta(&self, bias_mode: LoraBias) -> ProjectionDelta<B> {
        let bias = if bias_mode.trains_bias(self.is_adapted()) {
            self.base.bias.clone()
        } else {
            None
        };
        ProjectionDelta { adapter: self.adapter.clone(), bias }
    }

    /// Overwrite adapter (and saved bias) with loaded values
    pub fn apply_delta(mut self, delta: ProjectionDelta<B>) -> Self {
        if delta.adapter.is_some() {
            self.adapter = delta.adapter;
        }
        if delta.bias.is_some() {
            self.base.bias = delta.bias;
        }
        self
    }
}

// ─── Adapter records ──────────────────────────────────────────────────────────

/// The trainable state of one projection
#[derive(Module, Debug)]
pub struct ProjectionDelta<B: Backend> {
    pub adapter: Option<LoraAdapter<B>>,
    pub bias:    Option<Param<Tensor<B, 1>>>,
}

/// All trainable state of a model, one entry per projection in
/// model traversal order. This is what gets written to disk.
#[derive(Module, Debug)]
pub struct AdapterWeights<B: Backend> {
    pub projections: Vec<ProjectionDelta<B>>,
}

impl<B: Backend> AdapterWeights<B> {
    pub fn num_adapted(&self) -> usize {
        self.projections.iter().filter(|p| p.adapter.is_some()).count()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, nn::LinearConfig};

    type TB = NdArray;

    #[test]
    fn test_target_matching() {
        let cfg = LoraConfig::default();
        assert!(cfg.targets("q_proj"));
        assert!(cfg.targets("layers.0.self_attn.q_proj"));
        assert!(cfg.targets("layers.11.self_attn.v_proj"));
        assert!(!cfg.targets("layers.0.self_attn.k_proj"));
        assert!(!cfg.targets("layers.0.self_attn.xq_proj"));
        assert!(!cfg.targets("lm_head"));
    }

    #[test]
    fn test_scaling_is_alpha_over_rank() {
        let cfg = LoraConfig::default();
        assert_eq!(cfg.scaling(), 4.0);
    }

    #[test]
    fn test_validate_rejects_bad_configs() {
        assert!(LoraConfig::default().validate().is_ok());
        assert!(LoraConfig { r: 0, ..Default::default() }.validate().is_err());
        assert!(LoraConfig { target_modules: vec![], ..Default::default() }.validate().is_err());
        assert!(LoraConfig { lora_dropout: 1.0, ..Default::default() }.validate().is_err());
    }

    #[test]
    fn test_adapter_config_json_shape() {
        let json: serde_json::Value = serde_json::to_value(LoraConfig::default()).unwrap();
        assert_eq!(json["peft_type"], "LORA");
        assert_eq!(json["task_type"], "CAUSAL_LM");
        assert_eq!(json["r"], 8);
        assert_eq!(json["lora_alpha"], 32.0);
        assert_eq!(json["bias"], "none");
        assert_eq!(json["target_modules"], serde_json::json!(["q_proj", "v_proj"]));
    }

    #[test]
    fn test_bias_modes() {
        assert!(!LoraBias::None.trains_bias(true));
        assert!(LoraBias::All.trains_bias(false));
        assert!(LoraBias::LoraOnly.trains_bias(true));
        assert!(!LoraBias::LoraOnly.trains_bias(false));
    }

    #[test]
    fn test_fresh_adapter_does_not_change_output() {
        let device = Default::default();
        let base   = LoraLinear::new(LinearConfig::new(6, 4).init::<TB>(&device));
        let x      = Tensor::<TB, 3>::random([2, 3, 6], Distribution::Default, &device);

        let before  = base.forward(x.clone());
        let adapted = base.with_adapter(&LoraConfig::default(), &device);
        let after   = adapted.forward(x);

        before.into_data().assert_approx_eq(&after.into_data(), 5);
    }

    #[test]
    fn test_adapter_shapes_and_params() {
        let device  = Default::default();
        let cfg     = LoraConfig { r: 2, ..Default::default() };
        let adapted = LoraLinear::new(LinearConfig::new(6, 4).init::<TB>(&device))
            .with_adapter(&cfg, &device);

        let adapter = adapted.adapter.as_ref().unwrap();
        assert_eq!(adapter.lora_a.shape().dims::<2>(), [6, 2]);
        assert_eq!(adapter.lora_b.shape().dims::<2>(), [2, 4]);
        assert_eq!(adapter.num_params(), 6 * 2 + 2 * 4);
    }

    #[test]
    fn test_delta_respects_bias_mode() {
        let device = Default::default();
        let plain  = LoraLinear::new(LinearConfig::new(3, 3).init::<TB>(&device));

        assert!(plain.delta(LoraBias::None).bias.is_none());
        assert!(plain.delta(LoraBias::All).bias.is_some());
        assert!(plain.delta(LoraBias::LoraOnly).bias.is_none());
        assert!(plain.delta(LoraBias::All).adapter.is_none());
    }
}

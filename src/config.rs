use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{DmnError, DmnResult};

/// Number of candidate answers per question.
pub const CHOICE_NUM: usize = 4;

/// Attention features: f*q, f*m, |f-q|, |f-m|.
pub const NUM_ATTENTION_FEATURES: usize = 4;

/// Standard deviation of the gradient noise enabled by `noisy_grads`.
pub const GRAD_NOISE_STDDEV: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelVariant {
    Plus,
}

impl ModelVariant {
    pub fn parse(name: &str) -> DmnResult<Self> {
        match name {
            "plus" => Ok(ModelVariant::Plus),
            other => Err(DmnError::UnsupportedVariant(format!(
                "model variant '{other}' is not implemented"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMaskMode {
    Sentence,
}

impl InputMaskMode {
    pub fn parse(name: &str) -> DmnResult<Self> {
        match name {
            "sentence" => Ok(InputMaskMode::Sentence),
            other => Err(DmnError::UnsupportedVariant(format!(
                "input mask mode '{other}' is not implemented"
            ))),
        }
    }
}

/// What cosine scoring does with a zero-norm story or choice vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZeroNormPolicy {
    /// Score the pair as 0.
    Fallback,
    /// Fail the batch with `NumericDegenerateInput`.
    Reject,
}

impl Default for ZeroNormPolicy {
    fn default() -> Self {
        ZeroNormPolicy::Fallback
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DmnConfig {
    pub variant: String,
    pub embed_size: usize,
    pub hidden_size: usize,
    pub num_hops: usize,
    pub num_attention_features: usize,
    pub choice_num: usize,
    /// Keep probability applied to facts and final memory while training.
    pub dropout: f64,
    pub l2: f32,
    pub beta: f32,
    pub strong_supervision: bool,
    /// Weight word vectors by position before summing a sentence. The weights
    /// are computed from the padded sentence width, not each sentence's length.
    pub position_encoding: bool,
    pub zero_norm_policy: ZeroNormPolicy,
    /// Also apply dropout to the inputs and outputs of every GRU step.
    pub drop_grus: bool,
}

impl Default for DmnConfig {
    fn default() -> Self {
        Self {
            variant: "plus".to_string(),
            embed_size: 100,
            hidden_size: 100,
            num_hops: 2,
            num_attention_features: NUM_ATTENTION_FEATURES,
            choice_num: CHOICE_NUM,
            dropout: 0.55,
            l2: 0.001,
            beta: 1.0,
            strong_supervision: false,
            position_encoding: true,
            zero_norm_policy: ZeroNormPolicy::Fallback,
            drop_grus: false,
        }
    }
}

impl DmnConfig {
    pub fn validate(&self) -> DmnResult<()> {
        ModelVariant::parse(&self.variant)?;
        if self.embed_size == 0 {
            return Err(DmnError::config("embed_size must be > 0"));
        }
        // Facts, memory, story and choice vectors all live in one space.
        if self.hidden_size != self.embed_size {
            return Err(DmnError::config(format!(
                "hidden_size ({}) must equal embed_size ({})",
                self.hidden_size, self.embed_size
            )));
        }
        if self.num_hops == 0 {
            return Err(DmnError::config("num_hops must be > 0"));
        }
        if self.num_attention_features != NUM_ATTENTION_FEATURES {
            return Err(DmnError::config(format!(
                "num_attention_features must be {NUM_ATTENTION_FEATURES}, got {}",
                self.num_attention_features
            )));
        }
        if self.choice_num != CHOICE_NUM {
            return Err(DmnError::config(format!(
                "choice_num must be {CHOICE_NUM}, got {}",
                self.choice_num
            )));
        }
        if !(self.dropout > 0.0 && self.dropout <= 1.0) {
            return Err(DmnError::config("dropout keep probability must be within (0,1]"));
        }
        if self.l2 < 0.0 || self.beta < 0.0 {
            return Err(DmnError::config("l2 and beta must be >= 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_epochs")]
    pub max_epochs: usize,
    #[serde(default = "default_early_stopping")]
    pub early_stopping: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default)]
    pub cap_grads: bool,
    #[serde(default = "default_max_grad_val")]
    pub max_grad_val: f32,
    #[serde(default = "default_anneal_threshold")]
    pub anneal_threshold: usize,
    #[serde(default = "default_anneal_by")]
    pub anneal_by: f64,
    #[serde(default = "default_log_every")]
    pub log_every: usize,
    /// Add Gaussian noise (stddev `GRAD_NOISE_STDDEV`) to gradients before each update.
    #[serde(default)]
    pub noisy_grads: bool,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_epochs: default_max_epochs(),
            early_stopping: default_early_stopping(),
            learning_rate: default_learning_rate(),
            cap_grads: false,
            max_grad_val: default_max_grad_val(),
            anneal_threshold: default_anneal_threshold(),
            anneal_by: default_anneal_by(),
            log_every: default_log_every(),
            noisy_grads: false,
            seed: None,
            checkpoint_dir: default_checkpoint_dir(),
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> DmnResult<()> {
        if self.batch_size == 0 {
            return Err(DmnError::config("batch_size must be > 0"));
        }
        if self.learning_rate <= 0.0 {
            return Err(DmnError::config("learning_rate must be > 0"));
        }
        if self.anneal_threshold == 0 {
            return Err(DmnError::config("anneal_threshold must be > 0"));
        }
        if self.anneal_by <= 1.0 {
            return Err(DmnError::config("anneal_by must be > 1"));
        }
        if self.cap_grads && self.max_grad_val <= 0.0 {
            return Err(DmnError::config("max_grad_val must be > 0 when cap_grads is set"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub train_file: PathBuf,
    pub test_file: PathBuf,
    pub num_train: usize,
    pub max_allowed_inputs: usize,
    pub input_mask_mode: String,
    pub word2vec_init: bool,
    pub glove_path: Option<PathBuf>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            train_file: PathBuf::from("data/s_train.json"),
            test_file: PathBuf::from("data/test.json"),
            num_train: 650,
            max_allowed_inputs: 100,
            input_mask_mode: "sentence".to_string(),
            word2vec_init: false,
            glove_path: None,
        }
    }
}

impl DataConfig {
    pub fn validate(&self) -> DmnResult<()> {
        InputMaskMode::parse(&self.input_mask_mode)?;
        if self.max_allowed_inputs == 0 {
            return Err(DmnError::config("max_allowed_inputs must be > 0"));
        }
        if self.word2vec_init && self.glove_path.is_none() {
            return Err(DmnError::config("word2vec_init requires glove_path"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub model: DmnConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub data: DataConfig,
}

impl TrainConfig {
    pub fn validate(&self) -> DmnResult<()> {
        self.model.validate()?;
        self.training.validate()?;
        self.data.validate()
    }
}

fn default_batch_size() -> usize {
    32
}

fn default_max_epochs() -> usize {
    256
}

fn default_early_stopping() -> usize {
    20
}

fn default_learning_rate() -> f64 {
    0.01
}

fn default_max_grad_val() -> f32 {
    10.0
}

fn default_anneal_threshold() -> usize {
    1000
}

fn default_anneal_by() -> f64 {
    1.5
}

fn default_log_every() -> usize {
    10
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("weights")
}

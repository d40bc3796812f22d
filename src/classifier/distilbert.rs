//! # DistilBERT Scam Classifier
//!
//! Runs a fine-tuned `DistilBertForSequenceClassification` checkpoint with
//! Candle. Label index 1 is "scam".
//!
//! ## Model files:
//! The classifier expects `config.json`, `tokenizer.json` and
//! `model.safetensors`. They are read from the configured model directory
//! first; if any is missing they are fetched from the HuggingFace Hub repo.
//!
//! ## Forward pass:
//! ```text
//! text -> tokenizer -> DistilBertModel -> [CLS] hidden state
//!      -> pre_classifier (dim x dim) -> ReLU -> classifier (dim x labels)
//!      -> softmax -> p(scam)
//! ```

use crate::classifier::Classifier;
use crate::error::{AppError, AppResult};
use anyhow::{anyhow, Result};
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{linear, Linear, Module, VarBuilder};
use candle_transformers::models::distilbert::{Config, DistilBertModel, DTYPE};
use std::path::{Path, PathBuf};
use tokenizers::{Tokenizer, TruncationParams};
use tracing::{debug, info};

/// DistilBERT's position embedding limit.
const MAX_SEQUENCE_LENGTH: usize = 512;
const SCAM_LABEL: usize = 1;

/// Paths of a complete checkpoint on local disk.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: PathBuf,
}

impl ModelFiles {
    /// Files inside `dir`, if all of them exist.
    pub fn in_dir(dir: &Path) -> Option<Self> {
        let files = Self {
            config: dir.join("config.json"),
            tokenizer: dir.join("tokenizer.json"),
            weights: dir.join("model.safetensors"),
        };
        (files.config.exists() && files.tokenizer.exists() && files.weights.exists())
            .then_some(files)
    }

    /// Local directory first, HuggingFace Hub second.
    pub async fn resolve(model_dir: &str, repo: &str) -> Result<Self> {
        if let Some(files) = Self::in_dir(Path::new(model_dir)) {
            info!("Using classifier checkpoint in {}", model_dir);
            return Ok(files);
        }

        info!(
            "No checkpoint in {}, downloading classifier from {}",
            model_dir, repo
        );
        let api = hf_hub::api::tokio::ApiBuilder::new()
            .with_token(std::env::var("HF_TOKEN").ok())
            .with_progress(false)
            .build()
            .map_err(|e| anyhow!("Failed to create HuggingFace API client: {}", e))?;
        let hub_repo = api.model(repo.to_string());

        let config = hub_repo
            .get("config.json")
            .await
            .map_err(|e| anyhow!("Failed to download config.json from {}: {}", repo, e))?;
        let tokenizer = hub_repo
            .get("tokenizer.json")
            .await
            .map_err(|e| anyhow!("Failed to download tokenizer.json from {}: {}", repo, e))?;
        let weights = hub_repo
            .get("model.safetensors")
            .await
            .map_err(|e| anyhow!("Failed to download model.safetensors from {}: {}", repo, e))?;

        Ok(Self {
            config,
            tokenizer,
            weights,
        })
    }
}

pub struct DistilBertClassifier {
    model: DistilBertModel,
    pre_classifier: Linear,
    classifier: Linear,
    tokenizer: Tokenizer,
    device: Device,
    version: String,
}

impl DistilBertClassifier {
    /// Load a checkpoint onto `device`. `version` is recorded with every call.
    pub fn load(files: &ModelFiles, device: Device, version: impl Into<String>) -> Result<Self> {
        let start_time = std::time::Instant::now();

        let raw_config: serde_json::Value =
            serde_json::from_reader(std::fs::File::open(&files.config)?)?;
        let dim = raw_config
            .get("dim")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| anyhow!("config.json has no 'dim' field"))? as usize;
        let num_labels = raw_config
            .get("id2label")
            .and_then(|v| v.as_object())
            .map(|labels| labels.len())
            .unwrap_or(2);
        if num_labels <= SCAM_LABEL {
            return Err(anyhow!(
                "Classifier head has {} labels, expected at least 2",
                num_labels
            ));
        }
        let config: Config = serde_json::from_value(raw_config)?;

        let mut tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQUENCE_LENGTH,
                ..Default::default()
            }))
            .map_err(|e| anyhow!("Failed to configure truncation: {}", e))?;
        tokenizer.with_padding(None);

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[&files.weights], DTYPE, &device)? };
        let model = DistilBertModel::load(vb.clone(), &config)?;
        let pre_classifier = linear(dim, dim, vb.pp("pre_classifier"))?;
        let classifier = linear(dim, num_labels, vb.pp("classifier"))?;

        info!(
            "DistilBERT classifier loaded in {:.2}s ({} labels)",
            start_time.elapsed().as_secs_f64(),
            num_labels
        );

        Ok(Self {
            model,
            pre_classifier,
            classifier,
            tokenizer,
            device,
            version: version.into(),
        })
    }

    fn forward(&self, text: &str) -> Result<f64> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow!("Tokenization failed: {}", e))?;
        let ids = encoding.get_ids();
        let seq_len = ids.len();
        debug!("Classifying {} tokens", seq_len);

        let input_ids = Tensor::new(ids, &self.device)?.unsqueeze(0)?;
        // No padding and no causal masking: every position attends everywhere.
        let mask = Tensor::zeros((seq_len, seq_len), DType::U8, &self.device)?;

        let hidden = self.model.forward(&input_ids, &mask)?;
        let cls = hidden.narrow(1, 0, 1)?.squeeze(1)?;
        let pooled = self.pre_classifier.forward(&cls)?.relu()?;
        let logits = self.classifier.forward(&pooled)?;
        let probs = candle_nn::ops::softmax(&logits, D::Minus1)?
            .squeeze(0)?
            .to_dtype(DType::F32)?
            .to_vec1::<f32>()?;

        probs
            .get(SCAM_LABEL)
            .map(|p| *p as f64)
            .ok_or_else(|| anyhow!("Classifier produced {} logits", probs.len()))
    }
}

impl Classifier for DistilBertClassifier {
    fn score(&self, text: &str) -> AppResult<f64> {
        self.forward(text)
            .map_err(|e| AppError::ClassificationError(format!("DistilBERT inference failed: {}", e)))
    }

    fn model_version(&self) -> &str {
        &self.version
    }
}

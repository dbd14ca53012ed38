use anyhow::{Context, Result};
use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::TrainConfig;
use crate::data::{Tokenizer, Vocabulary};
use crate::error::DmnError;
use crate::model::DmnModel;

/// Checkpoint metadata written next to the model weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointData {
    pub epoch: usize,
    pub config: TrainConfig,
    pub model_file: String,
    pub vocab_file: String,
    pub vocab_size: usize,
    pub val_loss: f64,
    pub val_accuracy: f64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// A model restored together with the vocabulary it was trained on.
#[derive(Debug)]
pub struct RestoredCheckpoint<B: Backend> {
    pub model: DmnModel<B>,
    pub vocab: Vocabulary,
    pub metadata: CheckpointData,
}

/// Save model weights, vocabulary and metadata; returns the metadata path.
pub fn save_checkpoint<B: Backend>(
    model: &DmnModel<B>,
    vocab: &Vocabulary,
    epoch: usize,
    val_loss: f64,
    val_accuracy: f64,
    config: &TrainConfig,
    checkpoint_dir: &Path,
) -> Result<PathBuf> {
    fs::create_dir_all(checkpoint_dir)
        .with_context(|| format!("Failed to create checkpoint directory: {:?}", checkpoint_dir))?;

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    let checkpoint_name = format!("checkpoint_epoch_{}_ts_{}", epoch, timestamp);
    let model_file = format!("{}_model", checkpoint_name);
    let model_path = checkpoint_dir.join(&model_file);

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    recorder
        .record(model.clone().into_record(), model_path.clone())
        .with_context(|| "Failed to save model weights")?;
    info!("Model weights saved to: {:?}", model_path);

    // Each checkpoint owns its vocabulary so later runs cannot remap it.
    let vocab_file = format!("{}_vocab.json", checkpoint_name);
    vocab.save(&checkpoint_dir.join(&vocab_file))?;

    let checkpoint_data = CheckpointData {
        epoch,
        config: config.clone(),
        model_file,
        vocab_file,
        vocab_size: vocab.vocab_size(),
        val_loss,
        val_accuracy,
        timestamp,
    };

    let metadata_path = checkpoint_dir.join(checkpoint_name).with_extension("json");
    let metadata_json = serde_json::to_string_pretty(&checkpoint_data)
        .with_context(|| "Failed to serialize checkpoint metadata")?;
    fs::write(&metadata_path, metadata_json)
        .with_context(|| format!("Failed to write checkpoint metadata: {:?}", metadata_path))?;

    info!("Checkpoint saved at epoch {}: {:?}", epoch, metadata_path);
    Ok(metadata_path)
}

/// Restore a checkpoint. Missing or incompatible files are `WeightRestore` errors.
pub fn load_checkpoint<B: Backend>(
    checkpoint_path: &Path,
    device: &B::Device,
) -> Result<RestoredCheckpoint<B>> {
    let restore = |msg: String| DmnError::WeightRestore(msg);

    let metadata_json = fs::read_to_string(checkpoint_path)
        .map_err(|e| restore(format!("cannot read {:?}: {e}", checkpoint_path)))?;
    let metadata: CheckpointData = serde_json::from_str(&metadata_json)
        .map_err(|e| restore(format!("bad metadata in {:?}: {e}", checkpoint_path)))?;
    info!("Loading checkpoint from epoch {}", metadata.epoch);

    let checkpoint_dir = checkpoint_path
        .parent()
        .ok_or_else(|| restore(format!("invalid checkpoint path {:?}", checkpoint_path)))?;

    let vocab = Vocabulary::load(&checkpoint_dir.join(&metadata.vocab_file))
        .map_err(|e| restore(format!("{e:#}")))?;
    if vocab.vocab_size() != metadata.vocab_size {
        return Err(restore(format!(
            "vocabulary has {} words, checkpoint was trained with {}",
            vocab.vocab_size(),
            metadata.vocab_size
        ))
        .into());
    }

    let model = DmnModel::<B>::new(metadata.config.model.clone(), metadata.vocab_size, device)?;
    let model_path = checkpoint_dir.join(&metadata.model_file);
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let record = recorder
        .load(model_path.clone(), device)
        .map_err(|e| restore(format!("cannot load weights from {:?}: {e}", model_path)))?;
    let model = model.load_record(record);

    info!("Model weights loaded successfully");
    Ok(RestoredCheckpoint {
        model,
        vocab,
        metadata,
    })
}

/// All checkpoints in a directory as `(path, epoch, timestamp)`, oldest first.
pub fn list_checkpoints(checkpoint_dir: &Path) -> Result<Vec<(PathBuf, usize, u64)>> {
    if !checkpoint_dir.exists() {
        warn!("Checkpoint directory does not exist: {:?}", checkpoint_dir);
        return Ok(Vec::new());
    }

    let mut checkpoints = Vec::new();
    for entry in WalkDir::new(checkpoint_dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            if let Ok(metadata_json) = fs::read_to_string(path) {
                if let Ok(data) = serde_json::from_str::<CheckpointData>(&metadata_json) {
                    checkpoints.push((path.to_path_buf(), data.epoch, data.timestamp));
                }
            }
        }
    }

    checkpoints.sort_by_key(|(_, epoch, ts)| (*ts, *epoch));
    Ok(checkpoints)
}

/// Most recently written checkpoint.
pub fn latest_checkpoint(checkpoint_dir: &Path) -> Result<Option<PathBuf>> {
    Ok(list_checkpoints(checkpoint_dir)?
        .pop()
        .map(|(path, _, _)| path))
}

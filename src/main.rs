use anyhow::{Context, Result};
use burn::backend::Autodiff;
use burn::module::AutodiffModule;
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dmn_plus::checkpoint::{latest_checkpoint, load_checkpoint, save_checkpoint};
use dmn_plus::config::TrainConfig;
use dmn_plus::data::{
    McqDataLoader, McqRecord, PaddingSpec, Tokenizer, WordVectors, build_vocabulary,
    encode_records, load_records, split_train_valid,
};
use dmn_plus::model::DmnModel;
use dmn_plus::training::{DmnTrainer, evaluate, predict};

#[cfg(feature = "wgpu-backend")]
type Backend = burn_wgpu::Wgpu;
#[cfg(all(feature = "tch-backend", not(feature = "wgpu-backend")))]
type Backend = burn_tch::LibTorch<f32>;
#[cfg(not(any(feature = "wgpu-backend", feature = "tch-backend")))]
type Backend = burn_ndarray::NdArray<f32>;

type TrainBackend = Autodiff<Backend>;

#[derive(Debug, Parser)]
#[command(author, version, about = "DMN+ multiple-choice reading comprehension")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Train on the configured corpus, checkpointing the best model
    Train(TrainArgs),
    /// Predict answers for the test corpus with a trained checkpoint
    Test(TestArgs),
}

#[derive(Debug, Args)]
struct TrainArgs {
    /// Path to configuration JSON file
    #[arg(long)]
    config: PathBuf,
}

#[derive(Debug, Args)]
struct TestArgs {
    /// Path to configuration JSON file
    #[arg(long)]
    config: PathBuf,
    /// Checkpoint metadata file; defaults to the latest in the checkpoint directory
    #[arg(long)]
    checkpoint: Option<PathBuf>,
    /// Corpus to answer; defaults to the configured test file
    #[arg(long)]
    input: Option<PathBuf>,
    /// Where to write one predicted choice index per line
    #[arg(long, default_value = "answer.txt")]
    output: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train(args) => train_command(args),
        Commands::Test(args) => test_command(args),
    }
}

fn read_config(path: &Path) -> Result<TrainConfig> {
    info!("Loading configuration from: {:?}", path);
    let config_str = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    let config: TrainConfig = serde_json::from_str(&config_str)
        .with_context(|| "Failed to parse config JSON")?;
    config.validate()?;
    Ok(config)
}

fn train_command(args: TrainArgs) -> Result<()> {
    let config = read_config(&args.config)?;
    info!(
        "Model config: embed_size={}, hidden_size={}, num_hops={}",
        config.model.embed_size, config.model.hidden_size, config.model.num_hops
    );

    let device = Default::default();

    let train_records = load_records(&config.data.train_file)?;
    let mut all_records: Vec<McqRecord> = train_records.clone();
    if config.data.test_file.exists() {
        all_records.extend(load_records(&config.data.test_file)?);
    } else {
        warn!("Test file {:?} not found, vocabulary covers training data only", config.data.test_file);
    }
    let vocab = build_vocabulary(&all_records)?;

    let examples = encode_records(&train_records, &vocab)?;
    let padding = PaddingSpec::from_examples(&examples, config.data.max_allowed_inputs);
    info!("Padding: {:?}", padding);
    let (train_examples, valid_examples) = split_train_valid(examples, config.data.num_train);
    if valid_examples.is_empty() {
        anyhow::bail!(
            "num_train ({}) leaves no validation examples out of {}",
            config.data.num_train,
            train_records.len()
        );
    }
    info!(
        "Training on {} examples, validating on {}",
        train_examples.len(),
        valid_examples.len()
    );

    info!("Initializing DMN+ model...");
    let mut model = DmnModel::<TrainBackend>::new(config.model.clone(), vocab.vocab_size(), &device)?;
    if config.data.word2vec_init {
        let glove_path = config
            .data
            .glove_path
            .as_ref()
            .context("word2vec_init requires glove_path")?;
        let vectors = WordVectors::load_glove(glove_path, config.model.embed_size, &vocab)?;
        model = model.with_embedding(vectors.to_tensor(&vocab, config.training.seed, &device))?;
    }

    let batch_size = config.training.batch_size;
    let mut train_loader = McqDataLoader::<TrainBackend>::new(train_examples, padding, batch_size, device.clone())
        .with_shuffle(config.training.seed)
        .with_drop_last(true);
    let mut valid_loader = McqDataLoader::<TrainBackend>::new(valid_examples, padding, batch_size, device.clone());

    let checkpoint_dir = config.training.checkpoint_dir.clone();
    let mut trainer = DmnTrainer::new(model, config.training.clone());
    info!("Starting training for up to {} epochs...", config.training.max_epochs);
    let report = trainer.fit(&mut train_loader, &mut valid_loader, |model, epoch, stats| {
        save_checkpoint(
            &model.valid(),
            &vocab,
            epoch,
            stats.loss,
            stats.accuracy,
            &config,
            &checkpoint_dir,
        )
        .map(|_| ())
    })?;

    info!(
        "Training completed after {} epochs: best epoch {}, validation loss {:.6}, validation accuracy {:.4}",
        report.epochs, report.best_epoch, report.best_val_loss, report.best_val_accuracy
    );
    Ok(())
}

fn test_command(args: TestArgs) -> Result<()> {
    let config = read_config(&args.config)?;
    let device = Default::default();

    let checkpoint = match args.checkpoint {
        Some(path) => path,
        None => latest_checkpoint(&config.training.checkpoint_dir)?.with_context(|| {
            format!("No checkpoint found in {:?}", config.training.checkpoint_dir)
        })?,
    };
    let restored = load_checkpoint::<Backend>(&checkpoint, &device)?;

    let input = args.input.unwrap_or(config.data.test_file.clone());
    let records = load_records(&input)?;
    let examples = encode_records(&records, &restored.vocab)?;
    let unknown = examples
        .iter()
        .flat_map(|e| e.question.iter().chain(e.sentences.iter().flatten()))
        .filter(|&&t| t == restored.vocab.unk_id())
        .count();
    if unknown > 0 {
        warn!("{} passage or question words are outside the vocabulary", unknown);
    }

    let labelled = examples.iter().all(|e| e.label.is_some());
    let padding = PaddingSpec::from_examples(&examples, config.data.max_allowed_inputs);
    let mut loader = McqDataLoader::<Backend>::new(examples, padding, config.training.batch_size, device);

    info!("Running DMN+ on {} questions", records.len());
    let predictions = predict(&restored.model, &mut loader)?;
    let mut answers = String::new();
    for pred in &predictions {
        answers.push_str(&pred.to_string());
        answers.push('\n');
    }
    fs::write(&args.output, answers)
        .with_context(|| format!("Failed to write answers to {:?}", args.output))?;
    info!("Wrote {} answers to {:?}", predictions.len(), args.output);

    if labelled && !predictions.is_empty() {
        let stats = evaluate(&restored.model, &mut loader)?;
        info!("Test loss {:.6}, accuracy {:.4}", stats.loss, stats.accuracy);
    }
    Ok(())
}

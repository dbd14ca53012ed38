use anyhow::Result;
use burn::grad_clipping::GradientClippingConfig;
use burn::module::{Module, ModuleVisitor, Param};
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::tensor::{Distribution, Int, Tensor, backend::{AutodiffBackend, Backend}};
use std::marker::PhantomData;
use tracing::{debug, info};

use crate::config::{GRAD_NOISE_STDDEV, TrainingConfig};
use crate::data::DataLoader;
use crate::error::DmnError;
use crate::model::{DmnInput, DmnModel, DmnOutput};

/// Mean loss and accuracy over one pass of a loader.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EpochStats {
    pub loss: f64,
    pub accuracy: f64,
    pub batches: usize,
}

#[derive(Clone, Debug)]
pub struct TrainOutput {
    pub loss: f64,
    pub correct: usize,
    pub examples: usize,
}

#[derive(Clone, Debug)]
pub struct FitReport {
    pub epochs: usize,
    pub best_epoch: usize,
    pub best_val_loss: f64,
    pub best_val_accuracy: f64,
    pub final_learning_rate: f64,
}

pub struct DmnTrainer<B: AutodiffBackend> {
    model: DmnModel<B>,
    optimizer: OptimizerAdaptor<Adam, DmnModel<B>, B>,
    config: TrainingConfig,
    learning_rate: f64,
}

impl<B: AutodiffBackend> DmnTrainer<B> {
    pub fn new(model: DmnModel<B>, config: TrainingConfig) -> Self {
        let clipping = config
            .cap_grads
            .then_some(GradientClippingConfig::Norm(config.max_grad_val));
        let optimizer = AdamConfig::new()
            .with_grad_clipping(clipping)
            .init::<B, DmnModel<B>>();

        Self {
            model,
            optimizer,
            learning_rate: config.learning_rate,
            config,
        }
    }

    pub fn train_step(&mut self, batch: &DmnInput<B>) -> Result<TrainOutput> {
        let output = self.model.forward(batch)?;
        let loss = self.model.loss(&output, batch)?;
        let loss_value = scalar(loss.clone());
        let correct = count_correct(&output, batch)?;

        let mut grads = GradientsParams::from_grads(loss.backward(), &self.model);
        if self.config.noisy_grads {
            add_gradient_noise(&self.model, &mut grads, GRAD_NOISE_STDDEV);
        }
        self.model = self.optimizer.step(self.learning_rate, self.model.clone(), grads);

        Ok(TrainOutput {
            loss: loss_value,
            correct,
            examples: batch.batch_size(),
        })
    }

    /// One training pass; dropout keep probability comes from the model config.
    pub fn run_epoch<L: DataLoader<B>>(&mut self, loader: &mut L) -> Result<EpochStats> {
        let keep_prob = self.model.config().dropout;
        let total = loader.num_batches().unwrap_or(0);
        loader.reset();

        let mut losses = Vec::new();
        let mut correct = 0;
        let mut seen = 0;
        while let Some(mut batch) = loader.next_batch()? {
            batch.keep_prob = keep_prob;
            let step = self.train_step(&batch)?;
            losses.push(step.loss);
            correct += step.correct;
            seen += step.examples;

            if self.config.log_every > 0 && losses.len() % self.config.log_every == 0 {
                debug!(
                    "{} / {} : loss = {:.6}",
                    losses.len(),
                    total,
                    losses.iter().sum::<f64>() / losses.len() as f64
                );
            }
        }

        Ok(summarise(&losses, correct, seen))
    }

    /// Train until `max_epochs` or early stopping. `on_best` is called with the
    /// model whenever validation loss and accuracy both improve.
    pub fn fit<T, V, F>(&mut self, train: &mut T, valid: &mut V, mut on_best: F) -> Result<FitReport>
    where
        T: DataLoader<B>,
        V: DataLoader<B>,
        F: FnMut(&DmnModel<B>, usize, &EpochStats) -> Result<()>,
    {
        let mut best_val_loss = f64::INFINITY;
        let mut best_val_accuracy: Option<f64> = None;
        let mut best_epoch = 0;
        let mut epochs = 0;

        for epoch in 0..self.config.max_epochs {
            epochs = epoch + 1;
            let train_stats = self.run_epoch(train)?;
            let valid_stats = evaluate(&self.model, valid)?;
            info!(
                "Epoch {}: train loss {:.6}, train accuracy {:.4}, validation loss {:.6}, validation accuracy {:.4}",
                epoch, train_stats.loss, train_stats.accuracy, valid_stats.loss, valid_stats.accuracy
            );

            if valid_stats.loss < best_val_loss {
                best_val_loss = valid_stats.loss;
                best_epoch = epoch;
                if best_val_accuracy.map_or(true, |best| valid_stats.accuracy > best) {
                    best_val_accuracy = Some(valid_stats.accuracy);
                    on_best(&self.model, epoch, &valid_stats)?;
                }
            }

            let stale = epoch - best_epoch;
            if stale > 0 && self.config.anneal_threshold > 0 && stale % self.config.anneal_threshold == 0 {
                self.learning_rate /= self.config.anneal_by;
                info!("Annealed learning rate to {:.6}", self.learning_rate);
            }
            if stale > self.config.early_stopping {
                info!("No validation improvement for {} epochs, stopping", stale);
                break;
            }
        }

        Ok(FitReport {
            epochs,
            best_epoch,
            best_val_loss,
            best_val_accuracy: best_val_accuracy.unwrap_or(0.0),
            final_learning_rate: self.learning_rate,
        })
    }

    pub fn model(&self) -> &DmnModel<B> {
        &self.model
    }
}

/// Adds `N(0, stddev)` noise to every gradient registered in `grads`.
struct GradientNoise<'a, B: AutodiffBackend> {
    grads: &'a mut GradientsParams,
    stddev: f64,
    backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradientNoise<'_, B> {
    fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
        if let Some(grad) = self.grads.remove::<B::InnerBackend, D>(param.id) {
            let noise = Tensor::random(
                grad.shape(),
                Distribution::Normal(0.0, self.stddev),
                &grad.device(),
            );
            self.grads.register::<B::InnerBackend, D>(param.id, grad + noise);
        }
    }
}

fn add_gradient_noise<B: AutodiffBackend>(model: &DmnModel<B>, grads: &mut GradientsParams, stddev: f64) {
    let mut visitor = GradientNoise::<B> {
        grads,
        stddev,
        backend: PhantomData,
    };
    model.visit(&mut visitor);
}

/// Loss and accuracy with dropout disabled.
pub fn evaluate<B: Backend, L: DataLoader<B>>(model: &DmnModel<B>, loader: &mut L) -> Result<EpochStats> {
    loader.reset();
    let mut losses = Vec::new();
    let mut correct = 0;
    let mut seen = 0;
    while let Some(batch) = loader.next_batch()? {
        let batch = batch.for_inference();
        let output = model.forward(&batch)?;
        losses.push(scalar(model.loss(&output, &batch)?));
        correct += count_correct(&output, &batch)?;
        seen += batch.batch_size();
    }
    Ok(summarise(&losses, correct, seen))
}

/// Predicted choice index for every example, in loader order.
pub fn predict<B: Backend, L: DataLoader<B>>(model: &DmnModel<B>, loader: &mut L) -> Result<Vec<usize>> {
    loader.reset();
    let mut predictions = Vec::new();
    while let Some(batch) = loader.next_batch()? {
        let output = model.forward(&batch.for_inference())?;
        predictions.extend(output.predictions);
    }
    Ok(predictions)
}

fn count_correct<B: Backend>(output: &DmnOutput<B>, batch: &DmnInput<B>) -> Result<usize> {
    let labels: &Tensor<B, 1, Int> = batch
        .label
        .as_ref()
        .ok_or_else(|| DmnError::shape("accuracy requires answer labels"))?;
    let labels: Vec<i64> = labels.clone().into_data().iter::<i64>().collect();
    Ok(output
        .predictions
        .iter()
        .zip(labels)
        .filter(|(pred, label)| **pred as i64 == *label)
        .count())
}

fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> f64 {
    tensor
        .into_data()
        .iter::<f32>()
        .next()
        .map_or(f64::NAN, f64::from)
}

fn summarise(losses: &[f64], correct: usize, seen: usize) -> EpochStats {
    if losses.is_empty() {
        return EpochStats::default();
    }
    EpochStats {
        loss: losses.iter().sum::<f64>() / losses.len() as f64,
        accuracy: if seen == 0 { 0.0 } else { correct as f64 / seen as f64 },
        batches: losses.len(),
    }
}

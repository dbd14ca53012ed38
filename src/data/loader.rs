use anyhow::Result;
use burn::tensor::{Int, Tensor, TensorData, backend::Backend};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::corpus::{EncodedExample, PaddingSpec, pad_passage, pad_tokens};
use crate::config::CHOICE_NUM;
use crate::error::DmnError;
use crate::model::DmnInput;

/// Trait for data loading
pub trait DataLoader<B: Backend> {
    /// Get the next batch of data
    fn next_batch(&mut self) -> Result<Option<DmnInput<B>>>;

    /// Reset the data loader to the beginning
    fn reset(&mut self);

    /// Get the total number of batches (if known)
    fn num_batches(&self) -> Option<usize>;
}

/// Batches of padded multiple-choice examples.
pub struct McqDataLoader<B: Backend> {
    examples: Vec<EncodedExample>,
    padding: PaddingSpec,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    order: Vec<usize>,
    current_pos: usize,
    rng: StdRng,
    device: B::Device,
}

impl<B: Backend> McqDataLoader<B> {
    pub fn new(
        examples: Vec<EncodedExample>,
        padding: PaddingSpec,
        batch_size: usize,
        device: B::Device,
    ) -> Self {
        let order = (0..examples.len()).collect();
        Self {
            examples,
            padding,
            batch_size: batch_size.max(1),
            shuffle: false,
            drop_last: false,
            order,
            current_pos: 0,
            rng: StdRng::from_entropy(),
            device,
        }
    }

    /// Reshuffle the example order on every `reset`.
    pub fn with_shuffle(mut self, seed: Option<u64>) -> Self {
        self.shuffle = true;
        if let Some(seed) = seed {
            self.rng = StdRng::seed_from_u64(seed);
        }
        self.reset_order();
        self
    }

    /// Skip a trailing batch smaller than `batch_size`.
    pub fn with_drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    fn reset_order(&mut self) {
        self.order = (0..self.examples.len()).collect();
        if self.shuffle {
            self.order.shuffle(&mut self.rng);
        }
    }

    /// Pad `batch` into model tensors.
    pub fn collate(&self, batch: &[&EncodedExample]) -> Result<DmnInput<B>> {
        let padding = &self.padding;
        let size = batch.len();
        let mut question = Vec::with_capacity(size * padding.max_question_len);
        let mut question_len = Vec::with_capacity(size);
        let mut passage = Vec::with_capacity(size * padding.max_sentences * padding.max_words);
        let mut sentence_count = Vec::with_capacity(size);
        let mut choices = vec![Vec::with_capacity(size * padding.max_choice_len); CHOICE_NUM];
        let mut choice_len = vec![Vec::with_capacity(size); CHOICE_NUM];
        let mut labels = Vec::with_capacity(size);
        let mut dropped_counts = Vec::with_capacity(size);

        for example in batch {
            if example.choices.len() != CHOICE_NUM {
                return Err(DmnError::Corpus(format!(
                    "example has {} choices, expected {CHOICE_NUM}",
                    example.choices.len()
                ))
                .into());
            }
            question_len.push(pad_tokens(&example.question, padding.max_question_len, &mut question) as i64);
            let (count, dropped) = pad_passage(&example.sentences, padding, &mut passage);
            sentence_count.push(count as i64);
            dropped_counts.push(dropped);
            for (j, choice) in example.choices.iter().enumerate() {
                choice_len[j].push(pad_tokens(choice, padding.max_choice_len, &mut choices[j]) as i64);
            }
            labels.push(example.label);
        }

        let width = batch
            .iter()
            .map(|e| e.supporting_facts.len())
            .max()
            .unwrap_or(1)
            .max(1);
        let mut supporting = Vec::with_capacity(size * width);
        for (example, dropped) in batch.iter().zip(&dropped_counts) {
            // Indices shift when leading sentences were truncated away.
            let shifted: Vec<i64> = example
                .supporting_facts
                .iter()
                .map(|&s| (s - *dropped as i64).max(0))
                .collect();
            pad_tokens(&shifted, width, &mut supporting);
        }

        let label = if labels.iter().all(Option::is_some) {
            let values: Vec<i64> = labels.into_iter().flatten().map(|l| l as i64).collect();
            Some(self.ints_1d(values))
        } else {
            None
        };

        Ok(DmnInput {
            question: self.ints_1d(question).reshape([size, padding.max_question_len]),
            question_len: self.ints_1d(question_len),
            passage: self
                .ints_1d(passage)
                .reshape([size, padding.max_sentences, padding.max_words]),
            sentence_count: self.ints_1d(sentence_count),
            choices: self
                .ints_1d(choices.concat())
                .reshape([CHOICE_NUM, size, padding.max_choice_len]),
            choice_len: self.ints_1d(choice_len.concat()).reshape([CHOICE_NUM, size]),
            label,
            supporting_facts: Some(self.ints_1d(supporting).reshape([size, width])),
            keep_prob: 1.0,
        })
    }

    fn ints_1d(&self, values: Vec<i64>) -> Tensor<B, 1, Int> {
        let len = values.len();
        Tensor::from_data(TensorData::new(values, [len]), &self.device)
    }
}

impl<B: Backend> DataLoader<B> for McqDataLoader<B> {
    fn next_batch(&mut self) -> Result<Option<DmnInput<B>>> {
        let remaining = self.order.len().saturating_sub(self.current_pos);
        if remaining == 0 || (self.drop_last && remaining < self.batch_size) {
            return Ok(None);
        }

        let end = (self.current_pos + self.batch_size).min(self.order.len());
        let batch: Vec<&EncodedExample> = self.order[self.current_pos..end]
            .iter()
            .map(|&idx| &self.examples[idx])
            .collect();
        let input = self.collate(&batch)?;
        self.current_pos = end;
        Ok(Some(input))
    }

    fn reset(&mut self) {
        self.current_pos = 0;
        self.reset_order();
    }

    fn num_batches(&self) -> Option<usize> {
        let n = self.examples.len();
        Some(if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        })
    }
}

use anyhow::{Context, Result};
use burn::tensor::{Tensor, TensorData, backend::Backend};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::info;

use super::tokenizer::Vocabulary;
use crate::error::DmnError;

/// Pretrained word vectors restricted to one vocabulary.
#[derive(Debug, Clone)]
pub struct WordVectors {
    dim: usize,
    vectors: HashMap<String, Vec<f32>>,
}

impl WordVectors {
    /// Read a GloVe text file (`word v1 v2 ...` per line), keeping only the
    /// words `vocab` knows.
    pub fn load_glove(path: &Path, dim: usize, vocab: &Vocabulary) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open word vectors: {:?}", path))?;
        let mut vectors = HashMap::new();

        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("Failed to read {:?}", path))?;
            let mut fields = line.split(' ');
            let Some(word) = fields.next() else { continue };
            if word.is_empty() || vocab.get(word).is_none() {
                continue;
            }
            let values = fields
                .map(str::parse::<f32>)
                .collect::<std::result::Result<Vec<_>, _>>()
                .with_context(|| format!("Bad vector on line {} of {:?}", line_no + 1, path))?;
            if values.len() != dim {
                return Err(DmnError::config(format!(
                    "word vectors in {:?} have {} dimensions, model expects {dim}",
                    path,
                    values.len()
                ))
                .into());
            }
            vectors.insert(word.to_string(), values);
        }

        info!(
            "Loaded {} of {} vocabulary words from {:?}",
            vectors.len(),
            vocab.words().len(),
            path
        );
        Ok(Self { dim, vectors })
    }

    pub fn from_map(dim: usize, vectors: HashMap<String, Vec<f32>>) -> Self {
        Self { dim, vectors }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Flat `[vocab, dim]` table in vocabulary order. Words without a vector
    /// are drawn uniformly from [0, 1).
    pub fn table(&self, vocab: &Vocabulary, rng: &mut StdRng) -> Vec<f32> {
        let mut table = Vec::with_capacity(vocab.words().len() * self.dim);
        let mut missing = 0usize;
        for word in vocab.words() {
            match self.vectors.get(word) {
                Some(vector) => table.extend_from_slice(vector),
                None => {
                    missing += 1;
                    table.extend((0..self.dim).map(|_| rng.gen_range(0.0..1.0f32)));
                }
            }
        }
        if missing > 0 {
            info!("{} words had no pretrained vector", missing);
        }
        table
    }

    pub fn to_tensor<B: Backend>(&self, vocab: &Vocabulary, seed: Option<u64>, device: &B::Device) -> Tensor<B, 2> {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let rows = vocab.words().len();
        let table = self.table(vocab, &mut rng);
        Tensor::<B, 1>::from_data(TensorData::new(table, [rows * self.dim]), device)
            .reshape([rows, self.dim])
    }
}

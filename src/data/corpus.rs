use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use super::tokenizer::{Tokenizer, Vocabulary};
use crate::config::CHOICE_NUM;
use crate::error::{DmnError, DmnResult};
use crate::utils::{split_sentences, split_words};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerField {
    One(usize),
    Many(Vec<usize>),
}

impl AnswerField {
    fn first(&self) -> Option<usize> {
        match self {
            AnswerField::One(idx) => Some(*idx),
            AnswerField::Many(list) => list.first().copied(),
        }
    }
}

/// One multiple-choice question as it appears in the corpus file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McqRecord {
    pub context: String,
    pub question: String,
    pub answer_list: Vec<String>,
    #[serde(default)]
    pub answer: Option<AnswerField>,
    #[serde(default)]
    pub supporting_facts: Vec<usize>,
}

/// Word-split view of a record.
#[derive(Debug, Clone)]
pub struct RecordWords {
    pub question: Vec<String>,
    pub sentences: Vec<Vec<String>>,
    pub choices: Vec<Vec<String>>,
}

impl McqRecord {
    pub fn words(&self) -> DmnResult<RecordWords> {
        if self.answer_list.len() != CHOICE_NUM {
            return Err(DmnError::Corpus(format!(
                "expected {CHOICE_NUM} candidate answers, found {}",
                self.answer_list.len()
            )));
        }
        let sentences = split_sentences(&self.context);
        if sentences.is_empty() {
            return Err(DmnError::Corpus("context has no sentences".to_string()));
        }
        Ok(RecordWords {
            question: split_words(&self.question),
            sentences,
            choices: self.answer_list.iter().map(|c| split_words(c)).collect(),
        })
    }

    pub fn label(&self) -> DmnResult<Option<usize>> {
        if let Some(AnswerField::Many(list)) = &self.answer {
            if list.len() > 1 {
                warn!("record lists {} correct answers, using the first", list.len());
            }
        }
        match self.answer.as_ref().and_then(AnswerField::first) {
            Some(idx) if idx >= CHOICE_NUM => Err(DmnError::Corpus(format!(
                "answer index {idx} is out of range for {CHOICE_NUM} choices"
            ))),
            other => Ok(other),
        }
    }
}

/// Token indices for one record, unpadded.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedExample {
    pub question: Vec<i64>,
    pub sentences: Vec<Vec<i64>>,
    pub choices: Vec<Vec<i64>>,
    pub label: Option<usize>,
    pub supporting_facts: Vec<i64>,
}

/// Read a JSON array of records.
pub fn load_records(path: &Path) -> Result<Vec<McqRecord>> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read corpus file: {:?}", path))?;
    let records: Vec<McqRecord> = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse corpus file: {:?}", path))?;
    info!("Loaded {} records from {:?}", records.len(), path);
    Ok(records)
}

/// Vocabulary over every word of every record, in first-seen order.
pub fn build_vocabulary(records: &[McqRecord]) -> DmnResult<Vocabulary> {
    let mut vocab = Vocabulary::new();
    for record in records {
        let words = record.words()?;
        vocab.extend(&words.question);
        for sentence in &words.sentences {
            vocab.extend(sentence);
        }
        for choice in &words.choices {
            vocab.extend(choice);
        }
    }
    info!("Vocabulary holds {} words", vocab.vocab_size());
    Ok(vocab)
}

pub fn encode_records<T: Tokenizer>(records: &[McqRecord], tokenizer: &T) -> DmnResult<Vec<EncodedExample>> {
    records
        .iter()
        .map(|record| {
            let words = record.words()?;
            let supporting_facts = if record.supporting_facts.is_empty() {
                vec![0]
            } else {
                record.supporting_facts.iter().map(|&s| s as i64).collect()
            };
            Ok(EncodedExample {
                question: tokenizer.encode(&words.question),
                sentences: words.sentences.iter().map(|s| tokenizer.encode(s)).collect(),
                choices: words.choices.iter().map(|c| tokenizer.encode(c)).collect(),
                label: record.label()?,
                supporting_facts,
            })
        })
        .collect()
}

/// First `num_train` examples train, the rest validate.
pub fn split_train_valid(
    mut examples: Vec<EncodedExample>,
    num_train: usize,
) -> (Vec<EncodedExample>, Vec<EncodedExample>) {
    let valid = examples.split_off(num_train.min(examples.len()));
    (examples, valid)
}

/// Padded tensor extents shared by every batch of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaddingSpec {
    pub max_question_len: usize,
    pub max_sentences: usize,
    pub max_words: usize,
    pub max_choice_len: usize,
}

impl PaddingSpec {
    /// Maxima over `examples`, with the sentence count capped at
    /// `max_allowed_inputs`.
    pub fn from_examples(examples: &[EncodedExample], max_allowed_inputs: usize) -> Self {
        let longest = |lens: &mut dyn Iterator<Item = usize>| lens.max().unwrap_or(1).max(1);
        Self {
            max_question_len: longest(&mut examples.iter().map(|e| e.question.len())),
            max_sentences: longest(&mut examples.iter().map(|e| e.sentences.len()))
                .min(max_allowed_inputs.max(1)),
            max_words: longest(&mut examples.iter().flat_map(|e| e.sentences.iter().map(Vec::len))),
            max_choice_len: longest(
                &mut examples.iter().flat_map(|e| e.choices.iter().map(Vec::len)),
            ),
        }
    }
}

/// `tokens` cut or zero-filled to `width`; returns the kept length.
pub fn pad_tokens(tokens: &[i64], width: usize, out: &mut Vec<i64>) -> usize {
    let kept = tokens.len().min(width);
    out.extend_from_slice(&tokens[..kept]);
    out.extend(std::iter::repeat(0).take(width - kept));
    kept
}

/// Passage padded to `[max_sentences, max_words]`, keeping the most recent
/// sentences. Returns the kept sentence count and how many were dropped.
pub fn pad_passage(sentences: &[Vec<i64>], padding: &PaddingSpec, out: &mut Vec<i64>) -> (usize, usize) {
    let dropped = sentences.len().saturating_sub(padding.max_sentences);
    let kept = &sentences[dropped..];
    for sentence in kept {
        pad_tokens(sentence, padding.max_words, out);
    }
    out.extend(std::iter::repeat(0).take((padding.max_sentences - kept.len()) * padding.max_words));
    (kept.len(), dropped)
}

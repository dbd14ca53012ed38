use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// End-of-sequence token; its index doubles as padding.
pub const EOS_TOKEN: &str = "<eos>";
pub const UNK_TOKEN: &str = "<unk>";

/// Trait for tokenization
pub trait Tokenizer: Send + Sync {
    /// Encode already split words to token IDs
    fn encode(&self, words: &[String]) -> Vec<i64>;

    /// Decode token IDs to words
    fn decode(&self, tokens: &[i64]) -> Vec<String>;

    /// Get vocabulary size
    fn vocab_size(&self) -> usize;

    /// Get the ID for unknown tokens
    fn unk_id(&self) -> i64;

    /// Get the ID for padding tokens
    fn pad_id(&self) -> i64;
}

/// Word-level vocabulary. Index 0 is `<eos>`, index 1 is `<unk>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vocabulary {
    word_to_id: HashMap<String, i64>,
    id_to_word: Vec<String>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::new()
    }
}

impl Vocabulary {
    pub fn new() -> Self {
        let mut vocab = Self {
            word_to_id: HashMap::new(),
            id_to_word: Vec::new(),
        };
        vocab.insert(EOS_TOKEN);
        vocab.insert(UNK_TOKEN);
        vocab
    }

    /// Index of `word`, adding it if unseen.
    pub fn insert(&mut self, word: &str) -> i64 {
        if let Some(&id) = self.word_to_id.get(word) {
            return id;
        }
        let id = self.id_to_word.len() as i64;
        self.word_to_id.insert(word.to_string(), id);
        self.id_to_word.push(word.to_string());
        id
    }

    pub fn extend<'a, I: IntoIterator<Item = &'a String>>(&mut self, words: I) {
        for word in words {
            self.insert(word);
        }
    }

    pub fn get(&self, word: &str) -> Option<i64> {
        self.word_to_id.get(word).copied()
    }

    /// Words in index order.
    pub fn words(&self) -> &[String] {
        &self.id_to_word
    }

    /// Save vocabulary to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
        let json = serde_json::to_string_pretty(self)
            .with_context(|| "Failed to serialize vocabulary")?;

        fs::write(path, json)
            .with_context(|| format!("Failed to write vocabulary to {:?}", path))?;

        Ok(())
    }

    /// Load vocabulary from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read vocabulary from {:?}", path))?;

        let vocab: Self = serde_json::from_str(&json)
            .with_context(|| "Failed to deserialize vocabulary")?;

        if vocab.get(EOS_TOKEN) != Some(0) {
            anyhow::bail!("Vocabulary {:?} does not reserve index 0 for {}", path, EOS_TOKEN);
        }

        Ok(vocab)
    }
}

impl Tokenizer for Vocabulary {
    fn encode(&self, words: &[String]) -> Vec<i64> {
        words
            .iter()
            .map(|w| self.get(w).unwrap_or_else(|| self.unk_id()))
            .collect()
    }

    fn decode(&self, tokens: &[i64]) -> Vec<String> {
        tokens
            .iter()
            .filter_map(|&id| self.id_to_word.get(id as usize).cloned())
            .collect()
    }

    fn vocab_size(&self) -> usize {
        self.id_to_word.len()
    }

    fn unk_id(&self) -> i64 {
        1
    }

    fn pad_id(&self) -> i64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn words(text: &str) -> Vec<String> {
        text.split(' ').map(str::to_string).collect()
    }

    #[test]
    fn test_reserved_indices() {
        let vocab = Vocabulary::new();
        assert_eq!(vocab.get(EOS_TOKEN), Some(0));
        assert_eq!(vocab.pad_id(), 0);
        assert_eq!(vocab.get(UNK_TOKEN), Some(1));
        assert_eq!(vocab.vocab_size(), 2);
    }

    #[test]
    fn test_encode_decode() {
        let mut vocab = Vocabulary::new();
        let sentence = words("the cat sat on the mat");
        vocab.extend(&sentence);

        let encoded = vocab.encode(&sentence);
        assert_eq!(encoded[0], encoded[4]);
        assert_eq!(vocab.decode(&encoded), sentence);
        assert_eq!(vocab.vocab_size(), 7);
    }

    #[test]
    fn test_unknown_words() {
        let mut vocab = Vocabulary::new();
        vocab.extend(&words("abc"));
        let encoded = vocab.encode(&words("xyz abc"));
        assert_eq!(encoded, vec![vocab.unk_id(), 2]);
    }

    #[test]
    fn test_save_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vocab.json");
        let mut vocab = Vocabulary::new();
        vocab.extend(&words("where is the milk"));
        vocab.save(&path).unwrap();

        let loaded = Vocabulary::load(&path).unwrap();
        assert_eq!(loaded.words(), vocab.words());
        assert_eq!(loaded.get("milk"), vocab.get("milk"));
    }
}

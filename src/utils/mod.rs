pub mod text_processor;

pub use text_processor::{normalize, split_sentences, split_words};

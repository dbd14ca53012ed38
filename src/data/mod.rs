mod corpus;
mod embeddings;
mod loader;
mod tokenizer;

pub use corpus::{
    AnswerField, EncodedExample, McqRecord, PaddingSpec, RecordWords, build_vocabulary,
    encode_records, load_records, pad_passage, pad_tokens, split_train_valid,
};
pub use embeddings::WordVectors;
pub use loader::{DataLoader, McqDataLoader};
pub use tokenizer::{EOS_TOKEN, Tokenizer, UNK_TOKEN, Vocabulary};

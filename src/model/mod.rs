pub mod answer;
pub mod attention;
pub mod dmn;
pub mod encoder;
pub mod episodic;

pub use answer::{AnswerModule, cosine_scores, predictions};
pub use attention::AttentionFunction;
pub use dmn::{DmnInput, DmnModel, DmnOutput};
pub use encoder::{GruCell, InputFusion, SequenceEncoder, position_encoding};
pub use episodic::{AttentionGru, EpisodicMemory, HopOutput, MemoryOutput};

use burn::nn::DropoutConfig;
use burn::tensor::{Int, Tensor, backend::Backend};

use crate::error::{DmnError, DmnResult};

/// Dropout driven by a keep probability; 1.0 leaves the tensor untouched.
pub(crate) fn dropout<B: Backend, const D: usize>(tensor: Tensor<B, D>, keep_prob: f64) -> Tensor<B, D> {
    if keep_prob >= 1.0 {
        return tensor;
    }
    DropoutConfig::new(1.0 - keep_prob).init().forward(tensor)
}

/// Pull a `[batch]` index or length tensor to the host and check every entry
/// lies in `min..=max`.
pub(crate) fn host_lengths<B: Backend>(
    lengths: &Tensor<B, 1, Int>,
    min: usize,
    max: usize,
    what: &str,
) -> DmnResult<Vec<usize>> {
    let values: Vec<i64> = lengths.clone().into_data().iter::<i64>().collect();
    values
        .into_iter()
        .enumerate()
        .map(|(idx, len)| {
            if len < min as i64 || len > max as i64 {
                Err(DmnError::InvalidLength(format!(
                    "{what} {len} for example {idx} is outside {min}..={max}"
                )))
            } else {
                Ok(len as usize)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests;

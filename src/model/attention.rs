use burn::module::Module;
use burn::nn::Linear;
use burn::tensor::{Int, Tensor, activation, backend::Backend};

use crate::config::NUM_ATTENTION_FEATURES;
use super::encoder::xavier_linear;

/// Score given to padded fact slots before normalisation.
const MASKED_SCORE: f32 = -1.0e9;

/// Two-layer scorer over `[f*q, f*m, |f-q|, |f-m|]`.
#[derive(Module, Debug)]
pub struct AttentionFunction<B: Backend> {
    pub(crate) hidden: Linear<B>,
    pub(crate) score: Linear<B>,
}

impl<B: Backend> AttentionFunction<B> {
    pub fn new(hidden_size: usize, device: &B::Device) -> Self {
        Self {
            hidden: xavier_linear(hidden_size * NUM_ATTENTION_FEATURES, hidden_size, true, device),
            score: xavier_linear(hidden_size, 1, true, device),
        }
    }

    /// Raw scores `[batch, facts]` for every fact against `question` and
    /// `memory` (both `[batch, hidden]`).
    pub fn forward(
        &self,
        question: Tensor<B, 2>,
        memory: Tensor<B, 2>,
        facts: Tensor<B, 3>,
    ) -> Tensor<B, 2> {
        let [batch, slots, hidden] = facts.dims();
        let question = question.unsqueeze_dim::<3>(1).repeat_dim(1, slots);
        let memory = memory.unsqueeze_dim::<3>(1).repeat_dim(1, slots);

        let features = Tensor::cat(
            vec![
                facts.clone() * question.clone(),
                facts.clone() * memory.clone(),
                (facts.clone() - question).abs(),
                (facts - memory).abs(),
            ],
            2,
        )
        .reshape([batch * slots, hidden * NUM_ATTENTION_FEATURES]);

        let hidden_act = activation::tanh(self.hidden.forward(features));
        self.score.forward(hidden_act).reshape([batch, slots])
    }

    pub(crate) fn weights(&self) -> Vec<Tensor<B, 2>> {
        vec![self.hidden.weight.val(), self.score.weight.val()]
    }
}

/// Softmax over each example's real facts; padded slots get a gate of 0.
pub fn normalize_gates<B: Backend>(scores: Tensor<B, 2>, fact_counts: &Tensor<B, 1, Int>) -> Tensor<B, 2> {
    let [batch, slots] = scores.dims();
    let device = scores.device();
    let positions = Tensor::<B, 1, Int>::arange(0..slots as i64, &device)
        .reshape([1, slots])
        .repeat_dim(0, batch);
    let counts = fact_counts.clone().reshape([batch, 1]).repeat_dim(1, slots);
    let padded = positions.greater_equal(counts);

    activation::softmax(scores.mask_fill(padded, MASKED_SCORE), 1)
}

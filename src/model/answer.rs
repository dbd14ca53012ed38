use burn::module::Module;
use burn::nn::Linear;
use burn::tensor::{ElementConversion, Tensor, backend::Backend};

use crate::config::ZeroNormPolicy;
use crate::error::{DmnError, DmnResult};
use super::dropout;
use super::encoder::xavier_linear;

/// Projects final memory and question into a story vector and ranks the
/// candidate answers against it.
#[derive(Module, Debug)]
pub struct AnswerModule<B: Backend> {
    pub(crate) story: Linear<B>,
}

impl<B: Backend> AnswerModule<B> {
    pub fn new(hidden_size: usize, embed_size: usize, device: &B::Device) -> Self {
        Self {
            story: xavier_linear(hidden_size * 2, embed_size, true, device),
        }
    }

    pub fn story(&self, memory: Tensor<B, 2>, question: Tensor<B, 2>, keep_prob: f64) -> Tensor<B, 2> {
        self.story
            .forward(Tensor::cat(vec![dropout(memory, keep_prob), question], 1))
    }

    /// `choices` holds one `[batch, embed]` tensor per candidate. Returns
    /// `[batch, candidates]` cosine scores.
    pub fn forward(
        &self,
        memory: Tensor<B, 2>,
        question: Tensor<B, 2>,
        choices: Vec<Tensor<B, 2>>,
        keep_prob: f64,
        policy: ZeroNormPolicy,
    ) -> DmnResult<Tensor<B, 2>> {
        let story = self.story(memory, question, keep_prob);
        let choices = Tensor::stack::<3>(choices, 1);
        cosine_scores(story, choices, policy)
    }

    pub(crate) fn weights(&self) -> Vec<Tensor<B, 2>> {
        vec![self.story.weight.val()]
    }
}

/// Cosine similarity of each story `[batch, dim]` with each of its choices
/// `[batch, candidates, dim]`.
pub fn cosine_scores<B: Backend>(
    story: Tensor<B, 2>,
    choices: Tensor<B, 3>,
    policy: ZeroNormPolicy,
) -> DmnResult<Tensor<B, 2>> {
    let [stories, dim] = story.dims();
    let [groups, candidates, choice_dim] = choices.dims();
    if stories != groups {
        return Err(DmnError::shape(format!(
            "{stories} story vectors but {groups} choice groups"
        )));
    }
    if dim != choice_dim {
        return Err(DmnError::shape(format!(
            "story dimension {dim} differs from choice dimension {choice_dim}"
        )));
    }

    let story = story.unsqueeze_dim::<3>(1);
    let dot = (story.clone() * choices.clone())
        .sum_dim(2)
        .reshape([stories, candidates]);
    let story_sq = (story.clone() * story).sum_dim(2).reshape([stories, 1]);
    let choice_sq = (choices.clone() * choices)
        .sum_dim(2)
        .reshape([stories, candidates]);

    let norm_sq = story_sq * choice_sq;
    let degenerate = norm_sq.clone().lower_equal_elem(0.0);

    if policy == ZeroNormPolicy::Reject {
        let count = degenerate.clone().int().sum().into_scalar().elem::<i64>();
        if count > 0 {
            return Err(DmnError::NumericDegenerateInput(format!(
                "{count} story/choice pairs have a zero norm"
            )));
        }
    }

    // Degenerate pairs divide by 1, then score 0.
    let denom = norm_sq.mask_fill(degenerate.clone(), 1.0).sqrt();
    Ok((dot / denom).mask_fill(degenerate, 0.0).clamp(-1.0, 1.0))
}

/// Index of the highest score per row; ties resolve to the lowest index.
pub fn predictions<B: Backend>(scores: &Tensor<B, 2>) -> Vec<usize> {
    let [_, candidates] = scores.dims();
    let values: Vec<f32> = scores.clone().into_data().iter::<f32>().collect();
    values
        .chunks(candidates.max(1))
        .map(|row| {
            let mut best = 0;
            for (idx, &value) in row.iter().enumerate() {
                if value > row[best] {
                    best = idx;
                }
            }
            best
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn tensor2(data: Vec<f32>, shape: [usize; 2]) -> Tensor<TestBackend, 2> {
        Tensor::<TestBackend, 1>::from_data(TensorData::new(data, [shape[0] * shape[1]]), &Default::default())
            .reshape(shape)
    }

    fn tensor3(data: Vec<f32>, shape: [usize; 3]) -> Tensor<TestBackend, 3> {
        Tensor::<TestBackend, 1>::from_data(
            TensorData::new(data, [shape[0] * shape[1] * shape[2]]),
            &Default::default(),
        )
        .reshape(shape)
    }

    #[test]
    fn cosine_matches_hand_values() {
        let story = tensor2(vec![1.0, 0.0], [1, 2]);
        let choices = tensor3(vec![1.0, 0.0, 0.0, 3.0, -2.0, 0.0, 1.0, 1.0], [1, 4, 2]);

        let scores = cosine_scores(story, choices, ZeroNormPolicy::Fallback)
            .unwrap()
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        let expected = [1.0, 0.0, -1.0, std::f32::consts::FRAC_1_SQRT_2];
        for (got, want) in scores.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "{got} vs {want}");
        }
    }

    #[test]
    fn zero_norm_falls_back_to_zero() {
        let story = tensor2(vec![0.0, 0.0, 1.0, 1.0], [2, 2]);
        let choices = tensor3(
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 0.0, 0.0, 1.0, 1.0, 2.0, 2.0, -1.0, -1.0],
            [2, 4, 2],
        );

        let scores = cosine_scores(story, choices, ZeroNormPolicy::Fallback)
            .unwrap()
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert!(scores.iter().all(|s| s.is_finite()));
        assert!(scores[..4].iter().all(|&s| s == 0.0));
        assert_eq!(scores[4], 0.0);
        assert!((scores[5] - 1.0).abs() < 1e-6);
        assert!((scores[7] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_norm_is_rejected_under_reject_policy() {
        let story = tensor2(vec![0.0, 0.0], [1, 2]);
        let choices = tensor3(vec![1.0; 8], [1, 4, 2]);
        let result = cosine_scores(story, choices, ZeroNormPolicy::Reject);
        assert!(matches!(result, Err(DmnError::NumericDegenerateInput(_))));
    }

    #[test]
    fn story_and_choice_batches_must_agree() {
        let story = tensor2(vec![1.0; 4], [2, 2]);
        let choices = tensor3(vec![1.0; 24], [3, 4, 2]);
        let result = cosine_scores(story, choices, ZeroNormPolicy::Fallback);
        assert!(matches!(result, Err(DmnError::ShapeMismatch(_))));
    }

    #[test]
    fn identical_choices_tie_to_lowest_index() {
        let story = tensor2(vec![0.3, -0.7, 0.2], [1, 3]);
        let choices = tensor3([0.5f32, 0.1, -0.4].repeat(4), [1, 4, 3]);

        let scores = cosine_scores(story, choices, ZeroNormPolicy::Fallback).unwrap();
        let values = scores.clone().into_data().to_vec::<f32>().unwrap();
        for value in &values[1..] {
            assert!((value - values[0]).abs() < 1e-6);
        }
        assert_eq!(predictions(&scores), vec![0]);
    }

    #[test]
    fn predictions_take_the_first_maximum() {
        let scores = tensor2(vec![0.1, 0.9, 0.9, 0.2, -0.5, -0.5, -0.7, -0.5], [2, 4]);
        assert_eq!(predictions(&scores), vec![1, 0]);
    }
}

use burn::module::Module;
use burn::nn::{Initializer, Linear, LinearConfig};
use burn::tensor::{Int, Tensor, TensorData, activation, backend::Backend};

use super::dropout;

pub(crate) fn xavier_linear<B: Backend>(
    d_input: usize,
    d_output: usize,
    bias: bool,
    device: &B::Device,
) -> Linear<B> {
    LinearConfig::new(d_input, d_output)
        .with_bias(bias)
        .with_initializer(Initializer::XavierUniform { gain: 1.0 })
        .init(device)
}

/// `[batch, 1]` float mask, 1.0 where `step < length`.
pub(crate) fn step_mask<B: Backend>(lengths: &Tensor<B, 1, Int>, step: usize) -> Tensor<B, 2> {
    let batch = lengths.dims()[0];
    lengths
        .clone()
        .greater_elem(step as i64)
        .float()
        .reshape([batch, 1])
}

/// Row `step` of a `[batch, time, dim]` tensor as `[batch, dim]`.
pub(crate) fn time_step<B: Backend>(sequence: &Tensor<B, 3>, step: usize) -> Tensor<B, 2> {
    let [batch, _, dim] = sequence.dims();
    sequence
        .clone()
        .slice([0..batch, step..step + 1, 0..dim])
        .reshape([batch, dim])
}

/// Keep the new state where `mask` is 1, the previous one where it is 0.
pub(crate) fn masked_update<B: Backend>(
    mask: Tensor<B, 2>,
    next: Tensor<B, 2>,
    prev: Tensor<B, 2>,
) -> Tensor<B, 2> {
    next * mask.clone() + prev * mask.neg().add_scalar(1.0)
}

/// Gated recurrent cell with learned reset and update gates.
#[derive(Module, Debug)]
pub struct GruCell<B: Backend> {
    reset_input: Linear<B>,
    reset_hidden: Linear<B>,
    update_input: Linear<B>,
    update_hidden: Linear<B>,
    candidate_input: Linear<B>,
    candidate_hidden: Linear<B>,
    hidden_size: usize,
}

impl<B: Backend> GruCell<B> {
    pub fn new(input_size: usize, hidden_size: usize, device: &B::Device) -> Self {
        Self {
            reset_input: xavier_linear(input_size, hidden_size, true, device),
            reset_hidden: xavier_linear(hidden_size, hidden_size, false, device),
            update_input: xavier_linear(input_size, hidden_size, true, device),
            update_hidden: xavier_linear(hidden_size, hidden_size, false, device),
            candidate_input: xavier_linear(input_size, hidden_size, true, device),
            candidate_hidden: xavier_linear(hidden_size, hidden_size, false, device),
            hidden_size,
        }
    }

    pub fn step(&self, input: Tensor<B, 2>, hidden: Tensor<B, 2>) -> Tensor<B, 2> {
        let reset = activation::sigmoid(
            self.reset_input.forward(input.clone()) + self.reset_hidden.forward(hidden.clone()),
        );
        let update = activation::sigmoid(
            self.update_input.forward(input.clone()) + self.update_hidden.forward(hidden.clone()),
        );
        let candidate = activation::tanh(
            self.candidate_input.forward(input)
                + self.candidate_hidden.forward(reset * hidden.clone()),
        );
        hidden * update.clone() + candidate * update.neg().add_scalar(1.0)
    }

    pub fn zero_state(&self, batch: usize, device: &B::Device) -> Tensor<B, 2> {
        Tensor::zeros([batch, self.hidden_size], device)
    }

    pub(crate) fn weights(&self) -> Vec<Tensor<B, 2>> {
        [
            &self.reset_input,
            &self.reset_hidden,
            &self.update_input,
            &self.update_hidden,
            &self.candidate_input,
            &self.candidate_hidden,
        ]
        .iter()
        .map(|linear| linear.weight.val())
        .collect()
    }
}

/// Length-aware recurrent encoder used for questions and for every choice.
#[derive(Module, Debug)]
pub struct SequenceEncoder<B: Backend> {
    cell: GruCell<B>,
    drop_grus: bool,
}

impl<B: Backend> SequenceEncoder<B> {
    pub fn new(embed_size: usize, hidden_size: usize, drop_grus: bool, device: &B::Device) -> Self {
        Self {
            cell: GruCell::new(embed_size, hidden_size, device),
            drop_grus,
        }
    }

    /// `embedded`: `[batch, max_len, embed]`, `lengths`: `[batch]`.
    /// Returns the hidden state after each example's last real token.
    ///
    /// With `drop_grus`, step inputs and the returned state go through dropout;
    /// the carried recurrent state does not.
    pub fn forward(
        &self,
        embedded: Tensor<B, 3>,
        lengths: &Tensor<B, 1, Int>,
        keep_prob: f64,
    ) -> Tensor<B, 2> {
        let [batch, max_len, _] = embedded.dims();
        let device = embedded.device();
        let keep_prob = if self.drop_grus { keep_prob } else { 1.0 };

        let mut hidden = self.cell.zero_state(batch, &device);
        for t in 0..max_len {
            let input = dropout(time_step(&embedded, t), keep_prob);
            let next = self.cell.step(input, hidden.clone());
            hidden = masked_update(step_mask(lengths, t), next, hidden);
        }
        dropout(hidden, keep_prob)
    }

    pub(crate) fn weights(&self) -> Vec<Tensor<B, 2>> {
        self.cell.weights()
    }
}

/// Positional weights of shape `[sentence_size, embedding_size]`, row-major.
///
/// Depends only on the padded sentence width, so short sentences are weighted
/// as if they filled the whole width.
pub fn position_encoding(sentence_size: usize, embedding_size: usize) -> Vec<f32> {
    let half_words = (sentence_size / 2) as i64;
    let half_dims = (embedding_size / 2) as i64;
    let scale = 4.0 / embedding_size as f32 / sentence_size as f32;

    let mut encoding = Vec::with_capacity(sentence_size * embedding_size);
    for word in 1..=sentence_size as i64 {
        for dim in 1..=embedding_size as i64 {
            let centred = (dim - half_dims) * (word - half_words);
            encoding.push(1.0 + scale * centred as f32);
        }
    }
    encoding
}

/// Sentence encoder: positional bag of words followed by a bidirectional
/// pass over sentences that reuses one cell in both directions.
#[derive(Module, Debug)]
pub struct InputFusion<B: Backend> {
    cell: GruCell<B>,
    position_encoding: bool,
    drop_grus: bool,
}

impl<B: Backend> InputFusion<B> {
    pub fn new(
        embed_size: usize,
        hidden_size: usize,
        position_encoding: bool,
        drop_grus: bool,
        device: &B::Device,
    ) -> Self {
        Self {
            cell: GruCell::new(embed_size, hidden_size, device),
            position_encoding,
            drop_grus,
        }
    }

    /// Collapse `[batch, sentences, words, embed]` word vectors into
    /// `[batch, sentences, embed]` sentence vectors.
    pub fn sentence_vectors(&self, words: Tensor<B, 4>) -> Tensor<B, 3> {
        let [batch, sentences, width, embed] = words.dims();
        let weighted = if self.position_encoding {
            let encoding = Tensor::<B, 1>::from_data(
                TensorData::new(position_encoding(width, embed), [width * embed]),
                &words.device(),
            )
            .reshape([1, 1, width, embed]);
            words * encoding
        } else {
            words
        };
        weighted.sum_dim(2).reshape([batch, sentences, embed])
    }

    /// Facts for every sentence slot; slots at or beyond `sentence_counts`
    /// are zero.
    pub fn forward(
        &self,
        words: Tensor<B, 4>,
        sentence_counts: &Tensor<B, 1, Int>,
        keep_prob: f64,
    ) -> Tensor<B, 3> {
        let sentences = self.sentence_vectors(words);
        let [batch, slots, _] = sentences.dims();
        let device = sentences.device();

        let masks: Vec<Tensor<B, 2>> = (0..slots).map(|t| step_mask(sentence_counts, t)).collect();
        let step_keep = if self.drop_grus { keep_prob } else { 1.0 };

        let mut forward_out = Vec::with_capacity(slots);
        let mut hidden = self.cell.zero_state(batch, &device);
        for t in 0..slots {
            let input = dropout(time_step(&sentences, t), step_keep);
            let next = self.cell.step(input, hidden.clone());
            hidden = masked_update(masks[t].clone(), next, hidden);
            forward_out.push(dropout(hidden.clone(), step_keep) * masks[t].clone());
        }

        // Padded slots hold the zero state, so the backward pass starts fresh
        // at each example's last real sentence.
        let mut backward_out = vec![None; slots];
        let mut hidden = self.cell.zero_state(batch, &device);
        for t in (0..slots).rev() {
            let input = dropout(time_step(&sentences, t), step_keep);
            let next = self.cell.step(input, hidden.clone());
            hidden = masked_update(masks[t].clone(), next, hidden);
            backward_out[t] = Some(dropout(hidden.clone(), step_keep) * masks[t].clone());
        }

        let facts: Vec<Tensor<B, 2>> = forward_out
            .into_iter()
            .zip(backward_out)
            .map(|(fwd, bwd)| match bwd {
                Some(bwd) => fwd + bwd,
                None => fwd,
            })
            .collect();

        dropout(Tensor::stack::<3>(facts, 1), keep_prob)
    }

    pub(crate) fn weights(&self) -> Vec<Tensor<B, 2>> {
        self.cell.weights()
    }
}

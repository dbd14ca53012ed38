use burn::module::Module;
use burn::nn::Linear;
use burn::tensor::{Int, Tensor, activation, backend::Backend};
use tracing::debug;

use super::attention::{AttentionFunction, normalize_gates};
use super::encoder::{time_step, xavier_linear};
use super::host_lengths;
use crate::error::{DmnError, DmnResult};

/// Recurrent cell whose update gate is supplied from outside by attention.
#[derive(Module, Debug)]
pub struct AttentionGru<B: Backend> {
    pub(crate) reset_input: Linear<B>,
    pub(crate) reset_hidden: Linear<B>,
    pub(crate) candidate_input: Linear<B>,
    pub(crate) candidate_hidden: Linear<B>,
    hidden_size: usize,
}

impl<B: Backend> AttentionGru<B> {
    pub fn new(input_size: usize, hidden_size: usize, device: &B::Device) -> Self {
        Self {
            reset_input: xavier_linear(input_size, hidden_size, true, device),
            reset_hidden: xavier_linear(hidden_size, hidden_size, false, device),
            candidate_input: xavier_linear(input_size, hidden_size, true, device),
            candidate_hidden: xavier_linear(hidden_size, hidden_size, false, device),
            hidden_size,
        }
    }

    /// `gate` is `[batch, 1]`.
    pub fn step(&self, input: Tensor<B, 2>, prev_hidden: Tensor<B, 2>, gate: Tensor<B, 2>) -> Tensor<B, 2> {
        let reset = activation::sigmoid(
            self.reset_input.forward(input.clone()) + self.reset_hidden.forward(prev_hidden.clone()),
        );
        let candidate = activation::tanh(
            self.candidate_input.forward(input) + reset * self.candidate_hidden.forward(prev_hidden.clone()),
        );
        candidate * gate.clone() + prev_hidden * gate.neg().add_scalar(1.0)
    }

    /// Fold over every fact slot from a zero state; returns the hidden state
    /// after each slot as `[batch, slots, hidden]`.
    pub fn fold(&self, facts: &Tensor<B, 3>, gates: &Tensor<B, 2>) -> Tensor<B, 3> {
        let [batch, slots, _] = facts.dims();
        let mut hidden = Tensor::zeros([batch, self.hidden_size], &facts.device());
        let mut states = Vec::with_capacity(slots);
        for t in 0..slots {
            let gate = gates.clone().slice([0..batch, t..t + 1]);
            hidden = self.step(time_step(facts, t), hidden, gate);
            states.push(hidden.clone());
        }
        Tensor::stack::<3>(states, 1)
    }

    pub(crate) fn weights(&self) -> Vec<Tensor<B, 2>> {
        vec![
            self.reset_input.weight.val(),
            self.reset_hidden.weight.val(),
            self.candidate_input.weight.val(),
            self.candidate_hidden.weight.val(),
        ]
    }
}

/// Hidden state at `counts[b] - 1` for every example `b`. Every count must
/// lie in `1..=slots` and there must be one per example.
pub(crate) fn last_relevant<B: Backend>(states: Tensor<B, 3>, counts: &[usize]) -> DmnResult<Tensor<B, 2>> {
    let [batch, slots, hidden] = states.dims();
    if counts.len() != batch {
        return Err(DmnError::shape(format!(
            "{} fact counts for a batch of {batch}",
            counts.len()
        )));
    }
    let rows = counts
        .iter()
        .enumerate()
        .map(|(b, &count)| {
            if count == 0 || count > slots {
                return Err(DmnError::InvalidLength(format!(
                    "fact count {count} for example {b} is outside 1..={slots}"
                )));
            }
            let t = count - 1;
            Ok(states
                .clone()
                .slice([b..b + 1, t..t + 1, 0..hidden])
                .reshape([1, hidden]))
        })
        .collect::<DmnResult<Vec<_>>>()?;
    Ok(Tensor::cat(rows, 0))
}

#[derive(Clone, Debug)]
pub struct HopOutput<B: Backend> {
    pub raw_scores: Tensor<B, 2>,
    pub gates: Tensor<B, 2>,
    pub episode: Tensor<B, 2>,
    pub memory: Tensor<B, 2>,
}

#[derive(Clone, Debug)]
pub struct MemoryOutput<B: Backend> {
    pub memory: Tensor<B, 2>,
    /// Pre-softmax attention scores, one `[batch, facts]` tensor per hop.
    pub attentions: Vec<Tensor<B, 2>>,
    pub gates: Vec<Tensor<B, 2>>,
}

/// Multi-hop episodic memory. Attention and the attention GRU are shared by
/// every hop; each hop has its own memory update layer.
#[derive(Module, Debug)]
pub struct EpisodicMemory<B: Backend> {
    pub(crate) attention: AttentionFunction<B>,
    pub(crate) gru: AttentionGru<B>,
    pub(crate) updates: Vec<Linear<B>>,
}

impl<B: Backend> EpisodicMemory<B> {
    pub fn new(hidden_size: usize, num_hops: usize, device: &B::Device) -> Self {
        let updates = (0..num_hops)
            .map(|_| xavier_linear(hidden_size * 3, hidden_size, true, device))
            .collect();
        Self {
            attention: AttentionFunction::new(hidden_size, device),
            gru: AttentionGru::new(hidden_size, hidden_size, device),
            updates,
        }
    }

    pub fn num_hops(&self) -> usize {
        self.updates.len()
    }

    /// One hop: attend, fold, extract the episode, update memory.
    /// `fact_counts` must lie in `1..=slots`, else `InvalidLength`.
    pub fn hop(
        &self,
        hop: usize,
        memory: Tensor<B, 2>,
        question: Tensor<B, 2>,
        facts: &Tensor<B, 3>,
        fact_counts: &Tensor<B, 1, Int>,
    ) -> DmnResult<HopOutput<B>> {
        let [_, slots, _] = facts.dims();
        let host_counts = host_lengths(fact_counts, 1, slots, "sentence count")?;
        let raw_scores = self
            .attention
            .forward(question.clone(), memory.clone(), facts.clone());
        let gates = normalize_gates(raw_scores.clone(), fact_counts);

        let states = self.gru.fold(facts, &gates);
        let episode = last_relevant(states, &host_counts)?;

        let memory = activation::relu(
            self.updates[hop].forward(Tensor::cat(vec![memory, episode.clone(), question], 1)),
        );

        Ok(HopOutput {
            raw_scores,
            gates,
            episode,
            memory,
        })
    }

    pub fn forward(
        &self,
        question: Tensor<B, 2>,
        facts: &Tensor<B, 3>,
        fact_counts: &Tensor<B, 1, Int>,
    ) -> DmnResult<MemoryOutput<B>> {
        let mut memory = question.clone();
        let mut attentions = Vec::with_capacity(self.num_hops());
        let mut gates = Vec::with_capacity(self.num_hops());

        for hop in 0..self.num_hops() {
            debug!("generating episode {}", hop);
            let out = self.hop(hop, memory, question.clone(), facts, fact_counts)?;
            attentions.push(out.raw_scores);
            gates.push(out.gates);
            memory = out.memory;
        }

        Ok(MemoryOutput {
            memory,
            attentions,
            gates,
        })
    }

    pub(crate) fn weights(&self) -> Vec<Tensor<B, 2>> {
        let mut weights = self.attention.weights();
        weights.extend(self.gru.weights());
        weights.extend(self.updates.iter().map(|linear| linear.weight.val()));
        weights
    }
}

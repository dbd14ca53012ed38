use burn::module::Param;
use burn::nn::Linear;
use burn::tensor::{Int, Tensor, TensorData};
use burn_ndarray::NdArray;

use super::*;
use super::dmn::cross_entropy_sum;
use crate::config::{DmnConfig, ZeroNormPolicy};
use crate::error::DmnError;

type TestBackend = NdArray<f32>;

const DIM: usize = 4;
const SLOTS: usize = 3;

fn device() -> <TestBackend as burn::tensor::backend::Backend>::Device {
    Default::default()
}

/// Small deterministic values in [-0.5, 0.5).
fn pattern(len: usize, seed: usize) -> Vec<f32> {
    (0..len)
        .map(|k| ((k * 7 + seed * 13) % 17) as f32 / 17.0 - 0.5)
        .collect()
}

fn float_tensor<const D: usize>(data: Vec<f32>, shape: [usize; D]) -> Tensor<TestBackend, D> {
    let len = data.len();
    Tensor::<TestBackend, 1>::from_data(TensorData::new(data, [len]), &device()).reshape(shape)
}

fn int_tensor<const D: usize>(data: Vec<i64>, shape: [usize; D]) -> Tensor<TestBackend, D, Int> {
    let len = data.len();
    Tensor::<TestBackend, 1, Int>::from_data(TensorData::new(data, [len]), &device()).reshape(shape)
}

fn assign(linear: &mut Linear<TestBackend>, weight: &[f32], bias: Option<&[f32]>) {
    let [d_in, d_out] = linear.weight.dims();
    linear.weight = Param::from_tensor(float_tensor(weight.to_vec(), [d_in, d_out]));
    linear.bias = bias.map(|b| Param::from_tensor(float_tensor(b.to_vec(), [d_out])));
}

fn to_vec<const D: usize>(tensor: Tensor<TestBackend, D>) -> Vec<f32> {
    tensor.into_data().to_vec::<f32>().unwrap()
}

/// y = x W + b with W stored `[input, output]` row-major.
fn dense(x: &[f32], w: &[f32], b: Option<&[f32]>, out: usize) -> Vec<f32> {
    (0..out)
        .map(|j| {
            let acc: f32 = x.iter().enumerate().map(|(i, xi)| xi * w[i * out + j]).sum();
            acc + b.map_or(0.0, |b| b[j])
        })
        .collect()
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

struct Weights {
    att_w1: Vec<f32>,
    att_b1: Vec<f32>,
    att_w2: Vec<f32>,
    att_b2: Vec<f32>,
    wr: Vec<f32>,
    br: Vec<f32>,
    ur: Vec<f32>,
    w: Vec<f32>,
    bh: Vec<f32>,
    u: Vec<f32>,
    wt: Vec<f32>,
    bt: Vec<f32>,
    ws: Vec<f32>,
    bs: Vec<f32>,
}

impl Weights {
    fn new() -> Self {
        Self {
            att_w1: pattern(4 * DIM * DIM, 1),
            att_b1: pattern(DIM, 2),
            att_w2: pattern(DIM, 3),
            att_b2: pattern(1, 4),
            wr: pattern(DIM * DIM, 5),
            br: pattern(DIM, 6),
            ur: pattern(DIM * DIM, 7),
            w: pattern(DIM * DIM, 8),
            bh: pattern(DIM, 9),
            u: pattern(DIM * DIM, 10),
            wt: pattern(3 * DIM * DIM, 11),
            bt: pattern(DIM, 12),
            ws: pattern(2 * DIM * DIM, 13),
            bs: pattern(DIM, 14),
        }
    }

    fn install(&self, memory: &mut EpisodicMemory<TestBackend>, answer: &mut AnswerModule<TestBackend>) {
        assign(&mut memory.attention.hidden, &self.att_w1, Some(&self.att_b1));
        assign(&mut memory.attention.score, &self.att_w2, Some(&self.att_b2));
        assign(&mut memory.gru.reset_input, &self.wr, Some(&self.br));
        assign(&mut memory.gru.reset_hidden, &self.ur, None);
        assign(&mut memory.gru.candidate_input, &self.w, Some(&self.bh));
        assign(&mut memory.gru.candidate_hidden, &self.u, None);
        assign(&mut memory.updates[0], &self.wt, Some(&self.bt));
        assign(&mut answer.story, &self.ws, Some(&self.bs));
    }
}

struct Reference {
    gates: Vec<f32>,
    episode: Vec<f32>,
    memory: Vec<f32>,
    scores: Vec<f32>,
}

/// Scalar single-hop pass for one example.
fn reference_example(
    wt: &Weights,
    facts: &[Vec<f32>],
    question: &[f32],
    count: usize,
    choices: &[Vec<f32>],
) -> Reference {
    let memory = question.to_vec();

    let raw: Vec<f32> = facts
        .iter()
        .map(|f| {
            let mut features = Vec::with_capacity(4 * DIM);
            features.extend((0..DIM).map(|k| f[k] * question[k]));
            features.extend((0..DIM).map(|k| f[k] * memory[k]));
            features.extend((0..DIM).map(|k| (f[k] - question[k]).abs()));
            features.extend((0..DIM).map(|k| (f[k] - memory[k]).abs()));
            let hidden: Vec<f32> = dense(&features, &wt.att_w1, Some(&wt.att_b1), DIM)
                .into_iter()
                .map(f32::tanh)
                .collect();
            dense(&hidden, &wt.att_w2, Some(&wt.att_b2), 1)[0]
        })
        .collect();

    let max = raw[..count].iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = raw[..count].iter().map(|s| (s - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    let mut gates: Vec<f32> = exps.iter().map(|e| e / total).collect();
    gates.resize(facts.len(), 0.0);

    let mut h = vec![0.0f32; DIM];
    let mut states = Vec::new();
    for (f, &g) in facts.iter().zip(&gates) {
        let xr = dense(f, &wt.wr, Some(&wt.br), DIM);
        let hr = dense(&h, &wt.ur, None, DIM);
        let r: Vec<f32> = (0..DIM).map(|k| sigmoid(xr[k] + hr[k])).collect();
        let xw = dense(f, &wt.w, Some(&wt.bh), DIM);
        let hu = dense(&h, &wt.u, None, DIM);
        let cand: Vec<f32> = (0..DIM).map(|k| (xw[k] + r[k] * hu[k]).tanh()).collect();
        h = (0..DIM).map(|k| g * cand[k] + (1.0 - g) * h[k]).collect();
        states.push(h.clone());
    }
    let episode = states[count - 1].clone();

    let mut concat = memory.clone();
    concat.extend(&episode);
    concat.extend(question);
    let new_memory: Vec<f32> = dense(&concat, &wt.wt, Some(&wt.bt), DIM)
        .into_iter()
        .map(|v| v.max(0.0))
        .collect();

    let mut story_in = new_memory.clone();
    story_in.extend(question);
    let story = dense(&story_in, &wt.ws, Some(&wt.bs), DIM);
    let story_norm = story.iter().map(|v| v * v).sum::<f32>().sqrt();
    let scores = choices
        .iter()
        .map(|c| {
            let dot: f32 = story.iter().zip(c).map(|(a, b)| a * b).sum();
            let norm = story_norm * c.iter().map(|v| v * v).sum::<f32>().sqrt();
            if norm > 0.0 { dot / norm } else { 0.0 }
        })
        .collect();

    Reference {
        gates,
        episode,
        memory: new_memory,
        scores,
    }
}

fn assert_close(got: &[f32], want: &[f32], what: &str) {
    assert_eq!(got.len(), want.len(), "{what}: length");
    for (idx, (g, w)) in got.iter().zip(want).enumerate() {
        assert!((g - w).abs() < 1e-5, "{what}[{idx}]: {g} vs {w}");
    }
}

#[test]
fn single_hop_matches_scalar_reference() {
    let weights = Weights::new();
    let mut memory = EpisodicMemory::<TestBackend>::new(DIM, 1, &device());
    let mut answer = AnswerModule::<TestBackend>::new(DIM, DIM, &device());
    weights.install(&mut memory, &mut answer);

    let counts = [3usize, 2];
    let fact_data = pattern(2 * SLOTS * DIM, 20);
    let question_data = pattern(2 * DIM, 21);
    let choice_data = pattern(2 * 4 * DIM, 22);

    let facts = float_tensor(fact_data.clone(), [2, SLOTS, DIM]);
    let question = float_tensor(question_data.clone(), [2, DIM]);
    let count_tensor = int_tensor(counts.iter().map(|&c| c as i64).collect(), [2]);

    let hop = memory
        .hop(0, question.clone(), question.clone(), &facts, &count_tensor)
        .unwrap();
    let choices: Vec<Tensor<TestBackend, 2>> = (0..4)
        .map(|j| {
            let rows: Vec<f32> = (0..2)
                .flat_map(|b| choice_data[(b * 4 + j) * DIM..(b * 4 + j + 1) * DIM].to_vec())
                .collect();
            float_tensor(rows, [2, DIM])
        })
        .collect();
    let scores = answer
        .forward(hop.memory.clone(), question, choices, 1.0, ZeroNormPolicy::Fallback)
        .unwrap();

    let gates = to_vec(hop.gates);
    let episode = to_vec(hop.episode);
    let new_memory = to_vec(hop.memory);
    let scores = to_vec(scores);

    for b in 0..2 {
        let facts_b: Vec<Vec<f32>> = (0..SLOTS)
            .map(|t| fact_data[(b * SLOTS + t) * DIM..(b * SLOTS + t + 1) * DIM].to_vec())
            .collect();
        let choices_b: Vec<Vec<f32>> = (0..4)
            .map(|j| choice_data[(b * 4 + j) * DIM..(b * 4 + j + 1) * DIM].to_vec())
            .collect();
        let want = reference_example(
            &weights,
            &facts_b,
            &question_data[b * DIM..(b + 1) * DIM],
            counts[b],
            &choices_b,
        );

        assert_close(&gates[b * SLOTS..(b + 1) * SLOTS], &want.gates, "gates");
        assert_close(&episode[b * DIM..(b + 1) * DIM], &want.episode, "episode");
        assert_close(&new_memory[b * DIM..(b + 1) * DIM], &want.memory, "memory");
        assert_close(&scores[b * 4..(b + 1) * 4], &want.scores, "scores");
    }
}

fn small_config() -> DmnConfig {
    DmnConfig {
        embed_size: DIM,
        hidden_size: DIM,
        num_hops: 2,
        ..DmnConfig::default()
    }
}

fn sample_input(label: Option<Vec<i64>>) -> DmnInput<TestBackend> {
    // batch 2, question 3, passage 3x2, choices 2
    DmnInput {
        question: int_tensor(vec![1, 2, 3, 4, 0, 0], [2, 3]),
        question_len: int_tensor(vec![3, 1], [2]),
        passage: int_tensor(vec![5, 6, 7, 0, 0, 0, 8, 9, 1, 2, 0, 0], [2, 3, 2]),
        sentence_count: int_tensor(vec![2, 2], [2]),
        choices: int_tensor(
            vec![1, 2, 3, 0, 4, 5, 6, 0, 7, 8, 9, 0, 1, 1, 2, 2],
            [4, 2, 2],
        ),
        choice_len: int_tensor(vec![2, 1, 2, 1, 2, 1, 2, 2], [4, 2]),
        label: label.map(|l| int_tensor(l, [2])),
        supporting_facts: Some(int_tensor(vec![0, 1, 1, 0], [2, 2])),
        keep_prob: 1.0,
    }
}

#[test]
fn forward_produces_scores_per_choice() {
    let model = DmnModel::<TestBackend>::new(small_config(), 10, &device()).unwrap();
    let output = model.forward(&sample_input(None)).unwrap();

    assert_eq!(output.scores.dims(), [2, 4]);
    assert_eq!(output.predictions.len(), 2);
    assert!(output.predictions.iter().all(|&p| p < 4));
    assert_eq!(output.attentions.len(), 2);
    for score in to_vec(output.scores) {
        assert!((-1.0..=1.0).contains(&score));
    }
}

#[test]
fn repeated_forward_is_identical() {
    let model = DmnModel::<TestBackend>::new(small_config(), 10, &device()).unwrap();
    let input = sample_input(None);
    let first = model.forward(&input).unwrap();
    let second = model.forward(&input).unwrap();
    assert_eq!(to_vec(first.scores), to_vec(second.scores));
    assert_eq!(first.predictions, second.predictions);
}

#[test]
fn loss_is_finite_and_positive() {
    let config = DmnConfig {
        strong_supervision: true,
        ..small_config()
    };
    let model = DmnModel::<TestBackend>::new(config, 10, &device()).unwrap();
    let input = sample_input(Some(vec![0, 3]));
    let output = model.forward(&input).unwrap();
    let loss: f32 = model.loss(&output, &input).unwrap().into_scalar();
    assert!(loss.is_finite());
    assert!(loss > 0.0);
}

#[test]
fn gate_loss_reads_first_supporting_fact_for_every_hop() {
    for num_hops in [1, 3] {
        let config = DmnConfig {
            strong_supervision: true,
            num_hops,
            ..small_config()
        };
        let model = DmnModel::<TestBackend>::new(config.clone(), 10, &device()).unwrap();
        let mut input = sample_input(Some(vec![0, 3]));
        let output = model.forward(&input).unwrap();
        assert_eq!(output.attentions.len(), num_hops);
        let loss: f32 = model.loss(&output, &input).unwrap().into_scalar();

        // One cross entropy per hop against the first column.
        let first = int_tensor(vec![0, 1], [2]);
        let mut expected = cross_entropy_sum(output.scores.clone(), input.label.clone().unwrap())
            .mul_scalar(config.beta)
            + model.l2_penalty().mul_scalar(config.l2);
        for attention in &output.attentions {
            expected = expected + cross_entropy_sum(attention.clone(), first.clone());
        }
        let expected: f32 = expected.into_scalar();
        assert!((loss - expected).abs() < 1e-4 * expected.abs().max(1.0));

        input.supporting_facts = Some(int_tensor(vec![0, 0, 1, 1], [2, 2]));
        let second_column_changed: f32 = model.loss(&output, &input).unwrap().into_scalar();
        assert!((loss - second_column_changed).abs() < 1e-6);

        input.supporting_facts = Some(int_tensor(vec![1, 1, 0, 0], [2, 2]));
        let first_column_changed: f32 = model.loss(&output, &input).unwrap().into_scalar();
        assert!((loss - first_column_changed).abs() > 1e-6);
    }
}

#[test]
fn loss_without_labels_fails() {
    let model = DmnModel::<TestBackend>::new(small_config(), 10, &device()).unwrap();
    let input = sample_input(None);
    let output = model.forward(&input).unwrap();
    assert!(model.loss(&output, &input).is_err());
}

#[test]
fn mismatched_batch_is_rejected() {
    let model = DmnModel::<TestBackend>::new(small_config(), 10, &device()).unwrap();
    let mut input = sample_input(None);
    input.sentence_count = int_tensor(vec![1, 1, 1], [3]);
    assert!(matches!(model.forward(&input), Err(DmnError::ShapeMismatch(_))));
}

#[test]
fn empty_passage_is_rejected() {
    let model = DmnModel::<TestBackend>::new(small_config(), 10, &device()).unwrap();
    let mut input = sample_input(None);
    input.sentence_count = int_tensor(vec![0, 2], [2]);
    assert!(matches!(model.forward(&input), Err(DmnError::InvalidLength(_))));
}

#[test]
fn pretrained_embedding_dimension_must_match() {
    let model = DmnModel::<TestBackend>::new(small_config(), 10, &device()).unwrap();
    let table = Tensor::<TestBackend, 2>::zeros([10, DIM + 1], &device());
    assert!(matches!(model.with_embedding(table), Err(DmnError::Configuration(_))));
}

#[test]
fn identical_choices_score_equally() {
    let model = DmnModel::<TestBackend>::new(small_config(), 10, &device()).unwrap();
    let mut input = sample_input(None);
    input.choices = int_tensor(vec![4, 5, 7, 8].repeat(4), [4, 2, 2]);
    input.choice_len = int_tensor(vec![2, 2].repeat(4), [4, 2]);

    let output = model.forward(&input).unwrap();
    let scores = to_vec(output.scores);
    for row in scores.chunks(4) {
        for s in &row[1..] {
            assert!((s - row[0]).abs() < 1e-6);
        }
    }
    assert_eq!(output.predictions, vec![0, 0]);
}

use burn::constant;
use burn::module::{Module, Param};
use burn::nn::{Embedding, EmbeddingConfig, Initializer};
use burn::tensor::{Int, Tensor, activation, backend::Backend};
use tracing::debug;

use crate::config::{CHOICE_NUM, DmnConfig};
use crate::error::{DmnError, DmnResult};
use super::answer::{AnswerModule, predictions};
use super::encoder::{InputFusion, SequenceEncoder};
use super::episodic::EpisodicMemory;
use super::host_lengths;

// `constant!` renders the value through `Display` for module printing.
impl std::fmt::Display for DmnConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

constant!(DmnConfig);

/// Embedding init range when no pretrained vectors are supplied (√3).
pub const EMBEDDING_INIT: f64 = 1.732_050_8;

/// One batch of encoded questions, passages and candidate answers.
#[derive(Clone, Debug)]
pub struct DmnInput<B: Backend> {
    /// `[batch, max_question_len]`
    pub question: Tensor<B, 2, Int>,
    /// `[batch]`
    pub question_len: Tensor<B, 1, Int>,
    /// `[batch, max_sentences, max_words]`
    pub passage: Tensor<B, 3, Int>,
    /// `[batch]`
    pub sentence_count: Tensor<B, 1, Int>,
    /// `[4, batch, max_choice_len]`
    pub choices: Tensor<B, 3, Int>,
    /// `[4, batch]`
    pub choice_len: Tensor<B, 2, Int>,
    /// `[batch]`, absent at inference time.
    pub label: Option<Tensor<B, 1, Int>>,
    /// `[batch, supporting_facts]`, only read with strong supervision.
    pub supporting_facts: Option<Tensor<B, 2, Int>>,
    pub keep_prob: f64,
}

impl<B: Backend> DmnInput<B> {
    pub fn batch_size(&self) -> usize {
        self.question.dims()[0]
    }

    /// Same batch with dropout disabled.
    pub fn for_inference(mut self) -> Self {
        self.keep_prob = 1.0;
        self
    }

    fn check_shapes(&self) -> DmnResult<()> {
        let batch = self.batch_size();
        let mut dims = vec![
            ("question_len", self.question_len.dims()[0]),
            ("passage", self.passage.dims()[0]),
            ("sentence_count", self.sentence_count.dims()[0]),
            ("choices", self.choices.dims()[1]),
            ("choice_len", self.choice_len.dims()[1]),
        ];
        if let Some(label) = &self.label {
            dims.push(("label", label.dims()[0]));
        }
        if let Some(facts) = &self.supporting_facts {
            dims.push(("supporting_facts", facts.dims()[0]));
        }
        for (name, size) in dims {
            if size != batch {
                return Err(DmnError::shape(format!(
                    "{name} has batch dimension {size}, question has {batch}"
                )));
            }
        }
        if self.choices.dims()[0] != CHOICE_NUM || self.choice_len.dims()[0] != CHOICE_NUM {
            return Err(DmnError::shape(format!(
                "expected {CHOICE_NUM} choice blocks, got {} token blocks and {} length rows",
                self.choices.dims()[0],
                self.choice_len.dims()[0]
            )));
        }
        if !(self.keep_prob > 0.0 && self.keep_prob <= 1.0) {
            return Err(DmnError::config(format!(
                "dropout keep probability {} is outside (0,1]",
                self.keep_prob
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct DmnOutput<B: Backend> {
    /// `[batch, 4]` cosine scores.
    pub scores: Tensor<B, 2>,
    pub predictions: Vec<usize>,
    /// Final memory `[batch, hidden]`.
    pub memory: Tensor<B, 2>,
    /// Pre-softmax attention scores per hop, `[batch, sentences]` each.
    pub attentions: Vec<Tensor<B, 2>>,
    pub gates: Vec<Tensor<B, 2>>,
}

#[derive(Module, Debug)]
pub struct DmnModel<B: Backend> {
    config: DmnConfig,
    embedding: Embedding<B>,
    question_encoder: SequenceEncoder<B>,
    choice_encoder: SequenceEncoder<B>,
    input_fusion: InputFusion<B>,
    memory: EpisodicMemory<B>,
    answer: AnswerModule<B>,
}

impl<B: Backend> DmnModel<B> {
    pub fn new(config: DmnConfig, vocab_size: usize, device: &B::Device) -> DmnResult<Self> {
        config.validate()?;
        if vocab_size == 0 {
            return Err(DmnError::config("vocabulary must hold at least the padding token"));
        }

        let embed = config.embed_size;
        let hidden = config.hidden_size;
        let embedding = EmbeddingConfig::new(vocab_size, embed)
            .with_initializer(Initializer::Uniform {
                min: -EMBEDDING_INIT,
                max: EMBEDDING_INIT,
            })
            .init(device);

        Ok(Self {
            embedding,
            question_encoder: SequenceEncoder::new(embed, hidden, config.drop_grus, device),
            choice_encoder: SequenceEncoder::new(embed, hidden, config.drop_grus, device),
            input_fusion: InputFusion::new(
                embed,
                hidden,
                config.position_encoding,
                config.drop_grus,
                device,
            ),
            memory: EpisodicMemory::new(hidden, config.num_hops, device),
            answer: AnswerModule::new(hidden, embed, device),
            config,
        })
    }

    /// Replace the embedding table with pretrained vectors `[vocab, embed]`.
    pub fn with_embedding(mut self, weights: Tensor<B, 2>) -> DmnResult<Self> {
        let [vocab, dim] = weights.dims();
        if dim != self.config.embed_size {
            return Err(DmnError::config(format!(
                "pretrained vectors have {dim} dimensions, model expects {}",
                self.config.embed_size
            )));
        }
        if vocab != self.vocab_size() {
            return Err(DmnError::config(format!(
                "pretrained table has {vocab} rows, vocabulary has {}",
                self.vocab_size()
            )));
        }
        self.embedding.weight = Param::from_tensor(weights);
        Ok(self)
    }

    pub fn vocab_size(&self) -> usize {
        self.embedding.weight.dims()[0]
    }

    pub fn config(&self) -> &DmnConfig {
        &self.config
    }

    pub fn forward(&self, input: &DmnInput<B>) -> DmnResult<DmnOutput<B>> {
        input.check_shapes()?;
        let batch = input.batch_size();
        let [_, max_q] = input.question.dims();
        let [_, max_sentences, max_words] = input.passage.dims();
        let [_, _, max_choice] = input.choices.dims();

        host_lengths(&input.question_len, 0, max_q, "question length")?;
        host_lengths(&input.sentence_count, 1, max_sentences, "sentence count")?;

        let question = self.question_encoder.forward(
            self.embedding.forward(input.question.clone()),
            &input.question_len,
            input.keep_prob,
        );

        let choices = (0..CHOICE_NUM)
            .map(|j| {
                let tokens = input
                    .choices
                    .clone()
                    .slice([j..j + 1, 0..batch, 0..max_choice])
                    .reshape([batch, max_choice]);
                let lengths = input
                    .choice_len
                    .clone()
                    .slice([j..j + 1, 0..batch])
                    .reshape([batch]);
                host_lengths(&lengths, 0, max_choice, "choice length")?;
                Ok(self
                    .choice_encoder
                    .forward(self.embedding.forward(tokens), &lengths, input.keep_prob))
            })
            .collect::<DmnResult<Vec<_>>>()?;

        let words = self
            .embedding
            .forward(input.passage.clone().reshape([batch, max_sentences * max_words]))
            .reshape([batch, max_sentences, max_words, self.config.embed_size]);
        let facts = self
            .input_fusion
            .forward(words, &input.sentence_count, input.keep_prob);

        debug!("building episodic memory over {} hops", self.memory.num_hops());
        let memory_out = self
            .memory
            .forward(question.clone(), &facts, &input.sentence_count)?;

        let scores = self.answer.forward(
            memory_out.memory.clone(),
            question,
            choices,
            input.keep_prob,
            self.config.zero_norm_policy,
        )?;
        let predictions = predictions(&scores);

        Ok(DmnOutput {
            scores,
            predictions,
            memory: memory_out.memory,
            attentions: memory_out.attentions,
            gates: memory_out.gates,
        })
    }

    /// Summed answer loss, optional gate supervision and L2 on every
    /// non-bias parameter.
    pub fn loss(&self, output: &DmnOutput<B>, input: &DmnInput<B>) -> DmnResult<Tensor<B, 1>> {
        let labels = input
            .label
            .clone()
            .ok_or_else(|| DmnError::shape("loss requires answer labels"))?;
        let [batch, candidates] = output.scores.dims();
        host_lengths(&labels, 0, candidates - 1, "answer label")?;
        let mut loss = cross_entropy_sum(output.scores.clone(), labels).mul_scalar(self.config.beta);

        if self.config.strong_supervision {
            let facts = input
                .supporting_facts
                .clone()
                .ok_or_else(|| DmnError::shape("strong supervision requires supporting-fact labels"))?;
            // Only the first supporting fact supervises every hop.
            let first = facts.slice([0..batch, 0..1]).reshape([batch]);
            let slots = output.attentions.first().map_or(1, |a| a.dims()[1]);
            host_lengths(&first, 0, slots - 1, "supporting fact")?;
            for attention in &output.attentions {
                loss = loss + cross_entropy_sum(attention.clone(), first.clone());
            }
        }

        Ok(loss + self.l2_penalty().mul_scalar(self.config.l2))
    }

    /// Σ ½‖W‖² over the embedding table and every weight matrix.
    pub fn l2_penalty(&self) -> Tensor<B, 1> {
        let mut weights = vec![self.embedding.weight.val()];
        weights.extend(self.question_encoder.weights());
        weights.extend(self.choice_encoder.weights());
        weights.extend(self.input_fusion.weights());
        weights.extend(self.memory.weights());
        weights.extend(self.answer.weights());

        let device = weights[0].device();
        weights
            .into_iter()
            .fold(Tensor::zeros([1], &device), |acc, w| {
                acc + (w.clone() * w).sum().mul_scalar(0.5)
            })
    }
}

/// Σ_b −log softmax(logits_b)[label_b].
pub fn cross_entropy_sum<B: Backend>(logits: Tensor<B, 2>, labels: Tensor<B, 1, Int>) -> Tensor<B, 1> {
    let batch = logits.dims()[0];
    activation::log_softmax(logits, 1)
        .gather(1, labels.reshape([batch, 1]))
        .sum()
        .neg()
}

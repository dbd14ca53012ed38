mod trainer;

pub use trainer::{DmnTrainer, EpochStats, FitReport, TrainOutput, evaluate, predict};

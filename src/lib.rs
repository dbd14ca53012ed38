// Library exports for use in the CLI and other binaries

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod error;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used types
pub use config::{DmnConfig, TrainConfig};
pub use error::{DmnError, DmnResult};
pub use model::{DmnInput, DmnModel, DmnOutput};
pub use training::DmnTrainer;

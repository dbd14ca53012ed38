mod record;

pub use record::{
    CheckpointData, RestoredCheckpoint, latest_checkpoint, list_checkpoints,
    load_checkpoint, save_checkpoint,
};

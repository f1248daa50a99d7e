//! Session recording, replay, and offline analysis.

mod player;
mod recorder;
mod report;
mod sidecar;
mod transcript;

pub use player::SessionPlayer;
pub use recorder::SessionRecorder;
pub use report::{
    evaluate, load_ground_truth, Evaluation, GroundTruthLabel, SessionReport, TypeMetrics,
};
pub use sidecar::{sidecar_path, AudioSidecar, SIDECAR_SAMPLE_RATE};
pub use transcript::TranscriptIndex;

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error at line {line}: {source}")]
    Parse {
        line: usize,
        source: serde_json::Error,
    },
}

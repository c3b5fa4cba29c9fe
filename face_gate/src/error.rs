use std::{io, path::PathBuf};

use thiserror::Error;

/// Failures while setting up the gate. The process cannot proceed after any of them.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("failed to open camera {device}: {source}")]
    Camera {
        device: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("failed to load model {}: {source}", .path.display())]
    Model {
        path: PathBuf,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("failed to read labels {}: {source}", .path.display())]
    Labels { path: PathBuf, source: io::Error },
    #[error("label file {} contains no labels", .0.display())]
    EmptyLabels(PathBuf),
    #[error("model produces {outputs} scores but {labels} labels are loaded")]
    LabelMismatch { outputs: usize, labels: usize },
    #[error("failed to create snapshot directory {}: {source}", .path.display())]
    Snapshots { path: PathBuf, source: io::Error },
    #[error("invalid action {0:?}, expected NAME=PROGRAM[,ARG...]")]
    InvalidAction(String),
}

/// Failures of the frame source.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to start stream: {0}")]
    Start(String),
    #[error("failed to read frame: {0}")]
    Read(#[source] io::Error),
    #[error("failed to decode frame: {0}")]
    Decode(#[source] image::ImageError),
}

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("classifier returned {got} scores for {expected} labels")]
    OutputLength { got: usize, expected: usize },
}

/// Failures launching a helper program.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no action registered for {0}")]
    Unregistered(String),
    #[error("failed to launch {program} for {identity}: {source}")]
    Launch {
        identity: String,
        program: String,
        source: io::Error,
    },
}

//! Face-identification gate.
//!
//! Captures webcam frames, classifies them with a pre-trained model and grants a privileged
//! action only to allow-listed identities recognized with high confidence.
pub mod config;
pub mod dispatcher;
pub mod endpoints;
pub mod gate;
pub mod labels;
pub mod nn;
pub mod policy;
pub mod sensors;
pub mod snapshot;

mod error;

pub use common::protocol::{AuthorizationVerdict, Prediction, VerdictReason};
pub use error::{CaptureError, ClassifierError, DispatchError, InitError};

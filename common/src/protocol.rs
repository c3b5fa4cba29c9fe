//! Data model of the gate and the messages exchanged with the dashboard.
//!
use std::fmt;

use serde::{Deserialize, Serialize};

/// Arg-max class of one classified frame.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Prediction {
    /// Index into the label set.
    pub index: usize,
    /// Bare identity name, ordinal prefix stripped.
    pub label: String,
    /// Class probability in [0, 1].
    pub confidence: f32,
}

/// Decision of the gate for one invocation.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct AuthorizationVerdict {
    pub granted: bool,
    pub identity: Option<String>,
}

impl AuthorizationVerdict {
    pub fn granted(identity: impl Into<String>) -> Self {
        Self {
            granted: true,
            identity: Some(identity.into()),
        }
    }

    pub fn denied() -> Self {
        Self::default()
    }
}

/// Why a verdict came out the way it did.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictReason {
    Granted,
    LowConfidence,
    UnregisteredIdentity,
    DeviceFailure,
    ClassifierFailure,
    Cancelled,
}

impl fmt::Display for VerdictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VerdictReason::Granted => "granted",
            VerdictReason::LowConfidence => "low confidence",
            VerdictReason::UnregisteredIdentity => "unregistered identity",
            VerdictReason::DeviceFailure => "device failure",
            VerdictReason::ClassifierFailure => "classifier failure",
            VerdictReason::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Response body of `POST /verify`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct VerifyResponse {
    pub granted: bool,
    pub identity: Option<String>,
    pub reason: VerdictReason,
    /// Confidence of the top class, if a frame was classified.
    pub confidence: Option<f32>,
}

impl VerifyResponse {
    pub fn new(
        verdict: AuthorizationVerdict,
        reason: VerdictReason,
        prediction: Option<&Prediction>,
    ) -> Self {
        Self {
            granted: verdict.granted,
            identity: verdict.identity,
            reason,
            confidence: prediction.map(|p| p.confidence),
        }
    }
}

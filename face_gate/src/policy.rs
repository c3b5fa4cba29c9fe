//! Authorization policy.
//!
//! A prediction is granted only if its confidence exceeds the threshold and the identity has a
//! registered action. Everything else is denied.
use std::collections::BTreeSet;

use crate::{AuthorizationVerdict, Prediction, VerdictReason};

/// Default minimum confidence, in percent. Must be exceeded, not just reached.
pub const DEFAULT_THRESHOLD_PERCENT: f32 = 92.0;

#[derive(Clone, Debug)]
pub struct AuthorizationPolicy {
    threshold_percent: f32,
    registered: BTreeSet<String>,
}

impl AuthorizationPolicy {
    pub fn new<I, S>(threshold_percent: f32, registered: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            threshold_percent,
            registered: registered.into_iter().map(Into::into).collect(),
        }
    }

    pub fn threshold_percent(&self) -> f32 {
        self.threshold_percent
    }

    pub fn registered(&self) -> impl Iterator<Item = &str> {
        self.registered.iter().map(String::as_str)
    }

    pub fn is_registered(&self, identity: &str) -> bool {
        self.registered.contains(identity)
    }

    pub fn authorize(&self, prediction: &Prediction) -> (AuthorizationVerdict, VerdictReason) {
        let confident = prediction.confidence * 100.0 > self.threshold_percent;
        if !confident {
            return (AuthorizationVerdict::denied(), VerdictReason::LowConfidence);
        }

        if !self.is_registered(&prediction.label) {
            log::warn!(
                "Identified {} with {:.0}% confidence, but no action is registered for it",
                prediction.label,
                prediction.confidence * 100.0
            );
            return (
                AuthorizationVerdict::denied(),
                VerdictReason::UnregisteredIdentity,
            );
        }

        (
            AuthorizationVerdict::granted(prediction.label.as_str()),
            VerdictReason::Granted,
        )
    }
}

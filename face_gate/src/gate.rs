//! The gate loop.
//!
//! One call to [`GateContext::verify`] captures frames until a decision is reached, which happens
//! on the first frame that could be classified:
//!
//! ```text
//! Capturing ──┬─> Granted   confident and registered identity, helper launched
//!             ├─> Denied    low confidence or unregistered identity
//!             └─> Aborted   camera failure, classifier failure or operator cancel
//! ```
//!
//! The camera stream is started for the evaluation and released exactly once when it ends.
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use common::protocol::VerifyResponse;

use crate::{
    dispatcher::ActionDispatcher,
    labels::LabelSet,
    nn::{normalize, top_prediction, Classifier, PreprocConfig},
    policy::AuthorizationPolicy,
    sensors::{CaptureGuard, Frame, FrameSource},
    snapshot::SnapshotWriter,
    AuthorizationVerdict, ClassifierError, InitError, Prediction, VerdictReason,
};

/// Operator request to stop capturing, shared between threads.
///
/// Only a cancel raised while an evaluation runs stops it. A cancel raised while the gate is idle
/// is dropped when the next evaluation starts.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Check and clear.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateState {
    Capturing,
    Granted,
    Denied,
    Aborted,
}

/// Result of one gate evaluation.
#[derive(Clone, Debug, PartialEq)]
pub struct GateOutcome {
    pub state: GateState,
    pub verdict: AuthorizationVerdict,
    pub reason: VerdictReason,
    /// Top class of the evaluated frame, if one was classified.
    pub prediction: Option<Prediction>,
}

impl GateOutcome {
    fn decided(
        verdict: AuthorizationVerdict,
        reason: VerdictReason,
        prediction: Prediction,
    ) -> Self {
        let state = match verdict.granted {
            true => GateState::Granted,
            false => GateState::Denied,
        };
        Self {
            state,
            verdict,
            reason,
            prediction: Some(prediction),
        }
    }

    fn aborted(reason: VerdictReason) -> Self {
        Self {
            state: GateState::Aborted,
            verdict: AuthorizationVerdict::denied(),
            reason,
            prediction: None,
        }
    }

    /// The boolean handed back to the dashboard.
    pub fn granted(&self) -> bool {
        self.verdict.granted
    }

    pub fn to_response(&self) -> VerifyResponse {
        VerifyResponse::new(self.verdict.clone(), self.reason, self.prediction.as_ref())
    }
}

/// Everything the gate needs, built once at startup.
pub struct GateContext {
    source: Box<dyn FrameSource + Send>,
    preproc: PreprocConfig,
    classifier: Box<dyn Classifier + Send>,
    labels: LabelSet,
    policy: AuthorizationPolicy,
    dispatcher: Box<dyn ActionDispatcher + Send>,
    cancel: CancelToken,
    capture_retries: u32,
    snapshots: Option<SnapshotWriter>,
}

impl GateContext {
    /// Assemble the gate. Fails if the classifier and label set disagree on the class count.
    pub fn new(
        source: Box<dyn FrameSource + Send>,
        classifier: Box<dyn Classifier + Send>,
        labels: LabelSet,
        policy: AuthorizationPolicy,
        dispatcher: Box<dyn ActionDispatcher + Send>,
    ) -> Result<Self, InitError> {
        if let Some(outputs) = classifier.num_classes() {
            if outputs != labels.len() {
                return Err(InitError::LabelMismatch {
                    outputs,
                    labels: labels.len(),
                });
            }
        }

        for identity in policy.registered() {
            if !labels.iter().any(|label| label == identity) {
                log::warn!("Action registered for {identity}, which is not a known label");
            }
        }

        Ok(Self {
            source,
            preproc: PreprocConfig::default(),
            classifier,
            labels,
            policy,
            dispatcher,
            cancel: CancelToken::new(),
            capture_retries: 0,
            snapshots: None,
        })
    }

    pub fn with_preproc(mut self, preproc: PreprocConfig) -> Self {
        self.preproc = preproc;
        self
    }

    /// Number of failed frame reads tolerated before aborting. Zero fails fast.
    pub fn with_capture_retries(mut self, retries: u32) -> Self {
        self.capture_retries = retries;
        self
    }

    pub fn with_snapshots(mut self, snapshots: SnapshotWriter) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    /// Run one evaluation. Blocks until a verdict is reached.
    pub fn verify(&mut self) -> GateOutcome {
        let outcome = self.capture_and_decide();

        if let (GateState::Granted, Some(identity)) = (outcome.state, &outcome.verdict.identity) {
            // Launch failures do not revoke the verdict
            if let Err(err) = self.dispatcher.dispatch(identity) {
                log::error!("Granted {identity}, but the helper could not be launched: {err}");
            }
        }

        log::info!(
            "Gate finished in state {:?} ({})",
            outcome.state,
            outcome.reason
        );
        outcome
    }

    fn capture_and_decide(&mut self) -> GateOutcome {
        let Self {
            source,
            preproc,
            classifier,
            labels,
            policy,
            cancel,
            capture_retries,
            snapshots,
            ..
        } = self;

        if cancel.take() {
            log::debug!("Dropping cancel raised while idle");
        }

        log::debug!("Gate state {:?}", GateState::Capturing);
        let mut capture = match CaptureGuard::start(&mut **source) {
            Ok(capture) => capture,
            Err(err) => {
                log::error!("Camera unavailable: {err}");
                return GateOutcome::aborted(VerdictReason::DeviceFailure);
            }
        };

        let mut failures = 0;
        loop {
            if cancel.take() {
                log::info!("Cancelled by operator");
                return GateOutcome::aborted(VerdictReason::Cancelled);
            }

            let frame = match capture.next_frame() {
                Ok(frame) => frame,
                Err(err) if failures < *capture_retries => {
                    failures += 1;
                    log::warn!("Error capturing frame ({failures}/{capture_retries}): {err}");
                    continue;
                }
                Err(err) => {
                    log::error!("Error capturing frame: {err}");
                    return GateOutcome::aborted(VerdictReason::DeviceFailure);
                }
            };

            let prediction = match classify(&frame, preproc, &**classifier, labels) {
                Ok(prediction) => prediction,
                Err(err) => {
                    log::error!("Error classifying frame: {err}");
                    return GateOutcome::aborted(VerdictReason::ClassifierFailure);
                }
            };

            let (verdict, reason) = policy.authorize(&prediction);

            if let Some(snapshots) = snapshots.as_ref() {
                if let Err(err) = snapshots.save(&frame, &prediction, verdict.granted) {
                    log::warn!("Could not save snapshot: {err}");
                }
            }

            return GateOutcome::decided(verdict, reason, prediction);
        }
    }
}

fn classify(
    frame: &Frame,
    preproc: &PreprocConfig,
    classifier: &dyn Classifier,
    labels: &LabelSet,
) -> Result<Prediction, ClassifierError> {
    let scores = classifier.predict(normalize(frame, preproc))?;
    if scores.len() != labels.len() {
        return Err(ClassifierError::OutputLength {
            got: scores.len(),
            expected: labels.len(),
        });
    }

    let prediction = top_prediction(&scores, labels)
        .ok_or_else(|| ClassifierError::Inference("no valid class score".to_owned()))?;
    log::info!(
        "Class: {}, confidence: {:.0}%",
        prediction.label,
        prediction.confidence * 100.0
    );

    Ok(prediction)
}

#[cfg(test)]
mod test {

    use std::sync::Mutex;

    use image::RgbImage;

    use super::*;
    use crate::{CaptureError, DispatchError};

    #[derive(Default)]
    struct Counters {
        starts: usize,
        stops: usize,
        reads: usize,
    }

    /// Yields the scripted frames in order, failing once they are used up.
    struct FakeCamera {
        frames: Vec<Result<(), ()>>,
        counters: Arc<Mutex<Counters>>,
    }

    impl FrameSource for FakeCamera {
        fn start(&mut self) -> Result<(), CaptureError> {
            self.counters.lock().unwrap().starts += 1;
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Frame, CaptureError> {
            let mut counters = self.counters.lock().unwrap();
            counters.reads += 1;
            match self.frames.get(counters.reads - 1) {
                Some(Ok(())) => Ok(RgbImage::new(32, 24)),
                _ => Err(CaptureError::Read(std::io::ErrorKind::BrokenPipe.into())),
            }
        }

        fn stop(&mut self) {
            self.counters.lock().unwrap().stops += 1;
        }
    }

    struct FixedScores(Vec<f32>);

    impl Classifier for FixedScores {
        fn predict(&self, _input: crate::nn::NormalizedTensor) -> Result<Vec<f32>, ClassifierError> {
            Ok(self.0.clone())
        }
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl ActionDispatcher for Recorder {
        fn dispatch(&self, identity: &str) -> Result<(), DispatchError> {
            self.0.lock().unwrap().push(identity.to_owned());
            Ok(())
        }
    }

    fn gate(
        frames: Vec<Result<(), ()>>,
        scores: Vec<f32>,
    ) -> (GateContext, Arc<Mutex<Counters>>, Recorder) {
        let counters = Arc::new(Mutex::new(Counters::default()));
        let recorder = Recorder::default();
        let gate = GateContext::new(
            Box::new(FakeCamera {
                frames,
                counters: counters.clone(),
            }),
            Box::new(FixedScores(scores)),
            LabelSet::parse("01 Eduardo\n02 Massaki\n03 Ninguem\n"),
            AuthorizationPolicy::new(92.0, ["Eduardo", "Massaki"]),
            Box::new(recorder.clone()),
        )
        .unwrap();

        (gate, counters, recorder)
    }

    #[test]
    fn retries_then_decides() {
        let (gate, counters, recorder) = gate(vec![Err(()), Err(()), Ok(())], vec![0.97, 0.02, 0.01]);
        let mut gate = gate.with_capture_retries(2);

        let outcome = gate.verify();
        assert_eq!(outcome.state, GateState::Granted);
        assert_eq!(outcome.verdict.identity.as_deref(), Some("Eduardo"));
        assert_eq!(counters.lock().unwrap().reads, 3);
        assert_eq!(counters.lock().unwrap().stops, 1);
        assert_eq!(*recorder.0.lock().unwrap(), ["Eduardo"]);
    }

    #[test]
    fn retries_are_bounded() {
        let (gate, counters, recorder) = gate(vec![], vec![0.97, 0.02, 0.01]);
        let mut gate = gate.with_capture_retries(2);

        let outcome = gate.verify();
        assert_eq!(outcome.state, GateState::Aborted);
        assert_eq!(outcome.reason, VerdictReason::DeviceFailure);
        assert_eq!(counters.lock().unwrap().reads, 3);
        assert_eq!(counters.lock().unwrap().stops, 1);
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[test]
    fn idle_cancel_is_dropped() {
        let (mut gate, counters, recorder) = gate(vec![Ok(())], vec![0.97, 0.02, 0.01]);
        gate.cancel_token().cancel();

        let outcome = gate.verify();
        assert_eq!(outcome.state, GateState::Granted);
        assert_eq!(outcome.reason, VerdictReason::Granted);
        assert_eq!(counters.lock().unwrap().reads, 1);
        assert_eq!(*recorder.0.lock().unwrap(), ["Eduardo"]);
        assert!(!gate.cancel_token().is_cancelled());
    }

    /// Fails every read and raises a cancel while doing so.
    struct CancellingCamera {
        cancel: CancelToken,
        counters: Arc<Mutex<Counters>>,
    }

    impl FrameSource for CancellingCamera {
        fn start(&mut self) -> Result<(), CaptureError> {
            self.counters.lock().unwrap().starts += 1;
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Frame, CaptureError> {
            self.counters.lock().unwrap().reads += 1;
            self.cancel.cancel();
            Err(CaptureError::Read(std::io::ErrorKind::TimedOut.into()))
        }

        fn stop(&mut self) {
            self.counters.lock().unwrap().stops += 1;
        }
    }

    #[test]
    fn cancel_during_read_aborts_evaluation() {
        let cancel = CancelToken::new();
        let counters = Arc::new(Mutex::new(Counters::default()));
        let recorder = Recorder::default();
        let mut gate = GateContext::new(
            Box::new(CancellingCamera {
                cancel: cancel.clone(),
                counters: counters.clone(),
            }),
            Box::new(FixedScores(vec![0.97, 0.02, 0.01])),
            LabelSet::parse("01 Eduardo\n02 Massaki\n03 Ninguem\n"),
            AuthorizationPolicy::new(92.0, ["Eduardo", "Massaki"]),
            Box::new(recorder.clone()),
        )
        .unwrap()
        .with_cancel_token(cancel)
        .with_capture_retries(5);

        let outcome = gate.verify();
        assert_eq!(outcome.state, GateState::Aborted);
        assert_eq!(outcome.reason, VerdictReason::Cancelled);
        assert!(!outcome.granted());
        assert_eq!(counters.lock().unwrap().reads, 1);
        assert_eq!(counters.lock().unwrap().stops, 1);
        assert!(recorder.0.lock().unwrap().is_empty());

        // The cancel was consumed
        assert!(!gate.cancel_token().is_cancelled());
    }

    #[test]
    fn wrong_score_count_is_classifier_failure() {
        let (mut gate, counters, _) = gate(vec![Ok(())], vec![0.97, 0.03]);

        let outcome = gate.verify();
        assert_eq!(outcome.state, GateState::Aborted);
        assert_eq!(outcome.reason, VerdictReason::ClassifierFailure);
        assert_eq!(counters.lock().unwrap().stops, 1);
    }

    #[test]
    fn label_mismatch_detected_at_startup() {
        struct ThreeClasses;
        impl Classifier for ThreeClasses {
            fn predict(
                &self,
                _input: crate::nn::NormalizedTensor,
            ) -> Result<Vec<f32>, ClassifierError> {
                Ok(vec![1.0, 0.0, 0.0])
            }

            fn num_classes(&self) -> Option<usize> {
                Some(3)
            }
        }

        let result = GateContext::new(
            Box::new(FakeCamera {
                frames: vec![],
                counters: Default::default(),
            }),
            Box::new(ThreeClasses),
            LabelSet::parse("01 Eduardo\n02 Massaki\n"),
            AuthorizationPolicy::new(92.0, ["Eduardo"]),
            Box::new(Recorder::default()),
        );
        assert!(matches!(
            result,
            Err(InitError::LabelMismatch {
                outputs: 3,
                labels: 2
            })
        ));
    }

    #[test]
    fn outcome_response() {
        let (mut gate, _, _) = gate(vec![Ok(())], vec![0.01, 0.96, 0.03]);
        let response = gate.verify().to_response();

        assert!(response.granted);
        assert_eq!(response.identity.as_deref(), Some("Massaki"));
        assert_eq!(response.reason, VerdictReason::Granted);
        assert_eq!(response.confidence, Some(0.96));
    }
}

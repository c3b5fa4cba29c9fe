//! Startup configuration shared by the binaries.
//!
use std::path::PathBuf;

use clap::Args;

use crate::{
    dispatcher::{ActionSpec, ActionTable, ProcessDispatcher},
    gate::GateContext,
    labels::LabelSet,
    nn::{ChannelOrder, PreprocConfig, TensorLayout, TractClassifier, INPUT_SIZE},
    policy::{AuthorizationPolicy, DEFAULT_THRESHOLD_PERCENT},
    sensors::V4lCamera,
    snapshot::SnapshotWriter,
    InitError,
};

#[derive(Args, Debug, Clone)]
pub struct GateArgs {
    /// Pre-trained ONNX classification model
    #[clap(long, default_value = "keras_model.onnx")]
    pub model: PathBuf,

    /// Label file, one "<ordinal> <identity>" per line
    #[clap(long, default_value = "labels.txt")]
    pub labels: PathBuf,

    /// Video device to capture from
    #[clap(long, default_value = "/dev/video0")]
    pub device: String,

    /// Capture resolution as WIDTHxHEIGHT, highest supported if omitted
    #[clap(long, value_parser = parse_resolution)]
    pub resolution: Option<(u32, u32)>,

    /// Frames per second, highest supported if omitted
    #[clap(long)]
    pub fps: Option<u32>,

    /// Memory layout of the model input
    #[clap(long, value_enum, default_value_t = TensorLayout::Nhwc)]
    pub layout: TensorLayout,

    /// Channel order of the model input
    #[clap(long, value_enum, default_value_t = ChannelOrder::Bgr)]
    pub channel_order: ChannelOrder,

    /// Confidence in percent that must be exceeded to grant
    #[clap(long, default_value_t = DEFAULT_THRESHOLD_PERCENT)]
    pub threshold: f32,

    /// Helper program per identity as NAME=PROGRAM[,ARG...], replaces the built-in table
    #[clap(long = "action")]
    pub actions: Vec<ActionSpec>,

    /// Failed frame reads tolerated before giving up
    #[clap(long, default_value_t = 0)]
    pub capture_retries: u32,

    /// Directory to save each classified frame to
    #[clap(long)]
    pub snapshot_dir: Option<PathBuf>,
}

impl GateArgs {
    pub fn preproc(&self) -> PreprocConfig {
        PreprocConfig {
            size: INPUT_SIZE,
            layout: self.layout,
            channel_order: self.channel_order,
        }
    }

    pub fn action_table(&self) -> ActionTable {
        match self.actions.is_empty() {
            true => ActionTable::builtin(),
            false => self.actions.iter().cloned().collect(),
        }
    }

    /// Load the model and labels and open the camera. Any failure here is fatal.
    pub fn build_context(&self) -> Result<GateContext, InitError> {
        let preproc = self.preproc();
        let labels = LabelSet::from_file(&self.labels)?;
        let classifier = TractClassifier::load(&self.model, &preproc)?;

        let camera = V4lCamera::open(
            &self.device,
            "MJPG",
            self.resolution,
            self.fps.map(|fps| (1, fps)),
        )?;

        let actions = self.action_table();
        for identity in actions.identities() {
            log::info!("Registered action for {}: {:?}", identity, actions.get(identity));
        }
        let policy = AuthorizationPolicy::new(self.threshold, actions.identities());

        let mut context = GateContext::new(
            Box::new(camera),
            Box::new(classifier),
            labels,
            policy,
            Box::new(ProcessDispatcher::new(actions)),
        )?
        .with_preproc(preproc)
        .with_capture_retries(self.capture_retries);

        if let Some(dir) = &self.snapshot_dir {
            let snapshots = SnapshotWriter::new(dir, INPUT_SIZE).map_err(|source| {
                InitError::Snapshots {
                    path: dir.clone(),
                    source,
                }
            })?;
            context = context.with_snapshots(snapshots);
        }

        Ok(context)
    }
}

fn parse_resolution(s: &str) -> Result<(u32, u32), String> {
    let (width, height) = s
        .split_once(|c| c == 'x' || c == 'X')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
    let parse = |v: &str| v.trim().parse::<u32>().map_err(|err| format!("{v:?}: {err}"));

    Ok((parse(width)?, parse(height)?))
}

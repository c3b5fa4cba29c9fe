use std::path::Path;

use image::{Rgb, RgbImage};
use tract_onnx::prelude::*;

use crate::{labels::LabelSet, sensors::Frame, ClassifierError, InitError, Prediction};

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Side length of the square model input.
pub const INPUT_SIZE: u32 = 224;

/// Memory layout of the input tensor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum TensorLayout {
    /// `(1, height, width, channels)`, as exported from Keras.
    #[default]
    Nhwc,
    /// `(1, channels, height, width)`
    Nchw,
}

/// Order in which color channels are fed to the model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ChannelOrder {
    Rgb,
    /// Channels swapped to blue-green-red, the order OpenCV captures in.
    #[default]
    Bgr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PreprocConfig {
    pub size: u32,
    pub layout: TensorLayout,
    pub channel_order: ChannelOrder,
}

impl Default for PreprocConfig {
    fn default() -> Self {
        Self {
            size: INPUT_SIZE,
            layout: TensorLayout::default(),
            channel_order: ChannelOrder::default(),
        }
    }
}

impl PreprocConfig {
    /// Shape of the tensor fed to the model, batch of one.
    pub fn input_shape(&self) -> [usize; 4] {
        let size = self.size as usize;
        match self.layout {
            TensorLayout::Nhwc => [1, size, size, 3],
            TensorLayout::Nchw => [1, 3, size, size],
        }
    }
}

/// Frame resized to the model input and rescaled to [-1, 1].
#[derive(Clone, Debug)]
pub struct NormalizedTensor {
    array: tract_ndarray::Array4<f32>,
}

impl NormalizedTensor {
    pub fn shape(&self) -> &[usize] {
        self.array.shape()
    }

    pub fn as_array(&self) -> &tract_ndarray::Array4<f32> {
        &self.array
    }

    pub fn into_tensor(self) -> Tensor {
        self.array.into()
    }
}

/// Resize and rescale a frame into the tensor layout the classifier expects.
pub fn normalize(frame: &Frame, config: &PreprocConfig) -> NormalizedTensor {
    let resized = resize_area(frame, config.size, config.size);
    NormalizedTensor {
        array: to_array(&resized, config),
    }
}

fn to_array(resized: &RgbImage, config: &PreprocConfig) -> tract_ndarray::Array4<f32> {
    let channel = |c: usize| match config.channel_order {
        ChannelOrder::Rgb => c,
        ChannelOrder::Bgr => 2 - c,
    };
    let value = |x: usize, y: usize, c: usize| {
        resized.get_pixel(x as u32, y as u32)[channel(c)] as f32 / 127.5 - 1.0
    };

    let shape = config.input_shape();
    match config.layout {
        TensorLayout::Nhwc => tract_ndarray::Array4::from_shape_fn(
            (shape[0], shape[1], shape[2], shape[3]),
            |(_, y, x, c)| value(x, y, c),
        ),
        TensorLayout::Nchw => tract_ndarray::Array4::from_shape_fn(
            (shape[0], shape[1], shape[2], shape[3]),
            |(_, c, y, x)| value(x, y, c),
        ),
    }
}

/// Resize by area averaging.
///
/// Every destination pixel is the mean of the source pixels it covers, each weighted by the
/// covered fraction. The aspect ratio is not preserved.
pub fn resize_area(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }

    let x_weights = area_weights(image.width(), width);
    let y_weights = area_weights(image.height(), height);

    RgbImage::from_fn(width, height, |x, y| {
        let mut acc = [0.0_f32; 3];
        let mut total = 0.0_f32;
        for &(src_y, weight_y) in &y_weights[y as usize] {
            for &(src_x, weight_x) in &x_weights[x as usize] {
                let weight = weight_x * weight_y;
                let pixel = image.get_pixel(src_x, src_y);
                for (sum, value) in acc.iter_mut().zip(pixel.0) {
                    *sum += value as f32 * weight;
                }
                total += weight;
            }
        }

        Rgb(acc.map(|sum| match total {
            t if t > 0.0 => (sum / t).round().clamp(0.0, 255.0) as u8,
            _ => 0,
        }))
    })
}

/// Source indices and coverage for every destination index along one axis.
fn area_weights(src_len: u32, dst_len: u32) -> Vec<Vec<(u32, f32)>> {
    let scale = src_len as f64 / dst_len as f64;
    (0..dst_len)
        .map(|dst| {
            let start = dst as f64 * scale;
            let end = start + scale;
            let first = start.floor() as u32;
            let last = (end.ceil() as u32).min(src_len);

            (first..last)
                .filter_map(|src| {
                    let coverage = end.min(src as f64 + 1.0) - start.max(src as f64);
                    (coverage > 0.0).then_some((src, coverage as f32))
                })
                .collect()
        })
        .collect()
}

/// Image classifier producing one score per class.
pub trait Classifier {
    /// Class scores for one frame. Only used for arg-max ranking.
    fn predict(&self, input: NormalizedTensor) -> Result<Vec<f32>, ClassifierError>;

    /// Number of classes, if known before the first prediction.
    fn num_classes(&self) -> Option<usize> {
        None
    }
}

/// ONNX classifier run with tract.
pub struct TractClassifier {
    model: NnModel,
    num_classes: Option<usize>,
}

impl TractClassifier {
    /// Load and optimize the model once.
    pub fn load(path: impl AsRef<Path>, preproc: &PreprocConfig) -> Result<Self, InitError> {
        let path = path.as_ref();
        let (model, num_classes) =
            get_classifier_model(path, preproc.input_shape()).map_err(|err| InitError::Model {
                path: path.to_owned(),
                source: err.into(),
            })?;

        log::info!(
            "Loaded model {} with {} classes",
            path.display(),
            num_classes.map_or_else(|| "unknown".to_owned(), |n| n.to_string())
        );

        Ok(Self { model, num_classes })
    }
}

impl Classifier for TractClassifier {
    fn predict(&self, input: NormalizedTensor) -> Result<Vec<f32>, ClassifierError> {
        let raw_nn_out = self
            .model
            .run(tvec!(input.into_tensor().into()))
            .map_err(|err| ClassifierError::Inference(format!("{err:#}")))?;

        let scores = raw_nn_out
            .first()
            .ok_or_else(|| ClassifierError::Inference("model produced no output".to_owned()))?
            .to_array_view::<f32>()
            .map_err(|err| ClassifierError::Inference(format!("{err:#}")))?
            .iter()
            .copied()
            .collect();

        Ok(scores)
    }

    fn num_classes(&self) -> Option<usize> {
        self.num_classes
    }
}

fn get_classifier_model(path: &Path, shape: [usize; 4]) -> TractResult<(NnModel, Option<usize>)> {
    let input_fact = InferenceFact::dt_shape(
        f32::datum_type(),
        tvec!(shape[0], shape[1], shape[2], shape[3]),
    );
    let model = tract_onnx::onnx()
        .model_for_path(path)?
        .with_input_fact(0, input_fact)?
        .into_optimized()?;

    let num_classes = model
        .output_fact(0)?
        .shape
        .as_concrete()
        .and_then(|dims| dims.last().copied());

    Ok((model.into_runnable()?, num_classes))
}

/// Arg-max over the class scores. Ties go to the lower index.
pub fn top_prediction(scores: &[f32], labels: &LabelSet) -> Option<Prediction> {
    scores
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, score)| !score.is_nan())
        .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)))
        .and_then(|(index, confidence)| {
            labels.get(index).map(|label| Prediction {
                index,
                label: label.to_owned(),
                confidence,
            })
        })
}

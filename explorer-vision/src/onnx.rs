use std::path::Path;

use image::imageops::FilterType;
use ndarray::Array4;
use ort::session::{Session, builder::GraphOptimizationLevel};

use crate::{
    classifier::{Classification, Classifier, ClassifyError, LoadError, MinConfidence, rank},
    dictionary::LabelDictionary,
};

/// How images are fed to the model and how its outputs are read.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOptions {
    /// The width and height of the square model input.
    pub input_size: u32,
    /// Per-channel (RGB) mean subtracted after scaling pixels to `[0, 1]`.
    pub mean: [f32; 3],
    /// Per-channel (RGB) standard deviation the centered pixels are divided by.
    pub std: [f32; 3],
    /// Whether the model outputs logits that still need a softmax.
    pub softmax: bool,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            input_size: 224,
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
            softmax: true,
        }
    }
}

/// An image classification model running on ONNX Runtime.
pub struct OnnxClassifier {
    session: Session,
    labels: LabelDictionary,
    options: ModelOptions,
}

impl OnnxClassifier {
    /// Load the model and its label dictionary.
    ///
    /// [`crate::init_runtime`] should be called before.
    #[tracing::instrument(skip(options))]
    pub fn load(
        model_path: &Path,
        dictionary_path: &Path,
        options: ModelOptions,
    ) -> Result<Self, LoadError> {
        if !model_path.exists() {
            return Err(LoadError::ModelFileNotFound(model_path.to_path_buf()));
        }

        let labels = LabelDictionary::from_file(dictionary_path)?;

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(model_path)?;

        tracing::info!("Loaded classification model from {}", model_path.display());

        Ok(Self {
            session,
            labels,
            options,
        })
    }
}

impl Classifier for OnnxClassifier {
    #[tracing::instrument(skip(self, image), fields(bytes = image.len()))]
    fn classify(
        &self,
        image: &[u8],
        min_confidence: MinConfidence,
    ) -> Result<Vec<Classification>, ClassifyError> {
        let input = prepare_input(image, &self.options)?;

        let outputs = self.session.run(ort::inputs![input.view()]?)?;
        let mut scores = outputs[0]
            .try_extract_tensor::<f32>()?
            .iter()
            .copied()
            .collect::<Vec<_>>();

        if self.options.softmax {
            softmax(&mut scores);
        }

        let classifications = rank(&scores, &self.labels, min_confidence)?;
        tracing::debug!("Found {} classifications", classifications.len());

        Ok(classifications)
    }

    fn labels(&self) -> &LabelDictionary {
        &self.labels
    }
}

/// Decode an image and lay it out as a normalized NCHW tensor.
pub(crate) fn prepare_input(
    image: &[u8],
    options: &ModelOptions,
) -> Result<Array4<f32>, ClassifyError> {
    let decoded = image::load_from_memory(image)?;
    let size = options.input_size;
    let resized = decoded
        .resize_exact(size, size, FilterType::Triangle)
        .to_rgb8();

    let mut input = Array4::zeros((1, 3, size as usize, size as usize));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for channel in 0..3 {
            let value = pixel.0[channel] as f32 / 255.;
            input[[0, channel, y, x]] = (value - options.mean[channel]) / options.std[channel];
        }
    }

    Ok(input)
}

pub(crate) fn softmax(scores: &mut [f32]) {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.;
    for score in scores.iter_mut() {
        *score = (*score - max).exp();
        sum += *score;
    }
    if sum > 0. {
        for score in scores.iter_mut() {
            *score /= sum;
        }
    }
}

#[cfg(test)]
mod tests {
    use image::{ImageFormat, Rgb, RgbImage};

    use super::*;

    fn png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb(color));
        let mut buf = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn prepare_input_resizes_to_nchw() {
        let options = ModelOptions {
            input_size: 8,
            mean: [0.; 3],
            std: [1.; 3],
            softmax: true,
        };

        let input = prepare_input(&png(3, 5, [255, 0, 51]), &options).unwrap();

        assert_eq!(input.shape(), &[1, 3, 8, 8]);
        assert!((input[[0, 0, 4, 4]] - 1.0).abs() < 1e-2);
        assert!(input[[0, 1, 4, 4]].abs() < 1e-2);
        assert!((input[[0, 2, 4, 4]] - 0.2).abs() < 1e-2);
    }

    #[test]
    fn prepare_input_normalizes_channels() {
        let options = ModelOptions {
            input_size: 2,
            mean: [0.5; 3],
            std: [0.5; 3],
            softmax: false,
        };

        let input = prepare_input(&png(2, 2, [255, 255, 255]), &options).unwrap();

        assert!(input.iter().all(|value| (value - 1.0).abs() < 1e-2));
    }

    #[test]
    fn prepare_input_rejects_corrupt_bytes() {
        let error = prepare_input(b"definitely not an image", &ModelOptions::default()).unwrap_err();

        assert!(matches!(error, ClassifyError::Decode(_)));
    }

    #[test]
    fn prepare_input_is_deterministic() {
        let image = png(16, 9, [10, 120, 230]);

        let first = prepare_input(&image, &ModelOptions::default()).unwrap();
        let second = prepare_input(&image, &ModelOptions::default()).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn softmax_produces_probabilities() {
        let mut scores = [1.0, 2.0, 3.0];

        softmax(&mut scores);

        let sum: f32 = scores.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(scores[2] > scores[1] && scores[1] > scores[0]);
    }

    #[test]
    fn load_reports_missing_model() {
        let dir = tempfile::tempdir().unwrap();

        let error = OnnxClassifier::load(
            &dir.path().join("model.onnx"),
            &dir.path().join("dict.txt"),
            ModelOptions::default(),
        )
        .err()
        .unwrap();

        assert!(matches!(error, LoadError::ModelFileNotFound(_)));
    }
}

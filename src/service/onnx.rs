//! ONNX Runtime backed [`Detector`].

use std::path::Path;
use std::sync::Mutex;

use image::DynamicImage;
use ndarray::Array4;
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};

use super::detector::{BoxDetection, Detector};
use super::model::parse_names_metadata;
use super::processing::{self, DEFAULT_INPUT_SIZE, DEFAULT_IOU_THRESHOLD};
use crate::dataset::ClassList;
use crate::error::DetkitError;

const INPUT_NAME: &str = "images";
const OUTPUT_NAME: &str = "output0";

pub struct OnnxDetector {
    session: Mutex<Session>,
    classes: ClassList,
    input_size: u32,
    iou_threshold: f32,
}

impl OnnxDetector {
    /// Load `path`. Class names come from `classes` when given, otherwise from
    /// the model's `names` metadata.
    pub fn load(path: &Path, classes: Option<ClassList>) -> Result<Self, DetkitError> {
        let load_error = |message: String| DetkitError::ModelLoad {
            path: path.to_path_buf(),
            message,
        };

        let session = build_session(path).map_err(|e| load_error(e.to_string()))?;

        let classes = match classes {
            Some(classes) => classes,
            None => embedded_names(&session).ok_or_else(|| {
                load_error("model has no class names; pass --classes".to_string())
            })?,
        };

        tracing::info!(
            model = %path.display(),
            classes = classes.len(),
            "model loaded"
        );

        Ok(Self {
            session: Mutex::new(session),
            classes,
            input_size: DEFAULT_INPUT_SIZE,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        })
    }
}

fn build_session(path: &Path) -> ort::Result<Session> {
    Ok(Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .commit_from_file(path)?)
}

fn inference_error(err: impl std::fmt::Display) -> DetkitError {
    DetkitError::Inference(err.to_string())
}

fn embedded_names(session: &Session) -> Option<ClassList> {
    let metadata = session.metadata().ok()?;
    let names = metadata.custom("names").ok().flatten()?;
    parse_names_metadata(&names)
}

impl Detector for OnnxDetector {
    fn classes(&self) -> &ClassList {
        &self.classes
    }

    fn detect(
        &self,
        image: &DynamicImage,
        confidence: f32,
    ) -> Result<Vec<BoxDetection>, DetkitError> {
        let (canvas, transform) = processing::letterbox(image, self.input_size);
        let side = self.input_size as usize;
        let input = Array4::from_shape_vec((1, 3, side, side), processing::to_chw_tensor(&canvas))
            .map_err(inference_error)?;
        let tensor = TensorRef::from_array_view(input.view()).map_err(inference_error)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| DetkitError::Inference("model session lock poisoned".to_string()))?;
        let outputs = session
            .run(ort::inputs![INPUT_NAME => tensor])
            .map_err(inference_error)?;
        let predictions = outputs[OUTPUT_NAME]
            .try_extract_array::<f32>()
            .map_err(inference_error)?;

        let shape = predictions.shape().to_vec();
        let [1, num_attrs, num_anchors] = shape[..] else {
            return Err(DetkitError::Inference(format!(
                "unexpected output shape {shape:?}"
            )));
        };
        let data: Vec<f32> = predictions.iter().copied().collect();

        Ok(processing::decode_predictions(
            &data,
            num_attrs,
            num_anchors,
            confidence,
            self.iou_threshold,
            &transform,
        ))
    }
}

//! YOLOv8 detector running on onnxruntime, the primary GIE's model.

use std::path::Path;
use std::time::Instant;

use fast_image_resize::{images::Image, IntoImageView, ResizeAlg, ResizeOptions, Resizer};
use gstreamed_common::bbox::{non_maximum_suppression, Bbox};
use gstreamed_common::{frame_times::FrameTimes, img_dimensions::ImgDimensions};
use image::DynamicImage;
use ndarray::{Array, Array4, ArrayView3, Ix3};
use ort::{
    CPUExecutionProvider, CUDAExecutionProvider, GraphOptimizationLevel, Session, SessionBuilder,
    ValueType,
};

/// Used when the model does not pin its input size.
const DEFAULT_INPUT_DIMS: (u32, u32) = (640, 640);

pub struct Detector {
    session: Session,
    input_dims: ImgDimensions,
    conf_threshold: f32,
    nms_threshold: f32,
}

fn model_input_dims(session: &Session) -> Option<ImgDimensions> {
    let input = session.inputs.first()?;
    match &input.input_type {
        // [bsz, channels, height, width]
        ValueType::Tensor { dimensions, .. }
            if dimensions.len() == 4 && dimensions[2] > 0 && dimensions[3] > 0 =>
        {
            Some(ImgDimensions::new(dimensions[3] as f32, dimensions[2] as f32))
        }
        _ => None,
    }
}

impl Detector {
    #[tracing::instrument(skip_all, fields(model = %model.display(), cuda = cuda))]
    pub fn load(
        model: &Path,
        cuda: bool,
        conf_threshold: f32,
        nms_threshold: f32,
    ) -> anyhow::Result<Self> {
        let ep = if cuda {
            CUDAExecutionProvider::default().build()
        } else {
            CPUExecutionProvider::default().build()
        };
        ort::init().with_execution_providers([ep]).commit()?;

        let session = SessionBuilder::new()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(model)?;
        log::debug!("session: {session:?}");

        let input_dims = model_input_dims(&session).unwrap_or_else(|| {
            log::info!("Model input size is dynamic, using {DEFAULT_INPUT_DIMS:?}");
            DEFAULT_INPUT_DIMS.into()
        });
        log::info!("Detector input dims: {input_dims:?}");

        Ok(Self {
            session,
            input_dims,
            conf_threshold,
            nms_threshold,
        })
    }

    /// Runs the model on `image`, returning detections in image coordinates.
    pub fn detect(
        &self,
        image: &DynamicImage,
        frame_times: &mut FrameTimes,
    ) -> anyhow::Result<Vec<Bbox>> {
        let start = Instant::now();
        let (input, ratio) = preprocess_image(image, self.input_dims)?;
        frame_times.preprocess = start.elapsed();

        let start = Instant::now();
        let outputs = self.session.run(ort::inputs![input.view()]?)?;
        let preds = outputs[0].try_extract_tensor::<f32>()?;
        let preds = preds.into_dimensionality::<Ix3>()?;
        frame_times.forward_pass = start.elapsed();

        let start = Instant::now();
        let mut bboxes = parse_predictions(preds, self.conf_threshold);
        frame_times.bbox_extraction = start.elapsed();

        let start = Instant::now();
        non_maximum_suppression(&mut bboxes, self.nms_threshold);
        frame_times.nms = start.elapsed();

        // Map from letterboxed model input back onto the frame.
        let frame_dims: ImgDimensions = (image.width(), image.height()).into();
        Ok(bboxes
            .into_iter()
            .flatten()
            .map(|bbox| bbox.scaled(1. / ratio, 1. / ratio).clamped(frame_dims))
            .collect())
    }
}

/// Resizes `image` to fit into `target_dims`, keeping its aspect ratio, and
/// loads it into the top left of a gray `[1, 3, height, width]` tensor.
///
/// Returns the tensor and the scale ratio that was applied.
fn preprocess_image(
    image: &DynamicImage,
    target_dims: ImgDimensions,
) -> anyhow::Result<(Array4<f32>, f32)> {
    let og_dims: ImgDimensions = (image.width(), image.height()).into();
    let ratio = (target_dims.width / og_dims.width).min(target_dims.height / og_dims.height);
    let scaled_dims = og_dims.scale(ratio);
    let (scaled_width, scaled_height) = (
        (scaled_dims.width as u32).max(1),
        (scaled_dims.height as u32).max(1),
    );

    let pixel_type = image
        .pixel_type()
        .ok_or_else(|| anyhow::anyhow!("Unsupported pixel type: {:?}", image.color()))?;
    let mut scaled = Image::new(scaled_width, scaled_height, pixel_type);
    Resizer::new().resize(
        image,
        &mut scaled,
        &ResizeOptions::new().resize_alg(ResizeAlg::Nearest),
    )?;

    let target_shape = [
        1,
        3,
        target_dims.height as usize,
        target_dims.width as usize,
    ];
    // Init with gray, similar to how ultralytics does it.
    let mut image_array = Array::from_elem(target_shape, 0.5f32);
    let pixels = scaled.buffer();
    for y in 0..scaled_height as usize {
        for x in 0..scaled_width as usize {
            let offset = (y * scaled_width as usize + x) * 3;
            for c in 0..3 {
                image_array[[0, c, y, x]] = pixels[offset + c] as f32 / 255.0;
            }
        }
    }

    Ok((image_array, ratio))
}

/// Extracts per-class boxes from raw YOLOv8 output.
///
/// Output shape is `[bsz, 4 + nclasses, anchors]`, each anchor being
/// (center_x, center_y, width, height) followed by class scores.
pub fn parse_predictions(preds: ArrayView3<f32>, conf_threshold: f32) -> Vec<Vec<Bbox>> {
    let (_, pred_size, npreds) = preds.dim();
    let nclasses = pred_size.saturating_sub(4);
    // The bounding boxes grouped by (maximum) class index.
    let mut bboxes: Vec<Vec<Bbox>> = (0..nclasses).map(|_| vec![]).collect();
    for index in 0..npreds {
        let pred = |i: usize| preds[[0, i, index]];
        let Some((class, confidence)) = (0..nclasses)
            .map(|c| (c, pred(4 + c)))
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
        else {
            continue;
        };
        if confidence <= conf_threshold {
            continue;
        }
        let (cx, cy, w, h) = (pred(0), pred(1), pred(2), pred(3));
        bboxes[class].push(Bbox {
            xmin: cx - w / 2.,
            ymin: cy - h / 2.,
            xmax: cx + w / 2.,
            ymax: cy + h / 2.,
            confidence,
            class,
            tracker_id: None,
        });
    }
    bboxes
}

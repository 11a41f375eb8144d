//! Bounding boxes produced by the detector and refined by the tracker.

use crate::img_dimensions::ImgDimensions;

/// Axis-aligned bounding box, in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Bbox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
    pub confidence: f32,
    /// Index into [crate::coco_classes::NAMES].
    pub class: usize,
    /// Set once the box went through the tracker.
    pub tracker_id: Option<i64>,
}

impl Bbox {
    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }

    pub fn area(&self) -> f32 {
        (self.width() + 1.) * (self.height() + 1.)
    }

    /// Intersection over union of `self` and `other`.
    pub fn iou(&self, other: &Bbox) -> f32 {
        let i_xmin = self.xmin.max(other.xmin);
        let i_xmax = self.xmax.min(other.xmax);
        let i_ymin = self.ymin.max(other.ymin);
        let i_ymax = self.ymax.min(other.ymax);
        let i_area = (i_xmax - i_xmin + 1.).max(0.) * (i_ymax - i_ymin + 1.).max(0.);
        i_area / (self.area() + other.area() - i_area)
    }

    /// Rescales coordinates with separate x/y ratios.
    pub fn scaled(&self, w_ratio: f32, h_ratio: f32) -> Bbox {
        Bbox {
            xmin: self.xmin * w_ratio,
            ymin: self.ymin * h_ratio,
            xmax: self.xmax * w_ratio,
            ymax: self.ymax * h_ratio,
            ..self.clone()
        }
    }

    /// Clamps coordinates into `[0, dims]`.
    pub fn clamped(&self, dims: ImgDimensions) -> Bbox {
        Bbox {
            xmin: self.xmin.clamp(0., dims.width),
            ymin: self.ymin.clamp(0., dims.height),
            xmax: self.xmax.clamp(0., dims.width),
            ymax: self.ymax.clamp(0., dims.height),
            ..self.clone()
        }
    }
}

/// Greedy per-class non-maximum suppression, in place.
///
/// Boxes inside each class are sorted by descending confidence, and any box
/// overlapping an already kept box by more than `threshold` IoU is dropped.
pub fn non_maximum_suppression(bboxes: &mut [Vec<Bbox>], threshold: f32) {
    for bboxes_for_class in bboxes.iter_mut() {
        bboxes_for_class.sort_by(|b1, b2| b2.confidence.total_cmp(&b1.confidence));
        let mut current_index = 0;
        for index in 0..bboxes_for_class.len() {
            let mut drop = false;
            for prev_index in 0..current_index {
                let iou = bboxes_for_class[prev_index].iou(&bboxes_for_class[index]);
                if iou > threshold {
                    drop = true;
                    break;
                }
            }
            if !drop {
                bboxes_for_class.swap(current_index, index);
                current_index += 1;
            }
        }
        bboxes_for_class.truncate(current_index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(xmin: f32, ymin: f32, xmax: f32, ymax: f32, confidence: f32) -> Bbox {
        Bbox {
            xmin,
            ymin,
            xmax,
            ymax,
            confidence,
            class: 0,
            tracker_id: None,
        }
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let b = bbox(10., 10., 50., 50., 0.9);
        assert!((b.iou(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = bbox(0., 0., 10., 10., 0.9);
        let b = bbox(100., 100., 120., 120., 0.9);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn nms_keeps_most_confident_of_overlapping() {
        let mut bboxes = vec![
            vec![
                bbox(0., 0., 100., 100., 0.6),
                bbox(2., 2., 102., 102., 0.9),
                bbox(300., 300., 350., 350., 0.5),
            ],
            vec![bbox(0., 0., 100., 100., 0.4)],
        ];
        non_maximum_suppression(&mut bboxes, 0.45);
        assert_eq!(bboxes[0].len(), 2);
        assert_eq!(bboxes[0][0].confidence, 0.9);
        assert_eq!(bboxes[0][1].confidence, 0.5);
        // other classes are suppressed independently
        assert_eq!(bboxes[1].len(), 1);
    }

    #[test]
    fn clamped_stays_in_frame() {
        let b = bbox(-5., 10., 500., 90., 1.).clamped(ImgDimensions::new(480., 80.));
        assert_eq!((b.xmin, b.ymin, b.xmax, b.ymax), (0., 10., 480., 80.));
    }
}

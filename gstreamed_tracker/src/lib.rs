//! IOU tracker: a similari SORT tracker with an IoU positional metric,
//! running at its own operational resolution.

use gstreamed_common::bbox::Bbox;
use gstreamed_common::img_dimensions::ImgDimensions;
use similari::prelude::PositionalMetricType::IoU;
use similari::prelude::{SortTrack, Universal2DBox};
use similari::trackers::sort::metric::DEFAULT_MINIMAL_SORT_CONFIDENCE;
use similari::{prelude::Sort, trackers::sort::DEFAULT_SORT_IOU_THRESHOLD};

// `similari` re-export so types can be named etc.
pub use similari;

/// Creates a SORT tracker with some default params, largely untuned.
pub fn sort_tracker() -> Sort {
    Sort::new(
        1,
        1,
        10,
        IoU(DEFAULT_SORT_IOU_THRESHOLD),
        DEFAULT_MINIMAL_SORT_CONFIDENCE,
        None,
        1.0 / 20.0,
        1.0 / 160.0,
    )
}

/// Tracks objects of a single source.
///
/// Boxes are scaled from frame space into the tracker's operational
/// resolution before matching, and back afterwards.
pub struct IouTracker {
    sort: Sort,
    dims: ImgDimensions,
}

impl IouTracker {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            sort: sort_tracker(),
            dims: (width, height).into(),
        }
    }

    /// Feeds the detections of one frame and returns the tracked boxes,
    /// in frame coordinates.
    pub fn track(&mut self, frame_dims: ImgDimensions, detections: &[Bbox]) -> Vec<Bbox> {
        let (w_ratio, h_ratio) = frame_dims.ratios_to(self.dims);
        let scaled: Vec<Bbox> = detections
            .iter()
            .map(|bbox| bbox.scaled(w_ratio, h_ratio))
            .collect();
        let tracks = predict_tracks(&mut self.sort, &scaled);
        log::trace!("{tracks:?}");
        tracks_to_bboxes(&tracks, self.dims)
            .into_iter()
            .map(|bbox| bbox.scaled(1. / w_ratio, 1. / h_ratio).clamped(frame_dims))
            .collect()
    }
}

/// Maps from [SortTrack] back to our [Bbox], clamped to `dims`.
pub fn tracks_to_bboxes(tracks: &[SortTrack], dims: ImgDimensions) -> Vec<Bbox> {
    let mut out = Vec::with_capacity(tracks.len());
    for track in tracks {
        let tracked_bbox = &track.predicted_bbox;
        // We use similari custom object id support for class ids.
        let class_id = track.custom_object_id.unwrap_or_default();

        // Map from similari bbox to our bbox.
        let cx = tracked_bbox.xc;
        let cy = tracked_bbox.yc;
        let h = tracked_bbox.height;
        let w = tracked_bbox.aspect * h;

        let xmin = cx - w / 2f32;
        let ymin = cy - h / 2f32;

        let bbox = Bbox {
            xmin,
            ymin,
            xmax: xmin + w,
            ymax: ymin + h,
            // FIXME tracker confidence is always very high
            confidence: tracked_bbox.confidence,
            class: class_id as usize,
            tracker_id: Some(track.id as i64),
        };
        out.push(bbox.clamped(dims));
    }
    out
}

/// Predicts [SortTrack]s using the given [Sort] tracker and observed `bboxes`.
pub fn predict_tracks(tracker: &mut Sort, bboxes: &[Bbox]) -> Vec<SortTrack> {
    let bboxes_4_tracking: Vec<_> = bboxes
        .iter()
        .map(|bbox| {
            (
                Universal2DBox::ltwh(bbox.xmin, bbox.ymin, bbox.width(), bbox.height()),
                Some(bbox.class as i64),
            )
        })
        .collect();
    tracker.predict(&bboxes_4_tracking)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(xmin: f32) -> Bbox {
        Bbox {
            xmin,
            ymin: 200.,
            xmax: xmin + 100.,
            ymax: 600.,
            confidence: 0.9,
            class: 0,
            tracker_id: None,
        }
    }

    #[test]
    fn tracked_boxes_keep_class_and_get_ids() {
        let mut tracker = IouTracker::new(480, 272);
        let frame_dims = ImgDimensions::new(1920., 1080.);
        let tracked = tracker.track(frame_dims, &[person(400.)]);
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].class, 0);
        assert!(tracked[0].tracker_id.is_some());
    }

    #[test]
    fn same_object_keeps_its_id() {
        let mut tracker = IouTracker::new(480, 272);
        let frame_dims = ImgDimensions::new(1920., 1080.);
        let first = tracker.track(frame_dims, &[person(400.)]);
        let second = tracker.track(frame_dims, &[person(404.)]);
        assert_eq!(first[0].tracker_id, second[0].tracker_id);
    }

    #[test]
    fn boxes_come_back_in_frame_space() {
        let mut tracker = IouTracker::new(480, 270);
        let frame_dims = ImgDimensions::new(1920., 1080.);
        let tracked = tracker.track(frame_dims, &[person(400.)]);
        let b = &tracked[0];
        // first observation is taken as is, modulo float noise from scaling
        assert!((b.xmin - 400.).abs() < 2.);
        assert!((b.ymax - 600.).abs() < 2.);
    }
}

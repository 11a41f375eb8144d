use std::fmt::{self, Debug};
use std::time::Duration;

/// Various timings for running the primary GIE on a single video frame.
#[derive(Default, Clone, Copy, PartialEq)]
pub struct FrameTimes {
    pub buffer_to_image: Duration,
    pub preprocess: Duration,
    pub forward_pass: Duration,
    pub bbox_extraction: Duration,
    pub nms: Duration,
    pub tracking: Duration,
}

impl FrameTimes {
    pub fn total(&self) -> Duration {
        self.buffer_to_image
            + self.preprocess
            + self.forward_pass
            + self.bbox_extraction
            + self.nms
            + self.tracking
    }

    fn zip_with(&self, other: &FrameTimes, f: impl Fn(Duration, Duration) -> Duration) -> Self {
        Self {
            buffer_to_image: f(self.buffer_to_image, other.buffer_to_image),
            preprocess: f(self.preprocess, other.preprocess),
            forward_pass: f(self.forward_pass, other.forward_pass),
            bbox_extraction: f(self.bbox_extraction, other.bbox_extraction),
            nms: f(self.nms, other.nms),
            tracking: f(self.tracking, other.tracking),
        }
    }
}

impl Debug for FrameTimes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "
            total: {:?},
            buffer_to_image: {:?},
            preprocess: {:?},
            forward_pass: {:?},
            bbox_extraction: {:?},
            nms: {:?},
            tracking: {:?}
            ",
            self.total(),
            self.buffer_to_image,
            self.preprocess,
            self.forward_pass,
            self.bbox_extraction,
            self.nms,
            self.tracking,
        )
    }
}

/// Running aggregate of [FrameTimes] over all inferred frames.
///
/// The first frame is kept apart, since it pays for lazy init in the
/// inference runtime and skews every statistic.
#[derive(Default, Debug)]
pub struct AggregatedTimes {
    first: Option<FrameTimes>,
    count: u32,
    sum: FrameTimes,
    min: Option<FrameTimes>,
    max: Option<FrameTimes>,
}

impl AggregatedTimes {
    pub fn push(&mut self, times: FrameTimes) {
        if self.first.is_none() {
            self.first = Some(times);
            return;
        }
        self.count += 1;
        self.sum = self.sum.zip_with(&times, |a, b| a + b);
        self.min = Some(match self.min {
            Some(min) => min.zip_with(&times, Duration::min),
            None => times,
        });
        self.max = Some(match self.max {
            Some(max) => max.zip_with(&times, Duration::max),
            None => times,
        });
    }

    /// Number of frames counted, excluding the first one.
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn first(&self) -> Option<FrameTimes> {
        self.first
    }

    pub fn avg(&self) -> Option<FrameTimes> {
        if self.count == 0 {
            return None;
        }
        let count = self.count;
        Some(self.sum.zip_with(&self.sum, |a, _| a / count))
    }

    pub fn min(&self) -> Option<FrameTimes> {
        self.min
    }

    pub fn max(&self) -> Option<FrameTimes> {
        self.max
    }
}

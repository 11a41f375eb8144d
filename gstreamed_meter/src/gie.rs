//! Primary GIE: runs the detector on every `interval + 1`th frame of each
//! source, feeds the source's tracker, and publishes the tracked objects
//! for the OSD.

use std::sync::Mutex;
use std::time::Instant;

use gstreamed_common::bbox::Bbox;
use gstreamed_common::frame::buffer_to_image;
use gstreamed_common::frame_times::{AggregatedTimes, FrameTimes};
use gstreamed_common::img_dimensions::ImgDimensions;
use gstreamed_common::meta::FrameMetaStore;
use gstreamed_tracker::IouTracker;
use gstreamer as gst;
use gstreamer_video as gst_video;
use image::DynamicImage;

use crate::inference::Detector;

struct SourceState {
    tracker: IouTracker,
    frame_count: u64,
    /// Tracked objects from the last inferred frame.
    objects: Vec<Bbox>,
}

pub struct PrimaryGie {
    detector: Detector,
    interval: u32,
    /// Every source is scaled to the same packed RGB size before the GIE.
    video_info: gst_video::VideoInfo,
    sources: Vec<Mutex<SourceState>>,
    meta_store: FrameMetaStore,
    times: Mutex<AggregatedTimes>,
}

/// Whether frame number `frame` gets inferred, skipping `interval` frames in between.
pub fn should_infer(frame: u64, interval: u32) -> bool {
    frame % (interval as u64 + 1) == 0
}

impl PrimaryGie {
    pub fn new(
        detector: Detector,
        interval: u32,
        source_count: usize,
        frame_dims: (u32, u32),
        tracker_dims: (u32, u32),
        meta_store: FrameMetaStore,
    ) -> anyhow::Result<Self> {
        let video_info =
            gst_video::VideoInfo::builder(gst_video::VideoFormat::Rgb, frame_dims.0, frame_dims.1)
                .build()?;
        let sources = (0..source_count)
            .map(|_| {
                Mutex::new(SourceState {
                    tracker: IouTracker::new(tracker_dims.0, tracker_dims.1),
                    frame_count: 0,
                    objects: Vec::new(),
                })
            })
            .collect();
        Ok(Self {
            detector,
            interval,
            video_info,
            sources,
            meta_store,
            times: Mutex::new(AggregatedTimes::default()),
        })
    }

    /// Buffer probe entry point, never fails the stream.
    pub fn process_buffer(&self, source: usize, buffer: &gst::BufferRef) {
        if let Err(err) = self.try_process_buffer(source, buffer) {
            log::warn!("GIE failed on source {source}: {err:#}");
        }
    }

    fn try_process_buffer(&self, source: usize, buffer: &gst::BufferRef) -> anyhow::Result<()> {
        let state = self
            .sources
            .get(source)
            .ok_or_else(|| anyhow::anyhow!("Unknown source {source}"))?;
        let mut guard = state
            .lock()
            .map_err(|_| anyhow::anyhow!("Source state poisoned"))?;
        let state = &mut *guard;

        let frame = state.frame_count;
        state.frame_count += 1;
        if !should_infer(frame, self.interval) {
            // skipped frames keep showing the last tracked objects
            return Ok(());
        }

        let mut frame_times = FrameTimes::default();

        let start = Instant::now();
        let image = DynamicImage::ImageRgb8(buffer_to_image(buffer, &self.video_info)?);
        frame_times.buffer_to_image = start.elapsed();

        let detections = self.detector.detect(&image, &mut frame_times)?;

        let start = Instant::now();
        let frame_dims = ImgDimensions::from((image.width(), image.height()));
        state.objects = state.tracker.track(frame_dims, &detections);
        frame_times.tracking = start.elapsed();
        log::trace!("source {source} frame {frame}: {} objects", state.objects.len());

        self.meta_store.update(source, state.objects.clone());

        log::debug!("{frame_times:?}");
        if let Ok(mut times) = self.times.lock() {
            times.push(frame_times);
        }
        Ok(())
    }

    /// Logs timing stats, ignoring the first (outlier) frame.
    pub fn log_times(&self) {
        let Ok(agg) = self.times.lock() else {
            return;
        };
        log::info!("Frames inferred: {}", agg.count() + u32::from(agg.first().is_some()));
        if let Some(avg) = agg.avg() {
            log::info!("Average frame times: {avg:?}");
        }
        if let Some(min) = agg.min() {
            log::info!("Min frame times: {min:?}");
        }
        if let Some(max) = agg.max() {
            log::info!("Max frame times: {max:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_zero_infers_every_frame() {
        assert!((0..10).all(|frame| should_infer(frame, 0)));
    }

    #[test]
    fn interval_four_infers_every_fifth_frame() {
        let inferred: Vec<u64> = (0..12).filter(|&frame| should_infer(frame, 4)).collect();
        assert_eq!(inferred, vec![0, 5, 10]);
    }
}

//! Builds the multi-source analytics pipeline:
//! sources -> [GIE + tracker] -> tiler -> [meter] -> OSD -> render sink.

use std::sync::Arc;

use gstreamer::prelude::*;
use gstreamer::{self as gst, Buffer};
use gstreamer::{glib, PadProbeData, PadProbeReturn, PadProbeType};

use crate::annotate::{Osd, OsdConfig};
use crate::frame::{buffer_to_image, image_to_buffer, pad_video_info};
use crate::img_dimensions::ImgDimensions;
use crate::meta::FrameMetaStore;
use crate::tiler::TileLayout;

/// A named uri source, e.g. `Camera 1`.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub name: String,
    pub uri: String,
}

/// Where the tiled, annotated stream ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkKind {
    /// Live playback in a window.
    Window,
    /// H.264 in a matroska file at the given path.
    File(String),
    /// Discard frames, for measuring throughput only.
    Fake,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub sources: Vec<SourceConfig>,
    /// Every source is scaled to this size before inference and tiling.
    pub muxer_dims: (u32, u32),
    pub tiler_dims: (u32, u32),
    pub osd: OsdConfig,
    pub sink: SinkKind,
    pub sync: bool,
}

/// The assembled pipeline plus the handles needed to hook callbacks into it.
pub struct AnalyticsPipeline {
    pub pipeline: gst::Pipeline,
    /// Tiler sink pads, indexed by source.
    pub tiler_sink_pads: Vec<gst::Pad>,
    /// Src pad feeding the render sink; navigation events from the window
    /// travel upstream through it.
    pub render_pad: gst::Pad,
}

fn make(factory: &str, name: Option<&str>) -> Result<gst::Element, glib::BoolError> {
    gst::ElementFactory::make_with_name(factory, name)
}

fn static_pad(element: &gst::Element, name: &str) -> Result<gst::Pad, glib::BoolError> {
    element
        .static_pad(name)
        .ok_or_else(|| glib::bool_error!("{} has no {name} pad", element.name()))
}

fn caps_filter(caps: gst::Caps) -> Result<gst::Element, glib::BoolError> {
    let caps_filter = make("capsfilter", None)?;
    caps_filter.set_property("caps", &caps);
    Ok(caps_filter)
}

fn rgb_caps(dims: Option<(u32, u32)>) -> gst::Caps {
    let builder = gst::Caps::builder(glib::gstr!("video/x-raw")).field("format", "RGB");
    match dims {
        Some((width, height)) => builder
            .field("width", width as i32)
            .field("height", height as i32)
            .build(),
        None => builder.build(),
    }
}

// NB! On machines with nvidia gear, use their converter at least once so
// decoded NVMM buffers can be brought back to system memory.
fn video_converter() -> Result<gst::Element, glib::BoolError> {
    let factory = gst::ElementFactory::find("nvvideoconvert")
        .or_else(|| gst::ElementFactory::find("videoconvert"))
        .ok_or_else(|| glib::bool_error!("No video converter available"))?;
    factory.create().build()
}

fn is_video_caps(caps: &gst::CapsRef) -> bool {
    caps.structure(0)
        .is_some_and(|s| s.name().starts_with("video/"))
}

fn is_video_pad(pad: &gst::Pad) -> bool {
    let caps = pad.current_caps().unwrap_or_else(|| pad.query_caps(None));
    is_video_caps(&caps)
}

fn uri_src_bin(source: &SourceConfig) -> Result<gst::Element, glib::BoolError> {
    let bin = gst::Bin::with_name(&source.name);
    // uridecodebin -> queue
    // uridecodebin picks the protocol handler and decoder for whatever the uri points at
    let decode_bin = make("uridecodebin", None)?;
    decode_bin.set_property("uri", source.uri.as_str());

    // queue is our late linking target, decode pads only show up once the
    // media has been typefound
    let queue = make("queue", None)?;

    bin.add_many([&decode_bin, &queue])?;

    let bin_ghost_src_pad = gst::GhostPad::with_target(&static_pad(&queue, "src")?)?;
    bin.add_pad(&bin_ghost_src_pad)?;

    let queue_weak = queue.downgrade();
    let source_name = source.name.clone();
    decode_bin.connect_pad_added(move |_decode_bin, pad| {
        if !is_video_pad(pad) {
            log::debug!("{source_name}: ignoring non-video pad {}", pad.name());
            return;
        }
        let Some(queue) = queue_weak.upgrade() else {
            log::warn!("{source_name}: queue dropped before late linking");
            return;
        };
        let Some(sink_pad) = queue.static_pad("sink") else {
            return;
        };
        if sink_pad.is_linked() {
            log::debug!("{source_name}: already linked, ignoring {}", pad.name());
            return;
        }
        match pad.link(&sink_pad) {
            Ok(_) => log::debug!("{source_name}: linked decode pad {}", pad.name()),
            Err(err) => log::error!("{source_name}: failed to link decode pad: {err:?}"),
        }
    });

    Ok(bin.upcast())
}

/// Builds the per-source branch and links it into a freshly requested tiler pad.
fn add_source_branch(
    pipeline: &gst::Pipeline,
    tiler: &gst::Element,
    layout: &TileLayout,
    index: usize,
    source: &SourceConfig,
    muxer_dims: (u32, u32),
    source_processor: Arc<dyn Fn(usize, &mut Buffer) + Send + Sync>,
) -> Result<gst::Pad, glib::BoolError> {
    // uridecodebin -> video_convert -> scale -> caps_filter -> queue -> [gie] -> tiler
    let src_bin = uri_src_bin(source)?;
    let video_convert = video_converter()?;
    let scale = make("videoscale", None)?;
    let caps_filter = caps_filter(rgb_caps(Some(muxer_dims)))?;
    let queue = make("queue", Some(&format!("gie-queue-{index}")))?;

    let elements = [&src_bin, &video_convert, &scale, &caps_filter, &queue];
    pipeline.add_many(elements)?;
    gst::Element::link_many(elements)?;

    // run the GIE on the queue's src pad, while the stream is still per source
    static_pad(&queue, "src")?.add_probe(PadProbeType::BUFFER, move |_pad, pad_probe_info| {
        if let Some(PadProbeData::Buffer(buffer)) = &mut pad_probe_info.data {
            source_processor(index, buffer);
        }
        PadProbeReturn::Ok
    });

    let tile = layout.tile(index);
    let tiler_pad = tiler
        .request_pad_simple("sink_%u")
        .ok_or_else(|| glib::bool_error!("Failed to request tiler pad for {}", source.name))?;
    tiler_pad.set_property("xpos", tile.x as i32);
    tiler_pad.set_property("ypos", tile.y as i32);
    tiler_pad.set_property("width", tile.width as i32);
    tiler_pad.set_property("height", tile.height as i32);
    static_pad(&queue, "src")?
        .link(&tiler_pad)
        .map_err(|err| glib::bool_error!("Failed to link {} to tiler: {err:?}", source.name))?;

    Ok(tiler_pad)
}

fn draw_osd(
    osd: &Osd,
    meta_store: &FrameMetaStore,
    pad: &gst::Pad,
    buffer: &mut Buffer,
) -> anyhow::Result<()> {
    let info = pad_video_info(pad).ok_or_else(|| anyhow::anyhow!("OSD pad has no video caps"))?;
    let mut image = buffer_to_image(buffer, &info)?;
    osd.draw(&mut image, &meta_store.snapshot());
    image_to_buffer(&image, buffer.make_mut(), &info)
}

/// Builds the render branch, returning its elements in link order.
fn sink_branch(kind: &SinkKind, sync: bool) -> Result<Vec<gst::Element>, glib::BoolError> {
    let convert = make("videoconvert", Some("render-convert"))?;
    let queue = make("queue", Some("render-queue"))?;
    let elements = match kind {
        SinkKind::Window => {
            let sink = make("autovideosink", Some("render-sink"))?;
            sink.set_property("sync", sync);
            vec![convert, queue, sink]
        }
        SinkKind::File(output_path) => {
            let encoder = make("x264enc", None)?;
            // Default is 2048, which for dynamic videos will look like ass.
            encoder.set_property_from_str("bitrate", "8192");
            let mkv_mux = make("matroskamux", None)?;
            let file_sink = make("filesink", Some("render-sink"))?;
            file_sink.set_property("location", output_path.as_str());
            vec![convert, queue, encoder, mkv_mux, file_sink]
        }
        SinkKind::Fake => {
            let sink = make("fakesink", Some("render-sink"))?;
            sink.set_property("sync", sync);
            vec![convert, queue, sink]
        }
    };
    Ok(elements)
}

/// Builds the gst pipeline that decodes every source, runs `source_processor`
/// (the GIE + tracker) on each source's frames, tiles them into a single
/// frame, draws the OSD from `meta_store`, and renders the result.
pub fn build_pipeline(
    config: &PipelineConfig,
    meta_store: FrameMetaStore,
    source_processor: impl Fn(usize, &mut Buffer) + Send + Sync + 'static,
) -> Result<AnalyticsPipeline, glib::BoolError> {
    if config.sources.is_empty() {
        return Err(glib::bool_error!("Pipeline needs at least one source"));
    }
    let pipeline = gst::Pipeline::with_name("pipeline");
    let (tiler_width, tiler_height) = config.tiler_dims;
    let layout = TileLayout::new(config.sources.len(), tiler_width, tiler_height);
    log::info!("Tiler layout: {layout:?}");

    let tiler = make("compositor", Some("tiler"))?;
    tiler.set_property_from_str("background", "black");
    pipeline.add(&tiler)?;

    let source_processor: Arc<dyn Fn(usize, &mut Buffer) + Send + Sync> =
        Arc::new(source_processor);
    let mut tiler_sink_pads = Vec::with_capacity(config.sources.len());
    for (index, source) in config.sources.iter().enumerate() {
        tiler_sink_pads.push(add_source_branch(
            &pipeline,
            &tiler,
            &layout,
            index,
            source,
            config.muxer_dims,
            Arc::clone(&source_processor),
        )?);
    }

    // tiler -> size_filter -> osd_convert -> rgb_filter -> osd_queue -> [osd] -> [clock] -> render branch
    let size_filter = caps_filter(
        gst::Caps::builder(glib::gstr!("video/x-raw"))
            .field("width", tiler_width as i32)
            .field("height", tiler_height as i32)
            .build(),
    )?;
    let osd_convert = make("videoconvert", Some("osd-convert"))?;
    let rgb_filter = caps_filter(rgb_caps(None))?;
    let osd_queue = make("queue", Some("on-screen-display"))?;

    let mut elements = vec![tiler.clone(), size_filter, osd_convert, rgb_filter, osd_queue.clone()];

    let osd_config = config.osd;
    if osd_config.bbox_enabled || osd_config.text_enabled {
        let osd = Osd::new(
            osd_config,
            layout,
            ImgDimensions::from(config.muxer_dims),
            config.sources.iter().map(|s| s.name.clone()).collect(),
        );
        static_pad(&osd_queue, "src")?.add_probe(PadProbeType::BUFFER, move |pad, info| {
            if let Some(PadProbeData::Buffer(buffer)) = &mut info.data {
                if let Err(err) = draw_osd(&osd, &meta_store, pad, buffer) {
                    log::warn!("OSD skipped a frame: {err}");
                }
            }
            PadProbeReturn::Ok
        });
    }
    if osd_config.clock_enabled {
        let clock = make("clockoverlay", Some("osd-clock"))?;
        clock.set_property_from_str("halignment", "right");
        clock.set_property_from_str("valignment", "top");
        clock.set_property("time-format", "%H:%M:%S");
        elements.push(clock);
    }

    let render = sink_branch(&config.sink, config.sync)?;
    // navigation events from a window sink pass upstream through the render queue
    let render_pad = static_pad(&render[1], "src")?;
    elements.extend(render);

    // tiler was added already
    pipeline.add_many(&elements[1..])?;
    gst::Element::link_many(&elements)?;

    Ok(AnalyticsPipeline {
        pipeline,
        tiler_sink_pads,
        render_pad,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_plugins(factories: &[&str]) -> bool {
        gst::init().unwrap();
        factories
            .iter()
            .all(|name| gst::ElementFactory::find(name).is_some())
    }

    fn factory_names(elements: &[gst::Element]) -> Vec<String> {
        elements
            .iter()
            .filter_map(|e| e.factory())
            .map(|f| f.name().to_string())
            .collect()
    }

    fn config(source_count: usize, sink: SinkKind) -> PipelineConfig {
        PipelineConfig {
            sources: (0..source_count)
                .map(|i| SourceConfig {
                    name: format!("Camera {}", i + 1),
                    uri: "file:///tmp/does-not-matter.mp4".to_owned(),
                })
                .collect(),
            muxer_dims: (1920, 1080),
            tiler_dims: (1920, 720),
            osd: OsdConfig {
                clock_enabled: false,
                ..OsdConfig::default()
            },
            sink,
            sync: false,
        }
    }

    #[test]
    fn only_video_caps_get_linked() {
        gst::init().unwrap();
        assert!(is_video_caps(&gst::Caps::builder("video/x-raw").build()));
        assert!(is_video_caps(&gst::Caps::builder("video/x-h265").build()));
        assert!(!is_video_caps(&gst::Caps::builder("audio/x-raw").build()));
        assert!(!is_video_caps(&gst::Caps::new_empty()));
    }

    #[test]
    fn no_sources_is_an_error() {
        gst::init().unwrap();
        let result = build_pipeline(&config(0, SinkKind::Fake), FrameMetaStore::new(0), |_, _| {});
        assert!(result.is_err());
    }

    #[test]
    fn sink_branches_in_link_order() {
        if !has_plugins(&["videoconvert", "queue", "fakesink", "autovideosink"]) {
            return;
        }
        let fake = sink_branch(&SinkKind::Fake, false).unwrap();
        assert_eq!(factory_names(&fake), ["videoconvert", "queue", "fakesink"]);
        assert_eq!(fake[1].name().as_str(), "render-queue");

        let window = sink_branch(&SinkKind::Window, true).unwrap();
        assert_eq!(factory_names(&window), ["videoconvert", "queue", "autovideosink"]);
        assert!(window[2].property::<bool>("sync"));
    }

    #[test]
    fn file_sink_branch_encodes_to_location() {
        if !has_plugins(&["videoconvert", "queue", "x264enc", "matroskamux", "filesink"]) {
            return;
        }
        let file = sink_branch(&SinkKind::File("out.mkv".to_owned()), true).unwrap();
        assert_eq!(
            factory_names(&file),
            ["videoconvert", "queue", "x264enc", "matroskamux", "filesink"]
        );
        assert_eq!(file[4].property::<Option<String>>("location").as_deref(), Some("out.mkv"));
    }

    #[test]
    fn sources_get_their_own_tiler_pad_and_tile() {
        if !has_plugins(&[
            "compositor",
            "uridecodebin",
            "videoconvert",
            "videoscale",
            "capsfilter",
            "queue",
            "fakesink",
        ]) {
            return;
        }
        let built =
            build_pipeline(&config(4, SinkKind::Fake), FrameMetaStore::new(4), |_, _| {}).unwrap();
        let layout = TileLayout::new(4, 1920, 720);

        assert_eq!(built.tiler_sink_pads.len(), 4);
        for (source, pad) in built.tiler_sink_pads.iter().enumerate() {
            let tile = layout.tile(source);
            assert_eq!(pad.property::<i32>("xpos"), tile.x as i32);
            assert_eq!(pad.property::<i32>("ypos"), tile.y as i32);
            assert_eq!(pad.property::<i32>("width"), tile.width as i32);
            assert_eq!(pad.property::<i32>("height"), tile.height as i32);
            // the per-source stream feeds this pad, upstream of tiling
            let peer = pad.peer().and_then(|peer| peer.parent_element()).unwrap();
            assert_eq!(peer.name().as_str(), format!("gie-queue-{source}"));
        }
        let render_element = built.render_pad.parent_element().unwrap();
        assert_eq!(render_element.name().as_str(), "render-queue");
    }
}

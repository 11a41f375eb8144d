mod events;
mod gie;
mod inference;
mod report;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use gstreamed_common::annotate::OsdConfig;
use gstreamed_common::discovery;
use gstreamed_common::meta::FrameMetaStore;
use gstreamed_common::meter::Meter;
use gstreamed_common::pipeline::{build_pipeline, PipelineConfig, SinkKind, SourceConfig};
use gstreamer as gst;
use gstreamer::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::gie::PrimaryGie;
use crate::inference::Detector;
use crate::report::ReportData;

/// Test stream used for every source when no uri is given.
const DEFAULT_URI: &str = "/opt/nvidia/deepstream/deepstream/samples/streams/sample_1080p_h265.mp4";

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Sink {
    Window,
    File,
    Fake,
}

#[derive(Debug, Parser)]
pub struct Args {
    /// Source uri or path, repeat for several sources.
    #[arg(long = "uri")]
    uris: Vec<String>,
    /// Number of sources to create when at most one uri is given.
    #[arg(long, default_value = "8")]
    sources: usize,
    #[arg(long, short, default_value = "_models/yolov8s.onnx")]
    model: PathBuf,
    #[arg(long, action, default_value = "false")]
    cuda: bool,
    /// Frames skipped between two inferences on the same source.
    #[arg(long, default_value = "4")]
    gie_interval: u32,
    #[arg(long, default_value = "0.25")]
    conf_threshold: f32,
    #[arg(long, default_value = "0.45")]
    nms_threshold: f32,
    #[arg(long, default_value = "480")]
    tracker_width: u32,
    #[arg(long, default_value = "272")]
    tracker_height: u32,
    /// Every source is scaled to this size before inference.
    #[arg(long, default_value = "1920")]
    muxer_width: u32,
    #[arg(long, default_value = "1080")]
    muxer_height: u32,
    #[arg(long, default_value = "1920")]
    tiler_width: u32,
    #[arg(long, default_value = "720")]
    tiler_height: u32,
    #[arg(long, action)]
    no_text: bool,
    #[arg(long, action)]
    no_clock: bool,
    #[arg(long, action)]
    no_bbox: bool,
    #[arg(long, value_enum, default_value = "window")]
    sink: Sink,
    /// Output path for the file sink.
    #[arg(long, default_value = "tiled.out.mkv")]
    output: String,
    /// Render as fast as possible instead of in real time.
    #[arg(long, action)]
    no_sync: bool,
    /// Seconds between two meter reports.
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u32).range(1..))]
    meter_interval: u32,
    /// Reports between two header rows.
    #[arg(long, default_value = "12", value_parser = clap::value_parser!(u64).range(1..))]
    header_interval: u64,
}

/// One location per source: each given uri once, or a single uri repeated.
fn source_locations(uris: &[String], count: usize) -> Vec<String> {
    match uris {
        [] => vec![DEFAULT_URI.to_owned(); count],
        [uri] => vec![uri.clone(); count],
        uris => uris.to_vec(),
    }
}

fn source_configs(args: &Args) -> anyhow::Result<Vec<SourceConfig>> {
    let mut sources = Vec::new();
    for (index, location) in source_locations(&args.uris, args.sources).iter().enumerate() {
        let name = format!("Camera {}", index + 1);
        let uri = discovery::to_uri(location).with_context(|| format!("{name}: {location}"))?;
        let file_info =
            discovery::discover(&uri).with_context(|| format!("{name}: cannot read {uri}"))?;
        log::info!("{name}: {uri} {file_info:?}");
        sources.push(SourceConfig { name, uri });
    }
    Ok(sources)
}

fn run(args: Args) -> anyhow::Result<()> {
    gst::init()?;

    let sources = source_configs(&args)?;
    let source_count = sources.len();
    let muxer_dims = (args.muxer_width, args.muxer_height);

    // Primary GIE + per source IOU trackers, publishing into the meta store the OSD reads.
    let detector = Detector::load(
        &args.model,
        args.cuda,
        args.conf_threshold,
        args.nms_threshold,
    )?;
    let meta_store = FrameMetaStore::new(source_count);
    let gie = Arc::new(PrimaryGie::new(
        detector,
        args.gie_interval,
        source_count,
        muxer_dims,
        (args.tracker_width, args.tracker_height),
        meta_store.clone(),
    )?);

    // Meter reporting session/interval averages to the console. Pausing disables
    // it, resuming re-enables it with fresh session averages.
    let mut report_data = ReportData::new(args.header_interval);
    let meter = Meter::new(
        source_count,
        args.meter_interval,
        Box::new(move |session_avgs, interval_avgs, source_count| {
            report_data.handle(session_avgs, interval_avgs, source_count)
        }),
    );

    let config = PipelineConfig {
        sources,
        muxer_dims,
        tiler_dims: (args.tiler_width, args.tiler_height),
        osd: OsdConfig {
            text_enabled: !args.no_text,
            clock_enabled: !args.no_clock,
            bbox_enabled: !args.no_bbox,
        },
        sink: match args.sink {
            Sink::Window => SinkKind::Window,
            Sink::File => SinkKind::File(args.output.clone()),
            Sink::Fake => SinkKind::Fake,
        },
        sync: !args.no_sync,
    };
    let scoped_gie = Arc::clone(&gie);
    let pipeline = build_pipeline(&config, meta_store, move |source, buffer| {
        scoped_gie.process_buffer(source, buffer);
    })?;

    // Measure on the tiler's sink pads, while every source still has its own stream.
    // Downstream of the tiler would only measure the combined stream.
    meter.attach(&pipeline.tiler_sink_pads);
    events::forward_key_events(&pipeline.render_pad);

    let result = pipeline
        .pipeline
        .set_state(gst::State::Playing)
        .map_err(anyhow::Error::from)
        .and_then(|_| {
            let _timer = meter.start_timer();
            events::run_main_loop(&pipeline.pipeline, &meter)
        });

    pipeline.pipeline.set_state(gst::State::Null)?;
    gie.log_times();
    result
}

fn main() -> anyhow::Result<()> {
    // Initialize logging.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let result = run(args);
    match &result {
        Ok(()) => log::info!("Result: success"),
        Err(err) => log::error!("Result: {err:#}"),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sources_repeat_test_stream() {
        let locations = source_locations(&[], 8);
        assert_eq!(locations.len(), 8);
        assert!(locations.iter().all(|l| l == DEFAULT_URI));
    }

    #[test]
    fn single_uri_is_repeated() {
        let locations = source_locations(&["a.mp4".to_owned()], 3);
        assert_eq!(locations, vec!["a.mp4", "a.mp4", "a.mp4"]);
    }

    #[test]
    fn several_uris_are_used_once_each() {
        let uris = vec!["a.mp4".to_owned(), "b.mp4".to_owned()];
        assert_eq!(source_locations(&uris, 8), uris);
    }

    #[test]
    fn args_defaults_match_reference_setup() {
        let args = Args::parse_from(["gstreamed_meter"]);
        assert_eq!(args.sources, 8);
        assert_eq!(args.gie_interval, 4);
        assert_eq!((args.tracker_width, args.tracker_height), (480, 272));
        assert_eq!((args.tiler_width, args.tiler_height), (1920, 720));
        assert_eq!(args.header_interval, 12);
        assert_eq!(args.meter_interval, 1);
        assert!(matches!(args.sink, Sink::Window));
    }

    #[test]
    fn args_accept_repeated_uris_and_sink() {
        let args = Args::parse_from([
            "gstreamed_meter",
            "--uri",
            "a.mp4",
            "--uri",
            "b.mp4",
            "--sink",
            "fake",
            "--no-sync",
        ]);
        assert_eq!(args.uris, vec!["a.mp4", "b.mp4"]);
        assert!(matches!(args.sink, Sink::Fake));
        assert!(args.no_sync);
    }

    #[test]
    fn zero_intervals_are_rejected() {
        assert!(Args::try_parse_from(["gstreamed_meter", "--meter-interval", "0"]).is_err());
        assert!(Args::try_parse_from(["gstreamed_meter", "--header-interval", "0"]).is_err());
        let args = Args::try_parse_from(["gstreamed_meter", "--header-interval", "1"]).unwrap();
        assert_eq!(args.header_interval, 1);
    }
}

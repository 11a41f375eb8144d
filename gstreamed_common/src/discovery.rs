use gstreamer as gst;
use gstreamer::prelude::Displayable;
use gstreamer_pbutils::prelude::DiscovererStreamInfoExt;
use gstreamer_pbutils::{Discoverer, DiscovererInfo, DiscovererStreamInfo};
use std::path::Path;

/// Info about the media behind a source uri.
#[derive(Debug)]
pub struct FileInfo {
    pub width: i32,
    pub height: i32,
}

fn log_stream_info(stream: &DiscovererStreamInfo) {
    let caps_str = match stream.caps() {
        Some(caps) => caps.to_string(),
        None => String::from("--"),
    };
    log::debug!(
        "  stream {}: {caps_str}",
        stream.stream_id().as_deref().unwrap_or("?")
    );
}

fn log_discoverer_info(info: &DiscovererInfo) {
    log::debug!("URI: {}", info.uri());
    log::debug!("Duration: {}", info.duration().display());
    if let Some(taglist) = info.tags() {
        log::debug!("  {taglist}");
    }
    if let Some(stream_info) = info.stream_info() {
        log_stream_info(&stream_info);
    }
    for child in info.stream_list() {
        log_stream_info(&child);
    }
}

fn discover_resolution_from_stream_info(stream_info: &DiscovererStreamInfo) -> Option<FileInfo> {
    let caps = stream_info.caps()?;
    for structure in caps.iter() {
        if let (Ok(width), Ok(height)) = (structure.get("width"), structure.get("height")) {
            return Some(FileInfo { width, height });
        }
    }
    None
}

fn discover_resolution(info: &DiscovererInfo) -> anyhow::Result<FileInfo> {
    if let Some(stream_info) = info.stream_info() {
        if let Some(file_info) = discover_resolution_from_stream_info(&stream_info) {
            return Ok(file_info);
        }
    }
    for child_stream in info.stream_list() {
        if let Some(file_info) = discover_resolution_from_stream_info(&child_stream) {
            return Ok(file_info);
        }
    }
    Err(anyhow::anyhow!(
        "No stream with a width/height feature pair discovered"
    ))
}

/// Turns a plain path into a `file://` uri, leaving real uris untouched.
pub fn to_uri(location: &str) -> anyhow::Result<String> {
    if location.contains("://") {
        return Ok(location.to_owned());
    }
    // discoverer and uridecodebin want absolute file uris
    let path = Path::new(location).canonicalize()?;
    let path = path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Non UTF-8 path: {path:?}"))?;
    Ok(format!("file://{path}"))
}

/// Probes the media at `uri` and returns its video resolution.
pub fn discover(uri: &str) -> anyhow::Result<FileInfo> {
    let timeout = gst::ClockTime::from_seconds(10);
    let discoverer = Discoverer::new(timeout)?;
    let info = discoverer.discover_uri(uri)?;
    log_discoverer_info(&info);

    discover_resolution(&info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uris_pass_through() {
        let uri = "rtsp://camera1/stream";
        assert_eq!(to_uri(uri).unwrap(), uri);
    }

    #[test]
    fn paths_become_file_uris() {
        let uri = to_uri(".").unwrap();
        assert!(uri.starts_with("file:///"));
    }

    #[test]
    fn missing_path_is_an_error() {
        assert!(to_uri("/definitely/not/here.mp4").is_err());
    }
}

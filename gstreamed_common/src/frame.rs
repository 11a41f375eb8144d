//! Moves packed RGB video frames between gst buffers and [RgbImage]s.
//!
//! GStreamer pads RGB rows to 4 bytes, so rows are copied one at a time
//! whenever the stride is wider than `width * 3`.

use gstreamer as gst;
use gstreamer_video as gst_video;
use gstreamer_video::prelude::*;
use image::RgbImage;

fn pack_rows(data: &[u8], stride: usize, width: usize, height: usize) -> Vec<u8> {
    let row_len = width * 3;
    if stride == row_len {
        return data[..row_len * height].to_vec();
    }
    let mut packed = Vec::with_capacity(row_len * height);
    for row in data.chunks(stride).take(height) {
        packed.extend_from_slice(&row[..row_len]);
    }
    packed
}

fn unpack_rows(src: &[u8], dst: &mut [u8], stride: usize, width: usize) {
    let row_len = width * 3;
    for (src_row, dst_row) in src.chunks(row_len).zip(dst.chunks_mut(stride)) {
        dst_row[..row_len].copy_from_slice(src_row);
    }
}

/// Copies the RGB frame held in `buffer` into an image.
pub fn buffer_to_image(
    buffer: &gst::BufferRef,
    info: &gst_video::VideoInfo,
) -> anyhow::Result<RgbImage> {
    let frame = gst_video::VideoFrameRef::from_buffer_ref_readable(buffer, info)
        .map_err(|_| anyhow::anyhow!("Buffer does not match negotiated video info"))?;
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let stride = frame.plane_stride()[0] as usize;
    let data = frame.plane_data(0)?;
    let packed = pack_rows(data, stride, width, height);
    RgbImage::from_raw(width as u32, height as u32, packed)
        .ok_or_else(|| anyhow::anyhow!("Frame data too short for {width}x{height} RGB"))
}

/// Overwrites the RGB frame in `buffer` with `image`, which must have the frame's size.
pub fn image_to_buffer(
    image: &RgbImage,
    buffer: &mut gst::BufferRef,
    info: &gst_video::VideoInfo,
) -> anyhow::Result<()> {
    let mut frame = gst_video::VideoFrameRef::from_buffer_ref_writable(buffer, info)
        .map_err(|_| anyhow::anyhow!("Buffer is not writable with negotiated video info"))?;
    let (width, height) = (frame.width(), frame.height());
    if image.dimensions() != (width, height) {
        anyhow::bail!(
            "Image is {:?}, frame is {width}x{height}",
            image.dimensions()
        );
    }
    let stride = frame.plane_stride()[0] as usize;
    let data = frame.plane_data_mut(0)?;
    unpack_rows(image.as_raw(), data, stride, width as usize);
    Ok(())
}

/// Reads the negotiated video info off a pad.
pub fn pad_video_info(pad: &gst::Pad) -> Option<gst_video::VideoInfo> {
    use gstreamer::prelude::*;

    let caps = pad.current_caps()?;
    gst_video::VideoInfo::from_caps(&caps).ok()
}

//! Pipeline building blocks shared by the gstreamed binaries.

pub mod annotate;
pub mod bbox;
pub mod coco_classes;
pub mod discovery;
pub mod frame;
pub mod frame_times;
pub mod img_dimensions;
pub mod meta;
pub mod meter;
pub mod pipeline;
pub mod tiler;

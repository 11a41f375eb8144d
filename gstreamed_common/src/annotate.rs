//! On-screen display drawing for the tiled output frame.

use ab_glyph::{FontRef, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::{bbox::Bbox, coco_classes, img_dimensions::ImgDimensions, tiler::TileLayout};

static FONT_BYTES: &[u8] = include_bytes!("dejavu-sans-mono.ttf");

/// Which OSD elements get drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsdConfig {
    pub text_enabled: bool,
    pub clock_enabled: bool,
    pub bbox_enabled: bool,
}

impl Default for OsdConfig {
    fn default() -> Self {
        Self {
            text_enabled: true,
            clock_enabled: true,
            bbox_enabled: true,
        }
    }
}

/// Draws tracked objects and source names onto the tiled frame.
pub struct Osd {
    config: OsdConfig,
    layout: TileLayout,
    /// Resolution every source is scaled to before tiling.
    frame_dims: ImgDimensions,
    source_names: Vec<String>,
    legend_size: u32,
    font: Option<FontRef<'static>>,
}

impl Osd {
    pub fn new(
        config: OsdConfig,
        layout: TileLayout,
        frame_dims: ImgDimensions,
        source_names: Vec<String>,
    ) -> Self {
        let font = match FontRef::try_from_slice(FONT_BYTES) {
            Ok(font) => Some(font),
            Err(err) => {
                log::warn!("OSD font failed to load, text disabled: {err}");
                None
            }
        };
        Self {
            config,
            layout,
            frame_dims,
            source_names,
            legend_size: 14,
            font,
        }
    }

    /// Maps a box from source frame coordinates into the tiled output.
    pub fn to_tile(&self, source: usize, bbox: &Bbox) -> Bbox {
        let tile = self.layout.tile(source);
        let (w_ratio, h_ratio) = self.frame_dims.ratios_to(self.layout.tile_dims());
        let mut b = bbox.scaled(w_ratio, h_ratio).clamped(self.layout.tile_dims());
        b.xmin += tile.x as f32;
        b.xmax += tile.x as f32;
        b.ymin += tile.y as f32;
        b.ymax += tile.y as f32;
        b
    }

    /// Draws every source's objects into its tile, in place.
    pub fn draw(&self, img: &mut RgbImage, objects: &[Vec<Bbox>]) {
        for (source, bboxes) in objects.iter().enumerate() {
            for bbox in bboxes {
                self.draw_object(img, &self.to_tile(source, bbox));
            }
        }
        if self.config.text_enabled {
            for (source, name) in self.source_names.iter().enumerate() {
                let tile = self.layout.tile(source);
                self.draw_text(img, tile.x as i32 + 4, tile.y as i32 + 4, name);
            }
        }
    }

    fn draw_object(&self, img: &mut RgbImage, b: &Bbox) {
        let xmin = b.xmin as i32;
        let ymin = b.ymin as i32;
        let dx = b.width();
        let dy = b.height();
        if dx < 1. || dy < 1. {
            return;
        }
        if self.config.bbox_enabled {
            draw_hollow_rect_mut(
                img,
                Rect::at(xmin, ymin).of_size(dx as u32, dy as u32),
                Rgb([255, 0, 0]),
            );
        }
        if self.config.text_enabled && self.font.is_some() {
            draw_filled_rect_mut(
                img,
                Rect::at(xmin, ymin).of_size(dx as u32, self.legend_size),
                Rgb([170, 0, 0]),
            );
            self.draw_text(img, xmin, ymin, &legend(b));
        }
    }

    fn draw_text(&self, img: &mut RgbImage, x: i32, y: i32, text: &str) {
        if let Some(font) = self.font.as_ref() {
            draw_text_mut(
                img,
                Rgb([255, 255, 255]),
                x,
                y,
                PxScale::from(self.legend_size as f32 - 1.),
                font,
                text,
            );
        }
    }
}

/// Object label, e.g. `car 12 87%`.
pub fn legend(b: &Bbox) -> String {
    let name = coco_classes::NAMES.get(b.class).copied().unwrap_or("?");
    match b.tracker_id {
        Some(id) => format!("{name} {id} {:.0}%", 100. * b.confidence),
        None => format!("{name} {:.0}%", 100. * b.confidence),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn osd() -> Osd {
        Osd::new(
            OsdConfig::default(),
            TileLayout::new(4, 1920, 1080),
            ImgDimensions::new(1920., 1080.),
            vec!["Camera 1".into(), "Camera 2".into()],
        )
    }

    fn car() -> Bbox {
        Bbox {
            xmin: 100.,
            ymin: 200.,
            xmax: 300.,
            ymax: 400.,
            confidence: 0.87,
            class: 2,
            tracker_id: Some(12),
        }
    }

    #[test]
    fn boxes_land_in_their_tile() {
        let b = osd().to_tile(3, &car());
        // tile 3 is bottom right, tiles are half size
        assert_eq!((b.xmin, b.ymin, b.xmax, b.ymax), (1010., 640., 1110., 740.));
    }

    #[test]
    fn legend_includes_track_id_when_tracked() {
        assert_eq!(legend(&car()), "car 12 87%");
        let untracked = Bbox {
            tracker_id: None,
            ..car()
        };
        assert_eq!(legend(&untracked), "car 87%");
    }

    #[test]
    fn draw_marks_pixels_inside_tile() {
        let osd = osd();
        let mut img = RgbImage::new(1920, 1080);
        osd.draw(&mut img, &[vec![car()], vec![]]);
        // legend background at the top-right end of the scaled box in tile 0
        assert_eq!(img.get_pixel(148, 101), &Rgb([170, 0, 0]));
        // left edge of the hollow rect below the legend
        assert_eq!(img.get_pixel(50, 150), &Rgb([255, 0, 0]));
        // nothing drawn in the empty tile's interior
        assert_eq!(img.get_pixel(1500, 400), &Rgb([0, 0, 0]));
    }
}

//! Grid layout for the tiler (a `compositor` element).

use crate::img_dimensions::ImgDimensions;

/// Position and size of every source inside the tiled output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileLayout {
    pub columns: u32,
    pub rows: u32,
    pub tile_width: u32,
    pub tile_height: u32,
}

/// Top-left corner and size of a single tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TileLayout {
    /// Picks the smallest square-ish grid that fits `source_count` tiles
    /// into a `width` x `height` output.
    pub fn new(source_count: usize, width: u32, height: u32) -> Self {
        let count = source_count.max(1) as u32;
        let columns = (count as f64).sqrt().ceil() as u32;
        let rows = count.div_ceil(columns);
        Self {
            columns,
            rows,
            tile_width: width / columns,
            tile_height: height / rows,
        }
    }

    pub fn tile(&self, source: usize) -> Tile {
        let source = source as u32;
        Tile {
            x: (source % self.columns) * self.tile_width,
            y: (source / self.columns) * self.tile_height,
            width: self.tile_width,
            height: self.tile_height,
        }
    }

    pub fn tile_dims(&self) -> ImgDimensions {
        (self.tile_width, self.tile_height).into()
    }
}

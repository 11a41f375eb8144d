/// Describes dimensions of an image.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ImgDimensions {
    pub width: f32,
    pub height: f32,
}

impl ImgDimensions {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn scale(&self, ratio: f32) -> Self {
        Self {
            width: self.width * ratio,
            height: self.height * ratio,
        }
    }

    /// Per-axis ratios that map coordinates in `self` onto `target`.
    pub fn ratios_to(&self, target: ImgDimensions) -> (f32, f32) {
        (target.width / self.width, target.height / self.height)
    }
}

impl From<(u32, u32)> for ImgDimensions {
    fn from(value: (u32, u32)) -> Self {
        Self::new(value.0 as f32, value.1 as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratios_between_muxer_and_tracker() {
        let muxer = ImgDimensions::from((1920, 1080));
        let tracker = ImgDimensions::from((480, 270));
        assert_eq!(muxer.ratios_to(tracker), (0.25, 0.25));
        assert_eq!(tracker.ratios_to(muxer), (4.0, 4.0));
    }

    #[test]
    fn scale_keeps_aspect() {
        let dims = ImgDimensions::new(1280., 720.).scale(0.5);
        assert_eq!(dims, ImgDimensions::new(640., 360.));
    }
}

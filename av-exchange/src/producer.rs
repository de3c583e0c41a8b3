use crate::{
    error::Result,
    frame::{FrameSpec, PixelFormat, RawFrame},
    timebase::TimeBase,
};

/// Source of raw pictures for encoding.
pub trait FrameProducer {
    /// Layout of every produced picture.
    fn spec(&self) -> FrameSpec;

    /// Base in which one picture lasts one tick.
    fn time_base(&self) -> TimeBase;

    /// Fill the producer's buffer with picture `index` and lend it out, or
    /// `None` when there are no more pictures. Content depends on `index` only.
    fn produce(&mut self, index: u64) -> Result<Option<&mut RawFrame>>;
}

impl<T: FrameProducer + ?Sized> FrameProducer for Box<T> {
    fn spec(&self) -> FrameSpec {
        (**self).spec()
    }

    fn time_base(&self) -> TimeBase {
        (**self).time_base()
    }

    fn produce(&mut self, index: u64) -> Result<Option<&mut RawFrame>> {
        (**self).produce(index)
    }
}

/// 3x5 glyphs, one row per byte, leftmost column in bit 2.
fn glyph(c: char) -> [u8; 5] {
    match c {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b001, 0b001, 0b001],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        'p' => [0b111, 0b101, 0b111, 0b100, 0b100],
        't' => [0b010, 0b111, 0b010, 0b010, 0b011],
        's' => [0b011, 0b100, 0b010, 0b001, 0b110],
        ':' => [0b000, 0b010, 0b000, 0b010, 0b000],
        _ => [0; 5],
    }
}

/// Synthetic BGR24 pictures: a dark background, a bar sweeping left to right
/// and the frame index printed as `pts: <n>`.
pub struct TestPattern {
    frame: RawFrame,
    time_base: TimeBase,
    limit: Option<u64>,
}

impl TestPattern {
    pub fn new(width: u32, height: u32, time_base: TimeBase) -> Self {
        Self {
            frame: RawFrame::new(FrameSpec::new(PixelFormat::Bgr24, width, height)),
            time_base,
            limit: None,
        }
    }

    /// Stop after `count` pictures.
    pub fn with_limit(mut self, count: u64) -> Self {
        self.limit = Some(count);
        self
    }

    fn fill_rect(&mut self, x: usize, y: usize, w: usize, h: usize, bgr: [u8; 3]) {
        let width = self.frame.width() as usize;
        let height = self.frame.height() as usize;
        for row in y.min(height)..(y + h).min(height) {
            let line = self.frame.row_mut(0, row);
            for col in x.min(width)..(x + w).min(width) {
                line[col * 3..col * 3 + 3].copy_from_slice(&bgr);
            }
        }
    }

    fn draw_text(&mut self, text: &str, x: usize, y: usize, scale: usize) {
        for (i, c) in text.chars().enumerate() {
            let left = x + i * 4 * scale;
            for (gy, bits) in glyph(c).iter().enumerate() {
                for gx in 0..3 {
                    if bits & (0b100 >> gx) != 0 {
                        self.fill_rect(left + gx * scale, y + gy * scale, scale, scale, [255, 255, 255]);
                    }
                }
            }
        }
    }

    fn draw(&mut self, index: u64) {
        let width = self.frame.width() as usize;
        let height = self.frame.height() as usize;
        self.fill_rect(0, 0, width, height, [32, 16, 16]);

        let bar = (width / 16).max(1);
        let x = (index as usize * 4) % width.max(1);
        let shade = (index % 256) as u8;
        self.fill_rect(x, 0, bar, height, [shade, 160, 255 - shade]);

        let scale = (height / 40).max(1);
        self.draw_text(&format!("pts: {}", index), width / 8, height / 2, scale);
    }
}

impl FrameProducer for TestPattern {
    fn spec(&self) -> FrameSpec {
        self.frame.spec()
    }

    fn time_base(&self) -> TimeBase {
        self.time_base
    }

    fn produce(&mut self, index: u64) -> Result<Option<&mut RawFrame>> {
        if self.limit.is_some_and(|limit| index >= limit) {
            return Ok(None);
        }
        self.draw(index);
        self.frame.set_pts(Some(index as i64));
        self.frame.set_key(false);
        Ok(Some(&mut self.frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(pattern: &mut TestPattern, index: u64) -> RawFrame {
        pattern.produce(index).unwrap().unwrap().clone()
    }

    #[test]
    fn test_pattern_is_function_of_index() {
        let mut pattern = TestPattern::new(64, 40, TimeBase::new(1, 30));
        let first = snapshot(&mut pattern, 7);
        let _ = snapshot(&mut pattern, 8);
        let again = snapshot(&mut pattern, 7);
        assert!(first.same_pixels(&again));
        assert_eq!(again.pts(), Some(7));

        let mut other = TestPattern::new(64, 40, TimeBase::new(1, 30));
        assert!(snapshot(&mut other, 7).same_pixels(&first));
    }

    #[test]
    fn test_consecutive_pictures_differ() {
        let mut pattern = TestPattern::new(64, 40, TimeBase::new(1, 30));
        let a = snapshot(&mut pattern, 1);
        let b = snapshot(&mut pattern, 2);
        assert!(!a.same_pixels(&b));
    }

    #[test]
    fn test_label_is_drawn() {
        let mut pattern = TestPattern::new(80, 40, TimeBase::new(1, 30));
        let frame = snapshot(&mut pattern, 0);
        let white = (0..frame.rows(0))
            .flat_map(|y| frame.row(0, y).chunks_exact(3).map(|px| px == [255, 255, 255]).collect::<Vec<_>>())
            .filter(|&w| w)
            .count();
        assert!(white > 0);
    }

    #[test]
    fn test_limit_and_tiny_frames() {
        let mut pattern = TestPattern::new(2, 2, TimeBase::new(1, 25)).with_limit(3);
        assert_eq!(pattern.spec(), FrameSpec::new(PixelFormat::Bgr24, 2, 2));
        assert!(pattern.produce(2).unwrap().is_some());
        assert!(pattern.produce(3).unwrap().is_none());
    }
}

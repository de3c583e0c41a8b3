use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
};

use jpeg_encoder::{ColorType, Encoder};

use crate::{
    error::{Error, Result},
    frame::{FrameSpec, PixelFormat, RawFrame},
};

/// Sink for decoded, converted pictures.
///
/// The frame is only valid for the duration of the call; keep a copy to hold
/// on to it.
pub trait FrameConsumer {
    fn consume(&mut self, frame: &RawFrame, timestamp_ms: Option<i64>) -> Result<()>;

    /// Called once after the last picture.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T: FrameConsumer + ?Sized> FrameConsumer for Box<T> {
    fn consume(&mut self, frame: &RawFrame, timestamp_ms: Option<i64>) -> Result<()> {
        (**self).consume(frame, timestamp_ms)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

impl<T: FrameConsumer + ?Sized> FrameConsumer for &mut T {
    fn consume(&mut self, frame: &RawFrame, timestamp_ms: Option<i64>) -> Result<()> {
        (**self).consume(frame, timestamp_ms)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

/// File name of still `seq` taken at `timestamp_ms` into the stream:
/// `img_<seq>_<HH>-<MM>-<SS>-<mmm>.<ext>`.
pub fn still_name(seq: u64, timestamp_ms: i64, ext: &str) -> String {
    let ms = timestamp_ms.max(0);
    format!(
        "img_{}_{:02}-{:02}-{:02}-{:03}.{}",
        seq,
        ms / 3_600_000,
        ms / 60_000 % 60,
        ms / 1000 % 60,
        ms % 1000,
        ext
    )
}

fn color_type(format: PixelFormat) -> Option<ColorType> {
    match format {
        PixelFormat::Rgb24 => Some(ColorType::Rgb),
        PixelFormat::Bgr24 => Some(ColorType::Bgr),
        PixelFormat::Rgba => Some(ColorType::Rgba),
        PixelFormat::Bgr0 => Some(ColorType::Bgra),
        PixelFormat::Gray8 => Some(ColorType::Luma),
        _ => None,
    }
}

/// Writes every n-th picture as a JPEG still.
pub struct FrameDumper {
    dir: PathBuf,
    quality: u8,
    every: u64,
    seen: u64,
    written: u64,
    scratch: Vec<u8>,
}

impl FrameDumper {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::setup(&format!("create {}", dir.display()), e))?;
        Ok(Self {
            dir,
            quality: 90,
            every: 1,
            seen: 0,
            written: 0,
            scratch: Vec::new(),
        })
    }

    pub fn every(mut self, every: u64) -> Self {
        self.every = every.max(1);
        self
    }

    pub fn quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    fn write(&mut self, frame: &RawFrame, timestamp_ms: i64) -> Result<()> {
        let spec = frame.spec();
        let color = color_type(spec.format).ok_or_else(|| {
            Error::Setup(format!("cannot write {} pictures as jpeg", spec.format))
        })?;
        let (width, height) = match (u16::try_from(spec.width), u16::try_from(spec.height)) {
            (Ok(w), Ok(h)) => (w, h),
            _ => return Err(Error::Sink(format!("{} is too large for jpeg", spec))),
        };

        self.scratch.clear();
        frame.write_packed(&mut self.scratch);
        let path = self.dir.join(still_name(self.written, timestamp_ms, "jpg"));
        let encoder = Encoder::new_file(&path, self.quality)
            .map_err(|e| Error::sink(&format!("create {}", path.display()), e))?;
        encoder
            .encode(&self.scratch, width, height, color)
            .map_err(|e| Error::sink(&format!("write {}", path.display()), e))?;
        log::debug!("wrote {}", path.display());
        self.written += 1;
        Ok(())
    }
}

impl FrameConsumer for FrameDumper {
    fn consume(&mut self, frame: &RawFrame, timestamp_ms: Option<i64>) -> Result<()> {
        let index = self.seen;
        self.seen += 1;
        if index % self.every != 0 {
            return Ok(());
        }
        let timestamp_ms = timestamp_ms.unwrap_or_else(|| {
            log::warn!("picture {} has no timestamp", index);
            0
        });
        self.write(frame, timestamp_ms)
    }

    fn finish(&mut self) -> Result<()> {
        log::info!("{} stills written to {}", self.written, self.dir.display());
        Ok(())
    }
}

/// Timestamps a [`FrameCounter`] keeps; older ones are dropped.
pub const COUNTER_HISTORY: usize = 64;

/// Counts pictures and remembers the most recent timestamps.
#[derive(Debug, Default)]
pub struct FrameCounter {
    count: u64,
    timestamps: VecDeque<Option<i64>>,
    last_spec: Option<FrameSpec>,
    finished: bool,
}

impl FrameCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Up to [`COUNTER_HISTORY`] timestamps, oldest first.
    pub fn timestamps(&self) -> Vec<Option<i64>> {
        self.timestamps.iter().copied().collect()
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.timestamps.back().copied().flatten()
    }

    pub fn last_spec(&self) -> Option<FrameSpec> {
        self.last_spec
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl FrameConsumer for FrameCounter {
    fn consume(&mut self, frame: &RawFrame, timestamp_ms: Option<i64>) -> Result<()> {
        self.count += 1;
        if self.timestamps.len() == COUNTER_HISTORY {
            self.timestamps.pop_front();
        }
        self.timestamps.push_back(timestamp_ms);
        self.last_spec = Some(frame.spec());
        log::trace!("picture {} at {:?} ms", self.count, timestamp_ms);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_still_name() {
        assert_eq!(still_name(0, 0, "jpg"), "img_0_00-00-00-000.jpg");
        assert_eq!(still_name(12, 3_723_004, "png"), "img_12_01-02-03-004.png");
        assert_eq!(still_name(3, 59_999, "jpg"), "img_3_00-00-59-999.jpg");
        assert_eq!(still_name(1, -5, "jpg"), "img_1_00-00-00-000.jpg");
    }

    #[test]
    fn test_dumper_writes_every_nth() {
        let dir = tempfile::tempdir().unwrap();
        let mut dumper = FrameDumper::new(dir.path().join("stills")).unwrap().every(2);
        let mut frame = RawFrame::new(FrameSpec::new(PixelFormat::Rgb24, 16, 8));
        frame.data_mut(0).fill(200);
        for i in 0..5 {
            dumper.consume(&frame, Some(i * 40)).unwrap();
        }
        dumper.finish().unwrap();
        assert_eq!(dumper.written(), 3);

        let mut names: Vec<String> = std::fs::read_dir(dumper.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "img_0_00-00-00-000.jpg",
                "img_1_00-00-00-080.jpg",
                "img_2_00-00-00-160.jpg"
            ]
        );
        let bytes = std::fs::read(dumper.dir().join("img_0_00-00-00-000.jpg")).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_dumper_rejects_planar_yuv() {
        let dir = tempfile::tempdir().unwrap();
        let mut dumper = FrameDumper::new(dir.path()).unwrap();
        let frame = RawFrame::new(FrameSpec::new(PixelFormat::Yuv420p, 16, 8));
        assert!(matches!(dumper.consume(&frame, Some(0)), Err(Error::Setup(_))));
    }

    #[test]
    fn test_counter() {
        let mut counter = FrameCounter::new();
        let frame = RawFrame::new(FrameSpec::new(PixelFormat::Gray8, 2, 2));
        counter.consume(&frame, Some(0)).unwrap();
        counter.consume(&frame, None).unwrap();
        counter.finish().unwrap();
        assert_eq!(counter.count(), 2);
        assert_eq!(counter.timestamps(), &[Some(0), None]);
        assert_eq!(counter.last_spec(), Some(frame.spec()));
        assert!(counter.is_finished());
    }

    #[test]
    fn test_counter_history_is_bounded() {
        let mut counter = FrameCounter::new();
        let frame = RawFrame::new(FrameSpec::new(PixelFormat::Gray8, 2, 2));
        for ms in 0..1000 {
            counter.consume(&frame, Some(ms)).unwrap();
        }
        assert_eq!(counter.count(), 1000);
        let kept = counter.timestamps();
        assert_eq!(kept.len(), COUNTER_HISTORY);
        assert_eq!(kept[0], Some(1000 - COUNTER_HISTORY as i64));
        assert_eq!(counter.last_timestamp(), Some(999));
    }
}

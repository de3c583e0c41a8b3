use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Extra bytes past the last row of every plane; SIMD scalers read ahead.
const PLANE_PADDING: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Yuv420p,
    Yuv422p,
    Yuv444p,
    Nv12,
    Gray8,
    Rgb24,
    Bgr24,
    Rgba,
    /// Packed B, G, R plus one unused byte (x11grab output).
    Bgr0,
}

impl PixelFormat {
    pub fn name(&self) -> &'static str {
        match self {
            PixelFormat::Yuv420p => "yuv420p",
            PixelFormat::Yuv422p => "yuv422p",
            PixelFormat::Yuv444p => "yuv444p",
            PixelFormat::Nv12 => "nv12",
            PixelFormat::Gray8 => "gray",
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Bgr24 => "bgr24",
            PixelFormat::Rgba => "rgba",
            PixelFormat::Bgr0 => "bgr0",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let format = match name.to_ascii_lowercase().as_str() {
            "yuv420p" | "yuvj420p" | "i420" => PixelFormat::Yuv420p,
            "yuv422p" | "yuvj422p" => PixelFormat::Yuv422p,
            "yuv444p" | "yuvj444p" => PixelFormat::Yuv444p,
            "nv12" => PixelFormat::Nv12,
            "gray" | "gray8" => PixelFormat::Gray8,
            "rgb24" => PixelFormat::Rgb24,
            "bgr24" => PixelFormat::Bgr24,
            "rgba" => PixelFormat::Rgba,
            "bgr0" | "bgrx" | "bgrz" => PixelFormat::Bgr0,
            _ => return None,
        };
        Some(format)
    }

    pub fn planes(&self) -> usize {
        match self {
            PixelFormat::Yuv420p | PixelFormat::Yuv422p | PixelFormat::Yuv444p => 3,
            PixelFormat::Nv12 => 2,
            _ => 1,
        }
    }

    /// Bytes per sample in `plane`. Packed formats carry a whole pixel per
    /// sample, NV12's second plane an interleaved U/V pair.
    pub fn sample_size(&self, plane: usize) -> usize {
        match (self, plane) {
            (PixelFormat::Rgb24 | PixelFormat::Bgr24, _) => 3,
            (PixelFormat::Rgba | PixelFormat::Bgr0, _) => 4,
            (PixelFormat::Nv12, 1) => 2,
            _ => 1,
        }
    }

    /// Log2 of the horizontal and vertical chroma subsampling.
    pub fn chroma_shift(&self) -> (u32, u32) {
        match self {
            PixelFormat::Yuv420p | PixelFormat::Nv12 => (1, 1),
            PixelFormat::Yuv422p => (1, 0),
            _ => (0, 0),
        }
    }

    pub fn is_yuv(&self) -> bool {
        matches!(
            self,
            PixelFormat::Yuv420p
                | PixelFormat::Yuv422p
                | PixelFormat::Yuv444p
                | PixelFormat::Nv12
                | PixelFormat::Gray8
        )
    }

    /// Samples per row and number of rows of `plane` for a `width`x`height` picture.
    pub fn plane_dims(&self, plane: usize, width: u32, height: u32) -> (usize, usize) {
        let (w, h) = (width as usize, height as usize);
        if plane == 0 {
            return (w, h);
        }
        let (sx, sy) = self.chroma_shift();
        (w.div_ceil(1 << sx), h.div_ceil(1 << sy))
    }

    /// Visible bytes per row of `plane`.
    pub fn row_bytes(&self, plane: usize, width: u32) -> usize {
        self.plane_dims(plane, width, 1).0 * self.sample_size(plane)
    }

    /// Size of a picture with rows packed back to back and no padding.
    pub fn packed_size(&self, width: u32, height: u32) -> usize {
        (0..self.planes())
            .map(|p| self.row_bytes(p, width) * self.plane_dims(p, width, height).1)
            .sum()
    }
}

impl Display for PixelFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Format and size of a picture; what a conversion plan or an encoder is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameSpec {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
}

impl FrameSpec {
    pub fn new(format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
        }
    }

    pub fn packed_size(&self) -> usize {
        self.format.packed_size(self.width, self.height)
    }

    pub fn with_format(&self, format: PixelFormat) -> Self {
        Self { format, ..*self }
    }
}

impl Display for FrameSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}x{}", self.format, self.width, self.height)
    }
}

#[derive(Debug, Clone, Default)]
struct Plane {
    data: Vec<u8>,
    linesize: usize,
}

/// An uncompressed picture: one buffer and linesize per plane plus a
/// best-effort presentation timestamp.
///
/// Frames are long-lived and refilled in place; [`RawFrame::reshape`] only
/// reallocates when the format or size changes.
#[derive(Debug, Clone)]
pub struct RawFrame {
    spec: FrameSpec,
    align: usize,
    planes: Vec<Plane>,
    pts: Option<i64>,
    key: bool,
}

impl RawFrame {
    pub const DEFAULT_ALIGN: usize = 32;

    pub fn new(spec: FrameSpec) -> Self {
        Self::with_align(spec, Self::DEFAULT_ALIGN)
    }

    pub fn with_align(spec: FrameSpec, align: usize) -> Self {
        let mut frame = Self {
            spec,
            align: align.max(1),
            planes: Vec::new(),
            pts: None,
            key: false,
        };
        frame.allocate();
        frame
    }

    /// Unallocated frame, used as a slot the decoder fills on first output.
    pub fn empty() -> Self {
        Self::new(FrameSpec::new(PixelFormat::Yuv420p, 0, 0))
    }

    fn allocate(&mut self) {
        let format = self.spec.format;
        let align = self.align;
        self.planes.resize_with(format.planes(), Plane::default);
        for (index, plane) in self.planes.iter_mut().enumerate() {
            let row = format.row_bytes(index, self.spec.width);
            let rows = format.plane_dims(index, self.spec.width, self.spec.height).1;
            plane.linesize = row.div_ceil(align) * align;
            let len = plane.linesize * rows;
            plane.data.clear();
            plane.data.resize(
                if len == 0 { 0 } else { len + PLANE_PADDING },
                0,
            );
        }
    }

    /// Make this frame hold a picture of `spec`, keeping buffers when it already does.
    pub fn reshape(&mut self, spec: FrameSpec) {
        if self.spec != spec {
            self.spec = spec;
            self.allocate();
        }
    }

    pub fn spec(&self) -> FrameSpec {
        self.spec
    }

    pub fn format(&self) -> PixelFormat {
        self.spec.format
    }

    pub fn width(&self) -> u32 {
        self.spec.width
    }

    pub fn height(&self) -> u32 {
        self.spec.height
    }

    pub fn pts(&self) -> Option<i64> {
        self.pts
    }

    pub fn set_pts(&mut self, pts: Option<i64>) {
        self.pts = pts;
    }

    pub fn is_key(&self) -> bool {
        self.key
    }

    pub fn set_key(&mut self, key: bool) {
        self.key = key;
    }

    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }

    pub fn linesize(&self, plane: usize) -> usize {
        self.planes[plane].linesize
    }

    pub fn data(&self, plane: usize) -> &[u8] {
        &self.planes[plane].data
    }

    pub fn data_mut(&mut self, plane: usize) -> &mut [u8] {
        &mut self.planes[plane].data
    }

    /// Visible bytes of row `y` in `plane`, without linesize padding.
    pub fn row(&self, plane: usize, y: usize) -> &[u8] {
        let p = &self.planes[plane];
        let start = y * p.linesize;
        &p.data[start..start + self.spec.format.row_bytes(plane, self.spec.width)]
    }

    pub fn row_mut(&mut self, plane: usize, y: usize) -> &mut [u8] {
        let len = self.spec.format.row_bytes(plane, self.spec.width);
        let p = &mut self.planes[plane];
        let start = y * p.linesize;
        &mut p.data[start..start + len]
    }

    pub fn rows(&self, plane: usize) -> usize {
        self.spec
            .format
            .plane_dims(plane, self.spec.width, self.spec.height)
            .1
    }

    /// Same format, size and visible pixel bytes; padding and timestamps are ignored.
    pub fn same_pixels(&self, other: &RawFrame) -> bool {
        self.spec == other.spec
            && (0..self.plane_count())
                .all(|p| (0..self.rows(p)).all(|y| self.row(p, y) == other.row(p, y)))
    }

    /// Copy picture and timing from `other`, reshaping as needed.
    pub fn copy_from(&mut self, other: &RawFrame) {
        self.reshape(other.spec);
        for p in 0..other.plane_count() {
            for y in 0..other.rows(p) {
                self.row_mut(p, y).copy_from_slice(other.row(p, y));
            }
        }
        self.pts = other.pts;
        self.key = other.key;
    }

    /// Append all planes with rows packed back to back.
    pub fn write_packed(&self, out: &mut Vec<u8>) {
        out.reserve(self.spec.packed_size());
        for p in 0..self.plane_count() {
            for y in 0..self.rows(p) {
                out.extend_from_slice(self.row(p, y));
            }
        }
    }

    /// Fill all planes from a tightly packed buffer.
    pub fn read_packed(&mut self, data: &[u8]) -> Result<()> {
        let expected = self.spec.packed_size();
        if data.len() != expected {
            return Err(Error::Codec(format!(
                "packed {} picture needs {} bytes, got {}",
                self.spec,
                expected,
                data.len()
            )));
        }
        let mut offset = 0;
        for p in 0..self.plane_count() {
            let row = self.spec.format.row_bytes(p, self.spec.width);
            for y in 0..self.rows(p) {
                self.row_mut(p, y)
                    .copy_from_slice(&data[offset..offset + row]);
                offset += row;
            }
        }
        Ok(())
    }

    /// Fill a single-plane (packed pixel) frame from a buffer with its own
    /// `linesize`, as delivered by capture devices.
    pub fn read_strided(&mut self, data: &[u8], linesize: usize) -> Result<()> {
        if self.plane_count() != 1 {
            return Err(Error::Setup(format!(
                "strided input only supported for packed formats, not {}",
                self.spec.format
            )));
        }
        let row = self.spec.format.row_bytes(0, self.spec.width);
        let rows = self.rows(0);
        if linesize < row || data.len() < linesize * rows.saturating_sub(1) + row {
            return Err(Error::Codec(format!(
                "{} bytes with linesize {} cannot hold a {} picture",
                data.len(),
                linesize,
                self.spec
            )));
        }
        for y in 0..rows {
            let start = y * linesize;
            self.row_mut(0, y).copy_from_slice(&data[start..start + row]);
        }
        Ok(())
    }
}

impl Default for RawFrame {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(feature = "ffmpeg")]
impl TryFrom<ffmpeg_next::format::Pixel> for PixelFormat {
    type Error = Error;

    fn try_from(value: ffmpeg_next::format::Pixel) -> Result<Self> {
        use ffmpeg_next::format::Pixel;
        let format = match value {
            Pixel::YUV420P | Pixel::YUVJ420P => PixelFormat::Yuv420p,
            Pixel::YUV422P | Pixel::YUVJ422P => PixelFormat::Yuv422p,
            Pixel::YUV444P | Pixel::YUVJ444P => PixelFormat::Yuv444p,
            Pixel::NV12 => PixelFormat::Nv12,
            Pixel::GRAY8 => PixelFormat::Gray8,
            Pixel::RGB24 => PixelFormat::Rgb24,
            Pixel::BGR24 => PixelFormat::Bgr24,
            Pixel::RGBA => PixelFormat::Rgba,
            Pixel::BGRZ => PixelFormat::Bgr0,
            other => {
                return Err(Error::Setup(format!("unsupported pixel format: {:?}", other)));
            }
        };
        Ok(format)
    }
}

#[cfg(feature = "ffmpeg")]
impl From<PixelFormat> for ffmpeg_next::format::Pixel {
    fn from(value: PixelFormat) -> Self {
        use ffmpeg_next::format::Pixel;
        match value {
            PixelFormat::Yuv420p => Pixel::YUV420P,
            PixelFormat::Yuv422p => Pixel::YUV422P,
            PixelFormat::Yuv444p => Pixel::YUV444P,
            PixelFormat::Nv12 => Pixel::NV12,
            PixelFormat::Gray8 => Pixel::GRAY8,
            PixelFormat::Rgb24 => Pixel::RGB24,
            PixelFormat::Bgr24 => Pixel::BGR24,
            PixelFormat::Rgba => Pixel::RGBA,
            PixelFormat::Bgr0 => Pixel::BGRZ,
        }
    }
}

#[cfg(feature = "ffmpeg")]
impl RawFrame {
    /// Copy a decoded FFmpeg picture into this frame, reusing buffers when the
    /// format and size are unchanged.
    pub(crate) fn copy_from_video(&mut self, src: &ffmpeg_next::frame::Video) -> Result<()> {
        let format = PixelFormat::try_from(src.format())?;
        self.reshape(FrameSpec::new(format, src.width(), src.height()));
        for p in 0..self.plane_count() {
            let stride = src.stride(p);
            let data = src.data(p);
            let row = format.row_bytes(p, self.spec.width);
            for y in 0..self.rows(p) {
                let start = y * stride;
                self.row_mut(p, y)
                    .copy_from_slice(&data[start..start + row]);
            }
        }
        self.pts = src.timestamp().or(src.pts());
        self.key = src.is_key();
        Ok(())
    }

    /// Copy this frame into an FFmpeg picture of the same format and size.
    pub(crate) fn copy_to_video(&self, dst: &mut ffmpeg_next::frame::Video) -> Result<()> {
        if PixelFormat::try_from(dst.format())? != self.spec.format
            || dst.width() != self.spec.width
            || dst.height() != self.spec.height
        {
            return Err(Error::Setup(format!(
                "frame {} does not match codec picture {:?} {}x{}",
                self.spec,
                dst.format(),
                dst.width(),
                dst.height()
            )));
        }
        for p in 0..self.plane_count() {
            let stride = dst.stride(p);
            let rows = self.rows(p);
            let data = dst.data_mut(p);
            for y in 0..rows {
                let src = self.row(p, y);
                let start = y * stride;
                data[start..start + src.len()].copy_from_slice(src);
            }
        }
        dst.set_pts(self.pts);
        Ok(())
    }
}

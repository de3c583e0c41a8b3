use crate::{
    error::{Error, Result},
    frame::{FrameSpec, PixelFormat, RawFrame},
};

/// The exact source and destination layout a converter is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversionPlan {
    pub src: FrameSpec,
    pub dst: FrameSpec,
}

impl ConversionPlan {
    pub fn new(src: FrameSpec, dst: FrameSpec) -> Self {
        Self { src, dst }
    }

    pub fn is_identity(&self) -> bool {
        self.src == self.dst
    }

    /// Reject frames the plan was not built for.
    pub fn check(&self, src: &RawFrame, dst: &RawFrame) -> Result<()> {
        if src.spec() != self.src {
            return Err(Error::Setup(format!(
                "conversion built for source {}, got {}",
                self.src,
                src.spec()
            )));
        }
        if dst.spec() != self.dst {
            return Err(Error::Setup(format!(
                "conversion built for destination {}, got {}",
                self.dst,
                dst.spec()
            )));
        }
        Ok(())
    }
}

/// Spatial and format transform of one picture into another's buffers.
///
/// `dst` is overwritten entirely and never reallocated. Timestamps are not
/// touched.
pub trait PixelConverter {
    fn plan(&self) -> ConversionPlan;

    fn convert(&mut self, src: &RawFrame, dst: &mut RawFrame) -> Result<()>;
}

impl<T: PixelConverter + ?Sized> PixelConverter for Box<T> {
    fn plan(&self) -> ConversionPlan {
        (**self).plan()
    }

    fn convert(&mut self, src: &RawFrame, dst: &mut RawFrame) -> Result<()> {
        (**self).convert(src, dst)
    }
}

/// Nearest-neighbour scaler with BT.601 (limited range) colour conversion.
pub struct SoftwareScaler {
    plan: ConversionPlan,
    /// Source column/row for every destination column/row.
    x_map: Vec<usize>,
    y_map: Vec<usize>,
}

fn axis_map(src: u32, dst: u32) -> Vec<usize> {
    (0..dst as u64)
        .map(|i| (i * src as u64 / dst as u64) as usize)
        .collect()
}

fn clip(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

fn yuv_to_rgb([y, u, v]: [u8; 3]) -> [u8; 3] {
    let c = 298 * (y as i32 - 16);
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    [
        clip((c + 409 * e + 128) >> 8),
        clip((c - 100 * d - 208 * e + 128) >> 8),
        clip((c + 516 * d + 128) >> 8),
    ]
}

fn rgb_to_yuv([r, g, b]: [u8; 3]) -> [u8; 3] {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    [
        clip(((66 * r + 129 * g + 25 * b + 128) >> 8) + 16),
        clip(((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128),
        clip(((112 * r - 94 * g - 18 * b + 128) >> 8) + 128),
    ]
}

fn read_yuv(frame: &RawFrame, x: usize, y: usize) -> [u8; 3] {
    let format = frame.format();
    let luma = frame.row(0, y)[x];
    let (sx, sy) = format.chroma_shift();
    let (cx, cy) = (x >> sx, y >> sy);
    match format {
        PixelFormat::Nv12 => {
            let row = frame.row(1, cy);
            [luma, row[2 * cx], row[2 * cx + 1]]
        }
        PixelFormat::Gray8 => [luma, 128, 128],
        _ => [luma, frame.row(1, cy)[cx], frame.row(2, cy)[cx]],
    }
}

fn read_rgb(frame: &RawFrame, x: usize, y: usize) -> [u8; 3] {
    let format = frame.format();
    let offset = x * format.sample_size(0);
    let px = &frame.row(0, y)[offset..offset + 3];
    match format {
        PixelFormat::Bgr24 | PixelFormat::Bgr0 => [px[2], px[1], px[0]],
        _ => [px[0], px[1], px[2]],
    }
}

/// Pixel at (x, y) as YUV or RGB, converting when the frame holds the other family.
fn read_pixel(frame: &RawFrame, x: usize, y: usize, want_yuv: bool) -> [u8; 3] {
    match (frame.format().is_yuv(), want_yuv) {
        (true, true) => read_yuv(frame, x, y),
        (true, false) => yuv_to_rgb(read_yuv(frame, x, y)),
        (false, true) => rgb_to_yuv(read_rgb(frame, x, y)),
        (false, false) => read_rgb(frame, x, y),
    }
}

impl SoftwareScaler {
    pub fn new(plan: ConversionPlan) -> Result<Self> {
        for spec in [plan.src, plan.dst] {
            if spec.width == 0 || spec.height == 0 {
                return Err(Error::Setup(format!("cannot convert empty picture {}", spec)));
            }
        }
        Ok(Self {
            plan,
            x_map: axis_map(plan.src.width, plan.dst.width),
            y_map: axis_map(plan.src.height, plan.dst.height),
        })
    }

    fn copy_rows(src: &RawFrame, dst: &mut RawFrame) {
        for p in 0..src.plane_count() {
            for y in 0..src.rows(p) {
                dst.row_mut(p, y).copy_from_slice(src.row(p, y));
            }
        }
    }

    /// Same format, other size: pick the nearest sample of every plane.
    fn resample(&self, src: &RawFrame, dst: &mut RawFrame) {
        let format = src.format();
        for p in 0..src.plane_count() {
            let size = format.sample_size(p);
            let (src_w, src_h) = format.plane_dims(p, src.width(), src.height());
            let (dst_w, dst_h) = format.plane_dims(p, dst.width(), dst.height());
            for y in 0..dst_h {
                let sy = y * src_h / dst_h;
                let src_row = src.row(p, sy);
                let dst_row = dst.row_mut(p, y);
                for x in 0..dst_w {
                    let sx = x * src_w / dst_w;
                    dst_row[x * size..(x + 1) * size]
                        .copy_from_slice(&src_row[sx * size..(sx + 1) * size]);
                }
            }
        }
    }

    fn to_rgb(&self, src: &RawFrame, dst: &mut RawFrame) {
        let format = dst.format();
        let size = format.sample_size(0);
        for y in 0..dst.rows(0) {
            let sy = self.y_map[y];
            let row = dst.row_mut(0, y);
            for (x, out) in row.chunks_exact_mut(size).enumerate() {
                let [r, g, b] = read_pixel(src, self.x_map[x], sy, false);
                match format {
                    PixelFormat::Bgr24 => out.copy_from_slice(&[b, g, r]),
                    PixelFormat::Bgr0 => out.copy_from_slice(&[b, g, r, 255]),
                    PixelFormat::Rgba => out.copy_from_slice(&[r, g, b, 255]),
                    _ => out.copy_from_slice(&[r, g, b]),
                }
            }
        }
    }

    fn to_yuv(&self, src: &RawFrame, dst: &mut RawFrame) {
        let format = dst.format();
        for y in 0..dst.rows(0) {
            let sy = self.y_map[y];
            let row = dst.row_mut(0, y);
            for (x, out) in row.iter_mut().enumerate() {
                *out = read_pixel(src, self.x_map[x], sy, true)[0];
            }
        }
        if format == PixelFormat::Gray8 {
            return;
        }

        // Chroma comes from the top-left pixel of each subsampled block.
        let (shift_x, shift_y) = format.chroma_shift();
        let (chroma_w, chroma_h) = format.plane_dims(1, dst.width(), dst.height());
        for cy in 0..chroma_h {
            let sy = self.y_map[cy << shift_y];
            for cx in 0..chroma_w {
                let [_, u, v] = read_pixel(src, self.x_map[cx << shift_x], sy, true);
                if format == PixelFormat::Nv12 {
                    let row = dst.row_mut(1, cy);
                    row[2 * cx] = u;
                    row[2 * cx + 1] = v;
                } else {
                    dst.row_mut(1, cy)[cx] = u;
                    dst.row_mut(2, cy)[cx] = v;
                }
            }
        }
    }
}

impl PixelConverter for SoftwareScaler {
    fn plan(&self) -> ConversionPlan {
        self.plan
    }

    fn convert(&mut self, src: &RawFrame, dst: &mut RawFrame) -> Result<()> {
        self.plan.check(src, dst)?;
        if self.plan.is_identity() {
            Self::copy_rows(src, dst);
        } else if self.plan.src.format == self.plan.dst.format {
            self.resample(src, dst);
        } else if self.plan.dst.format.is_yuv() {
            self.to_yuv(src, dst);
        } else {
            self.to_rgb(src, dst);
        }
        Ok(())
    }
}

/// Which implementation a [`FrameConverter`] builds its plans with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScalerBackend {
    #[default]
    Software,
    /// libswscale, bicubic.
    #[cfg(feature = "ffmpeg")]
    Swscale,
}

pub fn build_converter(backend: ScalerBackend, plan: ConversionPlan) -> Result<Box<dyn PixelConverter>> {
    match backend {
        ScalerBackend::Software => Ok(Box::new(SoftwareScaler::new(plan)?)),
        #[cfg(feature = "ffmpeg")]
        ScalerBackend::Swscale => Ok(Box::new(SwsScaler::new(plan)?)),
    }
}

/// Conversion stage between a decoder and a consumer, or a producer and an
/// encoder.
///
/// Pictures already in the target layout pass through untouched. When the
/// source layout changes mid-stream the plan is rebuilt.
pub struct FrameConverter {
    backend: ScalerBackend,
    target_format: PixelFormat,
    target_size: Option<(u32, u32)>,
    converter: Option<Box<dyn PixelConverter>>,
    output: RawFrame,
    rebuilds: u64,
}

impl FrameConverter {
    pub fn new(backend: ScalerBackend, target_format: PixelFormat, target_size: Option<(u32, u32)>) -> Self {
        Self {
            backend,
            target_format,
            target_size,
            converter: None,
            output: RawFrame::empty(),
            rebuilds: 0,
        }
    }

    /// Converter to exactly `target`.
    pub fn to_spec(backend: ScalerBackend, target: FrameSpec) -> Self {
        Self::new(backend, target.format, Some((target.width, target.height)))
    }

    pub fn target_for(&self, src: FrameSpec) -> FrameSpec {
        let (width, height) = self.target_size.unwrap_or((src.width, src.height));
        FrameSpec::new(self.target_format, width, height)
    }

    /// Number of plans built so far.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    pub fn process<'a>(&'a mut self, src: &'a RawFrame) -> Result<&'a RawFrame> {
        let target = self.target_for(src.spec());
        if target == src.spec() {
            return Ok(src);
        }

        let plan = ConversionPlan::new(src.spec(), target);
        if self.converter.as_ref().is_none_or(|c| c.plan() != plan) {
            if self.converter.is_some() {
                log::info!("source changed to {}, rebuilding conversion", src.spec());
            } else {
                log::info!("conversion {} -> {}", plan.src, plan.dst);
            }
            self.converter = Some(build_converter(self.backend, plan)?);
            self.output.reshape(target);
            self.rebuilds += 1;
        }
        if let Some(converter) = self.converter.as_mut() {
            converter.convert(src, &mut self.output)?;
        }
        self.output.set_pts(src.pts());
        self.output.set_key(src.is_key());
        Ok(&self.output)
    }
}

#[cfg(feature = "ffmpeg")]
pub use sws::SwsScaler;

#[cfg(feature = "ffmpeg")]
mod sws {
    use ffmpeg_next::software::scaling;

    use super::{ConversionPlan, PixelConverter};
    use crate::{
        error::{Error, Result},
        frame::RawFrame,
    };

    /// libswscale context bound to one plan.
    pub struct SwsScaler {
        plan: ConversionPlan,
        context: scaling::Context,
    }

    impl SwsScaler {
        pub fn new(plan: ConversionPlan) -> Result<Self> {
            let context = scaling::Context::get(
                plan.src.format.into(),
                plan.src.width,
                plan.src.height,
                plan.dst.format.into(),
                plan.dst.width,
                plan.dst.height,
                scaling::Flags::BICUBIC,
            )
            .map_err(|e| Error::setup(&format!("scaler {} -> {}", plan.src, plan.dst), e))?;
            Ok(Self { plan, context })
        }
    }

    impl PixelConverter for SwsScaler {
        fn plan(&self) -> ConversionPlan {
            self.plan
        }

        fn convert(&mut self, src: &RawFrame, dst: &mut RawFrame) -> Result<()> {
            self.plan.check(src, dst)?;
            let mut src_data = [std::ptr::null::<u8>(); 4];
            let mut src_stride = [0i32; 4];
            for p in 0..src.plane_count() {
                src_data[p] = src.data(p).as_ptr();
                src_stride[p] = src.linesize(p) as i32;
            }
            let mut dst_data = [std::ptr::null_mut::<u8>(); 4];
            let mut dst_stride = [0i32; 4];
            for p in 0..dst.plane_count() {
                dst_stride[p] = dst.linesize(p) as i32;
                dst_data[p] = dst.data_mut(p).as_mut_ptr();
            }
            let rows = unsafe {
                ffmpeg_next::ffi::sws_scale(
                    self.context.as_mut_ptr(),
                    src_data.as_ptr(),
                    src_stride.as_ptr(),
                    0,
                    self.plan.src.height as i32,
                    dst_data.as_ptr(),
                    dst_stride.as_ptr(),
                )
            };
            if rows < 0 {
                return Err(Error::codec("sws_scale", ffmpeg_next::Error::from(rows)));
            }
            Ok(())
        }
    }

    unsafe impl Send for SwsScaler {}
}

#[cfg(test)]
#[path = "scaler_test.rs"]
mod scaler_test;

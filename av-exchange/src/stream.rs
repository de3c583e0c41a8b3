use crate::{
    error::{Error, Result},
    frame::{FrameSpec, PixelFormat},
    timebase::TimeBase,
};

/// Metadata of the selected video stream, queried once at setup.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub index: usize,
    /// Codec name, e.g. "h264", "mjpeg", "rawvideo".
    pub codec_name: String,
    pub time_base: TimeBase,
    /// Average frames per second as `(num, den)`; `None` if the container does not say.
    pub frame_rate: Option<(i32, i32)>,
    pub width: u32,
    pub height: u32,
    pub format: Option<PixelFormat>,
}

impl StreamInfo {
    /// Picture layout the stream decodes to.
    pub fn spec(&self) -> Result<FrameSpec> {
        match self.format {
            Some(format) if self.width > 0 && self.height > 0 => {
                Ok(FrameSpec::new(format, self.width, self.height))
            }
            _ => Err(Error::Setup(format!(
                "stream {} ({}) is missing picture parameters",
                self.index, self.codec_name
            ))),
        }
    }

    pub fn fps(&self) -> Option<f32> {
        self.frame_rate
            .filter(|(num, den)| *num > 0 && *den > 0)
            .map(|(num, den)| num as f32 / den as f32)
    }
}

#[cfg(feature = "ffmpeg")]
impl StreamInfo {
    pub(crate) fn from_stream(stream: &ffmpeg_next::format::stream::Stream<'_>) -> Self {
        let parameters = stream.parameters();
        let codec_name = parameters.id().name().to_string();
        let (width, height) = unsafe {
            let ptr = parameters.as_ptr();
            ((*ptr).width.max(0) as u32, (*ptr).height.max(0) as u32)
        };
        // Opening a decoder is the only safe way to read the pixel format back.
        let format = ffmpeg_next::codec::Context::from_parameters(parameters)
            .and_then(|ctx| ctx.decoder().video())
            .ok()
            .and_then(|decoder| PixelFormat::try_from(decoder.format()).ok());
        let rate = stream.avg_frame_rate();
        Self {
            index: stream.index(),
            codec_name,
            time_base: stream.time_base().into(),
            frame_rate: (rate.denominator() != 0).then(|| (rate.numerator(), rate.denominator())),
            width,
            height,
            format,
        }
    }
}

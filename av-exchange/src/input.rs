use std::ffi::CString;
use std::path::Path;
use std::time::Duration;

use ffmpeg_next::Dictionary;
use tokio_util::sync::CancellationToken;

use crate::{
    container::{Demuxer, poll_ready},
    exchange::Drain,
    error::{Error, Result},
    packet::CodedUnit,
    stream::StreamInfo,
};

/// Demuxer over a file, URL or capture device, reading the best video stream.
pub struct AvInput {
    inner: ffmpeg_next::format::context::Input,
    stream: StreamInfo,
    parameters: ffmpeg_next::codec::Parameters,
    cancel: CancellationToken,
}

/// Wait between reads while a non-blocking device has no picture.
const RETRY_INTERVAL: Duration = Duration::from_millis(1);

impl AvInput {
    /// Resolve input format by name (e.g. "x11grab", "v4l2") via FFmpeg's av_find_input_format.
    fn find_input_format(name: &str) -> Result<ffmpeg_next::format::format::Input> {
        let cname = CString::new(name)
            .map_err(|e| Error::setup(&format!("invalid format name {:?}", name), e))?;
        let ptr = unsafe { ffmpeg_next::ffi::av_find_input_format(cname.as_ptr()) };
        if ptr.is_null() {
            return Err(Error::Setup(format!("input format not found: {}", name)));
        }
        Ok(unsafe { ffmpeg_next::format::format::Input::wrap(ptr as *mut _) })
    }

    pub fn open(url: &str, format: Option<&str>, options: &[(String, String)]) -> Result<Self> {
        use ffmpeg_next::format::format::Format;

        let mut opts = Dictionary::new();
        for (key, value) in options {
            opts.set(key, value);
        }
        let path = Path::new(url);
        let input = match format {
            Some(name) => {
                let fmt = Self::find_input_format(name)?;
                ffmpeg_next::format::open_with(path, &Format::Input(fmt), opts)
                    .map_err(|e| Error::setup(&format!("open {} ({})", url, name), e))?
                    .input()
            }
            None => ffmpeg_next::format::input_with_dictionary(path, opts)
                .map_err(|e| Error::setup(&format!("open {}", url), e))?,
        };

        let (stream, parameters) = {
            let selected = input
                .streams()
                .best(ffmpeg_next::media::Type::Video)
                .ok_or_else(|| Error::Setup(format!("no video stream in {}", url)))?;
            (StreamInfo::from_stream(&selected), selected.parameters())
        };
        log::info!(
            "opened {}: stream {} {} {}x{} time base {}",
            url,
            stream.index,
            stream.codec_name,
            stream.width,
            stream.height,
            stream.time_base
        );

        Ok(Self {
            inner: input,
            stream,
            parameters,
            cancel: CancellationToken::new(),
        })
    }

    /// Stop waiting on a device that keeps reporting EAGAIN once `cancel`
    /// fires; the input then reads as exhausted.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Codec parameters of the selected stream, for opening its decoder.
    pub fn parameters(&self) -> &ffmpeg_next::codec::Parameters {
        &self.parameters
    }
}

impl Demuxer for AvInput {
    fn stream(&self) -> &StreamInfo {
        &self.stream
    }

    fn next_unit(&mut self) -> Result<Option<CodedUnit>> {
        let mut packet = ffmpeg_next::codec::packet::Packet::empty();
        let index = self.stream.index;
        let time_base = self.stream.time_base;
        let inner = &mut self.inner;
        poll_ready(&self.cancel, RETRY_INTERVAL, || loop {
            match packet.read(inner) {
                Ok(()) if packet.stream() == index => {
                    return Ok(Drain::Ready(CodedUnit::from_packet(&packet, time_base)));
                }
                Ok(()) => continue,
                Err(ffmpeg_next::Error::Eof) => return Ok(Drain::EndOfStream),
                // Non-blocking devices report EAGAIN until the next picture is ready.
                Err(ffmpeg_next::Error::Other { errno })
                    if errno == ffmpeg_next::util::error::EAGAIN =>
                {
                    return Ok(Drain::WouldBlock);
                }
                Err(err) => return Err(Error::codec("read packet", err)),
            }
        })
    }
}

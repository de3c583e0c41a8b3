use std::path::Path;

use crate::{
    container::Muxer,
    encoder::FfmpegEncoder,
    error::{Error, Result},
    exchange::VideoEncoder,
    packet::CodedUnit,
    timebase::TimeBase,
};

/// Single-video-stream container writer. The format follows the file name.
pub struct AvOutput {
    inner: ffmpeg_next::format::context::Output,
    url: String,
    stream_index: usize,
    time_base: TimeBase,
    have_written_header: bool,
    have_written_trailer: bool,
}

impl AvOutput {
    pub fn create(path: &Path) -> Result<Self> {
        let url = path.display().to_string();
        let output = ffmpeg_next::format::output(path)
            .map_err(|e| Error::setup(&format!("create {}", url), e))?;
        Ok(Self {
            inner: output,
            url,
            stream_index: 0,
            time_base: TimeBase::MILLISECONDS,
            have_written_header: false,
            have_written_trailer: false,
        })
    }

    /// The container keeps codec headers out of band; open the encoder with
    /// its global-header flag set.
    pub fn needs_global_header(&self) -> bool {
        self.inner
            .format()
            .flags()
            .contains(ffmpeg_next::format::Flags::GLOBAL_HEADER)
    }

    /// Add the encoder's stream and write the header. The container may
    /// choose its own stream time base; [`Muxer::stream_time_base`] reports
    /// the one it settled on.
    pub fn add_video_stream(&mut self, encoder: &FfmpegEncoder) -> Result<()> {
        if self.have_written_header {
            return Err(Error::Setup(format!("{} already has its stream", self.url)));
        }
        let mut writer_stream = self
            .inner
            .add_stream(ffmpeg_next::encoder::find(encoder.codec_id()))
            .map_err(|e| Error::setup("add stream", e))?;
        writer_stream.set_parameters(encoder.context());
        writer_stream.set_time_base(ffmpeg_next::Rational::from(encoder.time_base()));
        self.stream_index = writer_stream.index();

        self.inner
            .write_header()
            .map_err(|e| Error::setup(&format!("write header to {}", self.url), e))?;
        self.have_written_header = true;

        let time_base = self
            .inner
            .stream(self.stream_index)
            .map(|stream| TimeBase::from(stream.time_base()))
            .ok_or_else(|| Error::Setup("output stream vanished".to_string()))?;
        self.time_base = time_base;
        log::info!(
            "writing {} stream {} in time base {}",
            self.url,
            self.stream_index,
            self.time_base
        );
        Ok(())
    }
}

impl Muxer for AvOutput {
    fn stream_time_base(&self) -> TimeBase {
        self.time_base
    }

    fn stream_index(&self) -> usize {
        self.stream_index
    }

    fn write(&mut self, unit: CodedUnit) -> Result<()> {
        if !self.have_written_header || self.have_written_trailer {
            return Err(Error::Sink(format!("{} is not accepting packets", self.url)));
        }
        let mut packet = unit.to_packet();
        packet.set_stream(self.stream_index);
        packet.set_position(-1);
        packet
            .write_interleaved(&mut self.inner)
            .map_err(|e| Error::sink(&format!("write to {}", self.url), e))
    }

    fn finish(&mut self) -> Result<()> {
        if self.have_written_header && !self.have_written_trailer {
            self.have_written_trailer = true;
            self.inner
                .write_trailer()
                .map_err(|e| Error::sink(&format!("write trailer to {}", self.url), e))?;
            log::info!("finished {}", self.url);
        }
        Ok(())
    }
}

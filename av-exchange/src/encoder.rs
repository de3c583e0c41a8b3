use crate::{
    container::Muxer,
    error::{Error, Result},
    exchange::{Drain, DrainOutcome, ExchangeState, ExchangeStats, Protocol, VideoEncoder},
    frame::RawFrame,
    packet::CodedUnit,
    timebase::{TimeBase, rescale},
};

/// Drives a [`VideoEncoder`] through submit/drain and hands drained units,
/// already in the output stream's time base, to the muxer.
pub struct EncodeExchange<E: VideoEncoder> {
    encoder: E,
    protocol: Protocol,
    output_time_base: TimeBase,
    stream_index: usize,
    last_pts: Option<i64>,
    last_dts: Option<i64>,
}

impl<E: VideoEncoder> EncodeExchange<E> {
    pub fn new(encoder: E, output_time_base: TimeBase, stream_index: usize) -> Self {
        log::info!(
            "encode exchange opened: {}, {}, codec time base {}, stream time base {}",
            encoder.name(),
            encoder.spec(),
            encoder.time_base(),
            output_time_base
        );
        Self {
            encoder,
            protocol: Protocol::new("encoder"),
            output_time_base,
            stream_index,
            last_pts: None,
            last_dts: None,
        }
    }

    pub fn state(&self) -> ExchangeState {
        self.protocol.state()
    }

    pub fn stats(&self) -> ExchangeStats {
        self.protocol.stats()
    }

    /// Codec time base; submitted frame timestamps are in this base.
    pub fn time_base(&self) -> TimeBase {
        self.encoder.time_base()
    }

    pub fn output_time_base(&self) -> TimeBase {
        self.output_time_base
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    /// Timestamp of input frame `index` when each frame lasts one tick of
    /// `frame_duration`, expressed in the codec time base.
    pub fn pts_for_index(&self, index: i64, frame_duration: TimeBase) -> i64 {
        rescale(index, frame_duration, self.encoder.time_base())
    }

    /// Submit a picture, or `None` to start the flush.
    ///
    /// The frame must match the encoder's picture layout and carry a pts above
    /// the previous submission's; neither is corrected here.
    pub fn submit(&mut self, frame: Option<&RawFrame>) -> Result<()> {
        self.protocol.check_submit()?;
        if let Some(frame) = frame {
            let spec = self.encoder.spec();
            if frame.spec() != spec {
                return Err(Error::Setup(format!(
                    "frame {} does not match encoder input {}",
                    frame.spec(),
                    spec
                )));
            }
            let pts = frame.pts().ok_or_else(|| {
                Error::InvalidState("frame submitted without a timestamp".to_string())
            })?;
            if let Some(previous) = self.last_pts {
                if pts <= previous {
                    return Err(Error::Timestamp {
                        previous,
                        current: pts,
                    });
                }
            }
        }

        self.protocol.begin_submit(frame.is_none())?;
        if let Err(err) = self.encoder.send_frame(frame) {
            log::error!("encoder rejected submission: {}", err);
            self.protocol.fail();
            return Err(err);
        }
        if let Some(frame) = frame {
            self.last_pts = frame.pts();
        }
        Ok(())
    }

    /// Request the next coded unit, rescaled to the output stream time base.
    pub fn drain(&mut self) -> Result<Drain<CodedUnit>> {
        self.protocol.check_drain()?;
        let result = self.encoder.receive_unit();
        match self.protocol.finish_drain(result)? {
            Drain::Ready(mut unit) => {
                unit.rescale(self.output_time_base);
                unit.set_stream_index(self.stream_index);
                if let (Some(previous), Some(dts)) = (self.last_dts, unit.dts()) {
                    if dts < previous {
                        log::warn!("encoder produced decreasing dts {} after {}", dts, previous);
                    }
                }
                if unit.dts().is_some() {
                    self.last_dts = unit.dts();
                }
                Ok(Drain::Ready(unit))
            }
            Drain::WouldBlock => Ok(Drain::WouldBlock),
            Drain::EndOfStream => Ok(Drain::EndOfStream),
        }
    }

    /// Drain until the encoder needs input or has flushed, writing every unit
    /// to `muxer`. A failed write is fatal and returned immediately.
    pub fn drain_into<M: Muxer + ?Sized>(&mut self, muxer: &mut M) -> Result<DrainOutcome> {
        let mut outcome = DrainOutcome::default();
        loop {
            match self.drain()? {
                Drain::Ready(unit) => {
                    muxer.write(unit)?;
                    outcome.produced += 1;
                }
                Drain::WouldBlock => return Ok(outcome),
                Drain::EndOfStream => {
                    outcome.finished = true;
                    return Ok(outcome);
                }
            }
        }
    }

    /// Release the exchange and hand back the encoder.
    pub fn close(self) -> E {
        let stats = self.protocol.stats();
        log::info!(
            "encode exchange closed: {} frames in, {} units out, state {:?}",
            stats.submitted,
            stats.drained,
            self.protocol.state()
        );
        self.encoder
    }
}

#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegEncoder;

#[cfg(feature = "ffmpeg")]
mod ffmpeg {
    use ffmpeg_next::{Dictionary, codec::encoder};

    use crate::{
        error::{Error, Result},
        exchange::{Drain, VideoEncoder},
        frame::{FrameSpec, RawFrame},
        packet::CodedUnit,
        settings::EncodeSettings,
        timebase::{TimeBase, rescale},
    };

    /// libavcodec video encoder, H.264 unless the settings name another one.
    pub struct FfmpegEncoder {
        inner: encoder::Video,
        name: String,
        codec_id: ffmpeg_next::codec::Id,
        spec: FrameSpec,
        time_base: TimeBase,
        frame_ticks: i64,
        scratch: ffmpeg_next::frame::Video,
    }

    fn find_encoder(name: &str) -> Result<ffmpeg_next::Codec> {
        ffmpeg_next::encoder::find_by_name(name)
            .or_else(|| match name {
                "h264" => ffmpeg_next::encoder::find(ffmpeg_next::codec::Id::H264),
                _ => None,
            })
            .ok_or_else(|| Error::Setup(format!("encoder not found: {}", name)))
    }

    impl FfmpegEncoder {
        /// Open the encoder. `global_header` is set when the output container
        /// keeps codec headers out of band (Matroska, MP4).
        pub fn open(settings: &EncodeSettings, global_header: bool) -> Result<Self> {
            let codec = find_encoder(&settings.codec)?;
            let name = codec.name().to_string();
            let codec_id = codec.id();
            let spec = settings.spec();

            let encoder_context = ffmpeg_next::codec::Context::new_with_codec(codec);
            let mut encoder = encoder_context
                .encoder()
                .video()
                .map_err(|e| Error::setup("encoder context", e))?;
            encoder.set_width(spec.width);
            encoder.set_height(spec.height);
            encoder.set_format(spec.format.into());
            encoder.set_time_base(ffmpeg_next::Rational::from(settings.time_base()));
            encoder.set_frame_rate(Some(ffmpeg_next::Rational::new(settings.fps as i32, 1)));
            encoder.set_bit_rate(settings.bit_rate as usize);
            encoder.set_gop(settings.gop);
            encoder.set_max_b_frames(settings.max_b_frames as usize);
            if global_header {
                unsafe {
                    (*encoder.as_mut_ptr()).flags |=
                        ffmpeg_next::ffi::AV_CODEC_FLAG_GLOBAL_HEADER as i32;
                }
            }

            let mut opts = Dictionary::new();
            if !settings.profile.is_empty() {
                opts.set("profile", &settings.profile);
            }
            let encoder = encoder
                .open_with(opts)
                .map_err(|e| Error::setup(&format!("open encoder {}", name), e))?;
            log::info!("encoder opened successfully: {}", name);

            let time_base: ffmpeg_next::Rational = unsafe { (*encoder.0.as_ptr()).time_base.into() };
            let time_base = TimeBase::from(time_base);
            let frame_ticks = rescale(1, settings.time_base(), time_base).max(1);

            Ok(Self {
                inner: encoder,
                name,
                codec_id,
                spec,
                time_base,
                frame_ticks,
                scratch: ffmpeg_next::frame::Video::new(spec.format.into(), spec.width, spec.height),
            })
        }

        pub fn codec_id(&self) -> ffmpeg_next::codec::Id {
            self.codec_id
        }

        pub(crate) fn context(&self) -> &encoder::Video {
            &self.inner
        }
    }

    impl VideoEncoder for FfmpegEncoder {
        fn name(&self) -> &str {
            &self.name
        }

        fn time_base(&self) -> TimeBase {
            self.time_base
        }

        fn spec(&self) -> FrameSpec {
            self.spec
        }

        fn send_frame(&mut self, frame: Option<&RawFrame>) -> Result<()> {
            let Some(frame) = frame else {
                return self
                    .inner
                    .send_eof()
                    .map_err(|e| Error::codec("send eof", e));
            };
            // The encoder may still reference the previous picture's buffers.
            let ret = unsafe { ffmpeg_next::ffi::av_frame_make_writable(self.scratch.as_mut_ptr()) };
            if ret < 0 {
                return Err(Error::codec("make frame writable", ffmpeg_next::Error::from(ret)));
            }
            frame.copy_to_video(&mut self.scratch)?;
            self.inner
                .send_frame(&self.scratch)
                .map_err(|e| Error::codec("send frame", e))
        }

        fn receive_unit(&mut self) -> Result<Drain<CodedUnit>> {
            let mut packet = ffmpeg_next::codec::packet::Packet::empty();
            match self.inner.receive_packet(&mut packet) {
                Ok(()) => {
                    let mut unit = CodedUnit::from_packet(&packet, self.time_base);
                    if unit.duration() == 0 {
                        unit = unit.with_duration(self.frame_ticks);
                    }
                    Ok(Drain::Ready(unit))
                }
                Err(ffmpeg_next::Error::Eof) => Ok(Drain::EndOfStream),
                Err(ffmpeg_next::Error::Other { errno })
                    if errno == ffmpeg_next::util::error::EAGAIN =>
                {
                    Ok(Drain::WouldBlock)
                }
                Err(err) => Err(Error::codec("receive packet", err)),
            }
        }
    }
}

#[cfg(test)]
#[path = "encoder_test.rs"]
mod encoder_test;

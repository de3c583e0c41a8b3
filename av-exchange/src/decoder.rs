use std::ops::Deref;

use crate::{
    error::Result,
    exchange::{Drain, DrainOutcome, ExchangeState, ExchangeStats, Protocol, VideoDecoder},
    frame::RawFrame,
    packet::CodedUnit,
    timebase::{TimeBase, rescale_opt},
};

/// A decoded picture lent out of the exchange's frame slot.
///
/// The borrow ends before the next drain can start, so a consumer cannot hold
/// on to a picture that the decoder is about to overwrite.
pub struct DecodedFrame<'a> {
    frame: &'a RawFrame,
    generation: u64,
    time_base: TimeBase,
}

impl<'a> DecodedFrame<'a> {
    pub fn frame(&self) -> &'a RawFrame {
        self.frame
    }

    /// Increments on every picture written into the slot.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Best-effort timestamp in the decoder time base.
    pub fn pts(&self) -> Option<i64> {
        self.frame.pts()
    }

    pub fn time_base(&self) -> TimeBase {
        self.time_base
    }

    pub fn pts_in(&self, to: TimeBase) -> Option<i64> {
        rescale_opt(self.frame.pts(), self.time_base, to)
    }

    pub fn timestamp_ms(&self) -> Option<i64> {
        self.pts_in(TimeBase::MILLISECONDS)
    }
}

impl Deref for DecodedFrame<'_> {
    type Target = RawFrame;

    fn deref(&self) -> &RawFrame {
        self.frame
    }
}

/// Drives a [`VideoDecoder`] through submit/drain and owns the decoded-frame slot.
pub struct DecodeExchange<D: VideoDecoder> {
    decoder: D,
    protocol: Protocol,
    slot: RawFrame,
    generation: u64,
}

impl<D: VideoDecoder> DecodeExchange<D> {
    pub fn new(decoder: D) -> Self {
        log::info!(
            "decode exchange opened: {}, time base {}",
            decoder.name(),
            decoder.time_base()
        );
        Self {
            decoder,
            protocol: Protocol::new("decoder"),
            slot: RawFrame::empty(),
            generation: 0,
        }
    }

    pub fn state(&self) -> ExchangeState {
        self.protocol.state()
    }

    pub fn stats(&self) -> ExchangeStats {
        self.protocol.stats()
    }

    pub fn time_base(&self) -> TimeBase {
        self.decoder.time_base()
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    /// Submit a coded unit, or `None` to start the flush.
    ///
    /// Unit timestamps are moved into the decoder time base first. The unit is
    /// released once the decoder has taken it. A rejected unit closes the
    /// exchange.
    pub fn submit(&mut self, unit: Option<CodedUnit>) -> Result<()> {
        self.protocol.begin_submit(unit.is_none())?;
        let result = match unit {
            Some(mut unit) => {
                unit.rescale(self.decoder.time_base());
                self.decoder.send_unit(Some(&unit))
            }
            None => self.decoder.send_unit(None),
        };
        if let Err(err) = result {
            log::error!("decoder rejected submission: {}", err);
            self.protocol.fail();
            return Err(err);
        }
        Ok(())
    }

    /// Request the next decoded picture.
    pub fn drain(&mut self) -> Result<Drain<DecodedFrame<'_>>> {
        self.protocol.check_drain()?;
        let result = self.decoder.receive_frame(&mut self.slot);
        let drained = self.protocol.finish_drain(result)?;
        if drained.is_ready() {
            self.generation += 1;
        }
        let time_base = self.decoder.time_base();
        let generation = self.generation;
        let slot = &self.slot;
        Ok(drained.map(|()| DecodedFrame {
            frame: slot,
            generation,
            time_base,
        }))
    }

    /// Drain until the decoder needs input or has flushed, handing each
    /// picture to `consume` before the next one is decoded.
    pub fn drain_with<F>(&mut self, mut consume: F) -> Result<DrainOutcome>
    where
        F: FnMut(DecodedFrame<'_>) -> Result<()>,
    {
        let mut outcome = DrainOutcome::default();
        loop {
            match self.drain()? {
                Drain::Ready(frame) => {
                    consume(frame)?;
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

    /// Release the exchange and hand back the decoder.
    pub fn close(self) -> D {
        let stats = self.protocol.stats();
        log::info!(
            "decode exchange closed: {} units in, {} frames out, state {:?}",
            stats.submitted,
            stats.drained,
            self.protocol.state()
        );
        self.decoder
    }
}

#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegDecoder;

#[cfg(feature = "ffmpeg")]
mod ffmpeg {
    use ffmpeg_next::codec::decoder;

    use crate::{
        error::{Error, Result},
        exchange::{Drain, VideoDecoder},
        frame::RawFrame,
        packet::CodedUnit,
        stream::StreamInfo,
        timebase::TimeBase,
    };

    /// libavcodec video decoder.
    pub struct FfmpegDecoder {
        inner: decoder::Video,
        name: String,
        time_base: TimeBase,
        scratch: ffmpeg_next::frame::Video,
    }

    impl FfmpegDecoder {
        /// Open a decoder for a demuxed stream. The decoder works in the
        /// stream's time base.
        pub fn new(
            stream: &StreamInfo,
            parameters: &ffmpeg_next::codec::Parameters,
        ) -> Result<Self> {
            let mut decoder_ctx = ffmpeg_next::codec::Context::new();
            decoder_ctx
                .set_parameters(parameters.clone())
                .map_err(|e| Error::setup("decoder parameters", e))?;
            unsafe {
                let ctx = decoder_ctx.as_mut_ptr();
                let time_base: ffmpeg_next::Rational = stream.time_base.into();
                (*ctx).time_base = time_base.into();
                (*ctx).pkt_timebase = time_base.into();
            }
            let video_decoder = decoder_ctx
                .decoder()
                .video()
                .map_err(|e| Error::setup(&format!("open {} decoder", stream.codec_name), e))?;

            if video_decoder.format() == ffmpeg_next::format::Pixel::None
                || video_decoder.width() == 0
                || video_decoder.height() == 0
            {
                return Err(Error::Setup("missing codec parameters".to_string()));
            }

            Ok(Self {
                inner: video_decoder,
                name: stream.codec_name.clone(),
                time_base: stream.time_base,
                scratch: ffmpeg_next::frame::Video::empty(),
            })
        }
    }

    impl VideoDecoder for FfmpegDecoder {
        fn name(&self) -> &str {
            &self.name
        }

        fn time_base(&self) -> TimeBase {
            self.time_base
        }

        fn send_unit(&mut self, unit: Option<&CodedUnit>) -> Result<()> {
            match unit {
                Some(unit) => self
                    .inner
                    .send_packet(&unit.to_packet())
                    .map_err(|e| Error::codec("send packet", e)),
                None => self
                    .inner
                    .send_eof()
                    .map_err(|e| Error::codec("send eof", e)),
            }
        }

        fn receive_frame(&mut self, frame: &mut RawFrame) -> Result<Drain<()>> {
            match self.inner.receive_frame(&mut self.scratch) {
                Ok(()) => {
                    frame.copy_from_video(&self.scratch)?;
                    Ok(Drain::Ready(()))
                }
                Err(ffmpeg_next::Error::Eof) => Ok(Drain::EndOfStream),
                Err(ffmpeg_next::Error::Other { errno })
                    if errno == ffmpeg_next::util::error::EAGAIN =>
                {
                    Ok(Drain::WouldBlock)
                }
                Err(err) => Err(Error::codec("receive frame", err)),
            }
        }
    }
}

#[cfg(test)]
#[path = "decoder_test.rs"]
mod decoder_test;

//! Uncompressed reference codec.
//!
//! A coded unit is simply the picture with its planes packed row after row.
//! Both directions hold back `delay` pictures before producing output, the
//! way a real codec with B-frames or a reorder buffer does, so the exchange
//! loops see the same `WouldBlock`/flush behaviour as with libavcodec.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::{
    error::{Error, Result},
    exchange::{Drain, VideoDecoder, VideoEncoder},
    frame::{FrameSpec, RawFrame},
    packet::CodedUnit,
    settings::EncodeSettings,
    stream::StreamInfo,
    timebase::TimeBase,
};

pub const CODEC_NAME: &str = "rawvideo";

pub struct RawVideoEncoder {
    spec: FrameSpec,
    time_base: TimeBase,
    delay: usize,
    gop: u32,
    frame_duration: i64,
    submitted: u64,
    pending: VecDeque<CodedUnit>,
    ready: VecDeque<CodedUnit>,
    flushing: bool,
}

impl RawVideoEncoder {
    pub fn new(spec: FrameSpec, time_base: TimeBase, delay: usize, gop: u32) -> Self {
        Self {
            spec,
            time_base,
            delay,
            gop: gop.max(1),
            frame_duration: 1,
            submitted: 0,
            pending: VecDeque::with_capacity(delay + 1),
            ready: VecDeque::new(),
            flushing: false,
        }
    }

    /// Codec time base of one tick per frame, holding back `max_b_frames`
    /// pictures.
    pub fn from_settings(settings: &EncodeSettings) -> Self {
        Self::new(
            settings.spec(),
            settings.time_base(),
            settings.max_b_frames as usize,
            settings.gop,
        )
    }

    pub fn delay(&self) -> usize {
        self.delay
    }
}

impl VideoEncoder for RawVideoEncoder {
    fn name(&self) -> &str {
        CODEC_NAME
    }

    fn time_base(&self) -> TimeBase {
        self.time_base
    }

    fn spec(&self) -> FrameSpec {
        self.spec
    }

    fn send_frame(&mut self, frame: Option<&RawFrame>) -> Result<()> {
        if self.flushing {
            return Err(Error::Codec("rawvideo: input after flush".to_string()));
        }
        let Some(frame) = frame else {
            self.flushing = true;
            self.ready.extend(self.pending.drain(..));
            return Ok(());
        };
        if frame.spec() != self.spec {
            return Err(Error::Codec(format!(
                "rawvideo: expected {}, got {}",
                self.spec,
                frame.spec()
            )));
        }

        let mut data = Vec::with_capacity(self.spec.packed_size());
        frame.write_packed(&mut data);
        let key = self.submitted % self.gop as u64 == 0;
        self.submitted += 1;
        let unit = CodedUnit::new(data, self.time_base)
            .with_pts(frame.pts())
            .with_dts(frame.pts())
            .with_duration(self.frame_duration)
            .with_key(key);
        self.pending.push_back(unit);
        while self.pending.len() > self.delay {
            if let Some(unit) = self.pending.pop_front() {
                self.ready.push_back(unit);
            }
        }
        Ok(())
    }

    fn receive_unit(&mut self) -> Result<Drain<CodedUnit>> {
        if let Some(unit) = self.ready.pop_front() {
            return Ok(Drain::Ready(unit));
        }
        if self.flushing {
            Ok(Drain::EndOfStream)
        } else {
            Ok(Drain::WouldBlock)
        }
    }
}

struct Picture {
    data: Bytes,
    pts: Option<i64>,
    key: bool,
}

pub struct RawVideoDecoder {
    spec: FrameSpec,
    time_base: TimeBase,
    delay: usize,
    pending: Vec<Picture>,
    flushing: bool,
}

impl RawVideoDecoder {
    pub fn new(spec: FrameSpec, time_base: TimeBase, delay: usize) -> Self {
        Self {
            spec,
            time_base,
            delay,
            pending: Vec::with_capacity(delay + 1),
            flushing: false,
        }
    }

    pub fn for_stream(stream: &StreamInfo, delay: usize) -> Result<Self> {
        if stream.codec_name != CODEC_NAME {
            return Err(Error::Setup(format!(
                "rawvideo decoder cannot read {} streams",
                stream.codec_name
            )));
        }
        Ok(Self::new(stream.spec()?, stream.time_base, delay))
    }

    /// Next picture in presentation order; pictures without a timestamp go first.
    fn take_earliest(&mut self) -> Option<Picture> {
        let index = self
            .pending
            .iter()
            .enumerate()
            .min_by_key(|(_, p)| p.pts.unwrap_or(i64::MIN))
            .map(|(i, _)| i)?;
        Some(self.pending.remove(index))
    }

    pub fn delay(&self) -> usize {
        self.delay
    }
}

impl VideoDecoder for RawVideoDecoder {
    fn name(&self) -> &str {
        CODEC_NAME
    }

    fn time_base(&self) -> TimeBase {
        self.time_base
    }

    fn send_unit(&mut self, unit: Option<&CodedUnit>) -> Result<()> {
        if self.flushing {
            return Err(Error::Codec("rawvideo: input after flush".to_string()));
        }
        let Some(unit) = unit else {
            self.flushing = true;
            return Ok(());
        };
        let expected = self.spec.packed_size();
        if unit.size() != expected {
            return Err(Error::Codec(format!(
                "rawvideo: malformed unit of {} bytes, {} needs {}",
                unit.size(),
                self.spec,
                expected
            )));
        }
        self.pending.push(Picture {
            data: unit.data().clone(),
            pts: unit.pts(),
            key: unit.is_key(),
        });
        Ok(())
    }

    fn receive_frame(&mut self, frame: &mut RawFrame) -> Result<Drain<()>> {
        let available = self.pending.len() > self.delay || (self.flushing && !self.pending.is_empty());
        if !available {
            return Ok(if self.flushing {
                Drain::EndOfStream
            } else {
                Drain::WouldBlock
            });
        }
        let Some(picture) = self.take_earliest() else {
            return Ok(Drain::WouldBlock);
        };
        frame.reshape(self.spec);
        frame.read_packed(&picture.data)?;
        frame.set_pts(picture.pts);
        frame.set_key(picture.key);
        Ok(Drain::Ready(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;

    fn spec() -> FrameSpec {
        FrameSpec::new(PixelFormat::Gray8, 4, 2)
    }

    fn frame(pts: i64) -> RawFrame {
        let mut frame = RawFrame::new(spec());
        frame.data_mut(0).fill(pts as u8);
        frame.set_pts(Some(pts));
        frame
    }

    #[test]
    fn test_encoder_holds_back_delay_frames() {
        let mut encoder = RawVideoEncoder::new(spec(), TimeBase::new(1, 30), 2, 60);
        encoder.send_frame(Some(&frame(0))).unwrap();
        assert!(matches!(encoder.receive_unit().unwrap(), Drain::WouldBlock));
        encoder.send_frame(Some(&frame(1))).unwrap();
        assert!(matches!(encoder.receive_unit().unwrap(), Drain::WouldBlock));
        encoder.send_frame(Some(&frame(2))).unwrap();
        match encoder.receive_unit().unwrap() {
            Drain::Ready(unit) => {
                assert_eq!(unit.pts(), Some(0));
                assert!(unit.is_key());
                assert_eq!(unit.size(), 8);
            }
            other => panic!("expected a unit, got {:?}", other),
        }

        encoder.send_frame(None).unwrap();
        let mut flushed = 0;
        while let Drain::Ready(unit) = encoder.receive_unit().unwrap() {
            assert!(!unit.is_key());
            flushed += 1;
        }
        assert_eq!(flushed, 2);
        assert!(matches!(encoder.receive_unit().unwrap(), Drain::EndOfStream));
        assert!(encoder.send_frame(Some(&frame(3))).is_err());
    }

    #[test]
    fn test_encoder_key_every_gop() {
        let mut encoder = RawVideoEncoder::new(spec(), TimeBase::new(1, 30), 0, 3);
        let keys: Vec<bool> = (0..7)
            .map(|i| {
                encoder.send_frame(Some(&frame(i))).unwrap();
                match encoder.receive_unit().unwrap() {
                    Drain::Ready(unit) => unit.is_key(),
                    other => panic!("expected a unit, got {:?}", other),
                }
            })
            .collect();
        assert_eq!(keys, vec![true, false, false, true, false, false, true]);
    }

    #[test]
    fn test_decoder_reorders_by_pts() {
        let mut decoder = RawVideoDecoder::new(spec(), TimeBase::new(1, 30), 1);
        let mut out = RawFrame::empty();
        let mut seen = Vec::new();
        for pts in [0, 2, 1, 3] {
            let mut data = Vec::new();
            frame(pts).write_packed(&mut data);
            let unit = CodedUnit::new(data, TimeBase::new(1, 30)).with_pts(Some(pts));
            decoder.send_unit(Some(&unit)).unwrap();
            while let Drain::Ready(()) = decoder.receive_frame(&mut out).unwrap() {
                assert_eq!(out.data(0)[0] as i64, out.pts().unwrap());
                seen.push(out.pts().unwrap());
            }
        }
        decoder.send_unit(None).unwrap();
        while let Drain::Ready(()) = decoder.receive_frame(&mut out).unwrap() {
            seen.push(out.pts().unwrap());
        }
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_decoder_rejects_wrong_size() {
        let mut decoder = RawVideoDecoder::new(spec(), TimeBase::new(1, 30), 0);
        let unit = CodedUnit::new(vec![0u8; 3], TimeBase::new(1, 30));
        assert!(matches!(decoder.send_unit(Some(&unit)), Err(Error::Codec(_))));
    }

    #[test]
    fn test_for_stream_checks_codec() {
        let stream = StreamInfo {
            index: 0,
            codec_name: "h264".to_string(),
            time_base: TimeBase::new(1, 1000),
            frame_rate: None,
            width: 4,
            height: 2,
            format: Some(PixelFormat::Gray8),
        };
        assert!(RawVideoDecoder::for_stream(&stream, 0).is_err());
        let raw = StreamInfo {
            codec_name: CODEC_NAME.to_string(),
            ..stream
        };
        let decoder = RawVideoDecoder::for_stream(&raw, 0).unwrap();
        assert_eq!(decoder.time_base(), TimeBase::new(1, 1000));
    }
}

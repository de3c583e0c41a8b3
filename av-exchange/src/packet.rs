use bytes::Bytes;

use crate::timebase::{TimeBase, rescale_opt};

/// Compressed data for one access unit.
///
/// A unit has a single owner at a time: the demuxer hands it to the decode
/// exchange, the encode exchange hands it to the muxer. It is released by
/// dropping it once the consumer has accepted it, so it is deliberately not
/// `Clone`.
#[derive(Debug)]
pub struct CodedUnit {
    data: Bytes,
    pts: Option<i64>,
    dts: Option<i64>,
    duration: i64,
    stream_index: usize,
    key: bool,
    time_base: TimeBase,
}

impl CodedUnit {
    pub fn new(data: impl Into<Bytes>, time_base: TimeBase) -> Self {
        Self {
            data: data.into(),
            pts: None,
            dts: None,
            duration: 0,
            stream_index: 0,
            key: false,
            time_base,
        }
    }

    pub fn with_pts(mut self, pts: Option<i64>) -> Self {
        self.pts = pts;
        self
    }

    pub fn with_dts(mut self, dts: Option<i64>) -> Self {
        self.dts = dts;
        self
    }

    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_stream_index(mut self, index: usize) -> Self {
        self.stream_index = index;
        self
    }

    pub fn with_key(mut self, key: bool) -> Self {
        self.key = key;
        self
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn pts(&self) -> Option<i64> {
        self.pts
    }

    pub fn dts(&self) -> Option<i64> {
        self.dts
    }

    pub fn duration(&self) -> i64 {
        self.duration
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    pub fn set_stream_index(&mut self, index: usize) {
        self.stream_index = index;
    }

    pub fn is_key(&self) -> bool {
        self.key
    }

    pub fn time_base(&self) -> TimeBase {
        self.time_base
    }

    /// Express pts, dts and duration in `to`.
    pub fn rescale(&mut self, to: TimeBase) {
        if to == self.time_base {
            return;
        }
        self.pts = rescale_opt(self.pts, self.time_base, to);
        self.dts = rescale_opt(self.dts, self.time_base, to);
        if self.duration > 0 {
            self.duration = rescale_opt(Some(self.duration), self.time_base, to).unwrap_or(0);
        }
        self.time_base = to;
    }
}

#[cfg(feature = "ffmpeg")]
impl CodedUnit {
    pub(crate) fn from_packet(packet: &ffmpeg_next::codec::packet::Packet, time_base: TimeBase) -> Self {
        Self {
            data: packet
                .data()
                .map(Bytes::copy_from_slice)
                .unwrap_or_default(),
            pts: packet.pts(),
            dts: packet.dts(),
            duration: packet.duration(),
            stream_index: packet.stream(),
            key: packet.is_key(),
            time_base,
        }
    }

    pub(crate) fn to_packet(&self) -> ffmpeg_next::codec::packet::Packet {
        let mut packet = ffmpeg_next::codec::packet::Packet::copy(&self.data);
        packet.set_pts(self.pts);
        packet.set_dts(self.dts);
        packet.set_duration(self.duration);
        packet.set_stream(self.stream_index);
        if self.key {
            packet.set_flags(ffmpeg_next::codec::packet::Flags::KEY);
        }
        packet
    }
}

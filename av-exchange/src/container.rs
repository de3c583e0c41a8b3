//! Container boundaries: where coded units come from and where they go.

use std::{collections::VecDeque, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    exchange::Drain,
    packet::CodedUnit,
    stream::StreamInfo,
    timebase::TimeBase,
};

/// Source of coded units for one selected video stream.
pub trait Demuxer {
    /// Metadata of the selected stream, fixed at setup.
    fn stream(&self) -> &StreamInfo;

    /// Next unit of the selected stream, `None` once the input is exhausted.
    fn next_unit(&mut self) -> Result<Option<CodedUnit>>;
}

/// Destination of coded units. Units are written in the order given.
pub trait Muxer {
    /// Time base of the output stream; units must already be in it.
    fn stream_time_base(&self) -> TimeBase;

    fn stream_index(&self) -> usize {
        0
    }

    fn write(&mut self, unit: CodedUnit) -> Result<()>;

    /// Write the trailer. Only the first call has an effect.
    fn finish(&mut self) -> Result<()>;
}

/// Call `read` until it yields a unit or reports the end of input, sleeping
/// `interval` after each `WouldBlock`. Gives `None` once `cancel` fires so a
/// device that never becomes ready cannot hold up shutdown.
pub fn poll_ready<T>(
    cancel: &CancellationToken,
    interval: Duration,
    mut read: impl FnMut() -> Result<Drain<T>>,
) -> Result<Option<T>> {
    loop {
        match read()? {
            Drain::Ready(value) => return Ok(Some(value)),
            Drain::EndOfStream => return Ok(None),
            Drain::WouldBlock => {
                if cancel.is_cancelled() {
                    log::debug!("input not ready and cancelled, giving up");
                    return Ok(None);
                }
                std::thread::sleep(interval);
            }
        }
    }
}

impl<T: Demuxer + ?Sized> Demuxer for Box<T> {
    fn stream(&self) -> &StreamInfo {
        (**self).stream()
    }

    fn next_unit(&mut self) -> Result<Option<CodedUnit>> {
        (**self).next_unit()
    }
}

impl<T: Muxer + ?Sized> Muxer for Box<T> {
    fn stream_time_base(&self) -> TimeBase {
        (**self).stream_time_base()
    }

    fn stream_index(&self) -> usize {
        (**self).stream_index()
    }

    fn write(&mut self, unit: CodedUnit) -> Result<()> {
        (**self).write(unit)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

impl<T: Muxer + ?Sized> Muxer for &mut T {
    fn stream_time_base(&self) -> TimeBase {
        (**self).stream_time_base()
    }

    fn stream_index(&self) -> usize {
        (**self).stream_index()
    }

    fn write(&mut self, unit: CodedUnit) -> Result<()> {
        (**self).write(unit)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

/// Replays a fixed list of units.
pub struct MemoryDemuxer {
    stream: StreamInfo,
    units: VecDeque<CodedUnit>,
}

impl MemoryDemuxer {
    pub fn new(stream: StreamInfo, units: impl IntoIterator<Item = CodedUnit>) -> Self {
        Self {
            stream,
            units: units.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.units.len()
    }
}

impl Demuxer for MemoryDemuxer {
    fn stream(&self) -> &StreamInfo {
        &self.stream
    }

    fn next_unit(&mut self) -> Result<Option<CodedUnit>> {
        Ok(self.units.pop_front().map(|mut unit| {
            unit.set_stream_index(self.stream.index);
            unit
        }))
    }
}

/// Collects written units in memory.
pub struct MemoryMuxer {
    time_base: TimeBase,
    units: Vec<CodedUnit>,
    fail_after: Option<usize>,
    finished: bool,
}

impl MemoryMuxer {
    pub fn new(time_base: TimeBase) -> Self {
        Self {
            time_base,
            units: Vec::new(),
            fail_after: None,
            finished: false,
        }
    }

    /// Make every write after the first `count` fail, like a full disk.
    pub fn fail_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    pub fn units(&self) -> &[CodedUnit] {
        &self.units
    }

    pub fn into_units(self) -> Vec<CodedUnit> {
        self.units
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn bytes_written(&self) -> usize {
        self.units.iter().map(CodedUnit::size).sum()
    }
}

impl Muxer for MemoryMuxer {
    fn stream_time_base(&self) -> TimeBase {
        self.time_base
    }

    fn write(&mut self, unit: CodedUnit) -> Result<()> {
        if self.finished {
            return Err(Error::Sink("write after trailer".to_string()));
        }
        if self.fail_after.is_some_and(|limit| self.units.len() >= limit) {
            return Err(Error::Sink(format!(
                "write of unit {} failed",
                self.units.len()
            )));
        }
        if unit.time_base() != self.time_base {
            return Err(Error::Sink(format!(
                "unit in time base {}, stream uses {}",
                unit.time_base(),
                self.time_base
            )));
        }
        self.units.push(unit);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if !self.finished {
            self.finished = true;
            log::debug!("memory muxer finished with {} units", self.units.len());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;

    fn stream() -> StreamInfo {
        StreamInfo {
            index: 2,
            codec_name: "rawvideo".to_string(),
            time_base: TimeBase::MILLISECONDS,
            frame_rate: Some((25, 1)),
            width: 2,
            height: 2,
            format: Some(PixelFormat::Gray8),
        }
    }

    #[test]
    fn test_memory_demuxer_tags_stream_index() {
        let units = (0..3)
            .map(|i| CodedUnit::new(vec![0u8; 4], TimeBase::MILLISECONDS).with_pts(Some(i * 40)));
        let mut demuxer = MemoryDemuxer::new(stream(), units);
        assert_eq!(demuxer.remaining(), 3);
        let mut seen = Vec::new();
        while let Some(unit) = demuxer.next_unit().unwrap() {
            assert_eq!(unit.stream_index(), 2);
            seen.push(unit.pts().unwrap());
        }
        assert_eq!(seen, vec![0, 40, 80]);
        assert!(demuxer.next_unit().unwrap().is_none());
    }

    #[test]
    fn test_memory_muxer_fail_after() {
        let mut muxer = MemoryMuxer::new(TimeBase::MILLISECONDS).fail_after(2);
        for _ in 0..2 {
            muxer
                .write(CodedUnit::new(vec![1u8; 3], TimeBase::MILLISECONDS))
                .unwrap();
        }
        let err = muxer
            .write(CodedUnit::new(vec![1u8; 3], TimeBase::MILLISECONDS))
            .unwrap_err();
        assert!(matches!(err, Error::Sink(_)));
        assert_eq!(muxer.bytes_written(), 6);
    }

    #[test]
    fn test_memory_muxer_rejects_foreign_time_base_and_late_writes() {
        let mut muxer = MemoryMuxer::new(TimeBase::MILLISECONDS);
        assert!(muxer.write(CodedUnit::new(vec![0u8], TimeBase::MPEG)).is_err());
        muxer.finish().unwrap();
        muxer.finish().unwrap();
        assert!(muxer.is_finished());
        assert!(muxer
            .write(CodedUnit::new(vec![0u8], TimeBase::MILLISECONDS))
            .is_err());
    }

    #[test]
    fn test_poll_ready_retries_until_ready() {
        let cancel = CancellationToken::new();
        let mut attempts = 0;
        let got = poll_ready(&cancel, Duration::ZERO, || {
            attempts += 1;
            Ok(if attempts < 4 {
                Drain::WouldBlock
            } else {
                Drain::Ready(attempts)
            })
        })
        .unwrap();
        assert_eq!(got, Some(4));
    }

    #[test]
    fn test_poll_ready_gives_up_when_cancelled() {
        let cancel = CancellationToken::new();
        let mut attempts = 0;
        let got: Option<()> = poll_ready(&cancel, Duration::ZERO, || {
            attempts += 1;
            if attempts == 3 {
                cancel.cancel();
            }
            Ok(Drain::WouldBlock)
        })
        .unwrap();
        assert_eq!(got, None);
        assert_eq!(attempts, 3);
    }

    #[test]
    fn test_poll_ready_passes_errors_and_end() {
        let cancel = CancellationToken::new();
        let end: Option<()> = poll_ready(&cancel, Duration::ZERO, || Ok(Drain::EndOfStream)).unwrap();
        assert_eq!(end, None);
        let err = poll_ready::<()>(&cancel, Duration::ZERO, || {
            Err(Error::Codec("read packet: I/O error".to_string()))
        })
        .unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }
}

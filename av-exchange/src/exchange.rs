//! The submit/drain protocol shared by decoding and encoding.
//!
//! A codec is fed one unit at a time and then drained until it reports that it
//! needs more input or that it has flushed everything:
//!
//! ```text
//!   Open --submit(unit)--> Draining --WouldBlock--> Open
//!   Open --submit(end)---> Flushing --EndOfStream--> Closed
//! ```
//!
//! `WouldBlock` and `EndOfStream` are control flow, not errors. Nothing leaves
//! `Closed`.

use crate::{
    error::{Error, Result},
    frame::{FrameSpec, RawFrame},
    packet::CodedUnit,
    timebase::TimeBase,
};

/// Outcome of one drain request.
#[derive(Debug)]
pub enum Drain<T> {
    /// One unit of output.
    Ready(T),
    /// The codec needs more input before it can produce anything.
    WouldBlock,
    /// The flush completed; no more output will ever come.
    EndOfStream,
}

impl<T> Drain<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Drain::Ready(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Drain<U> {
        match self {
            Drain::Ready(v) => Drain::Ready(f(v)),
            Drain::WouldBlock => Drain::WouldBlock,
            Drain::EndOfStream => Drain::EndOfStream,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// Ready for the next submission.
    Open,
    /// A unit was submitted; output must be drained before the next one.
    Draining,
    /// The end marker was submitted; draining until the codec is empty.
    Flushing,
    /// Flush finished or the codec failed. Terminal.
    Closed,
}

/// Result of draining until the codec stops producing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainOutcome {
    /// Units or frames handed on during this drain.
    pub produced: usize,
    /// The flush completed and the exchange is closed.
    pub finished: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExchangeStats {
    pub submitted: u64,
    pub drained: u64,
    pub would_block: u64,
}

/// A decoder black box speaking the send/receive protocol.
pub trait VideoDecoder {
    fn name(&self) -> &str;

    /// Time base of timestamps on submitted units and on decoded frames.
    fn time_base(&self) -> TimeBase;

    /// Submit a unit, or `None` to start flushing.
    fn send_unit(&mut self, unit: Option<&CodedUnit>) -> Result<()>;

    /// Decode the next picture into `frame`, overwriting it.
    fn receive_frame(&mut self, frame: &mut RawFrame) -> Result<Drain<()>>;
}

/// An encoder black box speaking the send/receive protocol.
pub trait VideoEncoder {
    fn name(&self) -> &str;

    /// Time base of submitted frame timestamps and of produced units.
    fn time_base(&self) -> TimeBase;

    /// Picture layout every submitted frame must have.
    fn spec(&self) -> FrameSpec;

    /// Submit a picture, or `None` to start flushing.
    fn send_frame(&mut self, frame: Option<&RawFrame>) -> Result<()>;

    fn receive_unit(&mut self) -> Result<Drain<CodedUnit>>;
}

impl<T: VideoDecoder + ?Sized> VideoDecoder for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn time_base(&self) -> TimeBase {
        (**self).time_base()
    }

    fn send_unit(&mut self, unit: Option<&CodedUnit>) -> Result<()> {
        (**self).send_unit(unit)
    }

    fn receive_frame(&mut self, frame: &mut RawFrame) -> Result<Drain<()>> {
        (**self).receive_frame(frame)
    }
}

impl<T: VideoEncoder + ?Sized> VideoEncoder for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn time_base(&self) -> TimeBase {
        (**self).time_base()
    }

    fn spec(&self) -> FrameSpec {
        (**self).spec()
    }

    fn send_frame(&mut self, frame: Option<&RawFrame>) -> Result<()> {
        (**self).send_frame(frame)
    }

    fn receive_unit(&mut self) -> Result<Drain<CodedUnit>> {
        (**self).receive_unit()
    }
}

/// State bookkeeping shared by both exchanges.
#[derive(Debug)]
pub(crate) struct Protocol {
    label: &'static str,
    state: ExchangeState,
    stats: ExchangeStats,
}

impl Protocol {
    pub(crate) fn new(label: &'static str) -> Self {
        Self {
            label,
            state: ExchangeState::Open,
            stats: ExchangeStats::default(),
        }
    }

    pub(crate) fn state(&self) -> ExchangeState {
        self.state
    }

    pub(crate) fn stats(&self) -> ExchangeStats {
        self.stats
    }

    /// Fail unless the exchange can take a submission right now.
    pub(crate) fn check_submit(&self) -> Result<()> {
        match self.state {
            ExchangeState::Open => Ok(()),
            ExchangeState::Draining => Err(Error::InvalidState(format!(
                "{}: pending output must be drained before the next submission",
                self.label
            ))),
            ExchangeState::Flushing | ExchangeState::Closed => Err(Error::InvalidState(format!(
                "{}: submission after end of stream",
                self.label
            ))),
        }
    }

    /// Check a submission is allowed and move to the matching state.
    pub(crate) fn begin_submit(&mut self, end: bool) -> Result<()> {
        self.check_submit()?;
        if end {
            log::debug!("{}: end of stream submitted, flushing", self.label);
            self.state = ExchangeState::Flushing;
        } else {
            self.stats.submitted += 1;
            self.state = ExchangeState::Draining;
        }
        Ok(())
    }

    pub(crate) fn check_drain(&self) -> Result<()> {
        if self.state == ExchangeState::Closed {
            return Err(Error::InvalidState(format!(
                "{}: drain after the exchange closed",
                self.label
            )));
        }
        Ok(())
    }

    /// Apply a drain result to the state; a failure closes the exchange.
    pub(crate) fn finish_drain<T>(&mut self, result: Result<Drain<T>>) -> Result<Drain<T>> {
        let drained = match result {
            Ok(drained) => drained,
            Err(err) => {
                self.fail();
                return Err(err);
            }
        };
        match (&drained, self.state) {
            (Drain::Ready(_), ExchangeState::Open) => {
                self.stats.drained += 1;
                self.state = ExchangeState::Draining;
            }
            (Drain::Ready(_), _) => self.stats.drained += 1,
            (Drain::WouldBlock, ExchangeState::Flushing) => {
                self.fail();
                return Err(Error::Codec(format!(
                    "{}: codec asked for more input while flushing",
                    self.label
                )));
            }
            (Drain::WouldBlock, _) => {
                self.stats.would_block += 1;
                self.state = ExchangeState::Open;
            }
            (Drain::EndOfStream, _) => {
                log::debug!("{}: flush complete, closed", self.label);
                self.state = ExchangeState::Closed;
            }
        }
        Ok(drained)
    }

    pub(crate) fn fail(&mut self) {
        if self.state != ExchangeState::Closed {
            log::debug!("{}: closed after failure", self.label);
        }
        self.state = ExchangeState::Closed;
    }
}

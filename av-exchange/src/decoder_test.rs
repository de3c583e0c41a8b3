use crate::decoder::DecodeExchange;
use crate::error::{Error, Result};
use crate::exchange::{Drain, ExchangeState, VideoDecoder};
use crate::frame::{FrameSpec, PixelFormat, RawFrame};
use crate::packet::CodedUnit;
use crate::rawvideo::RawVideoDecoder;
use crate::timebase::TimeBase;

const STREAM_TB: TimeBase = TimeBase::new(1, 90_000);
const CODEC_TB: TimeBase = TimeBase::new(1, 30);

fn spec() -> FrameSpec {
    FrameSpec::new(PixelFormat::Yuv420p, 16, 8)
}

/// Unit `index` of a 30 fps stream muxed with a 90 kHz clock; pixels encode the index.
fn unit(index: i64) -> CodedUnit {
    let mut frame = RawFrame::new(spec());
    for p in 0..frame.plane_count() {
        frame.data_mut(p).fill(index as u8);
    }
    let mut data = Vec::new();
    frame.write_packed(&mut data);
    CodedUnit::new(data, STREAM_TB)
        .with_pts(Some(index * 3000))
        .with_dts(Some(index * 3000))
        .with_key(index == 0)
}

fn exchange(delay: usize) -> DecodeExchange<RawVideoDecoder> {
    DecodeExchange::new(RawVideoDecoder::new(spec(), CODEC_TB, delay))
}

/// Ten units through a decoder that holds three back; the first three drains
/// have nothing to give, the flush returns the rest.
#[test]
fn test_decode_all_pictures_after_flush() -> Result<()> {
    let mut exchange = exchange(3);
    let mut first_drain_blocked = 0;
    let mut decoded = Vec::new();

    for index in 0..10 {
        exchange.submit(Some(unit(index)))?;
        let mut first = true;
        loop {
            match exchange.drain()? {
                Drain::Ready(frame) => {
                    assert_eq!(frame.row(0, 0)[0] as i64, index - 3);
                    decoded.push(frame.timestamp_ms());
                }
                Drain::WouldBlock => {
                    if first {
                        first_drain_blocked += 1;
                    }
                    break;
                }
                Drain::EndOfStream => panic!("end of stream before flush"),
            }
            first = false;
        }
        assert_eq!(exchange.state(), ExchangeState::Open);
    }
    assert_eq!(first_drain_blocked, 3);
    assert_eq!(decoded.len(), 7);

    exchange.submit(None)?;
    assert_eq!(exchange.state(), ExchangeState::Flushing);
    let outcome = exchange.drain_with(|frame| {
        decoded.push(frame.timestamp_ms());
        Ok(())
    })?;
    assert!(outcome.finished);
    assert_eq!(outcome.produced, 3);
    assert_eq!(exchange.state(), ExchangeState::Closed);

    let expected: Vec<Option<i64>> = (0..10).map(|i| Some(i * 100 / 3 + (i % 3 == 2) as i64)).collect();
    assert_eq!(decoded, expected);

    let stats = exchange.stats();
    assert_eq!(stats.submitted, 10);
    assert_eq!(stats.drained, 10);
    assert_eq!(stats.would_block, 10);
    Ok(())
}

/// The number of pictures does not depend on when the caller drains.
#[test]
fn test_frame_count_independent_of_drain_timing() -> Result<()> {
    for delay in [0, 1, 4] {
        let mut exchange = exchange(delay);
        let mut count = 0;
        for index in 0..10 {
            exchange.submit(Some(unit(index)))?;
            count += exchange.drain_with(|_| Ok(()))?.produced;
        }
        exchange.submit(None)?;
        count += exchange.drain_with(|_| Ok(()))?.produced;
        assert_eq!(count, 10, "delay {}", delay);
    }
    Ok(())
}

#[test]
fn test_units_rescaled_to_decoder_time_base() -> Result<()> {
    let mut exchange = exchange(0);
    exchange.submit(Some(unit(45)))?;
    match exchange.drain()? {
        Drain::Ready(frame) => {
            assert_eq!(frame.time_base(), CODEC_TB);
            assert_eq!(frame.pts(), Some(45));
            assert_eq!(frame.timestamp_ms(), Some(1500));
            assert_eq!(frame.pts_in(STREAM_TB), Some(135_000));
        }
        _ => panic!("expected a frame"),
    }
    Ok(())
}

#[test]
fn test_generation_advances_per_picture() -> Result<()> {
    let mut exchange = exchange(0);
    let mut generations = Vec::new();
    for index in 0..3 {
        exchange.submit(Some(unit(index)))?;
        exchange.drain_with(|frame| {
            generations.push(frame.generation());
            Ok(())
        })?;
    }
    assert_eq!(generations, vec![1, 2, 3]);
    Ok(())
}

#[test]
fn test_submit_while_draining_is_rejected() -> Result<()> {
    let mut exchange = exchange(0);
    exchange.submit(Some(unit(0)))?;
    assert_eq!(exchange.state(), ExchangeState::Draining);
    let err = exchange.submit(Some(unit(1))).unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));

    // The rejected call leaves the exchange usable.
    assert!(exchange.drain()?.is_ready());
    assert!(matches!(exchange.drain()?, Drain::WouldBlock));
    exchange.submit(Some(unit(1)))?;
    Ok(())
}

#[test]
fn test_drain_right_after_open_is_would_block() -> Result<()> {
    let mut exchange = exchange(2);
    assert!(matches!(exchange.drain()?, Drain::WouldBlock));
    assert_eq!(exchange.state(), ExchangeState::Open);
    exchange.submit(Some(unit(0)))?;
    Ok(())
}

#[test]
fn test_nothing_leaves_closed() -> Result<()> {
    let mut exchange = exchange(0);
    exchange.submit(None)?;
    assert!(matches!(exchange.drain()?, Drain::EndOfStream));
    assert_eq!(exchange.state(), ExchangeState::Closed);

    assert!(matches!(
        exchange.submit(Some(unit(0))),
        Err(Error::InvalidState(_))
    ));
    assert!(matches!(exchange.submit(None), Err(Error::InvalidState(_))));
    assert!(matches!(exchange.drain(), Err(Error::InvalidState(_))));
    Ok(())
}

#[test]
fn test_malformed_unit_closes_exchange() {
    let mut exchange = exchange(0);
    let bad = CodedUnit::new(vec![1u8; 10], STREAM_TB).with_pts(Some(0));
    let err = exchange.submit(Some(bad)).unwrap_err();
    assert!(matches!(err, Error::Codec(_)));
    assert_eq!(err.category(), "codec");
    assert_eq!(exchange.state(), ExchangeState::Closed);
    assert!(exchange.drain().is_err());
}

#[test]
fn test_close_returns_decoder() -> Result<()> {
    let mut exchange = exchange(1);
    exchange.submit(Some(unit(0)))?;
    exchange.drain_with(|_| Ok(()))?;
    let decoder = exchange.close();
    assert_eq!(decoder.delay(), 1);
    Ok(())
}

/// Decoder whose drains fail, or which asks for input while flushing.
struct BrokenDecoder {
    flushing: bool,
    block_on_flush: bool,
}

impl VideoDecoder for BrokenDecoder {
    fn name(&self) -> &str {
        "broken"
    }

    fn time_base(&self) -> TimeBase {
        CODEC_TB
    }

    fn send_unit(&mut self, unit: Option<&CodedUnit>) -> Result<()> {
        self.flushing = unit.is_none();
        Ok(())
    }

    fn receive_frame(&mut self, _frame: &mut RawFrame) -> Result<Drain<()>> {
        if self.flushing && self.block_on_flush {
            return Ok(Drain::WouldBlock);
        }
        Err(Error::Codec("invalid data found when processing input".to_string()))
    }
}

#[test]
fn test_decoder_failure_closes_exchange() -> Result<()> {
    let mut exchange = DecodeExchange::new(BrokenDecoder {
        flushing: false,
        block_on_flush: false,
    });
    exchange.submit(Some(unit(0)))?;

    let err = exchange.drain_with(|_| Ok(())).unwrap_err();
    assert!(matches!(err, Error::Codec(_)));
    assert_eq!(exchange.state(), ExchangeState::Closed);
    assert!(matches!(exchange.drain(), Err(Error::InvalidState(_))));
    assert!(matches!(
        exchange.submit(Some(unit(1))),
        Err(Error::InvalidState(_))
    ));
    Ok(())
}

#[test]
fn test_would_block_while_flushing_is_codec_error() -> Result<()> {
    let mut exchange = DecodeExchange::new(BrokenDecoder {
        flushing: false,
        block_on_flush: true,
    });
    exchange.submit(None)?;
    assert_eq!(exchange.state(), ExchangeState::Flushing);

    assert!(matches!(exchange.drain(), Err(Error::Codec(_))));
    assert_eq!(exchange.state(), ExchangeState::Closed);
    assert!(matches!(exchange.drain(), Err(Error::InvalidState(_))));
    Ok(())
}

//! Stage wiring for the decode, encode and raw-capture paths.
//!
//! Each pipeline owns its stages, runs the submit/drain loop synchronously on
//! the calling thread and tears the stages down in reverse order of
//! acquisition (converter, codec, container) whether the run ends normally or
//! with an error. A [`CancellationToken`] is checked between units; once
//! cancelled the input is treated as exhausted and the codec is flushed.

use tokio_util::sync::CancellationToken;

use crate::{
    container::{Demuxer, Muxer},
    consumer::FrameConsumer,
    decoder::DecodeExchange,
    encoder::EncodeExchange,
    error::{Error, Result},
    exchange::{VideoDecoder, VideoEncoder},
    frame::{FrameSpec, RawFrame},
    producer::FrameProducer,
    scaler::FrameConverter,
    timebase::{TimeBase, rescale_opt},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    /// Coded units read (decode, capture) or written (encode).
    pub units: u64,
    /// Pictures handed to the consumer (decode, capture) or submitted to the
    /// encoder (encode).
    pub frames: u64,
    /// Drains that ended with the codec asking for more input.
    pub would_block: u64,
    /// The run stopped early because of cancellation.
    pub cancelled: bool,
}

fn stop_requested(cancel: &CancellationToken, summary: &mut PipelineSummary) -> bool {
    if cancel.is_cancelled() && !summary.cancelled {
        log::info!("cancelled, flushing");
        summary.cancelled = true;
    }
    summary.cancelled
}

/// Demuxer → decode exchange → converter → consumer.
///
/// Fields are declared in teardown order.
pub struct DecodePipeline<M: Demuxer, D: VideoDecoder, C: FrameConsumer> {
    converter: FrameConverter,
    exchange: DecodeExchange<D>,
    demuxer: M,
    consumer: C,
    cancel: CancellationToken,
    limit: Option<u64>,
}

impl<M: Demuxer, D: VideoDecoder, C: FrameConsumer> DecodePipeline<M, D, C> {
    pub fn new(demuxer: M, decoder: D, converter: FrameConverter, consumer: C) -> Self {
        Self {
            converter,
            exchange: DecodeExchange::new(decoder),
            demuxer,
            consumer,
            cancel: CancellationToken::new(),
            limit: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Hand at most `frames` pictures to the consumer. Reading stops once
    /// the limit is reached; pictures still buffered in the decoder are
    /// drained and dropped.
    pub fn with_limit(mut self, frames: Option<u64>) -> Self {
        self.limit = frames;
        self
    }

    pub fn run(mut self) -> Result<PipelineSummary> {
        let result = self.pump();
        let result = match result {
            Ok(summary) => self.consumer.finish().map(|_| summary),
            Err(err) => Err(err),
        };
        self.teardown();
        result
    }

    fn pump(&mut self) -> Result<PipelineSummary> {
        let stream = self.demuxer.stream().clone();
        log::info!(
            "decoding stream {} ({}, {}x{}, time base {})",
            stream.index,
            stream.codec_name,
            stream.width,
            stream.height,
            stream.time_base
        );

        let mut summary = PipelineSummary::default();
        let limit = self.limit.unwrap_or(u64::MAX);
        let converter = &mut self.converter;
        let consumer = &mut self.consumer;
        loop {
            let unit = if stop_requested(&self.cancel, &mut summary) || summary.frames >= limit {
                None
            } else {
                let unit = self.demuxer.next_unit()?;
                if unit.is_none() {
                    // The demuxer gives up early when the token fires.
                    stop_requested(&self.cancel, &mut summary);
                }
                unit
            };
            if unit.is_some() {
                summary.units += 1;
            }
            self.exchange.submit(unit)?;

            let frames = &mut summary.frames;
            let outcome = self.exchange.drain_with(|frame| {
                if *frames >= limit {
                    return Ok(());
                }
                let timestamp_ms = frame.timestamp_ms();
                let picture = converter.process(frame.frame())?;
                consumer.consume(picture, timestamp_ms)?;
                *frames += 1;
                Ok(())
            })?;
            if outcome.finished {
                break;
            }
        }
        summary.would_block = self.exchange.stats().would_block;
        log::info!(
            "decoded {} units into {} pictures, {} conversion plans",
            summary.units,
            summary.frames,
            self.converter.rebuilds()
        );
        Ok(summary)
    }

    fn teardown(self) {
        let Self {
            converter,
            exchange,
            demuxer,
            consumer,
            ..
        } = self;
        drop(converter);
        drop(exchange.close());
        drop(demuxer);
        drop(consumer);
        log::debug!("decode pipeline torn down");
    }
}

/// Producer → converter → encode exchange → muxer.
pub struct EncodePipeline<P: FrameProducer, E: VideoEncoder, M: Muxer> {
    converter: FrameConverter,
    exchange: EncodeExchange<E>,
    muxer: M,
    producer: P,
    cancel: CancellationToken,
    limit: Option<u64>,
}

impl<P: FrameProducer, E: VideoEncoder, M: Muxer> EncodePipeline<P, E, M> {
    /// The converter targets the encoder's input layout; unit timestamps go
    /// out in the muxer's stream time base.
    pub fn new(producer: P, encoder: E, muxer: M, converter: FrameConverter) -> Self {
        let exchange = EncodeExchange::new(encoder, muxer.stream_time_base(), muxer.stream_index());
        Self {
            converter,
            exchange,
            muxer,
            producer,
            cancel: CancellationToken::new(),
            limit: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Submit at most `frames` pictures.
    pub fn with_limit(mut self, frames: Option<u64>) -> Self {
        self.limit = frames;
        self
    }

    pub fn run(mut self) -> Result<PipelineSummary> {
        let result = self.pump();
        self.teardown();
        result
    }

    fn pump(&mut self) -> Result<PipelineSummary> {
        let target = self.exchange.encoder().spec();
        let produced = self.converter.target_for(self.producer.spec());
        if produced != target {
            return Err(Error::Setup(format!(
                "converter produces {}, encoder takes {}",
                produced, target
            )));
        }

        let frame_base = self.producer.time_base();
        let limit = self.limit.unwrap_or(u64::MAX);
        let mut summary = PipelineSummary::default();
        let mut index = 0u64;
        loop {
            let stop = stop_requested(&self.cancel, &mut summary) || index >= limit;
            let frame = if stop { None } else { self.producer.produce(index)? };
            match frame {
                Some(frame) => {
                    frame.set_pts(Some(self.exchange.pts_for_index(index as i64, frame_base)));
                    let picture = self.converter.process(frame)?;
                    self.exchange.submit(Some(picture))?;
                    summary.frames += 1;
                    index += 1;
                }
                None => self.exchange.submit(None)?,
            }

            let outcome = self.exchange.drain_into(&mut self.muxer)?;
            summary.units += outcome.produced as u64;
            if outcome.finished {
                break;
            }
        }
        self.muxer.finish()?;
        summary.would_block = self.exchange.stats().would_block;
        log::info!(
            "encoded {} pictures into {} units",
            summary.frames,
            summary.units
        );
        Ok(summary)
    }

    fn teardown(self) {
        let Self {
            converter,
            exchange,
            muxer,
            producer,
            ..
        } = self;
        drop(converter);
        drop(exchange.close());
        drop(muxer);
        drop(producer);
        log::debug!("encode pipeline torn down");
    }
}

/// Raw device packets (one whole picture each) → converter → consumer.
pub struct CapturePipeline<M: Demuxer, C: FrameConsumer> {
    converter: FrameConverter,
    frame: RawFrame,
    demuxer: M,
    consumer: C,
    cancel: CancellationToken,
    limit: Option<u64>,
}

impl<M: Demuxer, C: FrameConsumer> CapturePipeline<M, C> {
    /// `source` is the layout the device was configured for; a stream that
    /// delivers anything else is rejected here.
    pub fn new(demuxer: M, source: FrameSpec, converter: FrameConverter, consumer: C) -> Result<Self> {
        let stream = demuxer.stream();
        if stream.format != Some(source.format) {
            return Err(Error::Setup(format!(
                "capture delivers {}, expected {}",
                stream.format.map(|f| f.name()).unwrap_or("an unknown format"),
                source.format
            )));
        }
        if stream.width != 0
            && stream.height != 0
            && (stream.width, stream.height) != (source.width, source.height)
        {
            return Err(Error::Setup(format!(
                "capture size {}x{}, expected {}x{}",
                stream.width, stream.height, source.width, source.height
            )));
        }
        Ok(Self {
            converter,
            frame: RawFrame::new(source),
            demuxer,
            consumer,
            cancel: CancellationToken::new(),
            limit: None,
        })
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_limit(mut self, frames: Option<u64>) -> Self {
        self.limit = frames;
        self
    }

    pub fn run(mut self) -> Result<PipelineSummary> {
        let result = self.pump();
        let result = match result {
            Ok(summary) => self.consumer.finish().map(|_| summary),
            Err(err) => Err(err),
        };
        self.teardown();
        result
    }

    fn pump(&mut self) -> Result<PipelineSummary> {
        let time_base = self.demuxer.stream().time_base;
        let linesize = self.frame.format().row_bytes(0, self.frame.width());
        let limit = self.limit.unwrap_or(u64::MAX);
        let mut summary = PipelineSummary::default();
        while !stop_requested(&self.cancel, &mut summary) && summary.frames < limit {
            let Some(unit) = self.demuxer.next_unit()? else {
                stop_requested(&self.cancel, &mut summary);
                break;
            };
            summary.units += 1;
            self.frame.read_strided(unit.data(), linesize)?;
            self.frame.set_pts(unit.pts());
            let timestamp_ms = rescale_opt(unit.pts(), time_base, TimeBase::MILLISECONDS);
            drop(unit);

            let picture = self.converter.process(&self.frame)?;
            self.consumer.consume(picture, timestamp_ms)?;
            summary.frames += 1;
        }
        log::info!("captured {} pictures", summary.frames);
        Ok(summary)
    }

    fn teardown(self) {
        let Self {
            converter,
            demuxer,
            consumer,
            ..
        } = self;
        drop(converter);
        drop(demuxer);
        drop(consumer);
        log::debug!("capture pipeline torn down");
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;

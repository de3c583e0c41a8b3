use std::path::Path;

use anyhow::{Context, Result};
use av_exchange::{
    consumer::{FrameConsumer, FrameCounter, FrameDumper},
    container::Demuxer,
    decoder::FfmpegDecoder,
    device,
    encoder::FfmpegEncoder,
    input::AvInput,
    output::AvOutput,
    pipeline::{CapturePipeline, DecodePipeline, EncodePipeline, PipelineSummary},
    producer::TestPattern,
    scaler::{FrameConverter, ScalerBackend},
    settings::{self, CaptureSettings, DecodeSettings, EncodeSettings, WebcamSettings},
};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::cli::Command;

fn load_or_default<T: DeserializeOwned + Default>(config: Option<&Path>) -> Result<T> {
    match config {
        Some(path) => settings::load(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(T::default()),
    }
}

/// Run one command to completion on the calling thread.
pub fn execute(
    command: Command,
    config: Option<&Path>,
    cancel: CancellationToken,
) -> Result<PipelineSummary> {
    match command {
        Command::Encode(args) => {
            let mut settings: EncodeSettings = load_or_default(config)?;
            args.apply(&mut settings);
            encode(&settings, cancel)
        }
        Command::Decode(args) => {
            let mut settings: DecodeSettings = load_or_default(config)?;
            args.apply(&mut settings);
            settings.validate()?;
            let input = AvInput::open(&settings.input, None, &[])?;
            decode(input, &settings, cancel)
        }
        Command::Grab(args) => {
            let mut settings: CaptureSettings = load_or_default(config)?;
            args.apply(&mut settings);
            grab(&settings, cancel)
        }
        Command::Webcam(args) => {
            let mut settings: WebcamSettings = load_or_default(config)?;
            args.apply(&mut settings);
            let input = device::open_webcam(&settings)
                .with_context(|| format!("opening camera {}", settings.device))?;
            decode(input, &settings.decode(), cancel)
        }
    }
}

fn consumer(dump_dir: Option<&Path>, every: u64) -> Result<Box<dyn FrameConsumer>> {
    let consumer: Box<dyn FrameConsumer> = match dump_dir {
        Some(dir) => Box::new(FrameDumper::new(dir)?.every(every)),
        None => Box::new(FrameCounter::new()),
    };
    Ok(consumer)
}

fn encode(settings: &EncodeSettings, cancel: CancellationToken) -> Result<PipelineSummary> {
    settings.validate()?;
    let mut output = AvOutput::create(&settings.output)?;
    let encoder = FfmpegEncoder::open(settings, output.needs_global_header())
        .with_context(|| format!("opening {} encoder", settings.codec))?;
    output.add_video_stream(&encoder)?;

    let producer = TestPattern::new(settings.width, settings.height, settings.time_base());
    let converter = FrameConverter::to_spec(ScalerBackend::Swscale, settings.spec());
    let summary = EncodePipeline::new(producer, encoder, output, converter)
        .with_cancel(cancel)
        .with_limit(Some(settings.frames))
        .run()
        .with_context(|| format!("encoding {}", settings.output.display()))?;
    log::info!("wrote {}", settings.output.display());
    Ok(summary)
}

fn decode(
    input: AvInput,
    settings: &DecodeSettings,
    cancel: CancellationToken,
) -> Result<PipelineSummary> {
    let input = input.with_cancel(cancel.clone());
    let decoder = FfmpegDecoder::new(input.stream(), input.parameters())?;
    let source = input.stream().spec()?;
    let target = settings.target(source);
    log::info!("decoding {} to {}", source, target);

    let converter = FrameConverter::to_spec(ScalerBackend::Swscale, target);
    let consumer = consumer(settings.dump_dir.as_deref(), settings.every)?;
    let summary = DecodePipeline::new(input, decoder, converter, consumer)
        .with_cancel(cancel)
        .with_limit(settings.frames)
        .run()
        .with_context(|| format!("decoding {}", settings.input))?;
    Ok(summary)
}

fn grab(settings: &CaptureSettings, cancel: CancellationToken) -> Result<PipelineSummary> {
    let input = device::open_screen(settings)
        .with_context(|| format!("opening display {}", settings.url()))?
        .with_cancel(cancel.clone());
    let converter = FrameConverter::to_spec(ScalerBackend::Swscale, settings.target());
    let consumer = consumer(settings.dump_dir.as_deref(), settings.every)?;
    let summary = CapturePipeline::new(input, settings.source(), converter, consumer)?
        .with_cancel(cancel)
        .with_limit(settings.frames)
        .run()
        .context("grabbing screen")?;
    Ok(summary)
}

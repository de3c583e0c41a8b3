use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

mod cli;
mod command;

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .filter_module("frame_pipe", level)
        .filter_module("av_exchange", level)
        .filter_module("ffmpeg_next", level)
        .init();
}

async fn run(cli: cli::Cli) -> anyhow::Result<()> {
    let _av = av_exchange::init_guard().context("av_exchange init")?;

    let cancel = CancellationToken::new();
    let mut task = {
        let cancel = cancel.clone();
        let config = cli.config;
        let command = cli.command;
        tokio::task::spawn_blocking(move || command::execute(command, config.as_deref(), cancel))
    };

    let result = loop {
        tokio::select! {
            result = &mut task => break result,
            _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                log::info!("interrupted, finishing stream");
                cancel.cancel();
            },
        }
    };
    let summary = result.context("pipeline task panicked")??;
    log::info!(
        "done: {} units, {} frames, {} would-block drains{}",
        summary.units,
        summary.frames,
        summary.would_block,
        if summary.cancelled { " (cancelled)" } else { "" }
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        let category = e
            .downcast_ref::<av_exchange::Error>()
            .map(|e| e.category())
            .unwrap_or("fatal");
        eprintln!("Error ({}): {:#}", category, e);
        std::process::exit(1);
    }
}

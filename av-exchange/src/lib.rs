//! Submit/drain video codec pipeline.
//!
//! Coded units flow from a [`container::Demuxer`] through a
//! [`decoder::DecodeExchange`], get converted by a [`scaler::FrameConverter`]
//! and end up in a [`consumer::FrameConsumer`]; the encode path runs the other
//! way into a [`container::Muxer`]. The codecs themselves are black boxes
//! behind [`exchange::VideoDecoder`] and [`exchange::VideoEncoder`]: the
//! uncompressed [`rawvideo`] codec is always available, libavcodec with the
//! `ffmpeg` feature.

use std::sync::Mutex;

pub mod consumer;
pub mod container;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod exchange;
pub mod frame;
pub mod packet;
pub mod pipeline;
pub mod producer;
pub mod rawvideo;
pub mod scaler;
pub mod settings;
pub mod stream;
pub mod timebase;

#[cfg(feature = "ffmpeg")]
pub mod device;
#[cfg(feature = "ffmpeg")]
pub mod input;
#[cfg(feature = "ffmpeg")]
pub mod output;

pub use error::{Error, Result};
pub use exchange::{Drain, ExchangeState};
pub use frame::{FrameSpec, PixelFormat, RawFrame};
pub use packet::CodedUnit;
pub use timebase::{NOPTS, TimeBase, rescale};

static INITIALIZED: Mutex<bool> = Mutex::new(false);

/// Register FFmpeg formats, devices and network support. Call once at
/// startup; later calls do nothing.
pub fn init() -> Result<()> {
    let mut initialized = INITIALIZED.lock().unwrap_or_else(|e| e.into_inner());
    if *initialized {
        return Ok(());
    }
    #[cfg(feature = "ffmpeg")]
    {
        ffmpeg_next::init().map_err(|e| Error::setup("ffmpeg_next init", e))?;
        ffmpeg_next::format::network::init();
    }
    *initialized = true;
    log::debug!("av-exchange initialized");
    Ok(())
}

/// Release what [`init`] set up. Safe to call without a prior `init`.
pub fn deinit() {
    let mut initialized = INITIALIZED.lock().unwrap_or_else(|e| e.into_inner());
    if !*initialized {
        return;
    }
    #[cfg(feature = "ffmpeg")]
    ffmpeg_next::format::network::deinit();
    *initialized = false;
    log::debug!("av-exchange deinitialized");
}

pub fn is_initialized() -> bool {
    *INITIALIZED.lock().unwrap_or_else(|e| e.into_inner())
}

/// Keeps the library initialized until dropped, so teardown also runs when
/// the caller bails out with an error.
#[must_use = "dropping the guard deinitializes right away"]
pub struct InitGuard(());

/// [`init`], with [`deinit`] tied to the returned guard.
pub fn init_guard() -> Result<InitGuard> {
    init()?;
    Ok(InitGuard(()))
}

impl Drop for InitGuard {
    fn drop(&mut self) {
        deinit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing_run() -> Result<()> {
        let _guard = init_guard()?;
        assert!(is_initialized());
        Err(Error::Sink("write frame: broken pipe".to_string()))
    }

    // One test for the process-wide flag; parallel tests would race on it.
    #[test]
    fn test_init_lifecycle() {
        init().unwrap();
        init().unwrap();
        assert!(is_initialized());
        deinit();
        deinit();
        assert!(!is_initialized());

        assert!(matches!(failing_run(), Err(Error::Sink(_))));
        assert!(!is_initialized());

        {
            let _guard = init_guard().unwrap();
            assert!(is_initialized());
        }
        assert!(!is_initialized());
    }
}

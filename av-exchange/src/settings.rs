//! Run configuration. Every value affects setup only; the exchange loops never
//! look at it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    error::{Error, Result},
    frame::{FrameSpec, PixelFormat},
    timebase::TimeBase,
};

/// Load settings from a JSON file. Missing fields take their defaults.
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::setup(&format!("read {}", path.display()), e))?;
    serde_json::from_str(&text).map_err(|e| Error::setup(&format!("parse {}", path.display()), e))
}

fn check_size(what: &str, width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(Error::Setup(format!("{} size {}x{} is empty", what, width, height)));
    }
    Ok(())
}

/// Frame rates become time base denominators, which are `i32`.
fn check_frame_rate(fps: u32) -> Result<()> {
    if fps == 0 {
        return Err(Error::Setup("frame rate must be positive".to_string()));
    }
    if fps > i32::MAX as u32 {
        return Err(Error::Setup(format!("frame rate {} is out of range", fps)));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeSettings {
    /// Encoder name, "h264" or "rawvideo".
    pub codec: String,
    pub fps: u32,
    pub bit_rate: u64,
    pub width: u32,
    pub height: u32,
    /// Group of pictures size.
    pub gop: u32,
    pub max_b_frames: u32,
    pub profile: String,
    pub output: PathBuf,
    /// Number of pictures to produce.
    pub frames: u64,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            codec: "h264".to_string(),
            fps: 30,
            bit_rate: 400_000,
            width: 640,
            height: 320,
            gop: 60,
            max_b_frames: 12,
            profile: "baseline".to_string(),
            output: PathBuf::from("out.mkv"),
            frames: 300,
        }
    }
}

impl EncodeSettings {
    /// Codec time base: one tick per frame.
    pub fn time_base(&self) -> TimeBase {
        TimeBase::from_frame_rate(self.fps)
    }

    /// Layout of the pictures handed to the encoder.
    pub fn spec(&self) -> FrameSpec {
        FrameSpec::new(PixelFormat::Yuv420p, self.width, self.height)
    }

    pub fn validate(&self) -> Result<()> {
        check_size("frame", self.width, self.height)?;
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(Error::Setup(format!(
                "4:2:0 output needs even dimensions, got {}x{}",
                self.width, self.height
            )));
        }
        check_frame_rate(self.fps)?;
        if self.gop == 0 {
            return Err(Error::Setup("gop size must be at least 1".to_string()));
        }
        if self.bit_rate == 0 {
            return Err(Error::Setup("bit rate must be positive".to_string()));
        }
        if self.codec.is_empty() {
            return Err(Error::Setup("no codec given".to_string()));
        }
        Ok(())
    }
}

/// Target of decoded pictures: format/size conversion plus optional still dumps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeSettings {
    pub input: String,
    pub target_format: PixelFormat,
    /// Output size; the stream's own size when unset.
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub dump_dir: Option<PathBuf>,
    /// Dump every n-th picture.
    pub every: u64,
    /// Stop after this many pictures.
    pub frames: Option<u64>,
}

impl Default for DecodeSettings {
    fn default() -> Self {
        Self {
            input: String::new(),
            target_format: PixelFormat::Rgb24,
            width: None,
            height: None,
            dump_dir: None,
            every: 1,
            frames: None,
        }
    }
}

impl DecodeSettings {
    /// Destination layout for a stream of `source` pictures.
    pub fn target(&self, source: FrameSpec) -> FrameSpec {
        FrameSpec::new(
            self.target_format,
            self.width.unwrap_or(source.width),
            self.height.unwrap_or(source.height),
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.input.is_empty() {
            return Err(Error::Setup("no input given".to_string()));
        }
        if self.width == Some(0) || self.height == Some(0) {
            return Err(Error::Setup("target size must be positive".to_string()));
        }
        if self.every == 0 {
            return Err(Error::Setup("dump interval must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn default_display() -> String {
    std::env::var("DISPLAY").unwrap_or_else(|_| ":0.0".to_string())
}

/// Region of an X11 display to grab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub display: String,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub target_format: PixelFormat,
    pub dump_dir: Option<PathBuf>,
    pub every: u64,
    pub frames: Option<u64>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            display: default_display(),
            x: 0,
            y: 0,
            width: 640,
            height: 480,
            fps: 30,
            target_format: PixelFormat::Bgr24,
            dump_dir: None,
            every: 1,
            frames: None,
        }
    }
}

impl CaptureSettings {
    /// x11grab device URL, e.g. `:0.0+10,20`.
    pub fn url(&self) -> String {
        format!("{}+{},{}", self.display, self.x, self.y)
    }

    pub fn video_size(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    /// Layout of the pictures the grabber delivers.
    pub fn source(&self) -> FrameSpec {
        FrameSpec::new(PixelFormat::Bgr0, self.width, self.height)
    }

    pub fn target(&self) -> FrameSpec {
        self.source().with_format(self.target_format)
    }

    pub fn validate(&self) -> Result<()> {
        check_size("capture", self.width, self.height)?;
        check_frame_rate(self.fps)?;
        if self.every == 0 {
            return Err(Error::Setup("dump interval must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebcamSettings {
    pub device: String,
    /// v4l2 `input_format` option.
    pub input_format: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
    pub target_format: PixelFormat,
    pub dump_dir: Option<PathBuf>,
    pub every: u64,
    pub frames: Option<u64>,
}

impl Default for WebcamSettings {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            input_format: "mjpeg".to_string(),
            width: None,
            height: None,
            fps: None,
            target_format: PixelFormat::Rgb24,
            dump_dir: None,
            every: 1,
            frames: None,
        }
    }
}

impl WebcamSettings {
    /// Device options passed when opening the v4l2 input.
    pub fn options(&self) -> Vec<(String, String)> {
        let mut options = vec![("input_format".to_string(), self.input_format.clone())];
        if let (Some(width), Some(height)) = (self.width, self.height) {
            options.push(("video_size".to_string(), format!("{}x{}", width, height)));
        }
        if let Some(fps) = self.fps {
            options.push(("framerate".to_string(), fps.to_string()));
        }
        options
    }

    /// Decode settings for the captured stream.
    pub fn decode(&self) -> DecodeSettings {
        DecodeSettings {
            input: self.device.clone(),
            target_format: self.target_format,
            width: None,
            height: None,
            dump_dir: self.dump_dir.clone(),
            every: self.every,
            frames: self.frames,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.device.is_empty() {
            return Err(Error::Setup("no capture device given".to_string()));
        }
        if self.width.is_some() != self.height.is_some() {
            return Err(Error::Setup("give both width and height or neither".to_string()));
        }
        if let (Some(width), Some(height)) = (self.width, self.height) {
            check_size("capture", width, height)?;
        }
        if let Some(fps) = self.fps {
            check_frame_rate(fps)?;
        }
        self.decode().validate()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_encode_defaults() {
        let settings = EncodeSettings::default();
        assert_eq!(settings.fps, 30);
        assert_eq!(settings.bit_rate, 400_000);
        assert_eq!((settings.width, settings.height), (640, 320));
        assert_eq!(settings.gop, 60);
        assert_eq!(settings.max_b_frames, 12);
        assert_eq!(settings.profile, "baseline");
        assert_eq!(settings.output, PathBuf::from("out.mkv"));
        assert_eq!(settings.frames, 300);
        assert_eq!(settings.time_base(), TimeBase::new(1, 30));
        settings.validate().unwrap();
    }

    #[test]
    fn test_encode_validation() {
        let odd = EncodeSettings {
            width: 641,
            ..Default::default()
        };
        assert!(matches!(odd.validate(), Err(Error::Setup(_))));
        let no_gop = EncodeSettings {
            gop: 0,
            ..Default::default()
        };
        assert!(no_gop.validate().is_err());
        let no_rate = EncodeSettings {
            fps: 0,
            ..Default::default()
        };
        assert!(no_rate.validate().is_err());
        let huge_rate = EncodeSettings {
            fps: i32::MAX as u32 + 1,
            ..Default::default()
        };
        assert!(matches!(huge_rate.validate(), Err(Error::Setup(_))));
        let max_rate = EncodeSettings {
            fps: i32::MAX as u32,
            ..Default::default()
        };
        max_rate.validate().unwrap();
    }

    #[test]
    fn test_capture_frame_rate_range() {
        let capture = CaptureSettings {
            fps: u32::MAX,
            ..Default::default()
        };
        assert!(matches!(capture.validate(), Err(Error::Setup(_))));
        let webcam = WebcamSettings {
            fps: Some(u32::MAX),
            ..Default::default()
        };
        assert!(matches!(webcam.validate(), Err(Error::Setup(_))));
        let webcam = WebcamSettings {
            fps: Some(15),
            ..Default::default()
        };
        webcam.validate().unwrap();
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: EncodeSettings =
            serde_json::from_str(r#"{"fps": 25, "codec": "rawvideo"}"#).unwrap();
        assert_eq!(settings.fps, 25);
        assert_eq!(settings.codec, "rawvideo");
        assert_eq!(settings.gop, 60);

        let decode: DecodeSettings =
            serde_json::from_str(r#"{"input": "in.mkv", "target_format": "bgr24"}"#).unwrap();
        assert_eq!(decode.target_format, PixelFormat::Bgr24);
        assert_eq!(decode.every, 1);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"device": "/dev/video2", "width": 320, "height": 240}}"#).unwrap();
        let settings: WebcamSettings = load(file.path()).unwrap();
        assert_eq!(settings.device, "/dev/video2");
        assert_eq!(settings.input_format, "mjpeg");
        settings.validate().unwrap();
        assert!(settings
            .options()
            .contains(&("video_size".to_string(), "320x240".to_string())));

        let missing = load::<WebcamSettings>(Path::new("/nonexistent/settings.json"));
        assert!(matches!(missing, Err(Error::Setup(_))));
    }

    #[test]
    fn test_capture_region() {
        let settings = CaptureSettings {
            display: ":1".to_string(),
            x: 10,
            y: 20,
            ..Default::default()
        };
        assert_eq!(settings.url(), ":1+10,20");
        assert_eq!(settings.video_size(), "640x480");
        assert_eq!(settings.source().format, PixelFormat::Bgr0);
        assert_eq!(settings.target().format, PixelFormat::Bgr24);
    }

    #[test]
    fn test_decode_target_keeps_stream_size() {
        let settings = DecodeSettings {
            input: "in.mkv".to_string(),
            height: Some(120),
            ..Default::default()
        };
        let source = FrameSpec::new(PixelFormat::Yuv420p, 640, 320);
        assert_eq!(
            settings.target(source),
            FrameSpec::new(PixelFormat::Rgb24, 640, 120)
        );
    }
}

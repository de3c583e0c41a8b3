use std::path::PathBuf;

use av_exchange::{
    PixelFormat,
    settings::{CaptureSettings, DecodeSettings, EncodeSettings, WebcamSettings},
};
use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "frame-pipe", version, about = "Push video through FFmpeg codecs frame by frame")]
pub struct Cli {
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// JSON settings file; flags given on the command line win
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Encode a generated test pattern into a video file
    Encode(EncodeArgs),
    /// Decode a video file, optionally dumping stills
    Decode(DecodeArgs),
    /// Grab a region of the X11 screen
    Grab(GrabArgs),
    /// Capture from a v4l2 camera
    Webcam(WebcamArgs),
}

fn parse_format(name: &str) -> Result<PixelFormat, String> {
    PixelFormat::from_name(name).ok_or_else(|| format!("unknown pixel format: {}", name))
}

/// Where converted pictures go.
#[derive(Debug, Args)]
pub struct StillArgs {
    /// Pixel format handed to the consumer
    #[arg(long, value_parser = parse_format)]
    pub target_format: Option<PixelFormat>,

    /// Write JPEG stills into this directory
    #[arg(long)]
    pub dump_dir: Option<PathBuf>,

    /// Keep every n-th picture
    #[arg(long)]
    pub every: Option<u64>,

    /// Stop after this many pictures
    #[arg(short = 'n', long)]
    pub frames: Option<u64>,
}

#[derive(Debug, Args)]
pub struct EncodeArgs {
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Encoder name (h264, rawvideo, ...)
    #[arg(long)]
    pub codec: Option<String>,
    #[arg(long)]
    pub fps: Option<u32>,
    #[arg(long)]
    pub width: Option<u32>,
    #[arg(long)]
    pub height: Option<u32>,
    #[arg(long)]
    pub bit_rate: Option<u64>,
    #[arg(long)]
    pub gop: Option<u32>,
    #[arg(long)]
    pub max_b_frames: Option<u32>,
    #[arg(long)]
    pub profile: Option<String>,
    #[arg(short = 'n', long)]
    pub frames: Option<u64>,
}

impl EncodeArgs {
    pub fn apply(self, settings: &mut EncodeSettings) {
        if let Some(output) = self.output {
            settings.output = output;
        }
        if let Some(codec) = self.codec {
            settings.codec = codec;
        }
        if let Some(fps) = self.fps {
            settings.fps = fps;
        }
        if let Some(width) = self.width {
            settings.width = width;
        }
        if let Some(height) = self.height {
            settings.height = height;
        }
        if let Some(bit_rate) = self.bit_rate {
            settings.bit_rate = bit_rate;
        }
        if let Some(gop) = self.gop {
            settings.gop = gop;
        }
        if let Some(max_b_frames) = self.max_b_frames {
            settings.max_b_frames = max_b_frames;
        }
        if let Some(profile) = self.profile {
            settings.profile = profile;
        }
        if let Some(frames) = self.frames {
            settings.frames = frames;
        }
    }
}

#[derive(Debug, Args)]
pub struct DecodeArgs {
    /// File or URL to decode
    pub input: Option<String>,
    #[arg(long)]
    pub width: Option<u32>,
    #[arg(long)]
    pub height: Option<u32>,
    #[command(flatten)]
    pub stills: StillArgs,
}

impl DecodeArgs {
    pub fn apply(self, settings: &mut DecodeSettings) {
        if let Some(input) = self.input {
            settings.input = input;
        }
        if self.width.is_some() {
            settings.width = self.width;
        }
        if self.height.is_some() {
            settings.height = self.height;
        }
        let stills = self.stills;
        if let Some(format) = stills.target_format {
            settings.target_format = format;
        }
        if stills.dump_dir.is_some() {
            settings.dump_dir = stills.dump_dir;
        }
        if let Some(every) = stills.every {
            settings.every = every;
        }
        if stills.frames.is_some() {
            settings.frames = stills.frames;
        }
    }
}

#[derive(Debug, Args)]
pub struct GrabArgs {
    /// X11 display, e.g. ":0.0"
    #[arg(long)]
    pub display: Option<String>,
    #[arg(short)]
    pub x: Option<u32>,
    #[arg(short)]
    pub y: Option<u32>,
    #[arg(long)]
    pub width: Option<u32>,
    #[arg(long)]
    pub height: Option<u32>,
    #[arg(long)]
    pub fps: Option<u32>,
    #[command(flatten)]
    pub stills: StillArgs,
}

impl GrabArgs {
    pub fn apply(self, settings: &mut CaptureSettings) {
        if let Some(display) = self.display {
            settings.display = display;
        }
        if let Some(x) = self.x {
            settings.x = x;
        }
        if let Some(y) = self.y {
            settings.y = y;
        }
        if let Some(width) = self.width {
            settings.width = width;
        }
        if let Some(height) = self.height {
            settings.height = height;
        }
        if let Some(fps) = self.fps {
            settings.fps = fps;
        }
        let stills = self.stills;
        if let Some(format) = stills.target_format {
            settings.target_format = format;
        }
        if stills.dump_dir.is_some() {
            settings.dump_dir = stills.dump_dir;
        }
        if let Some(every) = stills.every {
            settings.every = every;
        }
        if stills.frames.is_some() {
            settings.frames = stills.frames;
        }
    }
}

#[derive(Debug, Args)]
pub struct WebcamArgs {
    /// v4l2 device node
    #[arg(long)]
    pub device: Option<String>,
    /// Format requested from the camera (mjpeg, yuyv422, ...)
    #[arg(long)]
    pub input_format: Option<String>,
    #[arg(long)]
    pub width: Option<u32>,
    #[arg(long)]
    pub height: Option<u32>,
    #[arg(long)]
    pub fps: Option<u32>,
    #[command(flatten)]
    pub stills: StillArgs,
}

impl WebcamArgs {
    pub fn apply(self, settings: &mut WebcamSettings) {
        if let Some(device) = self.device {
            settings.device = device;
        }
        if let Some(input_format) = self.input_format {
            settings.input_format = input_format;
        }
        if self.width.is_some() {
            settings.width = self.width;
        }
        if self.height.is_some() {
            settings.height = self.height;
        }
        if self.fps.is_some() {
            settings.fps = self.fps;
        }
        let stills = self.stills;
        if let Some(format) = stills.target_format {
            settings.target_format = format;
        }
        if stills.dump_dir.is_some() {
            settings.dump_dir = stills.dump_dir;
        }
        if let Some(every) = stills.every {
            settings.every = every;
        }
        if stills.frames.is_some() {
            settings.frames = stills.frames;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_flags_override_settings() {
        let cli = Cli::parse_from([
            "frame-pipe", "-vv", "encode", "--codec", "rawvideo", "--fps", "25", "-n", "50",
        ]);
        assert_eq!(cli.verbose, 2);
        let Command::Encode(args) = cli.command else {
            panic!("expected encode");
        };
        let mut settings = EncodeSettings::default();
        args.apply(&mut settings);
        assert_eq!(settings.codec, "rawvideo");
        assert_eq!(settings.fps, 25);
        assert_eq!(settings.frames, 50);
        assert_eq!(settings.gop, 60);
    }

    #[test]
    fn test_decode_stills_flags() {
        let cli = Cli::parse_from([
            "frame-pipe",
            "decode",
            "in.mkv",
            "--target-format",
            "bgr24",
            "--dump-dir",
            "/tmp/stills",
            "--every",
            "5",
        ]);
        let Command::Decode(args) = cli.command else {
            panic!("expected decode");
        };
        let mut settings = DecodeSettings::default();
        args.apply(&mut settings);
        assert_eq!(settings.input, "in.mkv");
        assert_eq!(settings.target_format, PixelFormat::Bgr24);
        assert_eq!(settings.dump_dir, Some(PathBuf::from("/tmp/stills")));
        assert_eq!(settings.every, 5);
        assert_eq!(settings.frames, None);
    }

    #[test]
    fn test_unknown_format_rejected() {
        let parsed = Cli::try_parse_from(["frame-pipe", "grab", "--target-format", "xyz"]);
        assert!(parsed.is_err());
    }
}

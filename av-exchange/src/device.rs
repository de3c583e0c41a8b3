use crate::{
    error::Result,
    input::AvInput,
    settings::{CaptureSettings, WebcamSettings},
};

/// Grab a region of an X11 display. The stream delivers BGR0 pictures.
pub fn open_screen(settings: &CaptureSettings) -> Result<AvInput> {
    settings.validate()?;
    let options = vec![
        ("video_size".to_string(), settings.video_size()),
        ("framerate".to_string(), settings.fps.to_string()),
        ("draw_mouse".to_string(), "0".to_string()),
    ];
    AvInput::open(&settings.url(), Some("x11grab"), &options)
}

/// Open a v4l2 camera with the configured `input_format`.
pub fn open_webcam(settings: &WebcamSettings) -> Result<AvInput> {
    settings.validate()?;
    AvInput::open(&settings.device, Some("v4l2"), &settings.options())
}

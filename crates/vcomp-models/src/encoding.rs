//! Output encoding options for rendered compositions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default output frame rate
pub const DEFAULT_FPS: u32 = 30;
/// Default encoding preset
pub const DEFAULT_PRESET: &str = "fast";
/// Default CRF (Constant Rate Factor)
pub const DEFAULT_CRF: u8 = 20;
/// Default audio bitrate
pub const DEFAULT_AUDIO_BITRATE: &str = "128k";
/// Audio sample rate every segment is resampled to before joining
pub const AUDIO_SAMPLE_RATE: u32 = 48_000;

/// Output container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Mp4,
    Webm,
    Mov,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Webm => "webm",
            OutputFormat::Mov => "mov",
        }
    }

    fn software_video_codec(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 | OutputFormat::Mov => "libx264",
            OutputFormat::Webm => "libvpx-vp9",
        }
    }

    pub fn audio_codec(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 | OutputFormat::Mov => "aac",
            OutputFormat::Webm => "libopus",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mp4" => Ok(OutputFormat::Mp4),
            "webm" => Ok(OutputFormat::Webm),
            "mov" => Ok(OutputFormat::Mov),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

/// Hardware-acceleration hint.
///
/// Advisory: formats without a matching hardware encoder (WebM) fall back
/// to the software codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum HardwareAccel {
    #[default]
    None,
    Nvenc,
    Vaapi,
    VideoToolbox,
}

impl HardwareAccel {
    /// Whether this hint applies to the given container.
    pub fn applies_to(&self, format: OutputFormat) -> bool {
        *self != HardwareAccel::None && format != OutputFormat::Webm
    }

    /// Arguments placed before the first `-i`.
    pub fn input_args(&self) -> Vec<String> {
        match self {
            HardwareAccel::None => Vec::new(),
            HardwareAccel::Nvenc => vec!["-hwaccel".into(), "cuda".into()],
            HardwareAccel::Vaapi => vec!["-vaapi_device".into(), "/dev/dri/renderD128".into()],
            HardwareAccel::VideoToolbox => vec!["-hwaccel".into(), "videotoolbox".into()],
        }
    }

    /// Filter that moves frames onto the device before encoding.
    pub fn upload_filter(&self) -> Option<&'static str> {
        match self {
            HardwareAccel::Vaapi => Some("format=nv12,hwupload"),
            _ => None,
        }
    }

    fn video_codec(&self) -> Option<&'static str> {
        match self {
            HardwareAccel::None => None,
            HardwareAccel::Nvenc => Some("h264_nvenc"),
            HardwareAccel::Vaapi => Some("h264_vaapi"),
            HardwareAccel::VideoToolbox => Some("h264_videotoolbox"),
        }
    }
}

/// Output resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Round both sides down to even numbers (required by yuv420p).
    pub fn even(self) -> Self {
        Self {
            width: (self.width & !1).max(2),
            height: (self.height & !1).max(2),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

fn default_fps() -> u32 {
    DEFAULT_FPS
}
fn default_preset() -> String {
    DEFAULT_PRESET.to_string()
}
fn default_crf() -> u8 {
    DEFAULT_CRF
}
fn default_audio_bitrate() -> String {
    DEFAULT_AUDIO_BITRATE.to_string()
}

/// Output options carried by a composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OutputOptions {
    /// Container format
    #[serde(default)]
    pub format: OutputFormat,

    /// Output resolution; `None` keeps the content clip's dimensions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,

    /// Output frame rate
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Hardware-acceleration hint
    #[serde(default)]
    pub hardware_acceleration: HardwareAccel,

    /// Quality (0-51, lower is better)
    #[serde(default = "default_crf")]
    pub crf: u8,

    /// Encoder preset
    #[serde(default = "default_preset")]
    pub preset: String,

    /// Audio bitrate
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            resolution: None,
            fps: DEFAULT_FPS,
            hardware_acceleration: HardwareAccel::None,
            crf: DEFAULT_CRF,
            preset: DEFAULT_PRESET.to_string(),
            audio_bitrate: DEFAULT_AUDIO_BITRATE.to_string(),
        }
    }
}

impl OutputOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.resolution = Some(Resolution::new(width, height));
        self
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps.max(1);
        self
    }

    pub fn with_hardware_acceleration(mut self, accel: HardwareAccel) -> Self {
        self.hardware_acceleration = accel;
        self
    }

    /// Hardware hint after applying format fallbacks.
    pub fn effective_accel(&self) -> HardwareAccel {
        if self.hardware_acceleration.applies_to(self.format) {
            self.hardware_acceleration
        } else {
            HardwareAccel::None
        }
    }

    /// Video codec for this format and hardware hint.
    pub fn video_codec(&self) -> &'static str {
        self.effective_accel()
            .video_codec()
            .unwrap_or_else(|| self.format.software_video_codec())
    }

    /// Convert to FFmpeg output arguments (codecs, quality, container flags).
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        let accel = self.effective_accel();
        let mut args = vec!["-c:v".to_string(), self.video_codec().to_string()];

        match accel {
            HardwareAccel::Nvenc => {
                // CRF is not used with NVENC, use -cq instead
                args.extend(["-preset".to_string(), "p4".to_string()]);
                args.extend(["-cq".to_string(), self.crf.to_string()]);
            }
            HardwareAccel::Vaapi => {
                args.extend(["-qp".to_string(), self.crf.to_string()]);
            }
            HardwareAccel::VideoToolbox => {
                args.extend(["-q:v".to_string(), "65".to_string()]);
            }
            HardwareAccel::None => {
                if self.format == OutputFormat::Webm {
                    args.extend(["-b:v".to_string(), "0".to_string()]);
                } else {
                    args.extend(["-preset".to_string(), self.preset.clone()]);
                }
                args.extend(["-crf".to_string(), self.crf.to_string()]);
            }
        }

        if accel != HardwareAccel::Vaapi {
            args.extend(["-pix_fmt".to_string(), "yuv420p".to_string()]);
        }

        args.extend(["-r".to_string(), self.fps.to_string()]);

        args.extend([
            "-c:a".to_string(),
            self.format.audio_codec().to_string(),
            "-b:a".to_string(),
            self.audio_bitrate.clone(),
        ]);

        if matches!(self.format, OutputFormat::Mp4 | OutputFormat::Mov) {
            args.extend(["-movflags".to_string(), "+faststart".to_string()]);
        }

        args
    }
}

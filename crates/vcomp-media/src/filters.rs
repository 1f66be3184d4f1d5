//! Filter graph construction for composition renders.
//!
//! The graph normalizes every segment to one output geometry, chains them
//! with `xfade`/`acrossfade` (or `concat` when there is no crossfade), then
//! stacks overlay windows on the joined video.

use vcomp_models::encoding::AUDIO_SAMPLE_RATE;
use vcomp_models::{OverlayConfig, PositionPreset, Resolution};

/// Final video label.
pub const VIDEO_OUT: &str = "vout";
/// Final audio label.
pub const AUDIO_OUT: &str = "aout";

/// Where a segment's audio comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentAudio {
    /// The segment's own first audio stream
    Stream,
    /// A generated silence input at this index
    Silence(usize),
}

/// One sequential segment (intro, content or outro).
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentSpec {
    pub input: usize,
    pub duration: f64,
    pub audio: SegmentAudio,
}

/// One overlay window drawn on the joined video.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlaySpec {
    pub input: usize,
    pub config: OverlayConfig,
}

/// Everything needed to lay out a render graph.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphSpec {
    pub resolution: Resolution,
    pub fps: u32,
    pub crossfade: f64,
    pub segments: Vec<SegmentSpec>,
    pub overlays: Vec<OverlaySpec>,
    /// Seconds from output start to content start
    pub overlay_offset: f64,
    /// Trailing filter for hardware upload, if any
    pub upload_filter: Option<&'static str>,
}

impl GraphSpec {
    /// Whether boundaries are joined with a crossfade.
    pub fn uses_crossfade(&self) -> bool {
        self.crossfade > 0.0 && self.segments.len() > 1
    }

    /// Output length in seconds.
    pub fn output_duration(&self) -> f64 {
        let total: f64 = self.segments.iter().map(|s| s.duration).sum();
        let boundaries = self.segments.len().saturating_sub(1) as f64;
        if self.uses_crossfade() {
            (total - self.crossfade * boundaries).max(0.0)
        } else {
            total
        }
    }
}

/// Content offset inside the output when an intro of `intro_duration` precedes it.
pub fn content_offset(intro_duration: Option<f64>, crossfade: f64) -> f64 {
    match intro_duration {
        Some(intro) => (intro - crossfade.max(0.0)).max(0.0),
        None => 0.0,
    }
}

fn secs(value: f64) -> String {
    format!("{:.3}", value.max(0.0))
}

fn normalize_video(segment: &SegmentSpec, index: usize, res: Resolution, fps: u32) -> String {
    let (w, h) = (res.width, res.height);
    format!(
        "[{input}:v]trim=duration={dur},setpts=PTS-STARTPTS,\
         scale={w}:{h}:force_original_aspect_ratio=decrease,\
         pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black,setsar=1,fps={fps},format=yuv420p[v{index}]",
        input = segment.input,
        dur = secs(segment.duration),
    )
}

fn normalize_audio(segment: &SegmentSpec, index: usize) -> String {
    let source = match segment.audio {
        SegmentAudio::Stream => format!("{}:a", segment.input),
        SegmentAudio::Silence(input) => format!("{input}:a"),
    };
    format!(
        "[{source}]atrim=duration={dur},asetpts=PTS-STARTPTS,\
         aresample={AUDIO_SAMPLE_RATE},aformat=sample_fmts=fltp:channel_layouts=stereo[a{index}]",
        dur = secs(segment.duration),
    )
}

/// Pixel expression for the overlay's x/y on a `res` frame.
fn overlay_xy(config: &OverlayConfig, res: Resolution) -> (String, String) {
    let pos = &config.position;
    let mx = (pos.x * res.width as f64).round() as i64;
    let my = (pos.y * res.height as f64).round() as i64;
    match pos.preset {
        PositionPreset::TopLeft => (mx.to_string(), my.to_string()),
        PositionPreset::TopRight => (format!("W-w-{mx}"), my.to_string()),
        PositionPreset::BottomLeft => (mx.to_string(), format!("H-h-{my}")),
        PositionPreset::BottomRight => (format!("W-w-{mx}"), format!("H-h-{my}")),
        PositionPreset::Center => ("(W-w)/2".to_string(), "(H-h)/2".to_string()),
        PositionPreset::Custom => (mx.to_string(), my.to_string()),
    }
}

/// Overlay width in pixels, kept even for chroma subsampling.
fn overlay_width(size: f64, res: Resolution) -> u32 {
    let width = (size.clamp(0.0, 1.0) * res.width as f64).round() as u32;
    (width & !1).max(2)
}

fn prepare_overlay(spec: &OverlaySpec, index: usize, offset: f64, res: Resolution) -> String {
    let config = &spec.config;
    let start = config.start_time + offset;
    let end = start + config.duration;
    let half = config.duration / 2.0;
    let fade_in = config.transition.fade_in.clamp(0.0, half);
    let fade_out = config.transition.fade_out.clamp(0.0, half);

    let mut chain = vec![
        format!("trim=duration={}", secs(config.duration)),
        format!("setpts=PTS-STARTPTS+{}/TB", secs(start)),
        format!("scale={}:-2", overlay_width(config.position.size, res)),
        "format=rgba".to_string(),
    ];
    if fade_in > 0.0 {
        chain.push(format!(
            "fade=t=in:st={}:d={}:alpha=1",
            secs(start),
            secs(fade_in)
        ));
    }
    if fade_out > 0.0 {
        chain.push(format!(
            "fade=t=out:st={}:d={}:alpha=1",
            secs(end - fade_out),
            secs(fade_out)
        ));
    }
    chain.push(format!(
        "colorchannelmixer=aa={:.3}",
        config.opacity.clamp(0.0, 1.0)
    ));

    format!("[{}:v]{}[ov{index}]", spec.input, chain.join(","))
}

/// Build the `-filter_complex` graph ending in `[vout]` and `[aout]`.
pub fn build_filter_graph(spec: &GraphSpec) -> String {
    let mut filters = Vec::new();
    let res = spec.resolution.even();

    for (i, segment) in spec.segments.iter().enumerate() {
        filters.push(normalize_video(segment, i, res, spec.fps));
        filters.push(normalize_audio(segment, i));
    }

    let has_overlays = !spec.overlays.is_empty();
    let needs_tail = has_overlays || spec.upload_filter.is_some();
    let joined_video = if needs_tail { "vjoin" } else { VIDEO_OUT };

    match spec.segments.len() {
        0 => {}
        1 => {
            filters.push(format!("[v0]null[{joined_video}]"));
            filters.push(format!("[a0]anull[{AUDIO_OUT}]"));
        }
        n if spec.uses_crossfade() => {
            let c = spec.crossfade;
            let mut elapsed = 0.0;
            let mut v_prev = "v0".to_string();
            let mut a_prev = "a0".to_string();
            for i in 1..n {
                elapsed += spec.segments[i - 1].duration;
                let offset = elapsed - c * i as f64;
                let last = i == n - 1;
                let v_next = if last {
                    joined_video.to_string()
                } else {
                    format!("vx{i}")
                };
                let a_next = if last {
                    AUDIO_OUT.to_string()
                } else {
                    format!("ax{i}")
                };
                filters.push(format!(
                    "[{v_prev}][v{i}]xfade=transition=fade:duration={}:offset={}[{v_next}]",
                    secs(c),
                    secs(offset)
                ));
                filters.push(format!(
                    "[{a_prev}][a{i}]acrossfade=d={}:c1=tri:c2=tri[{a_next}]",
                    secs(c)
                ));
                v_prev = v_next;
                a_prev = a_next;
            }
        }
        n => {
            let pads: String = (0..n).map(|i| format!("[v{i}][a{i}]")).collect();
            filters.push(format!(
                "{pads}concat=n={n}:v=1:a=1[{joined_video}][{AUDIO_OUT}]"
            ));
        }
    }

    if needs_tail {
        let mut current = joined_video.to_string();
        for (k, overlay) in spec.overlays.iter().enumerate() {
            filters.push(prepare_overlay(overlay, k, spec.overlay_offset, res));
            let start = overlay.config.start_time + spec.overlay_offset;
            let end = start + overlay.config.duration;
            let (x, y) = overlay_xy(&overlay.config, res);
            let last = k == spec.overlays.len() - 1 && spec.upload_filter.is_none();
            let next = if last {
                VIDEO_OUT.to_string()
            } else {
                format!("vo{k}")
            };
            filters.push(format!(
                "[{current}][ov{k}]overlay=x={x}:y={y}:eof_action=pass:enable='between(t,{},{})'[{next}]",
                secs(start),
                secs(end)
            ));
            current = next;
        }
        if let Some(upload) = spec.upload_filter {
            filters.push(format!("[{current}]{upload}[{VIDEO_OUT}]"));
        }
    }

    filters.join(";")
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcomp_models::{AssetId, OverlayPosition, OverlayTransition};

    fn segment(input: usize, duration: f64) -> SegmentSpec {
        SegmentSpec {
            input,
            duration,
            audio: SegmentAudio::Stream,
        }
    }

    fn overlay(input: usize, preset: PositionPreset, start: f64, duration: f64) -> OverlaySpec {
        OverlaySpec {
            input,
            config: OverlayConfig {
                asset_id: AssetId::from("logo"),
                start_time: start,
                duration,
                position: OverlayPosition::preset(preset, 0.25),
                opacity: 0.8,
                transition: OverlayTransition::default(),
            },
        }
    }

    fn spec(segments: Vec<SegmentSpec>, crossfade: f64) -> GraphSpec {
        GraphSpec {
            resolution: Resolution::new(1920, 1080),
            fps: 30,
            crossfade,
            segments,
            overlays: Vec::new(),
            overlay_offset: 0.0,
            upload_filter: None,
        }
    }

    #[test]
    fn test_single_segment_passthrough() {
        let graph = build_filter_graph(&spec(vec![segment(0, 60.0)], 1.0));
        assert!(graph.contains("scale=1920:1080:force_original_aspect_ratio=decrease"));
        assert!(graph.contains("fps=30"));
        assert!(graph.contains("[v0]null[vout]"));
        assert!(graph.contains("[a0]anull[aout]"));
        assert!(!graph.contains("xfade"));
    }

    #[test]
    fn test_crossfade_offsets() {
        let graph = build_filter_graph(&spec(
            vec![segment(0, 5.0), segment(1, 60.0), segment(2, 4.0)],
            1.0,
        ));
        // intro 5 - 1 = 4; intro + content - 2c = 63
        assert!(graph.contains("[v0][v1]xfade=transition=fade:duration=1.000:offset=4.000[vx1]"));
        assert!(graph.contains("[vx1][v2]xfade=transition=fade:duration=1.000:offset=63.000[vout]"));
        assert!(graph.contains("[a0][a1]acrossfade=d=1.000"));
        assert!(graph.contains("[ax1][a2]acrossfade=d=1.000:c1=tri:c2=tri[aout]"));
    }

    #[test]
    fn test_zero_crossfade_uses_concat() {
        let s = spec(vec![segment(0, 5.0), segment(1, 60.0)], 0.0);
        let graph = build_filter_graph(&s);
        assert!(graph.contains("[v0][a0][v1][a1]concat=n=2:v=1:a=1[vout][aout]"));
        assert_eq!(s.output_duration(), 65.0);
    }

    #[test]
    fn test_silent_segment_uses_generated_audio() {
        let mut s = spec(vec![segment(0, 5.0), segment(1, 60.0)], 1.0);
        s.segments[0].audio = SegmentAudio::Silence(2);
        let graph = build_filter_graph(&s);
        assert!(graph.contains("[2:a]atrim=duration=5.000"));
        assert!(!graph.contains("[0:a]"));
    }

    #[test]
    fn test_overlay_chain_and_offset() {
        let mut s = spec(vec![segment(0, 5.0), segment(1, 60.0)], 1.0);
        s.overlay_offset = content_offset(Some(5.0), 1.0);
        s.overlays = vec![
            overlay(2, PositionPreset::BottomRight, 10.0, 5.0),
            overlay(2, PositionPreset::TopLeft, 30.0, 5.0),
        ];
        let graph = build_filter_graph(&s);

        assert!(graph.contains("[vjoin][ov0]overlay=x=W-w-77:y=H-h-43"));
        // Content time 10s lands at 14s of output
        assert!(graph.contains("enable='between(t,14.000,19.000)'[vo0]"));
        assert!(graph.contains("[vo0][ov1]overlay=x=77:y=43"));
        assert!(graph.contains("enable='between(t,34.000,39.000)'[vout]"));
        assert!(graph.contains("scale=480:-2,format=rgba"));
        assert!(graph.contains("colorchannelmixer=aa=0.800"));
        assert!(graph.contains("fade=t=in:st=14.000:d=0.500:alpha=1"));
        assert!(graph.contains("fade=t=out:st=18.500:d=0.500:alpha=1"));
    }

    #[test]
    fn test_center_and_custom_positions() {
        let res = Resolution::new(1000, 500);
        let center = overlay(1, PositionPreset::Center, 0.0, 2.0);
        assert_eq!(
            overlay_xy(&center.config, res),
            ("(W-w)/2".to_string(), "(H-h)/2".to_string())
        );

        let mut custom = overlay(1, PositionPreset::Custom, 0.0, 2.0);
        custom.config.position = OverlayPosition::custom(0.1, 0.2, 0.3);
        assert_eq!(
            overlay_xy(&custom.config, res),
            ("100".to_string(), "100".to_string())
        );
    }

    #[test]
    fn test_upload_filter_is_last() {
        let mut s = spec(vec![segment(0, 10.0)], 0.0);
        s.upload_filter = Some("format=nv12,hwupload");
        let graph = build_filter_graph(&s);
        assert!(graph.ends_with("[vjoin]format=nv12,hwupload[vout]"));
    }

    #[test]
    fn test_content_offset() {
        assert_eq!(content_offset(None, 1.0), 0.0);
        assert_eq!(content_offset(Some(5.0), 1.0), 4.0);
        assert_eq!(content_offset(Some(5.0), 0.0), 5.0);
    }
}

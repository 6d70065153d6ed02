//! Final mux invocation
//!
//! The encode itself belongs to ffmpeg; this module owns picking the
//! background clip, assembling the argv, and mapping the process outcome
//! back onto the pipeline's error taxonomy. The overlay frames ride on
//! top of the (looped) background, the per-message audio files are
//! concatenated underneath.

use rand::prelude::IndexedRandom;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::{PipelineError, PipelineResult};

/// Extensions considered playable background clips
pub const VIDEO_EXTENSIONS: [&str; 5] = ["mp4", "avi", "mov", "mkv", "webm"];

/// Everything one mux run needs
#[derive(Debug, Clone)]
pub struct MuxRequest {
    /// Directory holding `frame_%06d.png`
    pub frames_dir: PathBuf,
    pub fps: u32,
    /// Ordered narration audio, concatenated in sequence
    pub audio_paths: Vec<PathBuf>,
    /// Looped under the overlay when present
    pub background: Option<PathBuf>,
    pub output: PathBuf,
}

/// Pick a random clip from `dir`, filtering by extension. An absent or
/// empty directory yields `None` and the mux runs frames-only.
pub fn pick_background_clip(dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let clips: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();

    if clips.is_empty() {
        warn!(dir = %dir.display(), "no background clips found");
        return None;
    }
    clips.choose(&mut rand::rng()).cloned()
}

/// Build the full ffmpeg argv for a request. Pure, so the command shape
/// is testable without spawning anything.
pub fn mux_args(request: &MuxRequest) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".into()];
    let frame_pattern = request.frames_dir.join("frame_%06d.png");

    let audio_inputs = request.audio_paths.len();
    let (overlay_input, first_audio_input) = match &request.background {
        Some(background) => {
            args.extend([
                "-stream_loop".into(),
                "-1".into(),
                "-i".into(),
                background.display().to_string(),
            ]);
            (1, 2)
        }
        None => (0, 1),
    };

    args.extend([
        "-framerate".into(),
        request.fps.to_string(),
        "-i".into(),
        frame_pattern.display().to_string(),
    ]);
    for audio in &request.audio_paths {
        args.extend(["-i".into(), audio.display().to_string()]);
    }

    let mut filters = Vec::new();
    let audio_refs: String = (0..audio_inputs)
        .map(|i| format!("[{}:a]", first_audio_input + i))
        .collect();
    filters.push(format!("{audio_refs}concat=n={audio_inputs}:v=0:a=1[aout]"));

    let video_out = if request.background.is_some() {
        filters.push(format!(
            "[0:v][{overlay_input}:v]overlay=(W-w)/2:H-h:shortest=1[vout]"
        ));
        "[vout]".to_string()
    } else {
        format!("{overlay_input}:v")
    };

    args.extend([
        "-filter_complex".into(),
        filters.join(";"),
        "-map".into(),
        video_out,
        "-map".into(),
        "[aout]".into(),
        "-c:v".into(),
        "libx264".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-c:a".into(),
        "aac".into(),
        "-shortest".into(),
        request.output.display().to_string(),
    ]);

    args
}

/// Spawn ffmpeg and wait for it.
///
/// A missing binary is an infrastructure failure (the deploy promised it);
/// a non-zero exit is reported with ffmpeg's own stderr.
pub async fn run_mux(request: &MuxRequest) -> PipelineResult<PathBuf> {
    if request.audio_paths.is_empty() {
        return Err(PipelineError::ProtocolError(
            "mux requested with no audio files".into(),
        ));
    }

    let args = mux_args(request);
    info!(
        frames = %request.frames_dir.display(),
        audio = request.audio_paths.len(),
        background = request.background.is_some(),
        "invoking ffmpeg"
    );

    let output = Command::new("ffmpeg")
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PipelineError::TransportUnavailable("ffmpeg binary not found".into())
            } else {
                PipelineError::Io(e)
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PipelineError::RemoteError {
            status: output.status.code().unwrap_or(-1) as u16,
            body: stderr.lines().rev().take(12).collect::<Vec<_>>().join("\n"),
        });
    }

    info!(output = %request.output.display(), "mux finished");
    Ok(request.output.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(background: Option<&str>) -> MuxRequest {
        MuxRequest {
            frames_dir: PathBuf::from("/tmp/frames"),
            fps: 30,
            audio_paths: vec![PathBuf::from("/tmp/a0.wav"), PathBuf::from("/tmp/a1.wav")],
            background: background.map(PathBuf::from),
            output: PathBuf::from("/tmp/out.mp4"),
        }
    }

    #[test]
    fn args_with_background_loop_and_overlay() {
        let args = mux_args(&request(Some("/clips/bg.mp4")));
        let joined = args.join(" ");

        assert!(joined.starts_with("-y -stream_loop -1 -i /clips/bg.mp4"));
        assert!(joined.contains("-framerate 30 -i /tmp/frames/frame_%06d.png"));
        // audio inputs are 2 and 3; frames are input 1
        assert!(joined.contains("[2:a][3:a]concat=n=2:v=0:a=1[aout]"));
        assert!(joined.contains("[0:v][1:v]overlay=(W-w)/2:H-h:shortest=1[vout]"));
        assert!(joined.contains("-map [vout] -map [aout]"));
        assert!(joined.ends_with("/tmp/out.mp4"));
    }

    #[test]
    fn args_without_background_use_frames_directly() {
        let args = mux_args(&request(None));
        let joined = args.join(" ");

        assert!(!joined.contains("-stream_loop"));
        assert!(joined.contains("[1:a][2:a]concat=n=2:v=0:a=1[aout]"));
        assert!(joined.contains("-map 0:v -map [aout]"));
    }

    #[test]
    fn background_pick_filters_extensions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("clip.MP4"), b"x").unwrap();

        let picked = pick_background_clip(dir.path()).unwrap();
        assert!(picked.file_name().unwrap().eq("clip.MP4"));
    }

    #[test]
    fn background_pick_handles_missing_and_empty_dirs() {
        assert!(pick_background_clip(Path::new("/nonexistent/clips")).is_none());

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("readme.md"), b"x").unwrap();
        assert!(pick_background_clip(dir.path()).is_none());
    }
}

//! Audio file helpers
//!
//! WAV duration probing for the orchestrator's timeline math, and the
//! output naming convention shared by the worker and its tests.

use std::path::{Path, PathBuf};

use crate::error::{PipelineError, PipelineResult};

/// Duration of a WAV file in seconds, from its header.
pub fn wav_duration_secs(path: &Path) -> PipelineResult<f64> {
    let reader = hound::WavReader::open(path).map_err(|e| {
        PipelineError::ProtocolError(format!("cannot probe {}: {e}", path.display()))
    })?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(PipelineError::ProtocolError(format!(
            "{} reports a zero sample rate",
            path.display()
        )));
    }
    Ok(f64::from(reader.duration()) / f64::from(spec.sample_rate))
}

/// Probe a whole ordered list of files, preserving order.
pub fn probe_durations(paths: &[PathBuf]) -> PipelineResult<Vec<f64>> {
    paths.iter().map(|p| wav_duration_secs(p)).collect()
}

/// Output filename for one voice row: `{voice_id}_{character}.wav`, with
/// the character name reduced to filesystem-safe characters.
pub fn voice_output_filename(voice_id: &uuid::Uuid, character_name: &str) -> String {
    let safe: String = character_name
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    format!("{voice_id}_{safe}.wav")
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn write_wav(path: &Path, seconds: f64, sample_rate: u32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..(seconds * f64::from(sample_rate)) as u32 {
            writer.write_sample(0_i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn probes_duration_from_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        write_wav(&path, 1.25, 22050);

        let duration = wav_duration_secs(&path).unwrap();
        assert!((duration - 1.25).abs() < 1e-3);
    }

    #[test]
    fn probes_list_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.wav");
        let b = dir.path().join("b.wav");
        write_wav(&a, 0.5, 16000);
        write_wav(&b, 2.0, 16000);

        let durations = probe_durations(&[a, b]).unwrap();
        assert!((durations[0] - 0.5).abs() < 1e-3);
        assert!((durations[1] - 2.0).abs() < 1e-3);
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = wav_duration_secs(Path::new("/nonexistent/x.wav")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/x.wav"));
    }

    #[test]
    fn output_filename_sanitizes_character() {
        let id = Uuid::nil();
        assert_eq!(
            voice_output_filename(&id, "Ana Clara/β"),
            format!("{id}_Ana_Clara_β.wav")
        );
    }
}

//! Text-to-speech collaborator boundary
//!
//! The neural model lives behind an HTTP server; this module only knows
//! how to ask it for a waveform and where to put the result. A silence
//! engine stands in for the server in mock runs and tests.
//!
//! Synthesis failures never escalate past the row they belong to, so
//! every error out of here is `SynthesisFailure`.

use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::TtsConfig;
use crate::error::{PipelineError, PipelineResult};

/// Sample rate of generated waveforms
pub const TTS_SAMPLE_RATE: u32 = 22050;

/// One synthesis call: `text` spoken in the voice of `reference`, written
/// as a finite WAV file at `output`.
#[async_trait]
pub trait TtsEngine: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        reference: Option<&Path>,
        output: &Path,
    ) -> PipelineResult<()>;

    fn name(&self) -> &str;

    /// Whether the engine tolerates concurrent in-process calls. Unknown
    /// engines report false and the worker keeps the pool at one.
    fn concurrency_safe(&self) -> bool {
        false
    }
}

/// Pick the engine for this process.
pub fn engine_from_config(config: &TtsConfig) -> Arc<dyn TtsEngine> {
    if config.use_silence_engine {
        Arc::new(SilenceEngine)
    } else {
        Arc::new(CloningServerEngine::new(
            &config.server_url,
            config.max_execution_secs,
        ))
    }
}

/// Strip what the voice model cannot pronounce: control characters,
/// emoji and other symbol-plane codepoints, then collapse whitespace.
pub fn clean_text(text: &str) -> String {
    let filtered: String = text
        .chars()
        .filter(|c| !c.is_control())
        .filter(|c| (*c as u32) < 0x1F000 && !('\u{2600}'..='\u{27BF}').contains(c))
        .collect();

    filtered.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Serialize)]
struct CloneRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    speaker_wav: Option<&'a str>,
    language: &'a str,
}

/// Client for the voice-cloning TTS server.
pub struct CloningServerEngine {
    base_url: String,
    client: reqwest::Client,
}

impl CloningServerEngine {
    pub fn new(base_url: &str, max_execution_secs: u64) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(max_execution_secs))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl TtsEngine for CloningServerEngine {
    async fn synthesize(
        &self,
        text: &str,
        reference: Option<&Path>,
        output: &Path,
    ) -> PipelineResult<()> {
        let reference_str = reference.map(|p| p.to_string_lossy().into_owned());
        debug!(
            chars = text.len(),
            reference = reference_str.as_deref().unwrap_or("<default>"),
            "requesting synthesis"
        );

        let request = CloneRequest {
            text,
            speaker_wav: reference_str.as_deref(),
            language: "pt-br",
        };

        let response = self
            .client
            .post(format!("{}/api/tts", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::SynthesisFailure(format!("tts server: {e}")))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::SynthesisFailure(format!(
                "tts server returned {status}: {body}"
            )));
        }

        let wav = response
            .bytes()
            .await
            .map_err(|e| PipelineError::SynthesisFailure(format!("reading waveform: {e}")))?;
        if wav.is_empty() {
            return Err(PipelineError::SynthesisFailure(
                "tts server returned an empty waveform".into(),
            ));
        }

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output, &wav).await?;

        info!(
            bytes = wav.len(),
            path = %output.display(),
            "synthesis complete"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "cloning-server"
    }
}

/// Deterministic stand-in engine: writes silence sized to the text so
/// timing-dependent code downstream still gets distinct durations.
pub struct SilenceEngine;

impl SilenceEngine {
    fn duration_secs(text: &str) -> f64 {
        (text.chars().count() as f64 * 0.05).clamp(0.4, 3.0)
    }
}

#[async_trait]
impl TtsEngine for SilenceEngine {
    async fn synthesize(
        &self,
        text: &str,
        _reference: Option<&Path>,
        output: &Path,
    ) -> PipelineResult<()> {
        let seconds = Self::duration_secs(text);
        let samples = (seconds * f64::from(TTS_SAMPLE_RATE)) as u32;

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: TTS_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(output, spec)?;
        for _ in 0..samples {
            writer.write_sample(0_i16)?;
        }
        writer.finalize()?;

        debug!(seconds, path = %output.display(), "silence engine wrote waveform");
        Ok(())
    }

    fn name(&self) -> &str {
        "silence"
    }

    fn concurrency_safe(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_strips_emoji_and_collapses_whitespace() {
        assert_eq!(clean_text("Oi!  \n Tudo   bem? 😀"), "Oi! Tudo bem?");
        assert_eq!(clean_text("☕ café\tquente ☕"), "café quente");
        assert_eq!(clean_text("   "), "");
    }

    #[test]
    fn clean_text_keeps_accented_text() {
        assert_eq!(clean_text("Não é você?"), "Não é você?");
    }

    #[test]
    fn silence_duration_scales_with_text_within_bounds() {
        assert!((SilenceEngine::duration_secs("oi") - 0.4).abs() < f64::EPSILON);
        let mid = SilenceEngine::duration_secs("uma frase com vinte chars");
        assert!(mid > 0.4 && mid < 3.0);
        let long = "palavra ".repeat(40);
        assert!((SilenceEngine::duration_secs(&long) - 3.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn silence_engine_writes_parseable_wav() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("voices/out.wav");

        SilenceEngine
            .synthesize("Olá, tudo bem por aí?", None, &output)
            .await
            .unwrap();

        let reader = hound::WavReader::open(&output).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, TTS_SAMPLE_RATE);
        assert_eq!(spec.channels, 1);
        assert!(reader.duration() > 0);
    }
}

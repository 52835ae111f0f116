//! "Name that tune": record a short microphone sample with ffmpeg and ask a
//! fingerprint service what it is.
//!
//! Every failure (capture, network, no match, garbage reply) ends up as the
//! same user-facing message; the detail only goes to the log.

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::RecognitionConfig;
use crate::platform;

pub const NOT_IDENTIFIED_MESSAGE: &str = "Could not identify the song";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionOutcome {
    Identified { title: String, artist: String },
    /// The service answered but found nothing; `reason` is its own message.
    NotIdentified { reason: String },
}

#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("recognition endpoint is not configured")]
    NotConfigured,
    #[error("ffmpeg not found")]
    FfmpegMissing,
    #[error("capture failed: {0}")]
    Capture(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    Malformed(String),
}

/// Toast text for a finished recognition attempt.
pub fn user_message(result: &Result<RecognitionOutcome, RecognitionError>) -> String {
    match result {
        Ok(RecognitionOutcome::Identified { title, artist }) if artist.is_empty() => {
            format!("Identified: {}", title)
        }
        Ok(RecognitionOutcome::Identified { title, artist }) => {
            format!("Identified: {} - {}", title, artist)
        }
        _ => NOT_IDENTIFIED_MESSAGE.to_string(),
    }
}

/// Capture a sample and identify it.
pub async fn recognize(config: &RecognitionConfig) -> Result<RecognitionOutcome, RecognitionError> {
    if config.endpoint.trim().is_empty() {
        return Err(RecognitionError::NotConfigured);
    }
    let sample = capture_sample(config).await?;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(20))
        .build()?;
    let outcome = identify(&client, config, sample).await;
    match &outcome {
        Ok(o) => info!("[recognize] {:?}", o),
        Err(e) => warn!("[recognize] failed: {}", e),
    }
    outcome
}

/// Record `sample_secs` of mono 44.1 kHz 16-bit WAV from the configured input.
pub async fn capture_sample(config: &RecognitionConfig) -> Result<Vec<u8>, RecognitionError> {
    let ffmpeg = platform::find_ffmpeg_binary().ok_or(RecognitionError::FfmpegMissing)?;
    let secs = config.sample_secs.max(1).to_string();
    info!(
        "[recognize] capturing {}s from {}:{}",
        secs, config.input_format, config.input_device
    );

    let output = tokio::process::Command::new(&ffmpeg)
        .args([
            "-hide_banner",
            "-loglevel", "error",
            "-f", config.input_format.as_str(),
            "-i", config.input_device.as_str(),
            "-t", secs.as_str(),
            "-ac", "1",
            "-ar", "44100",
            "-sample_fmt", "s16",
            "-f", "wav",
            "pipe:1",
        ])
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true)
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RecognitionError::Capture(format!(
            "ffmpeg exited {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    if output.stdout.len() <= 44 {
        return Err(RecognitionError::Capture("empty sample".into()));
    }
    debug!("[recognize] captured {} bytes", output.stdout.len());
    Ok(output.stdout)
}

/// Post a WAV sample to the fingerprint endpoint and interpret the reply.
pub async fn identify(
    client: &reqwest::Client,
    config: &RecognitionConfig,
    sample: Vec<u8>,
) -> Result<RecognitionOutcome, RecognitionError> {
    let mut request = client
        .post(&config.endpoint)
        .header(reqwest::header::CONTENT_TYPE, "audio/wav")
        .body(sample);
    if !config.access_key.is_empty() {
        request = request.header("x-access-key", &config.access_key);
    }
    let body = request.send().await?.text().await?;
    parse_response(&body)
}

/// Interpret a fingerprint reply.
///
/// Two shapes are understood:
/// - a status envelope, `{"status":{"code":0,"msg":".."},"metadata":{"music":[..]}}`,
///   where any non-zero code means "not identified" with `status.msg` as the reason;
/// - a bare match, `{"track":{"title":..,"subtitle":..}}`.
pub fn parse_response(body: &str) -> Result<RecognitionOutcome, RecognitionError> {
    let json: Value = serde_json::from_str(body.trim())
        .map_err(|e| RecognitionError::Malformed(e.to_string()))?;

    if let Some(status) = json.get("status") {
        let code = status.get("code").and_then(Value::as_i64).ok_or_else(|| {
            RecognitionError::Malformed("status without code".into())
        })?;
        if code != 0 {
            let reason = status
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Ok(RecognitionOutcome::NotIdentified { reason });
        }
        let first = json
            .pointer("/metadata/music/0")
            .filter(|m| m.get("title").is_some());
        return Ok(match first {
            Some(music) => RecognitionOutcome::Identified {
                title: text(music, "/title").unwrap_or_default(),
                artist: text(music, "/artists/0/name").unwrap_or_default(),
            },
            None => RecognitionOutcome::NotIdentified {
                reason: "no result".into(),
            },
        });
    }

    if let Some(track) = json.get("track") {
        let title = text(track, "/title")
            .ok_or_else(|| RecognitionError::Malformed("track without title".into()))?;
        return Ok(RecognitionOutcome::Identified {
            title,
            artist: text(track, "/subtitle").unwrap_or_default(),
        });
    }

    Err(RecognitionError::Malformed(
        "neither status nor track present".into(),
    ))
}

fn text(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

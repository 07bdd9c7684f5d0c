//! Streamed invocation of an external metadata tool, with a bounded pool
//! capping concurrent child processes.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use emulsion_model::{AssetKind, AssetMetadata, AudioMetadata, PhotoMetadata, VideoMetadata};
use serde_json::Value;
use tokio::io::{self, AsyncRead};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{error, warn};

use crate::error::{EngineError, Result};

use super::fields;

/// Typed metadata plus the one field ([`Asset::taken_at`]) that lives
/// outside `AssetMetadata` because every kind needs it for the date-based
/// storage strategy, not just photos.
pub struct ExtractionOutcome {
    pub metadata: AssetMetadata,
    pub taken_at: Option<DateTime<Utc>>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Upper bound on how long the extractor will buffer the input stream
/// before handing it to the child process, and the floor for the
/// size-scaled timeout.
const BASE_TIMEOUT: Duration = Duration::from_secs(30);
/// Extra timeout granted per megabyte of declared input size, so very large
/// files don't spuriously fail under the base timeout.
const TIMEOUT_PER_MB: Duration = Duration::from_millis(50);

pub struct MetadataExtractor {
    semaphore: Arc<Semaphore>,
    exiftool_path: String,
    ffprobe_path: String,
}

impl MetadataExtractor {
    pub fn new(max_concurrent: usize, exiftool_path: impl Into<String>, ffprobe_path: impl Into<String>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            exiftool_path: exiftool_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }

    fn timeout_for(size_bytes: u64) -> Duration {
        let mb = size_bytes / (1024 * 1024);
        BASE_TIMEOUT + TIMEOUT_PER_MB * mb as u32
    }

    /// Extracts typed metadata from `reader` without buffering the whole
    /// file — bytes are streamed directly into the child process's stdin.
    /// Missing fields simply stay unset; only a critical tool
    /// failure (non-zero exit with content on stderr) is treated as fatal.
    pub async fn extract<R>(
        &self,
        mut reader: R,
        kind: AssetKind,
        size_bytes: u64,
    ) -> Result<ExtractionOutcome>
    where
        R: AsyncRead + Unpin,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| EngineError::Cancelled)?;

        let (tool, args): (&str, Vec<&str>) = match kind {
            AssetKind::Photo => (&self.exiftool_path, vec!["-json", "-"]),
            AssetKind::Video | AssetKind::Audio => (
                &self.ffprobe_path,
                vec![
                    "-v", "quiet", "-print_format", "json", "-show_format", "-show_streams", "-",
                ],
            ),
            AssetKind::Unknown => {
                return Ok(ExtractionOutcome {
                    metadata: AssetMetadata::None,
                    taken_at: None,
                    width: None,
                    height: None,
                })
            }
        };

        let mut child = Command::new(tool)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EngineError::ExternalTool {
                tool: tool.to_string(),
                message: e.to_string(),
            })?;

        let mut stdin = child.stdin.take().expect("stdin piped");
        // Bytes are piped into the child's stdin as they're read rather
        // than buffered into memory first; `wait_with_output` drains
        // stdout/stderr concurrently on tokio's side, so running the copy
        // alongside it avoids the classic pipe deadlock on large inputs.
        let copy_fut = async move {
            let result = io::copy(&mut reader, &mut stdin).await;
            drop(stdin);
            result
        };

        let timeout = Self::timeout_for(size_bytes);
        let (copy_result, wait_result) = tokio::join!(copy_fut, tokio::time::timeout(timeout, child.wait_with_output()));

        if let Err(e) = copy_result {
            warn!(tool, error = %e, "failed writing input to metadata tool stdin");
        }

        let output = wait_result
            .map_err(|_| EngineError::ExternalToolTimeout {
                tool: tool.to_string(),
                secs: timeout.as_secs(),
            })?
            .map_err(|e| EngineError::ExternalTool {
                tool: tool.to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.trim().is_empty() {
                // Warning-level failure: tool exited non-zero but produced
                // no diagnostic — treat as "no metadata available".
                warn!(tool, "metadata tool exited non-zero with empty stderr");
                return Ok(ExtractionOutcome {
                    metadata: AssetMetadata::None,
                    taken_at: None,
                    width: None,
                    height: None,
                });
            }
            error!(tool, stderr = %stderr, "metadata tool failed");
            return Err(EngineError::ExternalTool {
                tool: tool.to_string(),
                message: stderr.trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed: Value = serde_json::from_str(stdout.trim())
            .or_else(|_| {
                // exiftool -json emits an array with one object.
                serde_json::from_str::<Vec<Value>>(stdout.trim())
                    .map(|mut arr| arr.pop().unwrap_or(Value::Null))
            })
            .unwrap_or(Value::Null);

        Ok(match kind {
            AssetKind::Photo => {
                let (width, height) = photo_dimensions(&parsed);
                let video = extract_photo(&parsed);
                let taken_at = fields::parse_taken_time(&parsed);
                ExtractionOutcome {
                    metadata: AssetMetadata::Photo(video),
                    taken_at,
                    width,
                    height,
                }
            }
            AssetKind::Video => {
                let (width, height) = video_dimensions(&parsed);
                let video = extract_video(&parsed);
                let taken_at = video.recording_time;
                ExtractionOutcome {
                    metadata: AssetMetadata::Video(video),
                    taken_at,
                    width,
                    height,
                }
            }
            AssetKind::Audio => ExtractionOutcome {
                metadata: AssetMetadata::Audio(extract_audio(&parsed)),
                taken_at: None,
                width: None,
                height: None,
            },
            AssetKind::Unknown => ExtractionOutcome {
                metadata: AssetMetadata::None,
                taken_at: None,
                width: None,
                height: None,
            },
        })
    }
}

/// Width/height as stored on the asset row, with the EXIF orientation swap
/// already applied.
fn photo_dimensions(json: &Value) -> (Option<u32>, Option<u32>) {
    let orientation = json.get("Orientation");
    let mut width = json.get("ImageWidth").and_then(Value::as_u64);
    let mut height = json.get("ImageHeight").and_then(Value::as_u64);
    if orientation.is_some_and(fields::orientation_swaps_dimensions) {
        std::mem::swap(&mut width, &mut height);
    }
    (width.map(|v| v as u32), height.map(|v| v as u32))
}

fn video_dimensions(json: &Value) -> (Option<u32>, Option<u32>) {
    let video_stream = json.get("streams").and_then(Value::as_array).and_then(|streams| {
        streams
            .iter()
            .find(|s| s.get("codec_type").and_then(Value::as_str) == Some("video"))
    });
    let width = video_stream.and_then(|s| s.get("width")).and_then(Value::as_u64);
    let height = video_stream.and_then(|s| s.get("height")).and_then(Value::as_u64);
    (width.map(|v| v as u32), height.map(|v| v as u32))
}

fn extract_photo(json: &Value) -> PhotoMetadata {
    PhotoMetadata {
        camera_make: fields::first_str(json, &["Make"]).map(str::to_string),
        camera_model: fields::first_str(json, fields::CAMERA_MODEL_TAGS).map(str::to_string),
        lens: fields::first_str(json, fields::LENS_TAGS).map(str::to_string),
        exposure_time: fields::parse_exposure_time(json),
        f_number: fields::parse_f_number(json),
        iso: fields::parse_iso(json),
        focal_length_mm: fields::parse_focal_length_mm(json),
        description: fields::first_str(json, fields::DESCRIPTION_TAGS).map(str::to_string),
        gps_latitude: fields::parse_gps_latitude(json),
        gps_longitude: fields::parse_gps_longitude(json),
        orientation: json.get("Orientation").and_then(Value::as_u64).map(|v| v as u16),
    }
}

fn extract_video(json: &Value) -> VideoMetadata {
    let format = json.get("format");
    let video_stream = json.get("streams").and_then(Value::as_array).and_then(|streams| {
        streams
            .iter()
            .find(|s| s.get("codec_type").and_then(Value::as_str) == Some("video"))
    });

    let frame_rate = video_stream
        .and_then(|s| s.get("avg_frame_rate").or_else(|| s.get("r_frame_rate")))
        .and_then(Value::as_str)
        .and_then(fields::parse_frame_rate);

    let bitrate_bps = format
        .and_then(|f| f.get("bit_rate"))
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok());

    let duration_secs = format
        .and_then(|f| f.get("duration"))
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok());

    VideoMetadata {
        codec: video_stream
            .and_then(|s| s.get("codec_name"))
            .and_then(Value::as_str)
            .map(str::to_string),
        bitrate_bps,
        frame_rate,
        duration_secs,
        recording_time: format
            .and_then(|f| f.get("tags"))
            .and_then(|t| t.get("creation_time"))
            .and_then(Value::as_str)
            .and_then(fields::parse_exif_datetime),
        camera_model: format
            .and_then(|f| f.get("tags"))
            .and_then(|t| t.get("com.apple.quicktime.model"))
            .and_then(Value::as_str)
            .map(str::to_string),
        gps_latitude: None,
        gps_longitude: None,
    }
}

fn extract_audio(json: &Value) -> AudioMetadata {
    let format = json.get("format");
    let audio_stream = json.get("streams").and_then(Value::as_array).and_then(|streams| {
        streams
            .iter()
            .find(|s| s.get("codec_type").and_then(Value::as_str) == Some("audio"))
    });
    let tags = format.and_then(|f| f.get("tags"));

    AudioMetadata {
        codec: audio_stream
            .and_then(|s| s.get("codec_name"))
            .and_then(Value::as_str)
            .map(str::to_string),
        bitrate_bps: format
            .and_then(|f| f.get("bit_rate"))
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok()),
        sample_rate_hz: audio_stream
            .and_then(|s| s.get("sample_rate"))
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok()),
        channels: audio_stream
            .and_then(|s| s.get("channels"))
            .and_then(Value::as_u64)
            .map(|v| v as u8),
        artist: tags.and_then(|t| t.get("artist")).and_then(Value::as_str).map(str::to_string),
        album: tags.and_then(|t| t.get("album")).and_then(Value::as_str).map(str::to_string),
        title: tags.and_then(|t| t.get("title")).and_then(Value::as_str).map(str::to_string),
        genre: tags.and_then(|t| t.get("genre")).and_then(Value::as_str).map(str::to_string),
        year: tags
            .and_then(|t| t.get("date"))
            .and_then(Value::as_str)
            .and_then(|s| s.get(..4))
            .and_then(|s| s.parse().ok()),
        description: tags
            .and_then(|t| t.get("description"))
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn photo_extraction_swaps_dimensions_for_rotated_orientation() {
        let json = json!({
            "ImageWidth": 3000,
            "ImageHeight": 2000,
            "Orientation": 6,
            "Make": "Canon",
            "Model": "EOS R5",
        });
        let meta = extract_photo(&json);
        assert_eq!(meta.camera_model.as_deref(), Some("EOS R5"));
        assert_eq!(photo_dimensions(&json), (Some(2000), Some(3000)));
    }

    #[test]
    fn video_extraction_reads_stream_dimensions() {
        let json = json!({
            "format": {"duration": "10.0"},
            "streams": [{"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080}],
        });
        assert_eq!(video_dimensions(&json), (Some(1920), Some(1080)));
    }

    #[test]
    fn video_extraction_reads_codec_and_duration() {
        let json = json!({
            "format": {"duration": "125.4", "bit_rate": "8000000"},
            "streams": [{"codec_type": "video", "codec_name": "hevc", "avg_frame_rate": "30000/1001"}],
        });
        let meta = extract_video(&json);
        assert_eq!(meta.codec.as_deref(), Some("hevc"));
        assert_eq!(meta.duration_secs, Some(125.4));
        assert_eq!(meta.bitrate_bps, Some(8_000_000));
    }
}

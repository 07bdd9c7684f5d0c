//! Thumbnail generation and video frame extraction.
//!
//! Missing external tools degrade gracefully: the caller records the failed
//! subtask and continues, it never aborts the whole asset.

use std::io::Cursor;
use std::path::Path;
use std::process::Stdio;

use emulsion_model::{AssetKind, ThumbnailSize};
use image::imageops::FilterType;
use image::DynamicImage;
use tokio::process::Command;
use tracing::warn;

use crate::error::{EngineError, Result};
use crate::layout::RepositoryLayout;

/// Extensions routed through the raw decoder before thumbnailing.
pub fn is_raw(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(emulsion_model::AssetKind::is_raw_extension)
        .unwrap_or(false)
}

pub struct Thumbnailer {
    layout: RepositoryLayout,
    dcraw_path: String,
    ffmpeg_path: String,
}

/// One generated thumbnail, not yet persisted to the asset index.
pub struct GeneratedThumbnail {
    pub size: ThumbnailSize,
    pub bytes: Vec<u8>,
}

impl Thumbnailer {
    pub fn new(layout: RepositoryLayout, dcraw_path: impl Into<String>, ffmpeg_path: impl Into<String>) -> Self {
        Self {
            layout,
            dcraw_path: dcraw_path.into(),
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    /// Generates small/medium/large JPEG thumbnails from a photo's decoded
    /// bytes. Raw camera formats must already have been converted to an
    /// intermediate encoded image via [`decode_raw`].
    pub fn generate_photo_thumbnails(&self, image_bytes: &[u8]) -> Result<Vec<GeneratedThumbnail>> {
        let img = image::load_from_memory(image_bytes)
            .map_err(|e| EngineError::InvalidMedia(e.to_string()))?;

        ThumbnailSize::ALL
            .iter()
            .map(|&size| encode_jpeg_thumbnail(&img, size))
            .collect()
    }

    /// Runs the raw-decoder tool, producing an intermediate encoded image
    /// (TIFF/PPM) suitable for `generate_photo_thumbnails`.
    pub async fn decode_raw(&self, raw_bytes: &[u8]) -> Result<Vec<u8>> {
        run_tool_stdin_stdout(&self.dcraw_path, &["-c", "-w", "-"], raw_bytes).await
    }

    /// Extracts a single frame at 10% of a video's duration, to be
    /// thumbnailed like any other decoded image.
    pub async fn extract_video_frame(&self, video_path: &Path, duration_secs: f64) -> Result<Vec<u8>> {
        let seek = (duration_secs * 0.1).max(0.0);
        let output = Command::new(&self.ffmpeg_path)
            .args([
                "-ss",
                &format!("{seek:.3}"),
                "-i",
                &video_path.to_string_lossy(),
                "-frames:v",
                "1",
                "-f",
                "image2pipe",
                "-vcodec",
                "mjpeg",
                "-",
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| EngineError::ExternalTool {
                tool: self.ffmpeg_path.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(stderr = %stderr, "ffmpeg frame extraction failed");
            return Err(EngineError::ExternalTool {
                tool: self.ffmpeg_path.clone(),
                message: stderr.trim().to_string(),
            });
        }

        Ok(output.stdout)
    }

    /// Optional web-transcoded copy under `.system/assets/videos/web/`.
    pub async fn transcode_web_copy(&self, video_path: &Path, asset_id: &str) -> Result<String> {
        let dest_dir = self.layout.videos_web_dir();
        tokio::fs::create_dir_all(&dest_dir).await?;
        let dest_path = dest_dir.join(format!("{asset_id}.mp4"));

        let status = Command::new(&self.ffmpeg_path)
            .args([
                "-y",
                "-i",
                &video_path.to_string_lossy(),
                "-c:v",
                "libx264",
                "-preset",
                "veryfast",
                "-crf",
                "23",
                "-c:a",
                "aac",
                &dest_path.to_string_lossy(),
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .status()
            .await
            .map_err(|e| EngineError::ExternalTool {
                tool: self.ffmpeg_path.clone(),
                message: e.to_string(),
            })?;

        if !status.success() {
            return Err(EngineError::ExternalTool {
                tool: self.ffmpeg_path.clone(),
                message: "transcode exited non-zero".to_string(),
            });
        }

        Ok(self
            .layout
            .relativize(&dest_path)
            .unwrap_or(&dest_path)
            .to_string_lossy()
            .replace('\\', "/"))
    }

    /// Writes a generated thumbnail under
    /// `.system/assets/thumbnails/<size>/<asset_id>.jpg` and returns the
    /// repository-relative path.
    pub async fn save_thumbnail(&self, asset_id: &str, thumbnail: &GeneratedThumbnail) -> Result<String> {
        let dir = self.layout.thumbnails_dir(thumbnail.size);
        tokio::fs::create_dir_all(&dir).await?;
        let dest = dir.join(format!("{asset_id}.jpg"));
        tokio::fs::write(&dest, &thumbnail.bytes).await?;
        Ok(self
            .layout
            .relativize(&dest)
            .unwrap_or(&dest)
            .to_string_lossy()
            .replace('\\', "/"))
    }
}

fn encode_jpeg_thumbnail(img: &DynamicImage, size: ThumbnailSize) -> Result<GeneratedThumbnail> {
    let max_edge = size.max_edge();
    let resized = img.resize(max_edge, max_edge, FilterType::Lanczos3);
    let mut bytes = Vec::new();
    resized
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Jpeg)
        .map_err(|e| EngineError::Internal(e.to_string()))?;
    Ok(GeneratedThumbnail { size, bytes })
}

async fn run_tool_stdin_stdout(tool: &str, args: &[&str], input: &[u8]) -> Result<Vec<u8>> {
    use tokio::io::AsyncWriteExt;

    let mut child = Command::new(tool)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| EngineError::ExternalTool {
            tool: tool.to_string(),
            message: e.to_string(),
        })?;

    let mut stdin = child.stdin.take().expect("stdin piped");
    stdin.write_all(input).await.ok();
    drop(stdin);

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| EngineError::ExternalTool {
            tool: tool.to_string(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(EngineError::ExternalTool {
            tool: tool.to_string(),
            message: stderr.trim().to_string(),
        });
    }

    Ok(output.stdout)
}

/// True for the media kinds the thumbnailer knows how to handle at all.
pub fn supports_kind(kind: AssetKind) -> bool {
    matches!(kind, AssetKind::Photo | AssetKind::Video)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_three_sizes_from_valid_image() {
        let mut bytes = Vec::new();
        let img = DynamicImage::new_rgb8(800, 600);
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();

        let layout = RepositoryLayout::new("/tmp/nonexistent-emulsion-test");
        let thumbnailer = Thumbnailer::new(layout, "dcraw", "ffmpeg");
        let thumbs = thumbnailer.generate_photo_thumbnails(&bytes).unwrap();
        assert_eq!(thumbs.len(), 3);
        let sizes: Vec<_> = thumbs.iter().map(|t| t.size).collect();
        assert_eq!(sizes, ThumbnailSize::ALL.to_vec());
    }

    #[test]
    fn invalid_image_bytes_fail_generation() {
        let layout = RepositoryLayout::new("/tmp/nonexistent-emulsion-test");
        let thumbnailer = Thumbnailer::new(layout, "dcraw", "ffmpeg");
        let err = thumbnailer.generate_photo_thumbnails(b"not an image").unwrap_err();
        assert!(matches!(err, EngineError::InvalidMedia(_)));
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

/// Top-level classification of an asset, derived from MIME + extension
/// heuristics (and magic-number probing for ambiguous cases) by the
/// processor, never guessed by the caller.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Photo,
    Video,
    Audio,
    Unknown,
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AssetKind::Photo => "photo",
            AssetKind::Video => "video",
            AssetKind::Audio => "audio",
            AssetKind::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

impl AssetKind {
    /// Classify from a MIME type; falls back to `Unknown` for anything not
    /// recognized so extension/magic-number probing can take over.
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("image/") {
            AssetKind::Photo
        } else if mime.starts_with("video/") {
            AssetKind::Video
        } else if mime.starts_with("audio/") {
            AssetKind::Audio
        } else {
            AssetKind::Unknown
        }
    }

    /// Classify from a lowercase file extension (no leading dot). Includes
    /// common raw camera formats, which carry `image/x-*` or no reliable
    /// MIME type at all.
    pub fn from_extension(ext: &str) -> Self {
        const PHOTO_EXT: &[&str] = &[
            "jpg", "jpeg", "png", "gif", "bmp", "webp", "heic", "heif", "tif", "tiff", "cr2",
            "cr3", "nef", "arw", "dng", "orf", "rw2", "raf", "pef", "srw",
        ];
        const VIDEO_EXT: &[&str] = &[
            "mp4", "mkv", "mov", "avi", "webm", "m4v", "3gp", "mpg", "mpeg", "wmv",
        ];
        const AUDIO_EXT: &[&str] = &[
            "mp3", "flac", "wav", "aac", "ogg", "m4a", "wma", "opus", "aiff",
        ];

        let ext = ext.to_ascii_lowercase();
        if PHOTO_EXT.contains(&ext.as_str()) {
            AssetKind::Photo
        } else if VIDEO_EXT.contains(&ext.as_str()) {
            AssetKind::Video
        } else if AUDIO_EXT.contains(&ext.as_str()) {
            AssetKind::Audio
        } else {
            AssetKind::Unknown
        }
    }

    /// True for formats routed through the raw decoder before thumbnailing.
    pub fn is_raw_extension(ext: &str) -> bool {
        const RAW_EXT: &[&str] = &[
            "cr2", "cr3", "nef", "arw", "dng", "orf", "rw2", "raf", "pef", "srw",
        ];
        RAW_EXT.contains(&ext.to_ascii_lowercase().as_str())
    }

    /// Last-resort classification when both the declared MIME type and the
    /// filename extension come back `Unknown`: sniffs well-known magic byte
    /// prefixes from the start of the file. Returns `Unknown` if nothing
    /// recognizable is found rather than guessing.
    pub fn from_magic_bytes(bytes: &[u8]) -> Self {
        const TIFF_LE: &[u8] = &[0x49, 0x49, 0x2A, 0x00];
        const TIFF_BE: &[u8] = &[0x4D, 0x4D, 0x00, 0x2A];

        if bytes.starts_with(&[0xFF, 0xD8, 0xFF])
            || bytes.starts_with(b"\x89PNG")
            || bytes.starts_with(b"GIF8")
            || bytes.starts_with(b"BM")
            || bytes.starts_with(TIFF_LE)
            || bytes.starts_with(TIFF_BE)
        {
            return AssetKind::Photo;
        }

        if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" {
            if &bytes[8..12] == b"WEBP" {
                return AssetKind::Photo;
            }
            if &bytes[8..12] == b"WAVE" {
                return AssetKind::Audio;
            }
        }

        // ISO base media file format (mp4/mov/m4a/...): a 4-byte size
        // followed by an `ftyp` box.
        if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
            return AssetKind::Video;
        }

        if bytes.starts_with(b"ID3") || bytes.starts_with(b"fLaC") || bytes.starts_with(b"OggS") || bytes.starts_with(&[0xFF, 0xFB])
        {
            return AssetKind::Audio;
        }

        AssetKind::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_jpeg_magic_bytes() {
        assert_eq!(AssetKind::from_magic_bytes(&[0xFF, 0xD8, 0xFF, 0xE0]), AssetKind::Photo);
    }

    #[test]
    fn sniffs_riff_wave_audio() {
        let mut bytes = b"RIFF".to_vec();
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        bytes.extend_from_slice(b"WAVEfmt ");
        assert_eq!(AssetKind::from_magic_bytes(&bytes), AssetKind::Audio);
    }

    #[test]
    fn sniffs_isobmff_video() {
        let mut bytes = vec![0, 0, 0, 0x18];
        bytes.extend_from_slice(b"ftypmp42");
        assert_eq!(AssetKind::from_magic_bytes(&bytes), AssetKind::Video);
    }

    #[test]
    fn unrecognized_bytes_stay_unknown() {
        assert_eq!(AssetKind::from_magic_bytes(b"not a media file"), AssetKind::Unknown);
    }
}

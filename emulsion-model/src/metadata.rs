//! Typed, kind-discriminated metadata. This is a closed sum type at the
//! in-memory boundary (never a dynamic attribute bag) and serializes to a
//! single structured JSON document for storage.

use serde::{Deserialize, Serialize};

/// Metadata discriminated by the owning asset's kind. Exactly one variant
/// (or `None`) is ever populated for a given asset.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "fields", rename_all = "snake_case")]
pub enum AssetMetadata {
    Photo(PhotoMetadata),
    Video(VideoMetadata),
    Audio(AudioMetadata),
    #[default]
    None,
}

/// Photo-specific EXIF-derived fields. Every field is optional: partial
/// extraction is acceptable, missing fields simply stay unset.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PhotoMetadata {
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub lens: Option<String>,
    pub exposure_time: Option<f64>,
    pub f_number: Option<f64>,
    pub iso: Option<u32>,
    pub focal_length_mm: Option<f64>,
    pub description: Option<String>,
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
    pub orientation: Option<u16>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct VideoMetadata {
    pub codec: Option<String>,
    pub bitrate_bps: Option<u64>,
    pub frame_rate: Option<f64>,
    pub duration_secs: Option<f64>,
    pub recording_time: Option<chrono::DateTime<chrono::Utc>>,
    pub camera_model: Option<String>,
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AudioMetadata {
    pub codec: Option<String>,
    pub bitrate_bps: Option<u64>,
    pub sample_rate_hz: Option<u32>,
    pub channels: Option<u8>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub title: Option<String>,
    pub genre: Option<String>,
    pub year: Option<i32>,
    pub description: Option<String>,
}

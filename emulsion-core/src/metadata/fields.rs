//! Tag-name priority lists and unit normalization for EXIF-style metadata
//!. The extractor probes each ordered list for the
//! first non-empty value rather than trusting any single tag name, because
//! different cameras/tools populate different (overlapping) tag sets.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

pub const TAKEN_TIME_TAGS: &[&str] =
    &["DateTimeOriginal", "CreateDate", "DateTime", "ModifyDate"];
pub const CAMERA_MODEL_TAGS: &[&str] = &["Model", "CameraModelName", "UniqueCameraModel"];
pub const LENS_TAGS: &[&str] = &["LensModel", "LensID", "LensInfo", "LensType", "Lens"];
pub const EXPOSURE_TAGS: &[&str] = &["ExposureTime", "ShutterSpeedValue", "ShutterSpeed"];
pub const F_NUMBER_TAGS: &[&str] = &["FNumber", "Aperture", "ApertureValue"];
pub const ISO_TAGS: &[&str] = &["ISO", "ISOSpeedRatings", "RecommendedExposureIndex"];
pub const FOCAL_LENGTH_TAGS: &[&str] = &["FocalLength"];
pub const DESCRIPTION_TAGS: &[&str] = &["ImageDescription", "Description", "Caption-Abstract"];
pub const GPS_LAT_TAGS: &[&str] = &["GPSLatitude"];
pub const GPS_LON_TAGS: &[&str] = &["GPSLongitude"];

/// Returns the first non-empty string value found by probing `tags` in
/// order against the JSON tool output.
pub fn first_str<'a>(json: &'a Value, tags: &[&str]) -> Option<&'a str> {
    tags.iter().find_map(|tag| {
        json.get(tag)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    })
}

/// Same as [`first_str`] but also accepts numeric JSON values, stringified.
pub fn first_scalar_string(json: &Value, tags: &[&str]) -> Option<String> {
    tags.iter().find_map(|tag| {
        let v = json.get(tag)?;
        match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    })
}

pub fn parse_taken_time(json: &Value) -> Option<DateTime<Utc>> {
    let raw = first_scalar_string(json, TAKEN_TIME_TAGS)?;
    parse_exif_datetime(&raw)
}

/// EXIF datetimes look like `2024:07:01 10:30:00`; some tools emit RFC3339.
pub fn parse_exif_datetime(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y:%m:%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Strips a trailing "mm" suffix and parses the numeric focal length.
pub fn parse_focal_length_mm(json: &Value) -> Option<f64> {
    let raw = first_scalar_string(json, FOCAL_LENGTH_TAGS)?;
    let trimmed = raw.trim().trim_end_matches("mm").trim();
    trimmed.parse().ok()
}

/// `ExposureTime` values commonly look like "1/250" or a bare float.
pub fn parse_exposure_time(json: &Value) -> Option<f64> {
    let raw = first_scalar_string(json, EXPOSURE_TAGS)?;
    parse_fraction_or_float(&raw)
}

pub fn parse_f_number(json: &Value) -> Option<f64> {
    let raw = first_scalar_string(json, F_NUMBER_TAGS)?;
    raw.trim().trim_start_matches('f').trim().parse().ok()
}

pub fn parse_iso(json: &Value) -> Option<u32> {
    let raw = first_scalar_string(json, ISO_TAGS)?;
    raw.trim().parse().ok()
}

/// `30000/1001`-style fractional frame rates, or a bare float.
pub fn parse_frame_rate(raw: &str) -> Option<f64> {
    parse_fraction_or_float(raw)
}

fn parse_fraction_or_float(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if let Some((num, den)) = raw.split_once('/') {
        let num: f64 = num.trim().parse().ok()?;
        let den: f64 = den.trim().parse().ok()?;
        if den == 0.0 {
            return None;
        }
        return Some(num / den);
    }
    raw.parse().ok()
}

/// Accepts `kbps`/`Mbps`/bare-number-as-bps and returns bits per second.
pub fn parse_bitrate_bps(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Some(v) = raw.strip_suffix("Mbps").or_else(|| raw.strip_suffix("mbps")) {
        return v.trim().parse::<f64>().ok().map(|m| (m * 1_000_000.0) as u64);
    }
    if let Some(v) = raw.strip_suffix("kbps").or_else(|| raw.strip_suffix("Kbps")) {
        return v.trim().parse::<f64>().ok().map(|k| (k * 1_000.0) as u64);
    }
    raw.parse::<f64>().ok().map(|v| v as u64)
}

/// Accepts `kHz`/`MHz`/bare-number-as-Hz and returns hertz.
pub fn parse_sample_rate_hz(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    if let Some(v) = raw.strip_suffix("MHz").or_else(|| raw.strip_suffix("mhz")) {
        return v.trim().parse::<f64>().ok().map(|m| (m * 1_000_000.0) as u32);
    }
    if let Some(v) = raw.strip_suffix("kHz").or_else(|| raw.strip_suffix("khz")) {
        return v.trim().parse::<f64>().ok().map(|k| (k * 1_000.0) as u32);
    }
    raw.parse::<f64>().ok().map(|v| v as u32)
}

/// GPS coordinates come either as signed decimal degrees or as a DMS string
/// like `37 deg 46' 29.64" N`. Returns signed decimal degrees in both cases.
pub fn parse_gps_coordinate(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if let Ok(decimal) = raw.parse::<f64>() {
        return Some(decimal);
    }

    let direction = raw.chars().last().filter(|c| "NSEWnsew".contains(*c));
    let body = match direction {
        Some(_) => &raw[..raw.len() - 1],
        None => raw,
    };

    let numbers: Vec<f64> = body
        .split(|c: char| !c.is_ascii_digit() && c != '.')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<f64>().ok())
        .collect();

    let (deg, min, sec) = match numbers.as_slice() {
        [d] => (*d, 0.0, 0.0),
        [d, m] => (*d, *m, 0.0),
        [d, m, s, ..] => (*d, *m, *s),
        [] => return None,
    };

    let mut decimal = deg + min / 60.0 + sec / 3600.0;
    if let Some(dir) = direction {
        if matches!(dir.to_ascii_uppercase(), 'S' | 'W') {
            decimal = -decimal;
        }
    }
    Some(decimal)
}

pub fn parse_gps_latitude(json: &Value) -> Option<f64> {
    first_scalar_string(json, GPS_LAT_TAGS).and_then(|raw| parse_gps_coordinate(&raw))
}

pub fn parse_gps_longitude(json: &Value) -> Option<f64> {
    first_scalar_string(json, GPS_LON_TAGS).and_then(|raw| parse_gps_coordinate(&raw))
}

/// EXIF orientation codes (and their common textual equivalents) for which
/// width/height must be swapped before being stored.
pub fn orientation_swaps_dimensions(orientation: &Value) -> bool {
    match orientation {
        Value::Number(n) => matches!(n.as_u64(), Some(5..=8)),
        Value::String(s) => {
            let s = s.to_ascii_lowercase();
            s.contains("rotate 90") || s.contains("rotate 270")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn picks_first_non_empty_taken_time_tag() {
        let j = json!({"CreateDate": "2024:07:01 10:30:00"});
        assert_eq!(
            parse_taken_time(&j).unwrap().to_rfc3339(),
            "2024-07-01T10:30:00+00:00"
        );
    }

    #[test]
    fn prefers_earlier_tag_in_priority_order() {
        let j = json!({
            "DateTimeOriginal": "2024:07:01 10:30:00",
            "CreateDate": "2024:07:02 00:00:00",
        });
        assert_eq!(
            parse_taken_time(&j).unwrap().to_rfc3339(),
            "2024-07-01T10:30:00+00:00"
        );
    }

    #[test]
    fn strips_mm_suffix_from_focal_length() {
        let j = json!({"FocalLength": "50.0 mm"});
        assert_eq!(parse_focal_length_mm(&j), Some(50.0));
    }

    #[test]
    fn parses_fractional_exposure_time() {
        let j = json!({"ExposureTime": "1/250"});
        assert_eq!(parse_exposure_time(&j), Some(1.0 / 250.0));
    }

    #[test]
    fn parses_fractional_frame_rate() {
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
    }

    #[test]
    fn parses_kbps_and_mbps_bitrates() {
        assert_eq!(parse_bitrate_bps("320kbps"), Some(320_000));
        assert_eq!(parse_bitrate_bps("8.5Mbps"), Some(8_500_000));
    }

    #[test]
    fn parses_decimal_gps() {
        assert_eq!(parse_gps_coordinate("37.7749"), Some(37.7749));
    }

    #[test]
    fn parses_dms_gps_with_direction() {
        let v = parse_gps_coordinate("37 deg 46' 29.64\" S").unwrap();
        assert!(v < 0.0);
        assert!((v + 37.7749).abs() < 0.01);
    }

    #[test]
    fn orientation_5_to_8_swaps_dimensions() {
        assert!(orientation_swaps_dimensions(&json!(6)));
        assert!(!orientation_swaps_dimensions(&json!(1)));
        assert!(orientation_swaps_dimensions(&json!("Rotate 90 CW")));
    }
}

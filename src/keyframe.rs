//! Live Photo keyframe timestamp.
//!
//! Live Photo videos carry a metadata track whose `StillImageTime` is `-1`.
//! That track's duration is the presentation time of the still frame.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static STILL_IMAGE_TRACK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<Track(\d+):StillImageTime>\s*-1\s*<").unwrap());

static TRACK_DURATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<Track(\d+):TrackDuration>\s*([^<]*?)\s*<").unwrap());

#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeyframeError {
    #[error("no track with StillImageTime -1")]
    NoStillImageTrack,

    #[error("track {0} has no duration")]
    MissingDuration(u32),

    #[error("track {track} has an invalid duration {value:?}")]
    InvalidDuration { track: u32, value: String },
}

/// Resolve the keyframe presentation timestamp, in microseconds, from an
/// ExifTool `-X -ee -n -QuickTime:StillImageTime -QuickTime:TrackDuration`
/// report.
pub fn resolve_timestamp_us(report: &str) -> Result<i64, KeyframeError> {
    let track: u32 = STILL_IMAGE_TRACK
        .captures(report)
        .and_then(|c| c[1].parse().ok())
        .ok_or(KeyframeError::NoStillImageTrack)?;

    let durations: HashMap<u32, &str> = TRACK_DURATION
        .captures_iter(report)
        .filter_map(|c| {
            let track = c[1].parse().ok()?;
            Some((track, c.get(2)?.as_str()))
        })
        .collect();

    let value = durations
        .get(&track)
        .ok_or(KeyframeError::MissingDuration(track))?;
    let seconds: f64 = value
        .parse()
        .ok()
        .filter(|s: &f64| s.is_finite() && *s >= 0.0)
        .ok_or_else(|| KeyframeError::InvalidDuration {
            track,
            value: value.to_string(),
        })?;

    Ok((seconds * 1_000_000.0).round() as i64)
}

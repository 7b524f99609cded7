//! Advertisement removal for HLS media playlists.
//!
//! Stitched ads are announced three different ways depending on how they were delivered:
//!
//! * an `#EXT-X-DATERANGE` tag marking a wall clock window as an ad break
//! * `#EXT-X-TWITCH-PREFETCH` hints pointing at upcoming (often ad) segments
//! * the `#EXTINF` title or the segment uri naming an ad vendor
//!
//! Every signal is honoured on its own since any one of them alone misses ads. Date ranges
//! don't always sit next to the segments they cover, so the filter keeps a running program
//! time (`#EXT-X-PROGRAM-DATE-TIME` plus the `#EXTINF` durations) and drops every segment
//! whose start falls inside an ad window.
//!
//! The filter never fails the request: if anything goes wrong the original manifest is
//! returned untouched.

use std::panic::{self, AssertUnwindSafe};

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, error};

const PROGRAM_DATE_TIME: &str = "#EXT-X-PROGRAM-DATE-TIME:";
const DATERANGE: &str = "#EXT-X-DATERANGE";
const TWITCH_PREFETCH: &str = "#EXT-X-TWITCH-PREFETCH:";
const EXTINF: &str = "#EXTINF:";
const DISCONTINUITY: &str = "#EXT-X-DISCONTINUITY";

const STITCHED_AD_CLASS: &str = "CLASS=\"twitch-stitched-ad\"";
const STITCHED_AD_ID: &str = "ID=\"stitched-ad-";

/// length assumed for an ad window that declares neither an end nor a duration
pub const DEFAULT_AD_WINDOW_SECONDS: i64 = 300;

// second vendor marks its breaks with X-TV-TWITCH-AD-* attributes instead of a class
static TWITCH_AD_ATTRIBUTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)X-TV-TWITCH-AD-[\w-]+=").expect("static regex should compile"));

static AD_SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:amazon|twitch-ad|stitched-ad|/ads/)").expect("static regex should compile")
});

static EXTINF_DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^#EXTINF:\s*(\d+(?:\.\d+)?)").expect("static regex should compile")
});

/// One advertisement window declared by the upstream manifest.
///
/// Without an explicit end the window lasts [`DEFAULT_AD_WINDOW_SECONDS`] from `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdDateRange {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl AdDateRange {
    pub fn end_or_default(&self) -> DateTime<Utc> {
        self.end.unwrap_or_else(|| {
            self.start
                .checked_add_signed(Duration::seconds(DEFAULT_AD_WINDOW_SECONDS))
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        })
    }

    /// half open, `start <= t < end`
    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        self.start <= time && time < self.end_or_default()
    }

    /// Builds a range from an `#EXT-X-DATERANGE` line.
    ///
    /// `END-DATE` wins over `DURATION`. Returns `None` when `START-DATE` is missing or
    /// unparsable, a window without a start can't be matched against anything.
    pub fn from_daterange_line(line: &str) -> Option<Self> {
        let attributes = parse_attributes(line);
        let find = |name: &str| {
            attributes
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| *value)
        };

        let start = find("START-DATE").and_then(parse_timestamp)?;

        let end = find("END-DATE").and_then(parse_timestamp).or_else(|| {
            find("DURATION")
                .and_then(|d| d.trim().parse::<f64>().ok())
                .and_then(seconds_to_duration)
                .and_then(|d| start.checked_add_signed(d))
        });

        Some(Self { start, end })
    }
}

/// What one filter pass did, mostly interesting for metrics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdFilterReport {
    pub manifest: String,
    pub removed_segments: usize,
    pub removed_prefetch: usize,
    pub ad_ranges: usize,
}

/// Removes advertisement segments from `raw_manifest`.
///
/// Fails open, the input comes back unchanged if the filter blows up.
pub fn strip_ads(raw_manifest: &str) -> String {
    strip_ads_with_report(raw_manifest).manifest
}

pub fn strip_ads_with_report(raw_manifest: &str) -> AdFilterReport {
    if raw_manifest.is_empty() {
        return AdFilterReport {
            manifest: String::new(),
            removed_segments: 0,
            removed_prefetch: 0,
            ad_ranges: 0,
        };
    }

    match panic::catch_unwind(AssertUnwindSafe(|| filter_manifest(raw_manifest))) {
        Ok(report) => {
            if report.removed_segments > 0 {
                metrics::counter!("ad_segments_removed_total")
                    .increment(report.removed_segments as u64);
            }
            report
        }
        Err(_) => {
            error!(
                "ad filter failed on a {} byte manifest, serving it untouched",
                raw_manifest.len()
            );
            metrics::counter!("ad_filter_fail_open_total").increment(1);
            AdFilterReport {
                manifest: raw_manifest.to_string(),
                removed_segments: 0,
                removed_prefetch: 0,
                ad_ranges: 0,
            }
        }
    }
}

pub fn is_ad_daterange(line: &str) -> bool {
    line.starts_with(DATERANGE)
        && (line.contains(STITCHED_AD_CLASS)
            || line.contains(STITCHED_AD_ID)
            || TWITCH_AD_ATTRIBUTE.is_match(line))
}

fn is_ad_title(title: &str) -> bool {
    !title.is_empty() && AD_SEGMENT.is_match(title)
}

fn filter_manifest(raw_manifest: &str) -> AdFilterReport {
    let lines: Vec<&str> = raw_manifest
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let ad_ranges: Vec<AdDateRange> = lines
        .iter()
        .filter(|line| is_ad_daterange(line))
        .filter_map(|line| AdDateRange::from_daterange_line(line))
        .collect();

    let mut kept: Vec<&str> = Vec::with_capacity(lines.len());
    let mut current_time: Option<DateTime<Utc>> = None;
    let mut last_line_was_segment_uri = false;
    // a discontinuity right after content, only dropped if an ad turns out to follow it
    let mut pending_discontinuity: Option<usize> = None;
    let mut removed_segments = 0;
    let mut removed_prefetch = 0;

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        i += 1;

        if let Some(value) = line.strip_prefix(PROGRAM_DATE_TIME) {
            if let Some(time) = parse_timestamp(value) {
                current_time = Some(time);
            }
            kept.push(line);
            continue;
        }

        if is_ad_daterange(line) {
            debug!("dropping ad daterange: {}", line);
            continue;
        }

        if line.starts_with(TWITCH_PREFETCH) {
            if next_uri(&lines, i).is_some() {
                i += 1;
            }
            removed_prefetch += 1;
            continue;
        }

        if line.starts_with(EXTINF) {
            let duration = extinf_duration(line);
            let title = line.split_once(',').map(|(_, t)| t).unwrap_or("");
            let uri = next_uri(&lines, i);

            let by_time = current_time
                .map(|t| ad_ranges.iter().any(|range| range.contains(t)))
                .unwrap_or(false);
            let by_title = is_ad_title(title);
            let by_uri = uri.map(|u| AD_SEGMENT.is_match(u)).unwrap_or(false);

            if by_time || by_title || by_uri {
                debug!(
                    by_time,
                    by_title, by_uri, "dropping ad segment {} {}", line, uri.unwrap_or("<none>")
                );
                if uri.is_some() {
                    i += 1;
                }
                if let Some(position) = pending_discontinuity.take() {
                    kept.remove(position);
                }
                last_line_was_segment_uri = false;
                removed_segments += 1;
                continue;
            }

            pending_discontinuity = None;
            if let Some(time) = current_time
                && duration > 0.0
                && let Some(advanced) =
                    seconds_to_duration(duration).and_then(|d| time.checked_add_signed(d))
            {
                current_time = Some(advanced);
            }
            kept.push(line);
            continue;
        }

        if line == DISCONTINUITY {
            // back to back markers collapse into the one already kept
            if kept.last() == Some(&DISCONTINUITY) {
                continue;
            }
            pending_discontinuity = last_line_was_segment_uri.then_some(kept.len());
            kept.push(line);
            last_line_was_segment_uri = false;
            continue;
        }

        kept.push(line);
        if !line.starts_with('#') {
            last_line_was_segment_uri = true;
            pending_discontinuity = None;
        }
    }

    AdFilterReport {
        manifest: kept.join("\n"),
        removed_segments,
        removed_prefetch,
        ad_ranges: ad_ranges.len(),
    }
}

/// the uri line that belongs to the tag before `index`, tags are never swallowed
fn next_uri<'a>(lines: &[&'a str], index: usize) -> Option<&'a str> {
    lines
        .get(index)
        .copied()
        .filter(|line| !line.starts_with('#'))
}

/// unparsable durations count as zero
fn extinf_duration(line: &str) -> f64 {
    EXTINF_DURATION
        .captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|d| d.is_finite())
        .unwrap_or(0.0)
}

fn seconds_to_duration(seconds: f64) -> Option<Duration> {
    if !seconds.is_finite() || seconds < 0.0 || seconds > i32::MAX as f64 {
        return None;
    }
    Some(Duration::milliseconds((seconds * 1000.0).round() as i64))
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|t| t.and_utc())
        })
}

/// Splits the attribute list of a tag (`NAME=value,NAME="quoted, value"`).
///
/// An unterminated quote ends parsing, whatever was read before it is still returned.
fn parse_attributes(line: &str) -> Vec<(&str, &str)> {
    let Some((_, list)) = line.split_once(':') else {
        return Vec::new();
    };

    let mut attributes = Vec::new();
    let mut rest = list;

    while !rest.is_empty() {
        let Some((name, after_eq)) = rest.split_once('=') else {
            break;
        };
        let name = name.trim();

        if let Some(quoted) = after_eq.strip_prefix('"') {
            let Some(end) = quoted.find('"') else {
                break;
            };
            attributes.push((name, &quoted[..end]));
            rest = quoted[end + 1..].trim_start_matches(',');
        } else {
            let (value, tail) = after_eq.split_once(',').unwrap_or((after_eq, ""));
            attributes.push((name, value.trim()));
            rest = tail;
        }
    }

    attributes
}

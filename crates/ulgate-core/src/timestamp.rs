// ── Timestamp policy ──
//
// Precedence: explicit `TimeInstant` in the payload, then the transport
// parameter (`t=` on HTTP), then the clock at receipt. Invalid explicit
// values reject the group; they are never replaced by the clock.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, SecondsFormat, Utc};

use crate::error::CoreError;

/// Attribute name carrying the observation time.
pub const TIME_INSTANT: &str = "TimeInstant";

const COMPRESSED_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Per-request timestamp settings, resolved from agent config and device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampPolicy {
    /// Attach a clock timestamp when the payload carries none.
    pub enabled: bool,
    /// Render as `YYYYMMDDTHHMMSSZ` instead of ISO-8601.
    pub compress: bool,
    /// Offset used when rendering.
    pub offset: FixedOffset,
}

impl Default for TimestampPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            compress: false,
            offset: utc(),
        }
    }
}

impl TimestampPolicy {
    /// Pick the observation time for one measurement group.
    ///
    /// Returns `None` when nothing should be attached.
    pub fn resolve(
        &self,
        explicit: Option<&str>,
        parameter: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, CoreError> {
        if let Some(raw) = explicit {
            return self.parse(raw).map(|ts| Some(self.render(ts)));
        }
        if let Some(raw) = parameter {
            return self.parse(raw).map(|ts| Some(self.render(ts)));
        }
        if self.enabled {
            return Ok(Some(self.render(now.fixed_offset())));
        }
        Ok(None)
    }

    /// Parse ISO-8601 (with or without offset) or the compressed form.
    pub fn parse(&self, raw: &str) -> Result<DateTime<FixedOffset>, CoreError> {
        let raw = raw.trim();
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Ok(ts);
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, COMPRESSED_FORMAT) {
            return Ok(naive.and_utc().fixed_offset());
        }
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
                return Ok(naive.and_utc().fixed_offset());
            }
        }
        Err(CoreError::InvalidTimestamp {
            value: raw.to_owned(),
        })
    }

    pub fn render(&self, ts: DateTime<FixedOffset>) -> String {
        if self.compress {
            ts.with_timezone(&Utc).format(COMPRESSED_FORMAT).to_string()
        } else {
            ts.with_timezone(&self.offset)
                .to_rfc3339_opts(SecondsFormat::Millis, true)
        }
    }
}

fn utc() -> FixedOffset {
    Utc.fix()
}

/// Parse a fixed-offset timezone: `UTC`, `Z`, `+02:00`, `-0500`, `+01`.
pub fn parse_offset(raw: &str) -> Result<FixedOffset, CoreError> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("utc") || raw.eq_ignore_ascii_case("gmt") || raw == "Z" {
        return Ok(utc());
    }

    let invalid = || CoreError::Config {
        message: format!("unsupported timezone {raw:?}: expected a fixed offset like +02:00"),
    };

    let (sign, rest) = match raw.as_bytes().first() {
        Some(b'+') => (1, &raw[1..]),
        Some(b'-') => (-1, &raw[1..]),
        _ => return Err(invalid()),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.is_empty() || digits.len() > 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let (hours, minutes) = if digits.len() <= 2 {
        (digits.as_str(), "0")
    } else {
        digits.split_at(digits.len() - 2)
    };
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if minutes >= 60 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

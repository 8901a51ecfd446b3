//! ISO-8601 duration handling for twin payloads.
//! The hub expresses cadences as ISO-8601 durations (`PT15S`, `PT7M`, `PT5H`);
//! internally every cadence is milliseconds. Only the day/hour/minute/second
//! designators are supported, which is the subset the service emits.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationParseError {
    #[error("not an ISO-8601 duration: {0:?}")]
    Malformed(String),
    #[error("duration overflows the millisecond range: {0:?}")]
    Overflow(String),
}

/// Parses an ISO-8601 duration string into milliseconds.
pub fn parse_iso8601_ms(text: &str) -> Result<u64, DurationParseError> {
    let malformed = || DurationParseError::Malformed(text.to_string());

    let rest = text.strip_prefix('P').ok_or_else(malformed)?;
    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, t)) => (d, t),
        None => (rest, ""),
    };
    if date_part.is_empty() && time_part.is_empty() {
        return Err(malformed());
    }

    let mut total_ms: u64 = 0;
    let mut add = |amount_ms: u64| -> Result<(), DurationParseError> {
        total_ms = total_ms
            .checked_add(amount_ms)
            .ok_or_else(|| DurationParseError::Overflow(text.to_string()))?;
        Ok(())
    };

    for (part, designators) in [(date_part, "D"), (time_part, "HMS")] {
        let mut number_start = 0;
        let mut last_rank: Option<usize> = None;
        for (idx, c) in part.char_indices() {
            if c.is_ascii_digit() || c == '.' {
                continue;
            }
            let rank = designators.find(c).ok_or_else(malformed)?;
            // Designators must appear in declaration order, each at most once.
            if last_rank.is_some_and(|prev| prev >= rank) {
                return Err(malformed());
            }
            last_rank = Some(rank);
            let number = &part[number_start..idx];
            if number.is_empty() {
                return Err(malformed());
            }
            let unit_ms: u64 = match c {
                'D' => 24 * 60 * 60 * 1000,
                'H' => 60 * 60 * 1000,
                'M' => 60 * 1000,
                'S' => 1000,
                _ => unreachable!(),
            };
            if c == 'S' && number.contains('.') {
                // Fractional seconds, e.g. PT0.5S.
                let seconds: f64 = number.parse().map_err(|_| malformed())?;
                if !seconds.is_finite() || seconds < 0.0 {
                    return Err(malformed());
                }
                add((seconds * 1000.0).round() as u64)?;
            } else {
                let value: u64 = number.parse().map_err(|_| malformed())?;
                add(
                    value
                        .checked_mul(unit_ms)
                        .ok_or_else(|| DurationParseError::Overflow(text.to_string()))?,
                )?;
            }
            number_start = idx + 1;
        }
        // Trailing digits without a designator.
        if number_start != part.len() {
            return Err(malformed());
        }
    }

    Ok(total_ms)
}

/// Formats milliseconds back into the canonical ISO-8601 shape the service
/// accepts in reported properties.
pub fn format_iso8601_ms(ms: u64) -> String {
    if ms == 0 {
        return "PT0S".to_string();
    }

    let total_seconds = ms / 1000;
    let frac_ms = ms % 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    let mut out = String::from("PT");
    if hours > 0 {
        out.push_str(&format!("{hours}H"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}M"));
    }
    if frac_ms > 0 {
        out.push_str(&format!("{seconds}.{frac_ms:03}S"));
    } else if seconds > 0 || (hours == 0 && minutes == 0) {
        out.push_str(&format!("{seconds}S"));
    }
    out
}

//! Raw-draw validation. Everything a poller emits passes through here before
//! enrichment; any violation aborts the item with an `InvalidDraw`.

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};

use crate::error::{AppError, Result};
use crate::stats::daily::tz8;
use crate::types::RawDraw;

/// A structurally valid draw: canonical numbers, parsed digits, and the
/// open time resolved to an absolute instant.
#[derive(Debug, Clone)]
pub struct ValidDraw {
    pub issue: String,
    /// Epoch seconds.
    pub open_time: i64,
    pub open_nums: String,
    pub digits: [u8; 3],
    pub sum: u8,
    pub source: String,
}

pub fn validate(raw: &RawDraw, now: DateTime<Utc>) -> Result<ValidDraw> {
    let issue = raw.issue.trim();
    if issue.len() != 7 || !issue.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AppError::InvalidDraw(format!(
            "issue {:?} is not 7 ASCII digits",
            raw.issue
        )));
    }

    let digits = parse_nums(&raw.open_nums)?;
    let digit_sum: u8 = digits.iter().sum();
    if digit_sum != raw.sum {
        return Err(AppError::InvalidDraw(format!(
            "declared sum {} does not match digits {} of {:?}",
            raw.sum, digit_sum, raw.open_nums
        )));
    }

    let open_time = parse_open_time(&raw.open_time, now)?;

    Ok(ValidDraw {
        issue: issue.to_string(),
        open_time,
        open_nums: format!("{}+{}+{}", digits[0], digits[1], digits[2]),
        digits,
        sum: digit_sum,
        source: raw.source.clone(),
    })
}

/// `a+b+c` with every component a digit value 0–9.
fn parse_nums(s: &str) -> Result<[u8; 3]> {
    let parts: Vec<&str> = s.trim().split('+').collect();
    if parts.len() != 3 {
        return Err(AppError::InvalidDraw(format!(
            "numbers {s:?} are not in a+b+c form"
        )));
    }
    let mut digits = [0u8; 3];
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AppError::InvalidDraw(format!(
                "numbers {s:?} are not in a+b+c form"
            )));
        }
        let n: u32 = part
            .parse()
            .map_err(|_| AppError::InvalidDraw(format!("numbers {s:?} overflow")))?;
        if n > 9 {
            return Err(AppError::InvalidDraw(format!(
                "component {part:?} of {s:?} is outside 0–9"
            )));
        }
        digits[i] = n as u8;
    }
    Ok(digits)
}

/// Accepts `YYYY-MM-DD HH:MM:SS` or `MM-DD HH:MM:SS` (current year at the
/// source's +08:00 zone assumed) and resolves to epoch seconds.
fn parse_open_time(s: &str, now: DateTime<Utc>) -> Result<i64> {
    let s = s.trim();

    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").or_else(|_| {
        let year = now.with_timezone(&tz8()).year();
        NaiveDateTime::parse_from_str(&format!("{year}-{s}"), "%Y-%m-%d %H:%M:%S")
    });
    let naive = naive
        .map_err(|_| AppError::InvalidDraw(format!("open time {s:?} is not a recognized form")))?;

    tz8()
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.timestamp())
        .ok_or_else(|| AppError::InvalidDraw(format!("open time {s:?} is ambiguous at +08:00")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(issue: &str, nums: &str, sum: u8, time: &str) -> RawDraw {
        RawDraw {
            issue: issue.to_string(),
            open_time: time.to_string(),
            open_nums: nums.to_string(),
            sum,
            source: "S1".to_string(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 10, 8, 0, 0).unwrap()
    }

    #[test]
    fn accepts_a_canonical_draw() {
        let v = validate(&raw("2025001", "3+5+8", 16, "2025-12-10 15:30:00"), now()).unwrap();
        assert_eq!(v.digits, [3, 5, 8]);
        assert_eq!(v.sum, 16);
        // 15:30 at +08:00 is 07:30 UTC
        assert_eq!(v.open_time, 1_765_351_800);
    }

    #[test]
    fn short_time_form_assumes_the_current_year() {
        let v = validate(&raw("2025001", "3+5+8", 16, "12-10 15:30:00"), now()).unwrap();
        assert_eq!(v.open_time, 1_765_351_800);
    }

    #[test]
    fn rejects_bad_issue_shapes() {
        assert!(validate(&raw("202501", "3+5+8", 16, "2025-12-10 15:30:00"), now()).is_err());
        assert!(validate(&raw("20250011", "3+5+8", 16, "2025-12-10 15:30:00"), now()).is_err());
        assert!(validate(&raw("2O25001", "3+5+8", 16, "2025-12-10 15:30:00"), now()).is_err());
    }

    #[test]
    fn rejects_out_of_range_and_malformed_numbers() {
        assert!(validate(&raw("2025001", "10+5+8", 23, "2025-12-10 15:30:00"), now()).is_err());
        assert!(validate(&raw("2025001", "3-5-8", 16, "2025-12-10 15:30:00"), now()).is_err());
        assert!(validate(&raw("2025001", "3+5", 8, "2025-12-10 15:30:00"), now()).is_err());
    }

    #[test]
    fn rejects_sum_mismatch() {
        assert!(validate(&raw("2025001", "3+5+8", 15, "2025-12-10 15:30:00"), now()).is_err());
    }

    #[test]
    fn rejects_unparseable_time() {
        assert!(validate(&raw("2025001", "3+5+8", 16, "yesterday"), now()).is_err());
    }
}

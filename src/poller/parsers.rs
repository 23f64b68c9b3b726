//! Feed parsers. Pure and side-effect free: bytes in, at most one raw draw
//! out. Upstreams disagree wildly on container shape and field naming, so the
//! tabular parser probes a fixed name table instead of binding a struct.

use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use serde_json::Value;

use crate::types::RawDraw;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParserId {
    /// `{code, data: [{qihao, opentime, opennum, sum}]}` and friends.
    Tabular,
    /// Keno feed reduced to three digits (see `parse_keno`).
    KenoReduce,
}

impl ParserId {
    pub fn parse(&self, body: &[u8], source: &str) -> Option<RawDraw> {
        let v: Value = serde_json::from_slice(body).ok()?;
        match self {
            ParserId::Tabular => parse_tabular(&v, source),
            ParserId::KenoReduce => parse_keno(&v, source),
        }
    }
}

const CONTAINER_KEYS: [&str; 4] = ["data", "result", "list", "items"];
const ISSUE_KEYS: [&str; 6] = ["qihao", "issue", "expect", "period", "issueNo", "issue_no"];
const TIME_KEYS: [&str; 6] = ["opentime", "open_time", "time", "opendate", "open_date", "date"];
const NUMS_KEYS: [&str; 7] = [
    "opennum", "open_num", "opencode", "open_code", "number", "nums", "num",
];
const SUM_KEYS: [&str; 4] = ["sum", "sumNum", "sumnum", "total"];

/// Locate the record object: the top-level object itself, the first element
/// of a known container array, or the first element of a bare array.
fn record_of(v: &Value) -> Option<&Value> {
    if let Some(arr) = v.as_array() {
        return arr.first();
    }
    let obj = v.as_object()?;
    for key in CONTAINER_KEYS {
        if let Some(first) = obj.get(key).and_then(|c| c.as_array()).and_then(|a| a.first()) {
            return Some(first);
        }
    }
    Some(v)
}

fn string_field(record: &Value, names: &[&str]) -> Option<String> {
    for name in names {
        match record.get(*name) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

fn numeric_field(record: &Value, names: &[&str]) -> Option<u8> {
    for name in names {
        match record.get(*name) {
            Some(Value::Number(n)) => return n.as_u64().map(|x| x as u8),
            Some(Value::String(s)) => {
                if let Ok(x) = s.trim().parse::<u8>() {
                    return Some(x);
                }
            }
            _ => {}
        }
    }
    None
}

/// Accepts `a+b+c`, `a,b,c`, `a b c` and `abc`; yields the digits and the
/// canonical `a+b+c` form. Components above 9 are rejected here rather than
/// deferred to validation so a bad feed never enters the pipeline.
pub fn normalize_nums(s: &str) -> Option<([u8; 3], String)> {
    let s = s.trim();
    let parts: Vec<&str> = if s.contains('+') {
        s.split('+').collect()
    } else if s.contains(',') {
        s.split(',').collect()
    } else if s.contains(char::is_whitespace) {
        s.split_whitespace().collect()
    } else if s.len() == 3 && s.bytes().all(|b| b.is_ascii_digit()) {
        return normalize_nums(&format!("{}+{}+{}", &s[0..1], &s[1..2], &s[2..3]));
    } else {
        return None;
    };

    if parts.len() != 3 {
        return None;
    }
    let mut digits = [0u8; 3];
    for (i, part) in parts.iter().enumerate() {
        let n: u8 = part.trim().parse().ok()?;
        if n > 9 {
            return None;
        }
        digits[i] = n;
    }
    Some((digits, format!("{}+{}+{}", digits[0], digits[1], digits[2])))
}

fn parse_tabular(v: &Value, source: &str) -> Option<RawDraw> {
    let record = record_of(v)?;
    let issue = string_field(record, &ISSUE_KEYS)?;
    let open_time = string_field(record, &TIME_KEYS)?;
    let nums_raw = string_field(record, &NUMS_KEYS)?;
    let (digits, open_nums) = normalize_nums(&nums_raw)?;
    let sum = numeric_field(record, &SUM_KEYS).unwrap_or_else(|| digits.iter().sum());

    Some(RawDraw {
        issue,
        open_time,
        open_nums,
        sum,
        source: source.to_string(),
    })
}

/// 0-based index groups over the 20 drawn keno numbers; each digit is the
/// group sum mod 10.
const KENO_A: [usize; 6] = [1, 4, 7, 10, 13, 16];
const KENO_B: [usize; 6] = [2, 5, 8, 11, 14, 17];
const KENO_C: [usize; 6] = [3, 6, 9, 12, 15, 18];

fn keno_digit(nums: &[i64], idx: [usize; 6]) -> Option<u8> {
    let mut total: i64 = 0;
    for i in idx {
        total += nums.get(i)?;
    }
    Some((total.rem_euclid(10)) as u8)
}

fn parse_keno(v: &Value, source: &str) -> Option<RawDraw> {
    let record = v.as_array()?.first()?;

    let issue = match record.get("drawNbr") {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.clone(),
        _ => return None,
    };

    let nums: Vec<i64> = record
        .get("drawNbrs")?
        .as_array()?
        .iter()
        .map(|n| n.as_i64())
        .collect::<Option<Vec<_>>>()?;
    if nums.len() < 20 {
        return None;
    }

    let a = keno_digit(&nums, KENO_A)?;
    let b = keno_digit(&nums, KENO_B)?;
    let c = keno_digit(&nums, KENO_C)?;

    // "Mon D, YYYY" + "HH:MM:SS AM/PM", already the source's +08:00 wall clock.
    let date_str = record.get("drawDate")?.as_str()?;
    let time_str = record.get("drawTime")?.as_str()?;
    let date = NaiveDate::parse_from_str(date_str.trim(), "%b %d, %Y").ok()?;
    let time = NaiveTime::parse_from_str(time_str.trim(), "%I:%M:%S %p").ok()?;
    let open_time = format!("{} {}", date.format("%Y-%m-%d"), time.format("%H:%M:%S"));

    Some(RawDraw {
        issue,
        open_time,
        open_nums: format!("{a}+{b}+{c}"),
        sum: a + b + c,
        source: source.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_every_accepted_number_form() {
        for input in ["3+5+8", "3,5,8", "3 5 8", "358"] {
            let (digits, canon) = normalize_nums(input).expect(input);
            assert_eq!(digits, [3, 5, 8], "input {input}");
            assert_eq!(canon, "3+5+8");
        }
    }

    #[test]
    fn rejects_malformed_number_forms() {
        assert!(normalize_nums("10+5+8").is_none());
        assert!(normalize_nums("3-5-8").is_none());
        assert!(normalize_nums("3+5").is_none());
        assert!(normalize_nums("3+5+8+1").is_none());
        assert!(normalize_nums("abc").is_none());
    }

    #[test]
    fn tabular_parses_wrapped_container() {
        let body = br#"{"code":0,"data":[{"qihao":"3349001","opentime":"2025-12-10 15:30:00","opennum":"3,5,8","sum":16}]}"#;
        let raw = ParserId::Tabular.parse(body, "S1").unwrap();
        assert_eq!(raw.issue, "3349001");
        assert_eq!(raw.open_nums, "3+5+8");
        assert_eq!(raw.sum, 16);
        assert_eq!(raw.source, "S1");
    }

    #[test]
    fn tabular_parses_flat_object_and_computes_missing_sum() {
        let body = br#"{"issue":"3349002","time":"12-10 15:33:30","number":"909"}"#;
        let raw = ParserId::Tabular.parse(body, "S2").unwrap();
        assert_eq!(raw.open_nums, "9+0+9");
        assert_eq!(raw.sum, 18);
        assert_eq!(raw.open_time, "12-10 15:33:30");
    }

    #[test]
    fn tabular_parses_bare_array_with_numeric_issue() {
        let body = br#"[{"expect":3349003,"opendate":"2025-12-10 15:37:00","opencode":"1 2 3"}]"#;
        let raw = ParserId::Tabular.parse(body, "S3").unwrap();
        assert_eq!(raw.issue, "3349003");
        assert_eq!(raw.open_nums, "1+2+3");
        assert_eq!(raw.sum, 6);
    }

    #[test]
    fn tabular_returns_none_on_missing_fields() {
        assert!(ParserId::Tabular.parse(br#"{"code":1,"data":[]}"#, "S1").is_none());
        assert!(ParserId::Tabular.parse(br#"{"qihao":"3349004"}"#, "S1").is_none());
        assert!(ParserId::Tabular.parse(b"not json", "S1").is_none());
    }

    #[test]
    fn keno_reduction_over_known_vector() {
        let nums: Vec<i64> = (1..=20).collect();
        let body = serde_json::json!([{
            "drawNbr": 2025001,
            "drawDate": "Dec 10, 2025",
            "drawTime": "03:30:00 PM",
            "drawNbrs": nums,
        }]);
        let raw = ParserId::KenoReduce
            .parse(body.to_string().as_bytes(), "keno")
            .unwrap();
        // a = (2+5+8+11+14+17) mod 10, b = (3+6+9+12+15+18) mod 10, c = (4+7+10+13+16+19) mod 10
        assert_eq!(raw.open_nums, "7+3+9");
        assert_eq!(raw.sum, 19);
        assert_eq!(raw.open_time, "2025-12-10 15:30:00");
        assert_eq!(raw.issue, "2025001");
    }

    #[test]
    fn keno_rejects_short_vectors() {
        let body = serde_json::json!([{
            "drawNbr": 2025001,
            "drawDate": "Dec 10, 2025",
            "drawTime": "03:30:00 PM",
            "drawNbrs": [1, 2, 3],
        }]);
        assert!(ParserId::KenoReduce.parse(body.to_string().as_bytes(), "keno").is_none());
    }
}

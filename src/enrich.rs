//! One-shot derivation of every classification field from a validated draw.
//! Invoked exactly once per draw, strictly before the database write; every
//! other component reads the persisted fields back.

use crate::ingest::validate::ValidDraw;
use crate::types::{Combination, Draw};

/// Sum at or above this is "big".
pub const BIG_MIN: u8 = 14;
/// Extreme thresholds.
pub const EXTREME_BIG_MIN: u8 = 22;
pub const EXTREME_SMALL_MAX: u8 = 5;

/// Zero-padded sum bucket labels "00".."27".
pub const SUM_BUCKETS: [&str; 28] = [
    "00", "01", "02", "03", "04", "05", "06", "07", "08", "09", "10", "11", "12", "13", "14",
    "15", "16", "17", "18", "19", "20", "21", "22", "23", "24", "25", "26", "27",
];

/// The 21 boolean/enum category labels. Together with the 28 sum buckets this
/// is the closed set of 49 categories tracked by the omission and daily
/// engines.
pub const LABEL_CATEGORIES: [&str; 21] = [
    "big",
    "small",
    "odd",
    "even",
    "extreme-big",
    "extreme-small",
    "big-odd",
    "small-odd",
    "big-even",
    "small-even",
    "triple",
    "pair",
    "straight",
    "misc",
    "small-edge",
    "middle",
    "big-edge",
    "edge",
    "dragon",
    "tiger",
    "tie",
];

/// All 49 categories in a fixed order.
pub fn all_categories() -> Vec<&'static str> {
    LABEL_CATEGORIES.iter().chain(SUM_BUCKETS.iter()).copied().collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Form {
    Triple,
    Pair,
    Straight,
    Misc,
}

/// Disjoint form classification over all 1000 digit triples.
fn classify_form(d: [u8; 3]) -> Form {
    if d[0] == d[1] && d[1] == d[2] {
        return Form::Triple;
    }
    if d[0] == d[1] || d[1] == d[2] || d[0] == d[2] {
        return Form::Pair;
    }
    let mut s = d;
    s.sort_unstable();
    if s[0] + 1 == s[1] && s[1] + 1 == s[2] {
        return Form::Straight;
    }
    Form::Misc
}

pub fn magnitude_is_big(sum: u8) -> bool {
    sum >= BIG_MIN
}

pub fn combination_of(sum: u8) -> Combination {
    match (magnitude_is_big(sum), sum % 2 == 1) {
        (true, true) => Combination::BigOdd,
        (false, true) => Combination::SmallOdd,
        (true, false) => Combination::BigEven,
        (false, false) => Combination::SmallEven,
    }
}

/// Derive the full enriched record. Pure; `now_ns` stamps the bookkeeping
/// columns so callers control the clock.
pub fn enrich(v: &ValidDraw, now_ns: i64) -> Draw {
    let [a, _, c] = v.digits;
    let sum = v.sum;
    let is_big = magnitude_is_big(sum);
    let is_odd = sum % 2 == 1;
    let form = classify_form(v.digits);
    let is_small_edge = sum <= 9;
    let is_big_edge = sum >= 18;

    Draw {
        issue: v.issue.clone(),
        open_time: v.open_time,
        open_nums: v.open_nums.clone(),
        sum,
        source: v.source.clone(),
        is_big,
        is_small: !is_big,
        is_odd,
        is_even: !is_odd,
        is_extreme_big: sum >= EXTREME_BIG_MIN,
        is_extreme_small: sum <= EXTREME_SMALL_MAX,
        combination: combination_of(sum),
        is_triple: form == Form::Triple,
        is_pair: form == Form::Pair,
        is_straight: form == Form::Straight,
        is_misc: form == Form::Misc,
        is_small_edge,
        is_middle: !is_small_edge && !is_big_edge,
        is_big_edge,
        is_edge: is_small_edge || is_big_edge,
        is_dragon: a > c,
        is_tiger: a < c,
        is_tie: a == c,
        created_at: now_ns,
        updated_at: now_ns,
    }
}

/// The set of categories a committed draw holds. The sum bucket is always
/// included; mutually-exclusive groups contribute exactly one label each.
pub fn held_categories(d: &Draw) -> Vec<&'static str> {
    let mut held = Vec::with_capacity(12);
    held.push(if d.is_big { "big" } else { "small" });
    held.push(if d.is_odd { "odd" } else { "even" });
    if d.is_extreme_big {
        held.push("extreme-big");
    }
    if d.is_extreme_small {
        held.push("extreme-small");
    }
    held.push(d.combination.as_str());
    held.push(if d.is_triple {
        "triple"
    } else if d.is_pair {
        "pair"
    } else if d.is_straight {
        "straight"
    } else {
        "misc"
    });
    held.push(if d.is_small_edge {
        "small-edge"
    } else if d.is_big_edge {
        "big-edge"
    } else {
        "middle"
    });
    if d.is_edge {
        held.push("edge");
    }
    held.push(if d.is_dragon {
        "dragon"
    } else if d.is_tiger {
        "tiger"
    } else {
        "tie"
    });
    held.push(SUM_BUCKETS[d.sum as usize]);
    held
}

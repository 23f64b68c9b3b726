use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Raw draw: poller output, pre-validation
// ---------------------------------------------------------------------------

/// One observation of a published draw as a source reported it.
/// `open_time` stays a string until validation parses it at +08:00.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDraw {
    pub issue: String,
    pub open_time: String,
    pub open_nums: String,
    pub sum: u8,
    /// Label of the poller that fetched this copy.
    pub source: String,
}

// ---------------------------------------------------------------------------
// Enriched draw: the authoritative record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Combination {
    BigOdd,
    SmallOdd,
    BigEven,
    SmallEven,
}

impl Combination {
    /// Canonical category / storage label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Combination::BigOdd => "big-odd",
            Combination::SmallOdd => "small-odd",
            Combination::BigEven => "big-even",
            Combination::SmallEven => "small-even",
        }
    }

    /// Chinese label used by the prediction grammar (大单 etc).
    pub fn zh_label(&self) -> &'static str {
        match self {
            Combination::BigOdd => "大单",
            Combination::SmallOdd => "小单",
            Combination::BigEven => "大双",
            Combination::SmallEven => "小双",
        }
    }

    pub fn from_str_label(s: &str) -> Option<Self> {
        match s {
            "big-odd" => Some(Combination::BigOdd),
            "small-odd" => Some(Combination::SmallOdd),
            "big-even" => Some(Combination::BigEven),
            "small-even" => Some(Combination::SmallEven),
            _ => None,
        }
    }
}

impl std::fmt::Display for Combination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A committed draw with every derived field. Enrichment happens exactly once
/// before the write; readers consume these fields as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draw {
    /// 7 ASCII digits, strictly increasing in commit order.
    pub issue: String,
    /// Absolute instant (epoch seconds); source wall clock was +08:00.
    pub open_time: i64,
    /// Canonical `a+b+c`.
    pub open_nums: String,
    pub sum: u8,
    pub source: String,
    pub is_big: bool,
    pub is_small: bool,
    pub is_odd: bool,
    pub is_even: bool,
    /// sum >= 22
    pub is_extreme_big: bool,
    /// sum <= 5
    pub is_extreme_small: bool,
    pub combination: Combination,
    pub is_triple: bool,
    pub is_pair: bool,
    pub is_straight: bool,
    pub is_misc: bool,
    /// sum 0–9
    pub is_small_edge: bool,
    /// sum 10–17
    pub is_middle: bool,
    /// sum 18–27
    pub is_big_edge: bool,
    pub is_edge: bool,
    /// first digit > last digit
    pub is_dragon: bool,
    pub is_tiger: bool,
    pub is_tie: bool,
    /// Epoch nanoseconds.
    pub created_at: i64,
    pub updated_at: i64,
}

impl Draw {
    /// The three digits of `open_nums`. Valid by construction.
    pub fn digits(&self) -> [u8; 3] {
        let mut out = [0u8; 3];
        for (i, part) in self.open_nums.split('+').take(3).enumerate() {
            out[i] = part.parse().unwrap_or(0);
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Predictions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionKind {
    /// 单/双 on the sum.
    Parity,
    /// 大/小 on the sum (big = sum >= 14).
    Magnitude,
    /// Two distinct labels out of {大单,小单,大双,小双}.
    Combo,
    /// One label the sum is predicted NOT to land on.
    Kill,
}

impl PredictionKind {
    pub const ALL: [PredictionKind; 4] = [
        PredictionKind::Parity,
        PredictionKind::Magnitude,
        PredictionKind::Combo,
        PredictionKind::Kill,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionKind::Parity => "parity",
            PredictionKind::Magnitude => "magnitude",
            PredictionKind::Combo => "combo",
            PredictionKind::Kill => "kill",
        }
    }

    pub fn from_str_label(s: &str) -> Option<Self> {
        match s {
            "parity" => Some(PredictionKind::Parity),
            "magnitude" => Some(PredictionKind::Magnitude),
            "combo" => Some(PredictionKind::Combo),
            "kill" => Some(PredictionKind::Kill),
            _ => None,
        }
    }
}

impl std::fmt::Display for PredictionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Hit-rate snapshot over the most recent resolved predictions of one kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitRate {
    pub kind: PredictionKind,
    pub total: u32,
    pub hits: u32,
    pub misses: u32,
    pub rate: f64,
}

// ---------------------------------------------------------------------------
// Events: broadcast between tasks after a commit
// ---------------------------------------------------------------------------

/// Fired by the prediction orchestrator; consumed by the cache manager.
#[derive(Debug, Clone)]
pub enum PredictionEvent {
    Committed {
        issue: String,
        kind: PredictionKind,
        value: String,
        duration_ms: u64,
    },
    AllCommitted {
        issue: String,
    },
}

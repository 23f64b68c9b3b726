//! Database row types used by sqlx for typed queries.

use crate::types::{Combination, Draw};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DrawRow {
    pub issue: String,
    pub open_time: i64,
    pub open_nums: String,
    pub sum: i64,
    pub source: String,
    pub is_big: bool,
    pub is_small: bool,
    pub is_odd: bool,
    pub is_even: bool,
    pub is_extreme_big: bool,
    pub is_extreme_small: bool,
    pub combination: String,
    pub is_triple: bool,
    pub is_pair: bool,
    pub is_straight: bool,
    pub is_misc: bool,
    pub is_small_edge: bool,
    pub is_middle: bool,
    pub is_big_edge: bool,
    pub is_edge: bool,
    pub is_dragon: bool,
    pub is_tiger: bool,
    pub is_tie: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl DrawRow {
    pub fn into_draw(self) -> Draw {
        Draw {
            issue: self.issue,
            open_time: self.open_time,
            open_nums: self.open_nums,
            sum: self.sum as u8,
            source: self.source,
            is_big: self.is_big,
            is_small: self.is_small,
            is_odd: self.is_odd,
            is_even: self.is_even,
            is_extreme_big: self.is_extreme_big,
            is_extreme_small: self.is_extreme_small,
            combination: Combination::from_str_label(&self.combination)
                .unwrap_or(Combination::SmallEven),
            is_triple: self.is_triple,
            is_pair: self.is_pair,
            is_straight: self.is_straight,
            is_misc: self.is_misc,
            is_small_edge: self.is_small_edge,
            is_middle: self.is_middle,
            is_big_edge: self.is_big_edge,
            is_edge: self.is_edge,
            is_dragon: self.is_dragon,
            is_tiger: self.is_tiger,
            is_tie: self.is_tie,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PredictionRow {
    pub issue: String,
    pub kind: String,
    pub predicted_value: String,
    pub actual_numbers: Option<String>,
    pub actual_sum: Option<i64>,
    pub actual_value: Option<String>,
    /// NULL = not yet resolved.
    pub hit: Option<bool>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OmissionRow {
    pub category: String,
    pub count: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DailyStatRow {
    pub date: String,
    pub category: String,
    pub count: i64,
}

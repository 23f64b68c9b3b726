//! Per-type prompt construction: recent history, a same-day count summary, a
//! short trend string, and a bias-balancing hint when the recent predictions
//! lean too hard on one label.

use crate::db::models::DrawRow;
use crate::stats::daily::date_key;
use crate::types::PredictionKind;

pub const SYSTEM_PROMPT: &str = "你是一位数字彩票数据分析师。根据提供的历史开奖数据做走势分析，\
只输出要求格式的答案，不要输出任何解释。";

/// Histogram the last predictions of one type; when a single label occupies
/// strictly more than `threshold_pct` percent, return a balancing hint.
pub fn bias_hint(recent_values: &[String], threshold_pct: u8) -> Option<String> {
    if recent_values.is_empty() {
        return None;
    }
    let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    for v in recent_values {
        *counts.entry(v.as_str()).or_insert(0) += 1;
    }
    let (label, max) = counts.into_iter().max_by_key(|(_, n)| *n)?;
    if max * 100 > threshold_pct as usize * recent_values.len() {
        Some(format!(
            "注意：最近{}次预测中“{}”出现了{}次，存在明显偏向，请平衡考虑其他结果。",
            recent_values.len(),
            label,
            max
        ))
    } else {
        None
    }
}

fn magnitude_zh(row: &DrawRow) -> &'static str {
    if row.is_big {
        "大"
    } else {
        "小"
    }
}

fn parity_zh(row: &DrawRow) -> &'static str {
    if row.is_odd {
        "单"
    } else {
        "双"
    }
}

fn instruction(kind: PredictionKind) -> &'static str {
    match kind {
        PredictionKind::Parity => "请预测下一期和值的单双。只输出一个字：单 或 双。",
        PredictionKind::Magnitude => "请预测下一期和值的大小（和值≥14为大）。只输出一个字：大 或 小。",
        PredictionKind::Combo => {
            "请预测下一期最可能出现的两个组合，从 大单、小单、大双、小双 中选两个不同的，\
             用英文逗号分隔，例如：大单,小双。"
        }
        PredictionKind::Kill => {
            "请从 大单、小单、大双、小双 中杀掉一个下一期最不可能出现的组合，只输出这一个组合，\
             例如：大双。"
        }
    }
}

/// Build `(system, user)` prompts for one prediction task.
/// `history` is newest-first; `recent_values` are this type's latest
/// predicted values, newest-first.
pub fn build_prompt(
    kind: PredictionKind,
    target_issue: &str,
    history: &[DrawRow],
    recent_values: &[String],
    bias_threshold_pct: u8,
) -> (String, String) {
    let mut user = String::new();

    user.push_str(&format!("目标期号：{target_issue}\n\n最近{}期开奖（从新到旧）：\n", history.len()));
    for row in history {
        user.push_str(&format!(
            "{}: {} 和值{} {}{}\n",
            row.issue,
            row.open_nums,
            row.sum,
            magnitude_zh(row),
            parity_zh(row),
        ));
    }

    if let Some(newest) = history.first() {
        let today = date_key(newest.open_time);
        let todays: Vec<&DrawRow> = history
            .iter()
            .filter(|r| date_key(r.open_time) == today)
            .collect();
        let big = todays.iter().filter(|r| r.is_big).count();
        let odd = todays.iter().filter(|r| r.is_odd).count();
        user.push_str(&format!(
            "\n今日({today})统计：共{}期，大{}次 小{}次，单{}次 双{}次。\n",
            todays.len(),
            big,
            todays.len() - big,
            odd,
            todays.len() - odd,
        ));

        let trend: String = history
            .iter()
            .take(3)
            .map(|r| format!("{}{}", magnitude_zh(r), parity_zh(r)))
            .collect::<Vec<_>>()
            .join(" ");
        user.push_str(&format!("近三期走势（新到旧）：{trend}\n"));
    }

    if let Some(hint) = bias_hint(recent_values, bias_threshold_pct) {
        user.push('\n');
        user.push_str(&hint);
        user.push('\n');
    }

    user.push('\n');
    user.push_str(instruction(kind));

    (SYSTEM_PROMPT.to_string(), user)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(issue: &str, sum: i64, is_big: bool, is_odd: bool) -> DrawRow {
        DrawRow {
            issue: issue.to_string(),
            open_time: 1_765_351_800,
            open_nums: "3+5+8".to_string(),
            sum,
            source: "S1".to_string(),
            is_big,
            is_small: !is_big,
            is_odd,
            is_even: !is_odd,
            is_extreme_big: false,
            is_extreme_small: false,
            combination: "big-even".to_string(),
            is_triple: false,
            is_pair: false,
            is_straight: false,
            is_misc: true,
            is_small_edge: false,
            is_middle: true,
            is_big_edge: false,
            is_edge: false,
            is_dragon: false,
            is_tiger: true,
            is_tie: false,
            created_at: 1,
            updated_at: 1,
        }
    }

    #[test]
    fn nine_of_ten_identical_labels_trigger_the_hint() {
        let mut recent: Vec<String> = vec!["单".to_string(); 9];
        recent.push("双".to_string());
        let hint = bias_hint(&recent, 70).expect("90% must trip a 70% threshold");
        assert!(hint.contains('单'));
    }

    #[test]
    fn balanced_history_produces_no_hint() {
        let recent: Vec<String> = ["单", "双", "单", "双", "单", "双", "单", "双", "单", "双"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(bias_hint(&recent, 70).is_none());
    }

    #[test]
    fn exactly_at_threshold_is_not_biased() {
        // 7 of 10 = 70%, threshold requires strictly more
        let mut recent: Vec<String> = vec!["大".to_string(); 7];
        recent.extend(vec!["小".to_string(); 3]);
        assert!(bias_hint(&recent, 70).is_none());
    }

    #[test]
    fn prompt_carries_history_trend_and_instruction() {
        let history = vec![
            row("3349003", 16, true, false),
            row("3349002", 9, false, true),
            row("3349001", 20, true, false),
        ];
        let (system, user) = build_prompt(PredictionKind::Parity, "3349004", &history, &[], 70);
        assert!(!system.is_empty());
        assert!(user.contains("3349004"));
        assert!(user.contains("3349003"));
        assert!(user.contains("近三期走势"));
        assert!(user.contains("大双 小单 大双"));
        assert!(user.contains("单 或 双"));
        assert!(!user.contains("偏向"));
    }

    #[test]
    fn prompt_includes_bias_hint_when_history_leans() {
        let history = vec![row("3349003", 16, true, false)];
        let recent: Vec<String> = vec!["单".to_string(); 9]
            .into_iter()
            .chain(std::iter::once("双".to_string()))
            .collect();
        let (_, user) = build_prompt(PredictionKind::Parity, "3349004", &history, &recent, 70);
        assert!(user.contains("偏向"));
    }
}

//! Reply grammars. LLM output is free text; each parser tolerates leading
//! chatter and whitespace and extracts the first well-formed answer. A reply
//! with no extractable answer fails that prediction task only.

use crate::error::{AppError, Result};
use crate::types::PredictionKind;

pub const COMBO_LABELS: [&str; 4] = ["大单", "小单", "大双", "小双"];

/// Earliest occurrence of any of `labels` in `reply`, by byte position.
fn first_label(reply: &str, labels: &[&'static str]) -> Option<&'static str> {
    labels
        .iter()
        .filter_map(|label| reply.find(label).map(|pos| (pos, *label)))
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, label)| label)
}

/// Combo labels in order of appearance, deduplicated.
fn labels_in_order(reply: &str) -> Vec<&'static str> {
    let mut found: Vec<(usize, &'static str)> = Vec::new();
    for label in COMBO_LABELS {
        for (pos, _) in reply.match_indices(label) {
            found.push((pos, label));
        }
    }
    found.sort_by_key(|(pos, _)| *pos);
    let mut out: Vec<&'static str> = Vec::new();
    for (_, label) in found {
        if !out.contains(&label) {
            out.push(label);
        }
    }
    out
}

pub fn parse_reply(kind: PredictionKind, reply: &str) -> Result<String> {
    let reply = reply.trim();
    match kind {
        PredictionKind::Parity => first_label(reply, &["单", "双"])
            .map(str::to_string)
            .ok_or_else(|| AppError::PredictionParse(format!("parity reply {reply:?}"))),
        PredictionKind::Magnitude => first_label(reply, &["大", "小"])
            .map(str::to_string)
            .ok_or_else(|| AppError::PredictionParse(format!("magnitude reply {reply:?}"))),
        PredictionKind::Combo => {
            let labels = labels_in_order(reply);
            if labels.len() < 2 {
                return Err(AppError::PredictionParse(format!(
                    "combo reply {reply:?} has fewer than two distinct labels"
                )));
            }
            Ok(format!("{},{}", labels[0], labels[1]))
        }
        PredictionKind::Kill => first_label(reply, &COMBO_LABELS)
            .map(str::to_string)
            .ok_or_else(|| AppError::PredictionParse(format!("kill reply {reply:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parity_tolerates_whitespace_and_chatter() {
        assert_eq!(parse_reply(PredictionKind::Parity, "  单 ").unwrap(), "单");
        assert_eq!(parse_reply(PredictionKind::Parity, "答案：双。").unwrap(), "双");
        assert!(parse_reply(PredictionKind::Parity, "无法预测").is_err());
    }

    #[test]
    fn magnitude_takes_the_first_label() {
        assert_eq!(parse_reply(PredictionKind::Magnitude, "大").unwrap(), "大");
        assert_eq!(parse_reply(PredictionKind::Magnitude, "本期看小，不看大").unwrap(), "小");
        assert!(parse_reply(PredictionKind::Magnitude, "?").is_err());
    }

    #[test]
    fn combo_requires_two_distinct_labels() {
        assert_eq!(parse_reply(PredictionKind::Combo, "大单,小双").unwrap(), "大单,小双");
        assert_eq!(
            parse_reply(PredictionKind::Combo, "推荐 小双 和 大单").unwrap(),
            "小双,大单"
        );
        assert!(parse_reply(PredictionKind::Combo, "大单,大单").is_err());
        assert!(parse_reply(PredictionKind::Combo, "大单").is_err());
    }

    #[test]
    fn kill_extracts_a_single_combo_label() {
        assert_eq!(parse_reply(PredictionKind::Kill, "杀：大双").unwrap(), "大双");
        assert!(parse_reply(PredictionKind::Kill, "单").is_err());
    }

    #[test]
    fn combo_keeps_appearance_order() {
        assert_eq!(
            parse_reply(PredictionKind::Combo, "小单、大双、大单").unwrap(),
            "小单,大双"
        );
    }
}

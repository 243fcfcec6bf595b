//! Scanning of `label: amount` line items in raw dossier text.

use regex::Regex;
use std::sync::LazyLock;

use crate::amount::parse_amount;

static LINE_ITEM_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)([a-z][a-z0-9 /&()'.%-]*?)\s*[:=]\s*(\(?-?\$?\s?\d[\d,]*(?:\.\d+)?\)?\s?[kmbt%]?)(?:[^a-z0-9]|$)",
    )
    .unwrap()
});

/// A labelled amount found in the dossier.
#[derive(Debug, Clone, PartialEq)]
pub struct LineItem {
    pub label: String,
    pub value: f64,
}

/// All `label: amount` pairs in order of appearance.
pub fn line_items(text: &str) -> Vec<LineItem> {
    LINE_ITEM_PATTERN
        .captures_iter(text)
        .filter_map(|caps| {
            let label = caps.get(1)?.as_str().trim().to_string();
            let value = parse_amount(caps.get(2)?.as_str())?;
            Some(LineItem { label, value })
        })
        .collect()
}

/// Whether a label describes a ratio rather than an amount.
fn is_ratio_label(label: &str) -> bool {
    label.contains('/')
        || label.contains('%')
        || label.contains("ratio")
        || label.contains("to equity")
        || label.contains("to assets")
}

/// Best "debt" line item: long-term first, then total, then any other debt line.
pub fn find_debt_line(text: &str) -> Option<LineItem> {
    let mut best: Option<(u8, LineItem)> = None;

    for item in line_items(text) {
        let label = item.label.to_lowercase();
        if !label.contains("debt") || is_ratio_label(&label) {
            continue;
        }

        let rank = if label.contains("long") || label.contains("lt debt") {
            0
        } else if label.contains("total") {
            1
        } else {
            2
        };

        if best.as_ref().map_or(true, |(r, _)| rank < *r) {
            best = Some((rank, item));
        }
    }

    best.map(|(_, item)| item)
}

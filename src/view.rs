use crate::document::{MetricsDocument, MetricsView};

pub const OVERALL: &str = "overall";

/// `"overall"` -> overall; a known day -> that day; anything else -> overall.
pub fn select_view<'a>(doc: &'a MetricsDocument, key: &str) -> &'a MetricsView {
    if key == OVERALL {
        return &doc.overall;
    }
    doc.per_day.get(key).unwrap_or(&doc.overall)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayOption {
    pub key: String,
    pub label: String,
}

/// State of the day-selection control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySelector {
    /// False hides the control: the document has no per-day breakdown.
    pub enabled: bool,
    pub options: Vec<DayOption>,
    pub selected: String,
}

impl DaySelector {
    pub fn offers(&self, key: &str) -> bool {
        self.options.iter().any(|o| o.key == key)
    }
}

fn overall_option() -> DayOption {
    DayOption { key: OVERALL.to_string(), label: "Overall (all days)".to_string() }
}

/// Listed days, falling back to the per-day keys in sorted order.
pub fn day_keys(doc: &MetricsDocument) -> Vec<String> {
    if !doc.available_days.is_empty() {
        return doc.available_days.clone();
    }
    doc.per_day.keys().cloned().collect()
}

pub fn day_selector(doc: &MetricsDocument, current: &str) -> DaySelector {
    let mut selector = DaySelector {
        enabled: doc.has_day_data(),
        options: vec![overall_option()],
        selected: OVERALL.to_string(),
    };
    if !selector.enabled {
        return selector;
    }

    selector
        .options
        .extend(day_keys(doc).into_iter().map(|d| DayOption { label: format!("Day {}", d), key: d }));
    if selector.offers(current) {
        selector.selected = current.to_string();
    }
    selector
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc_with_days() -> MetricsDocument {
        MetricsDocument::normalize(json!({
            "overall": {"n_rows": 10},
            "per_day": {"30/03": {"n_rows": 6}, "29/03": {"n_rows": 4}}
        }))
    }

    #[test]
    fn test_select_overall() {
        let doc = doc_with_days();
        assert_eq!(select_view(&doc, OVERALL).n_rows(), Some(&json!(10)));
    }

    #[test]
    fn test_select_known_day() {
        let doc = doc_with_days();
        assert_eq!(select_view(&doc, "29/03").n_rows(), Some(&json!(4)));
    }

    #[test]
    fn test_select_unknown_day_falls_back() {
        let doc = doc_with_days();
        assert_eq!(select_view(&doc, "01/04").n_rows(), Some(&json!(10)));
        assert_eq!(select_view(&doc, "").n_rows(), Some(&json!(10)));
    }

    #[test]
    fn test_selector_hidden_without_days() {
        let doc = MetricsDocument::normalize(json!({"n_rows": 3}));
        let sel = day_selector(&doc, "29/03");
        assert!(!sel.enabled);
        assert_eq!(sel.options.len(), 1);
        assert_eq!(sel.selected, OVERALL);
    }

    #[test]
    fn test_selector_sorts_per_day_keys() {
        let sel = day_selector(&doc_with_days(), OVERALL);
        assert!(sel.enabled);
        let keys: Vec<&str> = sel.options.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec![OVERALL, "29/03", "30/03"]);
        assert_eq!(sel.options[1].label, "Day 29/03");
    }

    #[test]
    fn test_selector_prefers_available_days_order() {
        let doc = MetricsDocument::normalize(json!({
            "overall": {},
            "per_day": {"a": {}, "b": {}},
            "available_days": ["b", "a"]
        }));
        let sel = day_selector(&doc, "a");
        assert_eq!(sel.options[1].key, "b");
        assert_eq!(sel.selected, "a");
    }

    #[test]
    fn test_selector_resets_vanished_day() {
        let sel = day_selector(&doc_with_days(), "01/04");
        assert_eq!(sel.selected, OVERALL);
        assert!(sel.offers("30/03"));
    }
}

//! Text rendering of a metrics view. Pure: same view, timestamp and clock
//! reading always give the same output.

use std::fmt;

use chrono::{DateTime, FixedOffset, Utc};
use serde_json::{Map, Value};

use crate::document::MetricsView;

pub const NO_DATA: &str = "No data.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn cell(v: Option<&Value>) -> String {
    match v {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Rows are objects; each column is looked up by name, missing cells stay empty.
pub fn table(rows: &[Value], columns: &[&str]) -> Table {
    Table {
        columns: columns.iter().map(|c| c.to_string()).collect(),
        rows: rows
            .iter()
            .map(|r| columns.iter().map(|c| cell(r.get(*c))).collect())
            .collect(),
    }
}

pub fn key_value_table(map: Option<&Map<String, Value>>) -> Table {
    Table {
        columns: vec!["Item".to_string(), "Quantidade".to_string()],
        rows: map
            .map(|m| m.iter().map(|(k, v)| vec![k.clone(), cell(Some(v))]).collect())
            .unwrap_or_default(),
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return writeln!(f, "{}", NO_DATA);
        }
        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.chars().count()).collect();
        for row in &self.rows {
            for (w, c) in widths.iter_mut().zip(row) {
                *w = (*w).max(c.chars().count());
            }
        }
        write_row(f, &self.columns, &widths)?;
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        writeln!(f, "|-{}-|", rule.join("-|-"))?;
        for row in &self.rows {
            write_row(f, row, &widths)?;
        }
        Ok(())
    }
}

fn write_row(f: &mut fmt::Formatter<'_>, cells: &[String], widths: &[usize]) -> fmt::Result {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(c, w)| format!("{}{}", c, " ".repeat(w.saturating_sub(c.chars().count()))))
        .collect();
    writeln!(f, "| {} |", padded.join(" | "))
}

fn parse_ts(iso: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(iso).ok().map(|d| d.with_timezone(&Utc))
}

/// `dd/mm/yyyy - HH:MM:SS` at a fixed UTC offset; `-` when absent or unparseable.
pub fn format_local(iso: Option<&str>, offset_hours: i32) -> String {
    let Some(ts) = iso.and_then(parse_ts) else {
        return "-".to_string();
    };
    match FixedOffset::east_opt(offset_hours * 3600) {
        Some(offset) => ts.with_timezone(&offset).format("%d/%m/%Y - %H:%M:%S").to_string(),
        None => "-".to_string(),
    }
}

fn plural(n: i64, unit: &str) -> String {
    format!("Updated {} {}{} ago", n, unit, if n == 1 { "" } else { "s" })
}

pub fn time_ago(iso: Option<&str>, now: DateTime<Utc>) -> String {
    let Some(ts) = iso.and_then(parse_ts) else {
        return "-".to_string();
    };
    let diff_ms = (now - ts).num_milliseconds();
    if diff_ms < 0 {
        return "Updated just now".to_string();
    }
    let sec = diff_ms / 1000;
    if sec < 60 {
        return plural(sec, "second");
    }
    let min = sec / 60;
    if min < 60 {
        return plural(min, "minute");
    }
    let hr = min / 60;
    if hr < 24 {
        return plural(hr, "hour");
    }
    plural(hr / 24, "day")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub title: String,
    pub tables: Vec<(Option<String>, Table)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub total_rows: String,
    pub last_update: String,
    /// e.g. `UTC-3`
    pub zone: String,
    pub time_ago: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub summary: Summary,
    pub sections: Vec<Section>,
}

fn section(title: &str, t: Table) -> Section {
    Section { title: title.to_string(), tables: vec![(None, t)] }
}

pub fn render_view(
    view: &MetricsView,
    last_updated: Option<&str>,
    now: DateTime<Utc>,
    offset_hours: i32,
) -> Rendered {
    let summary = Summary {
        total_rows: view.n_rows().map_or_else(|| "-".to_string(), |v| cell(Some(v))),
        last_update: format_local(last_updated, offset_hours),
        zone: format!("UTC{:+}", offset_hours),
        time_ago: time_ago(last_updated, now),
    };

    let counts = Section {
        title: "Counts".to_string(),
        tables: view
            .counts()
            .into_iter()
            .map(|(name, m)| (Some(name.to_string()), key_value_table(Some(m))))
            .collect(),
    };

    let sections = vec![
        counts,
        section(
            "Shells by combination",
            table(view.rows("cascas_por_combinacao"), &["Casca", "Chocolate", "Quantidade de cascas"]),
        ),
        section("Type x filling", table(view.rows("tipo_recheio"), &["Tipo", "Recheio", "quantidade"])),
        section("Type x chocolate", table(view.rows("tipo_chocolate"), &["Tipo", "Chocolate", "quantidade"])),
        section("Chocolate used (g)", key_value_table(view.mapping("gasto_por_chocolate_gramas"))),
        section("Sweets totals", key_value_table(view.mapping("docinhos_totais"))),
        section("Sweets ingredients", key_value_table(view.mapping("ingredientes_docinhos_total"))),
    ];

    Rendered { summary, sections }
}

impl fmt::Display for Rendered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total rows: {}", self.summary.total_rows)?;
        writeln!(f, "Last update ({}): {}", self.summary.zone, self.summary.last_update)?;
        writeln!(f, "{}", self.summary.time_ago)?;
        for s in &self.sections {
            writeln!(f)?;
            writeln!(f, "== {} ==", s.title)?;
            if s.tables.is_empty() {
                writeln!(f, "{}", NO_DATA)?;
            }
            for (heading, t) in &s.tables {
                if let Some(h) = heading {
                    writeln!(f, "-- {}", h)?;
                }
                write!(f, "{}", t)?;
            }
        }
        Ok(())
    }
}

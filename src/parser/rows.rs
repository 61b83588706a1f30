use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// Unparsed row as it appears on the page, percent signs already stripped.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub label: String,
    pub country: String,
    pub year: String,
    pub annual_inflation: String,
    pub average_inflation: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Row did not have exactly two right-aligned value cells.
    MalformedRow { value_cells: usize },
    MissingLabel,
    LabelMismatch { label: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MalformedRow { value_cells } => {
                write!(f, "expected 2 value cells, found {}", value_cells)
            }
            SkipReason::MissingLabel => write!(f, "no label link"),
            SkipReason::LabelMismatch { label } => write!(f, "unrecognized label {:?}", label),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Matched(RawRecord),
    Skipped(SkipReason),
}

fn selector(cell: &'static OnceLock<Selector>, css: &str) -> &'static Selector {
    cell.get_or_init(|| Selector::parse(css).expect("static selector"))
}

fn primary_rows() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    selector(&SEL, "tr.tabledata1")
}

fn alternate_rows() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    selector(&SEL, "tr.tabledata2")
}

fn label_cell() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    selector(&SEL, "a")
}

fn value_cells() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    selector(&SEL, r#"td[align="right"]"#)
}

fn label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^CPI inflation (?P<country>.+?) (?P<year>\d{4})$").expect("static regex")
    })
}

/// Classify every data row on the page. Primary-styled rows come first,
/// then alternate-styled rows, each in document order.
pub fn extract_rows(document: &Html) -> Vec<RowOutcome> {
    document
        .select(primary_rows())
        .chain(document.select(alternate_rows()))
        .map(classify_row)
        .collect()
}

fn classify_row(row: ElementRef) -> RowOutcome {
    let values: Vec<String> = row
        .select(value_cells())
        .map(|td| td.text().collect::<String>())
        .collect();
    if values.len() != 2 {
        return RowOutcome::Skipped(SkipReason::MalformedRow {
            value_cells: values.len(),
        });
    }

    let label = match row.select(label_cell()).next() {
        Some(a) => collapse_whitespace(&a.text().collect::<String>()),
        None => return RowOutcome::Skipped(SkipReason::MissingLabel),
    };

    let Some((country, year)) = parse_label(&label) else {
        return RowOutcome::Skipped(SkipReason::LabelMismatch { label });
    };

    RowOutcome::Matched(RawRecord {
        country,
        year,
        annual_inflation: clean_value(&values[0]),
        average_inflation: clean_value(&values[1]),
        label,
    })
}

/// Split `"CPI inflation <country> <year>"` into its country and year parts.
pub fn parse_label(label: &str) -> Option<(String, String)> {
    let caps = label_re().captures(label.trim())?;
    Some((caps["country"].to_string(), caps["year"].to_string()))
}

/// Drop the `&nbsp;%` suffix and surrounding whitespace.
pub fn clean_value(cell: &str) -> String {
    cell.replace("\u{a0}%", "").trim().to_string()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub mod links;
pub mod rows;

use scraper::Html;
use url::Url;

pub use rows::{RawRecord, RowOutcome, SkipReason};

pub struct ParsedPage {
    pub rows: Vec<RowOutcome>,
    pub links: Vec<Url>,
}

/// HTML → classified data rows + pagination links.
pub fn parse_page(html: &str, base: &Url) -> ParsedPage {
    let document = Html::parse_document(html);
    ParsedPage {
        rows: rows::extract_rows(&document),
        links: links::pagination_links(&document, base),
    }
}

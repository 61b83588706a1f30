use std::sync::OnceLock;

use scraper::{Html, Selector};
use url::Url;

fn pagination() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| {
        Selector::parse("table.notelinkstable a.notelinks").expect("static selector")
    })
}

/// Absolute URLs of every pagination anchor, in page order, fragments removed.
/// Duplicates are left for the frontier to collapse.
pub fn pagination_links(document: &Html, base: &Url) -> Vec<Url> {
    document
        .select(pagination())
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| base.join(href.trim()).ok())
        .map(|mut url| {
            url.set_fragment(None);
            url
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn links(body: &str) -> Vec<String> {
        let base = Url::parse("https://www.inflation.eu/en/inflation-rates/cpi-inflation-2024.aspx")
            .unwrap();
        let doc = Html::parse_document(body);
        pagination_links(&doc, &base)
            .into_iter()
            .map(String::from)
            .collect()
    }

    #[test]
    fn resolves_relative_links() {
        let body = r##"
            <table class="notelinkstable"><tr><td>
              <a class="notelinks" href="cpi-inflation-2023.aspx">2023</a>
              <a class="notelinks" href="/en/inflation-rates/cpi-inflation-2022.aspx#top">2022</a>
            </td></tr></table>"##;
        assert_eq!(
            links(body),
            [
                "https://www.inflation.eu/en/inflation-rates/cpi-inflation-2023.aspx",
                "https://www.inflation.eu/en/inflation-rates/cpi-inflation-2022.aspx",
            ]
        );
    }

    #[test]
    fn ignores_anchors_outside_pagination_table() {
        let body = r#"
            <a class="notelinks" href="elsewhere.aspx">x</a>
            <table class="other"><tr><td><a class="notelinks" href="nope.aspx">y</a></td></tr></table>
            <table class="notelinkstable"><tr><td><a href="plain.aspx">z</a></td></tr></table>"#;
        assert!(links(body).is_empty());
    }
}

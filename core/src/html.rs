use lazy_static::lazy_static;
use scraper::{Html, Selector};

lazy_static! {
    static ref SEL_TITLE: Selector = Selector::parse("title").expect("valid selector");
    static ref SEL_LINKS: Selector = Selector::parse("a[href]").expect("valid selector");
}

const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// What the crawler and the search engine need from one HTML document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageDocument {
    pub title: Option<String>,
    pub text: String,
    pub links: Vec<String>,
}

impl PageDocument {
    pub fn parse(markup: &str) -> Self {
        let doc = Html::parse_document(markup);
        let title = doc
            .select(&SEL_TITLE)
            .next()
            .map(|n| n.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty());
        let links = doc
            .select(&SEL_LINKS)
            .filter_map(|a| a.value().attr("href"))
            .map(|h| h.trim().to_string())
            .collect();
        Self { title, text: visible_text(&doc), links }
    }
}

/// Plain text of `markup` with whitespace collapsed.
pub fn clean_html(markup: &str) -> String {
    if markup.trim().is_empty() {
        return String::new();
    }
    visible_text(&Html::parse_document(markup))
}

pub fn title(markup: &str) -> Option<String> {
    PageDocument::parse(markup).title
}

fn visible_text(doc: &Html) -> String {
    let mut pieces: Vec<&str> = Vec::new();
    for node in doc.root_element().descendants() {
        let Some(text) = node.value().as_text() else { continue };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element())
            .map_or(false, |e| HIDDEN_ELEMENTS.contains(&e.name()));
        if !hidden {
            pieces.extend(text.split_whitespace());
        }
    }
    pieces.join(" ")
}

use anyhow::{Context, Result};
use reqwest::Client;
use scraper::{Html, Selector};
use std::io::Cursor;
use tracing::{info, warn};

/// Best-effort readable content of a web page
#[derive(Debug, Clone)]
pub struct ScrapedPage {
    pub title: Option<String>,
    pub text: String,
}

/// Scrapes the content of a page from the given URL.
/// Returns the extracted title (if any) and text content.
pub async fn scrape_page(client: &Client, url: &str) -> Result<ScrapedPage> {
    let response = client.get(url).send().await.context("failed to fetch page")?;

    let status = response.status();
    if !status.is_success() {
        return Err(anyhow::anyhow!("page fetch failed with status: {}", status));
    }

    let bytes = response.bytes().await.context("failed to read response body")?;
    let url_obj = url::Url::parse(url).context("failed to parse page URL")?;
    Ok(extract_page(&bytes, &url_obj))
}

/// Readability first, then a plain text dump of the whole document.
pub fn extract_page(bytes: &[u8], url: &url::Url) -> ScrapedPage {
    let html = String::from_utf8_lossy(bytes);
    let fallback_title = document_title(&html);

    let mut reader = Cursor::new(bytes);
    match readability::extractor::extract(&mut reader, url) {
        Ok(product) => {
            let title = Some(product.title.trim().to_string())
                .filter(|t| !t.is_empty())
                .or(fallback_title);

            // Convert HTML to Markdown for cleaner LLM input
            let text = match html2text::from_read(product.content.as_bytes(), 80) {
                Ok(markdown) => markdown,
                Err(e) => {
                    warn!("scraping: failed to convert extracted HTML to markdown: {}", e);
                    product.text
                }
            };
            let text = if text.trim().is_empty() { html_to_text(&html) } else { text };
            info!("scraping: extracted {} chars from {}", text.len(), url);
            ScrapedPage { title, text: text.trim().to_string() }
        }
        Err(e) => {
            warn!("scraping: readability failed for {}: {}", url, e);
            ScrapedPage {
                title: fallback_title,
                text: html_to_text(&html).trim().to_string(),
            }
        }
    }
}

/// Contents of `<title>`, if present and non-blank
pub fn document_title(html: &str) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    let document = Html::parse_document(html);
    let title = document
        .select(&selector)
        .next()?
        .text()
        .collect::<String>();
    let title = collapse_whitespace(&title);
    if title.is_empty() { None } else { Some(title) }
}

/// Plain text of an HTML fragment, markup dropped and whitespace collapsed
pub fn html_to_text(html: &str) -> String {
    match html2text::from_read(html.as_bytes(), 10_000) {
        Ok(text) => text,
        Err(_) => {
            let fragment = Html::parse_fragment(html);
            collapse_whitespace(&fragment.root_element().text().collect::<String>())
        }
    }
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cut to at most `max_chars` characters, marking the cut
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str("\n...[truncated]...");
    cut
}

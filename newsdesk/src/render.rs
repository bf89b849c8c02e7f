//! Deterministic HTML rendering of a [`NewsletterDraft`] and date-keyed
//! persistence of the result.

use chrono::NaiveDate;
use html_escape::{encode_double_quoted_attribute, encode_text};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::history::artifact_file_name;
use crate::model::{CandidateItem, DraftItem, NewsletterArtifact, NewsletterDraft, ToolResult, UnresolvedCitation};

const STYLE: &str = "body{margin:0;padding:24px;background:#f6f6f4;color:#1d1d1f;font-family:Georgia,'Times New Roman',serif;line-height:1.5}\
main{max-width:900px;margin:0 auto;background:#fff;padding:24px 32px;border-radius:6px}\
h1{font-size:28px;margin:0 0 4px}\
h2{font-size:19px;margin:28px 0 8px;padding-bottom:4px;border-bottom:1px solid #e5e5e5}\
ul{padding-left:20px;margin:0}\
li{margin:6px 0}\
a{color:#1a5fb4}\
mark{background:#fff3a3;padding:0 2px}\
.meta{color:#666;font-size:13px;margin:0 0 16px}\
.notice{background:#fff4e5;border-left:4px solid #e67e22;padding:8px 12px;font-size:14px}\
.omitted{color:#b05000;font-size:12px;font-style:italic}\
footer{margin-top:30px;padding-top:20px;border-top:1px solid #e5e5e5;font-size:12px;color:#666;text-align:center}";

/// Every URL the agent legitimately saw during the run
#[derive(Debug, Default, Clone)]
pub struct CitationIndex {
    urls: HashSet<String>,
}

impl CitationIndex {
    pub fn build(items: &[CandidateItem], tool_results: &[ToolResult]) -> Self {
        let seen = items
            .iter()
            .map(|i| i.url.as_str())
            .chain(tool_results.iter().flat_map(|r| r.hits.iter()).map(|h| h.url.as_str()));
        Self { urls: seen.filter_map(citation_key).collect() }
    }

    /// True for http(s) URLs that were seen, query string included
    pub fn resolves(&self, url: &str) -> bool {
        citation_key(url).is_some_and(|key| self.urls.contains(&key))
    }
}

/// Match key for citations. Unlike [`canonical_url`](crate::model::canonical_url)
/// the query string is kept, since it often identifies the page; only the
/// fragment is ignored.
fn citation_key(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?.to_lowercase();

    let mut key = format!("{}://{}", parsed.scheme(), host);
    if let Some(port) = parsed.port() {
        key.push_str(&format!(":{}", port));
    }
    let path = parsed.path().trim_end_matches('/');
    key.push_str(if path.is_empty() { "/" } else { path });
    if let Some(query) = parsed.query().filter(|q| !q.is_empty()) {
        key.push('?');
        key.push_str(query);
    }
    Some(key)
}

/// HTML plus the citations that had to be dropped
#[derive(Debug, Clone)]
pub struct RenderedHtml {
    pub html: String,
    pub unresolved: Vec<UnresolvedCitation>,
}

/// Render a draft into a self-contained HTML document
pub fn render_html(draft: &NewsletterDraft, date: NaiveDate, model: &str, index: &CitationIndex) -> RenderedHtml {
    let mut unresolved = Vec::new();
    let mut body = String::new();

    for section in &draft.sections {
        body.push_str("<section>\n<h2>");
        body.push_str(&encode_text(section.heading.trim()));
        body.push_str("</h2>\n<ul>\n");
        for item in &section.items {
            body.push_str(&render_item(item, &section.heading, index, &mut unresolved));
        }
        body.push_str("</ul>\n</section>\n");
    }

    let date_long = date.format("%A, %B %d, %Y").to_string();
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    html.push_str(&format!(
        "<meta name=\"generated-on\" content=\"{}\">\n<meta name=\"generator-model\" content=\"{}\">\n",
        date.format("%Y-%m-%d"),
        encode_double_quoted_attribute(model)
    ));
    html.push_str(&format!("<title>{}</title>\n", encode_text(draft.title.trim())));
    html.push_str(&format!("<style>{}</style>\n</head>\n<body>\n<main>\n", STYLE));
    html.push_str(&format!("<h1>{}</h1>\n", encode_text(draft.title.trim())));
    html.push_str(&format!(
        "<p class=\"meta\">{} &middot; {}</p>\n",
        encode_text(&date_long),
        encode_text(model)
    ));
    if !unresolved.is_empty() {
        html.push_str(&format!(
            "<p class=\"notice\">{} citation(s) could not be matched to any fetched source or search result and were removed. Affected items are marked.</p>\n",
            unresolved.len()
        ));
    }
    html.push_str(&body);
    html.push_str("<footer>Curated automatically from your sources. Reply to this email to give feedback or unsubscribe.</footer>\n");
    html.push_str("</main>\n</body>\n</html>\n");

    RenderedHtml { html, unresolved }
}

fn render_item(item: &DraftItem, section: &str, index: &CitationIndex, unresolved: &mut Vec<UnresolvedCitation>) -> String {
    let text = encode_text(item.text.trim());
    let mut out = String::from("<li>");
    if item.highlight {
        out.push_str(&format!("<mark>{}</mark>", text));
    } else {
        out.push_str(&text);
    }

    let mut links = Vec::new();
    let mut omitted = 0;
    for citation in &item.citations {
        if index.resolves(&citation.url) {
            let label = citation
                .source
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .or_else(|| url::Url::parse(citation.url.trim()).ok().and_then(|u| u.host_str().map(str::to_string)))
                .unwrap_or_else(|| "source".to_string());
            links.push(format!(
                "<a href=\"{}\">{}</a>",
                encode_double_quoted_attribute(citation.url.trim()),
                encode_text(&label)
            ));
        } else {
            omitted += 1;
            unresolved.push(UnresolvedCitation {
                section: section.to_string(),
                url: citation.url.clone(),
            });
        }
    }

    if !links.is_empty() {
        out.push_str(" (");
        out.push_str(&links.join(", "));
        out.push(')');
    }
    if omitted > 0 {
        out.push_str(&format!(" <span class=\"omitted\">[{} source(s) omitted: unverified]</span>", omitted));
    }
    out.push_str("</li>\n");
    out
}

/// Writes artifacts under the data directory, one file per date
pub struct Renderer {
    data_dir: PathBuf,
}

impl Renderer {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into() }
    }

    pub fn artifact_path(&self, date: NaiveDate) -> PathBuf {
        self.data_dir.join(artifact_file_name(date))
    }

    /// Render and persist; a second call for the same date replaces the file
    pub async fn render(
        &self,
        draft: &NewsletterDraft,
        date: NaiveDate,
        model: &str,
        index: &CitationIndex,
    ) -> Result<NewsletterArtifact, PipelineError> {
        let rendered = render_html(draft, date, model, index);
        for dropped in &rendered.unresolved {
            warn!(section = %dropped.section, url = %dropped.url, "RenderCitationUnresolved: citation stripped");
        }

        let path = self.artifact_path(date);
        write_atomically(&path, rendered.html.as_bytes())
            .await
            .map_err(|source| PipelineError::Persist { path: path.clone(), source })?;
        info!("Newsletter saved to {}", path.display());

        Ok(NewsletterArtifact {
            date,
            model: model.to_string(),
            html: rendered.html,
            path,
            unresolved: rendered.unresolved,
        })
    }
}

/// Write to a sibling temp file, then rename over the target
async fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(dir).await?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "newsletter.html".to_string());
    let tmp = dir.join(format!(".{}.tmp", file_name));

    if let Err(e) = tokio::fs::write(&tmp, bytes).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

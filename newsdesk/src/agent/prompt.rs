use serde_json::json;

use super::AgentBrief;
use crate::model::{CandidateItem, SourceKind};

const OUTPUT_CONTRACT: &str = r#"OUTPUT FORMAT:
Reply with a single JSON object and nothing else (no markdown, no commentary):
{
  "title": "string",
  "sections": [
    {
      "heading": "string",
      "items": [
        {
          "text": "one or two dense sentences",
          "highlight": false,
          "citations": [{ "url": "https://...", "source": "short source name" }]
        }
      ]
    }
  ]
}
Rules:
- Every item cites at least one URL, and every cited URL must appear in the source material above or in a search_web / scrape_webpage result. Never invent URLs.
- Most important items first, most important section first.
- Set "highlight" to true on the 3-8 most important items overall, no more.
- Keep it brief: about 40 items at most, fewer on a slow news day."#;

/// System turn: date, reader profile, all source material and the output contract
pub fn system_prompt(brief: &AgentBrief) -> String {
    let date = brief.date.format("%A, %B %d, %Y");
    let mut out = String::new();

    out.push_str("You are a personalized newsletter curator.\n\n");
    out.push_str(&format!("TODAY'S DATE: {}\n\n", date));
    out.push_str(brief.prompt.trim());
    out.push_str("\n\n");

    out.push_str(&format!(
        "=== RECENT POSTS FROM RSS FEEDS (last {} hours) ===\n",
        brief.lookback_hours
    ));
    let feeds: Vec<_> = brief.items.iter().filter(|i| i.origin.kind == SourceKind::Rss).collect();
    if feeds.is_empty() {
        out.push_str("(no recent posts)\n");
    }
    for item in feeds {
        out.push_str(&item_line(item));
        out.push('\n');
    }

    out.push_str("\n=== OTHER SOURCES (PRE-SCRAPED CONTENT) ===\n");
    let pages: Vec<_> = brief
        .items
        .iter()
        .filter(|i| i.origin.kind == SourceKind::PageScrape)
        .collect();
    if pages.is_empty() {
        out.push_str("(none)\n");
    }
    for item in pages {
        out.push_str(&item_line(item));
        out.push('\n');
    }

    out.push_str(&format!(
        "\n=== RECENT NEWSLETTERS (last {} issues, do not repeat what they covered) ===\n",
        brief.recent.len()
    ));
    if brief.recent.is_empty() {
        out.push_str("(no prior newsletters)\n");
    }
    for past in &brief.recent {
        out.push_str(&format!(
            "<newsletter date=\"{}\">\n{}\n</newsletter>\n",
            past.date.format("%Y-%m-%d"),
            past.text
        ));
    }

    out.push_str("\nRESEARCH INSTRUCTIONS:\n");
    out.push_str("1. Review the RSS posts and the pre-scraped sources above.\n");
    out.push_str("2. When you need more detail, call search_web or scrape_webpage for specific follow-ups. Tool calls are limited, use them on what matters.\n");
    out.push_str("3. Research thoroughly, but keep the output brief and skimmable.\n");
    out.push_str("4. Only include things from the past 24-48 hours. Items marked \"undated\" carry no timestamp; check them before relying on them.\n");
    out.push_str("5. Do not repeat items already covered in recent newsletters. If something is still important, give a one-line update citing the new source.\n\n");
    out.push_str(&format!(
        "Title the newsletter \"{} - {}\".\n\n",
        brief.newsletter_name, date
    ));
    out.push_str(OUTPUT_CONTRACT);
    out
}

/// First user turn
pub fn kickoff_message() -> String {
    "Generate today's newsletter based on the configured sources and interests.".to_string()
}

/// User turn appended after a draft that failed to parse
pub fn corrective_message(reason: &str) -> String {
    format!(
        "Your previous reply could not be used: {}. Reply again with only the JSON object described in OUTPUT FORMAT, with no text around it.",
        reason
    )
}

/// User turn appended once the tool budget is spent
pub fn tools_exhausted_message(budget: usize) -> String {
    format!(
        "The research budget of {} tool calls is used up. Do not request more tools. Write the final newsletter now as the JSON object described in OUTPUT FORMAT, citing only URLs you have already seen.",
        budget
    )
}

/// One compact JSON line per item
pub fn item_line(item: &CandidateItem) -> String {
    let mut value = json!({
        "title": item.title,
        "url": item.url,
        "source": item.source_name,
        "text": item.text,
    });
    match item.published {
        Some(ts) => value["published"] = json!(ts.to_rfc3339()),
        None if item.is_undated() => value["undated"] = json!(true),
        None => {}
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::PastNewsletter;
    use crate::model::{canonical_url, SourceSpec};
    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use std::sync::Arc;

    fn item(url: &str, kind: SourceKind, published: Option<chrono::DateTime<Utc>>) -> CandidateItem {
        CandidateItem {
            title: "A \"quoted\" title".into(),
            url: url.into(),
            canonical_url: canonical_url(url),
            published,
            text: "line one\nline two".into(),
            source_name: "Example".into(),
            origin: Arc::new(SourceSpec { url: "https://example.com/feed".into(), kind, lookback: Duration::hours(24) }),
        }
    }

    #[test]
    fn item_lines_are_single_line_json() {
        let dated = item("https://example.com/a", SourceKind::Rss, Some(Utc.with_ymd_and_hms(2026, 10, 17, 8, 0, 0).unwrap()));
        let line = item_line(&dated);
        assert!(!line.contains('\n'));
        let v: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(v["url"], "https://example.com/a");
        assert!(v["published"].as_str().unwrap().starts_with("2026-10-17T08:00:00"));
        assert!(v.get("undated").is_none());

        let undated = item("https://example.com/b", SourceKind::Rss, None);
        let v: serde_json::Value = serde_json::from_str(&item_line(&undated)).unwrap();
        assert_eq!(v["undated"], true);

        let page = item("https://example.com/c", SourceKind::PageScrape, None);
        let v: serde_json::Value = serde_json::from_str(&item_line(&page)).unwrap();
        assert!(v.get("undated").is_none());
    }

    #[test]
    fn system_prompt_carries_sources_history_and_contract() {
        let brief = AgentBrief {
            date: NaiveDate::from_ymd_opt(2026, 10, 17).unwrap(),
            newsletter_name: "Morning Brief".into(),
            prompt: "I care about compilers.".into(),
            lookback_hours: 24,
            items: vec![
                item("https://example.com/a", SourceKind::Rss, None),
                item("https://other.example/page", SourceKind::PageScrape, None),
            ],
            recent: vec![PastNewsletter {
                date: NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
                path: "data/newsletter_2026-10-16.html".into(),
                text: "Yesterday's news".into(),
            }],
        };
        let prompt = system_prompt(&brief);
        assert!(prompt.contains("Saturday, October 17, 2026"));
        assert!(prompt.contains("I care about compilers."));
        assert!(prompt.contains("https://example.com/a"));
        assert!(prompt.contains("https://other.example/page"));
        assert!(prompt.contains("<newsletter date=\"2026-10-16\">"));
        assert!(prompt.contains("Morning Brief - Saturday, October 17, 2026"));
        assert!(prompt.contains("\"sections\""));
    }
}

//! Previously generated newsletters, fed back to the agent so it does not
//! repeat what readers have already seen.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::scraping::html_to_text;

pub const ARTIFACT_PREFIX: &str = "newsletter_";
pub const ARTIFACT_SUFFIX: &str = ".html";

#[derive(Debug, Clone, PartialEq)]
pub struct PastNewsletter {
    pub date: NaiveDate,
    pub path: PathBuf,
    /// Rendered HTML reduced to plain text
    pub text: String,
}

/// File name of the artifact for `date`
pub fn artifact_file_name(date: NaiveDate) -> String {
    format!("{}{}{}", ARTIFACT_PREFIX, date.format("%Y-%m-%d"), ARTIFACT_SUFFIX)
}

/// Date encoded in an artifact file name, if it is one
pub fn artifact_date(file_name: &str) -> Option<NaiveDate> {
    let stem = file_name
        .strip_prefix(ARTIFACT_PREFIX)?
        .strip_suffix(ARTIFACT_SUFFIX)?;
    NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
}

/// The `limit` most recent artifacts strictly before `today`, oldest first.
/// A missing data directory means there is no history yet.
pub async fn load_recent(data_dir: &Path, limit: usize, today: NaiveDate) -> Result<Vec<PastNewsletter>> {
    if limit == 0 {
        return Ok(Vec::new());
    }

    let mut entries = match tokio::fs::read_dir(data_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("no data directory at {}, starting without history", data_dir.display());
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to list {}", data_dir.display()));
        }
    };

    let mut found: Vec<(NaiveDate, PathBuf)> = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(date) = name.to_str().and_then(artifact_date) else {
            continue;
        };
        if date < today {
            found.push((date, entry.path()));
        }
    }
    found.sort_by_key(|(date, _)| *date);
    let skip = found.len().saturating_sub(limit);

    let mut past = Vec::new();
    for (date, path) in found.into_iter().skip(skip) {
        match tokio::fs::read_to_string(&path).await {
            Ok(html) => past.push(PastNewsletter {
                date,
                text: html_to_text(&html).trim().to_string(),
                path,
            }),
            Err(e) => warn!("skipping unreadable newsletter {}: {}", path.display(), e),
        }
    }
    Ok(past)
}

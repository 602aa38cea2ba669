//! Recovery of tracker side identifiers from metafile comments.
//!
//! Trackers usually stamp the details page of a torrent into its comment.
//! When we find a known site's url there, the id in it saves the caller a
//! remote lookup. The table below is plain data; adding a site means adding
//! an entry, or passing extra [`TrackerPatternEntry`] values in the
//! configuration.
use once_cell::sync::Lazy;
use regex::Regex;
use serde_derive::{Deserialize, Serialize};

use crate::error::conf::{ConfError, Result};

/// A configured site pattern before compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerPatternEntry {
    /// Short site identifier reported back to the caller.
    pub site: String,
    /// Base url that must occur in the comment.
    pub url: String,
    /// Regex with one capture group for the id. Without one the torrent's
    /// info hash is the id.
    #[serde(default)]
    pub pattern: Option<String>,
}

/// How the id is pulled out once the site url is present.
#[derive(Debug, Clone)]
pub enum IdRule {
    Capture(Regex),
    InfoHash,
}

#[derive(Debug, Clone)]
pub struct TrackerPattern {
    pub site: String,
    pub url: String,
    pub rule: IdRule,
}

/// A recovered identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerId {
    pub site: String,
    pub id: String,
}

const BUILTIN: &[(&str, &str, Option<&str>)] = &[
    ("ptp", "https://passthepopcorn.me", Some(r"torrentid=(\d+)")),
    ("aither", "https://aither.cc", Some(r"/(\d+)$")),
    ("lst", "https://lst.gg", Some(r"/(\d+)$")),
    ("oe", "https://onlyencodes.cc", Some(r"/(\d+)$")),
    ("blu", "https://blutopia.cc", Some(r"/(\d+)$")),
    ("hdb", "https://hdbits.org", Some(r"id=(\d+)")),
    ("btn", "https://broadcasthe.net", Some(r"id=(\d+)")),
    ("bhd", "https://beyond-hd.me", None),
];

static DEFAULT_PATTERNS: Lazy<TrackerPatterns> = Lazy::new(|| {
    let entries = BUILTIN
        .iter()
        .map(|(site, url, pattern)| TrackerPatternEntry {
            site: site.to_string(),
            url: url.to_string(),
            pattern: pattern.map(str::to_string),
        })
        .collect();
    TrackerPatterns::from_entries(entries).expect("built in tracker patterns must compile")
});

/// The compiled site table.
#[derive(Debug, Clone)]
pub struct TrackerPatterns {
    patterns: Vec<TrackerPattern>,
}

impl Default for TrackerPatterns {
    fn default() -> Self {
        DEFAULT_PATTERNS.clone()
    }
}

impl TrackerPatterns {
    pub fn from_entries(entries: Vec<TrackerPatternEntry>) -> Result<Self> {
        let patterns = entries
            .into_iter()
            .map(|entry| {
                let rule = match entry.pattern {
                    Some(pattern) => {
                        IdRule::Capture(Regex::new(&pattern).map_err(|source| {
                            ConfError::InvalidPattern {
                                site: entry.site.clone(),
                                source,
                            }
                        })?)
                    }
                    None => IdRule::InfoHash,
                };
                Ok(TrackerPattern {
                    site: entry.site,
                    url: entry.url,
                    rule,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// The built in table followed by `extra`.
    pub fn with_extra(extra: Vec<TrackerPatternEntry>) -> Result<Self> {
        let mut table = Self::default();
        table.patterns.extend(Self::from_entries(extra)?.patterns);
        Ok(table)
    }

    /// Extracts the ids of every known site whose url occurs in `comment`.
    pub fn recover(&self, comment: &str, info_hash: &str) -> Vec<TrackerId> {
        let mut ids = Vec::new();
        for pattern in self.patterns.iter() {
            if !comment.contains(&pattern.url) {
                continue;
            }
            let id = match &pattern.rule {
                IdRule::Capture(re) => re
                    .captures(comment)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string()),
                IdRule::InfoHash if !info_hash.is_empty() => Some(info_hash.to_string()),
                IdRule::InfoHash => None,
            };
            if let Some(id) = id {
                log::debug!("Found {} id {} in torrent comment", pattern.site, id);
                ids.push(TrackerId {
                    site: pattern.site.clone(),
                    id,
                });
            }
        }
        ids
    }
}

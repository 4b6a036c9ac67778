//! Crawl cursors and the rules that advance them.

use chrono::{Duration as ChronoDuration, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// Position of a crawl within its work sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CrawlCursor {
    /// Single-unit jobs.
    Once,
    Date(NaiveDate),
    /// 1-based page number.
    Page(u32),
    /// Keyset position: rows with a database id below this one.
    After(Option<i64>),
}

impl std::fmt::Display for CrawlCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Once => write!(f, "once"),
            Self::Date(d) => write!(f, "{}", d),
            Self::Page(p) => write!(f, "page {}", p),
            Self::After(None) => write!(f, "start"),
            Self::After(Some(id)) => write!(f, "after #{}", id),
        }
    }
}

/// The sequence of cursors a job walks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorPlan {
    Once,
    /// Every day from `start` through `end`, inclusive.
    Dates { start: NaiveDate, end: NaiveDate },
    /// Pages from `first` until an empty page, `max_rows` rows, or `max_pages`.
    Pages {
        first: u32,
        max_rows: Option<usize>,
        max_pages: u32,
    },
    /// Batches below a moving id until a batch comes back empty.
    Keyset,
}

/// What the engine learned from finishing one cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CursorStep {
    /// At least one unit at this cursor completed.
    pub succeeded: bool,
    /// Raw rows returned (before mapping and ad filtering).
    pub raw_rows: usize,
    /// Next keyset position reported by the job.
    pub next_key: Option<i64>,
}

impl CursorPlan {
    pub fn first(&self) -> Option<CrawlCursor> {
        match self {
            Self::Once => Some(CrawlCursor::Once),
            Self::Dates { start, end } => (start <= end).then_some(CrawlCursor::Date(*start)),
            Self::Pages {
                first, max_pages, ..
            } => (*max_pages > 0).then_some(CrawlCursor::Page(*first)),
            Self::Keyset => Some(CrawlCursor::After(None)),
        }
    }

    /// The cursor after `current`, or `None` when the crawl is done.
    ///
    /// A failed unit still advances; only a successful empty page or batch
    /// ends page and keyset crawls. `rows_so_far` feeds the page row budget.
    pub fn next(
        &self,
        current: &CrawlCursor,
        step: &CursorStep,
        rows_so_far: usize,
    ) -> Option<CrawlCursor> {
        match (self, current) {
            (Self::Once, _) => None,
            (Self::Dates { end, .. }, CrawlCursor::Date(day)) => {
                let next = day.succ_opt()?;
                (next <= *end).then_some(CrawlCursor::Date(next))
            }
            (
                Self::Pages {
                    first,
                    max_rows,
                    max_pages,
                },
                CrawlCursor::Page(page),
            ) => {
                if step.succeeded && step.raw_rows == 0 {
                    return None;
                }
                if max_rows.is_some_and(|budget| rows_so_far >= budget) {
                    return None;
                }
                let next = page.checked_add(1)?;
                (next.saturating_sub(*first) < *max_pages).then_some(CrawlCursor::Page(next))
            }
            (Self::Keyset, CrawlCursor::After(_)) => {
                if step.succeeded && step.raw_rows == 0 {
                    return None;
                }
                // Without a key from a failed batch we cannot move past it.
                step.next_key.map(|key| CrawlCursor::After(Some(key)))
            }
            _ => None,
        }
    }

    /// Skip dates up to and including `last_done`.
    pub fn resume_after(self, last_done: NaiveDate) -> Self {
        match self {
            Self::Dates { start, end } => match last_done.succ_opt() {
                Some(next) if next > start => Self::Dates { start: next, end },
                _ => Self::Dates { start, end },
            },
            other => other,
        }
    }
}

/// How a date cursor is written into a page URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CursorEncoding {
    /// Unix seconds of midnight UTC plus `offset` seconds.
    UnixSeconds {
        #[serde(default)]
        offset: i64,
    },
    /// `YYYY-MM-DD`.
    IsoDate,
    PageNumber,
}

/// A query parameter carrying the cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorParam {
    pub name: String,
    pub encoding: CursorEncoding,
}

impl CursorParam {
    /// Value for `cursor`, or `None` when this cursor has no URL form.
    pub fn encode(&self, cursor: &CrawlCursor) -> Option<String> {
        match (self.encoding, cursor) {
            (CursorEncoding::UnixSeconds { offset }, CrawlCursor::Date(day)) => {
                let midnight = day.and_time(NaiveTime::MIN).and_utc().timestamp();
                Some((midnight + offset).to_string())
            }
            (CursorEncoding::IsoDate, CrawlCursor::Date(day)) => {
                Some(day.format("%Y-%m-%d").to_string())
            }
            (CursorEncoding::PageNumber, CrawlCursor::Page(page)) => Some(page.to_string()),
            _ => None,
        }
    }

    /// Whether `url` already carries this cursor value.
    pub fn is_encoded_in(&self, url: &str, cursor: &CrawlCursor) -> bool {
        match self.encode(cursor) {
            Some(value) => url.contains(&format!("{}={}", self.name, value)),
            None => true,
        }
    }

    /// `url` with the cursor parameter set (replacing any previous value).
    pub fn apply(&self, url: &str, cursor: &CrawlCursor) -> String {
        let Some(value) = self.encode(cursor) else {
            return url.to_string();
        };
        match url::Url::parse(url) {
            Ok(mut parsed) => {
                let kept: Vec<(String, String)> = parsed
                    .query_pairs()
                    .filter(|(k, _)| k != self.name.as_str())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect();
                {
                    let mut pairs = parsed.query_pairs_mut();
                    pairs.clear();
                    for (k, v) in &kept {
                        pairs.append_pair(k, v);
                    }
                    pairs.append_pair(&self.name, &value);
                }
                parsed.to_string()
            }
            Err(_) => {
                let sep = if url.contains('?') { '&' } else { '?' };
                format!("{}{}{}={}", url, sep, self.name, value)
            }
        }
    }
}

/// Calendar day a daily job writes for a given run day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateSpec {
    Today,
    Yesterday,
    #[serde(untagged)]
    Fixed(NaiveDate),
}

impl DateSpec {
    pub fn resolve(&self, today: NaiveDate) -> NaiveDate {
        match self {
            Self::Today => today,
            Self::Yesterday => today - ChronoDuration::days(1),
            Self::Fixed(d) => *d,
        }
    }
}

impl std::str::FromStr for DateSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "today" => Ok(Self::Today),
            "yesterday" => Ok(Self::Yesterday),
            other => NaiveDate::parse_from_str(other, "%Y-%m-%d")
                .map(Self::Fixed)
                .map_err(|e| format!("invalid date '{}': {}", other, e)),
        }
    }
}

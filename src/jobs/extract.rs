//! Declarative field extraction from ranking rows.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::{ChannelSnapshot, MetricValue, Service};
use crate::normalize::{normalize_float, normalize_integer};
use crate::scrapers::{DriverError, PageDriver};

/// Which path segment of a detail-page URL holds the channel id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdSegment {
    /// Last non-empty path segment, ignoring query and fragment.
    #[default]
    Last,
    /// Index into `url.split('/')`, counting the scheme as 0.
    Index(usize),
}

impl IdSegment {
    pub fn extract(&self, href: &str) -> Option<String> {
        let segment = match self {
            Self::Index(i) => href.split('/').nth(*i),
            Self::Last => href
                .split(['?', '#'])
                .next()
                .and_then(|path| path.trim_end_matches('/').rsplit('/').next()),
        };
        segment
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

/// How a field's value is read from the matched element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldSource {
    /// First text node, trimmed.
    Text,
    /// DOM property or attribute.
    Attr { name: String },
    /// Text of every match, joined.
    TextAll {
        #[serde(default = "default_separator")]
        separator: String,
    },
}

fn default_separator() -> String {
    ",".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Integer,
    Float,
}

impl MetricKind {
    pub fn parse(&self, text: Option<&str>) -> MetricValue {
        match self {
            Self::Integer => MetricValue::Int(normalize_integer(text)),
            Self::Float => MetricValue::Float(normalize_float(text)),
        }
    }
}

/// What an extracted value means.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum FieldRole {
    ChannelId {
        #[serde(default)]
        segment: IdSegment,
    },
    Name,
    Icon,
    Category,
    Tags,
    Metric { name: String, kind: MetricKind },
}

/// One value to pull from each row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Selector relative to the row; empty means the row itself.
    pub selector: String,
    pub source: FieldSource,
    #[serde(flatten)]
    pub role: FieldRole,
}

impl FieldSpec {
    pub fn new(selector: &str, source: FieldSource, role: FieldRole) -> Self {
        Self {
            selector: selector.to_string(),
            source,
            role,
        }
    }

    pub fn text(selector: &str, role: FieldRole) -> Self {
        Self::new(selector, FieldSource::Text, role)
    }

    pub fn attr(selector: &str, name: &str, role: FieldRole) -> Self {
        Self::new(
            selector,
            FieldSource::Attr {
                name: name.to_string(),
            },
            role,
        )
    }

    pub fn metric(selector: &str, name: &str, kind: MetricKind) -> Self {
        Self::text(
            selector,
            FieldRole::Metric {
                name: name.to_string(),
                kind,
            },
        )
    }
}

/// Values read from one row, aligned with the job's field list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    pub values: Vec<Option<String>>,
}

/// Read every field of `row`. Missing elements yield `None`, not errors.
pub async fn extract_row<D: PageDriver + ?Sized>(
    driver: &mut D,
    row: &D::Element,
    fields: &[FieldSpec],
) -> Result<RawRow, DriverError> {
    let mut values = Vec::with_capacity(fields.len());

    for field in fields {
        let value = match &field.source {
            FieldSource::TextAll { separator } => {
                let matches = if field.selector.is_empty() {
                    Vec::new()
                } else {
                    driver.query_all_within(row, &field.selector).await?
                };
                let mut parts = Vec::new();
                for m in &matches {
                    if let Some(t) = driver.text(m).await? {
                        parts.push(t);
                    }
                }
                Some(parts.join(separator))
            }
            source => {
                let target = if field.selector.is_empty() {
                    None
                } else {
                    match driver.query_within(row, &field.selector).await? {
                        Some(el) => Some(el),
                        None => {
                            values.push(None);
                            continue;
                        }
                    }
                };
                let element = target.as_ref().unwrap_or(row);
                match source {
                    FieldSource::Attr { name } => driver.attribute(element, name).await?,
                    _ => driver.text(element).await?,
                }
            }
        };
        values.push(value);
    }

    Ok(RawRow { values })
}

/// Turn a raw row into a snapshot. Rows without a channel id are dropped.
///
/// `category` fills the display category when no field provides one.
pub fn build_snapshot(
    fields: &[FieldSpec],
    raw: &RawRow,
    service: Service,
    date: Option<NaiveDate>,
    category: Option<&str>,
) -> Option<ChannelSnapshot> {
    let mut channel_id = None;
    let mut snapshot = ChannelSnapshot::new(String::new(), service, date);

    for (field, value) in fields.iter().zip(raw.values.iter()) {
        let value = value.as_deref();
        let display = value.filter(|v| !v.is_empty()).map(str::to_string);
        match &field.role {
            FieldRole::ChannelId { segment } => {
                channel_id = value.and_then(|v| segment.extract(v));
            }
            FieldRole::Name => snapshot.display.name = display,
            FieldRole::Icon => snapshot.display.icon_url = display,
            FieldRole::Category => snapshot.display.category = display,
            FieldRole::Tags => snapshot.display.tags = display,
            FieldRole::Metric { name, kind } => {
                snapshot.metrics.insert(name.clone(), kind.parse(value));
            }
        }
    }

    snapshot.channel_id = channel_id?;
    if snapshot.display.category.is_none() {
        snapshot.display.category = category.map(str::to_string);
    }
    Some(snapshot)
}

/// Integer at a JSON pointer. Numeric strings ("1,234") are accepted.
pub fn json_integer(value: &serde_json::Value, pointer: &str) -> Option<i64> {
    match value.pointer(pointer)? {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.floor() as i64)),
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(normalize_integer(Some(s))),
        _ => None,
    }
}

/// Non-empty string at a JSON pointer.
pub fn json_string(value: &serde_json::Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::testing::{FakeSite, Node};

    #[test]
    fn test_id_segment() {
        let href = "https://playboard.co/en/channel/UCabc123";
        assert_eq!(IdSegment::Last.extract(href).as_deref(), Some("UCabc123"));
        assert_eq!(IdSegment::Index(5).extract(href).as_deref(), Some("UCabc123"));
        assert_eq!(
            IdSegment::Last
                .extract("https://poong.today/broadcast/streamer1/?tab=1")
                .as_deref(),
            Some("streamer1")
        );
        assert_eq!(IdSegment::Index(9).extract(href), None);
    }

    fn fields() -> Vec<FieldSpec> {
        vec![
            FieldSpec::attr(
                "td > a",
                "href",
                FieldRole::ChannelId {
                    segment: IdSegment::Last,
                },
            ),
            FieldSpec::text(".name > a > h3", FieldRole::Name),
            FieldSpec::new(
                ".name li > a",
                FieldSource::TextAll {
                    separator: ",".into(),
                },
                FieldRole::Tags,
            ),
            FieldSpec::metric(".score", "cumulativeSubscribers", MetricKind::Integer),
        ]
    }

    #[tokio::test]
    async fn test_extract_and_build() {
        let mut site = FakeSite::default();
        let link = site.add(Node::default().attr("href", "https://playboard.co/channel/UC1"));
        let name = site.add(Node::text("Channel One"));
        let tag_a = site.add(Node::text("Music"));
        let tag_b = site.add(Node::text("Vlog"));
        let score = site.add(Node::text("1,234,567"));
        let row = site.add(
            Node::default()
                .child("td > a", link)
                .child(".name > a > h3", name)
                .child(".name li > a", tag_a)
                .child(".name li > a", tag_b)
                .child(".score", score),
        );

        let fields = fields();
        let raw = extract_row(&mut site, &row, &fields).await.unwrap();
        let snapshot =
            build_snapshot(&fields, &raw, Service::PlayboardCo, None, Some("Gaming")).unwrap();

        assert_eq!(snapshot.channel_id, "UC1");
        assert_eq!(snapshot.display.name.as_deref(), Some("Channel One"));
        assert_eq!(snapshot.display.tags.as_deref(), Some("Music,Vlog"));
        assert_eq!(snapshot.display.category.as_deref(), Some("Gaming"));
        assert_eq!(
            snapshot.metric("cumulativeSubscribers"),
            Some(MetricValue::Int(1_234_567))
        );
    }

    #[tokio::test]
    async fn test_missing_fields_default() {
        let mut site = FakeSite::default();
        let link = site.add(Node::default().attr("href", "https://playboard.co/channel/UC2"));
        let row = site.add(Node::default().child("td > a", link));

        let fields = fields();
        let raw = extract_row(&mut site, &row, &fields).await.unwrap();
        let snapshot = build_snapshot(&fields, &raw, Service::PlayboardCo, None, None).unwrap();

        assert_eq!(snapshot.display.name, None);
        assert_eq!(snapshot.display.tags, None);
        assert_eq!(
            snapshot.metric("cumulativeSubscribers"),
            Some(MetricValue::Int(0))
        );
    }

    #[test]
    fn test_json_integer_accepts_strings() {
        let doc = serde_json::json!({
            "statistics": {"viewCount": "1234", "hidden": null},
            "upd": {"fan_cnt": 98.0}
        });
        assert_eq!(json_integer(&doc, "/statistics/viewCount"), Some(1234));
        assert_eq!(json_integer(&doc, "/upd/fan_cnt"), Some(98));
        assert_eq!(json_integer(&doc, "/statistics/hidden"), None);
        assert_eq!(json_integer(&doc, "/missing"), None);
    }

    #[test]
    fn test_row_without_id_is_dropped() {
        let fields = fields();
        let raw = RawRow {
            values: vec![None, Some("Nameless".into()), None, Some("10".into())],
        };
        assert!(build_snapshot(&fields, &raw, Service::PlayboardCo, None, None).is_none());
    }
}

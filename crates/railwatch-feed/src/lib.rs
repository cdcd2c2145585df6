//! Upstream feed contracts and canonicalization.
//!
//! The service-alert feed is a GTFS-realtime-style JSON document with a
//! deeply nested, schema-variable shape. Extraction here is a fixed path
//! with explicit per-field fallback: identity, url, title and description
//! are required, while active-period timestamps degrade to the unknown
//! sentinel on their own without failing the record.

use railwatch_core::{Alert, PeriodBound};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub const CRATE_NAME: &str = "railwatch-feed";

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("entity is missing required field `{field}`")]
    MissingField { field: &'static str },
    #[error("field `{field}` has no translations")]
    EmptyTranslation { field: &'static str },
}

// ---- service-alert feed wire contract ----

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertFeed {
    #[serde(default)]
    pub entity: Vec<FeedEntity>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedEntity {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub alert: Option<RawAlert>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAlert {
    #[serde(default)]
    pub url: Option<TranslatedText>,
    #[serde(default)]
    pub header_text: Option<TranslatedText>,
    #[serde(default)]
    pub description_text: Option<TranslatedText>,
    #[serde(default)]
    pub active_period: Vec<ActivePeriod>,
    #[serde(default)]
    pub informed_entity: Vec<InformedEntity>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranslatedText {
    #[serde(default)]
    pub translation: Vec<Translation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Translation {
    #[serde(default)]
    pub text: String,
}

/// One active-period entry. The upstream feed serializes epoch seconds as
/// either a JSON number or a numeric string; anything else degrades to
/// `None` rather than failing feed deserialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivePeriod {
    #[serde(default, deserialize_with = "lenient_epoch_secs")]
    pub start: Option<i64>,
    #[serde(default, deserialize_with = "lenient_epoch_secs")]
    pub end: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InformedEntity {
    #[serde(default)]
    pub route_id: Option<String>,
    #[serde(default)]
    pub direction_id: Option<i64>,
}

fn lenient_epoch_secs<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(epoch_secs))
}

fn epoch_secs(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ---- relevance ----

/// Decides whether an alert touches the monitored route.
#[derive(Debug, Clone)]
pub struct RouteFilter {
    route_id: String,
}

impl RouteFilter {
    pub fn new(route_id: impl Into<String>) -> Self {
        Self {
            route_id: route_id.into(),
        }
    }

    pub fn route_id(&self) -> &str {
        &self.route_id
    }

    /// True iff any informed entity names the monitored route in either
    /// monitored direction (0 or 1). An empty sequence is not relevant.
    pub fn is_relevant(&self, informed: &[InformedEntity]) -> bool {
        informed.iter().any(|entry| {
            entry.route_id.as_deref() == Some(self.route_id.as_str())
                && matches!(entry.direction_id, Some(0) | Some(1))
        })
    }
}

// ---- canonicalization ----

/// Converts one raw feed entity into a canonical [`Alert`].
///
/// Identity, url, title and description are required; a structurally
/// absent one yields [`FeedError`]. Active-period bounds are parsed
/// independently (first entry's start, last entry's end) and degrade to
/// [`PeriodBound::Unknown`] on absence or malformation.
pub fn canonicalize(entity: &FeedEntity, filter: &RouteFilter) -> Result<Alert, FeedError> {
    let id = entity
        .id
        .clone()
        .ok_or(FeedError::MissingField { field: "id" })?;
    let alert = entity
        .alert
        .as_ref()
        .ok_or(FeedError::MissingField { field: "alert" })?;

    let url = first_translation(alert.url.as_ref(), "alert.url")?;
    let title = first_translation(alert.header_text.as_ref(), "alert.headerText")?;
    let description = first_translation(alert.description_text.as_ref(), "alert.descriptionText")?;

    let start_date = alert
        .active_period
        .first()
        .and_then(|period| period.start)
        .map(PeriodBound::from_epoch_secs)
        .unwrap_or(PeriodBound::Unknown);
    let end_date = alert
        .active_period
        .last()
        .and_then(|period| period.end)
        .map(PeriodBound::from_epoch_secs)
        .unwrap_or(PeriodBound::Unknown);

    Ok(Alert {
        id,
        url,
        title,
        description_html: strip_newlines(&description),
        start_date,
        end_date,
        line_impacted: filter.is_relevant(&alert.informed_entity),
    })
}

fn first_translation(
    text: Option<&TranslatedText>,
    field: &'static str,
) -> Result<String, FeedError> {
    let text = text.ok_or(FeedError::MissingField { field })?;
    text.translation
        .first()
        .map(|entry| entry.text.clone())
        .ok_or(FeedError::EmptyTranslation { field })
}

fn strip_newlines(text: &str) -> String {
    text.replace('\n', "").replace('\r', "")
}

// ---- departure-monitor feed wire contract ----

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartureFeed {
    #[serde(default)]
    pub stop_events: Vec<StopEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopEvent {
    #[serde(default)]
    pub departure_time_planned: String,
}

/// Literal substring check of a target `"HH:MM"` against the planned
/// departures, in feed order.
pub fn has_departure_at(feed: &DepartureFeed, needle: &str) -> bool {
    feed.stop_events
        .iter()
        .any(|event| event.departure_time_planned.contains(needle))
}

//! Google Calendar v3 client
//!
//! Events with a start time become timed events (one hour unless an end
//! time is given); events without one become all-day events.

use super::{
    build_http_client, check_status, CalendarProvider, ProviderError, ProviderResult,
    TokenSource, DEFAULT_TIMEOUT,
};
use crate::models::classification::parse_item_date;
use crate::models::Event;
use async_trait::async_trait;
use chrono::{Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

const CALENDAR_API_URL: &str = "https://www.googleapis.com/calendar/v3";

#[derive(Debug, Deserialize)]
struct EventList {
    #[serde(default)]
    items: Vec<EventItem>,
}

#[derive(Debug, Deserialize)]
struct EventItem {
    #[serde(default)]
    summary: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedEvent {
    id: String,
    #[serde(default)]
    html_link: Option<String>,
}

pub struct CalendarClient {
    http_client: Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
    calendar_id: String,
    time_zone: String,
    offset: FixedOffset,
}

/// `HH:MM` (seconds tolerated)
fn parse_clock(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
}

impl CalendarClient {
    pub fn new(
        tokens: Arc<dyn TokenSource>,
        calendar_id: String,
        time_zone: String,
        utc_offset_minutes: i32,
    ) -> ProviderResult<Self> {
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60).ok_or_else(|| {
            ProviderError::Parse(format!("invalid UTC offset: {} minutes", utc_offset_minutes))
        })?;
        Ok(Self {
            http_client: build_http_client(DEFAULT_TIMEOUT)?,
            base_url: CALENDAR_API_URL.to_string(),
            tokens,
            calendar_id,
            time_zone,
            offset,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn events_url(&self) -> String {
        format!("{}/calendars/{}/events", self.base_url, self.calendar_id)
    }

    fn local_rfc3339(&self, date: NaiveDate, time: NaiveTime) -> ProviderResult<String> {
        self.offset
            .from_local_datetime(&date.and_time(time))
            .single()
            .map(|dt| dt.to_rfc3339())
            .ok_or_else(|| ProviderError::Parse(format!("invalid local time {} {}", date, time)))
    }

    /// Request body for the Calendar API
    pub fn event_body(&self, event: &Event, notes: &str) -> ProviderResult<Value> {
        let date = parse_item_date(&event.date)
            .ok_or_else(|| ProviderError::Parse(format!("invalid event date: {}", event.date)))?;

        let mut description = event.description.clone().unwrap_or_default();
        if !notes.is_empty() {
            if !description.is_empty() {
                description.push_str("\n\n");
            }
            description.push_str(notes);
        }

        let mut body = json!({
            "summary": event.title,
            "description": description,
        });
        if let Some(location) = event.location.as_deref().filter(|l| !l.trim().is_empty()) {
            body["location"] = json!(location);
        }

        match event.start_time.as_deref().and_then(parse_clock) {
            Some(start) => {
                let start_dt = date.and_time(start);
                let end_dt = event
                    .end_time
                    .as_deref()
                    .and_then(parse_clock)
                    .map(|end| date.and_time(end))
                    .filter(|end| *end > start_dt)
                    .unwrap_or(start_dt + Duration::hours(1));

                body["start"] = json!({
                    "dateTime": self.local_rfc3339(start_dt.date(), start_dt.time())?,
                    "timeZone": self.time_zone,
                });
                body["end"] = json!({
                    "dateTime": self.local_rfc3339(end_dt.date(), end_dt.time())?,
                    "timeZone": self.time_zone,
                });
            }
            None => {
                // All-day end date is exclusive
                let next = date + Duration::days(1);
                body["start"] = json!({ "date": date.format("%Y-%m-%d").to_string() });
                body["end"] = json!({ "date": next.format("%Y-%m-%d").to_string() });
            }
        }

        Ok(body)
    }
}

#[async_trait]
impl CalendarProvider for CalendarClient {
    async fn event_exists(&self, title: &str, date: NaiveDate) -> ProviderResult<bool> {
        let token = self.tokens.access_token().await?;
        let time_min = self.local_rfc3339(date, NaiveTime::default())?;
        let time_max = self.local_rfc3339(date + Duration::days(1), NaiveTime::default())?;

        let response = self
            .http_client
            .get(self.events_url())
            .bearer_auth(token)
            .query(&[
                ("timeMin", time_min.as_str()),
                ("timeMax", time_max.as_str()),
                ("q", title),
                ("singleEvents", "true"),
            ])
            .send()
            .await?;
        let list: EventList = check_status(response).await?.json().await?;
        Ok(list.items.iter().any(|item| item.summary == title))
    }

    async fn create_event(&self, event: &Event, notes: &str) -> ProviderResult<String> {
        let body = self.event_body(event, notes)?;
        let token = self.tokens.access_token().await?;
        let response = self
            .http_client
            .post(self.events_url())
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let created: CreatedEvent = check_status(response).await?.json().await?;
        info!(title = %event.title, date = %event.date, "Calendar event created");
        Ok(created.html_link.unwrap_or(created.id))
    }
}

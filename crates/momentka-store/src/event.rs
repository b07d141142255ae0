//! Event records: a code-addressed, time-bounded collection of media URLs.

use crate::code::AccessCode;
use chrono::{DateTime, Duration, Utc};
use momentka_core::MediaItem;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How long an event's media stays retrievable after upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetentionWindow {
    SixHours,
    TwelveHours,
    TwentyFourHours,
}

impl RetentionWindow {
    pub fn hours(self) -> i64 {
        match self {
            RetentionWindow::SixHours => 6,
            RetentionWindow::TwelveHours => 12,
            RetentionWindow::TwentyFourHours => 24,
        }
    }

    pub fn duration(self) -> Duration {
        Duration::hours(self.hours())
    }

    /// Map an hour count to a window; only 6, 12, and 24 are offered.
    pub fn from_hours(hours: u32) -> Option<Self> {
        match hours {
            6 => Some(RetentionWindow::SixHours),
            12 => Some(RetentionWindow::TwelveHours),
            24 => Some(RetentionWindow::TwentyFourHours),
            _ => None,
        }
    }
}

impl Default for RetentionWindow {
    fn default() -> Self {
        RetentionWindow::TwentyFourHours
    }
}

impl fmt::Display for RetentionWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}h", self.hours())
    }
}

/// One shared event: created once at upload, read-only afterwards, removed by
/// the expiry sweep. Never updated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub code: AccessCode,
    /// Media URLs in upload order.
    pub urls: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// Always after `created_at`.
    pub expires_at: DateTime<Utc>,
}

impl Event {
    /// Build a fresh event expiring one retention window from now.
    pub fn new(code: AccessCode, urls: Vec<String>, retention: RetentionWindow) -> Self {
        let created_at = Utc::now();
        Self {
            code,
            urls,
            created_at,
            expires_at: created_at + retention.duration(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// The media list with kinds inferred from each URL's path.
    pub fn media_items(&self) -> Vec<MediaItem> {
        self.urls.iter().map(|u| MediaItem::from_url(u.as_str())).collect()
    }
}

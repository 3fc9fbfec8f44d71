use std::cmp::Ordering;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// A freshly fetched video is tagged "recent" only when it was published
/// within this many hours of the fetch. Prevents a cold cache from marking
/// a month of backlog as recent.
pub const RECENT_WINDOW_HOURS: i64 = 24;

/// One upload, as cached per channel. Field names follow the persisted
/// snapshot format (camelCase).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub id: String,
    pub channel_id: String,
    pub title: String,
    pub url: String,
    pub thumbnail: String,
    pub duration: String,
    pub published_at: DateTime<Utc>,
    /// View count at fetch time. The remote source omits it for some videos
    /// (premieres, live streams), so sorting must never rely on it alone.
    #[serde(default)]
    pub views: Option<u64>,
    #[serde(default)]
    pub is_recent: bool,
    #[serde(default)]
    pub is_to_watch_later: bool,
}

impl Video {
    /// True when the video was published within `hours` of `now`.
    pub fn published_within(&self, now: DateTime<Utc>, hours: i64) -> bool {
        (now - self.published_at).num_seconds() <= hours * 3600
    }

    /// True when the video was published during the current calendar day,
    /// in local time.
    pub fn published_today(&self) -> bool {
        self.published_at.with_timezone(&Local).date_naive() == Local::now().date_naive()
    }
}

/// A tracked channel. Hidden channels stay in the list but are excluded
/// from aggregate views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,
    pub title: String,
    pub thumbnail: String,
    pub url: String,
    #[serde(default)]
    pub is_hidden: bool,
}

/// What the cache keeps its per-channel lists sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    #[default]
    Date,
    Views,
}

/// Ordering of the cached list for one channel. `SortBy::Views` compares by
/// view count only when both sides carry one; every other pair falls back to
/// publish date, newest first. The fallback is decided pairwise so that a
/// single count-less video cannot scramble the rest of the list.
pub fn cache_cmp(a: &Video, b: &Video, sort_by: SortBy) -> Ordering {
    if sort_by == SortBy::Views
        && let (Some(a_views), Some(b_views)) = (a.views, b.views)
    {
        b_views.cmp(&a_views)
    } else {
        b.published_at.cmp(&a.published_at)
    }
}

/// Publish-date ordering applied locally to a single view's result list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn cmp_published(&self, a: &Video, b: &Video) -> Ordering {
        match self {
            SortOrder::Asc => a.published_at.cmp(&b.published_at),
            SortOrder::Desc => b.published_at.cmp(&a.published_at),
        }
    }
}

/// What the user is currently looking at. Named views and the single-channel
/// case are distinct variants rather than sentinel indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Selection {
    All,
    Today,
    Recent,
    WatchLater,
    None,
    Channel(usize),
}

impl Selection {
    /// The per-video predicate the view applies before truncation.
    /// `None` for views that keep everything.
    pub fn filter(&self) -> Option<ViewFilter> {
        match self {
            Selection::Today => Some(ViewFilter::Today),
            Selection::Recent => Some(ViewFilter::Recent),
            Selection::WatchLater => Some(ViewFilter::WatchLater),
            _ => None,
        }
    }
}

/// View predicate, applied to a channel's list *before* the per-channel
/// truncation so that a view always gets first pick of the filtered set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewFilter {
    Today,
    Recent,
    WatchLater,
}

impl ViewFilter {
    pub fn keeps(&self, video: &Video) -> bool {
        match self {
            ViewFilter::Today => video.published_today(),
            ViewFilter::Recent => video.is_recent,
            ViewFilter::WatchLater => video.is_to_watch_later,
        }
    }
}

/// Fixture builders shared by the store and engine tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub fn test_video(id: &str, channel_id: &str, published_at: DateTime<Utc>) -> Video {
        Video {
            id: id.to_string(),
            channel_id: channel_id.to_string(),
            title: format!("video {id}"),
            url: format!("https://www.youtube.com/watch?v={id}"),
            thumbnail: String::new(),
            duration: "4:05".to_string(),
            published_at,
            views: None,
            is_recent: false,
            is_to_watch_later: false,
        }
    }

    pub fn test_channel(id: &str, title: &str) -> Channel {
        Channel {
            id: id.to_string(),
            title: title.to_string(),
            thumbnail: String::new(),
            url: format!("https://www.youtube.com/channel/{id}"),
            is_hidden: false,
        }
    }
}

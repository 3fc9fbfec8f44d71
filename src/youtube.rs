use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::FetchError;
use crate::models::{Channel, Video};

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";

/// How many activity items one request asks for (the API page maximum).
const ACTIVITY_PAGE_SIZE: &str = "50";

/// How many channels a search returns at most.
const SEARCH_PAGE_SIZE: &str = "10";

/// The remote video metadata source. The production implementation is
/// [`YouTubeClient`]; tests substitute a scripted double.
#[allow(async_fn_in_trait)]
pub trait RemoteSource {
    /// Upload activity for a channel since `published_after`.
    async fn channel_activities(
        &self,
        channel_id: &str,
        published_after: DateTime<Utc>,
    ) -> Result<ActivityFeed, FetchError>;

    /// Full metadata for a batch of video ids.
    async fn videos_info(&self, ids: &[String]) -> Result<Vec<Video>, FetchError>;

    /// Channels matching a free-text query.
    async fn search_channels(&self, query: &str) -> Result<Vec<Channel>, FetchError>;
}

// ── Data API response shapes ───────────────────────────────────────────
//
// Everything the engine reads is optional: a missing `items` array, a
// missing upload block, or a null video id parses to "nothing new", never
// to an error.

#[derive(Debug, Default, Deserialize)]
pub struct ActivityFeed {
    #[serde(default)]
    pub items: Vec<ActivityItem>,
}

impl ActivityFeed {
    /// The upload video ids, in feed order, with absent/empty ids dropped.
    /// Duplicates are kept; the engine's candidate selection removes them.
    pub fn upload_ids(&self) -> Vec<String> {
        self.items
            .iter()
            .filter_map(|item| item.content_details.as_ref())
            .filter_map(|details| details.upload.as_ref())
            .filter_map(|upload| upload.video_id.as_deref())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityItem {
    #[serde(default)]
    pub content_details: Option<ActivityContentDetails>,
}

#[derive(Debug, Deserialize)]
pub struct ActivityContentDetails {
    #[serde(default)]
    pub upload: Option<ActivityUpload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityUpload {
    #[serde(default)]
    pub video_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    id: Option<String>,
    snippet: Option<VideoSnippet>,
    content_details: Option<VideoContentDetails>,
    statistics: Option<VideoStatistics>,
}

impl VideoItem {
    /// Build a [`Video`] when the item carries the required fields; items
    /// without id, owning channel, or publish time are dropped.
    fn into_video(self) -> Option<Video> {
        let id = self.id.filter(|id| !id.is_empty())?;
        let snippet = self.snippet?;
        let channel_id = snippet.channel_id.filter(|id| !id.is_empty())?;
        let published_at = snippet.published_at?;

        let thumbnail = snippet
            .thumbnails
            .and_then(|t| t.medium.or(t.high).or(t.default))
            .map(|t| t.url)
            .unwrap_or_default();
        let duration = self
            .content_details
            .and_then(|d| d.duration)
            .map(|iso| format_duration(&iso))
            .unwrap_or_default();
        let views = self
            .statistics
            .and_then(|s| s.view_count)
            .and_then(|raw| raw.parse().ok());

        Some(Video {
            url: format!("https://www.youtube.com/watch?v={id}"),
            id,
            channel_id,
            title: snippet.title.unwrap_or_default(),
            thumbnail,
            duration,
            published_at,
            views,
            is_recent: false,
            is_to_watch_later: false,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoSnippet {
    title: Option<String>,
    channel_id: Option<String>,
    published_at: Option<DateTime<Utc>>,
    thumbnails: Option<Thumbnails>,
}

#[derive(Debug, Deserialize)]
struct Thumbnails {
    default: Option<Thumbnail>,
    medium: Option<Thumbnail>,
    high: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
struct VideoContentDetails {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoStatistics {
    view_count: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchListResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: Option<SearchItemId>,
    snippet: Option<SearchSnippet>,
}

impl SearchItem {
    fn into_channel(self) -> Option<Channel> {
        let id = self.id.and_then(|id| id.channel_id).filter(|id| !id.is_empty())?;
        let snippet = self.snippet?;
        let thumbnail = snippet
            .thumbnails
            .and_then(|t| t.medium.or(t.high).or(t.default))
            .map(|t| t.url)
            .unwrap_or_default();
        Some(Channel {
            url: format!("https://www.youtube.com/channel/{id}"),
            id,
            title: snippet.title.unwrap_or_default(),
            thumbnail,
            is_hidden: false,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItemId {
    channel_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchSnippet {
    title: Option<String>,
    thumbnails: Option<Thumbnails>,
}

/// Render an ISO-8601 duration (`PT1H2M3S`) as `1:02:03` / `4:05` / `0:37`.
fn format_duration(iso: &str) -> String {
    let mut days = 0u64;
    let mut hours = 0u64;
    let mut minutes = 0u64;
    let mut seconds = 0u64;
    let mut num = String::new();
    let mut in_time = false;

    for c in iso.chars() {
        match c {
            '0'..='9' => num.push(c),
            'T' => in_time = true,
            'D' | 'H' | 'M' | 'S' => {
                let value: u64 = num.parse().unwrap_or(0);
                num.clear();
                match c {
                    'D' => days = value,
                    'H' => hours = value,
                    // 'M' before the T separator means months; video
                    // durations never carry those, drop the value.
                    'M' if in_time => minutes = value,
                    'S' => seconds = value,
                    _ => {}
                }
            }
            _ => num.clear(),
        }
    }

    let hours = days * 24 + hours;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

/// YouTube Data API v3 client.
pub struct YouTubeClient {
    http: reqwest::Client,
    api_key: String,
}

impl YouTubeClient {
    pub fn new(api_key: &str) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("subfeed/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Http {
                url: API_BASE.to_string(),
                source: e,
            })?;
        Ok(Self {
            http,
            api_key: api_key.to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<T, FetchError> {
        let url = format!("{API_BASE}/{endpoint}");
        let response = self
            .http
            .get(&url)
            .query(query)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| FetchError::Http {
                url: url.clone(),
                source: e,
            })?;
        let body = response.text().await.map_err(|e| FetchError::Http {
            url: url.clone(),
            source: e,
        })?;
        serde_json::from_str(&body).map_err(|e| FetchError::Parse {
            url,
            message: e.to_string(),
        })
    }
}

impl RemoteSource for YouTubeClient {
    async fn channel_activities(
        &self,
        channel_id: &str,
        published_after: DateTime<Utc>,
    ) -> Result<ActivityFeed, FetchError> {
        let after = published_after.to_rfc3339_opts(SecondsFormat::Secs, true);
        debug!(channel = %channel_id, after = %after, "fetching channel activities");
        self.get_json(
            "activities",
            &[
                ("part", "contentDetails"),
                ("channelId", channel_id),
                ("publishedAfter", after.as_str()),
                ("maxResults", ACTIVITY_PAGE_SIZE),
            ],
        )
        .await
    }

    async fn videos_info(&self, ids: &[String]) -> Result<Vec<Video>, FetchError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let joined = ids.join(",");
        debug!(count = ids.len(), "fetching video metadata");
        let response: VideoListResponse = self
            .get_json(
                "videos",
                &[
                    ("part", "snippet,contentDetails,statistics"),
                    ("id", joined.as_str()),
                ],
            )
            .await?;
        Ok(response.items.into_iter().filter_map(VideoItem::into_video).collect())
    }

    async fn search_channels(&self, query: &str) -> Result<Vec<Channel>, FetchError> {
        debug!(query = %query, "searching channels");
        let response: SearchListResponse = self
            .get_json(
                "search",
                &[
                    ("part", "snippet"),
                    ("type", "channel"),
                    ("q", query),
                    ("maxResults", SEARCH_PAGE_SIZE),
                ],
            )
            .await?;
        Ok(response.items.into_iter().filter_map(SearchItem::into_channel).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_ids_survive_malformed_items() {
        let feed: ActivityFeed = serde_json::from_str(
            r#"{
                "items": [
                    { "contentDetails": { "upload": { "videoId": "v1" } } },
                    { "contentDetails": { "upload": { "videoId": null } } },
                    { "contentDetails": { "upload": {} } },
                    { "contentDetails": {} },
                    {},
                    { "contentDetails": { "upload": { "videoId": "" } } },
                    { "contentDetails": { "upload": { "videoId": "v2" } } }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(feed.upload_ids(), vec!["v1", "v2"]);
    }

    #[test]
    fn missing_items_is_empty_not_error() {
        let feed: ActivityFeed = serde_json::from_str("{}").unwrap();
        assert!(feed.upload_ids().is_empty());
    }

    #[test]
    fn video_item_maps_to_video() {
        let response: VideoListResponse = serde_json::from_str(
            r#"{
                "items": [{
                    "id": "v1",
                    "snippet": {
                        "title": "A video",
                        "channelId": "UC1",
                        "publishedAt": "2026-08-01T12:00:00Z",
                        "thumbnails": { "medium": { "url": "https://i.ytimg.com/vi/v1/m.jpg" } }
                    },
                    "contentDetails": { "duration": "PT4M5S" },
                    "statistics": { "viewCount": "12345" }
                }]
            }"#,
        )
        .unwrap();
        let videos: Vec<Video> = response.items.into_iter().filter_map(VideoItem::into_video).collect();
        assert_eq!(videos.len(), 1);
        let video = &videos[0];
        assert_eq!(video.id, "v1");
        assert_eq!(video.channel_id, "UC1");
        assert_eq!(video.url, "https://www.youtube.com/watch?v=v1");
        assert_eq!(video.duration, "4:05");
        assert_eq!(video.views, Some(12345));
        assert!(!video.is_recent);
    }

    #[test]
    fn video_item_without_required_fields_is_dropped() {
        let response: VideoListResponse = serde_json::from_str(
            r#"{
                "items": [
                    { "id": "v1" },
                    { "id": "v2", "snippet": { "title": "no channel" } },
                    {}
                ]
            }"#,
        )
        .unwrap();
        let videos: Vec<Video> = response.items.into_iter().filter_map(VideoItem::into_video).collect();
        assert!(videos.is_empty());
    }

    #[test]
    fn missing_view_count_stays_absent() {
        let response: VideoListResponse = serde_json::from_str(
            r#"{
                "items": [{
                    "id": "v1",
                    "snippet": { "channelId": "UC1", "publishedAt": "2026-08-01T12:00:00Z" },
                    "statistics": {}
                }]
            }"#,
        )
        .unwrap();
        let video = response.items.into_iter().filter_map(VideoItem::into_video).next().unwrap();
        assert_eq!(video.views, None);
    }

    #[test]
    fn search_item_maps_to_channel() {
        let response: SearchListResponse = serde_json::from_str(
            r#"{
                "items": [
                    {
                        "id": { "channelId": "UC1" },
                        "snippet": { "title": "A channel" }
                    },
                    { "id": {}, "snippet": { "title": "no id" } }
                ]
            }"#,
        )
        .unwrap();
        let channels: Vec<Channel> =
            response.items.into_iter().filter_map(SearchItem::into_channel).collect();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].id, "UC1");
        assert_eq!(channels[0].url, "https://www.youtube.com/channel/UC1");
        assert!(!channels[0].is_hidden);
    }

    #[test]
    fn duration_rendering() {
        assert_eq!(format_duration("PT4M5S"), "4:05");
        assert_eq!(format_duration("PT1H2M3S"), "1:02:03");
        assert_eq!(format_duration("PT37S"), "0:37");
        assert_eq!(format_duration("PT2H"), "2:00:00");
        assert_eq!(format_duration("P1DT1H"), "25:00:00");
        assert_eq!(format_duration("P0D"), "0:00");
        assert_eq!(format_duration(""), "0:00");
    }
}

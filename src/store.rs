use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::models::{Channel, SortBy, Video, cache_cmp};
use crate::storage::CacheMap;

/// Outcome of a watch-later add. A repeat add is a distinct no-op so the
/// caller can tell "added" from "already listed".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchLaterOutcome {
    Added,
    AlreadyListed,
    NotFound,
}

/// Aggregate flag counts across the visible channels' cache entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoCounts {
    pub recent: usize,
    pub today: usize,
    pub watch_later: usize,
}

/// The owned video cache: channel id → video list, most recent first.
///
/// All mutation goes through this type; callers never touch the nested lists
/// directly. The inner sync mutex is only held for in-memory work, never
/// across an await. Per-channel async guards serialize fetch-and-merge so
/// two resolves for the same channel cannot race a duplicate fetch.
pub struct CacheStore {
    videos: Mutex<CacheMap>,
    flights: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CacheStore {
    /// Wrap a loaded snapshot. Each list is de-duplicated by id (first
    /// occurrence wins) so a corrupt snapshot cannot violate the invariant.
    pub fn from_map(mut map: CacheMap) -> Self {
        for list in map.values_mut() {
            dedup_by_id(list);
        }
        Self {
            videos: Mutex::new(map),
            flights: Mutex::new(HashMap::new()),
        }
    }

    pub fn new() -> Self {
        Self::from_map(CacheMap::new())
    }

    /// The single-flight guard for one channel. Hold the lock for the whole
    /// fetch-and-merge; a concurrent resolve awaits it and then finds the
    /// cache warm.
    pub fn flight_guard(&self, channel_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut flights = self.flights.lock().expect("flights lock");
        flights
            .entry(channel_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub fn has_videos(&self, channel_id: &str) -> bool {
        self.videos
            .lock()
            .expect("cache lock")
            .get(channel_id)
            .is_some_and(|list| !list.is_empty())
    }

    /// Cloned video list for a channel, in cache order.
    pub fn videos(&self, channel_id: &str) -> Vec<Video> {
        self.videos
            .lock()
            .expect("cache lock")
            .get(channel_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn cached_ids(&self, channel_id: &str) -> HashSet<String> {
        self.videos
            .lock()
            .expect("cache lock")
            .get(channel_id)
            .map(|list| list.iter().map(|v| v.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Prepend `new_videos` to the channel's list, drop duplicate ids (first
    /// occurrence wins, so a fresh fetch shadows a stale cache entry), and
    /// re-sort with the comparator for `sort_by`. Returns the merged list.
    pub fn merge(&self, channel_id: &str, new_videos: Vec<Video>, sort_by: SortBy) -> Vec<Video> {
        let mut cache = self.videos.lock().expect("cache lock");
        let existing = cache.remove(channel_id).unwrap_or_default();

        let mut merged = new_videos;
        let fresh = merged.len();
        merged.extend(existing);
        dedup_by_id(&mut merged);
        merged.sort_by(|a, b| cache_cmp(a, b, sort_by));

        debug!(channel = %channel_id, fresh, total = merged.len(), "merged videos into cache");
        cache.insert(channel_id.to_string(), merged.clone());
        merged
    }

    /// Apply a transform to every cached video across all channels.
    pub fn map_all(&self, mut transform: impl FnMut(&mut Video)) {
        let mut cache = self.videos.lock().expect("cache lock");
        for list in cache.values_mut() {
            for video in list.iter_mut() {
                transform(video);
            }
        }
    }

    /// Set the watch-later flag on one video, idempotently.
    pub fn add_watch_later(&self, channel_id: &str, video_id: &str) -> WatchLaterOutcome {
        let mut cache = self.videos.lock().expect("cache lock");
        let Some(video) = cache
            .get_mut(channel_id)
            .and_then(|list| list.iter_mut().find(|v| v.id == video_id))
        else {
            return WatchLaterOutcome::NotFound;
        };
        if video.is_to_watch_later {
            WatchLaterOutcome::AlreadyListed
        } else {
            video.is_to_watch_later = true;
            WatchLaterOutcome::Added
        }
    }

    /// Unset the watch-later flag. Returns true when the flag was set.
    pub fn remove_watch_later(&self, channel_id: &str, video_id: &str) -> bool {
        let mut cache = self.videos.lock().expect("cache lock");
        match cache
            .get_mut(channel_id)
            .and_then(|list| list.iter_mut().find(|v| v.id == video_id))
        {
            Some(video) if video.is_to_watch_later => {
                video.is_to_watch_later = false;
                true
            }
            _ => false,
        }
    }

    /// Flag counts over the cache entries of visible (non-hidden) channels.
    /// Orphaned cache entries (deleted channels) are skipped.
    pub fn counts(&self, channels: &[Channel]) -> VideoCounts {
        let cache = self.videos.lock().expect("cache lock");
        let mut counts = VideoCounts::default();
        for (channel_id, list) in cache.iter() {
            let visible = channels.iter().any(|c| c.id == *channel_id && !c.is_hidden);
            if !visible {
                continue;
            }
            for video in list {
                if video.is_recent {
                    counts.recent += 1;
                }
                if video.published_today() {
                    counts.today += 1;
                }
                if video.is_to_watch_later {
                    counts.watch_later += 1;
                }
            }
        }
        counts
    }

    /// Whole-map clone for persistence.
    pub fn snapshot(&self) -> CacheMap {
        self.videos.lock().expect("cache lock").clone()
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove duplicate ids in place, keeping the first occurrence.
fn dedup_by_id(videos: &mut Vec<Video>) {
    let mut seen = HashSet::new();
    videos.retain(|v| seen.insert(v.id.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::testing::{test_channel, test_video};
    use chrono::{Duration, Utc};

    #[test]
    fn merge_into_empty_channel() {
        let store = CacheStore::new();
        let now = Utc::now();
        let merged = store.merge(
            "UC1",
            vec![test_video("a", "UC1", now), test_video("b", "UC1", now - Duration::hours(1))],
            SortBy::Date,
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].id, "a");
        assert_eq!(store.videos("UC1").len(), 2);
    }

    #[test]
    fn merge_never_duplicates_ids() {
        let store = CacheStore::new();
        let now = Utc::now();
        store.merge("UC1", vec![test_video("a", "UC1", now)], SortBy::Date);

        // Same id arrives again across several merges, with overlap.
        store.merge(
            "UC1",
            vec![test_video("a", "UC1", now), test_video("b", "UC1", now)],
            SortBy::Date,
        );
        store.merge("UC1", vec![test_video("b", "UC1", now)], SortBy::Date);

        let videos = store.videos("UC1");
        let mut ids: Vec<&str> = videos.iter().map(|v| v.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn fresh_video_shadows_cached_duplicate() {
        let store = CacheStore::new();
        let now = Utc::now();
        let mut stale = test_video("a", "UC1", now);
        stale.views = Some(10);
        store.merge("UC1", vec![stale], SortBy::Date);

        let mut fresh = test_video("a", "UC1", now);
        fresh.views = Some(25);
        store.merge("UC1", vec![fresh], SortBy::Date);

        let videos = store.videos("UC1");
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].views, Some(25));
    }

    #[test]
    fn merge_sorts_with_pairwise_views_fallback() {
        let store = CacheStore::new();
        let now = Utc::now();
        let mut counted = test_video("counted", "UC1", now - Duration::hours(5));
        counted.views = Some(5);
        let uncounted = test_video("uncounted", "UC1", now - Duration::hours(1));

        let merged = store.merge("UC1", vec![counted, uncounted], SortBy::Views);
        // The pair falls back to date order: the newer, count-less video first.
        assert_eq!(merged[0].id, "uncounted");
        assert_eq!(merged[1].id, "counted");
    }

    #[test]
    fn snapshot_dedup_on_load() {
        let now = Utc::now();
        let mut map = CacheMap::new();
        map.insert(
            "UC1".to_string(),
            vec![test_video("a", "UC1", now), test_video("a", "UC1", now)],
        );
        let store = CacheStore::from_map(map);
        assert_eq!(store.videos("UC1").len(), 1);
    }

    #[test]
    fn watch_later_add_is_idempotent_and_distinguishable() {
        let store = CacheStore::new();
        store.merge("UC1", vec![test_video("a", "UC1", Utc::now())], SortBy::Date);

        assert_eq!(store.add_watch_later("UC1", "a"), WatchLaterOutcome::Added);
        assert_eq!(store.add_watch_later("UC1", "a"), WatchLaterOutcome::AlreadyListed);
        assert_eq!(store.add_watch_later("UC1", "nope"), WatchLaterOutcome::NotFound);
        assert_eq!(store.add_watch_later("UC9", "a"), WatchLaterOutcome::NotFound);

        assert_eq!(store.videos("UC1").len(), 1);
        assert!(store.videos("UC1")[0].is_to_watch_later);
    }

    #[test]
    fn remove_watch_later_reports_change() {
        let store = CacheStore::new();
        store.merge("UC1", vec![test_video("a", "UC1", Utc::now())], SortBy::Date);
        store.add_watch_later("UC1", "a");

        assert!(store.remove_watch_later("UC1", "a"));
        assert!(!store.remove_watch_later("UC1", "a"));
    }

    #[test]
    fn counts_skip_hidden_and_orphaned_channels() {
        let store = CacheStore::new();
        let now = Utc::now();

        let mut recent = test_video("a", "UC1", now);
        recent.is_recent = true;
        store.merge("UC1", vec![recent, test_video("b", "UC1", now - Duration::days(10))], SortBy::Date);

        let mut hidden_recent = test_video("c", "UC2", now);
        hidden_recent.is_recent = true;
        store.merge("UC2", vec![hidden_recent], SortBy::Date);

        // Orphan: cached but no longer in the channel list.
        store.merge("UC3", vec![test_video("d", "UC3", now)], SortBy::Date);

        let mut hidden = test_channel("UC2", "hidden");
        hidden.is_hidden = true;
        let channels = vec![test_channel("UC1", "one"), hidden];

        let counts = store.counts(&channels);
        assert_eq!(counts.recent, 1);
        assert_eq!(counts.today, 1);
        assert_eq!(counts.watch_later, 0);
    }

    #[test]
    fn map_all_touches_every_channel() {
        let store = CacheStore::new();
        let now = Utc::now();
        let mut a = test_video("a", "UC1", now);
        a.is_recent = true;
        let mut b = test_video("b", "UC2", now);
        b.is_recent = true;
        store.merge("UC1", vec![a], SortBy::Date);
        store.merge("UC2", vec![b], SortBy::Date);

        store.map_all(|video| video.is_recent = false);

        assert!(!store.videos("UC1")[0].is_recent);
        assert!(!store.videos("UC2")[0].is_recent);
    }
}

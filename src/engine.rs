use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{Duration, Utc};
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::FetchError;
use crate::models::{Channel, RECENT_WINDOW_HOURS, Selection, SortOrder, Video, ViewFilter};
use crate::storage::{CacheMap, Storage};
use crate::store::{CacheStore, VideoCounts, WatchLaterOutcome};
use crate::youtube::RemoteSource;

/// What the engine hands back for the tab-opening side effect. The caller
/// opens the tab; no data flows back in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedVideo {
    pub url: String,
    pub in_background: bool,
}

struct ViewState {
    selection: Selection,
    videos: Vec<Video>,
}

/// The video-cache synchronization engine.
///
/// Owns the channel list, the video cache, and the currently displayed view.
/// Remote fetches and persistence go through the `RemoteSource` / `Storage`
/// collaborators. Methods take `&self`; everything concurrent resolves touch
/// sits behind interior mutability, and sync locks are never held across an
/// await.
pub struct Engine<R, S> {
    remote: R,
    storage: S,
    settings: Settings,
    channels: Mutex<Vec<Channel>>,
    cache: CacheStore,
    view: Mutex<ViewState>,
    /// Single most-recent fetch error, held for user display.
    last_error: Mutex<Option<String>>,
    /// Monotonic token per view run; a stale run must not overwrite the
    /// display state of a newer one.
    view_seq: AtomicU64,
}

impl<R: RemoteSource, S: Storage> Engine<R, S> {
    pub fn new(
        remote: R,
        storage: S,
        settings: Settings,
        channels: Vec<Channel>,
        cache: CacheMap,
    ) -> Self {
        Self {
            remote,
            storage,
            settings,
            channels: Mutex::new(channels),
            cache: CacheStore::from_map(cache),
            view: Mutex::new(ViewState {
                selection: Selection::None,
                videos: Vec::new(),
            }),
            last_error: Mutex::new(None),
            view_seq: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.channels.lock().expect("channels lock").clone()
    }

    pub fn selection(&self) -> Selection {
        self.view.lock().expect("view lock").selection
    }

    /// The currently displayed video list.
    pub fn displayed(&self) -> Vec<Video> {
        self.view.lock().expect("view lock").videos.clone()
    }

    /// Take the most recent fetch error, clearing the slot.
    pub fn take_last_error(&self) -> Option<String> {
        self.last_error.lock().expect("error lock").take()
    }

    pub fn video_counts(&self) -> VideoCounts {
        let channels = self.channels();
        self.cache.counts(&channels)
    }

    // ── Fetch and merge ────────────────────────────────────────────────

    /// Videos for one channel: the cached slice when it is warm and trusted,
    /// otherwise fetch, merge, persist. The `filter` runs before truncation
    /// so a view gets first pick of the filtered set. Remote failure resolves
    /// to an empty list and records the error; it never propagates.
    pub async fn resolve_channel_videos(
        &self,
        channel: &Channel,
        ignore_cache: bool,
        filter: Option<ViewFilter>,
    ) -> Vec<Video> {
        // One fetch-and-merge in flight per channel; a concurrent resolve
        // awaits it here and then finds the cache warm.
        let flight = self.cache.flight_guard(&channel.id);
        let _in_flight = flight.lock().await;

        if !ignore_cache && self.cache.has_videos(&channel.id) {
            debug!(channel = %channel.title, "serving videos from cache");
            return self.apply_view(self.cache.videos(&channel.id), filter);
        }

        let since = Utc::now() - Duration::days(i64::from(self.settings.videos_anteriority));
        let feed = match self.remote.channel_activities(&channel.id, since).await {
            Ok(feed) => feed,
            Err(e) => {
                self.record_error(&channel.title, e);
                return Vec::new();
            }
        };

        // Candidate ids: dedup keeping first occurrence, cap at the
        // per-channel limit, then drop ids whose metadata is already cached.
        let cached_ids = self.cache.cached_ids(&channel.id);
        let mut seen = HashSet::new();
        let candidates: Vec<String> = feed
            .upload_ids()
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .take(self.settings.videos_per_channel)
            .filter(|id| !cached_ids.contains(id))
            .collect();

        if candidates.is_empty() {
            debug!(channel = %channel.title, "no new uploads");
            return self.apply_view(self.cache.videos(&channel.id), filter);
        }

        let mut fetched = match self.remote.videos_info(&candidates).await {
            Ok(videos) => videos,
            Err(e) => {
                self.record_error(&channel.title, e);
                return Vec::new();
            }
        };

        let now = Utc::now();
        for video in &mut fetched {
            // Write-once: only this path ever sets the flag, and only for
            // genuinely fresh uploads, so a cold cache fill cannot mark a
            // month of backlog as recent.
            if video.published_within(now, RECENT_WINDOW_HOURS) {
                video.is_recent = true;
            }
        }

        info!(channel = %channel.title, fresh = fetched.len(), "fetched new videos");
        let merged = self.cache.merge(&channel.id, fetched, self.settings.sort_videos_by);
        self.persist_cache().await;
        self.apply_view(merged, filter)
    }

    fn apply_view(&self, videos: Vec<Video>, filter: Option<ViewFilter>) -> Vec<Video> {
        let mut result: Vec<Video> = match filter {
            Some(f) => videos.into_iter().filter(|v| f.keeps(v)).collect(),
            None => videos,
        };
        result.truncate(self.settings.videos_per_channel);
        result
    }

    // ── Selection and aggregation ──────────────────────────────────────

    /// Run a view over `channels`: selection state is set immediately, the
    /// per-channel resolves run concurrently and all settle (one channel's
    /// failure never blocks the others), results are concatenated in channel
    /// order. The output is grouped by channel, each group internally
    /// sorted; there is no global re-sort across channels.
    async fn run_view(
        &self,
        selection: Selection,
        channels: Vec<Channel>,
        filter: Option<ViewFilter>,
        sort: Option<SortOrder>,
        ignore_cache: bool,
    ) -> Vec<Video> {
        let token = self.view_seq.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut view = self.view.lock().expect("view lock");
            view.selection = selection;
            view.videos.clear();
        }

        let fetches = channels.iter().map(|channel| async move {
            let mut videos = self.resolve_channel_videos(channel, ignore_cache, filter).await;
            if let Some(order) = sort {
                videos.sort_by(|a, b| order.cmp_published(a, b));
            }
            videos
        });
        let videos: Vec<Video> = join_all(fetches).await.into_iter().flatten().collect();

        // A newer view run started while this one was in flight. Its cache
        // writes stand, but the display belongs to the newer run.
        if self.view_seq.load(Ordering::SeqCst) != token {
            debug!(?selection, "stale view result discarded");
            return videos;
        }
        self.view.lock().expect("view lock").videos = videos.clone();
        videos
    }

    /// Aggregate a named view over all non-hidden channels, or over an
    /// explicit list (bulk import).
    pub async fn fetch_channels_videos(
        &self,
        selection: Selection,
        ignore_cache: bool,
        sort: Option<SortOrder>,
        channels_override: Option<Vec<Channel>>,
    ) -> Vec<Video> {
        let channels: Vec<Channel> = channels_override
            .unwrap_or_else(|| self.channels())
            .into_iter()
            .filter(|c| !c.is_hidden)
            .collect();
        self.run_view(selection, channels, selection.filter(), sort, ignore_cache).await
    }

    /// Show any selection: named views aggregate, a channel index resolves
    /// that channel alone, `None` clears the display.
    pub async fn show(
        &self,
        selection: Selection,
        ignore_cache: bool,
        sort: Option<SortOrder>,
    ) -> Vec<Video> {
        match selection {
            Selection::Channel(index) => self.select_channel(index, ignore_cache, sort).await,
            Selection::None => {
                // Invalidate any in-flight view run; a late-settling
                // aggregation must not repopulate a cleared display.
                self.view_seq.fetch_add(1, Ordering::SeqCst);
                let mut view = self.view.lock().expect("view lock");
                view.selection = Selection::None;
                view.videos.clear();
                Vec::new()
            }
            named => self.fetch_channels_videos(named, ignore_cache, sort, None).await,
        }
    }

    /// Single-channel view. Bypasses aggregation (a hidden channel can still
    /// be selected explicitly) and applies an explicit publish-date order
    /// instead of the settings-driven cache sort.
    pub async fn select_channel(
        &self,
        index: usize,
        ignore_cache: bool,
        sort: Option<SortOrder>,
    ) -> Vec<Video> {
        let Some(channel) = self.channels.lock().expect("channels lock").get(index).cloned()
        else {
            warn!(index, "no channel at selected index");
            return Vec::new();
        };
        debug!(channel = %channel.title, index, "channel selected");
        self.run_view(Selection::Channel(index), vec![channel], None, sort, ignore_cache).await
    }

    /// Re-run the current selection, bypassing the cache. With nothing
    /// selected yet, the configured default view is refreshed instead.
    pub async fn refresh(&self) -> Vec<Video> {
        let selection = match self.selection() {
            Selection::None => self.settings.default_selection.to_selection(),
            current => current,
        };
        self.show(selection, true, None).await
    }

    // ── Channel list management ────────────────────────────────────────

    /// Add a channel (deduplicated by id; adding an existing channel just
    /// re-selects it) and show its videos.
    pub async fn add_channel(&self, channel: Channel) -> Vec<Video> {
        let (index, added) = {
            let mut channels = self.channels.lock().expect("channels lock");
            match channels.iter().position(|c| c.id == channel.id) {
                Some(existing) => (existing, false),
                None => {
                    info!(channel = %channel.title, "channel added");
                    channels.push(channel);
                    (channels.len() - 1, true)
                }
            }
        };
        if added {
            self.persist_channels().await;
        }
        self.select_channel(index, false, None).await
    }

    /// Remove a channel by index. Its cache entry stays in storage as an
    /// accepted orphan. When the deleted channel was selected, the display
    /// clears and the selection resets.
    pub async fn delete_channel(&self, index: usize) -> Option<Channel> {
        let removed = {
            let mut channels = self.channels.lock().expect("channels lock");
            if index >= channels.len() {
                return None;
            }
            channels.remove(index)
        };
        self.persist_channels().await;
        {
            let mut view = self.view.lock().expect("view lock");
            if view.selection == Selection::Channel(index) {
                view.videos.clear();
                view.selection = Selection::None;
            }
        }
        info!(channel = %removed.title, "channel deleted");
        Some(removed)
    }

    /// Toggle a channel's visibility in aggregate views.
    pub async fn set_channel_hidden(&self, index: usize, hidden: bool) -> bool {
        let changed = {
            let mut channels = self.channels.lock().expect("channels lock");
            match channels.get_mut(index) {
                Some(channel) if channel.is_hidden != hidden => {
                    channel.is_hidden = hidden;
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.persist_channels().await;
        }
        changed
    }

    /// Replace the channel list wholesale and aggregate All over the new
    /// list, bypassing the cache.
    pub async fn import_channels(&self, list: Vec<Channel>) -> Vec<Video> {
        info!(count = list.len(), "importing channels");
        *self.channels.lock().expect("channels lock") = list.clone();
        self.persist_channels().await;
        self.fetch_channels_videos(Selection::All, true, None, Some(list)).await
    }

    /// Channel search, for add-by-query. Failure records the error and
    /// yields no results.
    pub async fn search_channels(&self, query: &str) -> Vec<Channel> {
        match self.remote.search_channels(query).await {
            Ok(channels) => channels,
            Err(e) => {
                self.record_error(query, e);
                Vec::new()
            }
        }
    }

    // ── Bulk mutations ─────────────────────────────────────────────────

    /// Clear the recent flag everywhere. When the Recent view is active it
    /// is re-run (bypassing the cache) so the emptied result shows at once.
    pub async fn clear_recent_videos(&self) {
        self.cache.map_all(|video| video.is_recent = false);
        self.persist_cache().await;
        if self.selection() == Selection::Recent {
            self.fetch_channels_videos(Selection::Recent, true, None, None).await;
        }
    }

    /// Clear the watch-later flag everywhere. The predicate is now
    /// universally false, so an active WatchLater view empties directly
    /// without a refetch.
    pub async fn clear_watch_later_videos(&self) {
        self.cache.map_all(|video| video.is_to_watch_later = false);
        self.persist_cache().await;
        let mut view = self.view.lock().expect("view lock");
        if view.selection == Selection::WatchLater {
            view.videos.clear();
        }
    }

    /// Flag one video for watch-later, idempotently. Persists only on an
    /// actual change; the repeat call is reported as a distinct no-op.
    pub async fn add_to_watch_later(&self, channel_id: &str, video_id: &str) -> WatchLaterOutcome {
        let outcome = self.cache.add_watch_later(channel_id, video_id);
        if outcome == WatchLaterOutcome::Added {
            self.persist_cache().await;
        }
        outcome
    }

    /// Flag every currently displayed video, persisting once at the end if
    /// anything changed. Returns how many videos were newly flagged.
    pub async fn add_displayed_to_watch_later(&self) -> usize {
        let displayed = self.displayed();
        let added = displayed
            .iter()
            .filter(|video| {
                self.cache.add_watch_later(&video.channel_id, &video.id) == WatchLaterOutcome::Added
            })
            .count();
        if added > 0 {
            self.persist_cache().await;
        }
        added
    }

    /// Unset the watch-later flag and drop the video from an active
    /// WatchLater display without refetching.
    pub async fn remove_from_watch_later(&self, channel_id: &str, video_id: &str) -> bool {
        let changed = self.cache.remove_watch_later(channel_id, video_id);
        if changed {
            self.persist_cache().await;
            let mut view = self.view.lock().expect("view lock");
            if view.selection == Selection::WatchLater {
                view.videos
                    .retain(|v| !(v.channel_id == channel_id && v.id == video_id));
            }
        }
        changed
    }

    /// Locate a cached video for opening in a browser tab. Opening a
    /// watch-later video removes it from the list when the settings say so.
    pub async fn open_video(&self, channel_id: &str, video_id: &str) -> Option<OpenedVideo> {
        let video = self
            .cache
            .videos(channel_id)
            .into_iter()
            .find(|v| v.id == video_id)?;
        if video.is_to_watch_later && self.settings.auto_remove_watch_later_videos {
            self.remove_from_watch_later(channel_id, video_id).await;
        }
        Some(OpenedVideo {
            url: video.url,
            in_background: self.settings.open_videos_in_inactive_tabs,
        })
    }

    // ── Persistence and errors ─────────────────────────────────────────

    async fn persist_cache(&self) {
        let snapshot = self.cache.snapshot();
        if let Err(e) = self.storage.save_cache(&snapshot).await {
            warn!(error = %e, "failed to persist cache");
        }
    }

    async fn persist_channels(&self) {
        let channels = self.channels();
        if let Err(e) = self.storage.save_channels(&channels).await {
            warn!(error = %e, "failed to persist channels");
        }
    }

    pub async fn persist_settings(&self) {
        if let Err(e) = self.storage.save_settings(&self.settings).await {
            warn!(error = %e, "failed to persist settings");
        }
    }

    fn record_error(&self, subject: &str, error: FetchError) {
        warn!(subject = %subject, error = %error, "remote fetch failed");
        *self.last_error.lock().expect("error lock") = Some(error.to_string());
    }
}

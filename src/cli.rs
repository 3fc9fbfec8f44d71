use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::models::{Selection, SortOrder};

#[derive(Parser)]
#[command(name = "subfeed", about = "Cached subscription feeds for YouTube channels")]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, global = true, default_value = "config.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the configuration file
    Validate,

    /// Show an aggregate view over all visible channels
    Show {
        /// Which view to aggregate
        #[arg(value_enum, default_value = "all")]
        view: ViewArg,

        /// Bypass the cache and refetch every channel
        #[arg(long)]
        refresh: bool,

        /// Order each channel's videos by publish date
        #[arg(long, value_enum)]
        sort: Option<SortArg>,
    },

    /// Show one channel's videos by its position in the channel list
    Select {
        /// Channel index, as printed by `channels list`
        index: usize,

        /// Bypass the cache and refetch the channel
        #[arg(long)]
        refresh: bool,

        /// Order the videos by publish date
        #[arg(long, value_enum)]
        sort: Option<SortArg>,
    },

    /// Re-run the default view, bypassing the cache
    Refresh,

    /// Per-view video counts across all visible channels
    Counts,

    /// Open a cached video in the browser
    Open {
        /// Channel id the video belongs to
        channel_id: String,
        /// Video id
        video_id: String,
    },

    /// Unmark every recent video
    ClearRecent,

    /// Channel list management
    Channels {
        #[command(subcommand)]
        command: ChannelCommands,
    },

    /// Watch-later list management
    WatchLater {
        #[command(subcommand)]
        command: WatchLaterCommands,
    },
}

#[derive(Subcommand)]
pub enum ChannelCommands {
    /// List tracked channels with their indices
    List,
    /// Search channels by name
    Search {
        /// Free-text query
        query: String,
    },
    /// Add the best search match for a query and show its videos
    Add {
        /// Free-text query
        query: String,
    },
    /// Remove a channel by index
    Delete {
        /// Channel index, as printed by `channels list`
        index: usize,
    },
    /// Exclude a channel from aggregate views
    Hide {
        /// Channel index, as printed by `channels list`
        index: usize,
    },
    /// Include a hidden channel in aggregate views again
    Unhide {
        /// Channel index, as printed by `channels list`
        index: usize,
    },
    /// Replace the channel list from a JSON export
    Import {
        /// Path to a JSON array of channels
        file: PathBuf,
    },
    /// Write the channel list as JSON
    Export {
        /// Output path, stdout when omitted
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum WatchLaterCommands {
    /// Mark one video to watch later
    Add {
        /// Channel id the video belongs to
        channel_id: String,
        /// Video id
        video_id: String,
    },
    /// Mark every video of a view to watch later
    AddView {
        /// Which view to aggregate first
        #[arg(value_enum, default_value = "all")]
        view: ViewArg,
    },
    /// Unmark one video
    Remove {
        /// Channel id the video belongs to
        channel_id: String,
        /// Video id
        video_id: String,
    },
    /// Unmark every video
    Clear,
}

/// Aggregate views addressable from the command line.
#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ViewArg {
    All,
    Today,
    Recent,
    WatchLater,
}

impl ViewArg {
    pub fn to_selection(self) -> Selection {
        match self {
            ViewArg::All => Selection::All,
            ViewArg::Today => Selection::Today,
            ViewArg::Recent => Selection::Recent,
            ViewArg::WatchLater => Selection::WatchLater,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SortArg {
    Asc,
    Desc,
}

impl SortArg {
    pub fn to_order(self) -> SortOrder {
        match self {
            SortArg::Asc => SortOrder::Asc,
            SortArg::Desc => SortOrder::Desc,
        }
    }
}

mod cli;
mod config;
mod engine;
mod error;
mod models;
mod storage;
mod store;
mod tabs;
mod youtube;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use crate::cli::{ChannelCommands, Cli, Commands, WatchLaterCommands};
use crate::config::{load_config, validate_config};
use crate::engine::Engine;
use crate::models::{Channel, Video};
use crate::storage::{JsonFileStorage, Storage};
use crate::youtube::YouTubeClient;

type App = Engine<YouTubeClient, JsonFileStorage>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.subfeed.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(config_path = %cli.config.display(), "config loaded");

    validate_config(&config).context("config validation failed")?;

    if let Some(Commands::Validate) = cli.command {
        println!("Configuration is valid.");
        return Ok(());
    }

    if config.youtube.api_key.is_empty() {
        warn!("no [youtube].api_key configured; fetches will be rejected upstream");
    }

    let storage = JsonFileStorage::new(config.state_path()).context("opening state storage")?;
    let state = storage
        .load()
        .await
        .context("loading persisted state")?
        .unwrap_or_default();
    info!(
        channels = state.channels.len(),
        cached_channels = state.cache.len(),
        "state loaded"
    );

    let remote = YouTubeClient::new(&config.youtube.api_key).context("building YouTube client")?;
    let engine = Engine::new(
        remote,
        storage,
        config.settings.clone(),
        state.channels,
        state.cache,
    );
    engine.persist_settings().await;

    match cli.command {
        // Handled before storage setup.
        Some(Commands::Validate) => {}

        Some(Commands::Show { view, refresh, sort }) => {
            let videos = engine
                .show(view.to_selection(), refresh, sort.map(cli::SortArg::to_order))
                .await;
            print_view(&engine, &videos);
        }

        Some(Commands::Select { index, refresh, sort }) => {
            let videos = engine
                .select_channel(index, refresh, sort.map(cli::SortArg::to_order))
                .await;
            print_view(&engine, &videos);
        }

        Some(Commands::Refresh) => {
            let videos = engine.refresh().await;
            print_view(&engine, &videos);
        }

        Some(Commands::Counts) => {
            let counts = engine.video_counts();
            println!("recent:      {}", counts.recent);
            println!("today:       {}", counts.today);
            println!("watch later: {}", counts.watch_later);
        }

        Some(Commands::Open { channel_id, video_id }) => match engine.open_video(&channel_id, &video_id).await {
            Some(opened) => {
                tabs::open_in_tab(&opened.url, opened.in_background);
                println!("Opening {}", opened.url);
            }
            None => println!("Video '{video_id}' is not in the cache for channel '{channel_id}'."),
        },

        Some(Commands::ClearRecent) => {
            engine.clear_recent_videos().await;
            println!("Recent markers cleared.");
        }

        Some(Commands::Channels { command }) => match command {
            ChannelCommands::List => print_channels(&engine.channels()),

            ChannelCommands::Search { query } => {
                let results = engine.search_channels(&query).await;
                if results.is_empty() {
                    println!("No channels matched '{query}'.");
                } else {
                    for channel in &results {
                        println!("{}  [{}]", channel.title, channel.id);
                    }
                }
                report_error(&engine);
            }

            ChannelCommands::Add { query } => {
                match engine.search_channels(&query).await.into_iter().next() {
                    Some(channel) => {
                        println!("Tracking '{}'.", channel.title);
                        let videos = engine.add_channel(channel).await;
                        print_view(&engine, &videos);
                    }
                    None => {
                        println!("No channels matched '{query}'.");
                        report_error(&engine);
                    }
                }
            }

            ChannelCommands::Delete { index } => match engine.delete_channel(index).await {
                Some(channel) => println!("Removed '{}'.", channel.title),
                None => println!("No channel at index {index}."),
            },

            ChannelCommands::Hide { index } => {
                if engine.set_channel_hidden(index, true).await {
                    println!("Channel {index} hidden from aggregate views.");
                } else {
                    println!("Nothing to do for index {index}.");
                }
            }

            ChannelCommands::Unhide { index } => {
                if engine.set_channel_hidden(index, false).await {
                    println!("Channel {index} visible in aggregate views again.");
                } else {
                    println!("Nothing to do for index {index}.");
                }
            }

            ChannelCommands::Import { file } => {
                let raw = std::fs::read_to_string(&file)
                    .with_context(|| format!("reading {}", file.display()))?;
                let channels: Vec<Channel> = serde_json::from_str(&raw)
                    .with_context(|| format!("parsing channel list from {}", file.display()))?;
                let videos = engine.import_channels(channels).await;
                println!("Imported {} channels.", engine.channels().len());
                print_view(&engine, &videos);
            }

            ChannelCommands::Export { output } => {
                let json = serde_json::to_string_pretty(&engine.channels())
                    .context("serializing channel list")?;
                match output {
                    Some(path) => {
                        std::fs::write(&path, json)
                            .with_context(|| format!("writing {}", path.display()))?;
                        println!("Channel list written to {}.", path.display());
                    }
                    None => println!("{json}"),
                }
            }
        },

        Some(Commands::WatchLater { command }) => match command {
            WatchLaterCommands::Add { channel_id, video_id } => {
                use crate::store::WatchLaterOutcome;
                match engine.add_to_watch_later(&channel_id, &video_id).await {
                    WatchLaterOutcome::Added => println!("Marked to watch later."),
                    WatchLaterOutcome::AlreadyListed => println!("Already marked."),
                    WatchLaterOutcome::NotFound => {
                        println!("Video '{video_id}' is not in the cache for channel '{channel_id}'.")
                    }
                }
            }

            WatchLaterCommands::AddView { view } => {
                engine
                    .fetch_channels_videos(view.to_selection(), false, None, None)
                    .await;
                let added = engine.add_displayed_to_watch_later().await;
                println!("Marked {added} videos to watch later.");
                report_error(&engine);
            }

            WatchLaterCommands::Remove { channel_id, video_id } => {
                if engine.remove_from_watch_later(&channel_id, &video_id).await {
                    println!("Unmarked.");
                } else {
                    println!("Video '{video_id}' was not marked.");
                }
            }

            WatchLaterCommands::Clear => {
                engine.clear_watch_later_videos().await;
                println!("Watch-later markers cleared.");
            }
        },

        None => {
            let selection = config.settings.default_selection.to_selection();
            let videos = engine.show(selection, false, None).await;
            print_view(&engine, &videos);
        }
    }

    Ok(())
}

fn print_view(engine: &App, videos: &[Video]) {
    if videos.is_empty() {
        println!("No videos.");
    }
    for video in videos {
        let mut markers = String::new();
        if video.is_recent {
            markers.push('R');
        }
        if video.is_to_watch_later {
            markers.push('W');
        }
        let views = video
            .views
            .map(|count| count.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:>9}  {:>12}  {:2}  {}\n    {}",
            video.published_at.format("%Y-%m-%d"),
            video.duration,
            views,
            markers,
            video.title,
            video.url
        );
    }
    report_error(engine);
}

fn report_error(engine: &App) {
    if let Some(error) = engine.take_last_error() {
        eprintln!("warning: {error}");
    }
}

fn print_channels(channels: &[Channel]) {
    if channels.is_empty() {
        println!("No channels tracked.");
        return;
    }
    for (index, channel) in channels.iter().enumerate() {
        let hidden = if channel.is_hidden { "  (hidden)" } else { "" };
        println!("{index:3}  {}  [{}]{hidden}", channel.title, channel.id);
    }
}

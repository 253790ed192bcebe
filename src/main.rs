// ABOUTME: Entry point for the sluice operator binary.
// ABOUTME: Parses CLI arguments, initializes tracing, opens the datastore, and runs one admin command.

use anyhow::Result;
use clap::{Parser, Subcommand};
use sluice_admin::{messages, reset_follower, select_upstream_apps};
use sluice_core::{NotificationFeed, NotificationQuery, TrackingAdmin, TrackingLedger};
use sluice_store::{DatabaseUrl, Datastore, StoreConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "sluice",
    version,
    about = "Inspect and administer relational event recorders"
)]
struct Cli {
    /// Database location, overriding SLUICE_DATABASE_URL
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List followers that have tracking states
    Followers,
    /// Reset the tracking states of a follower app
    Reset {
        /// Follower to reset; omit to list the known followers
        follower: Option<String>,
        /// Upstream apps to reset (default: all of them)
        #[arg(short, long = "upstream-app", num_args = 1..)]
        upstream_apps: Vec<String>,
        /// Reset the tracking states, and then roll back the changes
        #[arg(short = 'n', long)]
        dry_run: bool,
        #[arg(short, long)]
        verbose: bool,
    },
    /// Print an application's notifications as JSON lines
    Notifications {
        application: String,
        /// First notification id to include
        #[arg(long, default_value_t = 1)]
        start: i64,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Only include these topics
        #[arg(long = "topic")]
        topics: Vec<String>,
    },
    /// Print an application's max notification id and tracking ids
    MaxIds {
        application: String,
        /// Upstream apps to report the tracking id of
        #[arg(long = "upstream")]
        upstreams: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sluice=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = StoreConfig::from_env()?;
    if let Some(url) = &cli.database_url {
        config.database = DatabaseUrl::parse(url)?;
    }
    let store = Datastore::connect(&config).await?;

    match cli.command {
        Command::Followers => {
            let followers = store.tracking_admin().list_followers().await?;
            for line in messages::followers_hint(&followers) {
                println!("{line}");
            }
        }

        Command::Reset {
            follower,
            upstream_apps,
            dry_run,
            verbose,
        } => {
            let admin = store.tracking_admin();
            let followers = admin.list_followers().await?;
            let Some(follower) = follower else {
                for line in messages::followers_hint(&followers) {
                    println!("{line}");
                }
                return Ok(());
            };

            let selected = select_upstream_apps(&follower, &upstream_apps, &followers)?;
            for line in messages::reset_header(&follower, &selected, dry_run, verbose) {
                println!("{line}");
            }
            let report = reset_follower(admin.as_ref(), &follower, &upstream_apps, dry_run).await?;
            println!("{}", messages::reset_summary(&report, verbose));
        }

        Command::Notifications {
            application,
            start,
            limit,
            topics,
        } => {
            let feed = store.application_recorder(application);
            let query = NotificationQuery::new(start, limit).topics(topics);
            // `state` is opaque, so it is written as an array of byte values.
            for notification in feed.select_notifications(&query).await? {
                println!("{}", serde_json::to_string(&notification)?);
            }
        }

        Command::MaxIds {
            application,
            upstreams,
        } => {
            let recorder = store.process_recorder(application);
            println!(
                "max notification id: {}",
                recorder.max_notification_id().await?
            );
            for upstream in upstreams {
                println!(
                    "tracking {upstream}: {}",
                    recorder.max_tracking_id(&upstream).await?
                );
            }
        }
    }

    Ok(())
}

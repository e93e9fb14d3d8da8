use anyhow::Result;
use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use yt_digest::config::Config;
use yt_digest::service::{DigestService, SummarizeRequest};
use yt_digest::store::VideoStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("yt_digest=info,warn")),
        )
        .init();

    let matches = Command::new("yt-digest")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Bilingual YouTube video summaries with timestamp-linked key frames")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file")
                .default_value("config.toml"),
        )
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .value_name("DIR")
                .help("Override the storage directory"),
        )
        .arg(
            Arg::new("url")
                .short('u')
                .long("url")
                .value_name("URL")
                .help("Summarize one video and print the result"),
        )
        .arg(
            Arg::new("instruction")
                .short('i')
                .long("instruction")
                .value_name("TEXT")
                .help("Custom instruction for the summary"),
        )
        .arg(
            Arg::new("force")
                .long("force")
                .help("Regenerate even when a stored summary exists")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("visual-all")
                .long("visual-all")
                .help("Tag every timestamp as visual instead of key moments only")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("frames")
                .long("frames")
                .help("Also extract key frames after summarizing")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("serve")
                .long("serve")
                .help("Start the HTTP API server")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("HTTP server port (overrides config)"),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str).unwrap_or("config.toml");
    let mut config = Config::load_or_default(config_path);
    if let Some(data_dir) = matches.get_one::<String>("data-dir") {
        config.storage.data_dir = PathBuf::from(data_dir);
    }
    if let Some(port) = matches.get_one::<String>("port") {
        config.server.port = port.parse()?;
    }
    config.validate()?;

    let store = Arc::new(VideoStore::new(&config.storage.data_dir).await?);
    let port = config.server.port;
    let service = Arc::new(DigestService::new(config, store)?);

    if matches.get_flag("serve") {
        return serve(service, port).await;
    }

    let Some(url) = matches.get_one::<String>("url") else {
        warn!("Nothing to do: pass --url <video> or --serve");
        return Ok(());
    };

    let record = service
        .summarize(SummarizeRequest {
            input: url.clone(),
            instruction: matches.get_one::<String>("instruction").cloned(),
            force: matches.get_flag("force"),
            visual_all: matches.get_flag("visual-all"),
        })
        .await?;

    info!("Summarized \"{}\" ({})", record.title, record.video_id);
    if let Some(summary) = record.primary_summary() {
        println!("{}", summary);
    }

    if matches.get_flag("frames") {
        let frames = service.frames(url).await?;
        info!("Extracted {} key frames", frames.len());
        for frame in frames {
            println!("{}s -> {}", frame.timestamp_seconds, frame.image_path.display());
        }
    }

    Ok(())
}

#[cfg(feature = "api")]
async fn serve(service: Arc<DigestService>, port: u16) -> Result<()> {
    yt_digest::api::start_http_server(service, port).await
}

#[cfg(not(feature = "api"))]
async fn serve(_service: Arc<DigestService>, _port: u16) -> Result<()> {
    Err(anyhow::anyhow!(
        "this binary was built without the \"api\" feature"
    ))
}

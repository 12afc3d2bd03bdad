//! codeboard - realtime collaborative voting board

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use codeboard::{config::Args, db::MongoClient, server, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("codeboard={},info", log_level).into()),
        )
        .with(args.log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!args.log_json).then(|| tracing_subscriber::fmt::layer()))
        .init();

    if let Err(e) = args.validate() {
        error!("{}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  codeboard - realtime voting board");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB: {} (db {})", args.mongodb_uri, args.mongodb_db);
    info!("Store timeout: {}ms", args.request_timeout_ms);
    info!("Populate range: {}-{}", args.populate_from, args.populate_to);
    info!("Dev tools: {}", if args.allow_dev_tools { "enabled" } else { "disabled" });
    if let Some(origin) = &args.allowed_origin {
        info!("Allowed origin: {}", origin);
    }
    info!("======================================");

    // MongoDB is required unless running in dev mode
    let state = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => {
            info!("MongoDB connected successfully");
            AppState::with_mongo(args, &client).await?
        }
        Err(e) => {
            if args.dev_mode {
                warn!("MongoDB connection failed (dev mode, using in-memory store): {}", e);
                AppState::in_memory(args)
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    server::run(Arc::new(state)).await?;

    Ok(())
}

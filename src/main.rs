//! Archway server binary

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use archway::actions::{
    ActionRegistry, ArchiveUrlAction, MetadataForSubjectAction, SaveMetadataAction,
};
use archway::crawl::{ArchiveRequestLog, CrawlOrchestrator, MemoryArchiveLog, UrlPolicy};
use archway::db::{MongoArchiveLog, MongoClient, MongoMetadataStore, SubprimerPolicy};
use archway::ledger::{Ledger, MemoryMetadataStore, MetadataStore};
use archway::server::{self, AppState, Hub};
use archway::store::{ContentStore, MemoryContentStore};
use archway::Args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("archway={},info", args.log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if args.log_format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    if let Err(e) = args.validate() {
        error!("{}", e);
        std::process::exit(1);
    }
    let algorithm = args.algorithm()?;

    info!("======================================");
    info!("  Archway - collaborative web archiving");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB: {}", args.mongodb_uri);
    info!("Crawl mode: {:?}", args.crawl_mode);
    info!("Hash algorithm: {}", algorithm);
    info!("======================================");

    // MongoDB is mandatory in production; dev mode falls back to memory
    let mongo = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => Some(client),
        Err(e) => {
            if args.dev_mode {
                warn!("MongoDB connection failed (dev mode, continuing in memory): {}", e);
                None
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    let records: Arc<dyn MetadataStore>;
    let policy: Arc<dyn UrlPolicy>;
    let audit: Arc<dyn ArchiveRequestLog>;
    match &mongo {
        Some(client) => {
            records = Arc::new(MongoMetadataStore::new(client).await?);
            policy = Arc::new(SubprimerPolicy::new(client).await?);
            audit = Arc::new(MongoArchiveLog::new(client).await?);
        }
        None => {
            let allow_list = args.allow_list();
            info!("Allow-list: {} pattern(s)", allow_list.patterns().len());
            records = Arc::new(MemoryMetadataStore::new());
            policy = Arc::new(allow_list);
            audit = Arc::new(MemoryArchiveLog::new());
        }
    }

    // TODO: network-backed ContentStore (HTTP fetch plus link extraction)
    warn!("Using in-process content store");
    let content: Arc<dyn ContentStore> = Arc::new(MemoryContentStore::new());

    let ledger = Arc::new(Ledger::new(records, algorithm).with_content_store(Arc::clone(&content)));
    let orchestrator = Arc::new(
        CrawlOrchestrator::new(args.crawl_config(), policy, audit, content)
            .with_ledger(Arc::clone(&ledger)),
    );

    let actions = ActionRegistry::new()
        .with(ArchiveUrlAction::new(orchestrator))
        .with(SaveMetadataAction::new(Arc::clone(&ledger)))
        .with(MetadataForSubjectAction::new(ledger));
    info!("Registered {} action handler(s)", actions.len());

    let (hub, hub_task) = Hub::spawn();
    let state = Arc::new(AppState::new(args, hub.clone(), actions));

    tokio::select! {
        result = server::run(state) => {
            if let Err(e) = result {
                error!("Server error: {}", e);
                hub.shutdown().await;
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    hub.shutdown().await;
    let _ = hub_task.await;
    info!("Archway stopped");
    Ok(())
}

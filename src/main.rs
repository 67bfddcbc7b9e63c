//! Nihao Carbon - carbon certificate trading simulation backend
//! Mission: Serve the simulated market, portfolio, and KYC onboarding
//! to the browser client.

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::broadcast};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nihao_carbon_backend::{
    admin::AdminStore,
    api::{create_router, ws::spawn_event_publisher, AppState},
    auth::UserStore,
    feeds::{spawn_price_poller, HttpPriceTransport, PriceFeed, PriceFeedConfig, ReferencePrices},
    kyc::{KycService, KycStore},
    market::{spawn_liveliness_simulator, spawn_offer_sync, MarketOfferStore},
    middleware::{RateLimitConfig, RateLimitLayer},
    models::{CertificateType, Config},
    portfolio::{spawn_conversion_ticker, BlobStore, PortfolioManager},
    stats::StatsAggregator,
};

#[derive(Parser, Debug)]
#[command(name = "nihao-carbon", about = "Carbon certificate trading simulation backend")]
struct Args {
    /// Port to listen on (overrides config/env)
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Directory for the SQLite databases
    #[arg(long, env = "DATA_DIR")]
    data_dir: Option<String>,

    /// Optional TOML config file
    #[arg(long, env = "CONFIG_FILE")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    info!("🌱 Nihao Carbon backend starting");

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")?;

    // Stores
    let users = Arc::new(UserStore::new(&data_path(&config, "nihao_auth.db"))?);
    let blob_store = BlobStore::new(&data_path(&config, "nihao_state.db"))?;
    let kyc_store = KycStore::new(&data_path(&config, "nihao_kyc.db"))?;
    let admin_store = Arc::new(AdminStore::new(&data_path(&config, "nihao_admin.db"))?);
    info!("💾 SQLite stores initialized in {}", config.data_dir);

    // Reference price feeds, one per instrument, each on its own poller.
    let cea_feed = PriceFeed::new(
        CertificateType::Cea,
        Arc::new(HttpPriceTransport::new(
            http_client.clone(),
            config.price_api_url.clone(),
            CertificateType::Cea,
        )),
        PriceFeedConfig::default(),
    );
    let eua_feed = PriceFeed::new(
        CertificateType::Eua,
        Arc::new(HttpPriceTransport::new(
            http_client.clone(),
            config.price_api_url.clone(),
            CertificateType::Eua,
        )),
        PriceFeedConfig::default(),
    );
    spawn_price_poller(cea_feed.clone(), Duration::from_secs(config.price_poll_secs));
    spawn_price_poller(eua_feed.clone(), Duration::from_secs(config.price_poll_secs));

    // Market book + the tasks that keep it honest.
    let market = MarketOfferStore::new();
    let refs = ReferencePrices::new(&cea_feed, &eua_feed);
    spawn_offer_sync(
        market.clone(),
        refs.clone(),
        Duration::from_secs(config.reconcile_secs),
    );
    spawn_liveliness_simulator(
        market.clone(),
        refs,
        Duration::from_secs(config.liveliness_secs),
    );

    // Portfolio manager + conversion ticker.
    let portfolio = PortfolioManager::new(users.clone(), market.clone(), blob_store)?;
    spawn_conversion_ticker(
        portfolio.clone(),
        Duration::from_secs(config.conversion_poll_secs),
    );

    let kyc = Arc::new(KycService::new(kyc_store));
    let stats = Arc::new(StatsAggregator::new(market.clone()));

    // Live ticker events.
    let (events_tx, _) = broadcast::channel(1000);
    spawn_event_publisher(
        cea_feed.clone(),
        eua_feed.clone(),
        market.clone(),
        events_tx.clone(),
    );

    let limiter = RateLimitLayer::new(RateLimitConfig::from_env());
    limiter.clone().spawn_cleanup();

    let state = AppState {
        config: config.clone(),
        users,
        cea_feed,
        eua_feed,
        market,
        portfolio,
        kyc,
        stats,
        admin: admin_store,
        events: events_tx,
    };

    let app = create_router(state, limiter);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    info!("🎯 API server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;

    Ok(())
}

fn data_path(config: &Config, file: &str) -> String {
    PathBuf::from(&config.data_dir)
        .join(file)
        .to_string_lossy()
        .into_owned()
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,nihao_carbon_backend=debug".into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use trestle_core::{FeeSchedule, RegistrationStorageConfig};
use trestle_service::{build_router, ServiceConfig, ServiceState};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RegistrationStorageMode {
    Auto,
    Memory,
    Postgres,
}

#[derive(Debug, Parser)]
#[command(name = "trestled", version, about = "Trestle function registration service")]
struct Cli {
    /// Socket address to bind, e.g. 127.0.0.1:8093
    #[arg(long, default_value = "127.0.0.1:8093")]
    listen: SocketAddr,
    /// Directory for draft, outbox, and reconciliation files.
    #[arg(long, default_value = "trestle/data")]
    data_dir: PathBuf,
    /// Salt for sealing drafts at rest. Unset stores drafts in the clear.
    #[arg(long, env = "TRESTLE_DRAFT_SEAL_SALT")]
    draft_seal_salt: Option<String>,
    /// Seconds to cache the fee schedule before refetching.
    #[arg(long, default_value_t = 300, env = "TRESTLE_FEE_CACHE_TTL_SECS")]
    fee_cache_ttl_secs: u64,
    /// Override the platform share of the ticket subtotal, in basis points.
    #[arg(long, env = "TRESTLE_PLATFORM_FEE_BPS")]
    platform_fee_bps: Option<u32>,
    /// Override the platform share ceiling, in minor units.
    #[arg(long, env = "TRESTLE_PLATFORM_FEE_CAP_MINOR")]
    platform_fee_cap_minor: Option<u64>,
    /// Override the ISO country whose cards are charged the domestic rate.
    #[arg(long, env = "TRESTLE_HOME_COUNTRY")]
    home_country: Option<String>,
    /// Registration persistence backend. `auto` picks postgres when a database url is configured.
    #[arg(long, value_enum, default_value_t = RegistrationStorageMode::Auto, env = "TRESTLE_REGISTRATION_STORAGE")]
    registration_storage: RegistrationStorageMode,
    /// PostgreSQL url for registration persistence.
    #[arg(long, env = "TRESTLE_DATABASE_URL")]
    database_url: Option<String>,
    /// Max PostgreSQL pool connections for registration persistence.
    #[arg(long, default_value_t = 5, env = "TRESTLE_PG_MAX_CONNECTIONS")]
    pg_max_connections: u32,
}

fn resolve_fee_schedule(cli: &Cli) -> FeeSchedule {
    let mut schedule = FeeSchedule::default();
    if let Some(bps) = cli.platform_fee_bps {
        schedule.platform_rate_bps = bps;
    }
    if let Some(cap) = cli.platform_fee_cap_minor {
        schedule.platform_cap_minor = cap;
    }
    if let Some(country) = &cli.home_country {
        schedule.home_country = country.clone();
    }
    schedule
}

fn resolve_registration_storage(cli: &Cli) -> anyhow::Result<RegistrationStorageConfig> {
    let resolved_url = cli
        .database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok());

    let storage = match cli.registration_storage {
        RegistrationStorageMode::Memory => RegistrationStorageConfig::Memory,
        RegistrationStorageMode::Postgres => {
            let database_url = resolved_url.ok_or_else(|| {
                anyhow::anyhow!(
                    "registration_storage=postgres requires --database-url or DATABASE_URL"
                )
            })?;
            RegistrationStorageConfig::postgres(database_url, cli.pg_max_connections)
        }
        RegistrationStorageMode::Auto => {
            if let Some(database_url) = resolved_url {
                RegistrationStorageConfig::postgres(database_url, cli.pg_max_connections)
            } else {
                RegistrationStorageConfig::Memory
            }
        }
    };

    Ok(storage)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "trestle_service=info,info".to_string()),
        )
        .init();

    let cli = Cli::parse();
    let registration_storage = resolve_registration_storage(&cli)?;
    let fee_schedule = resolve_fee_schedule(&cli);
    let config = ServiceConfig {
        data_dir: cli.data_dir,
        registration_storage,
        draft_seal_salt: cli.draft_seal_salt,
        fee_cache_ttl: Duration::from_secs(cli.fee_cache_ttl_secs),
        fee_schedule,
    };
    let state = ServiceState::bootstrap(config).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!("trestle-service listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

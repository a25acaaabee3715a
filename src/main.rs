use blog_accounts::core::api::{AppState, router};
use blog_accounts::core::auth::{AuthState, JwtService};
use blog_accounts::core::cache::{
    MemoryUserCache, RedisUserCache, UserCache, create_redis_pool,
};
use blog_accounts::core::config::Config;
use blog_accounts::core::db::{
    MemoryUserStore, PgUserStore, UserRepository, UserStore, create_pool_with_migrations,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Load .env file (if exists)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;

    // Log config status (without revealing secrets)
    tracing::info!(
        "Config loaded: database={}, redis={}, secret_key={}",
        config.has_database(),
        config.has_redis(),
        config.has_secret_key()
    );

    match config.db_config() {
        Some(db_config) => {
            let pool = create_pool_with_migrations(&db_config).await?;
            with_cache(&config, PgUserStore::new(pool)).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set, users are kept in memory");
            with_cache(&config, MemoryUserStore::new()).await
        }
    }
}

async fn with_cache<S: UserStore>(config: &Config, store: S) -> Result<(), BoxError> {
    let Some(redis_config) = config.redis_config() else {
        tracing::warn!("REDIS_URL not set, using in-process cache");
        return serve(config, store, MemoryUserCache::new()).await;
    };

    match create_redis_pool(&redis_config).await {
        Ok(pool) => serve(config, store, RedisUserCache::new(pool)).await,
        Err(e) => {
            tracing::warn!("Redis unavailable ({}), falling back to in-process cache", e);
            serve(config, store, MemoryUserCache::new()).await
        }
    }
}

async fn serve<S: UserStore, C: UserCache>(
    config: &Config,
    store: S,
    cache: C,
) -> Result<(), BoxError> {
    let repository = UserRepository::new(store, cache).with_bcrypt_cost(config.bcrypt_cost);
    let auth = AuthState::new(JwtService::new(config.jwt_config()?), config.auth_settings());
    let app = router(AppState::new(repository, auth));

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    tracing::info!("listening on http://{}", config.server_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}

use axum::serve;
use beneficiary_registry::api::handlers::AppContext;
use beneficiary_registry::config::AppConfig;
use beneficiary_registry::store::MemoryStore;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    use env_logger::Builder;
    use log::LevelFilter;

    Builder::new().filter_level(LevelFilter::Info).init();

    println!("Beneficiary Registry: individual/household import service");

    let config = AppConfig::load()?;
    println!(
        "Configuration loaded: server={}:{}",
        config.server.host, config.server.port
    );
    println!(
        "Maker-checker: import={} update={}",
        config.import.enable_maker_checker_import, config.import.enable_maker_checker_update
    );

    let store = Arc::new(MemoryStore::new());
    let context = AppContext::new(store, config.clone())?;
    let app = beneficiary_registry::api::routes::create_router().with_state(context);

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    println!(
        "Beneficiary Registry server running on http://{}",
        bind_address
    );

    serve(listener, app).await?;

    Ok(())
}

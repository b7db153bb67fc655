pub mod api;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod store;

// Export API types
pub use api::handlers;
pub use api::routes;

// Export the service layer
pub use logic::{
    ApprovalBridge, FileUpload, GroupAlignmentService, GroupingService, ImportAction,
    ImportService, ImportWorkflow, LoaderRegistry, MergeEngine, MergeReport, MergeScope,
    RuleOutcome, RuleRegistry, UploadValidator, ValidationSummary, WorkflowExecutor,
    WorkflowOutcome, WorkflowRegistry,
};

pub use error::PipelineError;

// Export all model types
pub use model::*;

// Export store types
pub use store::{MemoryStore, Store};

/// Run the import service with in-memory persistence, for embedding in
/// integration harnesses.
pub async fn run_server() -> anyhow::Result<()> {
    use axum::serve;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();

    let config = crate::config::AppConfig::load()?;
    let store = Arc::new(crate::store::MemoryStore::new());
    let context = crate::api::handlers::AppContext::new(store, config.clone())?;
    let app = crate::api::routes::create_router().with_state(context);

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;

    serve(listener, app).await?;

    Ok(())
}

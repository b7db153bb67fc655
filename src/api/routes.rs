use axum::{
    routing::{delete, get, patch, post},
    Router,
};

use crate::api::handlers::{self, AppState};
use crate::store::traits::Store;

pub fn create_router<S: Store + 'static>() -> Router<AppState<S>> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Ingestion entry point and upload lifecycle
        .route("/imports", post(handlers::import_individuals::<S>))
        .route("/imports/:upload_id", get(handlers::get_upload_status::<S>))
        .route(
            "/imports/:upload_id/invalid-items",
            get(handlers::download_invalid_items::<S>),
        )
        // Callback surface for the external approval system
        .route(
            "/tasks/:task_id/decisions",
            post(handlers::post_task_decisions::<S>),
        )
        // Canonical entities
        .route("/individuals", get(handlers::list_individuals::<S>))
        .route("/groups", post(handlers::create_group_with_member::<S>))
        .route("/groups/:group_id", get(handlers::get_group::<S>))
        .route("/groups/:group_id", delete(handlers::delete_group::<S>))
        .route(
            "/groups/:group_id/members",
            post(handlers::create_group_membership::<S>),
        )
        .route(
            "/memberships/:membership_id",
            patch(handlers::update_group_membership::<S>),
        )
        .route(
            "/memberships/:membership_id",
            delete(handlers::delete_group_membership::<S>),
        )
}

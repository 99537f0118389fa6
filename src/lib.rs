use crate::cli::Args;
use crate::storage::ArtifactStore;
use anyhow::Context;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use deadpool_diesel::Runtime;
use deadpool_diesel::postgres::{Manager, Pool};
use tracing::info;

pub mod cli;
pub mod model;
pub mod payloads;
pub mod response;
pub mod schema;
pub mod storage;

mod api;
mod errors;
mod identity;

/// State shared by every handler: the database pool and the artifact store.
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub store: ArtifactStore,
}

pub fn init_router(args: &Args) -> anyhow::Result<Router> {
    info!("Initializing database pool...");
    let pool = init_pool(&args.connection_str, args.db_pool_max_size)
        .context("Failed to initialize database pool")?;

    info!("Initializing artifact store at {}...", args.base_store);
    let store = ArtifactStore::new(&args.base_store, args.max_buffer_size);

    info!("Initializing router...");
    Ok(init_router_internal(AppState { pool, store }))
}

pub fn init_test_router(pool: Pool, store: ArtifactStore) -> Router {
    init_router_internal(AppState { pool, store })
}

fn init_router_internal(state: AppState) -> Router {
    // Upload caps are enforced after the write, against bytes on disk, so the
    // framework body limit stays off.
    Router::new()
        .route(
            "/assignments",
            get(api::assignment::list_assignments).post(api::not_implemented),
        )
        .route(
            "/assignment",
            get(api::assignment::fetch_assignment)
                .post(api::assignment::release_assignment)
                .delete(api::assignment::delete_assignment),
        )
        .route(
            "/submission",
            get(api::not_implemented).post(api::submission::submit_assignment),
        )
        .route(
            "/collections",
            get(api::collection::list_collections).post(api::not_implemented),
        )
        .route(
            "/collection",
            get(api::collection::download_collection).post(api::not_implemented),
        )
        .route(
            "/feedback",
            get(api::feedback::fetch_feedback).post(api::feedback::release_feedback),
        )
        .route(
            "/history",
            get(api::history::view_history).post(api::not_implemented),
        )
        .fallback(api::unknown_route)
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

fn init_pool(conn_str: &str, max_size: u32) -> anyhow::Result<Pool> {
    let manager = Manager::new(conn_str, Runtime::Tokio1);
    let pool = Pool::builder(manager).max_size(max_size as usize).build()?;
    Ok(pool)
}

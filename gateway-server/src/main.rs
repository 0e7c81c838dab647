//! Binary entry point for the gateway process: load configuration, wire
//! tracing, bootstrap [`gateway_core::state::AppState`], build the HTTP
//! router and serve it until a shutdown signal drains in-flight requests.

use gateway_core::config::Config;
use gateway_core::error::Result;
use gateway_core::observability::init_tracing;
use gateway_core::server::{build_router, Server};
use gateway_core::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config)?;

    let state = AppState::bootstrap(config).await?;
    let app = build_router(state.clone());

    Server::new(state.config().clone()).serve(app).await
}

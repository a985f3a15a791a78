use crm_server::{init_tracing, router, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let config = ServerConfig::from_env();
    let state = config.state()?;
    if state.token.is_none() {
        tracing::warn!("CRM_API_TOKEN not set; API is unauthenticated");
    }

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    tracing::info!(bind = %config.bind, db = %config.db_path, "crm-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}

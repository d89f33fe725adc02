pub mod config;
pub mod integrations;
pub mod server;
pub mod submission;
pub mod workflow;

use std::sync::Arc;

use integrations::crm::AmoCrmClient;
use integrations::oauth::{Credentials, OAuthClient, TokenStore};
use workflow::IntegrationWorkflow;

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // ─── State Management ────────────────────────────────────────
    let app_data = config::AppConfig::data_dir();
    std::fs::create_dir_all(&app_data).ok();
    let app_config = config::AppConfig::load(&app_data);

    // Credentials: load -> inject -> refresh -> persist
    let token_store = TokenStore::new(app_config.token_path(&app_data));
    let token = token_store.load().unwrap_or_else(|e| {
        log::warn!("Ignoring unreadable token file {}: {}", token_store.path().display(), e);
        None
    });
    if token.is_none() {
        log::warn!("No CRM token yet; open /oauth/install to connect an account");
    }

    let oauth = OAuthClient::new(
        &app_config.client_id,
        &app_config.client_secret,
        &app_config.redirect_uri,
    );
    let credentials = Arc::new(Credentials::new(oauth, token).on_refresh(move |token| {
        if let Err(e) = token_store.save(token) {
            log::error!("Failed to persist CRM token: {}", e);
        }
    }));

    // CRM gateway and workflow
    let gateway = Arc::new(AmoCrmClient::new(Arc::clone(&credentials)));
    let workflow = Arc::new(IntegrationWorkflow::new(
        gateway,
        app_config.workflow_settings(),
    ));

    // ─── HTTP ────────────────────────────────────────────────────
    let state = server::AppState::new(workflow, credentials);
    let listener = tokio::net::TcpListener::bind(&app_config.bind_addr).await?;
    log::info!("lead-bridge listening on {}", app_config.bind_addr);

    axum::serve(listener, server::build_router(state)).await?;
    Ok(())
}

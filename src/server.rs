//! HTTP surface: the contact form endpoint and the OAuth install flow.

use axum::{
    async_trait,
    extract::{FromRequest, Query, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use parking_lot::Mutex;
use rand::Rng;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::integrations::gateway::GatewayError;
use crate::integrations::oauth::Credentials;
use crate::submission::{SubmissionForm, ValidationError};
use crate::workflow::{IntegrationWorkflow, WorkflowError};

#[derive(Clone)]
pub struct AppState {
    pub workflow: Arc<IntegrationWorkflow>,
    pub credentials: Arc<Credentials>,
    /// OAuth `state` values handed out by `/oauth/install` and not yet used.
    pub pending_states: Arc<Mutex<HashSet<String>>>,
}

impl AppState {
    pub fn new(workflow: Arc<IntegrationWorkflow>, credentials: Arc<Credentials>) -> Self {
        Self {
            workflow,
            credentials,
            pending_states: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/contacts", post(submit_contact))
        .route("/oauth/install", get(oauth_install))
        .route("/oauth/callback", get(oauth_callback))
        .with_state(state)
}

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum AppError {
    Validation(ValidationError),
    Workflow(WorkflowError),
    BadRequest(&'static str),
}

impl From<ValidationError> for AppError {
    fn from(e: ValidationError) -> Self {
        AppError::Validation(e)
    }
}

impl From<WorkflowError> for AppError {
    fn from(e: WorkflowError) -> Self {
        AppError::Workflow(e)
    }
}

impl From<GatewayError> for AppError {
    fn from(e: GatewayError) -> Self {
        AppError::Workflow(WorkflowError::Gateway(e))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Validation(e) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(serde_json::json!({
                    "message": e.to_string(),
                    "errors": e.errors,
                })),
            )
                .into_response(),
            AppError::Workflow(WorkflowError::Gateway(e @ GatewayError::Unauthorized(_))) => {
                (StatusCode::UNAUTHORIZED, e.to_string()).into_response()
            }
            AppError::Workflow(e) => (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
        }
    }
}

// ─── Contact intake ──────────────────────────────────────────────────────────

/// Form body from either `application/json` or urlencoded requests.
pub struct ContactBody(pub SubmissionForm);

#[async_trait]
impl<S> FromRequest<S> for ContactBody
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or(false, |ct| ct.starts_with("application/json"));

        if is_json {
            let Json(form) = Json::<SubmissionForm>::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            Ok(ContactBody(form))
        } else {
            let Form(form) = Form::<SubmissionForm>::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            Ok(ContactBody(form))
        }
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn submit_contact(
    State(state): State<AppState>,
    ContactBody(form): ContactBody,
) -> Result<Response, AppError> {
    let submission = form.validate()?;
    log::info!(
        "Processing submission for {} {}",
        submission.first_name,
        submission.last_name
    );

    match state.workflow.process_submission(&submission).await {
        Ok(outcome) => {
            log::info!("Submission finished: {:?}", outcome);
            Ok((StatusCode::OK, outcome.message()).into_response())
        }
        Err(e) => {
            log::error!("Submission aborted: {}", e);
            Err(e.into())
        }
    }
}

// ─── OAuth install flow ──────────────────────────────────────────────────────

fn random_state() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[derive(Debug, Deserialize)]
pub struct InstallParams {
    button: Option<String>,
}

/// Redirects to the consent page, or with `?button` renders the install button.
async fn oauth_install(
    State(state): State<AppState>,
    Query(params): Query<InstallParams>,
) -> Response {
    let oauth_state = random_state();
    state.pending_states.lock().insert(oauth_state.clone());

    let oauth = state.credentials.oauth();
    if params.button.is_some() {
        return Html(oauth.button_html(&oauth_state)).into_response();
    }
    Redirect::to(&oauth.authorize_url(&oauth_state)).into_response()
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    referer: Option<String>,
    from_widget: Option<String>,
}

async fn oauth_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<String, AppError> {
    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or(AppError::BadRequest("Missing authorization code"))?;

    if params.from_widget.is_none() {
        let known = params
            .state
            .map_or(false, |s| state.pending_states.lock().remove(&s));
        if !known {
            return Err(AppError::BadRequest("Invalid state"));
        }
    }

    let base_domain = params
        .referer
        .filter(|r| !r.is_empty())
        .ok_or(AppError::BadRequest("Missing account domain"))?;

    let token = state
        .credentials
        .oauth()
        .exchange_code(&base_domain, &code)
        .await?;
    state.credentials.install(token.clone()).await;

    let name = state.credentials.oauth().account_name(&token).await?;
    Ok(format!("Hello, {}!", name))
}

use std::collections::HashMap;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use invar_config::AuthTokenEntry;
use invar_domain::Context;
use serde_json::json;

use crate::state::AppState;

/// Resolves a bearer token to a request identity. Real token validation is
/// an external collaborator; this is the seam it plugs into.
pub trait Authenticator: Send + Sync + 'static {
    fn authenticate(&self, token: &str) -> Option<Context>;
}

/// Token table from configuration. Suitable for tests and small
/// single-tenant deployments.
#[derive(Debug, Default)]
pub struct StaticAuthenticator {
    tokens: HashMap<String, Context>,
}

impl StaticAuthenticator {
    pub fn from_config(auth: &HashMap<String, AuthTokenEntry>) -> Self {
        let tokens = auth
            .iter()
            .map(|(token, entry)| {
                (
                    token.clone(),
                    Context {
                        user_id: Some(entry.user_id.clone()),
                        project_id: Some(entry.project_id.clone()),
                        roles: entry.roles.clone(),
                    },
                )
            })
            .collect();
        Self { tokens }
    }

    pub fn with_token(mut self, token: impl Into<String>, context: Context) -> Self {
        self.tokens.insert(token.into(), context);
        self
    }
}

impl Authenticator for StaticAuthenticator {
    fn authenticate(&self, token: &str) -> Option<Context> {
        self.tokens.get(token).cloned()
    }
}

/// Axum middleware requiring a valid `Authorization: Bearer <token>` header.
/// The resolved [`Context`] is attached to the request for handlers.
pub async fn require_bearer_token(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let context = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .and_then(|token| state.authenticator.authenticate(token));

    match context {
        Some(context) => {
            request.extensions_mut().insert(context);
            next.run(request).await
        }
        None => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Authentication required"})),
        )
            .into_response(),
    }
}

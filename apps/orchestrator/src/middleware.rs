// [apps/orchestrator/src/middleware.rs]
//! Authentication guard. How a caller proved who they are — wallet
//! signature, JWT, SSO — is a collaborator outside this kernel; the core
//! only needs a stable opaque identifier per request. A bearer token equal
//! to `NODE_AUTH_TOKEN` identifies a node; any other non-empty bearer token
//! is the caller's own opaque `owner_id`, carried through unexamined.

use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

/// The authenticated principal behind a request, injected as a request
/// extension by [`auth_guard`] and pulled out by handlers via `Extension`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallerIdentity {
    Node,
    Owner(String),
}

impl CallerIdentity {
    pub fn owner_id(&self) -> Option<&str> {
        match self {
            Self::Owner(id) => Some(id.as_str()),
            Self::Node => None,
        }
    }

    pub fn is_node(&self) -> bool {
        matches!(self, Self::Node)
    }
}

pub async fn auth_guard(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let Some(token) = token else { return Err(StatusCode::UNAUTHORIZED) };

    let node_token = std::env::var("NODE_AUTH_TOKEN").unwrap_or_default();
    let identity = if !node_token.is_empty() && token == node_token {
        CallerIdentity::Node
    } else {
        CallerIdentity::Owner(token.to_string())
    };

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

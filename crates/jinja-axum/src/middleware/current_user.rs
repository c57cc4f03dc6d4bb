use axum::{
    extract::{FromRequestParts, Request, State},
    http::{Method, StatusCode, request::Parts},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::SignedCookieJar;
use jinja_axum_core::escape::url_escape;
use serde::{Deserialize, Serialize};

use crate::AppState;

/// The logged-in user, decoded from the signed login cookie
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentUser(pub serde_json::Value);

/// Current user middleware
///
/// Reads the signed `login_cookie` and puts a `CurrentUser` in the request
/// extensions when it verifies. Never rejects a request.
pub async fn current_user_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let jar = SignedCookieJar::from_headers(request.headers(), state.key.clone());

    if let Some(cookie) = jar.get(&state.settings.login_cookie) {
        // plain strings are accepted as user names
        let user = serde_json::from_str(cookie.value())
            .unwrap_or_else(|_| serde_json::Value::String(cookie.value().to_string()));
        tracing::debug!("Authenticated request as {}", user);
        request.extensions_mut().insert(CurrentUser(user));
    }

    next.run(request).await
}

/// Extractor for routes that need a logged-in user
///
/// Anonymous GET/HEAD requests are redirected to `login_url` with a `next`
/// parameter, other methods get 403. Without a `login_url` the answer is 401.
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Response> {
        if let Some(user) = parts.extensions.get::<CurrentUser>() {
            return Ok(user.clone());
        }

        let Some(login_url) = &state.settings.login_url else {
            return Err((StatusCode::UNAUTHORIZED, "Authentication required").into_response());
        };

        if parts.method == Method::GET || parts.method == Method::HEAD {
            let next = parts
                .uri
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");
            let separator = if login_url.contains('?') { '&' } else { '?' };
            let target = format!("{}{}next={}", login_url, separator, url_escape(next, true));
            Err(Redirect::to(&target).into_response())
        } else {
            Err(StatusCode::FORBIDDEN.into_response())
        }
    }
}

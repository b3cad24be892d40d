//! `/oauth/authorize`, `/oauth/authorize/consent`, `/oauth/token`, `/oauth/revoke`.
//!
//! Unlike the rest of the API these routes sit outside the bearer-auth
//! layer — their entire job is minting the bearer tokens that layer checks.

use axum::extract::{Query, State};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::error::{ApiResult, PocketPawError};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct AuthorizeQuery {
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub scope: String,
    pub code_challenge: String,
    #[serde(default = "default_challenge_method")]
    pub code_challenge_method: String,
    pub state: Option<String>,
}

fn default_challenge_method() -> String {
    "S256".to_string()
}

/// `GET /oauth/authorize` — render a minimal consent page. The pack carries
/// no HTML templating crate, so this is a hand-written fragment; it posts
/// straight back to `/oauth/authorize/consent` with the same parameters.
pub async fn authorize(Query(query): Query<AuthorizeQuery>) -> Html<String> {
    let page = format!(
        r#"<!DOCTYPE html>
<html><body>
<h1>Authorize {client_id}</h1>
<p>Requested scope: <code>{scope}</code></p>
<form method="post" action="/oauth/authorize/consent">
<input type="hidden" name="client_id" value="{client_id}">
<input type="hidden" name="redirect_uri" value="{redirect_uri}">
<input type="hidden" name="scope" value="{scope}">
<input type="hidden" name="code_challenge" value="{code_challenge}">
<input type="hidden" name="code_challenge_method" value="{code_challenge_method}">
<input type="hidden" name="state" value="{state}">
<button type="submit">Allow</button>
</form>
</body></html>"#,
        client_id = query.client_id,
        scope = query.scope,
        redirect_uri = query.redirect_uri,
        code_challenge = query.code_challenge,
        code_challenge_method = query.code_challenge_method,
        state = query.state.unwrap_or_default(),
    );
    Html(page)
}

#[derive(Deserialize)]
pub struct ConsentForm {
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub scope: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
    #[serde(default)]
    pub state: String,
}

/// `POST /oauth/authorize/consent` — user approved; issue a code and
/// redirect back to the client's `redirect_uri`.
pub async fn consent(
    State(state): State<AppState>,
    axum::extract::Form(form): axum::extract::Form<ConsentForm>,
) -> Response {
    let code = state
        .oauth
        .authorize(
            form.client_id,
            form.redirect_uri.clone(),
            form.scope,
            form.code_challenge,
            form.code_challenge_method,
        )
        .await;

    let mut location = format!("{}?code={code}", form.redirect_uri);
    if !form.state.is_empty() {
        location.push_str(&format!("&state={}", form.state));
    }
    Redirect::to(&location).into_response()
}

#[derive(Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    pub code: String,
    pub code_verifier: String,
    pub client_id: String,
}

/// `POST /oauth/token` — exchange an authorization code for a token pair.
pub async fn token(
    State(state): State<AppState>,
    axum::extract::Form(body): axum::extract::Form<TokenRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if body.grant_type != "authorization_code" {
        return Err(PocketPawError::Protocol(format!("unsupported grant_type '{}'", body.grant_type)).into());
    }

    let result = state
        .oauth
        .exchange(&body.code, &body.code_verifier, &body.client_id)
        .await
        .map_err(|e| PocketPawError::Authorization(e.to_string()))?;

    Ok(Json(json!({
        "access_token": result.access_token,
        "refresh_token": result.refresh_token,
        "token_type": "Bearer",
        "expires_in": (result.expires_at - result.created_at).num_seconds(),
        "scope": result.scope,
    })))
}

#[derive(Deserialize)]
pub struct RevokeRequest {
    pub token: String,
}

/// `POST /oauth/revoke` — revoke an access token.
pub async fn revoke(
    State(state): State<AppState>,
    axum::extract::Form(body): axum::extract::Form<RevokeRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let revoked = state.oauth.revoke(&body.token).await;
    Ok(Json(json!({"revoked": revoked})))
}

//! HTTP routes and handlers for the authorization-code flow

use axum::extract::{Path, Query, RawQuery, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use qrcode::QrCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};
use uuid::Uuid;

use pairsign_core::Error;
use pairsign_oidc::keys::IdTokenClaims;
use pairsign_web::Assets;

use crate::state::AppState;
use crate::websocket;

// ===== Router =====

/// Build the complete application router
pub fn create_router(state: Arc<AppState>) -> Router {
    // Discovery documents get permissive CORS so browser-based relying
    // parties can fetch them cross-origin.
    let discovery = Router::new()
        .route("/.well-known/openid-configuration", get(openid_configuration))
        .route("/.well-known/jwks.json", get(jwks))
        .layer(CorsLayer::permissive());

    Router::new()
        .route("/", get(index_page))
        .route("/callback", get(callback_page))
        .route("/style.css", get(stylesheet))
        .route("/authorize", get(authorize_start))
        .route("/authorize/:session_id", get(authorize_page))
        .route("/authorize/:session_id/ws", get(websocket::primary_ws))
        .route("/authorize/:session_id/external", get(external_page))
        .route("/authorize/:session_id/external/ws", get(websocket::external_ws))
        .route("/authorize/:session_id/external/login", post(external_login))
        .route("/login", post(login))
        .route("/token", post(token))
        .route("/userinfo", get(userinfo))
        .route("/qrcode/:session_id", get(qrcode_svg))
        .route("/api/clients", get(list_clients))
        .route("/api/users", get(list_users))
        .route("/api/user-check/:email", get(user_check))
        .merge(discovery)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ===== Authorization flow =====

#[derive(Debug, Deserialize)]
struct AuthorizeParams {
    client_id: Option<String>,
    redirect_uri: Option<String>,
    response_type: Option<String>,
}

fn validate_authorize(params: &AuthorizeParams) -> Result<(), Response> {
    let present = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.is_empty());
    if present(&params.client_id)
        && present(&params.redirect_uri)
        && params.response_type.as_deref() == Some("code")
    {
        Ok(())
    } else {
        Err((StatusCode::BAD_REQUEST, "Invalid request").into_response())
    }
}

/// Allocate a pairing session and redirect into the per-session page,
/// carrying the original query along
async fn authorize_start(
    Query(params): Query<AuthorizeParams>,
    RawQuery(raw): RawQuery,
) -> Response {
    if let Err(response) = validate_authorize(&params) {
        return response;
    }
    let session_id = Uuid::new_v4().to_string();
    debug!("Starting authorization session {}", session_id);
    let location = match raw {
        Some(query) => format!("/authorize/{}?{}", session_id, query),
        None => format!("/authorize/{}", session_id),
    };
    redirect_found(&location)
}

/// Serve the primary device page for a pairing session
async fn authorize_page(Query(params): Query<AuthorizeParams>) -> Response {
    if let Err(response) = validate_authorize(&params) {
        return response;
    }
    serve_asset("authorize.html")
}

/// Serve the external device page. It takes no query parameters; the page
/// asks the primary device for the OAuth parameters over the session socket.
async fn external_page() -> Response {
    serve_asset("authorize-external.html")
}

// ===== Login =====

#[derive(Debug, Deserialize)]
struct LoginForm {
    email: Option<String>,
    password: Option<String>,
    client_id: Option<String>,
    redirect_uri: Option<String>,
    state: Option<String>,
}

/// Validate a login form and mint an authorization code.
/// Unknown user and wrong password produce the same answer.
async fn authenticate(state: &AppState, form: &LoginForm) -> Result<String, Response> {
    let required = |value: &Option<String>| {
        value.as_deref().filter(|v| !v.is_empty()).map(str::to_string)
    };
    let (Some(email), Some(password), Some(client_id), Some(redirect_uri)) = (
        required(&form.email),
        required(&form.password),
        required(&form.client_id),
        required(&form.redirect_uri),
    ) else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": "Missing parameters" })),
        )
            .into_response());
    };

    let user = state
        .credentials
        .user(&email)
        .await
        .map_err(internal_error_response)?;
    let Some(user) = user.filter(|u| u.verify_password(&password)) else {
        debug!("Login failed for {}", email);
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "success": false, "error": "Invalid credentials" })),
        )
            .into_response());
    };

    let code = state
        .credentials
        .issue_code(&client_id, &redirect_uri, &user)
        .await
        .map_err(internal_error_response)?;
    debug!("Issued authorization code for {}", email);
    Ok(code)
}

/// Handle a same-device login and send the browser straight back to the
/// relying party with the code
async fn login(State(state): State<Arc<AppState>>, Form(form): Form<LoginForm>) -> Response {
    match authenticate(&state, &form).await {
        Ok(code) => {
            let redirect_uri = form.redirect_uri.as_deref().unwrap_or_default();
            let location = append_code(redirect_uri, &code, form.state.as_deref());
            redirect_found(&location)
        }
        Err(response) => response,
    }
}

/// Complete an external device login. The page relays the returned code to
/// the primary device through its WebSocket.
async fn external_login(
    State(state): State<Arc<AppState>>,
    Path(_session_id): Path<String>,
    Form(form): Form<LoginForm>,
) -> Response {
    match authenticate(&state, &form).await {
        Ok(code) => Json(json!({ "success": true, "code": code })).into_response(),
        Err(response) => response,
    }
}

// ===== Token & userinfo =====

#[derive(Debug, Deserialize)]
struct TokenForm {
    grant_type: Option<String>,
    code: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    redirect_uri: Option<String>,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    access_token: String,
    token_type: String,
    expires_in: u64,
    id_token: String,
    scope: String,
}

/// Exchange an authorization code for an access token and ID token
async fn token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<TokenForm>,
) -> Response {
    match exchange_code(&state, &headers, &form).await {
        Ok(tokens) => Json(tokens).into_response(),
        Err(err) => oauth_error_response(err),
    }
}

async fn exchange_code(
    state: &AppState,
    headers: &HeaderMap,
    form: &TokenForm,
) -> pairsign_core::Result<TokenResponse> {
    if form.grant_type.as_deref() != Some("authorization_code") {
        return Err(Error::UnsupportedGrantType(
            form.grant_type.clone().unwrap_or_default(),
        ));
    }

    let code = form.code.as_deref().unwrap_or_default();
    let record = state
        .credentials
        .code(code)
        .await?
        .ok_or_else(|| Error::InvalidGrant("unknown authorization code".to_string()))?;

    if let Some(client_id) = form.client_id.as_deref() {
        if client_id != record.client_id {
            return Err(Error::InvalidGrant("client mismatch".to_string()));
        }
    }

    if let Some(client_secret) = form.client_secret.as_deref().filter(|s| !s.is_empty()) {
        let client = state
            .credentials
            .client(&record.client_id)
            .await?
            .ok_or_else(|| Error::InvalidClient("Client not found".to_string()))?;
        if client.client_secret.as_deref() != Some(client_secret) {
            return Err(Error::InvalidClient("Invalid client credentials".to_string()));
        }
    }

    if form.redirect_uri.as_deref() != Some(record.redirect_uri.as_str()) {
        return Err(Error::InvalidGrant("redirect_uri mismatch".to_string()));
    }

    if record.is_expired() {
        return Err(Error::InvalidGrant("authorization code expired".to_string()));
    }

    // Single use: the delete reports whether this call removed the code, so
    // of two racing exchanges only the winner mints tokens.
    if !state.credentials.consume_code(code).await? {
        return Err(Error::InvalidGrant("authorization code already used".to_string()));
    }

    let access_token = state
        .credentials
        .issue_access_token(&record.sub, &record.email)
        .await?;

    let iat = chrono::Utc::now().timestamp();
    let claims = IdTokenClaims {
        iss: state.issuer(headers),
        sub: record.sub.clone(),
        aud: record.client_id.clone(),
        exp: iat + 3600,
        iat,
        email: record.email.clone(),
    };
    let id_token = state.keys.sign_id_token(&claims).await?;

    Ok(TokenResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: 3600,
        id_token,
        scope: "openid profile email".to_string(),
    })
}

/// Return profile claims for a bearer access token
async fn userinfo(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    let Some(token) = token else {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    };

    match state.credentials.access_token(token).await {
        Ok(Some(record)) if !record.is_expired() => {
            Json(json!({ "sub": record.sub, "email": record.email })).into_response()
        }
        Ok(_) => (StatusCode::UNAUTHORIZED, "Unauthorized").into_response(),
        Err(err) => internal_error_response(err),
    }
}

// ===== Discovery =====

/// Serve the OpenID Connect discovery document
async fn openid_configuration(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Json<Value> {
    let issuer = state.issuer(&headers);
    Json(json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{}/authorize", issuer),
        "token_endpoint": format!("{}/token", issuer),
        "userinfo_endpoint": format!("{}/userinfo", issuer),
        "jwks_uri": format!("{}/.well-known/jwks.json", issuer),
        "response_types_supported": ["code"],
        "subject_types_supported": ["public"],
        "id_token_signing_alg_values_supported": ["RS256"],
        "scopes_supported": ["openid", "profile", "email"],
        "token_endpoint_auth_methods_supported": ["client_secret_post"],
        "claims_supported": ["sub", "name", "email", "email_verified", "preferred_username"],
    }))
}

/// Publish the signing key set clients use to verify ID tokens
async fn jwks(State(state): State<Arc<AppState>>) -> Response {
    match state.keys.jwks().await {
        Ok(jwks) => Json(jwks).into_response(),
        Err(err) => internal_error_response(err),
    }
}

// ===== QR code =====

/// Render an SVG QR code pointing the external device at this session's
/// login page
async fn qrcode_svg(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Response {
    let url = format!(
        "{}/authorize/{}/external",
        state.issuer(&headers),
        session_id
    );
    match render_qr_svg(&url) {
        Ok(svg) => (
            [
                (header::CONTENT_TYPE, "image/svg+xml"),
                (header::CACHE_CONTROL, "public, max-age=3600"),
            ],
            svg,
        )
            .into_response(),
        Err(err) => {
            error!("QR encoding failed for session {}: {}", session_id, err);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to generate QR code").into_response()
        }
    }
}

fn render_qr_svg(data: &str) -> Result<String, qrcode::types::QrError> {
    let code = QrCode::new(data.as_bytes())?;
    Ok(code
        .render::<qrcode::render::svg::Color>()
        .min_dimensions(240, 240)
        .build())
}

// ===== Admin APIs =====

/// List registered clients with secrets omitted
async fn list_clients(State(state): State<Arc<AppState>>) -> Response {
    match state.credentials.list_clients().await {
        Ok(clients) => {
            let clients: Vec<Value> = clients
                .into_iter()
                .map(|(client, uploaded_at)| {
                    json!({
                        "client_id": client.client_id,
                        "redirect_uris": client.redirect_uris,
                        "created_at": client.created_at.unwrap_or(uploaded_at),
                    })
                })
                .collect();
            Json(json!({ "clients": clients })).into_response()
        }
        Err(err) => internal_error_response(err),
    }
}

/// List registered users
async fn list_users(State(state): State<Arc<AppState>>) -> Response {
    match state.credentials.list_users().await {
        Ok(users) => {
            let users: Vec<Value> = users
                .into_iter()
                .map(|(user, uploaded_at)| {
                    json!({ "email": user.email, "created_at": uploaded_at })
                })
                .collect();
            Json(json!({ "users": users })).into_response()
        }
        Err(err) => internal_error_response(err),
    }
}

/// Report whether a user exists for the given email
async fn user_check(State(state): State<Arc<AppState>>, Path(email): Path<String>) -> Response {
    match state.credentials.user(&email).await {
        Ok(user) => Json(json!({ "exists": user.is_some(), "email": email })).into_response(),
        Err(err) => internal_error_response(err),
    }
}

// ===== Pages =====

async fn index_page() -> Response {
    serve_asset("index.html")
}

async fn callback_page() -> Response {
    serve_asset("callback.html")
}

async fn stylesheet() -> Response {
    serve_asset("style.css")
}

// ===== Helpers =====

fn serve_asset(path: &str) -> Response {
    match Assets::get(path) {
        Some(content) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            (
                [(header::CONTENT_TYPE, mime.as_ref())],
                content.data.into_owned(),
            )
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

/// Plain 302; `Redirect::to` answers 303, which is not what OAuth clients
/// and the embedded pages expect here.
fn redirect_found(location: &str) -> Response {
    (
        StatusCode::FOUND,
        [(header::LOCATION, location.to_string())],
    )
        .into_response()
}

/// Append `code` (and `state`) to a redirect URI that may already carry a
/// query string
fn append_code(redirect_uri: &str, code: &str, state: Option<&str>) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    query.append_pair("code", code);
    if let Some(state) = state.filter(|s| !s.is_empty()) {
        query.append_pair("state", state);
    }
    let separator = if redirect_uri.contains('?') { '&' } else { '?' };
    format!("{}{}{}", redirect_uri, separator, query.finish())
}

fn oauth_error_response(err: Error) -> Response {
    let (status, code, description) = match &err {
        Error::UnsupportedGrantType(_) => (StatusCode::BAD_REQUEST, "unsupported_grant_type", None),
        Error::InvalidGrant(_) => (StatusCode::BAD_REQUEST, "invalid_grant", None),
        Error::InvalidRequest(reason) => {
            (StatusCode::BAD_REQUEST, "invalid_request", Some(reason.clone()))
        }
        Error::InvalidClient(reason) => {
            (StatusCode::UNAUTHORIZED, "invalid_client", Some(reason.clone()))
        }
        _ => {
            error!("Token exchange failed: {}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None)
        }
    };
    let mut body = json!({ "error": code });
    if let Some(description) = description {
        body["error_description"] = json!(description);
    }
    (status, Json(body)).into_response()
}

fn internal_error_response(err: Error) -> Response {
    error!("Request failed: {}", err);
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_code_handles_existing_query() {
        assert_eq!(
            append_code("https://app/cb", "abc", None),
            "https://app/cb?code=abc"
        );
        assert_eq!(
            append_code("https://app/cb?foo=1", "abc", Some("s1")),
            "https://app/cb?foo=1&code=abc&state=s1"
        );
    }

    #[test]
    fn test_append_code_escapes_values() {
        let url = append_code("https://app/cb", "a b&c", Some("x/y"));
        assert_eq!(url, "https://app/cb?code=a+b%26c&state=x%2Fy");
    }

    #[test]
    fn test_validate_authorize() {
        let ok = AuthorizeParams {
            client_id: Some("c".to_string()),
            redirect_uri: Some("https://app/cb".to_string()),
            response_type: Some("code".to_string()),
        };
        assert!(validate_authorize(&ok).is_ok());

        let wrong_type = AuthorizeParams {
            response_type: Some("token".to_string()),
            ..ok
        };
        assert!(validate_authorize(&wrong_type).is_err());

        let missing = AuthorizeParams {
            client_id: None,
            redirect_uri: Some("https://app/cb".to_string()),
            response_type: Some("code".to_string()),
        };
        assert!(validate_authorize(&missing).is_err());
    }

    #[test]
    fn test_qr_svg_renders() {
        let svg = render_qr_svg("https://id.example.com/authorize/s1/external").unwrap();
        assert!(svg.contains("<svg"));
    }
}

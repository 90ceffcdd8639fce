use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post, put},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{
            LoginRequest, LoginResponse, MessageResponse, RefreshRequest, RefreshResponse,
            RegisterRequest, RegisterResponse, RestaurantResponse, SuspendRequest, UpdateRequest,
            UserListItem, UserProfile,
        },
        extractors::{AuthUser, Manager},
        gate::{Decision, Denial, ForwardedRequest, FORWARDED_METHOD, FORWARDED_URI, USER_HEADER},
        services::AuthService,
    },
    error::AuthError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/verify", get(verify).post(verify))
        .route("/refresh", post(refresh))
}

pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/update", put(update))
        .route("/user", get(get_me))
        .route("/delete", delete(delete_me))
        .route("/restaurant", get(refresh_restaurant))
}

pub fn manager_routes() -> Router<AppState> {
    Router::new()
        .route("/suspend", patch(suspend))
        .route("/users", get(list_users))
        .route("/user/:id", get(get_user))
        .route("/delete/:id", delete(delete_user))
}

#[instrument(skip(auth, payload))]
pub async fn register(
    State(auth): State<AuthService>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, AuthError> {
    let id = auth.register(payload).await?;
    Ok(Json(RegisterResponse {
        id,
        message: "Account created".into(),
    }))
}

#[instrument(skip(auth, payload))]
pub async fn login(
    State(auth): State<AuthService>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AuthError> {
    Ok(Json(auth.login(payload).await?))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[instrument(skip_all)]
pub async fn verify(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, Denial> {
    let forwarded = ForwardedRequest {
        uri: header(&headers, FORWARDED_URI),
        method: header(&headers, FORWARDED_METHOD),
        authorization: header(&headers, AUTHORIZATION.as_str()),
    };

    match state.gate.decide(forwarded).await? {
        Decision::Open => Ok(Json(MessageResponse::new("Access granted")).into_response()),
        Decision::Allow(identity) => {
            let value = identity
                .header_value()
                .map_err(|e| Denial::Internal(e.into()))?;
            let value = HeaderValue::from_str(&value).map_err(|e| Denial::Internal(e.into()))?;
            Ok(([(USER_HEADER, value)], Json(identity.claims)).into_response())
        }
    }
}

#[instrument(skip_all)]
pub async fn refresh(
    State(auth): State<AuthService>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, AuthError> {
    Ok(Json(auth.refresh(payload).await?))
}

#[instrument(skip(auth, payload))]
pub async fn suspend(
    State(auth): State<AuthService>,
    Manager(_): Manager,
    Json(payload): Json<SuspendRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    let user_id = payload.user_id.ok_or(AuthError::MissingFields)?;
    let state = auth.suspend_toggle(user_id).await?;
    Ok(Json(MessageResponse::new(state.message())))
}

#[instrument(skip(auth, payload))]
pub async fn update(
    State(auth): State<AuthService>,
    AuthUser(requester): AuthUser,
    Json(payload): Json<UpdateRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    auth.update(requester, payload).await?;
    Ok(Json(MessageResponse::new("User updated")))
}

#[instrument(skip(auth))]
pub async fn list_users(
    State(auth): State<AuthService>,
    Manager(_): Manager,
) -> Result<Json<Vec<UserListItem>>, AuthError> {
    Ok(Json(auth.list_users().await?))
}

#[instrument(skip(auth))]
pub async fn get_me(
    State(auth): State<AuthService>,
    AuthUser(requester): AuthUser,
) -> Result<Json<UserProfile>, AuthError> {
    Ok(Json(auth.get_profile(requester.id).await?))
}

#[instrument(skip(auth))]
pub async fn get_user(
    State(auth): State<AuthService>,
    Manager(_): Manager,
    Path(id): Path<i64>,
) -> Result<Json<UserProfile>, AuthError> {
    Ok(Json(auth.get_profile(id).await?))
}

#[instrument(skip(auth))]
pub async fn delete_me(
    State(auth): State<AuthService>,
    AuthUser(requester): AuthUser,
) -> Result<Json<MessageResponse>, AuthError> {
    auth.delete(requester.id).await?;
    Ok(Json(MessageResponse::new("User deleted")))
}

#[instrument(skip(auth))]
pub async fn delete_user(
    State(auth): State<AuthService>,
    Manager(_): Manager,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, AuthError> {
    auth.delete(id).await?;
    Ok(Json(MessageResponse::new("User deleted")))
}

#[instrument(skip(auth))]
pub async fn refresh_restaurant(
    State(auth): State<AuthService>,
    AuthUser(requester): AuthUser,
) -> Result<Json<RestaurantResponse>, AuthError> {
    let restaurant_id = auth.refresh_restaurant(requester.id).await?;
    Ok(Json(RestaurantResponse { restaurant_id }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::app::build_app;
    use crate::state::AppState;

    struct Reply {
        status: StatusCode,
        headers: HeaderMap,
        body: Value,
    }

    async fn send(app: &Router, req: Request<Body>) -> Reply {
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let headers = res.headers().clone();
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        Reply {
            status,
            headers,
            body,
        }
    }

    fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn bare_request(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    /// Registers and logs in, returning (id, access token).
    async fn signed_in(app: &Router, email: &str, role: &str) -> (i64, String) {
        let reply = send(
            app,
            json_request(
                "POST",
                "/api-auth/register",
                None,
                json!({
                    "firstName": "Zoë",
                    "lastName": "Lovelace",
                    "email": email,
                    "password": "secret",
                    "role": role,
                }),
            ),
        )
        .await;
        assert_eq!(reply.status, StatusCode::OK, "{:?}", reply.body);
        let id = reply.body["id"].as_i64().unwrap();

        let reply = send(
            app,
            json_request(
                "POST",
                "/api-auth/login",
                None,
                json!({ "email": email, "password": "secret" }),
            ),
        )
        .await;
        assert_eq!(reply.status, StatusCode::OK, "{:?}", reply.body);
        let token = reply.body["accessToken"].as_str().unwrap().to_string();
        (id, token)
    }

    fn forwarded(uri: &str, method: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("GET")
            .uri("/api-auth/verify")
            .header(FORWARDED_URI, uri)
            .header(FORWARDED_METHOD, method);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_answers() {
        let app = build_app(AppState::fake());
        let reply = send(&app, bare_request("GET", "/health", None)).await;
        assert_eq!(reply.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn register_reports_missing_fields() {
        let app = build_app(AppState::fake());
        let reply = send(
            &app,
            json_request(
                "POST",
                "/api-auth/register",
                None,
                json!({ "email": "ada@example.com" }),
            ),
        )
        .await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.body["kind"], "missing_fields");
    }

    #[tokio::test]
    async fn register_reports_unknown_role_as_business_error() {
        let app = build_app(AppState::fake());
        let reply = send(
            &app,
            json_request(
                "POST",
                "/api-auth/register",
                None,
                json!({
                    "firstName": "Ada",
                    "lastName": "Lovelace",
                    "email": "ada@example.com",
                    "password": "secret",
                    "role": "admin",
                }),
            ),
        )
        .await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.body["kind"], "invalid_role");
        assert_eq!(reply.body["message"], "Invalid role");
    }

    #[tokio::test]
    async fn verify_allows_valid_token_and_sets_identity_header() {
        let app = build_app(AppState::fake());
        let (id, token) = signed_in(&app, "ada@example.com", "user").await;

        let reply = send(&app, forwarded("/orders/7", "GET", Some(&token))).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["sub"], id.to_string());

        let header = reply.headers.get(USER_HEADER).unwrap().to_str().unwrap();
        let identity: Value = serde_json::from_str(header).unwrap();
        assert_eq!(identity["id"], id);
        assert_eq!(identity["firstName"], "Zoë");
        assert_eq!(identity["role"], "user");
        assert!(identity.get("passwordHash").is_none());
    }

    #[tokio::test]
    async fn verify_accepts_socket_token_query() {
        let app = build_app(AppState::fake());
        let (_, token) = signed_in(&app, "ada@example.com", "user").await;

        let uri = format!("/socket.io/?EIO=4&socketToken={token}");
        let reply = send(&app, forwarded(&uri, "GET", None)).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert!(reply.headers.contains_key(USER_HEADER));
    }

    #[tokio::test]
    async fn verify_passes_open_routes_without_credentials() {
        let app = build_app(AppState::fake());
        let reply = send(&app, forwarded("/api-auth/login", "POST", None)).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["message"], "Access granted");
        assert!(!reply.headers.contains_key(USER_HEADER));

        // same path, different method
        let reply = send(&app, forwarded("/api-auth/login", "GET", None)).await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn verify_denies_missing_and_bad_tokens() {
        let app = build_app(AppState::fake());

        let reply = send(&app, forwarded("/orders", "GET", None)).await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
        assert_eq!(reply.body["message"], "Access denied");

        let reply = send(&app, forwarded("/orders", "GET", Some("garbage"))).await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
        assert_eq!(reply.body["message"], "Invalid token");
    }

    #[tokio::test]
    async fn account_routes_need_a_token() {
        let app = build_app(AppState::fake());
        let reply = send(&app, bare_request("GET", "/api-auth/user", None)).await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);

        let (id, token) = signed_in(&app, "ada@example.com", "user").await;
        let reply = send(&app, bare_request("GET", "/api-auth/user", Some(&token))).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["id"], id);
        assert!(reply.body.get("refreshToken").is_none());
    }

    #[tokio::test]
    async fn manager_routes_refuse_plain_users() {
        let app = build_app(AppState::fake());
        let (user_id, user_token) = signed_in(&app, "ada@example.com", "user").await;
        let (_, manager_token) = signed_in(&app, "boss@example.com", "marketing").await;

        let reply = send(&app, bare_request("GET", "/api-auth/users", Some(&user_token))).await;
        assert_eq!(reply.status, StatusCode::FORBIDDEN);

        let reply = send(&app, bare_request("GET", "/api-auth/users", Some(&manager_token))).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body.as_array().unwrap().len(), 2);

        let reply = send(
            &app,
            json_request(
                "PATCH",
                "/api-auth/suspend",
                Some(&manager_token),
                json!({ "userId": user_id }),
            ),
        )
        .await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["message"], "User suspended");

        let reply = send(&app, forwarded("/orders", "GET", Some(&user_token))).await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
        assert_eq!(reply.body["message"], "Your account has been blocked");
    }

    #[tokio::test]
    async fn delete_self_removes_account() {
        let app = build_app(AppState::fake());
        let (_, token) = signed_in(&app, "ada@example.com", "user").await;

        let reply = send(&app, bare_request("DELETE", "/api-auth/delete", Some(&token))).await;
        assert_eq!(reply.status, StatusCode::OK);

        let reply = send(&app, forwarded("/orders", "GET", Some(&token))).await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
        assert_eq!(reply.body["message"], "Invalid token");
    }
}

use super::*;
use axum::{
    extract::Path,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;

const SESSION_COOKIE: &str = "access_token=token-123";

fn user_json(username: &str) -> Value {
    json!({
        "_id": "65a1f0c2e4b0a1b2c3d4e5f6",
        "username": username,
        "email": "a@b.com",
        "profilePicture": "https://cdn.example.com/default.png",
        "createdAt": "2024-01-01T00:00:00.000Z",
        "updatedAt": "2024-01-02T00:00:00.000Z",
        "__v": 0
    })
}

async fn handle_sign_in(Json(body): Json<SignInRequest>) -> impl IntoResponse {
    if body.password != "correct horse" {
        return (
            StatusCode::UNAUTHORIZED,
            HeaderMap::new(),
            Json(json!({ "success": false, "statusCode": 401, "message": "Invalid credentials" })),
        );
    }
    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        format!("{SESSION_COOKIE}; Path=/; HttpOnly")
            .parse()
            .expect("cookie header"),
    );
    (StatusCode::OK, headers, Json(user_json("alice")))
}

async fn handle_sign_up(Json(body): Json<SignUpRequest>) -> impl IntoResponse {
    if body.username == "taken" {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "statusCode": 500, "message": "E11000 duplicate key error" })),
        );
    }
    (
        StatusCode::CREATED,
        Json(json!({ "message": "User created successfully" })),
    )
}

async fn handle_update(
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<UpdateUserRequest>,
) -> impl IntoResponse {
    let authenticated = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains(SESSION_COOKIE));
    if !authenticated {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "success": false, "message": "You are not authenticated!" })),
        );
    }
    let mut user = user_json(body.username.as_deref().unwrap_or("alice"));
    user["_id"] = json!(id);
    user["__v"] = json!(1);
    if let Some(picture) = body.profile_picture {
        user["profilePicture"] = json!(picture);
    }
    (StatusCode::OK, Json(user))
}

async fn handle_delete(Path(_id): Path<String>) -> impl IntoResponse {
    Json(json!("User has been deleted..."))
}

async fn handle_sign_out() -> impl IntoResponse {
    Json(json!("Signout success!"))
}

async fn handle_broken() -> impl IntoResponse {
    (StatusCode::BAD_GATEWAY, "upstream unavailable")
}

async fn handle_teapot() -> impl IntoResponse {
    (StatusCode::IM_A_TEAPOT, Json(json!({ "message": "short and stout" })))
}

async fn handle_flagged_ok() -> impl IntoResponse {
    Json(json!({ "success": false, "message": "Invalid credentials" }))
}

async fn spawn_account_server() -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = Router::new()
        .route("/api/auth/signin", post(handle_sign_in))
        .route("/api/auth/signup", post(handle_sign_up))
        .route("/api/auth/signout", get(handle_sign_out))
        .route("/api/user/update/:id", post(handle_update))
        .route("/api/user/delete/:id", delete(handle_delete))
        .route("/broken/api/auth/signout", get(handle_broken))
        .route("/teapot/api/auth/signout", get(handle_teapot))
        .route("/flagged/api/auth/signin", post(handle_flagged_ok));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

fn credentials(password: &str) -> SignInRequest {
    SignInRequest {
        email: "a@b.com".to_string(),
        password: password.to_string(),
    }
}

#[tokio::test]
async fn sign_in_decodes_user_record() {
    let api = HttpAccountApi::new(spawn_account_server().await).expect("client");
    let user = api
        .sign_in(&credentials("correct horse"))
        .await
        .expect("sign in");
    assert_eq!(user.username, "alice");
    assert_eq!(user.id.as_str(), "65a1f0c2e4b0a1b2c3d4e5f6");
}

#[tokio::test]
async fn rejected_sign_in_surfaces_server_message() {
    let api = HttpAccountApi::new(spawn_account_server().await).expect("client");
    let err = api
        .sign_in(&credentials("x"))
        .await
        .expect_err("bad password");
    match err {
        ClientError::Application { message } => assert_eq!(message, "Invalid credentials"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn success_false_on_2xx_is_still_a_failure() {
    let server = spawn_account_server().await;
    let api = HttpAccountApi::new(format!("{server}/flagged")).expect("client");
    let err = api
        .sign_in(&credentials("correct horse"))
        .await
        .expect_err("envelope flag governs");
    assert!(matches!(err, ClientError::Application { .. }));
}

#[tokio::test]
async fn update_uses_session_cookie_from_sign_in() {
    let api = HttpAccountApi::new(spawn_account_server().await).expect("client");
    let user = api
        .sign_in(&credentials("correct horse"))
        .await
        .expect("sign in");

    let changes = UpdateUserRequest {
        username: Some("bob".to_string()),
        ..Default::default()
    };
    let updated = api.update_user(&user.id, &changes).await.expect("update");
    assert_eq!(updated.username, "bob");
    assert_eq!(updated.revision, 1);
}

#[tokio::test]
async fn update_without_session_is_rejected() {
    let api = HttpAccountApi::new(spawn_account_server().await).expect("client");
    let err = api
        .update_user(
            &UserId("someone".to_string()),
            &UpdateUserRequest {
                username: Some("bob".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect_err("no cookie");
    assert_eq!(err.to_string(), "You are not authenticated!");
}

#[tokio::test]
async fn delete_and_sign_out_accept_plain_string_bodies() {
    let api = HttpAccountApi::new(spawn_account_server().await).expect("client");
    api.delete_user(&UserId("65a1f0c2e4b0a1b2c3d4e5f6".to_string()))
        .await
        .expect("delete");
    api.sign_out().await.expect("sign out");
}

#[tokio::test]
async fn sign_up_reports_duplicate_accounts() {
    let api = HttpAccountApi::new(spawn_account_server().await).expect("client");
    let mut request = SignUpRequest {
        username: "newcomer".to_string(),
        email: "new@example.com".to_string(),
        password: "pw".to_string(),
    };
    api.sign_up(&request).await.expect("sign up");

    request.username = "taken".to_string();
    let err = api.sign_up(&request).await.expect_err("duplicate");
    assert!(err.to_string().contains("duplicate key"));
}

#[tokio::test]
async fn non_json_error_body_reports_status() {
    let server = spawn_account_server().await;
    let api = HttpAccountApi::new(format!("{server}/broken/")).expect("client");
    match api.sign_out().await.expect_err("bad gateway") {
        ClientError::Status(status) => assert_eq!(status, reqwest::StatusCode::BAD_GATEWAY),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn error_status_without_flag_uses_body_message() {
    let server = spawn_account_server().await;
    let api = HttpAccountApi::new(format!("{server}/teapot")).expect("client");
    let err = api.sign_out().await.expect_err("teapot");
    assert_eq!(err.to_string(), "short and stout");
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let api = HttpAccountApi::new(format!("http://{addr}")).expect("client");
    let err = api.sign_out().await.expect_err("nothing listening");
    assert!(matches!(err, ClientError::Transport(_)));
}

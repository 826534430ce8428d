use axum::http::{header::AUTHORIZATION, HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use serde_json::{json, Value};

use mixillo_api::{
    api::{create_router, AppState},
    db::Db,
    models::{Role, User},
};

fn create_test_server() -> (TestServer, Db) {
    let state = AppState::for_tests();
    let db = state.db.clone();
    let app = create_router(state);
    (TestServer::new(app).unwrap(), db)
}

/// Registers a user and returns (user id, access token)
async fn register(server: &TestServer, username: &str) -> (String, String) {
    let response = server
        .post("/api/auth/register")
        .json(&json!({
            "email": format!("{username}@example.com"),
            "username": username,
            "password": "hunter22",
            "full_name": "Test User",
        }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    (
        body["data"]["user"]["id"].as_str().unwrap().to_string(),
        body["data"]["tokens"]["access_token"].as_str().unwrap().to_string(),
    )
}

async fn grant_role(db: &Db, user_id: &str, role: Role) {
    let mut user = db.require::<User>(user_id).await.unwrap();
    user.role = role;
    db.update(&user).await.unwrap();
}

fn bearer(token: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("Bearer {token}")).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let (server, _) = create_test_server();
    let response = server.get("/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["backend"], "memory");

    server.get("/api/health/db").await.assert_status_ok();
}

#[tokio::test]
async fn test_unknown_route_is_json_404() {
    let (server, _) = create_test_server();
    let response = server.get("/api/nope").await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let (server, _) = create_test_server();
    let id = "1b4e28ba-2fa1-11d2-883f-0016d3cca427";
    let response = server
        .get("/health")
        .add_header(HeaderName::from_static("x-request-id"), HeaderValue::from_static(id))
        .await;
    assert_eq!(response.header("x-request-id"), id);
}

#[tokio::test]
async fn test_register_login_and_me() {
    let (server, _) = create_test_server();
    let (user_id, token) = register(&server, "ann").await;

    let response = server
        .post("/api/auth/login")
        .json(&json!({ "identifier": "ANN@example.com", "password": "hunter22" }))
        .await;
    response.assert_status_ok();

    let response = server
        .get("/api/auth/me")
        .add_header(AUTHORIZATION, bearer(&token))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["data"]["id"], user_id.as_str());
    assert_eq!(body["data"]["username"], "ann");
}

#[tokio::test]
async fn test_auth_errors() {
    let (server, _) = create_test_server();
    register(&server, "ann").await;

    let response = server
        .post("/api/auth/login")
        .json(&json!({ "identifier": "ann", "password": "wrong-password" }))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);

    let response = server.get("/api/auth/me").await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["code"], "NO_TOKEN");

    let response = server
        .get("/api/auth/me")
        .add_header(AUTHORIZATION, HeaderValue::from_static("Bearer garbage"))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);

    // duplicate username
    let response = server
        .post("/api/auth/register")
        .json(&json!({
            "email": "other@example.com",
            "username": "Ann",
            "password": "hunter22",
            "full_name": "Other",
        }))
        .await;
    response.assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_malformed_body_is_validation_error() {
    let (server, _) = create_test_server();
    let response = server
        .post("/api/auth/register")
        .json(&json!({ "email": "x@example.com" }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_content_and_feed_flow() {
    let (server, _) = create_test_server();
    let (_, creator) = register(&server, "creator").await;
    let (_, fan) = register(&server, "fan").await;

    let response = server
        .post("/api/content")
        .add_header(AUTHORIZATION, bearer(&creator))
        .json(&json!({
            "caption": "First clip #Dance",
            "media_urls": ["https://cdn.example.com/a.mp4"],
            "duration_secs": 12.5,
        }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    let content_id = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["hashtags"], json!(["dance"]));

    let response = server
        .post(&format!("/api/content/{content_id}/like"))
        .add_header(AUTHORIZATION, bearer(&fan))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["data"]["liked"], true);
    assert_eq!(body["data"]["likes"], 1);

    let response = server
        .post(&format!("/api/content/{content_id}/comments"))
        .add_header(AUTHORIZATION, bearer(&fan))
        .json(&json!({ "text": "love it" }))
        .await;
    response.assert_status(StatusCode::CREATED);

    let response = server.get("/api/content/hashtag/dance").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 1);

    let response = server.get("/api/feed").add_header(AUTHORIZATION, bearer(&fan)).await;
    response.assert_status_ok();
    let body: Value = response.json();
    let items = body["data"]["items"].as_array().unwrap();
    assert!(items.iter().any(|i| i["content"]["id"] == content_id.as_str()));
}

#[tokio::test]
async fn test_admin_routes_require_admin() {
    let (server, db) = create_test_server();
    let (_, user_token) = register(&server, "ann").await;
    let (admin_id, admin_token) = register(&server, "boss").await;
    grant_role(&db, &admin_id, Role::Admin).await;

    let response = server
        .get("/api/admin/dashboard")
        .add_header(AUTHORIZATION, bearer(&user_token))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
    let body: Value = response.json();
    assert_eq!(body["code"], "ADMIN_REQUIRED");

    let response = server
        .get("/api/admin/dashboard")
        .add_header(AUTHORIZATION, bearer(&admin_token))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["data"]["users"]["total"], 2);
}

#[tokio::test]
async fn test_checkout_with_wallet() {
    let (server, db) = create_test_server();
    let (seller_id, seller) = register(&server, "shopkeeper").await;
    let (buyer_id, buyer) = register(&server, "buyer").await;
    let (admin_id, admin) = register(&server, "boss").await;
    grant_role(&db, &seller_id, Role::Seller).await;
    grant_role(&db, &admin_id, Role::Admin).await;

    server
        .post("/api/stores")
        .add_header(AUTHORIZATION, bearer(&seller))
        .json(&json!({ "name": "Gadgets" }))
        .await
        .assert_status(StatusCode::CREATED);

    let response = server
        .post("/api/products")
        .add_header(AUTHORIZATION, bearer(&seller))
        .json(&json!({ "name": "Ring light", "price_cents": 6000, "stock": 3 }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    let product_id = body["data"]["id"].as_str().unwrap().to_string();

    server
        .post(&format!("/api/admin/wallets/{buyer_id}/deposit"))
        .add_header(AUTHORIZATION, bearer(&admin))
        .json(&json!({ "amount_cents": 10000 }))
        .await
        .assert_status(StatusCode::CREATED);

    server
        .post("/api/cart/items")
        .add_header(AUTHORIZATION, bearer(&buyer))
        .json(&json!({ "product_id": product_id, "quantity": 1 }))
        .await
        .assert_status_ok();

    let response = server
        .post("/api/orders/checkout")
        .add_header(AUTHORIZATION, bearer(&buyer))
        .json(&json!({
            "shipping_address": {
                "full_name": "Buyer",
                "phone": "555-0100",
                "line1": "1 Main St",
                "city": "Springfield",
                "postal_code": "12345",
                "country": "US",
            },
            "payment_method": "wallet",
        }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    assert_eq!(body["data"]["total_cents"], 6000);
    let orders = body["data"]["orders"].as_array().unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0]["payment_status"], "paid");

    let response = server
        .get("/api/wallet")
        .add_header(AUTHORIZATION, bearer(&buyer))
        .await;
    let body: Value = response.json();
    assert_eq!(body["data"]["balance_cents"], 4000);

    let response = server
        .get("/api/cart")
        .add_header(AUTHORIZATION, bearer(&buyer))
        .await;
    let body: Value = response.json();
    assert!(body["data"]["items"].as_array().unwrap().is_empty());

    let response = server
        .get(&format!("/api/products/{product_id}"))
        .await;
    let body: Value = response.json();
    assert_eq!(body["data"]["stock"], 2);

    // the buyer cannot see seller analytics
    server
        .get("/api/orders/analytics")
        .add_header(AUTHORIZATION, bearer(&buyer))
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_live_gift_flow_notifies_host() {
    let (server, db) = create_test_server();
    let (_, host) = register(&server, "host").await;
    let (fan_id, fan) = register(&server, "fan").await;
    let (admin_id, admin) = register(&server, "boss").await;
    grant_role(&db, &admin_id, Role::Admin).await;

    let response = server
        .post("/api/admin/gifts")
        .add_header(AUTHORIZATION, bearer(&admin))
        .json(&json!({
            "name": "rose",
            "display_name": "Rose",
            "price_cents": 100,
            "icon_url": "https://cdn.example.com/rose.png",
        }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    let gift_id = body["data"]["id"].as_str().unwrap().to_string();

    server
        .post(&format!("/api/admin/wallets/{fan_id}/deposit"))
        .add_header(AUTHORIZATION, bearer(&admin))
        .json(&json!({ "amount_cents": 1000 }))
        .await
        .assert_status(StatusCode::CREATED);

    let response = server
        .post("/api/live")
        .add_header(AUTHORIZATION, bearer(&host))
        .json(&json!({ "title": "Late show" }))
        .await;
    let body: Value = response.json();
    let stream_id = body["data"]["id"].as_str().unwrap().to_string();
    server
        .post(&format!("/api/live/{stream_id}/start"))
        .add_header(AUTHORIZATION, bearer(&host))
        .await
        .assert_status_ok();

    let response = server
        .post(&format!("/api/live/{stream_id}/gifts"))
        .add_header(AUTHORIZATION, bearer(&fan))
        .json(&json!({ "gift_id": gift_id, "quantity": 2 }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    assert_eq!(body["data"]["balance_after_cents"], 800);
    assert_eq!(body["data"]["stream_gifts"], 2);

    let response = server.get(&format!("/api/live/{stream_id}")).await;
    let body: Value = response.json();
    assert_eq!(body["data"]["stats"]["gifts"], 2);

    let response = server
        .get("/api/notifications/unread-count")
        .add_header(AUTHORIZATION, bearer(&host))
        .await;
    let body: Value = response.json();
    assert_eq!(body["data"]["count"], 1);

    let response = server
        .get("/api/notifications")
        .add_header(AUTHORIZATION, bearer(&host))
        .await;
    let body: Value = response.json();
    assert_eq!(body["data"]["items"][0]["kind"], "gift");
    assert_eq!(body["data"]["unread"], 1);

    server
        .put("/api/notifications/read-all")
        .add_header(AUTHORIZATION, bearer(&host))
        .await
        .assert_status_ok();
    let response = server
        .get("/api/notifications/unread-count")
        .add_header(AUTHORIZATION, bearer(&host))
        .await;
    let body: Value = response.json();
    assert_eq!(body["data"]["count"], 0);

    let response = server
        .get("/api/wallet")
        .add_header(AUTHORIZATION, bearer(&host))
        .await;
    let body: Value = response.json();
    assert_eq!(body["data"]["balance_cents"], 140);
}

#[tokio::test]
async fn test_admin_broadcast() {
    let (server, db) = create_test_server();
    let (_, user_token) = register(&server, "ann").await;
    let (admin_id, admin) = register(&server, "boss").await;
    grant_role(&db, &admin_id, Role::Admin).await;

    let request = json!({
        "title": "Welcome",
        "body": "Thanks for joining",
        "recipients": { "type": "all" },
    });
    server
        .post("/api/admin/notifications")
        .add_header(AUTHORIZATION, bearer(&user_token))
        .json(&request)
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let response = server
        .post("/api/admin/notifications")
        .add_header(AUTHORIZATION, bearer(&admin))
        .json(&request)
        .await;
    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    assert_eq!(body["data"]["delivered"], 2);

    let response = server
        .get("/api/admin/notifications/stats")
        .add_header(AUTHORIZATION, bearer(&admin))
        .await;
    let body: Value = response.json();
    assert_eq!(body["data"]["campaigns"], 1);
    assert_eq!(body["data"]["by_kind"]["announcement"], 2);

    let response = server
        .get("/api/notifications")
        .add_header(AUTHORIZATION, bearer(&user_token))
        .await;
    let body: Value = response.json();
    assert_eq!(body["data"]["items"][0]["title"], "Welcome");
}

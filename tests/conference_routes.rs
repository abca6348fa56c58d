mod common;

use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Method, Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::test_app;
use telemost_bridge::models::credential_models::Provider;

#[tokio::test]
async fn health_reports_service() {
    let app = test_app(&[]);
    let (status, body) = app.get("/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "telemost-bridge");
}

#[tokio::test]
async fn current_user_echoes_request_identity() {
    let app = test_app(&[]);

    let (_, anonymous) = app.get("/api/users/current").await;
    assert_eq!(anonymous, json!({ "user": { "id": "unknown", "name": "Unknown User" } }));

    let (_, named) = app.get("/api/users/current?user_id=17&user_name=Olga").await;
    assert_eq!(named, json!({ "user": { "id": "17", "name": "Olga" } }));
}

#[tokio::test]
async fn create_without_token_is_local_and_scheduled() {
    let app = test_app(&[]);

    let (status, created) = app
        .json(
            Method::POST,
            "/api/conferences?user_id=u1&user_name=Anna",
            json!({ "name": "  Planning  ", "type": "conference", "cohosts": ["b@example.com"] }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    let id = created["id"].as_i64().unwrap();
    assert_eq!(created["name"], "Planning");
    assert_eq!(created["status"], "scheduled");
    assert_eq!(created["ownerId"], "u1");
    assert_eq!(created["ownerName"], "Anna");
    assert_eq!(created["link"], format!("https://telemost.yandex.ru/j/{}", id));
    assert_eq!(created["cohosts"], json!(["b@example.com"]));
}

#[tokio::test]
async fn create_rejects_blank_names() {
    let app = test_app(&[]);

    let (status, body) = app.json(Method::POST, "/api/conferences?user_id=u1", json!({ "name": "   " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Conference name is required");

    let (_, listed) = app.get("/api/conferences?user_id=u1").await;
    assert!(listed.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn list_only_returns_callers_conferences() {
    let app = test_app(&[]);
    for (user, name) in [("u1", "one"), ("u2", "two"), ("u1", "three")] {
        app.json(Method::POST, &format!("/api/conferences?user_id={}", user), json!({ "name": name }))
            .await;
    }

    let (status, listed) = app.get("/api/conferences?user_id=u1").await;
    assert_eq!(status, StatusCode::OK);
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|c| c["ownerId"] == "u1"));

    let (_, others) = app.get("/api/conferences?user_id=u2").await;
    assert_eq!(others.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn update_applies_partial_changes() {
    let app = test_app(&[]);
    let (_, created) = app
        .json(Method::POST, "/api/conferences?user_id=u1", json!({ "name": "Old", "description": "keep" }))
        .await;
    let id = created["id"].as_i64().unwrap();

    let (status, updated) = app
        .json(Method::PUT, &format!("/api/conferences/{}?user_id=u1", id), json!({ "name": "New" }))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["name"], "New");
    assert_eq!(updated["description"], "keep");
    assert_ne!(updated["updatedAt"], created["updatedAt"]);
}

#[tokio::test]
async fn update_and_delete_unknown_ids_are_404() {
    let app = test_app(&[]);

    let (status, body) = app.json(Method::PUT, "/api/conferences/999", json!({ "name": "x" })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, _) = app.delete("/api/conferences/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_removes_once() {
    let app = test_app(&[]);
    let (_, created) = app.json(Method::POST, "/api/conferences?user_id=u1", json!({ "name": "Bye" })).await;
    let uri = format!("/api/conferences/{}", created["id"]);

    let (status, body) = app.delete(&uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, _) = app.delete(&uri).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, listed) = app.get("/api/conferences?user_id=u1").await;
    assert!(listed.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn admin_list_filters_by_type() {
    let app = test_app(&[]);
    app.json(Method::POST, "/api/conferences?user_id=a", json!({ "name": "call" })).await;
    app.json(
        Method::POST,
        "/api/conferences?user_id=b",
        json!({ "name": "stream", "type": "broadcast", "liveStreamTitle": "Live" }),
    )
    .await;

    let (_, all) = app.get("/api/admin/conferences").await;
    assert_eq!(all.as_array().unwrap().len(), 2);

    let (_, broadcasts) = app.get("/api/admin/conferences?type=broadcast").await;
    let broadcasts = broadcasts.as_array().unwrap();
    assert_eq!(broadcasts.len(), 1);
    assert_eq!(broadcasts[0]["liveStreamTitle"], "Live");

    let (status, _) = app.get("/api/admin/conferences?type=webinar").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_local_creates_get_distinct_ids_and_links() {
    let app = test_app(&[]);

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..10 {
        let router = app.router.clone();
        let user = if i % 2 == 0 { "alice" } else { "bob" };
        tasks.spawn(async move {
            let request = Request::builder()
                .method(Method::POST)
                .uri(format!("/api/conferences?user_id={}", user))
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(json!({ "name": format!("c{}", i) }).to_string()))
                .unwrap();
            let response = router.oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            serde_json::from_slice::<Value>(&bytes).unwrap()
        });
    }

    let mut ids = Vec::new();
    let mut links = Vec::new();
    while let Some(body) = tasks.join_next().await {
        let body = body.unwrap();
        ids.push(body["id"].as_i64().unwrap());
        links.push(body["link"].as_str().unwrap().to_string());
    }
    ids.sort_unstable();
    ids.dedup();
    links.sort();
    links.dedup();
    assert_eq!(ids.len(), 10);
    assert_eq!(links.len(), 10);
}

#[tokio::test]
async fn install_event_stores_portal_tokens() {
    let app = test_app(&[]);

    let (status, body) = app
        .form(
            "/install",
            "event=ONAPPINSTALL&auth%5Bdomain%5D=portal.bitrix24.ru&auth%5Baccess_token%5D=acc&auth%5Brefresh_token%5D=ref&auth%5Bmember_id%5D=m1",
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "installed": true, "domain": "portal.bitrix24.ru" }));

    let stored = app
        .state
        .credentials
        .get(Provider::Bitrix24, "portal.bitrix24.ru")
        .unwrap()
        .unwrap();
    assert_eq!(stored.access_token, "acc");
    assert_eq!(stored.refresh_token, "ref");
    assert_eq!(stored.member_id, "m1");
}

#[tokio::test]
async fn install_via_placement_and_rejects_empty_requests() {
    let app = test_app(&[]);

    let (status, _) = app
        .form("/install", "PLACEMENT=DEFAULT&DOMAIN=p.bitrix24.ru&AUTH_ID=a&REFRESH_ID=r&AUTH_EXPIRES=3600")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(app.state.credentials.get(Provider::Bitrix24, "p.bitrix24.ru").unwrap().is_some());

    let (status, body) = app.form("/install", "foo=bar").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn index_reports_auth_status() {
    let app = test_app(&[("YANDEX_OAUTH_TOKEN", "service")]);

    let (status, body) = app.form("/", "DOMAIN=p.bitrix24.ru&AUTH_ID=a&user_id=5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["bitrixAuth"], true);
    assert_eq!(body["telemostAuth"], true);

    let (_, anonymous) = app.get("/index").await;
    assert_eq!(anonymous["bitrixAuth"], false);
}

#[tokio::test]
async fn yandex_login_requires_configuration() {
    let app = test_app(&[]);
    let (status, _) = app.get("/auth/yandex?user_id=1").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let configured = test_app(&[("YANDEX_CLIENT_ID", "id"), ("YANDEX_CLIENT_SECRET", "secret")]);
    let response = configured
        .router
        .clone()
        .oneshot(Request::builder().uri("/auth/yandex?user_id=1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(response.status().is_redirection());
    let location = response.headers()["location"].to_str().unwrap();
    assert!(location.starts_with("https://oauth.yandex.ru/authorize"));
}

#[tokio::test]
async fn yandex_callback_rejects_unknown_state() {
    let app = test_app(&[("YANDEX_CLIENT_ID", "id"), ("YANDEX_CLIENT_SECRET", "secret")]);
    let (status, body) = app.get("/auth/yandex/callback?code=c&state=12345:nope").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Session record not found");
}

#[tokio::test]
async fn logout_clears_session_token() {
    let app = test_app(&[]);
    app.state
        .credentials
        .put(
            Provider::Telemost,
            "7",
            &telemost_bridge::models::credential_models::Credential::new("t", "r", 0),
        )
        .unwrap();

    let (status, body) = app.get("/logout?user_id=7").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cleared"], true);
    assert!(app.state.credentials.get(Provider::Telemost, "7").unwrap().is_none());
}

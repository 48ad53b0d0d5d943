mod common;

use actix_web::{
    http::StatusCode,
    test::{self, TestRequest},
    web::Data,
    App,
};
use chrono::Utc;
use common::{new_message, setup};
use mailroom::{
    api,
    api::queue::{CleanupResponse, EnqueueResponse},
    message::StatusSummary,
};
use serde_json::{json, Value};

#[actix_web::test]
async fn test_enqueue_and_fetch_message() {
    let (service, _tmpdir) = setup().await.into_shared();
    let app = test::init_service(
        App::new()
            .app_data(Data::from(service.clone()))
            .service(api::queue::service()),
    )
    .await;

    let req = TestRequest::post()
        .uri("/queue/messages")
        .set_json(json!({
            "kind": "order_confirmation",
            "recipient": "ada@example.com",
            "subject": "Order confirmation - SO-0042",
            "payload": { "order_id": 42 },
            "max_attempts": 5,
        }))
        .to_request();
    let EnqueueResponse { id } = test::call_and_read_body_json(&app, req).await;

    let req = TestRequest::get()
        .uri(&format!("/queue/messages/{id}"))
        .to_request();
    let view: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(view["id"], id);
    assert_eq!(view["kind"], "order_confirmation");
    assert_eq!(view["status"], "pending");
    assert_eq!(view["attempts"], 0);
    assert_eq!(view["max_attempts"], 5);
    assert_eq!(view["payload"], json!({ "order_id": 42 }));

    let req = TestRequest::get().uri("/queue/status").to_request();
    let summary: StatusSummary = test::call_and_read_body_json(&app, req).await;
    assert_eq!(summary.pending, 1);
    assert_eq!(summary.total, 1);
}

#[actix_web::test]
async fn test_rejects_bad_enqueue_requests() {
    let (service, _tmpdir) = setup().await.into_shared();
    let app = test::init_service(
        App::new()
            .app_data(Data::from(service.clone()))
            .service(api::queue::service()),
    )
    .await;

    let req = TestRequest::post()
        .uri("/queue/messages")
        .set_json(json!({
            "kind": "",
            "recipient": "ada@example.com",
            "subject": "No kind",
            "payload": {},
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let req = TestRequest::post()
        .uri("/queue/messages")
        .set_json(json!({
            "kind": "order_confirmation",
            "recipient": "ada@example.com",
            "subject": "Far future",
            "payload": {},
            "delay_secs": 10_000_000_000_000u64,
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    assert_eq!(service.status_summary().await.unwrap().total, 0);
}

#[actix_web::test]
async fn test_unknown_message_is_not_found() {
    let (service, _tmpdir) = setup().await.into_shared();
    let app = test::init_service(
        App::new()
            .app_data(Data::from(service))
            .service(api::queue::service()),
    )
    .await;

    let req = TestRequest::get().uri("/queue/messages/999").to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_cleanup_uses_retention_by_default() {
    let (service, _tmpdir) = setup().await.into_shared();
    let app = test::init_service(
        App::new()
            .app_data(Data::from(service.clone()))
            .service(api::queue::service()),
    )
    .await;

    let now = Utc::now();
    let expired = service.enqueue(new_message("a")).await.unwrap();
    let recent = service.enqueue(new_message("b")).await.unwrap();
    service
        .store()
        .mark_sent(expired, now - chrono::Duration::days(40))
        .await
        .unwrap();
    service
        .store()
        .mark_sent(recent, now - chrono::Duration::days(5))
        .await
        .unwrap();

    let req = TestRequest::post().uri("/queue/cleanup").to_request();
    let CleanupResponse { deleted } = test::call_and_read_body_json(&app, req).await;
    assert_eq!(deleted, 1);

    let req = TestRequest::post()
        .uri("/queue/cleanup?days=1")
        .to_request();
    let CleanupResponse { deleted } = test::call_and_read_body_json(&app, req).await;
    assert_eq!(deleted, 1);

    let req = TestRequest::post()
        .uri(&format!("/queue/cleanup?days={}", u32::MAX))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

//! Object storage against a mock API.

mod common;

use serde_json::json;
use wiremock::matchers::{body_json, body_string_contains, header_regex, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_upload_sends_multipart() {
  let (server, client) = common::setup().await;

  Mock::given(method("POST"))
    .and(path("/api/v1/storage/upload"))
    .and(header_regex("content-type", "^multipart/form-data"))
    .and(body_string_contains("avatars/alice.png"))
    .and(body_string_contains("fake-png-bytes"))
    .respond_with(ResponseTemplate::new(201).set_body_json(json!({
      "success": true,
      "data": {"key": "avatars/alice.png", "bucket": "media", "size": 14, "contentType": "image/png"}
    })))
    .expect(1)
    .mount(&server)
    .await;

  let object = client
    .storage()
    .upload("media", "avatars/alice.png", b"fake-png-bytes".to_vec(), "image/png")
    .await
    .unwrap();
  assert_eq!(object.path, "avatars/alice.png");
  assert_eq!(object.size, 14);
  assert_eq!(object.content_type.as_deref(), Some("image/png"));
}

#[tokio::test]
async fn test_upload_is_not_retried() {
  let server = wiremock::MockServer::start().await;
  let client = fluxez::FluxezClient::new(
    common::config(&server)
      .with_retries(3)
      .with_retry_delay(std::time::Duration::from_millis(5)),
  )
  .unwrap();

  Mock::given(method("POST"))
    .and(path("/api/v1/storage/upload"))
    .respond_with(ResponseTemplate::new(503))
    .expect(1)
    .mount(&server)
    .await;

  let err = client
    .storage()
    .upload("media", "a.txt", b"x".to_vec(), "text/plain")
    .await
    .unwrap_err();
  assert_eq!(err.status(), Some(503));
}

#[tokio::test]
async fn test_download_returns_raw_bytes() {
  let (server, client) = common::setup().await;

  Mock::given(method("GET"))
    .and(path("/api/v1/storage/download"))
    .and(query_param("bucket", "media"))
    .and(query_param("path", "docs/readme.txt"))
    .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
    .mount(&server)
    .await;

  let bytes = client
    .storage()
    .download("media", "docs/readme.txt")
    .await
    .unwrap();
  assert_eq!(bytes, b"hello");
}

#[tokio::test]
async fn test_list_and_delete() {
  let (server, client) = common::setup().await;

  Mock::given(method("GET"))
    .and(path("/api/v1/storage/list"))
    .and(query_param("bucket", "media"))
    .and(query_param("prefix", "docs/"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!([
      {"path": "docs/a.txt", "size": 1},
      {"key": "docs/b.txt", "size": 2}
    ])))
    .mount(&server)
    .await;
  Mock::given(method("DELETE"))
    .and(path("/api/v1/storage/delete"))
    .and(body_json(json!({"bucket": "media", "path": "docs/a.txt"})))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
    .expect(1)
    .mount(&server)
    .await;

  let objects = client.storage().list("media", Some("docs/")).await.unwrap();
  assert_eq!(objects.len(), 2);
  assert_eq!(objects[1].path, "docs/b.txt");

  let ack = client.storage().delete("media", "docs/a.txt").await.unwrap();
  assert!(ack.success);
}

#[tokio::test]
async fn test_signed_url() {
  let (server, client) = common::setup().await;

  Mock::given(method("POST"))
    .and(path("/api/v1/storage/signed-url"))
    .and(body_json(json!({"bucket": "media", "path": "a.txt", "expiresIn": 300})))
    .respond_with(
      ResponseTemplate::new(200).set_body_json(json!({"url": "https://cdn.example.com/a.txt?sig=1"})),
    )
    .mount(&server)
    .await;

  let signed = client.storage().signed_url("media", "a.txt", 300).await.unwrap();
  assert_eq!(signed.url, "https://cdn.example.com/a.txt?sig=1");
  assert!(signed.expires_at.is_none());
}

#[tokio::test]
async fn test_public_url_is_local() {
  let (server, client) = common::setup().await;
  let url = client.storage().public_url("media", "/photos/summer trip.jpg");
  assert_eq!(
    url,
    format!("{}/api/v1/storage/public/media/photos/summer%20trip.jpg", server.uri())
  );
}

//! Decoding of API resource shapes.

use fluxez::ai::AiCompletion;
use fluxez::types::{Ack, Page};
use fluxez::{ApiKey, AuthResponse, Organization, QueryResult, User};
use serde_json::json;

#[test]
fn test_user_minimal_and_full() {
  let user: User = serde_json::from_value(json!({"id": "u1", "email": "a@example.com"})).unwrap();
  assert_eq!(user.id, "u1");
  assert!(!user.email_verified);
  assert!(user.created_at.is_none());

  let user: User = serde_json::from_value(json!({
    "id": "u2",
    "email": "b@example.com",
    "firstName": "Bea",
    "emailVerified": true,
    "role": "admin",
    "createdAt": "2024-01-02T03:04:05Z"
  }))
  .unwrap();
  assert_eq!(user.first_name.as_deref(), Some("Bea"));
  assert!(user.email_verified);
  assert_eq!(user.role.as_deref(), Some("admin"));
  assert!(user.created_at.is_some());
}

#[test]
fn test_user_serializes_camel_case() {
  let user: User = serde_json::from_value(json!({
    "id": "u1",
    "email": "a@example.com",
    "avatarUrl": "https://img.example.com/a.png"
  }))
  .unwrap();
  let v = serde_json::to_value(&user).unwrap();
  assert_eq!(v["avatarUrl"], "https://img.example.com/a.png");
  assert!(v.get("firstName").is_none());
}

#[test]
fn test_auth_response_flattens_token() {
  let response: AuthResponse = serde_json::from_value(json!({
    "user": {"id": "u1", "email": "a@example.com"},
    "accessToken": "at",
    "tokenType": "Bearer"
  }))
  .unwrap();
  assert_eq!(response.token.access_token, "at");
  assert_eq!(response.token.token_type.as_deref(), Some("Bearer"));
  assert!(response.token.refresh_token.is_none());
}

#[test]
fn test_api_key_scopes_default() {
  let key: ApiKey = serde_json::from_value(json!({"id": "k1", "name": "ci"})).unwrap();
  assert!(key.scopes.is_empty());
  assert!(key.key.is_none());
}

#[test]
fn test_organization() {
  let org: Organization =
    serde_json::from_value(json!({"id": "o1", "name": "Acme", "ownerId": "u1"})).unwrap();
  assert_eq!(org.owner_id.as_deref(), Some("u1"));
}

#[test]
fn test_page_aliases() {
  let page: Page<User> = serde_json::from_value(json!({
    "items": [{"id": "u1", "email": "a@example.com"}],
    "total": 1
  }))
  .unwrap();
  assert_eq!(page.results.len(), 1);
  assert_eq!(page.total, Some(1));
  assert!(page.page.is_none());
}

#[test]
fn test_ack_defaults() {
  let ack: Ack = serde_json::from_value(json!({})).unwrap();
  assert!(ack.success);
  assert!(ack.message.is_none());
}

#[test]
fn test_query_result_shapes() {
  let r = QueryResult::from_value(json!([{"id": 1}]));
  assert_eq!(r.rows.len(), 1);
  assert_eq!(r.count, None);

  let r = QueryResult::from_value(json!({"data": [{"id": 1}, {"id": 2}], "total": 10}));
  assert_eq!(r.rows.len(), 2);
  assert_eq!(r.count, Some(10));

  let r = QueryResult::from_value(json!(null));
  assert!(r.rows.is_empty());
}

#[test]
fn test_completion_aliases() {
  let c: AiCompletion = serde_json::from_value(json!({"content": "hi", "model": "m"})).unwrap();
  assert_eq!(c.text, "hi");
}

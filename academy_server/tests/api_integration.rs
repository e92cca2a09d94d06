//! Integration tests for the HTTP API.
//!
//! The router runs against the in-memory store, so these cover the whole
//! request path - token auth, per-field rejections, lock contention and
//! the derived end time - without a database.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use academy::game::entities::{Card, shuffled_deck};
use academy::{LogNotifier, MemoryGameStore, StatsCache, User};
use academy_server::api::{AppState, create_router};

const CARD_SPACING_MS: i64 = 10_000;

async fn test_app() -> (Router, Arc<MemoryGameStore>) {
    let store = Arc::new(
        MemoryGameStore::new().with_lock_timeout(Duration::from_millis(50)),
    );
    for (id, name) in [(1, "alice"), (2, "bob"), (3, "carol")] {
        store
            .add_user(
                User {
                    id,
                    username: name.to_string(),
                },
                &format!("token-{name}"),
            )
            .await;
    }

    let state = AppState {
        games: store.clone(),
        users: store.clone(),
        finished_hook: Arc::new(LogNotifier),
        stats_cache: Arc::new(StatsCache::new()),
    };

    (create_router(state), store)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, game_token: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = game_token {
        builder = builder.header(header::AUTHORIZATION, format!("GameToken {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

/// Create a two-player game through the API and hand back what a client
/// would keep: id, token, start time, shuffle indices and the deck those
/// indices produce.
async fn create_two_player_game(app: &Router) -> (i64, String, Value, Vec<i32>, Vec<Card>) {
    let (status, body) = send(
        app,
        post_json(
            "/api/v1/games",
            None,
            &json!({"tokens": ["token-alice", "token-bob"], "official": true}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let id = body["id"].as_i64().unwrap();
    let token = body["token"].as_str().unwrap().to_string();
    let start = body["start_datetime"].clone();
    let indices: Vec<i32> = serde_json::from_value(body["shuffle_indices"].clone()).unwrap();
    let deck = shuffled_deck(2, &indices);

    assert_eq!(body["players"][0]["username"], "alice");
    assert_eq!(body["players"][1]["username"], "bob");

    (id, token, start, indices, deck)
}

fn cards_json(deck: &[Card], count: usize, include_last_chug: bool) -> Vec<Value> {
    deck[..count]
        .iter()
        .enumerate()
        .map(|(i, card)| {
            let start = (i as i64 + 1) * CARD_SPACING_MS;
            let mut obj = json!({
                "value": card.0,
                "suit": card.1.code(),
                "start_delta_ms": start,
            });
            if card.is_ace() && (include_last_chug || i + 1 < count) {
                obj["chug_start_delta_ms"] = json!(start + 1_000);
                obj["chug_duration_ms"] = json!(4_321);
            }
            obj
        })
        .collect()
}

/// An update payload echoing what the client was handed at creation.
fn update_payload(
    start: &Value,
    indices: &[i32],
    deck: &[Card],
    count: usize,
    has_ended: bool,
) -> Value {
    json!({
        "start_datetime": start,
        "official": true,
        "shuffle_indices": indices,
        "player_ids": [1, 2],
        "cards": cards_json(deck, count, true),
        "has_ended": has_ended,
        "dnf_player_ids": [],
    })
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = test_app().await;
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_create_game_validation() {
    let (app, _) = test_app().await;

    let (status, body) = send(
        &app,
        post_json(
            "/api/v1/games",
            None,
            &json!({"tokens": ["token-alice", "nope"], "official": true}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["tokens"].as_str().unwrap().contains("not found"));

    let (status, body) = send(
        &app,
        post_json(
            "/api/v1/games",
            None,
            &json!({"tokens": ["token-alice", "token-alice"], "official": true}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["tokens"].as_str().unwrap().contains("alice"));

    let (status, _) = send(
        &app,
        post_json(
            "/api/v1/games",
            None,
            &json!({"tokens": ["token-alice"], "official": true}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_full_game_over_the_api() {
    let (app, _) = test_app().await;
    let (id, token, start, indices, deck) = create_two_player_game(&app).await;
    let uri = format!("/api/v1/games/{id}/update_state");

    let mut payload = update_payload(&start, &indices, &deck, 26, true);
    payload["description"] = json!("season opener");

    let (status, body) = send(&app, post_json(&uri, Some(&token), &payload)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body, json!({}));

    let (status, body) = send(&app, get(&format!("/api/v1/games/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "Ended");
    assert_eq!(body["cards"].as_array().unwrap().len(), 26);
    assert_eq!(body["description"], "season opener");
    assert!(!body["end_datetime"].is_null());

    // Exactly two aces, each with its chug recorded.
    let chugs: Vec<&Value> = body["cards"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|c| !c["chug"].is_null())
        .collect();
    assert_eq!(chugs.len(), 2);
    for chug in chugs {
        assert_eq!(chug["chug"]["duration_ms"], 4_321);
        assert_eq!(chug["value"], 14);
    }

    // Both players drew 13 cards; together they drank the whole deck.
    let stats = body["player_stats"].as_array().unwrap();
    assert_eq!(stats.len(), 2);
    let total: i64 = stats.iter().map(|s| s["total_sips"].as_i64().unwrap()).sum();
    assert_eq!(total, 2 * (2..=14).sum::<i64>());

    // The game no longer shows as live.
    let (_, live) = send(&app, get("/api/v1/games/live")).await;
    assert_eq!(live, json!([]));

    // An identical retry is accepted as a no-op...
    let (status, _) = send(&app, post_json(&uri, Some(&token), &payload)).await;
    assert_eq!(status, StatusCode::OK);

    // ...but rewriting history is not.
    payload["cards"][5]["start_delta_ms"] = json!(1);
    let (status, body) = send(&app, post_json(&uri, Some(&token), &payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!body["non_field_errors"].is_null());
}

#[tokio::test]
async fn test_incremental_updates_and_regression() {
    let (app, _) = test_app().await;
    let (id, token, start, indices, deck) = create_two_player_game(&app).await;
    let uri = format!("/api/v1/games/{id}/update_state");

    for count in [5usize, 10] {
        let payload = update_payload(&start, &indices, &deck, count, false);
        let (status, body) = send(&app, post_json(&uri, Some(&token), &payload)).await;
        assert_eq!(status, StatusCode::OK, "{body}");
    }

    let (_, body) = send(&app, get(&format!("/api/v1/games/{id}"))).await;
    assert_eq!(body["cards"].as_array().unwrap().len(), 10);
    assert_eq!(body["state"], "WaitingForDraw");

    // Fewer cards than the server holds.
    let payload = update_payload(&start, &indices, &deck, 3, false);
    let (status, body) = send(&app, post_json(&uri, Some(&token), &payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["cards"].as_str().unwrap().contains("Fewer cards"));
}

#[tokio::test]
async fn test_wrong_card_and_premature_end() {
    let (app, _) = test_app().await;
    let (id, token, start, indices, deck) = create_two_player_game(&app).await;
    let uri = format!("/api/v1/games/{id}/update_state");

    let mut payload = update_payload(&start, &indices, &deck, 5, false);
    let wrong = if payload["cards"][2]["value"] == json!(2) { 3 } else { 2 };
    payload["cards"][2]["value"] = json!(wrong);
    let (status, body) = send(&app, post_json(&uri, Some(&token), &payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["cards"].as_str().unwrap().contains("card 2"));

    let payload = update_payload(&start, &indices, &deck, 5, true);
    let (status, body) = send(&app, post_json(&uri, Some(&token), &payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["cards"].as_str().unwrap().contains("end the game"));
}

#[tokio::test]
async fn test_token_authorization() {
    let (app, _) = test_app().await;
    let (id, token, start, indices, deck) = create_two_player_game(&app).await;
    let (other_id, other_token, _, _, _) = create_two_player_game(&app).await;

    let payload = update_payload(&start, &indices, &deck, 1, false);
    let uri = format!("/api/v1/games/{id}/update_state");

    // No credentials.
    let (status, _) = send(&app, post_json(&uri, None, &payload)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Unknown token.
    let (status, _) = send(&app, post_json(&uri, Some("bogus"), &payload)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // A valid token for a different game.
    let (status, _) = send(&app, post_json(&uri, Some(&other_token), &payload)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_ne!(id, other_id);

    // A valid token pointed at a game that doesn't exist.
    let missing_uri = "/api/v1/games/424242/update_state";
    let (status, _) = send(&app, post_json(missing_uri, Some(&token), &payload)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // The right token still works.
    let (status, body) = send(&app, post_json(&uri, Some(&token), &payload)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

#[tokio::test]
async fn test_unknown_game_detail_is_404() {
    let (app, _) = test_app().await;
    let (status, _) = send(&app, get("/api/v1/games/999")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_contended_update_returns_503() {
    let (app, store) = test_app().await;
    let (id, token, start, indices, deck) = create_two_player_game(&app).await;
    let uri = format!("/api/v1/games/{id}/update_state");

    let payload = update_payload(&start, &indices, &deck, 2, false);

    let guard = store.lock_game(id).await.unwrap();
    let (status, _) = send(&app, post_json(&uri, Some(&token), &payload)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    drop(guard);

    // Retrying the identical payload succeeds once the lock is free.
    let (status, body) = send(&app, post_json(&uri, Some(&token), &payload)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

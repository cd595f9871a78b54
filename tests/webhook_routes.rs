//! The webhook endpoint and the user-facing API, driven through the router.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use callpilot::meeting::MeetingStatus;
use common::{call_event, signed_request, test_config, TestApp, API_KEY};
use serde_json::json;

#[tokio::test]
async fn test_empty_body_is_acknowledged() {
    let app = TestApp::new();
    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .body(Body::from("  \n"))
        .unwrap();

    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn test_bad_signatures_are_rejected_without_side_effects() {
    let app = TestApp::new();
    let (_, _, meeting) = app.seed_meeting().await;
    let payload = call_event("call.session_started", &meeting.id).to_string();

    let unsigned = Request::builder()
        .method("POST")
        .uri("/webhook")
        .body(Body::from(payload.clone()))
        .unwrap();
    let (status, body) = app.send(unsigned).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], true);

    let forged = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("x-signature", "00".repeat(32))
        .header("x-api-key", API_KEY)
        .body(Body::from(payload.clone()))
        .unwrap();
    assert_eq!(app.send(forged).await.0, StatusCode::UNAUTHORIZED);

    let mut wrong_key = signed_request(payload.as_bytes());
    wrong_key
        .headers_mut()
        .insert("x-api-key", "someone-else".parse().unwrap());
    assert_eq!(app.send(wrong_key).await.0, StatusCode::UNAUTHORIZED);

    assert_eq!(app.meeting(&meeting.id).await.status, MeetingStatus::Upcoming);
    assert_eq!(app.gateway.connect_count(), 0);
}

#[tokio::test]
async fn test_signed_non_json_body_is_ignored() {
    let app = TestApp::new();
    let (status, body) = app.send(signed_request(b"not json at all")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Ignored non-JSON body");
}

#[tokio::test]
async fn test_unknown_event_type_is_acknowledged() {
    let app = TestApp::new();
    let (_, _, meeting) = app.seed_meeting().await;

    let (status, body) = app
        .post_webhook(call_event("call.reaction_new", &meeting.id))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "unhandled event type");
    assert_eq!(app.meeting(&meeting.id).await.status, MeetingStatus::Upcoming);
}

#[tokio::test]
async fn test_unresolvable_events_are_client_errors() {
    let app = TestApp::new();

    let (status, _) = app.post_webhook(json!({ "type": "call.session_started" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.post_webhook(json!({ "no_type": true })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post_webhook(call_event("call.session_started", "no-such-meeting"))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .post_webhook(json!({
            "type": "call.transcription_ready",
            "call_cid": "default:no-such-meeting",
            "call_transcription": { "url": "https://example.com/t.jsonl" }
        }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_duplicate_session_start_deliveries() {
    let app = TestApp::new();
    let (_, _, meeting) = app.seed_meeting().await;
    let event = call_event("call.session_started", &meeting.id);

    let (status, body) = app.post_webhook(event.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "meeting active");

    let (status, body) = app.post_webhook(event).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "agent connection already in progress");

    assert_eq!(app.gateway.connect_count(), 1);
    assert_eq!(app.meeting(&meeting.id).await.status, MeetingStatus::Active);
}

#[tokio::test]
async fn test_meeting_id_falls_back_to_call_cid() {
    let app = TestApp::new();
    let (_, _, meeting) = app.seed_meeting().await;

    let (status, _) = app
        .post_webhook(json!({
            "type": "call.session_started",
            "call_cid": format!("default:{}", meeting.id)
        }))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.meeting(&meeting.id).await.status, MeetingStatus::Active);
}

#[tokio::test]
async fn test_recording_ready_stores_url() {
    let app = TestApp::new();
    let (_, _, meeting) = app.seed_meeting().await;

    let (status, _) = app
        .post_webhook(json!({
            "type": "call.recording_ready",
            "call_cid": format!("default:{}", meeting.id),
            "call_recording": { "url": "https://cdn.example.com/rec.mp4" }
        }))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        app.meeting(&meeting.id).await.recording_url.as_deref(),
        Some("https://cdn.example.com/rec.mp4")
    );
}

#[tokio::test]
async fn test_rate_limit_rejects_excess_requests() {
    let mut config = test_config();
    config.rate_limit.max_requests = 2;
    let app = TestApp::with_config(config);

    for _ in 0..2 {
        let (status, _) = app.send(signed_request(b" ")).await;
        assert_eq!(status, StatusCode::OK);
    }

    let response = tower::ServiceExt::oneshot(app.router(), signed_request(b" "))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));

    // Other clients have their own window.
    let mut elsewhere = signed_request(b" ");
    elsewhere
        .headers_mut()
        .insert("x-forwarded-for", "198.51.100.4".parse().unwrap());
    assert_eq!(app.send(elsewhere).await.0, StatusCode::OK);
}

#[tokio::test]
async fn test_directory_and_meeting_endpoints() {
    let app = TestApp::new();

    let (status, user) = app
        .post_json("/users", json!({ "name": "Grace", "email": "grace@example.com" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let user_id = user["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .post_json(
            "/agents",
            json!({ "name": "Tutor", "instructions": "Teach.", "user_id": "nobody" }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, agent) = app
        .post_json(
            "/agents",
            json!({ "name": "Tutor", "instructions": "Teach.", "user_id": user_id }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let agent_id = agent["id"].as_str().unwrap().to_string();

    let (status, fetched) = app.get(&format!("/agents/{}", agent_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"], "Tutor");

    let (status, _) = app
        .post_json(
            "/meetings",
            json!({ "name": "  ", "user_id": user_id, "agent_id": agent_id }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, meeting) = app
        .post_json(
            "/meetings",
            json!({ "name": "Algebra", "user_id": user_id, "agent_id": agent_id }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(meeting["status"], "upcoming");
    let meeting_id = meeting["id"].as_str().unwrap().to_string();

    let (status, fetched) = app.get(&format!("/meetings/{}", meeting_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"], "Algebra");

    let (status, transcript) = app.get(&format!("/meetings/{}/transcript", meeting_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(transcript, json!([]));

    let (status, _) = app.get("/meetings/no-such-meeting").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_meeting_cap_is_forbidden() {
    let app = TestApp::new();
    let owner = app.seed_user("Bob", Some("bob@example.com")).await;
    let agent = app.seed_agent(&owner.id, "Coach", "Coach.").await;
    let request = json!({ "name": "Session", "user_id": owner.id, "agent_id": agent.id });

    for _ in 0..3 {
        assert_eq!(app.post_json("/meetings", request.clone()).await.0, StatusCode::CREATED);
    }

    let (status, body) = app.post_json("/meetings", request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], true);
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let (status, _) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
}

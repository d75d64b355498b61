use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures::StreamExt;
use serde_json::{Value, json};

use super::*;
use crate::net::sse::{StreamDecoder, StreamEvent};
use crate::net::types::{ChatMessage, Day, GeneratedPage, PageRequest, Period};

// =========================================================================
// Fake backend
// =========================================================================

#[derive(Clone, Default)]
struct Recorded {
    bodies: Arc<Mutex<Vec<(String, Value)>>>,
    queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

async fn serve(app: Router) -> ApiClient {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let config = ClientConfig::new(&format!("http://{addr}"))
        .unwrap()
        .with_session_cookie("session_data=test");
    ApiClient::new(&config).unwrap()
}

fn streaming(content_type: &'static str, chunks: Vec<&'static str>) -> Response {
    let stream = futures::stream::iter(chunks.into_iter().map(Ok::<_, std::io::Error>));
    axum::http::Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from_stream(stream))
        .unwrap()
}

async fn read_reply(stream: ChatStream) -> (String, bool) {
    let ChatStream { format, mut body } = stream;
    let mut decoder = StreamDecoder::new(format);
    let mut text = String::new();
    let mut done = false;
    while let Some(chunk) = body.next().await {
        for event in decoder.push(&chunk.unwrap()).unwrap() {
            match event {
                StreamEvent::Text(t) => text.push_str(&t),
                StreamEvent::Done => done = true,
            }
        }
    }
    for event in decoder.finish() {
        if let StreamEvent::Text(t) = event {
            text.push_str(&t);
        }
    }
    (text, done)
}

fn slot(day: u8, period: u8) -> Slot {
    Slot::from_indices(day, period).unwrap()
}

// =========================================================================
// Directory + timetable reads
// =========================================================================

#[tokio::test]
async fn list_users_parses_user_list() {
    let app = Router::new().route("/users", get(|| async { axum::Json(json!([{ "id": 1, "name": "Ann" }, { "id": 2, "name": "Bo" }])) }));
    let client = serve(app).await;
    let users = client.list_users().await.unwrap();
    assert_eq!(users.len(), 2);
    assert_eq!(users[1].id, UserId(2));
    assert_eq!(users[1].name, "Bo");
}

#[tokio::test]
async fn fetch_timetable_builds_snapshot() {
    let app = Router::new().route(
        "/users/{id}/timetable",
        get(|Path(id): Path<i64>| async move {
            axum::Json(json!({
                "user_id": id,
                "timetable": {
                    "2": { "3": { "id": 9, "name": "物理学", "lecturer": "Kato" }, "4": null }
                }
            }))
        }),
    );
    let client = serve(app).await;
    let snap = client.fetch_timetable(UserId(5)).await.unwrap();
    assert_eq!(snap.user_id(), UserId(5));
    assert_eq!(snap.len(), 1);
    assert_eq!(snap.cell(slot(2, 3)).unwrap().lecturer_name(), "Kato");
}

#[tokio::test]
async fn fetch_timetable_missing_field_is_malformed() {
    let app = Router::new().route("/users/{id}/timetable", get(|| async { axum::Json(json!({ "rows": [] })) }));
    let client = serve(app).await;
    let err = client.fetch_timetable(UserId(1)).await.unwrap_err();
    assert!(matches!(err, ApiError::MalformedResponse { .. }), "got {err:?}");
}

#[tokio::test]
async fn non_success_status_is_status_error() {
    let app = Router::new().route("/users/{id}/timetable", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
    let client = serve(app).await;
    let err = client.fetch_timetable(UserId(1)).await.unwrap_err();
    assert!(matches!(err, ApiError::Status { status: 500, .. }));
}

#[tokio::test]
async fn available_lectures_sends_day_label_and_period() {
    let recorded = Recorded::default();
    let app = Router::new()
        .route(
            "/available-lectures",
            get(|State(rec): State<Recorded>, Query(q): Query<HashMap<String, String>>| async move {
                rec.queries.lock().unwrap().push(q);
                axum::Json(json!([{ "id": 3, "name": "英語", "lecturer": "Yamada" }]))
            }),
        )
        .with_state(recorded.clone());
    let client = serve(app).await;
    let lectures = client
        .available_lectures(Slot::new(Day::Monday, Period::new(2).unwrap()))
        .await
        .unwrap();
    assert_eq!(lectures.len(), 1);
    let queries = recorded.queries.lock().unwrap();
    assert_eq!(queries[0].get("day").map(String::as_str), Some("月"));
    assert_eq!(queries[0].get("period").map(String::as_str), Some("2"));
}

#[tokio::test]
async fn search_lectures_omits_blank_filters() {
    let recorded = Recorded::default();
    let app = Router::new()
        .route(
            "/lectures",
            get(|State(rec): State<Recorded>, Query(q): Query<HashMap<String, String>>| async move {
                rec.queries.lock().unwrap().push(q);
                axum::Json(json!([]))
            }),
        )
        .with_state(recorded.clone());
    let client = serve(app).await;
    let query = LectureQuery { keyword: Some("AI".into()), name: Some(" ".into()), ..LectureQuery::default() };
    client.search_lectures(&query).await.unwrap();
    let queries = recorded.queries.lock().unwrap();
    assert_eq!(queries[0].len(), 1);
    assert_eq!(queries[0].get("keyword").map(String::as_str), Some("AI"));
}

#[tokio::test]
async fn syllabus_html_returns_body_text() {
    let app = Router::new().route(
        "/syllabuses/{code}",
        get(|Path(code): Path<String>| async move { axum::response::Html(format!("<h1>{code}</h1>")) }),
    );
    let client = serve(app).await;
    assert_eq!(client.syllabus_html("AB123").await.unwrap(), "<h1>AB123</h1>");
}

// =========================================================================
// Session
// =========================================================================

#[tokio::test]
async fn current_user_forwards_cookie_and_maps_401_to_none() {
    let app = Router::new().route(
        "/me",
        get(|headers: HeaderMap| async move {
            let cookie = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()).unwrap_or("");
            if cookie == "session_data=test" {
                axum::Json(json!({ "id": 7, "name": "Me" })).into_response()
            } else {
                StatusCode::UNAUTHORIZED.into_response()
            }
        }),
    );
    let client = serve(app.clone()).await;
    assert_eq!(client.current_user().await.unwrap().map(|u| u.id), Some(UserId(7)));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    let anonymous = ApiClient::new(&ClientConfig::new(&format!("http://{addr}")).unwrap()).unwrap();
    assert_eq!(anonymous.current_user().await.unwrap(), None);
}

#[tokio::test]
async fn auth_status_401_is_anonymous() {
    let app = Router::new().route(
        "/auth",
        get(|| async { (StatusCode::UNAUTHORIZED, axum::Json(json!({ "authenticated": false }))) }),
    );
    let client = serve(app).await;
    assert_eq!(client.auth_status().await.unwrap(), AuthStatus::anonymous());
}

#[tokio::test]
async fn auth_status_parses_session_user() {
    let app = Router::new().route(
        "/auth",
        get(|Query(q): Query<HashMap<String, String>>| async move {
            assert_eq!(q.get("action").map(String::as_str), Some("check"));
            axum::Json(json!({
                "authenticated": true,
                "user": { "id": 3, "username": "Ann", "email": "a@x.test", "login_time": 10 }
            }))
        }),
    );
    let client = serve(app).await;
    let status = client.auth_status().await.unwrap();
    assert!(status.authenticated);
    assert_eq!(status.user.unwrap().username, "Ann");
}

#[test]
fn login_and_logout_urls_encode_parameters() {
    let client = ApiClient::new(&ClientConfig::new("https://host.test/api/").unwrap()).unwrap();
    assert_eq!(
        client.login_url("/timetable?x=1").unwrap(),
        "https://host.test/api/auth?action=login&redirect=%2Ftimetable%3Fx%3D1"
    );
    assert_eq!(client.logout_url().unwrap(), "https://host.test/api/auth?action=logout");
}

// =========================================================================
// Mutations
// =========================================================================

#[tokio::test]
async fn add_lecture_posts_wire_body() {
    let recorded = Recorded::default();
    let app = Router::new()
        .route(
            "/timetables/{id}/lectures",
            post(|State(rec): State<Recorded>, Path(id): Path<i64>, axum::Json(body): axum::Json<Value>| async move {
                rec.bodies.lock().unwrap().push((format!("add:{id}"), body));
                axum::Json(json!({ "message": "ok", "success": true }))
            }),
        )
        .with_state(recorded.clone());
    let client = serve(app).await;
    client.add_lecture(UserId(4), slot(5, 6), 77).await.unwrap();
    let bodies = recorded.bodies.lock().unwrap();
    assert_eq!(bodies[0].0, "add:4");
    assert_eq!(bodies[0].1, json!({ "day_of_week": 5, "period": 6, "lecture_id": 77 }));
}

#[tokio::test]
async fn add_lecture_success_false_is_rejected() {
    let app = Router::new().route(
        "/timetables/{id}/lectures",
        post(|| async { axum::Json(json!({ "message": "講義の追加に失敗しました", "success": false })) }),
    );
    let client = serve(app).await;
    let err = client.add_lecture(UserId(1), slot(1, 1), 5).await.unwrap_err();
    assert!(matches!(err, ApiError::Rejected(ref m) if m == "講義の追加に失敗しました"));
}

#[tokio::test]
async fn removing_empty_slot_twice_succeeds() {
    let recorded = Recorded::default();
    let app = Router::new()
        .route(
            "/timetables/{id}/lectures/remove",
            post(|State(rec): State<Recorded>, axum::Json(body): axum::Json<Value>| async move {
                let mut bodies = rec.bodies.lock().unwrap();
                bodies.push(("remove".to_owned(), body));
                // First call deletes the row; later calls find nothing.
                let removed = bodies.len() == 1;
                axum::Json(json!({ "message": "講義の削除に失敗しました", "success": removed }))
            }),
        )
        .with_state(recorded.clone());
    let client = serve(app).await;

    client.remove_lecture(UserId(1), slot(1, 1)).await.unwrap();
    client.remove_lecture(UserId(1), slot(1, 1)).await.unwrap();

    let bodies = recorded.bodies.lock().unwrap();
    assert_eq!(bodies.len(), 2);
    assert_eq!(bodies[1].1, json!({ "day_of_week": 1, "period": 1 }));
}

#[tokio::test]
async fn mutation_forbidden_is_status_error() {
    let app = Router::new().route("/timetables/{id}/lectures", post(|| async { StatusCode::FORBIDDEN }));
    let client = serve(app).await;
    let err = client.add_lecture(UserId(2), slot(1, 1), 1).await.unwrap_err();
    assert!(err.is_unauthorized());
}

#[test]
fn empty_or_plain_ack_counts_as_success() {
    assert!(parse_ack("/x", "").is_ok());
    assert!(parse_ack("/x", "OK").is_ok());
    assert!(parse_ack("/x", r#"{"success":true}"#).is_ok());
    assert!(parse_ack("/x", r#"{"success":false}"#).is_err());
}

// =========================================================================
// Chat
// =========================================================================

#[test]
fn stream_format_detects_event_stream() {
    assert_eq!(StreamFormat::from_content_type(Some("text/event-stream")), StreamFormat::EventStream);
    assert_eq!(
        StreamFormat::from_content_type(Some("Text/Event-Stream; charset=utf-8")),
        StreamFormat::EventStream
    );
    assert_eq!(StreamFormat::from_content_type(Some("text/plain")), StreamFormat::Plain);
    assert_eq!(StreamFormat::from_content_type(None), StreamFormat::Plain);
}

#[tokio::test]
async fn open_chat_plain_stream_delivers_raw_chunks() {
    let recorded = Recorded::default();
    let app = Router::new()
        .route(
            "/chat",
            post(|State(rec): State<Recorded>, axum::Json(body): axum::Json<Value>| async move {
                rec.bodies.lock().unwrap().push(("chat".to_owned(), body));
                streaming("text/plain; charset=utf-8", vec!["Hel", "lo"])
            }),
        )
        .with_state(recorded.clone());
    let client = serve(app).await;
    let request = ChatRequest { question: "hi".into(), messages: vec![ChatMessage::user("hi")] };
    let stream = client.open_chat(&request).await.unwrap();
    assert_eq!(stream.format, StreamFormat::Plain);
    let (text, done) = read_reply(stream).await;
    assert_eq!(text, "Hello");
    assert!(!done);
    let bodies = recorded.bodies.lock().unwrap();
    assert_eq!(bodies[0].1["messages"][0]["role"], "user");
}

#[tokio::test]
async fn open_chat_event_stream_stops_at_done() {
    let app = Router::new().route(
        "/chat",
        post(|| async { streaming("text/event-stream", vec!["data: Hel\n\n", "data: lo\n\n", "data: [DONE]\n\n"]) }),
    );
    let client = serve(app).await;
    let request = ChatRequest { question: "hi".into(), messages: vec![ChatMessage::user("hi")] };
    let stream = client.open_chat(&request).await.unwrap();
    assert_eq!(stream.format, StreamFormat::EventStream);
    let (text, done) = read_reply(stream).await;
    assert_eq!(text, "Hello");
    assert!(done);
}

#[tokio::test]
async fn open_chat_error_status_fails_before_streaming() {
    let app = Router::new().route("/chat", post(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }));
    let client = serve(app).await;
    let request = ChatRequest { question: "hi".into(), messages: vec![] };
    let Err(err) = client.open_chat(&request).await else {
        panic!("expected status error");
    };
    assert!(matches!(err, ApiError::Status { status: 502, ref body } if body == "upstream down"));
}

// =========================================================================
// Page generation
// =========================================================================

fn page_backend() -> Router {
    Router::new().route(
        "/generate-page",
        post(|headers: HeaderMap, axum::Json(body): axum::Json<Value>| async move {
            let cookie = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()).unwrap_or("");
            if cookie != "session_data=test" {
                return (StatusCode::UNAUTHORIZED, axum::Json(json!({ "detail": "認証が必要です" }))).into_response();
            }
            let prompt = body["prompt"].as_str().unwrap_or_default().to_owned();
            axum::Json(json!({
                "title": "シラバス一覧",
                "html_content": format!("<h1>{prompt}</h1>"),
                "css_content": "h1 { margin: 0; }"
            }))
            .into_response()
        }),
    )
}

#[tokio::test]
async fn generate_page_posts_prompt_and_parses_page() {
    let client = serve(page_backend()).await;
    let page = client.generate_page(&PageRequest::new("講義一覧")).await.unwrap();
    assert_eq!(
        page,
        GeneratedPage {
            title: "シラバス一覧".into(),
            html_content: "<h1>講義一覧</h1>".into(),
            css_content: "h1 { margin: 0; }".into(),
        }
    );
}

#[tokio::test]
async fn generate_page_without_session_is_unauthorized() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, page_backend()).await.unwrap() });
    let anonymous = ApiClient::new(&ClientConfig::new(&format!("http://{addr}")).unwrap()).unwrap();

    let err = anonymous.generate_page(&PageRequest::new("x")).await.unwrap_err();
    assert!(err.is_unauthorized());
    assert!(matches!(err, ApiError::Status { status: 401, .. }));
}

#[tokio::test]
async fn generate_page_non_page_payload_is_malformed() {
    let app = Router::new().route("/generate-page", post(|| async { axum::Json(json!(["not", "a", "page"])) }));
    let client = serve(app).await;
    let err = client.generate_page(&PageRequest::new("x")).await.unwrap_err();
    assert!(matches!(err, ApiError::MalformedResponse { .. }));
}

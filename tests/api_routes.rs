use axum::{
    Json, Router,
    body::{Body, to_bytes},
    http::{Request, Response, StatusCode, header},
    routing::get,
};
use lectern::config::Config;
use lectern::db::LecternStorage;
use lectern::router::{LecternState, lectern_router};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tower::ServiceExt;
use url::Url;

struct TestApp {
    app: Router,
    storage: LecternStorage,
    db_path: PathBuf,
    downloads_dir: PathBuf,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.db_path);
        let _ = std::fs::remove_dir_all(&self.downloads_dir);
    }
}

fn unique(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX_EPOCH")
        .as_nanos();
    std::env::temp_dir().join(format!("{prefix}-{}-{nanos}", std::process::id()))
}

/// Upstream content API plus an audio file host on an ephemeral port.
async fn fake_upstream() -> Url {
    let app = Router::new()
        .route(
            "/v1/courses",
            get(|| async {
                Json(json!({ "data": [{ "id": 1, "name": "Biology", "position": 0 }] }))
            }),
        )
        .route(
            "/v1/courses/{id}/assignments",
            get(|| async { Json(json!([{ "id": "a-1", "title": "Cells" }])) }),
        )
        .route(
            "/v1/assignments/{id}/learning-objects",
            get(|| async {
                Json(json!([{
                    "id": "lo-1",
                    "title": "The membrane",
                    "segments": [
                        { "text": "Cells have walls.", "start": 0.0, "end": 5.0 },
                        { "text": "Membranes are thin.", "start": 5.0, "end": 10.0 },
                        { "text": "Cells", "start": 0.0, "end": 0.6, "type": "word" }
                    ]
                }]))
            }),
        )
        .route(
            "/media/membrane.mp3",
            get(|| async { ([(header::CONTENT_TYPE, "audio/mpeg")], vec![1u8; 2048]) }),
        )
        .route(
            "/media/slow.mp3",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                ([(header::CONTENT_TYPE, "audio/mpeg")], vec![2u8; 4096])
            }),
        )
        .route(
            "/media/broken.mp3",
            get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind upstream");
    let addr = listener.local_addr().expect("upstream addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Url::parse(&format!("http://{addr}/")).expect("upstream url")
}

async fn test_app(upstream: Option<&Url>) -> TestApp {
    let db_path = unique("lectern-api").with_extension("sqlite");
    let downloads_dir = unique("lectern-downloads");

    let mut cfg = Config::default();
    cfg.basic.admin_emails = vec!["admin@example.com".to_string()];
    cfg.basic.admin_key = Some("s3cret-admin-key".to_string());
    cfg.downloads.dir = downloads_dir.clone();
    if let Some(base) = upstream {
        cfg.content_api.base_url = base.join("v1/").expect("content api url");
        cfg.content_api.token = "upstream-token".to_string();
    }

    let storage = LecternStorage::connect(&format!("sqlite:{}", db_path.display()))
        .await
        .expect("open db");
    let state = LecternState::from_config(storage.clone(), &cfg).expect("state");
    TestApp {
        app: lectern_router(state),
        storage,
        db_path,
        downloads_dir,
    }
}

async fn send(app: &Router, req: Request<Body>) -> Response<Body> {
    app.clone().oneshot(req).await.expect("request failed")
}

async fn json_body(resp: Response<Body>) -> Value {
    let body = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json body")
}

fn get_req(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut b = Request::builder().method("GET").uri(uri);
    if let Some(c) = cookie {
        b = b.header(header::COOKIE, c);
    }
    b.body(Body::empty()).expect("build request")
}

fn json_req(method: &str, uri: &str, cookie: Option<&str>, body: Value) -> Request<Body> {
    let mut b = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(c) = cookie {
        b = b.header(header::COOKIE, c);
    }
    b.body(Body::from(body.to_string())).expect("build request")
}

/// Run the magic-link flow and return the `name=value` session cookie.
async fn sign_in(t: &TestApp, email: &str) -> String {
    let resp = send(
        &t.app,
        json_req("POST", "/api/auth/magic-link", None, json!({ "email": email })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let (token,): (String,) = sqlx::query_as(
        "SELECT token FROM magic_links WHERE email = ? ORDER BY created_at DESC LIMIT 1",
    )
    .bind(email.to_lowercase())
    .fetch_one(t.storage.pool())
    .await
    .expect("magic link stored");

    let resp = send(&t.app, get_req(&format!("/api/auth/verify?token={token}"), None)).await;
    assert!(resp.status().is_redirection());
    let set_cookie = resp
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .expect("session cookie set")
        .to_string();

    // a magic link works exactly once
    let again = send(&t.app, get_req(&format!("/api/auth/verify?token={token}"), None)).await;
    assert_eq!(again.status(), StatusCode::UNAUTHORIZED);

    set_cookie
        .split(';')
        .next()
        .expect("cookie pair")
        .to_string()
}

/// Insert a course, assignment and chapter whose audio lives at `audio`.
async fn seed_chapter(t: &TestApp, audio: &Url) -> String {
    let course_id = t
        .storage
        .upsert_course(&lectern::db::CourseUpsert {
            external_id: "c".into(),
            title: "Course".into(),
            description: None,
            image_url: None,
            sort_order: 0,
        })
        .await
        .expect("course");
    let assignment_id = t
        .storage
        .upsert_assignment(&lectern::db::AssignmentUpsert {
            external_id: "a".into(),
            course_id,
            title: "Assignment".into(),
            description: None,
            sort_order: 0,
        })
        .await
        .expect("assignment");
    t.storage
        .upsert_chapter(&lectern::db::ChapterUpsert {
            external_id: "ch".into(),
            assignment_id,
            title: "Chapter".into(),
            description: None,
            audio_url: Some(audio.to_string()),
            duration_secs: Some(12.0),
            sort_order: 0,
        })
        .await
        .expect("chapter")
}

fn download_req(cookie: &str, chapter_id: &str) -> Request<Body> {
    json_req("POST", "/api/downloads", Some(cookie), json!({ "chapterId": chapter_id }))
}

async fn wait_for_sync(t: &TestApp, cookie: &str) -> Value {
    for _ in 0..100 {
        let resp = send(&t.app, get_req("/api/admin/sync/status", Some(cookie))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let status = json_body(resp).await;
        if status["status"] != "in_progress" {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("sync did not finish");
}

#[tokio::test]
async fn healthz_needs_no_session() {
    let t = test_app(None).await;
    let resp = send(&t.app, get_req("/api/healthz", None)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["status"], "ok");
}

#[tokio::test]
async fn protected_routes_reject_anonymous_callers() {
    let t = test_app(None).await;
    for uri in ["/api/courses", "/api/progress", "/api/downloads", "/api/auth/me"] {
        let resp = send(&t.app, get_req(uri, None)).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{uri}");
    }
    let resp = send(&t.app, get_req("/api/courses", Some("lectern_session=forged"))).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn bad_magic_link_is_unauthorized() {
    let t = test_app(None).await;
    let resp = send(&t.app, get_req("/api/auth/verify?token=nope", None)).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = send(
        &t.app,
        json_req("POST", "/api/auth/magic-link", None, json!({ "email": "nope" })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn magic_link_requests_are_throttled_per_email() {
    let t = test_app(None).await;
    let mut statuses = Vec::new();
    for _ in 0..6 {
        let resp = send(
            &t.app,
            json_req(
                "POST",
                "/api/auth/magic-link",
                None,
                json!({ "email": "busy@example.com" }),
            ),
        )
        .await;
        statuses.push(resp.status());
    }
    assert_eq!(statuses.last(), Some(&StatusCode::TOO_MANY_REQUESTS));
}

#[tokio::test]
async fn me_and_logout() {
    let t = test_app(None).await;
    let cookie = sign_in(&t, "Reader@Example.com").await;

    let resp = send(&t.app, get_req("/api/auth/me", Some(&cookie))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let me = json_body(resp).await;
    assert_eq!(me["email"], "reader@example.com");
    assert_eq!(me["isAdmin"], false);

    let resp = send(&t.app, json_req("POST", "/api/auth/logout", Some(&cookie), json!({}))).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let resp = send(&t.app, get_req("/api/auth/me", Some(&cookie))).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_routes_need_admin_rights_or_key() {
    let t = test_app(None).await;
    let reader = sign_in(&t, "reader@example.com").await;

    let resp = send(&t.app, get_req("/api/admin/sync/status", Some(&reader))).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = send(&t.app, get_req("/api/admin/sync/status", None)).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let with_key = Request::builder()
        .uri("/api/admin/sync/logs")
        .header("x-lectern-key", "s3cret-admin-key")
        .body(Body::empty())
        .expect("build request");
    assert_eq!(send(&t.app, with_key).await.status(), StatusCode::OK);

    let wrong_bearer = Request::builder()
        .uri("/api/admin/sync/logs")
        .header(header::AUTHORIZATION, "Bearer not-the-key")
        .body(Body::empty())
        .expect("build request");
    assert_eq!(send(&t.app, wrong_bearer).await.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn sync_then_browse_and_track_progress() {
    let upstream = fake_upstream().await;
    let t = test_app(Some(&upstream)).await;
    let admin = sign_in(&t, "admin@example.com").await;

    let resp = send(&t.app, json_req("POST", "/api/admin/sync", Some(&admin), json!({}))).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let status = wait_for_sync(&t, &admin).await;
    assert_eq!(status["status"], "success", "{status}");

    // a second run updates in place
    let resp = send(&t.app, json_req("POST", "/api/admin/sync", Some(&admin), json!({}))).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    assert_eq!(wait_for_sync(&t, &admin).await["status"], "success");

    let courses = json_body(send(&t.app, get_req("/api/courses", Some(&admin))).await).await;
    assert_eq!(courses.as_array().map(Vec::len), Some(1));
    assert_eq!(courses[0]["title"], "Biology");
    assert_eq!(courses[0]["externalId"], "1");
    let course_id = courses[0]["id"].as_str().expect("course id").to_string();

    let assignments = json_body(
        send(
            &t.app,
            get_req(&format!("/api/courses/{course_id}/assignments"), Some(&admin)),
        )
        .await,
    )
    .await;
    let assignment_id = assignments[0]["id"].as_str().expect("assignment id").to_string();

    let chapters = json_body(
        send(
            &t.app,
            get_req(&format!("/api/assignments/{assignment_id}/chapters"), Some(&admin)),
        )
        .await,
    )
    .await;
    assert_eq!(chapters.as_array().map(Vec::len), Some(1));
    let chapter_id = chapters[0]["id"].as_str().expect("chapter id").to_string();

    let sentences = json_body(
        send(
            &t.app,
            get_req(
                &format!("/api/chapters/{chapter_id}/segments?granularity=sentence"),
                Some(&admin),
            ),
        )
        .await,
    )
    .await;
    assert_eq!(sentences.as_array().map(Vec::len), Some(2));
    assert_eq!(sentences[1]["text"], "Membranes are thin.");

    let all = json_body(
        send(&t.app, get_req(&format!("/api/chapters/{chapter_id}/segments"), Some(&admin))).await,
    )
    .await;
    assert_eq!(all.as_array().map(Vec::len), Some(3));

    let resp = send(
        &t.app,
        json_req(
            "POST",
            "/api/progress/batch",
            Some(&admin),
            json!({ "updates": [
                { "chapterId": chapter_id, "currentTime": 42.5 },
                { "chapterId": "missing", "currentTime": 1.0 }
            ]}),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let result = json_body(resp).await;
    assert_eq!(result["saved"], 1);
    assert_eq!(result["skipped"], json!(["missing"]));

    let resp = send(
        &t.app,
        json_req(
            "POST",
            "/api/progress",
            Some(&admin),
            json!({ "chapterId": chapter_id, "currentTime": 60.0, "isCompleted": true }),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    // completion sticks even when a later tick says otherwise
    send(
        &t.app,
        json_req(
            "POST",
            "/api/progress",
            Some(&admin),
            json!({ "chapterId": chapter_id, "currentTime": 3.0 }),
        ),
    )
    .await;
    let progress = json_body(
        send(&t.app, get_req(&format!("/api/progress/{chapter_id}"), Some(&admin))).await,
    )
    .await;
    assert_eq!(progress["currentTime"], 3.0);
    assert_eq!(progress["isCompleted"], true);

    let resp = send(
        &t.app,
        json_req(
            "POST",
            "/api/progress",
            Some(&admin),
            json!({ "chapterId": chapter_id, "currentTime": -4.0 }),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let logs = json_body(send(&t.app, get_req("/api/admin/sync/logs", Some(&admin))).await).await;
    assert_eq!(logs.as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn download_serves_local_audio_and_delete_forgets_progress() {
    let upstream = fake_upstream().await;
    let t = test_app(Some(&upstream)).await;
    let cookie = sign_in(&t, "listener@example.com").await;

    let chapter_id = seed_chapter(&t, &upstream.join("media/membrane.mp3").expect("audio url")).await;

    let resp = send(&t.app, get_req(&format!("/api/chapters/{chapter_id}/audio"), Some(&cookie))).await;
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);

    let resp = send(
        &t.app,
        json_req("POST", "/api/downloads", Some(&cookie), json!({ "chapterId": chapter_id })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let record = json_body(resp).await;
    assert_eq!(record["sizeBytes"], 2048);
    assert!(record.get("filePath").is_none());

    // idempotent
    let resp = send(
        &t.app,
        json_req("POST", "/api/downloads", Some(&cookie), json!({ "chapterId": chapter_id })),
    )
    .await;
    assert_eq!(json_body(resp).await["id"], record["id"]);

    let resp = send(&t.app, get_req(&format!("/api/chapters/{chapter_id}/audio"), Some(&cookie))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        Some("audio/mpeg")
    );
    let body = to_bytes(resp.into_body(), usize::MAX).await.expect("audio body");
    assert_eq!(body.len(), 2048);

    // seeking players ask for byte ranges
    let resp = send(
        &t.app,
        Request::builder()
            .uri(format!("/api/chapters/{chapter_id}/audio"))
            .header(header::COOKIE, &cookie)
            .header(header::RANGE, "bytes=0-99")
            .body(Body::empty())
            .expect("build request"),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        resp.headers().get(header::CONTENT_RANGE).and_then(|v| v.to_str().ok()),
        Some("bytes 0-99/2048")
    );
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        Some("audio/mpeg")
    );
    let body = to_bytes(resp.into_body(), usize::MAX).await.expect("audio range");
    assert_eq!(body.len(), 100);

    send(
        &t.app,
        json_req(
            "POST",
            "/api/progress",
            Some(&cookie),
            json!({ "chapterId": chapter_id, "currentTime": 7.0 }),
        ),
    )
    .await;

    let resp = send(
        &t.app,
        Request::builder()
            .method("DELETE")
            .uri(format!("/api/downloads/{chapter_id}"))
            .header(header::COOKIE, &cookie)
            .body(Body::empty())
            .expect("build request"),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = send(&t.app, get_req(&format!("/api/progress/{chapter_id}"), Some(&cookie))).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let downloads = json_body(send(&t.app, get_req("/api/downloads", Some(&cookie))).await).await;
    assert_eq!(downloads, json!([]));
}

#[tokio::test]
async fn simultaneous_downloads_of_one_chapter_share_the_file() {
    let upstream = fake_upstream().await;
    let t = test_app(Some(&upstream)).await;
    let first = sign_in(&t, "first@example.com").await;
    let second = sign_in(&t, "second@example.com").await;
    let chapter_id = seed_chapter(&t, &upstream.join("media/slow.mp3").expect("audio url")).await;

    let (a, b) = tokio::join!(
        send(&t.app, download_req(&first, &chapter_id)),
        send(&t.app, download_req(&second, &chapter_id)),
    );
    assert_eq!(a.status(), StatusCode::CREATED);
    assert_eq!(b.status(), StatusCode::CREATED);
    assert_eq!(json_body(a).await["sizeBytes"], 4096);
    assert_eq!(json_body(b).await["sizeBytes"], 4096);

    let files: Vec<String> = std::fs::read_dir(&t.downloads_dir)
        .expect("downloads dir")
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(files, vec![format!("{chapter_id}.mp3")]);
}

#[tokio::test]
async fn failed_download_leaves_nothing_behind() {
    let upstream = fake_upstream().await;
    let t = test_app(Some(&upstream)).await;
    let cookie = sign_in(&t, "unlucky@example.com").await;
    let chapter_id = seed_chapter(&t, &upstream.join("media/broken.mp3").expect("audio url")).await;

    let resp = send(&t.app, download_req(&cookie, &chapter_id)).await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

    if let Ok(entries) = std::fs::read_dir(&t.downloads_dir) {
        let leftovers: Vec<_> = entries.filter_map(|e| e.ok()).map(|e| e.file_name()).collect();
        assert!(leftovers.is_empty(), "unexpected files: {leftovers:?}");
    }
    let downloads = json_body(send(&t.app, get_req("/api/downloads", Some(&cookie))).await).await;
    assert_eq!(downloads, json!([]));

    let resp = send(&t.app, get_req(&format!("/api/chapters/{chapter_id}/audio"), Some(&cookie))).await;
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let t = test_app(None).await;
    let cookie = sign_in(&t, "reader@example.com").await;
    for uri in [
        "/api/courses/nope",
        "/api/courses/nope/assignments",
        "/api/assignments/nope/chapters",
        "/api/chapters/nope",
        "/api/progress/nope",
    ] {
        let resp = send(&t.app, get_req(uri, Some(&cookie))).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(json_body(resp).await["error"]["code"], "NOT_FOUND");
    }
}

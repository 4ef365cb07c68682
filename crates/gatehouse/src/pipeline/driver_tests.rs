//! Pipeline ordering and failure-mode tests, plus the security stages
//! working together.

use crate::auth::{AuthError, PrincipalSerializer, SqlitePrincipalStore};
use crate::pipeline::stages::{
    AuthenticationStage, CsrfStage, FlashStage, FormBodyStage, SessionStage,
};
use crate::pipeline::{FailureMode, Flow, Pipeline, RequestContext, Stage, StageError, StageResult};
use crate::session::{
    CookieSigner, FlashKind, SessionCookie, SessionError, SessionId, SessionRecord,
    SessionRepository, SessionResult, SqliteSessionStore,
};
use crate::test_utils::*;
use async_trait::async_trait;
use axum::body::Body;
use axum::response::{IntoResponse, Response};
use http::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use http::{Request, StatusCode};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

/// Appends `name.before` / `name.after` to a call log and optionally
/// misbehaves.
struct Recorder {
    name: &'static str,
    log: CallLog,
    mode: FailureMode,
    behaviour: Behaviour,
}

#[derive(Clone, Copy)]
enum Behaviour {
    Continue,
    Respond,
    Fail,
}

impl Recorder {
    fn new(name: &'static str, log: &CallLog) -> Self {
        Self {
            name,
            log: log.clone(),
            mode: FailureMode::FailClosed,
            behaviour: Behaviour::Continue,
        }
    }

    fn behaving(mut self, behaviour: Behaviour, mode: FailureMode) -> Self {
        self.behaviour = behaviour;
        self.mode = mode;
        self
    }
}

#[async_trait]
impl Stage for Recorder {
    fn name(&self) -> &'static str {
        self.name
    }

    fn failure_mode(&self) -> FailureMode {
        self.mode
    }

    async fn before(&self, _ctx: &mut RequestContext) -> StageResult<Flow> {
        self.log.push(format!("{}.before", self.name));
        match self.behaviour {
            Behaviour::Continue => Ok(Flow::Continue),
            Behaviour::Respond => Ok(Flow::Respond(
                (StatusCode::ACCEPTED, self.name).into_response(),
            )),
            Behaviour::Fail => Err(StageError::BadRequest(self.name.into())),
        }
    }

    async fn after(&self, _ctx: &mut RequestContext, _response: &mut Response) -> StageResult<()> {
        self.log.push(format!("{}.after", self.name));
        Ok(())
    }
}

fn get(uri: &str) -> RequestContext {
    RequestContext::new(Request::builder().uri(uri).body(Body::empty()).unwrap())
}

#[tokio::test]
async fn stages_run_in_order_and_unwind_in_reverse() {
    let log = CallLog::default();
    let pipeline = Pipeline::default()
        .with_stage(Recorder::new("a", &log))
        .with_stage(Recorder::new("b", &log))
        .with_stage(Recorder::new("c", &log));

    let response = pipeline.run(get("/"), &LoggingHandler(log.clone())).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        log.entries(),
        vec!["a.before", "b.before", "c.before", "handler", "c.after", "b.after", "a.after"]
    );
    assert_eq!(pipeline.names().collect::<Vec<_>>(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn responding_stage_skips_the_rest() {
    let log = CallLog::default();
    let pipeline = Pipeline::default()
        .with_stage(Recorder::new("a", &log))
        .with_stage(Recorder::new("b", &log).behaving(Behaviour::Respond, FailureMode::FailClosed))
        .with_stage(Recorder::new("c", &log));

    let response = pipeline.run(get("/"), &LoggingHandler(log.clone())).await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(log.entries(), vec!["a.before", "b.before", "b.after", "a.after"]);
}

#[tokio::test]
async fn fail_open_stage_is_skipped() {
    let log = CallLog::default();
    let pipeline = Pipeline::default()
        .with_stage(Recorder::new("a", &log).behaving(Behaviour::Fail, FailureMode::FailOpen))
        .with_stage(Recorder::new("b", &log));

    let response = pipeline.run(get("/"), &LoggingHandler(log.clone())).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(log.entries().contains(&"handler".to_string()));
}

#[tokio::test]
async fn fail_closed_stage_rejects_with_json() {
    let log = CallLog::default();
    let pipeline = Pipeline::default()
        .with_stage(Recorder::new("a", &log))
        .with_stage(Recorder::new("b", &log).behaving(Behaviour::Fail, FailureMode::FailClosed))
        .with_stage(Recorder::new("c", &log));

    let response = pipeline.run(get("/"), &LoggingHandler(log.clone())).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(log.entries(), vec!["a.before", "b.before", "b.after", "a.after"]);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"], "bad_request");
}

// ----------------------------------------------------------------------------
// Security stages together
// ----------------------------------------------------------------------------

fn cookie() -> SessionCookie {
    SessionCookie::new("sid", CookieSigner::new(TEST_SECRET.as_bytes()).unwrap())
}

fn security_pipeline(store: Arc<dyn SessionRepository>, serializer: PrincipalSerializer) -> Pipeline {
    Pipeline::default()
        .with_stage(FormBodyStage::new(&test_config().body))
        .with_stage(SessionStage::new(store, cookie(), Duration::from_secs(3600)))
        .with_stage(FlashStage)
        .with_stage(CsrfStage)
        .with_stage(AuthenticationStage::new(serializer))
}

struct Harness {
    db: crate::db::Database,
    pipeline: Pipeline,
}

async fn harness() -> Harness {
    let db = users_database().await;
    insert_user(&db, 1, "ada", None).await;
    let store = Arc::new(SqliteSessionStore::new(db.clone()));
    let serializer = PrincipalSerializer::new(Arc::new(SqlitePrincipalStore::new(db.clone())));
    Harness {
        pipeline: security_pipeline(store, serializer),
        db,
    }
}

fn set_cookie(response: &Response) -> Option<String> {
    response
        .headers()
        .get(SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or_default().to_string())
}

async fn json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn request(method: &str, uri: &str, cookie: Option<&str>, form: Option<&str>) -> RequestContext {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(COOKIE, cookie);
    }
    let body = match form {
        Some(form) => {
            builder = builder.header(CONTENT_TYPE, "application/x-www-form-urlencoded");
            Body::from(form.to_string())
        }
        None => Body::empty(),
    };
    RequestContext::new(builder.body(body).unwrap())
}

#[tokio::test]
async fn missing_cookie_creates_and_stores_a_session() {
    let h = harness().await;

    let response = h.pipeline.run(request("GET", "/", None, None), &EchoHandler).await;

    let cookie = set_cookie(&response).expect("session cookie");
    assert!(cookie.starts_with("sid="));
    let stored: i64 = h
        .db
        .run_blocking(|conn| conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0)))
        .await
        .unwrap();
    assert_eq!(stored, 1);

    // The same cookie finds the same session and is not reissued.
    let again = h.pipeline.run(request("GET", "/", Some(&cookie), None), &EchoHandler).await;
    assert!(set_cookie(&again).is_none());
}

#[tokio::test]
async fn forged_cookie_gets_a_new_session() {
    let h = harness().await;
    let forged = format!("sid={}.bogus", crate::session::SessionId::generate());

    let response = h.pipeline.run(request("GET", "/", Some(&forged), None), &EchoHandler).await;

    let issued = set_cookie(&response).unwrap();
    assert_ne!(issued, forged);
}

#[tokio::test]
async fn post_without_token_is_rejected_before_authentication() {
    let mut principals = MockPrincipalStore::new();
    principals.expect_find_by_id().never();
    let store = Arc::new(SqliteSessionStore::new(users_database().await));
    let pipeline = security_pipeline(store, PrincipalSerializer::new(Arc::new(principals)));

    let response = pipeline
        .run(request("POST", "/transfer", None, Some("amount=10")), &EchoHandler)
        .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json(response).await["error"], "invalid_csrf_token");
}

#[tokio::test]
async fn login_then_post_with_token_is_authenticated() {
    let h = harness().await;

    // 1. First visit: get a session and a token.
    let first = h.pipeline.run(request("GET", "/", None, None), &EchoHandler).await;
    let cookie = set_cookie(&first).unwrap();
    let token = json(first).await["csrf"].as_str().unwrap().to_string();

    // 2. Log in; the session id rotates.
    let form = format!("_csrf={token}");
    let login = h
        .pipeline
        .run(
            request("POST", "/login", Some(&cookie), Some(&form)),
            &LoginHandler(principal(1, "ada")),
        )
        .await;
    assert_eq!(login.status(), StatusCode::OK);
    let rotated = set_cookie(&login).expect("rotated cookie");
    assert_ne!(rotated, cookie);

    // The old id no longer resolves to a session.
    let stale = h.pipeline.run(request("GET", "/", Some(&cookie), None), &EchoHandler).await;
    assert!(json(stale).await["user"].is_null());

    // 3. The new cookie is authenticated and the token still verifies.
    let form = format!("_csrf={token}&note=hi");
    let post = h
        .pipeline
        .run(request("POST", "/notes", Some(&rotated), Some(&form)), &EchoHandler)
        .await;
    assert_eq!(post.status(), StatusCode::OK);
    let body = json(post).await;
    assert_eq!(body["user"], "ada");
    assert_eq!(body["form"][1], "note=hi");
}

#[tokio::test]
async fn deleted_principal_continues_anonymously() {
    let h = harness().await;
    let first = h.pipeline.run(request("GET", "/", None, None), &EchoHandler).await;
    let cookie = set_cookie(&first).unwrap();
    let token = json(first).await["csrf"].as_str().unwrap().to_string();
    let login = h
        .pipeline
        .run(
            request("POST", "/login", Some(&cookie), Some(&format!("_csrf={token}"))),
            &LoginHandler(principal(1, "ada")),
        )
        .await;
    let cookie = set_cookie(&login).unwrap();

    delete_user(&h.db, 1).await;

    let response = h.pipeline.run(request("GET", "/", Some(&cookie), None), &EchoHandler).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(json(response).await["user"].is_null());
}

#[tokio::test]
async fn principal_store_outage_is_anonymous_not_an_error() {
    let h = harness().await;
    let first = h.pipeline.run(request("GET", "/", None, None), &EchoHandler).await;
    let cookie = set_cookie(&first).unwrap();
    let token = json(first).await["csrf"].as_str().unwrap().to_string();
    let login = h
        .pipeline
        .run(
            request("POST", "/login", Some(&cookie), Some(&format!("_csrf={token}"))),
            &LoginHandler(principal(1, "ada")),
        )
        .await;
    let cookie = set_cookie(&login).unwrap();

    let mut principals = MockPrincipalStore::new();
    principals
        .expect_find_by_id()
        .returning(|_| Err(AuthError::Store("timeout".into())));
    let store = Arc::new(SqliteSessionStore::new(h.db.clone()));
    let outage = security_pipeline(store, PrincipalSerializer::new(Arc::new(principals)));

    let response = outage.run(request("GET", "/", Some(&cookie), None), &EchoHandler).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(json(response).await["user"].is_null());
}

#[tokio::test]
async fn flash_survives_exactly_one_redirect() {
    struct FlashHandler;

    #[async_trait]
    impl crate::pipeline::RouteHandler for FlashHandler {
        async fn handle(&self, ctx: &mut RequestContext) -> Response {
            ctx.flash(FlashKind::Success, "Saved");
            StatusCode::SEE_OTHER.into_response()
        }
    }

    let h = harness().await;
    let first = h.pipeline.run(request("GET", "/save", None, None), &FlashHandler).await;
    let cookie = set_cookie(&first).unwrap();

    let shown = h.pipeline.run(request("GET", "/", Some(&cookie), None), &EchoHandler).await;
    assert_eq!(json(shown).await["flash"][0], "Saved");

    let gone = h.pipeline.run(request("GET", "/", Some(&cookie), None), &EchoHandler).await;
    assert_eq!(json(gone).await["flash"].as_array().unwrap().len(), 0);
}

fn unreachable_store() -> MockSessionRepository {
    let mut store = MockSessionRepository::new();
    store
        .expect_load()
        .returning(|_| Err(SessionError::DatabaseError("database is locked".into())));
    store.expect_save().never();
    store
}

fn signed_cookie() -> String {
    let id = crate::session::SessionId::generate();
    let value = CookieSigner::new(TEST_SECRET.as_bytes()).unwrap().sign(&id);
    format!("sid={value}")
}

#[tokio::test]
async fn session_store_outage_fails_closed() {
    let mut principals = MockPrincipalStore::new();
    principals.expect_find_by_id().never();
    let pipeline = security_pipeline(
        Arc::new(unreachable_store()),
        PrincipalSerializer::new(Arc::new(principals)),
    );

    let response = pipeline
        .run(request("GET", "/", Some(&signed_cookie()), None), &EchoHandler)
        .await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json(response).await["error"], "session_unavailable");
}

#[tokio::test]
async fn degraded_session_serves_reads_but_refuses_writes() {
    let principals = Arc::new(MockPrincipalStore::new());
    let store: Arc<dyn SessionRepository> = Arc::new(unreachable_store());
    let pipeline = Pipeline::default()
        .with_stage(SessionStage::new(store, cookie(), Duration::from_secs(60)).degrade_to_anonymous(true))
        .with_stage(CsrfStage)
        .with_stage(AuthenticationStage::new(PrincipalSerializer::new(principals)));

    let read = pipeline
        .run(request("GET", "/", Some(&signed_cookie()), None), &EchoHandler)
        .await;
    assert_eq!(read.status(), StatusCode::OK);
    assert!(set_cookie(&read).is_none());

    let write = pipeline
        .run(request("POST", "/", Some(&signed_cookie()), None), &EchoHandler)
        .await;
    assert_eq!(write.status(), StatusCode::FORBIDDEN);
}

/// SQLite store that hands out ids from a queue.
struct QueuedIds {
    inner: SqliteSessionStore,
    ids: Mutex<VecDeque<SessionId>>,
}

#[async_trait]
impl SessionRepository for QueuedIds {
    async fn load(&self, id: &SessionId) -> SessionResult<Option<SessionRecord>> {
        self.inner.load(id).await
    }

    async fn save(&self, record: &SessionRecord) -> SessionResult<()> {
        self.inner.save(record).await
    }

    async fn touch(&self, id: &SessionId, expires_at: OffsetDateTime) -> SessionResult<()> {
        self.inner.touch(id, expires_at).await
    }

    async fn destroy(&self, id: &SessionId) -> SessionResult<()> {
        self.inner.destroy(id).await
    }

    async fn purge_expired(&self) -> SessionResult<usize> {
        self.inner.purge_expired().await
    }

    fn generate_id(&self) -> SessionId {
        self.ids.lock().pop_front().unwrap_or_else(SessionId::generate)
    }
}

#[tokio::test]
async fn login_takes_its_new_id_from_the_repository() {
    let db = users_database().await;
    insert_user(&db, 1, "ada", None).await;
    let first_id = SessionId::generate();
    let login_id = SessionId::generate();
    let store = Arc::new(QueuedIds {
        inner: SqliteSessionStore::new(db.clone()),
        ids: Mutex::new(VecDeque::from([first_id.clone(), login_id.clone()])),
    });
    let serializer = PrincipalSerializer::new(Arc::new(SqlitePrincipalStore::new(db.clone())));
    let pipeline = security_pipeline(store.clone(), serializer);

    let first = pipeline.run(request("GET", "/", None, None), &EchoHandler).await;
    let cookie = set_cookie(&first).unwrap();
    assert!(cookie.starts_with(&format!("sid={first_id}.")), "{cookie}");
    let token = json(first).await["csrf"].as_str().unwrap().to_string();

    let login = pipeline
        .run(
            request("POST", "/login", Some(&cookie), Some(&format!("_csrf={token}"))),
            &LoginHandler(principal(1, "ada")),
        )
        .await;
    let rotated = set_cookie(&login).unwrap();
    assert!(rotated.starts_with(&format!("sid={login_id}.")), "{rotated}");

    let record = store.load(&login_id).await.unwrap().expect("session under the new id");
    assert_eq!(record.data.principal.map(|r| r.id().get()), Some(1));
    assert!(store.load(&first_id).await.unwrap().is_none());
}

#[tokio::test]
async fn oversized_idle_timeout_is_an_error_not_a_panic() {
    let store = Arc::new(SqliteSessionStore::new(users_database().await));
    let idle = humantime::parse_duration("20000years").unwrap();
    let pipeline = Pipeline::default().with_stage(SessionStage::new(store, cookie(), idle));

    let response = tokio::spawn(async move {
        pipeline.run(request("GET", "/", None, None), &EchoHandler).await
    })
    .await
    .expect("request completes without panicking");

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(set_cookie(&response).is_none());
}

//! Per-request state threaded through the stages.

use crate::auth::{Authentication, Principal, PrincipalReference, PrincipalSerializer};
use crate::pipeline::error::{StageError, StageResult};
use crate::pipeline::form::FormData;
use crate::session::{FlashKind, FlashMessage, Session, SessionId, SessionRepository};
use axum::body::Body;
use axum::extract::ConnectInfo;
use http::request::Parts;
use http::{Extensions, HeaderMap, Method, Request, Uri, Version};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Everything the pipeline knows about one request.
///
/// Owned by the request's task; nothing in here is shared with other
/// requests.
pub struct RequestContext {
    request_id: Uuid,
    parts: Parts,
    body: Option<Body>,
    started_at: Instant,
    remote_addr: Option<SocketAddr>,
    form: FormData,
    session: Option<Session>,
    /// Mints replacement ids; set by the session stage
    session_ids: Option<Arc<dyn SessionRepository>>,
    flash: Vec<FlashMessage>,
    csrf_token: Option<String>,
    authentication: Authentication,
    /// Set by the authentication stage
    serializer: Option<PrincipalSerializer>,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("method", &self.parts.method)
            .field("uri", &self.parts.uri)
            .field("authenticated", &self.authentication.is_authenticated())
            .finish_non_exhaustive()
    }
}

impl RequestContext {
    pub fn new(request: Request<Body>) -> Self {
        let (parts, body) = request.into_parts();
        let remote_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        Self {
            request_id: Uuid::now_v7(),
            parts,
            body: Some(body),
            started_at: Instant::now(),
            remote_addr,
            form: FormData::default(),
            session: None,
            session_ids: None,
            flash: Vec::new(),
            csrf_token: None,
            authentication: Authentication::Anonymous,
            serializer: None,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    pub fn path(&self) -> &str {
        self.parts.uri.path()
    }

    pub fn version(&self) -> Version {
        self.parts.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    pub fn extensions(&self) -> &Extensions {
        &self.parts.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.parts.extensions
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// First value of a query-string parameter.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.parts.uri.query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// The raw body, unless a stage already consumed it.
    pub fn take_body(&mut self) -> Option<Body> {
        self.body.take()
    }

    pub fn form(&self) -> &FormData {
        &self.form
    }

    pub(crate) fn set_form(&mut self, form: FormData) {
        self.form = form;
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut Session> {
        self.session.as_mut()
    }

    pub(crate) fn set_session(&mut self, session: Session) {
        self.session = Some(session);
    }

    pub(crate) fn set_session_ids(&mut self, store: Arc<dyn SessionRepository>) {
        self.session_ids = Some(store);
    }

    pub(crate) fn take_session(&mut self) -> Option<Session> {
        self.session.take()
    }

    /// Flash messages left by the previous request.
    pub fn flash_messages(&self) -> &[FlashMessage] {
        &self.flash
    }

    pub(crate) fn consume_flash(&mut self) {
        if let Some(session) = self.session.as_mut() {
            self.flash = session.take_flash();
        }
    }

    /// Queue a message for the next request. Returns `false` when there is no
    /// session to carry it.
    pub fn flash(&mut self, kind: FlashKind, text: impl Into<String>) -> bool {
        match self.session.as_mut() {
            Some(session) => {
                session.push_flash(kind, text);
                true
            }
            None => false,
        }
    }

    /// Token to embed in forms for the next state-changing request.
    pub fn csrf_token(&self) -> Option<&str> {
        self.csrf_token.as_deref()
    }

    pub(crate) fn set_csrf_token(&mut self, token: String) {
        self.csrf_token = Some(token);
    }

    pub fn authentication(&self) -> &Authentication {
        &self.authentication
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.authentication.principal()
    }

    pub(crate) fn set_authentication(&mut self, authentication: Authentication) {
        self.authentication = authentication;
    }

    pub(crate) fn set_serializer(&mut self, serializer: PrincipalSerializer) {
        self.serializer = Some(serializer);
    }

    /// Bind `principal` to the session under a fresh id.
    ///
    /// Fails when there is no durable session to hold the reference.
    pub fn login(&mut self, principal: &Principal) -> StageResult<()> {
        let new_id = match &self.session_ids {
            Some(store) => store.generate_id(),
            None => SessionId::generate(),
        };
        let reference = match &self.serializer {
            Some(serializer) => serializer.serialize(principal),
            None => PrincipalReference::of(principal),
        };

        let session = self
            .session
            .as_mut()
            .filter(|session| !session.is_ephemeral())
            .ok_or_else(|| StageError::SessionUnavailable("no durable session for login".into()))?;

        session.regenerate(new_id);
        session.set_principal(reference);
        self.authentication = Authentication::Authenticated(principal.clone());
        Ok(())
    }

    /// Forget the principal and drop the session.
    pub fn logout(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.clear_principal();
            session.destroy();
        }
        self.authentication = Authentication::Anonymous;
    }
}

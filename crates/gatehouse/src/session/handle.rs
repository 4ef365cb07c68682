//! Request-scoped view of a session.

use crate::auth::PrincipalReference;
use crate::session::domain::{FlashKind, FlashMessage, SessionData, SessionId, SessionRecord};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// Created during this request, not yet stored
    Fresh,
    /// Loaded from the store
    Loaded,
    /// Stand-in used while the store is down; never stored
    Ephemeral,
}

/// The session attached to one request.
///
/// Tracks whether anything changed so the pipeline only writes back what it
/// must. Fresh sessions are always written.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    data: SessionData,
    origin: Origin,
    dirty: bool,
    destroyed: bool,
    replaced: Option<SessionId>,
}

impl Session {
    pub fn fresh(id: SessionId) -> Self {
        Self {
            id,
            data: SessionData::default(),
            origin: Origin::Fresh,
            dirty: false,
            destroyed: false,
            replaced: None,
        }
    }

    pub fn from_record(record: SessionRecord) -> Self {
        Self {
            id: record.id,
            data: record.data,
            origin: Origin::Loaded,
            dirty: false,
            destroyed: false,
            replaced: None,
        }
    }

    pub fn ephemeral(id: SessionId) -> Self {
        Self {
            origin: Origin::Ephemeral,
            ..Self::fresh(id)
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn data(&self) -> &SessionData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut SessionData {
        self.dirty = true;
        &mut self.data
    }

    pub fn is_fresh(&self) -> bool {
        self.origin == Origin::Fresh
    }

    pub fn is_ephemeral(&self) -> bool {
        self.origin == Origin::Ephemeral
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn push_flash(&mut self, kind: FlashKind, text: impl Into<String>) {
        self.data_mut().flash.push(FlashMessage {
            kind,
            text: text.into(),
        });
    }

    /// Remove and return pending flash messages.
    pub fn take_flash(&mut self) -> Vec<FlashMessage> {
        if self.data.flash.is_empty() {
            return Vec::new();
        }
        std::mem::take(&mut self.data_mut().flash)
    }

    pub fn principal(&self) -> Option<PrincipalReference> {
        self.data.principal
    }

    pub fn set_principal(&mut self, reference: PrincipalReference) {
        self.data_mut().principal = Some(reference);
    }

    pub fn clear_principal(&mut self) {
        if self.data.principal.is_some() {
            self.data_mut().principal = None;
        }
    }

    /// Move the data to a new id. The old id is remembered so it can be
    /// deleted from the store.
    pub fn regenerate(&mut self, id: SessionId) {
        let old = std::mem::replace(&mut self.id, id);
        if self.origin == Origin::Loaded && self.replaced.is_none() {
            self.replaced = Some(old);
        }
        if self.origin != Origin::Ephemeral {
            self.origin = Origin::Fresh;
        }
        self.dirty = true;
    }

    /// Drop the session entirely at the end of the request.
    pub fn destroy(&mut self) {
        self.destroyed = true;
        self.data = SessionData::default();
    }

    pub fn needs_save(&self) -> bool {
        !self.destroyed && self.origin != Origin::Ephemeral && (self.origin == Origin::Fresh || self.dirty)
    }

    /// Id of the record that `regenerate` superseded, if any.
    pub fn take_replaced(&mut self) -> Option<SessionId> {
        self.replaced.take()
    }

    pub fn to_record(&self, expires_at: OffsetDateTime) -> SessionRecord {
        SessionRecord::new(self.id.clone(), self.data.clone(), expires_at)
    }
}

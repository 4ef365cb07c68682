//! Server-side sessions keyed by an opaque cookie token.

pub mod cookie;
pub mod domain;
pub mod error;
pub mod handle;
pub mod repository;
pub mod sqlite;

pub use cookie::{CookieSigner, SessionCookie};
pub use domain::{FlashKind, FlashMessage, SessionData, SessionId, SessionRecord};
pub use error::{SessionError, SessionResult};
pub use handle::Session;
pub use repository::SessionRepository;
pub use sqlite::{SqliteSessionStore, spawn_purge_task};

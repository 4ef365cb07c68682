//! The built-in stages, listed in the order the server installs them.

pub mod access_log;
pub mod auth;
pub mod body;
pub mod compression;
pub mod csrf;
pub mod flash;
pub mod security_headers;
pub mod session;
pub mod static_assets;

pub use access_log::{ACCESS_LOG_TARGET, AccessLogFormat, AccessLogStage};
pub use auth::AuthenticationStage;
pub use body::FormBodyStage;
pub use compression::CompressionStage;
pub use csrf::CsrfStage;
pub use flash::FlashStage;
pub use security_headers::SecurityHeadersStage;
pub use session::SessionStage;
pub use static_assets::StaticAssetsStage;

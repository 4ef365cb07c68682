//! Principals and the serializer that keeps only their id in the session.

pub mod error;
pub mod principal;
pub mod serializer;
pub mod store;

pub use error::{AuthError, AuthResult};
pub use principal::{Authentication, Principal, PrincipalId, PrincipalReference};
pub use serializer::PrincipalSerializer;
pub use store::{PrincipalStore, SqlitePrincipalStore};

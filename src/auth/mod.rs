//! Authentication: credentials, bearer tokens, request guard.

pub mod credential_store;
pub mod jwt;
pub mod middleware;
pub mod models;

pub use credential_store::{CredentialError, CredentialStore};
pub use jwt::{JwtHandler, TokenError};
pub use middleware::auth_middleware;
pub use models::{Claims, Credential, Role};

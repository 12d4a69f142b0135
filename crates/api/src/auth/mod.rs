//! Bearer-token authorization

pub mod jwt;
pub mod middleware;

pub use jwt::{Claims, JwtManager, SUPER_ADMIN_ROLE};
pub use middleware::{require_auth, AuthError, AuthUser};

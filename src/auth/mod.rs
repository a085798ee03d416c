pub mod middleware;
pub mod providers;

pub use middleware::{authenticate, authorize, Requirement, ADAPTER_UPDATE, READ, WRITE};
pub use providers::{AuthContext, JwtAuthProvider, JwtClaims};

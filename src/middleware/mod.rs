pub mod auth;
pub mod response;

pub use auth::{auth_middleware, Principal, PrincipalKind};
pub use response::{ApiResponse, ApiResult};

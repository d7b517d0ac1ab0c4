// handlers/protected/auth/mod.rs - Authenticated account handlers
pub mod me; // GET /auth/me - current account
pub mod password; // PUT /auth/password - change own password

pub use me::me_get;
pub use password::password_put;

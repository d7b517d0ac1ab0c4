// handlers/public/mod.rs - Public handlers (no authentication required)
//
// Token acquisition plus the lookup data the sign-up screens need.
pub mod auth;
pub mod options;

// handlers/protected/mod.rs - Protected handlers (bearer token required)
//
// Every handler here receives the resolved `Principal`; role gates are
// applied by the services the handlers call.
pub mod auth;
pub mod notifications;
pub mod projects;
pub mod resources;
pub mod teams;
pub mod tickets;
pub mod users;

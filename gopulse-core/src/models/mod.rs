pub mod auth;
pub mod frame;
pub mod identity;
pub mod presence;

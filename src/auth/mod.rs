//! # Auth Module
//!
//! This module handles caller-facing authentication:
//! - Bearer token issuance and verification (single HS256 secret)
//! - The request gate: authenticate, then authorize against a role set
//! - Local account registration and password login
//! - AuthedUser extractor for protected routes

pub mod extractors;
pub mod handlers;
pub mod models;
pub mod password;
pub mod routes;
pub mod token;


pub use extractors::AuthedUser;
pub use models::{Principal, Role, User};
pub use routes::auth_routes;
pub use token::TokenCodec;

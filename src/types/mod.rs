//! Pipeline Types
//!
//! Core type definitions shared by the request pipeline.

pub mod claims;
pub mod config;
pub mod envelope;
pub mod request;
pub mod session;

pub use claims::*;
pub use config::*;
pub use envelope::*;
pub use request::*;
pub use session::*;

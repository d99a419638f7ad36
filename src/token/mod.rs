//! Token Management
//!
//! Token decoding, session storage and refresh coordination.
//!
//! This module provides:
//!
//! - **Token Codec**: Structural JWT decoding and claim extraction
//! - **Session Storage**: Storage implementations for the current session
//! - **Refresh Coordinator**: Single-flight refresh per gym

pub mod codec;
pub mod refresh;
pub mod storage;

// Token Codec
pub use codec::{TokenCodec, TokenValidity};

// Session Storage
pub use storage::{
    FileSessionStore, InMemorySessionStore, MockSessionStore, SessionStore, SessionWrite,
};

// Refresh Coordinator
pub use refresh::{RefreshCoordinator, RefreshOutcome, REFRESH_PATH};

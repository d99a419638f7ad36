//! Pipeline Core Components
//!
//! Transport, request gating and session plumbing shared by the client.

pub mod cache;
pub mod events;
pub mod interceptor;
#[cfg(feature = "mock-backend")]
pub mod mock_backend;
pub mod transport;

pub use cache::*;
pub use events::*;
pub use interceptor::*;
#[cfg(feature = "mock-backend")]
pub use mock_backend::*;
pub use transport::*;

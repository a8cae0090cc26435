//! # Call Test Utilities
//!
//! Shared test utilities for call agents.
//!
//! ## Modules
//!
//! - `mock_media` - In-memory media server whose bridges see each other
//! - `token_fixtures` - Signing key, account directory and a token source
//!   backed by the real issuer
//! - `assertions` - Waiting on agent notifications
//!
//! ## Usage
//!
//! ```rust,ignore
//! use call_test_utils::*;
//!
//! let directory = TestDirectory::new([
//!     test_account("alice", AccountKind::User),
//!     test_account("bob", AccountKind::Host),
//! ]);
//! let media = MockMediaServer::builder()
//!     .verifier(directory.verifier())
//!     .build();
//! let bus = directory.bus();
//!
//! let alice = CallAgentHandle::start(directory.agent_config("alice", &media), bus.clone()).await?;
//! ```

pub mod assertions;
pub mod mock_media;
pub mod token_fixtures;

pub use assertions::*;
pub use mock_media::*;
pub use token_fixtures::*;

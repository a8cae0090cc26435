//! Secret types for protecting tokens and key material from accidental logging.
//!
//! Re-exports [`secrecy`]. `SecretString` and `SecretBox<T>` implement `Debug`
//! with redaction and zeroize on drop, so a struct deriving `Debug` that holds
//! a bus token or a signing key logs safely.
//!
//! Use `SecretString` for:
//! - Bus and media access tokens held by call agents
//! - Session credentials forwarded to the token service
//!
//! Use `SecretBox<Vec<u8>>` for:
//! - The Ed25519 PKCS#8 signing key of the token service
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct BusLogin {
//!     identity: String,
//!     token: SecretString,
//! }
//!
//! let login = BusLogin {
//!     identity: "alice".to_string(),
//!     token: SecretString::from("eyJ..."),
//! };
//! assert!(!format!("{login:?}").contains("eyJ"));
//! assert_eq!(login.token.expose_secret(), "eyJ...");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

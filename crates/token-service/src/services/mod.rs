//! Business logic for the token service.

pub mod directory;
pub mod token_issuer;

pub use directory::DirectoryService;
pub use token_issuer::{IssuedToken, TokenIssuer};

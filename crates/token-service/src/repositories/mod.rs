pub mod accounts;
pub mod token_events;

pub use accounts::{AccountStore, InMemoryAccountStore};
pub use token_events::TokenAuditLog;

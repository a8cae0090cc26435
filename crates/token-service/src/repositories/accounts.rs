//! Account storage seam.
//!
//! Persistent account storage is an external collaborator. The service only
//! needs lookups and ordered listing, expressed by [`AccountStore`]; the
//! in-memory implementation is seeded from a JSON file at startup.

use crate::errors::TsError;
use crate::models::Account;
use async_trait::async_trait;
use common::types::{AccountKind, IdentityId};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{info, instrument};

/// Read access to account storage.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Look up one account.
    async fn get(&self, id: &IdentityId) -> Result<Option<Account>, TsError>;

    /// Accounts of `kind` with id strictly greater than `after`, in id order,
    /// at most `limit` of them.
    async fn list_kind(
        &self,
        kind: AccountKind,
        after: Option<&IdentityId>,
        limit: usize,
    ) -> Result<Vec<Account>, TsError>;
}

/// In-memory account store ordered by id.
#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    accounts: RwLock<BTreeMap<IdentityId, Account>>,
}

impl InMemoryAccountStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        Self {
            accounts: RwLock::new(accounts.into_iter().map(|a| (a.id.clone(), a)).collect()),
        }
    }

    /// Load a JSON array of accounts.
    #[instrument(skip_all)]
    pub async fn load_seed_file(path: &Path) -> Result<Self, TsError> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            tracing::error!(target: "ts.repositories.accounts", error = %e, "Failed to read seed file");
            TsError::Internal
        })?;
        let accounts: Vec<Account> = serde_json::from_str(&raw).map_err(|e| {
            tracing::error!(target: "ts.repositories.accounts", error = %e, "Failed to parse seed file");
            TsError::Internal
        })?;

        info!(
            target: "ts.repositories.accounts",
            accounts = accounts.len(),
            "Loaded directory seed"
        );

        Ok(Self::with_accounts(accounts))
    }

    /// Insert or replace an account.
    pub async fn upsert(&self, account: Account) {
        self.accounts
            .write()
            .await
            .insert(account.id.clone(), account);
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn get(&self, id: &IdentityId) -> Result<Option<Account>, TsError> {
        Ok(self.accounts.read().await.get(id).cloned())
    }

    async fn list_kind(
        &self,
        kind: AccountKind,
        after: Option<&IdentityId>,
        limit: usize,
    ) -> Result<Vec<Account>, TsError> {
        use std::ops::Bound;

        let accounts = self.accounts.read().await;
        let lower = match after {
            Some(cursor) => Bound::Excluded(cursor.clone()),
            None => Bound::Unbounded,
        };

        Ok(accounts
            .range((lower, Bound::Unbounded))
            .map(|(_, account)| account)
            .filter(|account| account.kind == kind)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn account(id: &str, kind: AccountKind) -> Account {
        Account {
            id: IdentityId::new(id).unwrap(),
            display_name: id.to_uppercase(),
            kind,
            email: format!("{id}@example.com"),
            bio: None,
        }
    }

    #[tokio::test]
    async fn test_list_kind_is_ordered_and_filtered() {
        let store = InMemoryAccountStore::with_accounts([
            account("h3", AccountKind::Host),
            account("u1", AccountKind::User),
            account("h1", AccountKind::Host),
            account("h2", AccountKind::Host),
        ]);

        let hosts = store.list_kind(AccountKind::Host, None, 10).await.unwrap();
        let ids: Vec<&str> = hosts.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["h1", "h2", "h3"]);
    }

    #[tokio::test]
    async fn test_list_kind_cursor_is_exclusive() {
        let store = InMemoryAccountStore::with_accounts([
            account("h1", AccountKind::Host),
            account("h2", AccountKind::Host),
            account("h3", AccountKind::Host),
        ]);

        let cursor = IdentityId::new("h1").unwrap();
        let page = store
            .list_kind(AccountKind::Host, Some(&cursor), 1)
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id.as_str(), "h2");
    }

    #[tokio::test]
    async fn test_get_and_upsert() {
        let store = InMemoryAccountStore::new();
        let id = IdentityId::new("u1").unwrap();
        assert!(store.get(&id).await.unwrap().is_none());

        store.upsert(account("u1", AccountKind::User)).await;
        assert_eq!(
            store.get(&id).await.unwrap().map(|a| a.kind),
            Some(AccountKind::User)
        );
    }

    #[tokio::test]
    async fn test_load_seed_file_missing_is_error() {
        let result =
            InMemoryAccountStore::load_seed_file(Path::new("/nonexistent/accounts.json")).await;
        assert!(matches!(result, Err(TsError::Internal)));
    }
}

//! Account directory.
//!
//! Users browse hosts and hosts browse users. Listings are ordered by id and
//! paged with an exclusive cursor; the requester never appears in their own
//! listing.

use crate::errors::TsError;
use crate::models::{DirectoryEntry, DirectoryPage};
use crate::observability::metrics::record_directory_request;
use crate::repositories::AccountStore;
use common::types::{AccountKind, IdentityId};
use std::sync::Arc;
use tracing::instrument;

/// Page size when the request names none.
pub const DEFAULT_PAGE_LIMIT: usize = 100;

/// Largest accepted page size.
pub const MAX_PAGE_LIMIT: usize = 500;

pub struct DirectoryService {
    accounts: Arc<dyn AccountStore>,
}

impl DirectoryService {
    #[must_use]
    pub fn new(accounts: Arc<dyn AccountStore>) -> Self {
        Self { accounts }
    }

    /// List accounts of `kind`, excluding `requester`.
    ///
    /// # Errors
    ///
    /// `BadRequest` if `limit` is zero or above [`MAX_PAGE_LIMIT`].
    #[instrument(skip_all, name = "ts.services.directory.list", fields(kind = kind.as_str()))]
    pub async fn list(
        &self,
        requester: &IdentityId,
        kind: AccountKind,
        cursor: Option<&IdentityId>,
        limit: Option<usize>,
    ) -> Result<DirectoryPage, TsError> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        if limit == 0 || limit > MAX_PAGE_LIMIT {
            return Err(TsError::BadRequest(format!(
                "limit must be between 1 and {MAX_PAGE_LIMIT}"
            )));
        }

        let mut entries = Vec::with_capacity(limit);
        let mut after = cursor.cloned();
        let mut exhausted = false;

        // The requester is filtered out after the store query, so a page can
        // come back one short; fetch again to fill it.
        while entries.len() < limit {
            let wanted = limit - entries.len();
            let batch = self.accounts.list_kind(kind, after.as_ref(), wanted).await?;
            let fetched = batch.len();

            if let Some(last) = batch.last() {
                after = Some(last.id.clone());
            }
            entries.extend(
                batch
                    .iter()
                    .filter(|account| &account.id != requester)
                    .map(DirectoryEntry::from),
            );

            if fetched < wanted {
                exhausted = true;
                break;
            }
        }

        let next_cursor = if exhausted {
            None
        } else {
            self.peek_after(kind, requester, after).await?
        };

        record_directory_request(kind.as_str(), "success");

        Ok(DirectoryPage {
            entries,
            next_cursor,
        })
    }

    /// The counterpart listing for an authenticated requester.
    ///
    /// `expected_consumer` is the role an endpoint serves: the hosts listing
    /// serves users and the users listing serves hosts.
    ///
    /// # Errors
    ///
    /// `Unauthorized` if `requester_kind` is not `expected_consumer`.
    pub async fn list_counterparts(
        &self,
        requester: &IdentityId,
        requester_kind: AccountKind,
        expected_consumer: AccountKind,
        cursor: Option<&IdentityId>,
        limit: Option<usize>,
    ) -> Result<DirectoryPage, TsError> {
        let listed = expected_consumer.counterpart();
        if requester_kind != expected_consumer {
            tracing::debug!(
                target: "ts.services.directory",
                requester_kind = requester_kind.as_str(),
                listed = listed.as_str(),
                "Directory listing denied for role"
            );
            record_directory_request(listed.as_str(), "forbidden");
            return Err(TsError::Unauthorized(format!(
                "Only {} accounts may list {}s",
                expected_consumer.as_str(),
                listed.as_str()
            )));
        }

        self.list(requester, listed, cursor, limit).await
    }

    /// Cursor for the next page: the last returned id if anything other than
    /// the requester follows it.
    async fn peek_after(
        &self,
        kind: AccountKind,
        requester: &IdentityId,
        after: Option<IdentityId>,
    ) -> Result<Option<IdentityId>, TsError> {
        let Some(last) = after else {
            return Ok(None);
        };
        let following = self.accounts.list_kind(kind, Some(&last), 2).await?;
        if following.iter().any(|account| &account.id != requester) {
            Ok(Some(last))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::models::Account;
    use crate::repositories::InMemoryAccountStore;

    fn id(s: &str) -> IdentityId {
        IdentityId::new(s).unwrap()
    }

    fn account(s: &str, kind: AccountKind) -> Account {
        Account {
            id: id(s),
            display_name: s.to_uppercase(),
            kind,
            email: format!("{s}@example.com"),
            bio: (kind == AccountKind::Host).then(|| format!("{s} bio")),
        }
    }

    fn service() -> DirectoryService {
        let accounts = InMemoryAccountStore::with_accounts([
            account("h1", AccountKind::Host),
            account("h2", AccountKind::Host),
            account("h3", AccountKind::Host),
            account("u1", AccountKind::User),
            account("u2", AccountKind::User),
        ]);
        DirectoryService::new(Arc::new(accounts))
    }

    fn ids(page: &DirectoryPage) -> Vec<&str> {
        page.entries.iter().map(|e| e.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_full_listing_without_cursor() {
        let page = service()
            .list(&id("u1"), AccountKind::Host, None, None)
            .await
            .unwrap();
        assert_eq!(ids(&page), vec!["h1", "h2", "h3"]);
        assert!(page.next_cursor.is_none());
        assert_eq!(page.entries[0].bio.as_deref(), Some("h1 bio"));
    }

    #[tokio::test]
    async fn test_requester_is_excluded() {
        let page = service()
            .list(&id("u1"), AccountKind::User, None, None)
            .await
            .unwrap();
        assert_eq!(ids(&page), vec!["u2"]);
    }

    #[tokio::test]
    async fn test_paging_is_restartable() {
        let service = service();
        let first = service
            .list(&id("u1"), AccountKind::Host, None, Some(2))
            .await
            .unwrap();
        assert_eq!(ids(&first), vec!["h1", "h2"]);
        assert_eq!(first.next_cursor.as_ref().map(IdentityId::as_str), Some("h2"));

        let second = service
            .list(&id("u1"), AccountKind::Host, first.next_cursor.as_ref(), Some(2))
            .await
            .unwrap();
        assert_eq!(ids(&second), vec!["h3"]);
        assert!(second.next_cursor.is_none());

        // Same cursor, same page.
        let again = service
            .list(&id("u1"), AccountKind::Host, first.next_cursor.as_ref(), Some(2))
            .await
            .unwrap();
        assert_eq!(ids(&again), ids(&second));
    }

    #[tokio::test]
    async fn test_page_is_filled_past_requester() {
        let page = service()
            .list(&id("h1"), AccountKind::Host, None, Some(2))
            .await
            .unwrap();
        assert_eq!(ids(&page), vec!["h2", "h3"]);
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_no_cursor_when_only_requester_follows() {
        let page = service()
            .list(&id("h3"), AccountKind::Host, None, Some(2))
            .await
            .unwrap();
        assert_eq!(ids(&page), vec!["h1", "h2"]);
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_limit_bounds() {
        let service = service();
        for limit in [0, MAX_PAGE_LIMIT + 1] {
            let result = service
                .list(&id("u1"), AccountKind::Host, None, Some(limit))
                .await;
            assert!(matches!(result, Err(TsError::BadRequest(_))));
        }
    }

    #[tokio::test]
    async fn test_counterparts_enforce_role() {
        let service = service();
        let hosts = service
            .list_counterparts(&id("u1"), AccountKind::User, AccountKind::User, None, None)
            .await
            .unwrap();
        assert_eq!(ids(&hosts), vec!["h1", "h2", "h3"]);

        let users = service
            .list_counterparts(&id("h1"), AccountKind::Host, AccountKind::Host, None, None)
            .await
            .unwrap();
        assert_eq!(ids(&users), vec!["u1", "u2"]);

        let denied = service
            .list_counterparts(&id("h1"), AccountKind::Host, AccountKind::User, None, None)
            .await;
        assert!(matches!(denied, Err(TsError::Unauthorized(_))));
    }
}

//! Display handles for user identifiers, fetched from the account service on
//! first reference and cached in the `users` collection.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use rand::seq::IndexedRandom;
use reqwest::Url;
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::db::UserHandle;
use crate::store::{Filter, OptionalExt, Store, StoreResult, documents};

const ANONYMOUS: &str = "Anonymous";

const ADJECTIVES: [&str; 25] = [
    "Quick", "Lazy", "Mysterious", "Jolly", "Brave", "Silent", "Witty", "Fierce",
    "Clever", "Gentle", "Wild", "Calm", "Bold", "Shy", "Proud", "Happy", "Sad",
    "Eager", "Fancy", "Rusty", "Golden", "Silver", "Bright", "Dark", "Lucky",
];

const NOUNS: [&str; 24] = [
    "Fox", "Bear", "Eagle", "Wolf", "Dragon", "Tiger", "Lion", "Owl", "Rabbit",
    "Falcon", "Hawk", "Shark", "Panda", "Kitten", "Puppy", "Phoenix", "Griffin",
    "Unicorn", "Turtle", "Dolphin", "Whale", "Elephant", "Giraffe", "Zebra",
];

pub(crate) fn random_alias() -> String {
    let mut rng = rand::rng();
    format!(
        "{} {}",
        ADJECTIVES.choose(&mut rng).copied().unwrap_or("Quiet"),
        NOUNS.choose(&mut rng).copied().unwrap_or("Guest"),
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Account {
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[async_trait]
pub trait AccountSource: Send + Sync {
    async fn account(&self, user_id: &str) -> anyhow::Result<Account>;
}

/// Account service reached over HTTP at `{base}/accounts/{user_id}`.
pub struct HttpAccounts {
    client: reqwest::Client,
    base: Url,
}

impl HttpAccounts {
    pub fn new(base: &str) -> anyhow::Result<Self> {
        let base = Url::parse(base).with_context(|| format!("invalid accounts url {base}"))?;
        if base.cannot_be_a_base() {
            return Err(anyhow!("accounts url {base} cannot carry a path"));
        }
        let client = reqwest::ClientBuilder::new()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { client, base })
    }

    fn account_url(&self, user_id: &str) -> anyhow::Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow!("accounts url {} cannot carry a path", self.base))?
            .pop_if_empty()
            .push("accounts")
            .push(user_id);
        Ok(url)
    }
}

#[async_trait]
impl AccountSource for HttpAccounts {
    async fn account(&self, user_id: &str) -> anyhow::Result<Account> {
        let url = self.account_url(user_id)?;
        let account = self.client.get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(account)
    }
}

#[derive(Clone)]
pub struct UserDirectory {
    store: Arc<dyn Store>,
    accounts: Option<Arc<dyn AccountSource>>,
}

impl UserDirectory {
    pub fn new(store: Arc<dyn Store>, accounts: Option<Arc<dyn AccountSource>>) -> Self {
        Self { store, accounts }
    }

    /// Returns the cached handle, or builds and caches one. A failing
    /// account source yields an uncached placeholder so the next reference
    /// tries again.
    pub async fn resolve(&self, user_id: &str) -> StoreResult<UserHandle> {
        let cached = Filter::new().eq("user_id", user_id);
        if let Some(handle) = documents::find_one::<UserHandle>(self.store.as_ref(), &cached).await.optional()? {
            return Ok(handle);
        }

        let now = OffsetDateTime::now_utc();
        let handle = match &self.accounts {
            None => UserHandle::new(user_id, random_alias(), None, now),
            Some(accounts) => match accounts.account(user_id).await {
                Ok(Account { name, avatar }) => UserHandle::new(user_id, name, avatar, now),
                Err(err) => {
                    warn!(user_id, "account lookup failed: {err:#}");
                    return Ok(UserHandle::new(user_id, ANONYMOUS, None, now));
                }
            },
        };

        let handle = documents::insert(self.store.as_ref(), &handle).await?;
        debug!(user_id, name = %handle.name, "user handle cached");
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::store::SqliteStore;

    struct FakeAccounts {
        calls: AtomicUsize,
        down: bool,
    }

    impl FakeAccounts {
        fn new(down: bool) -> Arc<Self> {
            Arc::new(Self { calls: AtomicUsize::new(0), down })
        }
    }

    #[async_trait]
    impl AccountSource for FakeAccounts {
        async fn account(&self, user_id: &str) -> anyhow::Result<Account> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.down {
                return Err(anyhow!("connection refused"));
            }
            Ok(Account {
                name: format!("{user_id} the great"),
                avatar: Some(format!("https://img.example/{user_id}.png")),
            })
        }
    }

    async fn store() -> Arc<dyn Store> {
        Arc::new(SqliteStore::in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn account_is_fetched_once() {
        let accounts = FakeAccounts::new(false);
        let users = UserDirectory::new(store().await, Some(accounts.clone()));

        let first = users.resolve("alice").await.unwrap();
        assert_eq!(first.name, "alice the great");
        assert_eq!(first.avatar.as_deref(), Some("https://img.example/alice.png"));

        let second = users.resolve("alice").await.unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(accounts.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_source_is_not_cached() {
        let accounts = FakeAccounts::new(true);
        let users = UserDirectory::new(store().await, Some(accounts.clone()));

        let handle = users.resolve("bob").await.unwrap();
        assert_eq!(handle.name, ANONYMOUS);
        assert!(handle.id.is_empty());
        users.resolve("bob").await.unwrap();
        assert_eq!(accounts.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn alias_without_source_sticks() {
        let users = UserDirectory::new(store().await, None);
        let first = users.resolve("carol").await.unwrap();
        let (adjective, noun) = first.name.split_once(' ').unwrap();
        assert!(ADJECTIVES.contains(&adjective));
        assert!(NOUNS.contains(&noun));
        assert_eq!(users.resolve("carol").await.unwrap().name, first.name);
    }

    #[test]
    fn account_url_escapes_user_id() {
        let accounts = HttpAccounts::new("http://accounts.local/api/").unwrap();
        let url = accounts.account_url("a b/c").unwrap();
        assert_eq!(url.as_str(), "http://accounts.local/api/accounts/a%20b%2Fc");
        assert!(HttpAccounts::new("mailto:x@y").is_err());
    }
}

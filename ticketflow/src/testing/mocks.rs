//! Scripted collaborators for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::errors::{IdentityError, MailError, StoreError};
use crate::identity::IdentityLookup;
use crate::mail::{MailMessage, Mailer};
use crate::records::{IdentityProfile, UserRecord};
use crate::store::{RecordQuery, SortKey, UserStore};

type LookupResult = Result<IdentityProfile, IdentityError>;

/// An identity lookup that replays scripted results per identity id.
///
/// A script is consumed front to back and its last entry repeats. Ids with
/// no script are reported as not found.
#[derive(Debug, Default)]
pub struct ScriptedIdentityLookup {
    scripts: Mutex<HashMap<String, VecDeque<LookupResult>>>,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedIdentityLookup {
    /// Creates a lookup with no scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Always returns `profile` for `identity_id`.
    #[must_use]
    pub fn with_profile(self, identity_id: impl Into<String>, profile: IdentityProfile) -> Self {
        self.with_sequence(identity_id, vec![Ok(profile)])
    }

    /// Always returns `result` for `identity_id`.
    #[must_use]
    pub fn with_result(self, identity_id: impl Into<String>, result: LookupResult) -> Self {
        self.with_sequence(identity_id, vec![result])
    }

    /// Returns `results` in order for `identity_id`, repeating the last.
    #[must_use]
    pub fn with_sequence(self, identity_id: impl Into<String>, results: Vec<LookupResult>) -> Self {
        self.scripts
            .lock()
            .insert(identity_id.into(), results.into_iter().collect());
        self
    }

    /// Sleeps before every answer.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Identity ids looked up so far, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn next_result(&self, identity_id: &str) -> LookupResult {
        let mut scripts = self.scripts.lock();
        let Some(script) = scripts.get_mut(identity_id) else {
            return Err(IdentityError::not_found(identity_id));
        };
        let next = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        next.unwrap_or_else(|| Err(IdentityError::not_found(identity_id)))
    }
}

#[async_trait]
impl IdentityLookup for ScriptedIdentityLookup {
    async fn lookup(&self, identity_id: &str) -> Result<IdentityProfile, IdentityError> {
        self.calls.lock().push(identity_id.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.next_result(identity_id)
    }
}

/// A mailer that records delivered messages and fails on demand.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<MailMessage>>,
    attempts: AtomicUsize,
    rejected: HashSet<String>,
    transient: Mutex<HashMap<String, usize>>,
}

impl RecordingMailer {
    /// Creates a mailer that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Permanently rejects mail to `address`.
    #[must_use]
    pub fn reject(mut self, address: impl Into<String>) -> Self {
        self.rejected.insert(address.into());
        self
    }

    /// Fails the first `times` sends to `address` transiently.
    #[must_use]
    pub fn fail_transiently(self, address: impl Into<String>, times: usize) -> Self {
        self.transient.lock().insert(address.into(), times);
        self
    }

    /// Messages delivered so far.
    #[must_use]
    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().clone()
    }

    /// Recipients delivered to so far, in order.
    #[must_use]
    pub fn recipients(&self) -> Vec<String> {
        self.sent.lock().iter().map(|m| m.to.clone()).collect()
    }

    /// Send attempts so far, failed ones included.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.rejected.contains(&message.to) {
            return Err(MailError::rejected(&message.to, "mailbox does not exist"));
        }
        if let Some(remaining) = self.transient.lock().get_mut(&message.to) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(MailError::Transient("503 service unavailable".to_string()));
            }
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

/// Wraps a store and injects outages.
#[derive(Debug)]
pub struct FlakyStore<S> {
    inner: S,
    unavailable: bool,
    writes_left: Mutex<Option<usize>>,
}

impl<S: UserStore> FlakyStore<S> {
    /// Wraps `inner` without injecting anything.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            unavailable: false,
            writes_left: Mutex::new(None),
        }
    }

    /// Fails every call.
    #[must_use]
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Lets `count` writes through, then fails every later write.
    #[must_use]
    pub fn fail_writes_after(self, count: usize) -> Self {
        *self.writes_left.lock() = Some(count);
        self
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn outage() -> StoreError {
        StoreError::Unavailable("connection refused".to_string())
    }
}

#[async_trait]
impl<S: UserStore> UserStore for FlakyStore<S> {
    async fn fetch_page(
        &self,
        query: &RecordQuery,
        after: Option<&SortKey>,
    ) -> Result<Vec<UserRecord>, StoreError> {
        if self.unavailable {
            return Err(Self::outage());
        }
        self.inner.fetch_page(query, after).await
    }

    async fn assigned_ticket_count(&self) -> Result<u64, StoreError> {
        if self.unavailable {
            return Err(Self::outage());
        }
        self.inner.assigned_ticket_count().await
    }

    async fn mark_ticket_assigned(&self, user_id: &str, sequence: u64) -> Result<(), StoreError> {
        if self.unavailable {
            return Err(Self::outage());
        }
        {
            let mut writes_left = self.writes_left.lock();
            match writes_left.as_mut() {
                Some(0) => return Err(Self::outage()),
                Some(n) => *n -= 1,
                None => {}
            }
        }
        self.inner.mark_ticket_assigned(user_id, sequence).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryUserStore;

    #[tokio::test]
    async fn test_scripted_sequence_repeats_last() {
        let lookup = ScriptedIdentityLookup::new().with_sequence(
            "kc",
            vec![Err(IdentityError::Transient("x".into())), Ok(IdentityProfile::new())],
        );
        assert!(lookup.lookup("kc").await.is_err());
        assert!(lookup.lookup("kc").await.is_ok());
        assert!(lookup.lookup("kc").await.is_ok());
        assert_eq!(lookup.lookup("other").await, Err(IdentityError::not_found("other")));
        assert_eq!(lookup.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_recording_mailer_failures() {
        let mailer = RecordingMailer::new()
            .reject("bad@x.org")
            .fail_transiently("slow@x.org", 1);

        assert!(mailer.send(&MailMessage::new("bad@x.org", "s", "b")).await.is_err());
        assert!(mailer.send(&MailMessage::new("slow@x.org", "s", "b")).await.is_err());
        assert!(mailer.send(&MailMessage::new("slow@x.org", "s", "b")).await.is_ok());
        assert_eq!(mailer.recipients(), vec!["slow@x.org".to_string()]);
        assert_eq!(mailer.attempts(), 3);
    }

    #[tokio::test]
    async fn test_flaky_store_write_budget() {
        let inner = InMemoryUserStore::with_records(vec![
            UserRecord::new("a", "kc-a", "a@x"),
            UserRecord::new("b", "kc-b", "b@x"),
        ]);
        let store = FlakyStore::new(inner).fail_writes_after(1);

        assert!(store.mark_ticket_assigned("a", 1).await.is_ok());
        assert!(store.mark_ticket_assigned("b", 2).await.is_err());
        assert_eq!(store.inner().assigned_ticket_count().await.unwrap(), 1);
    }
}

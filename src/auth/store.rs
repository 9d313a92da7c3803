// Credential store

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, PoisonError, RwLock};

use super::clock::Clock;
use super::types::{Credential, TokenStatus};

/// Holder of the current credential.
///
/// Readers get an `Arc` snapshot; writers swap the whole reference. The lock is
/// only ever held for the pointer swap, never across a network call.
pub struct CredentialStore {
    current: RwLock<Option<Arc<Credential>>>,

    /// Remaining lifetime at or below which a credential counts as expiring
    safety_margin: Duration,

    clock: Arc<dyn Clock>,
}

impl CredentialStore {
    pub fn new(safety_margin: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            current: RwLock::new(None),
            safety_margin,
            clock,
        }
    }

    /// Latest snapshot, if any
    pub fn current(&self) -> Option<Arc<Credential>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the credential; visible to every reader once this returns
    pub fn set(&self, credential: Arc<Credential>) {
        tracing::debug!(
            expires_at = %credential.expires_at().to_rfc3339(),
            "Storing new credential"
        );
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(credential);
    }

    pub fn clear(&self) {
        let previous = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if previous.is_some() {
            tracing::debug!("Credential cleared");
        }
    }

    /// Classify a credential at `now`
    pub fn status_of(&self, credential: Option<&Credential>, now: DateTime<Utc>) -> TokenStatus {
        match credential {
            None => TokenStatus::Absent,
            Some(cred) if now >= cred.expires_at() => TokenStatus::Expired,
            Some(cred) if cred.expires_at() - now <= self.safety_margin => TokenStatus::Expiring,
            Some(_) => TokenStatus::Valid,
        }
    }

    /// Status of the current credential at the clock's current time
    pub fn status(&self) -> TokenStatus {
        let current = self.current();
        self.status_of(current.as_deref(), self.now())
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn safety_margin(&self) -> Duration {
        self.safety_margin
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 12, 9, 0, 0).unwrap()
    }

    fn store_with_clock() -> (CredentialStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let store = CredentialStore::new(Duration::minutes(5), clock.clone());
        (store, clock)
    }

    #[test]
    fn test_empty_store_is_absent() {
        let (store, _) = store_with_clock();
        assert!(store.current().is_none());
        assert_eq!(store.status(), TokenStatus::Absent);
    }

    #[test]
    fn test_status_boundaries_for_58_minute_token() {
        let (store, clock) = store_with_clock();
        let cred = Credential::new("token", start(), Duration::minutes(58)).unwrap();
        store.set(Arc::new(cred));

        assert_eq!(store.status(), TokenStatus::Valid);

        clock.advance(Duration::minutes(52) + Duration::seconds(59));
        assert_eq!(store.status(), TokenStatus::Valid);

        clock.set(start() + Duration::minutes(53));
        assert_eq!(store.status(), TokenStatus::Expiring);

        clock.set(start() + Duration::minutes(57) + Duration::seconds(59));
        assert_eq!(store.status(), TokenStatus::Expiring);

        clock.set(start() + Duration::minutes(58));
        assert_eq!(store.status(), TokenStatus::Expired);
    }

    #[test]
    fn test_set_replaces_and_clear_removes() {
        let (store, _) = store_with_clock();
        store.set(Arc::new(
            Credential::new("first", start(), Duration::minutes(58)).unwrap(),
        ));
        let first = store.current().unwrap();

        store.set(Arc::new(
            Credential::new("second", start(), Duration::minutes(58)).unwrap(),
        ));
        assert_eq!(store.current().unwrap().token(), "second");
        // Old snapshots stay intact for whoever still holds them
        assert_eq!(first.token(), "first");

        store.clear();
        assert!(store.current().is_none());
        assert_eq!(store.status(), TokenStatus::Absent);
    }

    #[test]
    fn test_concurrent_readers_see_whole_credentials() {
        let (store, _) = store_with_clock();
        let store = Arc::new(store);

        let writers: Vec<_> = (0..4)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for n in 0..200 {
                        let token = format!("token-{}-{}", i, n);
                        let cred =
                            Credential::new(token, start(), Duration::minutes(58)).unwrap();
                        store.set(Arc::new(cred));
                    }
                })
            })
            .collect();

        for _ in 0..500 {
            if let Some(cred) = store.current() {
                assert!(cred.token().starts_with("token-"));
                assert!(cred.expires_at() > cred.issued_at());
            }
        }

        for writer in writers {
            writer.join().unwrap();
        }
    }

    proptest! {
        #[test]
        fn prop_status_is_monotonic_in_time(
            lifetime_secs in 1i64..100_000,
            margin_secs in 0i64..10_000,
            a in 0i64..200_000,
            b in 0i64..200_000,
        ) {
            let clock = Arc::new(ManualClock::new(start()));
            let store = CredentialStore::new(Duration::seconds(margin_secs), clock);
            let cred = Credential::new("t", start(), Duration::seconds(lifetime_secs)).unwrap();

            let rank = |s: TokenStatus| match s {
                TokenStatus::Valid => 0,
                TokenStatus::Expiring => 1,
                TokenStatus::Expired => 2,
                TokenStatus::Absent => 3,
            };

            let (early, late) = if a <= b { (a, b) } else { (b, a) };
            let s_early = store.status_of(Some(&cred), start() + Duration::seconds(early));
            let s_late = store.status_of(Some(&cred), start() + Duration::seconds(late));
            prop_assert!(rank(s_early) <= rank(s_late));

            // Same inputs, same answer
            prop_assert_eq!(
                s_early,
                store.status_of(Some(&cred), start() + Duration::seconds(early))
            );

            let at_expiry = store.status_of(Some(&cred), cred.expires_at());
            prop_assert_eq!(at_expiry, TokenStatus::Expired);
        }
    }
}

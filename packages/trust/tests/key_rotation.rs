//! Key rotation behavior under a controlled clock and entropy source

use chrono::{DateTime, Duration, Utc};
use cryypt_trust::{
    EntropySource, KeyId, KeyRotationManager, MAX_KEY_VALIDITY_DAYS, ManualClock,
    SigningAlgorithm, SystemEntropy, TrustError,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// System entropy that can be switched off.
#[derive(Default)]
struct SwitchableEntropy {
    offline: AtomicBool,
}

impl SwitchableEntropy {
    fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

impl EntropySource for SwitchableEntropy {
    fn fill(&self, dest: &mut [u8]) -> cryypt_trust::Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TrustError::key_generation("entropy source offline"));
        }
        SystemEntropy.fill(dest)
    }
}

/// Returns the same bytes every time, so every key id collides.
struct StuckEntropy;

impl EntropySource for StuckEntropy {
    fn fill(&self, dest: &mut [u8]) -> cryypt_trust::Result<()> {
        dest.fill(0x11);
        Ok(())
    }
}

fn start() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + Duration::days(20_000)
}

fn manager_with_clock(clock: Arc<ManualClock>, capacity: usize) -> KeyRotationManager {
    KeyRotationManager::builder("https://issuer.test")
        .key_validity(Duration::hours(1))
        .retained_key_capacity(capacity)
        .clock(clock)
        .build()
        .unwrap()
}

async fn retained_ids(manager: &KeyRotationManager) -> BTreeSet<KeyId> {
    manager
        .all_verification_tokens()
        .await
        .iter()
        .map(|t| t.key_id())
        .collect()
}

#[tokio::test]
async fn test_first_call_rotates_exactly_once() {
    let clock = Arc::new(ManualClock::new(start()));
    let manager = manager_with_clock(clock, 5);

    assert_eq!(manager.retained_key_count().await, 0);
    assert!(manager.current_key_id().await.is_none());
    assert!(manager.all_verification_tokens().await.is_empty());

    let credential = manager.current_signing_credential().await.unwrap();
    let tokens = manager.all_verification_tokens().await;
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].key_id(), credential.key_id());
    assert_eq!(tokens[0].key_material(), credential.key_material());
    assert_eq!(manager.current_key_id().await, Some(credential.key_id()));

    let again = manager.current_signing_credential().await.unwrap();
    assert_eq!(again.key_id(), credential.key_id());
    assert_eq!(manager.retained_key_count().await, 1);
}

#[tokio::test]
async fn test_credential_expiry_is_creation_plus_validity() {
    let clock = Arc::new(ManualClock::new(start()));
    let manager = manager_with_clock(clock, 5);

    let credential = manager.current_signing_credential().await.unwrap();
    assert_eq!(credential.expires_on(), start() + Duration::hours(1));
    assert_eq!(credential.algorithm(), SigningAlgorithm::Hs256);
    assert_eq!(credential.key_material().len(), 32);
}

#[tokio::test]
async fn test_rotates_once_current_key_expires() {
    let clock = Arc::new(ManualClock::new(start()));
    let manager = manager_with_clock(clock.clone(), 5);

    let first = manager.current_signing_credential().await.unwrap();

    clock.advance(Duration::minutes(59));
    let still_first = manager.current_signing_credential().await.unwrap();
    assert_eq!(still_first.key_id(), first.key_id());

    // Expiry is inclusive: at exactly expires_on the key is stale.
    clock.set(first.expires_on());
    let second = manager.current_signing_credential().await.unwrap();
    assert_ne!(second.key_id(), first.key_id());
    assert_ne!(second.key_material(), first.key_material());
    assert_eq!(second.expires_on(), first.expires_on() + Duration::hours(1));

    // The retired key stays available to verifiers.
    let ids = retained_ids(&manager).await;
    assert!(ids.contains(&first.key_id()));
    assert!(ids.contains(&second.key_id()));
}

#[tokio::test]
async fn test_retention_is_bounded_and_evicts_earliest_expiry() {
    let clock = Arc::new(ManualClock::new(start()));
    let manager = manager_with_clock(clock.clone(), 5);
    let mut expiries: BTreeMap<KeyId, DateTime<Utc>> = BTreeMap::new();

    for round in 0..12 {
        let before = retained_ids(&manager).await;
        clock.advance(Duration::minutes(1));
        let credential = manager.force_rotate().await.unwrap();
        expiries.insert(credential.key_id(), credential.expires_on());
        let after = retained_ids(&manager).await;

        assert!(after.len() <= 5, "round {round} retained {}", after.len());
        assert!(after.contains(&credential.key_id()));

        if before.len() == 5 {
            let expected_victim = before
                .iter()
                .min_by_key(|id| (expiries[*id], **id))
                .copied()
                .unwrap();
            let removed: Vec<KeyId> = before.difference(&after).copied().collect();
            assert_eq!(removed, vec![expected_victim], "round {round}");
        } else {
            assert!(before.is_subset(&after));
        }
    }

    assert_eq!(manager.retained_key_count().await, 5);
}

#[tokio::test]
async fn test_equal_expiries_evict_lowest_key_id() {
    let clock = Arc::new(ManualClock::new(start()));
    let manager = manager_with_clock(clock, 3);

    for _ in 0..3 {
        manager.force_rotate().await.unwrap();
    }
    let before = retained_ids(&manager).await;
    let current = manager.current_key_id().await.unwrap();
    let expected_victim = before.iter().copied().find(|id| *id != current).unwrap();

    let newest = manager.force_rotate().await.unwrap();
    let after = retained_ids(&manager).await;

    assert_eq!(after.len(), 3);
    assert!(!after.contains(&expected_victim));
    assert!(after.contains(&current));
    assert!(after.contains(&newest.key_id()));
}

#[tokio::test]
async fn test_reads_are_idempotent_between_rotations() {
    let clock = Arc::new(ManualClock::new(start()));
    let manager = manager_with_clock(clock, 5);
    manager.force_rotate().await.unwrap();
    manager.force_rotate().await.unwrap();

    let first: Vec<KeyId> = manager
        .all_verification_tokens()
        .await
        .iter()
        .map(|t| t.key_id())
        .collect();
    let second: Vec<KeyId> = manager
        .all_verification_tokens()
        .await
        .iter()
        .map(|t| t.key_id())
        .collect();
    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
}

#[tokio::test]
async fn test_listing_tokens_never_rotates_expired_key() {
    let clock = Arc::new(ManualClock::new(start()));
    let manager = manager_with_clock(clock.clone(), 5);
    let credential = manager.current_signing_credential().await.unwrap();

    clock.advance(Duration::hours(5));
    let tokens = manager.all_verification_tokens().await;
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].key_id(), credential.key_id());
    assert_eq!(manager.current_key_id().await, Some(credential.key_id()));
}

#[tokio::test]
async fn test_rotated_out_key_still_verifies_until_evicted() {
    let clock = Arc::new(ManualClock::new(start()));
    let manager = manager_with_clock(clock.clone(), 2);

    let old = manager.current_signing_credential().await.unwrap();
    let tag = old.sign(b"header.claims").unwrap();

    clock.advance(Duration::hours(1));
    let new = manager.current_signing_credential().await.unwrap();
    assert_ne!(new.key_id(), old.key_id());

    let verifier = manager.verification_token(&old.key_id()).await.unwrap();
    assert!(verifier.verify(b"header.claims", &tag));

    let current_verifier = manager.verification_token(&new.key_id()).await.unwrap();
    assert!(!current_verifier.verify(b"header.claims", &tag));

    clock.advance(Duration::hours(1));
    manager.current_signing_credential().await.unwrap();
    assert!(manager.verification_token(&old.key_id()).await.is_none());
}

#[tokio::test]
async fn test_entropy_failure_leaves_previous_key_in_place() {
    let clock = Arc::new(ManualClock::new(start()));
    let entropy = Arc::new(SwitchableEntropy::default());
    let manager = KeyRotationManager::builder("https://issuer.test")
        .key_validity(Duration::hours(1))
        .clock(clock.clone())
        .entropy(entropy.clone())
        .build()
        .unwrap();

    let first = manager.current_signing_credential().await.unwrap();

    entropy.set_offline(true);
    clock.advance(Duration::hours(2));
    let err = manager.current_signing_credential().await.unwrap_err();
    assert!(matches!(err, TrustError::KeyGeneration(_)));
    assert!(matches!(
        manager.force_rotate().await,
        Err(TrustError::KeyGeneration(_))
    ));

    assert_eq!(manager.current_key_id().await, Some(first.key_id()));
    assert_eq!(retained_ids(&manager).await, BTreeSet::from([first.key_id()]));

    entropy.set_offline(false);
    let recovered = manager.current_signing_credential().await.unwrap();
    assert_ne!(recovered.key_id(), first.key_id());
    assert_eq!(manager.retained_key_count().await, 2);
}

#[tokio::test]
async fn test_entropy_failure_on_first_use_leaves_manager_empty() {
    let entropy = Arc::new(SwitchableEntropy::default());
    entropy.set_offline(true);
    let manager = KeyRotationManager::builder("https://issuer.test")
        .entropy(entropy)
        .build()
        .unwrap();

    assert!(manager.current_signing_credential().await.is_err());
    assert_eq!(manager.retained_key_count().await, 0);
    assert!(manager.current_key_id().await.is_none());
}

#[tokio::test]
async fn test_key_id_collisions_are_reported() {
    let clock = Arc::new(ManualClock::new(start()));
    let manager = KeyRotationManager::builder("https://issuer.test")
        .clock(clock)
        .entropy(Arc::new(StuckEntropy))
        .build()
        .unwrap();

    let first = manager.current_signing_credential().await.unwrap();
    let err = manager.force_rotate().await.unwrap_err();
    assert!(matches!(err, TrustError::KeyGeneration(_)));
    assert_eq!(manager.current_key_id().await, Some(first.key_id()));
    assert_eq!(manager.retained_key_count().await, 1);
}

#[tokio::test]
async fn test_algorithm_sets_key_length() {
    for algorithm in [
        SigningAlgorithm::Hs256,
        SigningAlgorithm::Hs384,
        SigningAlgorithm::Hs512,
    ] {
        let manager = KeyRotationManager::builder("https://issuer.test")
            .algorithm(algorithm)
            .build()
            .unwrap();
        let credential = manager.current_signing_credential().await.unwrap();
        assert_eq!(credential.algorithm(), algorithm);
        assert_eq!(credential.key_material().len(), algorithm.key_len());

        let tokens = manager.all_verification_tokens().await;
        assert_eq!(tokens[0].algorithm(), algorithm);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_calls_share_one_key() {
    let clock = Arc::new(ManualClock::new(start()));
    let manager = Arc::new(manager_with_clock(clock, 5));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.current_signing_credential().await })
        })
        .collect();

    let mut ids = BTreeSet::new();
    for handle in handles {
        ids.insert(handle.await.unwrap().unwrap().key_id());
    }

    assert_eq!(ids.len(), 1);
    assert_eq!(retained_ids(&manager).await, ids);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_rotation_keeps_ring_consistent() {
    let clock = Arc::new(ManualClock::new(start()));
    let manager = Arc::new(manager_with_clock(clock.clone(), 3));

    let mut handles = Vec::new();
    for worker in 0..8 {
        let manager = manager.clone();
        let clock = clock.clone();
        handles.push(tokio::spawn(async move {
            for step in 0..50 {
                if worker == 0 && step % 5 == 0 {
                    clock.advance(Duration::minutes(30));
                }
                if worker == 1 && step % 7 == 0 {
                    manager.force_rotate().await.unwrap();
                }
                let credential = manager.current_signing_credential().await.unwrap();
                assert_eq!(credential.key_material().len(), 32);

                let tokens = manager.all_verification_tokens().await;
                assert!(!tokens.is_empty());
                assert!(tokens.len() <= 3);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let current = manager.current_signing_credential().await.unwrap();
    let ids = retained_ids(&manager).await;
    assert!(ids.len() <= 3);
    assert!(ids.contains(&current.key_id()));
}

#[test]
fn test_blank_issuer_is_rejected() {
    for issuer in ["", " ", "\t \n"] {
        let err = KeyRotationManager::new(issuer).unwrap_err();
        assert!(matches!(err, TrustError::InvalidArgument(_)), "{issuer:?}");
    }
}

#[test]
fn test_invalid_validity_and_capacity_are_rejected() {
    assert!(matches!(
        KeyRotationManager::with_validity("svc", Duration::zero()),
        Err(TrustError::InvalidArgument(_))
    ));
    assert!(matches!(
        KeyRotationManager::with_validity("svc", Duration::seconds(-30)),
        Err(TrustError::InvalidArgument(_))
    ));
    assert!(matches!(
        KeyRotationManager::builder("svc")
            .retained_key_capacity(0)
            .build(),
        Err(TrustError::InvalidArgument(_))
    ));
}

#[test]
fn test_validity_too_long_to_schedule_is_rejected_at_construction() {
    for validity in [
        Duration::MAX,
        Duration::days(MAX_KEY_VALIDITY_DAYS) + Duration::seconds(1),
    ] {
        assert!(
            matches!(
                KeyRotationManager::builder("svc").key_validity(validity).build(),
                Err(TrustError::InvalidArgument(_))
            ),
            "{validity:?}"
        );
    }
    assert!(
        KeyRotationManager::with_validity("svc", Duration::days(MAX_KEY_VALIDITY_DAYS)).is_ok()
    );
}

#[tokio::test]
async fn test_sub_second_validity_is_honored() {
    for millis in [500, 1500] {
        let validity = Duration::milliseconds(millis);
        let clock = Arc::new(ManualClock::new(start()));
        let manager = KeyRotationManager::builder("https://issuer.test")
            .key_validity(validity)
            .clock(clock.clone())
            .build()
            .unwrap();
        assert_eq!(manager.config().key_validity(), validity);

        let first = manager.current_signing_credential().await.unwrap();
        assert_eq!(first.expires_on(), start() + validity);

        clock.advance(validity - Duration::milliseconds(1));
        let same = manager.current_signing_credential().await.unwrap();
        assert_eq!(same.key_id(), first.key_id());

        clock.advance(Duration::milliseconds(1));
        let next = manager.current_signing_credential().await.unwrap();
        assert_ne!(next.key_id(), first.key_id());
        assert_eq!(next.expires_on(), start() + validity + validity);
    }
}

#[test]
fn test_issuer_and_defaults_are_exposed() {
    let manager = KeyRotationManager::new("https://issuer.test").unwrap();
    assert_eq!(manager.issuer(), "https://issuer.test");
    assert_eq!(manager.config().key_validity(), Duration::hours(4));
    assert_eq!(manager.config().retained_key_capacity, 5);
}

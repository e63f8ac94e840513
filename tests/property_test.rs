//! Property tests for the chain and the canonical hashing helpers.

mod common;

use proptest::prelude::*;
use std::sync::Arc;

use common::signing_key;
use warden::adapters::sqlite::{DatabaseConnection, SqliteAuditStore};
use warden::domain::models::{AuditDraft, AuditEvent, AuditLevel};
use warden::services::{sha256_hex_of_value, AuditChain};

fn arb_level() -> impl Strategy<Value = AuditLevel> {
    prop_oneof![
        Just(AuditLevel::Debug),
        Just(AuditLevel::Info),
        Just(AuditLevel::Warn),
        Just(AuditLevel::Error),
        Just(AuditLevel::Critical),
    ]
}

fn arb_event() -> impl Strategy<Value = AuditEvent> {
    prop_oneof![
        Just(AuditEvent::TaskCreated),
        Just(AuditEvent::TaskCompleted),
        Just(AuditEvent::PermissionDenied),
        Just(AuditEvent::SandboxViolation),
        Just(AuditEvent::ConfigChange),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Whatever gets recorded, the chain verifies afterwards and every
    /// link matches the hash relation.
    #[test]
    fn prop_chain_always_verifies(
        entries in prop::collection::vec(
            (arb_level(), arb_event(), "[ -~]{0,80}", prop::option::of("[a-z0-9]{1,12}")),
            1..24,
        )
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async move {
            let db = DatabaseConnection::in_memory().await.unwrap();
            let chain = AuditChain::open(
                Arc::new(SqliteAuditStore::new(db.pool())),
                signing_key(),
            )
            .await
            .unwrap();

            for (level, event, message, user) in entries {
                let mut draft = AuditDraft::new(level, event, message);
                if let Some(user) = user {
                    draft = draft.with_user(user);
                }
                chain.record(draft).await.unwrap();
            }

            let report = chain.verify().await.unwrap();
            prop_assert!(report.ok, "chain broke at {:?}", report.first_broken_seq);
            Ok(())
        })?;
    }

    /// Canonical value hashing is insensitive to object key order and
    /// sensitive to any value change.
    #[test]
    fn prop_value_hash_is_canonical(
        keys in prop::collection::hash_set("[a-z]{1,8}", 1..6),
        values in prop::collection::vec(0i64..1000, 6),
    ) {
        let pairs: Vec<(String, i64)> = keys
            .into_iter()
            .zip(values.iter().copied())
            .collect();

        let forward: serde_json::Map<String, serde_json::Value> = pairs
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::from(*v)))
            .collect();
        let reversed: serde_json::Map<String, serde_json::Value> = pairs
            .iter()
            .rev()
            .map(|(k, v)| (k.clone(), serde_json::Value::from(*v)))
            .collect();

        let a = sha256_hex_of_value(&serde_json::Value::Object(forward));
        let b = sha256_hex_of_value(&serde_json::Value::Object(reversed));
        prop_assert_eq!(&a, &b);

        // Changing one value changes the hash
        let mut mutated: Vec<(String, i64)> = pairs.clone();
        mutated[0].1 = mutated[0].1.wrapping_add(1);
        let mutated_map: serde_json::Map<String, serde_json::Value> = mutated
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::from(*v)))
            .collect();
        let c = sha256_hex_of_value(&serde_json::Value::Object(mutated_map));
        prop_assert_ne!(a, c);
    }
}

mod common;

use std::time::Duration;

use time::OffsetDateTime;

use pki_crl_engine::config::CrlConfig;
use pki_crl_engine::crl::{
    CRL_CONFIG_KEY, CRL_PREFIX, LEGACY_CRL_KEY, LOCAL_CRL_INDEX_KEY, LocalCrlIndex,
};
use pki_crl_engine::issuer::{IssuerId, LegacyCaBundle};
use pki_crl_engine::storage::{get_json, put_json};

use common::{add_ca, add_intermediate_ca, crl_summary, issue_cert, test_engine};

async fn crl_for_issuer(env: &common::TestEngine, issuer_id: &IssuerId) -> Vec<u8> {
    let index: LocalCrlIndex = get_json(env.storage.as_ref(), LOCAL_CRL_INDEX_KEY)
        .await
        .unwrap()
        .expect("cluster-local CRL index must exist");
    let crl_id = index
        .issuer_crl_map
        .get(issuer_id)
        .expect("issuer mapped to a CRL");
    env.storage
        .get(&format!("{CRL_PREFIX}{crl_id}"))
        .await
        .unwrap()
        .expect("CRL blob must exist")
}

#[tokio::test]
async fn empty_revocation_set_still_produces_signed_crl() {
    let env = test_engine();
    let ca = add_ca(&env, "i1", "Root X1", "k1").await;

    env.engine.rebuild(false).await.unwrap();

    let crl_der = crl_for_issuer(&env, &ca.id).await;
    let (serials, number) = crl_summary(&crl_der, &ca.cert_der);
    assert!(serials.is_empty());
    assert_eq!(number, "1");
}

#[tokio::test]
async fn crl_numbers_increase_across_rebuilds() {
    let env = test_engine();
    let ca = add_ca(&env, "i1", "Root X1", "k1").await;

    for expected in 1..=3u64 {
        env.engine.rebuild(false).await.unwrap();
        let crl_der = crl_for_issuer(&env, &ca.id).await;
        let (_, number) = crl_summary(&crl_der, &ca.cert_der);
        assert_eq!(number, expected.to_string());
    }
}

#[tokio::test]
async fn disabled_build_is_a_noop() {
    let env = test_engine();
    add_ca(&env, "i1", "Root X1", "k1").await;

    let config = CrlConfig {
        disable: true,
        ..CrlConfig::default()
    };
    put_json(env.storage.as_ref(), CRL_CONFIG_KEY, &config)
        .await
        .unwrap();

    env.engine.rebuild(false).await.unwrap();

    let index: Option<LocalCrlIndex> = get_json(env.storage.as_ref(), LOCAL_CRL_INDEX_KEY)
        .await
        .unwrap();
    assert!(index.is_none(), "disabled build must not touch storage");
}

#[tokio::test]
async fn disabled_forced_build_signs_empty_sentinel() {
    let env = test_engine();
    let ca = add_ca(&env, "i1", "Root X1", "k1").await;
    env.issuers
        .set_default_issuer(Some(ca.id.clone()))
        .await
        .unwrap();

    let serial = issue_cert(
        &env,
        &ca,
        "leaf.example.com",
        OffsetDateTime::now_utc() + Duration::from_secs(24 * 3600),
    )
    .await;
    env.engine.revoke(&serial, false).await.unwrap();

    let crl_der = crl_for_issuer(&env, &ca.id).await;
    let (serials, _) = crl_summary(&crl_der, &ca.cert_der);
    assert_eq!(serials, vec![serial]);

    // Disable, then force: the published CRL is re-signed empty even
    // though the revocation entry is still on record.
    let config = CrlConfig {
        disable: true,
        ..CrlConfig::default()
    };
    put_json(env.storage.as_ref(), CRL_CONFIG_KEY, &config)
        .await
        .unwrap();
    env.engine.mark_config_dirty();

    env.engine.rebuild(true).await.unwrap();

    let crl_der = crl_for_issuer(&env, &ca.id).await;
    let (serials, number) = crl_summary(&crl_der, &ca.cert_der);
    assert!(serials.is_empty());
    assert_eq!(number, "2");
}

#[tokio::test]
async fn revoked_issuer_appears_on_signers_crl_only() {
    let env = test_engine();
    let root = add_ca(&env, "root", "Root X1", "k-root").await;
    let intermediate =
        add_intermediate_ca(&env, &root, "int", "Intermediate R3", "k-int", true).await;

    env.engine.rebuild(false).await.unwrap();

    // The revoked intermediate publishes on the CRL of the root that
    // signed it.
    let root_crl = crl_for_issuer(&env, &root.id).await;
    let (serials, _) = crl_summary(&root_crl, &root.cert_der);
    assert_eq!(serials, vec![intermediate.serial.clone()]);

    // It never appears on its own CRL.
    let int_crl = crl_for_issuer(&env, &intermediate.id).await;
    let (serials, _) = crl_summary(&int_crl, &intermediate.cert_der);
    assert!(serials.is_empty());
}

#[tokio::test]
async fn orphaned_certs_without_default_issuer_are_dropped() {
    let env = test_engine();
    let keeper = add_ca(&env, "i1", "Keeper Root", "k1").await;
    let doomed = add_ca(&env, "i2", "Doomed Root", "k2").await;

    let serial = issue_cert(
        &env,
        &doomed,
        "orphan.example.com",
        OffsetDateTime::now_utc() + Duration::from_secs(24 * 3600),
    )
    .await;
    env.engine.revoke(&serial, false).await.unwrap();

    env.issuers.delete_issuer(&doomed.id).await.unwrap();
    env.engine.rebuild(false).await.unwrap();

    // No default issuer is configured, so the orphan lands nowhere.
    let keeper_crl = crl_for_issuer(&env, &keeper.id).await;
    let (serials, _) = crl_summary(&keeper_crl, &keeper.cert_der);
    assert!(serials.is_empty());
}

#[tokio::test]
async fn legacy_mode_writes_single_crl_without_index() {
    let env = test_engine();
    env.issuers.set_legacy_bundle_ca_storage(true);

    // The legacy bundle plays the role of the sole issuer.
    let ca = add_ca(&env, "unused", "Legacy Root", "k-legacy").await;
    env.issuers
        .save_legacy_bundle(&LegacyCaBundle {
            certificate: ca.cert_der.clone(),
            private_key: ca.key_der.clone(),
        })
        .await
        .unwrap();

    let serial = issue_cert(
        &env,
        &ca,
        "leaf.example.com",
        OffsetDateTime::now_utc() + Duration::from_secs(24 * 3600),
    )
    .await;

    let response = env.engine.revoke(&serial, false).await.unwrap();
    assert!(response.error.is_none());

    let crl_der = env
        .storage
        .get(LEGACY_CRL_KEY)
        .await
        .unwrap()
        .expect("legacy CRL must be written at the fixed path");
    let (serials, number) = crl_summary(&crl_der, &ca.cert_der);
    assert_eq!(serials, vec![serial]);
    assert_eq!(number, "1");

    // Legacy mode never persists the cluster-local index.
    let index: Option<LocalCrlIndex> = get_json(env.storage.as_ref(), LOCAL_CRL_INDEX_KEY)
        .await
        .unwrap();
    assert!(index.is_none());
}

//! Push/pull scenarios against an unreachable network: the local cache
//! must carry the whole round trip.

use lsh_secrets::{IpfsConfig, Secret, SecretSync, SyncScope};

const KEY: &str = "aabbccddeeff00112233445566778899aabbccddeeff00112233445566778899";

fn offline(dir: &tempfile::TempDir) -> SecretSync {
    SecretSync::open_with_ipfs(
        dir.path(),
        IpfsConfig {
            api_url: "http://127.0.0.1:9".to_string(),
            gateways: vec![
                "http://127.0.0.1:9/ipfs/".to_string(),
                "http://127.0.0.1:9/alt/".to_string(),
            ],
            api_timeout: std::time::Duration::from_millis(200),
            gateway_timeout: std::time::Duration::from_millis(200),
        },
    )
    .unwrap()
}

#[tokio::test]
async fn push_pull_equals_pushed_list_with_daemon_down() {
    let dir = tempfile::tempdir().unwrap();
    let sync = offline(&dir);

    let secrets = vec![Secret::new("A", "1")];
    let outcome = sync
        .push(&secrets, &SyncScope::env("dev"), KEY)
        .await
        .unwrap();

    assert!(outcome.cid.starts_with("bafkrei"));
    assert_eq!(outcome.cid.len(), 59);
    assert!(!outcome.uploaded);

    let pulled = sync.pull(&SyncScope::env("dev"), KEY).await.unwrap();
    assert_eq!(pulled, secrets);

    // The cache file the metadata points at actually exists.
    let cache_file = dir
        .path()
        .join("secrets-cache")
        .join(format!("{}.encrypted", outcome.cid));
    assert!(cache_file.exists());
}

#[tokio::test]
async fn wrong_key_never_yields_secrets_or_leaks() {
    let dir = tempfile::tempdir().unwrap();
    let sync = offline(&dir);

    let secrets = vec![Secret::new("TOKEN", "super-sensitive-value")];
    sync.push(&secrets, &SyncScope::env("dev"), "first-key")
        .await
        .unwrap();

    let err = sync
        .pull(&SyncScope::env("dev"), "second-key")
        .await
        .unwrap_err();
    let message = err.to_string();
    assert!(!message.contains("super-sensitive-value"));
    assert!(!message.contains("first-key"));
}

#[tokio::test]
async fn repeated_pushes_keep_every_bundle_retrievable_locally() {
    let dir = tempfile::tempdir().unwrap();
    let sync = offline(&dir);
    let scope = SyncScope::env("dev");

    let v1 = sync
        .push(&[Secret::new("A", "1")], &scope, KEY)
        .await
        .unwrap();
    let v2 = sync
        .push(&[Secret::new("A", "2")], &scope, KEY)
        .await
        .unwrap();

    // Latest wins through metadata.
    let pulled = sync.pull(&scope, KEY).await.unwrap();
    assert_eq!(pulled, vec![Secret::new("A", "2")]);

    // Both payloads remain cached by CID.
    for outcome in [&v1, &v2] {
        assert!(dir
            .path()
            .join("secrets-cache")
            .join(format!("{}.encrypted", outcome.cid))
            .exists());
    }
    assert_eq!(sync.history().len(), 2);
}

use anyhow::Result;
use tempfile::tempdir;

use guava_scan::CredentialStore;

#[test]
fn accounts_persist_across_reopen() -> Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("users.db");
    let db_path = db_path.to_string_lossy().to_string();

    {
        let store = CredentialStore::open(&db_path)?;
        assert_eq!(store.seed_defaults()?, 2);
        store.upsert_user("grower", "Orchard Grower", "jambu")?;
    }

    let store = CredentialStore::open(&db_path)?;
    assert_eq!(store.user_count()?, 3);
    assert_eq!(store.verify("admin", "123")?, Some("Admin".to_string()));
    assert_eq!(store.verify("grower", "jambu")?, Some("Orchard Grower".to_string()));
    assert_eq!(store.verify("grower", "JAMBU")?, None);
    Ok(())
}

#[test]
fn upsert_replaces_password() -> Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("users.db").to_string_lossy().to_string();
    let store = CredentialStore::open(&db_path)?;
    store.upsert_user("user1", "User 1", "pass1")?;
    store.upsert_user("user1", "User One", "pass2")?;

    assert_eq!(store.verify("user1", "pass1")?, None);
    assert_eq!(store.verify("user1", "pass2")?, Some("User One".to_string()));
    assert_eq!(store.user_count()?, 1);
    Ok(())
}

#[test]
fn empty_username_is_rejected() -> Result<()> {
    let store = CredentialStore::in_memory()?;
    assert!(store.upsert_user("  ", "Nobody", "x").is_err());
    Ok(())
}

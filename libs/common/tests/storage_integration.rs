//! Integration tests for the file-backed store
//!
//! These tests verify that credentials written through one `FileStore`
//! instance are visible to a fresh instance opened on the same path, which
//! is what session restoration after a restart relies on.

use common::storage::{FileStore, KeyValueStore};

fn temp_path() -> std::path::PathBuf {
    std::env::temp_dir()
        .join(format!("attendance-{}", uuid::Uuid::new_v4()))
        .join("session.json")
}

/// Test that values survive reopening the store
#[test]
fn test_file_store_persists_across_instances() -> Result<(), Box<dyn std::error::Error>> {
    let path = temp_path();

    {
        let store = FileStore::open(&path)?;
        store.set("accessToken", "access")?;
        store.set("refreshToken", "refresh")?;
        store.set("user", r#"{"full_name":"A","email":"a@b.co","role":"admin"}"#)?;
    }

    let reopened = FileStore::open(&path)?;
    assert_eq!(reopened.get("accessToken")?, Some("access".to_string()));
    assert_eq!(reopened.get("refreshToken")?, Some("refresh".to_string()));
    assert!(reopened.get("user")?.is_some(), "user slot should persist");

    // Clean up - remove every slot and verify the next instance sees nothing
    reopened.remove("accessToken")?;
    reopened.remove("refreshToken")?;
    reopened.remove("user")?;

    let emptied = FileStore::open(&path)?;
    assert_eq!(emptied.get("accessToken")?, None);
    assert_eq!(emptied.get("refreshToken")?, None);
    assert_eq!(emptied.get("user")?, None);

    if let Some(dir) = path.parent() {
        let _ = std::fs::remove_dir_all(dir);
    }

    Ok(())
}

/// A missing file opens as an empty store without creating anything
#[test]
fn test_open_missing_file_is_empty() -> Result<(), Box<dyn std::error::Error>> {
    let path = temp_path();
    let store = FileStore::open(&path)?;

    assert_eq!(store.get("accessToken")?, None);
    assert!(!path.exists(), "opening should not create the file");

    Ok(())
}

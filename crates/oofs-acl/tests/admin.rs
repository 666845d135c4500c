use std::fs;
use std::path::Path;

use oofs_acl::{AccessTable, AclError, AdminError, Mode, WILDCARD};
use tempfile::TempDir;

#[test]
fn test_missing_file_without_create_is_config_error() {
    let temp = TempDir::new().unwrap();
    let err = AccessTable::load(&temp.path().join("rapasswords"), false).unwrap_err();
    assert!(matches!(err, AclError::Unreadable { .. }));
}

#[test]
fn test_edits_persist_and_reload() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("vlab").join("rapasswords");

    let mut table = AccessTable::load(&file, true).unwrap();
    assert!(file.exists());
    table.add_user("bob", "hunter2").unwrap();
    table.add_rule(WILDCARD, "r", Path::new("/a")).unwrap();
    table.add_rule("bob", "rw", Path::new("/a/b")).unwrap();

    let reloaded = AccessTable::load(&file, false).unwrap();
    assert!(reloaded.authenticate("bob", "hunter2"));
    assert!(reloaded.test("bob", Path::new("/a/b/c"), Mode::WRITE));
    assert!(!reloaded.test("carol", Path::new("/a/b/c"), Mode::WRITE));
    assert!(reloaded.test("carol", Path::new("/a/b/c"), Mode::READ));

    // The wildcard block is written first
    let text = fs::read_to_string(&file).unwrap();
    assert!(text.starts_with("all::\n:1:0:/a\n"));
    assert!(!temp.path().join("vlab/rapasswords.tmp").exists());
}

#[test]
fn test_admin_outcomes() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("rapasswords");
    let mut table = AccessTable::load(&file, true).unwrap();

    table.add_user("bob", "pw").unwrap();
    assert!(matches!(table.add_user("bob", "pw"), Err(AdminError::Duplicate(_))));
    assert!(matches!(table.delete_user("nobody"), Err(AdminError::NotFound(_))));
    assert!(matches!(
        table.add_rule("bob", "rwx", Path::new("/db")),
        Err(AdminError::MalformedMode(_))
    ));
    assert!(matches!(
        table.add_rule("carol", "r", Path::new("/db")),
        Err(AdminError::NotFound(_))
    ));

    table.add_rule("bob", "r", Path::new("/db")).unwrap();
    assert!(matches!(
        table.add_rule("bob", "w", Path::new("/db/")),
        Err(AdminError::Duplicate(_))
    ));
    table.change_rule("bob", Path::new("/db"), "-").unwrap();
    assert!(!table.test("bob", Path::new("/db/x"), Mode::READ));
    table.delete_rule("bob", Path::new("/db")).unwrap();
    assert!(matches!(
        table.delete_rule("bob", Path::new("/db")),
        Err(AdminError::NotFound(_))
    ));

    table.add_user("alice", "pw").unwrap();
    assert!(matches!(
        table.change_login("bob", "alice"),
        Err(AdminError::Duplicate(_))
    ));
    for bad in ["", "bo:b", "bo b", "bob\t", " bob"] {
        assert!(matches!(table.add_user(bad, "pw"), Err(AdminError::NotFound(_))));
    }
    assert!(matches!(
        table.change_login("bob", "rob ert"),
        Err(AdminError::NotFound(_))
    ));
    table.change_login("bob", "robert").unwrap();
    table.change_password("robert", "new").unwrap();

    let reloaded = AccessTable::load(&file, false).unwrap();
    assert!(reloaded.subject("bob").is_none());
    assert!(reloaded.authenticate("robert", "new"));
    assert!(!reloaded.authenticate("robert", "pw"));
}

#[test]
fn test_persist_failure_is_reported() {
    let temp = TempDir::new().unwrap();
    // The temporary sibling cannot be created over a directory
    fs::create_dir(temp.path().join("rapasswords.tmp")).unwrap();

    let err = AccessTable::load(&temp.path().join("rapasswords"), true).unwrap_err();
    assert!(matches!(err, AclError::Create(AdminError::PersistFailed(_))));
}

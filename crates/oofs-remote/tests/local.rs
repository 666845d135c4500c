//! Operations through a connection pinned to this machine.

use std::fs;
use std::path::PathBuf;

use oofs_config::testing::TestEnvironment;
use oofs_identity::{ConflictPolicy, PastePolicy, Store};
use oofs_remote::{compare_between, copy_between, Connection, OofsError};
use oofs_wire::FileKind;
use uuid::Uuid;

fn setup() -> (TestEnvironment, Connection) {
    let env = TestEnvironment::new().unwrap();
    Store::init(&env.store_root).unwrap();
    let conn = Connection::local(&env.config());
    (env, conn)
}

#[tokio::test]
async fn test_file_round_trip() {
    let (env, mut conn) = setup();
    let file = env.store_root.join("notes.txt");

    conn.write_file(&file, b"hello".to_vec()).await.unwrap();
    assert_eq!(conn.read_file(&file).await.unwrap(), b"hello");

    let stat = conn.stat(&file).await.unwrap();
    assert_eq!(stat.kind, FileKind::File);
    assert_eq!(stat.size, 5);

    let names: Vec<String> = conn
        .list(&env.store_root)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert!(names.contains(&"notes.txt".to_string()));

    let err = conn.read_file(env.store_root.join("missing")).await.unwrap_err();
    assert!(matches!(err, OofsError::NotFound(_)));
}

#[tokio::test]
async fn test_copy_never_steals_identity() {
    let (env, mut conn) = setup();
    let rose = env.create_object("ext/rose").unwrap();
    env.create_file("ext/rose/page.xml", b"<p/>").unwrap();
    let uuid = conn.get_uuid(&env.store_root, &rose, true).await.unwrap();
    assert!(!uuid.is_nil());

    let copy = env.store_root.join("ext/rose2");
    conn.copy(&rose, &copy).await.unwrap();

    assert_eq!(fs::read(copy.join("page.xml")).unwrap(), b"<p/>");
    assert_eq!(conn.get_uuid(&env.store_root, &rose, false).await.unwrap(), uuid);
    assert_eq!(
        conn.get_uuid(&env.store_root, &copy, false).await.unwrap(),
        Uuid::nil()
    );
    assert_eq!(
        conn.lookup_uuid(&env.store_root, uuid).await.unwrap(),
        Some(rose)
    );
}

#[tokio::test]
async fn test_rename_follows_identity() {
    let (env, mut conn) = setup();
    let rose = env.create_object("ext/rose").unwrap();
    let uuid = conn.get_uuid(&env.store_root, &rose, true).await.unwrap();

    let moved = env.store_root.join("ext/tulip");
    conn.rename(&rose, &moved).await.unwrap();
    assert_eq!(
        conn.lookup_uuid(&env.store_root, uuid).await.unwrap(),
        Some(moved.clone())
    );

    conn.remove_all(&moved).await.unwrap();
    assert_eq!(conn.lookup_uuid(&env.store_root, uuid).await.unwrap(), None);
}

#[tokio::test]
async fn test_archive_then_paste() {
    let (env, mut conn) = setup();
    let rose = env.create_object("ext/rose").unwrap();
    env.create_file("ext/rose/page.xml", b"<p/>").unwrap();
    let uuid = conn.get_uuid(&env.store_root, &rose, true).await.unwrap();

    let blob = conn.archive(&rose, true).await.unwrap();
    let pasted = env.store_root.join("ext/rose-copy");
    conn.paste(&pasted, blob.clone(), PastePolicy::Renew)
        .await
        .unwrap();
    let renewed = conn.get_uuid(&env.store_root, &pasted, false).await.unwrap();
    assert!(!renewed.is_nil());
    assert_ne!(renewed, uuid);
    assert_eq!(fs::read(pasted.join("page.xml")).unwrap(), b"<p/>");

    let err = conn
        .paste(&pasted, blob, PastePolicy::Renew)
        .await
        .unwrap_err();
    assert!(matches!(err, OofsError::AlreadyExists(_)));
}

#[tokio::test]
async fn test_dearchive_favors_table() {
    let (env, mut conn) = setup();
    let rose = env.create_object("ext/rose").unwrap();
    let uuid = conn.get_uuid(&env.store_root, &rose, true).await.unwrap();

    // The archive holds the object's identity file
    let blob = conn.archive(&rose, true).await.unwrap();
    let dest = env.store_root.join("ext/twin");
    conn.dearchive(&dest, blob).await.unwrap();

    assert_eq!(
        conn.get_uuid(&env.store_root, &dest, false).await.unwrap(),
        Uuid::nil()
    );
    let log = conn
        .reconcile(&env.store_root, &env.store_root, true, ConflictPolicy::FavorTable)
        .await
        .unwrap();
    assert!(log.is_empty());
    assert_eq!(
        conn.lookup_uuid(&env.store_root, uuid).await.unwrap(),
        Some(rose)
    );
}

#[tokio::test]
async fn test_links_and_prototype() {
    let (env, mut conn) = setup();
    env.create_file("style.css", b"body{}").unwrap();
    let nested = env.create_file("a/b/style.css", b"body{}").unwrap();

    assert!(conn.prototype(&nested).await.unwrap());
    assert_eq!(
        conn.read_link(&nested).await.unwrap(),
        PathBuf::from("../../style.css")
    );
    assert_eq!(
        conn.real_path(&nested).await.unwrap(),
        fs::canonicalize(env.store_root.join("style.css")).unwrap()
    );

    let link = env.store_root.join("alias");
    conn.symlink("style.css", &link).await.unwrap();
    assert_eq!(conn.stat(&link).await.unwrap().kind, FileKind::Symlink);
}

#[tokio::test]
async fn test_make_and_remove_dir() {
    let (env, mut conn) = setup();
    let dir = env.store_root.join("scratch");
    conn.make_dir(&dir).await.unwrap();
    assert!(matches!(
        conn.make_dir(&dir).await.unwrap_err(),
        OofsError::AlreadyExists(_)
    ));
    conn.remove_dir(&dir).await.unwrap();
    assert!(!dir.exists());
}

#[tokio::test]
async fn test_two_sided_local_copy_and_compare() {
    let (env, mut left) = setup();
    let mut right = Connection::local(&env.config());
    let src = env.create_file("in.bin", &[7u8; 3000]).unwrap();
    let dst = env.store_root.join("out.bin");

    copy_between(&mut left, &src, &mut right, &dst).await.unwrap();
    assert!(compare_between(&mut left, &src, &mut right, &dst)
        .await
        .unwrap());

    fs::write(&dst, b"changed").unwrap();
    assert!(!compare_between(&mut left, &src, &mut right, &dst)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_fix_oofs_collects_unreferenced_identities() {
    let (env, mut conn) = setup();
    let rose = env.create_object("ext/rose").unwrap();
    conn.get_uuid(&env.store_root, &rose, true).await.unwrap();

    conn.fix_oofs(&env.store_root, false).await.unwrap();
    assert_eq!(
        conn.get_uuid(&env.store_root, &rose, false).await.unwrap(),
        Uuid::nil()
    );
}

use std::fs;
use std::os::unix::fs::PermissionsExt;

use oofs_pack::{pack, unpack, UnpackStats};
use tempfile::TempDir;

fn sample_tree(root: &std::path::Path) {
    fs::create_dir_all(root.join("ext/rose/ext/leaf")).unwrap();
    fs::write(root.join(".oofs_uuid"), "{00000000-0000-4000-8000-000000000001}\n").unwrap();
    fs::write(root.join("ext/rose/panel.xml"), "<panel/>").unwrap();
    fs::write(root.join("ext/rose/ext/leaf/run.sh"), "#!/bin/sh\n").unwrap();
    fs::set_permissions(
        root.join("ext/rose/ext/leaf/run.sh"),
        fs::Permissions::from_mode(0o755),
    )
    .unwrap();
    std::os::unix::fs::symlink("../../panel.xml", root.join("ext/rose/ext/alias")).unwrap();
}

#[test]
fn test_recursive_archive_recreates_tree() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    let dest = temp.path().join("dest");
    sample_tree(&src);

    let bytes = pack(&src, true).unwrap();
    let stats = unpack(&bytes, &dest).unwrap();

    assert_eq!(
        stats,
        UnpackStats {
            dirs: 4,
            files: 3,
            links: 1,
            bytes: (39 + 8 + 10) as u64,
        }
    );
    assert_eq!(
        fs::read_to_string(dest.join("ext/rose/panel.xml")).unwrap(),
        "<panel/>"
    );
    let mode = fs::metadata(dest.join("ext/rose/ext/leaf/run.sh"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o755);
    assert_eq!(
        fs::read_link(dest.join("ext/rose/ext/alias")).unwrap(),
        std::path::PathBuf::from("../../panel.xml")
    );
}

#[test]
fn test_shallow_archive_omits_subdirectories() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    let dest = temp.path().join("dest");
    sample_tree(&src);

    let bytes = pack(&src, false).unwrap();
    let stats = unpack(&bytes, &dest).unwrap();

    assert_eq!(stats.dirs, 0);
    assert_eq!(stats.files, 1);
    assert!(dest.join(".oofs_uuid").is_file());
    assert!(!dest.join("ext").exists());
}

#[test]
fn test_unpack_over_existing_replaces_files() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    let dest = temp.path().join("dest");
    sample_tree(&src);
    fs::create_dir_all(dest.join("ext/rose")).unwrap();
    fs::write(dest.join("ext/rose/panel.xml"), "stale").unwrap();
    fs::write(dest.join("keep.txt"), "untouched").unwrap();

    unpack(&pack(&src, true).unwrap(), &dest).unwrap();

    assert_eq!(
        fs::read_to_string(dest.join("ext/rose/panel.xml")).unwrap(),
        "<panel/>"
    );
    assert_eq!(fs::read_to_string(dest.join("keep.txt")).unwrap(), "untouched");
}

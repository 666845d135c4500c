//! End-to-end sessions against a worker on the loopback interface.

use std::fs;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use oofs_acl::{AccessTable, WILDCARD};
use oofs_config::testing::TestEnvironment;
use oofs_daemon::Server;
use oofs_identity::{ConflictPolicy, PastePolicy, Store};
use oofs_remote::{
    compare_between, copy_between, Connection, Locality, OofsError, ProgressSink, Target,
};
use oofs_wire::{
    login_payload, opcode, Channel, FileKind, WireError, LOGIN_CONFIRMED, PROTOCOL_VERSION,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

struct Harness {
    env: TestEnvironment,
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
}

impl Harness {
    /// Store at `<env>/db`; bob and carol may read it all and write under
    /// `ext/`.
    async fn start() -> Self {
        let env = TestEnvironment::new().unwrap();
        Store::init(&env.store_root).unwrap();
        env.create_object("ext").unwrap();

        let config = env.config();
        let mut acl = AccessTable::load(&config.password_file(), true).unwrap();
        acl.add_user("bob", "hunter2").unwrap();
        acl.add_rule(WILDCARD, "r", &env.store_root).unwrap();
        acl.add_rule("bob", "rw", &env.store_root.join("ext")).unwrap();
        acl.add_user("carol", "tulip").unwrap();
        acl.add_rule("carol", "rw", &env.store_root.join("ext")).unwrap();

        let server = Server::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        tokio::spawn(server.run_until(async move {
            let _ = stopped.await;
        }));
        Self {
            env,
            addr,
            stop: Some(stop),
        }
    }

    fn connect(&self, login: &str, password: &str) -> Connection {
        let target = Target::new("127.0.0.1", self.addr.port(), login, password);
        Connection::new(target, &self.env.config()).with_locality(Locality::Remote)
    }

    fn connect_counted(&self, login: &str, password: &str, counter: &Arc<Transfers>) -> Connection {
        self.connect(login, password)
            .with_progress(Arc::clone(counter) as Arc<dyn ProgressSink>)
    }
}

/// Counts blob transfers, so a server-side copy can be told from a staged one.
#[derive(Default)]
struct Transfers(AtomicUsize);

impl Transfers {
    fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl ProgressSink for Transfers {
    fn start(&self, _label: &str, _total: u64) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    fn update(&self, _done: u64, _total: u64) {}
}

impl Drop for Harness {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

#[tokio::test]
async fn test_write_read_stat_round_trip() {
    let harness = Harness::start().await;
    let mut conn = harness.connect("bob", "hunter2");
    let file = harness.env.store_root.join("ext/notes.txt");

    conn.write_file(&file, b"remote bytes".to_vec()).await.unwrap();
    assert_eq!(conn.read_file(&file).await.unwrap(), b"remote bytes");
    let stat = conn.stat(&file).await.unwrap();
    assert_eq!(stat.kind, FileKind::File);
    assert_eq!(stat.size, 12);
    assert!(!conn.is_connected());
}

#[tokio::test]
async fn test_wrong_password_is_protocol_error_without_side_effects() {
    let harness = Harness::start().await;
    let mut conn = harness.connect("bob", "wrong");
    let file = harness.env.store_root.join("ext/never.txt");

    let err = conn.write_file(&file, b"x".to_vec()).await.unwrap_err();
    assert!(matches!(err, OofsError::Protocol(_)));
    assert!(!err.is_transport());
    assert!(!file.exists());
}

#[tokio::test]
async fn test_denied_request_keeps_sticky_session() {
    let harness = Harness::start().await;
    let mut conn = harness.connect("bob", "hunter2");
    conn.set_sticky(true);

    let outside = harness.env.store_root.join("top.txt");
    let err = conn.write_file(&outside, b"nope".to_vec()).await.unwrap_err();
    assert!(matches!(err, OofsError::AccessDenied(_)));
    assert!(!outside.exists());
    assert!(conn.is_connected());

    let inside = harness.env.store_root.join("ext/ok.txt");
    conn.write_file(&inside, b"yes".to_vec()).await.unwrap();
    assert_eq!(fs::read(&inside).unwrap(), b"yes");
    conn.close().await.unwrap();
    assert!(!conn.is_connected());
}

#[tokio::test]
async fn test_large_transfer_spans_many_blocks() {
    let harness = Harness::start().await;
    let mut conn = harness.connect("bob", "hunter2");
    let file = harness.env.store_root.join("ext/big.bin");
    let data: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();

    conn.write_file(&file, data.clone()).await.unwrap();
    assert_eq!(fs::read(&file).unwrap(), data);
    assert_eq!(conn.read_file(&file).await.unwrap(), data);
}

#[tokio::test]
async fn test_missing_file_is_semantic_failure() {
    let harness = Harness::start().await;
    let mut conn = harness.connect("bob", "hunter2");
    let err = conn
        .read_file(harness.env.store_root.join("ext/missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, OofsError::NotFound(_)));
}

#[tokio::test]
async fn test_remote_paste_and_identity_lookup() {
    let harness = Harness::start().await;
    let mut conn = harness.connect("bob", "hunter2");
    let root = &harness.env.store_root;
    let rose = harness.env.create_object("ext/rose").unwrap();
    harness.env.create_file("ext/rose/page.xml", b"<p/>").unwrap();

    let uuid = conn.get_uuid(root, &rose, true).await.unwrap();
    let blob = conn.archive(&rose, true).await.unwrap();
    let pasted = root.join("ext/rose-copy");
    conn.paste(&pasted, blob, PastePolicy::Renew).await.unwrap();

    assert_eq!(fs::read(pasted.join("page.xml")).unwrap(), b"<p/>");
    let renewed = conn.get_uuid(root, &pasted, false).await.unwrap();
    assert_ne!(renewed, uuid);
    assert_eq!(conn.lookup_uuid(root, uuid).await.unwrap(), Some(rose));
    assert_eq!(conn.lookup_uuid(root, renewed).await.unwrap(), Some(pasted));
}

#[tokio::test]
async fn test_copy_from_remote_to_local_stages_through_temp() {
    let harness = Harness::start().await;
    let mut remote = harness.connect("bob", "hunter2");
    let mut local = Connection::local(&harness.env.config());
    let src = harness.env.create_file("ext/source.txt", b"staged").unwrap();
    let dst = harness.env.temp_dir.join("fetched.txt");

    copy_between(&mut remote, &src, &mut local, &dst).await.unwrap();
    assert_eq!(fs::read(&dst).unwrap(), b"staged");
}

#[tokio::test]
async fn test_worker_accepts_login_without_version_step() {
    let harness = Harness::start().await;
    let stream = TcpStream::connect(harness.addr).await.unwrap();
    let mut channel = Channel::new(stream);

    channel
        .send(opcode::LOGIN_REQUEST, &login_payload("bob", "hunter2"))
        .await
        .unwrap();
    let reply = channel.receive(opcode::LOGIN_RESPONSE).await.unwrap();
    assert_eq!(reply.payload, LOGIN_CONFIRMED.as_bytes());

    channel.send(opcode::LOGOUT_REQUEST, &[]).await.unwrap();
    channel.receive(opcode::LOGOUT_RESPONSE).await.unwrap();
}

#[tokio::test]
async fn test_links_cannot_leave_the_grant() {
    let harness = Harness::start().await;
    let mut conn = harness.connect("bob", "hunter2");
    let ext = harness.env.store_root.join("ext");
    let secret = harness.env.temp_dir.join("secret.txt");
    fs::write(&secret, b"s3cret").unwrap();
    let password_file = harness.env.config().password_file();
    let passwords = fs::read(&password_file).unwrap();

    // Links planted by someone with shell access
    std::os::unix::fs::symlink(&secret, ext.join("esc")).unwrap();
    std::os::unix::fs::symlink(&password_file, ext.join("pw")).unwrap();
    std::os::unix::fs::symlink(&harness.env.temp_dir, ext.join("tmp")).unwrap();

    let err = conn.read_file(ext.join("esc")).await.unwrap_err();
    assert!(matches!(err, OofsError::AccessDenied(_)), "{}", err);
    let err = conn.read_file(ext.join("tmp/secret.txt")).await.unwrap_err();
    assert!(matches!(err, OofsError::AccessDenied(_)), "{}", err);
    let err = conn
        .write_file(ext.join("pw"), b"bob:x\n".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, OofsError::AccessDenied(_)), "{}", err);
    assert_eq!(fs::read(&password_file).unwrap(), passwords);

    // Nor may bob create one
    let err = conn.symlink(&secret, ext.join("esc2")).await.unwrap_err();
    assert!(matches!(err, OofsError::AccessDenied(_)), "{}", err);
    assert!(fs::symlink_metadata(ext.join("esc2")).is_err());

    // Copying onto a planted link replaces the link
    let top = harness.env.create_file("top.txt", b"top").unwrap();
    conn.copy(&top, ext.join("esc")).await.unwrap();
    assert!(fs::symlink_metadata(ext.join("esc")).unwrap().is_file());
    assert_eq!(fs::read(&secret).unwrap(), b"s3cret");

    // Links that stay inside what bob may touch work as before
    conn.write_file(ext.join("notes.txt"), b"mine".to_vec())
        .await
        .unwrap();
    conn.symlink("notes.txt", ext.join("alias")).await.unwrap();
    assert_eq!(conn.read_file(ext.join("alias")).await.unwrap(), b"mine");
    conn.write_file(ext.join("alias"), b"edited".to_vec())
        .await
        .unwrap();
    assert_eq!(fs::read(ext.join("notes.txt")).unwrap(), b"edited");

    // A link to readable data reads but stays read-only
    std::os::unix::fs::symlink(&top, ext.join("top")).unwrap();
    assert_eq!(conn.read_file(ext.join("top")).await.unwrap(), b"top");
    let err = conn
        .write_file(ext.join("top"), b"changed".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, OofsError::AccessDenied(_)), "{}", err);
    assert_eq!(fs::read(&top).unwrap(), b"top");
}

#[tokio::test]
async fn test_keeping_identities_needs_write_on_the_store() {
    let harness = Harness::start().await;
    let mut conn = harness.connect("bob", "hunter2");
    let root = &harness.env.store_root;
    let alice = harness.env.create_object("alice").unwrap();
    harness.env.create_file("alice/page.xml", b"<p/>").unwrap();
    let uuid = Store::open(root).get_uuid(&alice, true).unwrap();

    let blob = conn.archive(&alice, true).await.unwrap();
    let mine = root.join("ext/mine");
    let err = conn
        .paste(&mine, blob.clone(), PastePolicy::Preserve)
        .await
        .unwrap_err();
    assert!(matches!(err, OofsError::AccessDenied(_)), "{}", err);
    assert!(!mine.exists());
    assert_eq!(Store::open(root).lookup_uuid(uuid).unwrap(), Some(alice.clone()));

    conn.paste(&mine, blob, PastePolicy::Renew).await.unwrap();
    assert_ne!(conn.get_uuid(root, &mine, false).await.unwrap(), uuid);
    assert_eq!(Store::open(root).lookup_uuid(uuid).unwrap(), Some(alice));

    let ext = root.join("ext");
    let err = conn
        .reconcile(root, &ext, true, ConflictPolicy::FavorTree)
        .await
        .unwrap_err();
    assert!(matches!(err, OofsError::AccessDenied(_)), "{}", err);
    conn.reconcile(root, &ext, true, ConflictPolicy::FavorTable)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_version_mismatch_fails_before_any_request() {
    let env = TestEnvironment::new().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let peer = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut channel = Channel::new(stream);
        let offered: u32 = channel
            .receive_value(opcode::VERSION_REQUEST)
            .await
            .unwrap();
        assert_eq!(offered, PROTOCOL_VERSION);
        channel
            .send_value(opcode::VERSION_RESPONSE, &99u32)
            .await
            .unwrap();
        // Nothing else may arrive: no login, no request
        channel.receive_first().await.map(|m| m.code)
    });

    let target = Target::new("127.0.0.1", port, "bob", "hunter2");
    let mut conn = Connection::new(target, &env.config()).with_locality(Locality::Remote);
    let file = env.store_root.join("never.txt");
    let err = conn.write_file(&file, b"x".to_vec()).await.unwrap_err();
    assert!(matches!(err, OofsError::Protocol(_)), "{}", err);
    assert!(!err.is_transport());
    assert!(!conn.is_connected());
    assert!(!file.exists());

    let after = peer.await.unwrap();
    assert!(matches!(after, Err(WireError::Closed)), "{:?}", after);
}

#[tokio::test]
async fn test_next_call_reconnects_after_transport_failure() {
    let harness = Harness::start().await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = Arc::new(harness.env.config());

    // The first session dies mid-request; the second is a real worker
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut channel = Channel::new(stream);
        let _: u32 = channel
            .receive_value(opcode::VERSION_REQUEST)
            .await
            .unwrap();
        channel
            .send_value(opcode::VERSION_RESPONSE, &PROTOCOL_VERSION)
            .await
            .unwrap();
        channel.receive(opcode::LOGIN_REQUEST).await.unwrap();
        channel
            .send(opcode::LOGIN_RESPONSE, LOGIN_CONFIRMED.as_bytes())
            .await
            .unwrap();
        channel.receive(opcode::STAT).await.unwrap();
        drop(channel);

        let (stream, peer) = listener.accept().await.unwrap();
        oofs_daemon::session::serve(stream, peer, config).await;
    });

    let target = Target::new("127.0.0.1", port, "bob", "hunter2");
    let mut conn =
        Connection::new(target, &harness.env.config()).with_locality(Locality::Remote);
    conn.set_sticky(true);
    let file = harness.env.create_file("ext/after.txt", b"back").unwrap();

    let err = conn.stat(&file).await.unwrap_err();
    assert!(err.is_transport(), "{}", err);
    assert!(!conn.is_connected());

    assert_eq!(conn.read_file(&file).await.unwrap(), b"back");
    assert!(conn.is_connected());
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_same_account_copy_and_compare_stay_on_the_server() {
    let harness = Harness::start().await;
    let transfers = Arc::new(Transfers::default());
    let mut from = harness.connect_counted("bob", "hunter2", &transfers);
    let mut to = harness.connect_counted("bob", "hunter2", &transfers);
    let src = harness.env.create_file("ext/a.txt", b"server side").unwrap();
    let dst = harness.env.store_root.join("ext/b.txt");

    copy_between(&mut from, &src, &mut to, &dst).await.unwrap();
    assert_eq!(fs::read(&dst).unwrap(), b"server side");
    assert!(compare_between(&mut from, &src, &mut to, &dst).await.unwrap());
    assert_eq!(transfers.count(), 0);
    assert!(fs::read_dir(&harness.env.temp_dir).unwrap().next().is_none());
}

#[tokio::test]
async fn test_different_accounts_copy_and_compare_through_staging() {
    let harness = Harness::start().await;
    let transfers = Arc::new(Transfers::default());
    let mut bob = harness.connect_counted("bob", "hunter2", &transfers);
    let mut carol = harness.connect_counted("carol", "tulip", &transfers);
    let src = harness.env.create_file("ext/from-bob.txt", b"handed over").unwrap();
    let dst = harness.env.store_root.join("ext/for-carol.txt");

    copy_between(&mut bob, &src, &mut carol, &dst).await.unwrap();
    assert_eq!(fs::read(&dst).unwrap(), b"handed over");
    // One download from bob, one upload to carol
    assert_eq!(transfers.count(), 2);

    assert!(compare_between(&mut bob, &src, &mut carol, &dst).await.unwrap());
    assert_eq!(transfers.count(), 4);
    // Staged copies are gone once the call returns
    assert!(fs::read_dir(&harness.env.temp_dir).unwrap().next().is_none());
}

#[tokio::test]
async fn test_compare_remote_file_with_local_file() {
    let harness = Harness::start().await;
    let mut remote = harness.connect("bob", "hunter2");
    let mut local = Connection::local(&harness.env.config());
    let there = harness.env.create_file("ext/page.xml", b"<page/>").unwrap();
    let same = harness.env.temp_dir.join("same.xml");
    let other = harness.env.temp_dir.join("other.xml");
    fs::write(&same, b"<page/>").unwrap();
    fs::write(&other, b"<page>edited</page>").unwrap();

    assert!(compare_between(&mut remote, &there, &mut local, &same).await.unwrap());
    assert!(!compare_between(&mut remote, &there, &mut local, &other).await.unwrap());
    assert!(!compare_between(&mut local, &other, &mut remote, &there).await.unwrap());
}

//! One handle for a store location, whether it lives on this machine or on a
//! remote `oofsd`.
//!
//! Every call funnels through [`Connection::execute`], which classifies the
//! target once and then either runs the operation on the local disk or sends
//! it over a [`Channel`] to a session worker.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::ifaddrs::getifaddrs;
use oofs_config::{log_conn_debug, log_conn_info, log_conn_warn, ClientConfig, Config};
use oofs_identity::{AuditLog, ConflictPolicy, PastePolicy};
use oofs_wire::{
    login_payload, opcode, Channel, DirEntry, FileStat, Operation, Outcome, Reply, WireError,
    LOGIN_CONFIRMED, PROTOCOL_VERSION,
};
use tokio::net::TcpStream;
use tracing::field::display;
use uuid::Uuid;

use crate::context::{OpContext, ProgressSink};
use crate::local::{Executed, LocalFs};
use crate::{OofsError, Result};

/// Where a store lives and who to log in as.
#[derive(Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub login: String,
    pub password: String,
}

impl Target {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        login: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            login: login.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("login", &self.login)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.login, self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locality {
    Local,
    Remote,
}

/// Local when any resolved address is loopback or bound on this machine.
pub fn classify(resolved: &[IpAddr], local: &[IpAddr]) -> Locality {
    let here = resolved
        .iter()
        .any(|addr| addr.is_loopback() || local.contains(addr));
    if here {
        Locality::Local
    } else {
        Locality::Remote
    }
}

/// Addresses bound on this machine's interfaces.
pub fn local_addresses() -> Result<Vec<IpAddr>> {
    let interfaces = getifaddrs().map_err(|e| OofsError::Io(io::Error::from(e)))?;
    let mut addrs = Vec::new();
    for iface in interfaces {
        let Some(address) = iface.address else {
            continue;
        };
        if let Some(sin) = address.as_sockaddr_in() {
            addrs.push(IpAddr::V4(*SocketAddrV4::from(*sin).ip()));
        } else if let Some(sin6) = address.as_sockaddr_in6() {
            addrs.push(IpAddr::V6(*SocketAddrV6::from(*sin6).ip()));
        }
    }
    Ok(addrs)
}

/// Look `host` up, retrying a bounded number of times.
pub async fn resolve(host: &str, port: u16, client: &ClientConfig) -> Result<Vec<IpAddr>> {
    let attempts = client.resolve_attempts.max(1);
    for attempt in 1..=attempts {
        match tokio::net::lookup_host((host, port)).await {
            Ok(found) => {
                let addrs: Vec<IpAddr> = found.map(|sa: SocketAddr| sa.ip()).collect();
                if !addrs.is_empty() {
                    return Ok(addrs);
                }
            }
            Err(e) => {
                log_conn_debug!("Address lookup failed", host = host, attempt = attempt);
                tracing::trace!(error = %e, "lookup_host");
            }
        }
        if attempt < attempts {
            tokio::time::sleep(client.retry_delay()).await;
        }
    }
    Err(OofsError::Unresolvable(host.to_string()))
}

/// A store location plus the machinery to reach it.
pub struct Connection {
    target: Target,
    locality: Option<Locality>,
    sticky: bool,
    channel: Option<Channel<TcpStream>>,
    local: LocalFs,
    context: OpContext,
    client: ClientConfig,
}

impl Connection {
    pub fn new(target: Target, config: &Config) -> Self {
        Self {
            target,
            locality: None,
            sticky: false,
            channel: None,
            local: LocalFs::from_config(config),
            context: OpContext::from_config(config),
            client: config.client.clone(),
        }
    }

    /// Connection to this machine that never touches the network.
    pub fn local(config: &Config) -> Self {
        Self::new(Target::new("localhost", config.server.port, "", ""), config)
            .with_locality(Locality::Local)
    }

    /// A connection to this machine with the same settings as `self`.
    pub fn local_twin(&self) -> Self {
        Self {
            target: Target::new("localhost", self.target.port, "", ""),
            locality: Some(Locality::Local),
            sticky: false,
            channel: None,
            local: self.local.clone(),
            context: self.context.clone(),
            client: self.client.clone(),
        }
    }

    /// Skip classification and use `locality` as given.
    pub fn with_locality(mut self, locality: Locality) -> Self {
        self.locality = Some(locality);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.context = self.context.with_progress(progress);
        self
    }

    /// Keep the session open between calls instead of logging out each time.
    pub fn set_sticky(&mut self, sticky: bool) {
        self.sticky = sticky;
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn context(&self) -> &OpContext {
        &self.context
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    /// Classify the target, caching the answer.
    pub async fn locality(&mut self) -> Result<Locality> {
        if let Some(locality) = self.locality {
            return Ok(locality);
        }
        let resolved = resolve(&self.target.host, self.target.port, &self.client).await?;
        let local = tokio::task::spawn_blocking(local_addresses)
            .await
            .map_err(|e| OofsError::Io(io::Error::other(e)))??;
        let locality = classify(&resolved, &local);
        log_conn_debug!(
            "Classified target",
            host = self.target.host.as_str(),
            local = locality == Locality::Local
        );
        self.locality = Some(locality);
        Ok(locality)
    }

    /// Whether both connections reach the same remote account.
    pub async fn same_remote(&mut self, other: &mut Connection) -> Result<bool> {
        if self.locality().await? != Locality::Remote || other.locality().await? != Locality::Remote
        {
            return Ok(false);
        }
        Ok(self.target.host.eq_ignore_ascii_case(&other.target.host)
            && self.target.port == other.target.port
            && self.target.login == other.target.login)
    }

    /// Run one operation wherever the target lives.
    pub async fn execute(&mut self, op: Operation) -> Result<Executed> {
        match self.locality().await? {
            Locality::Local => {
                let local = self.local.clone();
                tokio::task::spawn_blocking(move || local.execute(op))
                    .await
                    .map_err(|e| OofsError::Io(io::Error::other(e)))?
            }
            Locality::Remote => self.execute_remote(op).await,
        }
    }

    async fn execute_remote(&mut self, op: Operation) -> Result<Executed> {
        let mut channel = match self.channel.take() {
            Some(channel) => channel,
            None => self.open().await?,
        };

        let name = op.name();
        let result = round_trip(&mut channel, op, &self.context.progress).await;
        match &result {
            Err(e) if e.is_transport() || channel.is_poisoned() => {
                log_conn_warn!("Dropping session after transport failure", op = name);
            }
            _ if self.sticky => self.channel = Some(channel),
            _ => {
                if let Err(e) = logout(&mut channel).await {
                    log_conn_debug!("Logout failed", error = display(&e));
                }
            }
        }
        result
    }

    /// Connect, then run the version and login steps.
    async fn open(&self) -> Result<Channel<TcpStream>> {
        let stream = self.connect().await?;
        let mut channel = Channel::new(stream).with_timeout(self.client.io_timeout());

        channel
            .send_value(opcode::VERSION_REQUEST, &PROTOCOL_VERSION)
            .await?;
        let version: u32 = channel.receive_value(opcode::VERSION_RESPONSE).await?;
        if version != PROTOCOL_VERSION {
            return Err(OofsError::Protocol(format!(
                "server speaks protocol {}, expected {}",
                version, PROTOCOL_VERSION
            )));
        }

        channel
            .send(
                opcode::LOGIN_REQUEST,
                &login_payload(&self.target.login, &self.target.password),
            )
            .await?;
        match channel.receive(opcode::LOGIN_RESPONSE).await {
            Ok(reply) if reply.payload == LOGIN_CONFIRMED.as_bytes() => {
                log_conn_info!(
                    "Logged in",
                    host = self.target.host.as_str(),
                    login = self.target.login.as_str()
                );
                Ok(channel)
            }
            Ok(_) | Err(WireError::Closed) => Err(OofsError::Protocol(format!(
                "login denied for {}",
                self.target
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn connect(&self) -> Result<TcpStream> {
        let attempts = self.client.connect_attempts.max(1);
        let mut last = None;
        for attempt in 1..=attempts {
            match TcpStream::connect((self.target.host.as_str(), self.target.port)).await {
                Ok(stream) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        log_conn_debug!("set_nodelay failed", error = display(&e));
                    }
                    return Ok(stream);
                }
                Err(e) => {
                    log_conn_debug!(
                        "Connect attempt failed",
                        host = self.target.host.as_str(),
                        attempt = attempt
                    );
                    last = Some(e);
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.client.retry_delay()).await;
            }
        }
        let err = last.unwrap_or_else(|| io::Error::other("no connect attempt made"));
        Err(OofsError::Transport(WireError::Io(err)))
    }

    /// Log out and drop any open session.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(mut channel) = self.channel.take() {
            logout(&mut channel).await?;
        }
        Ok(())
    }

    pub async fn stat(&mut self, path: impl AsRef<Path>) -> Result<FileStat> {
        let op = Operation::Stat {
            path: path.as_ref().to_path_buf(),
        };
        match self.execute(op).await?.outcome {
            Outcome::Stat(stat) => Ok(stat),
            other => Err(unexpected("stat", other)),
        }
    }

    pub async fn list(&mut self, path: impl AsRef<Path>) -> Result<Vec<DirEntry>> {
        let op = Operation::List {
            path: path.as_ref().to_path_buf(),
        };
        match self.execute(op).await?.outcome {
            Outcome::Entries(entries) => Ok(entries),
            other => Err(unexpected("list", other)),
        }
    }

    pub async fn read_file(&mut self, path: impl AsRef<Path>) -> Result<Vec<u8>> {
        let op = Operation::ReadFile {
            path: path.as_ref().to_path_buf(),
        };
        downloaded("read_file", self.execute(op).await?)
    }

    pub async fn write_file(&mut self, path: impl AsRef<Path>, data: Vec<u8>) -> Result<()> {
        let op = Operation::WriteFile {
            path: path.as_ref().to_path_buf(),
            data,
        };
        self.unit("write_file", op).await
    }

    /// Copy within this connection's machine.
    pub async fn copy(&mut self, src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<()> {
        let op = Operation::Copy {
            src: src.as_ref().to_path_buf(),
            dst: dst.as_ref().to_path_buf(),
        };
        self.unit("copy", op).await
    }

    pub async fn compare(&mut self, a: impl AsRef<Path>, b: impl AsRef<Path>) -> Result<bool> {
        let op = Operation::Compare {
            a: a.as_ref().to_path_buf(),
            b: b.as_ref().to_path_buf(),
        };
        self.flag("compare", op).await
    }

    pub async fn rename(&mut self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<()> {
        let op = Operation::Rename {
            from: from.as_ref().to_path_buf(),
            to: to.as_ref().to_path_buf(),
        };
        self.unit("rename", op).await
    }

    /// Create `link` pointing at `target`.
    pub async fn symlink(&mut self, target: impl AsRef<Path>, link: impl AsRef<Path>) -> Result<()> {
        let op = Operation::Symlink {
            target: target.as_ref().to_path_buf(),
            link: link.as_ref().to_path_buf(),
        };
        self.unit("symlink", op).await
    }

    pub async fn read_link(&mut self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let op = Operation::ReadLink {
            path: path.as_ref().to_path_buf(),
        };
        self.path("read_link", op).await
    }

    pub async fn real_path(&mut self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let op = Operation::RealPath {
            path: path.as_ref().to_path_buf(),
        };
        self.path("real_path", op).await
    }

    pub async fn make_dir(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let op = Operation::MakeDir {
            path: path.as_ref().to_path_buf(),
        };
        self.unit("make_dir", op).await
    }

    pub async fn remove_dir(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let op = Operation::RemoveDir {
            path: path.as_ref().to_path_buf(),
        };
        self.unit("remove_dir", op).await
    }

    pub async fn remove_all(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let op = Operation::RemoveAll {
            path: path.as_ref().to_path_buf(),
        };
        self.unit("remove_all", op).await
    }

    pub async fn archive(&mut self, path: impl AsRef<Path>, recursive: bool) -> Result<Vec<u8>> {
        let op = Operation::Archive {
            path: path.as_ref().to_path_buf(),
            recursive,
        };
        downloaded("archive", self.execute(op).await?)
    }

    pub async fn dearchive(&mut self, dest: impl AsRef<Path>, archive: Vec<u8>) -> Result<()> {
        let op = Operation::Dearchive {
            dest: dest.as_ref().to_path_buf(),
            archive,
        };
        self.unit("dearchive", op).await
    }

    pub async fn paste(
        &mut self,
        dest: impl AsRef<Path>,
        archive: Vec<u8>,
        policy: PastePolicy,
    ) -> Result<()> {
        let op = Operation::Paste {
            dest: dest.as_ref().to_path_buf(),
            archive,
            policy,
        };
        self.unit("paste", op).await
    }

    pub async fn prototype(&mut self, path: impl AsRef<Path>) -> Result<bool> {
        let op = Operation::Prototype {
            path: path.as_ref().to_path_buf(),
        };
        self.flag("prototype", op).await
    }

    pub async fn get_uuid(
        &mut self,
        root: impl AsRef<Path>,
        path: impl AsRef<Path>,
        create: bool,
    ) -> Result<Uuid> {
        let op = Operation::GetUuid {
            root: root.as_ref().to_path_buf(),
            path: path.as_ref().to_path_buf(),
            create,
        };
        match self.execute(op).await?.outcome {
            Outcome::Uuid(uuid) => Ok(uuid),
            other => Err(unexpected("get_uuid", other)),
        }
    }

    pub async fn lookup_uuid(
        &mut self,
        root: impl AsRef<Path>,
        uuid: Uuid,
    ) -> Result<Option<PathBuf>> {
        let op = Operation::LookupUuid {
            root: root.as_ref().to_path_buf(),
            uuid,
        };
        match self.execute(op).await?.outcome {
            Outcome::MaybePath(found) => Ok(found),
            other => Err(unexpected("lookup_uuid", other)),
        }
    }

    pub async fn reconcile(
        &mut self,
        root: impl AsRef<Path>,
        scan: impl AsRef<Path>,
        recursive: bool,
        policy: ConflictPolicy,
    ) -> Result<AuditLog> {
        let op = Operation::Reconcile {
            root: root.as_ref().to_path_buf(),
            scan: scan.as_ref().to_path_buf(),
            recursive,
            policy,
        };
        self.audit("reconcile", op).await
    }

    pub async fn fix_oofs(&mut self, root: impl AsRef<Path>, renumber: bool) -> Result<AuditLog> {
        let op = Operation::FixOofs {
            root: root.as_ref().to_path_buf(),
            renumber,
        };
        self.audit("fix_oofs", op).await
    }

    async fn unit(&mut self, name: &str, op: Operation) -> Result<()> {
        match self.execute(op).await?.outcome {
            Outcome::Unit => Ok(()),
            other => Err(unexpected(name, other)),
        }
    }

    async fn flag(&mut self, name: &str, op: Operation) -> Result<bool> {
        match self.execute(op).await?.outcome {
            Outcome::Flag(flag) => Ok(flag),
            other => Err(unexpected(name, other)),
        }
    }

    async fn path(&mut self, name: &str, op: Operation) -> Result<PathBuf> {
        match self.execute(op).await?.outcome {
            Outcome::Path(path) => Ok(path),
            other => Err(unexpected(name, other)),
        }
    }

    async fn audit(&mut self, name: &str, op: Operation) -> Result<AuditLog> {
        match self.execute(op).await?.outcome {
            Outcome::Audit(log) => Ok(log),
            other => Err(unexpected(name, other)),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("target", &self.target)
            .field("locality", &self.locality)
            .field("sticky", &self.sticky)
            .field("connected", &self.channel.is_some())
            .finish_non_exhaustive()
    }
}

fn unexpected(op: &str, outcome: Outcome) -> OofsError {
    OofsError::Protocol(format!("unexpected reply to {}: {:?}", op, outcome))
}

fn downloaded(op: &str, executed: Executed) -> Result<Vec<u8>> {
    match executed {
        Executed {
            outcome: Outcome::Streamed { .. },
            download: Some(data),
        } => Ok(data),
        Executed { outcome, .. } => Err(unexpected(op, outcome)),
    }
}

/// Send one request (plus its upload) and collect the reply (plus its
/// download).
async fn round_trip(
    channel: &mut Channel<TcpStream>,
    mut op: Operation,
    progress: &Arc<dyn ProgressSink>,
) -> Result<Executed> {
    let code = op.opcode();
    let upload = op.take_upload();
    log_conn_debug!("Sending request", op = op.name(), code = code);
    channel.send_value(code, &op).await?;

    if let Some(data) = upload {
        let sink = Arc::clone(progress);
        sink.start(op.name(), data.len() as u64);
        let mut report = move |done: u64, total: u64| sink.update(done, total);
        channel.send_blob(&data, &mut report).await?;
        progress.finish();
    }

    let reply: Reply = channel.receive_value(opcode::response(code)).await?;
    let outcome = reply?;
    let download = match outcome {
        Outcome::Streamed { size } => {
            let sink = Arc::clone(progress);
            sink.start(op.name(), size);
            let mut report = move |done: u64, total: u64| sink.update(done, total);
            let data = channel.receive_blob(&mut report).await?;
            progress.finish();
            if data.len() as u64 != size {
                return Err(OofsError::Protocol(format!(
                    "{} announced {} bytes but sent {}",
                    op.name(),
                    size,
                    data.len()
                )));
            }
            Some(data)
        }
        _ => None,
    };
    Ok(Executed { outcome, download })
}

async fn logout(channel: &mut Channel<TcpStream>) -> Result<()> {
    channel.send(opcode::LOGOUT_REQUEST, &[]).await?;
    channel.receive(opcode::LOGOUT_RESPONSE).await?;
    channel.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_classify_loopback_is_local() {
        assert_eq!(
            classify(&[IpAddr::V4(Ipv4Addr::LOCALHOST)], &[]),
            Locality::Local
        );
        assert_eq!(
            classify(&[IpAddr::V6(Ipv6Addr::LOCALHOST)], &[]),
            Locality::Local
        );
    }

    #[test]
    fn test_classify_bound_address_is_local() {
        let here = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7));
        let there = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 8));
        assert_eq!(classify(&[there, here], &[here]), Locality::Local);
        assert_eq!(classify(&[there], &[here]), Locality::Remote);
    }

    #[test]
    fn test_target_debug_hides_password() {
        let target = Target::new("vlab.example", 7141, "bob", "hunter2");
        let shown = format!("{:?} {}", target, target);
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("bob@vlab.example:7141"));
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_distinct() {
        let client = ClientConfig {
            resolve_attempts: 2,
            retry_delay_ms: 1,
            ..ClientConfig::default()
        };
        let err = resolve("no-such-host.invalid", 7141, &client)
            .await
            .unwrap_err();
        assert!(matches!(err, OofsError::Unresolvable(ref h) if h == "no-such-host.invalid"));
    }

    #[tokio::test]
    async fn test_localhost_classifies_local() {
        let mut conn = Connection::new(
            Target::new("127.0.0.1", 7141, "bob", "pw"),
            &Config::default(),
        );
        assert_eq!(conn.locality().await.unwrap(), Locality::Local);
    }
}

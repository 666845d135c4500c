//! One session worker: handshake, login, then request/response pairs until
//! logout.

use std::net::SocketAddr;
use std::sync::Arc;

use oofs_acl::AccessTable;
use oofs_config::{log_worker_debug, log_worker_error, log_worker_info, log_worker_warn, Config};
use oofs_remote::{Executed, LocalFs};
use oofs_wire::{
    no_progress, opcode, parse_login, Channel, Failure, FailureKind, Message, Operation, Reply,
    WireError, LOGIN_CONFIRMED, LOGIN_DENIED, PROTOCOL_VERSION,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::field::display;

use crate::permission::authorize;
use crate::{DaemonError, Result};

/// What to do after one inbound message.
enum Step {
    Continue,
    Logout,
}

struct Session<S> {
    channel: Channel<S>,
    peer: SocketAddr,
    acl: Arc<AccessTable>,
    local: LocalFs,
}

/// Run a worker for `stream` until the peer logs out or goes away.
pub async fn serve<S>(stream: S, peer: SocketAddr, config: Arc<Config>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let password_file = config.password_file();
    let loaded = tokio::task::spawn_blocking(move || AccessTable::load(&password_file, true)).await;
    let acl = match loaded {
        Ok(Ok(acl)) => Arc::new(acl),
        Ok(Err(e)) => {
            log_worker_error!("Cannot load permission file", peer = display(peer), error = display(&e));
            return;
        }
        Err(e) => {
            log_worker_error!("Permission loader panicked", peer = display(peer), error = display(&e));
            return;
        }
    };

    let channel = Channel::new(stream).with_timeout(config.server.io_timeout());
    let mut session = Session {
        channel,
        peer,
        acl,
        local: LocalFs::from_config(&config),
    };
    match session.run().await {
        Ok(()) => log_worker_debug!("Session ended", peer = display(peer)),
        Err(e) => log_worker_warn!("Session aborted", peer = display(peer), error = display(&e)),
    }
    if let Err(e) = session.channel.shutdown().await {
        tracing::trace!(error = %e, "shutdown after session");
    }
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn failed(&self, reason: impl Into<String>) -> DaemonError {
        DaemonError::Session {
            peer: self.peer,
            reason: reason.into(),
        }
    }

    fn wire(&self, err: WireError) -> DaemonError {
        self.failed(err.to_string())
    }

    async fn run(&mut self) -> Result<()> {
        let Some(login) = self.login().await? else {
            return Ok(());
        };
        loop {
            let message = match self.channel.receive_first().await {
                Ok(message) => message,
                Err(WireError::Closed) => {
                    log_worker_debug!("Peer closed without logout", login = login.as_str());
                    return Ok(());
                }
                Err(e) => return Err(self.wire(e)),
            };
            match self.dispatch(&login, message).await? {
                Step::Continue => {}
                Step::Logout => {
                    log_worker_info!("Logged out", login = login.as_str());
                    return Ok(());
                }
            }
        }
    }

    /// Version step (optional) then login. `None` when the login is refused.
    async fn login(&mut self) -> Result<Option<String>> {
        let mut first = self.channel.receive_first().await.map_err(|e| self.wire(e))?;
        if first.code == opcode::VERSION_REQUEST {
            let client: u32 = first.decode().map_err(|e| self.wire(e))?;
            log_worker_debug!("Version request", client = client);
            self.channel
                .send_value(opcode::VERSION_RESPONSE, &PROTOCOL_VERSION)
                .await
                .map_err(|e| self.wire(e))?;
            first = self.channel.receive_first().await.map_err(|e| self.wire(e))?;
        }
        if first.code != opcode::LOGIN_REQUEST {
            return Err(self.failed(format!("expected login, got code {}", first.code)));
        }

        let accepted = parse_login(&first.payload)
            .filter(|(login, password)| self.acl.authenticate(login, password));
        let reply = if accepted.is_some() {
            LOGIN_CONFIRMED
        } else {
            LOGIN_DENIED
        };
        self.channel
            .send(opcode::LOGIN_RESPONSE, reply.as_bytes())
            .await
            .map_err(|e| self.wire(e))?;

        match accepted {
            Some((login, _)) => {
                log_worker_info!("Login confirmed", peer = display(self.peer), login = login.as_str());
                Ok(Some(login))
            }
            None => {
                log_worker_warn!("Login denied", peer = display(self.peer));
                Ok(None)
            }
        }
    }

    async fn dispatch(&mut self, login: &str, message: Message) -> Result<Step> {
        if message.code == opcode::LOGOUT_REQUEST {
            self.channel
                .send(opcode::LOGOUT_RESPONSE, &[])
                .await
                .map_err(|e| self.wire(e))?;
            return Ok(Step::Logout);
        }
        if !opcode::is_operation(message.code) {
            return Err(self.failed(format!("unexpected code {}", message.code)));
        }

        let code = message.code;
        let mut op: Operation = message.decode().map_err(|e| self.wire(e))?;
        if op.opcode() != code {
            return Err(self.failed(format!(
                "{} sent under code {}",
                op.name(),
                code
            )));
        }
        // The upload is always drained, even for a request that will be denied.
        if op.has_upload() {
            let data = self
                .channel
                .receive_blob(&mut no_progress())
                .await
                .map_err(|e| self.wire(e))?;
            op.restore_upload(data);
        }
        log_worker_debug!("Request", login = login, op = op.name());

        let (reply, download): (Reply, Option<Vec<u8>>) = match self.execute(login, op).await {
            Ok(Executed { outcome, download }) => (Ok(outcome), download),
            Err(failure) => (Err(failure), None),
        };
        let response = opcode::response(code);
        self.channel
            .send_value(response, &reply)
            .await
            .map_err(|e| self.wire(e))?;
        if let Some(data) = download {
            self.channel
                .send_blob(&data, &mut no_progress())
                .await
                .map_err(|e| self.wire(e))?;
        }
        Ok(Step::Continue)
    }

    /// Check and run `op` on a blocking thread. Resolving links for the
    /// check touches the filesystem just like the operation does.
    async fn execute(&self, login: &str, op: Operation) -> std::result::Result<Executed, Failure> {
        let acl = Arc::clone(&self.acl);
        let local = self.local.clone();
        let login = login.to_string();
        let task = tokio::task::spawn_blocking(move || {
            if let Err(denied) = authorize(&acl, &login, &op) {
                log_worker_warn!(
                    "Request denied",
                    login = login.as_str(),
                    op = op.name(),
                    reason = denied.message.as_str()
                );
                return Err(denied);
            }
            local.execute(op).map_err(|e| e.to_failure())
        });
        match task.await {
            Ok(result) => result,
            Err(e) => Err(Failure::new(
                FailureKind::Protocol,
                format!("operation task failed: {}", e),
            )),
        }
    }
}

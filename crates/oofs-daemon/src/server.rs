use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use oofs_config::{log_worker_debug, log_worker_error, log_worker_info, Config};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::field::display;

use crate::session;
use crate::{DaemonError, Result};

/// Listening socket plus the configuration handed to every worker.
pub struct Server {
    listener: TcpListener,
    config: Arc<Config>,
}

impl Server {
    pub async fn bind(config: Config) -> Result<Self> {
        let addr = format!("{}:{}", config.server.listen, config.server.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| DaemonError::Bind {
                addr: addr.clone(),
                source,
            })?;
        Ok(Self {
            listener,
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until ctrl-c.
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = signal::ctrl_c().await {
                log_worker_error!("Cannot watch for ctrl-c", error = display(&e));
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Serve until `shutdown` completes. Running sessions are left to finish
    /// on their own.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = self.local_addr()?;
        log_worker_info!("oofsd listening", addr = display(addr));

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                log_worker_debug!("set_nodelay failed", error = display(&e));
                            }
                            log_worker_debug!("Accepted connection", peer = display(peer));
                            tokio::spawn(session::serve(stream, peer, Arc::clone(&self.config)));
                        }
                        Err(e) => {
                            log_worker_error!("Accept failed", error = display(&e));
                        }
                    }
                }
                _ = &mut shutdown => {
                    log_worker_info!("Shutdown requested");
                    break;
                }
            }
        }
        Ok(())
    }
}

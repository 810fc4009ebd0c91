use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::Context;
use hyper::{body::Incoming, server::conn::http1, service::service_fn, Request};
use hyper_util::rt::{TokioIo, TokioTimer};
use relay_config::RelayConfig;
use relay_proxy::Proxy;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{OwnedSemaphorePermit, Semaphore},
};
use tracing::{debug, error, info, instrument, warn};

use crate::worker::{handle_request, RequestLimits};

/// Owns the listener side: bind, accept, connection limit, hand-off to hyper.
pub struct Master {
    cfg: Arc<RelayConfig>,
    proxy: Arc<Proxy>,
}

impl Master {
    pub fn new(cfg: RelayConfig, proxy: Proxy) -> Self {
        Self {
            cfg: Arc::new(cfg),
            proxy: Arc::new(proxy),
        }
    }

    pub async fn bind(&self) -> anyhow::Result<TcpListener> {
        let listen = self.cfg.http.listen.as_str();
        match TcpListener::bind(listen).await {
            Ok(l) => {
                info!(target: "relay::master", listen = %listen, "Bind() successful");
                Ok(l)
            }
            Err(e) => {
                error!(
                    target: "relay::master",
                    listen = %listen,
                    error = ?e,
                    "Failed to bind listener"
                );
                Err(e).with_context(|| format!("binding {listen}"))
            }
        }
    }

    /// Bind the configured address and serve until Ctrl+C.
    #[instrument(skip(self), fields(
        listen = %self.cfg.http.listen,
        max_connections = self.cfg.global.max_connections,
    ))]
    pub async fn run(self) -> anyhow::Result<()> {
        info!(target: "relay::master", "Starting RELAY");
        let listener = self.bind().await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Accept loop on an already bound listener. Returns when `shutdown`
    /// resolves; connections in progress keep running on their own tasks.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let max_conns = self.cfg.global.max_connections as usize;
        let semaphore = Arc::new(Semaphore::new(max_conns));
        let limits = RequestLimits::from_config(&self.cfg.http);

        info!(
            target: "relay::master",
            max_conns,
            "Global connection semaphore initialized"
        );

        tokio::pin!(shutdown);

        loop {
            let (stream, addr) = tokio::select! {
                _ = &mut shutdown => {
                    info!(target: "relay::master", "Shutdown requested; no longer accepting");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        // EMFILE and friends: log and keep accepting
                        warn!(target: "relay::master", error = ?e, "Failed to accept connection");
                        continue;
                    }
                },
            };

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .context("connection semaphore closed")?;

            debug!(
                target: "relay::master",
                client_addr = %addr,
                available = semaphore.available_permits(),
                "New connection accepted"
            );

            let proxy = self.proxy.clone();
            tokio::spawn(serve_connection(stream, addr, proxy, limits, permit));
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    proxy: Arc<Proxy>,
    limits: RequestLimits,
    permit: OwnedSemaphorePermit,
) {
    let io = TokioIo::new(stream);
    let service = service_fn(move |req: Request<Incoming>| {
        handle_request(req, proxy.clone(), limits)
    });

    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(limits.read_timeout);

    if let Err(e) = builder.serve_connection(io, service).await {
        debug!(
            target: "relay::worker",
            client_addr = %addr,
            error = %e,
            "Connection closed with error"
        );
    }

    drop(permit);
    debug!(target: "relay::master", client_addr = %addr, "Permit released after connection closed");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(target: "relay::master", error = ?e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

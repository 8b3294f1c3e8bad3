//! Listener orchestration
//!
//! Decides which listeners to run from the configuration and the outcome of
//! certificate provisioning, then serves them until shutdown:
//!
//! | HTTPS | certificate | listeners                                         |
//! |-------|-------------|---------------------------------------------------|
//! | off   | -           | plain HTTP on `port`                              |
//! | on    | ok          | TLS on `https_port`, 301 redirect on `port`       |
//! | on    | failed      | plain HTTP on `port`, logged at error level       |
//!
//! The redirect listener is skipped when both ports are equal.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ConnectInfo;
use axum::Router;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tracing::{debug, error, info, warn};

use warden_config::Config;

use crate::routes::redirect_router;
use crate::shutdown::Shutdown;
use crate::tls::{server_config, CertificateManager};

/// Errors that stop a listener
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("server I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Which listeners will run
#[derive(Debug, Clone)]
pub enum ListenerPlan {
    Plain {
        addr: SocketAddr,
    },
    Secure {
        addr: SocketAddr,
        tls: Arc<rustls::ServerConfig>,
        /// Plain port answering with redirects, if distinct
        redirect: Option<SocketAddr>,
    },
}

impl ListenerPlan {
    /// Plan from configuration, provisioning the certificate when HTTPS is on
    pub async fn resolve(config: &Config) -> Self {
        if !config.enable_https {
            return Self::plain(config);
        }

        match CertificateManager::from_config(config) {
            Ok(manager) => Self::resolve_with(config, &manager).await,
            Err(e) => {
                error!(
                    error = %e,
                    port = config.port,
                    "Certificate storage unavailable, HTTPS disabled; serving plain HTTP"
                );
                Self::plain(config)
            }
        }
    }

    /// Plan using an existing certificate manager
    pub async fn resolve_with(config: &Config, manager: &CertificateManager) -> Self {
        if !config.enable_https {
            return Self::plain(config);
        }

        let tls = match manager.ensure_certificate(&config.domain_policy()).await {
            Ok(cert) => server_config(&cert.material),
            Err(e) => Err(e),
        };

        match tls {
            Ok(tls) => {
                let plain = SocketAddr::new(config.bind_ip(), config.port);
                Self::Secure {
                    addr: SocketAddr::new(config.bind_ip(), config.https_port),
                    tls,
                    redirect: (config.port != config.https_port).then_some(plain),
                }
            }
            Err(e) => {
                error!(
                    error = %e,
                    port = config.port,
                    "Could not provision a certificate, HTTPS disabled; serving plain HTTP"
                );
                Self::plain(config)
            }
        }
    }

    fn plain(config: &Config) -> Self {
        Self::Plain {
            addr: SocketAddr::new(config.bind_ip(), config.port),
        }
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, Self::Secure { .. })
    }
}

/// Serve `app` according to `plan` until `shutdown` fires
pub async fn serve(plan: ListenerPlan, app: Router, shutdown: Shutdown) -> Result<(), ServerError> {
    match plan {
        ListenerPlan::Plain { addr } => serve_plain(addr, app, shutdown).await,
        ListenerPlan::Secure {
            addr,
            tls,
            redirect: None,
        } => serve_tls(addr, tls, app, shutdown).await,
        ListenerPlan::Secure {
            addr,
            tls,
            redirect: Some(redirect),
        } => {
            tokio::try_join!(
                serve_tls(addr, tls, app, shutdown.clone()),
                serve_plain(redirect, redirect_router(addr.port()), shutdown),
            )?;
            Ok(())
        }
    }
}

async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

/// Plain HTTP with graceful shutdown
pub async fn serve_plain(
    addr: SocketAddr,
    app: Router,
    mut shutdown: Shutdown,
) -> Result<(), ServerError> {
    let listener = bind(addr).await?;
    info!(address = %addr, "Listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.wait().await })
    .await?;

    debug!(address = %addr, "HTTP listener stopped");
    Ok(())
}

/// TLS accept loop; each connection is served by hyper on its own task
pub async fn serve_tls(
    addr: SocketAddr,
    tls: Arc<rustls::ServerConfig>,
    app: Router,
    mut shutdown: Shutdown,
) -> Result<(), ServerError> {
    let listener = bind(addr).await?;
    let acceptor = TlsAcceptor::from(tls);
    info!(address = %addr, "Listening on https://{}", addr);

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.wait() => {
                debug!(address = %addr, "HTTPS listener stopped");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    continue;
                }
            },
        };

        let acceptor = acceptor.clone();
        let app = app.clone();
        tokio::spawn(async move {
            let stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(e) => {
                    debug!(peer = %peer, error = %e, "TLS handshake failed");
                    return;
                }
            };

            let service = hyper::service::service_fn(move |mut request: hyper::Request<Incoming>| {
                request.extensions_mut().insert(ConnectInfo(peer));
                app.clone().oneshot(request)
            });

            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!(peer = %peer, error = %e, "Connection ended with error");
            }
        });
    }
}

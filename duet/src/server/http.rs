use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, anyhow};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::lifecycle::Lifecycle;
use super::service::ServeHandler;
use crate::Request;
use crate::context::Context;
use crate::error::ServerError;

/// TCP 服务循环：接受连接直到收到关停信号，然后等待已有连接处理完毕。
pub(crate) async fn serve(
    listener: std::net::TcpListener,
    tls: Option<TlsAcceptor>,
    handler: Arc<ServeHandler>,
    base: Context,
    lifecycle: &Lifecycle,
) -> Result<(), ServerError> {
    listener.set_nonblocking(true).map_err(ServerError::serve)?;
    let listener = TcpListener::from_std(listener).map_err(ServerError::serve)?;
    let mut join_set: JoinSet<()> = JoinSet::new();
    let mut backoff = Duration::ZERO;

    let result = loop {
        tokio::select! {
            biased;
            _ = lifecycle.shutdown.cancelled() => break Ok(()),
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    backoff = Duration::ZERO;
                    debug!(%remote, "connection accepted");
                    let handler = Arc::clone(&handler);
                    let base = base.clone();
                    let tls = tls.clone();
                    let shutdown = lifecycle.shutdown.clone();
                    join_set.spawn(async move {
                        if let Err(err) = serve_connection(stream, remote, tls, handler, base, shutdown).await {
                            debug!(%remote, error = ?err, "connection closed with error");
                        }
                    });
                }
                Err(err) => match accept_failure(&err) {
                    AcceptFailure::Connection => {
                        debug!(error = ?err, "accept connection failed");
                    }
                    AcceptFailure::Retry => {
                        backoff = next_backoff(backoff);
                        error!(error = ?err, retry_in = ?backoff, "accept failed, retrying");
                        tokio::time::sleep(backoff).await;
                    }
                    AcceptFailure::Fatal => break Err(ServerError::serve(err)),
                },
            },
            Some(joined) = join_set.join_next() => {
                if let Err(err) = joined
                    && err.is_panic()
                {
                    error!(error = ?err, "connection task panicked");
                }
            }
        }
    };
    drop(listener);

    let remaining = join_set.len();
    if remaining > 0 {
        info!(connections = remaining, "waiting for connections to finish");
    }
    let forced = tokio::select! {
        _ = drain(&mut join_set) => false,
        _ = lifecycle.force.cancelled() => true,
    };
    if forced {
        warn!(connections = join_set.len(), "shutdown deadline reached, aborting connections");
        join_set.abort_all();
        drain(&mut join_set).await;
    }
    result
}

async fn drain(join_set: &mut JoinSet<()>) {
    while let Some(joined) = join_set.join_next().await {
        if let Err(err) = joined
            && err.is_panic()
        {
            error!(error = ?err, "connection task panicked during shutdown");
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum AcceptFailure {
    /// 单个连接在握手前出错，直接接受下一个
    Connection,
    /// 资源耗尽等临时错误（例如 EMFILE），退避后重试
    Retry,
    /// 监听器本身失效
    Fatal,
}

fn accept_failure(err: &io::Error) -> AcceptFailure {
    match err.kind() {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => AcceptFailure::Connection,
        io::ErrorKind::InvalidInput => AcceptFailure::Fatal,
        _ => AcceptFailure::Retry,
    }
}

const MIN_BACKOFF: Duration = Duration::from_millis(5);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

fn next_backoff(current: Duration) -> Duration {
    if current.is_zero() {
        MIN_BACKOFF
    } else {
        (current * 2).min(MAX_BACKOFF)
    }
}

async fn serve_connection(
    stream: TcpStream,
    remote: SocketAddr,
    tls: Option<TlsAcceptor>,
    handler: Arc<ServeHandler>,
    base: Context,
    shutdown: CancellationToken,
) -> Result<()> {
    match tls {
        Some(acceptor) => {
            let stream = acceptor.accept(stream).await.context("TLS 握手失败")?;
            drive(TokioIo::new(stream), remote, handler, base, shutdown).await
        }
        None => drive(TokioIo::new(stream), remote, handler, base, shutdown).await,
    }
}

async fn drive<I>(
    io: I,
    remote: SocketAddr,
    handler: Arc<ServeHandler>,
    base: Context,
    shutdown: CancellationToken,
) -> Result<()>
where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let service = service_fn(move |req: hyper::Request<Incoming>| {
        let handler = Arc::clone(&handler);
        let base = base.clone();
        async move {
            let mut req = Request::from_http(req);
            req.set_remote(remote);
            req.set_context(base);
            Ok::<_, Infallible>(handler.dispatch(req).await.into_http())
        }
    });
    let builder = Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection(io, service);
    tokio::pin!(conn);
    tokio::select! {
        res = conn.as_mut() => res.map_err(|e| anyhow!("serve connection failed: {e}")),
        _ = shutdown.cancelled() => {
            conn.as_mut().graceful_shutdown();
            conn.await.map_err(|e| anyhow!("serve connection failed: {e}"))
        }
    }
}

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use h3::server::RequestResolver;
use h3_quinn::Connection as H3QuinnConnection;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info_span, warn};

use super::lifecycle::Lifecycle;
use super::service::ServeHandler;
use crate::context::Context;
use crate::core::req_body::ReqBody;
use crate::error::ServerError;
use crate::{DuetError, Request, StatusCode};

pub(crate) const CLOSE_REASON: &[u8] = b"server stopped";

/// QUIC 服务循环：端点关闭或收到关停信号时返回，不等待已有连接。
pub(crate) async fn serve(
    endpoint: quinn::Endpoint,
    handler: Arc<ServeHandler>,
    base: Context,
    lifecycle: &Lifecycle,
    max_body_size: Option<usize>,
) -> Result<(), ServerError> {
    let mut join_set: JoinSet<()> = JoinSet::new();
    loop {
        tokio::select! {
            biased;
            _ = lifecycle.shutdown.cancelled() => break,
            incoming = endpoint.accept() => match incoming {
                Some(incoming) => {
                    let handler = Arc::clone(&handler);
                    let base = base.clone();
                    join_set.spawn(async move {
                        if let Err(err) = handle_connection(incoming, handler, base, max_body_size).await {
                            debug!(error = ?err, "HTTP/3 connection closed with error");
                        }
                    });
                }
                None => break,
            },
            Some(joined) = join_set.join_next() => {
                if let Err(err) = joined
                    && err.is_panic()
                {
                    error!(error = ?err, "HTTP/3 connection task panicked");
                }
            }
        }
    }
    endpoint.close(0u32.into(), CLOSE_REASON);
    join_set.abort_all();
    Ok(())
}

async fn handle_connection(
    incoming: quinn::Incoming,
    handler: Arc<ServeHandler>,
    base: Context,
    max_body_size: Option<usize>,
) -> Result<()> {
    let connection = incoming.await.context("等待 QUIC 连接建立失败")?;
    let remote = connection.remote_address();
    debug!(%remote, "QUIC connection established");

    let mut h3_conn: h3::server::Connection<H3QuinnConnection, Bytes> = h3::server::builder()
        .build(H3QuinnConnection::new(connection))
        .await
        .context("构建 HTTP/3 连接失败")?;

    loop {
        match h3_conn.accept().await {
            Ok(Some(resolver)) => {
                let handler = Arc::clone(&handler);
                let base = base.clone();
                tokio::spawn(
                    async move {
                        if let Err(err) =
                            handle_request(resolver, remote, handler, base, max_body_size).await
                        {
                            error!(%remote, error = ?err, "处理 HTTP/3 请求失败");
                        }
                    }
                    .instrument(info_span!("h3_request", %remote)),
                );
            }
            Ok(None) => break,
            Err(err) => {
                debug!(%remote, error = ?err, "HTTP/3 connection ended");
                break;
            }
        }
    }
    Ok(())
}

async fn handle_request(
    resolver: RequestResolver<H3QuinnConnection, Bytes>,
    remote: SocketAddr,
    handler: Arc<ServeHandler>,
    base: Context,
    max_body_size: Option<usize>,
) -> Result<()> {
    let (request, mut stream) = resolver
        .resolve_request()
        .await
        .map_err(|err| anyhow!("解析 HTTP/3 请求失败: {err}"))?;
    debug!(method = %request.method(), uri = %request.uri(), "HTTP/3 request received");

    let mut body = BytesMut::new();
    let mut oversize = false;
    while let Some(mut chunk) = stream.recv_data().await? {
        if let Some(max) = max_body_size
            && body.len() + chunk.remaining() > max
        {
            oversize = true;
            break;
        }
        body.put(&mut chunk);
    }

    let response = if oversize {
        warn!(limit = ?max_body_size, "HTTP/3 request body too large");
        handler.encode_error(&DuetError::business_error(
            StatusCode::PAYLOAD_TOO_LARGE,
            "BODY_TOO_LARGE",
            "request body too large",
        ))
    } else {
        let (parts, _) = request.into_parts();
        let mut req = Request::from_parts(parts, ReqBody::from(body.freeze()));
        req.set_remote(remote);
        req.set_context(base);
        handler.dispatch(req).await
    };

    let (head, data) = response.into_parts();
    stream.send_response(head).await?;
    if !data.is_empty() {
        stream.send_data(data).await?;
    }
    stream.finish().await?;
    Ok(())
}

#![cfg(feature = "http3")]

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use duet::prelude::*;
use duet::{ServerError, State};
use rcgen::{CertifiedKey, generate_simple_self_signed};
use serde_json::Value;

fn self_signed() -> (TlsConfig, rustls::RootCertStore) {
    let CertifiedKey { cert, key_pair } =
        generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let tls = TlsConfig::from_pem(cert.pem().as_bytes(), key_pair.serialize_pem().as_bytes())
        .unwrap();
    let mut roots = rustls::RootCertStore::empty();
    roots.add(cert.der().clone()).unwrap();
    (tls, roots)
}

fn quic_client(roots: rustls::RootCertStore) -> quinn::Endpoint {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut crypto = rustls::ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();
    crypto.alpn_protocols = vec![b"h3".to_vec()];
    let crypto = quinn::crypto::rustls::QuicClientConfig::try_from(crypto).unwrap();
    let mut endpoint = quinn::Endpoint::client("127.0.0.1:0".parse().unwrap()).unwrap();
    endpoint.set_default_client_config(quinn::ClientConfig::new(Arc::new(crypto)));
    endpoint
}

#[tokio::test]
async fn test_http3_requires_tls() {
    let server = Server::builder()
        .address("127.0.0.1:0")
        .enable_http3(true)
        .build();
    let err = server.start(Context::background()).await.unwrap_err();
    assert!(matches!(err, ServerError::TlsRequired));
    assert_eq!(err.to_string(), "[HTTP3] TLS is required");
}

#[tokio::test]
async fn test_http3_request() {
    let (tls, roots) = self_signed();
    let mut server = Server::builder()
        .address("127.0.0.1:0")
        .enable_http3(true)
        .tls_config(tls)
        .build();
    server.handle_fn("/index/{id}", |req: Request| async move {
        let transport = req
            .transport()
            .ok_or_else(|| DuetError::bad_request("NO_TRANSPORT", "missing transport"))?;
        transport.reply_header().set("x-operation", transport.operation());
        Ok(serde_json::json!({
            "id": req.param("id"),
            "kind": transport.kind(),
        }))
    });
    let server = Arc::new(server);

    let endpoint = server.endpoint().unwrap();
    assert_eq!(endpoint.scheme(), "https");
    let port = endpoint.port().unwrap();
    assert_ne!(port, 0);
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();

    let running = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.start(Context::background()).await })
    };

    let client = quic_client(roots);
    let conn = client.connect(addr, "localhost").unwrap().await.unwrap();
    let (mut driver, mut send_request) = h3::client::new(h3_quinn::Connection::new(conn))
        .await
        .unwrap();
    let drive = tokio::spawn(async move {
        let _ = std::future::poll_fn(|cx| driver.poll_close(cx)).await;
    });

    let req = http::Request::builder()
        .uri("https://localhost/index/7")
        .body(())
        .unwrap();
    let mut stream = send_request.send_request(req).await.unwrap();
    stream.finish().await.unwrap();
    let res = stream.recv_response().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["x-operation"], "/index/{id}");

    let mut body = BytesMut::new();
    while let Some(mut chunk) = stream.recv_data().await.unwrap() {
        body.extend_from_slice(&chunk.copy_to_bytes(chunk.remaining()));
    }
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["id"], "7");
    assert_eq!(body["kind"], "http");

    drop(send_request);
    server.stop(Context::background()).await.unwrap();
    running.await.unwrap().unwrap();
    assert_eq!(server.state(), State::Stopped);
    drive.abort();
    client.close(0u32.into(), b"done");
}

#[tokio::test]
async fn test_http3_body_limit() {
    let (tls, roots) = self_signed();
    let mut server = Server::builder()
        .address("127.0.0.1:0")
        .enable_http3(true)
        .tls_config(tls)
        .max_body_size(8)
        .build();
    server.handle_fn("/upload", |mut req: Request| async move {
        Ok(req.bytes().await?.len().to_string())
    });
    let server = Arc::new(server);
    let port = server.endpoint().unwrap().port().unwrap();
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let running = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.start(Context::background()).await })
    };

    let client = quic_client(roots);
    let conn = client.connect(addr, "localhost").unwrap().await.unwrap();
    let (mut driver, mut send_request) = h3::client::new(h3_quinn::Connection::new(conn))
        .await
        .unwrap();
    let drive = tokio::spawn(async move {
        let _ = std::future::poll_fn(|cx| driver.poll_close(cx)).await;
    });

    let req = http::Request::builder()
        .method(Method::POST)
        .uri("https://localhost/upload")
        .body(())
        .unwrap();
    let mut stream = send_request.send_request(req).await.unwrap();
    stream
        .send_data(bytes::Bytes::from_static(b"0123456789abcdef"))
        .await
        .unwrap();
    stream.finish().await.unwrap();
    let res = stream.recv_response().await.unwrap();
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);

    drop(send_request);
    server.stop(Context::background()).await.unwrap();
    running.await.unwrap().unwrap();
    drive.abort();
    client.close(0u32.into(), b"done");
}

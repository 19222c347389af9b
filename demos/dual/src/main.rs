use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser;
use duet::prelude::*;
use duet::ServerConfig;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// 同一套路由，按参数选择 HTTP/1.1 或 HTTP/3 启动
#[derive(Parser, Debug)]
struct Args {
    /// JSON 格式的服务配置文件
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value = "127.0.0.1:8000")]
    addr: String,
    /// 单个请求的超时时间，0 表示不限制
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,
    /// 使用 QUIC/HTTP3（需要同时指定证书与私钥）
    #[arg(long)]
    http3: bool,
    #[arg(long)]
    cert: Option<PathBuf>,
    #[arg(long)]
    key: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            let raw = std::fs::read(path)
                .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
            serde_json::from_slice(&raw).context("解析配置文件失败")?
        }
        None => ServerConfig {
            address: args.addr.clone(),
            timeout_ms: args.timeout_ms,
            enable_http3: args.http3,
            cert_path: args.cert.clone(),
            key_path: args.key.clone(),
            ..Default::default()
        },
    };

    let mut server = Server::builder().with_config(config)?.build();
    server.handle_fn("/index", |mut req: Request| async move {
        let body: serde_json::Value = req.decode().await?;
        req.reply(&serde_json::json!({ "echo": body }))
    });
    server.handle_fn("/index/{id}", |req: Request| async move {
        Ok(format!("index {}", req.param("id").unwrap_or_default()))
    });
    server.handle_header(
        "x-api-version",
        "2",
        HandlerFn::new(|_req: Request| async { Ok("api v2") }),
    );
    server.route("/api").get(
        "/whoami",
        HandlerFn::new(|req: Request| async move {
            let transport = req
                .transport()
                .ok_or_else(|| DuetError::bad_request("NO_TRANSPORT", "missing transport"))?;
            Ok(serde_json::json!({
                "endpoint": transport.endpoint(),
                "operation": transport.operation(),
                "remote": transport.remote().map(|addr| addr.to_string()),
            }))
        }),
    );
    server.walk_route(|route| {
        info!(method = %route.method, path = %route.path, "route");
        Ok::<_, Infallible>(())
    })?;

    let server = Arc::new(server);
    info!(endpoint = %server.endpoint()?, "starting");

    let stopper = Arc::clone(&server);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let (ctx, _guard) = Context::background().with_timeout(Duration::from_secs(5));
            if let Err(err) = stopper.stop(ctx).await {
                warn!(error = %err, "server did not stop cleanly");
            }
        }
    });

    server.start(Context::background()).await?;
    info!("server stopped");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

// 该文件是 Shouwang （守望） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use std::{sync::Arc, thread, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::{net::TcpListener, sync::oneshot};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use shouwang::{
  FromUrl,
  config::AppConfig,
  input::{InputWrapper, SharedCamera},
  model::RemoteDetector,
  output::{SlotOutput, draw::Draw},
  pipeline::Pipeline,
  query::Monitor,
  server,
  store::FrameStore,
};

fn main() -> Result<()> {
  tracing_subscriber::registry()
    .with(fmt::layer())
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = args::Args::parse();
  let mut config = AppConfig::load(&args.config)
    .with_context(|| format!("无法加载配置文件 {}", args.config.display()))?;
  if let Some(host) = args.host {
    config.server.host = host;
  }
  if let Some(port) = args.port {
    config.server.port = port;
  }

  info!("配置文件: {}", args.config.display());
  info!("摄像头: {}", config.camera.url);

  let source = InputWrapper::from_url(&config.camera.url)
    .with_context(|| format!("无法打开摄像头 {}", config.camera.url))?;
  let camera = SharedCamera::new(source);

  let draw = match &config.annotation.font {
    Some(path) => Draw::from_font_file(path).with_context(|| format!("无法加载字体 {}", path))?,
    None => Draw::with_system_font(),
  };

  let frames = FrameStore::new(config.pipelines.iter().map(|p| p.name.clone()));
  let mut monitor = Monitor::new(frames.clone());
  let mut handles = Vec::with_capacity(config.pipelines.len());

  for entry in &config.pipelines {
    let taxonomy = Arc::new(entry.taxonomy()?);
    let pipeline_config = entry.pipeline_config();
    let shared = pipeline_config.shared(taxonomy.clone());

    let detector = RemoteDetector::from_url(&entry.detector)
      .with_context(|| format!("无法创建流水线 {} 的检测器", entry.name))?;
    let output = SlotOutput::new(draw.clone(), taxonomy, frames.clone(), entry.name.clone())
      .with_quality(config.annotation.jpeg_quality);

    info!(
      "流水线 {}: 检测器 {}, 间隔 {} ms, 去抖 {}",
      entry.name, entry.detector, entry.interval_ms, entry.debounce
    );
    monitor.register(shared.clone());
    handles.push(Pipeline::new(pipeline_config, camera.clone(), detector, output, shared).spawn()?);
  }

  let (tx, rx) = oneshot::channel::<()>();
  let mut tx = Some(tx);
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    if let Some(tx) = tx.take() {
      let _ = tx.send(());
    }
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .context("无法设置 Ctrl-C 处理器")?;

  let runtime = tokio::runtime::Builder::new_multi_thread()
    .enable_all()
    .build()
    .context("无法创建异步运行时")?;
  let monitor = Arc::new(monitor);
  let served = runtime.block_on(async {
    let address = (config.server.host.as_str(), config.server.port);
    let listener = TcpListener::bind(address)
      .await
      .with_context(|| format!("无法监听 {}:{}", address.0, address.1))?;
    server::serve(listener, monitor, async move {
      let _ = rx.await;
    })
    .await
    .context("HTTP 服务异常退出")
  });

  for handle in handles {
    info!("停止流水线 {}", handle.name());
    handle.stop();
  }
  info!("退出");

  served
}

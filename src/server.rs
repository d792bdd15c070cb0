// 该文件是 Shouwang （守望） 项目的一部分。
// src/server.rs - HTTP 查询服务
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{future::Future, sync::Arc};

use axum::{
  Json, Router,
  extract::{Path, State},
  http::{StatusCode, header},
  response::{IntoResponse, Response},
  routing::{get, post},
};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::query::{Monitor, QueryError};

impl IntoResponse for QueryError {
  fn into_response(self) -> Response {
    (
      StatusCode::NOT_FOUND,
      Json(json!({ "status": "error", "message": self.to_string() })),
    )
      .into_response()
  }
}

type AppState = Arc<Monitor>;

pub fn router(monitor: Arc<Monitor>) -> Router {
  Router::new()
    .route("/image/:pipeline", get(image))
    .route("/status/:pipeline", get(status))
    .route("/status_with_time/:pipeline", get(status_with_time))
    .route("/reset_status/:pipeline", post(reset_status))
    .route("/get_class_counts/:pipeline", get(class_counts))
    .route("/pipelines", get(pipelines))
    .route("/healthz", get(healthz))
    .layer(
      CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any),
    )
    .with_state(monitor)
}

/// 在给定监听器上提供服务，`shutdown` 完成后优雅退出
pub async fn serve(
  listener: TcpListener,
  monitor: Arc<Monitor>,
  shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
  info!("HTTP 服务监听于 {}", listener.local_addr()?);
  axum::serve(listener, router(monitor))
    .with_graceful_shutdown(shutdown)
    .await
}

async fn image(
  State(monitor): State<AppState>,
  Path(pipeline): Path<String>,
) -> Result<Response, QueryError> {
  Ok(match monitor.image(&pipeline)? {
    Some(frame) => (
      [(header::CONTENT_TYPE, "image/jpeg")],
      frame.bytes.clone(),
    )
      .into_response(),
    None => Json(json!({ "status": "error", "message": "No image available" })).into_response(),
  })
}

async fn status(
  State(monitor): State<AppState>,
  Path(pipeline): Path<String>,
) -> Result<Response, QueryError> {
  Ok(Json(monitor.status(&pipeline)?).into_response())
}

async fn status_with_time(
  State(monitor): State<AppState>,
  Path(pipeline): Path<String>,
) -> Result<Response, QueryError> {
  Ok(Json(monitor.status_with_time(&pipeline)?).into_response())
}

async fn reset_status(
  State(monitor): State<AppState>,
  Path(pipeline): Path<String>,
) -> Result<Response, QueryError> {
  let active = monitor.reset_status(&pipeline)?;
  Ok(Json(json!({ "status": active })).into_response())
}

async fn class_counts(
  State(monitor): State<AppState>,
  Path(pipeline): Path<String>,
) -> Result<Response, QueryError> {
  Ok(Json(monitor.class_counts(&pipeline)?).into_response())
}

async fn pipelines(State(monitor): State<AppState>) -> Json<Vec<String>> {
  Json(monitor.pipelines())
}

async fn healthz() -> Json<serde_json::Value> {
  Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

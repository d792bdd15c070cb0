// 该文件是 Shouwang （守望） 项目的一部分。
// src/model/remote.rs - 远程推理服务检测器
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

use std::time::Duration;

use image::RgbImage;
use reqwest::blocking::{Client, multipart};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl,
  model::{Detection, Detector},
  output::draw::encode_jpeg,
};

const REMOTE_SCHEMES: [&str; 2] = ["http", "https"];
const DEFAULT_JPEG_QUALITY: u8 = 90;

#[derive(Error, Debug)]
pub enum RemoteDetectorError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("参数无效: {0}")]
  InvalidParameter(String),
  #[error("HTTP 错误: {0}")]
  HttpError(#[from] reqwest::Error),
  #[error("推理服务返回错误状态: {0}")]
  ServerStatus(u16),
  #[error("图像编码错误: {0}")]
  EncodeError(#[from] image::ImageError),
}

#[derive(Debug, Deserialize)]
struct InferResponse {
  #[serde(default)]
  detections: Vec<Detection>,
}

/// 通过 HTTP 调用外部推理服务的检测器
///
/// 以 multipart 表单上传 JPEG（字段名 `image`），服务端返回
/// `{"detections": [{"label_id": 0, "bbox": [x1, y1, x2, y2], "confidence": 0.9}]}`。
///
/// URL 查询参数：
/// - `min_confidence`：低于该置信度的结果被丢弃（默认 0）
/// - `timeout_ms`：单次请求超时（默认 10000）
pub struct RemoteDetector {
  client: Client,
  endpoint: Url,
  min_confidence: f32,
}

impl FromUrl for RemoteDetector {
  type Error = RemoteDetectorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if !REMOTE_SCHEMES.contains(&url.scheme()) {
      return Err(RemoteDetectorError::SchemeMismatch(format!(
        "期望 http 或 https, 实际为 '{}'",
        url.scheme()
      )));
    }

    let mut min_confidence = 0.0f32;
    let mut timeout = Duration::from_secs(10);
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "min_confidence" => {
          min_confidence = v
            .parse()
            .map_err(|_| RemoteDetectorError::InvalidParameter(format!("min_confidence={}", v)))?;
        }
        "timeout_ms" => {
          let ms: u64 = v
            .parse()
            .map_err(|_| RemoteDetectorError::InvalidParameter(format!("timeout_ms={}", v)))?;
          timeout = Duration::from_millis(ms);
        }
        _ => {}
      }
    }

    // 控制参数不转发给推理服务
    let mut endpoint = url.clone();
    let forwarded: Vec<(String, String)> = url
      .query_pairs()
      .filter(|(k, _)| k != "min_confidence" && k != "timeout_ms")
      .map(|(k, v)| (k.into_owned(), v.into_owned()))
      .collect();
    if forwarded.is_empty() {
      endpoint.set_query(None);
    } else {
      endpoint.query_pairs_mut().clear().extend_pairs(forwarded);
    }

    let client = Client::builder().timeout(timeout).build()?;
    info!("远程检测器: {}", endpoint);

    Ok(Self {
      client,
      endpoint,
      min_confidence,
    })
  }
}

impl RemoteDetector {
  pub fn endpoint(&self) -> &Url {
    &self.endpoint
  }

  pub fn min_confidence(&self) -> f32 {
    self.min_confidence
  }
}

impl Detector for RemoteDetector {
  type Error = RemoteDetectorError;

  fn infer(&self, frame: &RgbImage) -> Result<Vec<Detection>, Self::Error> {
    let jpeg = encode_jpeg(frame, DEFAULT_JPEG_QUALITY)?;
    let part = multipart::Part::bytes(jpeg)
      .file_name("frame.jpg")
      .mime_str("image/jpeg")?;
    let form = multipart::Form::new().part("image", part);

    let response = self
      .client
      .post(self.endpoint.clone())
      .multipart(form)
      .send()?;

    if !response.status().is_success() {
      return Err(RemoteDetectorError::ServerStatus(response.status().as_u16()));
    }

    let body: InferResponse = response.json()?;
    let detections: Vec<Detection> = body
      .detections
      .into_iter()
      .filter(|d| d.confidence >= self.min_confidence)
      .collect();
    debug!("远程检测返回 {} 个目标", detections.len());

    Ok(detections)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_control_parameters() {
    let url = Url::parse("http://127.0.0.1:9000/infer?model=abnormal&min_confidence=0.4&timeout_ms=500")
      .unwrap();
    let detector = RemoteDetector::from_url(&url).unwrap();
    assert_eq!(detector.min_confidence(), 0.4);
    assert_eq!(
      detector.endpoint().as_str(),
      "http://127.0.0.1:9000/infer?model=abnormal"
    );
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("image:///tmp/a.jpg").unwrap();
    assert!(matches!(
      RemoteDetector::from_url(&url),
      Err(RemoteDetectorError::SchemeMismatch(_))
    ));
  }

  #[test]
  fn rejects_bad_parameter() {
    let url = Url::parse("http://127.0.0.1:9000/infer?min_confidence=abc").unwrap();
    assert!(matches!(
      RemoteDetector::from_url(&url),
      Err(RemoteDetectorError::InvalidParameter(_))
    ));
  }

  #[test]
  fn response_without_detections_is_empty() {
    let body: InferResponse = serde_json::from_str("{}").unwrap();
    assert!(body.detections.is_empty());
    let body: InferResponse = serde_json::from_str(
      r#"{"detections":[{"label_id":1,"bbox":[1.0,2.0,30.0,40.0],"confidence":0.8}]}"#,
    )
    .unwrap();
    assert_eq!(body.detections[0].label_id, 1);
  }
}

// 该文件是 Shouwang （守望） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 摄像头输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # GStreamer 输入
//!
//! 支持两种 URL：
//! - `gst://camera/dev/video0?width=1280&height=720&fps=15&format=YUY2&rotate=180`
//! - `gst://file/path/to/video.mp4`
//!
//! 管道末端的 appsink 设置为 `max-buffers=1 drop=true`，队列中始终只保留最新一帧。
//!
//! 使用前需要安装 GStreamer 开发库：
//!
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```

use std::collections::HashMap;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{FrameSource, InputError},
};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 15;
const PULL_TIMEOUT_MS: u64 = 1000;

#[derive(Error, Debug)]
pub enum GStreamerInputError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  #[error("Unsupported video format")]
  UnsupportedFormat,
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("End of stream")]
  EndOfStream,
}

enum PipelineItem {
  FileSource(String),
  CameraSource {
    camera: String,
    format: Option<String>,
    width: u32,
    height: u32,
    fps: u32,
  },
  VideoFlip {
    method: u32,
  },
  TargetFormat,
}

impl PipelineItem {
  fn to_pipeline(&self) -> String {
    match self {
      PipelineItem::FileSource(path) => format!("filesrc location={} ! decodebin", path),
      PipelineItem::CameraSource {
        camera,
        format,
        width,
        height,
        fps,
      } => {
        let format = format
          .as_ref()
          .map(|f| format!("format={},", f))
          .unwrap_or_default();
        format!(
          "v4l2src device={} ! video/x-raw,{}width={},height={},framerate={}/1",
          camera, format, width, height, fps
        )
      }
      PipelineItem::VideoFlip { method } => format!("videoflip method={}", method),
      PipelineItem::TargetFormat => "videoconvert ! video/x-raw,format=RGB".to_string(),
    }
  }
}

fn video_flip(rotate: Option<&String>) -> Option<PipelineItem> {
  let method = match rotate?.as_str() {
    "90" => 1,
    "180" => 2,
    "270" => 3,
    _ => return None,
  };
  Some(PipelineItem::VideoFlip { method })
}

fn parse_u32(query: &HashMap<String, String>, key: &str, default: u32) -> u32 {
  query
    .get(key)
    .and_then(|v| v.parse::<u32>().ok())
    .unwrap_or(default)
}

/// 由 URL 生成管道描述
fn pipeline_description(url: &Url) -> Result<String, GStreamerInputError> {
  if url.scheme() != GStreamerInput::SCHEME {
    return Err(GStreamerInputError::SchemeMismatch);
  }

  let query: HashMap<String, String> = url
    .query_pairs()
    .map(|(k, v)| (String::from(k), String::from(v)))
    .collect();

  let mut items = match url.host_str() {
    Some("camera") => vec![PipelineItem::CameraSource {
      camera: url.path().to_string(),
      format: query.get("format").cloned(),
      width: parse_u32(&query, "width", DEFAULT_WIDTH),
      height: parse_u32(&query, "height", DEFAULT_HEIGHT),
      fps: parse_u32(&query, "fps", DEFAULT_FPS),
    }],
    Some("file") => vec![PipelineItem::FileSource(url.path().to_string())],
    _ => return Err(GStreamerInputError::SchemeMismatch),
  };
  items.extend(video_flip(query.get("rotate")));
  items.push(PipelineItem::TargetFormat);

  let basic_pipeline = items
    .iter()
    .map(PipelineItem::to_pipeline)
    .collect::<Vec<String>>()
    .join(" ! ");
  Ok(format!(
    "{} ! appsink max-buffers=1 drop=true sync=false name=sink",
    basic_pipeline
  ))
}

/// GStreamer 视频输入
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  /// `grab` 时取到的最新样本
  pending: Option<gst::Sample>,
}

impl FromUrlWithScheme for GStreamerInput {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerInput {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let description = pipeline_description(url)?;
    gst::init()?;
    info!("GStreamer pipeline description: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(Self {
      pipeline,
      appsink,
      pending: None,
    })
  }
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl FrameSource for GStreamerInput {
  fn grab(&mut self) -> Result<(), InputError> {
    // 取空队列，只留下最后一个样本
    while let Some(sample) = self.appsink.try_pull_sample(gst::ClockTime::ZERO) {
      self.pending = Some(sample);
    }
    Ok(())
  }

  fn retrieve(&mut self) -> Result<Option<RgbImage>, InputError> {
    let sample = match self.pending.take() {
      Some(sample) => sample,
      None => match self
        .appsink
        .try_pull_sample(gst::ClockTime::from_mseconds(PULL_TIMEOUT_MS))
      {
        Some(sample) => sample,
        None if self.appsink.is_eos() => return Err(GStreamerInputError::EndOfStream.into()),
        None => return Ok(None),
      },
    };
    Ok(Some(sample_to_rgb(&sample)?))
  }
}

fn sample_to_rgb(sample: &gst::Sample) -> Result<RgbImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;
  if video_info.format() != gst_video::VideoFormat::Rgb {
    return Err(GStreamerInputError::UnsupportedFormat);
  }

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let row = width * 3;
  let expected = stride * height.saturating_sub(1) + row;
  if data.len() < expected {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  // 行可能有对齐填充
  let mut pixels = Vec::with_capacity(row * height);
  for h in 0..height {
    pixels.extend_from_slice(&data[h * stride..h * stride + row]);
  }

  RgbImage::from_raw(width as u32, height as u32, pixels).ok_or(
    GStreamerInputError::BufferSizeMismatch {
      expected: row * height,
      actual: data.len(),
    },
  )
}

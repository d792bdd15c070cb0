// 该文件是 Shouwang （守望） 项目的一部分。
// src/input/v4l_input.rs - V4L2 摄像头输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::pin::Pin;

use image::RgbImage;
use thiserror::Error;
use tracing::{error, info};
use url::Url;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{FrameSource, InputError},
};

const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
// 应用持有一个缓冲区，驱动侧至多积压一帧，grab 丢弃一次即可取到新帧
const BUFFER_COUNT: u32 = 2;
// grab 丢弃的缓冲区数量
const STALE_BUFFERS: u32 = BUFFER_COUNT - 1;

#[derive(Error, Debug)]
pub enum V4lInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Invalid parameter: {0}")]
  InvalidParameter(String),
  #[error("Unsupported pixel format: {0}")]
  UnsupportedPixelFormat(String),
  #[error("Frame decode error: {0}")]
  DecodeError(#[from] image::ImageError),
  #[error("Buffer size mismatch")]
  BufferSizeMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
  Yuyv,
  Mjpg,
}

impl PixelFormat {
  fn fourcc(self) -> FourCC {
    match self {
      PixelFormat::Yuyv => FourCC::new(b"YUYV"),
      PixelFormat::Mjpg => FourCC::new(b"MJPG"),
    }
  }
}

/// V4L2 摄像头
///
/// 形如 `v4l:///dev/video0?width=1280&height=720&format=MJPG`。
/// `grab` 出队并丢弃一个缓冲，`retrieve` 出队下一个缓冲并转换为 RGB。
pub struct V4lInput {
  /// 设备（使用 Pin<Box> 固定内存位置）
  device: Pin<Box<Device>>,
  /// 捕获流（生命周期与 device 关联）
  stream: Option<Stream<'static>>,
  format: PixelFormat,
  width: u32,
  height: u32,
}

impl FromUrlWithScheme for V4lInput {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lInput {
  type Error = V4lInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4lInputError::SchemaMismatch);
    }

    let device_path = match url.path() {
      "" | "/" => DEFAULT_DEVICE,
      path => path,
    };

    let mut width = DEFAULT_WIDTH;
    let mut height = DEFAULT_HEIGHT;
    let mut format = PixelFormat::Yuyv;
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "width" => {
          width = v
            .parse()
            .map_err(|_| V4lInputError::InvalidParameter(format!("width={}", v)))?;
        }
        "height" => {
          height = v
            .parse()
            .map_err(|_| V4lInputError::InvalidParameter(format!("height={}", v)))?;
        }
        "format" => {
          format = match v.to_ascii_uppercase().as_str() {
            "YUYV" => PixelFormat::Yuyv,
            "MJPG" | "MJPEG" => PixelFormat::Mjpg,
            other => return Err(V4lInputError::UnsupportedPixelFormat(other.to_string())),
          };
        }
        _ => {}
      }
    }

    Self::open(device_path, width, height, format)
  }
}

impl V4lInput {
  fn open(
    device_path: &str,
    width: u32,
    height: u32,
    format: PixelFormat,
  ) -> Result<Self, V4lInputError> {
    let device = Box::pin(Device::with_path(device_path)?);

    let mut fmt = device.format()?;
    fmt.width = width;
    fmt.height = height;
    fmt.fourcc = format.fourcc();
    let fmt = device.set_format(&fmt)?;
    if fmt.fourcc != format.fourcc() {
      return Err(V4lInputError::UnsupportedPixelFormat(fmt.fourcc.to_string()));
    }
    info!(
      "打开摄像头 {} ({}x{}, {})",
      device_path, fmt.width, fmt.height, fmt.fourcc
    );

    let mut input = Self {
      device,
      stream: None,
      format,
      width: fmt.width,
      height: fmt.height,
    };

    // SAFETY: device 被 Pin<Box> 固定在堆上不会移动，stream 在 Drop 中先于 device 释放
    let device_ref: &Device = &input.device;
    let stream = unsafe {
      let device_static: &'static Device = std::mem::transmute(device_ref);
      Stream::with_buffers(device_static, Type::VideoCapture, BUFFER_COUNT)?
    };
    input.stream = Some(stream);

    Ok(input)
  }

  fn next_buffer(&mut self) -> Result<&[u8], V4lInputError> {
    let stream = self
      .stream
      .as_mut()
      .ok_or_else(|| std::io::Error::other("捕获流已关闭"))?;
    let (buffer, meta) = stream.next()?;
    let used = (meta.bytesused as usize).min(buffer.len());
    Ok(if used == 0 { buffer } else { &buffer[..used] })
  }

  fn decode(&self, data: &[u8]) -> Result<RgbImage, V4lInputError> {
    match self.format {
      PixelFormat::Yuyv => {
        let rgb = yuyv_to_rgb(data, self.width, self.height);
        RgbImage::from_raw(self.width, self.height, rgb).ok_or(V4lInputError::BufferSizeMismatch)
      }
      PixelFormat::Mjpg => Ok(image::load_from_memory(data)?.into_rgb8()),
    }
  }
}

impl Drop for V4lInput {
  fn drop(&mut self) {
    // stream 必须先于 device 释放
    self.stream.take();
  }
}

impl FrameSource for V4lInput {
  fn grab(&mut self) -> Result<(), InputError> {
    for _ in 0..STALE_BUFFERS {
      self.next_buffer()?;
    }
    Ok(())
  }

  fn retrieve(&mut self) -> Result<Option<RgbImage>, InputError> {
    let data = self.next_buffer()?.to_vec();
    Ok(Some(self.decode(&data)?))
  }
}

/// YUYV 4:2:2 转 RGB
fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
  let pixels = (width * height) as usize;
  let mut rgb = Vec::with_capacity(pixels * 3);

  for chunk in yuyv.chunks_exact(4).take(pixels / 2) {
    let u = chunk[1] as f32 - 128.0;
    let v = chunk[3] as f32 - 128.0;
    for y in [chunk[0] as f32, chunk[2] as f32] {
      let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }
  }

  rgb
}

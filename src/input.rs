// 该文件是 Shouwang （守望） 项目的一部分。
// src/input.rs - 摄像头/图像输入
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

use std::sync::{Arc, Mutex};

use image::RgbImage;
use thiserror::Error;

use crate::FromUrl;

/// 帧来源
///
/// 采用先 `grab` 再 `retrieve` 的方式：`grab` 丢弃缓冲中积压的旧帧，
/// `retrieve` 取出最新的一帧。暂时没有可用帧时 `retrieve` 返回 `Ok(None)`。
pub trait FrameSource: Send {
  fn grab(&mut self) -> Result<(), InputError>;
  fn retrieve(&mut self) -> Result<Option<RgbImage>, InputError>;
}

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "v4l_input")]
mod v4l_input;
#[cfg(feature = "v4l_input")]
pub use self::v4l_input::{V4lInput, V4lInputError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerInput, GStreamerInputError};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("Image file input error: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "v4l_input")]
  #[error("V4L input error: {0}")]
  V4lInputError(#[from] V4lInputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("URI scheme mismatch: {0}")]
  SchemeMismatch(String),
  #[error("Frame source unavailable: {0}")]
  Unavailable(String),
}

pub enum InputWrapper {
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "v4l_input")]
  V4lInput(V4lInput),
  #[cfg(feature = "gstreamer_input")]
  GStreamerInput(GStreamerInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        return Ok(InputWrapper::ReadImageFile(ImageFileInput::from_url(url)?));
      }
    }
    #[cfg(feature = "v4l_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == V4lInput::SCHEME {
        return Ok(InputWrapper::V4lInput(V4lInput::from_url(url)?));
      }
    }
    #[cfg(feature = "gstreamer_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == GStreamerInput::SCHEME {
        return Ok(InputWrapper::GStreamerInput(GStreamerInput::from_url(url)?));
      }
    }
    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl FrameSource for InputWrapper {
  fn grab(&mut self) -> Result<(), InputError> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.grab(),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4lInput(input) => input.grab(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.grab(),
    }
  }

  fn retrieve(&mut self) -> Result<Option<RgbImage>, InputError> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.retrieve(),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4lInput(input) => input.retrieve(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.retrieve(),
    }
  }
}

/// 多条流水线共享的摄像头
///
/// `grab` 与 `retrieve` 在同一把锁内成对执行，两条流水线的调用不会交错。
#[derive(Clone)]
pub struct SharedCamera {
  source: Arc<Mutex<Box<dyn FrameSource>>>,
}

impl SharedCamera {
  pub fn new<S: FrameSource + 'static>(source: S) -> Self {
    Self::from_boxed(Box::new(source))
  }

  pub fn from_boxed(source: Box<dyn FrameSource>) -> Self {
    Self {
      source: Arc::new(Mutex::new(source)),
    }
  }

  /// 丢弃积压帧后取出最新一帧
  pub fn latest_frame(&self) -> Result<Option<RgbImage>, InputError> {
    let mut source = self.source.lock().unwrap_or_else(|e| e.into_inner());
    source.grab()?;
    source.retrieve()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicBool, Ordering};

  /// 记录 grab/retrieve 是否被其他调用打断
  struct InterleaveProbe {
    grabbed: Arc<AtomicBool>,
    interleaved: Arc<AtomicBool>,
  }

  impl FrameSource for InterleaveProbe {
    fn grab(&mut self) -> Result<(), InputError> {
      if self.grabbed.swap(true, Ordering::SeqCst) {
        self.interleaved.store(true, Ordering::SeqCst);
      }
      std::thread::yield_now();
      Ok(())
    }

    fn retrieve(&mut self) -> Result<Option<RgbImage>, InputError> {
      std::thread::yield_now();
      if !self.grabbed.swap(false, Ordering::SeqCst) {
        self.interleaved.store(true, Ordering::SeqCst);
      }
      Ok(Some(RgbImage::new(2, 2)))
    }
  }

  #[test]
  fn grab_and_retrieve_are_paired() {
    let interleaved = Arc::new(AtomicBool::new(false));
    let camera = SharedCamera::new(InterleaveProbe {
      grabbed: Arc::new(AtomicBool::new(false)),
      interleaved: interleaved.clone(),
    });

    let workers: Vec<_> = (0..4)
      .map(|_| {
        let camera = camera.clone();
        std::thread::spawn(move || {
          for _ in 0..100 {
            assert!(camera.latest_frame().unwrap().is_some());
          }
        })
      })
      .collect();
    for worker in workers {
      worker.join().unwrap();
    }

    assert!(!interleaved.load(Ordering::SeqCst));
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = url::Url::parse("ftp://camera/0").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::SchemeMismatch(_))
    ));
  }
}

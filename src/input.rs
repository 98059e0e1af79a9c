// 该文件是 Tiegui （铁轨哨兵） 项目的一部分。
// src/input.rs - 视频输入源
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

//! 视频源抽象。
//!
//! 调度器只依赖 [`VideoSource`] 提供的最小能力：当前播放位置、可选的总时长、
//! 结束信号、按秒推进以及抓取当前帧。解码与播放不在本 crate 内。
//!
//! 输入源通过 URL 构建：
//!
//! - `sim://<名称>?duration=10&width=64&height=36` 有限时长的模拟录像
//! - `live://<名称>` 直播源，没有总时长，也不会被推进

use thiserror::Error;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

mod live;
mod recording;

pub use self::live::{LiveSource, LiveSourceError};
pub use self::recording::{RecordingSource, RecordingSourceError};

/// 输入源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
  /// 有限时长的录像
  Recording,
  /// 直播摄像头
  Live,
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("模拟录像输入错误: {0}")]
  RecordingSourceError(#[from] RecordingSourceError),
  #[error("直播输入错误: {0}")]
  LiveSourceError(#[from] LiveSourceError),
  #[error("无法读取帧: {0}")]
  FrameUnreadable(String),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub trait VideoSource: Send {
  /// 来源名称，同时作为检测记录的位置标签
  fn name(&self) -> &str;

  fn kind(&self) -> SourceKind;

  /// 当前播放位置（秒）
  fn current_position(&self) -> f64;

  /// 总时长（秒），直播源为 None
  fn duration(&self) -> Option<f64>;

  fn has_ended(&self) -> bool;

  /// 推进播放位置，直播源忽略
  fn advance(&mut self, seconds: f64);

  /// 抓取当前位置的帧
  fn capture(&mut self) -> Result<Frame, InputError>;

  /// 播放进度，范围 [0, 1]；没有时长时为 0
  fn progress(&self) -> f64 {
    match self.duration() {
      Some(duration) if duration > 0.0 => (self.current_position() / duration).clamp(0.0, 1.0),
      _ => 0.0,
    }
  }
}

impl<S: VideoSource + ?Sized> VideoSource for Box<S> {
  fn name(&self) -> &str {
    (**self).name()
  }

  fn kind(&self) -> SourceKind {
    (**self).kind()
  }

  fn current_position(&self) -> f64 {
    (**self).current_position()
  }

  fn duration(&self) -> Option<f64> {
    (**self).duration()
  }

  fn has_ended(&self) -> bool {
    (**self).has_ended()
  }

  fn advance(&mut self, seconds: f64) {
    (**self).advance(seconds)
  }

  fn capture(&mut self) -> Result<Frame, InputError> {
    (**self).capture()
  }
}

pub enum InputWrapper {
  Recording(RecordingSource),
  Live(LiveSource),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      RecordingSource::SCHEME => Ok(InputWrapper::Recording(RecordingSource::from_url(url)?)),
      LiveSource::SCHEME => Ok(InputWrapper::Live(LiveSource::from_url(url)?)),
      _ => Err(InputError::SchemeMismatch),
    }
  }
}

impl InputWrapper {
  pub fn into_boxed(self) -> Box<dyn VideoSource> {
    match self {
      InputWrapper::Recording(source) => Box::new(source),
      InputWrapper::Live(source) => Box::new(source),
    }
  }
}

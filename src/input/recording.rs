// 该文件是 Tiegui （铁轨哨兵） 项目的一部分。
// src/input/recording.rs - 模拟录像输入
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

use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use super::{InputError, SourceKind, VideoSource};
use crate::{FromUrl, FromUrlWithScheme, frame::Frame, url_name, url_query};

const DEFAULT_WIDTH: u32 = 64;
const DEFAULT_HEIGHT: u32 = 36;
// 浮点累加误差
const POSITION_EPSILON: f64 = 1e-9;

#[derive(Error, Debug)]
pub enum RecordingSourceError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("缺少录像名称")]
  MissingName,
  #[error("缺少 duration 参数")]
  MissingDuration,
  #[error("参数 {0} 无效: {1}")]
  InvalidParameter(&'static str, String),
}

/// 有限时长的录像。帧内容是按序号变化的纯色图，只用于驱动推理流程。
#[derive(Debug, Clone)]
pub struct RecordingSource {
  name: String,
  duration: f64,
  position: f64,
  width: u32,
  height: u32,
  captured: u64,
}

impl FromUrlWithScheme for RecordingSource {
  const SCHEME: &'static str = "sim";
}

impl FromUrl for RecordingSource {
  type Error = RecordingSourceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(RecordingSourceError::SchemeMismatch);
    }

    let name = url_name(url).ok_or(RecordingSourceError::MissingName)?;
    let duration = url_query::<f64>(url, "duration")
      .ok_or(RecordingSourceError::MissingDuration)?
      .map_err(|v| RecordingSourceError::InvalidParameter("duration", v))?;
    let width = url_query::<u32>(url, "width")
      .transpose()
      .map_err(|v| RecordingSourceError::InvalidParameter("width", v))?
      .unwrap_or(DEFAULT_WIDTH);
    let height = url_query::<u32>(url, "height")
      .transpose()
      .map_err(|v| RecordingSourceError::InvalidParameter("height", v))?
      .unwrap_or(DEFAULT_HEIGHT);

    Self::new(name, duration).map(|source| source.with_shape(width, height))
  }
}

impl RecordingSource {
  pub fn new(name: impl Into<String>, duration: f64) -> Result<Self, RecordingSourceError> {
    if !duration.is_finite() || duration <= 0.0 {
      return Err(RecordingSourceError::InvalidParameter(
        "duration",
        duration.to_string(),
      ));
    }

    Ok(Self {
      name: name.into(),
      duration,
      position: 0.0,
      width: DEFAULT_WIDTH,
      height: DEFAULT_HEIGHT,
      captured: 0,
    })
  }

  pub fn with_shape(mut self, width: u32, height: u32) -> Self {
    self.width = width;
    self.height = height;
    self
  }
}

impl VideoSource for RecordingSource {
  fn name(&self) -> &str {
    &self.name
  }

  fn kind(&self) -> SourceKind {
    SourceKind::Recording
  }

  fn current_position(&self) -> f64 {
    self.position
  }

  fn duration(&self) -> Option<f64> {
    Some(self.duration)
  }

  fn has_ended(&self) -> bool {
    self.position + POSITION_EPSILON >= self.duration
  }

  fn advance(&mut self, seconds: f64) {
    self.position = (self.position + seconds).min(self.duration);
    debug!("{} 播放位置推进到 {:.3}s", self.name, self.position);
  }

  fn capture(&mut self) -> Result<Frame, InputError> {
    let index = self.captured;
    self.captured += 1;
    let shade = (index.wrapping_mul(17) % 256) as u8;
    Ok(Frame::filled(
      self.width,
      self.height,
      shade,
      index,
      Some(self.position),
    ))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ends_after_advancing_full_duration() {
    let mut source = RecordingSource::new("clip", 10.0).unwrap();
    for _ in 0..4 {
      source.advance(2.0);
      assert!(!source.has_ended());
    }
    source.advance(2.0);
    assert!(source.has_ended());
    assert_eq!(source.progress(), 1.0);
  }

  #[test]
  fn advance_clamps_to_duration() {
    let mut source = RecordingSource::new("clip", 3.0).unwrap();
    source.advance(2.0);
    source.advance(2.0);
    assert_eq!(source.current_position(), 3.0);
  }

  #[test]
  fn capture_stamps_position() {
    let mut source = RecordingSource::new("clip", 3.0).unwrap().with_shape(2, 2);
    source.advance(1.5);
    let frame = source.capture().unwrap();
    assert_eq!(frame.position(), Some(1.5));
    assert_eq!(frame.as_nhwc().len(), 12);
  }

  #[test]
  fn parses_url_parameters() {
    let url = Url::parse("sim:///Track%20B?duration=8.5&width=4&height=2").unwrap();
    let source = RecordingSource::from_url(&url).unwrap();
    assert_eq!(source.name(), "Track B");
    assert_eq!(source.duration(), Some(8.5));

    let url = Url::parse("sim://clip").unwrap();
    assert!(matches!(
      RecordingSource::from_url(&url),
      Err(RecordingSourceError::MissingDuration)
    ));

    let url = Url::parse("sim://clip?duration=-1").unwrap();
    assert!(matches!(
      RecordingSource::from_url(&url),
      Err(RecordingSourceError::InvalidParameter("duration", _))
    ));
  }
}

// 该文件是 Tiegui （铁轨哨兵） 项目的一部分。
// src/input/live.rs - 直播摄像头输入
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

use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};
use std::time::Instant;

use thiserror::Error;
use tracing::error;
use url::Url;

use super::{InputError, SourceKind, VideoSource};
use crate::{FromUrl, FromUrlWithScheme, frame::Frame, url_name, url_query};

const DEFAULT_WIDTH: u32 = 64;
const DEFAULT_HEIGHT: u32 = 36;

#[derive(Error, Debug)]
pub enum LiveSourceError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("缺少摄像头名称")]
  MissingName,
  #[error("参数 {0} 无效: {1}")]
  InvalidParameter(&'static str, String),
}

/// 直播源：没有总时长，播放位置只随墙钟增长，`advance` 不起作用。
///
/// 结束信号由外部通过 [`LiveSource::end_signal`] 设置，例如摄像头断开。
#[derive(Debug)]
pub struct LiveSource {
  name: String,
  width: u32,
  height: u32,
  opened_at: Instant,
  captured: u64,
  ended: Arc<AtomicBool>,
}

impl FromUrlWithScheme for LiveSource {
  const SCHEME: &'static str = "live";
}

impl FromUrl for LiveSource {
  type Error = LiveSourceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(LiveSourceError::SchemeMismatch);
    }

    let name = url_name(url).ok_or(LiveSourceError::MissingName)?;
    let width = url_query::<u32>(url, "width")
      .transpose()
      .map_err(|v| LiveSourceError::InvalidParameter("width", v))?
      .unwrap_or(DEFAULT_WIDTH);
    let height = url_query::<u32>(url, "height")
      .transpose()
      .map_err(|v| LiveSourceError::InvalidParameter("height", v))?
      .unwrap_or(DEFAULT_HEIGHT);

    Ok(Self::new(name).with_shape(width, height))
  }
}

impl LiveSource {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      width: DEFAULT_WIDTH,
      height: DEFAULT_HEIGHT,
      opened_at: Instant::now(),
      captured: 0,
      ended: Arc::new(AtomicBool::new(false)),
    }
  }

  pub fn with_shape(mut self, width: u32, height: u32) -> Self {
    self.width = width;
    self.height = height;
    self
  }

  pub fn end_signal(&self) -> Arc<AtomicBool> {
    Arc::clone(&self.ended)
  }
}

impl VideoSource for LiveSource {
  fn name(&self) -> &str {
    &self.name
  }

  fn kind(&self) -> SourceKind {
    SourceKind::Live
  }

  fn current_position(&self) -> f64 {
    self.opened_at.elapsed().as_secs_f64()
  }

  fn duration(&self) -> Option<f64> {
    None
  }

  fn has_ended(&self) -> bool {
    self.ended.load(Ordering::Acquire)
  }

  fn advance(&mut self, _seconds: f64) {}

  fn capture(&mut self) -> Result<Frame, InputError> {
    if self.has_ended() {
      return Err(InputError::FrameUnreadable(format!(
        "{} 已断开",
        self.name
      )));
    }
    let index = self.captured;
    self.captured += 1;
    Ok(Frame::filled(self.width, self.height, 0x80, index, None))
  }
}

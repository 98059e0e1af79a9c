// 该文件是 Tiegui （铁轨哨兵） 项目的一部分。
// src/frame.rs - 采样帧定义
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

const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
}

/// 从视频源中抓取的一帧静态图像，RGB NHWC 排布
#[derive(Debug, Clone)]
pub struct Frame {
  data: Box<[u8]>,
  width: u32,
  height: u32,
  /// 采样序号，从 0 开始
  index: u64,
  /// 抓帧时的播放位置（秒），直播源为 None
  position: Option<f64>,
}

impl Frame {
  pub fn new(
    data: Vec<u8>,
    width: u32,
    height: u32,
    index: u64,
    position: Option<f64>,
  ) -> Result<Self, FrameError> {
    let expected = RGB_CHANNELS * width as usize * height as usize;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      data: data.into_boxed_slice(),
      width,
      height,
      index,
      position,
    })
  }

  /// 纯色帧，模拟源使用
  pub fn filled(width: u32, height: u32, value: u8, index: u64, position: Option<f64>) -> Self {
    let size = RGB_CHANNELS * (width as usize) * (height as usize);
    Self {
      data: vec![value; size].into_boxed_slice(),
      width,
      height,
      index,
      position,
    }
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn index(&self) -> u64 {
    self.index
  }

  pub fn position(&self) -> Option<f64> {
    self.position
  }

  pub fn as_nhwc(&self) -> &[u8] {
    &self.data
  }
}

// 该文件是 Tiegui （铁轨哨兵） 项目的一部分。
// src/model/script.rs - 脚本化模型输出
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

//! 按帧序号回放预先写好的模型输出，便于复现一次分析。
//!
//! 脚本文件是一个 JSON 数组，第 N 项对应第 N 个采样帧：
//!
//! ```json
//! [
//!   [{ "classId": 0, "score": 0.85, "bbox": [0.1, 0.2, 0.3, 0.6] }],
//!   [],
//!   "fail",
//!   [{ "classId": 7, "score": 0.65 }]
//! ]
//! ```
//!
//! 字符串项表示该帧推理失败；`"unavailable"` 表示后端彻底不可用。
//! 超出脚本长度的帧没有任何输出。

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::{InferenceAdapter, InferenceError, RawDetection},
};

const UNAVAILABLE_MARK: &str = "unavailable";

#[derive(Error, Debug)]
pub enum ScriptedModelError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("脚本解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ScriptEntry {
  Detections(Vec<RawDetection>),
  Failure(String),
}

pub struct ScriptedModel {
  entries: Vec<ScriptEntry>,
}

impl FromUrlWithScheme for ScriptedModel {
  const SCHEME: &'static str = "script";
}

impl FromUrl for ScriptedModel {
  type Error = ScriptedModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ScriptedModelError::SchemeMismatch);
    }
    Self::load(url.path())
  }
}

impl ScriptedModel {
  pub fn new(entries: Vec<ScriptEntry>) -> Self {
    Self { entries }
  }

  pub fn load(path: impl AsRef<Path>) -> Result<Self, ScriptedModelError> {
    let path = path.as_ref();
    info!("加载脚本文件: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    let entries: Vec<ScriptEntry> = serde_json::from_str(&text)?;
    debug!("脚本共 {} 帧", entries.len());
    Ok(Self::new(entries))
  }
}

#[async_trait]
impl InferenceAdapter for ScriptedModel {
  fn name(&self) -> &str {
    Self::SCHEME
  }

  async fn health_check(&self) -> Result<(), InferenceError> {
    match self.entries.first() {
      Some(ScriptEntry::Failure(mark)) if mark == UNAVAILABLE_MARK => Err(
        InferenceError::Unavailable("脚本声明后端不可用".to_string()),
      ),
      _ => Ok(()),
    }
  }

  async fn infer(&self, frame: &Frame) -> Result<Vec<RawDetection>, InferenceError> {
    match self.entries.get(frame.index() as usize) {
      None => Ok(Vec::new()),
      Some(ScriptEntry::Detections(items)) => Ok(items.clone()),
      Some(ScriptEntry::Failure(mark)) if mark == UNAVAILABLE_MARK => Err(
        InferenceError::Unavailable(format!("帧 {} 时后端不可用", frame.index())),
      ),
      Some(ScriptEntry::Failure(mark)) => Err(InferenceError::Frame(format!(
        "帧 {}: {}",
        frame.index(),
        mark
      ))),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[tokio::test]
  async fn replays_script_by_frame_index() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
      file,
      r#"[[{{"classId": 0, "score": 0.85, "bbox": [0.1, 0.1, 0.2, 0.4]}}], "fail", []]"#
    )
    .unwrap();

    let model = ScriptedModel::load(file.path()).unwrap();
    assert!(model.health_check().await.is_ok());

    let first = model.infer(&Frame::filled(1, 1, 0, 0, None)).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].class_id, 0);

    let second = model.infer(&Frame::filled(1, 1, 0, 1, None)).await;
    assert!(matches!(second, Err(InferenceError::Frame(_))));

    let beyond = model.infer(&Frame::filled(1, 1, 0, 9, None)).await.unwrap();
    assert!(beyond.is_empty());
  }

  #[tokio::test]
  async fn unavailable_mark_fails_health_check() {
    let model = ScriptedModel::new(vec![ScriptEntry::Failure("unavailable".into())]);
    let err = model.health_check().await.unwrap_err();
    assert!(err.is_fatal());
  }
}

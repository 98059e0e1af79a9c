// 该文件是 Tiegui （铁轨哨兵） 项目的一部分。
// src/model.rs - 推理适配器
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

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

/// 适配器边界的置信度下限，低于该值的结果直接丢弃
pub const MIN_ADAPTER_CONFIDENCE: f32 = 0.5;

/// 归一化坐标 [x_min, y_min, x_max, y_max]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox(pub [f32; 4]);

/// 未分类的模型输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDetection {
  pub class_id: u32,
  pub score: f32,
  #[serde(default)]
  pub bbox: BoundingBox,
}

impl RawDetection {
  pub fn label(&self) -> &'static str {
    coco_label(self.class_id).unwrap_or("unknown")
  }
}

#[derive(Error, Debug, Clone)]
pub enum InferenceError {
  #[error("帧推理失败: {0}")]
  Frame(String),
  #[error("推理超时: {0:?}")]
  Timeout(Duration),
  #[error("推理后端不可用: {0}")]
  Unavailable(String),
}

impl InferenceError {
  /// 不可用错误会终止整个会话，其余只影响当前帧
  pub fn is_fatal(&self) -> bool {
    matches!(self, InferenceError::Unavailable(_))
  }
}

#[async_trait]
pub trait InferenceAdapter: Send + Sync {
  fn name(&self) -> &str;

  /// 运行开始前调用一次；失败视为后端不可用
  async fn health_check(&self) -> Result<(), InferenceError> {
    Ok(())
  }

  async fn infer(&self, frame: &Frame) -> Result<Vec<RawDetection>, InferenceError>;
}

#[async_trait]
impl<A: InferenceAdapter + ?Sized> InferenceAdapter for Arc<A> {
  fn name(&self) -> &str {
    (**self).name()
  }

  async fn health_check(&self) -> Result<(), InferenceError> {
    (**self).health_check().await
  }

  async fn infer(&self, frame: &Frame) -> Result<Vec<RawDetection>, InferenceError> {
    (**self).infer(frame).await
  }
}

/// 在适配器边界上按置信度过滤结果
pub struct ConfidenceGate<A> {
  inner: A,
  floor: f32,
}

impl<A: InferenceAdapter> ConfidenceGate<A> {
  pub fn new(inner: A) -> Self {
    Self::with_floor(inner, MIN_ADAPTER_CONFIDENCE)
  }

  pub fn with_floor(inner: A, floor: f32) -> Self {
    Self { inner, floor }
  }
}

#[async_trait]
impl<A: InferenceAdapter> InferenceAdapter for ConfidenceGate<A> {
  fn name(&self) -> &str {
    self.inner.name()
  }

  async fn health_check(&self) -> Result<(), InferenceError> {
    self.inner.health_check().await
  }

  async fn infer(&self, frame: &Frame) -> Result<Vec<RawDetection>, InferenceError> {
    let mut items = self.inner.infer(frame).await?;
    let before = items.len();
    items.retain(|item| item.score >= self.floor);
    if items.len() != before {
      debug!(
        "帧 {} 丢弃 {} 个低置信度结果",
        frame.index(),
        before - items.len()
      );
    }
    Ok(items)
  }
}

#[cfg(feature = "model_http")]
mod http;
mod script;
mod simulated;

#[cfg(feature = "model_http")]
pub use self::http::{HttpModel, HttpModelError};
pub use self::script::{ScriptEntry, ScriptedModel, ScriptedModelError};
pub use self::simulated::{SimulatedModel, SimulatedModelError};

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模拟模型错误: {0}")]
  SimulatedModelError(#[from] SimulatedModelError),
  #[error("脚本模型错误: {0}")]
  ScriptedModelError(#[from] ScriptedModelError),
  #[cfg(feature = "model_http")]
  #[error("HTTP 模型错误: {0}")]
  HttpModelError(#[from] HttpModelError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum ModelWrapper {
  Simulated(SimulatedModel),
  Scripted(ScriptedModel),
  #[cfg(feature = "model_http")]
  Http(HttpModel),
}

impl FromUrl for ModelWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      SimulatedModel::SCHEME => Ok(ModelWrapper::Simulated(SimulatedModel::from_url(url)?)),
      ScriptedModel::SCHEME => Ok(ModelWrapper::Scripted(ScriptedModel::from_url(url)?)),
      #[cfg(feature = "model_http")]
      "http" | "https" => Ok(ModelWrapper::Http(HttpModel::from_url(url)?)),
      _ => Err(ModelError::SchemeMismatch),
    }
  }
}

impl ModelWrapper {
  /// 包上默认置信度门限后交给调度器共享
  pub fn into_shared(self) -> Arc<dyn InferenceAdapter> {
    self.into_gated(MIN_ADAPTER_CONFIDENCE)
  }

  pub fn into_gated(self, floor: f32) -> Arc<dyn InferenceAdapter> {
    match self {
      ModelWrapper::Simulated(model) => Arc::new(ConfidenceGate::with_floor(model, floor)),
      ModelWrapper::Scripted(model) => Arc::new(ConfidenceGate::with_floor(model, floor)),
      #[cfg(feature = "model_http")]
      ModelWrapper::Http(model) => Arc::new(ConfidenceGate::with_floor(model, floor)),
    }
  }
}

/// COCO 80 类标签，下标即模型输出的类别编号
pub const COCO_LABELS: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

pub fn coco_label(class_id: u32) -> Option<&'static str> {
  COCO_LABELS.get(class_id as usize).copied()
}

pub fn coco_class_id(label: &str) -> Option<u32> {
  COCO_LABELS
    .iter()
    .position(|name| *name == label)
    .map(|idx| idx as u32)
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Fixed(Vec<RawDetection>);

  #[async_trait]
  impl InferenceAdapter for Fixed {
    fn name(&self) -> &str {
      "fixed"
    }

    async fn infer(&self, _frame: &Frame) -> Result<Vec<RawDetection>, InferenceError> {
      Ok(self.0.clone())
    }
  }

  fn raw(class_id: u32, score: f32) -> RawDetection {
    RawDetection {
      class_id,
      score,
      bbox: BoundingBox::default(),
    }
  }

  #[tokio::test]
  async fn gate_discards_below_half() {
    let gate = ConfidenceGate::new(Fixed(vec![raw(0, 0.49), raw(0, 0.5), raw(2, 0.9)]));
    let frame = Frame::filled(1, 1, 0, 0, None);
    let items = gate.infer(&frame).await.unwrap();
    assert_eq!(items, vec![raw(0, 0.5), raw(2, 0.9)]);
  }

  #[test]
  fn coco_lookup() {
    assert_eq!(coco_label(0), Some("person"));
    assert_eq!(coco_label(7), Some("truck"));
    assert_eq!(coco_label(80), None);
    assert_eq!(coco_class_id("dog"), Some(16));
    assert_eq!(raw(200, 0.9).label(), "unknown");
  }

  #[test]
  fn only_unavailable_is_fatal() {
    assert!(InferenceError::Unavailable("down".into()).is_fatal());
    assert!(!InferenceError::Frame("bad".into()).is_fatal());
    assert!(!InferenceError::Timeout(Duration::from_secs(1)).is_fatal());
  }
}

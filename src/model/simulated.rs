// 该文件是 Tiegui （铁轨哨兵） 项目的一部分。
// src/model/simulated.rs - 模拟检测流
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

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::{BoundingBox, InferenceAdapter, InferenceError, RawDetection},
  url_query,
};

const DEFAULT_RATE: f64 = 0.3;

// 轨道场景里常见的类别: person, car, truck, train, dog, horse, cow, backpack, suitcase, bench
const TRACK_CLASSES: [u32; 10] = [0, 2, 7, 6, 16, 17, 19, 24, 28, 13];

#[derive(Error, Debug)]
pub enum SimulatedModelError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("参数 {0} 无效: {1}")]
  InvalidParameter(&'static str, String),
}

/// 模拟的 AI 检测流：每帧以 `rate` 的概率给出一个随机目标，置信度落在 [0.5, 1.0)
pub struct SimulatedModel {
  rng: Mutex<StdRng>,
  rate: f64,
  latency: Duration,
}

impl FromUrlWithScheme for SimulatedModel {
  const SCHEME: &'static str = "mock";
}

impl FromUrl for SimulatedModel {
  type Error = SimulatedModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(SimulatedModelError::SchemeMismatch);
    }

    let rate = url_query::<f64>(url, "rate")
      .transpose()
      .map_err(|v| SimulatedModelError::InvalidParameter("rate", v))?
      .unwrap_or(DEFAULT_RATE);
    if !(0.0..=1.0).contains(&rate) {
      return Err(SimulatedModelError::InvalidParameter(
        "rate",
        rate.to_string(),
      ));
    }

    let seed = url_query::<u64>(url, "seed")
      .transpose()
      .map_err(|v| SimulatedModelError::InvalidParameter("seed", v))?;
    let latency_ms = url_query::<u64>(url, "latency_ms")
      .transpose()
      .map_err(|v| SimulatedModelError::InvalidParameter("latency_ms", v))?
      .unwrap_or(0);

    let rng = match seed {
      Some(seed) => StdRng::seed_from_u64(seed),
      None => StdRng::from_entropy(),
    };
    info!(
      "模拟检测流: 触发概率 {:.2}, 种子 {:?}, 延迟 {}ms",
      rate, seed, latency_ms
    );

    Ok(Self {
      rng: Mutex::new(rng),
      rate,
      latency: Duration::from_millis(latency_ms),
    })
  }
}

impl SimulatedModel {
  pub fn seeded(seed: u64, rate: f64) -> Self {
    Self {
      rng: Mutex::new(StdRng::seed_from_u64(seed)),
      rate: rate.clamp(0.0, 1.0),
      latency: Duration::ZERO,
    }
  }

  fn sample(&self) -> Option<RawDetection> {
    let mut rng = self.rng.lock().ok()?;
    if !rng.gen_bool(self.rate) {
      return None;
    }

    let class_id = *TRACK_CLASSES.choose(&mut *rng)?;
    let score = rng.gen_range(0.5f32..1.0);
    let x = rng.gen_range(0.0f32..0.8);
    let y = rng.gen_range(0.0f32..0.8);
    let w = rng.gen_range(0.05f32..0.2);
    let h = rng.gen_range(0.05f32..0.2);

    Some(RawDetection {
      class_id,
      score,
      bbox: BoundingBox([x, y, x + w, y + h]),
    })
  }
}

#[async_trait]
impl InferenceAdapter for SimulatedModel {
  fn name(&self) -> &str {
    Self::SCHEME
  }

  async fn infer(&self, frame: &Frame) -> Result<Vec<RawDetection>, InferenceError> {
    if !self.latency.is_zero() {
      tokio::time::sleep(self.latency).await;
    }
    let items: Vec<_> = self.sample().into_iter().collect();
    debug!("模拟帧 {}: {} 个目标", frame.index(), items.len());
    Ok(items)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn same_seed_same_feed() {
    let a = SimulatedModel::seeded(7, 0.8);
    let b = SimulatedModel::seeded(7, 0.8);
    let frame = Frame::filled(1, 1, 0, 0, None);
    for _ in 0..20 {
      assert_eq!(a.infer(&frame).await.unwrap(), b.infer(&frame).await.unwrap());
    }
  }

  #[tokio::test]
  async fn scores_stay_above_adapter_floor() {
    let model = SimulatedModel::seeded(1, 1.0);
    let frame = Frame::filled(1, 1, 0, 0, None);
    for _ in 0..50 {
      let items = model.infer(&frame).await.unwrap();
      assert_eq!(items.len(), 1);
      assert!(items[0].score >= 0.5 && items[0].score < 1.0);
      assert!(TRACK_CLASSES.contains(&items[0].class_id));
    }
  }

  #[tokio::test]
  async fn zero_rate_is_silent() {
    let model = SimulatedModel::seeded(3, 0.0);
    let frame = Frame::filled(1, 1, 0, 0, None);
    assert!(model.infer(&frame).await.unwrap().is_empty());
  }

  #[test]
  fn rejects_rate_out_of_range() {
    let url = Url::parse("mock://?rate=1.5").unwrap();
    assert!(matches!(
      SimulatedModel::from_url(&url),
      Err(SimulatedModelError::InvalidParameter("rate", _))
    ));
  }
}

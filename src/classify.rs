// 该文件是 Tiegui （铁轨哨兵） 项目的一部分。
// src/classify.rs - 检测结果分级
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

use std::fmt;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::RawDetection;

/// 低于该置信度一律判为 low，优先于按类别的规则
pub const CONFIDENCE_FLOOR: f32 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionKind {
  Person,
  Animal,
  Vehicle,
  Debris,
  Obstacle,
}

impl DetectionKind {
  pub const ALL: [DetectionKind; 5] = [
    DetectionKind::Person,
    DetectionKind::Animal,
    DetectionKind::Vehicle,
    DetectionKind::Debris,
    DetectionKind::Obstacle,
  ];

  /// 模型标签到轨道目标类别；不认识的标签按障碍物处理
  pub fn from_label(label: &str) -> Self {
    match label {
      "person" => DetectionKind::Person,
      "animal" | "bird" | "cat" | "dog" | "horse" | "sheep" | "cow" | "elephant" | "bear"
      | "zebra" | "giraffe" => DetectionKind::Animal,
      "vehicle" | "bicycle" | "car" | "motorcycle" | "airplane" | "bus" | "train" | "truck"
      | "boat" => DetectionKind::Vehicle,
      "debris" | "backpack" | "umbrella" | "handbag" | "tie" | "suitcase" | "frisbee" | "skis"
      | "snowboard" | "sports ball" | "kite" | "baseball bat" | "baseball glove"
      | "skateboard" | "surfboard" | "tennis racket" | "bottle" | "wine glass" | "cup"
      | "fork" | "knife" | "spoon" | "bowl" => DetectionKind::Debris,
      _ => DetectionKind::Obstacle,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      DetectionKind::Person => "person",
      DetectionKind::Animal => "animal",
      DetectionKind::Vehicle => "vehicle",
      DetectionKind::Debris => "debris",
      DetectionKind::Obstacle => "obstacle",
    }
  }

  fn phrases(&self) -> &'static [&'static str] {
    match self {
      DetectionKind::Person => &[
        "Person detected on the track",
        "Pedestrian close to the rails",
        "Trespasser inside the track area",
      ],
      DetectionKind::Animal => &[
        "Animal crossing the track",
        "Livestock near the rails",
        "Wildlife on the line",
      ],
      DetectionKind::Vehicle => &[
        "Vehicle fouling the track",
        "Vehicle stopped on the level crossing",
        "Road vehicle on the rails",
      ],
      DetectionKind::Debris => &[
        "Debris on the rails",
        "Loose object on the track bed",
        "Fallen item between the rails",
      ],
      DetectionKind::Obstacle => &[
        "Unidentified obstacle on the track",
        "Obstruction ahead on the line",
        "Object blocking the track",
      ],
    }
  }
}

impl fmt::Display for DetectionKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DangerLevel {
  Low,
  Medium,
  High,
  Critical,
}

impl DangerLevel {
  pub const ALL: [DangerLevel; 4] = [
    DangerLevel::Low,
    DangerLevel::Medium,
    DangerLevel::High,
    DangerLevel::Critical,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      DangerLevel::Low => "low",
      DangerLevel::Medium => "medium",
      DangerLevel::High => "high",
      DangerLevel::Critical => "critical",
    }
  }
}

impl fmt::Display for DangerLevel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// 危险等级只由类别和置信度决定
pub fn danger_level(kind: DetectionKind, confidence: f32) -> DangerLevel {
  if confidence < CONFIDENCE_FLOOR {
    return DangerLevel::Low;
  }

  match kind {
    DetectionKind::Person if confidence > 0.8 => DangerLevel::Critical,
    DetectionKind::Person => DangerLevel::High,
    DetectionKind::Vehicle => DangerLevel::Critical,
    DetectionKind::Animal if confidence > 0.75 => DangerLevel::High,
    DetectionKind::Animal => DangerLevel::Medium,
    DetectionKind::Debris if confidence > 0.7 => DangerLevel::Medium,
    DetectionKind::Debris => DangerLevel::Low,
    DetectionKind::Obstacle if confidence > 0.8 => DangerLevel::High,
    DetectionKind::Obstacle => DangerLevel::Medium,
  }
}

/// 分级后的检测记录，创建后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
  pub id: Uuid,
  pub kind: DetectionKind,
  pub confidence: f32,
  pub danger_level: DangerLevel,
  pub location: String,
  pub timestamp_in_video: Option<f64>,
  pub captured_at: DateTime<Utc>,
  pub description: String,
}

/// 描述文字的选取方式，只影响展示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DescriptionPick {
  #[default]
  Random,
  First,
}

#[derive(Debug, Clone, Default)]
pub struct DetectionClassifier {
  pick: DescriptionPick,
}

impl DetectionClassifier {
  pub fn new(pick: DescriptionPick) -> Self {
    Self { pick }
  }

  pub fn describe(&self, kind: DetectionKind) -> &'static str {
    let phrases = kind.phrases();
    match self.pick {
      DescriptionPick::First => phrases[0],
      DescriptionPick::Random => phrases
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(phrases[0]),
    }
  }

  pub fn classify(
    &self,
    raw: &RawDetection,
    location: &str,
    timestamp_in_video: Option<f64>,
  ) -> Detection {
    let kind = DetectionKind::from_label(raw.label());
    let confidence = raw.score.clamp(0.0, 1.0);

    Detection {
      id: Uuid::new_v4(),
      kind,
      confidence,
      danger_level: danger_level(kind, confidence),
      location: location.to_string(),
      timestamp_in_video,
      captured_at: Utc::now(),
      description: self.describe(kind).to_string(),
    }
  }
}

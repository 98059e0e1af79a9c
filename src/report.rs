// 该文件是 Tiegui （铁轨哨兵） 项目的一部分。
// src/report.rs - 会话报告导出
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

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  classify::{DangerLevel, Detection, DetectionKind},
  session::AnalysisSession,
};

#[derive(Error, Debug)]
pub enum ReportError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("缺少输出路径")]
  MissingPath,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  SerializeError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportEntry {
  /// 视频内的时间（秒），直播源为 0
  pub time_in_video: f64,
  pub kind: DetectionKind,
  pub confidence: f32,
  pub danger_level: DangerLevel,
  pub description: String,
}

impl From<&Detection> for ReportEntry {
  fn from(detection: &Detection) -> Self {
    Self {
      time_in_video: detection.timestamp_in_video.unwrap_or(0.0),
      kind: detection.kind,
      confidence: detection.confidence,
      danger_level: detection.danger_level,
      description: detection.description.clone(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
  pub source: String,
  pub exported_at: DateTime<Utc>,
  pub detection_count: usize,
  pub detections: Vec<ReportEntry>,
}

/// 导出只读取会话，不改变会话状态
pub struct ReportExporter;

impl ReportExporter {
  pub fn export(session: &AnalysisSession) -> Report {
    Self::export_detections(session.source(), session.detections())
  }

  pub fn export_detections(source: &str, detections: &[Detection]) -> Report {
    Report {
      source: source.to_string(),
      exported_at: Utc::now(),
      detection_count: detections.len(),
      detections: detections.iter().map(ReportEntry::from).collect(),
    }
  }

  pub fn to_json(report: &Report) -> Result<String, ReportError> {
    Ok(serde_json::to_string_pretty(report)?)
  }
}

pub trait ReportWriter {
  type Error;
  /// 写出报告，返回实际写入的文件
  fn write_report(&self, report: &Report) -> Result<PathBuf, Self::Error>;
}

/// 路径以 `/` 结尾或者已是目录时，按 `<源>-<时间>.<扩展名>` 生成文件名
#[derive(Debug, Clone)]
struct ReportTarget {
  path: PathBuf,
  directory: bool,
}

impl ReportTarget {
  fn from_url(url: &Url) -> Result<Self, ReportError> {
    let raw = url.path();
    if raw.is_empty() || (raw == "/" && url.host_str().is_none_or(str::is_empty)) {
      return Err(ReportError::MissingPath);
    }
    let path = PathBuf::from(
      urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string()),
    );
    let directory = raw.ends_with('/') || path.is_dir();
    Ok(Self { path, directory })
  }

  fn resolve(&self, report: &Report, extension: &str) -> Result<PathBuf, ReportError> {
    if !self.directory {
      if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
      }
      return Ok(self.path.clone());
    }

    std::fs::create_dir_all(&self.path)?;
    let stem: String = report
      .source
      .chars()
      .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
      .collect();
    Ok(self.path.join(format!(
      "{}-{}.{}",
      stem,
      report.exported_at.format("%Y%m%d-%H%M%S"),
      extension
    )))
  }
}

pub struct JsonReportOutput {
  target: ReportTarget,
}

impl FromUrlWithScheme for JsonReportOutput {
  const SCHEME: &'static str = "json";
}

impl FromUrl for JsonReportOutput {
  type Error = ReportError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReportError::SchemeMismatch);
    }
    Ok(Self {
      target: ReportTarget::from_url(url)?,
    })
  }
}

impl ReportWriter for JsonReportOutput {
  type Error = ReportError;

  fn write_report(&self, report: &Report) -> Result<PathBuf, Self::Error> {
    let path = self.target.resolve(report, "json")?;
    std::fs::write(&path, ReportExporter::to_json(report)?)?;
    info!(
      "报告已写入 {}: {} 条检测",
      path.display(),
      report.detection_count
    );
    Ok(path)
  }
}

/// 逐行文本记录：`时间, 类别, 置信度, 危险等级, 描述`
#[cfg(feature = "text_record")]
pub struct TextRecordOutput {
  target: ReportTarget,
}

#[cfg(feature = "text_record")]
impl FromUrlWithScheme for TextRecordOutput {
  const SCHEME: &'static str = "text";
}

#[cfg(feature = "text_record")]
impl FromUrl for TextRecordOutput {
  type Error = ReportError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReportError::SchemeMismatch);
    }
    Ok(Self {
      target: ReportTarget::from_url(url)?,
    })
  }
}

#[cfg(feature = "text_record")]
pub fn render_text(report: &Report) -> String {
  let mut lines = vec![format!(
    "# {} @ {} ({} 条)",
    report.source,
    report.exported_at.to_rfc3339(),
    report.detection_count
  )];
  for entry in &report.detections {
    lines.push(format!(
      "{:.2}, {}, {:.4}, {}, {}",
      entry.time_in_video, entry.kind, entry.confidence, entry.danger_level, entry.description
    ));
  }
  lines.join("\n")
}

#[cfg(feature = "text_record")]
impl ReportWriter for TextRecordOutput {
  type Error = ReportError;

  fn write_report(&self, report: &Report) -> Result<PathBuf, Self::Error> {
    let path = self.target.resolve(report, "txt")?;
    std::fs::write(&path, render_text(report))?;
    info!("文本记录已写入 {}", path.display());
    Ok(path)
  }
}

pub enum ReportOutputWrapper {
  Json(JsonReportOutput),
  #[cfg(feature = "text_record")]
  Text(TextRecordOutput),
}

impl FromUrl for ReportOutputWrapper {
  type Error = ReportError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      JsonReportOutput::SCHEME => Ok(ReportOutputWrapper::Json(JsonReportOutput::from_url(url)?)),
      #[cfg(feature = "text_record")]
      TextRecordOutput::SCHEME => Ok(ReportOutputWrapper::Text(TextRecordOutput::from_url(url)?)),
      _ => Err(ReportError::SchemeMismatch),
    }
  }
}

impl ReportOutputWrapper {
  /// 是否按源生成独立文件
  pub fn per_source(&self) -> bool {
    match self {
      ReportOutputWrapper::Json(output) => output.target.directory,
      #[cfg(feature = "text_record")]
      ReportOutputWrapper::Text(output) => output.target.directory,
    }
  }
}

impl ReportWriter for ReportOutputWrapper {
  type Error = ReportError;

  fn write_report(&self, report: &Report) -> Result<PathBuf, Self::Error> {
    match self {
      ReportOutputWrapper::Json(output) => output.write_report(report),
      #[cfg(feature = "text_record")]
      ReportOutputWrapper::Text(output) => output.write_report(report),
    }
  }
}

pub fn read_report(path: &Path) -> Result<Report, ReportError> {
  let text = std::fs::read_to_string(path)?;
  Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::classify::{DescriptionPick, DetectionClassifier};
  use crate::model::{BoundingBox, RawDetection};

  fn completed_session() -> AnalysisSession {
    let classifier = DetectionClassifier::new(DescriptionPick::First);
    let mut session = AnalysisSession::new("track-a");
    let run = session.begin().unwrap();
    for (class_id, score, at) in [(0, 0.85, Some(2.0)), (28, 0.55, None)] {
      let raw = RawDetection {
        class_id,
        score,
        bbox: BoundingBox::default(),
      };
      session.record(run, classifier.classify(&raw, "track-a", at));
    }
    session.complete(run);
    session
  }

  #[test]
  fn export_has_compatible_shape() {
    let report = ReportExporter::export(&completed_session());
    let value = serde_json::to_value(&report).unwrap();

    assert_eq!(value["source"], "track-a");
    assert_eq!(value["detectionCount"], 2);
    assert!(value["exportedAt"].as_str().unwrap().contains('T'));

    let first = &value["detections"][0];
    assert_eq!(first["timeInVideo"], 2.0);
    assert_eq!(first["kind"], "person");
    assert_eq!(first["dangerLevel"], "critical");
    assert_eq!(first["description"], "Person detected on the track");

    // 没有视频时间的记录写 0
    assert_eq!(value["detections"][1]["timeInVideo"], 0.0);
    assert_eq!(value["detections"][1]["dangerLevel"], "low");
  }

  #[test]
  fn export_is_idempotent_and_read_only() {
    let session = completed_session();
    let before = session.detections().to_vec();
    let a = ReportExporter::export(&session);
    let b = ReportExporter::export(&session);
    assert_eq!(a.detections, b.detections);
    assert_eq!(a.detection_count, b.detection_count);
    assert_eq!(session.detections(), before.as_slice());
    assert_eq!(session.status(), crate::session::SessionStatus::Completed);
  }

  #[test]
  fn json_output_round_trips_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out").join("report.json");
    let url = Url::parse(&format!("json://{}", path.display())).unwrap();
    let output = ReportOutputWrapper::from_url(&url).unwrap();
    assert!(!output.per_source());

    let report = ReportExporter::export(&completed_session());
    let written = output.write_report(&report).unwrap();
    assert_eq!(written, path);
    assert_eq!(read_report(&written).unwrap(), report);
  }

  #[test]
  fn directory_output_names_files_by_source() {
    let dir = tempfile::tempdir().unwrap();
    let url = Url::parse(&format!("json://{}/", dir.path().display())).unwrap();
    let output = JsonReportOutput::from_url(&url).unwrap();

    let report = ReportExporter::export_detections("Track A/1", &[]);
    let written = output.write_report(&report).unwrap();
    let name = written.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("Track_A_1-"), "{name}");
    assert!(name.ends_with(".json"));
  }

  #[cfg(feature = "text_record")]
  #[test]
  fn text_record_lists_one_line_per_detection() {
    let report = ReportExporter::export(&completed_session());
    let text = render_text(&report);
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[1].starts_with("2.00, person, 0.8500, critical,"));
  }

  #[test]
  fn unknown_output_scheme() {
    let url = Url::parse("folder:///tmp/x").unwrap();
    assert!(matches!(
      ReportOutputWrapper::from_url(&url),
      Err(ReportError::SchemeMismatch)
    ));
  }
}

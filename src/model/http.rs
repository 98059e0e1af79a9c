// 该文件是 Tiegui （铁轨哨兵） 项目的一部分。
// src/model/http.rs - 远程检测服务
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

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl,
  frame::Frame,
  model::{InferenceAdapter, InferenceError, RawDetection},
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum HttpModelError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("HTTP 客户端错误: {0}")]
  ClientError(#[from] reqwest::Error),
}

/// 把帧以 NHWC 字节流 POST 到远程检测服务，响应为 `[{classId, score, bbox}]`
pub struct HttpModel {
  endpoint: Url,
  client: reqwest::Client,
}

impl FromUrl for HttpModel {
  type Error = HttpModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != "http" && url.scheme() != "https" {
      return Err(HttpModelError::SchemeMismatch);
    }

    let client = reqwest::Client::builder()
      .connect_timeout(CONNECT_TIMEOUT)
      .build()?;
    info!("远程检测服务: {}", url);

    Ok(Self {
      endpoint: url.clone(),
      client,
    })
  }
}

pub(crate) fn parse_detections(body: &str) -> Result<Vec<RawDetection>, InferenceError> {
  serde_json::from_str(body).map_err(|e| InferenceError::Frame(format!("响应解析失败: {}", e)))
}

#[async_trait]
impl InferenceAdapter for HttpModel {
  fn name(&self) -> &str {
    self.endpoint.as_str()
  }

  async fn health_check(&self) -> Result<(), InferenceError> {
    match self.client.get(self.endpoint.clone()).send().await {
      Ok(response) if !response.status().is_server_error() => Ok(()),
      Ok(response) => Err(InferenceError::Unavailable(format!(
        "服务状态 {}",
        response.status()
      ))),
      Err(e) => {
        warn!("远程检测服务无法连接: {}", e);
        Err(InferenceError::Unavailable(e.to_string()))
      }
    }
  }

  async fn infer(&self, frame: &Frame) -> Result<Vec<RawDetection>, InferenceError> {
    let response = self
      .client
      .post(self.endpoint.clone())
      .header("content-type", "application/octet-stream")
      .header("x-frame-width", frame.width())
      .header("x-frame-height", frame.height())
      .header("x-frame-index", frame.index())
      .body(frame.as_nhwc().to_vec())
      .send()
      .await
      .map_err(|e| InferenceError::Frame(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
      return Err(InferenceError::Frame(format!("服务状态 {}", status)));
    }

    let body = response
      .text()
      .await
      .map_err(|e| InferenceError::Frame(e.to_string()))?;
    let items = parse_detections(&body)?;
    debug!("帧 {}: 服务返回 {} 个目标", frame.index(), items.len());
    Ok(items)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_service_response() {
    let items =
      parse_detections(r#"[{"classId": 16, "score": 0.8, "bbox": [0.1, 0.2, 0.3, 0.4]}]"#).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].label(), "dog");
  }

  #[test]
  fn malformed_response_is_a_frame_failure() {
    let err = parse_detections("not json").unwrap_err();
    assert!(!err.is_fatal());
  }

  #[test]
  fn only_http_schemes() {
    let url = Url::parse("ftp://host/detect").unwrap();
    assert!(matches!(
      HttpModel::from_url(&url),
      Err(HttpModelError::SchemeMismatch)
    ));
  }
}

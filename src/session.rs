// 该文件是 Tiegui （铁轨哨兵） 项目的一部分。
// src/session.rs - 分析会话状态机
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

//! 分析会话。
//!
//! 状态迁移：
//!
//! ```text
//! ready --begin--> analyzing --complete--> completed
//!                      |  \----fail------> error
//!                      \------cancel-----> ready
//! completed / error --begin--> analyzing（先清空上一轮结果）
//! ```
//!
//! 其余迁移都是空操作。每次 `begin` 都会换一个新的轮次号，`cancel` 也会作废当前轮次，
//! 携带旧轮次号的写入会被直接丢弃，迟到的推理结果因此不会污染新一轮。
//! [`SessionHub`] 的轮次号在所有会话之间全局递增，会话被移除后重建也不会重复。

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use crate::classify::{DangerLevel, Detection, DetectionKind};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
  Ready,
  Analyzing,
  Completed,
  Error,
}

impl SessionStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(self, SessionStatus::Completed | SessionStatus::Error)
  }
}

impl fmt::Display for SessionStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let text = match self {
      SessionStatus::Ready => "ready",
      SessionStatus::Analyzing => "analyzing",
      SessionStatus::Completed => "completed",
      SessionStatus::Error => "error",
    };
    f.write_str(text)
  }
}

#[derive(Debug, Clone)]
pub struct AnalysisSession {
  id: Uuid,
  source: String,
  status: SessionStatus,
  detections: Vec<Detection>,
  progress: f64,
  error: Option<String>,
  run: u64,
  started_at: Option<DateTime<Utc>>,
  finished_at: Option<DateTime<Utc>>,
}

impl AnalysisSession {
  pub fn new(source: impl Into<String>) -> Self {
    Self {
      id: Uuid::new_v4(),
      source: source.into(),
      status: SessionStatus::Ready,
      detections: Vec::new(),
      progress: 0.0,
      error: None,
      run: 0,
      started_at: None,
      finished_at: None,
    }
  }

  pub fn id(&self) -> Uuid {
    self.id
  }

  pub fn source(&self) -> &str {
    &self.source
  }

  pub fn status(&self) -> SessionStatus {
    self.status
  }

  pub fn detections(&self) -> &[Detection] {
    &self.detections
  }

  pub fn progress(&self) -> f64 {
    self.progress
  }

  pub fn error(&self) -> Option<&str> {
    self.error.as_deref()
  }

  pub fn run(&self) -> u64 {
    self.run
  }

  pub fn started_at(&self) -> Option<DateTime<Utc>> {
    self.started_at
  }

  pub fn finished_at(&self) -> Option<DateTime<Utc>> {
    self.finished_at
  }

  /// 开始新一轮分析，返回本轮轮次号；正在分析时为空操作
  pub fn begin(&mut self) -> Option<u64> {
    let run = self.run + 1;
    self.begin_run(run).then_some(run)
  }

  /// 以外部分配的轮次号开始新一轮，轮次号必须比以往的都大
  pub fn begin_run(&mut self, run: u64) -> bool {
    if self.status == SessionStatus::Analyzing || run <= self.run {
      return false;
    }

    self.id = Uuid::new_v4();
    self.detections.clear();
    self.progress = 0.0;
    self.error = None;
    self.run = run;
    self.started_at = Some(Utc::now());
    self.finished_at = None;
    self.status = SessionStatus::Analyzing;
    true
  }

  fn accepts(&self, run: u64) -> bool {
    self.status == SessionStatus::Analyzing && self.run == run
  }

  pub fn record(&mut self, run: u64, detection: Detection) -> bool {
    if !self.accepts(run) {
      return false;
    }
    self.detections.push(detection);
    true
  }

  pub fn update_progress(&mut self, run: u64, fraction: f64) -> bool {
    if !self.accepts(run) {
      return false;
    }
    self.progress = fraction.clamp(0.0, 1.0);
    true
  }

  pub fn complete(&mut self, run: u64) -> bool {
    if !self.accepts(run) {
      return false;
    }
    self.status = SessionStatus::Completed;
    self.progress = 1.0;
    self.finished_at = Some(Utc::now());
    true
  }

  pub fn fail(&mut self, run: u64, message: impl Into<String>) -> bool {
    if !self.accepts(run) {
      return false;
    }
    self.status = SessionStatus::Error;
    self.error = Some(message.into());
    self.finished_at = Some(Utc::now());
    true
  }

  /// 手动停止：回到 ready 并清空结果，不算失败
  pub fn cancel(&mut self) -> bool {
    if self.status != SessionStatus::Analyzing {
      return false;
    }
    self.status = SessionStatus::Ready;
    self.detections.clear();
    self.progress = 0.0;
    self.run += 1;
    self.started_at = None;
    true
  }

  pub fn summary(&self) -> SessionSummary {
    SessionSummary::from_detections(&self.detections)
  }
}

/// 会话的派生统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
  pub total: usize,
  pub by_level: BTreeMap<String, usize>,
  pub by_kind: BTreeMap<String, usize>,
  pub critical_alerts: usize,
  pub highest: Option<DangerLevel>,
}

impl SessionSummary {
  pub fn from_detections<'a>(detections: impl IntoIterator<Item = &'a Detection>) -> Self {
    let mut summary = SessionSummary::default();
    for level in DangerLevel::ALL {
      summary.by_level.insert(level.to_string(), 0);
    }
    for kind in DetectionKind::ALL {
      summary.by_kind.insert(kind.to_string(), 0);
    }

    for detection in detections {
      summary.total += 1;
      *summary
        .by_level
        .entry(detection.danger_level.to_string())
        .or_default() += 1;
      *summary
        .by_kind
        .entry(detection.kind.to_string())
        .or_default() += 1;
      if detection.danger_level == DangerLevel::Critical {
        summary.critical_alerts += 1;
      }
      summary.highest = summary.highest.max(Some(detection.danger_level));
    }
    summary
  }
}

/// 推送给界面层的通知，发送即忘
#[derive(Debug, Clone)]
pub enum SessionEvent {
  Detection {
    session_id: Uuid,
    detection: Detection,
  },
  StatusChanged {
    session_id: Uuid,
    source: String,
    status: SessionStatus,
  },
  Completed {
    session_id: Uuid,
    source: String,
    detections: Vec<Detection>,
  },
}

pub type SharedSession = Arc<Mutex<AnalysisSession>>;

fn lock(session: &SharedSession) -> MutexGuard<'_, AnalysisSession> {
  session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 每个视频源一个会话；不同源的写入互不干扰
pub struct SessionHub {
  sessions: RwLock<HashMap<String, SharedSession>>,
  events: broadcast::Sender<SessionEvent>,
  last_run: AtomicU64,
}

impl Default for SessionHub {
  fn default() -> Self {
    Self::new()
  }
}

impl SessionHub {
  pub fn new() -> Self {
    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    Self {
      sessions: RwLock::new(HashMap::new()),
      events,
      last_run: AtomicU64::new(0),
    }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
    self.events.subscribe()
  }

  fn publish(&self, event: SessionEvent) {
    // 没有订阅者时发送失败，忽略即可
    let _ = self.events.send(event);
  }

  /// 取得源对应的会话，不存在则新建
  pub fn session(&self, source: &str) -> SharedSession {
    if let Some(session) = self.get(source) {
      return session;
    }
    let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
    Arc::clone(
      sessions
        .entry(source.to_string())
        .or_insert_with(|| Arc::new(Mutex::new(AnalysisSession::new(source)))),
    )
  }

  pub fn get(&self, source: &str) -> Option<SharedSession> {
    self
      .sessions
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(source)
      .cloned()
  }

  pub fn snapshot(&self, source: &str) -> Option<AnalysisSession> {
    self.get(source).map(|session| lock(&session).clone())
  }

  pub fn status(&self, source: &str) -> Option<SessionStatus> {
    self.get(source).map(|session| lock(&session).status())
  }

  /// 该源是否仍处于指定轮次的分析中
  pub fn is_current(&self, source: &str, run: u64) -> bool {
    self
      .get(source)
      .map(|session| lock(&session).accepts(run))
      .unwrap_or(false)
  }

  pub fn sources(&self) -> Vec<String> {
    let mut sources: Vec<_> = self
      .sessions
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .keys()
      .cloned()
      .collect();
    sources.sort();
    sources
  }

  /// 移除会话；正在分析的会话先作废当前轮次
  pub fn remove(&self, source: &str) -> Option<AnalysisSession> {
    let session = self
      .sessions
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(source)?;
    let mut guard = lock(&session);
    guard.cancel();
    info!("移除会话: {}", source);
    Some(guard.clone())
  }

  pub fn begin(&self, source: &str) -> Option<(Uuid, u64)> {
    let session = self.session(source);
    let (id, run) = {
      let mut guard = lock(&session);
      // cancel 会把会话内的轮次号加一，新轮次号要越过它
      let run = self.last_run.fetch_add(1, Ordering::SeqCst).max(guard.run()) + 1;
      if !guard.begin_run(run) {
        return None;
      }
      self.last_run.fetch_max(run, Ordering::SeqCst);
      (guard.id(), run)
    };
    info!("{} 开始第 {} 轮分析", source, run);
    self.publish(SessionEvent::StatusChanged {
      session_id: id,
      source: source.to_string(),
      status: SessionStatus::Analyzing,
    });
    Some((id, run))
  }

  pub fn record(&self, source: &str, run: u64, detection: Detection) -> bool {
    let Some(session) = self.get(source) else {
      return false;
    };
    let id = {
      let mut guard = lock(&session);
      if !guard.record(run, detection.clone()) {
        debug!("{} 丢弃过期结果 (轮次 {})", source, run);
        return false;
      }
      guard.id()
    };
    self.publish(SessionEvent::Detection {
      session_id: id,
      detection,
    });
    true
  }

  pub fn update_progress(&self, source: &str, run: u64, fraction: f64) -> bool {
    self
      .get(source)
      .map(|session| lock(&session).update_progress(run, fraction))
      .unwrap_or(false)
  }

  pub fn complete(&self, source: &str, run: u64) -> bool {
    let Some(session) = self.get(source) else {
      return false;
    };
    let (id, detections) = {
      let mut guard = lock(&session);
      if !guard.complete(run) {
        return false;
      }
      (guard.id(), guard.detections().to_vec())
    };
    info!("{} 分析完成，共 {} 条检测", source, detections.len());
    self.publish(SessionEvent::StatusChanged {
      session_id: id,
      source: source.to_string(),
      status: SessionStatus::Completed,
    });
    self.publish(SessionEvent::Completed {
      session_id: id,
      source: source.to_string(),
      detections,
    });
    true
  }

  pub fn fail(&self, source: &str, run: u64, message: impl Into<String>) -> bool {
    let Some(session) = self.get(source) else {
      return false;
    };
    let id = {
      let mut guard = lock(&session);
      if !guard.fail(run, message) {
        return false;
      }
      guard.id()
    };
    self.publish(SessionEvent::StatusChanged {
      session_id: id,
      source: source.to_string(),
      status: SessionStatus::Error,
    });
    true
  }

  pub fn cancel(&self, source: &str) -> bool {
    let Some(session) = self.get(source) else {
      return false;
    };
    let id = {
      let mut guard = lock(&session);
      if !guard.cancel() {
        return false;
      }
      guard.id()
    };
    info!("{} 分析已停止", source);
    self.publish(SessionEvent::StatusChanged {
      session_id: id,
      source: source.to_string(),
      status: SessionStatus::Ready,
    });
    true
  }

  /// 所有会话的检测合并成一条按抓取时间排序的信息流
  pub fn feed(&self) -> Vec<Detection> {
    let sessions: Vec<_> = self
      .sessions
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .values()
      .cloned()
      .collect();

    let mut feed: Vec<Detection> = sessions
      .iter()
      .flat_map(|session| lock(session).detections().to_vec())
      .collect();
    feed.sort_by_key(|detection| detection.captured_at);
    feed
  }

  pub fn summary(&self) -> SessionSummary {
    SessionSummary::from_detections(&self.feed())
  }
}

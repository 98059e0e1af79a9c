// 该文件是 Tiegui （铁轨哨兵） 项目的一部分。
// src/scheduler.rs - 定时抽帧调度
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

//! 定时抽帧调度器。
//!
//! 每个视频源对应一个后台任务，任务内只有一个定时器：
//!
//! - 每次定时到达时，如果上一帧的推理还没返回，本次直接跳过，不排队；
//! - 否则抓取当前帧，把录像推进一个采样周期，再异步发起推理；
//! - 推理结果按抓帧顺序写入会话，单帧失败只记日志；
//! - 后端不可用时会话进入 error，视频源结束时会话进入 completed。
//!
//! `stop` 先把会话切回 ready（轮次号随之作废），再通知任务退出，
//! 尚未返回的推理随任务一起丢弃，即便晚到也写不进会话。

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
  classify::{DangerLevel, DetectionClassifier},
  frame::Frame,
  input::VideoSource,
  model::{InferenceAdapter, InferenceError, MIN_ADAPTER_CONFIDENCE, RawDetection},
  session::{AnalysisSession, SessionHub, SessionStatus},
};

const DEFAULT_PERIOD: Duration = Duration::from_secs(2);
const DEFAULT_INFERENCE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
  /// 采样周期
  pub period: Duration,
  /// 单次推理的超时，超时按单帧失败处理
  pub inference_timeout: Duration,
  /// 适配器边界的置信度门限，构建适配器时使用
  pub confidence_floor: f32,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      period: DEFAULT_PERIOD,
      inference_timeout: DEFAULT_INFERENCE_TIMEOUT,
      confidence_floor: MIN_ADAPTER_CONFIDENCE,
    }
  }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
  #[error("采样周期必须大于 0")]
  InvalidPeriod,
  #[error("缺少视频源")]
  MissingSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
  Started { session_id: Uuid, run: u64 },
  /// 该源已经在分析中，本次调用不做任何事
  AlreadyRunning,
}

/// 一次运行的抽帧统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
  pub sampled: u64,
  pub skipped: u64,
  pub failed: u64,
}

struct RunHandle {
  run: u64,
  cancel: watch::Sender<bool>,
  /// 被 `wait` 取走后为 None，取消信号仍可送达
  task: Option<JoinHandle<TickStats>>,
}

struct TickResult {
  index: u64,
  position: Option<f64>,
  result: Result<Vec<RawDetection>, InferenceError>,
}

type InFlight = Pin<Box<dyn Future<Output = TickResult> + Send>>;

#[derive(Clone)]
struct RunContext {
  adapter: Arc<dyn InferenceAdapter>,
  classifier: Arc<DetectionClassifier>,
  hub: Arc<SessionHub>,
  inference_timeout: Duration,
}

pub struct FrameScheduler {
  ctx: RunContext,
  runs: Mutex<HashMap<String, RunHandle>>,
}

impl FrameScheduler {
  pub fn new(adapter: Arc<dyn InferenceAdapter>, hub: Arc<SessionHub>) -> Self {
    Self::with_config(adapter, hub, &SchedulerConfig::default())
  }

  pub fn with_config(
    adapter: Arc<dyn InferenceAdapter>,
    hub: Arc<SessionHub>,
    config: &SchedulerConfig,
  ) -> Self {
    Self {
      ctx: RunContext {
        adapter,
        classifier: Arc::new(DetectionClassifier::default()),
        hub,
        inference_timeout: config.inference_timeout,
      },
      runs: Mutex::new(HashMap::new()),
    }
  }

  pub fn with_classifier(mut self, classifier: DetectionClassifier) -> Self {
    self.ctx.classifier = Arc::new(classifier);
    self
  }

  pub fn hub(&self) -> &Arc<SessionHub> {
    &self.ctx.hub
  }

  /// 开始对视频源抽帧，需要在 tokio 运行时内调用
  pub fn start<S>(&self, source: S, period: Duration) -> Result<StartOutcome, SchedulerError>
  where
    S: VideoSource + 'static,
  {
    if period.is_zero() {
      return Err(SchedulerError::InvalidPeriod);
    }
    let name = source.name().to_string();
    if name.is_empty() {
      return Err(SchedulerError::MissingSource);
    }

    let Some((session_id, run)) = self.ctx.hub.begin(&name) else {
      debug!("{} 已在分析中，忽略重复启动", name);
      return Ok(StartOutcome::AlreadyRunning);
    };

    info!(
      "启动抽帧: {} 周期 {:?}, 时长 {:?}",
      name,
      period,
      source.duration()
    );
    let (cancel, cancel_rx) = watch::channel(false);
    let task = tokio::spawn(run_loop(
      self.ctx.clone(),
      Box::new(source),
      period,
      run,
      cancel_rx,
    ));

    let previous = self
      .runs
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(
        name,
        RunHandle {
          run,
          cancel,
          task: Some(task),
        },
      );
    if let Some(previous) = previous {
      // 上一轮的任务若还在，直接中止
      let _ = previous.cancel.send(true);
      if let Some(task) = previous.task {
        task.abort();
      }
    }

    Ok(StartOutcome::Started { session_id, run })
  }

  /// 手动停止：会话回到 ready，未返回的推理结果作废
  pub fn stop(&self, source: &str) -> bool {
    let cancelled = self.ctx.hub.cancel(source);
    let handle = self
      .runs
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(source);
    if let Some(handle) = handle {
      debug!("通知 {} 的第 {} 轮抽帧退出", source, handle.run);
      let _ = handle.cancel.send(true);
    }
    cancelled
  }

  /// 移除会话，同时让该源的抽帧任务退出
  pub fn remove(&self, source: &str) -> Option<AnalysisSession> {
    let removed = self.ctx.hub.remove(source);
    let handle = self
      .runs
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(source);
    if let Some(handle) = handle {
      debug!("{} 已移除，通知第 {} 轮抽帧退出", source, handle.run);
      let _ = handle.cancel.send(true);
    }
    removed
  }

  pub fn stop_all(&self) -> usize {
    self
      .ctx
      .hub
      .sources()
      .iter()
      .filter(|source| self.stop(source))
      .count()
  }

  pub fn is_running(&self, source: &str) -> bool {
    self
      .runs
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .get(source)
      .is_some_and(|handle| handle.task.as_ref().is_none_or(|task| !task.is_finished()))
  }

  /// 等待该源的抽帧任务结束，返回最终状态和统计
  pub async fn wait(&self, source: &str) -> Option<(SessionStatus, TickStats)> {
    let (run, task) = {
      let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
      let handle = runs.get_mut(source)?;
      (handle.run, handle.task.take()?)
    };
    let stats = match task.await {
      Ok(stats) => stats,
      Err(e) => {
        warn!("{} 的抽帧任务异常结束: {}", source, e);
        TickStats::default()
      }
    };

    let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
    if runs.get(source).is_some_and(|handle| handle.run == run) {
      runs.remove(source);
    }
    drop(runs);

    let status = self.ctx.hub.status(source)?;
    Some((status, stats))
  }
}

async fn infer_frame(
  adapter: Arc<dyn InferenceAdapter>,
  frame: Frame,
  limit: Duration,
) -> TickResult {
  let result = match tokio::time::timeout(limit, adapter.infer(&frame)).await {
    Ok(result) => result,
    Err(_) => Err(InferenceError::Timeout(limit)),
  };
  TickResult {
    index: frame.index(),
    position: frame.position(),
    result,
  }
}

enum Applied {
  Continue,
  Fatal,
  Stale,
}

fn apply_result(
  ctx: &RunContext,
  name: &str,
  run: u64,
  tick: TickResult,
  stats: &mut TickStats,
) -> Applied {
  match tick.result {
    Ok(items) => {
      debug!("{} 帧 {}: {} 个目标", name, tick.index, items.len());
      for raw in items {
        let detection = ctx.classifier.classify(&raw, name, tick.position);
        if detection.danger_level >= DangerLevel::High {
          info!(
            "{} 帧 {}: {} ({:.2}) 危险等级 {}",
            name, tick.index, detection.kind, detection.confidence, detection.danger_level
          );
        }
        if !ctx.hub.record(name, run, detection) {
          return Applied::Stale;
        }
      }
      Applied::Continue
    }
    Err(e) if e.is_fatal() => {
      error!("{} 推理后端不可用: {}", name, e);
      ctx.hub.fail(name, run, e.to_string());
      Applied::Fatal
    }
    Err(e) => {
      stats.failed += 1;
      warn!("{} 帧 {} 推理失败，跳过: {}", name, tick.index, e);
      Applied::Continue
    }
  }
}

async fn run_loop(
  ctx: RunContext,
  mut source: Box<dyn VideoSource>,
  period: Duration,
  run: u64,
  mut cancel: watch::Receiver<bool>,
) -> TickStats {
  let name = source.name().to_string();
  let mut stats = TickStats::default();

  let health = tokio::select! {
    biased;
    Ok(()) = cancel.changed() => return stats,
    health = tokio::time::timeout(ctx.inference_timeout, ctx.adapter.health_check()) => health,
  };
  let health = match health {
    Ok(result) => result,
    Err(_) => Err(InferenceError::Unavailable(format!(
      "健康检查超时 {:?}",
      ctx.inference_timeout
    ))),
  };
  if let Err(e) = health {
    error!("{} 推理后端 {} 不可用: {}", name, ctx.adapter.name(), e);
    ctx.hub.fail(&name, run, e.to_string());
    return stats;
  }

  let mut ticker = tokio::time::interval(period);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
  let mut in_flight: Option<InFlight> = None;

  loop {
    tokio::select! {
      biased;

      // 发送端被丢弃时该分支不匹配，只剩会话轮次检查
      Ok(()) = cancel.changed() => {
        if *cancel.borrow() {
          info!("{} 抽帧已取消", name);
          break;
        }
      }

      tick = async {
        match in_flight.as_mut() {
          Some(pending) => pending.await,
          None => std::future::pending().await,
        }
      }, if in_flight.is_some() => {
        in_flight = None;
        match apply_result(&ctx, &name, run, tick, &mut stats) {
          Applied::Continue => {}
          Applied::Fatal => break,
          Applied::Stale => {
            debug!("{} 第 {} 轮已作废，退出", name, run);
            break;
          }
        }
        if source.has_ended() {
          ctx.hub.complete(&name, run);
          break;
        }
      }

      _ = ticker.tick() => {
        if !ctx.hub.is_current(&name, run) {
          debug!("{} 第 {} 轮已不在分析中，退出", name, run);
          break;
        }
        if in_flight.is_some() {
          stats.skipped += 1;
          debug!("{} 上一帧推理未返回，跳过本次采样", name);
          continue;
        }
        if source.has_ended() {
          ctx.hub.complete(&name, run);
          break;
        }

        // 抓帧失败也要推进，否则录像永远到不了结尾
        let captured = source.capture();
        source.advance(period.as_secs_f64());
        ctx.hub.update_progress(&name, run, source.progress());
        let frame = match captured {
          Ok(frame) => frame,
          Err(e) => {
            stats.failed += 1;
            warn!("{} 抓帧失败: {}", name, e);
            if source.has_ended() {
              ctx.hub.complete(&name, run);
              break;
            }
            continue;
          }
        };
        stats.sampled += 1;

        in_flight = Some(Box::pin(infer_frame(
          Arc::clone(&ctx.adapter),
          frame,
          ctx.inference_timeout,
        )));
      }
    }
  }

  info!(
    "{} 抽帧结束: 采样 {} 次, 跳过 {} 次, 失败 {} 次",
    name, stats.sampled, stats.skipped, stats.failed
  );
  stats
}

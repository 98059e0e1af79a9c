// 该文件是 Tiegui （铁轨哨兵） 项目的一部分。
// src/task.rs - 单帧与连续分析任务
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

use std::{
  sync::Arc,
  thread,
  time::{Duration, Instant},
};

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::{
  classify::{DangerLevel, DetectionClassifier},
  frame::Frame,
  input::{InputError, SourceKind, VideoSource},
  model::{InferenceAdapter, InferenceError},
  report::{ReportExporter, ReportWriter},
  scheduler::{FrameScheduler, SchedulerConfig, StartOutcome},
  session::{SessionEvent, SessionHub, SessionStatus},
};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 抓取一帧，推理、分级后直接导出报告
#[derive(Debug, Clone)]
pub struct OneShotTask {
  classifier: DetectionClassifier,
  timeout: Duration,
}

impl Default for OneShotTask {
  fn default() -> Self {
    Self {
      classifier: DetectionClassifier::default(),
      timeout: SchedulerConfig::default().inference_timeout,
    }
  }
}

impl OneShotTask {
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn with_classifier(mut self, classifier: DetectionClassifier) -> Self {
    self.classifier = classifier;
    self
  }
}

impl<S, M, O, RE> Task<S, M, O> for OneShotTask
where
  S: VideoSource,
  M: InferenceAdapter,
  O: ReportWriter<Error = RE>,
  RE: std::error::Error + Sync + Send + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: S, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let runtime = tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()?;

    let frame = input.capture()?;
    info!("输入帧获取成功，开始推理...");
    let now = Instant::now();
    let items = runtime.block_on(async {
      model.health_check().await?;
      match tokio::time::timeout(self.timeout, model.infer(&frame)).await {
        Ok(result) => result,
        Err(_) => Err(InferenceError::Timeout(self.timeout)),
      }
    })?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());

    let detections: Vec<_> = items
      .iter()
      .map(|raw| self.classifier.classify(raw, input.name(), frame.position()))
      .collect();
    for detection in &detections {
      info!(
        "{} ({:.2}) 危险等级 {}: {}",
        detection.kind, detection.confidence, detection.danger_level, detection.description
      );
    }

    let report = ReportExporter::export_detections(input.name(), &detections);
    let path = output.write_report(&report)?;
    info!("报告输出完成: {}", path.display());

    Ok(())
  }
}

/// 在录像上限定抓帧次数，用完即视为结束
struct FrameLimit {
  inner: Box<dyn VideoSource>,
  remaining: u64,
}

impl VideoSource for FrameLimit {
  fn name(&self) -> &str {
    self.inner.name()
  }

  fn kind(&self) -> SourceKind {
    self.inner.kind()
  }

  fn current_position(&self) -> f64 {
    self.inner.current_position()
  }

  fn duration(&self) -> Option<f64> {
    self.inner.duration()
  }

  fn has_ended(&self) -> bool {
    self.remaining == 0 || self.inner.has_ended()
  }

  fn advance(&mut self, seconds: f64) {
    self.inner.advance(seconds)
  }

  fn capture(&mut self) -> Result<Frame, InputError> {
    let frame = self.inner.capture()?;
    self.remaining = self.remaining.saturating_sub(1);
    Ok(frame)
  }
}

/// 对一个或多个视频源按周期抽帧，直到全部结束或收到中断信号
#[derive(Debug, Clone, Default)]
pub struct ContinuousTask {
  config: SchedulerConfig,
  classifier: DetectionClassifier,
  frame_number: Option<u64>,
}

impl ContinuousTask {
  pub fn with_config(mut self, config: SchedulerConfig) -> Self {
    self.config = config;
    self
  }

  pub fn with_classifier(mut self, classifier: DetectionClassifier) -> Self {
    self.classifier = classifier;
    self
  }

  /// 每个源最多抓取的帧数
  pub fn with_frame_number(mut self, frame_number: Option<u64>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

fn log_events(hub: &SessionHub) -> tokio::task::JoinHandle<()> {
  let mut events = hub.subscribe();
  tokio::spawn(async move {
    loop {
      match events.recv().await {
        Ok(SessionEvent::Detection { detection, .. })
          if detection.danger_level == DangerLevel::Critical =>
        {
          warn!(
            "紧急告警 [{}] {}: {}",
            detection.location, detection.kind, detection.description
          );
        }
        Ok(SessionEvent::Detection { .. }) => {}
        Ok(SessionEvent::StatusChanged { source, status, .. }) => {
          info!("{} 状态变为 {}", source, status);
        }
        Ok(SessionEvent::Completed {
          source, detections, ..
        }) => {
          info!("{} 分析完成，共 {} 条检测", source, detections.len());
        }
        Err(RecvError::Lagged(n)) => {
          warn!("事件处理过慢，丢失 {} 条事件", n);
        }
        Err(RecvError::Closed) => break,
      }
    }
  })
}

impl<O, RE> Task<Vec<Box<dyn VideoSource>>, Arc<dyn InferenceAdapter>, O> for ContinuousTask
where
  O: ReportWriter<Error = RE>,
  RE: std::error::Error + Sync + Send + 'static,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    input: Vec<Box<dyn VideoSource>>,
    model: Arc<dyn InferenceAdapter>,
    output: O,
  ) -> Result<(), Self::Error> {
    info!("开始任务...");
    if input.is_empty() {
      anyhow::bail!("没有输入视频源");
    }

    let hub = Arc::new(SessionHub::new());
    let scheduler = Arc::new(
      FrameScheduler::with_config(model, Arc::clone(&hub), &self.config)
        .with_classifier(self.classifier.clone()),
    );

    let stopper = Arc::clone(&scheduler);
    // 同一进程只能注册一次，重复运行任务时沿用已有的处理
    if let Err(e) = ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let stopped = stopper.stop_all();
      debug!("已停止 {} 个分析会话", stopped);
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    }) {
      warn!("无法注册中断处理: {}", e);
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let reports = runtime.block_on(async {
      let watcher = log_events(&hub);

      let mut names = Vec::with_capacity(input.len());
      for source in input {
        let name = source.name().to_string();
        let outcome = match self.frame_number {
          Some(n) => scheduler.start(
            FrameLimit {
              inner: source,
              remaining: n,
            },
            self.config.period,
          )?,
          None => scheduler.start(source, self.config.period)?,
        };
        match outcome {
          StartOutcome::Started { session_id, .. } => {
            info!("{} 会话 {} 已启动", name, session_id);
            names.push(name);
          }
          StartOutcome::AlreadyRunning => warn!("重复的视频源 {}，忽略", name),
        }
      }

      let mut reports = Vec::new();
      for name in &names {
        let Some((status, stats)) = scheduler.wait(name).await else {
          continue;
        };
        debug!("{} 统计: {:?}", name, stats);
        match status {
          SessionStatus::Completed => {
            if let Some(session) = hub.snapshot(name) {
              reports.push(ReportExporter::export(&session));
            }
          }
          SessionStatus::Error => {
            let message = hub
              .snapshot(name)
              .and_then(|session| session.error().map(str::to_string))
              .unwrap_or_default();
            warn!("{} 分析失败，不导出报告: {}", name, message);
          }
          status => info!("{} 已停止（{}），不导出报告", name, status),
        }
      }

      let summary = hub.summary();
      info!(
        "全部会话结束: 共 {} 条检测, 紧急告警 {} 条, 最高等级 {}",
        summary.total,
        summary.critical_alerts,
        summary
          .highest
          .map(|level| level.to_string())
          .unwrap_or_else(|| "无".to_string())
      );
      watcher.abort();
      Ok::<_, anyhow::Error>(reports)
    })?;

    for report in &reports {
      output.write_report(report)?;
    }

    info!("任务完成，退出");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::FromUrl;
  use crate::input::{InputWrapper, RecordingSource};
  use crate::model::{BoundingBox, RawDetection, ScriptedModel};
  use crate::report::{Report, ReportError};
  use async_trait::async_trait;
  use std::path::PathBuf;
  use std::sync::Mutex;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use url::Url;

  #[derive(Default)]
  struct Collect(Mutex<Vec<Report>>);

  impl ReportWriter for &Collect {
    type Error = ReportError;

    fn write_report(&self, report: &Report) -> Result<PathBuf, Self::Error> {
      self.0.lock().unwrap().push(report.clone());
      Ok(PathBuf::from("memory"))
    }
  }

  fn scripted(json: &str) -> ScriptedModel {
    ScriptedModel::new(serde_json::from_str(json).unwrap())
  }

  #[test]
  fn one_shot_reports_first_frame() {
    let source = RecordingSource::new("track-a", 10.0).unwrap();
    let model = scripted(r#"[[{"classId": 0, "score": 0.9}, {"classId": 2, "score": 0.7}]]"#);
    let sink = Collect::default();

    OneShotTask::default()
      .run_task(source, model, &sink)
      .unwrap();

    let reports = sink.0.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].source, "track-a");
    assert_eq!(reports[0].detection_count, 2);
    assert_eq!(reports[0].detections[0].danger_level, DangerLevel::Critical);
    assert_eq!(reports[0].detections[0].time_in_video, 0.0);
  }

  #[test]
  fn one_shot_fails_when_backend_is_down() {
    let source = RecordingSource::new("track-a", 10.0).unwrap();
    let model = scripted(r#"["unavailable"]"#);
    let sink = Collect::default();

    assert!(OneShotTask::default().run_task(source, model, &sink).is_err());
    assert!(sink.0.lock().unwrap().is_empty());
  }

  /// 第二次健康检查起后端不可用
  struct FlakyBackend {
    checks: AtomicUsize,
  }

  #[async_trait]
  impl InferenceAdapter for FlakyBackend {
    fn name(&self) -> &str {
      "flaky"
    }

    async fn health_check(&self) -> Result<(), InferenceError> {
      if self.checks.fetch_add(1, Ordering::SeqCst) == 0 {
        Ok(())
      } else {
        Err(InferenceError::Unavailable("后端离线".to_string()))
      }
    }

    async fn infer(&self, _frame: &Frame) -> Result<Vec<RawDetection>, InferenceError> {
      Ok(vec![RawDetection {
        class_id: 0,
        score: 0.9,
        bbox: BoundingBox::default(),
      }])
    }
  }

  fn fast_task() -> ContinuousTask {
    ContinuousTask::default().with_config(SchedulerConfig {
      period: Duration::from_millis(10),
      ..SchedulerConfig::default()
    })
  }

  fn sim(url: &str) -> Box<dyn VideoSource> {
    InputWrapper::from_url(&Url::parse(url).unwrap())
      .unwrap()
      .into_boxed()
  }

  #[test]
  fn continuous_reports_only_completed_sessions() {
    let model: Arc<dyn InferenceAdapter> = Arc::new(FlakyBackend {
      checks: AtomicUsize::new(0),
    });
    let sink = Collect::default();
    let sources = vec![
      sim("sim://track-a?duration=0.05"),
      sim("sim://track-b?duration=0.05"),
    ];

    fast_task().run_task(sources, model, &sink).unwrap();

    let reports = sink.0.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert!(["track-a", "track-b"].contains(&reports[0].source.as_str()));
    assert_eq!(reports[0].detection_count, 5);
  }

  #[test]
  fn continuous_scripted_outage_writes_no_report() {
    let model: Arc<dyn InferenceAdapter> = Arc::new(scripted(r#"["unavailable"]"#));
    let sink = Collect::default();

    fast_task()
      .run_task(vec![sim("sim://track-a?duration=0.05")], model, &sink)
      .unwrap();

    assert!(sink.0.lock().unwrap().is_empty());
  }

  #[test]
  fn continuous_frame_number_ends_run_early() {
    let model: Arc<dyn InferenceAdapter> = Arc::new(scripted(r#"[]"#));
    let sink = Collect::default();

    fast_task()
      .with_frame_number(Some(3))
      .run_task(vec![sim("sim://track-a?duration=100")], model, &sink)
      .unwrap();

    let reports = sink.0.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].source, "track-a");
    assert_eq!(reports[0].detection_count, 0);
  }

  #[test]
  fn continuous_rejects_empty_input() {
    let model: Arc<dyn InferenceAdapter> = Arc::new(scripted(r#"[]"#));
    let sink = Collect::default();
    assert!(fast_task().run_task(Vec::new(), model, &sink).is_err());
    assert!(sink.0.lock().unwrap().is_empty());
  }

  #[test]
  fn frame_limit_ends_source_early() {
    let mut limited = FrameLimit {
      inner: Box::new(RecordingSource::new("track-a", 10.0).unwrap()),
      remaining: 2,
    };
    assert!(!limited.has_ended());
    limited.capture().unwrap();
    limited.advance(2.0);
    limited.capture().unwrap();
    assert!(limited.has_ended());
    assert_eq!(limited.current_position(), 2.0);
  }
}

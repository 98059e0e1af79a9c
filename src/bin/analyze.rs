// 该文件是 Tiegui （铁轨哨兵） 项目的一部分。
// src/bin/analyze.rs - 多路视频定时抽帧分析
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use tiegui::{
  FromUrl,
  classify::{DescriptionPick, DetectionClassifier},
  input::{InputWrapper, VideoSource},
  model::{MIN_ADAPTER_CONFIDENCE, ModelWrapper},
  report::ReportOutputWrapper,
  scheduler::SchedulerConfig,
  task::{ContinuousTask, Task},
};
use tracing::{info, warn};

/// Tiegui 连续分析参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 推理后端（mock://、script:///、http(s)://）
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源（sim://、live://），可重复指定
  #[arg(long, value_name = "SOURCE", required = true)]
  pub input: Vec<Url>,
  /// 报告输出（json:///、text:///），多路输入时请以 `/` 结尾指定目录
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  /// 采样周期（毫秒）
  #[arg(long, default_value_t = 2000, value_name = "MILLIS")]
  pub period_ms: u64,
  /// 单帧推理超时（毫秒）
  #[arg(long, default_value_t = 10000, value_name = "MILLIS")]
  pub timeout_ms: u64,
  /// 适配器置信度门限 (0.0 - 1.0)
  #[arg(long, default_value_t = MIN_ADAPTER_CONFIDENCE, value_name = "THRESHOLD")]
  pub confidence: f32,
  /// 每路最多抓取的帧数
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<u64>,
  /// 总是使用每类的第一条描述
  #[arg(long)]
  pub fixed_description: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("推理后端: {}", args.model);
  for input in &args.input {
    info!("输入来源: {}", input);
  }
  info!("输出路径: {}", args.output);

  let config = SchedulerConfig {
    period: Duration::from_millis(args.period_ms),
    inference_timeout: Duration::from_millis(args.timeout_ms),
    confidence_floor: args.confidence,
  };

  let sources = args
    .input
    .iter()
    .map(|url| InputWrapper::from_url(url).map(InputWrapper::into_boxed))
    .collect::<Result<Vec<Box<dyn VideoSource>>, _>>()?;
  let model = ModelWrapper::from_url(&args.model)?.into_gated(config.confidence_floor);
  let output = ReportOutputWrapper::from_url(&args.output)?;
  if sources.len() > 1 && !output.per_source() {
    warn!("多路输入写入同一个文件，后写入的报告会覆盖之前的报告");
  }

  let pick = if args.fixed_description {
    DescriptionPick::First
  } else {
    DescriptionPick::Random
  };

  ContinuousTask::default()
    .with_config(config)
    .with_classifier(DetectionClassifier::new(pick))
    .with_frame_number(args.frame_number)
    .run_task(sources, model, output)?;

  Ok(())
}

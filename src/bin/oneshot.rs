// 该文件是 Tiegui （铁轨哨兵） 项目的一部分。
// src/bin/oneshot.rs - 单帧推理分析
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
  input::InputWrapper,
  model::ModelWrapper,
  report::ReportOutputWrapper,
  task::{OneShotTask, Task},
};
use tracing::info;

/// Tiegui 单帧分析参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 推理后端
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 报告输出
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 推理超时（毫秒）
  #[arg(long, default_value_t = 10000, value_name = "MILLIS")]
  pub timeout_ms: u64,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("推理后端: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let input = InputWrapper::from_url(&args.input)?.into_boxed();
  let model = ModelWrapper::from_url(&args.model)?.into_shared();
  let output = ReportOutputWrapper::from_url(&args.output)?;

  OneShotTask::default()
    .with_timeout(Duration::from_millis(args.timeout_ms))
    .run_task(input, model, output)?;

  Ok(())
}

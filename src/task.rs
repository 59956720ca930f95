// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task.rs - 主动学习任务
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

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::Receiver;

use anyhow::Context;
use chrono::Utc;
use rand::{SeedableRng, rngs::StdRng};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
  collaborator::Collaborator,
  config::LoopConfig,
  oracle::OracleIndex,
  output::ManifestOutput,
  round::{RoundInputs, RoundMachine, RoundReport, RoundRunner},
  sampler::SamplerRegistry,
};

pub trait Task<I, C, O>: Sized {
  type Error;
  fn run_task(self, input: I, collaborator: C, output: O) -> Result<(), Self::Error>;
}

pub fn make_rng(seed: Option<u64>) -> StdRng {
  match seed {
    Some(seed) => {
      info!("随机种子: {}", seed);
      StdRng::seed_from_u64(seed)
    }
    None => StdRng::from_os_rng(),
  }
}

fn build_runner(
  config: &LoopConfig,
  registry: &SamplerRegistry,
) -> anyhow::Result<RoundRunner> {
  let oracle = Arc::new(
    OracleIndex::from_path(&config.oracle_path)
      .with_context(|| format!("无法加载 Oracle: {}", config.oracle_path.display()))?,
  );
  let dcus = registry
    .build(&config.uncertainty_sampler, oracle.clone())?
    .into_dcus()?;
  let diversity = registry
    .build(&config.diversity_sampler, oracle)?
    .into_diversity()?;
  Ok(RoundRunner::new(dcus, diversity))
}

/// 只运行一轮完整采集
pub struct OneRoundTask {
  runner: RoundRunner,
  rng: StdRng,
}

impl OneRoundTask {
  pub fn new(runner: RoundRunner, rng: StdRng) -> Self {
    OneRoundTask { runner, rng }
  }

  pub fn from_config(config: &LoopConfig, registry: &SamplerRegistry) -> anyhow::Result<Self> {
    Ok(Self::new(build_runner(config, registry)?, make_rng(config.seed)))
  }

  pub fn with_round(mut self, round: u32) -> Self {
    self.runner = self.runner.with_machine(RoundMachine::starting_at(round));
    self
  }
}

impl<C> Task<RoundInputs, &mut C, &ManifestOutput> for OneRoundTask
where
  C: Collaborator,
  C::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(
    mut self,
    input: RoundInputs,
    collaborator: &mut C,
    output: &ManifestOutput,
  ) -> Result<(), Self::Error> {
    info!("开始任务...");
    let now = std::time::Instant::now();
    let report = self
      .runner
      .run_round(collaborator, &input, output, &mut self.rng)?;
    info!(
      "第 {} 轮完成，新增标注 {} 张，耗时: {:.2?}",
      report.round,
      report.sampled.len(),
      now.elapsed()
    );
    Ok(())
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
  pub started_at: String,
  pub finished_at: String,
  pub interrupted: bool,
  pub error: Option<String>,
  pub rounds: Vec<RoundReport>,
}

impl RunSummary {
  pub fn to_path(&self, path: &Path) -> anyhow::Result<()> {
    let file =
      File::create(path).with_context(|| format!("无法创建运行摘要: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, self)?;
    writer.flush()?;
    Ok(())
  }
}

/// 连续运行 `round_num` 轮，每轮的输出作为下一轮的输入
pub struct LoopTask {
  runner: RoundRunner,
  rng: StdRng,
  round_num: u32,
  interrupt: Option<Receiver<()>>,
}

impl LoopTask {
  pub fn new(runner: RoundRunner, rng: StdRng, round_num: u32) -> Self {
    LoopTask {
      runner,
      rng,
      round_num,
      interrupt: None,
    }
  }

  pub fn from_config(config: &LoopConfig, registry: &SamplerRegistry) -> anyhow::Result<Self> {
    Ok(Self::new(
      build_runner(config, registry)?,
      make_rng(config.seed),
      config.round_num,
    ))
  }

  /// 在两轮之间检查 Ctrl-C，收到后停止循环
  pub fn with_ctrlc(mut self) -> anyhow::Result<Self> {
    let (tx, rx) = std::sync::mpsc::channel();
    ctrlc::set_handler(move || {
      info!("收到中断信号，当前轮结束后退出...");
      let _ = tx.send(());
    })
    .context("无法设置 Ctrl-C 处理器")?;
    self.interrupt = Some(rx);
    Ok(self)
  }

  pub fn with_interrupt(mut self, rx: Receiver<()>) -> Self {
    self.interrupt = Some(rx);
    self
  }

  fn interrupted(&self) -> bool {
    self
      .interrupt
      .as_ref()
      .map(|rx| rx.try_recv().is_ok())
      .unwrap_or(false)
  }
}

impl<C> Task<RoundInputs, &mut C, &Path> for LoopTask
where
  C: Collaborator,
  C::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(
    mut self,
    input: RoundInputs,
    collaborator: &mut C,
    output_dir: &Path,
  ) -> Result<(), Self::Error> {
    info!("开始任务，共 {} 轮...", self.round_num);
    std::fs::create_dir_all(output_dir)
      .with_context(|| format!("无法创建输出目录: {}", output_dir.display()))?;
    let started_at = Utc::now();
    let mut rounds = Vec::with_capacity(self.round_num as usize);
    let mut interrupted = false;
    let mut failure = None;
    let mut inputs = input;

    let first = self.runner.round();
    for round in first..first + self.round_num {
      if self.interrupted() {
        warn!("中断信号接收，第 {} 轮未开始，退出任务循环", round);
        interrupted = true;
        break;
      }
      let work_dir: PathBuf = output_dir.join(format!("round{}", round));
      let output = ManifestOutput::in_dir(&work_dir);
      inputs.work_dir = work_dir;

      match self
        .runner
        .run_round(collaborator, &inputs, &output, &mut self.rng)
      {
        Ok(report) => {
          inputs = RoundInputs {
            labeled: report.labeled_path.clone(),
            unlabeled: report.unlabeled_path.clone(),
            checkpoint: Some(report.checkpoint.clone()),
            work_dir: inputs.work_dir,
          };
          rounds.push(report);
        }
        Err(e) => {
          error!("第 {} 轮失败: {}", round, e);
          failure = Some(e);
          break;
        }
      }
    }

    let summary = RunSummary {
      started_at: started_at.to_rfc3339(),
      finished_at: Utc::now().to_rfc3339(),
      interrupted,
      error: failure.as_ref().map(|e| e.to_string()),
      rounds,
    };
    let summary_path = output_dir.join("summary.json");
    let written = summary.to_path(&summary_path);
    match &written {
      Ok(()) => info!("运行摘要: {}", summary_path.display()),
      Err(e) => error!("无法写出运行摘要 {}: {:#}", summary_path.display(), e),
    }

    match failure {
      Some(e) => Err(e.into()),
      None => {
        written?;
        info!("任务完成，退出");
        Ok(())
      }
    }
  }
}

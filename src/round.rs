// 该文件是 Shanan （山南西风） 项目的一部分。
// src/round.rs - 采集轮次状态机
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

//! 一轮采集：训练 → 不确定度推理 → DCUS → 不确定度池距离推理 → 多样性 → 输出清单。
//!
//! 最终清单在最后一步才写出，此前任何失败都不会改动已有的清单文件。
//! 工作目录中的中间文件（检查点、推理结果、不确定度池清单）不受此约束。

use std::path::{Path, PathBuf};

use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  FromUrl,
  coco::{CocoManifest, ImageId, ManifestError},
  collaborator::{Collaborator, StepContext},
  input::{DistanceError, DistanceInput},
  model::{DetectResult, DetectionError},
  output::{Annotate, ManifestOutput, ManifestPair, OutputError},
  sampler::{DcusSampler, DiversitySampler, SamplerError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
  Idle,
  DcusScoring,
  DcusSelect,
  DiversityCluster,
  DiversitySelect,
  ManifestEmit,
}

impl RoundState {
  fn next(self) -> RoundState {
    match self {
      RoundState::Idle => RoundState::DcusScoring,
      RoundState::DcusScoring => RoundState::DcusSelect,
      RoundState::DcusSelect => RoundState::DiversityCluster,
      RoundState::DiversityCluster => RoundState::DiversitySelect,
      RoundState::DiversitySelect => RoundState::ManifestEmit,
      RoundState::ManifestEmit => RoundState::Idle,
    }
  }
}

#[derive(Error, Debug)]
pub enum RoundError {
  #[error("轮次状态不能从 {from:?} 转到 {to:?}")]
  OutOfOrder { from: RoundState, to: RoundState },
  #[error("外部步骤失败: {0}")]
  Collaborator(Box<dyn std::error::Error + Send + Sync>),
  #[error(transparent)]
  Sampler(#[from] SamplerError),
  #[error(transparent)]
  Detection(#[from] DetectionError),
  #[error(transparent)]
  Distance(#[from] DistanceError),
  #[error(transparent)]
  Manifest(#[from] ManifestError),
  #[error(transparent)]
  Output(#[from] OutputError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundMachine {
  state: RoundState,
  round: u32,
}

impl Default for RoundMachine {
  fn default() -> Self {
    RoundMachine {
      state: RoundState::Idle,
      round: 1,
    }
  }
}

impl RoundMachine {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn starting_at(round: u32) -> Self {
    RoundMachine {
      state: RoundState::Idle,
      round,
    }
  }

  pub fn state(&self) -> RoundState {
    self.state
  }

  /// 当前（或即将开始的）轮次
  pub fn round(&self) -> u32 {
    self.round
  }

  /// 只允许按固定顺序前进，`ManifestEmit → Idle` 时轮次加一
  pub fn advance(&mut self, to: RoundState) -> Result<(), RoundError> {
    if self.state.next() != to {
      return Err(RoundError::OutOfOrder {
        from: self.state,
        to,
      });
    }
    if self.state == RoundState::ManifestEmit {
      self.round += 1;
    }
    self.state = to;
    Ok(())
  }

  /// 本轮失败后回到 `Idle`，轮次不变
  pub fn abort(&mut self) {
    if self.state != RoundState::Idle {
      warn!("第 {} 轮在 {:?} 阶段中止", self.round, self.state);
    }
    self.state = RoundState::Idle;
  }
}

/// 一轮的输入文件
#[derive(Debug, Clone)]
pub struct RoundInputs {
  pub labeled: PathBuf,
  pub unlabeled: PathBuf,
  pub checkpoint: Option<PathBuf>,
  pub work_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundReport {
  pub round: u32,
  pub checkpoint: PathBuf,
  pub uncertainty_pool: usize,
  pub sampled: Vec<ImageId>,
  pub labeled: usize,
  pub unlabeled: usize,
  pub labeled_path: PathBuf,
  pub unlabeled_path: PathBuf,
}

fn collaborator_error<E>(e: E) -> RoundError
where
  E: std::error::Error + Send + Sync + 'static,
{
  RoundError::Collaborator(Box::new(e))
}

pub struct RoundRunner {
  machine: RoundMachine,
  dcus: DcusSampler,
  diversity: DiversitySampler,
}

impl RoundRunner {
  pub fn new(dcus: DcusSampler, diversity: DiversitySampler) -> Self {
    RoundRunner {
      machine: RoundMachine::new(),
      dcus,
      diversity,
    }
  }

  pub fn with_machine(mut self, machine: RoundMachine) -> Self {
    self.machine = machine;
    self
  }

  pub fn machine(&self) -> &RoundMachine {
    &self.machine
  }

  pub fn round(&self) -> u32 {
    self.machine.round()
  }

  pub fn run_round<C, R>(
    &mut self,
    collaborator: &mut C,
    inputs: &RoundInputs,
    output: &ManifestOutput,
    rng: &mut R,
  ) -> Result<RoundReport, RoundError>
  where
    C: Collaborator,
    C::Error: std::error::Error + Send + Sync + 'static,
    R: Rng + ?Sized,
  {
    let result = self.run_steps(collaborator, inputs, output, rng);
    if result.is_err() {
      self.machine.abort();
    }
    result
  }

  fn run_steps<C, R>(
    &mut self,
    collaborator: &mut C,
    inputs: &RoundInputs,
    output: &ManifestOutput,
    rng: &mut R,
  ) -> Result<RoundReport, RoundError>
  where
    C: Collaborator,
    C::Error: std::error::Error + Send + Sync + 'static,
    R: Rng + ?Sized,
  {
    let round = self.machine.round();
    info!("========== 第 {} 轮主动学习 ==========", round);
    self.dcus.base_mut().sync_round(round)?;
    self.diversity.base_mut().sync_round(round)?;
    std::fs::create_dir_all(&inputs.work_dir).map_err(|source| OutputError::Io {
      path: inputs.work_dir.clone(),
      source,
    })?;

    let step = |output: PathBuf, unlabeled: &Path, checkpoint: Option<&Path>| StepContext {
      round,
      work_dir: inputs.work_dir.clone(),
      labeled: inputs.labeled.clone(),
      unlabeled: unlabeled.to_path_buf(),
      checkpoint: checkpoint.map(Path::to_path_buf),
      output,
    };

    let checkpoint = collaborator
      .train(&step(
        inputs.work_dir.join("checkpoint.pth"),
        &inputs.unlabeled,
        inputs.checkpoint.as_deref(),
      ))
      .map_err(collaborator_error)?;
    let result_path = collaborator
      .infer_uncertainty(&step(
        inputs.work_dir.join("uncertainty_results.json"),
        &inputs.unlabeled,
        Some(checkpoint.as_path()),
      ))
      .map_err(collaborator_error)?;

    self.machine.advance(RoundState::DcusScoring)?;
    let last = self.dcus.base().load_labeled(&inputs.labeled)?;
    let results = DetectResult::from_path(&result_path)?;
    let scores = self.dcus.score(&results, &last.ids)?;

    self.machine.advance(RoundState::DcusSelect)?;
    let pool = self.dcus.select(&scores);
    self
      .dcus
      .base()
      .log_partition(last.ids.len(), pool.sampled.len(), "新的不确定度池");
    let pool_path = inputs.work_dir.join("uncertainty_pool.json");
    let mut pool_manifest =
      CocoManifest::with_categories(self.dcus.base().oracle().categories().to_vec());
    for &image_id in &pool.sampled {
      if let Some(entry) = self.dcus.base().oracle().get(image_id) {
        pool_manifest.images.push(entry.image.clone());
      }
    }
    pool_manifest.to_path(&pool_path)?;

    let image_dis = collaborator
      .infer_distances(&step(
        inputs.work_dir.join("image_dis.json"),
        &pool_path,
        Some(checkpoint.as_path()),
      ))
      .map_err(collaborator_error)?;

    self.machine.advance(RoundState::DiversityCluster)?;
    let cache = DistanceInput::from_url(&image_dis)?.into_cache();
    if cache.len() != pool.sampled.len() {
      warn!(
        "距离缓存包含 {} 张图像，不确定度池为 {} 张",
        cache.len(),
        pool.sampled.len()
      );
    }
    let clustering = self.diversity.cluster(&cache, rng);

    self.machine.advance(RoundState::DiversitySelect)?;
    let acquisition = self.diversity.select(&cache, &clustering, &last.ids);
    self
      .diversity
      .base()
      .log_partition(last.ids.len(), acquisition.sampled.len(), "新采样集合");

    self.machine.advance(RoundState::ManifestEmit)?;
    let pair = ManifestPair::build(
      self.diversity.base().oracle(),
      &last.manifest,
      &acquisition,
      Annotate::FromOracle,
    )?;
    output.emit(&pair)?;
    self.dcus.base_mut().set_latest_labeled(output.labeled());
    self.diversity.base_mut().set_latest_labeled(output.labeled());

    self.machine.advance(RoundState::Idle)?;
    info!("========== 第 {} 轮完成 ==========", round);

    Ok(RoundReport {
      round,
      checkpoint,
      uncertainty_pool: pool.sampled.len(),
      sampled: acquisition.sampled,
      labeled: pair.labeled.len(),
      unlabeled: pair.unlabeled.len(),
      labeled_path: output.labeled().to_path_buf(),
      unlabeled_path: output.unlabeled().to_path_buf(),
    })
  }
}

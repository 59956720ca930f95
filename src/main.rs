// 该文件是 Shanan （山南西风） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use args::{Args, Command, CommonArgs, DcusArgs, DiversityArgs, RunArgs, SplitArgs};
use shanan_al::{
  collaborator::CommandCollaborator,
  config::{LoopConfig, SamplerSection},
  oracle::OracleIndex,
  output::ManifestOutput,
  round::RoundInputs,
  sampler::{DCUS_SAMPLER, DIVERSITY_SAMPLER, SamplerRegistry, SamplerWrapper},
  split::{SplitOptions, create_al_dataset},
  task::{LoopTask, OneRoundTask, Task, make_rng},
};

fn build_sampler(
  registry: &SamplerRegistry,
  common: &CommonArgs,
  section: SamplerSection,
) -> Result<SamplerWrapper> {
  let oracle = OracleIndex::from_path(&common.oracle)
    .with_context(|| format!("无法加载 Oracle: {}", common.oracle.display()))?;
  let mut sampler = registry.build(&section, Arc::new(oracle))?;
  let previous = common.round.saturating_sub(1);
  match &mut sampler {
    SamplerWrapper::Dcus(s) => s.base_mut().sync_round(previous)?,
    SamplerWrapper::Diversity(s) => s.base_mut().sync_round(previous)?,
  }
  Ok(sampler)
}

fn section_for(kind: &str, common: &CommonArgs) -> SamplerSection {
  let mut section = SamplerSection::new(kind, common.n_images);
  section.dataset_type = common.dataset_type.clone();
  section
}

fn run_dcus(registry: &SamplerRegistry, args: DcusArgs) -> Result<()> {
  let mut section = section_for(DCUS_SAMPLER, &args.common);
  section.score_thr = args.score_thr;
  section.class_weight = args.class_weight;
  section.class_weight_ub = args.class_weight_ub;
  section.class_weight_alpha = args.class_weight_alpha;
  section.uncertainty = args.uncertainty;

  let mut sampler = build_sampler(registry, &args.common, section)?.into_dcus()?;
  let output = ManifestOutput::new(&args.common.out_labeled, &args.common.out_unlabeled);
  sampler.al_round(&args.results, &args.common.labeled, &output)?;
  Ok(())
}

fn run_diversity(registry: &SamplerRegistry, args: DiversityArgs, seed: Option<u64>) -> Result<()> {
  let section = section_for(DIVERSITY_SAMPLER, &args.common);
  let mut sampler = build_sampler(registry, &args.common, section)?.into_diversity()?;
  let output = ManifestOutput::new(&args.common.out_labeled, &args.common.out_unlabeled);
  let mut rng = make_rng(seed);
  sampler.al_round(&args.distances, &args.common.labeled, &output, &mut rng)?;
  Ok(())
}

fn run_split(args: SplitArgs, seed: Option<u64>) -> Result<()> {
  let oracle = OracleIndex::from_path(&args.oracle)
    .with_context(|| format!("无法加载 Oracle: {}", args.oracle.display()))?;
  let options = SplitOptions {
    out_root: args.out_root,
    n_diff: args.n_diff,
    n_labeled: args.n_labeled,
    dataset_type: args.dataset,
    valid_classes: args.valid_classes,
  };
  create_al_dataset(&oracle, &options, &mut make_rng(seed))?;
  Ok(())
}

fn run_loop(registry: &SamplerRegistry, args: RunArgs, seed: Option<u64>) -> Result<()> {
  let mut config = LoopConfig::from_path(&args.config)
    .with_context(|| format!("无法加载配置: {}", args.config.display()))?;
  if seed.is_some() {
    config.seed = seed;
  }

  info!("Oracle 标注路径: {}", config.oracle_path.display());
  info!("初始已标注清单: {}", config.init_label_json.display());
  info!("初始未标注清单: {}", config.init_unlabeled_json.display());
  info!("输出目录: {}", config.output_dir.display());
  info!("轮数: {}, 预算: {}", config.round_num, config.budget);
  info!("不确定度池大小: {}", config.uncertainty_pool_size());

  let mut collaborator = CommandCollaborator::new(config.commands.clone());
  let inputs = RoundInputs {
    labeled: config.init_label_json.clone(),
    unlabeled: config.init_unlabeled_json.clone(),
    checkpoint: config.init_model.clone(),
    work_dir: config.round_dir(1),
  };

  if args.once {
    let output = ManifestOutput::in_dir(&config.round_dir(1));
    OneRoundTask::from_config(&config, registry)?.run_task(inputs, &mut collaborator, &output)
  } else {
    LoopTask::from_config(&config, registry)?
      .with_ctrlc()?
      .run_task(inputs, &mut collaborator, config.output_dir.as_path())
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();
  let registry = SamplerRegistry::with_defaults();

  match args.command {
    Command::Dcus(dcus) => run_dcus(&registry, dcus),
    Command::Diversity(diversity) => run_diversity(&registry, diversity, args.seed),
    Command::Split(split) => run_split(split, args.seed),
    Command::Run(run) => run_loop(&registry, run, args.seed),
  }
}

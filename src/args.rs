// 该文件是 Shanan （山南西风） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use url::Url;

use shanan_al::{model::UncertaintyKind, sampler::ClassWeightMode};

/// Shanan 主动学习采样工具
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 随机种子，覆盖配置文件中的设置
  #[arg(long, global = true, value_name = "SEED")]
  pub seed: Option<u64>,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 不确定度采样（DCUS）一轮
  Dcus(DcusArgs),
  /// 多样性采样一轮
  Diversity(DiversityArgs),
  /// 生成初始已标注/未标注划分
  Split(SplitArgs),
  /// 按配置文件运行完整的主动学习循环
  Run(RunArgs),
}

#[derive(ClapArgs, Debug)]
pub struct CommonArgs {
  /// Oracle 标注文件
  #[arg(long, value_name = "FILE")]
  pub oracle: PathBuf,
  /// 上一轮已标注清单
  #[arg(long, value_name = "FILE")]
  pub labeled: PathBuf,
  /// 输出的已标注清单
  #[arg(long, value_name = "FILE")]
  pub out_labeled: PathBuf,
  /// 输出的未标注清单
  #[arg(long, value_name = "FILE")]
  pub out_unlabeled: PathBuf,
  /// 本轮采样图像数
  #[arg(long, value_name = "COUNT")]
  pub n_images: usize,
  #[arg(long, default_value = "coco", value_name = "TYPE")]
  pub dataset_type: String,
  /// 轮次编号（从 1 开始）
  #[arg(long, default_value = "1", value_name = "ROUND")]
  pub round: u32,
}

#[derive(ClapArgs, Debug)]
pub struct DcusArgs {
  #[command(flatten)]
  pub common: CommonArgs,
  /// 未标注图像上的检测结果 JSON
  #[arg(long, value_name = "FILE")]
  pub results: PathBuf,
  #[arg(long, default_value = "0.1", value_name = "THRESHOLD")]
  pub score_thr: f64,
  #[arg(long, value_enum, default_value = "fixed")]
  pub class_weight: ClassWeightMode,
  #[arg(long, default_value = "0.2")]
  pub class_weight_ub: f64,
  #[arg(long, default_value = "0.3")]
  pub class_weight_alpha: f64,
  #[arg(long, value_enum, default_value = "cls")]
  pub uncertainty: UncertaintyKind,
}

#[derive(ClapArgs, Debug)]
pub struct DiversityArgs {
  #[command(flatten)]
  pub common: CommonArgs,
  /// 距离缓存 URL，例如 dist:///path/image_dis.json 或 embed:///path/feat.json
  #[arg(long, value_name = "URL")]
  pub distances: Url,
}

#[derive(ClapArgs, Debug)]
pub struct SplitArgs {
  /// Oracle 标注文件
  pub oracle: PathBuf,
  /// 输出目录
  pub out_root: PathBuf,
  /// 生成的不同初始集数量
  pub n_diff: usize,
  /// 每组初始已标注图像数
  pub n_labeled: usize,
  #[arg(long, default_value = "coco", value_name = "TYPE")]
  pub dataset: String,
  /// 保留标注的类别名，可重复；缺省为全部类别
  #[arg(long = "valid-class", value_name = "NAME")]
  pub valid_classes: Vec<String>,
}

#[derive(ClapArgs, Debug)]
pub struct RunArgs {
  /// TOML 循环配置
  #[arg(long, value_name = "FILE")]
  pub config: PathBuf,
  /// 只运行一轮
  #[arg(long)]
  pub once: bool,
}

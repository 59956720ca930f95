// 该文件是 Shanan （山南西风） 项目的一部分。
// src/config.rs - 主动学习循环配置
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

//! TOML 格式的循环配置。
//!
//! ```toml
//! oracle_path = "annotations/instances_train.json"
//! init_label_json = "active_learning/coco_600_labeled_1.json"
//! init_unlabeled_json = "active_learning/coco_600_unlabeled_1.json"
//! output_dir = "work_dirs/al"
//! round_num = 4
//! budget = 50
//! budget_expand_ratio = 4
//! gpus = 1
//!
//! [uncertainty_sampler]
//! type = "DCUSSampler"
//! score_thr = 0.1
//! class_weight = "calibrated"
//!
//! [diversity_sampler]
//! type = "DiversitySampler"
//!
//! [commands]
//! train = "python train.py --labeled ${LABELED} --work-dir ${WORK_DIR}"
//! infer_uncertainty = "python infer.py ${CHECKPOINT} ${UNLABELED} --out ${OUTPUT}"
//! infer_diversity = "python embed.py ${CHECKPOINT} ${UNLABELED} --out ${OUTPUT}"
//! ```
//!
//! 相对路径以配置文件所在目录为基准。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::{
  model::UncertaintyKind,
  sampler::{
    ClassWeightMode, DEFAULT_SCORE_THR,
    kmedoids::{KMEANS_MAX_ITERS, KMEANS_TOLERANCE},
  },
};

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("无法读取配置文件 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("配置文件格式错误: {0}")]
  Toml(#[from] toml::de::Error),
  #[error("配置无效: {0}")]
  Invalid(String),
}

fn default_dataset_type() -> String {
  "coco".to_string()
}

fn default_score_thr() -> f64 {
  DEFAULT_SCORE_THR
}

fn default_class_weight_ub() -> f64 {
  0.2
}

fn default_class_weight_alpha() -> f64 {
  0.3
}

fn default_max_iters() -> usize {
  KMEANS_MAX_ITERS
}

fn default_tolerance() -> f64 {
  KMEANS_TOLERANCE
}

fn default_distance_scheme() -> String {
  "embed".to_string()
}

fn default_one() -> usize {
  1
}

/// 一个采样器的构造参数，`type` 决定注册表中使用哪个构造函数
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SamplerSection {
  #[serde(rename = "type")]
  pub kind: String,
  #[serde(default)]
  pub n_sample_images: Option<usize>,
  #[serde(default = "default_dataset_type")]
  pub dataset_type: String,
  #[serde(default = "default_score_thr")]
  pub score_thr: f64,
  #[serde(default)]
  pub class_weight: ClassWeightMode,
  #[serde(default = "default_class_weight_ub")]
  pub class_weight_ub: f64,
  #[serde(default = "default_class_weight_alpha")]
  pub class_weight_alpha: f64,
  /// 类别名到检测质量（如验证集 AP），用于难度校准
  #[serde(default)]
  pub class_quality: BTreeMap<String, f64>,
  #[serde(default)]
  pub uncertainty: UncertaintyKind,
  #[serde(default = "default_max_iters")]
  pub max_iters: usize,
  #[serde(default = "default_tolerance")]
  pub tolerance: f64,
}

impl SamplerSection {
  pub fn new(kind: impl Into<String>, n_sample_images: usize) -> Self {
    SamplerSection {
      kind: kind.into(),
      n_sample_images: Some(n_sample_images),
      dataset_type: default_dataset_type(),
      score_thr: DEFAULT_SCORE_THR,
      class_weight: ClassWeightMode::default(),
      class_weight_ub: default_class_weight_ub(),
      class_weight_alpha: default_class_weight_alpha(),
      class_quality: BTreeMap::new(),
      uncertainty: UncertaintyKind::default(),
      max_iters: KMEANS_MAX_ITERS,
      tolerance: KMEANS_TOLERANCE,
    }
  }
}

/// 外部训练/推理命令模板
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandTemplates {
  pub train: String,
  pub infer_uncertainty: String,
  pub infer_diversity: String,
  /// `infer_diversity` 产出文件的格式，`dist` 或 `embed`
  #[serde(default = "default_distance_scheme")]
  pub distance_scheme: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoopConfig {
  pub oracle_path: PathBuf,
  pub init_label_json: PathBuf,
  pub init_unlabeled_json: PathBuf,
  #[serde(default)]
  pub init_model: Option<PathBuf>,
  pub output_dir: PathBuf,
  pub round_num: u32,
  pub budget: usize,
  #[serde(default = "default_one")]
  pub budget_expand_ratio: usize,
  #[serde(default = "default_one")]
  pub gpus: usize,
  #[serde(default)]
  pub uncertainty_pool_size: Option<usize>,
  #[serde(default)]
  pub seed: Option<u64>,
  pub uncertainty_sampler: SamplerSection,
  pub diversity_sampler: SamplerSection,
  pub commands: CommandTemplates,
}

impl LoopConfig {
  pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let mut config = Self::from_toml_str(&raw)?;
    if let Some(base) = path.parent() {
      config.resolve_paths(base);
    }
    Ok(config)
  }

  /// 解析并校验，同时补全采样数的默认值
  pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
    let mut config: LoopConfig = toml::from_str(raw)?;
    config.validate()?;
    let pool = config.uncertainty_pool_size();
    config
      .uncertainty_sampler
      .n_sample_images
      .get_or_insert(pool);
    config
      .diversity_sampler
      .n_sample_images
      .get_or_insert(config.budget);
    Ok(config)
  }

  /// `budget · ratio` 向上补齐到 `gpus` 的整数倍之上
  pub fn uncertainty_pool_size(&self) -> usize {
    self.uncertainty_pool_size.unwrap_or_else(|| {
      let expanded = self.budget * self.budget_expand_ratio;
      expanded + self.gpus - expanded % self.gpus
    })
  }

  pub fn round_dir(&self, round: u32) -> PathBuf {
    self.output_dir.join(format!("round{}", round))
  }

  fn validate(&self) -> Result<(), ConfigError> {
    if self.gpus == 0 {
      return Err(ConfigError::Invalid("gpus 必须大于 0".to_string()));
    }
    if self.budget == 0 {
      return Err(ConfigError::Invalid("budget 必须大于 0".to_string()));
    }
    if self.budget_expand_ratio == 0 {
      return Err(ConfigError::Invalid(
        "budget_expand_ratio 必须大于 0".to_string(),
      ));
    }
    if !matches!(self.commands.distance_scheme.as_str(), "dist" | "embed") {
      return Err(ConfigError::Invalid(format!(
        "不支持的距离格式: {}",
        self.commands.distance_scheme
      )));
    }
    for section in [&self.uncertainty_sampler, &self.diversity_sampler] {
      if section.n_sample_images == Some(0) {
        return Err(ConfigError::Invalid(format!(
          "{} 的 n_sample_images 必须大于 0",
          section.kind
        )));
      }
    }
    Ok(())
  }

  fn resolve_paths(&mut self, base: &Path) {
    let resolve = |path: &mut PathBuf| {
      if path.is_relative() {
        *path = base.join(&*path);
      }
    };
    resolve(&mut self.oracle_path);
    resolve(&mut self.init_label_json);
    resolve(&mut self.init_unlabeled_json);
    resolve(&mut self.output_dir);
    if let Some(model) = self.init_model.as_mut() {
      resolve(model);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const BASE: &str = r#"
oracle_path = "oracle.json"
init_label_json = "labeled.json"
init_unlabeled_json = "unlabeled.json"
output_dir = "out"
round_num = 4
budget = 50
budget_expand_ratio = 4
gpus = 1

[uncertainty_sampler]
type = "DCUSSampler"
score_thr = 0.1
class_weight = "calibrated"
class_weight_ub = 0.2
class_weight_alpha = 0.3

[uncertainty_sampler.class_quality]
puncta = 0.4

[diversity_sampler]
type = "DiversitySampler"
n_sample_images = 5

[commands]
train = "train ${LABELED}"
infer_uncertainty = "infer ${UNLABELED} ${OUTPUT}"
infer_diversity = "embed ${UNLABELED} ${OUTPUT}"
"#;

  #[test]
  fn parses_and_fills_sample_sizes() {
    let config = LoopConfig::from_toml_str(BASE).unwrap();
    assert_eq!(config.uncertainty_pool_size(), 201);
    assert_eq!(config.uncertainty_sampler.n_sample_images, Some(201));
    assert_eq!(config.diversity_sampler.n_sample_images, Some(5));
    assert_eq!(config.uncertainty_sampler.class_weight, ClassWeightMode::Calibrated);
    assert_eq!(config.uncertainty_sampler.class_quality["puncta"], 0.4);
    assert_eq!(config.diversity_sampler.dataset_type, "coco");
    assert_eq!(config.commands.distance_scheme, "embed");
    assert_eq!(config.round_dir(2), PathBuf::from("out/round2"));
  }

  #[test]
  fn pool_size_rounds_up_past_a_gpu_multiple() {
    let mut config = LoopConfig::from_toml_str(BASE).unwrap();
    config.gpus = 3;
    assert_eq!(config.uncertainty_pool_size(), 201);
    config.gpus = 8;
    assert_eq!(config.uncertainty_pool_size(), 208);
    config.uncertainty_pool_size = Some(64);
    assert_eq!(config.uncertainty_pool_size(), 64);
  }

  #[test]
  fn zero_gpus_is_rejected() {
    let raw = BASE.replace("gpus = 1", "gpus = 0");
    assert!(matches!(
      LoopConfig::from_toml_str(&raw),
      Err(ConfigError::Invalid(_))
    ));
  }

  #[test]
  fn relative_paths_follow_the_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("al.toml");
    std::fs::write(&path, BASE).unwrap();
    let config = LoopConfig::from_path(&path).unwrap();
    assert_eq!(config.oracle_path, dir.path().join("oracle.json"));
    assert_eq!(config.output_dir, dir.path().join("out"));
  }
}

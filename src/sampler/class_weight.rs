// 该文件是 Shanan （山南西风） 项目的一部分。
// src/sampler/class_weight.rs - 类别权重
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

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{coco::CategoryId, oracle::OracleIndex, sampler::SamplerError};

const COUNT_EPS: f64 = 1e-5;

/// 各类别上通过过滤的检测的不确定度统计
#[derive(Debug, Clone, Default)]
pub struct CategoryStats {
  totals: BTreeMap<CategoryId, (f64, usize)>,
}

impl CategoryStats {
  pub fn record(&mut self, category: CategoryId, uncertainty: f64) {
    let entry = self.totals.entry(category).or_insert((0.0, 0));
    entry.0 += uncertainty;
    entry.1 += 1;
  }

  pub fn count(&self, category: CategoryId) -> usize {
    self.totals.get(&category).map(|(_, n)| *n).unwrap_or(0)
  }

  pub fn mean(&self, category: CategoryId) -> Option<f64> {
    self
      .totals
      .get(&category)
      .map(|(sum, n)| sum / (*n as f64 + COUNT_EPS))
  }

  pub fn categories(&self) -> impl Iterator<Item = CategoryId> + '_ {
    self.totals.keys().copied()
  }
}

/// 类别权重策略；返回的表中不存在的类别在打分时被跳过
pub trait ClassWeighting: std::fmt::Debug {
  fn class_weights(&self, oracle: &OracleIndex, stats: &CategoryStats) -> BTreeMap<CategoryId, f64>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ClassWeightMode {
  /// 所有类别权重固定为 1.0
  #[default]
  Fixed,
  /// 按类别难度校准
  Calibrated,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedWeight {
  pub weight: f64,
}

impl Default for FixedWeight {
  fn default() -> Self {
    FixedWeight { weight: 1.0 }
  }
}

impl ClassWeighting for FixedWeight {
  fn class_weights(&self, oracle: &OracleIndex, _stats: &CategoryStats) -> BTreeMap<CategoryId, f64> {
    oracle
      .categories()
      .iter()
      .map(|c| (c.id, self.weight))
      .collect()
  }
}

/// 难度校准权重：`w = 1 + alpha * ln(b * d + 1) * ub`，其中 `b = exp(1 / alpha) - 1`
///
/// `d` 为类别难度，取 `1 - quality`；未提供质量时取该类别平均不确定度，截断到 `[0, 1]`。
/// 权重范围为 `[1, 1 + ub]`。
#[derive(Debug, Clone, PartialEq)]
pub struct DifficultyCalibrated {
  ub: f64,
  alpha: f64,
  qualities: BTreeMap<CategoryId, f64>,
}

impl DifficultyCalibrated {
  pub fn new(ub: f64, alpha: f64) -> Result<Self, SamplerError> {
    if !ub.is_finite() || ub < 0.0 {
      return Err(SamplerError::InvalidParameter(format!(
        "class_weight_ub 必须为非负有限值, 实际为 {}",
        ub
      )));
    }
    if !(alpha > 0.0) || !(1.0 / alpha).exp().is_finite() {
      return Err(SamplerError::InvalidParameter(format!(
        "class_weight_alpha 超出可用范围: {}",
        alpha
      )));
    }
    Ok(DifficultyCalibrated {
      ub,
      alpha,
      qualities: BTreeMap::new(),
    })
  }

  pub fn with_quality(mut self, category: CategoryId, quality: f64) -> Self {
    self.qualities.insert(category, quality);
    self
  }

  pub fn weight_for(&self, difficulty: f64) -> f64 {
    let d = difficulty.clamp(0.0, 1.0);
    let b = (1.0 / self.alpha).exp() - 1.0;
    1.0 + self.alpha * (b * d + 1.0).ln() * self.ub
  }
}

impl ClassWeighting for DifficultyCalibrated {
  fn class_weights(&self, oracle: &OracleIndex, stats: &CategoryStats) -> BTreeMap<CategoryId, f64> {
    oracle
      .categories()
      .iter()
      .map(|c| {
        let difficulty = match self.qualities.get(&c.id) {
          Some(q) => 1.0 - q.clamp(0.0, 1.0),
          None => stats.mean(c.id).unwrap_or(0.0),
        };
        (c.id, self.weight_for(difficulty))
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::coco::CocoManifest;
  use serde_json::json;
  use std::path::Path;

  fn oracle() -> OracleIndex {
    let manifest: CocoManifest = serde_json::from_value(json!({
      "images": [{"id": 1, "width": 10, "height": 10, "file_name": "a.png"}],
      "categories": [{"id": 1, "name": "easy"}, {"id": 2, "name": "hard"}]
    }))
    .unwrap();
    OracleIndex::from_manifest(manifest, Path::new("oracle.json")).unwrap()
  }

  #[test]
  fn fixed_weight_covers_every_oracle_class() {
    let weights = FixedWeight::default().class_weights(&oracle(), &CategoryStats::default());
    assert_eq!(weights.len(), 2);
    assert!(weights.values().all(|w| *w == 1.0));
  }

  #[test]
  fn calibrated_weight_is_bounded() {
    let calibrated = DifficultyCalibrated::new(0.2, 0.3).unwrap();
    assert!((calibrated.weight_for(0.0) - 1.0).abs() < 1e-12);
    assert!((calibrated.weight_for(1.0) - 1.2).abs() < 1e-9);
    assert!((calibrated.weight_for(7.0) - 1.2).abs() < 1e-9);
    let mid = calibrated.weight_for(0.5);
    assert!(mid > 1.0 && mid < 1.2);
  }

  #[test]
  fn harder_classes_weigh_more() {
    let mut stats = CategoryStats::default();
    stats.record(1, 0.1);
    stats.record(2, 0.9);
    let weights = DifficultyCalibrated::new(0.2, 0.3)
      .unwrap()
      .class_weights(&oracle(), &stats);
    assert!(weights[&2] > weights[&1]);

    let with_quality = DifficultyCalibrated::new(0.2, 0.3)
      .unwrap()
      .with_quality(2, 1.0)
      .class_weights(&oracle(), &stats);
    assert!((with_quality[&2] - 1.0).abs() < 1e-12);
  }

  #[test]
  fn rejects_degenerate_alpha() {
    assert!(DifficultyCalibrated::new(0.2, 0.0).is_err());
    assert!(DifficultyCalibrated::new(0.2, 1e-4).is_err());
    assert!(DifficultyCalibrated::new(-1.0, 0.3).is_err());
  }
}

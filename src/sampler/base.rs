// 该文件是 Shanan （山南西风） 项目的一部分。
// src/sampler/base.rs - 采样器公共状态
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

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::{
  coco::{CocoManifest, ImageId},
  oracle::OracleIndex,
  sampler::SamplerError,
};

/// 上一轮的已标注清单及其图像 ID 集合
#[derive(Debug, Clone)]
pub struct LabeledSet {
  pub manifest: CocoManifest,
  pub ids: HashSet<ImageId>,
}

#[derive(Debug)]
pub struct SamplerBase {
  n_images: usize,
  oracle: Arc<OracleIndex>,
  dataset_type: String,
  round: u32,
  latest_labeled: Option<PathBuf>,
}

impl SamplerBase {
  pub fn new(n_images: usize, oracle: Arc<OracleIndex>, dataset_type: impl Into<String>) -> Self {
    SamplerBase {
      n_images,
      oracle,
      dataset_type: dataset_type.into(),
      round: 0,
      latest_labeled: None,
    }
  }

  pub fn n_images(&self) -> usize {
    self.n_images
  }

  pub fn oracle(&self) -> &OracleIndex {
    &self.oracle
  }

  pub fn dataset_type(&self) -> &str {
    &self.dataset_type
  }

  pub fn image_pool_size(&self) -> usize {
    self.oracle.image_pool_size()
  }

  pub fn round(&self) -> u32 {
    self.round
  }

  pub fn start_round(&mut self) -> u32 {
    self.round += 1;
    self.round
  }

  /// 与外部轮次计数对齐，只允许前进
  pub fn sync_round(&mut self, round: u32) -> Result<(), SamplerError> {
    if round < self.round {
      return Err(SamplerError::RoundRegression {
        current: self.round,
        requested: round,
      });
    }
    self.round = round;
    Ok(())
  }

  pub fn latest_labeled(&self) -> Option<&Path> {
    self.latest_labeled.as_deref()
  }

  pub fn set_latest_labeled(&mut self, path: &Path) {
    self.latest_labeled = Some(path.to_path_buf());
  }

  /// `count` 占图像池的百分比
  pub fn percent(&self, count: usize) -> f64 {
    let pool = self.image_pool_size();
    if pool == 0 {
      0.0
    } else {
      100.0 * count as f64 / pool as f64
    }
  }

  /// 读取已标注清单，重复 ID 或 Oracle 之外的 ID 均视为致命错误
  pub fn load_labeled(&self, path: &Path) -> Result<LabeledSet, SamplerError> {
    let manifest = CocoManifest::from_path(path)?;
    let mut ids = HashSet::with_capacity(manifest.images.len());
    for image in &manifest.images {
      if !self.oracle.contains(image.id) {
        return Err(SamplerError::UnknownLabeledImage(image.id));
      }
      if !ids.insert(image.id) {
        return Err(SamplerError::DuplicateLabeled(image.id));
      }
    }
    Ok(LabeledSet { manifest, ids })
  }

  pub fn log_init_info(&self, name: &str, per_round: &str) {
    info!(">> {} 已初始化", name);
    info!(">>>> 数据集: {}", self.dataset_type);
    info!(">>>> Oracle 标注路径: {}", self.oracle.path().display());
    info!(">>>> 图像池大小: {}", self.image_pool_size());
    info!(
      ">>>> {}: {} ({:.2}%)",
      per_round,
      self.n_images,
      self.percent(self.n_images)
    );
  }

  pub fn log_round_info(&self, per_round: &str) {
    info!(">>>> 轮次: {}", self.round);
    info!(">>>> 数据集: {}", self.dataset_type);
    info!(">>>> 图像池大小: {}", self.image_pool_size());
    info!(
      ">>>> {}: {} ({:.2}%)",
      per_round,
      self.n_images,
      self.percent(self.n_images)
    );
  }

  pub fn log_partition(&self, last_labeled: usize, sampled: usize, sampled_name: &str) {
    info!("---------------------------------------------");
    info!("--->>> 第 {} 轮生成新的图像集合:", self.round);
    info!(
      "--->>> 上一轮已标注集合大小: {} ({:.2}%)",
      last_labeled,
      self.percent(last_labeled)
    );
    info!(
      "--->>> {}大小: {} ({:.2}%)",
      sampled_name,
      sampled,
      self.percent(sampled)
    );
    info!("---------------------------------------------");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn base() -> SamplerBase {
    let manifest: CocoManifest = serde_json::from_value(json!({
      "images": [
        {"id": 1, "width": 10, "height": 10, "file_name": "a.png"},
        {"id": 2, "width": 10, "height": 10, "file_name": "b.png"}
      ]
    }))
    .unwrap();
    let oracle = OracleIndex::from_manifest(manifest, Path::new("oracle.json")).unwrap();
    SamplerBase::new(1, Arc::new(oracle), "coco")
  }

  #[test]
  fn rounds_only_move_forward() {
    let mut base = base();
    assert_eq!(base.start_round(), 1);
    assert_eq!(base.start_round(), 2);
    assert!(base.sync_round(5).is_ok());
    assert!(matches!(
      base.sync_round(3),
      Err(SamplerError::RoundRegression {
        current: 5,
        requested: 3
      })
    ));
    assert!((base.percent(1) - 50.0).abs() < 1e-9);
  }

  #[test]
  fn labeled_manifest_outside_the_oracle_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("labeled.json");
    std::fs::write(
      &path,
      json!({"images": [{"id": 9, "width": 1, "height": 1, "file_name": "x.png"}]}).to_string(),
    )
    .unwrap();
    assert!(matches!(
      base().load_labeled(&path),
      Err(SamplerError::UnknownLabeledImage(9))
    ));
  }
}

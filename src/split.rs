// 该文件是 Shanan （山南西风） 项目的一部分。
// src/split.rs - 初始标注集划分
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
use std::path::PathBuf;

use rand::{Rng, seq::SliceRandom};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  coco::{CategoryId, CocoManifest},
  oracle::OracleIndex,
  output::{ManifestOutput, ManifestPair, OutputError},
};

#[derive(Error, Debug)]
pub enum SplitError {
  #[error("初始标注数 {requested} 超过图像池大小 {pool}")]
  TooManyLabeled { requested: usize, pool: usize },
  #[error("没有可用的类别")]
  NoValidClass,
  #[error(transparent)]
  Output(#[from] OutputError),
}

#[derive(Debug, Clone)]
pub struct SplitOptions {
  pub out_root: PathBuf,
  pub n_diff: usize,
  pub n_labeled: usize,
  pub dataset_type: String,
  /// 为空时使用 Oracle 中的全部类别
  pub valid_classes: Vec<String>,
}

impl SplitOptions {
  pub fn output_for(&self, index: usize) -> ManifestOutput {
    let prefix = format!("{}_{}", self.dataset_type, self.n_labeled);
    ManifestOutput::new(
      self.out_root.join(format!("{}_labeled_{}.json", prefix, index)),
      self.out_root.join(format!("{}_unlabeled_{}.json", prefix, index)),
    )
  }
}

fn valid_category_ids(
  oracle: &OracleIndex,
  valid_classes: &[String],
) -> Result<HashSet<CategoryId>, SplitError> {
  let ids: HashSet<CategoryId> = if valid_classes.is_empty() {
    oracle.categories().iter().map(|c| c.id).collect()
  } else {
    valid_classes
      .iter()
      .filter_map(|name| {
        let id = oracle.class_id(name);
        if id.is_none() {
          warn!("类别 {} 不在 Oracle 中", name);
        }
        id
      })
      .collect()
  };
  if ids.is_empty() {
    return Err(SplitError::NoValidClass);
  }
  Ok(ids)
}

/// 随机抽取 `n_labeled` 张图像作为初始已标注集，其标注只保留有效类别
pub fn split_once<R: Rng + ?Sized>(
  oracle: &OracleIndex,
  n_labeled: usize,
  valid: &HashSet<CategoryId>,
  rng: &mut R,
) -> Result<ManifestPair, SplitError> {
  let pool = oracle.image_pool_size();
  if n_labeled > pool {
    return Err(SplitError::TooManyLabeled {
      requested: n_labeled,
      pool,
    });
  }

  let mut entries: Vec<_> = oracle.iter().collect();
  entries.shuffle(rng);
  let (labeled_entries, unlabeled_entries) = entries.split_at(n_labeled);

  let mut labeled = CocoManifest::with_categories(oracle.categories().to_vec());
  for entry in labeled_entries {
    labeled.images.push(entry.image.clone());
    labeled.annotations.extend(
      entry
        .annotations
        .iter()
        .filter(|a| valid.contains(&a.category_id))
        .cloned(),
    );
  }
  let mut unlabeled = CocoManifest::with_categories(oracle.categories().to_vec());
  unlabeled
    .images
    .extend(unlabeled_entries.iter().map(|entry| entry.image.clone()));

  Ok(ManifestPair { labeled, unlabeled })
}

/// 生成 `n_diff` 组不同的初始划分，文件名序号从 1 开始
pub fn create_al_dataset<R: Rng + ?Sized>(
  oracle: &OracleIndex,
  options: &SplitOptions,
  rng: &mut R,
) -> Result<Vec<ManifestOutput>, SplitError> {
  let valid = valid_category_ids(oracle, &options.valid_classes)?;
  let mut outputs = Vec::with_capacity(options.n_diff);
  for index in 1..=options.n_diff {
    let pair = split_once(oracle, options.n_labeled, &valid, rng)?;
    let output = options.output_for(index);
    output.emit(&pair)?;
    log_split(&output, &pair);
    outputs.push(output);
  }
  Ok(outputs)
}

fn log_split(output: &ManifestOutput, pair: &ManifestPair) {
  info!("------------------------------------------------------");
  info!("已标注数据:");
  info!("输出路径: {}", output.labeled().display());
  info!("图像数: {}", pair.labeled.len());
  info!("目标数: {}", pair.labeled.annotations.len());
  info!("未标注数据:");
  info!("输出路径: {}", output.unlabeled().display());
  info!("图像数: {}", pair.unlabeled.len());
  info!("------------------------------------------------------");
}

#[cfg(test)]
mod tests {
  use super::*;
  use rand::{SeedableRng, rngs::StdRng};
  use serde_json::json;
  use std::path::Path;

  fn oracle() -> OracleIndex {
    let images: Vec<_> = (1..=8)
      .map(|id| json!({"id": id, "width": 10, "height": 10, "file_name": format!("{id}.png")}))
      .collect();
    let annotations: Vec<_> = (1..=8)
      .flat_map(|id| {
        [
          json!({"id": id * 10, "image_id": id, "category_id": 1, "bbox": [0, 0, 1, 1]}),
          json!({"id": id * 10 + 1, "image_id": id, "category_id": 2, "bbox": [0, 0, 1, 1]}),
        ]
      })
      .collect();
    let manifest: CocoManifest = serde_json::from_value(json!({
      "images": images,
      "annotations": annotations,
      "categories": [{"id": 1, "name": "puncta"}, {"id": 2, "name": "debris"}]
    }))
    .unwrap();
    OracleIndex::from_manifest(manifest, Path::new("oracle.json")).unwrap()
  }

  #[test]
  fn split_partitions_the_pool() {
    let oracle = oracle();
    let valid = HashSet::from([1]);
    let mut rng = StdRng::seed_from_u64(5);
    let pair = split_once(&oracle, 3, &valid, &mut rng).unwrap();

    let labeled: HashSet<_> = pair.labeled_ids().into_iter().collect();
    let unlabeled: HashSet<_> = pair.unlabeled_ids().into_iter().collect();
    assert_eq!(labeled.len(), 3);
    assert_eq!(unlabeled.len(), 5);
    assert!(labeled.is_disjoint(&unlabeled));
    assert_eq!(pair.labeled.annotations.len(), 3);
    assert!(pair.labeled.annotations.iter().all(|a| a.category_id == 1));
    assert!(pair.unlabeled.annotations.is_empty());
  }

  #[test]
  fn same_seed_gives_the_same_split() {
    let oracle = oracle();
    let valid = HashSet::from([1, 2]);
    let a = split_once(&oracle, 4, &valid, &mut StdRng::seed_from_u64(9)).unwrap();
    let b = split_once(&oracle, 4, &valid, &mut StdRng::seed_from_u64(9)).unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn writes_numbered_files() {
    let dir = tempfile::tempdir().unwrap();
    let options = SplitOptions {
      out_root: dir.path().to_path_buf(),
      n_diff: 2,
      n_labeled: 2,
      dataset_type: "coco".to_string(),
      valid_classes: vec!["debris".to_string()],
    };
    let outputs = create_al_dataset(&oracle(), &options, &mut StdRng::seed_from_u64(1)).unwrap();
    assert_eq!(outputs.len(), 2);
    assert!(dir.path().join("coco_2_labeled_1.json").exists());
    assert!(dir.path().join("coco_2_unlabeled_2.json").exists());

    let labeled = CocoManifest::from_path(outputs[0].labeled()).unwrap();
    assert!(labeled.annotations.iter().all(|a| a.category_id == 2));
  }

  #[test]
  fn too_many_labeled_is_rejected() {
    let oracle = oracle();
    let valid = HashSet::from([1]);
    assert!(matches!(
      split_once(&oracle, 9, &valid, &mut StdRng::seed_from_u64(0)),
      Err(SplitError::TooManyLabeled {
        requested: 9,
        pool: 8
      })
    ));
  }
}

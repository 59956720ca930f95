// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output.rs - 标注清单输出
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
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  coco::{CocoManifest, ImageId, ManifestError},
  oracle::OracleIndex,
  sampler::Acquisition,
};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("清单写入失败: {0}")]
  Manifest(#[from] ManifestError),
  #[error("无法操作输出路径 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("已标注图像数不符: 期望 {expected}, 实际 {actual}")]
  LabeledCountMismatch { expected: usize, actual: usize },
  #[error("已标注 {labeled} + 未标注 {unlabeled} 不等于图像池大小 {pool}")]
  PoolSizeMismatch {
    labeled: usize,
    unlabeled: usize,
    pool: usize,
  },
  #[error("图像 {0} 同时出现在已标注与未标注集合中")]
  Overlap(ImageId),
  #[error("未标注集合中图像 {0} 重复")]
  DuplicateUnlabeled(ImageId),
  #[error("图像 {0} 不在 Oracle 图像池中")]
  UnknownImage(ImageId),
}

/// 新采样图像写入已标注清单时是否附带 Oracle 标注
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Annotate {
  /// 只写入图像信息，等待后续标注
  Withheld,
  /// 从 Oracle 复制真实标注，模拟人工标注
  FromOracle,
}

/// 一轮结束时的已标注/未标注清单对
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestPair {
  pub labeled: CocoManifest,
  pub unlabeled: CocoManifest,
}

impl ManifestPair {
  /// 上一轮已标注清单原样保留，追加新采样图像；其余图像进入未标注清单（不带标注）
  pub fn build(
    oracle: &OracleIndex,
    last_labeled: &CocoManifest,
    acquisition: &Acquisition,
    annotate: Annotate,
  ) -> Result<Self, OutputError> {
    let mut labeled = CocoManifest::with_categories(oracle.categories().to_vec());
    let mut unlabeled = CocoManifest::with_categories(oracle.categories().to_vec());

    let mut labeled_ids: HashSet<ImageId> = HashSet::with_capacity(last_labeled.len());
    for image in &last_labeled.images {
      if !oracle.contains(image.id) {
        return Err(OutputError::UnknownImage(image.id));
      }
      labeled_ids.insert(image.id);
    }
    labeled.images.extend(last_labeled.images.iter().cloned());
    labeled
      .annotations
      .extend(last_labeled.annotations.iter().cloned());

    for &image_id in &acquisition.sampled {
      let entry = oracle
        .get(image_id)
        .ok_or(OutputError::UnknownImage(image_id))?;
      if !labeled_ids.insert(image_id) {
        return Err(OutputError::Overlap(image_id));
      }
      labeled.images.push(entry.image.clone());
      if annotate == Annotate::FromOracle {
        labeled.annotations.extend(entry.annotations.iter().cloned());
      }
    }

    let expected = last_labeled.len() + acquisition.sampled.len();
    if labeled.len() != expected {
      return Err(OutputError::LabeledCountMismatch {
        expected,
        actual: labeled.len(),
      });
    }

    let mut unlabeled_ids = HashSet::with_capacity(acquisition.rest.len());
    for &image_id in &acquisition.rest {
      let entry = oracle
        .get(image_id)
        .ok_or(OutputError::UnknownImage(image_id))?;
      if labeled_ids.contains(&image_id) {
        return Err(OutputError::Overlap(image_id));
      }
      if !unlabeled_ids.insert(image_id) {
        return Err(OutputError::DuplicateUnlabeled(image_id));
      }
      unlabeled.images.push(entry.image.clone());
    }

    let pool = oracle.image_pool_size();
    if labeled.len() + unlabeled.len() != pool {
      return Err(OutputError::PoolSizeMismatch {
        labeled: labeled.len(),
        unlabeled: unlabeled.len(),
        pool,
      });
    }

    Ok(ManifestPair { labeled, unlabeled })
  }

  pub fn labeled_ids(&self) -> Vec<ImageId> {
    self.labeled.image_ids()
  }

  pub fn unlabeled_ids(&self) -> Vec<ImageId> {
    self.unlabeled.image_ids()
  }
}

/// 清单对的输出位置
///
/// 两个文件先写入同目录下的 `.partial` 临时文件，全部成功后才改名覆盖目标文件。
#[derive(Debug, Clone)]
pub struct ManifestOutput {
  labeled: PathBuf,
  unlabeled: PathBuf,
}

fn staging_path(path: &Path) -> PathBuf {
  let mut name: OsString = path.as_os_str().to_owned();
  name.push(".partial");
  PathBuf::from(name)
}

fn ensure_parent(path: &Path) -> Result<(), OutputError> {
  match path.parent() {
    Some(parent) if !parent.as_os_str().is_empty() => {
      std::fs::create_dir_all(parent).map_err(|source| OutputError::Io {
        path: parent.to_path_buf(),
        source,
      })
    }
    _ => Ok(()),
  }
}

fn discard(path: &Path) {
  if let Err(e) = std::fs::remove_file(path) {
    if e.kind() != std::io::ErrorKind::NotFound {
      warn!("无法删除临时文件 {}: {}", path.display(), e);
    }
  }
}

impl ManifestOutput {
  pub fn new(labeled: impl Into<PathBuf>, unlabeled: impl Into<PathBuf>) -> Self {
    ManifestOutput {
      labeled: labeled.into(),
      unlabeled: unlabeled.into(),
    }
  }

  /// 在目录下使用 `labeled.json` / `unlabeled.json`
  pub fn in_dir(dir: &Path) -> Self {
    Self::new(dir.join("labeled.json"), dir.join("unlabeled.json"))
  }

  pub fn labeled(&self) -> &Path {
    &self.labeled
  }

  pub fn unlabeled(&self) -> &Path {
    &self.unlabeled
  }

  pub fn emit(&self, pair: &ManifestPair) -> Result<(), OutputError> {
    ensure_parent(&self.labeled)?;
    ensure_parent(&self.unlabeled)?;

    let labeled_tmp = staging_path(&self.labeled);
    let unlabeled_tmp = staging_path(&self.unlabeled);
    let staged = pair
      .labeled
      .to_path(&labeled_tmp)
      .and_then(|_| pair.unlabeled.to_path(&unlabeled_tmp));
    if let Err(e) = staged {
      discard(&labeled_tmp);
      discard(&unlabeled_tmp);
      return Err(e.into());
    }
    debug!(
      "临时清单已写入: {}, {}",
      labeled_tmp.display(),
      unlabeled_tmp.display()
    );

    for (tmp, target) in [(&labeled_tmp, &self.labeled), (&unlabeled_tmp, &self.unlabeled)] {
      if let Err(source) = std::fs::rename(tmp, target) {
        discard(&labeled_tmp);
        discard(&unlabeled_tmp);
        return Err(OutputError::Io {
          path: target.clone(),
          source,
        });
      }
    }

    info!(
      "清单已输出: 已标注 {} 张 -> {}, 未标注 {} 张 -> {}",
      pair.labeled.len(),
      self.labeled.display(),
      pair.unlabeled.len(),
      self.unlabeled.display()
    );
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn oracle() -> OracleIndex {
    let manifest: CocoManifest = serde_json::from_value(json!({
      "images": [
        {"id": 1, "width": 10, "height": 10, "file_name": "a.png", "scene": "lab"},
        {"id": 2, "width": 10, "height": 10, "file_name": "b.png"},
        {"id": 3, "width": 10, "height": 10, "file_name": "c.png"},
        {"id": 4, "width": 10, "height": 10, "file_name": "d.png"}
      ],
      "annotations": [
        {"id": 1, "image_id": 1, "category_id": 1, "bbox": [0, 0, 2, 2]},
        {"id": 2, "image_id": 3, "category_id": 1, "bbox": [1, 1, 2, 2]}
      ],
      "categories": [{"id": 1, "name": "puncta"}]
    }))
    .unwrap();
    OracleIndex::from_manifest(manifest, Path::new("oracle.json")).unwrap()
  }

  fn last_labeled(oracle: &OracleIndex) -> CocoManifest {
    let entry = oracle.get(1).unwrap();
    let mut manifest = CocoManifest::with_categories(oracle.categories().to_vec());
    manifest.images.push(entry.image.clone());
    manifest.annotations.extend(entry.annotations.iter().cloned());
    manifest
  }

  #[test]
  fn annotations_follow_the_mode() {
    let oracle = oracle();
    let last = last_labeled(&oracle);
    let acquisition = Acquisition {
      sampled: vec![3],
      rest: vec![2, 4],
    };

    let withheld = ManifestPair::build(&oracle, &last, &acquisition, Annotate::Withheld).unwrap();
    assert_eq!(withheld.labeled_ids(), vec![1, 3]);
    assert_eq!(withheld.labeled.annotations.len(), 1);
    assert_eq!(withheld.unlabeled_ids(), vec![2, 4]);
    assert!(withheld.unlabeled.annotations.is_empty());

    let annotated =
      ManifestPair::build(&oracle, &last, &acquisition, Annotate::FromOracle).unwrap();
    assert_eq!(annotated.labeled.annotations.len(), 2);
    assert_eq!(annotated.labeled.images[0].extra["scene"], json!("lab"));
  }

  #[test]
  fn broken_partitions_are_rejected() {
    let oracle = oracle();
    let last = last_labeled(&oracle);

    let overlap = Acquisition {
      sampled: vec![1],
      rest: vec![2, 3, 4],
    };
    assert!(matches!(
      ManifestPair::build(&oracle, &last, &overlap, Annotate::Withheld),
      Err(OutputError::Overlap(1))
    ));

    let missing = Acquisition {
      sampled: vec![2],
      rest: vec![3],
    };
    assert!(matches!(
      ManifestPair::build(&oracle, &last, &missing, Annotate::Withheld),
      Err(OutputError::PoolSizeMismatch { pool: 4, .. })
    ));

    let unknown = Acquisition {
      sampled: vec![9],
      rest: vec![2, 3, 4],
    };
    assert!(matches!(
      ManifestPair::build(&oracle, &last, &unknown, Annotate::Withheld),
      Err(OutputError::UnknownImage(9))
    ));
  }

  #[test]
  fn emit_replaces_both_files_and_leaves_no_staging() {
    let oracle = oracle();
    let dir = tempfile::tempdir().unwrap();
    let output = ManifestOutput::in_dir(&dir.path().join("round1"));
    let pair = ManifestPair::build(
      &oracle,
      &last_labeled(&oracle),
      &Acquisition {
        sampled: vec![2],
        rest: vec![3, 4],
      },
      Annotate::FromOracle,
    )
    .unwrap();

    output.emit(&pair).unwrap();
    let labeled = CocoManifest::from_path(output.labeled()).unwrap();
    let unlabeled = CocoManifest::from_path(output.unlabeled()).unwrap();
    assert_eq!(labeled, pair.labeled);
    assert_eq!(unlabeled, pair.unlabeled);
    assert!(!staging_path(output.labeled()).exists());
    assert!(!staging_path(output.unlabeled()).exists());
  }

  #[test]
  fn failed_emit_keeps_previous_files() {
    let oracle = oracle();
    let dir = tempfile::tempdir().unwrap();
    let labeled_path = dir.path().join("labeled.json");
    std::fs::write(&labeled_path, "previous").unwrap();
    // 目标是目录，临时文件无法创建
    let blocked = dir.path().join("blocked");
    std::fs::create_dir_all(staging_path(&blocked)).unwrap();
    let output = ManifestOutput::new(&labeled_path, &blocked);

    let pair = ManifestPair::build(
      &oracle,
      &last_labeled(&oracle),
      &Acquisition {
        sampled: vec![],
        rest: vec![2, 3, 4],
      },
      Annotate::Withheld,
    )
    .unwrap();
    assert!(output.emit(&pair).is_err());
    assert_eq!(std::fs::read_to_string(&labeled_path).unwrap(), "previous");
    assert!(!staging_path(&labeled_path).exists());
  }
}

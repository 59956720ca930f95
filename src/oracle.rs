// 该文件是 Shanan （山南西风） 项目的一部分。
// src/oracle.rs - Oracle 标注索引
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

//! Oracle 即完整标注的数据集，用于模拟人工标注者。
//!
//! 索引在构造时一次性加载，之后只读。图像的遍历顺序与 Oracle 文件中
//! `images` 的顺序一致，排序时的并列项依赖这一顺序。

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::coco::{Annotation, Category, CategoryId, CocoManifest, ImageId, ImageInfo, ManifestError};

#[derive(Error, Debug)]
pub enum OracleError {
  #[error("Oracle 清单读取失败: {0}")]
  Manifest(#[from] ManifestError),
  #[error("Oracle 中图像 ID 重复: {0}")]
  DuplicateImage(ImageId),
  #[error("Oracle 中没有任何图像")]
  Empty,
}

#[derive(Debug, Clone)]
pub struct OracleEntry {
  pub image: ImageInfo,
  pub annotations: Vec<Annotation>,
}

#[derive(Debug)]
pub struct OracleIndex {
  path: PathBuf,
  entries: Vec<OracleEntry>,
  positions: HashMap<ImageId, usize>,
  categories: Vec<Category>,
  class_name2id: HashMap<String, CategoryId>,
  class_id2name: HashMap<CategoryId, String>,
}

impl OracleIndex {
  pub fn from_path(path: &Path) -> Result<Self, OracleError> {
    let manifest = CocoManifest::from_path(path)?;
    Self::from_manifest(manifest, path)
  }

  pub fn from_manifest(manifest: CocoManifest, path: &Path) -> Result<Self, OracleError> {
    if manifest.images.is_empty() {
      return Err(OracleError::Empty);
    }

    let mut entries = Vec::with_capacity(manifest.images.len());
    let mut positions = HashMap::with_capacity(manifest.images.len());
    for image in manifest.images {
      if positions.insert(image.id, entries.len()).is_some() {
        return Err(OracleError::DuplicateImage(image.id));
      }
      entries.push(OracleEntry {
        image,
        annotations: Vec::new(),
      });
    }

    let mut orphans = 0usize;
    for annotation in manifest.annotations {
      match positions.get(&annotation.image_id) {
        Some(&pos) => entries[pos].annotations.push(annotation),
        None => orphans += 1,
      }
    }
    if orphans > 0 {
      warn!("Oracle 中有 {} 个标注指向不存在的图像，已忽略", orphans);
    }

    let class_name2id = manifest
      .categories
      .iter()
      .map(|c| (c.name.clone(), c.id))
      .collect();
    let class_id2name = manifest
      .categories
      .iter()
      .map(|c| (c.id, c.name.clone()))
      .collect();

    Ok(OracleIndex {
      path: path.to_path_buf(),
      entries,
      positions,
      categories: manifest.categories,
      class_name2id,
      class_id2name,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn image_pool_size(&self) -> usize {
    self.entries.len()
  }

  pub fn get(&self, image_id: ImageId) -> Option<&OracleEntry> {
    self.positions.get(&image_id).map(|&pos| &self.entries[pos])
  }

  pub fn contains(&self, image_id: ImageId) -> bool {
    self.positions.contains_key(&image_id)
  }

  pub fn iter(&self) -> impl Iterator<Item = &OracleEntry> {
    self.entries.iter()
  }

  pub fn image_ids(&self) -> impl Iterator<Item = ImageId> + '_ {
    self.entries.iter().map(|entry| entry.image.id)
  }

  /// 按 Oracle 顺序返回不在 `labeled` 中的图像 ID
  pub fn unlabeled_ids(&self, labeled: &HashSet<ImageId>) -> Vec<ImageId> {
    self
      .image_ids()
      .filter(|id| !labeled.contains(id))
      .collect()
  }

  pub fn categories(&self) -> &[Category] {
    &self.categories
  }

  pub fn class_id(&self, name: &str) -> Option<CategoryId> {
    self.class_name2id.get(name).copied()
  }

  pub fn class_name(&self, id: CategoryId) -> Option<&str> {
    self.class_id2name.get(&id).map(String::as_str)
  }

  /// 检查 `[x, y, w, h]` 形式的检测框是否落在图像像素范围内
  pub fn is_box_valid(bbox: &[f64; 4], width: u32, height: u32) -> bool {
    let [x, y, w, h] = *bbox;
    if !bbox.iter().all(|v| v.is_finite()) {
      return false;
    }
    x >= 0.0 && y >= 0.0 && w > 0.0 && h > 0.0 && x + w <= width as f64 && y + h <= height as f64
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn manifest() -> CocoManifest {
    serde_json::from_value(json!({
      "images": [
        {"id": 3, "width": 100, "height": 50, "file_name": "c.png"},
        {"id": 1, "width": 100, "height": 50, "file_name": "a.png"},
        {"id": 2, "width": 100, "height": 50, "file_name": "b.png"}
      ],
      "annotations": [
        {"id": 10, "image_id": 1, "category_id": 1, "bbox": [0, 0, 5, 5]},
        {"id": 11, "image_id": 9, "category_id": 1, "bbox": [0, 0, 5, 5]}
      ],
      "categories": [{"id": 1, "name": "puncta"}]
    }))
    .unwrap()
  }

  #[test]
  fn keeps_file_order_and_attaches_annotations() {
    let oracle = OracleIndex::from_manifest(manifest(), Path::new("oracle.json")).unwrap();
    assert_eq!(oracle.image_ids().collect::<Vec<_>>(), vec![3, 1, 2]);
    assert_eq!(oracle.get(1).unwrap().annotations.len(), 1);
    assert_eq!(oracle.class_id("puncta"), Some(1));
    assert_eq!(oracle.class_name(1), Some("puncta"));

    let labeled = HashSet::from([1]);
    assert_eq!(oracle.unlabeled_ids(&labeled), vec![3, 2]);
  }

  #[test]
  fn duplicate_image_ids_are_rejected() {
    let mut manifest = manifest();
    manifest.images.push(manifest.images[0].clone());
    assert!(matches!(
      OracleIndex::from_manifest(manifest, Path::new("oracle.json")),
      Err(OracleError::DuplicateImage(3))
    ));
  }

  #[test]
  fn box_validity_follows_image_bounds() {
    assert!(OracleIndex::is_box_valid(&[0.0, 0.0, 100.0, 50.0], 100, 50));
    assert!(!OracleIndex::is_box_valid(&[-1.0, 0.0, 10.0, 10.0], 100, 50));
    assert!(!OracleIndex::is_box_valid(&[95.0, 0.0, 10.0, 10.0], 100, 50));
    assert!(!OracleIndex::is_box_valid(&[0.0, 45.0, 10.0, 10.0], 100, 50));
    assert!(!OracleIndex::is_box_valid(&[0.0, 0.0, 0.0, 10.0], 100, 50));
    assert!(!OracleIndex::is_box_valid(&[f64::NAN, 0.0, 1.0, 1.0], 100, 50));
  }
}

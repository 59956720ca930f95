// 该文件是 Shanan （山南西风） 项目的一部分。
// src/coco.rs - COCO 格式标注清单
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
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub type ImageId = u64;
pub type CategoryId = u64;

#[derive(Error, Debug)]
pub enum ManifestError {
  #[error("无法访问清单文件 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("清单文件 {path} 格式错误: {source}")]
  Json {
    path: PathBuf,
    source: serde_json::Error,
  },
}

/// 图像元数据
///
/// 未识别的字段保存在 `extra` 中，写回时原样输出。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
  pub id: ImageId,
  pub width: u32,
  pub height: u32,
  pub file_name: String,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
  pub id: u64,
  pub image_id: ImageId,
  pub category_id: CategoryId,
  pub bbox: [f64; 4], // [x, y, w, h]
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
  pub id: CategoryId,
  pub name: String,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// COCO 风格的标注清单：`{images, annotations, categories}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CocoManifest {
  #[serde(default)]
  pub images: Vec<ImageInfo>,
  #[serde(default)]
  pub annotations: Vec<Annotation>,
  #[serde(default)]
  pub categories: Vec<Category>,
}

impl CocoManifest {
  pub fn with_categories(categories: Vec<Category>) -> Self {
    CocoManifest {
      images: Vec::new(),
      annotations: Vec::new(),
      categories,
    }
  }

  pub fn from_path(path: &Path) -> Result<Self, ManifestError> {
    let file = File::open(path).map_err(|source| ManifestError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| ManifestError::Json {
      path: path.to_path_buf(),
      source,
    })
  }

  pub fn to_path(&self, path: &Path) -> Result<(), ManifestError> {
    let io_err = |source| ManifestError::Io {
      path: path.to_path_buf(),
      source,
    };
    let file = File::create(path).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, self).map_err(|source| ManifestError::Json {
      path: path.to_path_buf(),
      source,
    })?;
    writer.flush().map_err(io_err)
  }

  pub fn image_ids(&self) -> Vec<ImageId> {
    self.images.iter().map(|image| image.id).collect()
  }

  pub fn is_empty(&self) -> bool {
    self.images.is_empty()
  }

  pub fn len(&self) -> usize {
    self.images.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unknown_fields_survive_a_round_trip() {
    let raw = r#"{
      "images": [{"id": 7, "width": 64, "height": 48, "file_name": "a.png", "license": 3}],
      "annotations": [{"id": 1, "image_id": 7, "category_id": 1, "bbox": [1, 2, 3, 4], "area": 12, "iscrowd": 0}],
      "categories": [{"id": 1, "name": "puncta", "supercategory": "cell"}]
    }"#;
    let manifest: CocoManifest = serde_json::from_str(raw).unwrap();
    assert_eq!(manifest.images[0].extra["license"], 3);
    assert_eq!(manifest.annotations[0].extra["area"], 12);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("manifest.json");
    manifest.to_path(&path).unwrap();
    let reread = CocoManifest::from_path(&path).unwrap();
    assert_eq!(reread, manifest);
  }

  #[test]
  fn missing_sections_default_to_empty() {
    let manifest: CocoManifest = serde_json::from_str(r#"{"images": []}"#).unwrap();
    assert!(manifest.annotations.is_empty());
    assert!(manifest.categories.is_empty());
  }

  #[test]
  fn malformed_file_is_reported_with_its_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{\"images\": [").unwrap();
    match CocoManifest::from_path(&path) {
      Err(ManifestError::Json { path: p, .. }) => assert_eq!(p, path),
      other => panic!("unexpected result: {other:?}"),
    }
  }
}

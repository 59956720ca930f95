// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 检测结果与检测器接口
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
use thiserror::Error;

use crate::coco::{CategoryId, ImageId, ImageInfo};
use crate::oracle::OracleIndex;

#[derive(Error, Debug)]
pub enum DetectionError {
  #[error("无法访问检测结果文件 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("检测结果文件 {path} 格式错误: {source}")]
  Json {
    path: PathBuf,
    source: serde_json::Error,
  },
  #[error("检测结果引用了 Oracle 中不存在的图像: {0}")]
  UnknownImage(ImageId),
}

/// 单个检测框，框格式为 `[x, y, w, h]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectItem {
  pub image_id: ImageId,
  pub bbox: [f64; 4],
  pub score: f64,
  pub category_id: CategoryId,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cls_uncertainty: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub box_uncertainty: Option<f64>,
}

/// 参与打分的不确定度来源
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum UncertaintyKind {
  /// 分类不确定度
  #[default]
  Cls,
  /// 边框回归不确定度
  Box,
  /// 两者之和
  Sum,
}

impl DetectItem {
  pub fn uncertainty(&self, kind: UncertaintyKind) -> Option<f64> {
    match kind {
      UncertaintyKind::Cls => self.cls_uncertainty,
      UncertaintyKind::Box => self.box_uncertainty,
      UncertaintyKind::Sum => Some(self.cls_uncertainty? + self.box_uncertainty?),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    DetectResult {
      items: items.into_boxed_slice(),
    }
  }
}

impl DetectResult {
  /// 读取推理阶段输出的检测结果数组，格式错误直接失败
  pub fn from_path(path: &Path) -> Result<Self, DetectionError> {
    let file = File::open(path).map_err(|source| DetectionError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let items: Vec<DetectItem> =
      serde_json::from_reader(BufReader::new(file)).map_err(|source| DetectionError::Json {
        path: path.to_path_buf(),
        source,
      })?;
    Ok(items.into())
  }

  pub fn to_path(&self, path: &Path) -> Result<(), DetectionError> {
    let io_err = |source| DetectionError::Io {
      path: path.to_path_buf(),
      source,
    };
    let mut writer = BufWriter::new(File::create(path).map_err(io_err)?);
    serde_json::to_writer(&mut writer, &self.items).map_err(|source| DetectionError::Json {
      path: path.to_path_buf(),
      source,
    })?;
    writer.flush().map_err(io_err)
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &DetectItem> {
    self.items.iter()
  }

  /// 丢弃越界检测框和低于 `score_thr` 的检测，对已过滤的结果再次调用结果不变
  pub fn filter(&self, oracle: &OracleIndex, score_thr: f64) -> Result<DetectResult, DetectionError> {
    let mut kept = Vec::with_capacity(self.items.len());
    for item in self.items.iter() {
      let entry = oracle
        .get(item.image_id)
        .ok_or(DetectionError::UnknownImage(item.image_id))?;
      if !OracleIndex::is_box_valid(&item.bbox, entry.image.width, entry.image.height) {
        continue;
      }
      if item.score < score_thr {
        continue;
      }
      kept.push(item.clone());
    }
    Ok(kept.into())
  }
}

/// 检测器接口：给定一批图像，返回每张图像的检测列表
///
/// 采样逻辑只依赖这个接口，不接触模型内部。
pub trait Detector {
  type Error;

  fn detect(&self, images: &[ImageInfo]) -> Result<Vec<Vec<DetectItem>>, Self::Error>;
}

/// 以 `batch_size` 为单位逐批推理，汇总为一份检测结果
pub fn infer_results<D: Detector>(
  detector: &D,
  images: &[ImageInfo],
  batch_size: usize,
) -> Result<DetectResult, D::Error> {
  let mut items = Vec::new();
  for batch in images.chunks(batch_size.max(1)) {
    for per_image in detector.detect(batch)? {
      items.extend(per_image);
    }
  }
  Ok(items.into())
}

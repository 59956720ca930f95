// 该文件是 Shanan （山南西风） 项目的一部分。
// src/sampler.rs - 主动学习采样器
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

use thiserror::Error;

use crate::{
  coco::{ImageId, ManifestError},
  input::DistanceError,
  model::DetectionError,
  output::OutputError,
};

mod base;
mod class_weight;
mod dcus;
mod diversity;
pub mod kmedoids;
mod registry;

pub use self::base::{LabeledSet, SamplerBase};
pub use self::class_weight::{
  CategoryStats, ClassWeightMode, ClassWeighting, DifficultyCalibrated, FixedWeight,
};
pub use self::dcus::{DEFAULT_SCORE_THR, DcusSampler, ImageScore};
pub use self::diversity::DiversitySampler;
pub use self::registry::{
  DCUS_SAMPLER, DIVERSITY_SAMPLER, RegistryError, SamplerBuilder, SamplerRegistry, SamplerWrapper,
};

#[derive(Error, Debug)]
pub enum SamplerError {
  #[error("标注清单错误: {0}")]
  Manifest(#[from] ManifestError),
  #[error("检测结果错误: {0}")]
  Detection(#[from] DetectionError),
  #[error("距离矩阵错误: {0}")]
  Distance(#[from] DistanceError),
  #[error("清单输出错误: {0}")]
  Output(#[from] OutputError),
  #[error("已标注图像 {0} 不在 Oracle 图像池中")]
  UnknownLabeledImage(ImageId),
  #[error("已标注清单中图像 ID 重复: {0}")]
  DuplicateLabeled(ImageId),
  #[error("轮次不能回退: 当前 {current}, 请求 {requested}")]
  RoundRegression { current: u32, requested: u32 },
  #[error("参数无效: {0}")]
  InvalidParameter(String),
}

/// 一次采集的结果：新采样的图像与剩余未标注图像，两者不相交
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acquisition {
  pub sampled: Vec<ImageId>,
  pub rest: Vec<ImageId>,
}

impl Acquisition {
  pub fn len(&self) -> usize {
    self.sampled.len() + self.rest.len()
  }

  pub fn is_empty(&self) -> bool {
    self.sampled.is_empty() && self.rest.is_empty()
  }
}

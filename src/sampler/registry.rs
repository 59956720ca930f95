// 该文件是 Shanan （山南西风） 项目的一部分。
// src/sampler/registry.rs - 采样器注册表
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
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::{
  config::SamplerSection,
  oracle::OracleIndex,
  sampler::{
    ClassWeightMode, DcusSampler, DifficultyCalibrated, DiversitySampler, FixedWeight,
    SamplerBase, SamplerError,
  },
};

pub const DCUS_SAMPLER: &str = "DCUSSampler";
pub const DIVERSITY_SAMPLER: &str = "DiversitySampler";

#[derive(Error, Debug)]
pub enum RegistryError {
  #[error("未注册的采样器类型: {0}")]
  UnknownType(String),
  #[error("采样器类型重复注册: {0}")]
  Duplicate(String),
  #[error("采样器 {kind} 缺少参数 {field}")]
  MissingField { kind: String, field: &'static str },
  #[error("采样器类型不符: 期望 {expected}, 实际 {found}")]
  WrongKind {
    expected: &'static str,
    found: &'static str,
  },
  #[error("采样器构造失败: {0}")]
  Sampler(#[from] SamplerError),
}

#[derive(Debug)]
pub enum SamplerWrapper {
  Dcus(DcusSampler),
  Diversity(DiversitySampler),
}

impl SamplerWrapper {
  pub fn name(&self) -> &'static str {
    match self {
      SamplerWrapper::Dcus(_) => DCUS_SAMPLER,
      SamplerWrapper::Diversity(_) => DIVERSITY_SAMPLER,
    }
  }

  pub fn base(&self) -> &SamplerBase {
    match self {
      SamplerWrapper::Dcus(sampler) => sampler.base(),
      SamplerWrapper::Diversity(sampler) => sampler.base(),
    }
  }

  pub fn into_dcus(self) -> Result<DcusSampler, RegistryError> {
    match self {
      SamplerWrapper::Dcus(sampler) => Ok(sampler),
      other => Err(RegistryError::WrongKind {
        expected: DCUS_SAMPLER,
        found: other.name(),
      }),
    }
  }

  pub fn into_diversity(self) -> Result<DiversitySampler, RegistryError> {
    match self {
      SamplerWrapper::Diversity(sampler) => Ok(sampler),
      other => Err(RegistryError::WrongKind {
        expected: DIVERSITY_SAMPLER,
        found: other.name(),
      }),
    }
  }
}

pub type SamplerBuilder = fn(&SamplerSection, Arc<OracleIndex>) -> Result<SamplerWrapper, RegistryError>;

fn sample_size(section: &SamplerSection) -> Result<usize, RegistryError> {
  section
    .n_sample_images
    .ok_or_else(|| RegistryError::MissingField {
      kind: section.kind.clone(),
      field: "n_sample_images",
    })
}

fn build_dcus(
  section: &SamplerSection,
  oracle: Arc<OracleIndex>,
) -> Result<SamplerWrapper, RegistryError> {
  let n_images = sample_size(section)?;
  let weighting: Box<dyn crate::sampler::ClassWeighting> = match section.class_weight {
    ClassWeightMode::Fixed => Box::new(FixedWeight::default()),
    ClassWeightMode::Calibrated => {
      let mut calibrated =
        DifficultyCalibrated::new(section.class_weight_ub, section.class_weight_alpha)?;
      for (name, quality) in &section.class_quality {
        match oracle.class_id(name) {
          Some(id) => calibrated = calibrated.with_quality(id, *quality),
          None => warn!("类别 {} 不在 Oracle 中，忽略其质量配置", name),
        }
      }
      Box::new(calibrated)
    }
  };
  let base = SamplerBase::new(n_images, oracle, section.dataset_type.as_str());
  let sampler = DcusSampler::new(base, section.score_thr)
    .with_weighting(weighting)
    .with_uncertainty(section.uncertainty);
  Ok(SamplerWrapper::Dcus(sampler))
}

fn build_diversity(
  section: &SamplerSection,
  oracle: Arc<OracleIndex>,
) -> Result<SamplerWrapper, RegistryError> {
  let n_images = sample_size(section)?;
  let base = SamplerBase::new(n_images, oracle, section.dataset_type.as_str());
  let sampler = DiversitySampler::new(base).with_iterations(section.max_iters, section.tolerance);
  Ok(SamplerWrapper::Diversity(sampler))
}

/// 按配置中的 `type` 字符串构造采样器，在程序入口创建后按引用传递
#[derive(Debug, Clone, Default)]
pub struct SamplerRegistry {
  builders: BTreeMap<&'static str, SamplerBuilder>,
}

impl SamplerRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_defaults() -> Self {
    let mut registry = Self::new();
    registry.builders.insert(DCUS_SAMPLER, build_dcus);
    registry.builders.insert(DIVERSITY_SAMPLER, build_diversity);
    registry
  }

  pub fn register(&mut self, kind: &'static str, builder: SamplerBuilder) -> Result<(), RegistryError> {
    if self.builders.contains_key(kind) {
      return Err(RegistryError::Duplicate(kind.to_string()));
    }
    self.builders.insert(kind, builder);
    Ok(())
  }

  pub fn build(
    &self,
    section: &SamplerSection,
    oracle: Arc<OracleIndex>,
  ) -> Result<SamplerWrapper, RegistryError> {
    let builder = self
      .builders
      .get(section.kind.as_str())
      .ok_or_else(|| RegistryError::UnknownType(section.kind.clone()))?;
    info!("构造采样器: {}", section.kind);
    builder(section, oracle)
  }

  pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
    self.builders.keys().copied()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::coco::CocoManifest;
  use serde_json::json;
  use std::path::Path;

  fn oracle() -> Arc<OracleIndex> {
    let manifest: CocoManifest = serde_json::from_value(json!({
      "images": [{"id": 1, "width": 10, "height": 10, "file_name": "a.png"}],
      "categories": [{"id": 1, "name": "puncta"}]
    }))
    .unwrap();
    Arc::new(OracleIndex::from_manifest(manifest, Path::new("oracle.json")).unwrap())
  }

  #[test]
  fn builds_by_type_name() {
    let registry = SamplerRegistry::with_defaults();
    assert_eq!(
      registry.names().collect::<Vec<_>>(),
      vec![DCUS_SAMPLER, DIVERSITY_SAMPLER]
    );

    let mut section = SamplerSection::new(DCUS_SAMPLER, 3);
    section.class_weight = ClassWeightMode::Calibrated;
    section.class_quality.insert("puncta".to_string(), 0.5);
    let dcus = registry.build(&section, oracle()).unwrap();
    assert_eq!(dcus.name(), DCUS_SAMPLER);
    assert_eq!(dcus.base().n_images(), 3);
    assert!(dcus.into_diversity().is_err());

    let diversity = registry
      .build(&SamplerSection::new(DIVERSITY_SAMPLER, 2), oracle())
      .unwrap();
    assert_eq!(diversity.into_diversity().unwrap().base().n_images(), 2);
  }

  #[test]
  fn unknown_and_incomplete_sections_fail() {
    let registry = SamplerRegistry::with_defaults();
    assert!(matches!(
      registry.build(&SamplerSection::new("RandomSampler", 1), oracle()),
      Err(RegistryError::UnknownType(_))
    ));

    let mut section = SamplerSection::new(DIVERSITY_SAMPLER, 1);
    section.n_sample_images = None;
    assert!(matches!(
      registry.build(&section, oracle()),
      Err(RegistryError::MissingField {
        field: "n_sample_images",
        ..
      })
    ));
  }

  #[test]
  fn duplicate_registration_is_rejected() {
    let mut registry = SamplerRegistry::with_defaults();
    assert!(matches!(
      registry.register(DCUS_SAMPLER, build_diversity),
      Err(RegistryError::Duplicate(_))
    ));
    assert!(registry.register("PlainDiversity", build_diversity).is_ok());
  }
}

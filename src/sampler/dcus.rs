// 该文件是 Shanan （山南西风） 项目的一部分。
// src/sampler/dcus.rs - 难度校准不确定度采样器
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

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::{
  coco::ImageId,
  model::{DetectResult, UncertaintyKind},
  output::{Annotate, ManifestOutput, ManifestPair},
  sampler::{
    Acquisition, CategoryStats, ClassWeighting, FixedWeight, SamplerBase, SamplerError,
  },
};

pub const DEFAULT_SCORE_THR: f64 = 0.1;

const PER_ROUND: &str = "每轮不确定度池大小";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageScore {
  pub image_id: ImageId,
  pub uncertainty: f64,
}

#[derive(Debug)]
pub struct DcusSampler {
  base: SamplerBase,
  score_thr: f64,
  uncertainty: UncertaintyKind,
  weighting: Box<dyn ClassWeighting>,
}

impl DcusSampler {
  pub fn new(base: SamplerBase, score_thr: f64) -> Self {
    let sampler = DcusSampler {
      base,
      score_thr,
      uncertainty: UncertaintyKind::default(),
      weighting: Box::new(FixedWeight::default()),
    };
    sampler.base.log_init_info("DcusSampler", PER_ROUND);
    info!(">>>> 分数阈值: {}", sampler.score_thr);
    sampler
  }

  pub fn with_weighting(mut self, weighting: Box<dyn ClassWeighting>) -> Self {
    debug!("类别权重策略: {:?}", weighting);
    self.weighting = weighting;
    self
  }

  pub fn with_uncertainty(mut self, uncertainty: UncertaintyKind) -> Self {
    self.uncertainty = uncertainty;
    self
  }

  pub fn base(&self) -> &SamplerBase {
    &self.base
  }

  pub fn base_mut(&mut self) -> &mut SamplerBase {
    &mut self.base
  }

  pub fn score_thr(&self) -> f64 {
    self.score_thr
  }

  /// 对每张未标注图像累加 `不确定度 × 类别权重`，按 Oracle 顺序返回
  pub fn score(
    &self,
    results: &DetectResult,
    labeled: &HashSet<ImageId>,
  ) -> Result<Vec<ImageScore>, SamplerError> {
    let oracle = self.base.oracle();
    let filtered = results.filter(oracle, self.score_thr)?;
    debug!(
      "检测结果 {} 条, 通过过滤 {} 条",
      results.len(),
      filtered.len()
    );

    let mut usable = Vec::with_capacity(filtered.len());
    let mut missing = 0usize;
    let mut stats = CategoryStats::default();
    for item in filtered.iter() {
      match item.uncertainty(self.uncertainty) {
        Some(u) => {
          stats.record(item.category_id, u);
          usable.push((item, u));
        }
        None => missing += 1,
      }
    }
    if missing > 0 {
      warn!(
        "{} 条检测缺少 {:?} 不确定度，已跳过",
        missing, self.uncertainty
      );
    }

    let weights = self.weighting.class_weights(oracle, &stats);

    let mut scores: Vec<ImageScore> = oracle
      .unlabeled_ids(labeled)
      .into_iter()
      .map(|image_id| ImageScore {
        image_id,
        uncertainty: 0.0,
      })
      .collect();
    let positions: HashMap<ImageId, usize> = scores
      .iter()
      .enumerate()
      .map(|(i, s)| (s.image_id, i))
      .collect();

    let mut unknown_labels: BTreeMap<u64, usize> = BTreeMap::new();
    let mut on_labeled = 0usize;
    for (item, u) in usable {
      let Some(weight) = weights.get(&item.category_id) else {
        *unknown_labels.entry(item.category_id).or_default() += 1;
        continue;
      };
      match positions.get(&item.image_id) {
        Some(&pos) => scores[pos].uncertainty += u * weight,
        None => on_labeled += 1,
      }
    }
    for (label, count) in unknown_labels {
      warn!("类别 {} 不在类别权重中，跳过 {} 条检测", label, count);
    }
    if on_labeled > 0 {
      debug!("{} 条检测属于已标注图像，已忽略", on_labeled);
    }

    Ok(scores)
  }

  /// 按不确定度降序稳定排序取前 `n_images` 张；并列时保持 Oracle 顺序
  pub fn select(&self, scores: &[ImageScore]) -> Acquisition {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].uncertainty.total_cmp(&scores[a].uncertainty));
    order.truncate(self.base.n_images());

    let chosen: HashSet<usize> = order.iter().copied().collect();
    let sampled = order.iter().map(|&i| scores[i].image_id).collect();
    let rest = scores
      .iter()
      .enumerate()
      .filter(|(i, _)| !chosen.contains(i))
      .map(|(_, s)| s.image_id)
      .collect();

    Acquisition { sampled, rest }
  }

  pub fn al_acquisition(
    &self,
    result_path: &Path,
    labeled: &HashSet<ImageId>,
  ) -> Result<Acquisition, SamplerError> {
    let results = DetectResult::from_path(result_path)?;
    let scores = self.score(&results, labeled)?;
    Ok(self.select(&scores))
  }

  /// 独立运行一轮不确定度采样：新采样图像并入已标注清单（暂不带标注）
  pub fn al_round(
    &mut self,
    result_path: &Path,
    last_label_path: &Path,
    output: &ManifestOutput,
  ) -> Result<Acquisition, SamplerError> {
    info!(">> 开始不确定度采样");
    self.base.start_round();
    self.log_info(result_path, output);
    self.base.set_latest_labeled(last_label_path);

    let last = self.base.load_labeled(last_label_path)?;
    let acquisition = self.al_acquisition(result_path, &last.ids)?;
    self
      .base
      .log_partition(last.ids.len(), acquisition.sampled.len(), "新的不确定度池");

    let pair = ManifestPair::build(
      self.base.oracle(),
      &last.manifest,
      &acquisition,
      Annotate::Withheld,
    )?;
    output.emit(&pair)?;
    self.base.set_latest_labeled(output.labeled());
    info!(">> 不确定度采样完成");
    Ok(acquisition)
  }

  fn log_info(&self, result_path: &Path, output: &ManifestOutput) {
    self.base.log_round_info(PER_ROUND);
    info!(">>>> 未标注推理结果路径: {}", result_path.display());
    info!(">>>> 不确定度池清单路径: {}", output.labeled().display());
    info!(">>>> 分数阈值: {}", self.score_thr);
  }
}

// 该文件是 Shanan （山南西风） 项目的一部分。
// src/sampler/diversity.rs - 多样性采样器
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
use std::path::Path;

use rand::Rng;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl,
  coco::ImageId,
  input::{DistanceCache, DistanceInput},
  output::{Annotate, ManifestOutput, ManifestPair},
  sampler::{
    Acquisition, SamplerBase, SamplerError,
    kmedoids::{self, Clustering, KMEANS_MAX_ITERS, KMEANS_TOLERANCE},
  },
};

const PER_ROUND: &str = "每轮采样图像数";

#[derive(Debug)]
pub struct DiversitySampler {
  base: SamplerBase,
  max_iters: usize,
  tolerance: f64,
}

impl DiversitySampler {
  pub fn new(base: SamplerBase) -> Self {
    let sampler = DiversitySampler {
      base,
      max_iters: KMEANS_MAX_ITERS,
      tolerance: KMEANS_TOLERANCE,
    };
    sampler.base.log_init_info("DiversitySampler", PER_ROUND);
    sampler
  }

  pub fn with_iterations(mut self, max_iters: usize, tolerance: f64) -> Self {
    self.max_iters = max_iters;
    self.tolerance = tolerance;
    self
  }

  pub fn base(&self) -> &SamplerBase {
    &self.base
  }

  pub fn base_mut(&mut self) -> &mut SamplerBase {
    &mut self.base
  }

  /// 在整个距离矩阵上聚类，簇数为 `n_images`，超过候选数时截断
  pub fn cluster<R: Rng + ?Sized>(&self, cache: &DistanceCache, rng: &mut R) -> Clustering {
    let mut k = self.base.n_images();
    if k > cache.len() {
      warn!(
        "采样数 {} 大于候选图像数 {}，按候选数聚类",
        k,
        cache.len()
      );
      k = cache.len();
    }
    kmedoids::kmedoids(cache.distances(), k, rng, self.max_iters, self.tolerance)
  }

  /// 取簇中心对应的图像，与仍未标注的图像求交；已标注的中心被丢弃
  pub fn select(
    &self,
    cache: &DistanceCache,
    clustering: &Clustering,
    labeled: &HashSet<ImageId>,
  ) -> Acquisition {
    let unlabeled = self.base.oracle().unlabeled_ids(labeled);
    let candidates: HashSet<ImageId> = unlabeled.iter().copied().collect();

    let mut sampled = Vec::with_capacity(clustering.centroids.len());
    let mut seen = HashSet::with_capacity(clustering.centroids.len());
    for &centroid in &clustering.centroids {
      let image_id = cache.image_id(centroid);
      if !seen.insert(image_id) {
        continue;
      }
      if candidates.contains(&image_id) {
        sampled.push(image_id);
      } else {
        warn!("簇中心图像 {} 不在未标注候选集中，已丢弃", image_id);
      }
    }

    let taken: HashSet<ImageId> = sampled.iter().copied().collect();
    let rest = unlabeled
      .into_iter()
      .filter(|id| !taken.contains(id))
      .collect();

    Acquisition { sampled, rest }
  }

  pub fn al_acquisition<R: Rng + ?Sized>(
    &self,
    cache: &DistanceCache,
    labeled: &HashSet<ImageId>,
    rng: &mut R,
  ) -> Acquisition {
    let clustering = self.cluster(cache, rng);
    self.select(cache, &clustering, labeled)
  }

  /// 独立运行一轮多样性采样：采样图像连同 Oracle 标注并入已标注清单
  pub fn al_round<R: Rng + ?Sized>(
    &mut self,
    image_dis: &Url,
    last_label_path: &Path,
    output: &ManifestOutput,
    rng: &mut R,
  ) -> Result<Acquisition, SamplerError> {
    info!(">> 开始多样性采样");
    self.base.start_round();
    self.log_info(image_dis, output);
    self.base.set_latest_labeled(last_label_path);

    let cache = DistanceInput::from_url(image_dis)?.into_cache();
    let last = self.base.load_labeled(last_label_path)?;
    let acquisition = self.al_acquisition(&cache, &last.ids, rng);
    self
      .base
      .log_partition(last.ids.len(), acquisition.sampled.len(), "新采样集合");

    let pair = ManifestPair::build(
      self.base.oracle(),
      &last.manifest,
      &acquisition,
      Annotate::FromOracle,
    )?;
    output.emit(&pair)?;
    self.base.set_latest_labeled(output.labeled());
    info!(">> 多样性采样完成");
    Ok(acquisition)
  }

  fn log_info(&self, image_dis: &Url, output: &ManifestOutput) {
    self.base.log_round_info(PER_ROUND);
    info!(">>>> 图像距离缓存: {}", image_dis);
    info!(">>>> 输出标注清单路径: {}", output.labeled().display());
    info!(">>>> 输出未标注清单路径: {}", output.unlabeled().display());
  }
}

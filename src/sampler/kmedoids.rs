// 该文件是 Shanan （山南西风） 项目的一部分。
// src/sampler/kmedoids.rs - 基于距离矩阵的 k 中心点聚类
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

//! 只有距离矩阵、没有坐标，因此簇中心取簇内到其余点距离和最小的样本（medoid）。
//!
//! 所有 argmin/argmax 在并列时取下标最小者。

use ndarray::ArrayView2;
use rand::Rng;
use tracing::{debug, warn};

pub const KMEANS_MAX_ITERS: usize = 200;
pub const KMEANS_TOLERANCE: f64 = 1e-4;

#[derive(Debug, Clone, PartialEq)]
pub struct Clustering {
  /// 簇中心在矩阵中的下标
  pub centroids: Vec<usize>,
  /// 每个样本所属的簇序号
  pub assignment: Vec<usize>,
  /// 每次迭代的总分配代价
  pub costs: Vec<f64>,
  /// 空簇被随机重置的次数
  pub reseeded: usize,
}

/// 随机选取第一个中心，之后依次加入与现有中心最小距离最大的样本
pub fn k_centroid_greedy<R: Rng + ?Sized>(
  dis: ArrayView2<'_, f64>,
  k: usize,
  rng: &mut R,
) -> Vec<usize> {
  let n = dis.nrows();
  if n == 0 || k == 0 {
    return Vec::new();
  }
  let first = rng.random_range(0..n);
  k_centroid_greedy_from(dis, k, first)
}

/// 以 `first` 为第一个中心的最远点贪心初始化，返回 `min(k, n)` 个互不相同的下标。
/// `first` 越界时取最后一个样本。
pub fn k_centroid_greedy_from(dis: ArrayView2<'_, f64>, k: usize, first: usize) -> Vec<usize> {
  let n = dis.nrows();
  let k = k.min(n);
  let mut centroids = Vec::with_capacity(k);
  if k == 0 {
    return centroids;
  }
  let first = if first < n {
    first
  } else {
    warn!("初始中心 {} 越界（样本数 {}），改用 {}", first, n, n - 1);
    n - 1
  };

  let mut chosen = vec![false; n];
  let mut nearest: Vec<f64> = dis.column(first).to_vec();
  chosen[first] = true;
  centroids.push(first);

  while centroids.len() < k {
    let mut best: Option<(usize, f64)> = None;
    for (i, &d) in nearest.iter().enumerate() {
      if chosen[i] {
        continue;
      }
      match best {
        Some((_, best_d)) if d <= best_d => {}
        _ => best = Some((i, d)),
      }
    }
    let Some((next, _)) = best else { break };

    chosen[next] = true;
    centroids.push(next);
    for (i, d) in nearest.iter_mut().enumerate() {
      *d = d.min(dis[[i, next]]);
    }
  }
  centroids
}

/// 把每个样本分配给最近的中心，返回分配结果与总代价
pub fn assign(dis: ArrayView2<'_, f64>, centroids: &[usize]) -> (Vec<usize>, f64) {
  let mut cost = 0.0;
  let assignment = (0..dis.nrows())
    .map(|i| {
      let mut best = 0usize;
      let mut best_d = f64::INFINITY;
      for (c, &centroid) in centroids.iter().enumerate() {
        let d = dis[[i, centroid]];
        if d < best_d {
          best = c;
          best_d = d;
        }
      }
      cost += best_d;
      best
    })
    .collect();
  (assignment, cost)
}

fn medoid(dis: ArrayView2<'_, f64>, members: &[usize]) -> usize {
  let mut best = members[0];
  let mut best_total = f64::INFINITY;
  for &i in members {
    let total: f64 = members.iter().map(|&j| dis[[i, j]]).sum();
    if total < best_total {
      best = i;
      best_total = total;
    }
  }
  best
}

pub fn kmedoids<R: Rng + ?Sized>(
  dis: ArrayView2<'_, f64>,
  k: usize,
  rng: &mut R,
  max_iters: usize,
  tolerance: f64,
) -> Clustering {
  let initial = k_centroid_greedy(dis, k, rng);
  kmedoids_from(dis, initial, rng, max_iters, tolerance)
}

/// 从给定初始中心迭代，直到相邻两次代价之差小于 `tolerance` 或达到 `max_iters`。
/// 越界的初始中心会被丢弃。
pub fn kmedoids_from<R: Rng + ?Sized>(
  dis: ArrayView2<'_, f64>,
  initial: Vec<usize>,
  rng: &mut R,
  max_iters: usize,
  tolerance: f64,
) -> Clustering {
  let n = dis.nrows();
  let mut centroids: Vec<usize> = initial
    .into_iter()
    .filter(|&c| {
      if c >= n {
        warn!("丢弃越界的初始中心 {}（样本数 {}）", c, n);
      }
      c < n
    })
    .collect();
  let k = centroids.len();
  let mut costs = Vec::new();
  let mut reseeded = 0usize;

  if n == 0 || k == 0 {
    return Clustering {
      centroids,
      assignment: vec![0; n],
      costs,
      reseeded,
    };
  }

  let mut converged = None;
  for _ in 0..max_iters {
    let (assignment, cost) = assign(dis, &centroids);
    costs.push(cost);
    if let &[.., prev, last] = costs.as_slice() {
      if (last - prev).abs() < tolerance {
        converged = Some(assignment);
        break;
      }
    }

    let mut members: Vec<Vec<usize>> = vec![Vec::new(); k];
    for (i, &c) in assignment.iter().enumerate() {
      members[c].push(i);
    }
    centroids = members
      .iter()
      .enumerate()
      .map(|(c, cluster)| {
        if cluster.is_empty() {
          let point = rng.random_range(0..n);
          warn!("簇 {} 为空，重新分配到随机样本 {}", c, point);
          reseeded += 1;
          point
        } else {
          medoid(dis, cluster)
        }
      })
      .collect();
  }

  let assignment = match converged {
    Some(assignment) => assignment,
    None => {
      warn!("k-medoids 在 {} 次迭代内未收敛", max_iters);
      assign(dis, &centroids).0
    }
  };
  debug!("k-medoids 迭代 {} 次, 最终代价 {:?}", costs.len(), costs.last());

  Clustering {
    centroids,
    assignment,
    costs,
    reseeded,
  }
}

// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input.rs - 图像距离矩阵输入
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
use std::path::{Component, Path, PathBuf};

use ndarray::{Array2, ArrayView2, Axis};
use thiserror::Error;
use url::Url;

use crate::{FromUrl, coco::ImageId};

mod distance_file;
mod embedding_file;

pub use self::distance_file::{DistanceFileInput, write_distance_file};
pub use self::embedding_file::{EmbeddingFileInput, write_embedding_file};

#[derive(Error, Debug)]
pub enum DistanceError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("URI 解析失败: {0}")]
  InvalidUrl(#[from] url::ParseError),
  #[error("URI 路径解码失败: {0}")]
  PathDecode(#[from] std::string::FromUtf8Error),
  #[error("无法访问距离缓存 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("距离缓存 {path} 格式错误: {source}")]
  Json {
    path: PathBuf,
    source: serde_json::Error,
  },
  #[error("距离矩阵不是方阵: {rows}x{cols}")]
  NotSquare { rows: usize, cols: usize },
  #[error("矩阵维度 {rows} 与图像 ID 数量 {ids} 不一致")]
  LengthMismatch { rows: usize, ids: usize },
  #[error("矩阵第 {0} 行长度不一致")]
  RaggedRow(usize),
  #[error("矩阵在 ({0}, {1}) 处包含非有限值")]
  NonFinite(usize, usize),
  #[error("图像 ID 重复: {0}")]
  DuplicateImage(ImageId),
}

/// 候选图像两两之间的距离矩阵，行列顺序与 `image_ids` 一致
#[derive(Debug, Clone)]
pub struct DistanceCache {
  image_ids: Vec<ImageId>,
  distances: Array2<f64>,
}

impl DistanceCache {
  pub fn new(image_ids: Vec<ImageId>, distances: Array2<f64>) -> Result<Self, DistanceError> {
    let (rows, cols) = distances.dim();
    if rows != cols {
      return Err(DistanceError::NotSquare { rows, cols });
    }
    check_ids(&image_ids, rows)?;
    check_finite(distances.view())?;
    Ok(DistanceCache {
      image_ids,
      distances,
    })
  }

  pub fn from_rows(image_ids: Vec<ImageId>, rows: Vec<Vec<f64>>) -> Result<Self, DistanceError> {
    Self::new(image_ids, rows_to_array(rows)?)
  }

  /// 由特征向量计算余弦距离矩阵，零向量与其他图像的距离为 1
  pub fn from_embeddings(
    image_ids: Vec<ImageId>,
    embeddings: Array2<f64>,
  ) -> Result<Self, DistanceError> {
    check_ids(&image_ids, embeddings.nrows())?;
    check_finite(embeddings.view())?;

    let mut normalized = embeddings;
    for mut row in normalized.axis_iter_mut(Axis(0)) {
      let norm = row.dot(&row).sqrt();
      if norm > 0.0 {
        row.mapv_inplace(|v| v / norm);
      }
    }
    let similarity = normalized.dot(&normalized.t());
    let mut distances = similarity.mapv(|s| (1.0 - s).max(0.0));
    distances.diag_mut().fill(0.0);

    Ok(DistanceCache {
      image_ids,
      distances,
    })
  }

  pub fn len(&self) -> usize {
    self.image_ids.len()
  }

  pub fn is_empty(&self) -> bool {
    self.image_ids.is_empty()
  }

  pub fn image_ids(&self) -> &[ImageId] {
    &self.image_ids
  }

  pub fn image_id(&self, index: usize) -> ImageId {
    self.image_ids[index]
  }

  pub fn distances(&self) -> ArrayView2<'_, f64> {
    self.distances.view()
  }
}

fn check_ids(image_ids: &[ImageId], rows: usize) -> Result<(), DistanceError> {
  if image_ids.len() != rows {
    return Err(DistanceError::LengthMismatch {
      rows,
      ids: image_ids.len(),
    });
  }
  let mut seen = HashSet::with_capacity(image_ids.len());
  for &id in image_ids {
    if !seen.insert(id) {
      return Err(DistanceError::DuplicateImage(id));
    }
  }
  Ok(())
}

fn check_finite(matrix: ArrayView2<'_, f64>) -> Result<(), DistanceError> {
  match matrix.indexed_iter().find(|(_, v)| !v.is_finite()) {
    Some(((r, c), _)) => Err(DistanceError::NonFinite(r, c)),
    None => Ok(()),
  }
}

pub(crate) fn rows_to_array(rows: Vec<Vec<f64>>) -> Result<Array2<f64>, DistanceError> {
  let n_rows = rows.len();
  let n_cols = rows.first().map(Vec::len).unwrap_or(0);
  let mut flat = Vec::with_capacity(n_rows * n_cols);
  for (i, row) in rows.into_iter().enumerate() {
    if row.len() != n_cols {
      return Err(DistanceError::RaggedRow(i));
    }
    flat.extend(row);
  }
  Array2::from_shape_vec((n_rows, n_cols), flat).map_err(|_| DistanceError::RaggedRow(n_rows))
}

pub(crate) fn url_path(url: &Url) -> Result<PathBuf, DistanceError> {
  Ok(PathBuf::from(urlencoding::decode(url.path())?.into_owned()))
}

/// 把缓存文件路径转换为 `scheme:///abs/path` 形式的 URL，各路径段做百分号编码
pub fn cache_url(scheme: &str, path: &Path) -> Result<Url, DistanceError> {
  let path = std::path::absolute(path).map_err(|source| DistanceError::Io {
    path: path.to_path_buf(),
    source,
  })?;
  let mut encoded = String::new();
  for component in path.components() {
    match component {
      Component::Normal(segment) => {
        encoded.push('/');
        encoded.push_str(&urlencoding::encode_binary(segment.as_encoded_bytes()));
      }
      Component::ParentDir => encoded.push_str("/.."),
      _ => {}
    }
  }
  if encoded.is_empty() {
    encoded.push('/');
  }
  Ok(Url::parse(&format!("{}://{}", scheme, encoded))?)
}

pub enum DistanceInput {
  DistanceFile(DistanceFileInput),
  EmbeddingFile(EmbeddingFileInput),
}

impl FromUrl for DistanceInput {
  type Error = DistanceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    use crate::FromUrlWithScheme;

    match url.scheme() {
      DistanceFileInput::SCHEME => Ok(DistanceInput::DistanceFile(DistanceFileInput::from_url(url)?)),
      EmbeddingFileInput::SCHEME => Ok(DistanceInput::EmbeddingFile(EmbeddingFileInput::from_url(
        url,
      )?)),
      other => Err(DistanceError::SchemeMismatch(other.to_string())),
    }
  }
}

impl DistanceInput {
  pub fn into_cache(self) -> DistanceCache {
    match self {
      DistanceInput::DistanceFile(input) => input.into_cache(),
      DistanceInput::EmbeddingFile(input) => input.into_cache(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::array;

  #[test]
  fn rejects_malformed_matrices() {
    assert!(matches!(
      DistanceCache::new(vec![1, 2], Array2::zeros((2, 3))),
      Err(DistanceError::NotSquare { rows: 2, cols: 3 })
    ));
    assert!(matches!(
      DistanceCache::new(vec![1], Array2::zeros((2, 2))),
      Err(DistanceError::LengthMismatch { rows: 2, ids: 1 })
    ));
    assert!(matches!(
      DistanceCache::new(vec![1, 1], Array2::zeros((2, 2))),
      Err(DistanceError::DuplicateImage(1))
    ));
    assert!(matches!(
      DistanceCache::from_rows(vec![1, 2], vec![vec![0.0, 1.0], vec![1.0]]),
      Err(DistanceError::RaggedRow(1))
    ));
    assert!(matches!(
      DistanceCache::new(vec![1, 2], array![[0.0, f64::NAN], [1.0, 0.0]]),
      Err(DistanceError::NonFinite(0, 1))
    ));
  }

  #[test]
  fn cosine_distances_from_embeddings() {
    let cache = DistanceCache::from_embeddings(
      vec![10, 20, 30],
      array![[1.0, 0.0], [0.0, 2.0], [3.0, 0.0]],
    )
    .unwrap();
    let d = cache.distances();
    assert!((d[[0, 1]] - 1.0).abs() < 1e-12);
    assert!(d[[0, 2]].abs() < 1e-12);
    assert_eq!(d[[1, 1]], 0.0);
    assert_eq!(d, d.t());
  }

  #[test]
  fn cache_url_round_trips_through_the_reader() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pool 1.json");
    write_embedding_file(&path, &[7, 8], &[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
    let url = cache_url("embed", &path).unwrap();
    assert_eq!(url.scheme(), "embed");
    assert_eq!(url_path(&url).unwrap(), path);
    let cache = DistanceInput::from_url(&url).unwrap().into_cache();
    assert_eq!(cache.image_ids(), &[7, 8]);
  }

  #[test]
  fn cache_url_escapes_reserved_characters() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["round#1", "50%41", "q?x", "plain"] {
      let path = dir.path().join(name).join("image_dis.json");
      std::fs::create_dir_all(path.parent().unwrap()).unwrap();
      write_embedding_file(&path, &[1, 2], &[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();

      let url = cache_url("embed", &path).unwrap();
      assert_eq!(url.fragment(), None, "{name}");
      assert_eq!(url.query(), None, "{name}");
      assert_eq!(url_path(&url).unwrap(), path, "{name}");
      let cache = DistanceInput::from_url(&url).unwrap().into_cache();
      assert_eq!(cache.len(), 2, "{name}");
    }
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("npz:///tmp/cache.npz").unwrap();
    assert!(matches!(
      DistanceInput::from_url(&url),
      Err(DistanceError::SchemeMismatch(s)) if s == "npz"
    ));
  }
}

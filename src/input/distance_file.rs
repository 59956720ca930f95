// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/distance_file.rs - 预先计算的距离矩阵文件输入
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
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  coco::ImageId,
  input::{DistanceCache, DistanceError, url_path},
};

#[derive(Serialize, Deserialize)]
struct DistanceFile {
  image_ids: Vec<ImageId>,
  distances: Vec<Vec<f64>>,
}

/// `dist:///path/to/image_dis.json`
pub struct DistanceFileInput {
  cache: DistanceCache,
}

impl FromUrlWithScheme for DistanceFileInput {
  const SCHEME: &'static str = "dist";
}

impl FromUrl for DistanceFileInput {
  type Error = DistanceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(DistanceError::SchemeMismatch(url.scheme().to_string()));
    }

    let path = url_path(url)?;
    let file = File::open(&path).map_err(|source| DistanceError::Io {
      path: path.clone(),
      source,
    })?;
    let raw: DistanceFile =
      serde_json::from_reader(BufReader::new(file)).map_err(|source| DistanceError::Json {
        path: path.clone(),
        source,
      })?;
    debug!("读取距离矩阵 {}: {} 张图像", path.display(), raw.image_ids.len());

    Ok(DistanceFileInput {
      cache: DistanceCache::from_rows(raw.image_ids, raw.distances)?,
    })
  }
}

impl DistanceFileInput {
  pub fn into_cache(self) -> DistanceCache {
    self.cache
  }
}

pub fn write_distance_file(path: &Path, cache: &DistanceCache) -> Result<(), DistanceError> {
  let io_err = |source| DistanceError::Io {
    path: path.to_path_buf(),
    source,
  };
  let raw = DistanceFile {
    image_ids: cache.image_ids().to_vec(),
    distances: cache
      .distances()
      .rows()
      .into_iter()
      .map(|row| row.to_vec())
      .collect(),
  };
  let mut writer = BufWriter::new(File::create(path).map_err(io_err)?);
  serde_json::to_writer(&mut writer, &raw).map_err(|source| DistanceError::Json {
    path: path.to_path_buf(),
    source,
  })?;
  writer.flush().map_err(io_err)
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::array;

  #[test]
  fn reads_back_a_written_cache_through_its_url() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("image dis.json");
    let cache = DistanceCache::new(vec![5, 6], array![[0.0, 2.5], [2.5, 0.0]]).unwrap();
    write_distance_file(&path, &cache).unwrap();

    let url = Url::parse(&format!("dist://{}", path.display())).unwrap();
    let read = DistanceFileInput::from_url(&url).unwrap().into_cache();
    assert_eq!(read.image_ids(), &[5, 6]);
    assert_eq!(read.distances(), cache.distances());
  }

  #[test]
  fn truncated_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cut.json");
    std::fs::write(&path, r#"{"image_ids": [1, 2], "distances": [[0.0"#).unwrap();
    let url = Url::parse(&format!("dist://{}", path.display())).unwrap();
    assert!(matches!(
      DistanceFileInput::from_url(&url),
      Err(DistanceError::Json { .. })
    ));
  }
}

// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/embedding_file.rs - 图像特征向量文件输入
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
  input::{DistanceCache, DistanceError, rows_to_array, url_path},
};

#[derive(Serialize, Deserialize)]
struct EmbeddingFile {
  image_ids: Vec<ImageId>,
  embeddings: Vec<Vec<f64>>,
}

/// `embed:///path/to/embeddings.json`，读取后计算余弦距离
pub struct EmbeddingFileInput {
  cache: DistanceCache,
}

impl FromUrlWithScheme for EmbeddingFileInput {
  const SCHEME: &'static str = "embed";
}

impl FromUrl for EmbeddingFileInput {
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
    let raw: EmbeddingFile =
      serde_json::from_reader(BufReader::new(file)).map_err(|source| DistanceError::Json {
        path: path.clone(),
        source,
      })?;

    let embeddings = rows_to_array(raw.embeddings)?;
    debug!(
      "读取特征向量 {}: {} 张图像, 维度 {}",
      path.display(),
      embeddings.nrows(),
      embeddings.ncols()
    );

    Ok(EmbeddingFileInput {
      cache: DistanceCache::from_embeddings(raw.image_ids, embeddings)?,
    })
  }
}

impl EmbeddingFileInput {
  pub fn into_cache(self) -> DistanceCache {
    self.cache
  }
}

pub fn write_embedding_file(
  path: &Path,
  image_ids: &[ImageId],
  embeddings: &[Vec<f64>],
) -> Result<(), DistanceError> {
  let io_err = |source| DistanceError::Io {
    path: path.to_path_buf(),
    source,
  };
  let raw = EmbeddingFile {
    image_ids: image_ids.to_vec(),
    embeddings: embeddings.to_vec(),
  };
  let mut writer = BufWriter::new(File::create(path).map_err(io_err)?);
  serde_json::to_writer(&mut writer, &raw).map_err(|source| DistanceError::Json {
    path: path.to_path_buf(),
    source,
  })?;
  writer.flush().map_err(io_err)
}

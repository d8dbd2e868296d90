// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/replay.rs - 回放预先记录的检测结果
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

use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::{DetectItem, Model, REPLAY_SCHEME},
  utils::decode_url_path,
};

#[derive(Error, Debug)]
pub enum ReplayError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 不做推理，每一帧都返回同一组记录好的预测。
///
/// 文件格式为 `[{"class_id": 2, "score": 0.93, "bbox": [10, 20, 110, 220]}, ...]`。
#[derive(Debug, Clone, Default)]
pub struct Replay {
  predictions: Box<[DetectItem]>,
}

impl Replay {
  pub fn new(predictions: Vec<DetectItem>) -> Self {
    Replay {
      predictions: predictions.into_boxed_slice(),
    }
  }

  pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ReplayError> {
    let path = path.as_ref();
    info!("加载回放文件: {}", path.display());
    let data = std::fs::read(path)?;
    let predictions: Vec<DetectItem> = serde_json::from_slice(&data)?;
    debug!("回放预测数量: {}", predictions.len());
    Ok(Replay::new(predictions))
  }

  pub fn predictions(&self) -> &[DetectItem] {
    &self.predictions
  }
}

impl FromUrlWithScheme for Replay {
  const SCHEME: &'static str = REPLAY_SCHEME;
}

impl FromUrl for Replay {
  type Error = ReplayError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayError::SchemeMismatch(format!(
        "期望方案 '{}', 实际方案 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }
    Replay::from_path(decode_url_path(url))
  }
}

impl Model for Replay {
  type Prediction = DetectItem;
  type Error = ReplayError;

  fn load(identifier: &str) -> Result<Self, Self::Error> {
    match Url::parse(identifier) {
      Ok(url) if url.scheme() == Self::SCHEME => Replay::from_url(&url),
      _ => Replay::from_path(identifier),
    }
  }

  fn infer(&self, _input: &Frame) -> Result<Vec<Self::Prediction>, Self::Error> {
    Ok(self.predictions.to_vec())
  }
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use super::*;

  #[test]
  fn loads_predictions_from_json_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
      file,
      r#"[{{"class_id": 2, "score": 0.93, "bbox": [10, 20, 110, 220]}}]"#
    )
    .unwrap();

    let replay = Replay::load(file.path().to_str().unwrap()).unwrap();
    let frame = Frame::zeros(4, 4, 3);
    let predictions = replay.infer(&frame).unwrap();
    assert_eq!(
      predictions,
      vec![DetectItem {
        class_id: 2,
        score: 0.93,
        bbox: [10.0, 20.0, 110.0, 220.0],
      }]
    );
  }

  #[test]
  fn rejects_malformed_json() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{{not json").unwrap();
    assert!(matches!(
      Replay::from_path(file.path()),
      Err(ReplayError::JsonError(_))
    ));
  }

  #[test]
  fn rejects_foreign_scheme() {
    let url = Url::parse("tract:///model.onnx").unwrap();
    assert!(matches!(
      Replay::from_url(&url),
      Err(ReplayError::SchemeMismatch(_))
    ));
  }
}

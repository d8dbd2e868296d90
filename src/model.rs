// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 模型
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

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{FromUrl, detection::Prediction, frame::Frame};

/// 外部检测模型的能力: 加载与推理
pub trait Model: Sized {
  type Prediction: Prediction;
  type Error: std::error::Error + Send + Sync + 'static;

  fn load(identifier: &str) -> Result<Self, Self::Error>;
  fn infer(&self, input: &Frame) -> Result<Vec<Self::Prediction>, Self::Error>;
}

/// 后端原生的单个检测输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，像素坐标
}

impl Prediction for DetectItem {
  fn bbox(&self) -> [f32; 4] {
    self.bbox
  }

  fn score(&self) -> f32 {
    self.score
  }

  fn class_id(&self) -> u32 {
    self.class_id
  }
}

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

pub fn coco_label(class_id: u32) -> &'static str {
  COCO_CLASSES
    .get(class_id as usize)
    .copied()
    .unwrap_or("unknown")
}

#[cfg(feature = "backend_tract")]
mod tract_yolo;
#[cfg(feature = "backend_tract")]
pub use self::tract_yolo::{TractYolo, TractYoloBuilder, TractYoloError, TractYoloOptions};

#[cfg(feature = "backend_rknpu")]
mod yolo26;
#[cfg(feature = "backend_rknpu")]
pub use self::yolo26::{Yolo26, Yolo26Builder, Yolo26Error};

mod replay;
pub use self::replay::{Replay, ReplayError};

pub(crate) const TRACT_SCHEME: &str = "tract";
pub(crate) const YOLO26_SCHEME: &str = "yolo26";
pub(crate) const REPLAY_SCHEME: &str = "replay";

#[derive(Error, Debug)]
pub enum ModelError {
  #[cfg(feature = "backend_tract")]
  #[error("ONNX 模型错误: {0}")]
  TractYoloError(#[from] TractYoloError),
  #[cfg(feature = "backend_rknpu")]
  #[error("RKNN 模型错误: {0}")]
  Yolo26Error(#[from] Yolo26Error),
  #[error("回放模型错误: {0}")]
  ReplayError(#[from] ReplayError),
  #[error("无法识别的模型标识: {0}")]
  UnknownModel(String),
  #[error("模型后端未启用: {0}")]
  BackendDisabled(&'static str),
}

pub enum ModelWrapper {
  #[cfg(feature = "backend_tract")]
  TractYolo(TractYolo),
  #[cfg(feature = "backend_rknpu")]
  Yolo26(Yolo26),
  Replay(Replay),
}

impl ModelWrapper {
  pub fn backend_name(&self) -> &'static str {
    match self {
      #[cfg(feature = "backend_tract")]
      ModelWrapper::TractYolo(_) => TRACT_SCHEME,
      #[cfg(feature = "backend_rknpu")]
      ModelWrapper::Yolo26(_) => YOLO26_SCHEME,
      ModelWrapper::Replay(_) => REPLAY_SCHEME,
    }
  }

  /// 按文件扩展名选择后端
  fn from_path(path: &str) -> Result<Self, ModelError> {
    let extension = std::path::Path::new(path)
      .extension()
      .and_then(|ext| ext.to_str())
      .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
      Some("onnx") => {
        #[cfg(feature = "backend_tract")]
        return Ok(ModelWrapper::TractYolo(
          TractYoloBuilder::from_path(path).build()?,
        ));
        #[cfg(not(feature = "backend_tract"))]
        return Err(ModelError::BackendDisabled("backend_tract"));
      }
      Some("rknn") => {
        #[cfg(feature = "backend_rknpu")]
        return Ok(ModelWrapper::Yolo26(Yolo26Builder::from_path(path).build()?));
        #[cfg(not(feature = "backend_rknpu"))]
        return Err(ModelError::BackendDisabled("backend_rknpu"));
      }
      Some("json") => Ok(ModelWrapper::Replay(Replay::from_path(path)?)),
      _ => Err(ModelError::UnknownModel(path.to_string())),
    }
  }
}

impl FromUrl for ModelWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      TRACT_SCHEME => {
        #[cfg(feature = "backend_tract")]
        return Ok(ModelWrapper::TractYolo(
          TractYoloBuilder::from_url(url)?.build()?,
        ));
        #[cfg(not(feature = "backend_tract"))]
        return Err(ModelError::BackendDisabled("backend_tract"));
      }
      YOLO26_SCHEME => {
        #[cfg(feature = "backend_rknpu")]
        return Ok(ModelWrapper::Yolo26(Yolo26Builder::from_url(url)?.build()?));
        #[cfg(not(feature = "backend_rknpu"))]
        return Err(ModelError::BackendDisabled("backend_rknpu"));
      }
      REPLAY_SCHEME => Ok(ModelWrapper::Replay(Replay::from_url(url)?)),
      _ => Err(ModelError::UnknownModel(url.to_string())),
    }
  }
}

impl Model for ModelWrapper {
  type Prediction = DetectItem;
  type Error = ModelError;

  /// 标识可以是带方案的 URL (`tract:///m.onnx?conf=0.3`)，也可以是普通文件路径
  fn load(identifier: &str) -> Result<Self, Self::Error> {
    let model = match Url::parse(identifier) {
      Ok(url) if [TRACT_SCHEME, YOLO26_SCHEME, REPLAY_SCHEME].contains(&url.scheme()) => {
        debug!("按 URL 方案加载模型: {}", url.scheme());
        Self::from_url(&url)?
      }
      _ => {
        debug!("按文件路径加载模型: {}", identifier);
        Self::from_path(identifier)?
      }
    };
    info!("模型后端: {}", model.backend_name());
    Ok(model)
  }

  fn infer(&self, input: &Frame) -> Result<Vec<Self::Prediction>, Self::Error> {
    match self {
      #[cfg(feature = "backend_tract")]
      ModelWrapper::TractYolo(model) => model.infer(input).map_err(ModelError::from),
      #[cfg(feature = "backend_rknpu")]
      ModelWrapper::Yolo26(model) => model.infer(input).map_err(ModelError::from),
      ModelWrapper::Replay(model) => model.infer(input).map_err(ModelError::from),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn coco_label_falls_back_to_unknown() {
    assert_eq!(coco_label(0), "person");
    assert_eq!(coco_label(2), "car");
    assert_eq!(coco_label(79), "toothbrush");
    assert_eq!(coco_label(80), "unknown");
  }

  #[test]
  fn unknown_extension_is_rejected() {
    match ModelWrapper::load("weights/yolo11n.pt") {
      Err(ModelError::UnknownModel(id)) => assert_eq!(id, "weights/yolo11n.pt"),
      Err(e) => panic!("unexpected error: {e}"),
      Ok(_) => panic!("model should not load"),
    }
  }

  #[test]
  fn unknown_scheme_falls_back_to_path() {
    assert!(matches!(
      ModelWrapper::load("http://example.com/model"),
      Err(ModelError::UnknownModel(_))
    ));
  }

  #[test]
  fn missing_replay_file_is_load_error() {
    assert!(matches!(
      ModelWrapper::load("replay:///definitely/not/here.json"),
      Err(ModelError::ReplayError(ReplayError::IoError(_)))
    ));
  }
}

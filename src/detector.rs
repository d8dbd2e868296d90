// 该文件是 Shanan （山南西风） 项目的一部分。
// src/detector.rs - 目标检测器
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
use tracing::{debug, info};

use crate::{
  detection::{Detection, DetectionSet},
  frame::Frame,
  model::{Model, ModelWrapper},
};

/// 检测器错误，原样携带模型后端的错误
#[derive(Error, Debug)]
pub enum DetectorError<E: std::error::Error + 'static> {
  #[error("模型加载错误: {0}")]
  ModelLoad(#[source] E),
  #[error("推理错误: {0}")]
  Inference(#[source] E),
}

impl<E: std::error::Error + 'static> DetectorError<E> {
  pub fn inner(&self) -> &E {
    match self {
      DetectorError::ModelLoad(e) | DetectorError::Inference(e) => e,
    }
  }

  pub fn into_inner(self) -> E {
    match self {
      DetectorError::ModelLoad(e) | DetectorError::Inference(e) => e,
    }
  }
}

/// 包装一个预训练检测模型，把一张图像映射为它的检测结果。
///
/// 模型句柄在构造时创建，之后只读；`detect` 之间不保留任何状态。
/// 并发调用是否安全取决于模型后端本身。
pub struct Detector<M: Model = ModelWrapper> {
  model: M,
}

impl<M: Model> Detector<M> {
  /// 根据模型标识（文件路径或带方案的 URL）加载模型
  pub fn new(identifier: &str) -> Result<Self, DetectorError<M::Error>> {
    info!("加载检测模型: {}", identifier);
    let model = M::load(identifier).map_err(DetectorError::ModelLoad)?;
    Ok(Detector { model })
  }

  pub fn with_model(model: M) -> Self {
    Detector { model }
  }

  pub fn model(&self) -> &M {
    &self.model
  }

  /// 对一张 (H, W, C) 图像执行检测。
  ///
  /// 图像原样交给模型，不做形状或通道检查；结果顺序与模型输出一致。
  pub fn detect(&self, image: &Frame) -> Result<DetectionSet, DetectorError<M::Error>> {
    let predictions = self.model.infer(image).map_err(DetectorError::Inference)?;
    let detections: DetectionSet = predictions.iter().map(Detection::from_prediction).collect();
    debug!("检测到 {} 个物体", detections.len());
    Ok(detections)
  }
}

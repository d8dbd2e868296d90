// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/tract_yolo.rs - 基于 tract 的 ONNX YOLO 模型
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use tract_onnx::prelude::*;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, RGB_CHANNELS},
  model::{DetectItem, Model, TRACT_SCHEME},
  utils::{Letterbox, decode_url_path, nms},
};

const TRACT_YOLO_BOX_DIMS: usize = 4;

type TractPlan = TypedRunnableModel<TypedModel>;

#[derive(Error, Debug)]
pub enum TractYoloError {
  #[error("模型文件不存在: {0}")]
  ModelNotFound(PathBuf),
  #[error("模型加载错误: {0}")]
  ModelLoadError(TractError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("无效的模型参数 {key}={value}")]
  InvalidOption { key: String, value: String },
  #[error("不支持的通道数 {0}, 模型需要 RGB 三通道输入")]
  UnsupportedChannels(usize),
  #[error("输入图像为空")]
  EmptyFrame,
  #[error("推理错误: {0}")]
  InferenceError(TractError),
  #[error("模型输出形状无效: {0:?}")]
  InvalidOutput(Vec<usize>),
}

/// 推理参数，对应 Ultralytics 的默认值
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TractYoloOptions {
  pub input_size: usize,
  pub confidence: f32,
  pub iou: f32,
  pub max_det: usize,
}

impl Default for TractYoloOptions {
  fn default() -> Self {
    TractYoloOptions {
      input_size: 640,
      confidence: 0.25,
      iou: 0.7,
      max_det: 300,
    }
  }
}

impl TractYoloOptions {
  fn apply_query(mut self, url: &Url) -> Result<Self, TractYoloError> {
    fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, TractYoloError> {
      value.parse().map_err(|_| TractYoloError::InvalidOption {
        key: key.to_string(),
        value: value.to_string(),
      })
    }

    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "size" => self.input_size = parse(&key, &value)?,
        "conf" => self.confidence = parse(&key, &value)?,
        "iou" => self.iou = parse(&key, &value)?,
        "max_det" => self.max_det = parse(&key, &value)?,
        _ => debug!("忽略未知的模型参数: {}={}", key, value),
      }
    }

    if self.input_size == 0 {
      return Err(TractYoloError::InvalidOption {
        key: "size".to_string(),
        value: "0".to_string(),
      });
    }
    for (key, value) in [("conf", self.confidence), ("iou", self.iou)] {
      if !(0.0..=1.0).contains(&value) {
        return Err(TractYoloError::InvalidOption {
          key: key.to_string(),
          value: value.to_string(),
        });
      }
    }
    Ok(self)
  }
}

pub struct TractYoloBuilder {
  model_path: PathBuf,
  options: TractYoloOptions,
}

impl FromUrlWithScheme for TractYoloBuilder {
  const SCHEME: &'static str = TRACT_SCHEME;
}

impl FromUrl for TractYoloBuilder {
  type Error = TractYoloError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(TractYoloError::SchemeMismatch(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    Ok(TractYoloBuilder {
      model_path: PathBuf::from(decode_url_path(url)),
      options: TractYoloOptions::default().apply_query(url)?,
    })
  }
}

impl TractYoloBuilder {
  pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
    TractYoloBuilder {
      model_path: path.as_ref().to_path_buf(),
      options: TractYoloOptions::default(),
    }
  }

  pub fn options(mut self, options: TractYoloOptions) -> Self {
    self.options = options;
    self
  }

  pub fn build(self) -> Result<TractYolo, TractYoloError> {
    if !self.model_path.is_file() {
      return Err(TractYoloError::ModelNotFound(self.model_path));
    }

    info!("加载 ONNX 模型文件: {}", self.model_path.display());
    let size = self.options.input_size;
    let plan = tract_onnx::onnx()
      .model_for_path(&self.model_path)
      .and_then(|model| {
        model.with_input_fact(
          0,
          InferenceFact::dt_shape(f32::datum_type(), tvec!(1, RGB_CHANNELS, size, size)),
        )
      })
      .and_then(|model| model.into_optimized())
      .and_then(|model| model.into_runnable())
      .map_err(TractYoloError::ModelLoadError)?;
    info!("模型加载完成");
    debug!("推理参数: {:?}", self.options);

    Ok(TractYolo {
      plan,
      options: self.options,
    })
  }
}

/// Ultralytics 导出的 YOLOv8 / YOLO11 ONNX 模型，输出 `[1, 4 + 类别数, 锚点数]`
pub struct TractYolo {
  plan: TractPlan,
  options: TractYoloOptions,
}

impl TractYolo {
  pub fn options(&self) -> &TractYoloOptions {
    &self.options
  }
}

/// 模型只接受非空的 RGB 三通道图像
fn check_frame(frame: &Frame) -> Result<(), TractYoloError> {
  if frame.channels() != RGB_CHANNELS {
    return Err(TractYoloError::UnsupportedChannels(frame.channels()));
  }
  if frame.height() == 0 || frame.width() == 0 {
    return Err(TractYoloError::EmptyFrame);
  }
  Ok(())
}

/// `size x size x 3` 的 HWC 字节转为 `[1, 3, size, size]` 的 NCHW 张量，取值缩放到 `[0, 1]`
fn to_nchw(hwc: &[u8], size: usize) -> tract_ndarray::Array4<f32> {
  tract_ndarray::Array4::from_shape_fn((1, RGB_CHANNELS, size, size), |(_, c, y, x)| {
    hwc[(y * size + x) * RGB_CHANNELS + c] as f32 / 255.0
  })
}

impl Model for TractYolo {
  type Prediction = DetectItem;
  type Error = TractYoloError;

  fn load(identifier: &str) -> Result<Self, Self::Error> {
    match Url::parse(identifier) {
      Ok(url) if url.scheme() == TractYoloBuilder::SCHEME => {
        TractYoloBuilder::from_url(&url)?.build()
      }
      _ => TractYoloBuilder::from_path(identifier).build(),
    }
  }

  fn infer(&self, input: &Frame) -> Result<Vec<Self::Prediction>, Self::Error> {
    check_frame(input)?;

    let size = self.options.input_size;
    let letterbox = Letterbox::for_frame(input, size);
    let tensor: Tensor = to_nchw(&letterbox.apply_hwc(input), size).into();

    debug!("执行模型推理");
    let outputs = self
      .plan
      .run(tvec!(tensor.into()))
      .map_err(TractYoloError::InferenceError)?;
    let output = outputs
      .first()
      .ok_or_else(|| TractYoloError::InvalidOutput(Vec::new()))?;
    let view = output
      .to_array_view::<f32>()
      .map_err(TractYoloError::InferenceError)?;

    let items = postprocess(view, &letterbox, &self.options)?;
    debug!("检测到 {} 个物体", items.len());
    Ok(items)
  }
}

/// 解码 `[1, 4 + C, A]` 输出: 每个锚点取最高分类别，过滤、还原坐标后做 NMS
fn postprocess(
  output: tract_ndarray::ArrayViewD<'_, f32>,
  letterbox: &Letterbox,
  options: &TractYoloOptions,
) -> Result<Vec<DetectItem>, TractYoloError> {
  let shape = output.shape().to_vec();
  let output = output
    .into_dimensionality::<tract_ndarray::Ix3>()
    .map_err(|_| TractYoloError::InvalidOutput(shape.clone()))?;
  let (batch, rows, anchors) = output.dim();
  if batch != 1 || rows <= TRACT_YOLO_BOX_DIMS {
    return Err(TractYoloError::InvalidOutput(shape));
  }

  let mut items = Vec::new();
  for a in 0..anchors {
    let mut score = f32::MIN;
    let mut class_id = 0usize;
    for c in TRACT_YOLO_BOX_DIMS..rows {
      let value = output[[0, c, a]];
      if value > score {
        score = value;
        class_id = c - TRACT_YOLO_BOX_DIMS;
      }
    }

    if score <= options.confidence {
      continue;
    }

    let cx = output[[0, 0, a]];
    let cy = output[[0, 1, a]];
    let w = output[[0, 2, a]];
    let h = output[[0, 3, a]];
    let bbox = letterbox.restore([cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]);

    items.push(DetectItem {
      class_id: class_id as u32,
      score,
      bbox,
    });
  }

  Ok(nms(items, options.iou, options.max_det))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn output_with(anchors: &[([f32; 4], [f32; 2])]) -> tract_ndarray::ArrayD<f32> {
    let mut output = tract_ndarray::Array3::<f32>::zeros((1, 6, anchors.len()));
    for (a, (bbox, scores)) in anchors.iter().enumerate() {
      for (k, v) in bbox.iter().chain(scores.iter()).enumerate() {
        output[[0, k, a]] = *v;
      }
    }
    output.into_dyn()
  }

  #[test]
  fn decodes_center_boxes_into_source_pixels() {
    // 源图像 320x160，letterbox 后 scale=2, pad_y=160
    let letterbox = Letterbox::new(160, 320, 640);
    let output = output_with(&[([120.0, 300.0, 200.0, 200.0], [0.1, 0.9])]);

    let items = postprocess(output.view(), &letterbox, &TractYoloOptions::default()).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].class_id, 1);
    assert_eq!(items[0].score, 0.9);
    assert_eq!(items[0].bbox, [10.0, 20.0, 110.0, 120.0]);
  }

  #[test]
  fn drops_low_scores_and_orders_by_confidence() {
    let letterbox = Letterbox::new(640, 640, 640);
    let output = output_with(&[
      ([50.0, 50.0, 20.0, 20.0], [0.4, 0.0]),
      ([300.0, 300.0, 20.0, 20.0], [0.2, 0.1]),
      ([500.0, 500.0, 20.0, 20.0], [0.0, 0.8]),
    ]);

    let items = postprocess(output.view(), &letterbox, &TractYoloOptions::default()).unwrap();
    let scores: Vec<f32> = items.iter().map(|i| i.score).collect();
    assert_eq!(scores, vec![0.8, 0.4]);
    assert_eq!(items[0].bbox, [490.0, 490.0, 510.0, 510.0]);
  }

  #[test]
  fn no_candidates_is_empty_not_error() {
    let letterbox = Letterbox::new(640, 640, 640);
    let output = output_with(&[([50.0, 50.0, 20.0, 20.0], [0.01, 0.02])]);
    let items = postprocess(output.view(), &letterbox, &TractYoloOptions::default()).unwrap();
    assert!(items.is_empty());
  }

  #[test]
  fn rejects_unexpected_output_rank() {
    let letterbox = Letterbox::new(640, 640, 640);
    let output = tract_ndarray::Array2::<f32>::zeros((6, 10)).into_dyn();
    assert!(matches!(
      postprocess(output.view(), &letterbox, &TractYoloOptions::default()),
      Err(TractYoloError::InvalidOutput(_))
    ));
  }

  #[test]
  fn query_overrides_defaults() {
    let url = Url::parse("tract:///models/yolo11n.onnx?conf=0.5&size=320").unwrap();
    let builder = TractYoloBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path, PathBuf::from("/models/yolo11n.onnx"));
    assert_eq!(builder.options.input_size, 320);
    assert_eq!(builder.options.confidence, 0.5);
    assert_eq!(builder.options.iou, 0.7);
  }

  #[test]
  fn invalid_query_value_is_rejected() {
    let url = Url::parse("tract:///m.onnx?iou=abc").unwrap();
    assert!(matches!(
      TractYoloBuilder::from_url(&url),
      Err(TractYoloError::InvalidOption { .. })
    ));
  }

  #[test]
  fn out_of_range_thresholds_are_rejected() {
    for query in ["conf=NaN", "conf=1.5", "iou=-0.1", "iou=inf"] {
      let url = Url::parse(&format!("tract:///m.onnx?{query}")).unwrap();
      assert!(
        matches!(
          TractYoloBuilder::from_url(&url),
          Err(TractYoloError::InvalidOption { .. })
        ),
        "{query}"
      );
    }

    let url = Url::parse("tract:///m.onnx?conf=0&iou=1").unwrap();
    let builder = TractYoloBuilder::from_url(&url).unwrap();
    assert_eq!(builder.options.confidence, 0.0);
    assert_eq!(builder.options.iou, 1.0);
  }

  #[test]
  fn frame_must_be_nonempty_rgb() {
    assert!(check_frame(&Frame::zeros(4, 4, 3)).is_ok());
    assert!(matches!(
      check_frame(&Frame::zeros(4, 4, 1)),
      Err(TractYoloError::UnsupportedChannels(1))
    ));
    assert!(matches!(
      check_frame(&Frame::zeros(4, 4, 4)),
      Err(TractYoloError::UnsupportedChannels(4))
    ));
    assert!(matches!(
      check_frame(&Frame::zeros(0, 4, 3)),
      Err(TractYoloError::EmptyFrame)
    ));
  }

  #[test]
  fn hwc_bytes_become_scaled_nchw() {
    // 2x2 图像，像素 (y, x) 的通道 c 取值 y*60 + x*30 + c*10
    let size = 2;
    let mut hwc = Vec::new();
    for y in 0..size {
      for x in 0..size {
        for c in 0..RGB_CHANNELS {
          hwc.push((y * 60 + x * 30 + c * 10) as u8);
        }
      }
    }
    hwc[0] = 255;

    let tensor = to_nchw(&hwc, size);
    assert_eq!(tensor.shape(), &[1, 3, 2, 2]);
    assert_eq!(tensor[[0, 0, 0, 0]], 1.0);
    assert_eq!(tensor[[0, 1, 0, 0]], 10.0 / 255.0);
    assert_eq!(tensor[[0, 2, 1, 0]], 80.0 / 255.0);
    assert_eq!(tensor[[0, 0, 1, 1]], 90.0 / 255.0);
    assert_eq!(tensor[[0, 2, 0, 1]], 50.0 / 255.0);
  }

  #[test]
  fn missing_model_file_fails_to_build() {
    assert!(matches!(
      TractYoloBuilder::from_path("/nonexistent/yolo11n.onnx").build(),
      Err(TractYoloError::ModelNotFound(_))
    ));
  }
}

// 该文件是 Shanan （山南西风） 项目的一部分。
// src/detection.rs - 检测结果定义
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

use ndarray::Array2;
use serde::{Serialize, Serializer, ser::SerializeSeq};

/// 每条检测记录的列数: `[x1, y1, x2, y2, confidence, class_id]`
pub const DETECTION_COLUMNS: usize = 6;

/// 模型原生的单个预测结果需要提供的字段
pub trait Prediction {
  /// `[x_min, y_min, x_max, y_max]`，图像像素坐标
  fn bbox(&self) -> [f32; 4];
  fn score(&self) -> f32;
  fn class_id(&self) -> u32;
}

impl<P: Prediction + ?Sized> Prediction for &P {
  fn bbox(&self) -> [f32; 4] {
    (**self).bbox()
  }

  fn score(&self) -> f32 {
    (**self).score()
  }

  fn class_id(&self) -> u32 {
    (**self).class_id()
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
  pub confidence: f32,
  pub class_id: u32,
}

impl Detection {
  /// 将模型原生预测映射为扁平的六元组。
  ///
  /// 纯函数：角点按大小重新排列，保证 `x1 <= x2` 且 `y1 <= y2`；
  /// 置信度截断到 `[0, 1]`，NaN 视为 0。
  pub fn from_prediction<P: Prediction>(prediction: &P) -> Self {
    let [ax, ay, bx, by] = prediction.bbox();
    let score = prediction.score();
    Detection {
      x1: ax.min(bx),
      y1: ay.min(by),
      x2: ax.max(bx),
      y2: ay.max(by),
      confidence: if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) },
      class_id: prediction.class_id(),
    }
  }

  pub fn to_row(&self) -> [f32; DETECTION_COLUMNS] {
    [
      self.x1,
      self.y1,
      self.x2,
      self.y2,
      self.confidence,
      self.class_id as f32,
    ]
  }

  pub fn width(&self) -> f32 {
    self.x2 - self.x1
  }

  pub fn height(&self) -> f32 {
    self.y2 - self.y1
  }
}

impl Serialize for Detection {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    self.to_row().serialize(serializer)
  }
}

/// 一张图像上的全部检测结果，顺序与模型输出一致
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionSet {
  items: Box<[Detection]>,
}

impl DetectionSet {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
    self.items.iter()
  }

  pub fn as_slice(&self) -> &[Detection] {
    &self.items
  }

  pub fn shape(&self) -> (usize, usize) {
    (self.items.len(), DETECTION_COLUMNS)
  }

  /// 导出为 `(N, 6)` 的稠密数组，N 可以为 0
  pub fn to_array(&self) -> Array2<f32> {
    let mut array = Array2::zeros(self.shape());
    for (mut row, detection) in array.rows_mut().into_iter().zip(self.items.iter()) {
      for (cell, value) in row.iter_mut().zip(detection.to_row()) {
        *cell = value;
      }
    }
    array
  }
}

impl FromIterator<Detection> for DetectionSet {
  fn from_iter<I: IntoIterator<Item = Detection>>(iter: I) -> Self {
    DetectionSet {
      items: iter.into_iter().collect(),
    }
  }
}

impl From<Vec<Detection>> for DetectionSet {
  fn from(items: Vec<Detection>) -> Self {
    DetectionSet {
      items: items.into_boxed_slice(),
    }
  }
}

impl<'a> IntoIterator for &'a DetectionSet {
  type Item = &'a Detection;
  type IntoIter = std::slice::Iter<'a, Detection>;

  fn into_iter(self) -> Self::IntoIter {
    self.items.iter()
  }
}

impl Serialize for DetectionSet {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut seq = serializer.serialize_seq(Some(self.items.len()))?;
    for detection in self.items.iter() {
      seq.serialize_element(detection)?;
    }
    seq.end()
  }
}

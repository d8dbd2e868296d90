// 该文件是 Shanan （山南西风） 项目的一部分。
// src/frame.rs - HWC 图像帧定义
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

use ndarray::{Array3, ArrayView3};
use thiserror::Error;

pub const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  ShapeMismatch { expected: usize, actual: usize },
}

/// 稠密的 (高, 宽, 通道) 像素数组。
///
/// 通道顺序与取值范围由调用方保证，这里不做检查。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
  data: Array3<u8>,
}

impl Frame {
  pub fn from_hwc(
    height: usize,
    width: usize,
    channels: usize,
    data: Vec<u8>,
  ) -> Result<Self, FrameError> {
    let expected = height * width * channels;
    if data.len() != expected {
      return Err(FrameError::ShapeMismatch {
        expected,
        actual: data.len(),
      });
    }

    let actual = data.len();
    let data = Array3::from_shape_vec((height, width, channels), data)
      .map_err(|_| FrameError::ShapeMismatch { expected, actual })?;
    Ok(Self { data })
  }

  pub fn zeros(height: usize, width: usize, channels: usize) -> Self {
    Self {
      data: Array3::zeros((height, width, channels)),
    }
  }

  pub fn height(&self) -> usize {
    self.data.dim().0
  }

  pub fn width(&self) -> usize {
    self.data.dim().1
  }

  pub fn channels(&self) -> usize {
    self.data.dim().2
  }

  pub fn view(&self) -> ArrayView3<'_, u8> {
    self.data.view()
  }

  /// 按行优先 HWC 排列的原始字节
  pub fn as_hwc(&self) -> &[u8] {
    self.data.as_slice().unwrap_or(&[])
  }

  pub fn into_inner(self) -> Array3<u8> {
    self.data
  }
}

impl From<Array3<u8>> for Frame {
  fn from(data: Array3<u8>) -> Self {
    // 保证内部始终是标准布局，as_hwc 才能直接借出切片
    let data = if data.is_standard_layout() {
      data
    } else {
      data.as_standard_layout().into_owned()
    };
    Self { data }
  }
}

impl AsRef<[u8]> for Frame {
  fn as_ref(&self) -> &[u8] {
    self.as_hwc()
  }
}

/// 带来源描述（文件名、设备名等）的输入帧
#[derive(Debug, Clone)]
pub struct SourcedFrame {
  pub source: String,
  pub frame: Frame,
}

impl SourcedFrame {
  pub fn new(source: impl Into<String>, frame: Frame) -> Self {
    SourcedFrame {
      source: source.into(),
      frame,
    }
  }
}

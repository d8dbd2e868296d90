// 该文件是 Shanan （山南西风） 项目的一部分。
// src/utils.rs - 前后处理工具
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

use url::Url;

use crate::{frame::Frame, model::DetectItem};

/// Letterbox 填充值，与 Ultralytics 训练时一致
pub const LETTERBOX_PAD_VALUE: u8 = 114;

/// 保持宽高比缩放到正方形输入时的几何参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
  pub size: usize,
  pub scale: f32,
  pub new_width: usize,
  pub new_height: usize,
  pub pad_x: usize,
  pub pad_y: usize,
  pub src_width: usize,
  pub src_height: usize,
}

impl Letterbox {
  pub fn new(src_height: usize, src_width: usize, size: usize) -> Self {
    if src_height == 0 || src_width == 0 {
      return Letterbox {
        size,
        scale: 0.0,
        new_width: 0,
        new_height: 0,
        pad_x: 0,
        pad_y: 0,
        src_width,
        src_height,
      };
    }

    let scale = (size as f32 / src_width as f32).min(size as f32 / src_height as f32);
    // 极端宽高比下短边至少保留一个像素
    let new_width = ((src_width as f32 * scale).round() as usize).max(1).min(size);
    let new_height = ((src_height as f32 * scale).round() as usize).max(1).min(size);

    Letterbox {
      size,
      scale,
      new_width,
      new_height,
      pad_x: (size - new_width) / 2,
      pad_y: (size - new_height) / 2,
      src_width,
      src_height,
    }
  }

  pub fn for_frame(frame: &Frame, size: usize) -> Self {
    Self::new(frame.height(), frame.width(), size)
  }

  /// 将输入张量坐标系下的框还原到源图像像素坐标，并截断到图像范围内
  pub fn restore(&self, bbox: [f32; 4]) -> [f32; 4] {
    if self.scale <= 0.0 {
      return [0.0; 4];
    }
    let w = self.src_width as f32;
    let h = self.src_height as f32;
    [
      ((bbox[0] - self.pad_x as f32) / self.scale).clamp(0.0, w),
      ((bbox[1] - self.pad_y as f32) / self.scale).clamp(0.0, h),
      ((bbox[2] - self.pad_x as f32) / self.scale).clamp(0.0, w),
      ((bbox[3] - self.pad_y as f32) / self.scale).clamp(0.0, h),
    ]
  }

  /// 生成 `size x size x C` 的 HWC 字节数组。
  ///
  /// 每个通道双线性缩放（`FilterType::Triangle`）到 `new_width x new_height`，
  /// 再居中贴到填充值为 114 的画布上。
  #[cfg(feature = "image")]
  pub fn apply_hwc(&self, frame: &Frame) -> Vec<u8> {
    use image::{
      GrayImage, Luma,
      imageops::{self, FilterType},
    };

    let channels = frame.channels();
    let mut data = vec![LETTERBOX_PAD_VALUE; self.size * self.size * channels];
    if self.scale <= 0.0 || self.new_width == 0 || self.new_height == 0 {
      return data;
    }

    let view = frame.view();
    for c in 0..channels {
      let plane = GrayImage::from_fn(self.src_width as u32, self.src_height as u32, |x, y| {
        Luma([view[[y as usize, x as usize, c]]])
      });
      let resized = imageops::resize(
        &plane,
        self.new_width as u32,
        self.new_height as u32,
        FilterType::Triangle,
      );
      for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize + self.pad_x, y as usize + self.pad_y);
        data[(y * self.size + x) * channels + c] = pixel[0];
      }
    }
    data
  }
}

/// URL 路径部分的百分号解码
pub fn decode_url_path(url: &Url) -> String {
  urlencoding::decode(url.path())
    .map(|path| path.into_owned())
    .unwrap_or_else(|_| url.path().to_string())
}

pub fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

/// 计算两个 `[x_min, y_min, x_max, y_max]` 框的 IoU
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

/// 按类别进行非极大值抑制，结果按置信度降序排列
pub fn nms(mut items: Vec<DetectItem>, iou_threshold: f32, max_det: usize) -> Vec<DetectItem> {
  items.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut kept: Vec<DetectItem> = Vec::new();
  for item in items {
    if kept.len() >= max_det {
      break;
    }
    let suppressed = kept
      .iter()
      .any(|k| k.class_id == item.class_id && iou(&k.bbox, &item.bbox) >= iou_threshold);
    if !suppressed {
      kept.push(item);
    }
  }
  kept
}

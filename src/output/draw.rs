// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use image::{ImageBuffer, Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};

use crate::{
  detection::{Detection, DetectionSet},
  frame::Frame,
  model::coco_label,
};

const BOX_THICKNESS: i32 = 2;

// 按类别循环取色
const PALETTE: [[u8; 3]; 8] = [
  [0, 0, 255],
  [255, 56, 56],
  [72, 249, 10],
  [255, 157, 151],
  [0, 194, 255],
  [255, 178, 29],
  [207, 210, 49],
  [132, 56, 255],
];

pub trait ToRgbImage {
  fn to_rgb_image(&self) -> RgbImage;
}

impl ToRgbImage for Frame {
  /// 1 通道按灰度展开，2 通道视为灰度加透明度，4 通道丢弃透明度
  fn to_rgb_image(&self) -> RgbImage {
    let view = self.view();
    let channels = self.channels();
    ImageBuffer::from_fn(self.width() as u32, self.height() as u32, |x, y| {
      let (x, y) = (x as usize, y as usize);
      match channels {
        0 => Rgb([0, 0, 0]),
        1 | 2 => {
          let v = view[[y, x, 0]];
          Rgb([v, v, v])
        }
        _ => Rgb([view[[y, x, 0]], view[[y, x, 1]], view[[y, x, 2]]]),
      }
    })
  }
}

/// 在图像上绘制检测框，颜色按类别从调色板循环选取。
///
/// 只画边框，不在图上写类别名称（没有随附字体文件）；
/// 类别名称由 `json://` 输出的 `labels` 与 [`Record`] 文本记录给出。
pub struct Draw {
  thickness: i32,
  palette: Vec<[u8; 3]>,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      thickness: BOX_THICKNESS,
      palette: PALETTE.to_vec(),
    }
  }
}

impl Draw {
  pub fn with_thickness(mut self, thickness: i32) -> Self {
    self.thickness = thickness.max(1);
    self
  }

  fn color_of(&self, class_id: u32) -> Rgb<u8> {
    Rgb(self.palette[class_id as usize % self.palette.len()])
  }

  // 在图像上绘制一个矩形边框，坐标为像素坐标
  fn draw_bbox(&self, image: &mut RgbImage, detection: &Detection) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let x_min = (detection.x1.floor() as i32).clamp(0, w - 1);
    let y_min = (detection.y1.floor() as i32).clamp(0, h - 1);
    let x_max = (detection.x2.ceil() as i32).clamp(0, w - 1);
    let y_max = (detection.y2.ceil() as i32).clamp(0, h - 1);

    let color = self.color_of(detection.class_id);
    for t in 0..self.thickness {
      let width = x_max - x_min - 2 * t;
      let height = y_max - y_min - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32 + 1, height as u32 + 1);
      draw_hollow_rect_mut(image, rect, color);
    }
  }

  pub fn draw_detections_on_image(&self, image: &mut RgbImage, result: &DetectionSet) {
    for detection in result.iter() {
      self.draw_bbox(image, detection);
    }
  }

  pub fn draw_detection<F: ToRgbImage>(&self, frame: &F, result: &DetectionSet) -> RgbImage {
    let mut image = frame.to_rgb_image();
    self.draw_detections_on_image(&mut image, result);
    image
  }
}

/// 以文本形式保存检测结果，每行 `label, score, x1, y1, x2, y2`
pub struct Record {
  pub label_with_name: bool,
}

impl Record {
  pub fn lines(&self, result: &DetectionSet) -> Vec<String> {
    result
      .iter()
      .map(|d| {
        let name = if self.label_with_name {
          coco_label(d.class_id).to_string()
        } else {
          d.class_id.to_string()
        };
        format!(
          "{}, {:.4}, {:.1}, {:.1}, {:.1}, {:.1}",
          name, d.confidence, d.x1, d.y1, d.x2, d.y2
        )
      })
      .collect()
  }

  pub fn record(&self, result: &DetectionSet, path: &std::path::Path) -> Result<(), std::io::Error> {
    std::fs::write(path.with_extension("txt"), self.lines(result).join("\n"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn one_box(class_id: u32) -> DetectionSet {
    vec![Detection {
      x1: 2.0,
      y1: 2.0,
      x2: 7.0,
      y2: 7.0,
      confidence: 0.875,
      class_id,
    }]
    .into()
  }

  #[test]
  fn frame_converts_to_rgb() {
    let frame = Frame::from_hwc(1, 1, 3, vec![9, 8, 7]).unwrap();
    assert_eq!(frame.to_rgb_image().get_pixel(0, 0), &Rgb([9, 8, 7]));

    let gray = Frame::from_hwc(1, 1, 1, vec![5]).unwrap();
    assert_eq!(gray.to_rgb_image().get_pixel(0, 0), &Rgb([5, 5, 5]));
  }

  #[test]
  fn draws_box_outline_only() {
    let frame = Frame::zeros(10, 10, 3);
    let image = Draw::default().draw_detection(&frame, &one_box(0));
    let color = Rgb(PALETTE[0]);

    assert_eq!(image.get_pixel(2, 2), &color);
    assert_eq!(image.get_pixel(7, 7), &color);
    assert_eq!(image.get_pixel(3, 5), &color);
    assert_eq!(image.get_pixel(5, 5), &Rgb([0, 0, 0]));
    assert_eq!(image.get_pixel(0, 0), &Rgb([0, 0, 0]));
  }

  #[test]
  fn nothing_is_drawn_outside_the_box() {
    let frame = Frame::zeros(10, 10, 3);
    let image = Draw::default().draw_detection(&frame, &one_box(5));

    for (x, y, pixel) in image.enumerate_pixels() {
      let inside = (2..=7).contains(&x) && (2..=7).contains(&y);
      if !inside {
        assert_eq!(pixel, &Rgb([0, 0, 0]), "({x}, {y})");
      }
    }
  }

  #[test]
  fn record_lines_use_name_or_id() {
    let set = one_box(2);
    let by_name = Record {
      label_with_name: true,
    };
    let by_id = Record {
      label_with_name: false,
    };
    assert_eq!(by_name.lines(&set), vec!["car, 0.8750, 2.0, 2.0, 7.0, 7.0"]);
    assert_eq!(by_id.lines(&set), vec!["2, 0.8750, 2.0, 2.0, 7.0, 7.0"]);
  }
}

// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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
use tracing::warn;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  detection::DetectionSet,
  frame::SourcedFrame,
  output::{Render, draw::Draw},
  utils::decode_url_path,
};

/// 把画好检测框的帧保存为图像文件，图上不写类别名称
pub struct SaveImageFileOutput {
  path: PathBuf,
  draw: Draw,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(SaveImageFileOutput::new(decode_url_path(uri)))
  }
}

impl SaveImageFileOutput {
  pub fn new<P: AsRef<Path>>(path: P) -> Self {
    SaveImageFileOutput {
      path: path.as_ref().to_path_buf(),
      draw: Draw::default(),
    }
  }

  fn save_image(&self, image: image::RgbImage) -> Result<(), SaveImageFileError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent).map_err(SaveImageFileError::IoError)?;
    }

    image
      .save(&self.path)
      .map_err(SaveImageFileError::ImageError)?;

    warn!("保存图像到文件: {}", self.path.display());

    Ok(())
  }
}

impl Render<SourcedFrame, DetectionSet> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, frame: &SourcedFrame, result: &DetectionSet) -> Result<(), Self::Error> {
    let image = self.draw.draw_detection(&frame.frame, result);
    self.save_image(image)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{detection::Detection, frame::Frame};

  #[test]
  fn saves_annotated_copy_creating_parent_dirs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("out.png");
    let output = SaveImageFileOutput::new(&path);

    let frame = SourcedFrame::new("in.png", Frame::zeros(8, 8, 3));
    let result: DetectionSet = vec![Detection {
      x1: 1.0,
      y1: 1.0,
      x2: 6.0,
      y2: 6.0,
      confidence: 0.9,
      class_id: 0,
    }]
    .into();
    output.render_result(&frame, &result).unwrap();

    let saved = image::open(&path).unwrap().into_rgb8();
    assert_eq!(saved.dimensions(), (8, 8));
    assert_ne!(saved.get_pixel(1, 1), &image::Rgb([0, 0, 0]));
    assert_eq!(saved.get_pixel(4, 4), &image::Rgb([0, 0, 0]));
  }
}

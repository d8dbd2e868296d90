// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Datelike, Utc};
use image::RgbImage;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  detection::DetectionSet,
  frame::SourcedFrame,
  output::{
    Render,
    draw::{Draw, Record, ToRgbImage},
  },
  utils::decode_url_path,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

pub enum DrawWrapper {
  Draw(Box<Draw>),
  Record(Record),
}

impl DrawWrapper {
  pub fn save_result(
    &self,
    path: &Path,
    frame: &SourcedFrame,
    result: &DetectionSet,
  ) -> Result<(), DirectoryRecordOutputError> {
    match self {
      DrawWrapper::Draw(draw) => {
        let image: RgbImage = draw.draw_detection(&frame.frame, result);
        image.save(path)?;
      }
      DrawWrapper::Record(record) => {
        let image = frame.frame.to_rgb_image();
        image.save(path)?;
        record.record(result, path)?;
      }
    };

    Ok(())
  }

  pub fn with(kind: &str) -> Self {
    match kind {
      "record-name" => DrawWrapper::Record(Record {
        label_with_name: true,
      }),
      "record-id" => DrawWrapper::Record(Record {
        label_with_name: false,
      }),
      _ => DrawWrapper::Draw(Box::default()),
    }
  }
}

/// 按日期分目录保存每一帧: `<root>/YYYY/MM/DD/HH-MM-SS-XXXX.png`
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: DrawWrapper,
  frame_counter: AtomicU32,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let kind = uri
      .query_pairs()
      .find(|(k, _)| k == "record")
      .map(|(_, v)| if v == "id" { "record-id" } else { "record-name" })
      .unwrap_or("draw");

    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(decode_url_path(uri)),
      draw: DrawWrapper::with(kind),
      frame_counter: AtomicU32::new(0),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  fn frame_id(&self) -> u32 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed) + 1
  }

  fn frame_path(&self, now: DateTime<Utc>) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id() & 0xFFFF
    )))
  }
}

impl Render<SourcedFrame, DetectionSet> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &SourcedFrame, result: &DetectionSet) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      debug!("{} 无检测结果，跳过记录", frame.source);
      return Ok(());
    }
    let path = self.frame_path(Utc::now())?;
    self.draw.save_result(&path, frame, result)
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;
  use crate::{detection::Detection, frame::Frame};

  fn output_for(dir: &Path, query: &str) -> DirectoryRecordOutput {
    let mut url = url::Url::from_directory_path(dir).unwrap();
    url.set_query(Some(query));
    let url = url::Url::parse(&url.as_str().replacen("file", "folder", 1)).unwrap();
    DirectoryRecordOutput::from_url(&url).unwrap()
  }

  fn one_box() -> DetectionSet {
    vec![Detection {
      x1: 0.0,
      y1: 0.0,
      x2: 3.0,
      y2: 3.0,
      confidence: 0.5,
      class_id: 0,
    }]
    .into()
  }

  #[test]
  fn frame_paths_are_dated_and_numbered() {
    let dir = tempfile::tempdir().unwrap();
    let output = output_for(dir.path(), "");
    let now = Utc.with_ymd_and_hms(2026, 3, 7, 8, 9, 10).unwrap();

    let first = output.frame_path(now).unwrap();
    let second = output.frame_path(now).unwrap();
    assert_eq!(
      first,
      dir.path().join("2026/03/07").join("08-09-10-0001.png")
    );
    assert!(second.ends_with("08-09-10-0002.png"));
  }

  #[test]
  fn empty_results_are_skipped_unless_always() {
    let dir = tempfile::tempdir().unwrap();
    let frame = SourcedFrame::new("a.png", Frame::zeros(4, 4, 3));

    let skipping = output_for(dir.path(), "record=id");
    skipping
      .render_result(&frame, &DetectionSet::default())
      .unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

    let always = output_for(dir.path(), "record=id&always");
    always.render_result(&frame, &one_box()).unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
  }

  #[test]
  fn record_mode_writes_text_next_to_image() {
    let dir = tempfile::tempdir().unwrap();
    let output = output_for(dir.path(), "record=name");
    let path = dir.path().join("frame.png");
    let frame = SourcedFrame::new("a.png", Frame::zeros(4, 4, 3));

    output.draw.save_result(&path, &frame, &one_box()).unwrap();
    assert!(path.exists());
    let text = std::fs::read_to_string(path.with_extension("txt")).unwrap();
    assert_eq!(text, "person, 0.5000, 0.0, 0.0, 3.0, 3.0");
  }
}

// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/json_record.rs - JSON Lines 检测记录输出
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

use std::{
  fs::File,
  io::{BufWriter, Write},
  path::Path,
  sync::Mutex,
};

use serde::Serialize;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  detection::DetectionSet,
  frame::SourcedFrame,
  model::coco_label,
  output::Render,
  utils::decode_url_path,
};

const STDOUT_PATH: &str = "-";

#[derive(Error, Debug)]
pub enum JsonRecordError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("输出句柄锁已损坏")]
  LockPoisoned,
}

#[derive(Serialize)]
struct JsonRecord<'a> {
  source: &'a str,
  shape: (usize, usize),
  detections: &'a DetectionSet,
  labels: Vec<&'static str>,
}

/// 每帧一行 JSON，`detections` 为 `(N, 6)` 的行数组
pub struct JsonRecordOutput {
  writer: Mutex<Box<dyn Write + Send>>,
}

impl FromUrlWithScheme for JsonRecordOutput {
  const SCHEME: &'static str = "json";
}

impl FromUrl for JsonRecordOutput {
  type Error = JsonRecordError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(JsonRecordError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let path = decode_url_path(url);
    if path == STDOUT_PATH || path.is_empty() {
      return Ok(JsonRecordOutput::from_writer(std::io::stdout()));
    }
    JsonRecordOutput::create(path)
  }
}

impl JsonRecordOutput {
  pub fn from_writer<W: Write + Send + 'static>(writer: W) -> Self {
    JsonRecordOutput {
      writer: Mutex::new(Box::new(writer)),
    }
  }

  pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, JsonRecordError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    info!("检测记录写入: {}", path.display());
    let file = File::create(path)?;
    Ok(JsonRecordOutput::from_writer(BufWriter::new(file)))
  }
}

impl Render<SourcedFrame, DetectionSet> for JsonRecordOutput {
  type Error = JsonRecordError;

  fn render_result(&self, frame: &SourcedFrame, result: &DetectionSet) -> Result<(), Self::Error> {
    let record = JsonRecord {
      source: &frame.source,
      shape: result.shape(),
      detections: result,
      labels: result.iter().map(|d| coco_label(d.class_id)).collect(),
    };

    let mut writer = self
      .writer
      .lock()
      .map_err(|_| JsonRecordError::LockPoisoned)?;
    serde_json::to_writer(&mut *writer, &record)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{Arc, Mutex};

  use super::*;
  use crate::{detection::Detection, frame::Frame};

  #[derive(Clone, Default)]
  struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

  impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
      self.0.lock().unwrap().extend_from_slice(buf);
      Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
      Ok(())
    }
  }

  #[test]
  fn writes_one_line_per_frame() {
    let buffer = SharedBuffer::default();
    let output = JsonRecordOutput::from_writer(buffer.clone());
    let frame = SourcedFrame::new("img.png", Frame::zeros(2, 2, 3));

    let one: DetectionSet = vec![Detection {
      x1: 10.0,
      y1: 20.0,
      x2: 110.0,
      y2: 220.0,
      confidence: 0.5,
      class_id: 2,
    }]
    .into();
    output.render_result(&frame, &one).unwrap();
    output
      .render_result(&frame, &DetectionSet::default())
      .unwrap();

    let text = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(
      lines[0],
      r#"{"source":"img.png","shape":[1,6],"detections":[[10.0,20.0,110.0,220.0,0.5,2.0]],"labels":["car"]}"#
    );
    assert_eq!(
      lines[1],
      r#"{"source":"img.png","shape":[0,6],"detections":[],"labels":[]}"#
    );
  }

  #[test]
  fn dash_path_targets_stdout() {
    let url = Url::parse("json:-").unwrap();
    assert!(JsonRecordOutput::from_url(&url).is_ok());
  }
}

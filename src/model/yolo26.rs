// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/yolo26.rs - RKNN YOLO26 模型
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

use rknpu::{Context, InitFlags, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, RGB_CHANNELS},
  model::{DetectItem, Model, YOLO26_SCHEME},
  utils::{Letterbox, decode_url_path, sigmoid},
};

const YOLO26_NUM_INPUTS: u32 = 1;
const YOLO26_NUM_OUTPUTS: u32 = 6;
const YOLO26_CLASS_NUM: usize = 80;
const YOLO26_INPUT_SIZE: usize = 640;
const YOLO26_HEAD_SIZES: [(usize, usize); 3] = [(80, 80), (40, 40), (20, 20)];
const YOLO26_STRIDES: [f32; 3] = [8.0, 16.0, 32.0];
const YOLO26_OBJECT_THRESH: f32 = 0.5;

pub struct Yolo26 {
  context: Context,
}

#[derive(Error, Debug)]
pub enum Yolo26Error {
  #[error("模型加载错误: {0}")]
  ModelLoadError(std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(rknpu::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("不支持的通道数 {0}, 模型需要 RGB 三通道输入")]
  UnsupportedChannels(usize),
  #[error("输入图像为空")]
  EmptyFrame,
}

impl From<std::io::Error> for Yolo26Error {
  fn from(err: std::io::Error) -> Self {
    Yolo26Error::ModelLoadError(err)
  }
}

impl From<rknpu::Error> for Yolo26Error {
  fn from(err: rknpu::Error) -> Self {
    Yolo26Error::RknnError(err)
  }
}

impl Yolo26Error {
  pub fn invalid(msg: &str, e: rknpu::Error) -> Self {
    Yolo26Error::ModelInvalid(msg.to_string(), e)
  }
}

pub struct Yolo26Builder {
  model_path: PathBuf,
  flags: InitFlags,
}

impl FromUrlWithScheme for Yolo26Builder {
  const SCHEME: &'static str = YOLO26_SCHEME;
}

impl FromUrl for Yolo26Builder {
  type Error = Yolo26Error;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(Yolo26Error::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    Ok(Yolo26Builder {
      model_path: PathBuf::from(decode_url_path(url)),
      flags: InitFlags::default(),
    })
  }
}

impl Yolo26Builder {
  pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
    Yolo26Builder {
      model_path: path.as_ref().to_path_buf(),
      flags: InitFlags::default(),
    }
  }

  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn build(self) -> Result<Yolo26, Yolo26Error> {
    info!("加载模型文件: {}", self.model_path.display());
    let mode_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      mode_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&mode_data, self.flags)?;
    info!("模型加载完成");

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(Yolo26Error::invalid("无法查询 SDK 版本", e));
      }
    }

    let num_inputs = context
      .num_inputs()
      .map_err(|e| Yolo26Error::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| Yolo26Error::invalid("无法获取输出数量", e))?;

    if num_inputs != YOLO26_NUM_INPUTS || num_outputs != YOLO26_NUM_OUTPUTS {
      let msg = format!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        YOLO26_NUM_INPUTS, YOLO26_NUM_OUTPUTS, num_inputs, num_outputs
      );
      error!("{}", msg);
      return Err(Yolo26Error::invalid(&msg, rknpu::Error::InvalidModel));
    }

    Ok(Yolo26 { context })
  }
}

/// 根据张量大小匹配回归和分类输出
/// 返回 (reg, cls) 元组，如果大小不匹配则返回 None
fn match_reg_cls_tensors<'a>(
  tensor1: &'a [f32],
  tensor2: &'a [f32],
  reg_expected: usize,
  cls_expected: usize,
) -> Option<(&'a [f32], &'a [f32])> {
  if tensor1.len() == reg_expected && tensor2.len() == cls_expected {
    Some((tensor1, tensor2))
  } else if tensor1.len() == cls_expected && tensor2.len() == reg_expected {
    Some((tensor2, tensor1))
  } else {
    None
  }
}

/// 解码三个检测头，坐标先落在 640x640 输入上，再经 letterbox 还原到原图
fn decode_heads(heads: &[Option<(&[f32], &[f32])>], letterbox: &Letterbox) -> Vec<DetectItem> {
  let input_size = YOLO26_INPUT_SIZE as f32;
  let mut items = Vec::new();

  for (head_idx, ((&(map_h, map_w), stride), tensors)) in YOLO26_HEAD_SIZES
    .iter()
    .zip(YOLO26_STRIDES)
    .zip(heads)
    .enumerate()
  {
    let spatial = map_h * map_w;
    let Some((reg, cls)) =
      tensors.and_then(|(t1, t2)| match_reg_cls_tensors(t1, t2, 4 * spatial, YOLO26_CLASS_NUM * spatial))
    else {
      error!("检测头 {}: 输出缺失或大小不匹配", head_idx);
      continue;
    };

    for h in 0..map_h {
      for w in 0..map_w {
        let idx = h * map_w + w;

        let (score, class_id) = {
          let mut max_logit = f32::MIN;
          let mut cls_idx = 0usize;
          for c in 0..YOLO26_CLASS_NUM {
            let logit = cls[c * spatial + idx];
            if logit > max_logit {
              max_logit = logit;
              cls_idx = c;
            }
          }
          (sigmoid(max_logit), cls_idx as u32)
        };

        if score <= YOLO26_OBJECT_THRESH {
          continue;
        }

        let left = reg[idx];
        let top = reg[spatial + idx];
        let right = reg[2 * spatial + idx];
        let bottom = reg[3 * spatial + idx];

        let grid_x = (w as f32) + 0.5;
        let grid_y = (h as f32) + 0.5;

        let bbox = [
          ((grid_x - left) * stride).clamp(0.0, input_size),
          ((grid_y - top) * stride).clamp(0.0, input_size),
          ((grid_x + right) * stride).clamp(0.0, input_size),
          ((grid_y + bottom) * stride).clamp(0.0, input_size),
        ];

        items.push(DetectItem {
          class_id,
          score,
          bbox: letterbox.restore(bbox),
        });
      }
    }
  }

  items
}

impl Model for Yolo26 {
  type Prediction = DetectItem;
  type Error = Yolo26Error;

  fn load(identifier: &str) -> Result<Self, Self::Error> {
    match Url::parse(identifier) {
      Ok(url) if url.scheme() == Yolo26Builder::SCHEME => Yolo26Builder::from_url(&url)?.build(),
      _ => Yolo26Builder::from_path(identifier).build(),
    }
  }

  fn infer(&self, input: &Frame) -> Result<Vec<Self::Prediction>, Self::Error> {
    if input.channels() != RGB_CHANNELS {
      return Err(Yolo26Error::UnsupportedChannels(input.channels()));
    }
    if input.height() == 0 || input.width() == 0 {
      return Err(Yolo26Error::EmptyFrame);
    }

    let letterbox = Letterbox::for_frame(input, YOLO26_INPUT_SIZE);
    let nhwc = letterbox.apply_hwc(input);

    debug!("设置模型输入");
    self
      .context
      .set_input(0, &nhwc, rknpu::TensorFormat::NHWC, TensorType::UInt8)?;

    debug!("执行模型推理");
    self.context.run()?;

    debug!("获取模型输出");
    let output = self.context.get_outputs()?;

    let mut heads = Vec::with_capacity(YOLO26_HEAD_SIZES.len());
    for head_idx in 0..YOLO26_HEAD_SIZES.len() {
      let pair = match (output.get_f32(head_idx * 2), output.get_f32(head_idx * 2 + 1)) {
        (Ok(t1), Ok(t2)) => Some((t1, t2)),
        (Err(e), _) | (_, Err(e)) => {
          error!("获取检测头 {} 的输出失败: {}", head_idx, e);
          None
        }
      };
      heads.push(pair);
    }

    let items = decode_heads(&heads, &letterbox);
    debug!("检测到 {} 个物体", items.len());
    Ok(items)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn decodes_single_confident_cell() {
    let (map_h, map_w) = YOLO26_HEAD_SIZES[2];
    let spatial = map_h * map_w;
    let mut reg = vec![0.0f32; 4 * spatial];
    let mut cls = vec![-10.0f32; YOLO26_CLASS_NUM * spatial];

    // 第 (0, 0) 个格子，类别 2，左上右下距离均为 0.5 个步长
    for k in 0..4 {
      reg[k * spatial] = 0.5;
    }
    cls[2 * spatial] = 5.0;

    let letterbox = Letterbox::new(640, 640, 640);
    let heads = [None, None, Some((cls.as_slice(), reg.as_slice()))];
    let items = decode_heads(&heads, &letterbox);

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].class_id, 2);
    assert!(items[0].score > 0.99);
    assert_eq!(items[0].bbox, [0.0, 0.0, 32.0, 32.0]);
  }
}

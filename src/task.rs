// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task.rs - 推理任务
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
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::{Duration, Instant},
};

use anyhow::Context;
use tracing::{info, warn};

use crate::{
  detection::DetectionSet,
  detector::Detector,
  frame::SourcedFrame,
  model::Model,
  output::Render,
};

pub trait Task<I, M: Model, O>: Sized {
  type Error;
  fn run_task(self, input: I, detector: Detector<M>, output: O) -> Result<(), Self::Error>;
}

pub struct OneShotTask;

impl<
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = SourcedFrame>,
  M: Model,
  O: Render<SourcedFrame, DetectionSet, Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, detector: Detector<M>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功: {}", frame.source);
    let now = Instant::now();
    let result = detector.detect(&frame.frame)?;
    let elapsed = now.elapsed();
    info!("推理完成，检测到 {} 个物体，耗时: {:.2?}", result.len(), elapsed);
    output.render_result(&frame, &result)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

/// 对同一帧重复推理，统计平均耗时并检查结果是否稳定
pub struct RepeatShotTask {
  repeat: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    RepeatShotTask { repeat: 1000 }
  }
}

impl RepeatShotTask {
  pub fn with_repeat(mut self, repeat: usize) -> Self {
    self.repeat = repeat.max(1);
    self
  }
}

/// 去掉前两次预热后的平均耗时
pub fn average_after_warmup(times: &[Duration]) -> Option<Duration> {
  const WARMUP: usize = 2;
  let measured = times.get(WARMUP..).filter(|rest| !rest.is_empty()).unwrap_or(times);
  if measured.is_empty() {
    return None;
  }
  Some(measured.iter().sum::<Duration>() / measured.len() as u32)
}

impl<
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = SourcedFrame>,
  M: Model,
  O: Render<SourcedFrame, DetectionSet, Error = RE>,
> Task<I, M, O> for RepeatShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, detector: Detector<M>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let mut times = Vec::with_capacity(self.repeat);
    let mut first: Option<DetectionSet> = None;
    for i in 0..self.repeat {
      let now = Instant::now();
      let result = detector.detect(&frame.frame)?;
      let elapsed = now.elapsed();
      info!("({})推理完成，耗时: {:.2?}", i, elapsed);
      times.push(elapsed);

      if let Some(expected) = &first {
        if *expected != result {
          warn!("({})检测结果与首次推理不一致", i);
        }
      } else {
        output.render_result(&frame, &result)?;
        first = Some(result);
      }
    }

    if let Some(avg) = average_after_warmup(&times) {
      warn!("平均推理时间: {:.2?}", avg);
    }

    Ok(())
  }
}

#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  fn run_until<I, M, O, RE>(
    &self,
    input: I,
    detector: &Detector<M>,
    output: &O,
    stop: &AtomicBool,
  ) -> anyhow::Result<usize>
  where
    RE: std::error::Error + Sync + Send + 'static,
    I: Iterator<Item = SourcedFrame>,
    M: Model,
    O: Render<SourcedFrame, DetectionSet, Error = RE>,
  {
    let mut frame_index = 0;
    let mut total_detections = 0;
    for frame in input {
      frame_index += 1;
      info!("处理第 {} 帧图像: {}", frame_index, frame.source);
      let now = Instant::now();
      let result = detector
        .detect(&frame.frame)
        .with_context(|| format!("第 {} 帧推理失败: {}", frame_index, frame.source))?;
      let elapsed_a = now.elapsed();
      output.render_result(&frame, &result)?;
      let elapsed_b = now.elapsed();
      total_detections += result.len();
      info!("推理完成，耗时: {:.2?} / {:.2?}", elapsed_a, elapsed_b);

      if self.frame_number.map(|n| frame_index >= n).unwrap_or(false) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if stop.load(Ordering::SeqCst) {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!("共处理 {} 帧，检测到 {} 个物体", frame_index, total_detections);
    Ok(frame_index)
  }
}

impl<
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = SourcedFrame>,
  M: Model,
  O: Render<SourcedFrame, DetectionSet, Error = RE>,
> Task<I, M, O> for ContinuousTask
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, detector: Detector<M>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();

    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      handler_stop.store(true, Ordering::SeqCst);
    })
    .context("无法设置 Ctrl-C 处理函数")?;

    self.run_until(input, &detector, &output, &stop)?;
    info!("任务完成，退出");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::cell::RefCell;
  use std::convert::Infallible;

  use super::*;
  use crate::{
    frame::Frame,
    model::{DetectItem, Replay},
  };

  #[derive(Default)]
  struct Collect {
    seen: RefCell<Vec<(String, usize)>>,
  }

  impl Render<SourcedFrame, DetectionSet> for Collect {
    type Error = Infallible;

    fn render_result(&self, frame: &SourcedFrame, result: &DetectionSet) -> Result<(), Self::Error> {
      self
        .seen
        .borrow_mut()
        .push((frame.source.clone(), result.len()));
      Ok(())
    }
  }

  fn frames(n: usize) -> impl Iterator<Item = SourcedFrame> {
    (0..n).map(|i| SourcedFrame::new(format!("f{i}"), Frame::zeros(2, 2, 3)))
  }

  fn detector() -> Detector<Replay> {
    Detector::with_model(Replay::new(vec![DetectItem {
      class_id: 1,
      score: 0.8,
      bbox: [0.0, 0.0, 1.0, 1.0],
    }]))
  }

  #[test]
  fn continuous_stops_at_frame_number() {
    let output = Collect::default();
    let stop = AtomicBool::new(false);
    let processed = ContinuousTask::default()
      .with_frame_number(Some(2))
      .run_until(frames(5), &detector(), &output, &stop)
      .unwrap();

    assert_eq!(processed, 2);
    assert_eq!(
      output.seen.into_inner(),
      vec![("f0".to_string(), 1), ("f1".to_string(), 1)]
    );
  }

  #[test]
  fn continuous_honours_stop_flag() {
    let output = Collect::default();
    let stop = AtomicBool::new(true);
    let processed = ContinuousTask::default()
      .run_until(frames(5), &detector(), &output, &stop)
      .unwrap();
    assert_eq!(processed, 1);
  }

  #[test]
  fn oneshot_requires_a_frame() {
    let err = OneShotTask
      .run_task(frames(0), detector(), Collect::default())
      .unwrap_err();
    assert_eq!(err.to_string(), "没有输入帧");
  }

  #[test]
  fn repeatshot_renders_once() {
    let output = Collect::default();
    RepeatShotTask::default()
      .with_repeat(5)
      .run_task(frames(1), detector(), &output)
      .unwrap();
    assert_eq!(output.seen.into_inner().len(), 1);
  }

  #[test]
  fn average_skips_warmup() {
    let ms = Duration::from_millis;
    assert_eq!(average_after_warmup(&[]), None);
    assert_eq!(average_after_warmup(&[ms(9)]), Some(ms(9)));
    assert_eq!(
      average_after_warmup(&[ms(100), ms(50), ms(10), ms(20)]),
      Some(ms(15))
    );
  }
}

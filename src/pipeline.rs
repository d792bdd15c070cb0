// 该文件是 Shouwang （守望） 项目的一部分。
// src/pipeline.rs - 检测流水线
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
  collections::BTreeMap,
  panic::{AssertUnwindSafe, catch_unwind},
  sync::{
    Arc, Mutex, MutexGuard,
    mpsc::{self, RecvTimeoutError},
  },
  thread,
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  input::SharedCamera,
  label::{ClassCounts, ClassTaxonomy},
  model::{Detection, Detector},
  output::Render,
  status::{DetectionState, StatusEvaluation, StatusTiming},
};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("无法启动流水线线程 {name}: {source}")]
  SpawnError {
    name: String,
    #[source]
    source: std::io::Error,
  },
}

/// 单条流水线的配置
#[derive(Debug, Clone)]
pub struct PipelineConfig {
  pub name: String,
  pub interval: Duration,
  pub debounce: bool,
  pub timing: StatusTiming,
}

impl PipelineConfig {
  /// 按配置构造共享状态
  pub fn shared(&self, taxonomy: Arc<ClassTaxonomy>) -> Arc<PipelineShared> {
    Arc::new(PipelineShared::new(
      self.name.clone(),
      taxonomy,
      self.timing,
      self.debounce,
    ))
  }
}

/// 受同一把锁保护的状态与计数
#[derive(Debug)]
pub struct PipelineStatus {
  pub state: DetectionState,
  pub counts: ClassCounts,
}

/// 一次加锁取得的状态快照
#[derive(Debug, Clone)]
pub struct StatusReading {
  pub evaluation: StatusEvaluation,
  pub class_counts: BTreeMap<String, u32>,
}

/// 工作线程与查询接口共享的流水线状态
#[derive(Debug)]
pub struct PipelineShared {
  name: String,
  taxonomy: Arc<ClassTaxonomy>,
  status: Mutex<PipelineStatus>,
}

impl PipelineShared {
  pub fn new(
    name: impl Into<String>,
    taxonomy: Arc<ClassTaxonomy>,
    timing: StatusTiming,
    debounce: bool,
  ) -> Self {
    let counts = taxonomy.zero_counts();
    Self {
      name: name.into(),
      taxonomy,
      status: Mutex::new(PipelineStatus {
        state: DetectionState::new(timing, debounce),
        counts,
      }),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn taxonomy(&self) -> &ClassTaxonomy {
    &self.taxonomy
  }

  pub fn lock(&self) -> MutexGuard<'_, PipelineStatus> {
    self.status.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// 写入一个周期的计数并推进状态机
  pub fn record(&self, counts: ClassCounts, now: Instant) {
    let mut status = self.lock();
    status.state.observe(&counts, now);
    status.counts = counts;
  }

  /// 评估状态并读取计数，两者来自同一时刻
  pub fn read(&self, now: Instant) -> StatusReading {
    let mut status = self.lock();
    let evaluation = status.state.evaluate(now);
    StatusReading {
      evaluation,
      class_counts: status.counts.by_name(&self.taxonomy),
    }
  }

  pub fn class_counts(&self) -> BTreeMap<String, u32> {
    self.lock().counts.by_name(&self.taxonomy)
  }

  pub fn reset(&self, now: Instant) -> bool {
    self.lock().state.reset(now)
  }
}

/// 检测流水线：取帧、检测、计数、更新状态、发布标注帧
pub struct Pipeline<D, O> {
  config: PipelineConfig,
  camera: SharedCamera,
  detector: D,
  output: O,
  shared: Arc<PipelineShared>,
  cycle: u64,
}

impl<D, O> Pipeline<D, O>
where
  D: Detector,
  O: Render,
{
  pub fn new(
    config: PipelineConfig,
    camera: SharedCamera,
    detector: D,
    output: O,
    shared: Arc<PipelineShared>,
  ) -> Self {
    Self {
      config,
      camera,
      detector,
      output,
      shared,
      cycle: 0,
    }
  }

  pub fn name(&self) -> &str {
    &self.config.name
  }

  pub fn shared(&self) -> &Arc<PipelineShared> {
    &self.shared
  }

  /// 执行一个采样周期，返回本周期是否取到了帧
  pub fn run_cycle(&mut self, now: Instant) -> bool {
    let frame = match self.camera.latest_frame() {
      Ok(Some(frame)) => frame,
      Ok(None) => {
        warn!("[{}] 摄像头暂无可用帧, 跳过本周期", self.config.name);
        return false;
      }
      Err(e) => {
        warn!("[{}] 取帧失败, 跳过本周期: {}", self.config.name, e);
        return false;
      }
    };
    self.cycle = self.cycle.wrapping_add(1);

    let detections = self.detect(&frame);
    let mut counts = self.shared.taxonomy().zero_counts();
    for detection in &detections {
      if !counts.increment(detection.label_id) {
        debug!(
          "[{}] 未配置的类别 {}, 不计数",
          self.config.name, detection.label_id
        );
      }
    }
    let summary = counts.by_name(self.shared.taxonomy());
    self.shared.record(counts, now);

    let cycle = self.cycle;
    match catch_unwind(AssertUnwindSafe(|| {
      self.output.render_result(&frame, &detections, cycle)
    })) {
      Ok(Ok(())) => {}
      Ok(Err(e)) => error!("[{}] 发布标注帧失败: {}", self.config.name, e),
      Err(_) => error!("[{}] 标注或编码时发生 panic", self.config.name),
    }

    let (active, tracking) = {
      let status = self.shared.lock();
      (status.state.is_active(), status.state.is_tracking())
    };
    info!(
      pipeline = %self.config.name,
      cycle = self.cycle,
      active,
      tracking,
      "检测计数: {:?}",
      summary
    );
    true
  }

  /// 检测器的错误或 panic 都视为本周期无检测结果
  fn detect(&self, frame: &image::RgbImage) -> Vec<Detection> {
    match catch_unwind(AssertUnwindSafe(|| self.detector.infer(frame))) {
      Ok(Ok(detections)) => {
        for d in &detections {
          debug!(
            "[{}] 检测到 {} ({:.2}) {:?}",
            self.config.name, d.label_id, d.confidence, d.bbox
          );
        }
        detections
      }
      Ok(Err(e)) => {
        error!("[{}] 检测失败: {}", self.config.name, e);
        Vec::new()
      }
      Err(_) => {
        error!("[{}] 检测器发生 panic", self.config.name);
        Vec::new()
      }
    }
  }
}

impl<D, O> Pipeline<D, O>
where
  D: Detector + 'static,
  O: Render + Send + 'static,
{
  /// 在独立线程上循环执行，直到句柄被停止
  pub fn spawn(mut self) -> Result<PipelineHandle, PipelineError> {
    let name = self.config.name.clone();
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

    let handle = thread::Builder::new()
      .name(format!("pipeline-{}", name))
      .spawn(move || {
        info!(
          "[{}] 流水线启动, 采样间隔 {:?}",
          self.config.name, self.config.interval
        );
        loop {
          self.run_cycle(Instant::now());
          match shutdown_rx.recv_timeout(self.config.interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
          }
        }
        info!("[{}] 流水线退出", self.config.name);
      })
      .map_err(|source| PipelineError::SpawnError {
        name: name.clone(),
        source,
      })?;

    Ok(PipelineHandle {
      name,
      shutdown: Some(shutdown_tx),
      handle: Some(handle),
    })
  }
}

/// 流水线线程句柄
pub struct PipelineHandle {
  name: String,
  shutdown: Option<mpsc::Sender<()>>,
  handle: Option<thread::JoinHandle<()>>,
}

impl PipelineHandle {
  pub fn name(&self) -> &str {
    &self.name
  }

  /// 通知线程退出并等待当前周期结束
  pub fn stop(mut self) {
    if let Some(tx) = self.shutdown.take() {
      let _ = tx.send(());
    }
    if let Some(handle) = self.handle.take()
      && handle.join().is_err()
    {
      error!("[{}] 流水线线程异常退出", self.name);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  use image::RgbImage;

  use crate::{
    input::{FrameSource, InputError},
    label::ClassEntry,
  };

  struct StillCamera;

  impl FrameSource for StillCamera {
    fn grab(&mut self) -> Result<(), InputError> {
      Ok(())
    }

    fn retrieve(&mut self) -> Result<Option<RgbImage>, InputError> {
      Ok(Some(RgbImage::new(8, 8)))
    }
  }

  struct BrokenCamera;

  impl FrameSource for BrokenCamera {
    fn grab(&mut self) -> Result<(), InputError> {
      Err(InputError::Unavailable("unplugged".to_string()))
    }

    fn retrieve(&mut self) -> Result<Option<RgbImage>, InputError> {
      Ok(None)
    }
  }

  #[derive(Debug, Error)]
  #[error("detector offline")]
  struct Offline;

  /// 按调用次数依次返回预设结果
  struct ScriptedDetector {
    script: Vec<Result<Vec<u32>, ()>>,
    calls: AtomicUsize,
  }

  impl ScriptedDetector {
    fn new(script: Vec<Result<Vec<u32>, ()>>) -> Self {
      Self {
        script,
        calls: AtomicUsize::new(0),
      }
    }
  }

  impl Detector for ScriptedDetector {
    type Error = Offline;

    fn infer(&self, _frame: &RgbImage) -> Result<Vec<Detection>, Self::Error> {
      let call = self.calls.fetch_add(1, Ordering::SeqCst);
      match self.script.get(call) {
        Some(Ok(labels)) => Ok(
          labels
            .iter()
            .map(|&label_id| Detection {
              label_id,
              bbox: [1.0, 1.0, 4.0, 4.0],
              confidence: 0.9,
            })
            .collect(),
        ),
        Some(Err(())) => Err(Offline),
        None => panic!("script exhausted"),
      }
    }
  }

  #[derive(Default)]
  struct CountingOutput {
    rendered: AtomicUsize,
  }

  impl Render for Arc<CountingOutput> {
    type Error = Offline;

    fn render_result(&self, _: &RgbImage, _: &[Detection], _: u64) -> Result<(), Self::Error> {
      self.rendered.fetch_add(1, Ordering::SeqCst);
      Ok(())
    }
  }

  struct PanickingOutput;

  impl Render for PanickingOutput {
    type Error = Offline;

    fn render_result(&self, _: &RgbImage, _: &[Detection], _: u64) -> Result<(), Self::Error> {
      panic!("encoder crashed")
    }
  }

  fn shared() -> Arc<PipelineShared> {
    config().shared(Arc::new(taxonomy()))
  }

  fn taxonomy() -> ClassTaxonomy {
    ClassTaxonomy::new([
      ClassEntry {
        id: 0,
        name: "hole".to_string(),
        color: [255, 0, 0],
      },
      ClassEntry {
        id: 1,
        name: "wither".to_string(),
        color: [127, 255, 212],
      },
    ])
    .unwrap()
  }

  fn config() -> PipelineConfig {
    PipelineConfig {
      name: "abnormal".to_string(),
      interval: Duration::from_millis(10),
      debounce: true,
      timing: StatusTiming::default(),
    }
  }

  #[test]
  fn counts_are_replaced_every_cycle() {
    let shared = shared();
    let output = Arc::new(CountingOutput::default());
    let detector = ScriptedDetector::new(vec![Ok(vec![0, 0, 1, 7]), Ok(vec![])]);
    let mut pipeline = Pipeline::new(
      config(),
      SharedCamera::new(StillCamera),
      detector,
      output.clone(),
      shared.clone(),
    );

    let t0 = Instant::now();
    assert!(pipeline.run_cycle(t0));
    let counts = shared.class_counts();
    assert_eq!(counts["hole"], 2);
    assert_eq!(counts["wither"], 1);
    assert_eq!(counts.len(), 2);
    assert!(shared.lock().state.is_active());

    assert!(pipeline.run_cycle(t0 + Duration::from_secs(1)));
    assert!(shared.class_counts().values().all(|&c| c == 0));
    assert!(!shared.lock().state.is_active());
    assert_eq!(output.rendered.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn detector_failure_counts_as_empty() {
    let shared = shared();
    let output = Arc::new(CountingOutput::default());
    let detector = ScriptedDetector::new(vec![Ok(vec![0]), Err(())]);
    let mut pipeline = Pipeline::new(
      config(),
      SharedCamera::new(StillCamera),
      detector,
      output.clone(),
      shared.clone(),
    );

    let t0 = Instant::now();
    pipeline.run_cycle(t0);
    assert!(shared.lock().state.is_active());
    pipeline.run_cycle(t0 + Duration::from_secs(1));
    assert!(!shared.lock().state.is_active());
    // 检测失败时仍发布原始帧
    assert_eq!(output.rendered.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn detector_panic_is_contained() {
    let shared = shared();
    let output = Arc::new(CountingOutput::default());
    let mut pipeline = Pipeline::new(
      config(),
      SharedCamera::new(StillCamera),
      ScriptedDetector::new(vec![]),
      output.clone(),
      shared.clone(),
    );

    assert!(pipeline.run_cycle(Instant::now()));
    assert!(!shared.lock().state.is_active());
    assert_eq!(output.rendered.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn render_panic_keeps_worker_alive() {
    let shared = shared();
    let detector = ScriptedDetector::new(vec![Ok(vec![0]), Ok(vec![])]);
    let mut pipeline = Pipeline::new(
      config(),
      SharedCamera::new(StillCamera),
      detector,
      PanickingOutput,
      shared.clone(),
    );

    let t0 = Instant::now();
    assert!(pipeline.run_cycle(t0));
    assert!(shared.lock().state.is_active());
    assert!(pipeline.run_cycle(t0 + Duration::from_secs(1)));
    assert!(!shared.lock().state.is_active());
  }

  #[test]
  fn acquisition_failure_skips_cycle() {
    let shared = shared();
    let output = Arc::new(CountingOutput::default());
    let detector = ScriptedDetector::new(vec![Ok(vec![0])]);
    let mut pipeline = Pipeline::new(
      config(),
      SharedCamera::new(BrokenCamera),
      detector,
      output.clone(),
      shared.clone(),
    );

    assert!(!pipeline.run_cycle(Instant::now()));
    assert_eq!(output.rendered.load(Ordering::SeqCst), 0);
    assert!(!shared.lock().state.is_active());
  }

  #[test]
  fn spawned_pipeline_stops_promptly() {
    let shared = shared();
    let output = Arc::new(CountingOutput::default());
    let detector = ScriptedDetector::new(vec![Ok(vec![1]); 10_000]);
    let mut config = config();
    config.interval = Duration::from_secs(3600);
    let handle = Pipeline::new(
      config,
      SharedCamera::new(StillCamera),
      detector,
      output.clone(),
      shared.clone(),
    )
    .spawn()
    .unwrap();
    assert_eq!(handle.name(), "abnormal");

    let deadline = Instant::now() + Duration::from_secs(5);
    while output.rendered.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
      thread::sleep(Duration::from_millis(5));
    }
    let started = Instant::now();
    handle.stop();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(output.rendered.load(Ordering::SeqCst), 1);
    assert!(shared.lock().state.is_active());
  }
}

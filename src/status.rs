// 该文件是 Shouwang （守望） 项目的一部分。
// src/status.rs - 检测状态去抖与通知节流
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

//! # 检测状态机
//!
//! 将逐帧、带噪声的检测结果转换为稳定的状态：
//!
//! - `Inactive` 任一类别计数大于 0 时进入 `Active`
//! - `Active` 所有计数归零时回到 `Inactive`
//! - `Active` 持续时间超过追踪时限后仍保持 `Active`，但 `tracking` 置为 false
//! - 任意状态收到手动重置后进入 `Frozen`，冻结期内检测结果不会重新激活状态
//! - `Frozen` 截止时间到达后，按当前周期的计数重新判定
//!
//! 通知节流与状态机正交：只有在状态激活、持续时间达到阈值、且距上次通知
//! 超过通知间隔时，查询才会得到 `should_notify == true`，并同时记录本次通知时间。
//!
//! 所有时间相关的操作都显式接收 `now`，便于测试。

use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

use crate::label::ClassCounts;

/// 状态机的时间参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTiming {
  /// 追踪时限，超过后 `tracking` 置为 false
  pub tracking_time_limit: Duration,
  /// 可通知的最小持续检测时间
  pub notification_threshold: Duration,
  /// 两次通知之间的最小间隔
  pub notification_interval: Duration,
  /// 手动重置后的冻结时长
  pub freeze_duration: Duration,
}

impl Default for StatusTiming {
  fn default() -> Self {
    Self {
      tracking_time_limit: Duration::from_secs(5),
      notification_threshold: Duration::from_secs(5),
      notification_interval: Duration::from_secs(5 * 60 * 60),
      freeze_duration: Duration::from_secs(100),
    }
  }
}

/// 对外可见的状态阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  Inactive,
  Active,
  Frozen,
}

/// 一次状态查询的结果
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEvaluation {
  pub detected: bool,
  pub tracking: bool,
  /// 仅在 `should_notify` 为 true 时为持续秒数（保留两位小数），否则为 0
  pub time_since_detection: f64,
  pub should_notify: bool,
  pub detected_since: Option<DateTime<Local>>,
  pub last_changed_at: DateTime<Local>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Freeze {
  Until(Instant),
  Indefinite,
}

/// 单条流水线的去抖状态
#[derive(Debug, Clone)]
pub struct DetectionState {
  timing: StatusTiming,
  debounce: bool,
  active: bool,
  first_detected_at: Option<Instant>,
  tracking_active: bool,
  freeze: Option<Freeze>,
  // None 表示从未通知过，首次满足条件时必然可通知
  last_notified_at: Option<Instant>,
  detected_since: Option<DateTime<Local>>,
  last_changed_at: DateTime<Local>,
}

impl DetectionState {
  pub fn new(timing: StatusTiming, debounce: bool) -> Self {
    Self {
      timing,
      debounce,
      active: false,
      first_detected_at: None,
      tracking_active: false,
      freeze: None,
      last_notified_at: None,
      detected_since: None,
      last_changed_at: Local::now(),
    }
  }

  pub fn is_active(&self) -> bool {
    self.active
  }

  pub fn is_tracking(&self) -> bool {
    self.tracking_active
  }

  /// 冻结截止时间；未冻结或无限期冻结时为 `None`
  pub fn frozen_until(&self) -> Option<Instant> {
    match self.freeze {
      Some(Freeze::Until(deadline)) => Some(deadline),
      _ => None,
    }
  }

  pub fn phase(&self, now: Instant) -> Phase {
    if self.is_frozen(now) {
      Phase::Frozen
    } else if self.active {
      Phase::Active
    } else {
      Phase::Inactive
    }
  }

  fn is_frozen(&self, now: Instant) -> bool {
    match self.freeze {
      Some(Freeze::Until(deadline)) => now < deadline,
      Some(Freeze::Indefinite) => true,
      None => false,
    }
  }

  /// 自首次检测以来的持续时间，未激活时为 0
  pub fn elapsed(&self, now: Instant) -> Duration {
    match (self.active, self.first_detected_at) {
      (true, Some(since)) => now.saturating_duration_since(since),
      _ => Duration::ZERO,
    }
  }

  /// 用一个采样周期的计数更新状态
  pub fn observe(&mut self, counts: &ClassCounts, now: Instant) {
    if self.debounce {
      if self.is_frozen(now) {
        return;
      }
      self.freeze = None;
    }

    if counts.any_detected() {
      if !self.active {
        self.activate(now);
      }
    } else if self.active {
      self.deactivate();
    }

    if self.tracking_active
      && let Some(since) = self.first_detected_at
      && now.saturating_duration_since(since) >= self.timing.tracking_time_limit
    {
      self.tracking_active = false;
    }
  }

  /// 手动重置：立即置为未激活，并在启用去抖时重新设置冻结截止时间
  pub fn reset(&mut self, now: Instant) -> bool {
    if self.active {
      self.deactivate();
    }
    if self.debounce {
      // 截止时间超出 Instant 的表示范围时视为无限期冻结
      self.freeze = Some(
        now
          .checked_add(self.timing.freeze_duration)
          .map_or(Freeze::Indefinite, Freeze::Until),
      );
    }
    self.active
  }

  /// 查询当前状态，满足通知条件时记录通知时间
  pub fn evaluate(&mut self, now: Instant) -> StatusEvaluation {
    let elapsed = self.elapsed(now);

    let interval_passed = self
      .last_notified_at
      .is_none_or(|last| now.saturating_duration_since(last) >= self.timing.notification_interval);
    let should_notify =
      self.active && elapsed >= self.timing.notification_threshold && interval_passed;

    if should_notify {
      self.last_notified_at = Some(now);
    }

    let time_since_detection = if should_notify {
      (elapsed.as_secs_f64() * 100.0).round() / 100.0
    } else {
      0.0
    };

    StatusEvaluation {
      detected: self.active,
      tracking: self.tracking_active,
      time_since_detection,
      should_notify,
      detected_since: self.detected_since,
      last_changed_at: self.last_changed_at,
    }
  }

  fn activate(&mut self, now: Instant) {
    self.active = true;
    self.first_detected_at = Some(now);
    self.tracking_active = true;
    self.detected_since = Some(Local::now());
    self.last_changed_at = Local::now();
  }

  fn deactivate(&mut self) {
    self.active = false;
    self.first_detected_at = None;
    self.tracking_active = false;
    self.detected_since = None;
    self.last_changed_at = Local::now();
  }
}

//! 控制循环状态
//!
//! ```text
//! Idle → Running → Stopping → Idle
//! ```
//!
//! 状态以原子变量保存，`start()` / `stop()` 用比较并交换保证同一时刻只有一个转换生效。

use std::sync::atomic::{AtomicU8, Ordering};

/// 控制循环状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum LoopState {
    /// 未运行（默认）
    #[default]
    Idle = 0,
    /// 控制循环运行中
    Running = 1,
    /// 正在停止（等待后台线程退出）
    Stopping = 2,
}

impl LoopState {
    /// 从 u8 转换
    ///
    /// 如果值无效，返回 Idle。
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Idle,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_running(self) -> bool {
        self == Self::Running
    }
}

/// 控制循环状态（原子版本，用于线程间共享）
#[derive(Debug, Default)]
pub struct AtomicLoopState {
    inner: AtomicU8,
}

impl AtomicLoopState {
    pub fn new(state: LoopState) -> Self {
        Self {
            inner: AtomicU8::new(state.as_u8()),
        }
    }

    pub fn get(&self) -> LoopState {
        LoopState::from_u8(self.inner.load(Ordering::Acquire))
    }

    pub fn set(&self, state: LoopState) {
        self.inner.store(state.as_u8(), Ordering::Release);
    }

    /// 比较并交换（Compare-and-Swap）
    ///
    /// 成功返回 `Ok(previous)`，失败返回 `Err(actual)`。
    pub fn compare_exchange(&self, current: LoopState, new: LoopState) -> Result<LoopState, LoopState> {
        self.inner
            .compare_exchange(current.as_u8(), new.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .map(LoopState::from_u8)
            .map_err(LoopState::from_u8)
    }
}

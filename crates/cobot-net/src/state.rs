//! 连接状态定义
//!
//! `ConnectionState` 描述一条物理链路的生命周期：
//!
//! ```text
//! Disconnected → Connecting → Connected → Disconnected
//!                     └──────→ Failed
//! ```
//!
//! 状态以原子变量共享：控制循环无锁读取，连接管理器在持锁时写入。

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// 链路状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ConnectionState {
    /// 未连接（默认）
    #[default]
    Disconnected = 0,
    /// 正在建立连接
    Connecting = 1,
    /// 已连接
    Connected = 2,
    /// 连接失败（需调用方显式重连）
    Failed = 3,
}

impl ConnectionState {
    /// 从 u8 转换
    ///
    /// 无效值视为 `Disconnected`。
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Failed,
            _ => Self::Disconnected,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

/// 链路状态（原子版本，用于线程间共享）
#[derive(Debug, Default)]
pub struct AtomicConnectionState {
    inner: AtomicU8,
}

impl AtomicConnectionState {
    pub fn new(state: ConnectionState) -> Self {
        Self {
            inner: AtomicU8::new(state.as_u8()),
        }
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.load(Ordering::Acquire))
    }

    pub fn set(&self, state: ConnectionState) {
        self.inner.store(state.as_u8(), Ordering::Release);
    }

    /// 比较并交换，成功返回 true
    pub fn compare_exchange(&self, current: ConnectionState, new: ConnectionState) -> bool {
        self.inner
            .compare_exchange(
                current.as_u8(),
                new.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// 链路状态变化事件
///
/// `generation` 在每次成功连接时递增，用于丢弃旧连接迟到的事件。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected { generation: u64 },
    Disconnected { generation: u64 },
    Failed { generation: u64 },
}

impl ConnectionEvent {
    pub fn generation(&self) -> u64 {
        match *self {
            Self::Connected { generation }
            | Self::Disconnected { generation }
            | Self::Failed { generation } => generation,
        }
    }
}

/// 链路共享视图：当前状态 + 当前连接代数
///
/// 由 `ConnectionManager` 写入，控制循环和句柄无锁读取。
#[derive(Debug, Default)]
pub struct LinkStatus {
    state: AtomicConnectionState,
    generation: AtomicU64,
}

impl LinkStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// 当前活动连接的代数，未连接时返回 `None`
    pub fn connected_generation(&self) -> Option<u64> {
        let generation = self.generation();
        self.state().is_connected().then_some(generation)
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.set(state);
    }

    /// 开始新一代连接，返回新的代数
    pub(crate) fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// 连接句柄
///
/// 套接字本身归 `ConnectionManager` 独占；句柄只是一份廉价的只读视图，
/// 可以 Clone 到任意线程查询链路是否仍然存活。
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    generation: u64,
    peer: SocketAddr,
    link: Arc<LinkStatus>,
}

impl ConnectionHandle {
    pub(crate) fn new(generation: u64, peer: SocketAddr, link: Arc<LinkStatus>) -> Self {
        Self {
            generation,
            peer,
            link,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        if self.link.generation() == self.generation {
            self.link.state()
        } else {
            ConnectionState::Disconnected
        }
    }

    /// 句柄对应的连接是否仍然是当前的活动连接
    ///
    /// 重连后旧句柄的 generation 落后，返回 false。
    pub fn is_alive(&self) -> bool {
        self.link.connected_generation() == Some(self.generation)
    }
}

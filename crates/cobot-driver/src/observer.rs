//! 状态观察者注册表
//!
//! 观察者通过 `Arc<dyn StateObserver>` 注册，身份由 `Arc` 的数据指针决定：
//! 同一个 `Arc`（或其克隆）重复注册是空操作，注销未知观察者也是空操作。
//!
//! # 并发模型
//!
//! - 注册/注销在写锁内修改列表，然后发布一份新的不可变快照（ArcSwap）；
//! - 控制循环分发时无锁加载快照，回调期间不持有任何锁，
//!   因此回调内部可以再调用驱动 API（包括 attach/detach）而不会死锁。

use arc_swap::ArcSwap;
use cobot_protocol::RobotState;
use parking_lot::Mutex;
use std::sync::Arc;

/// 状态观察者
///
/// 回调在控制循环线程上执行，必须尽快返回：耗时操作请转发到其他线程
/// （例如 `crossbeam_channel::Sender::try_send`）。
pub trait StateObserver: Send + Sync {
    /// 收到新的状态快照
    fn on_state_update(&self, state: &Arc<RobotState>);

    /// 链路建立（每条连接一次）
    fn on_connect(&self) {}

    /// 链路断开（每条连接一次）
    fn on_disconnect(&self) {}
}

type ObserverList = Vec<Arc<dyn StateObserver>>;

pub struct ObserverRegistry {
    /// 写端列表（仅注册/注销时加锁）
    writers: Mutex<ObserverList>,
    /// 分发用快照
    snapshot: ArcSwap<ObserverList>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self {
            writers: Mutex::new(Vec::new()),
            snapshot: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// 注册观察者，返回是否为新注册
    pub fn attach(&self, observer: Arc<dyn StateObserver>) -> bool {
        let mut list = self.writers.lock();
        if list.iter().any(|o| same_observer(o, &observer)) {
            return false;
        }
        list.push(observer);
        self.snapshot.store(Arc::new(list.clone()));
        true
    }

    /// 注销观察者，返回是否确实移除了
    pub fn detach(&self, observer: &Arc<dyn StateObserver>) -> bool {
        let mut list = self.writers.lock();
        let before = list.len();
        list.retain(|o| !same_observer(o, observer));
        if list.len() == before {
            return false;
        }
        self.snapshot.store(Arc::new(list.clone()));
        true
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 当前观察者快照（无锁）
    pub fn snapshot(&self) -> Arc<ObserverList> {
        self.snapshot.load_full()
    }

    pub(crate) fn notify_state(&self, state: &Arc<RobotState>) {
        for observer in self.snapshot().iter() {
            observer.on_state_update(state);
        }
    }

    pub(crate) fn notify_connect(&self) {
        for observer in self.snapshot().iter() {
            observer.on_connect();
        }
    }

    pub(crate) fn notify_disconnect(&self) {
        for observer in self.snapshot().iter() {
            observer.on_disconnect();
        }
    }
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// 只比较数据指针（忽略 vtable）
fn same_observer(a: &Arc<dyn StateObserver>, b: &Arc<dyn StateObserver>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        updates: AtomicUsize,
        connects: AtomicUsize,
        disconnects: AtomicUsize,
    }

    impl StateObserver for Counter {
        fn on_state_update(&self, _state: &Arc<RobotState>) {
            self.updates.fetch_add(1, Ordering::SeqCst);
        }

        fn on_connect(&self) {
            self.connects.fetch_add(1, Ordering::SeqCst);
        }

        fn on_disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_attach_is_idempotent() {
        let registry = ObserverRegistry::new();
        let counter = Arc::new(Counter::default());
        let observer: Arc<dyn StateObserver> = counter.clone();

        assert!(registry.attach(observer.clone()));
        assert!(!registry.attach(observer.clone()));
        assert_eq!(registry.len(), 1);

        registry.notify_state(&Arc::new(RobotState::default()));
        assert_eq!(counter.updates.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_detach_unknown_is_noop() {
        let registry = ObserverRegistry::new();
        let known: Arc<dyn StateObserver> = Arc::new(Counter::default());
        let unknown: Arc<dyn StateObserver> = Arc::new(Counter::default());

        registry.attach(known.clone());
        assert!(!registry.detach(&unknown));
        assert_eq!(registry.len(), 1);
        assert!(registry.detach(&known));
        assert!(registry.is_empty());
        assert!(!registry.detach(&known));
    }

    #[test]
    fn test_snapshot_is_stable_during_changes() {
        let registry = ObserverRegistry::new();
        let first: Arc<dyn StateObserver> = Arc::new(Counter::default());
        registry.attach(first.clone());

        let snapshot = registry.snapshot();
        registry.detach(&first);
        // 已取出的快照不受后续修改影响
        assert_eq!(snapshot.len(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_link_notifications() {
        let registry = ObserverRegistry::new();
        let counter = Arc::new(Counter::default());
        registry.attach(counter.clone());

        registry.notify_connect();
        registry.notify_disconnect();
        assert_eq!(counter.connects.load(Ordering::SeqCst), 1);
        assert_eq!(counter.disconnects.load(Ordering::SeqCst), 1);
    }

    struct Reentrant {
        registry: Arc<ObserverRegistry>,
        extra: Arc<dyn StateObserver>,
    }

    impl StateObserver for Reentrant {
        fn on_state_update(&self, _state: &Arc<RobotState>) {
            self.registry.attach(self.extra.clone());
        }
    }

    #[test]
    fn test_observer_may_attach_from_callback() {
        let registry = Arc::new(ObserverRegistry::new());
        let extra: Arc<dyn StateObserver> = Arc::new(Counter::default());
        registry.attach(Arc::new(Reentrant {
            registry: registry.clone(),
            extra: extra.clone(),
        }));

        registry.notify_state(&Arc::new(RobotState::default()));
        assert_eq!(registry.len(), 2);
    }
}

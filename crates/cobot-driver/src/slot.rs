//! 最新值插槽（Latest-Value Slot）
//!
//! 单元素、后写覆盖（last-write-wins）的共享单元，用于调用方与控制循环之间传递命令目标。
//!
//! - 写端（调用方线程）正常加锁，覆盖旧值，不排队；
//! - 读端（控制循环）只用 `try_lock`，拿不到锁时沿用上一周期读到的值。
//!
//! 这是**有意的有损设计**：读端可能落后一个周期，但永远不会阻塞实时循环，
//! 也永远不会发送一个已经被覆盖过的旧值之前的值。

use parking_lot::Mutex;

pub struct LatestSlot<T> {
    inner: Mutex<T>,
}

impl<T> LatestSlot<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// 加锁修改（写端）
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// 非阻塞修改，锁被占用时返回 `None`
    pub fn try_update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.inner.try_lock().map(|mut guard| f(&mut guard))
    }
}

impl<T: Clone> LatestSlot<T> {
    pub fn load(&self) -> T {
        self.inner.lock().clone()
    }
}

impl<T: Default> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// 带缓存的非阻塞读端
///
/// 记住上一次成功读到的值，`try_lock` 失败时原样返回。
#[derive(Debug, Clone)]
pub struct CachedReader<T> {
    last: T,
}

impl<T: Clone> CachedReader<T> {
    pub fn new(initial: T) -> Self {
        Self { last: initial }
    }

    /// 读取插槽
    ///
    /// `observe` 在持锁时调用，可顺带标记插槽内的值（例如"已被读端看到"）。
    /// 返回值中的 `bool` 表示本次是否读到新值（false 表示沿用缓存）。
    pub fn read(&mut self, slot: &LatestSlot<T>, observe: impl FnOnce(&mut T)) -> (&T, bool) {
        let fresh = slot
            .try_update(|value| {
                observe(value);
                value.clone()
            })
            .map(|value| self.last = value)
            .is_some();
        (&self.last, fresh)
    }

    pub fn last(&self) -> &T {
        &self.last
    }

    /// 修改缓存（读端自己提交了修改时同步）
    pub fn last_mut(&mut self) -> &mut T {
        &mut self.last
    }
}

//! Mesa 语义的条件变量。每个等待者睡在自己的一次性信号量上

use alloc::vec::Vec;
use core::cmp::Reverse;

use triomphe::Arc;

use crate::{thread::Priority, KThread, Lock, Semaphore, SpinMutex};

pub struct Condvar {
    waiters: SpinMutex<Vec<CondWaiter>>,
}

struct CondWaiter {
    thread: Arc<KThread>,
    sema: Arc<Semaphore>,
}

impl Condvar {
    pub const fn new() -> Self {
        Self {
            waiters: SpinMutex::new(Vec::new()),
        }
    }

    /// 原子地释放 `lock` 并睡眠，被唤醒后重新获取 `lock` 再返回
    ///
    /// 返回时条件不一定成立，调用方应在循环中检查
    pub async fn wait(&self, lock: &Lock, cur: &Arc<KThread>) {
        assert!(
            lock.is_held_by(cur),
            "thread {} waits on a condvar without holding its lock",
            cur.name()
        );
        let sema = Arc::new(Semaphore::new(0));
        self.waiters.lock().push(CondWaiter {
            thread: Arc::clone(cur),
            sema: Arc::clone(&sema),
        });
        // 中途被取消时把自己从等待队列中摘掉。若已被 signal 选中而没来得及消费，
        // 这次唤醒转交给下一个等待者
        scopeguard::defer! {
            self.waiters.lock().retain(|w| !Arc::ptr_eq(&w.sema, &sema));
            if sema.try_down() {
                self.wake_highest();
            }
        }
        lock.release(cur);
        // 先于上面的 guard 析构，被取消时未消费的唤醒已回到 `sema` 中
        let signalled = sema.down(cur);
        signalled.await;
        lock.acquire(cur).await;
    }

    /// 唤醒优先级最高的等待者（同优先级时最早的），返回其优先级
    pub fn signal(&self, lock: &Lock, cur: &Arc<KThread>) -> Option<Priority> {
        assert!(
            lock.is_held_by(cur),
            "thread {} signals a condvar without holding its lock",
            cur.name()
        );
        self.wake_highest()
    }

    /// 唤醒所有等待者，返回其中的最高优先级
    pub fn broadcast(&self, lock: &Lock, cur: &Arc<KThread>) -> Option<Priority> {
        assert!(
            lock.is_held_by(cur),
            "thread {} broadcasts a condvar without holding its lock",
            cur.name()
        );
        let mut highest = None;
        while let Some(priority) = self.wake_highest() {
            highest = highest.max(Some(priority));
        }
        highest
    }

    fn wake_highest(&self) -> Option<Priority> {
        let waiter = self.take_highest()?;
        let priority = waiter.thread.priority();
        waiter.sema.up();
        Some(priority)
    }

    pub fn waiters(&self) -> usize {
        self.waiters.lock().len()
    }

    fn take_highest(&self) -> Option<CondWaiter> {
        let mut waiters = self.waiters.lock();
        let (idx, _) = waiters
            .iter()
            .enumerate()
            .max_by_key(|(idx, w)| (w.thread.priority(), Reverse(*idx)))?;
        Some(waiters.remove(idx))
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

//! 带优先级捐赠的睡眠锁
//!
//! 等待者的优先级高于持有者时，持有者被提升到等待者的优先级，并沿等待链
//! （持有者正在等的锁 -> 那把锁的持有者 -> ...）继续传递，遇到优先级不低于
//! 捐赠者的一环即停止。释放时重新计算：max(基础优先级, 仍持有的锁上的等待者)

use core::{
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use triomphe::Arc;

use crate::{
    condvar::Condvar,
    sema::{Down, Semaphore},
    thread::{refresh_chain, Priority, DONATION_LOCK},
    yield_if_outranked, KThread, SpinMutex,
};

pub struct Lock {
    core: Arc<LockCore>,
}

pub(crate) struct LockCore {
    pub(crate) sema: Semaphore,
    pub(crate) holder: SpinMutex<Option<Arc<KThread>>>,
}

impl Lock {
    pub fn new() -> Self {
        Self {
            core: Arc::new(LockCore {
                sema: Semaphore::new(1),
                holder: SpinMutex::new(None),
            }),
        }
    }

    pub fn holder(&self) -> Option<Arc<KThread>> {
        self.core.holder.lock().clone()
    }

    pub fn is_held_by(&self, thread: &Arc<KThread>) -> bool {
        self.core
            .holder
            .lock()
            .as_ref()
            .is_some_and(|holder| Arc::ptr_eq(holder, thread))
    }

    /// 获取锁。锁已被持有时挂起，并把优先级捐赠给持有者
    pub fn acquire<'a>(&'a self, cur: &'a Arc<KThread>) -> Acquire<'a> {
        assert!(
            !self.is_held_by(cur),
            "thread {} acquires a lock it already holds",
            cur.name()
        );
        Acquire {
            lock: self,
            cur,
            down: self.core.sema.down(cur),
            done: false,
        }
    }

    pub fn try_acquire(&self, cur: &Arc<KThread>) -> bool {
        assert!(
            !self.is_held_by(cur),
            "thread {} acquires a lock it already holds",
            cur.name()
        );
        let _donation = DONATION_LOCK.lock();
        if !self.core.sema.try_down() {
            return false;
        }
        self.take_ownership(cur);
        true
    }

    /// 返回被唤醒的等待者的优先级（如果有）
    pub fn release(&self, cur: &Arc<KThread>) -> Option<Priority> {
        let _donation = DONATION_LOCK.lock();
        assert!(
            self.is_held_by(cur),
            "thread {} releases a lock it does not hold",
            cur.name()
        );
        cur.held_locks
            .lock()
            .retain(|lock| !Arc::ptr_eq(lock, &self.core));
        *self.core.holder.lock() = None;
        cur.refresh_priority();
        self.core.sema.up()
    }

    /// 作用域形式，guard 析构时释放
    pub async fn lock<'a>(&'a self, cur: &'a Arc<KThread>) -> LockGuard<'a> {
        self.acquire(cur).await;
        LockGuard { lock: self, cur }
    }

    /// 调用方须持有 [`DONATION_LOCK`]
    fn take_ownership(&self, cur: &Arc<KThread>) {
        *self.core.holder.lock() = Some(Arc::clone(cur));
        *cur.blocked_on.lock() = None;
        cur.held_locks.lock().push(Arc::clone(&self.core));
        // 仍在这把锁上等待的线程改为向新的持有者捐赠
        cur.refresh_priority();
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock")
            .field("holder", &self.holder().map(|t| t.tid()))
            .field("waiters", &self.core.sema.waiters())
            .finish()
    }
}

/// 调用方须持有 [`DONATION_LOCK`]
fn donate(donor: &Arc<KThread>) {
    let priority = donor.priority();
    let mut next = donor.donee();
    while let Some(holder) = next {
        if holder.priority() >= priority {
            break;
        }
        trace!(
            "thread {} donates priority {priority} to thread {}",
            donor.tid(),
            holder.tid()
        );
        holder.set_effective(priority);
        next = holder.donee();
    }
}

#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Acquire<'a> {
    lock: &'a Lock,
    cur: &'a Arc<KThread>,
    down: Down<'a>,
    done: bool,
}

impl Future for Acquire<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let _donation = DONATION_LOCK.lock();
        let was_waiting = this.down.is_waiting();
        match Pin::new(&mut this.down).poll(cx) {
            Poll::Ready(()) => {
                this.lock.take_ownership(this.cur);
                this.done = true;
                Poll::Ready(())
            }
            Poll::Pending => {
                if !was_waiting {
                    *this.cur.blocked_on.lock() = Some(Arc::clone(&this.lock.core));
                    donate(this.cur);
                }
                Poll::Pending
            }
        }
    }
}

impl Drop for Acquire<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let _donation = DONATION_LOCK.lock();
        let was_waiting = self.down.is_waiting();
        self.down.cancel();
        if was_waiting {
            *self.cur.blocked_on.lock() = None;
            // 撤回此前的捐赠
            let holder = self.lock.core.holder.lock().clone();
            if let Some(holder) = holder {
                refresh_chain(&holder);
            }
        }
    }
}

pub struct LockGuard<'a> {
    lock: &'a Lock,
    cur: &'a Arc<KThread>,
}

impl<'a> LockGuard<'a> {
    /// 释放锁，若被唤醒的等待者优先级更高则让出
    pub async fn unlock(self) {
        let (lock, cur) = (self.lock, self.cur);
        core::mem::forget(self);
        let woken = lock.release(cur);
        yield_if_outranked(cur, woken).await;
    }

    pub fn lock(&self) -> &'a Lock {
        self.lock
    }

    pub fn thread(&self) -> &'a Arc<KThread> {
        self.cur
    }

    /// 在条件变量上等待，返回时重新持有锁
    pub async fn wait(&mut self, condvar: &Condvar) {
        condvar.wait(self.lock, self.cur).await;
    }

    pub fn signal(&self, condvar: &Condvar) -> Option<Priority> {
        condvar.signal(self.lock, self.cur)
    }

    pub fn broadcast(&self, condvar: &Condvar) -> Option<Priority> {
        condvar.broadcast(self.lock, self.cur)
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release(self.cur);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicBool, AtomicU32, Ordering},
            Arc as StdArc,
        },
        vec::Vec,
    };

    use smol::future::poll_once;

    use super::Lock;
    use crate::{yield_now, KThread};

    #[test]
    fn donation_and_restore() {
        let low = KThread::new("low", 10);
        let med = KThread::new("med", 20);
        let high = KThread::new("high", 30);
        let lock = Lock::new();
        assert!(lock.try_acquire(&low));

        smol::block_on(async {
            let mut a = Box::pin(lock.acquire(&high));
            assert!(poll_once(&mut a).await.is_none());
            assert_eq!(low.priority(), 30);
            assert_eq!(low.base_priority(), 10);

            let mut b = Box::pin(lock.acquire(&med));
            assert!(poll_once(&mut b).await.is_none());
            assert_eq!(low.priority(), 30);

            assert_eq!(lock.release(&low), Some(30));
            assert_eq!(low.priority(), 10);

            // 高优先级的先拿到锁
            assert!(poll_once(&mut b).await.is_none());
            assert!(poll_once(&mut a).await.is_some());
            assert!(lock.is_held_by(&high));
            assert_eq!(high.priority(), 30);

            lock.release(&high);
            assert!(poll_once(&mut b).await.is_some());
            assert!(lock.is_held_by(&med));
            assert_eq!(med.priority(), 20);
            lock.release(&med);
        });
        assert!(lock.holder().is_none());
    }

    #[test]
    fn nested_donation() {
        let low = KThread::new("low", 10);
        let med = KThread::new("med", 20);
        let high = KThread::new("high", 30);
        let a = Lock::new();
        let b = Lock::new();
        assert!(a.try_acquire(&low));
        assert!(b.try_acquire(&med));

        smol::block_on(async {
            let mut med_wait = Box::pin(a.acquire(&med));
            assert!(poll_once(&mut med_wait).await.is_none());
            assert_eq!(low.priority(), 20);

            let mut high_wait = Box::pin(b.acquire(&high));
            assert!(poll_once(&mut high_wait).await.is_none());
            assert_eq!(med.priority(), 30);
            assert_eq!(low.priority(), 30);

            a.release(&low);
            assert_eq!(low.priority(), 10);
            assert!(poll_once(&mut med_wait).await.is_some());
            // med 同时持有 a 和 b，high 仍在 b 上等待
            assert_eq!(med.priority(), 30);

            b.release(&med);
            assert_eq!(med.priority(), 20);
            assert!(poll_once(&mut high_wait).await.is_some());
            assert!(b.is_held_by(&high));

            b.release(&high);
            a.release(&med);
        });
        assert_eq!(med.priority(), 20);
        assert_eq!(high.priority(), 30);
    }

    #[test]
    fn donation_stops_at_higher_link() {
        let low = KThread::new("low", 40);
        let med = KThread::new("med", 20);
        let high = KThread::new("high", 30);
        let a = Lock::new();
        let b = Lock::new();
        assert!(a.try_acquire(&low));
        assert!(b.try_acquire(&med));

        smol::block_on(async {
            let mut med_wait = Box::pin(a.acquire(&med));
            assert!(poll_once(&mut med_wait).await.is_none());
            let mut high_wait = Box::pin(b.acquire(&high));
            assert!(poll_once(&mut high_wait).await.is_none());
            assert_eq!(med.priority(), 30);
            assert_eq!(low.priority(), 40);

            a.release(&low);
            assert!(poll_once(&mut med_wait).await.is_some());
            b.release(&med);
            assert!(poll_once(&mut high_wait).await.is_some());
            b.release(&high);
            a.release(&med);
        });
    }

    #[test]
    fn set_priority_respects_donation() {
        let low = KThread::new("low", 10);
        let high = KThread::new("high", 30);
        let lock = Lock::new();
        assert!(lock.try_acquire(&low));

        smol::block_on(async {
            let mut wait = Box::pin(lock.acquire(&high));
            assert!(poll_once(&mut wait).await.is_none());

            // 降低基础优先级不影响捐赠得到的有效优先级
            low.set_priority(5);
            assert_eq!(low.priority(), 30);
            assert_eq!(low.base_priority(), 5);

            // 等待者提升自己，提升会传给持有者
            high.set_priority(50);
            assert_eq!(low.priority(), 50);

            lock.release(&low);
            assert_eq!(low.priority(), 5);
            assert!(poll_once(&mut wait).await.is_some());
            lock.release(&high);
        });

        low.set_priority(12);
        assert_eq!(low.priority(), 12);
    }

    #[test]
    fn unlock_yields_to_higher_waiter() {
        let low = KThread::new("low", 10);
        let high = KThread::new("high", 40);
        let lock = Lock::new();
        let released = AtomicBool::new(false);

        smol::block_on(async {
            let guard = lock.lock(&low).await;
            let mut wait = Box::pin(lock.acquire(&high));
            assert!(poll_once(&mut wait).await.is_none());

            let mut unlock = Box::pin(async {
                guard.unlock().await;
                released.store(true, Ordering::Relaxed);
            });
            // 锁交给了 high，low 随即让出
            assert!(poll_once(&mut unlock).await.is_none());
            assert!(!released.load(Ordering::Relaxed));
            assert!(lock.holder().is_none());
            assert_eq!(low.priority(), 10);

            assert!(poll_once(&mut wait).await.is_some());
            assert!(lock.is_held_by(&high));
            assert!(poll_once(&mut unlock).await.is_some());
            assert!(released.load(Ordering::Relaxed));
            lock.release(&high);
        });
    }

    #[test]
    fn unlock_without_higher_waiter_returns_at_once() {
        let first = KThread::new("first", 20);
        let second = KThread::new("second", 20);
        let lock = Lock::new();

        smol::block_on(async {
            let mut uncontended = Box::pin(async { lock.lock(&first).await.unlock().await });
            assert!(poll_once(&mut uncontended).await.is_some());

            let guard = lock.lock(&first).await;
            let mut wait = Box::pin(lock.acquire(&second));
            assert!(poll_once(&mut wait).await.is_none());
            // 同优先级不让出
            let mut unlock = Box::pin(guard.unlock());
            assert!(poll_once(&mut unlock).await.is_some());
            assert!(poll_once(&mut wait).await.is_some());
            lock.release(&second);
        });
        assert!(lock.holder().is_none());
    }

    #[test]
    fn cancelled_acquire_withdraws_donation() {
        let low = KThread::new("low", 10);
        let high = KThread::new("high", 30);
        let lock = Lock::new();
        assert!(lock.try_acquire(&low));

        smol::block_on(async {
            let mut wait = Box::pin(lock.acquire(&high));
            assert!(poll_once(&mut wait).await.is_none());
            assert_eq!(low.priority(), 30);
            drop(wait);
            assert_eq!(low.priority(), 10);
        });
        assert_eq!(lock.release(&low), None);
        assert!(lock.try_acquire(&high));
        lock.release(&high);
    }

    #[test]
    fn try_acquire_contended() {
        let t1 = KThread::new("t1", 31);
        let t2 = KThread::new("t2", 31);
        let lock = Lock::new();
        assert!(lock.try_acquire(&t1));
        assert!(!lock.try_acquire(&t2));
        assert_eq!(lock.holder().map(|t| t.tid()), Some(t1.tid()));
        lock.release(&t1);
        assert!(lock.try_acquire(&t2));
        lock.release(&t2);
    }

    #[test]
    #[should_panic(expected = "does not hold")]
    fn release_unheld_panics() {
        let t = KThread::new("t", 31);
        Lock::new().release(&t);
    }

    #[test]
    #[should_panic(expected = "already holds")]
    fn reacquire_panics() {
        let t = KThread::new("t", 31);
        let lock = Lock::new();
        assert!(lock.try_acquire(&t));
        let _ = lock.try_acquire(&t);
    }

    #[test]
    fn mutual_exclusion() {
        const TASKS: u32 = 8;
        const ROUNDS: u32 = 200;
        let lock = StdArc::new(Lock::new());
        let inside = StdArc::new(AtomicBool::new(false));
        let count = StdArc::new(AtomicU32::new(0));

        let tasks: Vec<_> = (0..TASKS)
            .map(|i| {
                let lock = StdArc::clone(&lock);
                let inside = StdArc::clone(&inside);
                let count = StdArc::clone(&count);
                let thread = KThread::new(format!("worker{i}"), 20 + i as u8);
                smol::spawn(async move {
                    for _ in 0..ROUNDS {
                        let _guard = lock.lock(&thread).await;
                        assert!(!inside.swap(true, Ordering::AcqRel));
                        yield_now().await;
                        count.fetch_add(1, Ordering::Relaxed);
                        inside.store(false, Ordering::Release);
                    }
                    assert_eq!(thread.priority(), thread.base_priority());
                })
            })
            .collect();

        smol::block_on(async {
            for t in tasks {
                t.await;
            }
        });
        assert_eq!(count.load(Ordering::Relaxed), TASKS * ROUNDS);
        assert!(lock.holder().is_none());
    }
}

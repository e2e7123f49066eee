//! 内核线程中与同步相关的状态：优先级与锁的等待关系
//!
//! 调度器不在这里实现。阻塞由 future 返回 `Pending` 表达，
//! 当前线程由调用方显式传入

use alloc::string::String;
use core::{
    fmt,
    sync::atomic::{AtomicU8, AtomicUsize, Ordering},
};

use common::config::{PRI_MAX, PRI_MIN};
use smallvec::SmallVec;
use triomphe::Arc;

use crate::{lock::LockCore, SpinMutex};

pub type Priority = u8;
/// 对内核线程的共享引用，同时作为“当前线程”传给会挂起的同步操作
pub type ThreadRef = Arc<KThread>;

/// 所有涉及优先级捐赠的读写（持有者、等待的锁、持有的锁集合、有效优先级）
/// 都在这把锁下进行
pub(crate) static DONATION_LOCK: SpinMutex<()> = SpinMutex::new(());

static NEXT_TID: AtomicUsize = AtomicUsize::new(1);

pub struct KThread {
    tid: usize,
    name: String,
    base_priority: AtomicU8,
    /// 有效优先级，始终不低于基础优先级
    priority: AtomicU8,
    /// 正在等待的锁，其持有者即捐赠对象
    pub(crate) blocked_on: SpinMutex<Option<Arc<LockCore>>>,
    pub(crate) held_locks: SpinMutex<SmallVec<[Arc<LockCore>; 4]>>,
}

impl KThread {
    pub fn new(name: impl Into<String>, priority: Priority) -> Arc<Self> {
        assert!(
            (PRI_MIN..=PRI_MAX).contains(&priority),
            "priority {priority} out of range"
        );
        Arc::new(Self {
            tid: NEXT_TID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            base_priority: AtomicU8::new(priority),
            priority: AtomicU8::new(priority),
            blocked_on: SpinMutex::new(None),
            held_locks: SpinMutex::new(SmallVec::new()),
        })
    }

    pub fn tid(&self) -> usize {
        self.tid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 有效优先级（包含捐赠）
    pub fn priority(&self) -> Priority {
        self.priority.load(Ordering::Acquire)
    }

    pub fn base_priority(&self) -> Priority {
        self.base_priority.load(Ordering::Acquire)
    }

    /// 修改基础优先级。有效优先级按当前仍然有效的捐赠重新计算，
    /// 若自身正阻塞在某把锁上，变化会沿等待链传递
    pub fn set_priority(&self, priority: Priority) {
        assert!(
            (PRI_MIN..=PRI_MAX).contains(&priority),
            "priority {priority} out of range"
        );
        let _donation = DONATION_LOCK.lock();
        self.base_priority.store(priority, Ordering::Release);
        refresh_chain(self);
    }

    pub(crate) fn set_effective(&self, priority: Priority) {
        self.priority.store(priority, Ordering::Release);
    }

    /// 有效优先级 = max(基础优先级, 持有的锁上所有等待者的优先级)
    ///
    /// 调用方须持有 [`DONATION_LOCK`]
    pub(crate) fn refresh_priority(&self) -> Priority {
        let donated = self
            .held_locks
            .lock()
            .iter()
            .filter_map(|lock| lock.sema.max_waiter_priority())
            .max();
        let priority = donated.map_or(self.base_priority(), |d| d.max(self.base_priority()));
        self.set_effective(priority);
        priority
    }

    /// 等待链上的下一个线程
    pub(crate) fn donee(&self) -> Option<Arc<KThread>> {
        let lock = self.blocked_on.lock().clone()?;
        let holder = lock.holder.lock().clone();
        holder
    }
}

/// 从 `thread` 开始沿等待链重新计算有效优先级，直到某一环不再变化
///
/// 调用方须持有 [`DONATION_LOCK`]
pub(crate) fn refresh_chain(thread: &KThread) {
    let old = thread.priority();
    if thread.refresh_priority() == old {
        return;
    }
    let mut next = thread.donee();
    while let Some(cur) = next {
        let old = cur.priority();
        if cur.refresh_priority() == old {
            break;
        }
        next = cur.donee();
    }
}

impl fmt::Debug for KThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KThread")
            .field("tid", &self.tid)
            .field("name", &self.name)
            .field("base_priority", &self.base_priority())
            .field("priority", &self.priority())
            .finish_non_exhaustive()
    }
}

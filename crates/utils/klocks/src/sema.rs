//! 计数信号量。`up` 直接把计数交给优先级最高的等待者

use alloc::vec::Vec;
use core::{
    cmp::Reverse,
    future::Future,
    pin::Pin,
    task::{Context, Poll, Waker},
};

use triomphe::Arc;

use crate::{thread::Priority, yield_if_outranked, KThread, SpinMutex};

pub struct Semaphore {
    inner: SpinMutex<SemaInner>,
}

struct SemaInner {
    value: usize,
    waiters: Vec<Waiter>,
    next_ticket: u64,
}

struct Waiter {
    /// 同优先级时先来先得
    ticket: u64,
    thread: Arc<KThread>,
    waker: Waker,
}

impl SemaInner {
    fn position(&self, ticket: u64) -> Option<usize> {
        self.waiters.iter().position(|w| w.ticket == ticket)
    }

    /// 取出有效优先级最高的等待者，优先级相同时取最早的
    fn take_highest(&mut self) -> Option<Waiter> {
        let (idx, _) = self
            .waiters
            .iter()
            .enumerate()
            .max_by_key(|(_, w)| (w.thread.priority(), Reverse(w.ticket)))?;
        Some(self.waiters.swap_remove(idx))
    }
}

impl Semaphore {
    pub const fn new(value: usize) -> Self {
        Self {
            inner: SpinMutex::new(SemaInner {
                value,
                waiters: Vec::new(),
                next_ticket: 0,
            }),
        }
    }

    pub fn value(&self) -> usize {
        self.inner.lock().value
    }

    /// 计数为 0 时挂起直到被 `up` 选中
    pub fn down<'a>(&'a self, cur: &'a Arc<KThread>) -> Down<'a> {
        Down {
            sema: self,
            thread: cur,
            ticket: None,
            acquired: false,
        }
    }

    pub fn try_down(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.value > 0 {
            inner.value -= 1;
            true
        } else {
            false
        }
    }

    /// 有等待者时唤醒优先级最高的那个并返回其优先级，调用方可据此决定是否让出；
    /// 否则计数加一
    pub fn up(&self) -> Option<Priority> {
        let mut inner = self.inner.lock();
        match inner.take_highest() {
            Some(waiter) => {
                drop(inner);
                let priority = waiter.thread.priority();
                waiter.waker.wake();
                Some(priority)
            }
            None => {
                inner.value += 1;
                None
            }
        }
    }

    /// `up` 之后，若被唤醒者的优先级高于当前线程则让出
    pub async fn up_and_yield(&self, cur: &Arc<KThread>) {
        let woken = self.up();
        yield_if_outranked(cur, woken).await;
    }

    pub fn waiters(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    pub(crate) fn max_waiter_priority(&self) -> Option<Priority> {
        self.inner
            .lock()
            .waiters
            .iter()
            .map(|w| w.thread.priority())
            .max()
    }
}

#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Down<'a> {
    sema: &'a Semaphore,
    thread: &'a Arc<KThread>,
    ticket: Option<u64>,
    acquired: bool,
}

impl Down<'_> {
    /// 是否已经进入等待队列（即曾经返回过 `Pending`）
    pub(crate) fn is_waiting(&self) -> bool {
        self.ticket.is_some() && !self.acquired
    }

    /// 放弃等待。若 `up` 已经选中了自己，就把这次唤醒让给下一个等待者
    pub(crate) fn cancel(&mut self) {
        let Some(ticket) = self.ticket.take() else {
            return;
        };
        if self.acquired {
            return;
        }
        let mut inner = self.sema.inner.lock();
        match inner.position(ticket) {
            Some(idx) => {
                inner.waiters.swap_remove(idx);
            }
            None => {
                drop(inner);
                self.sema.up();
            }
        }
    }
}

impl Future for Down<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        debug_assert!(!self.acquired, "`Down` polled after completion");
        let sema = self.sema;
        let mut inner = sema.inner.lock();
        match self.ticket {
            None => {
                if inner.value > 0 {
                    inner.value -= 1;
                    self.acquired = true;
                    return Poll::Ready(());
                }
                let ticket = inner.next_ticket;
                inner.next_ticket += 1;
                inner.waiters.push(Waiter {
                    ticket,
                    thread: Arc::clone(self.thread),
                    waker: cx.waker().clone(),
                });
                self.ticket = Some(ticket);
                Poll::Pending
            }
            Some(ticket) => match inner.position(ticket) {
                // 虚假唤醒，更新 waker 继续等
                Some(idx) => {
                    let waiter = &mut inner.waiters[idx];
                    if !waiter.waker.will_wake(cx.waker()) {
                        waiter.waker = cx.waker().clone();
                    }
                    Poll::Pending
                }
                // 已被 `up` 移出队列，计数直接交给了自己
                None => {
                    self.acquired = true;
                    Poll::Ready(())
                }
            },
        }
    }
}

impl Drop for Down<'_> {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc as StdArc, vec::Vec};

    use common::config::PRI_DEFAULT;
    use smol::future::poll_once;

    use super::Semaphore;
    use crate::KThread;

    #[test]
    fn counts() {
        let sema = Semaphore::new(2);
        assert!(sema.try_down());
        assert!(sema.try_down());
        assert!(!sema.try_down());
        assert_eq!(sema.up(), None);
        assert_eq!(sema.value(), 1);
        let t = KThread::new("t", PRI_DEFAULT);
        smol::block_on(sema.down(&t));
        assert_eq!(sema.value(), 0);
    }

    #[test]
    fn up_picks_highest_priority() {
        let sema = Semaphore::new(0);
        let threads: Vec<_> = [3, 7, 5, 7]
            .into_iter()
            .map(|p| KThread::new("waiter", p))
            .collect();

        smol::block_on(async {
            let mut downs: Vec<_> = threads.iter().map(|t| Box::pin(sema.down(t))).collect();
            for down in &mut downs {
                assert!(poll_once(down).await.is_none());
            }
            assert_eq!(sema.waiters(), 4);

            // 同为 7 时先来的优先
            assert_eq!(sema.up(), Some(7));
            assert!(poll_once(&mut downs[3]).await.is_none());
            assert!(poll_once(&mut downs[1]).await.is_some());

            assert_eq!(sema.up(), Some(7));
            assert!(poll_once(&mut downs[3]).await.is_some());
            assert_eq!(sema.up(), Some(5));
            assert!(poll_once(&mut downs[2]).await.is_some());
            assert_eq!(sema.up(), Some(3));
            assert!(poll_once(&mut downs[0]).await.is_some());
        });
        assert_eq!(sema.value(), 0);
        assert_eq!(sema.waiters(), 0);
    }

    #[test]
    fn dropped_waiter_passes_wakeup_on() {
        let sema = Semaphore::new(0);
        let a = KThread::new("a", 20);
        let b = KThread::new("b", 10);

        smol::block_on(async {
            let mut down_a = Box::pin(sema.down(&a));
            let mut down_b = Box::pin(sema.down(&b));
            assert!(poll_once(&mut down_a).await.is_none());
            assert!(poll_once(&mut down_b).await.is_none());

            assert_eq!(sema.up(), Some(20));
            // a 被选中但还没来得及消费就被取消
            drop(down_a);
            assert!(poll_once(&mut down_b).await.is_some());
        });
        assert_eq!(sema.value(), 0);

        // 未被选中的等待者取消后不影响计数
        smol::block_on(async {
            let mut down_a = Box::pin(sema.down(&a));
            assert!(poll_once(&mut down_a).await.is_none());
        });
        assert_eq!(sema.waiters(), 0);
        assert_eq!(sema.value(), 0);
    }

    #[test]
    fn up_and_yield_only_when_outranked() {
        let sema = Semaphore::new(0);
        let cur = KThread::new("cur", 20);
        let low = KThread::new("low", 10);
        let high = KThread::new("high", 30);

        smol::block_on(async {
            // 没有等待者时只是计数加一
            assert!(poll_once(Box::pin(sema.up_and_yield(&cur))).await.is_some());
            assert_eq!(sema.value(), 1);
            assert!(sema.try_down());

            let mut down_low = Box::pin(sema.down(&low));
            assert!(poll_once(&mut down_low).await.is_none());
            assert!(poll_once(Box::pin(sema.up_and_yield(&cur))).await.is_some());
            assert!(poll_once(&mut down_low).await.is_some());

            let mut down_high = Box::pin(sema.down(&high));
            assert!(poll_once(&mut down_high).await.is_none());
            let mut up = Box::pin(sema.up_and_yield(&cur));
            assert!(poll_once(&mut up).await.is_none());
            assert!(poll_once(&mut down_high).await.is_some());
            assert!(poll_once(&mut up).await.is_some());
        });
        assert_eq!(sema.value(), 0);
    }

    #[test]
    fn ping_pong() {
        let sema = StdArc::new([Semaphore::new(0), Semaphore::new(0)]);
        let helper = KThread::new("sema-test", PRI_DEFAULT);
        let main = KThread::new("main", PRI_DEFAULT);

        let sema2 = StdArc::clone(&sema);
        let task = smol::spawn(async move {
            for _ in 0..10 {
                sema2[0].down(&helper).await;
                sema2[1].up();
            }
        });
        smol::block_on(async {
            for _ in 0..10 {
                sema[0].up();
                sema[1].down(&main).await;
            }
            task.await;
        });
        assert_eq!(sema[0].value(), 0);
        assert_eq!(sema[1].value(), 0);
    }

    #[test]
    fn net_count_matches_operations() {
        const TASKS: usize = 6;
        const ROUNDS: usize = 100;
        let sema = StdArc::new(Semaphore::new(3));
        let tasks: Vec<_> = (0..TASKS)
            .map(|i| {
                let sema = StdArc::clone(&sema);
                let thread = KThread::new("worker", i as u8);
                smol::spawn(async move {
                    for _ in 0..ROUNDS {
                        sema.down(&thread).await;
                        crate::yield_now().await;
                        sema.up();
                    }
                })
            })
            .collect();
        smol::block_on(async {
            for t in tasks {
                t.await;
            }
        });
        assert_eq!(sema.value(), 3);
    }
}

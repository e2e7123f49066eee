use core::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use triomphe::Arc;

use crate::{thread::Priority, KThread};

/// 即刻让出控制权，并且立刻 wake（一般而言就是立刻重新进入就绪队列）
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub fn yield_now() -> impl Future<Output = ()> {
    YieldFuture { first_poll: true }
}

/// 被唤醒者的优先级高于当前线程时让出
pub async fn yield_if_outranked(cur: &Arc<KThread>, woken: Option<Priority>) {
    if woken.is_some_and(|p| p > cur.priority()) {
        yield_now().await;
    }
}

struct YieldFuture {
    first_poll: bool,
}

impl Future for YieldFuture {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.first_poll {
            self.first_poll = false;
            cx.waker().wake_by_ref();
            Poll::Pending
        } else {
            Poll::Ready(())
        }
    }
}

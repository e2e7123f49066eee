//! 内核同步原语
//!
//! - [`SpinMutex`]：短临界区使用的自旋锁
//! - [`Semaphore`]、[`Lock`]、[`Condvar`]：会挂起当前线程的同步原语，
//!   唤醒时总是选择有效优先级最高的等待者，[`Lock`] 带优先级捐赠

#![cfg_attr(not(test), no_std)]

extern crate alloc;
#[macro_use]
extern crate kernel_tracer;

mod condvar;
mod kspin;
mod lock;
mod sema;
mod thread;
mod yield_now;

pub use condvar::Condvar;
pub use kspin::{SpinMutex, SpinMutexGuard};
pub use lock::{Acquire, Lock, LockGuard};
pub use sema::{Down, Semaphore};
pub use thread::{KThread, Priority, ThreadRef};
pub use yield_now::{yield_if_outranked, yield_now};

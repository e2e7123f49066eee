#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod block;

pub use self::block::{ram_disk::RamDisk, BlockDevice};

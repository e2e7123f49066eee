#![cfg_attr(not(test), no_std)]

use alloc::{vec, vec::Vec};

extern crate alloc;

const BITS: usize = u64::BITS as usize;

/// 基于位图的有界 id 分配器，总是分配最小的空闲 id
///
/// 用于页帧、交换槽这类数量固定的资源
#[derive(Clone, Debug)]
pub struct IdAllocator {
    bitmap: Vec<u64>,
    capacity: usize,
    used: usize,
}

impl IdAllocator {
    /// 可分配的 id 为 `0..capacity`
    pub fn new(capacity: usize) -> Self {
        Self {
            bitmap: vec![0; capacity.div_ceil(BITS)],
            capacity,
            used: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 已分配的 id 数量
    pub fn used(&self) -> usize {
        self.used
    }

    pub fn is_full(&self) -> bool {
        self.used == self.capacity
    }

    pub fn alloc(&mut self) -> Option<usize> {
        let (word_idx, word) = self
            .bitmap
            .iter_mut()
            .enumerate()
            .find(|(_, word)| **word != u64::MAX)?;
        let bit = word.trailing_ones() as usize;
        let id = word_idx * BITS + bit;
        // 最后一个字中超出容量的位不可用
        if id >= self.capacity {
            return None;
        }
        *word |= 1 << bit;
        self.used += 1;
        Some(id)
    }

    /// 释放 `id`，返回它之前是否处于已分配状态
    #[must_use]
    pub fn dealloc(&mut self, id: usize) -> bool {
        if id >= self.capacity {
            return false;
        }
        let mask = 1 << (id % BITS);
        let word = &mut self.bitmap[id / BITS];
        if *word & mask == 0 {
            return false;
        }
        *word &= !mask;
        self.used -= 1;
        true
    }

    pub fn is_allocated(&self, id: usize) -> bool {
        id < self.capacity && self.bitmap[id / BITS] & (1 << (id % BITS)) != 0
    }
}

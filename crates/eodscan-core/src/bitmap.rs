//! 定长位图：活动引擎集合、角色状态、队列活动标记共用
//!
//! - 容量在构件编译期确定，运行期不会增长；
//! - 以 `u64` 字存储，超出容量的填充位始终为 0（迭代、比较时无需再做掩码）。
use crate::types::EngineIndex;

/// 存储 `n` 位所需的字数
pub(crate) const fn words_for(n: u32) -> usize {
    (n as usize).div_ceil(64)
}

/// 引擎位图：第 i 位置位表示第 i 个子引擎（或角色）处于活动状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineBitmap {
    words: Vec<u64>,
    capacity: u32,
}

/// 活动引擎集合（容量 = 构件声明的 active array 数量）
pub type ActiveEngineSet = EngineBitmap;

impl EngineBitmap {
    /// 创建全 0 位图；容量可以为 0
    pub fn new(capacity: u32) -> Self {
        Self { words: vec![0u64; words_for(capacity)], capacity }
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// 第 `i` 个字；越界时视为 0
    #[inline]
    pub(crate) fn word(&self, i: usize) -> u64 {
        self.words.get(i).copied().unwrap_or(0)
    }

    /// 越界索引视为未置位
    #[inline]
    pub fn is_set(&self, idx: EngineIndex) -> bool {
        if idx >= self.capacity { return false; }
        let i = idx as usize;
        self.words[i / 64] & (1u64 << (i % 64)) != 0
    }

    /// 置位。`idx >= capacity` 属于编程错误，直接 panic。
    #[inline]
    pub fn set(&mut self, idx: EngineIndex) {
        assert!(idx < self.capacity, "engine index {idx} out of bounds ({})", self.capacity);
        let i = idx as usize;
        self.words[i / 64] |= 1u64 << (i % 64);
    }

    /// 清位。`idx >= capacity` 直接 panic。
    #[inline]
    pub fn unset(&mut self, idx: EngineIndex) {
        assert!(idx < self.capacity, "engine index {idx} out of bounds ({})", self.capacity);
        let i = idx as usize;
        self.words[i / 64] &= !(1u64 << (i % 64));
    }

    #[inline]
    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// 按升序遍历已置位的索引（不分配）
    #[inline]
    pub fn iter(&self) -> BitmapIter<'_> {
        BitmapIter { words: &self.words, word_idx: 0, current: self.word(0) }
    }
}

/// [`EngineBitmap::iter`] 产生的升序迭代器
#[derive(Debug, Clone)]
pub struct BitmapIter<'a> {
    words: &'a [u64],
    word_idx: usize,
    current: u64,
}

impl Iterator for BitmapIter<'_> {
    type Item = EngineIndex;

    #[inline]
    fn next(&mut self) -> Option<EngineIndex> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros() as usize;
                self.current &= self.current.wrapping_sub(1);
                return Some((self.word_idx * 64 + bit) as EngineIndex);
            }
            self.word_idx += 1;
            if self.word_idx >= self.words.len() { return None; }
            self.current = self.words[self.word_idx];
        }
    }
}

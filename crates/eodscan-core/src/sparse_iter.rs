//! 稀疏索引迭代（编译期索引表 ∩ 运行期位图）
//!
//! 计划在构件编译期由索引表构建，是一棵 64 叉的摘要树：
//! - 叶层与引擎位图按字对齐，第 i 位表示索引 i 属于该表；
//! - 上层第 j 位表示下一层第 j 个字非零。
//!
//! 遍历时只下探非零分支，叶层再与运行期位图按字求交，
//! 因此代价与命中数相关，而不是与引擎总数相关。
//! 迭代器工作区是定长数组（深度不超过 [`MAX_SPARSE_ITER_STATES`]），不做任何分配。
use crate::bitmap::{words_for, EngineBitmap};
use crate::error::EodError;
use crate::types::EngineIndex;

/// 摘要树最大层数（64^4 个索引）
pub const MAX_SPARSE_ITER_STATES: usize = 4;

/// 预编译的稀疏迭代计划
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseIterPlan {
    /// levels[0] 为根（单字），最后一层为叶
    levels: Vec<Vec<u64>>,
    capacity: u32,
    len: usize,
}

impl SparseIterPlan {
    /// 由索引表构建计划；索引可重复、可乱序
    pub fn build(capacity: u32, indices: &[EngineIndex]) -> Result<Self, EodError> {
        let mut leaf = vec![0u64; words_for(capacity).max(1)];
        for &idx in indices {
            if idx >= capacity {
                return Err(EodError::EngineOutOfRange { index: idx, capacity });
            }
            let i = idx as usize;
            leaf[i / 64] |= 1u64 << (i % 64);
        }
        let len = leaf.iter().map(|w| w.count_ones() as usize).sum();

        // 自底向上生成摘要层，直到只剩一个字
        let mut levels = vec![leaf];
        while let Some(below) = levels.last().filter(|l| l.len() > 1) {
            let mut up = vec![0u64; below.len().div_ceil(64)];
            for (wi, &w) in below.iter().enumerate() {
                if w != 0 { up[wi / 64] |= 1u64 << (wi % 64); }
            }
            levels.push(up);
        }
        if levels.len() > MAX_SPARSE_ITER_STATES {
            return Err(EodError::SparseIterTooDeep { levels: levels.len(), max: MAX_SPARSE_ITER_STATES });
        }
        levels.reverse();

        Ok(Self { levels, capacity, len })
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// 表中索引个数
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 摘要树层数
    #[inline]
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn contains(&self, idx: EngineIndex) -> bool {
        if idx >= self.capacity { return false; }
        let leaf = &self.levels[self.levels.len() - 1];
        let i = idx as usize;
        leaf[i / 64] & (1u64 << (i % 64)) != 0
    }

    /// 遍历 表 ∩ `live`（升序）
    #[inline]
    pub fn iter<'a>(&'a self, live: &'a EngineBitmap) -> SparseIndexIter<'a> {
        debug_assert_eq!(self.capacity, live.capacity(), "sparse plan / bitmap capacity mismatch");
        SparseIndexIter::new(self, Some(live))
    }

    /// 遍历表中全部索引（升序）
    #[inline]
    pub fn iter_all(&self) -> SparseIndexIter<'_> {
        SparseIndexIter::new(self, None)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct IterFrame {
    /// 本层字序号
    word: usize,
    /// 尚未访问的位
    bits: u64,
}

/// 稀疏迭代器：显式对象，`next` 产出下一个索引，`is_exhausted` 表示遍历结束
#[derive(Debug, Clone)]
pub struct SparseIndexIter<'a> {
    plan: &'a SparseIterPlan,
    live: Option<&'a EngineBitmap>,
    stack: [IterFrame; MAX_SPARSE_ITER_STATES],
    depth: usize,
}

impl<'a> SparseIndexIter<'a> {
    fn new(plan: &'a SparseIterPlan, live: Option<&'a EngineBitmap>) -> Self {
        let mut it = Self { plan, live, stack: [IterFrame::default(); MAX_SPARSE_ITER_STATES], depth: 1 };
        it.stack[0] = IterFrame { word: 0, bits: it.word_at(0, 0) };
        it
    }

    /// 取某层某字；叶层与运行期位图求交
    #[inline]
    fn word_at(&self, level: usize, word: usize) -> u64 {
        let w = self.plan.levels[level][word];
        match self.live {
            Some(live) if level + 1 == self.plan.levels.len() => w & live.word(word),
            _ => w,
        }
    }

    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.depth == 0
    }
}

impl Iterator for SparseIndexIter<'_> {
    type Item = EngineIndex;

    fn next(&mut self) -> Option<EngineIndex> {
        let leaf_level = self.plan.levels.len() - 1;
        while self.depth > 0 {
            let level = self.depth - 1;
            let frame = self.stack[level];
            if frame.bits == 0 {
                self.depth -= 1;
                continue;
            }
            let bit = frame.bits.trailing_zeros() as usize;
            self.stack[level].bits = frame.bits & frame.bits.wrapping_sub(1);
            let child = frame.word * 64 + bit;
            if level == leaf_level {
                return Some(child as EngineIndex);
            }
            self.stack[level + 1] = IterFrame { word: child, bits: self.word_at(level + 1, child) };
            self.depth += 1;
        }
        None
    }
}

impl std::iter::FusedIterator for SparseIndexIter<'_> {}

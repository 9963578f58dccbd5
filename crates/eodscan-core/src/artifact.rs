//! 引擎构件（只读，编译期生成）
//!
//! 原先以“共享数据块内的偏移量，0 表示不存在”编码的各项能力，
//! 这里全部改为显式的 `Option`。
use crate::error::EodError;
use crate::sparse_iter::SparseIterPlan;
use crate::types::{EngineIndex, ProgramRef};

/// 端锚定字面量扫描器描述
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchoredScannerDesc {
    /// 可能产生匹配的最短输入长度；数据区短于它时直接跳过扫描
    pub min_width: usize,
    /// 只需扫描末尾这么多字节
    pub region_size: usize,
}

/// 引擎构件
#[derive(Debug, Clone)]
pub struct EngineArtifact {
    pub requires_eod_check: bool,
    /// 最大双端锚定宽度；None 表示无上界
    pub max_bi_anchored_width: Option<u64>,
    pub anchored_scanner: Option<AnchoredScannerDesc>,
    /// 无条件 EOD 收尾程序
    pub eod_program: Option<ProgramRef>,
    /// EOD 报告投递（迭代）程序
    pub eod_iter_program: Option<ProgramRef>,
    /// 可在 EOD 接受的引擎表
    pub eod_engine_iter: Option<SparseIterPlan>,
    /// 仅对“最后一个字节”有效的角色表
    pub last_byte_history: Option<SparseIterPlan>,
    pub active_array_count: u32,
    pub roles_with_state_count: u32,
    pub queue_count: u32,
}

impl EngineArtifact {
    pub fn builder(active_array_count: u32, roles_with_state_count: u32, queue_count: u32) -> ArtifactBuilder {
        ArtifactBuilder {
            requires_eod_check: true,
            max_bi_anchored_width: None,
            anchored_scanner: None,
            eod_program: None,
            eod_iter_program: None,
            eod_engines: None,
            last_byte_history: None,
            active_array_count,
            roles_with_state_count,
            queue_count,
        }
    }

    /// 是否存在除引擎收尾之外的 EOD 逻辑（迭代程序或端锚定扫描器）
    #[inline]
    pub fn has_eod_logic(&self) -> bool {
        self.eod_iter_program.is_some() || self.anchored_scanner.is_some()
    }

    /// 偏移是否落在最大双端锚定宽度之内
    #[inline]
    pub fn offset_in_bound(&self, offset: u64) -> bool {
        self.max_bi_anchored_width.map_or(true, |bound| offset <= bound)
    }

    /// 校验各容量与表之间的一致性
    pub fn validate(&self) -> Result<(), EodError> {
        if self.active_array_count > self.queue_count {
            return Err(EodError::InvalidArtifact(format!(
                "active array count {} exceeds queue count {}",
                self.active_array_count, self.queue_count
            )));
        }
        if let Some(plan) = &self.eod_engine_iter {
            if plan.capacity() != self.active_array_count {
                return Err(EodError::StateMismatch {
                    what: "eod engine iterator",
                    expected: self.active_array_count,
                    actual: plan.capacity(),
                });
            }
        }
        if let Some(plan) = &self.last_byte_history {
            if plan.capacity() != self.roles_with_state_count {
                return Err(EodError::StateMismatch {
                    what: "last byte history",
                    expected: self.roles_with_state_count,
                    actual: plan.capacity(),
                });
            }
        }
        if let Some(desc) = &self.anchored_scanner {
            if desc.min_width == 0 || desc.region_size == 0 {
                return Err(EodError::InvalidArtifact(format!(
                    "anchored scanner needs non-zero min width and region size (got {} / {})",
                    desc.min_width, desc.region_size
                )));
            }
        }
        Ok(())
    }
}

/// 构件构建器（测试与构件文件加载共用）
#[derive(Debug, Clone)]
pub struct ArtifactBuilder {
    requires_eod_check: bool,
    max_bi_anchored_width: Option<u64>,
    anchored_scanner: Option<AnchoredScannerDesc>,
    eod_program: Option<ProgramRef>,
    eod_iter_program: Option<ProgramRef>,
    eod_engines: Option<Vec<EngineIndex>>,
    last_byte_history: Option<Vec<u32>>,
    active_array_count: u32,
    roles_with_state_count: u32,
    queue_count: u32,
}

impl ArtifactBuilder {
    pub fn requires_eod_check(mut self, yes: bool) -> Self {
        self.requires_eod_check = yes;
        self
    }

    pub fn max_bi_anchored_width(mut self, bound: Option<u64>) -> Self {
        self.max_bi_anchored_width = bound;
        self
    }

    pub fn anchored_scanner(mut self, min_width: usize, region_size: usize) -> Self {
        self.anchored_scanner = Some(AnchoredScannerDesc { min_width, region_size });
        self
    }

    pub fn eod_program(mut self, program: ProgramRef) -> Self {
        self.eod_program = Some(program);
        self
    }

    pub fn eod_iter_program(mut self, program: ProgramRef) -> Self {
        self.eod_iter_program = Some(program);
        self
    }

    pub fn eod_engines(mut self, engines: &[EngineIndex]) -> Self {
        self.eod_engines = Some(engines.to_vec());
        self
    }

    pub fn last_byte_history(mut self, roles: &[u32]) -> Self {
        self.last_byte_history = Some(roles.to_vec());
        self
    }

    pub fn build(self) -> Result<EngineArtifact, EodError> {
        let eod_engine_iter = match &self.eod_engines {
            Some(list) => Some(SparseIterPlan::build(self.active_array_count, list)?),
            None => None,
        };
        let last_byte_history = match &self.last_byte_history {
            Some(list) => Some(SparseIterPlan::build(self.roles_with_state_count, list)?),
            None => None,
        };
        let artifact = EngineArtifact {
            requires_eod_check: self.requires_eod_check,
            max_bi_anchored_width: self.max_bi_anchored_width,
            anchored_scanner: self.anchored_scanner,
            eod_program: self.eod_program,
            eod_iter_program: self.eod_iter_program,
            eod_engine_iter,
            last_byte_history,
            active_array_count: self.active_array_count,
            roles_with_state_count: self.roles_with_state_count,
            queue_count: self.queue_count,
        };
        artifact.validate()?;
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_produces_plans() {
        let a = EngineArtifact::builder(8, 4, 8)
            .eod_engines(&[1, 5])
            .last_byte_history(&[2])
            .anchored_scanner(3, 16)
            .build()
            .unwrap();
        assert!(a.has_eod_logic());
        assert_eq!(a.eod_engine_iter.as_ref().map(|p| p.len()), Some(2));
        assert!(a.last_byte_history.as_ref().unwrap().contains(2));
    }

    #[test]
    fn bound_check() {
        let a = EngineArtifact::builder(1, 1, 1).max_bi_anchored_width(Some(10)).build().unwrap();
        assert!(a.offset_in_bound(10));
        assert!(!a.offset_in_bound(11));
        let unbounded = EngineArtifact::builder(1, 1, 1).build().unwrap();
        assert!(unbounded.offset_in_bound(u64::MAX));
        assert!(!unbounded.has_eod_logic());
    }

    #[test]
    fn rejects_inconsistent_counts() {
        assert!(EngineArtifact::builder(9, 1, 8).build().is_err());
        assert!(EngineArtifact::builder(4, 1, 4).eod_engines(&[4]).build().is_err());
        assert!(EngineArtifact::builder(4, 1, 4).anchored_scanner(0, 8).build().is_err());
    }
}

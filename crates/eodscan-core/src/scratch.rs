//! 每条流一份的持久状态与临时工作区
//!
//! 同一条流的 `StreamState` / `Scratch` 由单次评估独占；不同流之间不共享可变数据，
//! 因此内部不加锁。
use crate::artifact::EngineArtifact;
use crate::bitmap::{ActiveEngineSet, EngineBitmap};
use crate::context::MatchContext;
use crate::error::EodError;
use crate::types::BufferMode;

/// 持久化的流状态（跨流挂起有效）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamState {
    /// 已保存的字面量组掩码
    pub groups: u64,
    /// 活动子引擎
    pub active: ActiveEngineSet,
    /// 角色状态
    pub roles: EngineBitmap,
}

impl StreamState {
    pub fn new(artifact: &EngineArtifact) -> Self {
        Self {
            groups: u64::MAX,
            active: EngineBitmap::new(artifact.active_array_count),
            roles: EngineBitmap::new(artifact.roles_with_state_count),
        }
    }

    pub(crate) fn check_shape(&self, artifact: &EngineArtifact) -> Result<(), EodError> {
        if self.active.capacity() != artifact.active_array_count {
            return Err(EodError::StateMismatch {
                what: "active engine set",
                expected: artifact.active_array_count,
                actual: self.active.capacity(),
            });
        }
        if self.roles.capacity() != artifact.roles_with_state_count {
            return Err(EodError::StateMismatch {
                what: "role state",
                expected: artifact.roles_with_state_count,
                actual: self.roles.capacity(),
            });
        }
        Ok(())
    }
}

/// EOD 评估统计（便于 CLI 打印）
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EodStats {
    pub reports_delivered: u64,
    pub programs_run: u32,
    pub engines_checked: u32,
    pub anchored_scans: u32,
    pub suffixes_run: u32,
}

/// 每条流的工作区
#[derive(Debug, Clone)]
pub struct Scratch {
    pub ctx: MatchContext,
    /// 本次扫描中被触发过的队列
    pub queue_activity: EngineBitmap,
    /// 待合并的引擎匹配数（由主扫描阶段维护）
    pub catchup_pending: usize,
    /// 锚定日志累计
    pub anchored_log_sum: u64,
    pub stats: EodStats,
    terminated: bool,
}

impl Scratch {
    pub fn new(artifact: &EngineArtifact) -> Self {
        Self {
            ctx: MatchContext::default(),
            queue_activity: EngineBitmap::new(artifact.queue_count),
            catchup_pending: 0,
            anchored_log_sum: 0,
            stats: EodStats::default(),
            terminated: false,
        }
    }

    /// 为一次 EOD 评估初始化上下文（每次评估恰好一次，且先于其它步骤）
    pub fn init_context(&mut self, state: &StreamState, buffer: &BufferMode<'_>, offset: u64) {
        self.ctx.reset_for_eod(state.groups, buffer, offset);
        self.catchup_pending = 0;
        self.anchored_log_sum = 0;
        self.queue_activity.clear();
    }

    /// 是否已被回调要求停止
    #[inline]
    pub fn can_stop_matching(&self) -> bool {
        self.terminated
    }

    pub(crate) fn mark_terminated(&mut self) {
        self.terminated = true;
    }

    pub(crate) fn check_shape(&self, artifact: &EngineArtifact) -> Result<(), EodError> {
        if self.queue_activity.capacity() != artifact.queue_count {
            return Err(EodError::StateMismatch {
                what: "queue activity",
                expected: artifact.queue_count,
                actual: self.queue_activity.capacity(),
            });
        }
        Ok(())
    }
}

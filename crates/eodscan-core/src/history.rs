//! “最后一个字节”历史的冲刷
use tracing::trace;

use crate::artifact::EngineArtifact;
use crate::context::MatchContext;
use crate::scratch::StreamState;

/// 清除仅对最后一个已处理字节有效的角色状态。
///
/// `curr_end` 为已处理数据末字节之后的偏移；只有当它正好是活动缓冲区末尾、
/// 且上下文尚未在该位置冲刷过时才执行。
pub(crate) fn flush_last_byte_history(
    artifact: &EngineArtifact,
    state: &mut StreamState,
    ctx: &MatchContext,
    buffer_end: u64,
    curr_end: u64,
) {
    let Some(plan) = artifact.last_byte_history.as_ref() else { return };
    if ctx.last_end_offset == buffer_end || curr_end != buffer_end {
        // 已冲刷过，或尚未到冲刷时机
        return;
    }
    trace!(curr_end, roles = plan.len(), "flushing last byte history");
    for role in plan.iter_all() {
        state.roles.unset(role);
    }
}

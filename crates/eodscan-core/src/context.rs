//! 单次扫描的匹配上下文
use crate::types::BufferMode;

/// 匹配上下文：组掩码、偏移水位、延迟匹配槽计数、锚定位置游标
///
/// 回调不挂在上下文上，而是由入口函数显式传入（见 [`crate::runtime::ReportSink`]）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchContext {
    /// 当前有效的字面量组
    pub groups: u64,
    /// 扫描缓冲区内下标 → 流偏移 的换算量（已计入被丢弃的历史字节）
    pub lit_offset_adjust: u64,
    pub delay_last_end_offset: u64,
    pub last_end_offset: u64,
    pub last_match_offset: u64,
    pub min_match_offset: u64,
    pub min_non_mpv_match_offset: u64,
    pub next_mpv_offset: u64,
    /// 已填充的延迟匹配槽数量
    pub filled_delayed_slots: u32,
    /// 锚定位置结构中的游标；None 表示无效
    pub curr_anchored_loc: Option<u32>,
    pub curr_row_offset: u32,
}

impl Default for MatchContext {
    fn default() -> Self {
        Self {
            groups: u64::MAX,
            lit_offset_adjust: 1,
            delay_last_end_offset: 0,
            last_end_offset: 0,
            last_match_offset: 0,
            min_match_offset: 0,
            min_non_mpv_match_offset: 0,
            next_mpv_offset: 0,
            filled_delayed_slots: 0,
            curr_anchored_loc: None,
            curr_row_offset: 0,
        }
    }
}

impl MatchContext {
    /// 为一次 EOD 评估重置上下文
    pub fn reset_for_eod(&mut self, groups: u64, buffer: &BufferMode<'_>, offset: u64) {
        self.groups = groups;
        // 指向末字节之后
        self.lit_offset_adjust = (buffer.buf_offset() + 1).saturating_sub(buffer.history_len() as u64);
        self.delay_last_end_offset = offset;
        self.last_end_offset = offset;
        self.filled_delayed_slots = 0;
        self.last_match_offset = 0;
        self.min_match_offset = offset;
        self.min_non_mpv_match_offset = offset;
        self.next_mpv_offset = offset;
        self.curr_anchored_loc = None;
        self.curr_row_offset = 0;
    }

    /// 扫描区内匹配末字节下标 → 流中的匹配终点偏移（末字节之后）
    #[inline]
    pub fn literal_end_offset(&self, last_byte_idx: usize) -> u64 {
        last_byte_idx as u64 + self.lit_offset_adjust
    }
}

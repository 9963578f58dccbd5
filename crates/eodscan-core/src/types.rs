//! 公共类型（对外暴露）
use serde::Serialize;

/// 子引擎索引（与执行队列索引一一对应）
pub type EngineIndex = u32;
/// 报告标识
pub type ReportId = u32;

/// 步骤 / 回调的控制结果
/// - Continue：继续后续步骤
/// - Halt：消费者要求停止，之后的步骤一律不再执行
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Halt,
}

impl Flow {
    #[inline]
    pub fn is_halt(self) -> bool {
        matches!(self, Flow::Halt)
    }
}

/// 预编译程序的引用（构件中显式可选，不再用 0 表示“不存在”）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramRef(pub u32);

/// 本次评估的输入缓冲区形态（二选一，评估期间不变）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMode<'a> {
    /// 块模式：单个连续输入
    Block(&'a [u8]),
    /// 流模式：上一段流保留下来的历史字节；`buf_offset` 为活动缓冲区在流中的起始偏移。
    /// EOD 时活动缓冲区已经为空。
    Streaming { history: &'a [u8], buf_offset: u64 },
}

impl<'a> BufferMode<'a> {
    pub fn is_streaming(&self) -> bool {
        matches!(self, BufferMode::Streaming { .. })
    }

    /// 端锚定扫描使用的数据区：块模式为整个输入，流模式为历史区
    pub fn eod_region(&self) -> &'a [u8] {
        match *self {
            BufferMode::Block(data) => data,
            BufferMode::Streaming { history, .. } => history,
        }
    }

    /// 历史区长度（块模式为 0）
    pub fn history_len(&self) -> usize {
        match *self {
            BufferMode::Block(_) => 0,
            BufferMode::Streaming { history, .. } => history.len(),
        }
    }

    /// 活动缓冲区长度（流模式 EOD 时为 0）
    pub fn live_len(&self) -> usize {
        match *self {
            BufferMode::Block(data) => data.len(),
            BufferMode::Streaming { .. } => 0,
        }
    }

    pub fn buf_offset(&self) -> u64 {
        match *self {
            BufferMode::Block(_) => 0,
            BufferMode::Streaming { buf_offset, .. } => buf_offset,
        }
    }

    /// 活动缓冲区末尾在流中的偏移
    pub fn buffer_end(&self) -> u64 {
        self.buf_offset() + self.live_len() as u64
    }

    /// 子引擎状态解压所用的键：历史区最后一个字节，没有历史则为 0。块模式不使用。
    pub fn expand_key(&self) -> u8 {
        match *self {
            BufferMode::Block(_) => 0,
            BufferMode::Streaming { history, .. } => history.last().copied().unwrap_or(0),
        }
    }
}

/// 单条报告：终点偏移 + 报告标识；带起点的报告额外携带 `from`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Report {
    pub offset: u64,
    pub id: ReportId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<u64>,
}

/// 一次 EOD 评估的结果。均为正常结束，不是错误。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EodOutcome {
    /// 所有配置的步骤均已执行
    Completed,
    /// 既没有迭代程序也没有端锚定扫描器，引擎收尾后即结束
    NoEodLogic,
    /// 回调要求停止
    Halted,
    /// 偏移超过最大双端锚定宽度，未做任何事
    BeyondMaxWidth,
    /// 构件不要求 EOD 检查，调用方未进入 EOD 阶段
    EodCheckNotRequired,
}

/// 输出项结构（对应结果 JSON 数组的单个元素）
#[derive(Debug, Clone, Serialize)]
pub struct OutputItem<'a> {
    pub input: &'a str,
    pub offset: u64,
    pub id: ReportId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<u64>,
}

//! 评估选项与统计信息（模块）

/// 评估模式
/// - Block：整个输入作为单个连续缓冲区
/// - Streaming：输入视为已结束的流，只保留末尾历史窗口
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    Block,
    Streaming,
}

/// 评估选项
#[derive(Debug, Clone)]
pub struct EvalOptions {
    pub mode: EvalMode,
    /// 流模式下保留的历史字节数
    pub history_window: usize,
    /// 收到这么多条报告后请求停止；None 表示不限
    pub halt_after: Option<usize>,
    /// 线程数：None 表示自动（等于 CPU 核数）；Some(1) 走串行
    pub threads: Option<usize>,
    /// 最大输入大小（字节）；超过则跳过
    pub max_input_size: Option<u64>,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            mode: EvalMode::Block,
            history_window: 64,
            halt_after: None,
            threads: None,
            max_input_size: None,
        }
    }
}

/// 运行统计信息（便于 CLI 打印）
#[derive(Debug, Default, Clone)]
pub struct RunStats {
    pub inputs_evaluated: usize,
    pub inputs_halted: usize,
    pub inputs_failed: usize,
    pub reports_written: usize,
}

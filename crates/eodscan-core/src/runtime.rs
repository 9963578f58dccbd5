//! 外部协作者接口（程序解释器 / 端锚定扫描器 / 子引擎运行时）与回调边界
//!
//! 这些组件本身不在本库的职责内，这里只规定 EOD 编排与它们之间的接口。
use tracing::trace;

use crate::artifact::AnchoredScannerDesc;
use crate::bitmap::EngineBitmap;
use crate::context::MatchContext;
use crate::scratch::StreamState;
use crate::types::{EngineIndex, Flow, ProgramRef, ReportId};

/// 消费者回调对。返回 `Flow::Halt` 即请求立即停止。
pub trait ReportSink {
    fn report(&mut self, offset: u64, id: ReportId) -> Flow;
    fn report_with_start(&mut self, from: u64, to: u64, id: ReportId) -> Flow;
}

impl<T: ReportSink + ?Sized> ReportSink for &mut T {
    fn report(&mut self, offset: u64, id: ReportId) -> Flow {
        (**self).report(offset, id)
    }

    fn report_with_start(&mut self, from: u64, to: u64, id: ReportId) -> Flow {
        (**self).report_with_start(from, to, id)
    }
}

/// 评估期间外部协作者可以读写的状态视图
pub struct EvalCx<'a> {
    pub ctx: &'a mut MatchContext,
    pub state: &'a mut StreamState,
    pub queue_activity: &'a mut EngineBitmap,
}

/// 预编译触发 / 报告程序的解释器
pub trait ProgramInterpreter {
    fn run_program(
        &mut self,
        program: ProgramRef,
        offset: u64,
        match_len: usize,
        cx: &mut EvalCx<'_>,
        sink: &mut dyn ReportSink,
    ) -> Flow;
}

/// 端锚定字面量扫描器
pub trait EndAnchoredScanner {
    /// 扫描 `data[start..]`；匹配位置以 `data` 为基准，经 `cx.ctx` 换算为流偏移
    fn scan(
        &mut self,
        desc: &AnchoredScannerDesc,
        data: &[u8],
        start: usize,
        cx: &mut EvalCx<'_>,
        sink: &mut dyn ReportSink,
    ) -> Flow;

    /// 投递扫描期间被延迟的匹配
    fn flush_delayed(&mut self, offset: u64, cx: &mut EvalCx<'_>, sink: &mut dyn ReportSink) -> Flow;
}

/// 单个有限自动机子引擎的运行时（持有各引擎的队列与展开状态）
pub trait SubEngineRuntime {
    /// 该引擎是否编译为可在 EOD 接受
    fn accepts_eod(&self, engine: EngineIndex) -> bool;
    /// 由持久化压缩状态展开（流模式）；`key` 为历史区末字节或 0
    fn expand_state(&mut self, engine: EngineIndex, offset: u64, key: u8);
    /// 检查展开状态在 `offset` 处是否处于接受态，并投递对应报告
    fn check_final_state(&mut self, engine: EngineIndex, offset: u64, sink: &mut dyn ReportSink) -> Flow;
    /// 向引擎队列压入“缓冲区结束”事件
    fn push_end(&mut self, engine: EngineIndex, location: usize);
    /// 执行队列至结束，结果不合并进持久历史；返回引擎是否仍存活
    fn exec_queue_no_merge(&mut self, engine: EngineIndex) -> bool;
}

/// 三类协作者的组合
pub trait EodBackend: ProgramInterpreter + EndAnchoredScanner + SubEngineRuntime {}

impl<T: ProgramInterpreter + EndAnchoredScanner + SubEngineRuntime + ?Sized> EodBackend for T {}

/// EOD 报告适配器：把子引擎 / 程序产生的报告转发给消费者回调，并计数
pub(crate) struct EodReportAdapter<'s> {
    sink: &'s mut dyn ReportSink,
    delivered: &'s mut u64,
}

impl<'s> EodReportAdapter<'s> {
    pub(crate) fn new(sink: &'s mut dyn ReportSink, delivered: &'s mut u64) -> Self {
        Self { sink, delivered }
    }
}

impl ReportSink for EodReportAdapter<'_> {
    fn report(&mut self, offset: u64, id: ReportId) -> Flow {
        trace!(offset, id, "eod report");
        *self.delivered += 1;
        self.sink.report(offset, id)
    }

    fn report_with_start(&mut self, from: u64, to: u64, id: ReportId) -> Flow {
        trace!(from, to, id, "eod som report");
        *self.delivered += 1;
        self.sink.report_with_start(from, to, id)
    }
}

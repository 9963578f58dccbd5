//! EOD（数据结束）收尾编排
//!
//! 输入结束时，按固定顺序驱动各类产生匹配的机制：
//! 1) 无条件 EOD 程序；
//! 2) 已活动且可在 EOD 接受的子引擎收尾；
//! 3) 迭代程序投递报告；
//! 4) 若配置了端锚定扫描器：清除活动/角色标记 → 扫描末尾窗口 → 冲刷历史 →
//!    再次运行迭代程序 → 新触发的后缀引擎收尾。
//!
//! 任一步骤收到停止请求，其后步骤都不再执行；已投递的报告不会回滚。
use tracing::{debug, trace};

use crate::artifact::EngineArtifact;
use crate::error::EodError;
use crate::history::flush_last_byte_history;
use crate::runtime::{EodBackend, EodReportAdapter, EvalCx, ReportSink};
use crate::scratch::{Scratch, StreamState};
use crate::types::{BufferMode, EodOutcome, Flow, ProgramRef};

/// 块模式 EOD 评估
///
/// 前置条件（违反即返回错误）：构件要求 EOD 检查、偏移不超过最大双端锚定宽度、
/// 工作区尚未被停止。上下文由块扫描阶段初始化，这里不再重置。
pub fn evaluate_block_eod(
    artifact: &EngineArtifact,
    offset: u64,
    data: &[u8],
    state: &mut StreamState,
    scratch: &mut Scratch,
    backend: &mut dyn EodBackend,
    sink: &mut dyn ReportSink,
) -> Result<EodOutcome, EodError> {
    if !artifact.requires_eod_check {
        return Err(EodError::MissingEodCheck);
    }
    if let Some(bound) = artifact.max_bi_anchored_width.filter(|&b| offset > b) {
        return Err(EodError::OffsetBeyondBound { offset, bound });
    }
    check_ready(artifact, state, scratch)?;

    let buffer = BufferMode::Block(data);
    debug!(offset, len = data.len(), "block eod");

    // 先保证历史一致
    flush_last_byte_history(artifact, state, &scratch.ctx, buffer.buffer_end(), data.len() as u64);
    scratch.ctx.last_end_offset = data.len() as u64;

    let mut run = EodRun { artifact, offset, buffer, state, scratch, backend, sink };
    Ok(run.drive())
}

/// 流模式 EOD 评估
///
/// `history` 为流保留下来的末尾字节。偏移超过最大双端锚定宽度时直接返回
/// [`EodOutcome::BeyondMaxWidth`]，不修改任何状态、不调用任何回调。
pub fn evaluate_streaming_eod(
    artifact: &EngineArtifact,
    offset: u64,
    history: &[u8],
    state: &mut StreamState,
    scratch: &mut Scratch,
    backend: &mut dyn EodBackend,
    sink: &mut dyn ReportSink,
) -> Result<EodOutcome, EodError> {
    if !artifact.requires_eod_check {
        return Err(EodError::MissingEodCheck);
    }
    if !artifact.offset_in_bound(offset) {
        // 超出上界后历史 / 状态可能已经过期
        debug!(offset, bound = ?artifact.max_bi_anchored_width, "bailing, beyond max width");
        return Ok(EodOutcome::BeyondMaxWidth);
    }
    check_ready(artifact, state, scratch)?;

    let buffer = BufferMode::Streaming { history, buf_offset: offset };
    debug!(offset, history_len = history.len(), "streaming eod");
    scratch.init_context(state, &buffer, offset);

    let mut run = EodRun { artifact, offset, buffer, state, scratch, backend, sink };
    Ok(run.drive())
}

fn check_ready(artifact: &EngineArtifact, state: &StreamState, scratch: &Scratch) -> Result<(), EodError> {
    if scratch.can_stop_matching() {
        return Err(EodError::StreamTerminated);
    }
    state.check_shape(artifact)?;
    scratch.check_shape(artifact)
}

/// 编排阶段。`ResetMarkers` 是显式的状态迁移：引擎收尾完成 → 清标记 → 端锚定扫描。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EodPhase {
    EodProgram,
    ActiveEngines,
    FirstIterator,
    ResetMarkers,
    AnchoredScan,
    CleanupHistory,
    SecondIterator,
    Suffixes,
}

enum Next {
    Phase(EodPhase),
    Finished(EodOutcome),
}

impl EodPhase {
    fn next(self, artifact: &EngineArtifact) -> Next {
        use EodPhase::*;
        match self {
            EodProgram => Next::Phase(ActiveEngines),
            ActiveEngines if !artifact.has_eod_logic() => Next::Finished(EodOutcome::NoEodLogic),
            ActiveEngines => Next::Phase(FirstIterator),
            FirstIterator if artifact.anchored_scanner.is_some() => Next::Phase(ResetMarkers),
            FirstIterator => Next::Finished(EodOutcome::Completed),
            ResetMarkers => Next::Phase(AnchoredScan),
            AnchoredScan => Next::Phase(CleanupHistory),
            CleanupHistory => Next::Phase(SecondIterator),
            SecondIterator => Next::Phase(Suffixes),
            Suffixes => Next::Finished(EodOutcome::Completed),
        }
    }
}

/// 单次评估的共享驱动
struct EodRun<'r, 'b> {
    artifact: &'r EngineArtifact,
    offset: u64,
    buffer: BufferMode<'b>,
    state: &'r mut StreamState,
    scratch: &'r mut Scratch,
    backend: &'r mut dyn EodBackend,
    sink: &'r mut dyn ReportSink,
}

impl EodRun<'_, '_> {
    fn drive(&mut self) -> EodOutcome {
        let mut phase = EodPhase::EodProgram;
        loop {
            trace!(?phase, "eod phase");
            let flow = match phase {
                EodPhase::EodProgram => self.run_eod_program(),
                EodPhase::ActiveEngines => self.check_active_engines_eod(),
                EodPhase::FirstIterator | EodPhase::SecondIterator => self.run_eod_iterator(),
                EodPhase::ResetMarkers => self.reset_markers_for_anchored_scan(),
                EodPhase::AnchoredScan => self.run_anchored_scan(),
                EodPhase::CleanupHistory => self.cleanup_after_anchored_scan(),
                EodPhase::Suffixes => self.check_suffix_engines_eod(),
            };
            if flow.is_halt() {
                debug!(?phase, "user instructed us to stop");
                self.scratch.mark_terminated();
                return EodOutcome::Halted;
            }
            match phase.next(self.artifact) {
                Next::Phase(p) => phase = p,
                Next::Finished(outcome) => {
                    if outcome == EodOutcome::NoEodLogic { debug!("no eod accepts"); }
                    return outcome;
                }
            }
        }
    }

    /// 以零匹配长度在当前偏移运行一个程序
    fn run_program(&mut self, program: ProgramRef) -> Flow {
        self.scratch.stats.programs_run += 1;
        let mut cx = EvalCx {
            ctx: &mut self.scratch.ctx,
            state: &mut *self.state,
            queue_activity: &mut self.scratch.queue_activity,
        };
        let mut out = EodReportAdapter::new(&mut *self.sink, &mut self.scratch.stats.reports_delivered);
        self.backend.run_program(program, self.offset, 0, &mut cx, &mut out)
    }

    fn run_eod_program(&mut self) -> Flow {
        let Some(program) = self.artifact.eod_program else { return Flow::Continue };
        debug!(program = program.0, "running eod program");
        // 普通延迟字面量应已由前面的扫描阶段冲刷完
        debug_assert_eq!(self.scratch.ctx.filled_delayed_slots, 0, "pending delayed literals at eod");
        self.run_program(program)
    }

    fn run_eod_iterator(&mut self) -> Flow {
        let Some(program) = self.artifact.eod_iter_program else { return Flow::Continue };
        debug!(program = program.0, "running eod iterator program");
        self.run_program(program)
    }

    /// 对 “可在 EOD 接受 ∩ 活动” 的引擎逐个收尾；不修改活动集合
    fn check_active_engines_eod(&mut self) -> Flow {
        let artifact = self.artifact;
        let Some(plan) = artifact.eod_engine_iter.as_ref() else {
            debug!("no engines that report at eod");
            return Flow::Continue;
        };

        // 状态解压需要完整可用数据的最后一个字节
        let streaming = self.buffer.is_streaming();
        let key = self.buffer.expand_key();

        for qi in plan.iter(&self.state.active) {
            trace!(engine = qi, "checking nfa");
            debug_assert!(self.backend.accepts_eod(qi));
            self.scratch.stats.engines_checked += 1;

            if streaming {
                self.backend.expand_state(qi, self.offset, key);
            }

            let mut out = EodReportAdapter::new(&mut *self.sink, &mut self.scratch.stats.reports_delivered);
            if self.backend.check_final_state(qi, self.offset, &mut out).is_halt() {
                return Flow::Halt;
            }
        }
        Flow::Continue
    }

    /// 清除刚才已经触发过的角色与活动引擎，避免端锚定扫描之后重复触发
    fn reset_markers_for_anchored_scan(&mut self) -> Flow {
        debug!(
            roles = self.state.roles.count(),
            active = self.state.active.count(),
            "clearing role state and active engines before anchored scan"
        );
        self.state.roles.clear();
        self.state.active.clear();
        Flow::Continue
    }

    fn run_anchored_scan(&mut self) -> Flow {
        let Some(desc) = self.artifact.anchored_scanner else { return Flow::Continue };
        let data = self.buffer.eod_region();

        // 数据不足以产生匹配时没必要扫描
        if data.len() < desc.min_width {
            debug!(len = data.len(), min_width = desc.min_width, "anchored scan skipped");
            return Flow::Continue;
        }

        // 只需扫描末尾 region_size 字节
        let start = data.len() - data.len().min(desc.region_size);
        debug!(offset = self.offset, len = data.len(), start, "running eod anchored scan");
        self.scratch.stats.anchored_scans += 1;

        let mut cx = EvalCx {
            ctx: &mut self.scratch.ctx,
            state: &mut *self.state,
            queue_activity: &mut self.scratch.queue_activity,
        };
        let mut out = EodReportAdapter::new(&mut *self.sink, &mut self.scratch.stats.reports_delivered);
        if self.backend.scan(&desc, data, start, &mut cx, &mut out).is_halt() {
            return Flow::Halt;
        }
        // 扫描可能留下延迟匹配
        self.backend.flush_delayed(self.offset, &mut cx, &mut out)
    }

    fn cleanup_after_anchored_scan(&mut self) -> Flow {
        flush_last_byte_history(self.artifact, self.state, &self.scratch.ctx, self.buffer.buffer_end(), self.offset);
        Flow::Continue
    }

    /// 端锚定扫描新触发的后缀引擎收尾
    fn check_suffix_engines_eod(&mut self) -> Flow {
        let live_len = self.buffer.live_len();
        for qi in self.state.active.iter() {
            trace!(engine = qi, "checking suffix nfa");
            debug_assert!(self.backend.accepts_eod(qi));
            // 刚刚被触发
            debug_assert!(self.scratch.queue_activity.is_set(qi));
            self.scratch.stats.suffixes_run += 1;

            self.backend.push_end(qi, live_len);
            // 不合并进历史：EOD 不能改动跨调用的历史状态
            if !self.backend.exec_queue_no_merge(qi) {
                trace!(engine = qi, "suffix died");
                continue;
            }

            let mut out = EodReportAdapter::new(&mut *self.sink, &mut self.scratch.stats.reports_delivered);
            if self.backend.check_final_state(qi, self.offset, &mut out).is_halt() {
                return Flow::Halt;
            }
        }
        Flow::Continue
    }
}

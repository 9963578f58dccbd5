//! 参考协作者实现（模拟后端），供 CLI 与测试驱动 EOD 编排使用
//!
//! - 程序解释器：程序是若干步骤，每步投递一个报告，可选地以某个角色置位为前提；
//! - 端锚定扫描器：Aho-Corasick 找出恰好结束于数据末尾的字面量，再执行其动作；
//! - 子引擎运行时：按引擎描述决定是否接受、报告什么，队列执行遇到结束事件可选择“死亡”。
use std::collections::HashMap;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use tracing::trace;

use crate::artifact::AnchoredScannerDesc;
use crate::error::EodError;
use crate::runtime::{EndAnchoredScanner, EvalCx, ProgramInterpreter, ReportSink, SubEngineRuntime};
use crate::types::{EngineIndex, Flow, ProgramRef, ReportId};

/// 程序中的一步
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramStep {
    pub report: ReportId,
    /// 仅当该角色置位时才投递
    pub when_role: Option<u32>,
    /// 带起点报告：起点 = 偏移 - 距离
    pub som_distance: Option<u64>,
}

impl ProgramStep {
    pub fn report(report: ReportId) -> Self {
        Self { report, when_role: None, som_distance: None }
    }

    pub fn when_role(report: ReportId, role: u32) -> Self {
        Self { report, when_role: Some(role), som_distance: None }
    }
}

/// 端锚定字面量命中后的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralAction {
    /// 直接投递报告
    Report(ReportId),
    /// 置位角色（供第二次迭代程序使用）
    Role(u32),
    /// 触发后缀引擎
    Activate(EngineIndex),
    /// 延迟投递，扫描结束后冲刷
    Delay(ReportId),
}

/// 端锚定字面量
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimLiteral {
    pub bytes: Vec<u8>,
    /// 所属字面量组；与上下文组掩码不相交时不触发
    pub groups: u64,
    pub action: LiteralAction,
}

/// 子引擎描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimEngine {
    pub accepts_eod: bool,
    /// 在 EOD 接受时投递的报告
    pub reports: Vec<ReportId>,
    pub som_distance: Option<u64>,
    /// 流模式下只有以该键展开的状态才处于接受态
    pub expand_key: Option<u8>,
    /// 队列执行遇到结束事件后引擎死亡
    pub dies_on_end: bool,
}

impl SimEngine {
    pub fn accepting(reports: &[ReportId]) -> Self {
        Self { accepts_eod: true, reports: reports.to_vec(), som_distance: None, expand_key: None, dies_on_end: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueEvent {
    Top(u64),
    End(usize),
}

/// 运行计数（测试断言用）
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SimCounters {
    pub programs_run: u32,
    pub expansions: u32,
    pub final_checks: u32,
    pub queue_execs: u32,
}

/// 模拟后端
#[derive(Debug, Clone)]
pub struct SimBackend {
    programs: HashMap<ProgramRef, Vec<ProgramStep>>,
    literals: Vec<SimLiteral>,
    ac: Option<AhoCorasick>,
    engines: Vec<Option<SimEngine>>,
    expanded: Vec<Option<u8>>,
    queues: Vec<Vec<QueueEvent>>,
    delayed: Vec<(u64, ReportId)>,
    pub counters: SimCounters,
}

impl SimBackend {
    pub fn builder(queue_count: u32) -> SimBackendBuilder {
        SimBackendBuilder { queue_count, programs: HashMap::new(), literals: Vec::new(), engines: Vec::new() }
    }

    pub fn engine(&self, idx: EngineIndex) -> Option<&SimEngine> {
        self.engines.get(idx as usize).and_then(|e| e.as_ref())
    }

    pub fn literals(&self) -> &[SimLiteral] {
        &self.literals
    }

    pub fn program(&self, program: ProgramRef) -> Option<&[ProgramStep]> {
        self.programs.get(&program).map(|v| v.as_slice())
    }

    /// 将一个 Delay 字面量记入延迟槽
    fn push_delayed(&mut self, cx: &mut EvalCx<'_>, at: u64, id: ReportId) {
        self.delayed.push((at, id));
        cx.ctx.filled_delayed_slots += 1;
    }
}

/// 模拟后端构建器
#[derive(Debug, Clone)]
pub struct SimBackendBuilder {
    queue_count: u32,
    programs: HashMap<ProgramRef, Vec<ProgramStep>>,
    literals: Vec<SimLiteral>,
    engines: Vec<(EngineIndex, SimEngine)>,
}

impl SimBackendBuilder {
    pub fn program(mut self, program: ProgramRef, steps: Vec<ProgramStep>) -> Self {
        self.programs.insert(program, steps);
        self
    }

    pub fn literal(mut self, bytes: &[u8], groups: u64, action: LiteralAction) -> Self {
        self.literals.push(SimLiteral { bytes: bytes.to_vec(), groups, action });
        self
    }

    pub fn engine(mut self, idx: EngineIndex, engine: SimEngine) -> Self {
        self.engines.push((idx, engine));
        self
    }

    pub fn build(self) -> Result<SimBackend, EodError> {
        let capacity = self.queue_count;
        let mut engines = vec![None; capacity as usize];
        for (idx, engine) in self.engines {
            let slot = engines
                .get_mut(idx as usize)
                .ok_or(EodError::EngineOutOfRange { index: idx, capacity })?;
            *slot = Some(engine);
        }
        for lit in &self.literals {
            if lit.bytes.is_empty() {
                return Err(EodError::InvalidArtifact("empty anchored literal".into()));
            }
            if let LiteralAction::Activate(idx) = lit.action {
                if idx >= capacity {
                    return Err(EodError::EngineOutOfRange { index: idx, capacity });
                }
            }
        }

        // 重叠匹配需要 Standard 语义
        let ac = if self.literals.is_empty() {
            None
        } else {
            let ac = AhoCorasickBuilder::new()
                .match_kind(MatchKind::Standard)
                .build(self.literals.iter().map(|l| l.bytes.as_slice()))
                .map_err(|e| EodError::InvalidArtifact(format!("build aho-corasick: {e}")))?;
            Some(ac)
        };

        Ok(SimBackend {
            programs: self.programs,
            literals: self.literals,
            ac,
            engines,
            expanded: vec![None; capacity as usize],
            queues: vec![Vec::new(); capacity as usize],
            delayed: Vec::new(),
            counters: SimCounters::default(),
        })
    }
}

fn deliver(sink: &mut dyn ReportSink, offset: u64, som_distance: Option<u64>, id: ReportId) -> Flow {
    match som_distance {
        Some(d) => sink.report_with_start(offset.saturating_sub(d), offset, id),
        None => sink.report(offset, id),
    }
}

impl ProgramInterpreter for SimBackend {
    fn run_program(
        &mut self,
        program: ProgramRef,
        offset: u64,
        _match_len: usize,
        cx: &mut EvalCx<'_>,
        sink: &mut dyn ReportSink,
    ) -> Flow {
        self.counters.programs_run += 1;
        let Some(steps) = self.programs.get(&program) else { return Flow::Continue };
        for step in steps {
            if let Some(role) = step.when_role {
                if !cx.state.roles.is_set(role) { continue; }
            }
            if deliver(sink, offset, step.som_distance, step.report).is_halt() {
                return Flow::Halt;
            }
        }
        Flow::Continue
    }
}

impl EndAnchoredScanner for SimBackend {
    fn scan(
        &mut self,
        _desc: &AnchoredScannerDesc,
        data: &[u8],
        start: usize,
        cx: &mut EvalCx<'_>,
        sink: &mut dyn ReportSink,
    ) -> Flow {
        let Some(ac) = self.ac.as_ref() else { return Flow::Continue };

        // 只保留恰好结束于数据末尾的命中，按字面量序号排序以保证顺序稳定
        let mut hits: Vec<usize> = ac
            .find_overlapping_iter(&data[start..])
            .filter(|m| start + m.end() == data.len())
            .map(|m| m.pattern().as_usize())
            .collect();
        hits.sort_unstable();
        hits.dedup();

        for lit_idx in hits {
            let (groups, action) = (self.literals[lit_idx].groups, self.literals[lit_idx].action);
            if groups & cx.ctx.groups == 0 {
                trace!(literal = lit_idx, "literal group switched off");
                continue;
            }
            let real_end = cx.ctx.literal_end_offset(data.len() - 1);
            cx.ctx.last_end_offset = real_end;
            cx.ctx.last_match_offset = real_end;
            trace!(literal = lit_idx, end = real_end, ?action, "anchored literal match");

            let flow = match action {
                LiteralAction::Report(id) => sink.report(real_end, id),
                LiteralAction::Role(role) => {
                    cx.state.roles.set(role);
                    Flow::Continue
                }
                LiteralAction::Activate(engine) => {
                    cx.state.active.set(engine);
                    cx.queue_activity.set(engine);
                    let queue = &mut self.queues[engine as usize];
                    queue.clear();
                    queue.push(QueueEvent::Top(real_end));
                    Flow::Continue
                }
                LiteralAction::Delay(id) => {
                    self.push_delayed(cx, real_end, id);
                    Flow::Continue
                }
            };
            if flow.is_halt() {
                return Flow::Halt;
            }
        }
        Flow::Continue
    }

    fn flush_delayed(&mut self, offset: u64, cx: &mut EvalCx<'_>, sink: &mut dyn ReportSink) -> Flow {
        cx.ctx.filled_delayed_slots = 0;
        cx.ctx.delay_last_end_offset = offset;
        for (at, id) in std::mem::take(&mut self.delayed) {
            if sink.report(at, id).is_halt() {
                return Flow::Halt;
            }
        }
        Flow::Continue
    }
}

impl SubEngineRuntime for SimBackend {
    fn accepts_eod(&self, engine: EngineIndex) -> bool {
        self.engine(engine).is_some_and(|e| e.accepts_eod)
    }

    fn expand_state(&mut self, engine: EngineIndex, _offset: u64, key: u8) {
        self.counters.expansions += 1;
        if let Some(slot) = self.expanded.get_mut(engine as usize) {
            *slot = Some(key);
        }
    }

    fn check_final_state(&mut self, engine: EngineIndex, offset: u64, sink: &mut dyn ReportSink) -> Flow {
        self.counters.final_checks += 1;
        let idx = engine as usize;
        let Some(desc) = self.engines.get(idx).and_then(|e| e.as_ref()) else { return Flow::Continue };
        if !desc.accepts_eod {
            return Flow::Continue;
        }
        // 以错误的上下文字节展开的状态不处于接受态
        if let (Some(want), Some(Some(got))) = (desc.expand_key, self.expanded.get(idx)) {
            if want != *got { return Flow::Continue; }
        }
        for &id in &desc.reports {
            if deliver(sink, offset, desc.som_distance, id).is_halt() {
                return Flow::Halt;
            }
        }
        Flow::Continue
    }

    fn push_end(&mut self, engine: EngineIndex, location: usize) {
        if let Some(queue) = self.queues.get_mut(engine as usize) {
            queue.push(QueueEvent::End(location));
        }
    }

    fn exec_queue_no_merge(&mut self, engine: EngineIndex) -> bool {
        self.counters.queue_execs += 1;
        let idx = engine as usize;
        let events = self.queues.get_mut(idx).map(std::mem::take).unwrap_or_default();
        let Some(desc) = self.engines.get(idx).and_then(|e| e.as_ref()) else { return false };
        let saw_end = events.iter().any(|e| matches!(e, QueueEvent::End(_)));
        !(saw_end && desc.dies_on_end)
    }
}

//! 构件文件加载（TOML）：构件参数 + 模拟后端行为 + 初始流状态
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::artifact::EngineArtifact;
use crate::scratch::StreamState;
use crate::sim::{LiteralAction, ProgramStep, SimBackend, SimEngine};
use crate::types::{EngineIndex, ProgramRef};

fn default_true() -> bool {
    true
}

/// 顶层文件结构
#[derive(Debug, Clone, Deserialize)]
struct ArtifactFile {
    artifact: ArtifactSection,
    #[serde(default)]
    anchored_scanner: Option<ScannerSection>,
    #[serde(default)]
    programs: Vec<ProgramEntry>,
    #[serde(default)]
    literals: Vec<LiteralEntry>,
    #[serde(default)]
    engines: Vec<EngineEntry>,
    #[serde(default)]
    initial_state: InitialStateSection,
}

#[derive(Debug, Clone, Deserialize)]
struct ArtifactSection {
    #[serde(default = "default_true")]
    requires_eod_check: bool,
    #[serde(default)]
    max_bi_anchored_width: Option<u64>,
    active_array_count: u32,
    #[serde(default)]
    roles_with_state_count: u32,
    queue_count: u32,
    #[serde(default)]
    eod_program: Option<u32>,
    #[serde(default)]
    eod_iter_program: Option<u32>,
    #[serde(default)]
    eod_engines: Option<Vec<u32>>,
    #[serde(default)]
    last_byte_history_roles: Option<Vec<u32>>,
}

#[derive(Debug, Clone, Deserialize)]
struct ScannerSection {
    min_width: usize,
    region_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
struct ProgramEntry {
    id: u32,
    #[serde(default)]
    steps: Vec<StepEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct StepEntry {
    report: u32,
    #[serde(default)]
    when_role: Option<u32>,
    #[serde(default)]
    som_distance: Option<u64>,
}

/// 字面量动作（`kind` 区分）
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ActionEntry {
    Report { id: u32 },
    Role { role: u32 },
    Activate { engine: u32 },
    Delay { id: u32 },
}

#[derive(Debug, Clone, Deserialize)]
struct LiteralEntry {
    text: String,
    /// 缺省属于全部组
    #[serde(default)]
    groups: Option<u64>,
    action: ActionEntry,
}

#[derive(Debug, Clone, Deserialize)]
struct EngineEntry {
    index: u32,
    #[serde(default = "default_true")]
    accepts_eod: bool,
    #[serde(default)]
    reports: Vec<u32>,
    #[serde(default)]
    som_distance: Option<u64>,
    #[serde(default)]
    expand_key: Option<u8>,
    #[serde(default)]
    dies_on_end: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct InitialStateSection {
    #[serde(default)]
    groups: Option<u64>,
    #[serde(default)]
    active: Vec<u32>,
    #[serde(default)]
    roles: Vec<u32>,
}

/// 加载结果：构件、模拟后端、初始流状态模板
#[derive(Debug, Clone)]
pub struct LoadedArtifact {
    pub artifact: EngineArtifact,
    pub backend: SimBackend,
    initial_groups: u64,
    initial_active: Vec<EngineIndex>,
    initial_roles: Vec<u32>,
}

impl LoadedArtifact {
    /// 为一条新流生成初始状态（模拟主扫描阶段留下的活动引擎 / 角色）
    pub fn new_stream_state(&self) -> StreamState {
        let mut state = StreamState::new(&self.artifact);
        state.groups = self.initial_groups;
        for &e in &self.initial_active { state.active.set(e); }
        for &r in &self.initial_roles { state.roles.set(r); }
        state
    }
}

/// 从 TOML 构件文件加载
pub fn load_artifact_file(path: &Path) -> Result<LoadedArtifact> {
    let txt = std::fs::read_to_string(path).with_context(|| format!("read artifact file {}", path.display()))?;
    parse_artifact_str(&txt).with_context(|| format!("load artifact file {}", path.display()))
}

/// 从 TOML 文本解析
pub fn parse_artifact_str(txt: &str) -> Result<LoadedArtifact> {
    let parsed: ArtifactFile = toml::from_str(txt)?;
    let a = &parsed.artifact;

    let mut builder = EngineArtifact::builder(a.active_array_count, a.roles_with_state_count, a.queue_count)
        .requires_eod_check(a.requires_eod_check)
        .max_bi_anchored_width(a.max_bi_anchored_width);
    if let Some(s) = &parsed.anchored_scanner {
        builder = builder.anchored_scanner(s.min_width, s.region_size);
    }
    if let Some(id) = a.eod_program { builder = builder.eod_program(ProgramRef(id)); }
    if let Some(id) = a.eod_iter_program { builder = builder.eod_iter_program(ProgramRef(id)); }
    if let Some(list) = &a.eod_engines { builder = builder.eod_engines(list); }
    if let Some(list) = &a.last_byte_history_roles { builder = builder.last_byte_history(list); }
    let artifact = builder.build()?;

    let mut sim = SimBackend::builder(a.queue_count);
    for p in &parsed.programs {
        let steps = p
            .steps
            .iter()
            .map(|s| ProgramStep { report: s.report, when_role: s.when_role, som_distance: s.som_distance })
            .collect();
        sim = sim.program(ProgramRef(p.id), steps);
    }
    for l in &parsed.literals {
        let action = match l.action {
            ActionEntry::Report { id } => LiteralAction::Report(id),
            ActionEntry::Role { role } => LiteralAction::Role(role),
            ActionEntry::Activate { engine } => LiteralAction::Activate(engine),
            ActionEntry::Delay { id } => LiteralAction::Delay(id),
        };
        sim = sim.literal(l.text.as_bytes(), l.groups.unwrap_or(u64::MAX), action);
    }
    for e in &parsed.engines {
        let engine = SimEngine {
            accepts_eod: e.accepts_eod,
            reports: e.reports.clone(),
            som_distance: e.som_distance,
            expand_key: e.expand_key,
            dies_on_end: e.dies_on_end,
        };
        sim = sim.engine(e.index, engine);
    }
    let backend = sim.build()?;

    let loaded = LoadedArtifact {
        artifact,
        backend,
        initial_groups: parsed.initial_state.groups.unwrap_or(u64::MAX),
        initial_active: parsed.initial_state.active.clone(),
        initial_roles: parsed.initial_state.roles.clone(),
    };
    validate_cross_refs(&loaded)?;
    Ok(loaded)
}

/// 构件与模拟后端之间的交叉校验（编译器本应保证的约定）
fn validate_cross_refs(loaded: &LoadedArtifact) -> Result<()> {
    let artifact = &loaded.artifact;
    let backend = &loaded.backend;
    let roles = artifact.roles_with_state_count;
    let active = artifact.active_array_count;

    for program in [artifact.eod_program, artifact.eod_iter_program].into_iter().flatten() {
        let Some(steps) = backend.program(program) else { bail!("program {} is not defined", program.0) };
        if let Some(role) = steps.iter().filter_map(|s| s.when_role).find(|&r| r >= roles) {
            bail!("program {} refers to role {role} (role count {roles})", program.0);
        }
    }
    // 迭代程序会运行两次：每一步都必须由角色触发，两次运行的触发集合才不相交
    if let Some(program) = artifact.eod_iter_program {
        if backend.program(program).is_some_and(|steps| steps.iter().any(|s| s.when_role.is_none())) {
            bail!("eod iterator program {} has steps not gated on a role", program.0);
        }
    }
    if let Some(plan) = &artifact.eod_engine_iter {
        for e in plan.iter_all() {
            if !backend.engine(e).is_some_and(|engine| engine.accepts_eod) {
                bail!("eod engine {e} is not defined as accepting at eod");
            }
        }
    }
    for lit in backend.literals() {
        check_literal_targets(lit.action, artifact, backend)?;
    }
    for &e in &loaded.initial_active {
        if e >= active { bail!("initial active engine {e} out of range ({active})"); }
    }
    for &r in &loaded.initial_roles {
        if r >= roles { bail!("initial role {r} out of range ({roles})"); }
    }
    Ok(())
}

/// 字面量动作涉及的引擎 / 角色范围校验
fn check_literal_targets(action: LiteralAction, artifact: &EngineArtifact, backend: &SimBackend) -> Result<()> {
    match action {
        LiteralAction::Activate(e) => {
            if e >= artifact.active_array_count {
                bail!("literal activates engine {e} beyond active array ({})", artifact.active_array_count);
            }
            if !backend.engine(e).is_some_and(|engine| engine.accepts_eod) {
                bail!("literal activates engine {e} which does not accept at eod");
            }
        }
        LiteralAction::Role(r) if r >= artifact.roles_with_state_count => {
            bail!("literal sets role {r} beyond role count ({})", artifact.roles_with_state_count);
        }
        _ => {}
    }
    Ok(())
}

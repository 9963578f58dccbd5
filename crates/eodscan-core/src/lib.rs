//! 数据结束（EOD）匹配收尾库
//!
//! 设计要点：
//! - 输入结束时按固定顺序驱动各匹配机制：无条件 EOD 程序 → 活动子引擎收尾 →
//!   迭代程序 →（可选）端锚定扫描 → 再次迭代程序 → 后缀引擎收尾。
//! - 编排只依赖三个协作者 trait（程序解释器 / 端锚定扫描器 / 子引擎运行时），
//!   `sim` 模块提供可由 TOML 构件文件配置的参考实现。
//! - 回调随时可要求停止：其后步骤不再执行，工作区被锁定，已投递的报告不回滚。
//! - 违反前置条件返回 [`EodError`]；停止 / 无 EOD 逻辑 / 超出宽度上界属于正常结果 [`EodOutcome`]。
//! - 批量评估输出为流式 JSON 数组，按文件名排序，保证稳定顺序与可复现性。

mod artifact;
mod artifact_file;
mod bitmap;
mod context;
mod eod;
mod error;
mod history;
mod options;
mod reports;
mod runtime;
mod scan;
mod scratch;
mod sim;
mod sparse_iter;
mod types;

pub use artifact::{AnchoredScannerDesc, ArtifactBuilder, EngineArtifact};
pub use artifact_file::{load_artifact_file, parse_artifact_str, LoadedArtifact};
pub use bitmap::{ActiveEngineSet, BitmapIter, EngineBitmap};
pub use context::MatchContext;
pub use eod::{evaluate_block_eod, evaluate_streaming_eod};
pub use error::EodError;
pub use options::{EvalMode, EvalOptions, RunStats};
pub use reports::ReportLog;
pub use runtime::{EndAnchoredScanner, EodBackend, EvalCx, ProgramInterpreter, ReportSink, SubEngineRuntime};
pub use scan::{eval_and_write, evaluate_bytes, InputEval};
pub use scratch::{EodStats, Scratch, StreamState};
pub use sim::{LiteralAction, ProgramStep, SimBackend, SimBackendBuilder, SimCounters, SimEngine, SimLiteral};
pub use sparse_iter::{SparseIndexIter, SparseIterPlan, MAX_SPARSE_ITER_STATES};
pub use types::{BufferMode, EngineIndex, EodOutcome, Flow, OutputItem, ProgramRef, Report, ReportId};

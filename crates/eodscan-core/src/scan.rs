//! 输入评估主流程与并行调度
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::artifact_file::LoadedArtifact;
use crate::error::EodError;
use crate::eod::{evaluate_block_eod, evaluate_streaming_eod};
use crate::options::{EvalMode, EvalOptions, RunStats};
use crate::reports::ReportLog;
use crate::scratch::{EodStats, Scratch};
use crate::types::{BufferMode, EodOutcome, OutputItem, Report};

/// 单个输入的评估结果
#[derive(Debug, Clone)]
pub struct InputEval {
    pub reports: Vec<Report>,
    pub outcome: EodOutcome,
    pub stats: EodStats,
}

/// 对一段完整数据执行 EOD 评估（流结束于数据末尾）
///
/// 每次调用都使用后端的新副本与新的流状态，多次调用互不影响。
pub fn evaluate_bytes(loaded: &LoadedArtifact, data: &[u8], opts: &EvalOptions) -> Result<InputEval, EodError> {
    let artifact = &loaded.artifact;
    let offset = data.len() as u64;
    let mut scratch = Scratch::new(artifact);

    // 扫描阶段负责判断是否进入 EOD：两种情况都是正常结束，不是错误
    let skipped = if !artifact.requires_eod_check {
        Some(EodOutcome::EodCheckNotRequired)
    } else if !artifact.offset_in_bound(offset) {
        Some(EodOutcome::BeyondMaxWidth)
    } else {
        None
    };
    if let Some(outcome) = skipped {
        debug!(?outcome, offset, "eod not entered");
        return Ok(InputEval { reports: Vec::new(), outcome, stats: scratch.stats });
    }

    let mut backend = loaded.backend.clone();
    let mut state = loaded.new_stream_state();
    let mut log = ReportLog::new(opts.halt_after);

    let outcome = match opts.mode {
        EvalMode::Block => {
            // 块扫描阶段从偏移 0 开始初始化上下文
            scratch.init_context(&state, &BufferMode::Block(data), 0);
            evaluate_block_eod(artifact, offset, data, &mut state, &mut scratch, &mut backend, &mut log)?
        }
        EvalMode::Streaming => {
            let keep = data.len().min(opts.history_window);
            let history = &data[data.len() - keep..];
            evaluate_streaming_eod(artifact, offset, history, &mut state, &mut scratch, &mut backend, &mut log)?
        }
    };
    debug!(?outcome, reports = log.reports().len(), "input evaluated");
    Ok(InputEval { reports: log.into_reports(), outcome, stats: scratch.stats })
}

/// 评估单个文件或目录下的全部文件，并将报告以 JSON 数组流式写入 `out`
/// 稳定性保证：
/// - 输入级：目录内文件按文件名排序，输出顺序可复现
/// - 输入内：报告按投递顺序输出
pub fn eval_and_write(input: &Path, out: &mut dyn Write, loaded: &LoadedArtifact, opts: &EvalOptions) -> Result<RunStats> {
    let mut files: Vec<PathBuf> = vec![];
    if input.is_file() {
        files.push(input.to_path_buf());
    } else {
        // 目录只遍历一层
        for entry in WalkDir::new(input).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if entry.file_type().is_file() { files.push(entry.into_path()); }
        }
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    }

    let threads = opts.threads.unwrap_or_else(num_cpus::get);
    let mut stats = RunStats::default();
    let mut writer = JsonArrayWriter::new(out)?;

    if threads > 1 && files.len() > 1 {
        eval_parallel(&files, &mut writer, loaded, opts, &mut stats, threads)?;
    } else {
        for path in &files {
            let res = eval_file(path, loaded, opts);
            record(&mut writer, &mut stats, path, res)?;
        }
    }
    writer.finish()?;
    Ok(stats)
}

/// 每个输入在报告中的名字（文件名）
fn input_name(path: &Path) -> String {
    path.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| path.display().to_string())
}

/// 读取并评估一个文件；超过大小上限时返回 Ok(None)
fn eval_file(path: &Path, loaded: &LoadedArtifact, opts: &EvalOptions) -> Result<Option<InputEval>> {
    if let Some(max) = opts.max_input_size {
        let md = std::fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
        if md.len() > max {
            debug!(path = %path.display(), size = md.len(), max, "input too large, skipped");
            return Ok(None);
        }
    }
    let data = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let eval = evaluate_bytes(loaded, &data, opts).with_context(|| format!("evaluate {}", path.display()))?;
    Ok(Some(eval))
}

/// 把单个输入的结果写出并累计统计；评估失败只记录警告
fn record(writer: &mut JsonArrayWriter<'_>, stats: &mut RunStats, path: &Path, res: Result<Option<InputEval>>) -> Result<()> {
    match res {
        Ok(Some(eval)) => {
            stats.inputs_evaluated += 1;
            if eval.outcome == EodOutcome::Halted { stats.inputs_halted += 1; }
            let name = input_name(path);
            for r in &eval.reports {
                writer.push(&OutputItem { input: &name, offset: r.offset, id: r.id, from: r.from })?;
                stats.reports_written += 1;
            }
        }
        Ok(None) => {}
        Err(e) => {
            stats.inputs_failed += 1;
            warn!(path = %path.display(), error = %format!("{e:#}"), "input skipped");
        }
    }
    Ok(())
}

/// 流式 JSON 数组写出器
struct JsonArrayWriter<'w> {
    out: &'w mut dyn Write,
    first: bool,
}

impl<'w> JsonArrayWriter<'w> {
    fn new(out: &'w mut dyn Write) -> Result<Self> {
        write!(out, "[")?;
        Ok(Self { out, first: true })
    }

    fn push(&mut self, item: &OutputItem<'_>) -> Result<()> {
        if !self.first { write!(self.out, ",")?; } else { self.first = false; }
        serde_json::to_writer(&mut *self.out, item)?;
        Ok(())
    }

    fn finish(self) -> Result<()> {
        write!(self.out, "]")?;
        Ok(())
    }
}

/// 并行调度：
/// - 后台线程内建 Rayon 线程池并行评估
/// - 当前线程作为 Writer，按 idx 重排后流式写出，保证稳定顺序
fn eval_parallel(
    files: &[PathBuf],
    writer: &mut JsonArrayWriter<'_>,
    loaded: &LoadedArtifact,
    opts: &EvalOptions,
    stats: &mut RunStats,
    threads: usize,
) -> Result<()> {
    use crossbeam_channel as channel;
    use rayon::prelude::*;

    type Msg = (usize /*idx*/, Result<Option<InputEval>>);
    let (tx, rx) = channel::bounded::<Msg>(256);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .context("build rayon pool")?;

    let shared = Arc::new(loaded.clone());
    let worker_opts = opts.clone();
    let files_vec: Vec<(usize, PathBuf)> = files.iter().cloned().enumerate().collect();

    let eval_thread = std::thread::spawn(move || {
        pool.install(|| {
            // Receiver 关闭后停止派发剩余输入
            let _ = files_vec.par_iter().try_for_each(|(idx, path)| {
                let res = eval_file(path, &shared, &worker_opts);
                tx.send((*idx, res)).map_err(|_| ())
            });
        });
        // 结束后 Sender 被丢弃，Receiver 收到关闭信号
    });

    // Writer：维护 next_idx 与缓存，按序输出
    let written = write_in_order(&rx, files, writer, stats);

    // 写出失败时先关闭通道并等待 worker 退出，再返回错误
    drop(rx);
    let joined = eval_thread.join();
    written?;
    if joined.is_err() {
        anyhow::bail!("evaluation worker panicked");
    }
    Ok(())
}

/// 按 idx 重排后写出；写出失败立即返回
fn write_in_order(
    rx: &crossbeam_channel::Receiver<(usize, Result<Option<InputEval>>)>,
    files: &[PathBuf],
    writer: &mut JsonArrayWriter<'_>,
    stats: &mut RunStats,
) -> Result<()> {
    let mut next_idx: usize = 0;
    let mut pending: BTreeMap<usize, Result<Option<InputEval>>> = BTreeMap::new();
    while let Ok((idx, res)) = rx.recv() {
        pending.insert(idx, res);
        while let Some(res) = pending.remove(&next_idx) {
            record(writer, stats, &files[next_idx], res)?;
            next_idx += 1;
        }
    }
    Ok(())
}

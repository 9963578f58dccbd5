use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use eodscan_core::{eval_and_write, load_artifact_file, EvalMode, EvalOptions};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::info;

/// 命令行入口（基于 clap）
#[derive(Parser, Debug)]
#[command(name = "eodscan", version, about = "数据结束（EOD）匹配收尾评估")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 以构件文件评估输入（单个文件或一层目录），结果写为 JSON 数组
    Eval {
        /// 构件文件（TOML）
        #[arg(long)]
        artifact: PathBuf,

        /// 输入文件或目录
        #[arg(long)]
        input: PathBuf,

        /// 输出文件（JSON 数组）
        #[arg(long, default_value = "./result.json")]
        output: PathBuf,

        /// 评估模式
        #[arg(long, value_enum, default_value_t = ModeArg::Block)]
        mode: ModeArg,

        /// 流模式下保留的历史字节数
        #[arg(long, default_value_t = 64)]
        history: usize,

        /// 每个输入收到这么多条报告后停止
        #[arg(long)]
        halt_after: Option<usize>,

        /// 线程数（"auto"=CPU 核心数）
        #[arg(long, default_value = "auto")]
        threads: String,

        /// 最大输入大小（单位字节）
        #[arg(long)]
        max_input_size: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Block,
    Streaming,
}

impl From<ModeArg> for EvalMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Block => EvalMode::Block,
            ModeArg::Streaming => EvalMode::Streaming,
        }
    }
}

fn main() -> Result<()> {
    // 日志等级由 RUST_LOG 控制，例如 info、debug、trace
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Eval { artifact, input, output, mode, history, halt_after, threads, max_input_size } => {
            info!(?artifact, ?input, ?output, ?mode, "starting eval");

            let loaded = load_artifact_file(&artifact)?;
            let mut out = BufWriter::new(File::create(&output).context("create output file")?);

            let opts = EvalOptions {
                mode: mode.into(),
                history_window: history,
                halt_after,
                threads: parse_threads(&threads),
                max_input_size,
            };
            let stats = eval_and_write(&input, &mut out, &loaded, &opts).context("eval and write failed")?;
            out.flush().context("flush output")?;

            info!(
                inputs_evaluated = stats.inputs_evaluated,
                inputs_halted = stats.inputs_halted,
                inputs_failed = stats.inputs_failed,
                reports_written = stats.reports_written,
                "eval finished"
            );
        }
    }

    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(env_filter).with_writer(std::io::stderr).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// 解析线程参数："auto" 或非法值表示自动
fn parse_threads(s: &str) -> Option<usize> {
    if s.eq_ignore_ascii_case("auto") { return None; }
    match s.parse::<usize>() {
        Ok(n) if n >= 1 => Some(n),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threads_arg() {
        assert_eq!(parse_threads("auto"), None);
        assert_eq!(parse_threads("AUTO"), None);
        assert_eq!(parse_threads("4"), Some(4));
        assert_eq!(parse_threads("0"), None);
    }

    #[test]
    fn cli_parses_eval() {
        let cli = Cli::try_parse_from([
            "eodscan", "eval", "--artifact", "a.toml", "--input", "in", "--mode", "streaming", "--history", "16",
        ])
        .unwrap();
        let Commands::Eval { mode, history, .. } = cli.command;
        assert!(matches!(mode, ModeArg::Streaming));
        assert_eq!(history, 16);
    }
}

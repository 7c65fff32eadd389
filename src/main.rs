//! # 分数階PINN・DeepONet プログラム
//!
//! `clap` クレートを利用して、コマンドラインから `train`（学習）、`infer`（推論）、
//! `operator`（作用素学習）、`check`（バックエンドの動作確認）を個別に実行できます。
//!
//! ## 使い方
//!
//! ### 学習
//! ```bash
//! cargo run --release -- train --config train.json
//! ```
//!
//! ### 推論
//! ```bash
//! cargo run --release -- infer --dir artifacts/fpde
//! ```
//!
//! ### バックエンドの確認
//! ```bash
//! DDEBACKEND=ndarray-f64 cargo run --release -- check
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use fpinn::backend::check_backends;
use fpinn::cli::{Cli, Commands};
use fpinn::config::{OperatorConfig, TrainConfig};
use fpinn::inference::InferTask;
use fpinn::logging::init_tracing;
use fpinn::operator::OperatorTask;
use fpinn::training::TrainTask;
use std::path::Path;
use tracing::info;

fn load_config<T: Default>(
    path: Option<&Path>,
    load: impl Fn(&Path) -> fpinn::Result<T>,
) -> Result<T> {
    match path {
        Some(path) => load(path).with_context(|| format!("設定ファイル {} を読み込めません", path.display())),
        None => Ok(T::default()),
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let backend = cli.backend.unwrap_or_default();

    match cli.command {
        Commands::Train { config } => {
            let config = load_config(config.as_deref(), TrainConfig::load)?;
            info!("学習を開始します - バックエンド: {}", backend);
            let report = backend.dispatch(TrainTask::new(config))?;
            info!("=> 学習時間: {:.2?}", report.duration);
            info!("=> 相対 L2 誤差: {:.6e}", report.final_error);
            info!("=> 結果を '{}' に保存しました。", report.output_dir.display());
        }
        Commands::Infer { dir, points } => {
            info!("推論を実行します - バックエンド: {}", backend);
            let report = backend.dispatch(InferTask::new(dir, points))?;
            info!("=> 推論時間: {:.2?}", report.duration);
        }
        Commands::Operator { config } => {
            let config = load_config(config.as_deref(), OperatorConfig::load)?;
            info!("作用素学習を開始します - バックエンド: {}", backend);
            let report = backend.dispatch(OperatorTask::new(config))?;
            info!("=> 学習時間: {:.2?}", report.duration);
            info!("=> 結果を '{}' に保存しました。", report.output_dir.display());
        }
        Commands::Check { strict } => {
            let passed = check_backends(cli.backend, strict)?;
            info!("=> {} 個のバックエンドが動作しました。", passed);
        }
    }
    Ok(())
}

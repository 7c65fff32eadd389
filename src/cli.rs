use crate::backend::{BACKEND_ENV, BackendKind};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// clapでコマンドラインの構造を定義します。
#[derive(Parser, Debug)]
#[command(author, version, about = "Fractional PINN and DeepONet solvers with Burn", long_about = None)]
pub struct Cli {
    /// 数値バックエンド（ndarray / ndarray-f64 / candle）
    #[arg(long, global = true, env = BACKEND_ENV, value_parser = parse_backend)]
    pub backend: Option<BackendKind>,

    #[command(subcommand)]
    pub command: Commands,
}

fn parse_backend(s: &str) -> Result<BackendKind, String> {
    s.parse().map_err(|e: crate::error::Error| e.to_string())
}

/// 実行するサブコマンドを定義します。
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 分数階PDEをPINNで学習し、結果をファイルに保存します
    Train {
        /// 設定ファイル（JSON）。省略時は既定値
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// 保存されたモデルを読み込み、厳密解と比較します
    Infer {
        /// `train` の出力ディレクトリ
        #[arg(short, long, default_value = "artifacts/fpde")]
        dir: PathBuf,
        /// 評価点の数
        #[arg(short, long, default_value_t = 200)]
        points: usize,
    },
    /// DeepONet で不定積分作用素を学習します
    Operator {
        /// 設定ファイル（JSON）。省略時は既定値
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// 各バックエンドでライブラリが動作するか確認します
    Check {
        /// このビルドで無効なバックエンドも失敗として扱う
        #[arg(long)]
        strict: bool,
    },
}

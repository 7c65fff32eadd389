//! ライブラリ全体で使うエラー型。

use crate::backend::BackendKind;
use std::path::PathBuf;
use thiserror::Error;

/// 離散化・データ生成・ネットワーク構築・学習で発生しうるエラー。
#[derive(Debug, Error)]
pub enum Error {
    /// `"static"` / `"dynamic"` 以外のメッシュ種別が指定された。
    #[error("Wrong meshtype {0}")]
    InvalidMeshType(String),

    /// 静的メッシュは1次元のみ対応。
    #[error("Do not support meshtype static for dimension {0}")]
    StaticMeshDimension(usize),

    #[error("Resolution {resolution:?} does not match dimension {dim}.")]
    ResolutionMismatch { resolution: Vec<usize>, dim: usize },

    /// 静的メッシュの格子点が2点未満、または動的メッシュの分割数が0。
    #[error("Invalid resolution {0:?}")]
    InvalidResolution(Vec<usize>),

    #[error("Only Interval supports static mesh.")]
    StaticMeshRequiresInterval,

    /// 静的メッシュの点数とバッチサイズが一致しない。
    #[error("Mesh resolution does not match batch size: expected {expected}, got {actual}")]
    BatchSizeMismatch { expected: usize, actual: usize },

    /// 静的メッシュに基準点を与えた、または動的メッシュに基準点を与えなかった。
    #[error("Wrong inputs: {0}")]
    WrongInputs(&'static str),

    #[error("Boundary points exist.")]
    BoundaryPoints,

    #[error("Get dynamic points first.")]
    MissingDynamicPoints,

    #[error("Unsupported dimension {0}")]
    UnsupportedDimension(usize),

    /// ブランチネットとトランクネットの出力幅が一致しない。
    #[error("Output sizes of branch net and trunk net do not match: {branch} vs {trunk}")]
    LayerMismatch { branch: usize, trunk: usize },

    #[error("Invalid network layers: {0}")]
    InvalidLayers(String),

    /// 作用素データセットの大きさが不正。
    #[error("Invalid dataset: {0}")]
    InvalidDataset(String),

    #[error("Unknown activation '{0}'")]
    UnknownActivation(String),

    #[error("Unknown kernel initializer '{0}'")]
    UnknownInitializer(String),

    /// `DDEBACKEND` に未知の値が設定された。
    #[error("Unknown backend '{0}' (expected one of: ndarray, ndarray-f64, candle)")]
    UnknownBackend(String),

    /// 対応する cargo feature を有効にせずにビルドされたバックエンド。
    #[error("Backend '{0}' is not compiled in")]
    BackendUnavailable(BackendKind),

    #[error("モデルファイル '{}' が見つかりません。最初に 'train' コマンドでモデルを学習・保存してください。", .0.display())]
    ModelNotFound(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Record error: {0}")]
    Record(#[from] burn::record::RecorderError),

    #[error("Plot error: {0}")]
    Plot(String),

    #[error("Smoke check failed: {0}")]
    SmokeCheck(String),
}

pub type Result<T> = std::result::Result<T, Error>;

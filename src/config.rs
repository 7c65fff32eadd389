//! 学習設定。JSON ファイルから読み込み、省略した項目は既定値を使います。

use crate::error::Result;
use crate::fractional::{ApproxOrder, MeshType};
use crate::model::{Activation, KernelInitializer, Regularizer};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 学習済みモデルを保存するファイル名（拡張子は recorder が付けます）
pub const MODEL_FILENAME: &str = "fpinn_model";
/// モデルと一緒に保存する設定ファイル名
pub const CONFIG_FILENAME: &str = "config.json";
/// 損失履歴のファイル名
pub const HISTORY_FILENAME: &str = "loss_history.json";
/// 損失グラフのファイル名
pub const PLOT_FILENAME: &str = "loss_graph.png";

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

/// `train` サブコマンドの設定（区間 [0, 1] 上の分数階方程式）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub alpha: f64,
    pub meshtype: MeshType,
    pub resolution: Vec<usize>,
    pub nanchor: usize,
    pub order: ApproxOrder,
    pub batch_size: usize,
    pub ntest: usize,
    pub layers: Vec<usize>,
    pub activation: Activation,
    pub initializer: KernelInitializer,
    pub regularization: Option<Regularizer>,
    pub learning_rate: f64,
    pub epochs: usize,
    pub log_every: usize,
    pub seed: Option<u64>,
    pub output_dir: PathBuf,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            alpha: 1.8,
            meshtype: MeshType::Static,
            resolution: vec![52],
            nanchor: 2,
            order: ApproxOrder::First,
            batch_size: 52,
            ntest: 52,
            layers: vec![1, 20, 20, 20, 20, 1],
            activation: Activation::Tanh,
            initializer: KernelInitializer::GlorotNormal,
            regularization: None,
            learning_rate: 1e-3,
            epochs: 8000,
            log_every: 200,
            seed: None,
            output_dir: PathBuf::from("artifacts/fpde"),
        }
    }
}

impl TrainConfig {
    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(self, path)
    }
}

/// `operator` サブコマンドで学習する DeepONet の種類。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatorVariant {
    /// 入力関数と座標を1対1に並べたデータで学習する DeepONet
    Aligned,
    /// 直積データで学習する DeepONet
    Cartesian,
    /// フーリエ基底のトランクを加えた直積 DeepONet
    Fourier,
}

/// `operator` サブコマンドの設定（不定積分作用素の学習）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    pub variant: OperatorVariant,
    pub num_train: usize,
    pub num_test: usize,
    pub sensors: usize,
    pub locations: usize,
    pub modes: usize,
    pub branch_hidden: Vec<usize>,
    pub trunk_hidden: Vec<usize>,
    pub width: usize,
    pub fourier_width: usize,
    pub activation: Activation,
    pub initializer: KernelInitializer,
    pub regularization: Option<Regularizer>,
    pub stacked: bool,
    pub learning_rate: f64,
    pub epochs: usize,
    pub log_every: usize,
    pub seed: Option<u64>,
    pub output_dir: PathBuf,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            variant: OperatorVariant::Cartesian,
            num_train: 150,
            num_test: 50,
            sensors: 40,
            locations: 32,
            modes: 5,
            branch_hidden: vec![40],
            trunk_hidden: vec![40],
            width: 40,
            fourier_width: 16,
            activation: Activation::Relu,
            initializer: KernelInitializer::GlorotNormal,
            regularization: None,
            stacked: false,
            learning_rate: 1e-3,
            epochs: 5000,
            log_every: 200,
            seed: None,
            output_dir: PathBuf::from("artifacts/operator"),
        }
    }
}

impl OperatorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(self, path)
    }

    pub fn branch_layers(&self) -> Vec<usize> {
        let mut layers = vec![self.sensors];
        layers.extend(&self.branch_hidden);
        layers.push(self.width);
        layers
    }

    pub fn trunk_layers(&self) -> Vec<usize> {
        let mut layers = vec![1];
        layers.extend(&self.trunk_hidden);
        layers.push(self.width);
        layers
    }

    pub fn fourier_branch_layers(&self) -> Vec<usize> {
        let mut layers = vec![self.sensors];
        layers.extend(&self.branch_hidden);
        layers.push(self.fourier_width);
        layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_uses_defaults() {
        let cfg: TrainConfig =
            serde_json::from_str(r#"{"alpha": 1.5, "meshtype": "dynamic", "resolution": [100]}"#)
                .unwrap();
        assert_eq!(cfg.alpha, 1.5);
        assert_eq!(cfg.meshtype, MeshType::Dynamic);
        assert_eq!(cfg.epochs, TrainConfig::default().epochs);
        assert_eq!(cfg.activation, Activation::Tanh);
    }

    #[test]
    fn unknown_activation_is_rejected() {
        let result = serde_json::from_str::<TrainConfig>(r#"{"activation": "softsign"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn config_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILENAME);
        let cfg = OperatorConfig {
            variant: OperatorVariant::Fourier,
            regularization: Some(Regularizer::L2(1e-5)),
            ..OperatorConfig::default()
        };
        cfg.save(&path).unwrap();
        assert_eq!(OperatorConfig::load(&path).unwrap(), cfg);
    }

    #[test]
    fn operator_layers_share_width() {
        let cfg = OperatorConfig::default();
        assert_eq!(cfg.branch_layers(), vec![40, 40, 40]);
        assert_eq!(cfg.trunk_layers(), vec![1, 40, 40]);
        assert_eq!(*cfg.fourier_branch_layers().last().unwrap(), 16);
    }
}

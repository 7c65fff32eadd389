use crate::backend::BackendTask;
use crate::config::{CONFIG_FILENAME, HISTORY_FILENAME, MODEL_FILENAME, PLOT_FILENAME, TrainConfig};
use crate::error::{Error, Result};
use crate::fpde::{FractionalPde, Fpde, FpdeBatch};
use crate::fractional::Discretization;
use crate::geometry::Interval;
use crate::history::LossHistory;
use crate::model::{Fnn, FnnConfig};
use crate::pinn::TwoSidedFractional1d;
use burn::module::{AutodiffModule, Module};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::Backend;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{ElementConversion, Tensor};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// `‖pred - exact‖₂ / ‖exact‖₂`。
pub fn l2_relative_error(exact: &[f64], pred: &[f64]) -> f64 {
    let diff: f64 = exact
        .iter()
        .zip(pred)
        .map(|(e, p)| (e - p).powi(2))
        .sum();
    let norm: f64 = exact.iter().map(|e| e * e).sum();
    if norm == 0.0 {
        diff.sqrt()
    } else {
        (diff / norm).sqrt()
    }
}

/// 損失成分の和。
pub(crate) fn total_loss<B: Backend>(losses: &[Tensor<B, 1>], device: &B::Device) -> Tensor<B, 1> {
    losses
        .iter()
        .fold(Tensor::zeros([1], device), |acc, l| acc + l.clone())
}

pub(crate) fn scalar<B: Backend>(t: Tensor<B, 1>) -> f64 {
    t.into_scalar().elem::<f64>()
}

/// 学習済みネットワークを点列上で評価し、ハード制約を適用した値を返します。
pub fn predict<B: Backend, P: FractionalPde>(
    problem: &P,
    model: &Fnn<B>,
    x: Tensor<B, 2>,
) -> Vec<f64> {
    problem
        .transform_output(x.clone(), model.forward(x))
        .into_data()
        .iter::<f64>()
        .collect()
}

/// 評価用バッチでの厳密解との相対 L2 誤差。
fn test_error<B: Backend, P: FractionalPde>(
    problem: &P,
    model: &Fnn<B>,
    batch: &FpdeBatch<Interval>,
    device: &B::Device,
) -> f64 {
    let pred = predict(problem, model, batch.x.to_tensor(device));
    l2_relative_error(&batch.y, &pred)
}

/// `train` サブコマンドの結果。
#[derive(Debug, Clone)]
pub struct TrainReport {
    pub history: LossHistory,
    pub final_error: f64,
    pub duration: Duration,
    pub output_dir: PathBuf,
}

/// 区間 [0, 1] 上の両側分数階方程式を PINN で学習するタスク。
pub struct TrainTask {
    pub config: TrainConfig,
}

impl TrainTask {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }
}

impl BackendTask for TrainTask {
    type Output = TrainReport;

    fn run<B: AutodiffBackend>(self, device: B::Device) -> Result<TrainReport> {
        let cfg = self.config;
        // 入力は座標 x、出力は解 u のどちらも1次元
        if cfg.layers.first() != Some(&1) || cfg.layers.last() != Some(&1) {
            return Err(Error::InvalidLayers(format!(
                "network must map 1 input to 1 output: {:?}",
                cfg.layers
            )));
        }

        // --- データセットの準備 ---
        let disc = Discretization::new(1, cfg.meshtype, cfg.resolution.clone(), cfg.nanchor)?;
        let mut data = Fpde::new(
            TwoSidedFractional1d::new(cfg.alpha),
            cfg.alpha,
            Interval::new(0.0, 1.0),
            disc,
            cfg.batch_size,
            cfg.ntest,
        )?
        .with_order(cfg.order);
        if let Some(seed) = cfg.seed {
            B::seed(seed);
            data = data.with_seed(seed);
        }

        let train = data.train_next_batch()?.clone();
        let int_mat = data.int_matrix(true)?.to_tensor::<B>(&device);
        let test = data.test()?.clone();
        let inputs = train.x.to_tensor::<B>(&device);
        let targets = train.targets::<B>(&device);
        debug!(
            "学習点: {} 点, 作用素行列: {:?}",
            train.x.len(),
            int_mat.dims()
        );

        // --- モデルとオプティマイザの初期化 ---
        let mut model = FnnConfig::new(cfg.layers.clone(), cfg.activation, cfg.initializer)
            .init::<B>(&device)?;
        let mut optim = AdamConfig::new().init();
        let log_every = cfg.log_every.max(1);

        let mut history = LossHistory::new(&["boundary", "pde"]);
        let training_start = Instant::now();
        info!(
            "分数階PINNを学習します: alpha = {}, メッシュ = {}, エポック数 = {}",
            cfg.alpha, cfg.meshtype, cfg.epochs
        );

        // --- 学習ループ ---
        for epoch in 1..=cfg.epochs {
            let outputs = data
                .problem()
                .transform_output(inputs.clone(), model.forward(inputs.clone()));
            let losses = data.losses(inputs.clone(), outputs, targets.clone(), int_mat.clone());
            let mut loss = total_loss(&losses, &device);
            if let Some(reg) = &cfg.regularization {
                loss = loss + model.regularization(reg);
            }

            if epoch % log_every == 0 || epoch == cfg.epochs {
                let components: Vec<f64> = losses.into_iter().map(scalar).collect();
                let error = test_error(data.problem(), &model.valid(), &test, &device);
                info!(
                    "[Epoch {}] 境界: {:.6e}, PDE: {:.6e}, テスト相対 L2 誤差: {:.6e}",
                    epoch, components[0], components[1], error
                );
                history.record(epoch, components, error);
            }

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(cfg.learning_rate, model, grads);
        }
        let duration = training_start.elapsed();
        let final_error = test_error(data.problem(), &model.valid(), &test, &device);
        info!("学習完了: {:.2?}, テスト相対 L2 誤差 {:.6e}", duration, final_error);

        // --- 結果の保存と描画 ---
        fs::create_dir_all(&cfg.output_dir)?;
        cfg.save(&cfg.output_dir.join(CONFIG_FILENAME))?;
        history.save(&cfg.output_dir.join(HISTORY_FILENAME))?;
        if !history.is_empty() {
            history.plot(&cfg.output_dir.join(PLOT_FILENAME))?;
        }
        model.save_file(
            cfg.output_dir.join(MODEL_FILENAME),
            &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
        )?;
        info!("モデルを {} に保存しました", cfg.output_dir.display());

        Ok(TrainReport {
            history,
            final_error,
            duration,
            output_dir: cfg.output_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendKind;
    use crate::fractional::MeshType;

    #[test]
    fn relative_error_of_exact_prediction_is_zero() {
        assert_eq!(l2_relative_error(&[1.0, 2.0], &[1.0, 2.0]), 0.0);
        assert!((l2_relative_error(&[3.0, 4.0], &[0.0, 0.0]) - 1.0).abs() < 1e-12);
        assert_eq!(l2_relative_error(&[0.0], &[0.5]), 0.5);
    }

    #[test]
    fn short_training_writes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrainConfig {
            alpha: 1.5,
            meshtype: MeshType::Static,
            resolution: vec![12],
            nanchor: 0,
            batch_size: 10,
            ntest: 10,
            layers: vec![1, 8, 1],
            epochs: 20,
            log_every: 10,
            seed: Some(0),
            output_dir: dir.path().to_path_buf(),
            ..TrainConfig::default()
        };
        let report = BackendKind::NdArrayF64
            .dispatch(TrainTask::new(config))
            .unwrap();
        assert_eq!(report.history.steps, vec![10, 20]);
        assert!(report.final_error.is_finite());
        assert!(dir.path().join(CONFIG_FILENAME).exists());
        assert!(dir.path().join(HISTORY_FILENAME).exists());
        assert!(dir.path().join(format!("{MODEL_FILENAME}.mpk")).exists());
    }

    #[test]
    fn dynamic_mesh_trains_with_anchors() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrainConfig {
            meshtype: MeshType::Dynamic,
            resolution: vec![20],
            nanchor: 2,
            batch_size: 12,
            ntest: 12,
            layers: vec![1, 6, 1],
            epochs: 3,
            log_every: 1,
            seed: Some(1),
            output_dir: dir.path().to_path_buf(),
            ..TrainConfig::default()
        };
        let report = BackendKind::NdArray
            .dispatch(TrainTask::new(config))
            .unwrap();
        assert_eq!(report.history.len(), 3);
        assert!(report.history.train.iter().flatten().all(|v| v.is_finite()));
    }

    #[test]
    fn network_shape_and_resolution_are_validated_before_training() {
        let dir = tempfile::tempdir().unwrap();
        let base = TrainConfig {
            epochs: 1,
            output_dir: dir.path().to_path_buf(),
            ..TrainConfig::default()
        };
        for layers in [vec![2, 8, 1], vec![1, 8, 3], vec![]] {
            let config = TrainConfig {
                layers,
                ..base.clone()
            };
            assert!(matches!(
                BackendKind::NdArray.dispatch(TrainTask::new(config)),
                Err(Error::InvalidLayers(_))
            ));
        }
        let config = TrainConfig {
            meshtype: MeshType::Static,
            resolution: vec![1],
            batch_size: 0,
            ..base
        };
        assert!(matches!(
            BackendKind::NdArray.dispatch(TrainTask::new(config)),
            Err(Error::InvalidResolution(_))
        ));
        assert!(!dir.path().join(CONFIG_FILENAME).exists());
    }
}

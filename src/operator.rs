//! DeepONet による不定積分作用素の学習。

use crate::backend::BackendTask;
use crate::config::{
    CONFIG_FILENAME, HISTORY_FILENAME, MODEL_FILENAME, OperatorConfig, OperatorVariant,
    PLOT_FILENAME,
};
use crate::deeponet::{
    DeepOnet, DeepOnetCartesianProd, DeepOnetCartesianProdConfig, DeepOnetConfig,
    FourierDeepOnetCartesianProd, FourierDeepOnetConfig,
};
use crate::error::Result;
use crate::history::LossHistory;
use crate::training::{TrainReport, l2_relative_error, scalar};
use crate::triple::{TripleCartesianProd, antiderivative_dataset};
use burn::module::{AutodiffModule, Module};
use burn::nn::loss::{MseLoss, Reduction};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::Backend;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::Tensor;
use burn::tensor::backend::AutodiffBackend;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::fs;
use std::time::Instant;
use tracing::info;

/// 学習ループから見た作用素ネットワーク。
pub trait OperatorNet<B: Backend> {
    fn predict(&self, x_func: Tensor<B, 2>, x_loc: Tensor<B, 2>) -> Tensor<B, 2>;

    fn penalty(&self) -> Option<Tensor<B, 1>>;
}

impl<B: Backend> OperatorNet<B> for DeepOnet<B> {
    fn predict(&self, x_func: Tensor<B, 2>, x_loc: Tensor<B, 2>) -> Tensor<B, 2> {
        self.forward(x_func, x_loc)
    }

    fn penalty(&self) -> Option<Tensor<B, 1>> {
        self.regularization_loss()
    }
}

impl<B: Backend> OperatorNet<B> for DeepOnetCartesianProd<B> {
    fn predict(&self, x_func: Tensor<B, 2>, x_loc: Tensor<B, 2>) -> Tensor<B, 2> {
        self.forward(x_func, x_loc)
    }

    fn penalty(&self) -> Option<Tensor<B, 1>> {
        self.regularization_loss()
    }
}

impl<B: Backend> OperatorNet<B> for FourierDeepOnetCartesianProd<B> {
    fn predict(&self, x_func: Tensor<B, 2>, x_loc: Tensor<B, 2>) -> Tensor<B, 2> {
        self.forward(x_func, x_loc)
    }

    fn penalty(&self) -> Option<Tensor<B, 1>> {
        self.regularization_loss()
    }
}

type Tensors<B> = (Tensor<B, 2>, Tensor<B, 2>, Tensor<B, 2>);

/// 直積データを、1対1に並べるかどうかに応じてテンソルにします。
fn to_tensors<B: Backend>(data: &TripleCartesianProd, aligned: bool, device: &B::Device) -> Tensors<B> {
    if aligned {
        data.to_triple().tensors(device)
    } else {
        data.tensors(device)
    }
}

fn evaluate<B: Backend, M: OperatorNet<B>>(model: &M, (x_func, x_loc, y): Tensors<B>) -> f64 {
    let pred: Vec<f64> = model.predict(x_func, x_loc).into_data().iter::<f64>().collect();
    let exact: Vec<f64> = y.into_data().iter::<f64>().collect();
    l2_relative_error(&exact, &pred)
}

/// `operator` サブコマンドのタスク。
pub struct OperatorTask {
    pub config: OperatorConfig,
}

impl OperatorTask {
    pub fn new(config: OperatorConfig) -> Self {
        Self { config }
    }

    fn fit<B, M>(
        &self,
        mut model: M,
        train: &TripleCartesianProd,
        test: &TripleCartesianProd,
        device: &B::Device,
    ) -> Result<TrainReport>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B> + OperatorNet<B>,
        M::InnerModule: OperatorNet<B::InnerBackend>,
    {
        let cfg = &self.config;
        let aligned = cfg.variant == OperatorVariant::Aligned;
        let (x_func, x_loc, y) = to_tensors::<B>(train, aligned, device);
        let mut optim = AdamConfig::new().init();
        let log_every = cfg.log_every.max(1);
        let mut history = LossHistory::new(&["mse"]);
        let training_start = Instant::now();

        for epoch in 1..=cfg.epochs {
            let pred = model.predict(x_func.clone(), x_loc.clone());
            let mse = MseLoss::new().forward(pred, y.clone(), Reduction::Mean);
            let loss = match model.penalty() {
                Some(p) => mse.clone() + p,
                None => mse.clone(),
            };

            if epoch % log_every == 0 || epoch == cfg.epochs {
                let mse = scalar(mse);
                let test_data = to_tensors(test, aligned, device);
                let error = evaluate::<B::InnerBackend, _>(&model.valid(), test_data);
                info!(
                    "[Epoch {}] 学習 MSE: {:.6e}, テスト相対 L2 誤差: {:.6e}",
                    epoch, mse, error
                );
                history.record(epoch, vec![mse], error);
            }

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(cfg.learning_rate, model, grads);
        }
        let duration = training_start.elapsed();
        let test_data = to_tensors(test, aligned, device);
        let final_error = evaluate::<B::InnerBackend, _>(&model.valid(), test_data);
        info!("学習完了: {:.2?}, テスト相対 L2 誤差 {:.6e}", duration, final_error);

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
            output_dir: cfg.output_dir.clone(),
        })
    }
}

impl BackendTask for OperatorTask {
    type Output = TrainReport;

    fn run<B: AutodiffBackend>(self, device: B::Device) -> Result<TrainReport> {
        let cfg = &self.config;
        let mut rng = match cfg.seed {
            Some(seed) => {
                B::seed(seed);
                StdRng::seed_from_u64(seed)
            }
            None => StdRng::from_os_rng(),
        };
        let dataset = |n: usize, rng: &mut StdRng| {
            antiderivative_dataset(n, cfg.sensors, cfg.locations, cfg.modes, rng)
        };
        let train = dataset(cfg.num_train, &mut rng)?;
        let test = dataset(cfg.num_test, &mut rng)?;
        info!(
            "{:?} DeepONet を学習します: 関数 {} 個 × 座標 {} 点",
            cfg.variant, cfg.num_train, cfg.locations
        );

        let mut cart = DeepOnetCartesianProdConfig::new(
            cfg.branch_layers(),
            cfg.trunk_layers(),
            cfg.activation,
            cfg.initializer,
        );
        if let Some(reg) = cfg.regularization {
            cart = cart.with_regularization(reg);
        }

        match cfg.variant {
            OperatorVariant::Aligned => {
                let mut net = DeepOnetConfig::new(
                    cfg.branch_layers(),
                    cfg.trunk_layers(),
                    cfg.activation,
                    cfg.initializer,
                )
                .with_stacked(cfg.stacked);
                if let Some(reg) = cfg.regularization {
                    net = net.with_regularization(reg);
                }
                let model = net.init::<B>(&device)?;
                self.fit::<B, _>(model, &train, &test, &device)
            }
            OperatorVariant::Cartesian => {
                let model = cart.init::<B>(&device)?;
                self.fit::<B, _>(model, &train, &test, &device)
            }
            OperatorVariant::Fourier => {
                let model = FourierDeepOnetConfig::new(
                    cart,
                    cfg.fourier_branch_layers(),
                    vec![cfg.locations],
                )
                .init::<B>(&device)?;
                self.fit::<B, _>(model, &train, &test, &device)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendKind;

    fn small(variant: OperatorVariant, dir: &std::path::Path) -> OperatorConfig {
        OperatorConfig {
            variant,
            num_train: 6,
            num_test: 3,
            sensors: 8,
            locations: 8,
            modes: 2,
            branch_hidden: vec![10],
            trunk_hidden: vec![10],
            width: 6,
            fourier_width: 4,
            epochs: 4,
            log_every: 2,
            seed: Some(5),
            output_dir: dir.to_path_buf(),
            ..OperatorConfig::default()
        }
    }

    #[test]
    fn every_variant_trains_and_saves() {
        for variant in [
            OperatorVariant::Aligned,
            OperatorVariant::Cartesian,
            OperatorVariant::Fourier,
        ] {
            let dir = tempfile::tempdir().unwrap();
            let report = BackendKind::NdArray
                .dispatch(OperatorTask::new(small(variant, dir.path())))
                .unwrap();
            assert_eq!(report.history.steps, vec![2, 4]);
            assert!(report.final_error.is_finite(), "{variant:?}");
            assert!(dir.path().join(format!("{MODEL_FILENAME}.mpk")).exists());
        }
    }

    #[test]
    fn stacked_branch_with_regularization_trains() {
        let dir = tempfile::tempdir().unwrap();
        let config = OperatorConfig {
            stacked: true,
            regularization: Some(crate::model::Regularizer::L2(1e-4)),
            ..small(OperatorVariant::Aligned, dir.path())
        };
        let report = BackendKind::NdArrayF64
            .dispatch(OperatorTask::new(config))
            .unwrap();
        assert!(report.history.train.iter().flatten().all(|v| v.is_finite()));
    }

    #[test]
    fn odd_fourier_width_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = OperatorConfig {
            fourier_width: 5,
            ..small(OperatorVariant::Fourier, dir.path())
        };
        assert!(BackendKind::NdArray.dispatch(OperatorTask::new(config)).is_err());
    }

    #[test]
    fn empty_sensor_grid_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = OperatorConfig {
            sensors: 0,
            ..small(OperatorVariant::Cartesian, dir.path())
        };
        assert!(matches!(
            BackendKind::NdArray.dispatch(OperatorTask::new(config)),
            Err(crate::Error::InvalidDataset(_))
        ));
        assert!(!dir.path().join(format!("{MODEL_FILENAME}.mpk")).exists());
    }
}

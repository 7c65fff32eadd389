use crate::backend::BackendTask;
use crate::config::{CONFIG_FILENAME, MODEL_FILENAME, TrainConfig};
use crate::error::{Error, Result};
use crate::fpde::FractionalPde;
use crate::geometry::{Geometry, Interval};
use crate::model::FnnConfig;
use crate::pinn::TwoSidedFractional1d;
use crate::training::{l2_relative_error, predict};
use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::AutodiffBackend;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::info;

/// `infer` サブコマンドの結果。
#[derive(Debug, Clone)]
pub struct InferReport {
    pub points: usize,
    pub l2_relative_error: f64,
    pub max_abs_error: f64,
    pub duration: Duration,
}

/// 保存済みモデルを読み込み、等間隔格子上で厳密解と比較するタスク。
pub struct InferTask {
    pub dir: PathBuf,
    pub points: usize,
}

impl InferTask {
    pub fn new(dir: PathBuf, points: usize) -> Self {
        Self { dir, points }
    }
}

impl BackendTask for InferTask {
    type Output = InferReport;

    fn run<B: AutodiffBackend>(self, device: B::Device) -> Result<InferReport> {
        let model_path = self.dir.join(format!("{MODEL_FILENAME}.mpk"));
        if !model_path.exists() {
            return Err(Error::ModelNotFound(model_path));
        }
        let cfg = TrainConfig::load(&self.dir.join(CONFIG_FILENAME))?;

        let inference_start = Instant::now();
        info!("モデルを {} から読み込みます", model_path.display());
        let model = FnnConfig::new(cfg.layers.clone(), cfg.activation, cfg.initializer)
            .init::<B::InnerBackend>(&device)?
            .load_file(
                self.dir.join(MODEL_FILENAME),
                &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
                &device,
            )?;

        let problem = TwoSidedFractional1d::new(cfg.alpha);
        let x = Interval::new(0.0, 1.0).uniform_points(self.points.max(2), true);
        let exact: Vec<f64> = x.rows().map(|p| problem.solution(p)).collect();
        let pred = predict(&problem, &model, x.to_tensor::<B::InnerBackend>(&device));
        let duration = inference_start.elapsed();

        let max_abs_error = exact
            .iter()
            .zip(&pred)
            .map(|(e, p)| (e - p).abs())
            .fold(0.0, f64::max);
        let report = InferReport {
            points: x.len(),
            l2_relative_error: l2_relative_error(&exact, &pred),
            max_abs_error,
            duration,
        };
        info!(
            "{} 点で推論: 相対 L2 誤差 {:.6e}, 最大絶対誤差 {:.6e} ({:.2?})",
            report.points, report.l2_relative_error, report.max_abs_error, report.duration
        );
        Ok(report)
    }
}

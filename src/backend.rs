//! # 数値バックエンドの選択
//!
//! 環境変数 `DDEBACKEND` で burn のバックエンドを切り替えます。
//!
//! | 値            | バックエンド                  |
//! |---------------|-------------------------------|
//! | `ndarray`     | NdArray (f32, 既定)           |
//! | `ndarray-f64` | NdArray (f64)                 |
//! | `candle`      | Candle (feature `candle`)     |
//!
//! 学習・推論の処理は [`BackendTask`] として書き、[`BackendKind::dispatch`] で
//! 選択されたバックエンドの型に単相化して実行します。

use crate::deeponet::{DeepOnetCartesianProdConfig, DeepOnetConfig};
use crate::error::{Error, Result};
use crate::fractional::{Discretization, Fractional, MeshType};
use crate::geometry::Interval;
use crate::model::{Activation, FnnConfig, KernelInitializer};
use burn::backend::{Autodiff, NdArray};
use burn::optim::GradientsParams;
use burn::prelude::Backend;
use burn::tensor::Tensor;
use burn::tensor::backend::AutodiffBackend;
use std::env::{self, VarError};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, error, info, warn};

#[cfg(feature = "candle")]
use burn::backend::Candle;

/// バックエンドを選ぶ環境変数名。
pub const BACKEND_ENV: &str = "DDEBACKEND";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendKind {
    #[default]
    NdArray,
    NdArrayF64,
    Candle,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [Self::NdArray, Self::NdArrayF64, Self::Candle];

    /// `DDEBACKEND` から選択します。未設定なら既定値。
    pub fn from_env() -> Result<Self> {
        match env::var(BACKEND_ENV) {
            Ok(value) => value.parse(),
            Err(VarError::NotPresent) => Ok(Self::default()),
            Err(VarError::NotUnicode(raw)) => Err(Error::UnknownBackend(
                raw.to_string_lossy().into_owned(),
            )),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::NdArray => "ndarray",
            Self::NdArrayF64 => "ndarray-f64",
            Self::Candle => "candle",
        }
    }

    /// このビルドで利用可能か。
    pub fn is_enabled(&self) -> bool {
        match self {
            Self::Candle => cfg!(feature = "candle"),
            _ => true,
        }
    }

    /// 自動微分つきのバックエンドで `task` を実行します。
    pub fn dispatch<T: BackendTask>(self, task: T) -> Result<T::Output> {
        debug!("バックエンド {} で実行します", self);
        match self {
            Self::NdArray => task.run::<Autodiff<NdArray<f32>>>(Default::default()),
            Self::NdArrayF64 => task.run::<Autodiff<NdArray<f64>>>(Default::default()),
            #[cfg(feature = "candle")]
            Self::Candle => task.run::<Autodiff<Candle>>(Default::default()),
            #[cfg(not(feature = "candle"))]
            Self::Candle => Err(Error::BackendUnavailable(self)),
        }
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ndarray" => Ok(Self::NdArray),
            "ndarray-f64" => Ok(Self::NdArrayF64),
            "candle" => Ok(Self::Candle),
            _ => Err(Error::UnknownBackend(s.to_string())),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// バックエンドの型に依存する処理。
pub trait BackendTask {
    type Output;

    fn run<B: AutodiffBackend>(self, device: B::Device) -> Result<Self::Output>;
}

/// 各ネットワークと離散化行列を小さな入力で1回ずつ動かす読み込み確認。
pub struct SmokeCheck;

fn all_finite<B: Backend, const D: usize>(t: Tensor<B, D>) -> bool {
    t.into_data().iter::<f64>().all(f64::is_finite)
}

impl BackendTask for SmokeCheck {
    type Output = ();

    fn run<B: AutodiffBackend>(self, device: B::Device) -> Result<()> {
        let fnn = FnnConfig::new(vec![1, 8, 1], Activation::Tanh, KernelInitializer::GlorotNormal)
            .init::<B>(&device)?;
        let x = Tensor::<B, 2>::ones([4, 1], &device).mul_scalar(0.5);
        let u = fnn.forward(x);
        let grads = u.clone().sum().backward();
        let mut ok = u.dims() == [4, 1] && all_finite(u);
        ok &= GradientsParams::from_grads(grads, &fnn).len() > 0;

        let onet = DeepOnetConfig::new(
            vec![5, 8, 4],
            vec![1, 8, 4],
            Activation::Relu,
            KernelInitializer::HeNormal,
        )
        .init::<B>(&device)?;
        let y = onet.forward(Tensor::ones([3, 5], &device), Tensor::ones([3, 1], &device));
        ok &= y.dims() == [3, 1] && all_finite(y);

        let cart = DeepOnetCartesianProdConfig::new(
            vec![5, 8, 4],
            vec![1, 8, 4],
            Activation::Tanh,
            KernelInitializer::GlorotUniform,
        )
        .init::<B>(&device)?;
        let y = cart.forward(Tensor::ones([2, 5], &device), Tensor::ones([6, 1], &device));
        ok &= y.dims() == [2, 6] && all_finite(y);

        let disc = Discretization::new(1, MeshType::Static, vec![6], 0)?;
        let mut frac = Fractional::new(1.5, Interval::new(0.0, 1.0), disc, None)?;
        let x = frac.get_x()?.to_tensor::<B>(&device);
        let lhs = frac.get_matrix(false)?.to_tensor::<B>(&device).matmul(x);
        ok &= lhs.dims() == [6, 1] && all_finite(lhs);

        if ok {
            Ok(())
        } else {
            Err(Error::SmokeCheck("unexpected shape or non-finite value".to_string()))
        }
    }
}

/// 指定したバックエンドでライブラリが動作するか確認します。
pub fn smoke_check(kind: BackendKind) -> Result<()> {
    kind.dispatch(SmokeCheck)?;
    info!("バックエンド {}: OK", kind);
    Ok(())
}

/// `check` サブコマンドの本体。確認に成功したバックエンドの数を返します。
///
/// `requested` が `None` なら全バックエンドを確認し、このビルドに含まれないものは
/// 読み飛ばします。`strict` のとき、または明示的に指定されたときは読み飛ばさずに失敗とします。
pub fn check_backends(requested: Option<BackendKind>, strict: bool) -> Result<usize> {
    let kinds = match requested {
        Some(kind) => vec![kind],
        None => BackendKind::ALL.to_vec(),
    };
    let mut passed = 0;
    let mut failures = 0;
    for kind in kinds {
        if !kind.is_enabled() && requested.is_none() && !strict {
            warn!("バックエンド {}: このビルドには含まれていないため省略します", kind);
            continue;
        }
        match smoke_check(kind) {
            Ok(()) => passed += 1,
            Err(e) => {
                error!("バックエンド {}: {}", kind, e);
                failures += 1;
            }
        }
    }
    if failures > 0 {
        return Err(Error::SmokeCheck(format!("{failures} backend check(s) failed")));
    }
    Ok(passed)
}

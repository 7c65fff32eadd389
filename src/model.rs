//! # 全結合ネットワーク
//!
//! PINN 本体および DeepONet のブランチ・トランクに使う多層パーセプトロンと、
//! 活性化関数・重み初期化・正則化の指定を扱います。

use crate::error::{Error, Result};
use burn::module::{Ignored, Module};
use burn::nn::{Initializer, Linear, LinearConfig};
use burn::prelude::Backend;
use burn::tensor::Tensor;
use burn::tensor::activation;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 活性化関数。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Activation {
    Tanh,
    Relu,
    Sigmoid,
    Sin,
    Silu,
    Gelu,
    /// 線形層の後に絶対値をとる。
    Abs,
    Linear,
}

impl Activation {
    pub fn apply<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Self::Tanh => activation::tanh(x),
            Self::Relu => activation::relu(x),
            Self::Sigmoid => activation::sigmoid(x),
            Self::Sin => x.sin(),
            Self::Silu => activation::silu(x),
            Self::Gelu => activation::gelu(x),
            Self::Abs => x.abs(),
            Self::Linear => x,
        }
    }
}

impl FromStr for Activation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tanh" => Ok(Self::Tanh),
            "relu" => Ok(Self::Relu),
            "sigmoid" => Ok(Self::Sigmoid),
            "sin" => Ok(Self::Sin),
            "silu" | "swish" => Ok(Self::Silu),
            "gelu" => Ok(Self::Gelu),
            "abs" => Ok(Self::Abs),
            "linear" | "identity" => Ok(Self::Linear),
            _ => Err(Error::UnknownActivation(s.to_string())),
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Tanh => "tanh",
            Self::Relu => "relu",
            Self::Sigmoid => "sigmoid",
            Self::Sin => "sin",
            Self::Silu => "silu",
            Self::Gelu => "gelu",
            Self::Abs => "abs",
            Self::Linear => "linear",
        };
        f.write_str(name)
    }
}

impl TryFrom<String> for Activation {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Activation> for String {
    fn from(value: Activation) -> Self {
        value.to_string()
    }
}

/// 重みの初期化方法（"Glorot normal" などの名前で指定）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum KernelInitializer {
    GlorotNormal,
    GlorotUniform,
    HeNormal,
    HeUniform,
    LecunNormal,
    LecunUniform,
    Zeros,
}

impl KernelInitializer {
    pub fn to_burn(self) -> Initializer {
        let sqrt2 = std::f64::consts::SQRT_2;
        match self {
            Self::GlorotNormal => Initializer::XavierNormal { gain: 1.0 },
            Self::GlorotUniform => Initializer::XavierUniform { gain: 1.0 },
            Self::HeNormal => Initializer::KaimingNormal {
                gain: sqrt2,
                fan_out_only: false,
            },
            Self::HeUniform => Initializer::KaimingUniform {
                gain: sqrt2,
                fan_out_only: false,
            },
            Self::LecunNormal => Initializer::KaimingNormal {
                gain: 1.0,
                fan_out_only: false,
            },
            Self::LecunUniform => Initializer::KaimingUniform {
                gain: 1.0,
                fan_out_only: false,
            },
            Self::Zeros => Initializer::Zeros,
        }
    }
}

impl FromStr for KernelInitializer {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "glorot normal" => Ok(Self::GlorotNormal),
            "glorot uniform" => Ok(Self::GlorotUniform),
            "he normal" => Ok(Self::HeNormal),
            "he uniform" => Ok(Self::HeUniform),
            "lecun normal" => Ok(Self::LecunNormal),
            "lecun uniform" => Ok(Self::LecunUniform),
            "zeros" => Ok(Self::Zeros),
            _ => Err(Error::UnknownInitializer(s.to_string())),
        }
    }
}

impl fmt::Display for KernelInitializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::GlorotNormal => "Glorot normal",
            Self::GlorotUniform => "Glorot uniform",
            Self::HeNormal => "He normal",
            Self::HeUniform => "He uniform",
            Self::LecunNormal => "LeCun normal",
            Self::LecunUniform => "LeCun uniform",
            Self::Zeros => "zeros",
        };
        f.write_str(name)
    }
}

impl TryFrom<String> for KernelInitializer {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<KernelInitializer> for String {
    fn from(value: KernelInitializer) -> Self {
        value.to_string()
    }
}

/// 重みに対する正則化項。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regularizer {
    L1(f64),
    L2(f64),
    L1L2(f64, f64),
}

impl Regularizer {
    /// 重み行列1つ分の罰則項。
    pub fn penalty<B: Backend, const D: usize>(&self, weight: Tensor<B, D>) -> Tensor<B, 1> {
        match *self {
            Self::L1(l1) => weight.abs().sum().mul_scalar(l1),
            Self::L2(l2) => weight.powf_scalar(2.0).sum().mul_scalar(l2),
            Self::L1L2(l1, l2) => {
                weight.clone().abs().sum().mul_scalar(l1) + weight.powf_scalar(2.0).sum().mul_scalar(l2)
            }
        }
    }
}

/// 全結合ネットワークの構成。
#[derive(Debug, Clone)]
pub struct FnnConfig {
    pub layer_sizes: Vec<usize>,
    pub activation: Activation,
    pub initializer: KernelInitializer,
    pub use_bias: bool,
    /// 出力層にも活性化関数を適用するか。
    pub activate_output: bool,
}

impl FnnConfig {
    pub fn new(layer_sizes: Vec<usize>, activation: Activation, initializer: KernelInitializer) -> Self {
        Self {
            layer_sizes,
            activation,
            initializer,
            use_bias: true,
            activate_output: false,
        }
    }

    pub fn with_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }

    pub fn with_activate_output(mut self, activate_output: bool) -> Self {
        self.activate_output = activate_output;
        self
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Fnn<B>> {
        if self.layer_sizes.len() < 2 || self.layer_sizes.contains(&0) {
            return Err(Error::InvalidLayers(format!("{:?}", self.layer_sizes)));
        }
        let linears = self
            .layer_sizes
            .windows(2)
            .map(|w| {
                LinearConfig::new(w[0], w[1])
                    .with_bias(self.use_bias)
                    .with_initializer(self.initializer.to_burn())
                    .init(device)
            })
            .collect();
        Ok(Fnn {
            linears,
            activation: Ignored(self.activation),
            activate_output: Ignored(self.activate_output),
        })
    }
}

/// 多層パーセプトロン。
///
/// 入力 `[batch, layer_sizes[0]]` を `[batch, layer_sizes.last()]` に写します。
#[derive(Module, Debug)]
pub struct Fnn<B: Backend> {
    linears: Vec<Linear<B>>,
    activation: Ignored<Activation>,
    activate_output: Ignored<bool>,
}

impl<B: Backend> Fnn<B> {
    /// 順伝播を実行します。
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let last = self.linears.len() - 1;
        let mut x = input;
        for (i, linear) in self.linears.iter().enumerate() {
            x = linear.forward(x);
            if i < last || *self.activate_output {
                x = self.activation.apply(x);
            }
        }
        x
    }

    pub fn num_layers(&self) -> usize {
        self.linears.len()
    }

    pub fn output_size(&self) -> usize {
        self.linears
            .last()
            .map(|l| l.weight.dims()[1])
            .unwrap_or_default()
    }

    /// 層ごとに学習対象から外します。`trainable[i] == false` の層は勾配を持ちません。
    pub fn freeze_layers(self, trainable: &[bool]) -> Self {
        let linears = self
            .linears
            .into_iter()
            .zip(trainable.iter().chain(std::iter::repeat(&true)))
            .map(|(linear, &t)| if t { linear } else { linear.no_grad() })
            .collect();
        Self { linears, ..self }
    }

    /// 全重み行列に対する正則化項の和。
    pub fn regularization(&self, reg: &Regularizer) -> Tensor<B, 1> {
        let device = self
            .linears
            .first()
            .map(|l| l.weight.device())
            .unwrap_or_default();
        self.linears
            .iter()
            .map(|l| reg.penalty(l.weight.val()))
            .fold(Tensor::zeros([1], &device), |acc, p| acc + p)
    }
}

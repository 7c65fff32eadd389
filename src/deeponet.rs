//! # DeepONet
//!
//! 関数を入力とする作用素を学習するネットワーク群です。ブランチネットが
//! 入力関数のセンサー値を、トランクネットが出力関数の座標を埋め込み、
//! 両者の内積で出力を得ます。
//!
//! - [`DeepOnet`]: 入力関数と座標が1対1に並んだデータ用
//! - [`DeepOnetCartesianProd`]: 入力関数 × 座標の直積データ用
//! - [`FourierDeepOnetCartesianProd`]: 逆FFTによるフーリエ基底のトランクを追加したもの

use crate::error::{Error, Result};
use crate::model::{Activation, Fnn, FnnConfig, KernelInitializer, Regularizer};
use burn::module::{Ignored, Module, Param};
use burn::prelude::Backend;
use burn::tensor::{Tensor, TensorData};
use std::f64::consts::PI;

/// トランクネットの学習可否。全層一括か層ごとに指定します。
#[derive(Debug, Clone, PartialEq)]
pub enum Trainable {
    All(bool),
    PerLayer(Vec<bool>),
}

impl Default for Trainable {
    fn default() -> Self {
        Self::All(true)
    }
}

/// スタック型ブランチの隠れ層。重みは `[stack, in, units]`。
#[derive(Module, Debug)]
pub struct StackedDense<B: Backend> {
    weight: Param<Tensor<B, 3>>,
    bias: Option<Param<Tensor<B, 2>>>,
}

impl<B: Backend> StackedDense<B> {
    fn new(
        stack: usize,
        input: usize,
        units: usize,
        use_bias: bool,
        initializer: KernelInitializer,
        device: &B::Device,
    ) -> Self {
        let weight = initializer
            .to_burn()
            .init_with([stack, input, units], Some(input), Some(units), device);
        let bias = use_bias.then(|| Param::from_tensor(Tensor::zeros([stack, units], device)));
        Self { weight, bias }
    }

    /// 入力 `[batch, in]` または `[batch, stack, in]` を `[batch, stack, units]` に写します。
    fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let [stack, _, _] = self.weight.dims();
        let [batch, s, i] = input.dims();
        // [batch, s, in] -> [stack, batch, in]
        let x = if s == stack {
            input.swap_dims(0, 1)
        } else {
            input.reshape([1, batch, i]).expand([stack, batch, i])
        };
        let y = x.matmul(self.weight.val()).swap_dims(0, 1);
        match &self.bias {
            Some(b) => y + b.val().unsqueeze_dim::<3>(0),
            None => y,
        }
    }
}

/// スタック型ブランチの出力層。重みは `[stack, in]` で、各スタックから1つの値を出します。
#[derive(Module, Debug)]
pub struct StackedOutput<B: Backend> {
    weight: Param<Tensor<B, 2>>,
    bias: Option<Param<Tensor<B, 1>>>,
}

impl<B: Backend> StackedOutput<B> {
    fn new(
        stack: usize,
        input: usize,
        use_bias: bool,
        initializer: KernelInitializer,
        device: &B::Device,
    ) -> Self {
        let weight = initializer
            .to_burn()
            .init_with([stack, input], Some(input), Some(1), device);
        let bias = use_bias.then(|| Param::from_tensor(Tensor::zeros([stack], device)));
        Self { weight, bias }
    }

    fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 2> {
        let y = (input * self.weight.val().unsqueeze_dim::<3>(0))
            .sum_dim(2)
            .squeeze::<2>(2);
        match &self.bias {
            Some(b) => y + b.val().unsqueeze_dim::<2>(0),
            None => y,
        }
    }
}

/// スタックごとに独立した小さなネットワークを並べたブランチ。
#[derive(Module, Debug)]
pub struct StackedBranch<B: Backend> {
    hidden: Vec<StackedDense<B>>,
    output: StackedOutput<B>,
    activation: Ignored<Activation>,
}

impl<B: Backend> StackedBranch<B> {
    fn new(
        layer_sizes: &[usize],
        activation: Activation,
        initializer: KernelInitializer,
        use_bias: bool,
        device: &B::Device,
    ) -> Result<Self> {
        if layer_sizes.len() < 3 {
            return Err(Error::InvalidLayers(format!(
                "stacked branch needs at least one hidden layer: {layer_sizes:?}"
            )));
        }
        let stack = layer_sizes[layer_sizes.len() - 1];
        let hidden_sizes = &layer_sizes[1..layer_sizes.len() - 1];
        let mut input = layer_sizes[0];
        let mut hidden = Vec::with_capacity(hidden_sizes.len());
        for &units in hidden_sizes {
            hidden.push(StackedDense::new(stack, input, units, true, initializer, device));
            input = units;
        }
        let output = StackedOutput::new(stack, input, use_bias, initializer, device);
        Ok(Self {
            hidden,
            output,
            activation: Ignored(activation),
        })
    }

    fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let [batch, m] = input.dims();
        let mut x = input.reshape([batch, 1, m]);
        for layer in &self.hidden {
            x = self.activation.apply(layer.forward(x));
        }
        self.output.forward(x)
    }

    fn output_size(&self) -> usize {
        self.output.weight.dims()[0]
    }
}

/// DeepONet の構成。
#[derive(Debug, Clone)]
pub struct DeepOnetConfig {
    pub layer_sizes_branch: Vec<usize>,
    pub layer_sizes_trunk: Vec<usize>,
    pub activation_branch: Activation,
    pub activation_trunk: Activation,
    pub initializer: KernelInitializer,
    pub regularization: Option<Regularizer>,
    pub use_bias: bool,
    pub stacked: bool,
    pub trainable_branch: bool,
    pub trainable_trunk: Trainable,
}

impl DeepOnetConfig {
    pub fn new(
        layer_sizes_branch: Vec<usize>,
        layer_sizes_trunk: Vec<usize>,
        activation: Activation,
        initializer: KernelInitializer,
    ) -> Self {
        Self {
            layer_sizes_branch,
            layer_sizes_trunk,
            activation_branch: activation,
            activation_trunk: activation,
            initializer,
            regularization: None,
            use_bias: true,
            stacked: false,
            trainable_branch: true,
            trainable_trunk: Trainable::default(),
        }
    }

    /// ブランチとトランクで別々の活性化関数を使います。
    pub fn with_activations(mut self, branch: Activation, trunk: Activation) -> Self {
        self.activation_branch = branch;
        self.activation_trunk = trunk;
        self
    }

    pub fn with_regularization(mut self, reg: Regularizer) -> Self {
        self.regularization = Some(reg);
        self
    }

    pub fn with_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }

    pub fn with_stacked(mut self, stacked: bool) -> Self {
        self.stacked = stacked;
        self
    }

    pub fn with_trainable(mut self, branch: bool, trunk: Trainable) -> Self {
        self.trainable_branch = branch;
        self.trainable_trunk = trunk;
        self
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<DeepOnet<B>> {
        let trunk_layers = self.layer_sizes_trunk.len().saturating_sub(1);
        if let Trainable::PerLayer(flags) = &self.trainable_trunk {
            if flags.len() != trunk_layers {
                return Err(Error::InvalidLayers(
                    "trainable_trunk does not match layer_sizes_trunk".to_string(),
                ));
            }
        }
        let branch_width = self.layer_sizes_branch.last().copied().unwrap_or_default();
        let trunk_width = self.layer_sizes_trunk.last().copied().unwrap_or_default();
        if branch_width != trunk_width {
            return Err(Error::LayerMismatch {
                branch: branch_width,
                trunk: trunk_width,
            });
        }

        let (branch, stacked_branch) = if self.stacked {
            let net = StackedBranch::new(
                &self.layer_sizes_branch,
                self.activation_branch,
                self.initializer,
                self.use_bias,
                device,
            )?;
            (None, Some(net))
        } else {
            let net = FnnConfig::new(
                self.layer_sizes_branch.clone(),
                self.activation_branch,
                self.initializer,
            )
            .with_bias(self.use_bias)
            .init(device)?;
            (Some(net), None)
        };
        let (branch, stacked_branch) = if self.trainable_branch {
            (branch, stacked_branch)
        } else {
            (
                branch.map(|net| net.no_grad()),
                stacked_branch.map(|net| net.no_grad()),
            )
        };

        // abs 活性化のトランクはバイアスなしの線形層を使う
        let trunk_bias = self.use_bias && self.activation_trunk != Activation::Abs;
        let trunk = FnnConfig::new(
            self.layer_sizes_trunk.clone(),
            self.activation_trunk,
            self.initializer,
        )
        .with_bias(trunk_bias)
        .init(device)?;
        let trunk = match &self.trainable_trunk {
            Trainable::All(true) => trunk,
            Trainable::All(false) => trunk.no_grad(),
            Trainable::PerLayer(flags) => trunk.freeze_layers(flags),
        };

        let bias = self
            .use_bias
            .then(|| Param::from_tensor(Tensor::zeros([1], device)));

        Ok(DeepOnet {
            branch,
            stacked_branch,
            trunk,
            bias,
            regularization: Ignored(self.regularization),
        })
    }
}

/// 入力関数と座標が1対1に対応するデータ用の DeepONet。
#[derive(Module, Debug)]
pub struct DeepOnet<B: Backend> {
    branch: Option<Fnn<B>>,
    stacked_branch: Option<StackedBranch<B>>,
    trunk: Fnn<B>,
    bias: Option<Param<Tensor<B, 1>>>,
    regularization: Ignored<Option<Regularizer>>,
}

impl<B: Backend> DeepOnet<B> {
    fn encode_function(&self, x_func: Tensor<B, 2>) -> Tensor<B, 2> {
        match (&self.branch, &self.stacked_branch) {
            (Some(net), _) => net.forward(x_func),
            (None, Some(net)) => net.forward(x_func),
            (None, None) => x_func,
        }
    }

    /// `x_func: [batch, m]`, `x_loc: [batch, d]` から `[batch, 1]` を返します。
    pub fn forward(&self, x_func: Tensor<B, 2>, x_loc: Tensor<B, 2>) -> Tensor<B, 2> {
        let y_func = self.encode_function(x_func);
        let y_loc = self.trunk.forward(x_loc);
        let y = (y_func * y_loc).sum_dim(1);
        match &self.bias {
            Some(b) => y + b.val().unsqueeze_dim::<2>(0),
            None => y,
        }
    }

    /// 1つの入力関数 `x_func: [1, m]` を全座標 `x_loc: [n, d]` に複製して評価します。
    pub fn forward_with_default(&self, x_func: Tensor<B, 2>, x_loc: Tensor<B, 2>) -> Tensor<B, 2> {
        let [n, _] = x_loc.dims();
        let [_, m] = x_func.dims();
        self.forward(x_func.expand([n, m]), x_loc)
    }

    pub fn branch_output_size(&self) -> usize {
        match (&self.branch, &self.stacked_branch) {
            (Some(net), _) => net.output_size(),
            (None, Some(net)) => net.output_size(),
            (None, None) => 0,
        }
    }

    /// 構成で正則化が指定されていればブランチとトランクの罰則項を返します。
    pub fn regularization_loss(&self) -> Option<Tensor<B, 1>> {
        let reg = (*self.regularization)?;
        let trunk = self.trunk.regularization(&reg);
        Some(match &self.branch {
            Some(net) => net.regularization(&reg) + trunk,
            None => trunk,
        })
    }
}

/// 直積形式のデータ用 DeepONet の構成。
#[derive(Debug, Clone)]
pub struct DeepOnetCartesianProdConfig {
    pub layer_sizes_branch: Vec<usize>,
    pub layer_sizes_trunk: Vec<usize>,
    pub activation_branch: Activation,
    pub activation_trunk: Activation,
    pub initializer: KernelInitializer,
    pub regularization: Option<Regularizer>,
}

impl DeepOnetCartesianProdConfig {
    pub fn new(
        layer_sizes_branch: Vec<usize>,
        layer_sizes_trunk: Vec<usize>,
        activation: Activation,
        initializer: KernelInitializer,
    ) -> Self {
        Self {
            layer_sizes_branch,
            layer_sizes_trunk,
            activation_branch: activation,
            activation_trunk: activation,
            initializer,
            regularization: None,
        }
    }

    pub fn with_activations(mut self, branch: Activation, trunk: Activation) -> Self {
        self.activation_branch = branch;
        self.activation_trunk = trunk;
        self
    }

    pub fn with_regularization(mut self, reg: Regularizer) -> Self {
        self.regularization = Some(reg);
        self
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<DeepOnetCartesianProd<B>> {
        let branch_width = self.layer_sizes_branch.last().copied().unwrap_or_default();
        let trunk_width = self.layer_sizes_trunk.last().copied().unwrap_or_default();
        if branch_width != trunk_width {
            return Err(Error::LayerMismatch {
                branch: branch_width,
                trunk: trunk_width,
            });
        }
        let branch = FnnConfig::new(
            self.layer_sizes_branch.clone(),
            self.activation_branch,
            self.initializer,
        )
        .init(device)?;
        // トランクは出力層まで活性化する
        let trunk = FnnConfig::new(
            self.layer_sizes_trunk.clone(),
            self.activation_trunk,
            self.initializer,
        )
        .with_activate_output(true)
        .init(device)?;
        Ok(DeepOnetCartesianProd {
            branch,
            trunk,
            bias: Param::from_tensor(Tensor::zeros([1], device)),
            regularization: Ignored(self.regularization),
        })
    }
}

/// 入力関数 `[nf, m]` と座標 `[np, d]` の直積に対して `[nf, np]` を出力する DeepONet。
#[derive(Module, Debug)]
pub struct DeepOnetCartesianProd<B: Backend> {
    branch: Fnn<B>,
    trunk: Fnn<B>,
    bias: Param<Tensor<B, 1>>,
    regularization: Ignored<Option<Regularizer>>,
}

impl<B: Backend> DeepOnetCartesianProd<B> {
    pub fn forward(&self, x_func: Tensor<B, 2>, x_loc: Tensor<B, 2>) -> Tensor<B, 2> {
        let y_func = self.branch.forward(x_func);
        let y_loc = self.trunk.forward(x_loc);
        y_func.matmul(y_loc.transpose()) + self.bias.val().unsqueeze_dim::<2>(0)
    }

    pub fn regularization_loss(&self) -> Option<Tensor<B, 1>> {
        let reg = (*self.regularization)?;
        Some(self.branch.regularization(&reg) + self.trunk.regularization(&reg))
    }
}

/// 実数値の逆FFTを行列として表したもの。
///
/// 入力は `[re_0.., im_0..]`（各 `modes` 個）、出力は長さ `h * w` の行優先の場。
/// 1次元では `h = 1` として扱います。
#[derive(Debug, Clone, PartialEq)]
pub struct InverseRfftBasis {
    pub modes: usize,
    pub len: usize,
    pub data: Vec<f64>,
}

impl InverseRfftBasis {
    /// 1次元の逆実FFT（長さ `n`）。`modes` 個の複素係数のうち先頭 `n/2 + 1` 個を使います。
    pub fn one_dim(modes: usize, n: usize) -> Self {
        Self::build(modes, 1, modes, 1, n)
    }

    /// 2次元の逆実FFT（形状 `[h, w]`）。係数は `[modes1, w/2 + 1]` の行優先。
    pub fn two_dim(modes: usize, h: usize, w: usize) -> Result<Self> {
        let modes2 = w / 2 + 1;
        if modes % modes2 != 0 {
            return Err(Error::InvalidLayers(
                "Fourier branch-trunk nets do not match.".to_string(),
            ));
        }
        Ok(Self::build(modes, modes / modes2, modes2, h, w))
    }

    fn build(modes: usize, modes1: usize, modes2: usize, h: usize, w: usize) -> Self {
        let len = h * w;
        let mut data = vec![0.0; 2 * modes * len];
        let norm = 1.0 / len as f64;
        let usable2 = modes2.min(w / 2 + 1);
        for k1 in 0..modes1.min(h) {
            for k2 in 0..usable2 {
                let weight = if k2 == 0 || (w % 2 == 0 && k2 == w / 2) {
                    1.0
                } else {
                    2.0
                };
                let row = k1 * modes2 + k2;
                for p in 0..h {
                    for q in 0..w {
                        let theta = 2.0 * PI
                            * (k1 as f64 * p as f64 / h as f64 + k2 as f64 * q as f64 / w as f64);
                        let col = p * w + q;
                        data[row * len + col] = weight * norm * theta.cos();
                        data[(modes + row) * len + col] = -weight * norm * theta.sin();
                    }
                }
            }
        }
        Self { modes, len, data }
    }

    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        Tensor::from_data(
            TensorData::new(self.data.clone(), [2 * self.modes, self.len]),
            device,
        )
    }
}

/// フーリエ DeepONet の構成。
#[derive(Debug, Clone)]
pub struct FourierDeepOnetConfig {
    pub base: DeepOnetCartesianProdConfig,
    pub layer_sizes_fourier_branch: Vec<usize>,
    pub output_shape: Vec<usize>,
}

impl FourierDeepOnetConfig {
    pub fn new(
        base: DeepOnetCartesianProdConfig,
        layer_sizes_fourier_branch: Vec<usize>,
        output_shape: Vec<usize>,
    ) -> Self {
        Self {
            base,
            layer_sizes_fourier_branch,
            output_shape,
        }
    }

    /// フーリエ係数の逆変換行列を組み立てます。
    pub fn basis(&self) -> Result<InverseRfftBasis> {
        let width = self
            .layer_sizes_fourier_branch
            .last()
            .copied()
            .unwrap_or_default();
        if width == 0 || width % 2 != 0 {
            return Err(Error::InvalidLayers(format!(
                "Fourier branch output must hold real and imaginary halves: {width}"
            )));
        }
        let modes = width / 2;
        let trunk_dim = self.base.layer_sizes_trunk.first().copied().unwrap_or_default();
        match (trunk_dim, self.output_shape.as_slice()) {
            (1, [n]) => Ok(InverseRfftBasis::one_dim(modes, *n)),
            (2, [h, w]) => InverseRfftBasis::two_dim(modes, *h, *w),
            (d, _) => Err(Error::UnsupportedDimension(d)),
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<FourierDeepOnetCartesianProd<B>> {
        let basis = self.basis()?;
        let base = self.base.init(device)?;
        let fourier_branch = FnnConfig::new(
            self.layer_sizes_fourier_branch.clone(),
            self.base.activation_branch,
            self.base.initializer,
        )
        .init(device)?;
        Ok(FourierDeepOnetCartesianProd {
            base,
            fourier_branch,
            basis: Ignored(basis),
        })
    }
}

/// 通常のブランチ・トランク対に、フーリエ基底をトランクとする対を加えた DeepONet。
///
/// 出力形状の全点を座標として与える必要があります（`np = prod(output_shape)`）。
#[derive(Module, Debug)]
pub struct FourierDeepOnetCartesianProd<B: Backend> {
    base: DeepOnetCartesianProd<B>,
    fourier_branch: Fnn<B>,
    basis: Ignored<InverseRfftBasis>,
}

impl<B: Backend> FourierDeepOnetCartesianProd<B> {
    pub fn forward(&self, x_func: Tensor<B, 2>, x_loc: Tensor<B, 2>) -> Tensor<B, 2> {
        let device = x_func.device();
        let y = self.base.forward(x_func.clone(), x_loc);
        let coeffs = self.fourier_branch.forward(x_func);
        y + coeffs.matmul(self.basis.to_tensor(&device))
    }

    pub fn regularization_loss(&self) -> Option<Tensor<B, 1>> {
        let base = self.base.regularization_loss()?;
        let reg = (*self.base.regularization)?;
        Some(base + self.fourier_branch.regularization(&reg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::optim::GradientsParams;

    type TestBackend = NdArray<f64>;

    fn values(t: Tensor<TestBackend, 2>) -> Vec<f64> {
        t.into_data().iter::<f64>().collect()
    }

    #[test]
    fn deeponet_output_is_one_value_per_pair() {
        let device = Default::default();
        let net = DeepOnetConfig::new(
            vec![10, 32, 16],
            vec![1, 32, 16],
            Activation::Relu,
            KernelInitializer::GlorotNormal,
        )
        .init::<TestBackend>(&device)
        .unwrap();
        let out = net.forward(
            Tensor::ones([7, 10], &device),
            Tensor::ones([7, 1], &device),
        );
        assert_eq!(out.dims(), [7, 1]);
        assert_eq!(net.branch_output_size(), 16);
    }

    #[test]
    fn mismatched_widths_are_rejected() {
        let device = Default::default();
        let result = DeepOnetConfig::new(
            vec![10, 32, 16],
            vec![1, 32, 8],
            Activation::Tanh,
            KernelInitializer::GlorotNormal,
        )
        .init::<TestBackend>(&device);
        assert!(matches!(
            result,
            Err(Error::LayerMismatch {
                branch: 16,
                trunk: 8
            })
        ));
    }

    #[test]
    fn per_layer_trainable_flags_must_match_trunk() {
        let device = Default::default();
        let result = DeepOnetConfig::new(
            vec![4, 8],
            vec![1, 8, 8],
            Activation::Tanh,
            KernelInitializer::GlorotNormal,
        )
        .with_trainable(true, Trainable::PerLayer(vec![false]))
        .init::<TestBackend>(&device);
        assert!(matches!(result, Err(Error::InvalidLayers(_))));
    }

    #[test]
    fn stacked_branch_produces_stack_width() {
        let device = Default::default();
        let net = DeepOnetConfig::new(
            vec![6, 5, 12],
            vec![2, 20, 12],
            Activation::Tanh,
            KernelInitializer::GlorotNormal,
        )
        .with_stacked(true)
        .init::<TestBackend>(&device)
        .unwrap();
        assert_eq!(net.branch_output_size(), 12);
        let out = net.forward(
            Tensor::ones([3, 6], &device),
            Tensor::ones([3, 2], &device),
        );
        assert_eq!(out.dims(), [3, 1]);
    }

    #[test]
    fn default_function_is_tiled_over_locations() {
        let device = Default::default();
        let net = DeepOnetConfig::new(
            vec![3, 8],
            vec![1, 8, 8],
            Activation::Abs,
            KernelInitializer::HeNormal,
        )
        .init::<TestBackend>(&device)
        .unwrap();
        let x_func = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![0.1, 0.2, 0.3], [1, 3]),
            &device,
        );
        let x_loc = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![0.0, 0.5, 1.0, 0.5], [4, 1]),
            &device,
        );
        let out = values(net.forward_with_default(x_func, x_loc));
        assert_eq!(out.len(), 4);
        // 同じ座標には同じ値
        assert!((out[1] - out[3]).abs() < 1e-12);
    }

    #[test]
    fn cartesian_product_output_shape() {
        let device = Default::default();
        let net = DeepOnetCartesianProdConfig::new(
            vec![10, 20, 8],
            vec![1, 20, 8],
            Activation::Tanh,
            KernelInitializer::GlorotNormal,
        )
        .with_regularization(Regularizer::L2(1e-4))
        .init::<TestBackend>(&device)
        .unwrap();
        let out = net.forward(Tensor::ones([5, 10], &device), Tensor::ones([9, 1], &device));
        assert_eq!(out.dims(), [5, 9]);
        assert!(net.regularization_loss().is_some());
    }

    #[test]
    fn inverse_rfft_of_single_cosine_mode() {
        // 係数 X_1 = n/2 の逆変換は cos(2πq/n)
        let n = 8;
        let basis = InverseRfftBasis::one_dim(3, n);
        let device = Default::default();
        let mut coeffs = vec![0.0; 6];
        coeffs[1] = n as f64 / 2.0;
        let c = Tensor::<TestBackend, 2>::from_data(TensorData::new(coeffs, [1, 6]), &device);
        let y = values(c.matmul(basis.to_tensor(&device)));
        for (q, v) in y.iter().enumerate() {
            let expected = (2.0 * PI * q as f64 / n as f64).cos();
            assert!((v - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn inverse_rfft_ignores_imaginary_dc() {
        let basis = InverseRfftBasis::one_dim(2, 4);
        let device = Default::default();
        // re = [4, 0], im = [5, 0] → 定数 1
        let c = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![4.0, 0.0, 5.0, 0.0], [1, 4]),
            &device,
        );
        let y = values(c.matmul(basis.to_tensor(&device)));
        assert!(y.iter().all(|v| (v - 1.0).abs() < 1e-12));
    }

    #[test]
    fn two_dim_basis_requires_divisible_modes() {
        // w = 6 なら最後の軸の係数は 4 個
        assert!(InverseRfftBasis::two_dim(10, 4, 6).is_err());
        let ok = InverseRfftBasis::two_dim(12, 4, 6).unwrap();
        assert_eq!(ok.len, 24);
        assert_eq!(ok.data.len(), 2 * 12 * 24);
    }

    #[test]
    fn inverse_rfft_two_dim_modes_decode_to_plane_waves() {
        // h = 4, w = 6 では最後の軸の係数が 4 個、行番号は k1 * 4 + k2
        let (h, w) = (4, 6);
        let basis = InverseRfftBasis::two_dim(12, h, w).unwrap();
        let device = Default::default();
        let mut coeffs = vec![0.0; 2 * 24];
        // 1行目: Re X[1, 0] = hw → cos(2πp/h)
        coeffs[4] = 24.0;
        // 2行目: Im X[0, 1] = -hw/2 → sin(2πq/w)
        coeffs[24 + 12 + 1] = -12.0;
        let c = Tensor::<TestBackend, 2>::from_data(TensorData::new(coeffs, [2, 24]), &device);
        let y = values(c.matmul(basis.to_tensor(&device)));
        for p in 0..h {
            for q in 0..w {
                let col = p * w + q;
                let cos = (2.0 * PI * p as f64 / h as f64).cos();
                let sin = (2.0 * PI * q as f64 / w as f64).sin();
                assert!((y[col] - cos).abs() < 1e-12, "cos at ({p}, {q})");
                assert!((y[24 + col] - sin).abs() < 1e-12, "sin at ({p}, {q})");
            }
        }
    }

    #[test]
    fn fourier_deeponet_decodes_two_dim_field() {
        let device = Default::default();
        let base = DeepOnetCartesianProdConfig::new(
            vec![10, 16, 8],
            vec![2, 16, 8],
            Activation::Tanh,
            KernelInitializer::GlorotNormal,
        );
        let cfg = FourierDeepOnetConfig::new(base, vec![10, 16, 24], vec![4, 6]);
        let net = cfg.init::<TestBackend>(&device).unwrap();

        let grid: Vec<f64> = (0..4)
            .flat_map(|p| (0..6).flat_map(move |q| [p as f64 / 4.0, q as f64 / 6.0]))
            .collect();
        let x_loc = Tensor::<TestBackend, 2>::from_data(TensorData::new(grid, [24, 2]), &device);
        let x_func = Tensor::<TestBackend, 2>::from_data(
            TensorData::new((0..30).map(|i| (i as f64 * 0.1).sin()).collect::<Vec<_>>(), [3, 10]),
            &device,
        );

        let out = net.forward(x_func.clone(), x_loc.clone());
        assert_eq!(out.dims(), [3, 24]);
        let decoded = net
            .fourier_branch
            .forward(x_func.clone())
            .matmul(cfg.basis().unwrap().to_tensor(&device));
        let residual = values(out - net.base.forward(x_func, x_loc) - decoded);
        assert!(residual.iter().all(|v| v.abs() < 1e-10));
    }

    #[test]
    fn frozen_branch_and_trunk_receive_no_gradient() {
        type Ad = Autodiff<TestBackend>;
        let device = Default::default();
        let loss_of = |net: &DeepOnet<Ad>| {
            net.forward(Tensor::ones([4, 5], &device), Tensor::ones([4, 1], &device))
                .sum()
        };

        for stacked in [false, true] {
            let net = DeepOnetConfig::new(
                vec![5, 6, 8],
                vec![1, 8, 8],
                Activation::Tanh,
                KernelInitializer::GlorotNormal,
            )
            .with_stacked(stacked)
            .with_trainable(false, Trainable::All(false))
            .init::<Ad>(&device)
            .unwrap();
            let mut grads = loss_of(&net).backward();
            let branch = match (&net.branch, &net.stacked_branch) {
                (Some(b), _) => GradientsParams::from_module(&mut grads, b).len(),
                (None, Some(b)) => GradientsParams::from_module(&mut grads, b).len(),
                (None, None) => unreachable!(),
            };
            assert_eq!(branch, 0, "stacked = {stacked}");
            assert_eq!(GradientsParams::from_module(&mut grads, &net.trunk).len(), 0);
            // 学習されるのは出力のバイアスだけ
            assert_eq!(GradientsParams::from_grads(grads, &net).len(), 1);
        }

        // 比較: 最初の層だけ凍結したトランクは残りの層に勾配が流れる
        let net = DeepOnetConfig::new(
            vec![5, 6, 8],
            vec![1, 8, 8],
            Activation::Tanh,
            KernelInitializer::GlorotNormal,
        )
        .with_trainable(true, Trainable::PerLayer(vec![false, true]))
        .init::<Ad>(&device)
        .unwrap();
        let mut grads = loss_of(&net).backward();
        assert_eq!(GradientsParams::from_module(&mut grads, &net.trunk).len(), 2);
        let branch = net.branch.as_ref().map(|b| GradientsParams::from_module(&mut grads, b).len());
        assert_eq!(branch, Some(4));
    }

    #[test]
    fn fourier_deeponet_adds_decoded_field() {
        let device = Default::default();
        let base = DeepOnetCartesianProdConfig::new(
            vec![10, 16, 8],
            vec![1, 16, 8],
            Activation::Tanh,
            KernelInitializer::GlorotNormal,
        );
        let cfg = FourierDeepOnetConfig::new(base, vec![10, 16, 12], vec![20]);
        let net = cfg.init::<TestBackend>(&device).unwrap();
        let out = net.forward(Tensor::ones([3, 10], &device), Tensor::ones([20, 1], &device));
        assert_eq!(out.dims(), [3, 20]);

        let odd = FourierDeepOnetConfig::new(
            DeepOnetCartesianProdConfig::new(
                vec![10, 8],
                vec![1, 8],
                Activation::Tanh,
                KernelInitializer::GlorotNormal,
            ),
            vec![10, 7],
            vec![20],
        );
        assert!(odd.basis().is_err());
    }
}

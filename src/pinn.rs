use crate::fpde::FractionalPde;
use crate::math::gamma;
use burn::prelude::Backend;
use burn::tensor::Tensor;

/// 区間 `[0, 1]` 上の両側 Riemann–Liouville 分数階方程式。
///
/// `(D_{0+}^α + D_{1-}^α) u = f`、厳密解は `u(x) = x³(1 - x)³` です。
/// 右辺 `f` は厳密解の各単項式に分数階微分を適用して求めます。
#[derive(Debug, Clone, Copy)]
pub struct TwoSidedFractional1d {
    pub alpha: f64,
}

impl TwoSidedFractional1d {
    pub fn new(alpha: f64) -> Self {
        Self { alpha }
    }

    /// `Γ(n+1) / Γ(n+1-α) (x^{n-α} + (1-x)^{n-α})` の係数と指数を組み合わせた右辺。
    fn rhs<B: Backend>(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let a = self.alpha;
        let one_minus_x = x.clone().neg().add_scalar(1.0);
        let term = |n: f64, c: f64| {
            let coef = c * gamma(n + 1.0) / gamma(n + 1.0 - a);
            (x.clone().powf_scalar(n - a) + one_minus_x.clone().powf_scalar(n - a)).mul_scalar(coef)
        };
        term(3.0, 1.0) + term(4.0, -3.0) + term(5.0, 3.0) + term(6.0, -1.0)
    }
}

impl FractionalPde for TwoSidedFractional1d {
    fn residual<B: Backend>(
        &self,
        x: Tensor<B, 2>,
        y: Tensor<B, 2>,
        int_mat: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        let rows = int_mat.dims()[0];
        let lhs = int_mat.matmul(y);
        let rhs = self.rhs(x.slice([0..rows, 0..1]));
        lhs - rhs
    }

    fn solution(&self, x: &[f64]) -> f64 {
        x[0].powi(3) * (1.0 - x[0]).powi(3)
    }

    /// `x(1 - x) y` で両端のゼロ境界条件を満たします。
    fn transform_output<B: Backend>(&self, x: Tensor<B, 2>, y: Tensor<B, 2>) -> Tensor<B, 2> {
        let one_minus_x = x.clone().neg().add_scalar(1.0);
        x * one_minus_x * y
    }
}

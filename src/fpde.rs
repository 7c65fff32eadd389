//! # 分数階PDEの学習データ
//!
//! 評価点・境界のアンカー点・離散化行列をまとめ、アンカー点での境界損失と
//! 内部点での残差損失を組み立てます。点列の先頭 `nbc` 行がアンカー点です。

use crate::error::{Error, Result};
use crate::fractional::{ApproxOrder, Discretization, FracMatrix, Fractional, MeshType};
use crate::geometry::{Geometry, Points};
use burn::nn::loss::{MseLoss, Reduction};
use burn::prelude::Backend;
use burn::tensor::{Tensor, TensorData};
use rand::SeedableRng;
use rand::rngs::StdRng;

/// 分数階PDEの問題定義。
pub trait FractionalPde {
    /// 方程式の残差。`int_mat` は離散化行列、`x` と `y` は内部点（と補助点）の値です。
    fn residual<B: Backend>(
        &self,
        x: Tensor<B, 2>,
        y: Tensor<B, 2>,
        int_mat: Tensor<B, 2>,
    ) -> Tensor<B, 2>;

    /// 厳密解（境界値と誤差評価に使用）。
    fn solution(&self, x: &[f64]) -> f64;

    /// ネットワーク出力に課す境界条件のハード制約。
    fn transform_output<B: Backend>(&self, _x: Tensor<B, 2>, y: Tensor<B, 2>) -> Tensor<B, 2> {
        y
    }
}

/// 一度生成した点列・目標値・離散化作用素の組。
#[derive(Debug, Clone)]
pub struct FpdeBatch<G: Geometry> {
    pub x: Points,
    pub y: Vec<f64>,
    pub operator: Fractional<G>,
}

impl<G: Geometry> FpdeBatch<G> {
    /// 目標値を `[n, 1]` のテンソルとして返します。
    pub fn targets<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        Tensor::from_data(TensorData::new(self.y.clone(), [self.y.len(), 1]), device)
    }
}

/// 分数階PDEソルバーのデータ。
pub struct Fpde<P, G: Geometry> {
    problem: P,
    alpha: f64,
    geom: G,
    disc: Discretization,
    order: ApproxOrder,
    batch_size: usize,
    ntest: usize,
    rng: StdRng,
    train: Option<FpdeBatch<G>>,
    test: Option<FpdeBatch<G>>,
}

impl<P: FractionalPde, G: Geometry + Clone> Fpde<P, G> {
    pub fn new(
        problem: P,
        alpha: f64,
        geom: G,
        disc: Discretization,
        batch_size: usize,
        ntest: usize,
    ) -> Result<Self> {
        if disc.meshtype == MeshType::Static && !geom.is_interval() {
            return Err(Error::StaticMeshRequiresInterval);
        }
        Ok(Self {
            problem,
            alpha,
            geom,
            disc,
            order: ApproxOrder::default(),
            batch_size,
            ntest,
            rng: StdRng::from_os_rng(),
            train: None,
            test: None,
        })
    }

    /// アンカー点の乱数シードを固定します。
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_order(mut self, order: ApproxOrder) -> Self {
        self.order = order;
        self
    }

    pub fn problem(&self) -> &P {
        &self.problem
    }

    /// 境界損失に使うアンカー点の数。
    pub fn nbc(&self) -> usize {
        self.disc.nanchor
    }

    fn get_x(&mut self, size: usize) -> Result<FpdeBatch<G>> {
        let (x, operator) = match self.disc.meshtype {
            MeshType::Static => {
                let expected = (self.disc.resolution[0] + self.disc.nanchor)
                    .checked_sub(2)
                    .ok_or(Error::InvalidResolution(self.disc.resolution.clone()))?;
                if size != expected {
                    return Err(Error::BatchSizeMismatch {
                        expected,
                        actual: size,
                    });
                }
                let mut op = Fractional::new(self.alpha, self.geom.clone(), self.disc.clone(), None)?
                    .with_order(self.order);
                let x = op.get_x()?;
                (x.roll_left(1), op)
            }
            MeshType::Dynamic => {
                // アンカー点のほかに評価点が1点以上必要
                let n = size
                    .checked_sub(self.disc.nanchor)
                    .filter(|n| *n > 0)
                    .ok_or(Error::BatchSizeMismatch {
                        expected: self.disc.nanchor + 1,
                        actual: size,
                    })?;
                let x0 = self.geom.uniform_points(n, false);
                let mut op =
                    Fractional::new(self.alpha, self.geom.clone(), self.disc.clone(), Some(x0))?
                        .with_order(self.order);
                let x = op.get_x()?;
                (x, op)
            }
        };

        let x = if self.disc.nanchor > 0 {
            let mut anchored = self
                .geom
                .random_boundary_points(self.disc.nanchor, &mut self.rng);
            anchored.append(&x);
            anchored
        } else {
            x
        };
        let y = x.rows().map(|p| self.problem.solution(p)).collect();
        Ok(FpdeBatch { x, y, operator })
    }

    /// 学習用バッチ。初回のみ生成し、以降は同じものを返します。
    pub fn train_next_batch(&mut self) -> Result<&FpdeBatch<G>> {
        let batch = match self.train.take() {
            Some(batch) => batch,
            None => self.get_x(self.batch_size)?,
        };
        Ok(self.train.insert(batch))
    }

    /// 評価用バッチ。初回のみ生成します。
    pub fn test(&mut self) -> Result<&FpdeBatch<G>> {
        let batch = match self.test.take() {
            Some(batch) => batch,
            None => self.get_x(self.ntest)?,
        };
        Ok(self.test.insert(batch))
    }

    /// 残差計算に使う離散化行列。
    ///
    /// 静的メッシュでは点列の並べ替えに合わせて列を1つ左に回し、
    /// 境界に対応する最初と最後の行を除きます。
    pub fn int_matrix(&mut self, training: bool) -> Result<FracMatrix> {
        let batch = if training {
            self.train_next_batch()?
        } else {
            self.test()?
        };
        let int_mat = batch.operator.get_matrix(true)?;
        match (self.disc.meshtype, int_mat) {
            (MeshType::Static, FracMatrix::Dense(m)) => {
                let rolled = m.roll_columns_left(1);
                Ok(FracMatrix::Dense(rolled.slice_rows(1, m.rows.saturating_sub(1))))
            }
            (_, m) => Ok(m),
        }
    }

    /// `[アンカー点の境界損失, 内部点の残差損失]` を返します。
    pub fn losses<B: Backend>(
        &self,
        inputs: Tensor<B, 2>,
        outputs: Tensor<B, 2>,
        targets: Tensor<B, 2>,
        int_mat: Tensor<B, 2>,
    ) -> Vec<Tensor<B, 1>> {
        let nbc = self.nbc();
        let [n, d] = inputs.dims();
        let device = outputs.device();

        let loss_bc = if nbc == 0 {
            Tensor::<B, 1>::zeros([1], &device)
        } else {
            MseLoss::new().forward(
                outputs.clone().slice([0..nbc, 0..1]),
                targets.slice([0..nbc, 0..1]),
                Reduction::Mean,
            )
        };

        let f = self.problem.residual(
            inputs.slice([nbc..n, 0..d]),
            outputs.slice([nbc..n, 0..1]),
            int_mat,
        );
        let loss_pde = MseLoss::new().forward(f.clone(), Tensor::zeros_like(&f), Reduction::Mean);

        vec![loss_bc, loss_pde]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Ball, Interval};
    use crate::pinn::TwoSidedFractional1d;
    use burn::backend::NdArray;
    use burn::tensor::ElementConversion;

    type TestBackend = NdArray<f64>;

    fn static_data(nanchor: usize) -> Fpde<TwoSidedFractional1d, Interval> {
        let disc = Discretization::new(1, MeshType::Static, vec![21], nanchor).unwrap();
        let size = 21 + nanchor - 2;
        Fpde::new(
            TwoSidedFractional1d::new(1.5),
            1.5,
            Interval::new(0.0, 1.0),
            disc,
            size,
            size,
        )
        .unwrap()
        .with_seed(7)
    }

    #[test]
    fn static_mesh_requires_interval() {
        let disc = Discretization::new(1, MeshType::Static, vec![10], 0).unwrap();
        let result = Fpde::new(
            TwoSidedFractional1d::new(1.5),
            1.5,
            Ball::new(vec![0.0, 0.0], 1.0),
            disc,
            8,
            8,
        );
        assert!(matches!(result, Err(Error::StaticMeshRequiresInterval)));
    }

    #[test]
    fn static_batch_size_must_match_resolution() {
        let disc = Discretization::new(1, MeshType::Static, vec![21], 2).unwrap();
        let mut data = Fpde::new(
            TwoSidedFractional1d::new(1.5),
            1.5,
            Interval::new(0.0, 1.0),
            disc,
            30,
            21,
        )
        .unwrap();
        assert!(matches!(
            data.train_next_batch(),
            Err(Error::BatchSizeMismatch {
                expected: 21,
                actual: 30
            })
        ));
    }

    #[test]
    fn static_batch_puts_anchors_first_and_rolls_mesh() {
        let mut data = static_data(2);
        let batch = data.train_next_batch().unwrap();
        assert_eq!(batch.x.len(), 2 + 21);
        assert_eq!(batch.x.row(0)[0], 0.0);
        assert_eq!(batch.x.row(1)[0], 1.0);
        // 回転後のメッシュは x1 から始まり x0 で終わる
        assert!((batch.x.row(2)[0] - 0.05).abs() < 1e-12);
        assert_eq!(batch.x.row(22)[0], 0.0);
        assert_eq!(batch.y.len(), batch.x.len());

        let int_mat = data.int_matrix(true).unwrap();
        assert_eq!(int_mat.shape(), (19, 21));
    }

    #[test]
    fn batches_are_cached() {
        let mut data = static_data(2);
        let first = data.train_next_batch().unwrap().x.clone();
        let second = data.train_next_batch().unwrap().x.clone();
        assert_eq!(first, second);
    }

    fn static_mesh(points: usize, order: ApproxOrder) -> Fpde<TwoSidedFractional1d, Interval> {
        let disc = Discretization::new(1, MeshType::Static, vec![points], 0).unwrap();
        Fpde::new(
            TwoSidedFractional1d::new(1.5),
            1.5,
            Interval::new(0.0, 1.0),
            disc,
            points - 2,
            points - 2,
        )
        .unwrap()
        .with_order(order)
    }

    fn dynamic_mesh(per_unit: usize, order: ApproxOrder) -> Fpde<TwoSidedFractional1d, Interval> {
        let disc = Discretization::new(1, MeshType::Dynamic, vec![per_unit], 0).unwrap();
        Fpde::new(
            TwoSidedFractional1d::new(1.5),
            1.5,
            Interval::new(0.0, 1.0),
            disc,
            9,
            9,
        )
        .unwrap()
        .with_order(order)
    }

    /// 厳密解を入力したときの残差損失と、離散化行列をゼロにしたときの残差損失。
    fn exact_pde_losses(data: &mut Fpde<TwoSidedFractional1d, Interval>) -> (f64, f64) {
        let device = Default::default();
        let batch = data.train_next_batch().unwrap().clone();
        let int_mat = data.int_matrix(true).unwrap().to_tensor::<TestBackend>(&device);
        let inputs = batch.x.to_tensor::<TestBackend>(&device);
        let targets = batch.targets::<TestBackend>(&device);

        let losses = data.losses(
            inputs.clone(),
            targets.clone(),
            targets.clone(),
            int_mat.clone(),
        );
        let bc: f64 = losses[0].clone().into_scalar().elem();
        assert_eq!(bc, 0.0);
        let zeroed = data.losses(inputs, targets.clone(), targets, int_mat.zeros_like());
        (
            losses[1].clone().into_scalar().elem(),
            zeroed[1].clone().into_scalar().elem(),
        )
    }

    /// 1次精度なので格子幅を 1/4 にすると二乗誤差はおよそ 1/16 になる
    fn assert_first_order_convergence(losses: &[f64]) {
        for pair in losses.windows(2) {
            assert!(pair[1] < pair[0] / 8.0, "not converging: {losses:?}");
        }
    }

    #[test]
    fn static_residual_of_exact_solution_converges() {
        let mut losses = Vec::new();
        let mut baseline = 0.0;
        for points in [21, 81, 321] {
            let (exact, zeroed) = exact_pde_losses(&mut static_mesh(points, ApproxOrder::First));
            losses.push(exact);
            baseline = zeroed;
        }
        assert_first_order_convergence(&losses);
        assert!(losses[2] < 1e-5, "{losses:?}");
        // ゼロ行列では右辺がそのまま残る
        assert!(baseline > 1e-2);
        assert!(losses[2] < baseline * 1e-3);
    }

    #[test]
    fn dynamic_residual_of_exact_solution_converges() {
        let mut losses = Vec::new();
        let mut baseline = 0.0;
        for per_unit in [50, 200, 800] {
            let (exact, zeroed) = exact_pde_losses(&mut dynamic_mesh(per_unit, ApproxOrder::First));
            losses.push(exact);
            baseline = zeroed;
        }
        assert_first_order_convergence(&losses);
        assert!(losses[2] < 1e-6, "{losses:?}");
        assert!(losses[2] < baseline * 1e-3);
    }

    #[test]
    fn higher_order_static_weights_are_more_accurate() {
        let loss = |order| exact_pde_losses(&mut static_mesh(81, order)).0;
        let first = loss(ApproxOrder::First);
        let second = loss(ApproxOrder::Second);
        let third = loss(ApproxOrder::Third);
        assert!(second < first / 10.0, "first {first}, second {second}");
        assert!(third < second, "second {second}, third {third}");
        assert!(second < 1e-6);
        assert!(third < 1e-7);
    }

    #[test]
    fn higher_order_dynamic_weights_are_more_accurate() {
        let loss = |order| exact_pde_losses(&mut dynamic_mesh(50, order)).0;
        let first = loss(ApproxOrder::First);
        let second = loss(ApproxOrder::Second);
        let third = loss(ApproxOrder::Third);
        assert!(second < first / 10.0, "first {first}, second {second}");
        assert!(third < second, "second {second}, third {third}");
        assert!(third < 1e-6);
    }

    #[test]
    fn degenerate_batches_are_errors() {
        let disc = Discretization::new(1, MeshType::Dynamic, vec![10], 2).unwrap();
        let mut data = Fpde::new(
            TwoSidedFractional1d::new(1.5),
            1.5,
            Interval::new(0.0, 1.0),
            disc,
            2,
            2,
        )
        .unwrap();
        assert!(matches!(
            data.train_next_batch(),
            Err(Error::BatchSizeMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn dynamic_batch_has_evaluation_points_then_auxiliary_points() {
        let disc = Discretization::new(1, MeshType::Dynamic, vec![16], 2).unwrap();
        let mut data = Fpde::new(
            TwoSidedFractional1d::new(1.5),
            1.5,
            Interval::new(0.0, 1.0),
            disc,
            12,
            12,
        )
        .unwrap()
        .with_seed(1);
        let batch = data.train_next_batch().unwrap();
        let n = batch.x.len();
        assert!(n > 12);
        let int_mat = data.int_matrix(true).unwrap();
        assert_eq!(int_mat.shape(), (10, n - 2));
    }
}

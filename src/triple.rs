//! 作用素学習用のデータセット（入力関数・座標・出力値の三つ組）。

use crate::error::{Error, Result};
use crate::geometry::Points;
use burn::prelude::Backend;
use burn::tensor::{Tensor, TensorData};
use rand::Rng;
use std::f64::consts::PI;

/// 入力関数と座標が1対1に並んだ三つ組。
#[derive(Debug, Clone, PartialEq)]
pub struct Triple {
    pub x_func: Points,
    pub x_loc: Points,
    pub y: Vec<f64>,
}

impl Triple {
    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    pub fn tensors<B: Backend>(&self, device: &B::Device) -> (Tensor<B, 2>, Tensor<B, 2>, Tensor<B, 2>) {
        (
            self.x_func.to_tensor(device),
            self.x_loc.to_tensor(device),
            Tensor::from_data(TensorData::new(self.y.clone(), [self.y.len(), 1]), device),
        )
    }
}

/// 入力関数 `[nf, m]` と座標 `[np, d]` の直積に対する出力 `[nf, np]`。
#[derive(Debug, Clone, PartialEq)]
pub struct TripleCartesianProd {
    pub x_func: Points,
    pub x_loc: Points,
    pub y: Vec<f64>,
}

impl TripleCartesianProd {
    pub fn num_functions(&self) -> usize {
        self.x_func.len()
    }

    pub fn num_locations(&self) -> usize {
        self.x_loc.len()
    }

    pub fn tensors<B: Backend>(&self, device: &B::Device) -> (Tensor<B, 2>, Tensor<B, 2>, Tensor<B, 2>) {
        (
            self.x_func.to_tensor(device),
            self.x_loc.to_tensor(device),
            Tensor::from_data(
                TensorData::new(self.y.clone(), [self.num_functions(), self.num_locations()]),
                device,
            ),
        )
    }

    /// 直積を展開して1対1の三つ組にします（入力関数ごとに全座標を並べる）。
    pub fn to_triple(&self) -> Triple {
        let nf = self.num_functions();
        let np = self.num_locations();
        let mut x_func = Points::new(self.x_func.dim());
        let mut x_loc = Points::new(self.x_loc.dim());
        for i in 0..nf {
            for j in 0..np {
                x_func.push(self.x_func.row(i));
                x_loc.push(self.x_loc.row(j));
            }
        }
        Triple {
            x_func,
            x_loc,
            y: self.y.clone(),
        }
    }
}

/// 有限項のフーリエ級数 `u(x) = Σ a_k sin(kπx) + b_k cos(kπx)`。
#[derive(Debug, Clone, PartialEq)]
pub struct FourierSeries {
    pub a: Vec<f64>,
    pub b: Vec<f64>,
}

impl FourierSeries {
    /// 係数が `k` 次で `1/k` に減衰する乱数関数。
    pub fn random<R: Rng + ?Sized>(modes: usize, rng: &mut R) -> Self {
        let draw = |rng: &mut R| {
            (1..=modes)
                .map(|k| rng.random_range(-1.0..1.0) / k as f64)
                .collect::<Vec<f64>>()
        };
        let a = draw(rng);
        let b = draw(rng);
        Self { a, b }
    }

    pub fn eval(&self, x: f64) -> f64 {
        self.a
            .iter()
            .zip(&self.b)
            .enumerate()
            .map(|(i, (a, b))| {
                let w = (i + 1) as f64 * PI;
                a * (w * x).sin() + b * (w * x).cos()
            })
            .sum()
    }

    /// `∫_0^x u(s) ds` の閉じた形。
    pub fn antiderivative(&self, x: f64) -> f64 {
        self.a
            .iter()
            .zip(&self.b)
            .enumerate()
            .map(|(i, (a, b))| {
                let w = (i + 1) as f64 * PI;
                a * (1.0 - (w * x).cos()) / w + b * (w * x).sin() / w
            })
            .sum()
    }
}

/// 不定積分作用素 `G(u)(y) = ∫_0^y u` のデータセットを生成します。
///
/// 入力関数は区間 `[0, 1]` 上の `sensors` 点で、出力は `locations` 点の
/// 等間隔格子（右端を含まない）で評価します。
pub fn antiderivative_dataset<R: Rng + ?Sized>(
    num_functions: usize,
    sensors: usize,
    locations: usize,
    modes: usize,
    rng: &mut R,
) -> Result<TripleCartesianProd> {
    if sensors == 0 || locations == 0 {
        return Err(Error::InvalidDataset(format!(
            "sensors and locations must be positive: {sensors}, {locations}"
        )));
    }
    let sensor_x: Vec<f64> = (0..sensors)
        .map(|i| i as f64 / (sensors.max(2) - 1) as f64)
        .collect();
    let loc_x: Vec<f64> = (0..locations).map(|i| i as f64 / locations as f64).collect();

    let mut x_func = Vec::with_capacity(num_functions * sensors);
    let mut y = Vec::with_capacity(num_functions * locations);
    for _ in 0..num_functions {
        let u = FourierSeries::random(modes, rng);
        x_func.extend(sensor_x.iter().map(|&x| u.eval(x)));
        y.extend(loc_x.iter().map(|&x| u.antiderivative(x)));
    }

    Ok(TripleCartesianProd {
        x_func: Points::from_flat(sensors, x_func),
        x_loc: Points::from_flat(1, loc_x),
        y,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn antiderivative_matches_trapezoid_rule() {
        let mut rng = StdRng::seed_from_u64(3);
        let u = FourierSeries::random(4, &mut rng);
        let n = 20_000;
        let h = 0.7 / n as f64;
        let trapezoid: f64 = (0..n)
            .map(|i| 0.5 * h * (u.eval(i as f64 * h) + u.eval((i + 1) as f64 * h)))
            .sum();
        assert!((trapezoid - u.antiderivative(0.7)).abs() < 1e-6);
        assert_eq!(u.antiderivative(0.0), 0.0);
    }

    #[test]
    fn dataset_shapes() {
        let mut rng = StdRng::seed_from_u64(0);
        let data = antiderivative_dataset(5, 10, 16, 3, &mut rng).unwrap();
        assert_eq!(data.num_functions(), 5);
        assert_eq!(data.x_func.dim(), 10);
        assert_eq!(data.num_locations(), 16);
        assert_eq!(data.y.len(), 80);
        // 原点での不定積分は 0
        assert!(data.y.iter().step_by(16).all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn pairing_repeats_functions_for_each_location() {
        let mut rng = StdRng::seed_from_u64(0);
        let data = antiderivative_dataset(2, 4, 3, 2, &mut rng).unwrap();
        let triple = data.to_triple();
        assert_eq!(triple.len(), 6);
        assert_eq!(triple.x_func.row(0), triple.x_func.row(2));
        assert_eq!(triple.x_loc.row(1), data.x_loc.row(1));
        assert_eq!(triple.x_loc.row(4), data.x_loc.row(1));
    }

    #[test]
    fn empty_sensor_or_location_grid_is_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        for (sensors, locations) in [(0, 4), (4, 0)] {
            assert!(matches!(
                antiderivative_dataset(3, sensors, locations, 2, &mut rng),
                Err(Error::InvalidDataset(_))
            ));
        }
        // センサー1点なら原点での値だけを持つ
        let single = antiderivative_dataset(2, 1, 4, 2, &mut rng).unwrap();
        assert_eq!(single.x_func.dim(), 1);
        assert_eq!(single.num_functions(), 2);
    }
}

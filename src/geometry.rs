//! # 計算領域
//!
//! 分数階作用素の離散化に必要な幾何操作（内外判定、境界までの距離、
//! 方向に沿った背景点の生成など）を提供します。

use burn::prelude::Backend;
use burn::tensor::{Tensor, TensorData};
use rand::Rng;
use std::f64::consts::PI;

/// 行優先で並べた `dim` 次元の点列。
#[derive(Debug, Clone, PartialEq)]
pub struct Points {
    dim: usize,
    data: Vec<f64>,
}

impl Points {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            data: Vec::new(),
        }
    }

    /// 行優先の平坦な配列から点列を作ります。端数の要素は切り捨てます。
    ///
    /// `dim == 0` の点列は常に空です。
    pub fn from_flat(dim: usize, mut data: Vec<f64>) -> Self {
        let rows = data.len().checked_div(dim).unwrap_or(0);
        data.truncate(rows * dim);
        Self { dim, data }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.data.len().checked_div(self.dim).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.data.chunks_exact(self.dim.max(1))
    }

    pub fn push(&mut self, row: &[f64]) {
        debug_assert_eq!(row.len(), self.dim);
        self.data.extend_from_slice(row);
    }

    pub fn append(&mut self, other: &Points) {
        debug_assert_eq!(other.dim, self.dim);
        self.data.extend_from_slice(&other.data);
    }

    /// 先頭から `n` 点を取り除いた点列を返します。
    pub fn skip(&self, n: usize) -> Points {
        let start = (n * self.dim).min(self.data.len());
        Points::from_flat(self.dim, self.data[start..].to_vec())
    }

    /// 点列を左に `shift` 行だけ巡回シフトします（`np.roll(x, len - shift)` 相当）。
    pub fn roll_left(&self, shift: usize) -> Points {
        let mut data = self.data.clone();
        if !data.is_empty() {
            let shift = (shift % self.len()) * self.dim;
            data.rotate_left(shift);
        }
        Points::from_flat(self.dim, data)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// `[len, dim]` のテンソルに変換します。
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        Tensor::from_data(
            TensorData::new(self.data.clone(), [self.len(), self.dim]),
            device,
        )
    }
}

/// `np.isclose` と同じ許容誤差での比較。
pub fn isclose(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-8 + 1e-5 * b.abs()
}

fn norm(x: &[f64]) -> f64 {
    x.iter().map(|v| v * v).sum::<f64>().sqrt()
}

/// 2進の van der Corput 列。`i >= 1` で開区間 (0, 1) の値を返します。
fn radical_inverse(mut i: usize) -> f64 {
    let mut inv = 0.0;
    let mut base = 0.5;
    while i > 0 {
        if i & 1 == 1 {
            inv += base;
        }
        base *= 0.5;
        i >>= 1;
    }
    inv
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// 分数階作用素の離散化が要求する幾何操作。
pub trait Geometry {
    fn dim(&self) -> usize;

    /// 領域の直径。
    fn diam(&self) -> f64;

    /// 閉領域に含まれるかどうか。
    fn inside(&self, x: &[f64]) -> bool;

    fn on_boundary(&self, x: &[f64]) -> bool;

    /// 点列の境界までの最短距離。
    fn min_dist_to_boundary(&self, points: &Points) -> f64;

    fn uniform_points(&self, n: usize, boundary: bool) -> Points;

    fn random_boundary_points<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Points;

    /// `x` から `-dirn` 方向（1次元では `dirn` の符号の側）に境界まで等間隔に並べた点列。
    ///
    /// 点数は `max(dist2npts(距離), 1) + 1` で、先頭は `x` を `shift` ステップ
    /// ずらした点です。
    fn background_points(
        &self,
        x: &[f64],
        dirn: &[f64],
        dist2npts: &dyn Fn(f64) -> usize,
        shift: i64,
    ) -> Points;

    /// 静的メッシュを扱えるのは区間のみ。
    fn is_interval(&self) -> bool {
        false
    }
}

/// 1次元の区間 `[l, r]`。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub l: f64,
    pub r: f64,
}

impl Interval {
    pub fn new(l: f64, r: f64) -> Self {
        Self { l, r }
    }
}

fn step_points(x0: f64, dx: f64, sign: f64, dist2npts: &dyn Fn(f64) -> usize, shift: i64) -> Points {
    let n = dist2npts(dx).max(1);
    let h = dx / n as f64;
    let data = (-shift..=(n as i64 - shift))
        .map(|k| x0 + sign * k as f64 * h)
        .collect();
    Points::from_flat(1, data)
}

impl Geometry for Interval {
    fn dim(&self) -> usize {
        1
    }

    fn diam(&self) -> f64 {
        self.r - self.l
    }

    fn inside(&self, x: &[f64]) -> bool {
        self.l <= x[0] && x[0] <= self.r
    }

    fn on_boundary(&self, x: &[f64]) -> bool {
        isclose(x[0], self.l) || isclose(x[0], self.r)
    }

    fn min_dist_to_boundary(&self, points: &Points) -> f64 {
        points
            .rows()
            .map(|x| (x[0] - self.l).min(self.r - x[0]))
            .fold(f64::INFINITY, f64::min)
    }

    fn uniform_points(&self, n: usize, boundary: bool) -> Points {
        let data = if boundary {
            if n <= 1 {
                vec![self.l; n]
            } else {
                let h = self.diam() / (n - 1) as f64;
                (0..n).map(|i| self.l + i as f64 * h).collect()
            }
        } else {
            let h = self.diam() / (n + 1) as f64;
            (1..=n).map(|i| self.l + i as f64 * h).collect()
        };
        Points::from_flat(1, data)
    }

    fn random_boundary_points<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Points {
        if n == 2 {
            return Points::from_flat(1, vec![self.l, self.r]);
        }
        let data = (0..n)
            .map(|_| if rng.random_bool(0.5) { self.l } else { self.r })
            .collect();
        Points::from_flat(1, data)
    }

    fn background_points(
        &self,
        x: &[f64],
        dirn: &[f64],
        dist2npts: &dyn Fn(f64) -> usize,
        shift: i64,
    ) -> Points {
        if dirn[0] < 0.0 {
            step_points(x[0], x[0] - self.l, -1.0, dist2npts, shift)
        } else {
            step_points(x[0], self.r - x[0], 1.0, dist2npts, shift)
        }
    }

    fn is_interval(&self) -> bool {
        true
    }
}

/// 2次元の円板または3次元の球。
#[derive(Debug, Clone, PartialEq)]
pub struct Ball {
    pub center: Vec<f64>,
    pub radius: f64,
}

impl Ball {
    pub fn new(center: Vec<f64>, radius: f64) -> Self {
        Self { center, radius }
    }

    /// 単位方向 `dirn` に進んだときの境界までの距離。
    pub fn distance_to_boundary_unit_dirn(&self, x: &[f64], dirn: &[f64]) -> f64 {
        let xc: Vec<f64> = x.iter().zip(&self.center).map(|(a, c)| a - c).collect();
        let ad = dot(&xc, dirn);
        -ad + (ad * ad - dot(&xc, &xc) + self.radius * self.radius)
            .max(0.0)
            .sqrt()
    }

    fn unit_direction<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        match self.dim() {
            2 => {
                let theta = rng.random_range(0.0..2.0 * PI);
                vec![theta.cos(), theta.sin()]
            }
            _ => {
                let z: f64 = rng.random_range(-1.0..1.0);
                let phi = rng.random_range(0.0..2.0 * PI);
                let s = (1.0 - z * z).sqrt();
                vec![s * phi.cos(), s * phi.sin(), z]
            }
        }
    }
}

impl Geometry for Ball {
    fn dim(&self) -> usize {
        self.center.len()
    }

    fn diam(&self) -> f64 {
        2.0 * self.radius
    }

    fn inside(&self, x: &[f64]) -> bool {
        let xc: Vec<f64> = x.iter().zip(&self.center).map(|(a, c)| a - c).collect();
        norm(&xc) <= self.radius
    }

    fn on_boundary(&self, x: &[f64]) -> bool {
        let xc: Vec<f64> = x.iter().zip(&self.center).map(|(a, c)| a - c).collect();
        isclose(norm(&xc), self.radius)
    }

    fn min_dist_to_boundary(&self, points: &Points) -> f64 {
        points
            .rows()
            .map(|x| {
                let xc: Vec<f64> = x.iter().zip(&self.center).map(|(a, c)| a - c).collect();
                self.radius - norm(&xc)
            })
            .fold(f64::INFINITY, f64::min)
    }

    /// 決定的な準一様点列（2次元はひまわり配置、3次元はフィボナッチ球と van der Corput 列の組み合わせ）。
    ///
    /// `boundary = true` のときは最後の1点を境界上に置きます。
    fn uniform_points(&self, n: usize, boundary: bool) -> Points {
        let golden = PI * (3.0 - 5f64.sqrt());
        let mut points = Points::new(self.dim());
        for i in 0..n {
            let on_edge = boundary && i + 1 == n;
            let theta = golden * i as f64;
            let row = match self.dim() {
                2 => {
                    let frac = if on_edge { 1.0 } else { (i as f64 + 0.5) / n as f64 };
                    let r = self.radius * frac.sqrt();
                    vec![
                        self.center[0] + r * theta.cos(),
                        self.center[1] + r * theta.sin(),
                    ]
                }
                _ => {
                    let frac = if on_edge { 1.0 } else { radical_inverse(i + 1) };
                    let r = self.radius * frac.cbrt();
                    let z = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
                    let s = (1.0 - z * z).sqrt();
                    vec![
                        self.center[0] + r * s * theta.cos(),
                        self.center[1] + r * s * theta.sin(),
                        self.center[2] + r * z,
                    ]
                }
            };
            points.push(&row);
        }
        points
    }

    fn random_boundary_points<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Points {
        let mut points = Points::new(self.dim());
        for _ in 0..n {
            let dirn = self.unit_direction(rng);
            let row: Vec<f64> = self
                .center
                .iter()
                .zip(&dirn)
                .map(|(c, d)| c + self.radius * d)
                .collect();
            points.push(&row);
        }
        points
    }

    fn background_points(
        &self,
        x: &[f64],
        dirn: &[f64],
        dist2npts: &dyn Fn(f64) -> usize,
        shift: i64,
    ) -> Points {
        let neg: Vec<f64> = dirn.iter().map(|d| -d).collect();
        let dx = self.distance_to_boundary_unit_dirn(x, &neg);
        let n = dist2npts(dx).max(1);
        let h = dx / n as f64;
        let mut points = Points::new(self.dim());
        for k in -shift..=(n as i64 - shift) {
            let row: Vec<f64> = x
                .iter()
                .zip(dirn)
                .map(|(xi, di)| xi - k as f64 * h * di)
                .collect();
            points.push(&row);
        }
        points
    }
}

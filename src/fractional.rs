//! # 分数階ラプラシアンの離散化
//!
//! Grünwald–Letnikov 型の重みを使い、分数階作用素を「点列 × 重み行列」の形に
//! 離散化します。静的メッシュ（区間上の等間隔格子）と、各評価点から
//! 複数方向へ境界まで補助点を伸ばす動的メッシュの2方式があります。
//!
//! 動的メッシュの点列は `[x0; 補助点]` の順に並び、行列の第 i 行は
//! 評価点 `x0[i]` に属する補助点の列だけが非零になります。

use crate::error::{Error, Result};
use crate::geometry::{Geometry, Points};
use crate::math::gauss_legendre;
use burn::prelude::Backend;
use burn::tensor::{Tensor, TensorData};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// 空間離散化の方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeshType {
    Static,
    Dynamic,
}

impl FromStr for MeshType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "static" => Ok(Self::Static),
            "dynamic" => Ok(Self::Dynamic),
            other => Err(Error::InvalidMeshType(other.to_string())),
        }
    }
}

impl fmt::Display for MeshType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static => write!(f, "static"),
            Self::Dynamic => write!(f, "dynamic"),
        }
    }
}

/// 重みの近似次数。境界付近での補助点のずらし方が変わります。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApproxOrder {
    #[default]
    First,
    Second,
    Third,
}

/// 空間離散化のパラメータ。
///
/// `resolution` は静的メッシュでは格子点数、動的メッシュでは
/// `[角度方向の分割数..., 単位長さあたりの補助点数]` を表します。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discretization {
    pub dim: usize,
    pub meshtype: MeshType,
    pub resolution: Vec<usize>,
    pub nanchor: usize,
}

impl Discretization {
    pub fn new(
        dim: usize,
        meshtype: MeshType,
        resolution: Vec<usize>,
        nanchor: usize,
    ) -> Result<Self> {
        let disc = Self {
            dim,
            meshtype,
            resolution,
            nanchor,
        };
        disc.check()?;
        Ok(disc)
    }

    fn check(&self) -> Result<()> {
        if self.dim >= 2 && self.meshtype == MeshType::Static {
            return Err(Error::StaticMeshDimension(self.dim));
        }
        if self.dim != self.resolution.len() {
            return Err(Error::ResolutionMismatch {
                resolution: self.resolution.clone(),
                dim: self.dim,
            });
        }
        // 静的メッシュは両端を含む2点以上、動的メッシュは各分割数が1以上
        let too_coarse = match self.meshtype {
            MeshType::Static => self.resolution[0] < 2,
            MeshType::Dynamic => self.resolution.contains(&0),
        };
        if too_coarse {
            return Err(Error::InvalidResolution(self.resolution.clone()));
        }
        Ok(())
    }

    /// 動的メッシュで距離 `dx` に置く補助点の数。
    pub fn dist2npts(&self, dx: f64) -> usize {
        let per_unit = self.resolution.last().copied().unwrap_or(1) as f64;
        (per_unit * dx).ceil() as usize
    }
}

/// 行優先の密行列。
#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl DenseMatrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.cols + j]
    }

    fn add(&mut self, i: usize, j: usize, v: f64) {
        self.data[i * self.cols + j] += v;
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    /// 各行の列を左に `shift` だけ巡回シフトします。
    pub fn roll_columns_left(&self, shift: usize) -> Self {
        let mut out = self.clone();
        if self.cols > 0 {
            for row in out.data.chunks_exact_mut(self.cols) {
                row.rotate_left(shift % self.cols);
            }
        }
        out
    }

    /// 行 `start..end` を取り出します。
    pub fn slice_rows(&self, start: usize, end: usize) -> Self {
        let end = end.max(start);
        Self {
            rows: end - start,
            cols: self.cols,
            data: self.data[start * self.cols..end * self.cols].to_vec(),
        }
    }

    fn scale(mut self, factor: f64) -> Self {
        self.data.iter_mut().for_each(|v| *v *= factor);
        self
    }

    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        Tensor::from_data(
            TensorData::new(self.data.clone(), [self.rows, self.cols]),
            device,
        )
    }
}

/// 座標形式の疎行列。
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix {
    pub indices: Vec<(usize, usize)>,
    pub values: Vec<f64>,
    pub shape: (usize, usize),
}

impl SparseMatrix {
    pub fn to_dense(&self) -> DenseMatrix {
        let mut dense = DenseMatrix::zeros(self.shape.0, self.shape.1);
        for (&(i, j), &v) in self.indices.iter().zip(&self.values) {
            dense.add(i, j, v);
        }
        dense
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }
}

/// 分数階作用素の離散化行列。
#[derive(Debug, Clone, PartialEq)]
pub enum FracMatrix {
    Dense(DenseMatrix),
    Sparse(SparseMatrix),
}

impl FracMatrix {
    pub fn shape(&self) -> (usize, usize) {
        match self {
            Self::Dense(m) => (m.rows, m.cols),
            Self::Sparse(m) => m.shape,
        }
    }

    pub fn into_dense(self) -> DenseMatrix {
        match self {
            Self::Dense(m) => m,
            Self::Sparse(m) => m.to_dense(),
        }
    }

    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        match self {
            Self::Dense(m) => m.to_tensor(device),
            Self::Sparse(m) => m.to_dense().to_tensor(device),
        }
    }
}

/// Grünwald–Letnikov の重み `w_0 = 1, w_j = w_{j-1} (j - 1 - α) / j` を `n` 個。
pub fn grunwald_weights(alpha: f64, n: usize) -> Vec<f64> {
    let mut w = Vec::with_capacity(n);
    if n == 0 {
        return w;
    }
    w.push(1.0);
    for j in 1..n {
        let prev = w[j - 1];
        w.push(prev * (j as f64 - 1.0 - alpha) / j as f64);
    }
    w
}

fn second_order_weights(w: &[f64], alpha: f64) -> Vec<f64> {
    let beta = 1.0 - alpha / 2.0;
    (0..=w.len())
        .map(|k| {
            let w0 = if k == 0 { 0.0 } else { w[k - 1] };
            let w1 = w.get(k).copied().unwrap_or(0.0);
            beta * w0 + (1.0 - beta) * w1
        })
        .collect()
}

fn third_order_weights(w: &[f64], alpha: f64) -> Vec<f64> {
    let beta = 1.0 - alpha / 2.0;
    let c0 = (-6.0 * beta * beta + 11.0 * beta + 1.0) / 6.0;
    let c1 = (11.0 - 6.0 * beta) * (1.0 - beta) / 12.0;
    let c2 = (6.0 * beta + 1.0) * (beta - 1.0) / 12.0;
    (0..=w.len())
        .map(|k| {
            let w0 = if k == 0 { 0.0 } else { w[k - 1] };
            let w1 = w.get(k).copied().unwrap_or(0.0);
            // w2 は [0, 0, w[..len-1]]
            let w2 = if k >= 2 && k - 2 < w.len() - 1 {
                w[k - 2]
            } else {
                0.0
            };
            c0 * w0 + c1 * w1 + c2 * w2
        })
        .collect()
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// 分数階微分作用素。
///
/// 静的メッシュでは `x0` を与えず、動的メッシュでは境界を含まない評価点 `x0` を与えます。
#[derive(Debug, Clone)]
pub struct Fractional<G: Geometry> {
    alpha: f64,
    geom: G,
    disc: Discretization,
    order: ApproxOrder,
    x0: Option<Points>,
    x: Option<Points>,
    xindex_start: Vec<usize>,
    w: Vec<Vec<f64>>,
    w_init: Vec<f64>,
}

impl<G: Geometry + Clone> Fractional<G> {
    pub fn new(alpha: f64, geom: G, disc: Discretization, x0: Option<Points>) -> Result<Self> {
        match (disc.meshtype, &x0) {
            (MeshType::Static, Some(_)) => {
                return Err(Error::WrongInputs("static mesh takes no evaluation points"));
            }
            (MeshType::Dynamic, None) => {
                return Err(Error::WrongInputs("dynamic mesh requires evaluation points"));
            }
            _ => {}
        }

        let n = match disc.meshtype {
            MeshType::Static => disc.resolution[0],
            MeshType::Dynamic => disc.dist2npts(geom.diam()) + 1,
        };
        let frac = Self {
            alpha,
            w_init: grunwald_weights(alpha, n),
            geom,
            disc,
            order: ApproxOrder::default(),
            x0,
            x: None,
            xindex_start: Vec::new(),
            w: Vec::new(),
        };
        if frac.disc.meshtype == MeshType::Dynamic {
            frac.check_dynamic_stepsize();
        }
        Ok(frac)
    }

    pub fn with_order(mut self, order: ApproxOrder) -> Self {
        self.order = order;
        self
    }

    fn check_dynamic_stepsize(&self) {
        let Some(x0) = &self.x0 else { return };
        let per_unit = self.disc.resolution.last().copied().unwrap_or(1);
        let h = 1.0 / per_unit as f64;
        let min_h = self.geom.min_dist_to_boundary(x0);
        if min_h < h {
            warn!(
                "メッシュ幅 {:.6} が境界までの距離 {:.6} より大きくなっています",
                h, min_h
            );
        }
    }

    /// 先頭 `n + 1` 個の重み。
    pub fn get_weight(&self, n: usize) -> Vec<f64> {
        if n < self.w_init.len() {
            self.w_init[..=n].to_vec()
        } else {
            grunwald_weights(self.alpha, n + 1)
        }
    }

    /// 各評価点に属する補助点の開始位置（`x` 全体での行番号）。
    pub fn xindex_start(&self) -> &[usize] {
        &self.xindex_start
    }

    /// 離散化に使う点列を生成します。
    pub fn get_x(&mut self) -> Result<Points> {
        let x = match self.disc.meshtype {
            MeshType::Static => self.geom.uniform_points(self.disc.resolution[0], true),
            MeshType::Dynamic => self.get_x_dynamic()?,
        };
        self.x = Some(x.clone());
        Ok(x)
    }

    fn directions(&self) -> Result<(Vec<Vec<f64>>, Vec<f64>)> {
        let res = &self.disc.resolution;
        match self.geom.dim() {
            1 => Ok((vec![vec![-1.0], vec![1.0]], vec![1.0, 1.0])),
            2 => {
                let (gauss_x, gauss_w) = gauss_legendre(res[0]);
                let dirns = gauss_x
                    .iter()
                    .map(|g| {
                        let theta = PI * g + PI;
                        vec![theta.cos(), theta.sin()]
                    })
                    .collect();
                let dirn_w = gauss_w.iter().map(|w| PI * w).collect();
                Ok((dirns, dirn_w))
            }
            3 => {
                let (gauss_x, gauss_w) = gauss_legendre(res[0].max(res[1]));
                let thetas: Vec<f64> = gauss_x[..res[0]]
                    .iter()
                    .map(|g| (PI * g + PI) / 2.0)
                    .collect();
                let phis: Vec<f64> = gauss_x[..res[1]].iter().map(|g| PI * g + PI).collect();
                let mut dirns = Vec::with_capacity(res[0] * res[1]);
                let mut dirn_w = Vec::with_capacity(res[0] * res[1]);
                for (i, theta) in thetas.iter().enumerate() {
                    for (j, phi) in phis.iter().enumerate() {
                        dirns.push(vec![
                            theta.sin() * phi.cos(),
                            theta.sin() * phi.sin(),
                            theta.cos(),
                        ]);
                        dirn_w.push(PI * PI / 2.0 * gauss_w[i] * gauss_w[j] * theta.sin());
                    }
                }
                Ok((dirns, dirn_w))
            }
            d => Err(Error::UnsupportedDimension(d)),
        }
    }

    fn get_x_dynamic(&mut self) -> Result<Points> {
        let x0 = self
            .x0
            .clone()
            .ok_or(Error::WrongInputs("dynamic mesh requires evaluation points"))?;
        if x0.rows().any(|x| self.geom.on_boundary(x)) {
            return Err(Error::BoundaryPoints);
        }
        let (dirns, dirn_w) = self.directions()?;
        let disc = self.disc.clone();
        let dist2npts = move |dx: f64| disc.dist2npts(dx);

        let mut aux = Vec::with_capacity(x0.len());
        self.w.clear();
        for x0i in x0.rows() {
            let mut xi_all = Points::new(x0.dim());
            let mut wi_all = Vec::new();
            for (dirn, dw) in dirns.iter().zip(&dirn_w) {
                let xi = self.geom.background_points(x0i, dirn, &dist2npts, 0);
                let step = distance(xi.row(1), xi.row(0));
                let scale = dw * step.powf(-self.alpha);
                let wi: Vec<f64> = self
                    .get_weight(xi.len() - 1)
                    .into_iter()
                    .map(|w| scale * w)
                    .collect();
                let (xi, wi) = self.modify(xi, wi);
                xi_all.append(&xi);
                wi_all.extend(wi);
            }
            aux.push(xi_all);
            self.w.push(wi_all);
        }

        let mut start = x0.len();
        self.xindex_start = vec![start];
        for xi in &aux {
            start += xi.len();
            self.xindex_start.push(start);
        }

        let mut x = x0;
        for xi in &aux {
            x.append(xi);
        }
        Ok(x)
    }

    fn modify(&self, x: Points, w: Vec<f64>) -> (Points, Vec<f64>) {
        match self.order {
            ApproxOrder::First => self.modify_first_order(x, w),
            ApproxOrder::Second => {
                let w = second_order_weights(&w, self.alpha);
                self.prepend_extrapolated(x, w, true)
            }
            ApproxOrder::Third => {
                let w = third_order_weights(&w, self.alpha);
                self.prepend_extrapolated(x, w, true)
            }
        }
    }

    /// 1次: 点列を1ステップ手前にずらし、先頭が領域外ならその点と重みを捨てます。
    fn modify_first_order(&self, x: Points, w: Vec<f64>) -> (Points, Vec<f64>) {
        self.prepend_extrapolated(x, w, false)
    }

    fn prepend_extrapolated(&self, x: Points, w: Vec<f64>, keep_last: bool) -> (Points, Vec<f64>) {
        let head: Vec<f64> = x
            .row(0)
            .iter()
            .zip(x.row(1))
            .map(|(a, b)| 2.0 * a - b)
            .collect();
        let mut shifted = Points::new(x.dim());
        shifted.push(&head);
        let keep = if keep_last { x.len() } else { x.len() - 1 };
        for row in x.rows().take(keep) {
            shifted.push(row);
        }
        if self.geom.inside(&head) {
            (shifted, w)
        } else {
            (shifted.skip(1), w[1..].to_vec())
        }
    }

    /// 離散化行列を返します。動的メッシュでは先に [`Self::get_x`] が必要です。
    pub fn get_matrix(&self, sparse: bool) -> Result<FracMatrix> {
        match self.disc.meshtype {
            MeshType::Static => Ok(FracMatrix::Dense(self.get_matrix_static())),
            MeshType::Dynamic => self.get_matrix_dynamic(sparse),
        }
    }

    fn get_matrix_static(&self) -> DenseMatrix {
        let n = self.disc.resolution[0];
        let mut int_mat = DenseMatrix::zeros(n, n);
        for i in 1..n.saturating_sub(1) {
            match self.order {
                ApproxOrder::First => {
                    for (k, w) in self.get_weight(i).iter().rev().enumerate() {
                        int_mat.add(i, 1 + k, *w);
                    }
                    for (k, w) in self.get_weight(n - 1 - i).iter().enumerate() {
                        int_mat.add(i, i - 1 + k, *w);
                    }
                }
                ApproxOrder::Second | ApproxOrder::Third => {
                    let modify = |w: &[f64]| match self.order {
                        ApproxOrder::Second => second_order_weights(w, self.alpha),
                        _ => third_order_weights(w, self.alpha),
                    };
                    for (k, w) in modify(&self.get_weight(i)).iter().rev().enumerate() {
                        int_mat.add(i, k, *w);
                    }
                    for (k, w) in modify(&self.get_weight(n - 1 - i)).iter().enumerate() {
                        int_mat.add(i, i - 1 + k, *w);
                    }
                }
            }
        }
        let h = self.geom.diam() / (n as f64 - 1.0);
        int_mat.scale(h.powf(-self.alpha))
    }

    fn get_matrix_dynamic(&self, sparse: bool) -> Result<FracMatrix> {
        let (Some(x0), Some(x)) = (&self.x0, &self.x) else {
            return Err(Error::MissingDynamicPoints);
        };
        let shape = (x0.len(), x.len());

        if sparse {
            debug!("分数階微分の疎行列を生成します {:?}", shape);
            let mut indices = Vec::new();
            let mut values = Vec::new();
            let mut beg = x0.len();
            for (i, wi) in self.w.iter().enumerate() {
                for v in wi {
                    indices.push((i, beg));
                    values.push(*v);
                    beg += 1;
                }
            }
            return Ok(FracMatrix::Sparse(SparseMatrix {
                indices,
                values,
                shape,
            }));
        }

        debug!("分数階微分の密行列を生成します {:?}", shape);
        let mut int_mat = DenseMatrix::zeros(shape.0, shape.1);
        let mut beg = x0.len();
        for (i, wi) in self.w.iter().enumerate() {
            for (k, v) in wi.iter().enumerate() {
                int_mat.add(i, beg + k, *v);
            }
            beg += wi.len();
        }
        Ok(FracMatrix::Dense(int_mat))
    }
}

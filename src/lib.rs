//! # 分数階PINN・DeepONet ライブラリ
//!
//! `burn` フレームワークを使用して、分数階微分方程式を解く物理情報ニューラル
//! ネットワーク（fPINN）と、作用素を学習する DeepONet を構築するための主要な
//! コンポーネントを提供します。
//!
//! 数値バックエンドは環境変数 `DDEBACKEND` で選択します（[`backend`] を参照）。

pub mod backend;
pub mod cli;
pub mod config;
pub mod deeponet;
pub mod error;
pub mod fpde;
pub mod fractional;
pub mod geometry;
pub mod history;
pub mod inference;
pub mod logging;
pub mod math;
pub mod model;
pub mod operator;
pub mod pinn;
pub mod training;
pub mod triple;

pub use error::{Error, Result};

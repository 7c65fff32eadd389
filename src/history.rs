use crate::error::{Error, Result};
use plotters::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 学習中に記録した損失の履歴。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LossHistory {
    /// 各成分の名前（"boundary", "pde" など）
    pub labels: Vec<String>,
    pub steps: Vec<usize>,
    /// 記録ごとの学習損失の各成分
    pub train: Vec<Vec<f64>>,
    /// 記録ごとの評価指標（相対 L2 誤差など）
    pub test: Vec<f64>,
}

impl LossHistory {
    pub fn new(labels: &[&str]) -> Self {
        Self {
            labels: labels.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn record(&mut self, step: usize, train: Vec<f64>, test: f64) {
        self.steps.push(step);
        self.train.push(train);
        self.test.push(test);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// 各記録の学習損失の合計。
    pub fn totals(&self) -> Vec<f64> {
        self.train.iter().map(|c| c.iter().sum()).collect()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    /// 損失と評価指標の推移を対数スケールでPNGに描きます。
    pub fn plot(&self, path: &Path) -> Result<()> {
        self.draw(path).map_err(|e| Error::Plot(e.to_string()))
    }

    fn draw(&self, path: &Path) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
        root.fill(&WHITE)?;

        let totals = self.totals();
        let logs: Vec<f64> = totals
            .iter()
            .chain(&self.test)
            .filter(|v| **v > 0.0)
            .map(|v| v.log10())
            .collect();
        let max_log = logs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min_log = logs.iter().cloned().fold(f64::INFINITY, f64::min);
        let (min_log, max_log) = if logs.is_empty() {
            (-6.0, 0.0)
        } else {
            (min_log - 0.5, max_log + 0.1)
        };
        let last_step = self.steps.last().copied().unwrap_or(1);

        let mut chart = ChartBuilder::on(&root)
            .caption("Loss History", ("sans-serif", 40).into_font())
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(50)
            .build_cartesian_2d(0..last_step, min_log..max_log)?;
        chart
            .configure_mesh()
            .y_desc("Loss (log10 scale)")
            .x_desc("Epochs")
            .draw()?;

        let series = |values: Vec<f64>| {
            self.steps
                .iter()
                .zip(values)
                .filter(|(_, v)| *v > 0.0)
                .map(|(s, v)| (*s, v.log10()))
                .collect::<Vec<_>>()
        };

        chart
            .draw_series(LineSeries::new(series(totals), &RED))?
            .label("Train Loss")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &RED));
        chart
            .draw_series(LineSeries::new(series(self.test.clone()), &BLUE))?
            .label("Test Metric")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &BLUE));
        chart
            .configure_series_labels()
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()?;
        root.present()?;
        Ok(())
    }
}

//! Measurement series built from finished sampling sessions
//!
//! A series is an ordered list of `(x, y)` points. Frequency characteristics
//! are grouped by drive amplitude with [`group_by_key`]; the reversible
//! pendulum pairs two series over a shared distance axis and looks for their
//! crossing with [`PairedMeasurements::crossing`].

use crate::analysis::fit::{intersect, Intersection, QuadraticFit};
use crate::error::{DaqError, Result};

/// Ordered `(x, y)` points
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeasurementSeries {
    /// Display label
    pub label: String,
    points: Vec<(f64, f64)>,
}

impl MeasurementSeries {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            points: Vec::new(),
        }
    }

    /// Build a series from unordered points
    pub fn from_points(label: impl Into<String>, points: impl IntoIterator<Item = (f64, f64)>) -> Self {
        let mut series = Self::new(label);
        for (x, y) in points {
            series.push(x, y);
        }
        series
    }

    /// Insert keeping x ascending; equal x values keep insertion order
    pub fn push(&mut self, x: f64, y: f64) {
        let at = self.points.partition_point(|p| p.0 <= x);
        self.points.insert(at, (x, y));
    }

    /// Replace the point at `x`, or insert it
    pub fn upsert(&mut self, x: f64, y: f64) {
        match self.points.iter_mut().find(|p| p.0 == x) {
            Some(point) => point.1 = y,
            None => self.push(x, y),
        }
    }

    /// Remove the point at `index`
    pub fn remove(&mut self, index: usize) -> Option<(f64, f64)> {
        (index < self.points.len()).then(|| self.points.remove(index))
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }

    pub fn xs(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.0).collect()
    }

    pub fn ys(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.1).collect()
    }

    /// `(min x, max x)`, or `None` for an empty series
    pub fn domain(&self) -> Option<(f64, f64)> {
        Some((self.points.first()?.0, self.points.last()?.0))
    }

    /// Quadratic least-squares fit of the series
    pub fn fit(&self) -> Result<QuadraticFit> {
        QuadraticFit::fit(&self.points).map_err(|e| e.with_context(format!("Fitting '{}'", self.label)))
    }
}

/// Group `(key, x, y)` rows into one series per distinct key, ordered by key
pub fn group_by_key(rows: impl IntoIterator<Item = (f64, f64, f64)>) -> Vec<(f64, MeasurementSeries)> {
    let mut rows: Vec<(f64, f64, f64)> = rows.into_iter().collect();
    rows.sort_by(|l, r| l.0.total_cmp(&r.0));

    let mut groups: Vec<(f64, MeasurementSeries)> = Vec::new();
    for (key, x, y) in rows {
        match groups.last_mut() {
            Some((last, series)) if *last == key => series.push(x, y),
            _ => {
                let mut series = MeasurementSeries::new(format!("{}", key));
                series.push(x, y);
                groups.push((key, series));
            }
        }
    }
    groups
}

/// One row of a paired measurement; either side may be missing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairedRow {
    pub x: f64,
    pub a: Option<f64>,
    pub b: Option<f64>,
}

/// Fits of both series and where they cross
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crossing {
    pub fit_a: QuadraticFit,
    pub fit_b: QuadraticFit,
    pub intersection: Intersection,
}

/// Two series measured over the same x axis
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PairedMeasurements {
    pub label_a: String,
    pub label_b: String,
    rows: Vec<PairedRow>,
}

impl PairedMeasurements {
    pub fn new(label_a: impl Into<String>, label_b: impl Into<String>) -> Self {
        Self {
            label_a: label_a.into(),
            label_b: label_b.into(),
            rows: Vec::new(),
        }
    }

    /// Add a row, keeping rows ordered by x
    pub fn push(&mut self, x: f64, a: Option<f64>, b: Option<f64>) {
        let at = self.rows.partition_point(|r| r.x <= x);
        self.rows.insert(at, PairedRow { x, a, b });
    }

    /// Remove the row at `index`
    pub fn remove(&mut self, index: usize) -> Option<PairedRow> {
        (index < self.rows.len()).then(|| self.rows.remove(index))
    }

    pub fn rows(&self) -> &[PairedRow] {
        &self.rows
    }

    /// Points that have an `a` measurement
    pub fn series_a(&self) -> MeasurementSeries {
        MeasurementSeries::from_points(
            self.label_a.clone(),
            self.rows.iter().filter_map(|r| Some((r.x, r.a?))),
        )
    }

    /// Points that have a `b` measurement
    pub fn series_b(&self) -> MeasurementSeries {
        MeasurementSeries::from_points(
            self.label_b.clone(),
            self.rows.iter().filter_map(|r| Some((r.x, r.b?))),
        )
    }

    /// x range spanned by all rows
    pub fn domain(&self) -> Option<(f64, f64)> {
        Some((self.rows.first()?.x, self.rows.last()?.x))
    }

    /// Fit both series and intersect them within the measured x range
    pub fn crossing(&self) -> Result<Crossing> {
        let fit_a = self.series_a().fit()?;
        let fit_b = self.series_b().fit()?;
        let domain = self
            .domain()
            .ok_or_else(|| DaqError::InsufficientData("no rows".to_string()))?;
        let intersection = intersect(&fit_a, &fit_b, Some(domain))?;
        tracing::debug!(
            "Crossing of '{}' and '{}' at x={:.4}, y={:.6}",
            self.label_a,
            self.label_b,
            intersection.x,
            intersection.y
        );
        Ok(Crossing {
            fit_a,
            fit_b,
            intersection,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_keeps_order() {
        let mut series = MeasurementSeries::new("va");
        series.push(3.0, 30.0);
        series.push(1.0, 10.0);
        series.push(2.0, 20.0);
        assert_eq!(series.xs(), vec![1.0, 2.0, 3.0]);
        assert_eq!(series.ys(), vec![10.0, 20.0, 30.0]);
        assert_eq!(series.domain(), Some((1.0, 3.0)));
    }

    #[test]
    fn test_upsert_replaces_same_x() {
        let mut series = MeasurementSeries::new("va");
        series.upsert(1000.0, 1.2);
        series.upsert(500.0, 0.8);
        series.upsert(1000.0, 1.25);
        assert_eq!(series.points(), &[(500.0, 0.8), (1000.0, 1.25)]);
    }

    #[test]
    fn test_remove() {
        let mut series = MeasurementSeries::from_points("s", [(1.0, 1.0), (2.0, 2.0)]);
        assert_eq!(series.remove(0), Some((1.0, 1.0)));
        assert_eq!(series.remove(5), None);
        assert_eq!(series.len(), 1);
        assert!(MeasurementSeries::new("empty").domain().is_none());
    }

    #[test]
    fn test_group_by_key() {
        let rows = vec![
            (3000.0, 100.0, 1.5),
            (1000.0, 200.0, 0.4),
            (1000.0, 100.0, 0.5),
            (3000.0, 200.0, 1.2),
            (2000.0, 100.0, 1.0),
        ];
        let groups = group_by_key(rows);
        let keys: Vec<f64> = groups.iter().map(|g| g.0).collect();
        assert_eq!(keys, vec![1000.0, 2000.0, 3000.0]);
        assert_eq!(groups[0].1.points(), &[(100.0, 0.5), (200.0, 0.4)]);
        assert_eq!(groups[0].1.label, "1000");
        assert_eq!(groups[1].1.len(), 1);
    }

    #[test]
    fn test_paired_series_skip_missing_values() {
        let mut paired = PairedMeasurements::new("T1", "T2");
        paired.push(200.0, Some(1.0), None);
        paired.push(100.0, Some(2.0), Some(2.5));
        paired.push(300.0, None, Some(3.0));

        assert_eq!(paired.series_a().points(), &[(100.0, 2.0), (200.0, 1.0)]);
        assert_eq!(paired.series_b().points(), &[(100.0, 2.5), (300.0, 3.0)]);
        assert_eq!(paired.domain(), Some((100.0, 300.0)));
    }

    #[test]
    fn test_crossing() {
        let mut paired = PairedMeasurements::new("up", "down");
        for x in [-2.0, -1.0, 0.0, 1.0, 2.0] {
            paired.push(x, Some(x * x), Some(4.0 - x * x));
        }
        let crossing = paired.crossing().unwrap();
        // Both roots lie in [-2, 2]; the smaller one wins
        assert!((crossing.intersection.x + 2f64.sqrt()).abs() < 1e-9);
        assert!((crossing.intersection.y - 2.0).abs() < 1e-9);
        assert!(crossing.fit_a.mse < 1e-18);
    }

    #[test]
    fn test_crossing_needs_enough_points() {
        let mut paired = PairedMeasurements::new("up", "down");
        paired.push(1.0, Some(1.0), Some(2.0));
        paired.push(2.0, Some(4.0), Some(3.0));
        let err = paired.crossing().unwrap_err();
        assert!(matches!(err.root(), DaqError::InsufficientData(_)));
    }
}

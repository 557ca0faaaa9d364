//! Conformance reporting: sample trace, aggregate error metrics, verdict.
//!
//! Everything here is a pure function of its inputs. Metrics walk the
//! logical lanes of the blocked layout only, so padding never reaches a sum.

use std::fmt::Write as _;

use serde::Serialize;

use crate::error::{HarnessError, Result};
use crate::fixed::FixedScalar;
use crate::loader::LoadSummary;
use crate::tensor::BlockedTensor;

/// Header printed above the sample trace.
pub const TRACE_HEADER: &str = "Sample of values from x vs. reference:";

/// Aggregate error of one computed tensor against its reference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ErrorMetrics {
    pub mse: f64,
    pub mae: f64,
    pub max_abs_error: f64,
    /// Logical lanes compared (`num_patches × feature_dim`).
    pub elements: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    pub fn passed(self) -> bool {
        self == Self::Pass
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Fail => write!(f, "FAIL"),
        }
    }
}

/// `Pass` iff `mse <= threshold`. A NaN error never passes.
pub fn verdict(mse: f64, threshold: f64) -> Verdict {
    if mse <= threshold {
        Verdict::Pass
    } else {
        Verdict::Fail
    }
}

/// MSE, MAE and max absolute error over every valid lane.
///
/// # Errors
///
/// [`HarnessError::LayoutMismatch`] if the tensors use different layouts.
pub fn aggregate_error<T: FixedScalar>(
    computed: &BlockedTensor<T>,
    reference: &BlockedTensor<T>,
) -> Result<ErrorMetrics> {
    let layout = computed.layout();
    if layout != reference.layout() {
        return Err(HarnessError::LayoutMismatch(format!(
            "computed {layout:?} vs reference {:?}",
            reference.layout()
        )));
    }
    let mut sq = 0.0f64;
    let mut abs = 0.0f64;
    let mut max_abs = 0.0f64;
    for lane in layout.lanes() {
        let error = reference.at_lane(lane).to_f64() - computed.at_lane(lane).to_f64();
        sq += error * error;
        abs += error.abs();
        max_abs = max_abs.max(error.abs());
    }
    let elements = layout.logical_len();
    let n = elements as f64;
    Ok(ErrorMetrics {
        mse: sq / n,
        mae: abs / n,
        max_abs_error: max_abs,
        elements,
    })
}

/// Paired computed/reference rows for the leading patches and features.
///
/// Limits are clamped to the tensor's dimensions. Each value is printed with
/// 8 decimals, left-aligned in a field of 9 (10 when negative) with a
/// leading space in place of a sign for non-negative values.
///
/// # Errors
///
/// [`HarnessError::LayoutMismatch`] if the tensors use different layouts.
pub fn sample_trace<T: FixedScalar>(
    computed: &BlockedTensor<T>,
    reference: &BlockedTensor<T>,
    patch_limit: usize,
    dim_limit: usize,
) -> Result<String> {
    let layout = computed.layout();
    if layout != reference.layout() {
        return Err(HarnessError::LayoutMismatch(format!(
            "computed {layout:?} vs reference {:?}",
            reference.layout()
        )));
    }
    let patches = patch_limit.min(layout.num_patches);
    let dims = dim_limit.min(layout.feature_dim);

    let mut out = String::new();
    for patch in 0..patches {
        trace_row(&mut out, computed, patch, dims, patches);
        out.push_str("    ");
        trace_row(&mut out, reference, patch, dims, patches);
        out.push('\n');
    }
    Ok(out)
}

fn trace_row<T: FixedScalar>(
    out: &mut String,
    tensor: &BlockedTensor<T>,
    patch: usize,
    dims: usize,
    patches: usize,
) {
    out.push_str(if patch == 0 { "[[" } else { " [" });
    for lane in tensor.layout().lanes_limited(patch + 1, dims).skip(patch * dims) {
        let value = tensor.at_lane(lane).to_f64();
        out.push_str(&format_value(value));
        if lane.feature != dims - 1 {
            out.push_str(", ");
        }
    }
    out.push_str(if patch == patches - 1 { "]]" } else { "]," });
}

/// One trace cell.
pub fn format_value(value: f64) -> String {
    let mut s = String::new();
    if value >= 0.0 {
        s.push(' ');
    }
    let width = if value < 0.0 { 10 } else { 9 };
    let _ = write!(s, "{value:<width$.8}");
    s
}

/// Result for one image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageReport {
    pub image: usize,
    pub metrics: ErrorMetrics,
    pub verdict: Verdict,
}

/// Full outcome of a conformance run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConformanceReport {
    pub engine: String,
    pub threshold: f64,
    pub images: Vec<ImageReport>,
    /// `Pass` only when every image passes.
    pub verdict: Verdict,
    pub load: LoadSummary,
    /// Sample trace of image 0.
    pub trace: String,
}

impl ConformanceReport {
    pub fn new(
        engine: impl Into<String>,
        threshold: f64,
        metrics: &[ErrorMetrics],
        load: LoadSummary,
        trace: String,
    ) -> Self {
        let images: Vec<ImageReport> = metrics
            .iter()
            .enumerate()
            .map(|(image, m)| ImageReport {
                image,
                metrics: *m,
                verdict: verdict(m.mse, threshold),
            })
            .collect();
        let overall = if !images.is_empty() && images.iter().all(|i| i.verdict.passed()) {
            Verdict::Pass
        } else {
            Verdict::Fail
        };
        Self {
            engine: engine.into(),
            threshold,
            images,
            verdict: overall,
            load,
            trace,
        }
    }

    pub fn passed(&self) -> bool {
        self.verdict.passed()
    }

    /// Console form: trace header, trace, blank line, then `MSE:`/`MAE:` of
    /// image 0. Further images get one summary line each.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str(TRACE_HEADER);
        out.push('\n');
        out.push_str(&self.trace);
        out.push('\n');
        if let Some(first) = self.images.first() {
            let _ = writeln!(out, "MSE: {:.8}", first.metrics.mse);
            let _ = writeln!(out, "MAE: {:.8}", first.metrics.mae);
        }
        for img in self.images.iter().skip(1) {
            let _ = writeln!(
                out,
                "image {}: MSE: {:.8} MAE: {:.8} {}",
                img.image, img.metrics.mse, img.metrics.mae, img.verdict
            );
        }
        out
    }

    /// # Errors
    ///
    /// [`HarnessError::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::{Activation, FixedScalar};
    use crate::layout::BlockLayout;

    fn tensor(layout: BlockLayout, f: impl Fn(usize, usize) -> f64) -> BlockedTensor<Activation> {
        let mut t = BlockedTensor::zeros(layout);
        for p in 0..layout.num_patches {
            let row: Vec<f64> = (0..layout.feature_dim).map(|d| f(p, d)).collect();
            t.write_patch(p, &row);
        }
        t
    }

    #[test]
    fn format_value_widths() {
        assert_eq!(format_value(0.5), " 0.50000000");
        assert_eq!(format_value(-0.5), "-0.50000000");
        assert_eq!(format_value(0.0), " 0.00000000");
        assert_eq!(format_value(12.25), " 12.25000000");
    }

    #[test]
    fn trace_layout_for_two_patches() {
        let l = BlockLayout::new(3, 5, 4);
        let c = tensor(l, |p, d| (p * 10 + d) as f64 * 0.25);
        let r = tensor(l, |_, _| -1.0);
        let trace = sample_trace(&c, &r, 2, 2).unwrap();
        let expected = "[[ 0.00000000,  0.25000000],    [[-1.00000000, -1.00000000],\n \
                        [ 2.50000000,  2.75000000]]     [-1.00000000, -1.00000000]]\n";
        assert_eq!(trace, expected);
    }

    #[test]
    fn trace_crosses_block_boundary_in_logical_order() {
        let l = BlockLayout::new(1, 6, 4);
        let c = tensor(l, |_, d| d as f64);
        let trace = sample_trace(&c, &c, 1, 6).unwrap();
        assert!(trace.starts_with(
            "[[ 0.00000000,  1.00000000,  2.00000000,  3.00000000,  4.00000000,  5.00000000]]"
        ));
    }

    #[test]
    fn trace_limits_are_clamped() {
        let l = BlockLayout::new(2, 3, 4);
        let c = tensor(l, |_, _| 0.0);
        let trace = sample_trace(&c, &c, 5, 5).unwrap();
        assert_eq!(trace.lines().count(), 2);
        // three computed and three reference values; feature_dim clamps the limit
        let first = trace.lines().next().unwrap();
        assert_eq!(first.matches("0.00000000").count(), 6);
        assert!(first.starts_with("[[") && first.ends_with("],"));
    }

    #[test]
    fn zero_limits_print_nothing() {
        let l = BlockLayout::new(2, 3, 4);
        let c = tensor(l, |_, _| 0.0);
        assert_eq!(sample_trace(&c, &c, 0, 3).unwrap(), "");
    }

    #[test]
    fn identical_tensors_have_zero_error() {
        let l = BlockLayout::new(4, 7, 4);
        let c = tensor(l, |p, d| (p as f64 - d as f64) * 0.1);
        let m = aggregate_error(&c, &c).unwrap();
        assert_eq!(m.mse, 0.0);
        assert_eq!(m.mae, 0.0);
        assert_eq!(m.elements, 28);
        assert_eq!(verdict(m.mse, 0.1), Verdict::Pass);
    }

    #[test]
    fn padding_lanes_never_reach_metrics() {
        let l = BlockLayout::new(2, 5, 4);
        let c = tensor(l, |p, d| (p * 5 + d) as f64 * 0.25);
        let r = tensor(l, |p, d| (p * 5 + d) as f64 * 0.25 + 0.5);
        let clean = aggregate_error(&c, &r).unwrap();

        // features 5..8 of every patch are padding
        let mut dirty = c.clone();
        for (i, v) in dirty.storage_mut().iter_mut().enumerate() {
            if i % l.padded_dim() >= l.feature_dim {
                *v = Activation::from_f64(100.0);
            }
        }
        assert!(!dirty.padding_is_clear());
        let m = aggregate_error(&dirty, &r).unwrap();
        assert_eq!(m.elements, 10);
        assert_eq!(m, clean);
        assert_eq!(m.mse, 0.25);
        assert_eq!(m.mae, 0.5);
        assert_eq!(
            sample_trace(&dirty, &r, 2, 8).unwrap(),
            sample_trace(&c, &r, 2, 8).unwrap()
        );
    }

    #[test]
    fn verdict_boundary_is_inclusive() {
        assert_eq!(verdict(0.1, 0.1), Verdict::Pass);
        assert_eq!(verdict(0.1 + 1e-12, 0.1), Verdict::Fail);
        assert_eq!(verdict(f64::NAN, 0.1), Verdict::Fail);
    }

    #[test]
    fn layout_mismatch_is_an_error() {
        let a = tensor(BlockLayout::new(1, 4, 4), |_, _| 0.0);
        let b = tensor(BlockLayout::new(1, 4, 2), |_, _| 0.0);
        assert!(aggregate_error(&a, &b).is_err());
        assert!(sample_trace(&a, &b, 1, 1).is_err());
    }

    fn metrics(mse: f64) -> ErrorMetrics {
        ErrorMetrics {
            mse,
            mae: mse.sqrt(),
            max_abs_error: mse.sqrt(),
            elements: 10,
        }
    }

    fn report(engine: &str, images: &[ErrorMetrics], trace: String) -> ConformanceReport {
        ConformanceReport::new(engine, 0.1, images, LoadSummary::default(), trace)
    }

    #[test]
    fn overall_verdict_needs_every_image() {
        let r = report("e", &[metrics(0.0), metrics(0.2)], String::new());
        assert_eq!(r.images[0].verdict, Verdict::Pass);
        assert_eq!(r.images[1].verdict, Verdict::Fail);
        assert!(!r.passed());
        let r = report("e", &[metrics(0.0), metrics(0.1)], String::new());
        assert!(r.passed());
    }

    #[test]
    fn text_report_prints_metrics_with_eight_decimals() {
        let r = report("e", &[metrics(0.0)], "[[ ]]\n".to_string());
        let text = r.render_text();
        assert!(text.starts_with(TRACE_HEADER));
        assert!(text.contains("[[ ]]\n\nMSE: 0.00000000\nMAE: 0.00000000\n"));
    }

    #[test]
    fn json_report_names_verdicts() {
        let r = report("reference", &[metrics(0.04)], String::new());
        let json: serde_json::Value = serde_json::from_str(&r.to_json().unwrap()).unwrap();
        assert_eq!(json["verdict"], "PASS");
        assert_eq!(json["engine"], "reference");
        assert_eq!(json["images"][0]["metrics"]["elements"], 10);
    }
}

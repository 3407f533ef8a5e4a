//! Manual-vs-AI comparison statistics over submissions that carry both
//! totals. Read-only, so it stays available after an exam is evaluated.

use serde::Serialize;

use crate::db::models::Submission;

const TOP_DISCREPANCIES: usize = 10;
const DISTRIBUTION_BUCKETS: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub(crate) struct Discrepancy {
    pub(crate) submission_id: String,
    pub(crate) respondent_name: Option<String>,
    pub(crate) manual_points: f64,
    pub(crate) ai_points: f64,
    pub(crate) diff: f64,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct DistributionBucket {
    pub(crate) range: String,
    pub(crate) manual_count: usize,
    pub(crate) ai_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ComparisonStats {
    pub(crate) compared_count: usize,
    pub(crate) manual_mean: f64,
    pub(crate) ai_mean: f64,
    pub(crate) manual_std_dev: f64,
    pub(crate) ai_std_dev: f64,
    pub(crate) correlation: f64,
    pub(crate) mean_abs_diff: f64,
    pub(crate) discrepancies: Vec<Discrepancy>,
    pub(crate) distribution: Vec<DistributionBucket>,
}

pub(crate) fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

pub(crate) fn std_dev(data: &[f64], mean: f64) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let avg_sq_diff =
        data.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / data.len() as f64;
    avg_sq_diff.sqrt()
}

/// Pearson correlation; degenerate variance (all-equal scores) reports 1.0
/// so identical graders read as perfect agreement.
pub(crate) fn correlation(first: &[f64], second: &[f64]) -> f64 {
    if first.len() != second.len() || first.is_empty() {
        return 0.0;
    }

    let mean_first = mean(first);
    let mean_second = mean(second);
    let mut numerator = 0.0;
    let mut sum_sq_first = 0.0;
    let mut sum_sq_second = 0.0;

    for (a, b) in first.iter().zip(second) {
        let diff_first = a - mean_first;
        let diff_second = b - mean_second;
        numerator += diff_first * diff_second;
        sum_sq_first += diff_first.powi(2);
        sum_sq_second += diff_second.powi(2);
    }

    let denominator = sum_sq_first.sqrt() * sum_sq_second.sqrt();
    if denominator == 0.0 {
        1.0
    } else {
        numerator / denominator
    }
}

pub(crate) fn compute(
    submissions: &[Submission],
    max_total_points: Option<f64>,
) -> ComparisonStats {
    let compared: Vec<(&Submission, f64, f64)> = submissions
        .iter()
        .filter_map(|submission| {
            match (submission.manual_total_points, submission.ai_total_points) {
                (Some(manual), Some(ai)) => Some((submission, manual, ai)),
                _ => None,
            }
        })
        .collect();

    let manual: Vec<f64> = compared.iter().map(|(_, manual, _)| *manual).collect();
    let ai: Vec<f64> = compared.iter().map(|(_, _, ai)| *ai).collect();

    let manual_mean = mean(&manual);
    let ai_mean = mean(&ai);

    let mut discrepancies: Vec<Discrepancy> = compared
        .iter()
        .map(|(submission, manual, ai)| Discrepancy {
            submission_id: submission.id.clone(),
            respondent_name: submission.respondent_name.clone(),
            manual_points: *manual,
            ai_points: *ai,
            diff: manual - ai,
        })
        .collect();
    discrepancies
        .sort_by(|a, b| b.diff.abs().partial_cmp(&a.diff.abs()).unwrap_or(std::cmp::Ordering::Equal));
    discrepancies.truncate(TOP_DISCREPANCIES);

    let scale = max_total_points
        .filter(|max| *max > 0.0)
        .unwrap_or_else(|| manual.iter().chain(&ai).copied().fold(0.0, f64::max).max(1.0));
    let distribution = distribution_buckets(&manual, &ai, scale);

    let mean_abs_diff = if compared.is_empty() {
        0.0
    } else {
        compared.iter().map(|(_, manual, ai)| (manual - ai).abs()).sum::<f64>()
            / compared.len() as f64
    };

    ComparisonStats {
        compared_count: compared.len(),
        manual_mean,
        ai_mean,
        manual_std_dev: std_dev(&manual, manual_mean),
        ai_std_dev: std_dev(&ai, ai_mean),
        correlation: correlation(&manual, &ai),
        mean_abs_diff,
        discrepancies,
        distribution,
    }
}

fn distribution_buckets(manual: &[f64], ai: &[f64], scale: f64) -> Vec<DistributionBucket> {
    let bucket_width = 100.0 / DISTRIBUTION_BUCKETS as f64;

    (0..DISTRIBUTION_BUCKETS)
        .map(|index| {
            let low = index as f64 * bucket_width;
            let high = low + bucket_width;
            let in_bucket = |points: &&f64| {
                let percent = (**points / scale) * 100.0;
                if index == DISTRIBUTION_BUCKETS - 1 {
                    percent >= low && percent <= 100.0
                } else {
                    percent >= low && percent < high
                }
            };

            DistributionBucket {
                range: format!("{}-{}%", low as u32, high as u32),
                manual_count: manual.iter().filter(in_bucket).count(),
                ai_count: ai.iter().filter(in_bucket).count(),
            }
        })
        .collect()
}

// Interval planning: which pieces of a molecule get aligned, in which
// orientation, and which of them anchors concordant realignment.

use crate::params::{MapParams, TemplatePolicy};
use crate::reads::SmrtRead;
use crate::regions::{ReadInterval, RegionTable};

/// Ordered set of query intervals to align for one molecule. `directions`
/// runs in lock-step with `intervals`; after planning, the template (when
/// present) always has direction 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkPlan {
    pub intervals: Vec<ReadInterval>,
    pub directions: Vec<u8>,
    pub template_idx: Option<usize>,
}

impl WorkPlan {
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }
}

/// Neighboring subreads of one molecule read in opposite directions, so
/// directions alternate with index parity.
pub fn create_directions(n: usize) -> Vec<u8> {
    (0..n).map(|i| (i % 2) as u8).collect()
}

/// Trim intervals to the high-quality range, dropping (in lock-step with
/// their directions) the ones that end up shorter than `min_len`. Returns
/// the index of the left-most longest surviving interval.
fn trim_to_hq(
    intervals: &mut Vec<ReadInterval>,
    directions: &mut Vec<u8>,
    hq_start: usize,
    hq_end: usize,
    min_len: usize,
) -> Option<usize> {
    let min_len = min_len.max(1);
    let mut kept_intervals = Vec::with_capacity(intervals.len());
    let mut kept_directions = Vec::with_capacity(directions.len());

    for (iv, dir) in intervals.iter().zip(directions.iter()) {
        let start = iv.start.max(hq_start);
        let end = iv.end.min(hq_end);
        if end > start && end - start >= min_len {
            kept_intervals.push(ReadInterval::new(start, end));
            kept_directions.push(*dir);
        }
    }

    *intervals = kept_intervals;
    *directions = kept_directions;

    let mut longest: Option<usize> = None;
    for (i, iv) in intervals.iter().enumerate() {
        if longest.map(|l| iv.len() > intervals[l].len()).unwrap_or(true) {
            longest = Some(i);
        }
    }
    longest
}

/// A subread is a full pass when adapters bracket it on both sides.
pub fn is_full_pass(iv: &ReadInterval, adapters: &[ReadInterval]) -> bool {
    adapters.iter().any(|a| a.end <= iv.start) && adapters.iter().any(|a| a.start >= iv.end)
}

/// Apply a template policy over the full-pass subreads. `None` means the
/// policy found nothing and the caller keeps the default template.
pub fn choose_template(
    intervals: &[ReadInterval],
    adapters: &[ReadInterval],
    policy: TemplatePolicy,
) -> Option<usize> {
    let full: Vec<usize> = (0..intervals.len())
        .filter(|&i| is_full_pass(&intervals[i], adapters))
        .collect();
    if full.is_empty() {
        return None;
    }

    match policy {
        TemplatePolicy::LongestSubread => full
            .iter()
            .copied()
            .max_by(|&a, &b| {
                intervals[a]
                    .len()
                    .cmp(&intervals[b].len())
                    .then(b.cmp(&a)) // left-most wins ties
            }),
        TemplatePolicy::TypicalSubread => {
            let mut lengths: Vec<usize> = full.iter().map(|&i| intervals[i].len()).collect();
            lengths.sort_unstable();
            let target = 2 * lengths[lengths.len() / 2];
            nearest_by_doubled_length(intervals, &full, target)
        }
        TemplatePolicy::MedianSubread => {
            let mut lengths: Vec<usize> = full.iter().map(|&i| intervals[i].len()).collect();
            lengths.sort_unstable();
            // Doubled interpolated median keeps the comparison in integers.
            let target = lengths[(lengths.len() - 1) / 2] + lengths[lengths.len() / 2];
            nearest_by_doubled_length(intervals, &full, target)
        }
    }
}

fn nearest_by_doubled_length(
    intervals: &[ReadInterval],
    full: &[usize],
    doubled_target: usize,
) -> Option<usize> {
    full.iter()
        .copied()
        .min_by_key(|&i| {
            let doubled = 2 * intervals[i].len();
            let dist = doubled.abs_diff(doubled_target);
            (dist, i)
        })
}

/// Build the work plan for a molecule: derive subread intervals (whole read
/// when region info is absent), assign parity directions, trim to the
/// high-quality range, pick the template, and flip directions so the
/// template aligns forward.
pub fn build_work_plan(
    read: &SmrtRead,
    regions: Option<&RegionTable>,
    params: &MapParams,
) -> WorkPlan {
    let len = read.len();
    let (mut intervals, adapters) = match regions {
        Some(rt) => (
            rt.subread_intervals(read.hole_number, len, params.by_adapter),
            rt.adapter_intervals(read.hole_number),
        ),
        None => (vec![ReadInterval::new(0, len)], Vec::new()),
    };

    let mut directions = create_directions(intervals.len());

    let hq_start = read.lq_prefix.min(len);
    let hq_end = len.saturating_sub(read.lq_suffix).max(hq_start);
    let longest = trim_to_hq(
        &mut intervals,
        &mut directions,
        hq_start,
        hq_end,
        params.min_subread_length,
    );

    let template_idx = match longest {
        Some(default_idx) => Some(
            choose_template(&intervals, &adapters, params.concordant_template)
                .unwrap_or(default_idx),
        ),
        None => None,
    };

    if let Some(t) = template_idx {
        if directions[t] == 1 {
            for d in &mut directions {
                *d ^= 1;
            }
        }
    }

    WorkPlan {
        intervals,
        directions,
        template_idx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directions_alternate() {
        assert_eq!(create_directions(4), vec![0, 1, 0, 1]);
        assert!(create_directions(0).is_empty());
    }

    #[test]
    fn test_trim_drops_in_lock_step() {
        let mut intervals = vec![
            ReadInterval::new(0, 100),
            ReadInterval::new(110, 500),
            ReadInterval::new(510, 530),
        ];
        let mut dirs = create_directions(3);
        let longest = trim_to_hq(&mut intervals, &mut dirs, 50, 520, 40);
        // First interval shrinks to [50,100), second to [110,500); the third
        // shrinks below the length cutoff and takes its direction with it.
        assert_eq!(
            intervals,
            vec![ReadInterval::new(50, 100), ReadInterval::new(110, 500)]
        );
        assert_eq!(dirs, vec![0, 1]);
        assert_eq!(longest, Some(1));
    }

    #[test]
    fn test_full_pass_requires_adapters_on_both_sides() {
        let adapters = vec![ReadInterval::new(200, 210), ReadInterval::new(1010, 1020)];
        assert!(is_full_pass(&ReadInterval::new(210, 1010), &adapters));
        assert!(!is_full_pass(&ReadInterval::new(0, 200), &adapters));
        assert!(!is_full_pass(&ReadInterval::new(1020, 1500), &adapters));
    }
}

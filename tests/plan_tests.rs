// Interval planner behavior over region-table annotated molecules.

use std::fs;
use std::path::PathBuf;

use smrt_align::params::{MapParams, TemplatePolicy};
use smrt_align::plan::build_work_plan;
use smrt_align::reads::SmrtRead;
use smrt_align::regions::RegionTable;

fn region_table(test_name: &str, content: &str) -> RegionTable {
    let dir = PathBuf::from(format!("target/test_plan_{test_name}"));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join("regions.tsv");
    fs::write(&path, content).unwrap();
    let table = RegionTable::load(&path).unwrap();
    fs::remove_dir_all(&dir).ok();
    table
}

fn molecule(hole: u32, len: usize) -> SmrtRead {
    SmrtRead {
        title: format!("m0/{hole}"),
        movie: "m0".into(),
        hole_number: hole,
        seq: vec![b'A'; len],
        qual: None,
        q_start: 0,
        q_end: 0,
        lq_prefix: 0,
        lq_suffix: 0,
        hq_score: 800,
    }
}

#[test]
fn test_single_subread_plan() {
    // One subread covering the whole kilobase molecule.
    let table = region_table(
        "single",
        "1\tInsert\t0\t1000\n1\tHQ\t0\t1000\t900\n",
    );
    let read = molecule(1, 1000);
    let mut params = MapParams::default();
    params.min_subread_length = 100;

    let plan = build_work_plan(&read, Some(&table), &params);
    assert_eq!(plan.len(), 1);
    assert_eq!((plan.intervals[0].start, plan.intervals[0].end), (0, 1000));
    assert_eq!(plan.template_idx, Some(0));
    assert_eq!(plan.directions, vec![0]);
}

fn four_subread_table(test_name: &str) -> RegionTable {
    // Lengths 200, 800, 600, 400 with adapters between neighbors.
    region_table(
        test_name,
        "2\tInsert\t0\t200\n\
         2\tAdapter\t200\t210\n\
         2\tInsert\t210\t1010\n\
         2\tAdapter\t1010\t1020\n\
         2\tInsert\t1020\t1620\n\
         2\tAdapter\t1620\t1630\n\
         2\tInsert\t1630\t2030\n\
         2\tHQ\t0\t2030\t900\n",
    )
}

#[test]
fn test_template_is_longest_and_directions_flip() {
    let table = four_subread_table("longest");
    let read = molecule(2, 2030);
    let params = MapParams::default();

    let plan = build_work_plan(&read, Some(&table), &params);
    assert_eq!(plan.len(), 4);
    // The 800 bp subread wins; its parity direction was 1, so every
    // direction flips to make the template forward.
    assert_eq!(plan.template_idx, Some(1));
    assert_eq!(plan.directions, vec![1, 0, 1, 0]);
    assert_eq!(plan.directions[plan.template_idx.unwrap()], 0);
}

#[test]
fn test_median_template_policy() {
    // Adapters on the outer flanks as well, so all four subreads are full
    // passes: lengths 200, 800, 600, 400, interpolated median 500, and the
    // nearest full-pass length is 600 at index 2.
    let table = region_table(
        "median",
        "3\tAdapter\t0\t10\n\
         3\tInsert\t10\t210\n\
         3\tAdapter\t210\t220\n\
         3\tInsert\t220\t1020\n\
         3\tAdapter\t1020\t1030\n\
         3\tInsert\t1030\t1630\n\
         3\tAdapter\t1630\t1640\n\
         3\tInsert\t1640\t2040\n\
         3\tAdapter\t2040\t2050\n\
         3\tHQ\t0\t2050\t900\n",
    );
    let read = molecule(3, 2050);
    let mut params = MapParams::default();
    params.concordant_template = TemplatePolicy::MedianSubread;

    let plan = build_work_plan(&read, Some(&table), &params);
    assert_eq!(plan.template_idx, Some(2));
    assert_eq!(plan.directions[2], 0);
}

#[test]
fn test_hq_trimming_enforces_bounds_and_length() {
    let table = region_table(
        "trim",
        "4\tInsert\t0\t300\n\
         4\tAdapter\t300\t310\n\
         4\tInsert\t310\t700\n\
         4\tHQ\t150\t650\t700\n",
    );
    let read = {
        let mut r = molecule(4, 700);
        r.lq_prefix = 150;
        r.lq_suffix = 50;
        r
    };
    let mut params = MapParams::default();
    params.min_subread_length = 200;

    let plan = build_work_plan(&read, Some(&table), &params);
    // [0,300) trims to [150,300) and falls under the length cutoff; its
    // direction disappears in lock-step.
    assert_eq!(plan.len(), 1);
    assert_eq!((plan.intervals[0].start, plan.intervals[0].end), (310, 650));
    for iv in &plan.intervals {
        assert!(iv.start < iv.end && iv.end <= read.len());
        assert!(iv.len() >= params.min_subread_length);
        assert!(iv.start >= 150 && iv.end <= 650);
    }
}

#[test]
fn test_planning_is_idempotent() {
    let table = four_subread_table("idempotent");
    let read = molecule(2, 2030);
    let params = MapParams::default();

    let first = build_work_plan(&read, Some(&table), &params);
    let second = build_work_plan(&read, Some(&table), &params);
    assert_eq!(first, second);
}

#[test]
fn test_no_region_info_plans_whole_read() {
    let read = molecule(9, 500);
    let params = MapParams::default();
    let plan = build_work_plan(&read, None, &params);
    assert_eq!(plan.len(), 1);
    assert_eq!((plan.intervals[0].start, plan.intervals[0].end), (0, 500));
    assert_eq!(plan.template_idx, Some(0));
}

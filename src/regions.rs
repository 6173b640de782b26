// Per-molecule region annotations: insert (subread) intervals, adapter
// intervals and the high-quality region, keyed by hole number.
//
// The sidecar format is a plain tab-separated table, one region per line:
//
//   holeNumber  type  start  end  [score]
//
// where type is one of Insert, Adapter, HQ. Lines starting with '#' are
// ignored; malformed lines are skipped with a warning.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::MapError;

/// Half-open interval into a molecule. Invariant: start < end <= read length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadInterval {
    pub start: usize,
    pub end: usize,
}

impl ReadInterval {
    pub fn new(start: usize, end: usize) -> Self {
        ReadInterval { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

#[derive(Debug, Default, Clone)]
struct ZmwRegions {
    inserts: Vec<ReadInterval>,
    adapters: Vec<ReadInterval>,
    hq: Option<(usize, usize, i32)>,
}

/// Region oracle for one read file. Read-only after load.
#[derive(Debug, Default)]
pub struct RegionTable {
    map: HashMap<u32, ZmwRegions>,
}

impl RegionTable {
    pub fn load(path: &Path) -> Result<Self, MapError> {
        let file = File::open(path).map_err(|e| MapError::open(path, e))?;
        let reader = BufReader::new(file);
        let mut table = RegionTable::default();

        for (lineno, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| MapError::read(path, e))?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Err(msg) = table.add_line(line) {
                log::warn!(
                    "Skipping region table line {} of {}: {}",
                    lineno + 1,
                    path.display(),
                    msg
                );
            }
        }
        Ok(table)
    }

    fn add_line(&mut self, line: &str) -> Result<(), String> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            return Err("expected at least 4 fields".to_string());
        }
        let hole: u32 = fields[0]
            .parse()
            .map_err(|_| format!("bad hole number '{}'", fields[0]))?;
        let start: usize = fields[2]
            .parse()
            .map_err(|_| format!("bad start '{}'", fields[2]))?;
        let end: usize = fields[3]
            .parse()
            .map_err(|_| format!("bad end '{}'", fields[3]))?;
        let score: i32 = match fields.get(4) {
            Some(s) => s.parse().map_err(|_| format!("bad score '{}'", s))?,
            None => 0,
        };

        let entry = self.map.entry(hole).or_default();
        match fields[1] {
            "Insert" | "insert" => entry.inserts.push(ReadInterval::new(start, end)),
            "Adapter" | "adapter" => entry.adapters.push(ReadInterval::new(start, end)),
            "HQ" | "hq" | "HQRegion" => {
                if entry.hq.is_none() {
                    entry.hq = Some((start, end, score));
                }
            }
            other => return Err(format!("unknown region type '{}'", other)),
        }
        Ok(())
    }

    pub fn has_hole(&self, hole: u32) -> bool {
        self.map.contains_key(&hole)
    }

    /// Subread intervals for a molecule, sorted by start. When the hole is
    /// unknown the whole read is the single subread. With `by_adapter` the
    /// intervals are derived as the gaps between adapters instead of the
    /// recorded insert regions.
    pub fn subread_intervals(
        &self,
        hole: u32,
        read_len: usize,
        by_adapter: bool,
    ) -> Vec<ReadInterval> {
        let whole = vec![ReadInterval::new(0, read_len)];
        let Some(regions) = self.map.get(&hole) else {
            return whole;
        };

        let mut intervals = if by_adapter {
            let mut adapters = regions.adapters.clone();
            adapters.sort_by_key(|a| a.start);
            let mut out = Vec::new();
            let mut cursor = 0usize;
            for a in adapters {
                if a.start > cursor {
                    out.push(ReadInterval::new(cursor, a.start.min(read_len)));
                }
                cursor = cursor.max(a.end);
            }
            if cursor < read_len {
                out.push(ReadInterval::new(cursor, read_len));
            }
            out
        } else {
            regions
                .inserts
                .iter()
                .map(|iv| ReadInterval::new(iv.start, iv.end.min(read_len)))
                .collect()
        };

        intervals.retain(|iv| !iv.is_empty());
        intervals.sort_by_key(|iv| iv.start);
        if intervals.is_empty() {
            return whole;
        }
        intervals
    }

    pub fn adapter_intervals(&self, hole: u32) -> Vec<ReadInterval> {
        let mut adapters = self
            .map
            .get(&hole)
            .map(|r| r.adapters.clone())
            .unwrap_or_default();
        adapters.sort_by_key(|a| a.start);
        adapters
    }

    /// High-quality region boundaries and score; (0, 0, 0) when unknown.
    pub fn hq_region(&self, hole: u32) -> (usize, usize, i32) {
        self.map
            .get(&hole)
            .and_then(|r| r.hq)
            .unwrap_or((0, 0, 0))
    }

    /// Overwrite bases outside the high-quality region with 'N'. Returns
    /// false when the molecule has region info but an empty HQ region (such
    /// molecules are skipped). A hole without region info is left untouched.
    pub fn mask(&self, hole: u32, seq: &mut [u8]) -> bool {
        let Some(regions) = self.map.get(&hole) else {
            return true;
        };
        let Some((hq_start, hq_end, _)) = regions.hq else {
            return false;
        };
        if hq_start >= hq_end || hq_start >= seq.len() {
            return false;
        }
        let hq_end = hq_end.min(seq.len());
        for b in &mut seq[..hq_start] {
            *b = b'N';
        }
        for b in &mut seq[hq_end..] {
            *b = b'N';
        }
        true
    }
}

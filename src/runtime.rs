// Worker runtime: a fixed pool of OS threads pulling molecules from the
// serialized Read Source and publishing bundles to the serialized Writer.
// The index handle is shared read-only; each worker owns its scratch
// buffers. A single stop flag, checked at molecule boundaries, propagates
// fatal errors.

use std::fs::File;
use std::io::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use bio::alphabets::dna;

use crate::bundle::AlignMode;
use crate::error::MapError;
use crate::index::ReferenceIndex;
use crate::kernel::MappingBuffers;
use crate::params::MapParams;
use crate::pipeline::{map_subread_intervals, map_whole_molecule, polymerase_from_subreads};
use crate::reads::{BatchUnit, NextResult, ReadSource, ZmwUnit};
use crate::seqdb;
use crate::writer::AlignmentWriter;

// Scratch buffers are dropped back to zero capacity at this cadence to curb
// fragmentation over long runs.
const BUFFER_RESET_INTERVAL: u64 = 100;

/// Load the reference and sidecars, run the worker pool, and re-raise the
/// first fatal error after all workers have joined.
pub fn run_mapping(params: &MapParams) -> Result<(), MapError> {
    let start_time = Instant::now();

    let (db, text) = seqdb::read_reference(&params.genome_file)?;
    let index = Arc::new(ReferenceIndex::prepare(
        db,
        text,
        params.sa_file.as_deref(),
        params.ctab_file.as_deref(),
        params.tuple_size,
    )?);
    let source = Arc::new(ReadSource::open(params)?);
    let writer = Arc::new(AlignmentWriter::create(params, index.seqdb())?);
    let stop = Arc::new(AtomicBool::new(false));
    let n_molecules = Arc::new(AtomicU64::new(0));
    let params = Arc::new(params.clone());

    let n_workers = params.n_proc.max(1);
    log::info!("Mapping with {} worker(s)", n_workers);

    let mut handles = Vec::with_capacity(n_workers);
    for worker_id in 0..n_workers {
        let index = Arc::clone(&index);
        let source = Arc::clone(&source);
        let writer = Arc::clone(&writer);
        let stop = Arc::clone(&stop);
        let n_molecules = Arc::clone(&n_molecules);
        let params = Arc::clone(&params);
        handles.push(thread::spawn(move || {
            map_reads(worker_id, &index, &source, &writer, &stop, &n_molecules, &params)
        }));
    }

    let mut first_err: Option<MapError> = None;
    for handle in handles {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
            Err(_) => {
                if first_err.is_none() {
                    first_err = Some(MapError::Config("a mapping worker panicked".to_string()));
                }
            }
        }
    }

    writer.finish()?;
    if let Some(e) = first_err {
        return Err(e);
    }

    log::info!(
        "Processed {} molecules in {:.2} sec",
        n_molecules.load(Ordering::Relaxed),
        start_time.elapsed().as_secs_f64()
    );
    Ok(())
}

/// One worker: loop over units of work until the source is exhausted, the
/// stop flag flips, or a fatal error occurs. In-flight molecules are never
/// interrupted; cancellation takes effect at the next molecule boundary.
fn map_reads(
    worker_id: usize,
    index: &ReferenceIndex,
    source: &ReadSource,
    writer: &AlignmentWriter,
    stop: &AtomicBool,
    n_molecules: &AtomicU64,
    params: &MapParams,
) -> Result<(), MapError> {
    let mut bufs = MappingBuffers::new();
    let mut vlog = if params.verbosity >= 4 {
        File::create(format!("{}.{}.log", std::process::id(), worker_id)).ok()
    } else {
        None
    };

    let mut num_aligned = 0u64;
    let result = loop {
        if stop.load(Ordering::Relaxed) {
            break Ok(());
        }

        let unit = match source.next() {
            Ok(u) => u,
            Err(e) => {
                stop.store(true, Ordering::Relaxed);
                break Err(e);
            }
        };

        let outcome = match unit {
            NextResult::Exhausted => break Ok(()),
            NextResult::Molecule(z) => {
                process_molecule(&z, index, writer, params, &mut bufs, vlog.as_mut())
            }
            NextResult::Batch(b) => {
                process_batch(&b, index, writer, params, &mut bufs, vlog.as_mut())
            }
        };
        if let Err(e) = outcome {
            stop.store(true, Ordering::Relaxed);
            break Err(e);
        }

        n_molecules.fetch_add(1, Ordering::Relaxed);
        num_aligned += 1;
        if num_aligned % BUFFER_RESET_INTERVAL == 0 {
            bufs.reset();
        }
    };

    // Shutdown barrier on the source mutex: the last worker to finish sees
    // a consistent source state before teardown.
    if params.n_proc > 1 {
        source.barrier();
    }
    result
}

fn process_molecule(
    unit: &ZmwUnit,
    index: &ReferenceIndex,
    writer: &AlignmentWriter,
    params: &MapParams,
    bufs: &mut MappingBuffers,
    vlog: Option<&mut File>,
) -> Result<(), MapError> {
    let read_rc = dna::revcomp(&unit.read.seq[..]);
    let is_ccs = params.uses_ccs() && unit.ccs.is_some();

    let alns = if !is_ccs && params.map_subreads_separately {
        map_subread_intervals(
            &unit.read,
            &read_rc,
            None,
            unit.regions.as_deref(),
            index,
            params,
            unit.rand_int,
            bufs,
        )
    } else {
        let ccs = if is_ccs { unit.ccs.as_ref() } else { None };
        map_whole_molecule(
            &unit.read,
            &read_rc,
            ccs,
            unit.regions.as_deref(),
            index,
            params,
            unit.rand_int,
            bufs,
        )
    };

    if let Some(f) = vlog {
        writeln!(
            f,
            "{} mode={} slots={} selected={}",
            unit.read.title,
            alns.mode.as_str(),
            alns.n_slots(),
            alns.n_selected()
        )
        .ok();
    }

    // De novo consensus alignments are reported against the consensus read
    // itself; everything else against the molecule.
    if alns.mode == AlignMode::CcsDeNovo {
        if let Some(ccs) = unit.ccs.as_ref() {
            let ccs_rc = dna::revcomp(&ccs.seq[..]);
            return writer.write_alignments(ccs, &ccs_rc, &alns, index.seqdb());
        }
    }
    writer.write_alignments(&unit.read, &read_rc, &alns, index.seqdb())
}

fn process_batch(
    batch: &BatchUnit,
    index: &ReferenceIndex,
    writer: &AlignmentWriter,
    params: &MapParams,
    bufs: &mut MappingBuffers,
    vlog: Option<&mut File>,
) -> Result<(), MapError> {
    if batch.subreads.is_empty() {
        return Ok(());
    }
    let stitched = polymerase_from_subreads(&batch.subreads);
    if stitched.is_empty() {
        return Ok(());
    }
    let stitched_rc = dna::revcomp(&stitched.seq[..]);

    let alns = map_subread_intervals(
        &stitched,
        &stitched_rc,
        Some(&batch.subreads),
        None,
        index,
        params,
        batch.rand_int,
        bufs,
    );

    if let Some(f) = vlog {
        writeln!(
            f,
            "{} mode={} slots={} selected={}",
            stitched.title,
            alns.mode.as_str(),
            alns.n_slots(),
            alns.n_selected()
        )
        .ok();
    }

    writer.write_alignments(&stitched, &stitched_rc, &alns, index.seqdb())
}

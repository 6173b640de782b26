use std::path::PathBuf;

use clap::{Parser, Subcommand};

use smrt_align::error::MapError;
use smrt_align::index::build_index_files;
use smrt_align::params::{HoleNumberRanges, MapParams, TemplatePolicy};
use smrt_align::runtime::run_mapping;

#[derive(Parser)]
#[command(name = "smrt-align")]
#[command(about = "Long-read aligner for noisy single-molecule sequencing reads", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Precompute the suffix array and tuple count table for a reference
    Index {
        /// Input FASTA file
        #[arg(value_name = "REF.FA")]
        fasta: PathBuf,

        /// Prefix for index files (default: same as FASTA)
        #[arg(short = 'p', long, value_name = "PREFIX")]
        prefix: Option<PathBuf>,

        /// Tuple size for the count table
        #[arg(long = "tupleSize", value_name = "INT", default_value_t = 8)]
        tuple_size: usize,
    },

    /// Map reads against a reference genome
    Map {
        /// Reference FASTA file (multi-contig)
        #[arg(value_name = "REF.FA")]
        genome: PathBuf,

        /// Read files: FASTA/FASTQ, optionally gzipped, or a file of
        /// filenames
        #[arg(value_name = "READS", required = true)]
        reads: Vec<PathBuf>,

        /// Precomputed suffix array from the index command
        #[arg(long = "sa", value_name = "FILE")]
        sa: Option<PathBuf>,

        /// Precomputed tuple count table from the index command
        #[arg(long = "ctab", value_name = "FILE")]
        ctab: Option<PathBuf>,

        /// Region table sidecar (file or file of filenames, 1:1 with reads)
        #[arg(long = "regionTable", value_name = "FILE")]
        region_table: Option<PathBuf>,

        /// CCS consensus sidecar (file or file of filenames, 1:1 with reads)
        #[arg(long = "ccsFofn", value_name = "FILE")]
        ccs_fofn: Option<PathBuf>,

        /// Output file (default: stdout)
        #[arg(short = 'o', long = "out", value_name = "FILE")]
        out: Option<PathBuf>,

        /// Write SAM records instead of the tabular format
        #[arg(long)]
        sam: bool,

        /// Record molecules without any selected alignment in FILE
        #[arg(long = "unaligned", value_name = "FILE")]
        unaligned: Option<PathBuf>,

        // ===== Molecule filtering =====
        /// Skip molecules shorter than INT
        #[arg(long = "minReadLength", value_name = "INT", default_value_t = 50)]
        min_read_length: usize,

        /// Drop subread intervals shorter than INT after HQ trimming
        #[arg(long = "minSubreadLength", value_name = "INT", default_value_t = 0)]
        min_subread_length: usize,

        /// Skip molecules whose high-quality region score is below INT
        #[arg(long = "minRawSubreadScore", value_name = "INT", default_value_t = 0)]
        min_raw_subread_score: i32,

        /// Skip molecules whose average base quality is below FLOAT
        #[arg(long = "minAvgQual", value_name = "FLOAT", default_value_t = 0.0)]
        min_avg_qual: f64,

        /// Skip molecules longer than INT (0 = no cap)
        #[arg(long = "maxReadLength", value_name = "INT", default_value_t = 0)]
        max_read_length: usize,

        /// Only map molecules from these hole numbers, e.g. "64,1024-2048"
        #[arg(long = "holeNumbers", value_name = "LIST")]
        hole_numbers: Option<String>,

        /// Map a Bernoulli(FLOAT) fraction of molecules
        #[arg(long = "subsample", value_name = "FLOAT", default_value_t = 1.0)]
        subsample: f64,

        // ===== Alignment =====
        /// Discard alignments scoring above INT (scores are negative)
        #[arg(long = "maxScore", value_name = "INT", allow_negative_numbers = true, default_value_t = -200)]
        max_score: i32,

        /// Report at most INT alignments per query interval
        #[arg(long = "bestn", alias = "bestN", value_name = "INT", default_value_t = 10)]
        bestn: usize,

        /// Extend at most INT seed clusters per query
        #[arg(long = "nCandidates", value_name = "INT", default_value_t = 10)]
        n_candidates: usize,

        /// Minimum exact seed length
        #[arg(long = "minMatch", value_name = "INT", default_value_t = 12)]
        min_match: usize,

        /// Retry with a sensitive parameter profile when mapping fails
        #[arg(long = "doSensitiveSearch")]
        do_sensitive_search: bool,

        // ===== Modes =====
        /// Map each subread of a molecule separately (the default)
        #[arg(long = "mapSubreadsSeparately", conflicts_with = "no_split_subreads")]
        map_subreads_separately: bool,

        /// Map the whole polymerase read instead of individual subreads
        #[arg(long = "noSplitSubreads")]
        no_split_subreads: bool,

        /// Realign all subreads of a molecule near one template subread
        #[arg(long)]
        concordant: bool,

        /// Template choice: longestsubread, typicalsubread or mediansubread
        #[arg(long = "concordantTemplate", value_name = "STR", default_value = "longestsubread")]
        concordant_template: String,

        /// Also realign each subread against the flipped orientation
        #[arg(long = "concordantAlignBothDirections")]
        concordant_align_both_directions: bool,

        /// Reference bases added on each side of a template alignment
        #[arg(long = "flankSize", value_name = "INT", default_value_t = 40)]
        flank_size: usize,

        /// Map the CCS consensus, then realign full-pass subreads
        #[arg(long = "useccs")]
        useccs: bool,

        /// Map the CCS consensus, then realign all subread fragments
        #[arg(long = "useccsall")]
        useccsall: bool,

        /// Map only the CCS consensus
        #[arg(long = "useccsdenovo")]
        useccsdenovo: bool,

        // ===== Processing =====
        /// Number of worker threads
        #[arg(long = "nproc", value_name = "INT", default_value_t = 1)]
        nproc: usize,

        /// Seed for deterministic alignment selection (0 = seed from time)
        #[arg(long = "randomSeed", value_name = "INT", default_value_t = 0)]
        random_seed: u64,

        /// Verbosity: 1=error, 2=warning, 3=info, 4+=debugging
        #[arg(short = 'v', long = "verbosity", value_name = "INT", default_value_t = 3)]
        verbosity: i32,
    },
}

fn init_logger(verbosity: i32) {
    use std::io::Write;

    let level = match verbosity {
        v if v <= 1 => log::LevelFilter::Error,
        2 => log::LevelFilter::Warn,
        3 => log::LevelFilter::Info,
        4 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format(|buf, record| match record.level() {
            log::Level::Error => writeln!(buf, "ERROR. {}", record.args()),
            log::Level::Warn => writeln!(buf, "WARNING. {}", record.args()),
            log::Level::Info => writeln!(buf, "[INFO] {} {}", buf.timestamp(), record.args()),
            _ => writeln!(buf, "[DEBUG] {}", record.args()),
        })
        .init();
}

fn fatal(err: MapError) -> ! {
    log::error!("{}", err);
    std::process::exit(1);
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Index {
            fasta,
            prefix,
            tuple_size,
        } => {
            init_logger(3);
            let idx_prefix = prefix.unwrap_or_else(|| fasta.clone());
            log::info!("Building index for reference: {}", fasta.display());
            if let Err(e) = build_index_files(&fasta, &idx_prefix, tuple_size) {
                fatal(e);
            }
            log::info!("Index building completed successfully");
        }

        Commands::Map {
            genome,
            reads,
            sa,
            ctab,
            region_table,
            ccs_fofn,
            out,
            sam,
            unaligned,
            min_read_length,
            min_subread_length,
            min_raw_subread_score,
            min_avg_qual,
            max_read_length,
            hole_numbers,
            subsample,
            max_score,
            bestn,
            n_candidates,
            min_match,
            do_sensitive_search,
            map_subreads_separately,
            no_split_subreads,
            concordant,
            concordant_template,
            concordant_align_both_directions,
            flank_size,
            useccs,
            useccsall,
            useccsdenovo,
            nproc,
            random_seed,
            verbosity,
        } => {
            init_logger(verbosity);
            log::info!("[smrt-align] started.");

            let mut params = MapParams::default();
            params.genome_file = genome;
            params.read_files = reads;
            params.sa_file = sa;
            params.ctab_file = ctab;
            params.region_table_file = region_table;
            params.ccs_fofn_file = ccs_fofn;
            params.out_file = out;
            params.print_sam = sam;
            params.unaligned_file = unaligned;

            params.min_read_length = min_read_length;
            params.min_subread_length = min_subread_length;
            params.min_raw_subread_score = min_raw_subread_score;
            params.min_avg_qual = min_avg_qual;
            params.max_read_length = max_read_length;
            params.subsample = subsample;

            params.max_score = max_score;
            params.bestn = bestn;
            params.n_candidates = n_candidates;
            params.min_match_len = min_match;
            params.do_sensitive_search = do_sensitive_search;

            // --mapSubreadsSeparately is the default; --noSplitSubreads turns
            // it off, and clap rejects the combination.
            params.map_subreads_separately = map_subreads_separately || !no_split_subreads;
            params.concordant = concordant;
            params.concordant_align_both_directions = concordant_align_both_directions;
            params.flank_size = flank_size;

            // The three CCS switches layer onto two flags: whether the
            // consensus drives mapping at all, and which passes get
            // realigned afterwards.
            params.use_ccs = useccs || useccsall || useccsdenovo;
            params.use_all_subreads_in_ccs = useccsall;
            params.use_ccs_only = useccsdenovo;

            params.random_seed = random_seed;
            params.verbosity = verbosity;

            if let Some(list) = &hole_numbers {
                match HoleNumberRanges::parse(list) {
                    Ok(ranges) => params.hole_numbers = Some(ranges),
                    Err(e) => fatal(MapError::Config(e)),
                }
            }
            match TemplatePolicy::parse(&concordant_template) {
                Ok(policy) => params.concordant_template = policy,
                Err(e) => fatal(MapError::Config(e)),
            }

            let max_workers = num_cpus::get() * 2;
            params.n_proc = nproc;
            if params.n_proc > max_workers {
                log::warn!(
                    "Worker count {} exceeds recommended maximum {}, capping at {}",
                    params.n_proc,
                    max_workers,
                    max_workers
                );
                params.n_proc = max_workers;
            }

            if let Err(e) = params.make_sane() {
                fatal(e);
            }
            if let Err(e) = run_mapping(&params) {
                fatal(e);
            }

            log::info!("[smrt-align] ended.");
        }
    }
}

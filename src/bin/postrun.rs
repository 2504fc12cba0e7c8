// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! Run the post-run steps for one flowcell.
//!
//! ```shell
//! postrun C0M7RACXX --steps unaligned,filter,fastqc --test
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use log::info;
use tracing_log::AsTrace as _;
use tracing_subscriber::EnvFilter;

use flowcell_postrun::external::find_external_data;
use flowcell_postrun::filenames::{FileKind, NamingConvention, SampleIndexNames};
use flowcell_postrun::notify::NullNotifier;
use flowcell_postrun::paths::{FlowcellPaths, HiSeqPaths, MiSeqPaths};
use flowcell_postrun::sample_sheet::SampleSheet;
use flowcell_postrun::{Config, FlowcellRecord, PostRunOptions, PostRunner, Step};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Flowcell id, e.g. `C0M7RACXX`
    flowcell_id: String,

    /// Comma-separated steps to run. Defaults to every step (MiSeq: unaligned,fastqc).
    #[arg(short, long)]
    steps: Option<String>,

    /// Log every command to the transcript without running any
    #[arg(short, long, default_value_t = false)]
    test: bool,

    /// Redistribute existing combined files without recomputing them
    #[arg(long, default_value_t = false)]
    only_distribute: bool,

    /// Don't distribute files to project directories
    #[arg(long, default_value_t = false)]
    no_distribute: bool,

    /// Site configuration file (TOML). Falls back to $POSTRUN_CONFIG, then ./postrun.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// The flowcell was run on a MiSeq
    #[arg(long, default_value_t = false)]
    miseq: bool,

    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    match std::env::var("RUST_LOG") {
        Ok(_) => tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .init(),
        Err(_) => tracing_subscriber::fmt()
            .with_max_level(args.verbose.log_level_filter().as_trace())
            .init(),
    };

    let steps = match &args.steps {
        Some(list) => Step::parse_list(list)?,
        None if args.miseq => Step::MISEQ.to_vec(),
        None => Step::ALL.to_vec(),
    };

    let config = Config::find(args.config.as_deref())?;
    let hiseq = HiSeqPaths::find(&args.flowcell_id, &config)?;
    info!("flowcell {} at {:?}", args.flowcell_id, hiseq.base_dir());

    let paths: Arc<dyn FlowcellPaths> = if args.miseq {
        Arc::new(MiSeqPaths::new(hiseq))
    } else {
        Arc::new(hiseq)
    };

    let external = find_external_data(paths.base_dir(), &config)?;
    let flowcell = FlowcellRecord::build(paths.clone(), Arc::from(external))?;

    let options = PostRunOptions {
        steps,
        dry_run: args.test,
        only_distribute: args.only_distribute,
        no_distribute: args.no_distribute,
    };

    let no_mail = config.email_list.is_empty();
    let mut runner = PostRunner::new(flowcell, options);
    if no_mail {
        runner = runner.with_notifier(Arc::new(NullNotifier));
    }
    if args.miseq {
        let sheet = SampleSheet::from_path(paths.sample_sheet_path())?;
        let names = SampleIndexNames::new(FileKind::Fastq, Arc::new(sheet));
        runner = runner.with_naming(NamingConvention::SampleIndex(names));
    }

    runner.run()
}

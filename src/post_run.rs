// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! The post run: an ordered list of named steps over one flowcell, each of
//! which can be selected or skipped. Steps run strictly in order. Failing
//! shell commands are logged and the run moves on; the transcript
//! `postrun_<flowcell>.sh` is the record a human reviews afterwards.

use anyhow::Result;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use crate::combine::{cat_files, filter_fastq_files};
use crate::config::Config;
use crate::custom_barcode::{split_custom_barcodes, write_custom_barcode_files};
use crate::distribute::{
    check_delivered_copies, distribute_files, distribute_to_unique, DistributionTarget,
};
use crate::error::PostRunError;
use crate::filenames::{CasavaNames, FileKind, NamingConvention};
use crate::flowcell::FlowcellRecord;
use crate::group::{group_input_files, FileGroup, GroupOptions};
use crate::notify::{MailNotifier, Notifier, StatusLog};
use crate::paths::{glob_paths, FlowcellPaths};
use crate::report::{
    lims_upload_records, sample_report_rows, write_sample_report_file, NoStats, StatsSource,
};
use crate::shell::{ExternalCommand, FailurePolicy, Shell};

/// Named steps of a post run, in execution order.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Unaligned,
    Filter,
    Custom,
    Undetermined,
    Fastqc,
    Aligned,
    Stats,
    Report,
    Qcdata,
    LimsUpload,
    LimsComplete,
}

impl Step {
    pub const ALL: [Step; 11] = [
        Step::Unaligned,
        Step::Filter,
        Step::Custom,
        Step::Undetermined,
        Step::Fastqc,
        Step::Aligned,
        Step::Stats,
        Step::Report,
        Step::Qcdata,
        Step::LimsUpload,
        Step::LimsComplete,
    ];

    /// Steps run by default on a MiSeq flowcell.
    pub const MISEQ: [Step; 2] = [Step::Unaligned, Step::Fastqc];

    pub fn name(&self) -> &'static str {
        match self {
            Step::Unaligned => "unaligned",
            Step::Filter => "filter",
            Step::Custom => "custom",
            Step::Undetermined => "undetermined",
            Step::Fastqc => "fastqc",
            Step::Aligned => "aligned",
            Step::Stats => "stats",
            Step::Report => "report",
            Step::Qcdata => "qcdata",
            Step::LimsUpload => "lims_upload",
            Step::LimsComplete => "lims_complete",
        }
    }

    /// Parse a comma-separated step list. Any unknown name is fatal.
    pub fn parse_list(list: &str) -> Result<Vec<Step>, PostRunError> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Step::from_str)
            .collect()
    }
}

impl FromStr for Step {
    type Err = PostRunError;

    fn from_str(s: &str) -> Result<Step, PostRunError> {
        Step::ALL
            .iter()
            .copied()
            .find(|step| step.name() == s)
            .ok_or_else(|| PostRunError::InvalidStep {
                step: s.to_string(),
                valid: Step::ALL.iter().map(Step::name).collect::<Vec<_>>().join(", "),
            })
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PostRunOptions {
    pub steps: Vec<Step>,
    /// Log every command without running any
    pub dry_run: bool,
    /// Skip recomputing combined files; only redistribute them
    pub only_distribute: bool,
    /// Skip distribution to project directories
    pub no_distribute: bool,
}

impl Default for PostRunOptions {
    fn default() -> PostRunOptions {
        PostRunOptions {
            steps: Step::ALL.to_vec(),
            dry_run: false,
            only_distribute: false,
            no_distribute: false,
        }
    }
}

impl PostRunOptions {
    pub fn has(&self, step: Step) -> bool {
        self.steps.contains(&step)
    }
}

/// Drives the post-run steps for one flowcell.
pub struct PostRunner {
    flowcell: FlowcellRecord,
    options: PostRunOptions,
    shell: Shell,
    notifier: Arc<dyn Notifier>,
    status_log: StatusLog,
    fastq_names: NamingConvention,
    stats: Box<dyn StatsSource>,
}

impl PostRunner {
    pub fn new(flowcell: FlowcellRecord, options: PostRunOptions) -> PostRunner {
        let config = flowcell.paths().config();
        let notifier = Arc::new(MailNotifier::new(config.email_list.clone()));
        let status_log = StatusLog::new(&config.logs_path, flowcell.id());
        PostRunner {
            shell: Shell::new(options.dry_run),
            fastq_names: NamingConvention::Casava(CasavaNames::new(FileKind::Fastq)),
            stats: Box::new(NoStats),
            flowcell,
            options,
            notifier,
            status_log,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Naming convention of the per-tile fastq files.
    pub fn with_naming(mut self, names: NamingConvention) -> Self {
        self.fastq_names = names;
        self
    }

    pub fn with_stats(mut self, stats: Box<dyn StatsSource>) -> Self {
        self.stats = stats;
        self
    }

    pub fn shell(&self) -> &Shell {
        &self.shell
    }

    fn paths(&self) -> &dyn FlowcellPaths {
        self.flowcell.paths()
    }

    fn config(&self) -> &Config {
        self.paths().config()
    }

    fn status(&self, message: &str) {
        self.shell.log(format!("# {}", message));
        if !self.options.dry_run {
            if let Err(e) = self.status_log.append(message) {
                warn!("error writing status log: {:#}", e);
            }
        }
    }

    fn notify(&self, title: &str) {
        if !self.options.dry_run {
            self.notifier.notify(title);
        }
    }

    fn title(&self, message: &str) {
        self.shell.log("#########################");
        self.shell.log(format!("## {}", message));
        self.shell.log("#########################");
    }

    /// Run every selected step. A fatal error ends the run early; the
    /// transcript is closed either way.
    pub fn run(&self) -> Result<()> {
        self.start_flowcell()?;
        match self.run_steps() {
            Ok(()) => self.stop_flowcell(),
            Err(e) => {
                self.shell.log(format!("# ERROR: {:#}", e));
                self.status("postrun failed");
                self.shell.transcript().close()?;
                Err(e)
            }
        }
    }

    fn start_flowcell(&self) -> Result<()> {
        self.notify(&format!("starting post run for {}", self.flowcell.id()));
        self.shell.transcript().open(&self.paths().postrun_script_path())?;
        self.status("postrun start");
        Ok(())
    }

    fn stop_flowcell(&self) -> Result<()> {
        let script = self.paths().postrun_script_path();
        let qc_dir = self.paths().qc_dir();
        self.shell.log(format!("# archiving transcript to {}", qc_dir.display()));
        self.shell.transcript().close()?;

        let res = self
            .shell
            .mkdir_p(&qc_dir)
            .and_then(|_| self.shell.copy_into(&script, &qc_dir));
        if let Err(e) = res {
            self.shell.log_failure(&e);
        }

        self.notify(&format!("post run complete for {}", self.flowcell.id()));
        self.status("postrun done");
        Ok(())
    }

    fn distributions(&self) -> Vec<DistributionTarget> {
        if self.options.no_distribute {
            return Vec::new();
        }
        match self.flowcell.distributions() {
            Ok(d) => d,
            Err(e) => {
                self.shell.log(format!(
                    "# ERROR: no distributions for {}: {:#}",
                    self.flowcell.id(),
                    e
                ));
                Vec::new()
            }
        }
    }

    fn run_steps(&self) -> Result<()> {
        let distributions = self.distributions();
        let id = self.flowcell.id();

        let steps: Vec<&str> = Step::ALL
            .iter()
            .filter(|s| self.options.has(**s))
            .map(Step::name)
            .collect();
        self.status(&format!("running steps: {}", steps.join(", ")));

        if self.options.has(Step::Unaligned) {
            self.process_unaligned_reads(&distributions)?;
            self.notify(&format!("UNALIGNED step finished for {}", id));
        }

        if self.options.has(Step::Custom) {
            self.process_custom_barcode_reads(&distributions)?;
            self.notify(&format!("CUSTOM step finished for {}", id));
        }

        if self.options.has(Step::Undetermined) {
            self.process_undetermined_reads(&distributions)?;
            self.notify(&format!("UNDETERMINED step finished for {}", id));
        }

        if self.options.has(Step::Fastqc) {
            if !self.options.only_distribute {
                self.run_fastqc(&self.paths().fastq_combine_dir())?;
            }
            distribute_to_unique(&distributions, &[self.paths().fastqc_dir()], &self.shell)?;
            self.notify(&format!("FASTQC step finished for {}", id));
        }

        if self.options.has(Step::Aligned) {
            self.run_aligned(&distributions)?;
            self.notify(&format!("ALIGNED step finished for {}", id));
        }

        if self.options.has(Step::Stats) {
            self.create_custom_stats_files()?;
            self.distribute_custom_stats_files(&distributions)?;
        }

        if self.options.has(Step::Report) {
            self.create_sample_report()?;
            self.distribute_sample_report(&distributions)?;
        }

        if self.options.has(Step::Qcdata) {
            self.distribute_to_qcdata()?;
        }

        if self.options.has(Step::LimsUpload) {
            self.upload_lims()?;
        }

        if self.options.has(Step::LimsComplete) {
            self.complete_lims()?;
        }

        if !self.options.dry_run {
            self.check_deliveries(&distributions);
        }
        Ok(())
    }

    /// Files that every project directory receives should be identical
    /// everywhere. Differences are only reported.
    fn check_deliveries(&self, distributions: &[DistributionTarget]) {
        let mut shared = Vec::new();
        if self.options.has(Step::Fastqc) {
            shared.push(Path::new("fastqc").join("fastqc_plots.html"));
        }
        if self.options.has(Step::Report) {
            shared.push(PathBuf::from("Sample_Report.csv"));
        }
        for file in shared {
            if let Err(e) = check_delivered_copies(distributions, &file, &self.shell) {
                self.shell.log_failure(&e);
            }
        }
    }

    fn unaligned_project_dir(&self) -> Result<PathBuf> {
        self.paths().unaligned_project_dir().ok_or_else(|| {
            PostRunError::NoInputFiles {
                kind: FileKind::Fastq.description(),
                dir: self.paths().unaligned_dir(),
            }
            .into()
        })
    }

    fn group_fastq_files(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        options: &GroupOptions,
    ) -> Result<Vec<FileGroup>> {
        group_input_files(
            input_dir,
            output_dir,
            FileKind::Fastq,
            &self.fastq_names,
            options,
            &self.shell,
        )
    }

    fn process_unaligned_reads(&self, distributions: &[DistributionTarget]) -> Result<()> {
        self.title("unaligned");
        self.status("processing unaligned");
        let mut groups = self.group_fastq_files(
            &self.unaligned_project_dir()?,
            &self.paths().fastq_combine_dir(),
            &GroupOptions::for_kind(FileKind::Fastq),
        )?;

        if !self.options.only_distribute {
            cat_files(&groups, &self.shell)?;
        }

        if self.options.has(Step::Filter) {
            let filter_dir = self.paths().fastq_filter_dir();
            if self.options.only_distribute {
                // distribute the filtered files made by an earlier run
                for g in &mut groups {
                    g.output_path = filter_dir.join(&g.group_name);
                }
            } else {
                self.status("filtering unaligned fastq.gz files");
                groups = filter_fastq_files(groups, &filter_dir, &self.shell)?;
            }
        }

        if !self.options.no_distribute {
            self.status("distributing unaligned fastq.gz files");
            let workers = self.config().distribute_workers;
            distribute_files(&groups, distributions, workers, &self.shell)?;
        }
        Ok(())
    }

    fn process_custom_barcode_reads(&self, distributions: &[DistributionTarget]) -> Result<()> {
        self.title("custom barcodes");
        self.status("processing custom barcode reads");
        let mut tables = Vec::new();
        if !self.options.only_distribute {
            tables = write_custom_barcode_files(&self.flowcell, &self.shell)?;
            if tables.is_empty() {
                self.shell.log("# no custom barcoded lanes");
            }
        }

        let groups = self.group_fastq_files(
            &self.unaligned_project_dir()?,
            &self.paths().fastq_combine_dir(),
            &GroupOptions::for_kind(FileKind::Fastq),
        )?;
        let split = split_custom_barcodes(
            &groups,
            &tables,
            self.paths(),
            &self.config().barcode_splitter,
            &self.shell,
        )?;
        if !split.is_empty() && !self.options.no_distribute {
            distribute_files(&split, distributions, self.config().distribute_workers, &self.shell)?;
        }
        Ok(())
    }

    fn process_undetermined_reads(&self, distributions: &[DistributionTarget]) -> Result<()> {
        self.title("undetermined");
        self.status("process undetermined unaligned reads");
        let groups = match self.group_fastq_files(
            &self.paths().unaligned_undetermined_dir(),
            &self.paths().unaligned_undetermined_combine_dir(),
            &GroupOptions::for_kind(FileKind::Fastq).with_undetermined(),
        ) {
            Ok(groups) => groups,
            // lanes without an index have no undetermined reads
            Err(e) if is_missing_input(&e) => return Ok(()),
            Err(e) => return Err(e),
        };

        if !self.options.only_distribute {
            cat_files(&groups, &self.shell)?;
        }

        if !self.options.no_distribute {
            self.status("distributing unaligned undetermined fastq.gz files");
            let workers = self.config().distribute_workers;
            distribute_files(&groups, distributions, workers, &self.shell)?;
        }
        Ok(())
    }

    fn run_fastqc(&self, fastq_dir: &Path) -> Result<()> {
        self.status("running fastqc");
        if self.shell.check_exists(&[fastq_dir]) {
            let cmd = ExternalCommand::new(&self.config().fastqc_script)
                .arg("-v")
                .arg("--files")
                .arg("*.fastq.gz")
                .current_dir(fastq_dir);
            self.shell.execute(&cmd, FailurePolicy::Continue)?;
        }
        Ok(())
    }

    fn run_aligned(&self, distributions: &[DistributionTarget]) -> Result<()> {
        self.title("aligned");
        self.status("processing export files");
        let project_dir = self.aligned_project_dir()?;
        let groups = group_input_files(
            &project_dir,
            &self.paths().eland_combine_dir(),
            FileKind::Export,
            &CasavaNames::new(FileKind::Export),
            &GroupOptions::for_kind(FileKind::Export),
            &self.shell,
        )?;

        if !self.options.only_distribute {
            cat_files(&groups, &self.shell)?;
        }

        self.status("distributing export files");
        distribute_files(&groups, distributions, self.config().distribute_workers, &self.shell)
    }

    /// The aligned `Project_*` dir holding the `Sample_*` dirs. When CASAVA
    /// spread samples over several project dirs they are merged into
    /// `Aligned/Project_<flowcell id>`.
    fn aligned_project_dir(&self) -> Result<PathBuf> {
        let mut dirs = self.paths().aligned_project_dirs();
        match dirs.len() {
            0 => {
                return Err(PostRunError::NoAlignedProjectDir {
                    flowcell_id: self.flowcell.id().to_string(),
                }
                .into())
            }
            1 => return Ok(dirs.remove(0)),
            _ => (),
        }

        let mut with_samples: Vec<PathBuf> = dirs
            .iter()
            .filter(|d| !sample_dirs(d.as_path()).is_empty())
            .cloned()
            .collect();

        match with_samples.len() {
            0 => Err(PostRunError::NoAlignedSamples {
                dirs: dirs
                    .iter()
                    .map(|d| d.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            }
            .into()),
            1 => {
                let dir = with_samples.remove(0);
                self.shell.log(format!("# WARNING: All Sample Dirs in {}", dir.display()));
                Ok(dir)
            }
            _ => {
                let merged = self
                    .paths()
                    .aligned_dir()
                    .join(format!("Project_{}", self.flowcell.id()));
                self.shell
                    .log(format!("# WARNING: Combining export files in {}", merged.display()));
                self.shell.mkdir_p(&merged)?;
                for project in &with_samples {
                    if *project == merged {
                        continue;
                    }
                    for sample_dir in sample_dirs(project.as_path()) {
                        let name = crate::filenames::base_name(&sample_dir);
                        self.shell.rename(&sample_dir, &merged.join(name))?;
                    }
                }
                Ok(merged)
            }
        }
    }

    /// Collect the HTML / PDF run summaries into the custom stats dir.
    fn create_custom_stats_files(&self) -> Result<()> {
        self.status("creating custom stats files");
        let stats_dir = self.paths().custom_stats_dir();
        self.shell.mkdir_p(&stats_dir)?;

        match self.paths().unaligned_stats_dir() {
            Some(unaligned_stats) => {
                let ivc = unaligned_stats.join("IVC.htm");
                let ivc_pdf = unaligned_stats.join("IVC.pdf");
                if self.shell.check_exists(&[&ivc]) {
                    let cmd = ExternalCommand::new(&self.config().pdf_converter)
                        .arg(&ivc)
                        .arg(&ivc_pdf);
                    self.shell.execute(&cmd, FailurePolicy::Continue)?;
                }
                let demux = unaligned_stats.join("Demultiplex_Stats.htm");
                self.copy_files(&[ivc_pdf, demux], &stats_dir);
            }
            None => self.shell.log(format!(
                "# Error: no {} directory found",
                self.config().fastq_stats_pattern
            )),
        }

        let aligned = self.paths().aligned_project_dir();
        if aligned.map_or(false, |d| d.exists()) {
            if let Some(aligned_stats) = self.paths().aligned_stats_dir() {
                let summaries = ["Barcode_Lane_Summary.htm", "Sample_Summary.htm"];
                let files: Vec<PathBuf> = summaries.iter().map(|f| aligned_stats.join(f)).collect();
                self.copy_files(&files, &stats_dir);
            }
        }
        Ok(())
    }

    /// Copy each existing file into `dest_dir`; missing ones are logged.
    fn copy_files(&self, files: &[PathBuf], dest_dir: &Path) {
        for f in files {
            if !self.shell.check_exists(&[f]) {
                continue;
            }
            if let Err(e) = self.shell.copy_into(f, dest_dir) {
                self.shell.log_failure(&e);
            }
        }
    }

    fn distribute_custom_stats_files(&self, targets: &[DistributionTarget]) -> Result<()> {
        self.status("distributing aligned stats files");
        distribute_to_unique(targets, &[self.paths().custom_stats_dir()], &self.shell)
    }

    fn create_sample_report(&self) -> Result<()> {
        self.status("creating sample_report");
        let rows = sample_report_rows(&self.flowcell, self.stats.as_ref());
        let path = self.paths().sample_report_path();
        self.shell.perform(
            format!("# writing {} rows to {}", rows.len(), path.display()),
            || write_sample_report_file(&rows, &path),
        )
    }

    fn distribute_sample_report(&self, targets: &[DistributionTarget]) -> Result<()> {
        self.status("distributing sample_report");
        distribute_to_unique(targets, &[self.paths().sample_report_path()], &self.shell)
    }

    fn distribute_to_qcdata(&self) -> Result<()> {
        self.status("distributing to qcdata");
        let qc_dir = self.paths().qc_dir();
        self.shell.mkdir_p(&qc_dir)?;
        let qc = [DistributionTarget::directory(&qc_dir)];

        let base = self.paths().base_dir();
        let qc_files: Vec<PathBuf> = ["InterOp", "RunInfo.xml", "Events.log", "Data/reports"]
            .iter()
            .map(|f| base.join(f))
            .collect();
        distribute_to_unique(&qc, &qc_files, &self.shell)?;

        match self.paths().unaligned_stats_dir() {
            Some(d) => distribute_to_unique(&qc, &[d], &self.shell)?,
            None => self.shell.log("# Error: no unaligned stats dir to archive"),
        }
        self.distribute_custom_stats_files(&qc)?;
        distribute_to_unique(&qc, &[self.paths().fastqc_dir()], &self.shell)?;
        self.distribute_sample_report(&qc)
    }

    fn upload_lims(&self) -> Result<()> {
        self.status("uploading to lims");
        let records = lims_upload_records(&self.flowcell);
        let json_path = self.paths().base_dir().join("lims_data.json");
        self.shell.perform(
            format!("# writing {} lims records to {}", records.len(), json_path.display()),
            || {
                let json = serde_json::to_string(&records)?;
                std::fs::write(&json_path, json + "\n")?;
                Ok(())
            },
        )?;

        let cmd = ExternalCommand::new(&self.config().lims_upload_script).arg(&json_path);
        self.shell.execute(&cmd, FailurePolicy::Continue)?;
        Ok(())
    }

    fn complete_lims(&self) -> Result<()> {
        self.status("completing lims");
        let cmd = ExternalCommand::new(&self.config().lims_complete_script).arg(self.flowcell.id());
        self.shell.execute(&cmd, FailurePolicy::Continue)?;
        Ok(())
    }
}

fn is_missing_input(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<PostRunError>(),
        Some(PostRunError::NoInputFiles { .. })
    )
}

fn sample_dirs(project_dir: &Path) -> Vec<PathBuf> {
    glob_paths(&project_dir.join("Sample_*").to_string_lossy())
}

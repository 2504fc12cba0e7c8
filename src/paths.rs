// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! Well-known locations inside a flowcell run directory. Nothing here is
//! hard-coded per flowcell: every path derives from the flowcell id, the
//! located run directory and the site `Config`.

use anyhow::Result;
use log::error;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::PostRunError;
use crate::NUM_LANES;

/// Path resolution for one flowcell. Implementors supply the flowcell id, the
/// run directory and the site config; every other location has a provided
/// implementation that an instrument-specific layout may replace.
pub trait FlowcellPaths: Send + Sync {
    fn id(&self) -> &str;

    /// The root directory of this flowcell, e.g. `/solexa/110321_SN_0123_A639P5AAXX`.
    fn base_dir(&self) -> &Path;

    fn config(&self) -> &Config;

    /// Directory name of the flowcell without its parent.
    fn base_name(&self) -> String {
        self.base_dir()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Quality control directory where QC files are archived.
    fn qc_dir(&self) -> PathBuf {
        self.config().qc_path.join(self.base_name())
    }

    fn base_calls_dir(&self) -> PathBuf {
        self.base_dir().join(&self.config().basecalls_path)
    }

    /// Where CASAVA places the demultiplexed fastq.gz files.
    fn unaligned_dir(&self) -> PathBuf {
        self.base_dir().join("Unaligned")
    }

    /// Where CASAVA puts reads that don't match any index.
    fn unaligned_undetermined_dir(&self) -> PathBuf {
        self.unaligned_dir().join("Undetermined_indices")
    }

    /// Where combined undetermined fastq files are written.
    fn unaligned_undetermined_combine_dir(&self) -> PathBuf {
        self.unaligned_dir()
            .join(&self.config().fastq_undetermined_combine_path)
    }

    /// The `Project_*` directory inside the unaligned directory.
    fn unaligned_project_dir(&self) -> Option<PathBuf> {
        single_directory_in(&self.unaligned_dir(), &self.config().project_pattern)
    }

    /// The `Basecall_Stats_*` directory.
    fn unaligned_stats_dir(&self) -> Option<PathBuf> {
        single_directory_in(&self.unaligned_dir(), &self.config().fastq_stats_pattern)
    }

    /// Where per-tile fastq files are concatenated.
    fn fastq_combine_dir(&self) -> PathBuf {
        self.unaligned_dir().join(&self.config().fastq_combine_path)
    }

    /// Where pass-filter-only fastq files are written.
    fn fastq_filter_dir(&self) -> PathBuf {
        self.unaligned_dir().join(&self.config().fastq_filter_path)
    }

    fn fastqc_dir(&self) -> PathBuf {
        self.fastq_combine_dir().join("fastqc")
    }

    fn aligned_dir(&self) -> PathBuf {
        self.base_dir().join("Aligned")
    }

    fn aligned_project_dir(&self) -> Option<PathBuf> {
        single_directory_in(&self.aligned_dir(), &self.config().project_pattern)
    }

    fn aligned_project_dirs(&self) -> Vec<PathBuf> {
        directories_in(&self.aligned_dir(), &self.config().project_pattern)
    }

    /// Where export files are renamed and combined.
    fn eland_combine_dir(&self) -> PathBuf {
        self.aligned_dir().join(&self.config().eland_combine_path)
    }

    fn aligned_stats_dirs(&self) -> Vec<PathBuf> {
        let config = self.config();
        let pattern = Path::new(&config.project_pattern).join(&config.eland_stats_pattern);
        directories_in(&self.aligned_dir(), &pattern.to_string_lossy())
    }

    fn aligned_stats_dir(&self) -> Option<PathBuf> {
        self.aligned_stats_dirs().into_iter().next()
    }

    /// Location used to compile the stats files handed to end users.
    fn custom_stats_dir(&self) -> PathBuf {
        self.aligned_dir().join(format!("Summary_Stats_{}", self.id()))
    }

    /// Per-lane barcode table consumed by the custom barcode splitter.
    fn custom_barcode_path(&self, lane: usize) -> Result<PathBuf> {
        if lane < 1 || lane > NUM_LANES {
            error!("invalid lane number {}", lane);
            return Err(PostRunError::InvalidLane { lane }.into());
        }
        Ok(self.base_dir().join(format!("custom_barcodes_{}.txt", lane)))
    }

    /// Count table written by the custom barcode splitter for `lane`.
    fn custom_barcode_path_out(&self, lane: usize) -> Result<PathBuf> {
        let mut path = self.custom_barcode_path(lane)?.into_os_string();
        path.push(".out");
        Ok(path.into())
    }

    fn sample_report_path(&self) -> PathBuf {
        self.base_dir().join("Sample_Report.csv")
    }

    fn sample_sheet_path(&self) -> PathBuf {
        self.unaligned_dir().join("SampleSheet.csv")
    }

    /// The transcript of a post run.
    fn postrun_script_path(&self) -> PathBuf {
        self.base_dir().join(format!("postrun_{}.sh", self.id()))
    }
}

/// The standard HiSeq / CASAVA 1.8 run directory layout.
#[derive(Clone, Debug)]
pub struct HiSeqPaths {
    flowcell_id: String,
    base_dir: PathBuf,
    config: Config,
}

impl HiSeqPaths {
    /// Locate the run directory `<flowcell_path_base>/*<flowcell_id>`.
    /// Finding none or more than one is fatal.
    pub fn find(flowcell_id: &str, config: &Config) -> Result<HiSeqPaths> {
        let base_dir = locate_base_dir(flowcell_id, config)?;
        Ok(HiSeqPaths::with_base_dir(flowcell_id, base_dir, config))
    }

    pub fn with_base_dir(
        flowcell_id: &str,
        base_dir: impl Into<PathBuf>,
        config: &Config,
    ) -> HiSeqPaths {
        HiSeqPaths {
            flowcell_id: flowcell_id.to_string(),
            base_dir: base_dir.into(),
            config: config.clone(),
        }
    }
}

impl FlowcellPaths for HiSeqPaths {
    fn id(&self) -> &str {
        &self.flowcell_id
    }

    fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn config(&self) -> &Config {
        &self.config
    }
}

/// MiSeq runs keep their fastq files directly in the base-calls directory.
#[derive(Clone, Debug)]
pub struct MiSeqPaths {
    inner: HiSeqPaths,
}

impl MiSeqPaths {
    pub fn new(inner: HiSeqPaths) -> MiSeqPaths {
        MiSeqPaths { inner }
    }
}

impl FlowcellPaths for MiSeqPaths {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn base_dir(&self) -> &Path {
        self.inner.base_dir()
    }

    fn config(&self) -> &Config {
        self.inner.config()
    }

    fn unaligned_dir(&self) -> PathBuf {
        self.base_calls_dir()
    }

    fn unaligned_project_dir(&self) -> Option<PathBuf> {
        Some(self.base_calls_dir())
    }
}

fn locate_base_dir(flowcell_id: &str, config: &Config) -> Result<PathBuf> {
    let pattern = config
        .flowcell_path_base
        .join(format!("*{}", flowcell_id))
        .to_string_lossy()
        .into_owned();
    let mut found = glob_paths(&pattern);

    match found.len() {
        0 => Err(PostRunError::NoFlowcellDir {
            flowcell_id: flowcell_id.to_string(),
            pattern,
        }
        .into()),
        1 => Ok(found.remove(0)),
        count => Err(PostRunError::MultipleFlowcellDirs {
            flowcell_id: flowcell_id.to_string(),
            pattern,
            count,
        }
        .into()),
    }
}

/// Expand a glob pattern, dropping unreadable entries. Results are sorted.
pub(crate) fn glob_paths(pattern: &str) -> Vec<PathBuf> {
    match glob::glob(pattern) {
        Ok(paths) => {
            let mut paths: Vec<PathBuf> = paths.filter_map(|p| p.ok()).collect();
            paths.sort();
            paths
        }
        Err(e) => {
            error!("bad search pattern {}: {}", pattern, e);
            Vec::new()
        }
    }
}

/// First directory under `base` matching `pattern`. Several matches are
/// reported but not fatal.
pub fn single_directory_in(base: &Path, pattern: &str) -> Option<PathBuf> {
    let dirs = directories_in(base, pattern);
    if dirs.len() > 1 {
        error!("multiple paths found: {:?}", dirs);
    }
    dirs.into_iter().next()
}

/// All directories under `base` matching `pattern`.
pub fn directories_in(base: &Path, pattern: &str) -> Vec<PathBuf> {
    let search = base.join(pattern);
    let dirs: Vec<PathBuf> = glob_paths(&search.to_string_lossy())
        .into_iter()
        .filter(|p| p.is_dir())
        .collect();
    if dirs.is_empty() {
        error!("no paths found at {:?}", search);
    }
    dirs
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn site(root: &Path) -> Config {
        Config {
            flowcell_path_base: root.to_path_buf(),
            qc_path: root.join("qcdata"),
            ..Config::default()
        }
    }

    #[test]
    fn find_run_dir() -> Result<()> {
        let root = tempfile::tempdir()?;
        fs::create_dir(root.path().join("110321_SN_0123_A639P5AAXX"))?;
        let cfg = site(root.path());

        let paths = HiSeqPaths::find("639P5AAXX", &cfg)?;
        assert_eq!(paths.base_name(), "110321_SN_0123_A639P5AAXX");
        assert_eq!(
            paths.fastq_combine_dir(),
            root.path().join("110321_SN_0123_A639P5AAXX/Unaligned/all")
        );
        assert_eq!(
            paths.qc_dir(),
            root.path().join("qcdata/110321_SN_0123_A639P5AAXX")
        );
        assert_eq!(
            paths.custom_barcode_path_out(3)?,
            root.path().join("110321_SN_0123_A639P5AAXX/custom_barcodes_3.txt.out")
        );
        Ok(())
    }

    #[test]
    fn missing_or_ambiguous_run_dir() -> Result<()> {
        let root = tempfile::tempdir()?;
        let cfg = site(root.path());
        assert!(HiSeqPaths::find("639P5AAXX", &cfg).is_err());

        fs::create_dir(root.path().join("a_639P5AAXX"))?;
        fs::create_dir(root.path().join("b_639P5AAXX"))?;
        let err = HiSeqPaths::find("639P5AAXX", &cfg).unwrap_err();
        assert!(err.to_string().contains("2 flowcell directories"));
        Ok(())
    }

    #[test]
    fn project_and_stats_dirs() -> Result<()> {
        let root = tempfile::tempdir()?;
        let base = root.path().join("run_FC1");
        fs::create_dir_all(base.join("Unaligned/Project_FC1"))?;
        fs::create_dir_all(base.join("Unaligned/Basecall_Stats_FC1"))?;
        fs::create_dir_all(base.join("Aligned/Project_FC1/Summary_Stats_FC1"))?;
        let paths = HiSeqPaths::with_base_dir("FC1", &base, &site(root.path()));

        assert_eq!(paths.unaligned_project_dir(), Some(base.join("Unaligned/Project_FC1")));
        assert_eq!(paths.unaligned_stats_dir(), Some(base.join("Unaligned/Basecall_Stats_FC1")));
        assert_eq!(
            paths.aligned_stats_dir(),
            Some(base.join("Aligned/Project_FC1/Summary_Stats_FC1"))
        );
        assert_eq!(paths.custom_stats_dir(), base.join("Aligned/Summary_Stats_FC1"));
        Ok(())
    }

    #[test]
    fn lane_bounds() {
        let paths = HiSeqPaths::with_base_dir("FC1", "/solexa/run_FC1", &Config::default());
        assert!(paths.custom_barcode_path(0).is_err());
        assert!(paths.custom_barcode_path(9).is_err());
        assert_eq!(
            paths.custom_barcode_path(8).unwrap(),
            PathBuf::from("/solexa/run_FC1/custom_barcodes_8.txt")
        );
    }

    #[test]
    fn miseq_layout() {
        let hiseq = HiSeqPaths::with_base_dir("M1", "/solexa/run_M1", &Config::default());
        let miseq = MiSeqPaths::new(hiseq);
        let basecalls = PathBuf::from("/solexa/run_M1/Data/Intensities/BaseCalls");
        assert_eq!(miseq.unaligned_dir(), basecalls);
        assert_eq!(miseq.unaligned_project_dir(), Some(basecalls.clone()));
        assert_eq!(miseq.fastq_combine_dir(), basecalls.join("all"));
        assert_eq!(miseq.sample_sheet_path(), basecalls.join("SampleSheet.csv"));
    }
}

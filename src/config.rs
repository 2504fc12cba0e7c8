// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! Site configuration. Constructed once at startup and handed to every
//! component by reference.

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable holding the path to the configuration file.
pub const CONFIG_ENV_VAR: &str = "POSTRUN_CONFIG";

/// Configuration file used when neither `--config` nor `$POSTRUN_CONFIG` is given.
pub const DEFAULT_CONFIG_FILE: &str = "postrun.toml";

/// Locations and tool paths for a sequencing site. Every field has a default,
/// so a config file only needs to list the values that differ.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Root of the per-flowcell QC archive
    pub qc_path: PathBuf,
    /// Location of the helper scripts
    pub script_path: PathBuf,
    /// Directory of the per-flowcell JSON-lines status logs
    pub logs_path: PathBuf,
    /// Root directory holding the flowcell run directories
    pub flowcell_path_base: PathBuf,

    pub basecalls_path: PathBuf,
    pub fastq_combine_path: String,
    pub fastq_undetermined_combine_path: String,
    pub eland_combine_path: String,
    pub fastq_filter_path: String,
    pub project_pattern: String,
    pub fastq_stats_pattern: String,
    pub eland_stats_pattern: String,

    /// Recipients of run notifications
    pub email_list: Vec<String>,
    /// Worker count for the parallel copy loop of file distribution
    pub distribute_workers: usize,

    pub lims_query_script: PathBuf,
    pub lims_upload_script: PathBuf,
    pub lims_complete_script: PathBuf,
    pub fastqc_script: PathBuf,
    pub barcode_splitter: PathBuf,
    pub pdf_converter: PathBuf,
}

impl Default for Config {
    fn default() -> Config {
        let script_path = PathBuf::from("/solexa/bin/scripts");
        Config {
            qc_path: PathBuf::from("/qcdata"),
            logs_path: PathBuf::from("/solexa/runs/log"),
            flowcell_path_base: PathBuf::from("/solexa"),
            basecalls_path: ["Data", "Intensities", "BaseCalls"].iter().collect(),
            fastq_combine_path: "all".to_string(),
            fastq_undetermined_combine_path: "undetermined".to_string(),
            eland_combine_path: "all".to_string(),
            fastq_filter_path: "filter".to_string(),
            project_pattern: "Project_*".to_string(),
            fastq_stats_pattern: "Basecall_Stats_*".to_string(),
            eland_stats_pattern: "Summary_Stats_*".to_string(),
            email_list: vec!["sequencing@localhost".to_string()],
            distribute_workers: 4,
            lims_query_script: script_path.join("lims_fc_info.pl"),
            lims_upload_script: script_path.join("lims_upload_samples.pl"),
            lims_complete_script: script_path.join("lims_fc_complete.pl"),
            fastqc_script: script_path.join("fastqc.pl"),
            barcode_splitter: PathBuf::from("fastx_barcode_splitter.pl"),
            pdf_converter: PathBuf::from("wkhtmltopdf"),
            script_path,
        }
    }
}

impl Config {
    /// Read a TOML config file. Missing keys take their default values.
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("error reading config file {:?}", path))?;
        Config::from_toml(&text).with_context(|| format!("error parsing config file {:?}", path))
    }

    pub fn from_toml(text: &str) -> Result<Config> {
        Ok(toml::from_str(text)?)
    }

    /// Locate the config: an explicit path wins, then `$POSTRUN_CONFIG`, then
    /// `postrun.toml` in the working directory. An explicit path must exist;
    /// otherwise a missing file means the defaults are used.
    pub fn find(explicit: Option<&Path>) -> Result<Config> {
        if let Some(path) = explicit {
            return Config::load(path);
        }

        let path = std::env::var_os(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        if path.exists() {
            info!("loading config from {:?}", path);
            Config::load(&path)
        } else {
            warn!("{:?} not found - will assume default settings", path);
            Ok(Config::default())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_config_keeps_defaults() -> Result<()> {
        let cfg = Config::from_toml(
            r#"
            flowcell_path_base = "/data/runs"
            distribute_workers = 2
            email_list = ["a@example.org", "b@example.org"]
            "#,
        )?;

        assert_eq!(cfg.flowcell_path_base, PathBuf::from("/data/runs"));
        assert_eq!(cfg.distribute_workers, 2);
        assert_eq!(cfg.email_list.len(), 2);
        assert_eq!(cfg.fastq_combine_path, "all");
        assert_eq!(cfg.project_pattern, "Project_*");
        Ok(())
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let r = Config::find(Some(Path::new("/definitely/not/here/postrun.toml")));
        assert!(r.is_err());
    }

    #[test]
    fn load_from_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("site.toml");
        std::fs::write(&path, "qc_path = \"/archive/qc\"\n")?;
        let cfg = Config::find(Some(&path))?;
        assert_eq!(cfg.qc_path, PathBuf::from("/archive/qc"));
        assert_eq!(cfg.logs_path, Config::default().logs_path);
        Ok(())
    }
}

// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! Sample metadata and distribution targets that can't be derived from the
//! run directory. They come either from the LIMS query script or from a
//! snapshot file dropped into the flowcell directory.

use anyhow::{bail, Context, Result};
use log::info;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::distribute::DistributionTarget;
use crate::error::PostRunError;
use crate::paths::glob_paths;
use crate::shell::{run_command, ExternalCommand};

/// How a sample is barcoded.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BarcodeKind {
    None,
    /// Standard Illumina index, demultiplexed by CASAVA
    Illumina,
    /// Lab-defined barcode at the start of the read, split after combination
    Custom,
}

impl Default for BarcodeKind {
    fn default() -> BarcodeKind {
        BarcodeKind::None
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReadProtocol {
    #[serde(alias = "eland_extended")]
    Single,
    #[serde(alias = "eland_pair")]
    Paired,
}

impl Default for ReadProtocol {
    fn default() -> ReadProtocol {
        ReadProtocol::Single
    }
}

/// One sample of a flowcell as known to the outside world.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct SampleData {
    pub lane: usize,
    pub name: String,
    /// Reference genome code
    #[serde(default)]
    pub genome: String,
    #[serde(default)]
    pub protocol: ReadProtocol,
    #[serde(default)]
    pub barcode: String,
    #[serde(default)]
    pub barcode_type: BarcodeKind,
    #[serde(default)]
    pub lib_id: Option<String>,
    #[serde(default)]
    pub order: Option<String>,
    #[serde(default)]
    pub order_type: Option<String>,
    #[serde(default)]
    pub lab: Option<String>,
    /// Barcode exactly as entered upstream, reported back on upload
    #[serde(default)]
    pub raw_barcode: Option<String>,
}

/// Source of per-flowcell metadata.
pub trait ExternalData: Send + Sync {
    fn sample_data_for(&self, flowcell_id: &str) -> Result<Vec<SampleData>>;
    fn distributions_for(&self, flowcell_id: &str) -> Result<Vec<DistributionTarget>>;
}

/// Lane ids come back as numbers or as strings.
fn lane_number<'de, D: Deserializer<'de>>(d: D) -> Result<usize, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Lane {
        Num(usize),
        Str(String),
    }
    match Lane::deserialize(d)? {
        Lane::Num(n) => Ok(n),
        Lane::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct LimsSample {
    #[serde(rename = "laneID", deserialize_with = "lane_number")]
    lane_id: usize,
    sample_name: String,
    #[serde(default)]
    genome_version: Option<String>,
    #[serde(default)]
    read_type: Option<String>,
    #[serde(default)]
    indexes_used: Option<String>,
    #[serde(default)]
    index: Option<String>,
    #[serde(default)]
    results_path: Option<PathBuf>,
    #[serde(rename = "libID", default)]
    lib_id: Option<String>,
    #[serde(rename = "orderID", default)]
    order_id: Option<String>,
    #[serde(default)]
    order_type: Option<String>,
    #[serde(default)]
    lab_name: Option<String>,
}

impl LimsSample {
    fn to_sample_data(&self) -> SampleData {
        let protocol = match self.read_type.as_deref() {
            Some("Single Read") => ReadProtocol::Single,
            _ => ReadProtocol::Paired,
        };
        let barcode_type = match self.indexes_used.as_deref() {
            Some("ILL") => BarcodeKind::Illumina,
            Some("CUST") => BarcodeKind::Custom,
            _ => BarcodeKind::None,
        };
        SampleData {
            lane: self.lane_id,
            name: self.sample_name.clone(),
            genome: self.genome_version.clone().unwrap_or_default(),
            protocol,
            barcode: self.index.clone().unwrap_or_default(),
            barcode_type,
            lib_id: self.lib_id.clone(),
            order: self.order_id.clone(),
            order_type: self.order_type.clone(),
            lab: self.lab_name.clone(),
            raw_barcode: self.index.clone().filter(|b| !b.is_empty()),
        }
    }
}

#[derive(Deserialize, Debug)]
struct LimsResponse {
    samples: Vec<LimsSample>,
}

impl LimsResponse {
    fn parse(json: &str) -> Result<LimsResponse> {
        serde_json::from_str(json).context("error parsing LIMS query output")
    }

    fn distributions(&self) -> Vec<DistributionTarget> {
        let mut dists: Vec<DistributionTarget> = Vec::new();
        for s in &self.samples {
            if dists.iter().any(|d| d.lane == s.lane_id) {
                continue;
            }
            if let Some(path) = &s.results_path {
                dists.push(DistributionTarget::new(s.lane_id, path));
            }
        }
        dists
    }
}

/// Runs the LIMS query script with the flowcell id and reads its JSON output.
#[derive(Clone, Debug)]
pub struct LimsData {
    script: PathBuf,
}

impl LimsData {
    pub fn new(script: impl Into<PathBuf>) -> LimsData {
        LimsData { script: script.into() }
    }

    fn query(&self, flowcell_id: &str) -> Result<LimsResponse> {
        let cmd = ExternalCommand::new(&self.script).arg(flowcell_id);
        let out = run_command(&cmd)?;
        if !out.success() {
            bail!("LIMS query `{}` failed with {:?}: {}", cmd, out.status, out.stderr.trim());
        }
        LimsResponse::parse(&out.stdout)
    }
}

impl ExternalData for LimsData {
    fn sample_data_for(&self, flowcell_id: &str) -> Result<Vec<SampleData>> {
        let resp = self.query(flowcell_id)?;
        Ok(resp.samples.iter().map(LimsSample::to_sample_data).collect())
    }

    fn distributions_for(&self, flowcell_id: &str) -> Result<Vec<DistributionTarget>> {
        Ok(self.query(flowcell_id)?.distributions())
    }
}

/// Contents of an external data snapshot file.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    #[serde(default)]
    pub samples: Vec<SampleData>,
    #[serde(default)]
    pub distributions: Vec<DistributionTarget>,
}

/// External data read once from a TOML or JSON snapshot file, for flowcells
/// that aren't in the LIMS and for offline runs.
#[derive(Clone, Debug)]
pub struct SnapshotData {
    snapshot: Snapshot,
}

impl SnapshotData {
    pub fn new(snapshot: Snapshot) -> SnapshotData {
        SnapshotData { snapshot }
    }

    pub fn load(path: &Path) -> Result<SnapshotData> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("error reading external data file {:?}", path))?;
        let snapshot = if path.extension().map_or(false, |e| e == "json") {
            serde_json::from_str(&text).with_context(|| format!("error parsing {:?}", path))?
        } else {
            toml::from_str(&text).with_context(|| format!("error parsing {:?}", path))?
        };
        Ok(SnapshotData { snapshot })
    }
}

impl ExternalData for SnapshotData {
    fn sample_data_for(&self, _flowcell_id: &str) -> Result<Vec<SampleData>> {
        Ok(self.snapshot.samples.clone())
    }

    fn distributions_for(&self, _flowcell_id: &str) -> Result<Vec<DistributionTarget>> {
        Ok(self.snapshot.distributions.clone())
    }
}

/// Pick the external data source for a flowcell: a single
/// `*external_data*.{toml,json}` file in `base_dir` wins over the LIMS.
pub fn find_external_data(base_dir: &Path, config: &Config) -> Result<Box<dyn ExternalData>> {
    let mut found = Vec::new();
    for ext in &["toml", "json"] {
        let pattern = base_dir.join(format!("*external_data*.{}", ext));
        found.extend(glob_paths(&pattern.to_string_lossy()));
    }

    match found.len() {
        0 => Ok(Box::new(LimsData::new(&config.lims_query_script))),
        1 => {
            info!("using external data from {:?}", found[0]);
            Ok(Box::new(SnapshotData::load(&found[0])?))
        }
        count => Err(PostRunError::MultipleExternalDataFiles {
            pattern: base_dir.join("*external_data*").display().to_string(),
            count,
        }
        .into()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    const LIMS_JSON: &str = r#"{
        "samples": [
            {"laneID": "1", "sampleName": "L1401", "genomeVersion": "mm9",
             "readType": "Single Read", "indexesUsed": "ILL", "index": "ATCACG",
             "resultsPath": "/n/projects/lab/FC1", "libID": "L1401"},
            {"laneID": "1", "sampleName": "L1402", "genomeVersion": "mm9",
             "readType": "Single Read", "indexesUsed": "ILL", "index": "CGATGT",
             "resultsPath": "/n/projects/other/FC1"},
            {"laneID": 2, "sampleName": "L1403", "genomeVersion": "dm3", "readType": "Paired End",
             "indexesUsed": "CUST", "index": "ACGT", "resultsPath": "/n/projects/lab/FC1"},
            {"laneID": "3", "sampleName": "phiX", "genomeVersion": "phiX", "readType": "Paired End",
             "indexesUsed": "", "index": null}
        ]
    }"#;

    #[test]
    fn lims_samples() -> Result<()> {
        let resp = LimsResponse::parse(LIMS_JSON)?;
        let samples: Vec<SampleData> =
            resp.samples.iter().map(LimsSample::to_sample_data).collect();
        assert_eq!(samples.len(), 4);

        assert_eq!(samples[0].lane, 1);
        assert_eq!(samples[0].protocol, ReadProtocol::Single);
        assert_eq!(samples[0].barcode_type, BarcodeKind::Illumina);
        assert_eq!(samples[0].lib_id.as_deref(), Some("L1401"));

        assert_eq!(samples[2].lane, 2);
        assert_eq!(samples[2].protocol, ReadProtocol::Paired);
        assert_eq!(samples[2].barcode_type, BarcodeKind::Custom);

        assert_eq!(samples[3].barcode_type, BarcodeKind::None);
        assert_eq!(samples[3].barcode, "");
        assert_eq!(samples[3].raw_barcode, None);
        Ok(())
    }

    #[test]
    fn lims_distributions_first_path_per_lane() -> Result<()> {
        let resp = LimsResponse::parse(LIMS_JSON)?;
        assert_eq!(
            resp.distributions(),
            vec![
                DistributionTarget::new(1, "/n/projects/lab/FC1"),
                DistributionTarget::new(2, "/n/projects/lab/FC1"),
            ]
        );
        Ok(())
    }

    #[test]
    fn snapshot_fixture() -> Result<()> {
        let data = SnapshotData::load(Path::new("test/external_data/FC1_external_data.toml"))?;
        let samples = data.sample_data_for("FC1")?;
        assert_eq!(samples.len(), 4);
        assert_eq!(samples[0].name, "L1401");
        assert_eq!(samples[2].barcode_type, BarcodeKind::Custom);
        assert_eq!(samples[3].protocol, ReadProtocol::Paired);

        let dists = data.distributions_for("FC1")?;
        assert_eq!(dists.len(), 2);
        assert_eq!(dists[1], DistributionTarget::new(2, "/n/projects/lab/FC1"));
        Ok(())
    }

    #[test]
    fn snapshot_json() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("FC1_external_data.json");
        std::fs::write(
            &path,
            r#"{"samples": [{"lane": 4, "name": "L9", "protocol": "eland_pair"}],
                "distributions": [{"lane": 4, "path": "/p"}]}"#,
        )?;

        let data = find_external_data(dir.path(), &Config::default())?;
        let samples = data.sample_data_for("FC1")?;
        assert_eq!(samples[0].protocol, ReadProtocol::Paired);
        assert_eq!(samples[0].barcode_type, BarcodeKind::None);
        assert_eq!(data.distributions_for("FC1")?, vec![DistributionTarget::new(4, "/p")]);

        std::fs::write(dir.path().join("old_external_data.toml"), "")?;
        let err = find_external_data(dir.path(), &Config::default()).err().unwrap();
        assert!(err.to_string().contains("2 external data files"));
        Ok(())
    }
}

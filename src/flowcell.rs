// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! In-memory model of a flowcell: its lanes and the samples loaded on them.

use anyhow::Result;
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;

use crate::distribute::DistributionTarget;
use crate::error::PostRunError;
use crate::external::{BarcodeKind, ExternalData, ReadProtocol, SampleData};
use crate::paths::FlowcellPaths;
use crate::{NO_INDEX, NUM_LANES, UNDETERMINED};

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
    static ref NON_WORD: Regex = Regex::new(r"[^0-9A-Za-z_]").unwrap();
}

/// One sequenced sample. Read-only once its lane is built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sample {
    data: SampleData,
    /// Whether any sample sharing this lane has an Illumina index
    lane_has_illumina: bool,
}

impl Sample {
    pub fn data(&self) -> &SampleData {
        &self.data
    }

    pub fn lane(&self) -> usize {
        self.data.lane
    }

    pub fn name(&self) -> &str {
        &self.data.name
    }

    pub fn genome(&self) -> &str {
        &self.data.genome
    }

    pub fn protocol(&self) -> ReadProtocol {
        self.data.protocol
    }

    pub fn barcode_kind(&self) -> BarcodeKind {
        self.data.barcode_type
    }

    /// Name with whitespace removed and anything outside `[0-9A-Za-z_]` replaced by `_`.
    pub fn clean_name(&self) -> String {
        let name = WHITESPACE.replace_all(&self.data.name, "");
        NON_WORD.replace_all(&name, "_").into_owned()
    }

    pub fn reads(&self) -> Vec<usize> {
        match self.data.protocol {
            ReadProtocol::Single => vec![1],
            ReadProtocol::Paired => vec![1, 2],
        }
    }

    pub fn is_control(&self) -> bool {
        self.data.genome.contains("phiX")
    }

    /// Illumina index of the sample, empty unless Illumina-barcoded.
    pub fn illumina_barcode(&self) -> &str {
        match self.data.barcode_type {
            BarcodeKind::Illumina => &self.data.barcode,
            _ => "",
        }
    }

    /// Custom barcode of the sample, empty unless custom-barcoded.
    pub fn custom_barcode(&self) -> &str {
        match self.data.barcode_type {
            BarcodeKind::Custom => &self.data.barcode,
            _ => "",
        }
    }

    /// Barcode CASAVA sees: the Illumina index, else `NoIndex`. Custom
    /// barcodes are invisible to CASAVA.
    pub fn barcode_string(&self) -> &str {
        match self.data.barcode_type {
            BarcodeKind::Illumina if !self.data.barcode.is_empty() => &self.data.barcode,
            _ => NO_INDEX,
        }
    }

    /// Name of the combined file holding `read` of this sample:
    /// `s_<lane>_<read>_<barcode>.fastq.gz`. A `NoIndex` sample sharing a
    /// lane with Illumina-indexed samples ends up in `Undetermined`, and a
    /// custom-barcoded sample is named by its custom barcode, as the
    /// barcode splitter names it.
    pub fn fastq_file_name(&self, read: usize) -> String {
        let barcode = match self.data.barcode_type {
            BarcodeKind::Custom if !self.data.barcode.is_empty() => self.data.barcode.as_str(),
            _ if self.barcode_string() == NO_INDEX && self.lane_has_illumina => UNDETERMINED,
            _ => self.barcode_string(),
        };
        format!("s_{}_{}_{}.fastq.gz", self.data.lane, read, barcode)
    }
}

/// The samples sharing one lane, in input order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lane {
    number: usize,
    samples: Vec<Sample>,
}

impl Lane {
    fn new(number: usize, data: Vec<SampleData>) -> Lane {
        let lane_has_illumina = data
            .iter()
            .any(|d| d.barcode_type == BarcodeKind::Illumina && !d.barcode.is_empty());
        let samples = data
            .into_iter()
            .map(|data| Sample {
                data,
                lane_has_illumina,
            })
            .collect();
        Lane { number, samples }
    }

    pub fn number(&self) -> usize {
        self.number
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Barcode kind of the lane, taken from its first sample.
    pub fn barcode_kind(&self) -> BarcodeKind {
        self.samples
            .first()
            .map_or(BarcodeKind::None, |s| s.barcode_kind())
    }

    pub fn has_illumina_barcodes(&self) -> bool {
        self.samples.iter().any(|s| s.lane_has_illumina)
    }

    /// Custom barcodes used on this lane, in sample order.
    pub fn custom_barcodes(&self) -> Vec<&str> {
        self.samples
            .iter()
            .map(|s| s.custom_barcode())
            .filter(|b| !b.is_empty())
            .collect()
    }
}

/// Everything known about one flowcell for a post run.
#[derive(Clone)]
pub struct FlowcellRecord {
    id: String,
    lanes: Vec<Lane>,
    paths: Arc<dyn FlowcellPaths>,
    external_data: Arc<dyn ExternalData>,
}

impl FlowcellRecord {
    /// Fetch the flowcell's samples and partition them by lane. A lane
    /// number outside 1..=8 is fatal.
    pub fn build(
        paths: Arc<dyn FlowcellPaths>,
        external_data: Arc<dyn ExternalData>,
    ) -> Result<FlowcellRecord> {
        let id = paths.id().to_string();
        let samples = external_data.sample_data_for(&id)?;
        if let Some(bad) = samples.iter().find(|s| s.lane < 1 || s.lane > NUM_LANES) {
            return Err(PostRunError::InvalidLane { lane: bad.lane }.into());
        }

        let lanes = samples
            .into_iter()
            .map(|s| (s.lane, s))
            .into_group_map()
            .into_iter()
            .sorted_by_key(|(lane, _)| *lane)
            .map(|(lane, data)| Lane::new(lane, data))
            .collect();

        Ok(FlowcellRecord {
            id,
            lanes,
            paths,
            external_data,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Lanes with at least one sample, in lane order.
    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }

    pub fn lane(&self, number: usize) -> Option<&Lane> {
        self.lanes.iter().find(|l| l.number == number)
    }

    /// An owned copy of every sample; changing it doesn't touch the record.
    pub fn samples(&self) -> Vec<Sample> {
        self.each_sample_with_lane().map(|(s, _)| s.clone()).collect()
    }

    pub fn each_sample_with_lane(&self) -> impl Iterator<Item = (&Sample, &Lane)> + '_ {
        self.lanes
            .iter()
            .flat_map(|lane| lane.samples.iter().map(move |s| (s, lane)))
    }

    pub fn paths(&self) -> &dyn FlowcellPaths {
        self.paths.as_ref()
    }

    pub fn external_data(&self) -> &dyn ExternalData {
        self.external_data.as_ref()
    }

    pub fn distributions(&self) -> Result<Vec<DistributionTarget>> {
        self.external_data.distributions_for(&self.id)
    }
}

impl std::fmt::Debug for FlowcellRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowcellRecord")
            .field("id", &self.id)
            .field("base_dir", &self.paths.base_dir())
            .field("lanes", &self.lanes)
            .finish()
    }
}

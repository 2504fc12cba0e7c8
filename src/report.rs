// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! Per-sample reports: `Sample_Report.csv` for end users and the
//! `lims_data.json` upload for the LIMS.

use anyhow::{Context, Result};
use log::warn;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::Path;

use crate::custom_barcode::read_barcode_counts;
use crate::external::{BarcodeKind, ReadProtocol};
use crate::flowcell::{FlowcellRecord, Sample};

/// Run statistics for one read of one sample, as CASAVA reports them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReadStats {
    pub total_reads: String,
    pub pass_filter_reads: String,
    pub pass_filter_percent: String,
    pub align_percent: String,
    pub read_length: String,
}

/// Where run statistics come from.
pub trait StatsSource {
    fn stats_for(&self, sample: &Sample, read: usize) -> Option<ReadStats>;
}

/// No statistics available; every stats column is left blank.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoStats;

impl StatsSource for NoStats {
    fn stats_for(&self, _sample: &Sample, _read: usize) -> Option<ReadStats> {
        None
    }
}

/// One line of `Sample_Report.csv`.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ReportRow {
    pub output: String,
    pub order: String,
    #[serde(rename = "order type")]
    pub order_type: String,
    pub lane: usize,
    #[serde(rename = "sample name")]
    pub sample_name: String,
    #[serde(rename = "library id")]
    pub library_id: String,
    #[serde(rename = "illumina index")]
    pub illumina_index: String,
    #[serde(rename = "custom barcode")]
    pub custom_barcode: String,
    pub read: usize,
    pub reference: String,
    pub lab: String,
    #[serde(rename = "total reads")]
    pub total_reads: String,
    #[serde(rename = "pass filter reads")]
    pub pass_filter_reads: String,
    #[serde(rename = "pass filter percent")]
    pub pass_filter_percent: String,
    #[serde(rename = "align percent")]
    pub align_percent: String,
    #[serde(rename = "type")]
    pub read_type: String,
    #[serde(rename = "read length")]
    pub read_length: String,
}

/// One row per sample per read, in lane order. Custom-barcoded samples
/// take their read count from the splitter's count table when one exists.
pub fn sample_report_rows(flowcell: &FlowcellRecord, stats: &dyn StatsSource) -> Vec<ReportRow> {
    let mut lane_counts: HashMap<usize, HashMap<String, u64>> = HashMap::new();
    let mut rows = Vec::new();

    for (sample, _lane) in flowcell.each_sample_with_lane() {
        let custom_count = if sample.barcode_kind() == BarcodeKind::Custom {
            let counts = lane_counts
                .entry(sample.lane())
                .or_insert_with(|| custom_counts(flowcell, sample.lane()));
            counts.get(sample.custom_barcode()).copied()
        } else {
            None
        };

        for read in sample.reads() {
            let s = match (custom_count, stats.stats_for(sample, read)) {
                (Some(count), _) => ReadStats {
                    total_reads: count.to_string(),
                    ..ReadStats::default()
                },
                (None, Some(s)) => s,
                (None, None) => {
                    warn!("no run statistics for sample {} read {}", sample.name(), read);
                    ReadStats::default()
                }
            };

            let d = sample.data();
            rows.push(ReportRow {
                output: sample.fastq_file_name(read),
                order: d.order.clone().unwrap_or_default(),
                order_type: d.order_type.clone().unwrap_or_default(),
                lane: sample.lane(),
                sample_name: sample.clean_name(),
                library_id: d.lib_id.clone().unwrap_or_default(),
                illumina_index: sample.illumina_barcode().to_string(),
                custom_barcode: sample.custom_barcode().to_string(),
                read,
                reference: sample.genome().to_string(),
                lab: d.lab.clone().unwrap_or_default(),
                total_reads: s.total_reads,
                pass_filter_reads: s.pass_filter_reads,
                pass_filter_percent: s.pass_filter_percent,
                align_percent: s.align_percent,
                read_type: match sample.protocol() {
                    ReadProtocol::Single => "single".to_string(),
                    ReadProtocol::Paired => "paired".to_string(),
                },
                read_length: s.read_length,
            });
        }
    }
    rows
}

fn custom_counts(flowcell: &FlowcellRecord, lane: usize) -> HashMap<String, u64> {
    let path = match flowcell.paths().custom_barcode_path_out(lane) {
        Ok(p) if p.exists() => p,
        _ => return HashMap::new(),
    };
    read_barcode_counts(&path).unwrap_or_else(|e| {
        warn!("error reading barcode counts {:?}: {:#}", path, e);
        HashMap::new()
    })
}

/// Write report rows as CSV with a header line.
pub fn write_sample_report<W: Write>(rows: &[ReportRow], w: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(w);
    for r in rows {
        wtr.serialize(r)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_sample_report_file(rows: &[ReportRow], path: &Path) -> Result<()> {
    let f = std::fs::File::create(path).with_context(|| format!("error creating {:?}", path))?;
    write_sample_report(rows, f).with_context(|| format!("error writing {:?}", path))
}

/// One entry of the LIMS upload.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct LimsUploadRecord {
    #[serde(rename = "FCID")]
    pub flowcell_id: String,
    #[serde(rename = "laneID")]
    pub lane: usize,
    #[serde(rename = "readNo")]
    pub read: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
}

/// One record per sample per read. A custom-barcoded lane is reported once,
/// through its first sample.
pub fn lims_upload_records(flowcell: &FlowcellRecord) -> Vec<LimsUploadRecord> {
    let mut custom_lanes_seen = HashSet::new();
    let mut records = Vec::new();

    for (sample, _lane) in flowcell.each_sample_with_lane() {
        if sample.barcode_kind() == BarcodeKind::Custom
            && !custom_lanes_seen.insert(sample.lane())
        {
            continue;
        }
        for read in sample.reads() {
            records.push(LimsUploadRecord {
                flowcell_id: flowcell.id().to_string(),
                lane: sample.lane(),
                read,
                index: sample.data().raw_barcode.clone().filter(|b| !b.is_empty()),
            });
        }
    }
    records
}

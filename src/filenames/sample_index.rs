use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;

use super::{base_name, FileKind, FileNameParser, FileRecord};
use crate::error::PostRunError;
use crate::sample_sheet::SampleSheet;
use crate::{NUM_LANES, UNDETERMINED};

lazy_static! {
    static ref SAMPLE_INDEX_FASTQ_REGEX: Regex =
        Regex::new(r"^(.*)_S(\d+)_L(\d{3})_R(\d)_(\d{3})\.fastq\.gz$").unwrap();
    static ref SAMPLE_INDEX_EXPORT_REGEX: Regex =
        Regex::new(r"^(.*)_S(\d+)_L(\d{3})_R(\d)_(\d{3})_export\.txt\.gz$").unwrap();
    static ref BARCODE_REGEX: Regex = Regex::new(r"^([ATCGN]+|NoIndex|Undetermined)$").unwrap();
}

/// The bcl2fastq / MiSeq naming convention: `L1401_S1_L001_R1_001.fastq.gz`.
/// The barcode isn't part of the name; it is the `index` of the `S<n>`-th
/// sample in the run's sample sheet. `S0` holds the undetermined reads.
#[derive(Clone, Debug)]
pub struct SampleIndexNames {
    kind: FileKind,
    sample_sheet: Arc<SampleSheet>,
}

impl SampleIndexNames {
    pub fn new(kind: FileKind, sample_sheet: Arc<SampleSheet>) -> SampleIndexNames {
        SampleIndexNames { kind, sample_sheet }
    }

    fn regex(&self) -> &'static Regex {
        match self.kind {
            FileKind::Fastq => &SAMPLE_INDEX_FASTQ_REGEX,
            FileKind::Export => &SAMPLE_INDEX_EXPORT_REGEX,
        }
    }

    fn barcode_for(&self, index: usize, sample_name: &str, path: &Path) -> Result<String> {
        if index == 0 {
            return Ok(UNDETERMINED.to_string());
        }

        let row = self
            .sample_sheet
            .sample(index)
            .ok_or_else(|| PostRunError::MissingSampleSheetEntry {
                index,
                count: self.sample_sheet.samples.len(),
                path: path.to_path_buf(),
            })?;

        let names = [row.get("Sample_Name"), row.get("Sample_ID")];
        if !names.iter().flatten().any(|n| *n == sample_name) {
            return Err(PostRunError::SampleSheetMismatch {
                index,
                expected: row.name().unwrap_or("").to_string(),
                found: sample_name.to_string(),
                path: path.to_path_buf(),
            }
            .into());
        }

        let barcode = row.index().unwrap_or("");
        if !BARCODE_REGEX.is_match(barcode) {
            return Err(PostRunError::InvalidBarcode {
                sample: sample_name.to_string(),
                barcode: barcode.to_string(),
            }
            .into());
        }
        Ok(barcode.to_string())
    }
}

impl FileNameParser for SampleIndexNames {
    fn parse(&self, path: &Path) -> Result<FileRecord> {
        let name = base_name(path);
        let cap = self
            .regex()
            .captures(&name)
            .ok_or_else(|| PostRunError::FileNameMismatch {
                path: path.to_path_buf(),
            })?;

        let sample_name = cap[1].to_string();
        let index: usize = cap[2].parse()?;
        let lane: usize = cap[3].parse()?;
        if lane < 1 || lane > NUM_LANES {
            return Err(PostRunError::InvalidLane { lane }.into());
        }
        let barcode = self.barcode_for(index, &sample_name, path)?;

        Ok(FileRecord {
            sample_name,
            barcode,
            lane,
            read: cap[4].parse()?,
            tile_set: cap[5].parse()?,
            base_name: name,
            full_path: path.to_path_buf(),
        })
    }
}

use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;

use super::{base_name, FileKind, FileNameParser, FileRecord};
use crate::error::PostRunError;
use crate::NUM_LANES;

lazy_static! {
    static ref CASAVA_FASTQ_REGEX: Regex =
        Regex::new(r"^(.*)_([ATCGN]+|NoIndex|Undetermined)_L(\d{3})_R(\d)_(\d{3})\.fastq\.gz$")
            .unwrap();
    static ref CASAVA_EXPORT_REGEX: Regex =
        Regex::new(r"^(.*)_([ATCGN]+|NoIndex|Undetermined)_L(\d{3})_R(\d)_(\d{3})_export\.txt\.gz$")
            .unwrap();
}

/// The CASAVA 1.8 naming convention, with the barcode embedded in the
/// file name: `1_ACTTGA_ACTTGA_L001_R1_002.fastq.gz` is sample `1_ACTTGA`,
/// barcode `ACTTGA`, lane 1, read 1, set 2.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CasavaNames {
    kind: FileKind,
}

impl CasavaNames {
    pub fn new(kind: FileKind) -> CasavaNames {
        CasavaNames { kind }
    }

    fn regex(&self) -> &'static Regex {
        match self.kind {
            FileKind::Fastq => &CASAVA_FASTQ_REGEX,
            FileKind::Export => &CASAVA_EXPORT_REGEX,
        }
    }
}

impl FileNameParser for CasavaNames {
    fn parse(&self, path: &Path) -> Result<FileRecord> {
        let name = base_name(path);
        let cap = self
            .regex()
            .captures(&name)
            .ok_or_else(|| PostRunError::FileNameMismatch {
                path: path.to_path_buf(),
            })?;

        let lane: usize = cap[3].parse()?;
        if lane < 1 || lane > NUM_LANES {
            return Err(PostRunError::InvalidLane { lane }.into());
        }

        Ok(FileRecord {
            sample_name: cap[1].to_string(),
            barcode: cap[2].to_string(),
            lane,
            read: cap[4].parse()?,
            tile_set: cap[5].parse()?,
            base_name: name,
            full_path: path.to_path_buf(),
        })
    }
}

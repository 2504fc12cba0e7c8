// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! Parse sequencer-generated file names into `FileRecord`s.
//!
//! Two naming grammars are understood:
//!
//! * CASAVA 1.8: `<sample>_<barcode>_L<lane:3>_R<read>_<set:3><suffix>`, where
//!   the barcode is a DNA sequence or one of `NoIndex` / `Undetermined`.
//!   See [`casava::CasavaNames`].
//! * bcl2fastq / MiSeq: `<sample>_S<index>_L<lane:3>_R<read>_<set:3><suffix>`,
//!   where the barcode is looked up in the run's sample sheet by the 1-based
//!   sample index. See [`sample_index::SampleIndexNames`].
//!
//! A file name that does not follow the grammar is fatal: guessing would risk
//! shipping one sample's reads to another sample's owner.

pub mod casava;
pub mod sample_index;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use casava::CasavaNames;
pub use sample_index::SampleIndexNames;

/// One parsed per-tile input file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileRecord {
    pub base_name: String,
    pub full_path: PathBuf,
    pub sample_name: String,
    /// DNA sequence, `NoIndex` or `Undetermined`
    pub barcode: String,
    pub lane: usize,
    pub read: usize,
    /// Tile set number, only used to order files within a group
    pub tile_set: usize,
}

/// The kinds of per-tile files that get grouped and combined.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// `*.fastq.gz` files from the unaligned tree
    Fastq,
    /// `*_export.txt.gz` files from the aligned tree
    Export,
}

impl FileKind {
    /// File name suffix, also used as the suffix of combined file names.
    pub fn suffix(&self) -> &'static str {
        match self {
            FileKind::Fastq => ".fastq.gz",
            FileKind::Export => "_export.txt.gz",
        }
    }

    /// Recursive glob used to find files of this kind below a directory.
    pub fn search_pattern(&self) -> &'static str {
        match self {
            FileKind::Fastq => "**/*.fastq.gz",
            FileKind::Export => "**/*_export.txt.gz",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            FileKind::Fastq => "fastq",
            FileKind::Export => "export",
        }
    }
}

/// A naming grammar that turns a file path into a `FileRecord`.
pub trait FileNameParser {
    fn parse(&self, path: &Path) -> Result<FileRecord>;

    /// Parse every path, failing on the first one that doesn't match.
    fn parse_all(&self, paths: &[PathBuf]) -> Result<Vec<FileRecord>> {
        paths.iter().map(|p| self.parse(p)).collect()
    }
}

/// The naming convention in effect for a run.
#[derive(Clone, Debug)]
pub enum NamingConvention {
    Casava(CasavaNames),
    SampleIndex(SampleIndexNames),
}

impl FileNameParser for NamingConvention {
    fn parse(&self, path: &Path) -> Result<FileRecord> {
        match self {
            NamingConvention::Casava(n) => n.parse(path),
            NamingConvention::SampleIndex(n) => n.parse(path),
        }
    }
}

/// File name component of `path`, or the whole path if it has none.
pub(crate) fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

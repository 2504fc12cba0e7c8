// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! Collect per-tile files into one logical file per (lane, read, barcode).

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::PostRunError;
use crate::filenames::{FileKind, FileNameParser, FileRecord};
use crate::paths::glob_paths;
use crate::shell::Shell;
use crate::UNDETERMINED;

/// How group names are formed and which records are kept.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct GroupOptions {
    pub prefix: String,
    pub suffix: String,
    pub exclude_undetermined: bool,
}

impl GroupOptions {
    /// Options for files of `kind`: `s_` prefix, the kind's suffix, and
    /// undetermined reads left out.
    pub fn for_kind(kind: FileKind) -> GroupOptions {
        GroupOptions {
            prefix: "s_".to_string(),
            suffix: kind.suffix().to_string(),
            exclude_undetermined: true,
        }
    }

    /// Same options, but keeping `Undetermined` records.
    pub fn with_undetermined(mut self) -> GroupOptions {
        self.exclude_undetermined = false;
        self
    }

    /// `{prefix}{lane}_{read}_{barcode}{suffix}`
    pub fn group_name(&self, lane: usize, read: usize, barcode: &str) -> String {
        format!("{}{}_{}_{}{}", self.prefix, lane, read, barcode, self.suffix)
    }
}

impl Default for GroupOptions {
    fn default() -> GroupOptions {
        GroupOptions::for_kind(FileKind::Fastq)
    }
}

/// The files that make up one logical output file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FileGroup {
    pub group_name: String,
    /// Where the group currently lives: the combined file, or its filtered
    /// replacement once filtering has run
    pub output_path: PathBuf,
    pub sample_name: String,
    pub lane: usize,
    pub read: usize,
    pub barcode: String,
    /// Per-tile inputs in ascending `tile_set` order
    pub member_files: Vec<FileRecord>,
}

impl FileGroup {
    /// Member paths in concatenation order.
    pub fn paths(&self) -> Vec<&Path> {
        self.member_files.iter().map(|r| r.full_path.as_path()).collect()
    }
}

/// Group `records` by `{prefix}{lane}_{read}_{barcode}{suffix}`. Groups are
/// returned in order of first appearance; members are sorted by tile set.
/// Two records sharing a group but disagreeing on sample or lane is fatal.
pub fn group_files(
    records: &[FileRecord],
    output_dir: &Path,
    options: &GroupOptions,
    shell: &Shell,
) -> Result<Vec<FileGroup>> {
    let mut groups: Vec<FileGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for rec in records {
        if rec.barcode == UNDETERMINED && options.exclude_undetermined {
            shell.log(format!(
                "# Undetermined sample lane: {} - name: {}. Skipping",
                rec.lane, rec.sample_name
            ));
            continue;
        }

        let key = options.group_name(rec.lane, rec.read, &rec.barcode);
        match index.get(&key) {
            Some(&i) => {
                let group = &mut groups[i];
                if group.sample_name != rec.sample_name || group.lane != rec.lane {
                    return Err(PostRunError::GroupCollision {
                        group: key,
                        path: rec.full_path.clone(),
                        expected_sample: group.sample_name.clone(),
                        expected_lane: group.lane,
                        found_sample: rec.sample_name.clone(),
                        found_lane: rec.lane,
                    }
                    .into());
                }
                group.member_files.push(rec.clone());
            }
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(FileGroup {
                    output_path: output_dir.join(&key),
                    group_name: key,
                    sample_name: rec.sample_name.clone(),
                    lane: rec.lane,
                    read: rec.read,
                    barcode: rec.barcode.clone(),
                    member_files: vec![rec.clone()],
                });
            }
        }
    }

    for g in &mut groups {
        // stable, so equal tile sets keep their input order
        g.member_files.sort_by_key(|r| r.tile_set);
    }
    Ok(groups)
}

/// All files of `kind` below `dir`, sorted. Finding none is a
/// `NoInputFiles` error; the undetermined step treats it as empty.
pub fn find_files(dir: &Path, kind: FileKind, shell: &Shell) -> Result<Vec<PathBuf>> {
    let pattern = dir.join(kind.search_pattern());
    let files = glob_paths(&pattern.to_string_lossy());
    if files.is_empty() {
        shell.log(format!("# ERROR: no {} files found in {}", kind.description(), dir.display()));
        return Err(PostRunError::NoInputFiles {
            kind: kind.description(),
            dir: dir.to_path_buf(),
        }
        .into());
    }
    shell.log(format!(
        "# {} {} files found in {}",
        files.len(),
        kind.description(),
        dir.display()
    ));
    Ok(files)
}

/// Find, parse and group the files of `kind` below `input_dir`, with group
/// outputs placed in `output_dir` (created if needed).
pub fn group_input_files(
    input_dir: &Path,
    output_dir: &Path,
    kind: FileKind,
    parser: &dyn FileNameParser,
    options: &GroupOptions,
    shell: &Shell,
) -> Result<Vec<FileGroup>> {
    shell.mkdir_p(output_dir)?;
    let files = find_files(input_dir, kind, shell)?;
    let records = parser.parse_all(&files)?;
    group_files(&records, output_dir, options, shell)
}

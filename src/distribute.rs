// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! Deliver finished files to project directories.

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::group::FileGroup;
use crate::shell::{copy_command, Shell};
use crate::utils;

/// Where the files of one lane should end up.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DistributionTarget {
    pub lane: usize,
    pub path: PathBuf,
}

impl DistributionTarget {
    pub fn new(lane: usize, path: impl Into<PathBuf>) -> DistributionTarget {
        DistributionTarget {
            lane,
            path: path.into(),
        }
    }

    /// A target that isn't tied to a lane, for `distribute_to_unique`.
    pub fn directory(path: impl Into<PathBuf>) -> DistributionTarget {
        DistributionTarget::new(0, path)
    }
}

/// What happened to one group's copy, reported back to the coordinating thread.
enum CopyOutcome {
    Missing(PathBuf),
    Copied(String),
    Failed(String, anyhow::Error),
}

/// Copy each group's current output file into every target directory of
/// the group's lane. Copies for one target run on a pool of `workers`
/// threads; results are logged afterwards in group order. A missing source
/// is logged and skipped.
pub fn distribute_files(
    groups: &[FileGroup],
    targets: &[DistributionTarget],
    workers: usize,
    shell: &Shell,
) -> Result<()> {
    if targets.is_empty() {
        return Ok(());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .context("error building distribution thread pool")?;

    for target in targets {
        shell.log(format!("# Creating directory {}", target.path.display()));
        if let Err(e) = shell.mkdir_p(&target.path) {
            shell.log_failure(&e);
            continue;
        }

        let lane_groups: Vec<&FileGroup> =
            groups.iter().filter(|g| g.lane == target.lane).collect();
        shell.log(format!("# Found {} groups", lane_groups.len()));

        let dry_run = shell.dry_run();
        let mut outcomes = Vec::with_capacity(lane_groups.len());
        pool.install(|| {
            lane_groups
                .par_iter()
                .map(|g| copy_group(&g.output_path, &target.path, dry_run))
                .collect_into_vec(&mut outcomes);
        });

        for outcome in outcomes {
            match outcome {
                CopyOutcome::Missing(p) => {
                    shell.log(format!("# Error: file not found:{}.", p.display()));
                }
                CopyOutcome::Copied(cmd) => shell.log(cmd),
                CopyOutcome::Failed(cmd, e) => {
                    shell.log(cmd);
                    shell.log_failure(&e);
                }
            }
        }
    }
    Ok(())
}

fn copy_group(src: &Path, dest_dir: &Path, dry_run: bool) -> CopyOutcome {
    if !src.exists() && !dry_run {
        return CopyOutcome::Missing(src.to_path_buf());
    }
    let cmd = copy_command(src, dest_dir);
    if dry_run {
        return CopyOutcome::Copied(cmd);
    }
    match utils::copy_into(src, dest_dir) {
        Ok(()) => CopyOutcome::Copied(cmd),
        Err(e) => CopyOutcome::Failed(cmd, e),
    }
}

/// Copy every source (file or directory) into every target directory,
/// skipping any destination path this call has already delivered to. Many
/// lanes usually share one project directory, and QC directories are big.
/// A missing source is logged and skipped.
pub fn distribute_to_unique<P: AsRef<Path>>(
    targets: &[DistributionTarget],
    sources: &[P],
    shell: &Shell,
) -> Result<()> {
    for src in sources {
        let src = src.as_ref();
        if !shell.check_exists(&[src]) {
            continue;
        }
        let name = match src.file_name() {
            Some(n) => n,
            None => {
                shell.log(format!("# Error: cannot distribute {}", src.display()));
                continue;
            }
        };

        let mut delivered: HashSet<PathBuf> = HashSet::new();
        for target in targets {
            let dest = target.path.join(name);
            if !delivered.insert(dest) {
                continue;
            }

            if !target.path.exists() {
                if let Err(e) = shell.mkdir_p(&target.path) {
                    shell.log_failure(&e);
                    continue;
                }
            }
            if let Err(e) = shell.copy_into(src, &target.path) {
                shell.log_failure(&e);
            }
        }
    }
    Ok(())
}

/// Compare the copies of `relative_path` delivered to each distinct target
/// directory against the first copy found. Returns the directories whose copy
/// differs; each is logged as a warning. Nothing is changed on disk.
pub fn check_delivered_copies(
    targets: &[DistributionTarget],
    relative_path: &Path,
    shell: &Shell,
) -> Result<Vec<PathBuf>> {
    let mut seen = HashSet::new();
    let mut reference: Option<Vec<u8>> = None;
    let mut mismatched = Vec::new();

    for target in targets {
        if !seen.insert(&target.path) {
            continue;
        }
        let copy = target.path.join(relative_path);
        if !copy.is_file() {
            continue;
        }
        let bytes = std::fs::read(&copy).with_context(|| format!("error reading {:?}", copy))?;
        match &reference {
            None => reference = Some(bytes),
            Some(r) if *r == bytes => (),
            Some(_) => {
                shell.log(format!(
                    "# WARNING: {} does not match in {}",
                    relative_path.display(),
                    target.path.display()
                ));
                mismatched.push(target.path.clone());
            }
        }
    }
    Ok(mismatched)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::combine::cat_files;
    use crate::filenames::{CasavaNames, FileKind};
    use crate::group::{group_input_files, GroupOptions};
    use pretty_assertions::assert_eq;

    #[test]
    fn unique_destination_copied_once() -> Result<()> {
        let shell = Shell::new(true);
        let target = DistributionTarget::new(1, "/out/proj");
        distribute_to_unique(&[target.clone(), target], &["/a/file"], &shell)?;

        let lines = shell.transcript().lines();
        let copies: Vec<&String> = lines.iter().filter(|l| l.starts_with("cp")).collect();
        assert_eq!(copies, vec!["cp /a/file /out/proj"]);
        Ok(())
    }

    #[test]
    fn same_dir_different_lanes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let src = dir.path().join("Sample_Report.csv");
        std::fs::write(&src, "output\n")?;
        let proj = dir.path().join("proj");
        let other = dir.path().join("other");
        let targets = vec![
            DistributionTarget::new(1, &proj),
            DistributionTarget::new(2, &proj),
            DistributionTarget::new(3, &other),
        ];

        let shell = Shell::new(false);
        distribute_to_unique(&targets, &[&src], &shell)?;
        assert!(proj.join("Sample_Report.csv").exists());
        assert!(other.join("Sample_Report.csv").exists());
        let copies = shell
            .transcript()
            .lines()
            .into_iter()
            .filter(|l| l.starts_with("cp "))
            .count();
        assert_eq!(copies, 2);
        Ok(())
    }

    #[test]
    fn directory_sources_copied_recursively() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let interop = dir.path().join("InterOp");
        std::fs::create_dir(&interop)?;
        std::fs::write(interop.join("TileMetricsOut.bin"), b"t")?;
        let qc = dir.path().join("qcdata/FC1");

        let shell = Shell::new(false);
        distribute_to_unique(&[DistributionTarget::directory(&qc)], &[&interop], &shell)?;
        assert!(qc.join("InterOp/TileMetricsOut.bin").exists());
        assert!(shell
            .transcript()
            .lines()
            .contains(&format!("cp -r {} {}", interop.display(), qc.display())));
        Ok(())
    }

    #[test]
    fn missing_source_and_no_targets() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let shell = Shell::new(false);
        let target = DistributionTarget::new(1, dir.path().join("proj"));
        distribute_to_unique(&[target.clone()], &[dir.path().join("nope")], &shell)?;
        assert!(!dir.path().join("proj").exists());

        let group = FileGroup {
            group_name: "s_1_1_ACTTGA.fastq.gz".to_string(),
            output_path: dir.path().join("s_1_1_ACTTGA.fastq.gz"),
            sample_name: "s1".to_string(),
            lane: 1,
            read: 1,
            barcode: "ACTTGA".to_string(),
            member_files: vec![],
        };
        distribute_files(&[group.clone()], &[], 4, &shell)?;
        distribute_files(&[group], &[target], 4, &shell)?;

        let lines = shell.transcript().lines();
        assert!(lines
            .iter()
            .any(|l| l.starts_with("# Error: file not found:") && l.contains("nope")));
        assert!(lines.iter().any(|l| l.contains("s_1_1_ACTTGA.fastq.gz.")));
        assert!(!lines.iter().any(|l| l.starts_with("cp ")));
        Ok(())
    }

    #[test]
    fn only_matching_lanes() -> Result<()> {
        let shell = Shell::new(true);
        let groups: Vec<FileGroup> = (1..=3)
            .map(|lane| FileGroup {
                group_name: format!("s_{}_1_NoIndex.fastq.gz", lane),
                output_path: PathBuf::from(format!("/run/all/s_{}_1_NoIndex.fastq.gz", lane)),
                sample_name: format!("L{}", lane),
                lane,
                read: 1,
                barcode: "NoIndex".to_string(),
                member_files: vec![],
            })
            .collect();
        distribute_files(&groups, &[DistributionTarget::new(2, "/proj")], 4, &shell)?;
        assert_eq!(
            shell.transcript().lines(),
            vec![
                "# Creating directory /proj",
                "mkdir -p /proj",
                "# Found 1 groups",
                "cp /run/all/s_2_1_NoIndex.fastq.gz /proj",
            ]
        );
        Ok(())
    }

    #[test]
    fn mismatched_copies_are_reported() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let targets: Vec<DistributionTarget> = ["a", "b", "c", "missing"]
            .iter()
            .enumerate()
            .map(|(i, d)| DistributionTarget::new(i + 1, dir.path().join(d)))
            .collect();
        for (d, text) in &[("a", "same\n"), ("b", "same\n"), ("c", "other\n")] {
            std::fs::create_dir(dir.path().join(d))?;
            std::fs::write(dir.path().join(d).join("Sample_Report.csv"), text)?;
        }

        let shell = Shell::new(false);
        let bad = check_delivered_copies(&targets, Path::new("Sample_Report.csv"), &shell)?;
        assert_eq!(bad, vec![dir.path().join("c")]);
        assert_eq!(
            shell.transcript().lines(),
            vec![format!(
                "# WARNING: Sample_Report.csv does not match in {}",
                dir.path().join("c").display()
            )]
        );
        Ok(())
    }

    fn write_gz(path: &Path, text: &str) -> Result<()> {
        use flate2::write::GzEncoder;
        use std::io::Write;
        let mut gz = GzEncoder::new(std::fs::File::create(path)?, flate2::Compression::default());
        gz.write_all(text.as_bytes())?;
        gz.finish()?;
        Ok(())
    }

    #[test]
    fn group_combine_distribute() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sample_dir = dir.path().join("Unaligned/Project_FC1/Sample_s1");
        std::fs::create_dir_all(&sample_dir)?;
        // written out of order; concatenation must follow tile order
        for t in &[3, 1, 2] {
            let name = format!("s1_ACTTGA_L001_R1_{:03}.fastq.gz", t);
            write_gz(
                &sample_dir.join(name),
                &format!("@M:1:FC:1:1:{}:1 1:N:0:ACTTGA\nACGT\n+\nIIII\n", t),
            )?;
        }

        let shell = Shell::new(false);
        let groups = group_input_files(
            &dir.path().join("Unaligned/Project_FC1"),
            &dir.path().join("Unaligned/all"),
            FileKind::Fastq,
            &CasavaNames::new(FileKind::Fastq),
            &GroupOptions::default(),
            &shell,
        )?;
        cat_files(&groups, &shell)?;
        let proj = dir.path().join("out/proj");
        distribute_files(&groups, &[DistributionTarget::new(1, &proj)], 4, &shell)?;

        let delivered: Vec<PathBuf> = std::fs::read_dir(&proj)?
            .map(|e| e.map(|e| e.path()))
            .collect::<std::io::Result<_>>()?;
        assert_eq!(delivered, vec![proj.join("s_1_1_ACTTGA.fastq.gz")]);

        let expected = dir.path().join("expected.fastq.gz");
        let mut bytes = Vec::new();
        for t in 1..=3 {
            let tile = sample_dir.join(format!("s1_ACTTGA_L001_R1_{:03}.fastq.gz", t));
            bytes.extend(std::fs::read(tile)?);
        }
        std::fs::write(&expected, bytes)?;
        assert!(file_diff::diff(
            proj.join("s_1_1_ACTTGA.fastq.gz").to_str().unwrap(),
            expected.to_str().unwrap()
        ));
        Ok(())
    }
}

// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! Lanes with lab-defined barcodes reach us as one `NoIndex` file per read.
//! Here they are split by the barcode at the start of each read with
//! `fastx_barcode_splitter.pl`, driven by a per-lane barcode table.

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::filenames::base_name;
use crate::flowcell::FlowcellRecord;
use crate::group::FileGroup;
use crate::paths::{glob_paths, FlowcellPaths};
use crate::shell::{CommandInput, ExternalCommand, FailurePolicy, Shell};
use crate::{NUM_LANES, UNDETERMINED};

/// Name the splitter gives reads that match no barcode.
const UNMATCHED: &str = "unmatched";
const SPLIT_SUFFIX: &str = ".fastq";

/// A lane's barcode table as written by this run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BarcodeTable {
    pub lane: usize,
    pub barcodes: Vec<String>,
}

/// Write `custom_barcodes_<lane>.txt` for every lane with custom-barcoded
/// samples, one `<barcode>\t<barcode>` line per sample.
pub fn write_custom_barcode_files(
    flowcell: &FlowcellRecord,
    shell: &Shell,
) -> Result<Vec<BarcodeTable>> {
    let mut written = Vec::new();
    for lane in 1..=NUM_LANES {
        let barcodes: Vec<String> = match flowcell.lane(lane) {
            Some(l) => l.custom_barcodes().into_iter().map(String::from).collect(),
            None => continue,
        };
        if barcodes.is_empty() {
            continue;
        }

        let path = flowcell.paths().custom_barcode_path(lane)?;
        shell.perform(
            format!("# Writing {} custom barcodes to {}", barcodes.len(), path.display()),
            || {
                let f = File::create(&path).with_context(|| format!("error creating {:?}", path))?;
                let mut w = BufWriter::new(f);
                for b in &barcodes {
                    writeln!(w, "{}\t{}", b, b)?;
                }
                w.flush()?;
                Ok(())
            },
        )?;
        written.push(BarcodeTable { lane, barcodes });
    }
    Ok(written)
}

/// Barcodes listed in a barcode table, in file order.
fn table_barcodes(path: &Path) -> Result<Vec<String>> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("error reading {:?}", path))?;
    Ok(text
        .lines()
        .filter_map(|l| l.split('\t').next())
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty())
        .collect())
}

/// Split every group whose lane has a barcode table into one group per
/// barcode. Reads matching no barcode go to `Undetermined`. Splitting and
/// compressing are logged as separate steps; a failing splitter is logged
/// and the lane yields whatever files it left behind.
///
/// `written` are the tables written by this run. In dry-run mode they never
/// reach the disk but their lanes are still split.
pub fn split_custom_barcodes(
    groups: &[FileGroup],
    written: &[BarcodeTable],
    paths: &dyn FlowcellPaths,
    splitter: &Path,
    shell: &Shell,
) -> Result<Vec<FileGroup>> {
    let mut split_groups = Vec::new();

    for group in groups {
        let table = paths.custom_barcode_path(group.lane)?;
        let pending = written.iter().find(|t| t.lane == group.lane);
        if !table.exists() && !(shell.dry_run() && pending.is_some()) {
            continue;
        }

        let out_dir = group
            .output_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let prefix = format!("s_{}_{}_", group.lane, group.read);
        let path_prefix = out_dir.join(&prefix);

        shell.log(format!("# splitting {} by custom barcode", group.output_path.display()));
        let cmd = ExternalCommand::new(splitter)
            .arg("--bcfile")
            .arg(&table)
            .arg("--bol")
            .arg("--prefix")
            .arg(&path_prefix)
            .arg("--suffix")
            .arg(SPLIT_SUFFIX)
            .stdin(CommandInput::Gunzip(group.output_path.clone()))
            .output(paths.custom_barcode_path_out(group.lane)?);
        shell.execute(&cmd, FailurePolicy::Continue)?;

        let unmatched = out_dir.join(format!("{}{}{}", prefix, UNMATCHED, SPLIT_SUFFIX));
        let undetermined = out_dir.join(format!("{}{}{}", prefix, UNDETERMINED, SPLIT_SUFFIX));
        if unmatched.exists() || shell.dry_run() {
            if let Err(e) = shell.rename(&unmatched, &undetermined) {
                shell.log_failure(&e);
            }
        }

        let split_files: Vec<PathBuf> = if shell.dry_run() {
            let barcodes = match pending {
                Some(t) => t.barcodes.clone(),
                None => table_barcodes(&table)?,
            };
            let mut expected: Vec<PathBuf> = barcodes
                .iter()
                .map(|b| out_dir.join(format!("{}{}{}", prefix, b, SPLIT_SUFFIX)))
                .collect();
            expected.push(undetermined);
            expected
        } else {
            glob_paths(&format!("{}*{}", path_prefix.display(), SPLIT_SUFFIX))
        };

        shell.log(format!("# compressing {} split files", split_files.len()));
        for split in split_files {
            let mut gz_path = split.clone().into_os_string();
            gz_path.push(".gz");
            let gz_path = PathBuf::from(gz_path);

            let res = shell.perform(format!("gzip -f {}", split.display()), || {
                gzip_file(&split, &gz_path)
            });
            if let Err(e) = res {
                shell.log_failure(&e);
                continue;
            }

            let group_name = base_name(&gz_path);
            let barcode = group_name
                .trim_start_matches(&prefix)
                .trim_end_matches(".fastq.gz")
                .to_string();
            split_groups.push(FileGroup {
                group_name,
                output_path: gz_path,
                sample_name: group.sample_name.clone(),
                lane: group.lane,
                read: group.read,
                barcode,
                member_files: Vec::new(),
            });
        }
    }
    Ok(split_groups)
}

/// `gzip -f`: compress `src` to `dest`, replacing it, then remove `src`.
fn gzip_file(src: &Path, dest: &Path) -> Result<()> {
    let mut r = File::open(src).with_context(|| format!("error opening {:?}", src))?;
    let f = File::create(dest).with_context(|| format!("error creating {:?}", dest))?;
    let mut gz = GzEncoder::new(BufWriter::new(f), Compression::default());
    io::copy(&mut r, &mut gz)?;
    gz.finish()?.flush()?;
    std::fs::remove_file(src)?;
    Ok(())
}

/// Read counts per barcode from the splitter's output table
/// (`Barcode\tCount\tLocation`).
pub fn read_barcode_counts(path: &Path) -> Result<HashMap<String, u64>> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("error opening {:?}", path))?;

    let mut counts = HashMap::new();
    for rec in rdr.records() {
        let rec = rec?;
        if let (Some(barcode), Some(count)) = (rec.get(0), rec.get(1)) {
            if let Ok(n) = count.parse() {
                counts.insert(barcode.to_string(), n);
            }
        }
    }
    Ok(counts)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Config;
    use crate::external::{BarcodeKind, SampleData, Snapshot, SnapshotData};
    use crate::paths::HiSeqPaths;
    use crate::utils::open_with_gz;
    use pretty_assertions::assert_eq;
    use std::io::Read;
    use std::sync::Arc;

    fn lane_group(dir: &Path) -> FileGroup {
        FileGroup {
            group_name: "s_2_1_NoIndex.fastq.gz".to_string(),
            output_path: dir.join("Unaligned/all/s_2_1_NoIndex.fastq.gz"),
            sample_name: "lane2".to_string(),
            lane: 2,
            read: 1,
            barcode: "NoIndex".to_string(),
            member_files: vec![],
        }
    }

    #[test]
    fn barcode_tables() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let paths = HiSeqPaths::with_base_dir("FC1", dir.path(), &Config::default());
        let custom = |lane, name: &str, bc: &str| SampleData {
            lane,
            name: name.to_string(),
            barcode: bc.to_string(),
            barcode_type: BarcodeKind::Custom,
            ..SampleData::default()
        };
        let data = SnapshotData::new(Snapshot {
            samples: vec![
                custom(2, "a", "ACGT"),
                custom(2, "b", "TGCA"),
                SampleData {
                    lane: 3,
                    name: "c".to_string(),
                    ..SampleData::default()
                },
            ],
            distributions: vec![],
        });
        let fc = FlowcellRecord::build(Arc::new(paths), Arc::new(data))?;

        let tables = write_custom_barcode_files(&fc, &Shell::new(false))?;
        assert_eq!(
            tables,
            vec![BarcodeTable {
                lane: 2,
                barcodes: vec!["ACGT".to_string(), "TGCA".to_string()],
            }]
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("custom_barcodes_2.txt"))?,
            "ACGT\tACGT\nTGCA\tTGCA\n"
        );
        assert!(!dir.path().join("custom_barcodes_3.txt").exists());
        Ok(())
    }

    #[test]
    fn lanes_without_table_are_untouched() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let paths = HiSeqPaths::with_base_dir("FC1", dir.path(), &Config::default());
        let shell = Shell::new(true);
        let out = split_custom_barcodes(
            &[lane_group(dir.path())],
            &[],
            &paths,
            Path::new("splitter"),
            &shell,
        )?;
        assert!(out.is_empty());
        assert!(shell.transcript().lines().is_empty());
        Ok(())
    }

    #[test]
    fn dry_run_split() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("custom_barcodes_2.txt"), "ACGT\tACGT\nTGCA\tTGCA\n")?;
        let paths = HiSeqPaths::with_base_dir("FC1", dir.path(), &Config::default());
        let shell = Shell::new(true);

        let out = split_custom_barcodes(
            &[lane_group(dir.path())],
            &[],
            &paths,
            Path::new("fastx_barcode_splitter.pl"),
            &shell,
        )?;
        let names: Vec<&str> = out.iter().map(|g| g.group_name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "s_2_1_ACGT.fastq.gz",
                "s_2_1_TGCA.fastq.gz",
                "s_2_1_Undetermined.fastq.gz"
            ]
        );
        assert_eq!(out[2].barcode, "Undetermined");
        assert!(out.iter().all(|g| g.lane == 2 && g.read == 1));

        let all = dir.path().join("Unaligned/all");
        let lines = shell.transcript().lines();
        assert!(lines[1].starts_with(&format!(
            "zcat {}/s_2_1_NoIndex.fastq.gz | fastx_barcode_splitter.pl --bcfile",
            all.display()
        )));
        assert!(lines[1].ends_with("custom_barcodes_2.txt.out 2>&1"));
        assert_eq!(
            lines[2],
            format!(
                "mv {0}/s_2_1_unmatched.fastq {0}/s_2_1_Undetermined.fastq",
                all.display()
            )
        );
        assert!(lines.contains(&format!("gzip -f {}/s_2_1_ACGT.fastq", all.display())));
        Ok(())
    }

    #[test]
    fn dry_run_split_of_unwritten_table() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let paths = HiSeqPaths::with_base_dir("FC1", dir.path(), &Config::default());
        let shell = Shell::new(true);
        let tables = vec![BarcodeTable {
            lane: 2,
            barcodes: vec!["GGCC".to_string()],
        }];

        let out = split_custom_barcodes(
            &[lane_group(dir.path())],
            &tables,
            &paths,
            Path::new("fastx_barcode_splitter.pl"),
            &shell,
        )?;
        let names: Vec<&str> = out.iter().map(|g| g.group_name.as_str()).collect();
        assert_eq!(names, vec!["s_2_1_GGCC.fastq.gz", "s_2_1_Undetermined.fastq.gz"]);
        assert!(!dir.path().join("custom_barcodes_2.txt").exists());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn split_with_external_splitter() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir()?;
        let group = lane_group(dir.path());
        let all = dir.path().join("Unaligned/all");
        std::fs::create_dir_all(&all)?;
        let mut gz = GzEncoder::new(File::create(&group.output_path)?, Compression::default());
        gz.write_all(b"@r1\nACGTAAAA\n+\nIIIIIIII\n")?;
        gz.finish()?;
        std::fs::write(dir.path().join("custom_barcodes_2.txt"), "ACGT\tACGT\n")?;

        // stands in for fastx_barcode_splitter.pl: every read matches ACGT
        let splitter = dir.path().join("splitter.sh");
        std::fs::write(
            &splitter,
            "#!/bin/sh\n\
             while [ $# -gt 0 ]; do\n\
             if [ \"$1\" = --prefix ]; then prefix=\"$2\"; fi\n\
             shift\n\
             done\n\
             cat > \"${prefix}ACGT.fastq\"\n\
             printf '@u\\nNNNN\\n+\\nIIII\\n' > \"${prefix}unmatched.fastq\"\n\
             echo 'Barcode\tCount'\n",
        )?;
        std::fs::set_permissions(&splitter, std::fs::Permissions::from_mode(0o755))?;

        let paths = HiSeqPaths::with_base_dir("FC1", dir.path(), &Config::default());
        let shell = Shell::new(false);
        let out = split_custom_barcodes(&[group], &[], &paths, &splitter, &shell)?;

        let names: Vec<&str> = out.iter().map(|g| g.group_name.as_str()).collect();
        assert_eq!(names, vec!["s_2_1_ACGT.fastq.gz", "s_2_1_Undetermined.fastq.gz"]);
        let barcodes: Vec<&str> = out.iter().map(|g| g.barcode.as_str()).collect();
        assert_eq!(barcodes, vec!["ACGT", "Undetermined"]);
        assert!(out.iter().all(|g| g.sample_name == "lane2" && g.lane == 2));

        let mut text = String::new();
        open_with_gz(&all.join("s_2_1_ACGT.fastq.gz"))?.read_to_string(&mut text)?;
        assert_eq!(text, "@r1\nACGTAAAA\n+\nIIIIIIII\n");
        assert!(all.join("s_2_1_Undetermined.fastq.gz").exists());

        // only the compressed outputs and the input remain
        assert!(glob_paths(&format!("{}/*.fastq", all.display())).is_empty());
        assert!(dir.path().join("custom_barcodes_2.txt.out").exists());
        Ok(())
    }

    #[test]
    fn compress_split_outputs() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let plain = dir.path().join("s_2_1_ACGT.fastq");
        std::fs::write(&plain, "@r\nACGT\n+\nIIII\n")?;
        let gz = dir.path().join("s_2_1_ACGT.fastq.gz");
        gzip_file(&plain, &gz)?;

        assert!(!plain.exists());
        let mut text = String::new();
        open_with_gz(&gz)?.read_to_string(&mut text)?;
        assert_eq!(text, "@r\nACGT\n+\nIIII\n");
        Ok(())
    }

    #[test]
    fn count_table() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("custom_barcodes_2.txt.out");
        std::fs::write(
            &path,
            "Barcode\tCount\tLocation\n\
             ACGT\t1200\t/x/s_2_1_ACGT.fastq\n\
             unmatched\t33\t/x/s_2_1_unmatched.fastq\n\
             total\t1233\n",
        )?;
        let counts = read_barcode_counts(&path)?;
        assert_eq!(counts.get("ACGT"), Some(&1200));
        assert_eq!(counts.get("unmatched"), Some(&33));
        assert_eq!(counts.get("total"), Some(&1233));
        Ok(())
    }
}

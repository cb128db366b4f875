use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use flate2::read::MultiGzDecoder;

/// Open a `.bim` variant table, gunzipping when the name ends in `.gz`.
fn open_table(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;

    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// `<dir>/<base>.bim`, or `<dir>/<base>.bim.gz` when only that exists.
pub(crate) fn bim_path(dir: impl AsRef<Path>, base: &str) -> PathBuf {
    let plain = dir.as_ref().join(format!("{}.bim", base));
    let zipped = dir.as_ref().join(format!("{}.bim.gz", base));

    if !plain.exists() && zipped.exists() {
        zipped
    } else {
        plain
    }
}

/// Read the base-pair position column (4th) of a `.bim` table, in file order.
pub(crate) fn read_positions(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let reader = open_table(path)?;
    let mut positions = Vec::new();

    for (n, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match line.split_whitespace().nth(3) {
            Some(pos) => positions.push(pos.to_string()),
            None => bail!("{}:{}: fewer than 4 columns", path.display(), n + 1),
        }
    }

    log::debug!("{} positions in {}", positions.len(), path.display());
    Ok(positions)
}

/// Copy a `.bim` table, replacing the variant id with `chr_pos_a1_a2_1`.
///
/// Returns the number of variants written.
pub(crate) fn rewrite_variant_ids(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<usize> {
    let (src, dst) = (src.as_ref(), dst.as_ref());
    let reader = open_table(src)?;
    let mut out = BufWriter::new(
        File::create(dst).with_context(|| format!("creating {}", dst.display()))?,
    );
    let mut n_written = 0;

    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let cols = line.split_whitespace().collect::<Vec<_>>();
        if cols.len() < 6 {
            bail!("{}:{}: fewer than 6 columns", src.display(), n + 1);
        }
        writeln!(
            out,
            "{}\t{}_{}_{}_{}_1\t{}\t{}\t{}\t{}",
            cols[0], cols[0], cols[3], cols[4], cols[5], cols[2], cols[3], cols[4], cols[5]
        )?;
        n_written += 1;
    }

    out.flush()?;
    Ok(n_written)
}

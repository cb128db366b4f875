use serde::{Deserialize, Serialize};

use crate::aux::he::PipelineError;

/// A closed range of variant positions on one chromosome.
///
/// Bounds are kept as the text read from the variant table so that they
/// survive serialization and file naming without renormalization.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Interval {
    pub chromosome: String,
    pub lower: String,
    pub upper: String,
}

impl Interval {
    /// `<lower>-<upper>`, the range part of every per-chunk file name.
    pub(crate) fn range_label(&self) -> String {
        format!("{}-{}", self.lower, self.upper)
    }
}

/// Split `positions` into windows of `chunk_size` elements.
///
/// Windows are counted in positions, not in base pairs. The last window
/// ends at the last position and may hold fewer than `chunk_size` of them.
/// `positions` must already be sorted; this is not checked.
pub fn partition<P>(
    chromosome: &str,
    positions: &[P],
    chunk_size: usize,
) -> Result<Vec<Interval>, PipelineError>
where
    P: AsRef<str>,
{
    if positions.is_empty() {
        return Err(PipelineError::invalid_input(format!(
            "no positions for chromosome {}",
            chromosome
        )));
    }
    if chunk_size == 0 {
        return Err(PipelineError::invalid_input("chunk size must be positive"));
    }

    let intervals = positions
        .chunks(chunk_size)
        .map(|window| Interval {
            chromosome: chromosome.to_string(),
            lower: window[0].as_ref().to_string(),
            upper: window[window.len() - 1].as_ref().to_string(),
        })
        .collect::<Vec<_>>();

    debug_assert_eq!(intervals.len(), positions.len().div_ceil(chunk_size));

    Ok(intervals)
}

#[cfg(test)]
mod test {
    use super::*;

    fn positions(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("p{i}")).collect()
    }

    fn bounds(ivs: &[Interval]) -> Vec<(&str, &str)> {
        ivs.iter()
            .map(|iv| (iv.lower.as_str(), iv.upper.as_str()))
            .collect()
    }

    #[test]
    fn short_last_window() {
        let ivs = partition("1", &positions(10), 3).unwrap();

        assert_eq!(
            bounds(&ivs),
            vec![("p1", "p3"), ("p4", "p6"), ("p7", "p9"), ("p10", "p10")]
        );
        assert!(ivs.iter().all(|iv| iv.chromosome == "1"));
    }

    #[test]
    fn exact_multiple() {
        let ivs = partition("1", &positions(6), 3).unwrap();

        assert_eq!(bounds(&ivs), vec![("p1", "p3"), ("p4", "p6")]);
    }

    #[test]
    fn fewer_positions_than_chunk() {
        let ivs = partition("X", &positions(1), 5).unwrap();

        assert_eq!(bounds(&ivs), vec![("p1", "p1")]);
    }

    #[test]
    fn window_lengths_cover_input() {
        for n in 1..40 {
            let pos = positions(n);
            for chunk in 1..12 {
                let ivs = partition("2", &pos, chunk).unwrap();
                assert_eq!(ivs.len(), n.div_ceil(chunk));

                // recover window lengths from the bound offsets
                let offset = |p: &str| pos.iter().position(|q| q == p).unwrap();
                let lens = ivs
                    .iter()
                    .map(|iv| offset(&iv.upper) - offset(&iv.lower) + 1)
                    .collect::<Vec<_>>();

                assert_eq!(lens.iter().sum::<usize>(), n);
                assert!(lens[..lens.len() - 1].iter().all(|&l| l == chunk));

                // contiguous: each lower directly follows the previous upper
                for w in ivs.windows(2) {
                    assert_eq!(offset(&w[0].upper) + 1, offset(&w[1].lower));
                }
                assert_eq!(ivs.last().unwrap().upper, pos[n - 1]);
            }
        }
    }

    #[test]
    fn rejects_bad_input() {
        let empty: Vec<String> = vec![];

        assert!(matches!(
            partition("1", &empty, 3),
            Err(PipelineError::InvalidInput(_))
        ));
        assert!(matches!(
            partition("1", &positions(4), 0),
            Err(PipelineError::InvalidInput(_))
        ));
    }

    #[test]
    fn bounds_are_verbatim() {
        let pos = ["000123", "456", "789"];
        let ivs = partition("01", &pos, 2).unwrap();

        assert_eq!(ivs[0].range_label(), "000123-456");
        assert_eq!(ivs[1].range_label(), "789-789");
    }
}

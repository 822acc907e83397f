// src/classify/consensus.rs

use crate::types::{Level, TaxPath};

/// Tallies for one `_`-delimited word position, in first-seen order.
#[derive(Default)]
struct SlotTally<'a> {
    words: Vec<(&'a str, usize)>,
}

impl<'a> SlotTally<'a> {
    fn add(&mut self, word: &'a str) {
        match self.words.iter_mut().find(|(w, _)| *w == word) {
            Some((_, count)) => *count += 1,
            None => self.words.push((word, 1)),
        }
    }

    /// Most frequent word; the earliest seen wins a tie.
    fn best(&self) -> Option<(&'a str, usize)> {
        let mut best: Option<(&'a str, usize)> = None;
        for &(word, count) in &self.words {
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((word, count));
            }
        }
        best
    }
}

/// Build a `K#word word(score/score);P#...` consensus from root-first paths.
///
/// Every level below the root is voted on independently per word slot. A
/// slot's best word is kept while its tally reaches `paths.len() * threshold`;
/// the first slot that does not ends the level, and a level without any kept
/// word ends the whole consensus. Scores are `floor(tally * 100 / hits)`.
pub fn compile_consensus(paths: &[TaxPath<'_>], threshold: f64) -> String {
    let hits = paths.len();
    if hits == 0 {
        return String::new();
    }
    let min_tally = hits as f64 * threshold;

    let mut levels = Vec::new();
    for level in Level::ALL.iter().skip(1) {
        let mut slots: Vec<SlotTally<'_>> = Vec::new();
        for path in paths {
            let Some(node) = path.get(level.depth()) else {
                continue;
            };
            for (j, word) in node.name.split('_').enumerate() {
                if slots.len() <= j {
                    slots.push(SlotTally::default());
                }
                slots[j].add(word);
            }
        }

        let mut words = Vec::new();
        let mut scores = Vec::new();
        for slot in &slots {
            match slot.best() {
                Some((word, tally)) if tally as f64 >= min_tally => {
                    words.push(word);
                    scores.push((tally * 100 / hits).to_string());
                }
                _ => break,
            }
        }
        if words.is_empty() {
            break;
        }
        levels.push(format!(
            "{}#{}({})",
            level.tag(),
            words.join(" "),
            scores.join("/")
        ));
    }

    levels.join(";").replace('_', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeRecord;

    /// Build node records for root-first names, one level per name.
    fn records(names: &[&str]) -> Vec<NodeRecord> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| NodeRecord {
                seq_id: Some(0),
                node_id: i as u32,
                level: Level::ALL[i],
                name: name.to_string(),
                parent_id: None,
            })
            .collect()
    }

    fn consensus(lineages: &[&[&str]], threshold: f64) -> String {
        let owned: Vec<Vec<NodeRecord>> = lineages.iter().map(|l| records(l)).collect();
        let paths: Vec<TaxPath<'_>> = owned.iter().map(|r| r.iter().collect()).collect();
        compile_consensus(&paths, threshold)
    }

    #[test]
    fn test_sub_word_scores() {
        let result = consensus(
            &[
                &["root", "a", "c", "d"],
                &["root", "a", "c", "d_1"],
                &["root", "a", "c", "d_1_2"],
            ],
            0.0,
        );
        assert_eq!(result, "K#a(100);P#c(100);C#d 1 2(100/66/33)");
    }

    #[test]
    fn test_threshold_drops_minority_words() {
        let result = consensus(
            &[
                &["root", "a", "c", "d"],
                &["root", "a", "c", "d_1"],
                &["root", "a", "c", "d_1_2"],
            ],
            0.51,
        );
        assert_eq!(result, "K#a(100);P#c(100);C#d 1(100/66)");
    }

    #[test]
    fn test_missed_level_blocks_deeper_levels() {
        let result = consensus(
            &[
                &["root", "a", "b", "x"],
                &["root", "a", "c", "x"],
            ],
            0.6,
        );
        assert_eq!(result, "K#a(100)");
    }

    #[test]
    fn test_majority_word_wins() {
        let result = consensus(
            &[
                &["root", "a", "b"],
                &["root", "a", "c"],
                &["root", "a", "c"],
            ],
            0.5,
        );
        assert_eq!(result, "K#a(100);P#c(66)");
    }

    #[test]
    fn test_no_paths() {
        assert_eq!(compile_consensus(&[], 0.5), "");
    }
}

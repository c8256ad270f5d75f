//! Fortune cookies for the `[F]ortune` main-menu pick.
//!
//! A small built-in collection is always available. Operators can point
//! `bbs.fortune_file` at a classic `fortune(6)` file (entries separated by
//! lines holding a single `%`) or at a plain file with one entry per line.
//! Entries that would not fit one packet are skipped.

use std::path::Path;

use log::{info, warn};
use rand::Rng;

use crate::config::BbsConfig;
use crate::errors::BbsResult;
use crate::mesh::MAX_PAYLOAD;

const BUILTIN: &[&str] = &[
    "A mesh is only as strong as its quietest relay.",
    "Store now, forward later. Patience is a protocol.",
    "The packet you are waiting for is three hops away and walking.",
    "Every repeater on a hilltop was once someone's weekend project.",
    "When the grid goes down, the mesh goes up.",
    "Short messages travel far. So do kind ones.",
    "Hope is not a routing strategy.",
    "Check your antenna before you check your code.",
    "Line of sight beats lines of configuration.",
    "A good BBS remembers what the network forgets.",
    "Silence on the channel does not mean nobody is listening.",
    "The best time to charge the battery was yesterday.",
    "There are only two hard things in computing: cache invalidation and naming things.",
    "Simple things should be simple; complex things should be possible.",
    "Premature optimization is the root of all evil.",
    "Any sufficiently advanced technology is indistinguishable from magic.",
    "Weeks of coding can save you hours of planning.",
    "It works on my node.",
    "Measure twice, flash once.",
    "Plans are nothing; planning is everything.",
    "The journey of a thousand miles begins with a single step.",
    "Fortune favors the prepared.",
    "Well done is better than well said.",
    "Do what you can, with what you have, where you are.",
    "The only true wisdom is in knowing you know nothing.",
    "Knowledge speaks, but wisdom listens.",
    "Not all who wander are lost; some are just out of range.",
    "A watched inbox never fills.",
    "You will receive a message. Eventually.",
    "Your next hop will be a lucky one.",
    "A friend is someone who relays your packets without asking why.",
    "Today is a good day to update your firmware. Tomorrow may be better.",
    "He who hesitates is acknowledged late.",
    "Reply hazy, retransmit later.",
    "Keep calm and lower your hop limit.",
    "The squeaky node gets the airtime.",
    "In the kingdom of the deaf, the one-watt node is king.",
    "Solar panels do not work at night. Plan accordingly.",
    "Nothing is more permanent than a temporary antenna mount.",
    "To err is human; to duplicate a packet is mesh.",
];

/// Collection of fortunes to pick from.
#[derive(Debug, Clone)]
pub struct Fortunes {
    entries: Vec<String>,
}

impl Fortunes {
    pub fn builtin() -> Self {
        Self {
            entries: BUILTIN.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Load entries from `path`. An empty result falls back to the built-ins.
    pub fn load<P: AsRef<Path>>(path: P) -> BbsResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let entries = parse(&content);
        if entries.is_empty() {
            warn!(
                "no usable fortunes in {}, using built-ins",
                path.as_ref().display()
            );
            return Ok(Self::builtin());
        }
        info!("loaded {} fortunes from {}", entries.len(), path.as_ref().display());
        Ok(Self { entries })
    }

    pub fn from_config(cfg: &BbsConfig) -> Self {
        match &cfg.fortune_file {
            Some(path) => Self::load(path).unwrap_or_else(|e| {
                warn!("fortune file {} unreadable ({}), using built-ins", path, e);
                Self::builtin()
            }),
            None => Self::builtin(),
        }
    }

    pub fn pick(&self) -> &str {
        let idx = rand::thread_rng().gen_range(0..self.entries.len());
        &self.entries[idx]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse(content: &str) -> Vec<String> {
    let classic = content.lines().any(|l| l.trim() == "%");
    let raw: Vec<String> = if classic {
        content
            .split('\n')
            .collect::<Vec<_>>()
            .split(|l| l.trim() == "%")
            .map(|block| block.join("\n"))
            .collect()
    } else {
        content.lines().map(str::to_string).collect()
    };
    raw.into_iter()
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty() && e.len() <= MAX_PAYLOAD)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn builtins_fit_one_packet() {
        let f = Fortunes::builtin();
        assert!(f.len() >= 30);
        for entry in BUILTIN {
            assert!(!entry.is_empty());
            assert!(entry.len() <= MAX_PAYLOAD, "too long: {entry}");
        }
    }

    #[test]
    fn pick_varies() {
        let f = Fortunes::builtin();
        let seen: HashSet<&str> = (0..60).map(|_| f.pick()).collect();
        assert!(seen.len() >= 5, "only {} distinct fortunes", seen.len());
        assert!(seen.iter().all(|s| BUILTIN.contains(s)));
    }

    #[test]
    fn classic_file_format() {
        let text = "First one\nspans two lines\n%\nSecond\n%\n\n%\n";
        let entries = parse(text);
        assert_eq!(entries, vec!["First one\nspans two lines", "Second"]);
    }

    #[test]
    fn line_file_skips_blank_and_long_entries() {
        let long = "y".repeat(MAX_PAYLOAD + 1);
        let text = format!("alpha\n\n{long}\nbeta\n");
        assert_eq!(parse(&text), vec!["alpha", "beta"]);
    }

    #[test]
    fn config_falls_back_to_builtins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fortunes.txt");
        std::fs::write(&path, "only one\n").unwrap();

        let mut cfg = crate::config::Config::default().bbs;
        cfg.fortune_file = Some(path.to_string_lossy().into_owned());
        let f = Fortunes::from_config(&cfg);
        assert_eq!(f.len(), 1);
        assert_eq!(f.pick(), "only one");

        cfg.fortune_file = Some(dir.path().join("missing").to_string_lossy().into_owned());
        assert_eq!(Fortunes::from_config(&cfg).len(), BUILTIN.len());
    }
}

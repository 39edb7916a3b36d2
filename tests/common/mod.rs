//! Shared fixtures for the scenario tests in §8's testable-properties list.

use trope_miner::catalog::Trope;
use trope_miner::text::TropeId;

pub fn trope(id: i64, name: &str, aliases: &[&str], anti_aliases: &[&str]) -> Trope {
    Trope {
        id: TropeId::from(id),
        name: name.to_string(),
        summary: String::new(),
        aliases: aliases.iter().map(|s| s.to_string()).collect(),
        anti_aliases: anti_aliases.iter().map(|s| s.to_string()).collect(),
    }
}

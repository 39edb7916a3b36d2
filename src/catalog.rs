//! Trope catalog entity (§3). Loading a catalog from CSV/JSON is out of
//! scope here — callers construct `Trope` values however their ingest path
//! sees fit and hand them to the gazetteer and seeder.

use crate::text::TropeId;

/// A trope definition: a name, a human summary, and surface-form phrases
/// used to recognize and to rule out mentions of it.
#[derive(Debug, Clone)]
pub struct Trope {
    pub id: TropeId,
    pub name: String,
    pub summary: String,
    pub aliases: Vec<String>,
    pub anti_aliases: Vec<String>,
}

impl Trope {
    /// The document embedded for this trope in the trope vector collection
    /// (§4.3): `"name. summary"`, falling back to the name plus 2–3 aliases
    /// when the summary is empty.
    pub fn embedding_document(&self) -> String {
        if !self.summary.trim().is_empty() {
            return format!("{}. {}", self.name, self.summary);
        }
        let extra: Vec<&str> = self.aliases.iter().take(3).map(|s| s.as_str()).collect();
        if extra.is_empty() {
            self.name.clone()
        } else {
            format!("{}. {}", self.name, extra.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trope(summary: &str, aliases: Vec<&str>) -> Trope {
        Trope {
            id: TropeId::from(1),
            name: "Chosen One".to_string(),
            summary: summary.to_string(),
            aliases: aliases.into_iter().map(String::from).collect(),
            anti_aliases: Vec::new(),
        }
    }

    #[test]
    fn embedding_document_prefers_summary() {
        let t = trope("A destined hero.", vec!["the chosen"]);
        assert_eq!(t.embedding_document(), "Chosen One. A destined hero.");
    }

    #[test]
    fn embedding_document_falls_back_to_aliases() {
        let t = trope("", vec!["the chosen", "destined one", "prophesied hero", "extra"]);
        assert_eq!(
            t.embedding_document(),
            "Chosen One. the chosen, destined one, prophesied hero"
        );
    }

    #[test]
    fn embedding_document_falls_back_to_name_only() {
        let t = trope("", vec![]);
        assert_eq!(t.embedding_document(), "Chosen One");
    }
}

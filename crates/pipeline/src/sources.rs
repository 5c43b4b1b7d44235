//! Human-readable source titles for the `on_sources` callback.

use crate::context::ContextEntry;

pub struct SourceExtractor {
    enabled: bool,
    max_sources: usize,
}

impl SourceExtractor {
    pub fn new(enabled: bool, max_sources: usize) -> Self {
        Self {
            enabled,
            max_sources,
        }
    }

    /// Unique titles in ranking order, at most `max_sources`.
    ///
    /// Title priority: cleaned `source_file`, then `section_heading`, then
    /// the chunk id. Empty when disabled.
    pub fn extract(&self, entries: &[ContextEntry]) -> Vec<String> {
        if !self.enabled {
            return Vec::new();
        }

        let mut sources: Vec<String> = Vec::new();
        for entry in entries {
            if sources.len() >= self.max_sources {
                break;
            }
            let title = title_for(entry);
            if !title.is_empty() && !sources.contains(&title) {
                sources.push(title);
            }
        }

        tracing::debug!(unique_sources = sources.len(), "Sources extracted");
        sources
    }
}

fn title_for(entry: &ContextEntry) -> String {
    let cleaned = clean_filename(&entry.source_file);
    if !cleaned.is_empty() {
        return cleaned;
    }
    let heading = entry.section_heading.trim();
    if !heading.is_empty() {
        return heading.to_string();
    }
    entry.chunk_id.clone()
}

/// `Metoprolol_Drug_information.md` becomes `Metoprolol`.
pub fn clean_filename(filename: &str) -> String {
    let title = filename.trim();
    let title = title.strip_suffix(".md").unwrap_or(title);
    let title = title.strip_suffix("_Drug_information").unwrap_or(title);
    title.replace('_', " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(chunk_id: &str, source: &str, heading: &str) -> ContextEntry {
        ContextEntry {
            chunk_id: chunk_id.into(),
            source_file: source.into(),
            section_heading: heading.into(),
            text: String::new(),
            similarity: 0.5,
        }
    }

    #[test]
    fn cleans_drug_information_filenames() {
        assert_eq!(clean_filename("Metoprolol_Drug_information.md"), "Metoprolol");
        assert_eq!(clean_filename("Beta_blocker_overview.md"), "Beta blocker overview");
        assert_eq!(clean_filename("  notes.txt "), "notes.txt");
        assert_eq!(clean_filename(""), "");
    }

    #[test]
    fn title_priority() {
        let extractor = SourceExtractor::new(true, 10);
        let sources = extractor.extract(&[
            entry("v1", "Atenolol_Drug_information.md", "Dosing"),
            entry("v2", "", "Contraindications"),
            entry("v3", "", "  "),
        ]);
        assert_eq!(sources, vec!["Atenolol", "Contraindications", "v3"]);
    }

    #[test]
    fn unique_and_capped() {
        let extractor = SourceExtractor::new(true, 2);
        let sources = extractor.extract(&[
            entry("1", "A.md", ""),
            entry("2", "A.md", ""),
            entry("3", "B.md", ""),
            entry("4", "C.md", ""),
        ]);
        assert_eq!(sources, vec!["A", "B"]);
    }

    #[test]
    fn disabled_yields_nothing() {
        let extractor = SourceExtractor::new(false, 10);
        assert!(extractor.extract(&[entry("1", "A.md", "")]).is_empty());
    }
}

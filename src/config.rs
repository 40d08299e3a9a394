use std::path::Path;

use anyhow::anyhow;
use config::{Config, File};
use serde::Deserialize;

/// Severity of a validation class. `Off` disables the class entirely.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Off,
    Warning,
    Error,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Settings {
    /// Glob patterns matched against raw link text; matching links are
    /// excluded from validation.
    pub ignore_links: Vec<String>,
    pub validate_file_links: DiagnosticLevel,
    pub validate_fragment_links: DiagnosticLevel,
    pub validate_references: DiagnosticLevel,
    /// Severity for fragments of links into other markdown files. Inherits
    /// `validate_fragment_links` unless set.
    pub validate_markdown_file_link_fragments: Option<DiagnosticLevel>,
}

impl Settings {
    pub fn new(root_dir: &Path) -> anyhow::Result<Settings> {
        let expanded = shellexpand::tilde("~/.config/mdnav/settings");
        let settings = Config::builder()
            .add_source(File::with_name(&expanded).required(false))
            .add_source(
                File::with_name(&format!(
                    "{}/.mdnav",
                    root_dir
                        .to_str()
                        .ok_or(anyhow!("Can't convert root_dir to str"))?
                ))
                .required(false),
            )
            .set_default("ignore_links", Vec::<String>::new())?
            .set_default("validate_file_links", "warning")?
            .set_default("validate_fragment_links", "warning")?
            .set_default("validate_references", "warning")?
            .build()
            .map_err(|err| anyhow!("Build err: {err}"))?;

        let settings = settings.try_deserialize::<Settings>()?;

        anyhow::Ok(settings)
    }

    /// Effective severity for cross-file markdown fragment validation.
    pub fn markdown_file_link_fragments(&self) -> DiagnosticLevel {
        self.validate_markdown_file_link_fragments
            .unwrap_or(self.validate_fragment_links)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            ignore_links: Vec::new(),
            validate_file_links: DiagnosticLevel::Warning,
            validate_fragment_links: DiagnosticLevel::Warning,
            validate_references: DiagnosticLevel::Warning,
            validate_markdown_file_link_fragments: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test: markdown-file fragment severity inherits the fragment setting
    /// until explicitly overridden.
    #[test]
    fn test_markdown_fragment_severity_inherits() {
        let mut settings = Settings {
            validate_fragment_links: DiagnosticLevel::Error,
            ..Settings::default()
        };
        assert_eq!(
            settings.markdown_file_link_fragments(),
            DiagnosticLevel::Error
        );

        settings.validate_markdown_file_link_fragments = Some(DiagnosticLevel::Off);
        assert_eq!(
            settings.markdown_file_link_fragments(),
            DiagnosticLevel::Off
        );
    }

    /// Test: severity levels deserialize from their lowercase names.
    #[test]
    fn test_level_deserializes_lowercase() {
        let level: DiagnosticLevel = serde_json::from_str("\"warning\"").unwrap();
        assert_eq!(level, DiagnosticLevel::Warning);
        let level: DiagnosticLevel = serde_json::from_str("\"off\"").unwrap();
        assert_eq!(level, DiagnosticLevel::Off);
    }
}

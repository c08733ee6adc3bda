//! Default values for configuration fields.
//!
//! These functions are used by serde for default deserialization.

// ============================================================================
// Common Defaults
// ============================================================================

pub fn r#true() -> bool {
    true
}

pub fn r#false() -> bool {
    false
}

// ============================================================================
// [project] Section Defaults
// ============================================================================

pub mod project {
    pub fn name() -> String {
        "Documentation".into()
    }

    pub fn root_doc() -> String {
        "index".into()
    }

    pub fn source_suffix() -> Vec<String> {
        vec![".rst".into(), ".txt".into()]
    }

    pub fn include_patterns() -> Vec<String> {
        vec!["**".into()]
    }

    pub fn locale_dirs() -> Vec<String> {
        vec!["locales".into()]
    }
}

// ============================================================================
// [build] Section Defaults
// ============================================================================

pub mod build {
    use std::path::PathBuf;

    pub fn source() -> PathBuf {
        "source".into()
    }

    pub fn output() -> PathBuf {
        "build/html".into()
    }

    pub fn doctrees() -> PathBuf {
        "build/doctrees".into()
    }

    pub fn builder() -> String {
        "html".into()
    }

    pub fn parallel() -> usize {
        1
    }
}

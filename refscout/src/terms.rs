use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use crate::config::IndexConfig;
use crate::filters::ExtensionSet;

pub const FILENAME_PLACEHOLDER: &str = "{filename}";
pub const RELATIVE_PATH_PLACEHOLDER: &str = "{filepath_relative}";
pub const MODULE_PLACEHOLDER: &str = "{module_name}";

/// Expands reference templates into the literal strings that count as a reference to a
/// target file.
///
/// For `pkg/sub/mod.py` under the project base with the templates `{filename}` and
/// `from {module_name} import`, the terms are `mod.py`, `from mod import`,
/// `from sub.mod import` and `from pkg.sub.mod import`. The bare file name is always
/// included even if no template produces it.
#[derive(Debug, Clone)]
pub struct SearchTermGenerator {
    base: PathBuf,
    templates: Vec<String>,
    resolve_modules: bool,
    module_extensions: ExtensionSet,
}

impl SearchTermGenerator {
    pub fn new(
        base: impl Into<PathBuf>,
        templates: Vec<String>,
        resolve_modules: bool,
        module_extensions: ExtensionSet,
    ) -> Self {
        Self {
            base: base.into(),
            templates,
            resolve_modules,
            module_extensions,
        }
    }

    pub fn from_config(config: &IndexConfig) -> Self {
        let finding = &config.reference_finding;
        Self::new(
            config.project_base_path.clone(),
            finding.patterns.clone(),
            finding.resolve_modules,
            ExtensionSet::from_config(&finding.module_extensions),
        )
    }

    /// Sorted, de-duplicated terms for `target`
    pub fn terms_for(&self, target: &Path) -> Vec<String> {
        let mut terms = BTreeSet::new();
        let Some(file_name) = target.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return Vec::new();
        };
        let relative = self.relative_path(target);
        let modules = self.module_paths(target);

        terms.insert(file_name.clone());

        for template in &self.templates {
            let has_filename = template.contains(FILENAME_PLACEHOLDER);
            let has_relative = template.contains(RELATIVE_PATH_PLACEHOLDER);
            let has_module = template.contains(MODULE_PLACEHOLDER);
            if !(has_filename || has_relative || has_module) {
                continue;
            }

            let expanded = template
                .replace(FILENAME_PLACEHOLDER, &file_name)
                .replace(RELATIVE_PATH_PLACEHOLDER, &relative);

            if has_module {
                for module in &modules {
                    terms.insert(expanded.replace(MODULE_PLACEHOLDER, module));
                }
            } else {
                terms.insert(expanded);
            }
        }

        terms.retain(|t| !t.trim().is_empty());
        terms.into_iter().collect()
    }

    /// Dotted module paths for `target`, shortest first: `a/b/c.py` gives `c`, `b.c`, `a.b.c`.
    /// Empty unless module resolution is on and the extension is a module extension.
    pub fn module_paths(&self, target: &Path) -> Vec<String> {
        if !self.resolve_modules || self.module_extensions.is_empty() {
            return Vec::new();
        }
        if !self.module_extensions.matches(target) {
            return Vec::new();
        }
        let Some(stem) = target.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            return Vec::new();
        };

        let parents: Vec<String> = target
            .strip_prefix(&self.base)
            .ok()
            .and_then(Path::parent)
            .map(|parent| {
                parent
                    .components()
                    .filter_map(|c| match c {
                        Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut modules = vec![stem.clone()];
        for depth in 1..=parents.len() {
            let prefix = parents[parents.len() - depth..].join(".");
            modules.push(format!("{}.{}", prefix, stem));
        }
        modules
    }

    /// `/`-separated path relative to the project base, or the full path for files outside it
    fn relative_path(&self, target: &Path) -> String {
        match target.strip_prefix(&self.base) {
            Ok(relative) => relative.to_string_lossy().replace('\\', "/"),
            Err(_) => target.to_string_lossy().into_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator(templates: &[&str], module_exts: &[&str]) -> SearchTermGenerator {
        SearchTermGenerator::new(
            "/project",
            templates.iter().map(|t| t.to_string()).collect(),
            true,
            ExtensionSet::from_config(module_exts),
        )
    }

    #[test]
    fn test_filename_always_present() {
        let generator = generator(&[], &["py"]);
        assert_eq!(
            generator.terms_for(Path::new("/project/src/app.py")),
            vec!["app.py"]
        );
    }

    #[test]
    fn test_templates_without_placeholders_are_ignored() {
        let generator = generator(&["TODO", "see {filepath_relative}"], &["py"]);
        assert_eq!(
            generator.terms_for(Path::new("/project/docs/guide.md")),
            vec!["guide.md", "see docs/guide.md"]
        );
    }

    #[test]
    fn test_module_paths_accumulate_suffixes() {
        let generator = generator(&["{module_name}"], &["py"]);
        let target = Path::new("/project/a/b/c.py");
        assert_eq!(generator.module_paths(target), vec!["c", "b.c", "a.b.c"]);
        assert_eq!(
            generator.terms_for(target),
            vec!["a.b.c", "b.c", "c", "c.py"]
        );
    }

    #[test]
    fn test_module_paths_need_module_extension() {
        let generator = generator(&["import {module_name}"], &["py"]);
        let target = Path::new("/project/web/app.js");
        assert!(generator.module_paths(target).is_empty());
        assert_eq!(generator.terms_for(target), vec!["app.js"]);
    }

    #[test]
    fn test_module_resolution_can_be_disabled() {
        let generator = SearchTermGenerator::new(
            "/project",
            vec!["{module_name}".to_string()],
            false,
            ExtensionSet::from_config(&["py"]),
        );
        assert_eq!(generator.terms_for(Path::new("/project/a/b.py")), vec!["b.py"]);
    }

    #[test]
    fn test_mixed_placeholders() {
        let generator = generator(&["{filename} in {module_name}"], &["ext"]);
        assert_eq!(
            generator.terms_for(Path::new("/project/pkg/mod.ext")),
            vec!["mod.ext", "mod.ext in mod", "mod.ext in pkg.mod"]
        );
    }

    #[test]
    fn test_target_outside_base() {
        let generator = generator(&["{filepath_relative}", "{module_name}"], &["py"]);
        let terms = generator.terms_for(Path::new("/elsewhere/x.py"));
        assert!(terms.contains(&"/elsewhere/x.py".to_string()));
        assert!(terms.contains(&"x".to_string()));
        assert!(terms.contains(&"x.py".to_string()));
    }
}

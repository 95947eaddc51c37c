//! Code Generation
//!
//! The [`Assembler`] runs the whole pipeline for a diagram file or a
//! directory of diagrams:
//!
//! 1. parse the diagram and its descriptions
//! 2. splice external objects through a [`SpecificationSource`]
//! 3. resolve inheritance, containment and default factories
//! 4. emit every class and enum in parallel, one module each
//! 5. write `mod.rs` and copy the sources into `schemes/`
//!
//! Files are written atomically. A failing module never leaves a partial
//! file behind; failures are collected and reported after every other module
//! was written, and `mod.rs` is then left untouched.

pub mod custom;
pub mod names;
pub mod rust;

use git2::Repository;
use rayon::prelude::*;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::config::GeneratorConfig;
use crate::error::{ModelError, Result};
use crate::graph;
use crate::schema::parser::{descriptions_path, diagram_files, parse_file};
use crate::schema::{Definition, ExternalResolver, GitSource, SpecCache, SpecificationSet, SpecificationSource};

use self::rust::{emit_class, emit_enum, emit_package_root, module_name, EmitContext};

// =============================================================================
// Options
// =============================================================================

/// Settings of one generation run
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub output_dir: PathBuf,
    /// Package directory name; defaults to the input's stem
    pub package: Option<String>,
    pub preserve_custom_code: bool,
    pub copy_schemes: bool,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self::from(&GeneratorConfig::default())
    }
}

impl From<&GeneratorConfig> for GenerateOptions {
    fn from(config: &GeneratorConfig) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            package: config.package.clone(),
            preserve_custom_code: config.preserve_custom_code,
            copy_schemes: config.copy_schemes,
        }
    }
}

/// Summary of a generation run
#[derive(Debug, Clone, Default)]
pub struct GenerationReport {
    pub package_dir: PathBuf,
    /// Every file written, `mod.rs` files included
    pub files: Vec<PathBuf>,
    pub classes: usize,
    pub enums: usize,
}

// =============================================================================
// Assembler
// =============================================================================

/// Generates a Rust package from class diagrams
pub struct Assembler<'a, S: SpecificationSource = GitSource> {
    options: GenerateOptions,
    source: &'a S,
    cache: Option<&'a SpecCache>,
}

impl<'a, S: SpecificationSource> Assembler<'a, S> {
    pub fn new(options: GenerateOptions, source: &'a S) -> Self {
        Self {
            options,
            source,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: &'a SpecCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Generate the package for a diagram file or a directory of diagrams.
    ///
    /// A directory holding several diagrams gets one sub-package per file.
    pub fn generate(&self, input: impl AsRef<Path>) -> Result<GenerationReport> {
        let input = input.as_ref();
        let package = match &self.options.package {
            Some(package) => package.clone(),
            None => input
                .file_stem()
                .and_then(|s| s.to_str())
                .map(module_name)
                .ok_or_else(|| ModelError::spec(format!("cannot name a package after '{}'", input.display())))?,
        };
        let package_dir = self.options.output_dir.join(&package);
        let (repository, commit) = provenance(input);

        let files = if input.is_dir() {
            diagram_files(input)
        } else {
            vec![input.to_path_buf()]
        };

        let mut report = GenerationReport {
            package_dir: package_dir.clone(),
            ..Default::default()
        };

        match files.as_slice() {
            [] => {
                return Err(ModelError::spec(format!(
                    "no diagram files found in '{}'",
                    input.display()
                )))
            }
            [single] => {
                self.emit_package(single, &package_dir, repository.as_deref(), commit.as_deref(), &mut report)?;
            }
            _ => {
                let mut modules = Vec::new();
                for file in &files {
                    let module = file
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .map(module_name)
                        .ok_or_else(|| ModelError::spec(format!("cannot name a module after '{}'", file.display())))?;
                    let dir = package_dir.join(&module);
                    self.emit_package(file, &dir, repository.as_deref(), commit.as_deref(), &mut report)?;
                    modules.push(module);
                }
                let root = package_dir.join("mod.rs");
                write_atomic(&root, &emit_package_index(&modules), self.options.preserve_custom_code)?;
                report.files.push(root);
            }
        }

        info!(
            package = %package_dir.display(),
            classes = report.classes,
            enums = report.enums,
            files = report.files.len(),
            "generated package"
        );
        Ok(report)
    }

    /// Parse, resolve and splice externals of one diagram
    pub fn load(&self, path: &Path) -> Result<SpecificationSet> {
        let mut set = parse_file(path)?;
        if set.externals().next().is_some() {
            let mut resolver = ExternalResolver::new(self.source);
            if let Some(cache) = self.cache {
                resolver = resolver.with_cache(cache);
            }
            resolver.resolve(&mut set)?;
        }
        graph::resolve(&mut set)?;
        Ok(set)
    }

    fn emit_package(
        &self,
        path: &Path,
        dir: &Path,
        repository: Option<&str>,
        commit: Option<&str>,
        report: &mut GenerationReport,
    ) -> Result<()> {
        let set = self.load(path)?;
        std::fs::create_dir_all(dir)?;

        let source = path.file_name().and_then(|n| n.to_str());
        let mut ctx = EmitContext::new(&set);
        if let Some(source) = source {
            ctx = ctx.with_source(source);
        }

        let definitions: Vec<&Definition> = set.definitions.values().collect();
        let preserve = self.options.preserve_custom_code;
        let results: Vec<std::result::Result<PathBuf, String>> = definitions
            .par_iter()
            .filter_map(|definition| {
                let code = match definition {
                    Definition::Class(class) => emit_class(class, &ctx),
                    Definition::Enum(enumeration) => emit_enum(enumeration, &ctx),
                    Definition::External(_) => return None,
                };
                let name = definition.name();
                let file = dir.join(format!("{}.rs", module_name(name)));
                debug!(definition = name, file = %file.display(), "writing module");
                Some(
                    write_atomic(&file, &code, preserve)
                        .map(|_| file)
                        .map_err(|e| format!("{name}: {e}")),
                )
            })
            .collect();

        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(file) => report.files.push(file),
                Err(failure) => failures.push(failure),
            }
        }
        if !failures.is_empty() {
            return Err(ModelError::Assembly { failures });
        }

        let root = dir.join("mod.rs");
        write_atomic(&root, &emit_package_root(&ctx, repository, commit), preserve)?;
        report.files.push(root);
        report.classes += set.classes().count();
        report.enums += set.enums().count();

        if self.options.copy_schemes {
            let schemes = dir.join("schemes");
            std::fs::create_dir_all(&schemes)?;
            for artifact in [path.to_path_buf(), descriptions_path(path)] {
                if let Some(name) = artifact.file_name().filter(|_| artifact.is_file()) {
                    std::fs::copy(&artifact, schemes.join(name))?;
                }
            }
        }
        Ok(())
    }
}

/// `mod.rs` of a package made of several diagram files
fn emit_package_index(modules: &[String]) -> String {
    let mut output = String::from("//! Generated model packages\n//!\n//! Generated by modelkit.\n\n");
    for module in modules {
        output.push_str(&format!("pub mod {module};\n"));
    }
    output.push('\n');
    output.push_str(&custom::region("items", ""));
    output
}

/// Write through a temporary file in the target directory, keeping the
/// custom regions of the file being replaced
fn write_atomic(path: &Path, content: &str, preserve: bool) -> Result<()> {
    let merged;
    let content = if preserve && path.is_file() {
        let previous = std::fs::read_to_string(path)?;
        merged = custom::merge(content, &previous);
        merged.as_str()
    } else {
        content
    };

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(content.as_bytes())?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Origin URL and HEAD commit of the repository holding `path`
fn provenance(path: &Path) -> (Option<String>, Option<String>) {
    let start = if path.is_file() {
        path.parent().unwrap_or(path)
    } else {
        path
    };
    let Ok(repo) = Repository::discover(start) else {
        return (None, None);
    };
    let url = repo
        .find_remote("origin")
        .ok()
        .and_then(|remote| remote.url().map(str::to_string));
    let commit = repo
        .head()
        .ok()
        .and_then(|head| head.peel_to_commit().ok())
        .map(|c| c.id().to_string());
    (url, commit)
}

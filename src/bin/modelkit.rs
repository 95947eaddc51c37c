//! modelkit CLI
//!
//! Generates Rust packages from class diagrams and works with instance data
//! against a diagram loaded at runtime.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use modelkit::config::{DataFormat, OutputFormat};
use modelkit::runtime::convert::LinkTemplate;
use modelkit::schema::GitSource;
use modelkit::{Arena, Assembler, GenerateOptions, InstanceId, Library, ModelkitConfig};

#[derive(Parser)]
#[command(name = "modelkit")]
#[command(about = "Generate data models from class diagrams and work with their instances")]
struct Cli {
    /// Configuration file (defaults to modelkit.toml lookup)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a Rust package from a diagram file or directory
    Generate {
        /// Diagram file (.mmd, .mermaid) or directory of diagrams
        input: PathBuf,

        /// Output directory (overrides the configuration)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Package name (defaults to the input stem)
        #[arg(short, long)]
        package: Option<String>,

        /// Overwrite custom regions instead of keeping them
        #[arg(long)]
        discard_custom: bool,
    },

    /// Print the guide tree of a class
    Tree {
        /// Diagram file or directory
        diagram: PathBuf,

        /// Class to expand (defaults to the single root class)
        #[arg(short = 'C', long)]
        class: Option<String>,

        /// Instance data to show instead of the bare schema
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Maximum depth to print
        #[arg(long)]
        depth: Option<usize>,
    },

    /// List the meta paths of a class, or the paths of an instance
    Paths {
        diagram: PathBuf,

        #[arg(short = 'C', long)]
        class: Option<String>,

        /// Instance data; prints concrete paths with indices
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Only print leaf attributes
        #[arg(long)]
        leaves: bool,
    },

    /// Write a linking template skeleton for a class
    Template {
        diagram: PathBuf,

        #[arg(short = 'C', long)]
        class: Option<String>,

        /// Template file (.yaml, .yml or .toml)
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Re-serialize instance data in another format
    Export {
        diagram: PathBuf,

        #[arg(short = 'C', long)]
        class: Option<String>,

        /// Instance data (.json, .yaml, .yml or .xml)
        data: PathBuf,

        /// Target format (defaults to the configured one)
        #[arg(short, long, value_parser = parse_format)]
        format: Option<DataFormat>,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Convert instance data to another model through a linking template
    Convert {
        /// Diagram of the source data
        diagram: PathBuf,

        #[arg(short = 'C', long)]
        class: Option<String>,

        data: PathBuf,

        /// Linking template (.yaml, .yml or .toml)
        #[arg(short, long)]
        template: PathBuf,

        /// Diagram of the target model
        #[arg(long)]
        target: PathBuf,

        #[arg(short, long, value_parser = parse_format)]
        format: Option<DataFormat>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn parse_format(value: &str) -> Result<DataFormat, String> {
    DataFormat::from_extension(value).ok_or_else(|| format!("unknown format '{value}'"))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ModelkitConfig::load_from(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Generate {
            input,
            output,
            package,
            discard_custom,
        } => {
            let mut options = GenerateOptions::from(&config.generator);
            options.output_dir = output.unwrap_or_else(|| config.output_dir());
            if package.is_some() {
                options.package = package;
            }
            if discard_custom {
                options.preserve_custom_code = false;
            }

            let source = GitSource::new();
            let cache = config.fetch.cache();
            let report = Assembler::new(options, &source)
                .with_cache(&cache)
                .generate(&input)
                .with_context(|| format!("Failed to generate from {}", input.display()))?;

            println!("📦 Generated {}", report.package_dir.display());
            println!("  Classes: {}", report.classes);
            println!("  Enums:   {}", report.enums);
            println!("  Files:   {}", report.files.len());
        }

        Command::Tree {
            diagram,
            class,
            data,
            depth,
        } => {
            let library = load_library(&diagram)?;
            let class = pick_class(&library, class)?;
            let tree = match data {
                Some(data) => {
                    let (arena, id) = load_instance(Arc::new(library), &class, &data)?;
                    arena.tree(id)?
                }
                None => library.meta_tree(&class)?,
            };
            print!("{}", tree.render(true, depth));
        }

        Command::Paths {
            diagram,
            class,
            data,
            leaves,
        } => {
            let library = load_library(&diagram)?;
            let class = pick_class(&library, class)?;
            let paths = match data {
                Some(data) => {
                    let (arena, id) = load_instance(Arc::new(library), &class, &data)?;
                    arena.paths(id, leaves)?
                }
                None => library.meta_paths(&class, leaves)?,
            };
            for path in paths {
                println!("{path}");
            }
        }

        Command::Template { diagram, class, output } => {
            let library = load_library(&diagram)?;
            let class = pick_class(&library, class)?;
            let template = LinkTemplate::generate(&library, &class)?;
            template
                .save(&output)
                .with_context(|| format!("Failed to write template {}", output.display()))?;
            println!("✅ Wrote {} mappings to {}", template.mappings.len(), output.display());
        }

        Command::Export {
            diagram,
            class,
            data,
            format,
            output,
        } => {
            let library = load_library(&diagram)?;
            let class = pick_class(&library, class)?;
            let (arena, id) = load_instance(Arc::new(library), &class, &data)?;
            let format = format.unwrap_or(config.export.default_format);
            let text = serialize(&arena, id, format, config.export.output_format)?;
            write_output(output.as_deref(), &text)?;
        }

        Command::Convert {
            diagram,
            class,
            data,
            template,
            target,
            format,
            output,
        } => {
            let library = load_library(&diagram)?;
            let class = pick_class(&library, class)?;
            let (arena, id) = load_instance(Arc::new(library), &class, &data)?;
            let template = LinkTemplate::from_path(&template)
                .with_context(|| format!("Failed to read template {}", template.display()))?;
            let target = Arc::new(load_library(&target)?);
            let (converted, converted_id) = arena.convert_to(id, &template, target)?;
            let format = format.unwrap_or(config.export.default_format);
            let text = serialize(&converted, converted_id, format, config.export.output_format)?;
            write_output(output.as_deref(), &text)?;
        }
    }

    Ok(())
}

fn load_library(diagram: &Path) -> anyhow::Result<Library> {
    Library::from_path(diagram).with_context(|| format!("Failed to load {}", diagram.display()))
}

/// The requested class, or the single root class of the library
fn pick_class(library: &Library, class: Option<String>) -> anyhow::Result<String> {
    if let Some(class) = class {
        return Ok(class);
    }
    match library.roots() {
        [root] => Ok(root.clone()),
        roots => bail!(
            "the diagram has {} root classes ({}); pass --class",
            roots.len(),
            roots.join(", ")
        ),
    }
}

fn load_instance(library: Arc<Library>, class: &str, data: &Path) -> anyhow::Result<(Arena, InstanceId)> {
    let text = std::fs::read_to_string(data).with_context(|| format!("Failed to read {}", data.display()))?;
    let format = data
        .extension()
        .and_then(|e| e.to_str())
        .and_then(DataFormat::from_extension)
        .with_context(|| format!("Cannot tell the format of {}", data.display()))?;

    let mut arena = Arena::new(library);
    let id = match format {
        DataFormat::Json => arena.from_json(class, &text),
        DataFormat::Yaml => arena.from_yaml(class, &text),
        DataFormat::Xml => arena.from_xml(class, &text),
    }
    .with_context(|| format!("Failed to load {} as {}", data.display(), class))?;
    Ok((arena, id))
}

fn serialize(arena: &Arena, id: InstanceId, format: DataFormat, layout: OutputFormat) -> anyhow::Result<String> {
    let text = match format {
        DataFormat::Json => arena.to_json(id, layout == OutputFormat::Pretty)?,
        DataFormat::Yaml => arena.to_yaml(id)?,
        DataFormat::Xml => arena.to_xml(id)?,
    };
    Ok(text)
}

fn write_output(output: Option<&Path>, text: &str) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))?;
            println!("✅ Wrote {}", path.display());
        }
        None => println!("{text}"),
    }
    Ok(())
}

use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use seedloader_lib::config::LoaderConfig;
use seedloader_lib::db::Database;
use seedloader_lib::export::Exporter;
use seedloader_lib::import::{
    write_run_report, DescriptorConfig, FieldDescriptor, FixtureLoader, IdRegistry, SourceKind,
};

#[derive(Debug, Parser)]
#[command(name = "seedloader", about = "Load XML seed descriptors into the store", version)]
struct Cli {
    /// Loader configuration (JSON). Missing file means defaults.
    #[arg(long, default_value = "seedloader.json")]
    config: PathBuf,
    /// SQLite database, overriding the config file.
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Table prefix, overriding the config file.
    #[arg(long, global = true)]
    prefix: Option<String>,
    /// Read descriptors from the fixtures tree instead of the common one.
    #[arg(long, global = true)]
    fixtures: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Populate every entity in dependency order.
    Populate {
        /// Seed the identifier registry from a previous step.
        #[arg(long)]
        ids_in: Option<PathBuf>,
        /// Save the identifier registry for a later step.
        #[arg(long)]
        ids_out: Option<PathBuf>,
        /// Write a JSON run report into this directory.
        #[arg(long)]
        report_dir: Option<PathBuf>,
    },
    /// Print the population order.
    Order,
    /// Rewrite descriptors from the live store.
    Export {
        /// Entities to export; all of them when omitted.
        entities: Vec<String>,
        /// Also copy live images back into the seed image tree.
        #[arg(long)]
        images: bool,
    },
    /// Rewrite the fields block of a descriptor.
    Schema {
        entity: String,
        /// Field as NAME or NAME:RELATION. Repeatable.
        #[arg(long = "field", value_name = "NAME[:RELATION]")]
        fields: Vec<String>,
        /// Column used to name exported rows.
        #[arg(long = "id")]
        id_column: Option<String>,
        #[arg(long)]
        primary: Option<String>,
        #[arg(long)]
        class: Option<String>,
        #[arg(long)]
        sql: Option<String>,
        #[arg(long)]
        ordersql: Option<String>,
        #[arg(long)]
        image: Option<String>,
    },
}

fn main() {
    seedloader_lib::init_logging();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let mut config = LoaderConfig::load(&cli.config)
        .with_context(|| format!("load config {}", cli.config.display()))?;
    if let Some(db) = cli.db {
        config.database = db;
    }
    if let Some(prefix) = cli.prefix {
        config.table_prefix = prefix;
    }
    let source = if cli.fixtures {
        SourceKind::Fixture
    } else {
        SourceKind::Common
    };

    match cli.command {
        Commands::Populate {
            ids_in,
            ids_out,
            report_dir,
        } => populate(config, source, ids_in, ids_out, report_dir),
        Commands::Order => {
            let db = open_database(&config)?;
            let mut loader = FixtureLoader::new(config, db);
            if source == SourceKind::Fixture {
                loader.use_fixture_source();
            }
            for entity in loader.entity_order().context("sort entities")? {
                println!("{entity}");
            }
            Ok(0)
        }
        Commands::Export { entities, images } => {
            let db = open_database(&config)?;
            let mut exporter = Exporter::new(config, db).with_image_backup(images);
            exporter.use_source(source);
            let summaries = if entities.is_empty() {
                exporter.generate_all_entity_files()
            } else {
                exporter.generate_entity_files(&entities)
            }
            .context("export entities")?;
            println!("{}", serde_json::to_string_pretty(&summaries)?);
            Ok(report_errors(exporter.errors()))
        }
        Commands::Schema {
            entity,
            fields,
            id_column,
            primary,
            class,
            sql,
            ordersql,
            image,
        } => {
            let fields = fields.iter().map(|spec| parse_field(spec)).collect::<Vec<_>>();
            let descriptor = DescriptorConfig {
                id: id_column,
                primary,
                class,
                sql,
                ordersql,
                image,
            };
            let db = open_database(&config)?;
            let mut exporter = Exporter::new(config, db);
            exporter.use_source(source);
            exporter
                .generate_entity_schema(&entity, &fields, &descriptor)
                .with_context(|| format!("write schema for {entity}"))?;
            Ok(0)
        }
    }
}

fn populate(
    config: LoaderConfig,
    source: SourceKind,
    ids_in: Option<PathBuf>,
    ids_out: Option<PathBuf>,
    report_dir: Option<PathBuf>,
) -> Result<i32> {
    let database = config.database.clone();
    let db = open_database(&config)?;
    let mut loader = FixtureLoader::new(config, db);
    if source == SourceKind::Fixture {
        loader.use_fixture_source();
    }
    if let Some(path) = ids_in {
        let ids = IdRegistry::load(&path).with_context(|| format!("read ids {}", path.display()))?;
        loader.set_ids(ids);
    }

    let report = loader.populate_from_xml_files().context("populate entities")?;

    if let Some(path) = ids_out {
        loader
            .ids()
            .save(&path)
            .with_context(|| format!("write ids {}", path.display()))?;
    }
    if let Some(dir) = report_dir {
        let path = write_run_report(&dir, &database, &report)?;
        eprintln!("Wrote run report to {}", path.display());
    }

    let rows: usize = report.entities.iter().map(|e| e.rows).sum();
    println!(
        "{}",
        json!({
            "entities": report.order.len(),
            "rows": rows,
            "ids": report.ids,
            "errors": report.errors.len(),
        })
    );
    Ok(report_errors(loader.errors()))
}

fn open_database(config: &LoaderConfig) -> Result<Database> {
    if !config.database.exists() {
        bail!("database not found: {}", config.database.display());
    }
    Database::open(&config.database, config.table_prefix.clone())
        .with_context(|| format!("open {}", config.database.display()))
}

/// Print collected errors; exit code 2 when there are any.
fn report_errors(errors: &[String]) -> i32 {
    for error in errors {
        eprintln!("{error}");
    }
    if errors.is_empty() {
        0
    } else {
        2
    }
}

fn parse_field(spec: &str) -> FieldDescriptor {
    match spec.split_once(':') {
        Some((name, relation)) if !relation.trim().is_empty() => {
            FieldDescriptor::relation(name.trim(), relation.trim())
        }
        Some((name, _)) => FieldDescriptor::new(name.trim()),
        None => FieldDescriptor::new(spec.trim()),
    }
}

use clap::{Args, Parser, Subcommand, ValueEnum};
use dsr_core::collaborators::TracingNotifier;
use dsr_core::constants::AUDIT_LOG_FILE;
use dsr_core::manifest::bucket_key::render_tsv;
use dsr_core::{
    Actor, Catalogue, CoreConfig, CoreContext, FileAuditLog, LocalStore, NewRelease,
    NonEmptyText, ReleaseEngine, ReleaseFlags, ReleaseKey, ReleaseRole, ReleaseUpdate,
    SpecimenSelector, StaticJobStatus, StaticRoleProvider,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "dsr")]
#[command(about = "DSR dataset release CLI")]
struct Cli {
    /// Catalogue YAML document
    #[arg(long, env = "DSR_CATALOGUE")]
    catalogue: PathBuf,
    /// Directory holding persisted releases and the audit log
    #[arg(long, env = "DSR_DATA_DIR")]
    data_dir: PathBuf,
    /// Role grants YAML; without it the operator may create releases and administers the
    /// release it names
    #[arg(long, env = "DSR_ROLES")]
    roles: Option<PathBuf>,
    /// Subject id of the operator
    #[arg(long = "as", default_value = "dsr-cli")]
    operator: String,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct FlagArgs {
    #[arg(long)]
    allow_read: bool,
    #[arg(long)]
    allow_variant: bool,
    #[arg(long)]
    allow_phenotype: bool,
    #[arg(long)]
    allow_s3: bool,
    #[arg(long)]
    allow_gs: bool,
    #[arg(long)]
    allow_r2: bool,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct SelectorArgs {
    /// Internal case, patient or specimen ids (comma-separated)
    #[arg(long)]
    ids: Option<String>,
    /// External identifier values (comma-separated)
    #[arg(long)]
    identifiers: Option<String>,
    /// Every specimen in the release's datasets
    #[arg(long)]
    all: bool,
}

impl SelectorArgs {
    fn selector(&self) -> SpecimenSelector {
        let split = |s: &str| -> Vec<String> {
            s.split(',').map(|v| v.trim().to_string()).collect()
        };
        match (&self.ids, &self.identifiers) {
            (Some(ids), _) => SpecimenSelector::Ids(split(ids)),
            (None, Some(identifiers)) => SpecimenSelector::Identifiers(split(identifiers)),
            (None, None) => SpecimenSelector::All,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ManifestFormat {
    Master,
    BucketKey,
    Gateway,
}

#[derive(Subcommand)]
enum Commands {
    /// List release keys
    List,
    /// Create a release
    Create {
        key: String,
        description: String,
        /// Dataset URIs (comma-separated)
        datasets: String,
        #[command(flatten)]
        flags: FlagArgs,
    },
    /// Change one field of a release, e.g. `update R1 allowGs true`
    Update {
        key: String,
        field: String,
        value: String,
    },
    /// Show a release
    Show { key: String },
    /// Select specimens
    Select {
        key: String,
        #[command(flatten)]
        selector: SelectorArgs,
    },
    /// Unselect specimens
    Unselect {
        key: String,
        #[command(flatten)]
        selector: SelectorArgs,
    },
    /// Clear the whole selection
    Clear { key: String },
    /// Print one page of the case tree
    Tree {
        key: String,
        #[arg(long, default_value_t = 1)]
        page: usize,
        /// Cases per page, 0 for the default
        #[arg(long, default_value_t = 0)]
        page_size: usize,
        #[arg(long)]
        search: Option<String>,
    },
    /// Activate a release
    Activate { key: String },
    /// Deactivate a release
    Deactivate { key: String },
    /// Print the active manifest
    Manifest {
        key: String,
        #[arg(long, value_enum, default_value = "master")]
        format: ManifestFormat,
        /// Restrict bucket-key rows to these protocols (comma-separated)
        #[arg(long)]
        protocols: Option<String>,
    },
    /// Check the stored manifest against its integrity tag
    Verify { key: String },
    /// List retired activations
    History { key: String },
}

impl Commands {
    fn release_key(&self) -> Option<&str> {
        match self {
            Commands::List => None,
            Commands::Create { key, .. }
            | Commands::Update { key, .. }
            | Commands::Show { key }
            | Commands::Select { key, .. }
            | Commands::Unselect { key, .. }
            | Commands::Clear { key }
            | Commands::Tree { key, .. }
            | Commands::Activate { key }
            | Commands::Deactivate { key }
            | Commands::Manifest { key, .. }
            | Commands::Verify { key }
            | Commands::History { key } => Some(key.as_str()),
        }
    }
}

fn build_engine(
    cli: &Cli,
    operator: &Actor,
    key: Option<&ReleaseKey>,
) -> Result<ReleaseEngine, Box<dyn std::error::Error>> {
    let catalogue = Catalogue::from_yaml(&std::fs::read_to_string(&cli.catalogue)?)?;
    std::fs::create_dir_all(&cli.data_dir)?;
    let store = LocalStore::open(catalogue, &cli.data_dir)?;

    let roles = match &cli.roles {
        Some(path) => StaticRoleProvider::from_yaml(&std::fs::read_to_string(path)?)?,
        None => {
            let roles = StaticRoleProvider::new();
            roles.allow_creation(operator);
            if let Some(key) = key {
                roles.grant(key, operator.clone(), ReleaseRole::Administrator);
            }
            roles
        }
    };

    let ctx = CoreContext::new(
        Arc::new(CoreConfig::default()),
        Arc::new(store),
        Arc::new(FileAuditLog::open(&cli.data_dir.join(AUDIT_LOG_FILE))?),
        Arc::new(roles),
        Arc::new(StaticJobStatus::new()),
        Arc::new(TracingNotifier),
    );
    Ok(ReleaseEngine::new(Arc::new(ctx)))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// `true`/`false` become booleans, anything else is passed as text.
fn parse_update(field: &str, value: &str) -> Result<ReleaseUpdate, serde_json::Error> {
    let value = match value {
        "true" => serde_json::Value::Bool(true),
        "false" => serde_json::Value::Bool(false),
        other => serde_json::Value::String(other.to_string()),
    };
    serde_json::from_value(serde_json::json!({ "field": field, "value": value }))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let Some(command) = &cli.command else {
        println!("Use 'dsr --help' for commands");
        return Ok(());
    };

    let operator = Actor::new(NonEmptyText::new(&cli.operator)?);
    let key = command.release_key().map(ReleaseKey::new).transpose()?;
    let engine = build_engine(&cli, &operator, key.as_ref())?;

    match (command, key) {
        (Commands::List, _) => {
            let keys = engine.release_keys()?;
            if keys.is_empty() {
                println!("No releases found.");
            }
            for key in keys {
                println!("{}", key);
            }
        }
        (
            Commands::Create {
                description,
                datasets,
                flags,
                ..
            },
            Some(key),
        ) => {
            let request = NewRelease {
                key,
                description: NonEmptyText::new(description)?,
                datasets: datasets
                    .split(',')
                    .map(|d| d.trim().to_string())
                    .filter(|d| !d.is_empty())
                    .collect::<BTreeSet<_>>(),
                flags: ReleaseFlags {
                    allow_read: flags.allow_read,
                    allow_variant: flags.allow_variant,
                    allow_phenotype: flags.allow_phenotype,
                    allow_s3: flags.allow_s3,
                    allow_gs: flags.allow_gs,
                    allow_r2: flags.allow_r2,
                },
            };
            let release = engine.create_release(Some(&operator), request)?;
            println!("Created release {}", release.key());
        }
        (Commands::Update { field, value, .. }, Some(key)) => {
            let update = parse_update(field, value)?;
            engine.update_release(&operator, &key, update)?;
            println!("Updated {} on release {}", field, key);
        }
        (Commands::Show { .. }, Some(key)) => {
            let release = engine.release(&key)?;
            println!("Release: {}", release.key());
            println!("Description: {}", release.description());
            println!(
                "Datasets: {}",
                release.datasets().iter().cloned().collect::<Vec<_>>().join(", ")
            );
            println!("Selected specimens: {}", release.selected().len());
            match release.activation() {
                Some(activation) => println!(
                    "Activated: {} (tag {})",
                    activation.id(),
                    activation.manifest_tag()
                ),
                None => println!("Activated: no"),
            }
            println!("Past activations: {}", release.history().len());
        }
        (Commands::Select { selector, .. }, Some(key)) => {
            let change = engine.resolve_and_set_selected(&operator, &key, &selector.selector())?;
            println!(
                "Selected {} of {} requested, {} in total",
                change.changed, change.requested, change.selected_total
            );
        }
        (Commands::Unselect { selector, .. }, Some(key)) => {
            let change =
                engine.resolve_and_set_unselected(&operator, &key, &selector.selector())?;
            println!(
                "Unselected {} of {} requested, {} remain",
                change.changed, change.requested, change.selected_total
            );
        }
        (Commands::Clear { .. }, Some(key)) => {
            let change = engine.clear_selection(&operator, &key)?;
            println!("Cleared {} specimens", change.changed);
        }
        (
            Commands::Tree {
                page,
                page_size,
                search,
                ..
            },
            Some(key),
        ) => {
            let tree = engine.node_tree(&operator, &key, *page, *page_size, search.as_deref())?;
            print_json(&tree)?;
        }
        (Commands::Activate { .. }, Some(key)) => {
            let summary = engine.activate(&operator, &key)?;
            println!(
                "Activated {} as {} ({} specimens, {} files, tag {})",
                key,
                summary.activation_id,
                summary.specimen_count,
                summary.file_count,
                summary.manifest_tag
            );
        }
        (Commands::Deactivate { .. }, Some(key)) => {
            let summary = engine.deactivate(&operator, &key)?;
            println!(
                "Deactivated {} ({} past activations)",
                summary.activation_id, summary.history_length
            );
        }
        (
            Commands::Manifest {
                format, protocols, ..
            },
            Some(key),
        ) => {
            let protocols: Option<Vec<String>> = protocols
                .as_ref()
                .map(|p| p.split(',').map(|s| s.trim().to_string()).collect());
            match format {
                ManifestFormat::Master => match engine.manifest_blob(&key)? {
                    Some(blob) => println!("{}", blob.blob),
                    None => eprintln!("Release {} is not activated", key),
                },
                ManifestFormat::BucketKey => {
                    match engine.bucket_key_manifest(&key, protocols.as_deref())? {
                        Some(rows) => print!("{}", render_tsv(&rows)),
                        None => eprintln!("Release {} is not activated", key),
                    }
                }
                ManifestFormat::Gateway => match engine.gateway_manifest(&key)? {
                    Some(manifest) => print_json(&manifest)?,
                    None => eprintln!("Release {} is not activated", key),
                },
            }
        }
        (Commands::Verify { .. }, Some(key)) => match engine.verify_activation(&key) {
            Ok(tag) => println!("Manifest for {} verified: {}", key, tag),
            Err(e) => eprintln!("Error verifying manifest: {}", e),
        },
        (Commands::History { .. }, Some(key)) => {
            for activation in engine.activation_history(&key)? {
                println!(
                    "{}\t{}\t{}",
                    activation.id(),
                    activation.activated_by().subject_id,
                    activation.manifest_tag()
                );
            }
        }
        (_, None) => return Err("command needs a release key".into()),
    }

    Ok(())
}

//! circle CLI: create reading circles, claim chunks, track progress.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use recite_circle::allocation::Allocation;
use recite_circle::catalog::{Catalog, ResourceRef};
use recite_circle::config::{self, Config};
use recite_circle::coordinator::{Coordinator, CoordinatorConfig, NewSession, ResourceSelection};
use recite_circle::db::Db;
use recite_circle::error::Error;
use recite_circle::identity::CallerId;
use recite_circle::model::{
    Assignment, AssignmentId, GroupState, Session, SessionCode, SessionInfo, Variant,
};
use recite_circle::telemetry::{TelemetryConfig, init_telemetry};
use secrecy::ExposeSecret;

#[derive(Parser)]
#[command(name = "circle", about = "Share out recitation work among participants")]
struct Cli {
    /// Authenticated identity of the caller
    #[arg(long, global = true, env = "CIRCLE_USER")]
    user: Option<String>,
    /// Display name used when no authenticated identity is given
    #[arg(long, global = true)]
    guest_name: Option<String>,
    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the resources in the catalog
    Resources {
        /// Only show one variant (paged, list_based, countable, joint)
        #[arg(long)]
        variant: Option<Variant>,
    },
    /// Show how a resource would be split, without creating anything
    Preview {
        /// Resource as CODE or ID, optionally with an override (QURAN:2)
        #[arg(value_parser = parse_selection)]
        resource: ResourceSelection,
        /// Number of participants
        #[arg(short = 'n', long)]
        participants: u32,
    },
    /// Create a session
    Create {
        /// Resources as CODE or ID, optionally with an override (QURAN:2)
        #[arg(required = true, value_parser = parse_selection)]
        resources: Vec<ResourceSelection>,
        /// Number of participants
        #[arg(short = 'n', long)]
        participants: u32,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Add a resource to a session you created
    Add {
        code: String,
        #[arg(value_parser = parse_selection)]
        resource: ResourceSelection,
    },
    /// Show a session and its chunks
    Show { code: String },
    /// Claim the group a chunk belongs to
    Claim { id: AssignmentId },
    /// Release a group you hold
    Cancel { id: AssignmentId },
    /// Mark a group you hold as completed
    Complete { id: AssignmentId },
    /// Record how many units of a chunk remain
    Progress { id: AssignmentId, remaining: u32 },
    /// Release every group you hold in a session
    Leave { code: String },
    /// Release every group in a session you created
    Reset { code: String },
    /// Delete a session you created
    Delete { code: String },
    /// Sessions you created
    Created,
    /// Sessions where you hold a claim
    Joined,
}

fn parse_selection(s: &str) -> Result<ResourceSelection, String> {
    let (resource, override_units) = match s.split_once(':') {
        Some((resource, units)) => {
            let units = units
                .trim()
                .parse::<i64>()
                .map_err(|e| format!("invalid override {units:?}: {e}"))?;
            (resource, Some(units))
        }
        None => (s, None),
    };
    let resource: ResourceRef = resource.parse().map_err(|e| format!("{e}"))?;
    Ok(ResourceSelection {
        resource,
        override_units,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Catalog-only commands need neither a database nor an identity.
    match &cli.command {
        Command::Resources { variant } => {
            let catalog = catalog_from_env()?;
            return print_resources(&catalog, *variant, cli.json);
        }
        Command::Preview {
            resource,
            participants,
        } => {
            let catalog = catalog_from_env()?;
            let descriptor = catalog.resolve(&resource.resource)?;
            let allocation = recite_circle::allocation::allocate(
                descriptor,
                *participants,
                resource.override_units,
            )?;
            return print_allocation(&allocation, cli.json);
        }
        _ => {}
    }

    let config = Config::from_env()?;
    let guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "circle".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.health_check().await?;
    db.migrate().await?;

    let coordinator = Coordinator::new(
        Arc::new(db),
        Arc::new(config.load_catalog()?),
        CoordinatorConfig::from(&config),
    );

    let result = run(&coordinator, &cli).await;
    // Flush telemetry before a possible early exit.
    drop(guard);

    if let Err(e) = result {
        if let Some(err) = e.downcast_ref::<Error>() {
            eprintln!("error[{}]: {err}", err.kind());
            std::process::exit(1);
        }
        return Err(e);
    }
    Ok(())
}

async fn run(coordinator: &Coordinator<Db>, cli: &Cli) -> anyhow::Result<()> {
    let caller = || coordinator.identify(cli.user.as_deref(), cli.guest_name.as_deref());

    match &cli.command {
        Command::Resources { .. } | Command::Preview { .. } => Ok(()),
        Command::Create {
            resources,
            participants,
            description,
        } => {
            let caller = caller()?;
            let mut request = NewSession::new(*participants);
            request.selections = resources.clone();
            request.description = description.clone();
            let session = coordinator.create_session(request, &caller).await?;
            print_session(coordinator.catalog(), &session, cli.json)
        }
        Command::Add { code, resource } => {
            let caller = caller()?;
            let code = SessionCode::from(code.as_str());
            let added = coordinator.add_resource(&code, resource, &caller).await?;
            print_chunks(coordinator.catalog(), &added, cli.json)
        }
        Command::Show { code } => {
            let session = coordinator
                .get_session(&SessionCode::from(code.as_str()))
                .await?;
            print_session(coordinator.catalog(), &session, cli.json)
        }
        Command::Claim { id } => {
            let group = coordinator.claim(*id, &caller()?).await?;
            print_chunks(coordinator.catalog(), &group, cli.json)
        }
        Command::Cancel { id } => {
            let group = coordinator.cancel(*id, &caller()?).await?;
            print_chunks(coordinator.catalog(), &group, cli.json)
        }
        Command::Complete { id } => {
            let group = coordinator.complete(*id, &caller()?).await?;
            print_chunks(coordinator.catalog(), &group, cli.json)
        }
        Command::Progress { id, remaining } => {
            let chunk = coordinator
                .update_progress(*id, &caller()?, *remaining)
                .await?;
            print_chunks(coordinator.catalog(), std::slice::from_ref(&chunk), cli.json)
        }
        Command::Leave { code } => {
            let released = coordinator
                .leave_session(&SessionCode::from(code.as_str()), &caller()?)
                .await?;
            println!("Released {released} group(s).");
            Ok(())
        }
        Command::Reset { code } => {
            let released = coordinator
                .reset_session(&SessionCode::from(code.as_str()), &caller()?)
                .await?;
            println!("Reset {released} group(s).");
            Ok(())
        }
        Command::Delete { code } => {
            coordinator
                .delete_session(&SessionCode::from(code.as_str()), &caller()?)
                .await?;
            println!("Deleted session {code}.");
            Ok(())
        }
        Command::Created => {
            let caller: CallerId = caller()?;
            let sessions = coordinator.list_created_by(caller.as_str()).await?;
            print_sessions(&sessions, cli.json)
        }
        Command::Joined => {
            let caller: CallerId = caller()?;
            let sessions = coordinator.list_joined_by(caller.as_str()).await?;
            print_sessions(&sessions, cli.json)
        }
    }
}

fn catalog_from_env() -> anyhow::Result<Catalog> {
    Ok(match config::catalog_path_from_env() {
        Some(path) => Catalog::load(&path)?,
        None => Catalog::builtin(),
    })
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_resources(catalog: &Catalog, variant: Option<Variant>, json: bool) -> anyhow::Result<()> {
    let resources: Vec<_> = catalog
        .all()
        .into_iter()
        .filter(|r| variant.is_none_or(|v| r.variant == v))
        .collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&resources)?);
        return Ok(());
    }

    println!(
        "{:<4}  {:<14}  {:<10}  {:<10}  {:>6}  NAME",
        "ID", "CODE", "VARIANT", "SCALING", "UNITS"
    );
    println!("{}", "-".repeat(70));
    for r in resources {
        println!(
            "{:<4}  {:<14}  {:<10}  {:<10}  {:>6}  {}",
            r.id,
            r.code,
            r.variant,
            r.effective_scaling(),
            r.total_units,
            r.name
        );
    }
    Ok(())
}

fn print_allocation(allocation: &Allocation, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(allocation)?);
        return Ok(());
    }

    println!(
        "Mode: {}  Target: {}  Calculation: {}",
        allocation.mode, allocation.target_units, allocation.calculation_units
    );
    println!("{:<5}  {:>6}  {:>6}  {:>8}", "PART", "START", "END", "PROGRESS");
    println!("{}", "-".repeat(32));
    for c in &allocation.chunks {
        println!(
            "{:<5}  {:>6}  {:>6}  {:>8}",
            c.participant_index,
            c.start_unit,
            c.end_unit,
            c.progress.map(|p| p.to_string()).unwrap_or("-".to_string())
        );
    }
    println!("\n{} chunk(s)", allocation.chunks.len());
    Ok(())
}

fn print_session(catalog: &Catalog, session: &Session, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(session)?);
        return Ok(());
    }

    let info = &session.info;
    println!("Code:         {}", info.code);
    println!("Description:  {}", info.description);
    println!("Creator:      {}", info.creator_id);
    println!("Participants: {}", info.participant_count);
    println!("Created:      {}", info.created_at.format("%Y-%m-%d %H:%M"));
    println!();
    print_chunks(catalog, &session.assignments, false)
}

fn print_chunks(catalog: &Catalog, chunks: &[Assignment], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(chunks)?);
        return Ok(());
    }

    println!(
        "{:<36}  {:<14}  {:<4}  {:>11}  {:>8}  {:<10}  HOLDER",
        "ID", "RESOURCE", "PART", "RANGE", "PROGRESS", "STATE"
    );
    println!("{}", "-".repeat(110));
    for a in chunks {
        let resource = catalog
            .get(a.resource_id)
            .map(|r| r.code.clone())
            .unwrap_or_else(|| a.resource_id.to_string());
        println!(
            "{:<36}  {:<14}  {:<4}  {:>11}  {:>8}  {:<10}  {}",
            a.id,
            resource,
            a.participant_index,
            format!("{}-{}", a.start_unit, a.end_unit),
            a.progress.map(|p| p.to_string()).unwrap_or("-".to_string()),
            GroupState::of(std::slice::from_ref(a)),
            a.claimed_by.as_deref().unwrap_or("-")
        );
    }
    println!("\n{} chunk(s)", chunks.len());
    Ok(())
}

fn print_sessions(sessions: &[SessionInfo], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(sessions)?);
        return Ok(());
    }
    if sessions.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }

    println!("{:<8}  {:<5}  {:<16}  DESCRIPTION", "CODE", "PART", "CREATED");
    println!("{}", "-".repeat(60));
    for s in sessions {
        println!(
            "{:<8}  {:<5}  {:<16}  {}",
            s.code,
            s.participant_count,
            s.created_at.format("%Y-%m-%d %H:%M"),
            s.description
        );
    }
    println!("\n{} session(s)", sessions.len());
    Ok(())
}

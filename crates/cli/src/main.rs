//! Grievance desk CLI entry point.
//!
//! This binary is the composition root for the entire system. Responsibilities:
//!
//! 1. **Parse configuration**: load `grievance.toml` (or `--config`).
//! 2. **Wire observability**: configure `tracing-subscriber` with a pretty or
//!    JSON layer and, when configured, an OpenTelemetry OTLP exporter. All
//!    `tracing` spans and events emitted by every crate flow through it.
//! 3. **Construct infrastructure**: open the JSON file store and build the
//!    department directory, complaint lifecycle and escalation evaluator on
//!    top of it.
//! 4. **Run one command**: every core operation is a subcommand. The caller's
//!    identity comes from `--user`, `--role` and `--department`.
//!
//! Command results are printed to stdout as JSON.

mod config;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use grievance::reference::REFERENCE_PREFIX;
use grievance::{
    Complaint, ComplaintFilter, ComplaintId, ComplaintLifecycle, ComplaintStatus, DepartmentCode,
    DepartmentDirectory, EscalationEvaluator, GrievanceError, Identity, NewComplaint,
    NewDepartment, ReferenceNumber, RetryPolicy, Role, Timestamp, UserId,
};
use serde::Serialize;
use store::JsonFileStore;
use tracing::{error, info, warn};

use crate::config::{Config, DEFAULT_CONFIG_PATH};

#[derive(Parser, Debug)]
#[command(
    name = "grievance",
    version,
    about = "Grievance desk: complaint intake, lifecycle and escalation"
)]
struct Cli {
    #[arg(long, global = true, env = "GRIEVANCE_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Caller's user id.
    #[arg(long, global = true, env = "GRIEVANCE_USER")]
    user: Option<UserId>,
    #[arg(long, global = true, env = "GRIEVANCE_ROLE", default_value_t = Role::Citizen)]
    role: Role,
    /// Caller's department code (department role only).
    #[arg(long, global = true, env = "GRIEVANCE_DEPARTMENT")]
    department: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register the departments listed in the configuration.
    Seed,
    Departments {
        #[command(subcommand)]
        command: DepartmentCommands,
    },
    /// File a complaint.
    File {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
        /// Department code. Routed from `--category` when omitted.
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        subcategory: Option<String>,
        #[arg(long)]
        language: Option<String>,
        #[arg(long)]
        source: Option<String>,
    },
    /// Move a complaint to another status.
    Transition {
        /// Complaint reference (`COMP-...`) or id.
        complaint: String,
        status: ComplaintStatus,
    },
    /// Assign a complaint to another department (admin).
    Reassign {
        complaint: String,
        /// Department code.
        to: String,
    },
    /// Run the escalation evaluator once.
    Escalate {
        /// Evaluation time, RFC 3339. Defaults to the current time.
        #[arg(long)]
        now: Option<String>,
    },
    /// Show a complaint and the transitions open to the caller.
    Show { complaint: String },
    List {
        #[arg(long)]
        status: Option<ComplaintStatus>,
        #[arg(long = "assigned-to")]
        assigned_to: Option<String>,
        /// Only complaints filed by the caller.
        #[arg(long, default_value_t = false)]
        mine: bool,
    },
    /// Complaint counts per status and department (admin).
    Stats,
}

#[derive(Subcommand, Debug)]
enum DepartmentCommands {
    List,
    Add {
        code: String,
        name: String,
        #[arg(long)]
        parent: Option<String>,
    },
    /// Move a department under another parent, or make it a root.
    Reparent {
        code: String,
        #[arg(long)]
        parent: Option<String>,
    },
    Lineage { code: String },
}

impl Cli {
    fn identity(&self) -> anyhow::Result<Identity> {
        let Some(user_id) = self.user else {
            bail!("--user (or GRIEVANCE_USER) is required for this command");
        };
        Ok(Identity {
            user_id,
            role: self.role,
            department: self.department.as_deref().map(code).transpose()?,
        })
    }
}

struct App {
    config: Config,
    directory: Arc<DepartmentDirectory>,
    lifecycle: Arc<ComplaintLifecycle>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    let telemetry = telemetry::init(&config.telemetry)?;

    let result = run(cli, config).await;
    if let Err(e) = &result {
        let retryable = e
            .downcast_ref::<GrievanceError>()
            .is_some_and(|g| matches!(g.retry_policy(), RetryPolicy::Retryable { .. }));
        error!(error = %e, retryable, "Command failed");
    }

    telemetry.shutdown();
    result
}

async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    let store = Arc::new(
        JsonFileStore::open(&config.store.path)
            .await
            .context("opening store")?,
    );
    let directory = Arc::new(DepartmentDirectory::load(store.clone()).await?);
    let lifecycle = Arc::new(ComplaintLifecycle::new(directory.clone(), store));
    let app = App {
        config,
        directory,
        lifecycle,
    };

    match &cli.command {
        Commands::Seed => print(&app.seed().await?),
        Commands::Departments { command } => match command {
            DepartmentCommands::List => print(&app.department_views()?),
            DepartmentCommands::Add { code: c, name, parent } => {
                require_admin(&cli.identity()?)?;
                let department = app
                    .directory
                    .register(NewDepartment {
                        code: code(c)?,
                        name: name.clone(),
                        parent: parent.as_deref().map(code).transpose()?,
                        policy: None,
                    })
                    .await?;
                print(&department)
            }
            DepartmentCommands::Reparent { code: c, parent } => {
                require_admin(&cli.identity()?)?;
                let parent = parent.as_deref().map(code).transpose()?;
                print(&app.directory.reparent(&code(c)?, parent.as_ref()).await?)
            }
            DepartmentCommands::Lineage { code: c } => print(&app.directory.lineage(&code(c)?)?),
        },
        Commands::File {
            title,
            description,
            to,
            category,
            subcategory,
            language,
            source,
        } => {
            let identity = cli.identity()?;
            let department = match to {
                Some(d) => code(d)?,
                None => app.config.routing.route(category.as_deref()).clone(),
            };
            let new = NewComplaint {
                category: category.clone(),
                subcategory: subcategory.clone(),
                language: language.clone(),
                source: source.clone(),
                ..NewComplaint::new(title.clone(), description.clone(), department)
            };
            print(&app.lifecycle.create(&identity, new).await?)
        }
        Commands::Transition { complaint, status } => {
            let identity = cli.identity()?;
            let id = app.resolve(complaint).await?;
            print(&app.lifecycle.transition(id, *status, &identity).await?)
        }
        Commands::Reassign { complaint, to } => {
            let identity = cli.identity()?;
            let id = app.resolve(complaint).await?;
            print(&app.lifecycle.reassign(id, &code(to)?, &identity).await?)
        }
        Commands::Escalate { now } => {
            let now = match now {
                Some(text) => Timestamp::parse_rfc3339(text)
                    .with_context(|| format!("--now must be an RFC 3339 timestamp, got '{text}'"))?,
                None => Timestamp::now(),
            };
            let report = EscalationEvaluator::new(app.lifecycle.clone())
                .run(now)
                .await?;
            print(&report)
        }
        Commands::Show { complaint } => {
            let id = app.resolve(complaint).await?;
            let complaint = app.lifecycle.get(id).await?;
            let permitted = match cli.identity() {
                Ok(identity) => app.lifecycle.permitted_transitions(id, &identity).await?,
                Err(_) => Vec::new(),
            };
            print(&ComplaintView::new(&app, complaint, permitted))
        }
        Commands::List {
            status,
            assigned_to,
            mine,
        } => {
            let department = match assigned_to {
                Some(c) => Some(app.directory.get(&code(c)?)?.id),
                None => None,
            };
            let filer = if *mine { Some(cli.identity()?.user_id) } else { None };
            let filter = ComplaintFilter {
                status: *status,
                department,
                filer,
            };
            print(&app.lifecycle.list(&filter).await?)
        }
        Commands::Stats => print(&app.lifecycle.statistics(&cli.identity()?).await?),
    }
}

impl App {
    async fn seed(&self) -> anyhow::Result<SeedReport> {
        let mut report = SeedReport::default();
        for department in &self.config.departments {
            if self.directory.get(&department.code).is_ok() {
                report.existing.push(department.code.clone());
                continue;
            }
            let created = self.directory.register(department.clone()).await?;
            report.created.push(created.code);
        }

        for destination in self.config.routing.destinations() {
            if self.directory.get(destination).is_err() {
                warn!(department = %destination, "Routing target is not a registered department");
            }
        }
        info!(
            created = report.created.len(),
            existing = report.existing.len(),
            "Seeding complete"
        );
        Ok(report)
    }

    fn department_views(&self) -> anyhow::Result<Vec<DepartmentView>> {
        self.directory
            .list()
            .into_iter()
            .map(|d| -> anyhow::Result<DepartmentView> {
                let effective_policy = self.directory.resolve_policy(&d.code)?;
                Ok(DepartmentView {
                    code: d.code,
                    name: d.name,
                    parent: d.parent,
                    own_policy: d.policy.is_some(),
                    effective_policy,
                })
            })
            .collect()
    }

    /// Resolves a reference number or id to a complaint id.
    async fn resolve(&self, complaint: &str) -> anyhow::Result<ComplaintId> {
        if complaint.starts_with(REFERENCE_PREFIX) {
            let reference = ReferenceNumber::new(complaint).context("empty reference")?;
            return Ok(self.lifecycle.find_by_reference(&reference).await?.id);
        }
        complaint
            .parse()
            .with_context(|| format!("'{complaint}' is neither a reference nor a complaint id"))
    }
}

#[derive(Debug, Default, Serialize)]
struct SeedReport {
    created: Vec<DepartmentCode>,
    existing: Vec<DepartmentCode>,
}

#[derive(Debug, Serialize)]
struct DepartmentView {
    code: DepartmentCode,
    name: String,
    parent: Option<DepartmentCode>,
    own_policy: bool,
    effective_policy: Option<grievance::EscalationPolicy>,
}

#[derive(Debug, Serialize)]
struct ComplaintView {
    #[serde(flatten)]
    complaint: Complaint,
    department_code: Option<DepartmentCode>,
    permitted_transitions: Vec<ComplaintStatus>,
}

impl ComplaintView {
    fn new(app: &App, complaint: Complaint, permitted_transitions: Vec<ComplaintStatus>) -> Self {
        Self {
            department_code: app.directory.get_by_id(complaint.department).map(|d| d.code),
            complaint,
            permitted_transitions,
        }
    }
}

fn code(value: &str) -> anyhow::Result<DepartmentCode> {
    DepartmentCode::new(value).context("department code must not be blank")
}

fn require_admin(identity: &Identity) -> anyhow::Result<()> {
    if identity.role != Role::Admin {
        return Err(GrievanceError::forbidden("only admins can change the department hierarchy").into());
    }
    Ok(())
}

fn print<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

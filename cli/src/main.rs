//! MultiDB Academy CLI
//!
//! Sign in, manage database instances and run queries against the ones
//! assigned to you.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use multidb_common::{EngineType, Role};
use serde::Serialize;
use tracing::{error, warn};

use multidb_cli::api::{ApiClient, ApiError};
use multidb_cli::config::{ClientConfig, CLI_VERSION};
use multidb_cli::credentials::{build_store, token_expiry};
use multidb_cli::guard::{self, GuardDecision, Route};
use multidb_cli::pages::{self, ActionError, InstancesPage, QueryWorkspace};
use multidb_cli::render;
use multidb_cli::session::SessionController;
use multidb_cli::validate::{
    validate_email, validate_form, AssignForm, CreateInstanceForm, FieldResult, RegisterForm,
};

#[derive(Parser)]
#[command(
    name = "multidb",
    about = "MultiDB Academy CLI: database instances for the classroom",
    disable_version_flag = true,
    version = CLI_VERSION
)]
struct Cli {
    #[arg(long = "version", short = 'v')]
    version: bool,

    #[command(subcommand)]
    cmd: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with email and password
    Login {
        email: String,
        #[arg(long, env = "MULTIDB_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account and sign in
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "MULTIDB_PASSWORD", hide_env_values = true)]
        password: String,
        /// Register as administrator instead of student
        #[arg(long)]
        admin: bool,
    },
    /// Forget the local session
    Logout,
    /// Show the signed-in user
    Whoami {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
    /// Database instances
    #[command(subcommand)]
    Instances(InstanceCommands),
    /// Run a query against an assigned instance, or show the workspace when no query is given
    Query {
        #[arg(long)]
        instance: Option<String>,
        query: Option<String>,
    },
    /// List every user with their assignments (admin)
    Users,
}

#[derive(Subcommand)]
enum InstanceCommands {
    /// Instances visible to you
    List,
    /// Register a new instance (admin)
    Create {
        #[arg(long)]
        name: String,
        /// mysql, postgresql, mongodb, redis, sqlserver or a numeric code
        #[arg(long)]
        engine: Option<String>,
        #[arg(long, default_value = "localhost")]
        server: String,
        #[arg(long, default_value = "3306")]
        port: String,
        #[arg(long)]
        database: String,
        #[arg(long, default_value = "root")]
        username: String,
        #[arg(long, env = "MULTIDB_INSTANCE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Assign an instance to a student, or list the choices when ids are omitted (admin)
    Assign {
        #[arg(long)]
        student: Option<String>,
        #[arg(long)]
        instance: Option<String>,
    },
}

impl Commands {
    /// The page a command renders. `None` for commands that work in any state.
    fn route(&self) -> Option<Route> {
        match self {
            Self::Login { .. } => Some(Route::Login),
            Self::Register { .. } => Some(Route::Register),
            Self::Logout | Self::Whoami { .. } => None,
            Self::Instances(InstanceCommands::List) => Some(Route::Instances),
            Self::Instances(InstanceCommands::Create { .. }) => Some(Route::CreateInstance),
            Self::Instances(InstanceCommands::Assign { .. }) => Some(Route::AssignInstance),
            Self::Query { .. } => Some(Route::Queries),
            Self::Users => Some(Route::Users),
        }
    }
}

#[derive(Serialize)]
struct WhoamiOutput {
    logged_in: bool,
    email: Option<String>,
    name: Option<String>,
    role: Option<Role>,
    jwt_expires_at: Option<u64>,
}

/// Runs `fut` behind a spinner on stderr.
async fn with_spinner<F: Future>(msg: &str, fut: F) -> F::Output {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        spinner.set_style(style.tick_strings(&["⠋", "⠙", "⠚", "⠞", "⠖", "⠦", "⠴", "⠲", "⠳", "⠓"]));
    }
    spinner.set_message(msg.to_string());
    spinner.enable_steady_tick(Duration::from_millis(120));
    let out = fut.await;
    spinner.finish_and_clear();
    out
}

fn require_password(password: &str) -> FieldResult {
    if password.is_empty() {
        Err("Password is required")
    } else {
        Ok(())
    }
}

fn report_api_error(e: &ApiError) {
    if e.is_session_expired() {
        eprintln!("Session expired. Run `{}` again.", Route::Login.command());
    } else {
        eprintln!("Error: {}", e);
    }
}

/// Sign-in failures: a 401 here means rejected credentials, not a lapsed session.
fn report_auth_error(e: &ApiError) {
    eprintln!("Error: {}", e);
}

fn print_landing(session: &SessionController) {
    if let Some(next) = Route::landing_for(&session.state()) {
        println!("Next: `{}`", next.command());
    }
}

fn report_action_error(e: &ActionError) {
    match e {
        ActionError::Invalid(errors) => {
            eprintln!("Please fix the following:");
            eprintln!("{}", render::form_errors(errors));
        }
        ActionError::Api(e) => report_api_error(e),
    }
}

async fn login(session: &SessionController, email: String, password: String) -> Result<bool> {
    let errors = validate_form(&[
        ("email", &email, validate_email),
        ("password", &password, require_password),
    ]);
    if !errors.is_empty() {
        report_action_error(&ActionError::Invalid(errors));
        return Ok(false);
    }

    match with_spinner("Signing in...", session.login(&email, &password)).await {
        Ok(user) => {
            println!("Welcome, {} ({})", user.display_name, user.role);
            print_landing(session);
            Ok(true)
        }
        Err(e) => {
            report_auth_error(&e);
            Ok(false)
        }
    }
}

async fn register(session: &SessionController, form: RegisterForm) -> Result<bool> {
    let req = match form.validate() {
        Ok(req) => req,
        Err(errors) => {
            report_action_error(&ActionError::Invalid(errors));
            return Ok(false);
        }
    };

    match with_spinner("Creating account...", session.register(&req)).await {
        Ok(user) => {
            println!("Account created. Signed in as {} ({})", user.email, user.role);
            print_landing(session);
            Ok(true)
        }
        Err(e) => {
            report_auth_error(&e);
            Ok(false)
        }
    }
}

async fn whoami(session: &SessionController, json_output: bool) -> Result<bool> {
    let user = session.current_user();
    let exp = match session.api().token().await {
        Some(token) => token_expiry(&token),
        None => None,
    };

    if json_output {
        let output = WhoamiOutput {
            logged_in: user.is_some(),
            email: user.as_ref().map(|u| u.email.clone()),
            name: user.as_ref().map(|u| u.display_name.clone()),
            role: user.as_ref().map(|u| u.role),
            jwt_expires_at: exp,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(true);
    }

    match user {
        Some(user) => {
            println!("{}", render::user_card(&user));
            if let Some(exp) = exp {
                let now = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .context("system clock is before UNIX epoch")?
                    .as_secs();
                if exp > now {
                    println!("Token expires in: {}s", exp - now);
                } else {
                    println!("Token expired. Run `{}` again.", Route::Login.command());
                }
            }
        }
        None => println!(
            "No active session found. Run `{}` first.",
            Route::Login.command()
        ),
    }
    Ok(true)
}

async fn list_instances(session: &SessionController) -> Result<bool> {
    let Some(user) = session.current_user() else {
        return Ok(false);
    };
    match with_spinner(
        "Loading instances...",
        pages::load_instances_page(session.api(), &user),
    )
    .await
    {
        Ok(InstancesPage::Admin(list)) => println!("{}", render::instances(&list)),
        Ok(InstancesPage::Student(list)) => println!("{}", render::student_instances(&list)),
        Err(e) => {
            report_api_error(&e);
            return Ok(false);
        }
    }
    Ok(true)
}

async fn create_instance(session: &SessionController, form: CreateInstanceForm) -> Result<bool> {
    let Some(owner) = session.current_user() else {
        return Ok(false);
    };
    match with_spinner(
        "Creating instance...",
        pages::create_instance(session.api(), &form, &owner),
    )
    .await
    {
        Ok(instance) => {
            println!("Instance created: {} ({})", instance.name, instance.id);
            Ok(true)
        }
        Err(e) => {
            report_action_error(&e);
            Ok(false)
        }
    }
}

async fn assign(
    session: &SessionController,
    student: Option<String>,
    instance: Option<String>,
) -> Result<bool> {
    let api = session.api();

    if student.is_none() && instance.is_none() {
        let page = with_spinner("Loading students and instances...", pages::load_assign_page(api)).await;
        println!("{}", render::assign_page(&page));
        return Ok(matches!(page, pages::AssignPage::Ready { .. }));
    }

    let form = AssignForm {
        student_id: student.unwrap_or_default(),
        instance_id: instance.unwrap_or_default(),
    };
    match with_spinner("Assigning instance...", pages::assign_instance(api, &form)).await {
        Ok(()) => {
            println!("Instance assigned");
            Ok(true)
        }
        Err(e) => {
            report_action_error(&e);
            Ok(false)
        }
    }
}

async fn query(
    session: &SessionController,
    instance: Option<String>,
    query: Option<String>,
) -> Result<bool> {
    let workspace = match with_spinner(
        "Loading your instances...",
        QueryWorkspace::load(session.api(), instance),
    )
    .await
    {
        Ok(ws) => ws,
        Err(e) => {
            report_api_error(&e);
            return Ok(false);
        }
    };

    let Some(query) = query else {
        println!("{}", render::workspace(&workspace));
        return Ok(true);
    };

    if !workspace.has_controls() {
        println!("{}", render::workspace(&workspace));
        return Ok(false);
    }

    match with_spinner("Running query...", workspace.execute(session.api(), &query)).await {
        Ok(view) => {
            println!("{}", render::query_view(&view));
            Ok(!view.is_error())
        }
        Err(e) => {
            report_action_error(&e);
            Ok(false)
        }
    }
}

async fn users(session: &SessionController) -> Result<bool> {
    match with_spinner("Loading users...", pages::load_user_overview(session.api())).await {
        Ok(rows) => {
            println!("{}", render::user_overview(&rows));
            Ok(true)
        }
        Err(e) => {
            report_api_error(&e);
            Ok(false)
        }
    }
}

async fn run(session: &SessionController, cmd: Commands) -> Result<bool> {
    match cmd {
        Commands::Login { email, password } => login(session, email, password).await,
        Commands::Register {
            name,
            email,
            password,
            admin,
        } => {
            let form = RegisterForm {
                user_name: name,
                email,
                password,
                role: admin.then_some(Role::Admin),
            };
            register(session, form).await
        }
        Commands::Logout => {
            session.logout().await.context("clear local credentials")?;
            println!("Logged out (local credentials removed).");
            Ok(true)
        }
        Commands::Whoami { json } => whoami(session, json).await,
        Commands::Instances(InstanceCommands::List) => list_instances(session).await,
        Commands::Instances(InstanceCommands::Create {
            name,
            engine,
            server,
            port,
            database,
            username,
            password,
        }) => {
            let engine = match engine.as_deref() {
                None => None,
                Some(raw) => match EngineType::parse(raw) {
                    Some(e) => Some(e),
                    None => {
                        eprintln!("Unknown engine: {}", raw);
                        return Ok(false);
                    }
                },
            };
            let form = CreateInstanceForm {
                name,
                engine,
                server,
                port,
                database_name: database,
                username,
                password,
            };
            create_instance(session, form).await
        }
        Commands::Instances(InstanceCommands::Assign { student, instance }) => {
            assign(session, student, instance).await
        }
        Commands::Query { instance, query: q } => query(session, instance, q).await,
        Commands::Users => users(session).await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    if std::env::var("RUST_LOG")
        .ok()
        .map(|value| value.to_lowercase().contains("debug"))
        .unwrap_or(false)
    {
        eprintln!("⚠️ Debug logging is enabled; bearer tokens may appear in logs. Proceed carefully.");
    }

    let cli = Cli::parse();

    if cli.version {
        println!("MultiDB CLI version {}", CLI_VERSION);
        return Ok(());
    }

    let cmd = match cli.cmd {
        Some(cmd) => cmd,
        None => {
            Cli::command().print_help().ok();
            println!();
            return Ok(());
        }
    };

    let config = ClientConfig::from_env();
    let store = build_store(&config).context("open credential store")?;
    let api = ApiClient::new(&config, store).context("create http client")?;
    let session = SessionController::new(api);

    let state = session.check_auth().await;
    let decision = match cmd.route() {
        Some(route) => guard::evaluate_route(&state, route),
        None => GuardDecision::Render,
    };

    match decision {
        GuardDecision::Render => {}
        GuardDecision::Redirect(Route::Login) => {
            eprintln!("Not signed in. Run `{}` first.", Route::Login.command());
            std::process::exit(1);
        }
        GuardDecision::Redirect(target) => {
            warn!(role = ?state.role(), "access denied");
            eprintln!(
                "Permission denied: this command is for administrators. Try `{}`.",
                target.command()
            );
            std::process::exit(1);
        }
        GuardDecision::Wait => {
            error!("session did not settle");
            std::process::exit(1);
        }
    }

    match run(&session, cmd).await {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

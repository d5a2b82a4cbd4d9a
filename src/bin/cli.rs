use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};

use course_registry::admin::{self, CourseForm};
use course_registry::client::HttpGateway;
use course_registry::config::Settings;
use course_registry::enrollment;
use course_registry::error::{AuthError, Error};
use course_registry::filter::{self, CourseFilter};
use course_registry::models::Role;
use course_registry::profile::{self, ProfileForm, SignupForm};
use course_registry::render::{self, Notification};
use course_registry::report::ReportTable;
use course_registry::session::SessionGate;
use course_registry::telemetry;

#[derive(Parser)]
#[command(name = "registry-cli")]
#[command(about = "CLI for the course registry", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, default_value = "http://localhost:11111")]
    url: String,

    /// Where the session is kept between invocations
    #[arg(long, default_value = ".registry_session")]
    token_file: PathBuf,
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    Student,
    Admin,
}

impl From<RoleArg> for Role {
    fn from(arg: RoleArg) -> Self {
        match arg {
            RoleArg::Student => Role::Student,
            RoleArg::Admin => Role::Admin,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    Signup {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
        #[arg(short, long, default_value = "")]
        confirm: String,
        #[arg(short, long, default_value = "")]
        name: String,
        #[arg(short, long, value_enum, default_value_t = RoleArg::Student)]
        role: RoleArg,
        #[arg(long, default_value = "")]
        student_id: String,
        #[arg(long, default_value = "")]
        department: String,
    },
    Login {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
    },
    Logout,
    Dashboard,
    Courses {
        #[arg(short, long)]
        department: Option<String>,
        #[arg(short, long)]
        level: Option<u32>,
        #[arg(short, long)]
        credits: Option<u32>,
        #[arg(short, long)]
        search: Option<String>,
    },
    Departments,
    MyCourses,
    Register {
        course_id: String,
    },
    Drop {
        course_id: String,
    },
    Profile {
        #[arg(long)]
        student_id: Option<String>,
        #[arg(long)]
        department: Option<String>,
    },
    Password {
        #[arg(long)]
        current: String,
        #[arg(long)]
        new: String,
        #[arg(long)]
        confirm: String,
    },
    Admin {
        #[command(subcommand)]
        action: AdminCommands,
    },
    Report {
        sql: String,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    List,
    Create {
        #[arg(long)]
        code: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        department: String,
        #[arg(long)]
        level: String,
        #[arg(long)]
        credits: String,
        #[arg(long)]
        capacity: String,
        #[arg(long, default_value = "")]
        instructor: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    Deactivate {
        course_id: String,
    },
}

/// An error plus what the user was doing when it happened.
struct Failure {
    context: &'static str,
    error: Error,
}

impl From<Error> for Failure {
    fn from(error: Error) -> Self {
        Self { context: "", error }
    }
}

fn during(context: &'static str) -> impl Fn(Error) -> Failure {
    move |error| Failure { context, error }
}

fn signed_in(gate: &SessionGate) -> Result<(), Error> {
    if gate.is_signed_in() {
        Ok(())
    } else {
        Err(AuthError::NotAuthenticated.into())
    }
}

fn print_table(table: &ReportTable) {
    println!("{}", table.columns.join("\t"));
    for row in &table.rows {
        println!("{}", row.join("\t"));
    }
}

/// Run one command. `Ok(Some(..))` is the message to show, `Ok(None)` means
/// a view was printed.
async fn execute(command: Commands, gate: &mut SessionGate, settings: &Settings) -> Result<Option<Notification>, Failure> {
    let ttl = settings.notification_ttl;
    let done = |message: &str| -> Result<Option<Notification>, Failure> { Ok(Some(Notification::success(message, ttl))) };
    match command {
        Commands::Signup {
            email,
            password,
            confirm,
            name,
            role,
            student_id,
            department,
        } => {
            let form = SignupForm {
                name,
                email,
                password,
                confirm,
                role: role.into(),
                student_id,
                department,
            };
            profile::sign_up(gate.gateway().as_ref(), &form, settings.profile_variant).await?;
            done("Account created successfully!")
        }
        Commands::Login { email, password } => {
            gate.sign_in(&email, &password).await?;
            done("Login successful!")
        }
        Commands::Logout => {
            let was_signed_in = gate.gateway().current_identity().is_some();
            gate.sign_out().await?;
            if was_signed_in {
                done("Logged out successfully")
            } else {
                Ok(Some(Notification::info("No active session", ttl)))
            }
        }
        Commands::Dashboard => {
            signed_in(gate)?;
            let app = gate.app();
            if let Some(profile) = &app.profile {
                print!("{}", render::dashboard(profile, &app.stats));
            }
            Ok(None)
        }
        Commands::Courses {
            department,
            level,
            credits,
            search,
        } => {
            signed_in(gate).map_err(during("Error loading courses: "))?;
            let criteria = CourseFilter {
                department,
                level,
                credits,
                search,
            };
            let courses = filter::filter(&gate.app().catalog, &criteria);
            print!("{}", render::course_list(&courses, gate.app()));
            Ok(None)
        }
        Commands::Departments => {
            signed_in(gate)?;
            print!("{}", render::department_options(&filter::departments(&gate.app().catalog)));
            Ok(None)
        }
        Commands::MyCourses => {
            signed_in(gate).map_err(during("Error loading registered courses: "))?;
            print!("{}", render::registered_courses(&gate.app().registered));
            Ok(None)
        }
        Commands::Register { course_id } => {
            enrollment::register(gate, &course_id)
                .await
                .map_err(during("Error registering for course: "))?;
            done("Successfully registered for course!")
        }
        Commands::Drop { course_id } => {
            enrollment::drop(gate, &course_id)
                .await
                .map_err(during("Error dropping course: "))?;
            done("Course dropped successfully!")
        }
        Commands::Profile {
            student_id: None,
            department: None,
        } => {
            signed_in(gate)?;
            if let Some(account) = &gate.app().profile {
                print!("{}", render::profile(account));
            }
            Ok(None)
        }
        Commands::Profile { student_id, department } => {
            signed_in(gate).map_err(during("Error updating profile: "))?;
            let current = gate.app().profile.clone();
            let form = ProfileForm {
                student_id: student_id
                    .or_else(|| current.as_ref().map(|p| p.student_id.clone()))
                    .unwrap_or_default(),
                department: department
                    .or_else(|| current.as_ref().map(|p| p.department.clone()))
                    .unwrap_or_default(),
            };
            profile::save_profile(gate, &form)
                .await
                .map_err(during("Error updating profile: "))?;
            done("Profile updated successfully!")
        }
        Commands::Password { current, new, confirm } => {
            profile::change_password(gate.gateway().as_ref(), &current, &new, &confirm)
                .await
                .map_err(during("Error changing password: "))?;
            done("Password updated successfully!")
        }
        Commands::Admin { action } => match action {
            AdminCommands::List => {
                let courses = admin::list_courses(gate).await?;
                print!("{}", render::admin_courses(&courses));
                Ok(None)
            }
            AdminCommands::Create {
                code,
                name,
                department,
                level,
                credits,
                capacity,
                instructor,
                description,
            } => {
                let form = CourseForm {
                    code,
                    name,
                    department,
                    level,
                    credits,
                    capacity,
                    instructor,
                    description,
                };
                let id = admin::create_course(gate, &form)
                    .await
                    .map_err(during("Error adding course: "))?;
                println!("course id: {id}");
                done("Course added successfully!")
            }
            AdminCommands::Deactivate { course_id } => {
                admin::deactivate_course(gate, &course_id).await?;
                done("Course deactivated")
            }
        },
        Commands::Report { sql } => {
            let table = gate.gateway().run_report(&sql).await?;
            if table.rows.is_empty() {
                return Ok(Some(Notification::info("Query returned no rows", ttl)));
            }
            print_table(&table);
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let settings = Settings::from_env();
    let _log_guard = telemetry::init(&settings, "warn", "registry-cli");
    let ttl = settings.notification_ttl;
    let gateway = Arc::new(HttpGateway::with_token_file(&cli.url, &cli.token_file));
    let mut gate = SessionGate::new(gateway);
    if let Err(e) = gate.start().await {
        tracing::warn!(error = %e, "saved session could not be resumed");
        if matches!(e, Error::Auth(_)) {
            gate.sign_out().await?;
        }
    }

    let note = match execute(cli.command, &mut gate, &settings).await {
        Ok(Some(note)) => note,
        Ok(None) => return Ok(()),
        Err(Failure { context, error }) => Notification::error(format!("{context}{error}"), ttl),
    };
    println!("{}", render::notification(&note));
    if note.kind == render::NotificationKind::Error {
        std::process::exit(1);
    }
    Ok(())
}

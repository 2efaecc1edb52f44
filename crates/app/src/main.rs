mod terminal;

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use portal_core::model::{CourseAccess, CourseId, UserDraft};
use portal_core::video::VideoSource;
use services::catalog_service::CourseFilter;
use services::seed::DEMO_ACCESS_KEY;
use services::{AccessDecision, AppServices, Clock, PortalConfig};

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingArgument { what: &'static str },
    UnknownArg(String),
    InvalidCourseId { raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingArgument { what } => write!(f, "missing {what}"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidCourseId { raw } => write!(f, "invalid course id: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- catalog        [--db <sqlite_url>]");
    eprintln!("  cargo run -p app -- course <id>    [--email <e> --password <p>]");
    eprintln!("  cargo run -p app -- exam <id>      [--email <e> --password <p>]");
    eprintln!("  cargo run -p app -- chat           [--email <e> --password <p>]");
    eprintln!("  cargo run -p app -- signup --name <n> --email <e> --password <p>");
    eprintln!("  cargo run -p app -- admin-courses  --email <e> --password <p>");
    eprintln!("  cargo run -p app -- seed           [--db <sqlite_url>]");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  PORTAL_DB_URL, PORTAL_AI_API_KEY, PORTAL_AI_BASE_URL, PORTAL_AI_MODEL,");
    eprintln!("  PORTAL_AUTOSAVE_MS, PORTAL_AI_QUESTION_COUNT, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Catalog,
    Course,
    Exam,
    Chat,
    Seed,
    Signup,
    AdminCourses,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "catalog" => Some(Self::Catalog),
            "course" => Some(Self::Course),
            "exam" => Some(Self::Exam),
            "chat" => Some(Self::Chat),
            "seed" => Some(Self::Seed),
            "signup" => Some(Self::Signup),
            "admin-courses" => Some(Self::AdminCourses),
            _ => None,
        }
    }

    fn takes_course(self) -> bool {
        matches!(self, Self::Course | Self::Exam)
    }
}

#[derive(Debug, Default)]
struct Args {
    course_id: Option<CourseId>,
    db_url: Option<String>,
    email: Option<String>,
    password: Option<String>,
    name: Option<String>,
}

impl Args {
    fn parse(command: Command, args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut parsed = Self::default();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    parsed.db_url = Some(value);
                }
                "--email" => parsed.email = Some(require_value(args, "--email")?),
                "--password" => parsed.password = Some(require_value(args, "--password")?),
                "--name" => parsed.name = Some(require_value(args, "--name")?),
                "--course" => {
                    let value = require_value(args, "--course")?;
                    parsed.course_id = Some(parse_course_id(value)?);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                raw if command.takes_course()
                    && parsed.course_id.is_none()
                    && !raw.starts_with("--") =>
                {
                    parsed.course_id = Some(parse_course_id(arg)?);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }
        if command.takes_course() && parsed.course_id.is_none() {
            return Err(ArgsError::MissingArgument { what: "course id" });
        }
        Ok(parsed)
    }

    fn credentials(&self) -> Option<(&str, &str)> {
        Some((self.email.as_deref()?, self.password.as_deref()?))
    }
}

fn parse_course_id(raw: String) -> Result<CourseId, ArgsError> {
    raw.trim()
        .parse()
        .map_err(|_| ArgsError::InvalidCourseId { raw })
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") || raw.contains("mode=memory") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" || db_url.contains("mode=memory") {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "app=info,services=info,storage=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);
    let command = match argv.next() {
        None => {
            print_usage();
            return Ok(());
        }
        Some(first) if first == "--help" || first == "-h" => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(&first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            ArgsError::UnknownArg(first.clone())
        })?,
    };
    let args = Args::parse(command, &mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let mut config = PortalConfig::from_env()?;
    if let Some(db_url) = args.db_url.clone() {
        config.db_url = db_url;
    }
    config.db_url = normalize_sqlite_url(config.db_url);
    prepare_sqlite_file(&config.db_url)?;
    let app = AppServices::new_sqlite(&config, Clock::default()).await?;
    info!(db_url = %config.db_url, ai = app.ai_enabled().await, "portal ready");

    if command != Command::Signup {
        if let Some((email, password)) = args.credentials() {
            app.auth().log_in(email, password).await?;
        }
    }

    match command {
        Command::Catalog => print_catalog(&app).await,
        Command::Course => print_course(&app, required_course(&args)?).await?,
        Command::Exam => terminal::run_exam(&app, required_course(&args)?).await?,
        Command::Chat => terminal::run_chat(&app).await?,
        Command::Seed => print_seed_summary(&app).await,
        Command::Signup => sign_up(&app, &args).await?,
        Command::AdminCourses => print_admin_courses(&app).await?,
    }
    Ok(())
}

fn required_course(args: &Args) -> Result<CourseId, ArgsError> {
    args.course_id
        .ok_or(ArgsError::MissingArgument { what: "course id" })
}

// ─── COMMANDS ──────────────────────────────────────────────────────────────────

async fn print_catalog(app: &AppServices) {
    let catalog = app.catalog();
    for banner in catalog.active_banners().await {
        println!("** {} **", banner.title);
    }
    let categories = catalog.categories().await;
    if !categories.is_empty() {
        println!("Categories: {}", categories.join(", "));
    }
    println!();
    for course in catalog.list_courses(&CourseFilter::default()).await {
        let lock = if course.unlocked { "open  " } else { "locked" };
        let exam = if course.has_question_bank { "  [exam]" } else { "" };
        println!(
            "{lock} {:>3}  {:<32} {:<12} {:>3} lectures  {}{exam}",
            course.id,
            course.title,
            course.category.as_deref().unwrap_or("-"),
            course.lecture_count,
            access_label(&course.access, course.price_cents),
        );
    }
}

async fn print_course(app: &AppServices, course_id: CourseId) -> Result<(), Box<dyn std::error::Error>> {
    let detail = app.catalog().course_detail(course_id).await?;
    let course = &detail.course;
    println!("{} ({})", course.title, access_label(&course.access, course.price_cents));
    if !course.description.is_empty() {
        println!("{}", course.description);
    }
    println!(
        "Access: {}   Progress: {}/{} lectures",
        decision_label(detail.access),
        detail.completed_lectures,
        detail.lecture_count
    );
    for subject in &course.subjects {
        println!("\n{}", subject.title);
        for chapter in &subject.chapters {
            println!("  {}", chapter.title);
            for lecture in &chapter.lectures {
                let provider = VideoSource::classify(&lecture.video_url)
                    .map_or("unplayable", |source| source.provider());
                println!("    [{}] {} ({provider})", lecture.id, lecture.title);
            }
        }
    }
    if course.has_question_bank() {
        println!("\nPractice exam: cargo run -p app -- exam {}", course.id);
    }
    Ok(())
}

async fn print_seed_summary(app: &AppServices) {
    let store = app.store();
    println!(
        "catalog: {} courses, {} banners",
        store.courses().await.len(),
        store.banners().await.len()
    );
    println!("demo access key for paid courses: {DEMO_ACCESS_KEY}");
}

async fn sign_up(app: &AppServices, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let (email, password) = args
        .credentials()
        .ok_or(ArgsError::MissingArgument {
            what: "--email and --password",
        })?;
    let user = app
        .auth()
        .sign_up(UserDraft {
            name: args.name.clone().unwrap_or_else(|| "Learner".into()),
            email: email.into(),
            password: password.into(),
        })
        .await?;
    println!("signed up {} <{}> as {:?}", user.name, user.email, user.role);
    Ok(())
}

async fn print_admin_courses(app: &AppServices) -> Result<(), Box<dyn std::error::Error>> {
    let users = app.admin().list_users().await?;
    let orders = app.admin().list_orders().await?;
    let filter = CourseFilter {
        include_unpublished: true,
        ..CourseFilter::default()
    };
    println!("{} users, {} orders\n", users.len(), orders.len());
    for summary in app.catalog().list_courses(&filter).await {
        let Some(course) = app.store().course(summary.id).await else {
            continue;
        };
        println!(
            "{:>3}  {:<32} {:<9} {:>3} lectures {:>3} questions  {}",
            course.id,
            course.title,
            if course.published { "published" } else { "draft" },
            summary.lecture_count,
            course.question_bank.len(),
            access_label(&course.access, course.price_cents),
        );
    }
    Ok(())
}

fn access_label(access: &CourseAccess, price_cents: u32) -> String {
    match access {
        CourseAccess::Free => "free".into(),
        CourseAccess::Paid { .. } => {
            format!("${}.{:02}", price_cents / 100, price_cents % 100)
        }
        CourseAccess::Sponsored => "sponsored".into(),
    }
}

fn decision_label(decision: AccessDecision) -> String {
    match decision {
        AccessDecision::Free => "free".into(),
        AccessDecision::Admin => "admin".into(),
        AccessDecision::Purchased => "purchased".into(),
        AccessDecision::KeyUnlocked => "unlocked with key".into(),
        AccessDecision::TempAccess { expires_at } => {
            format!("temporary until {}", expires_at.format("%Y-%m-%d %H:%M UTC"))
        }
        AccessDecision::Locked => "locked".into(),
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use campus::config::{ClientConfig, ConfigError};
use campus::net::types::{Day, GeneratedPage, LectureId, LectureQuery, PageRequest, Period, Slot, UserId};
use campus::net::{ApiClient, ApiError, TimetableApi};
use campus::render::{lecture_line, render_grid};
use campus::state::chat::{ChatConsumer, ChatView, Outcome};
use campus::state::timetable::{GridView, TimetableViewModel};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::Level;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("prompt is empty")]
    EmptyPrompt,
    #[error("not signed in; pass --session-cookie or set CAMPUS_SESSION_COOKIE")]
    NotSignedIn,
    #[error("no user selected")]
    NoUser,
    #[error("timetable unavailable")]
    TimetableUnavailable,
    #[error("lecture {lecture} is not offered in {slot}")]
    NotOffered { slot: Slot, lecture: LectureId },
    #[error("{0} is empty")]
    EmptySlot(Slot),
    #[error("{action} in {slot} was not applied; see log")]
    NotApplied { action: &'static str, slot: Slot },
    #[error("chat reply failed")]
    ChatFailed,
}

#[derive(Parser, Debug)]
#[command(name = "campus", about = "Campus timetable and assistant chat client")]
struct Cli {
    #[arg(long, env = "CAMPUS_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "CAMPUS_SESSION_COOKIE", hide_env_values = true)]
    session_cookie: Option<String>,

    /// Log request-level detail to stderr.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List users for the picker.
    Users,
    /// Show the user bound to the session cookie.
    Me,
    /// Session check plus login/logout URLs.
    Auth {
        #[arg(long, default_value = "/")]
        redirect: String,
    },
    Timetable(TimetableCommand),
    /// Search the lecture directory.
    Lectures(LectureArgs),
    /// Print the syllabus HTML for a course code.
    Syllabus { code: String },
    /// Ask the assistant; reads questions from stdin when none is given.
    Chat { question: Option<String> },
    /// Generate an HTML page from a prompt, or revise one with --from.
    Page {
        prompt: String,
        /// Page JSON from an earlier run to revise.
        #[arg(long)]
        from: Option<PathBuf>,
        /// Write the page JSON here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct TimetableCommand {
    #[command(subcommand)]
    command: TimetableSubcommand,
}

#[derive(Args, Debug, Clone, Copy)]
struct SlotArgs {
    /// 1-5, 月-金 or mon-fri.
    #[arg(long)]
    day: Day,
    /// 1-6.
    #[arg(long)]
    period: Period,
}

impl SlotArgs {
    fn slot(self) -> Slot {
        Slot::new(self.day, self.period)
    }
}

#[derive(Subcommand, Debug)]
enum TimetableSubcommand {
    /// Render a user's grid; defaults to the signed-in user.
    Show {
        #[arg(long)]
        user: Option<UserId>,
    },
    /// Lectures that can be placed in a slot.
    Candidates {
        #[command(flatten)]
        slot: SlotArgs,
        /// Substring of lecture name or lecturer.
        #[arg(long, default_value = "")]
        query: String,
    },
    Add {
        #[command(flatten)]
        slot: SlotArgs,
        #[arg(long)]
        lecture: LectureId,
    },
    Remove {
        #[command(flatten)]
        slot: SlotArgs,
    },
}

#[derive(Args, Debug)]
struct LectureArgs {
    /// Free-text match across every field.
    keyword: Option<String>,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    code: Option<String>,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    lecturer: Option<String>,
    #[arg(long)]
    grade: Option<String>,
    #[arg(long)]
    class_name: Option<String>,
    #[arg(long)]
    season: Option<String>,
    #[arg(long)]
    time: Option<String>,
}

impl From<LectureArgs> for LectureQuery {
    fn from(args: LectureArgs) -> Self {
        Self {
            title: args.title,
            category: args.category,
            code: args.code,
            name: args.name,
            lecturer: args.lecturer,
            grade: args.grade,
            class_name: args.class_name,
            season: args.season,
            time: args.time,
            keyword: args.keyword,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::WARN })
        .init();

    let mut config = ClientConfig::from_env()?;
    if let Some(base_url) = &cli.base_url {
        config.base_url = ClientConfig::new(base_url)?.base_url;
    }
    if let Some(cookie) = cli.session_cookie {
        config = config.with_session_cookie(cookie);
    }
    let client = ApiClient::new(&config)?;

    match cli.command {
        Command::Users => run_users(&client).await,
        Command::Me => run_me(&client).await,
        Command::Auth { redirect } => run_auth(&client, &redirect).await,
        Command::Timetable(timetable) => run_timetable(client, timetable).await,
        Command::Lectures(args) => run_lectures(&client, args.into()).await,
        Command::Syllabus { code } => {
            println!("{}", client.syllabus_html(&code).await?);
            Ok(())
        }
        Command::Chat { question } => {
            let idle = Duration::from_secs(config.timeouts.stream_idle_secs);
            run_chat(ChatConsumer::new(Arc::new(client), idle), question).await
        }
        Command::Page { prompt, from, out } => run_page(&client, &prompt, from, out).await,
    }
}

async fn run_users(client: &ApiClient) -> Result<(), CliError> {
    for user in client.list_users().await? {
        println!("{:>6}  {}", user.id.0, user.name);
    }
    Ok(())
}

async fn run_me(client: &ApiClient) -> Result<(), CliError> {
    let user = client.current_user().await?.ok_or(CliError::NotSignedIn)?;
    println!("{:>6}  {}", user.id.0, user.name);
    Ok(())
}

async fn run_auth(client: &ApiClient, redirect: &str) -> Result<(), CliError> {
    let status = client.auth_status().await?;
    match status.user {
        Some(user) if status.authenticated => println!("signed in as {} <{}> (id {})", user.username, user.email, user.id),
        _ => println!("not signed in"),
    }
    println!("login:  {}", client.login_url(redirect)?);
    println!("logout: {}", client.logout_url()?);
    Ok(())
}

async fn run_lectures(client: &ApiClient, query: LectureQuery) -> Result<(), CliError> {
    for lecture in client.search_lectures(&query).await? {
        println!("{}", lecture_line(&lecture));
    }
    Ok(())
}

async fn run_page(client: &ApiClient, prompt: &str, from: Option<PathBuf>, out: Option<PathBuf>) -> Result<(), CliError> {
    if prompt.trim().is_empty() {
        return Err(CliError::EmptyPrompt);
    }
    let request = match from {
        Some(path) => {
            let current: GeneratedPage = serde_json::from_str(&std::fs::read_to_string(path)?)?;
            PageRequest::revise(&current, prompt)
        }
        None => PageRequest::new(prompt),
    };
    let page = match client.generate_page(&request).await {
        Err(e) if e.is_unauthorized() => return Err(CliError::NotSignedIn),
        other => other?,
    };
    let json = serde_json::to_string_pretty(&page)?;
    match out {
        Some(path) => {
            std::fs::write(&path, json)?;
            eprintln!("wrote {} to {}", page.title, path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

// =============================================================================
// TIMETABLE
// =============================================================================

async fn run_timetable(client: ApiClient, timetable: TimetableCommand) -> Result<(), CliError> {
    let mut vm = TimetableViewModel::new(Arc::new(client));
    vm.initialize().await;

    match timetable.command {
        TimetableSubcommand::Show { user } => {
            if user.is_some() {
                vm.select_user(user).await;
            }
            print_grid(&vm)
        }
        TimetableSubcommand::Candidates { slot, query } => {
            vm.open_add_dialog(slot.slot()).await;
            vm.set_query(query).await;
            if let Some(dialog) = vm.state().add_dialog() {
                for lecture in dialog.visible() {
                    println!("{}", lecture_line(lecture));
                }
            }
            Ok(())
        }
        TimetableSubcommand::Add { slot, lecture } => {
            let slot = slot.slot();
            require_editable(&vm)?;
            vm.open_add_dialog(slot).await;
            vm.choose_lecture(lecture).await;
            if vm.state().add_dialog().and_then(|d| d.chosen).is_none() {
                return Err(CliError::NotOffered { slot, lecture });
            }
            vm.confirm_add().await;
            let placed = cell_lecture(&vm, slot) == Some(lecture);
            print_grid(&vm)?;
            if placed { Ok(()) } else { Err(CliError::NotApplied { action: "add", slot }) }
        }
        TimetableSubcommand::Remove { slot } => {
            let slot = slot.slot();
            require_editable(&vm)?;
            vm.request_remove(slot).await;
            let Some(dialog) = vm.state().remove_dialog() else {
                return Err(CliError::EmptySlot(slot));
            };
            eprintln!(
                "removing {} / {} from {}",
                dialog.lecture.display_name(),
                dialog.lecture.lecturer_name(),
                dialog.slot
            );
            vm.confirm_remove().await;
            let removed = cell_lecture(&vm, slot).is_none();
            print_grid(&vm)?;
            if removed { Ok(()) } else { Err(CliError::NotApplied { action: "remove", slot }) }
        }
    }
}

fn require_editable(vm: &TimetableViewModel) -> Result<(), CliError> {
    if vm.state().can_edit() { Ok(()) } else { Err(CliError::NotSignedIn) }
}

fn cell_lecture(vm: &TimetableViewModel, slot: Slot) -> Option<LectureId> {
    vm.state().grid().snapshot()?.cell(slot).map(|l| l.id)
}

fn print_grid(vm: &TimetableViewModel) -> Result<(), CliError> {
    match vm.state().grid() {
        GridView::Loaded(snapshot) => {
            println!("user {}", snapshot.user_id());
            print!("{}", render_grid(snapshot));
            Ok(())
        }
        GridView::Unavailable => Err(CliError::TimetableUnavailable),
        GridView::NotLoaded => Err(CliError::NoUser),
    }
}

// =============================================================================
// CHAT
// =============================================================================

/// Writes reply deltas straight to stdout.
struct TerminalView;

impl ChatView for TerminalView {
    fn pending_changed(&mut self, pending: bool) {
        if pending {
            eprint!("...");
        }
    }

    fn assistant_updated(&mut self, _content: &str, delta: &str) {
        print!("{delta}");
        let _ = std::io::stdout().flush();
    }

    fn reply_failed(&mut self, placeholder: &str) {
        print!("\n{placeholder}");
    }

    fn scroll_to_latest(&mut self) {
        println!();
    }
}

async fn run_chat(mut chat: ChatConsumer, question: Option<String>) -> Result<(), CliError> {
    if let Some(question) = question {
        return match chat.submit(&question, &mut TerminalView).await {
            Some(Outcome::Error) => Err(CliError::ChatFailed),
            Some(Outcome::Success) | None => Ok(()),
        };
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprint!("> ");
    while let Some(line) = lines.next_line().await? {
        chat.submit(&line, &mut TerminalView).await;
        eprint!("> ");
    }
    Ok(())
}

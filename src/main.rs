mod api;
mod config;
mod driver;
mod output;
mod session;
mod web;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Args, Parser, Subcommand};
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::api::{ApiClient, Message, Textpad};
use crate::config::{
    CredentialsSection, FileConfig, WebDriverSection, DEFAULT_BROWSER, DEFAULT_CONFIG_PATH,
    DEFAULT_WEBDRIVER_PORT,
};
use crate::driver::WebDriver;
use crate::output::Output;
use crate::session::SessionStore;
use crate::web::Recipient;

#[derive(Parser)]
#[command(
    name = "acroplia",
    version,
    about = "A command line client for Acroplia",
    after_help = "Examples:\n  acroplia login api --email you@example.com --password secret\n  acroplia login web --email you@example.com --password secret --browser chrome\n  acroplia message api --chat-uuid 7d9f... --text \"hello\"\n  acroplia message web --email you@example.com --password secret --fullname \"Grace Hopper\" --text \"hello\"\n  acroplia textpad api --title \"Meeting notes\""
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(
        long,
        short = 'c',
        global = true,
        value_name = "PATH",
        help = "Config file (TOML); flags win over it"
    )]
    config: Option<PathBuf>,

    #[arg(long, short = 'd', global = true, help = "Print debug info")]
    debug: bool,

    #[arg(
        long,
        short = 'l',
        global = true,
        value_name = "PATH",
        help = "Write logs to a file instead of stderr"
    )]
    log: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Log in to Acroplia")]
    Login {
        #[command(subcommand)]
        command: LoginCommand,
    },
    #[command(about = "Send a chat message to an Acroplia user")]
    Message {
        #[command(subcommand)]
        command: MessageCommand,
    },
    #[command(about = "Create a textpad in your Acroplia library")]
    Textpad {
        #[command(subcommand)]
        command: TextpadCommand,
    },
}

#[derive(Subcommand)]
enum LoginCommand {
    #[command(about = "Log in through the REST API and save the session")]
    Api(LoginApiArgs),
    #[command(about = "Log in through the web UI in a driven browser")]
    Web(LoginWebArgs),
}

#[derive(Subcommand)]
enum MessageCommand {
    #[command(about = "Send a message through the REST API (requires a saved login)")]
    Api(MessageApiArgs),
    #[command(about = "Send a message by driving the web UI")]
    Web(MessageWebArgs),
}

#[derive(Subcommand)]
enum TextpadCommand {
    #[command(about = "Create a textpad through the REST API (requires a saved login)")]
    Api(TextpadApiArgs),
    #[command(about = "Create a textpad by driving the web UI")]
    Web(TextpadWebArgs),
}

#[derive(Args, Clone)]
struct CredentialArgs {
    #[arg(long, help = "Email for login")]
    email: Option<String>,

    #[arg(long, help = "Phone for login")]
    phone: Option<String>,

    #[arg(long, help = "Username for login (API transport only)")]
    username: Option<String>,

    #[arg(long, help = "Password for login")]
    password: Option<String>,
}

#[derive(Args, Clone)]
struct BrowserArgs {
    #[arg(
        long,
        value_name = "PORT",
        help = "Port the WebDriver server listens on"
    )]
    webdriver_port: Option<u16>,

    #[arg(long, value_name = "NAME", help = "Browser to drive: firefox or chrome")]
    browser: Option<String>,

    #[arg(
        long = "browser-option",
        value_name = "ARG",
        action = ArgAction::Append,
        help = "Extra browser launch option (repeatable)"
    )]
    browser_options: Vec<String>,
}

#[derive(Args)]
struct LoginApiArgs {
    #[command(flatten)]
    credentials: CredentialArgs,

    #[arg(
        long,
        short = 'o',
        value_name = "PATH",
        help = "Write the login response to a file instead of stdout"
    )]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct LoginWebArgs {
    #[command(flatten)]
    credentials: CredentialArgs,

    #[command(flatten)]
    browser: BrowserArgs,
}

#[derive(Args)]
struct MessageApiArgs {
    #[arg(long, value_name = "UUID", help = "Chat to post the message into")]
    chat_uuid: Option<String>,

    #[arg(long, help = "Message text")]
    text: Option<String>,

    #[arg(long, short = 'o', value_name = "PATH", help = "Write the response to a file")]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct MessageWebArgs {
    #[command(flatten)]
    credentials: CredentialArgs,

    #[command(flatten)]
    browser: BrowserArgs,

    #[arg(long, help = "Recipient's full display name")]
    fullname: Option<String>,

    #[arg(long = "to-username", help = "Recipient's username (without @)")]
    to_username: Option<String>,

    #[arg(long, help = "Message text")]
    text: Option<String>,
}

#[derive(Args)]
struct TextpadApiArgs {
    #[arg(long, help = "Textpad title")]
    title: Option<String>,

    #[arg(long, help = "Textpad subtitle")]
    subtitle: Option<String>,

    #[arg(long, short = 'o', value_name = "PATH", help = "Write the response to a file")]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct TextpadWebArgs {
    #[command(flatten)]
    credentials: CredentialArgs,

    #[command(flatten)]
    browser: BrowserArgs,

    #[arg(long, help = "Textpad title")]
    title: Option<String>,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("you have to specify one of login methods: email, phone or username")]
    MissingIdentifier,
    #[error("specify only one of email, phone or username")]
    AmbiguousIdentifier,
    #[error("password is required for login")]
    MissingPassword,
    #[error("web login supports email or phone only")]
    UsernameOnWeb,
    #[error("fullname or username of the receiver is required")]
    MissingRecipient,
    #[error("chat uuid is required to send a message")]
    MissingChatUuid,
    #[error("message text can't be empty")]
    MissingText,
    #[error("textpad title can't be empty")]
    MissingTitle,
    #[error("no saved login session, run `acroplia login api` first")]
    MissingSession,
}

#[derive(Debug, Clone)]
enum Identifier {
    Email(String),
    Phone(String),
    Username(String),
}

type CommandResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("{error}");
        std::process::exit(1);
    }
}

async fn run() -> CommandResult {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let file = FileConfig::load(&config_path)?;
    init_logging(
        cli.debug || file.misc.debug,
        cli.log.as_ref().or(file.misc.log.as_ref()),
    )?;

    let api = ApiClient::new(config::api_base_url())?;
    let store = SessionStore::new(config::session_path());

    match cli.command {
        Command::Login { command } => match command {
            LoginCommand::Api(args) => handle_login_api(args, &file, &api, &store).await,
            LoginCommand::Web(args) => handle_login_web(args, &file, &api).await,
        },
        Command::Message { command } => match command {
            MessageCommand::Api(args) => handle_message_api(args, &file, &api, &store).await,
            MessageCommand::Web(args) => handle_message_web(args, &file, &api).await,
        },
        Command::Textpad { command } => match command {
            TextpadCommand::Api(args) => handle_textpad_api(args, &file, &api, &store).await,
            TextpadCommand::Web(args) => handle_textpad_web(args, &file, &api).await,
        },
    }
}

async fn handle_login_api(
    args: LoginApiArgs,
    file: &FileConfig,
    api: &ApiClient,
    store: &SessionStore,
) -> CommandResult {
    let (identifier, password) = resolve_credentials(&args.credentials, &file.credentials, true)?;
    let output = Output::new(args.output.or_else(|| file.misc.output.clone()));
    spawn_interrupt_handler(None);
    api.check_reachable(&config::login_url()).await?;

    debug!("performing a login");
    let session = match &identifier {
        Identifier::Email(email) => api.login_by_email(email, &password).await?,
        Identifier::Phone(phone) => api.login_by_phone(phone, &password).await?,
        Identifier::Username(username) => api.login_by_username(username, &password).await?,
    };
    debug!("login was done successfully");

    store.store(&session)?;
    output.write_json(&session)?;
    Ok(())
}

async fn handle_login_web(args: LoginWebArgs, file: &FileConfig, api: &ApiClient) -> CommandResult {
    let (identifier, password) = resolve_credentials(&args.credentials, &file.credentials, false)?;
    api.check_reachable(&config::login_url()).await?;

    let browser = open_browser(&args.browser, &file.webdriver).await?;
    spawn_interrupt_handler(Some(browser.clone()));

    debug!("performing a login");
    let result = web_login(&browser, &identifier, &password).await;
    let _ = browser.quit().await;
    result?;
    println!("Logged in.");
    Ok(())
}

async fn handle_message_api(
    args: MessageApiArgs,
    file: &FileConfig,
    api: &ApiClient,
    store: &SessionStore,
) -> CommandResult {
    let chat_uuid = args
        .chat_uuid
        .or_else(|| file.message.chat_uuid.clone())
        .filter(|value| !value.is_empty())
        .ok_or(CliError::MissingChatUuid)?;
    let text = args
        .text
        .or_else(|| file.message.text.clone())
        .filter(|value| !value.is_empty())
        .ok_or(CliError::MissingText)?;
    let output = Output::new(args.output.or_else(|| file.misc.output.clone()));
    let session = store.load()?.ok_or(CliError::MissingSession)?;
    spawn_interrupt_handler(None);
    api.check_reachable(&config::login_url()).await?;

    debug!("sending message");
    let message = Message::new(text, &session.user);
    let sent = api
        .send_message(&message, &chat_uuid, &session.access_token)
        .await?;
    debug!("sending message was done successfully");

    output.write_json(&sent)?;
    Ok(())
}

async fn handle_message_web(
    args: MessageWebArgs,
    file: &FileConfig,
    api: &ApiClient,
) -> CommandResult {
    let (identifier, password) = resolve_credentials(&args.credentials, &file.credentials, false)?;
    let fullname = args
        .fullname
        .or_else(|| file.message.fullname.clone())
        .unwrap_or_default();
    let username = args
        .to_username
        .or_else(|| file.message.username.clone())
        .unwrap_or_default();
    let recipient = Recipient::new(&fullname, &username).ok_or(CliError::MissingRecipient)?;
    let text = args
        .text
        .or_else(|| file.message.text.clone())
        .filter(|value| !value.is_empty())
        .ok_or(CliError::MissingText)?;
    api.check_reachable(&config::login_url()).await?;

    let browser = open_browser(&args.browser, &file.webdriver).await?;
    spawn_interrupt_handler(Some(browser.clone()));

    let result: CommandResult = async {
        debug!("performing a login");
        web_login(&browser, &identifier, &password).await?;
        debug!("sending message");
        web::send_message(&browser, &recipient, &text).await?;
        Ok(())
    }
    .await;
    let _ = browser.quit().await;
    result?;
    println!("Message sent.");
    Ok(())
}

async fn handle_textpad_api(
    args: TextpadApiArgs,
    file: &FileConfig,
    api: &ApiClient,
    store: &SessionStore,
) -> CommandResult {
    let title = args
        .title
        .or_else(|| file.textpad.title.clone())
        .filter(|value| !value.trim().is_empty())
        .ok_or(CliError::MissingTitle)?;
    let subtitle = args
        .subtitle
        .or_else(|| file.textpad.subtitle.clone())
        .unwrap_or_default();
    let output = Output::new(args.output.or_else(|| file.misc.output.clone()));
    let session = store.load()?.ok_or(CliError::MissingSession)?;
    spawn_interrupt_handler(None);
    api.check_reachable(&config::login_url()).await?;

    debug!(%title, "creating a textpad");
    let textpad = Textpad::new(title, subtitle, &session.user);
    let created = api.create_textpad(&textpad, &session.access_token).await?;
    debug!("creating a textpad was done successfully");

    output.write_json(&created)?;
    Ok(())
}

async fn handle_textpad_web(
    args: TextpadWebArgs,
    file: &FileConfig,
    api: &ApiClient,
) -> CommandResult {
    let (identifier, password) = resolve_credentials(&args.credentials, &file.credentials, false)?;
    let title = args
        .title
        .or_else(|| file.textpad.title.clone())
        .filter(|value| !value.trim().is_empty())
        .ok_or(CliError::MissingTitle)?;
    api.check_reachable(&config::login_url()).await?;

    let browser = open_browser(&args.browser, &file.webdriver).await?;
    spawn_interrupt_handler(Some(browser.clone()));

    let result: CommandResult = async {
        debug!("performing a login");
        web_login(&browser, &identifier, &password).await?;
        debug!(%title, "creating a textpad");
        web::create_textpad(&browser, &title).await?;
        Ok(())
    }
    .await;
    let _ = browser.quit().await;
    result?;
    println!("Textpad created.");
    Ok(())
}

/// Resolves the identifier/password pair: flag wins over config file, and
/// exactly one identifier must come out of it.
fn resolve_credentials(
    args: &CredentialArgs,
    section: &CredentialsSection,
    allow_username: bool,
) -> Result<(Identifier, String), CliError> {
    let email = args
        .email
        .clone()
        .or_else(|| section.email.clone())
        .filter(|value| !value.is_empty());
    let phone = args
        .phone
        .clone()
        .or_else(|| section.phone.clone())
        .filter(|value| !value.is_empty());
    let username = args
        .username
        .clone()
        .or_else(|| section.username.clone())
        .filter(|value| !value.is_empty());

    let mut identifiers = Vec::new();
    if let Some(email) = email {
        identifiers.push(Identifier::Email(email));
    }
    if let Some(phone) = phone {
        identifiers.push(Identifier::Phone(phone));
    }
    if let Some(username) = username {
        identifiers.push(Identifier::Username(username));
    }

    let identifier = match identifiers.len() {
        0 => return Err(CliError::MissingIdentifier),
        1 => identifiers.remove(0),
        _ => return Err(CliError::AmbiguousIdentifier),
    };
    if !allow_username && matches!(identifier, Identifier::Username(_)) {
        return Err(CliError::UsernameOnWeb);
    }

    let password = args
        .password
        .clone()
        .or_else(|| section.password.clone())
        .filter(|value| !value.is_empty())
        .ok_or(CliError::MissingPassword)?;

    Ok((identifier, password))
}

async fn open_browser(
    args: &BrowserArgs,
    section: &WebDriverSection,
) -> Result<WebDriver, Box<dyn std::error::Error>> {
    let port = args
        .webdriver_port
        .or(section.port)
        .unwrap_or(DEFAULT_WEBDRIVER_PORT);
    let browser = args
        .browser
        .clone()
        .or_else(|| section.browser.clone())
        .unwrap_or_else(|| DEFAULT_BROWSER.to_string());
    let options = if args.browser_options.is_empty() {
        section.options.clone()
    } else {
        args.browser_options.clone()
    };

    debug!(port, %browser, "opening browser session");
    let driver = WebDriver::new(port, &browser, &options).await?;
    debug!(%browser, "browser session opened successfully");
    Ok(driver)
}

async fn web_login(browser: &WebDriver, identifier: &Identifier, password: &str) -> CommandResult {
    match identifier {
        Identifier::Email(email) => web::login_by_email(browser, email, password).await?,
        Identifier::Phone(phone) => web::login_by_phone(browser, phone, password).await?,
        // unreachable in practice, resolve_credentials rejects it for web
        Identifier::Username(_) => return Err(CliError::UsernameOnWeb.into()),
    }
    Ok(())
}

/// One task per invocation: on interrupt, close the browser session (if any)
/// and terminate.
fn spawn_interrupt_handler(browser: Option<WebDriver>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupt received, cleaning up open resources");
            if let Some(browser) = browser {
                let _ = browser.quit().await;
            }
            std::process::exit(130);
        }
    });
}

fn init_logging(debug: bool, log_path: Option<&PathBuf>) -> CommandResult {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    match log_path {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            builder.with_ansi(false).with_writer(Arc::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

//! CLI entry and dispatch.
//!
//! One invocation is one client process: the session is bootstrapped from the
//! persisted token before any command runs.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use crate::commands::{self, LoginForm, NewsChanges, RegisterForm};
use crate::config::Config;
use crate::guard::Access;
use crate::news::{self, NewsDraft, NewsFilter};
use crate::session::SessionPhase;
use crate::AppState;

#[derive(Parser)]
#[command(name = "newsdesk")]
#[command(version)]
#[command(about = "Read and publish news on a Newsdesk server")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// API base URL
    #[arg(long, global = true, env = "NEWSDESK_API_URL")]
    api_url: Option<String>,

    /// Directory for the persisted token and logs
    #[arg(long, global = true, env = "NEWSDESK_DATA_DIR", value_name = "DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and remember the session for 7 days
    Login {
        #[arg(short, long)]
        email: String,
        #[arg(short, long, env = "NEWSDESK_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account
    Register {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
        #[arg(long)]
        confirm_password: String,
    },
    /// Forget the persisted session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Read and manage articles
    News {
        #[command(subcommand)]
        command: NewsCommands,
    },
    /// Check whether an application path would open
    Open {
        /// Path such as /news/create
        path: String,
    },
}

#[derive(Subcommand)]
enum NewsCommands {
    /// List articles
    List {
        /// Case-insensitive title search
        #[arg(long, default_value = "")]
        title: String,
        /// Exact author email
        #[arg(long, default_value = "")]
        author: String,
    },
    /// Show one article
    Show {
        id: String,
        /// Print rendered HTML instead of text
        #[arg(long)]
        html: bool,
    },
    /// Publish a new article
    Create {
        #[arg(long)]
        title: String,
        #[command(flatten)]
        body: BodyArgs,
        #[arg(long = "image", value_name = "PATH")]
        images: Vec<PathBuf>,
        #[arg(long = "file", value_name = "PATH")]
        files: Vec<PathBuf>,
    },
    /// Edit one of your articles
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[command(flatten)]
        body: BodyArgs,
        #[arg(long = "image", value_name = "PATH")]
        images: Vec<PathBuf>,
        #[arg(long = "file", value_name = "PATH")]
        files: Vec<PathBuf>,
        /// Drop an attached image by position (0-based)
        #[arg(long = "remove-image", value_name = "INDEX")]
        remove_images: Vec<usize>,
        /// Drop an attached file by position (0-based)
        #[arg(long = "remove-file", value_name = "INDEX")]
        remove_files: Vec<usize>,
    },
    /// Delete one of your articles
    Delete { id: String },
    /// Publish one of your articles
    Publish { id: String },
}

#[derive(clap::Args, Debug, Default)]
struct BodyArgs {
    /// Markdown content
    #[arg(long, conflicts_with = "content_file")]
    content: Option<String>,
    /// Read markdown content from a file
    #[arg(long, value_name = "PATH")]
    content_file: Option<PathBuf>,
}

impl BodyArgs {
    fn read(&self) -> Result<Option<String>> {
        if let Some(content) = &self.content {
            return Ok(Some(content.clone()));
        }
        match &self.content_file {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read content from {:?}", path))
                .map(Some),
            None => Ok(None),
        }
    }
}

impl Cli {
    /// Environment configuration with command-line overrides applied
    pub fn config(&self) -> Config {
        let mut config = Config::from_env();
        if let Some(api_url) = &self.api_url {
            config = config.with_api_url(api_url);
        }
        if let Some(data_dir) = &self.data_dir {
            config = config.with_data_dir(data_dir.clone());
        }
        config
    }
}

pub async fn run(cli: Cli, config: Config) -> Result<()> {
    let (state, mut navigation) = AppState::new(config).context("Failed to initialize client")?;

    match state.session.bootstrap().await {
        SessionPhase::Authenticated(user) => debug!("Resumed session for {}", user.email),
        phase => debug!("Starting in phase {:?}", phase),
    }

    let outcome = dispatch(&state, cli.command).await;

    while let Ok(route) = navigation.try_recv() {
        debug!("Next view: {}", route);
    }
    outcome
}

async fn dispatch(state: &AppState, command: Commands) -> Result<()> {
    match command {
        Commands::Login { email, password } => {
            let user = commands::login(state, &LoginForm { email, password }).await?;
            println!("Signed in as {}", display_user(&user));
        }
        Commands::Register {
            email,
            password,
            confirm_password,
        } => {
            let form = RegisterForm {
                email,
                password,
                confirm_password,
            };
            let user = commands::register(state, &form).await?;
            println!("Registered and signed in as {}", display_user(&user));
        }
        Commands::Logout => {
            commands::logout(state)?;
            println!("Signed out");
        }
        Commands::Whoami => match commands::whoami(state) {
            Some(user) => println!("{}", display_user(&user)),
            None => println!("Not signed in"),
        },
        Commands::News { command } => news_command(state, command).await?,
        Commands::Open { path } => {
            let (route, access) = commands::open_route(state, &path).await?;
            match access {
                Access::Allow => println!("{}: allowed", route),
                Access::Defer => println!("{}: waiting for session", route),
                Access::Redirect(target) => println!("{}: redirected to {}", route, target),
            }
        }
    }
    Ok(())
}

async fn news_command(state: &AppState, command: NewsCommands) -> Result<()> {
    match command {
        NewsCommands::List { title, author } => {
            let listing = commands::list_news(state, &NewsFilter { title, author }).await?;
            if listing.items.is_empty() {
                println!("No articles");
            }
            let uploads = &state.config.uploads_url;
            for item in &listing.items {
                println!(
                    "{}  {}  {}  {}",
                    item.id,
                    item.created_at.format("%Y-%m-%d"),
                    item.author.email,
                    item.title
                );
                if let Some(cover) = item.cover_url(uploads) {
                    println!("    cover: {}", cover);
                }
            }
        }
        NewsCommands::Show { id, html } => {
            let view = commands::show_news(state, &id).await?;
            if html {
                println!("{}", view.html);
                return Ok(());
            }
            println!("{}", view.news.title);
            println!(
                "by {} on {}",
                view.news.author.email,
                view.news.created_at.format("%Y-%m-%d")
            );
            println!();
            println!("{}", news::render_plain(&view.news.content));
            for url in view.image_urls.iter().chain(view.file_urls.iter()) {
                println!("  attachment: {}", url);
            }
            if view.can_edit {
                println!();
                println!("You can edit or delete this article.");
            }
        }
        NewsCommands::Create {
            title,
            body,
            images,
            files,
        } => {
            let mut draft = NewsDraft::new(title, body.read()?.unwrap_or_default());
            for image in commands::load_images(&images)? {
                draft.add_image(image);
            }
            for file in commands::load_attachments(&files)? {
                draft.add_file(file);
            }
            let created = commands::create_news(state, &draft).await?;
            println!("Created {}", created.id);
        }
        NewsCommands::Edit {
            id,
            title,
            body,
            images,
            files,
            remove_images,
            remove_files,
        } => {
            let changes = NewsChanges {
                title,
                content: body.read()?,
                add_images: commands::load_images(&images)?,
                add_files: commands::load_attachments(&files)?,
                remove_images,
                remove_files,
            };
            let updated = commands::edit_news(state, &id, changes).await?;
            println!("Updated {}", updated.id);
        }
        NewsCommands::Delete { id } => {
            commands::delete_news(state, &id).await?;
            println!("Deleted {}", id);
        }
        NewsCommands::Publish { id } => {
            commands::publish_news(state, &id).await?;
            println!("Published {}", id);
        }
    }
    Ok(())
}

fn display_user(user: &crate::api::User) -> String {
    if user.name.is_empty() {
        user.email.clone()
    } else {
        format!("{} <{}>", user.name, user.email)
    }
}

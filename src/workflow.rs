use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{error, info};

use crate::compose::ComposeWorkflow;
use crate::mail_session::{MailSession, MailStore, MailTransport};
use crate::message_view;
use crate::settings::Config;
use crate::terminal::{LineSource, MenuChoice, Terminal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Folders,
    Search,
    Compose,
    Quit,
}

const MAIN_MENU: [(Action, &str, &str); 4] = [
    (Action::Folders, "Folders", "Browse mail folders"),
    (Action::Search, "Search", "Search messages"),
    (Action::Compose, "Compose", "Write a new message"),
    (Action::Quit, "Quit", "Exit client"),
];

/// Runs the main menu until the user quits or input ends. Errors from one
/// action are reported and the loop carries on; only terminal I/O failures
/// on the main menu end it.
pub async fn run<S: MailStore, T: MailTransport, I: LineSource, W: Write>(
    session: &mut MailSession<S, T>,
    config: &Config,
    terminal: &mut Terminal<I, W>,
) -> Result<()> {
    let options: Vec<(String, String)> = MAIN_MENU
        .iter()
        .map(|(_, name, description)| (name.to_string(), description.to_string()))
        .collect();

    loop {
        let choice = match terminal.menu("Main Menu", &options).await {
            Ok(choice) => choice,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                info!("Input closed, leaving");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        let action = match choice {
            MenuChoice::Selected(index) => MAIN_MENU[index].0,
            MenuChoice::Quit => Action::Quit,
            MenuChoice::Back | MenuChoice::Invalid => continue,
        };

        let outcome = match action {
            Action::Folders => browse_folders(session, config, terminal).await,
            Action::Search => search_messages(session, terminal).await,
            Action::Compose => compose_message(session, config, terminal).await,
            Action::Quit => return Ok(()),
        };
        if let Err(err) = outcome {
            error!("{:?} failed: {:#}", action, err);
            terminal.failure(&format!("{:#}", err))?;
        }
    }
}

async fn browse_folders<S: MailStore, T: MailTransport, I: LineSource, W: Write>(
    session: &mut MailSession<S, T>,
    config: &Config,
    terminal: &mut Terminal<I, W>,
) -> Result<()> {
    let folders = session.list_folders().await?;
    let options: Vec<(String, String)> = folders.iter().map(|f| (f.clone(), String::new())).collect();
    let folder = match terminal.menu("Mail Folders", &options).await? {
        MenuChoice::Selected(index) => &folders[index],
        _ => return Ok(()),
    };
    view_messages(session, config, terminal, folder).await
}

async fn view_messages<S: MailStore, T: MailTransport, I: LineSource, W: Write>(
    session: &mut MailSession<S, T>,
    config: &Config,
    terminal: &mut Terminal<I, W>,
    folder: &str,
) -> Result<()> {
    let messages = session.fetch_recent(folder, config.fetch_limit).await?;
    terminal.summaries(folder, &messages)?;

    let answer = terminal.prompt("Message idx to view (or ENTER): ").await?;
    let Some(message) = answer
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|idx| idx.checked_sub(1))
        .and_then(|idx| messages.get(idx))
    else {
        return Ok(());
    };

    let body = message_view::decode(&message.raw);
    terminal.message_body(&body)?;

    if !body.attachments.is_empty() && terminal.confirm("Download attachments? (y/N)> ").await? {
        let destination = expand_home(terminal.prompt("Save to folder: ").await?.trim());
        let saved = message_view::save_attachments(&body.attachments, &destination)?;
        terminal.success(&format!("Saved {} attachments to {}", saved, destination.display()))?;
    }
    terminal.pause("Press ENTER to go back").await?;
    Ok(())
}

async fn search_messages<S: MailStore, T: MailTransport, I: LineSource, W: Write>(
    session: &mut MailSession<S, T>,
    terminal: &mut Terminal<I, W>,
) -> Result<()> {
    let folder = terminal.prompt("Folder to search: ").await?;
    let term = terminal.prompt("Search term (subject/from): ").await?;
    let hits = session.search(folder.trim(), &term).await?;
    terminal.search_hits(&hits)?;
    terminal.pause("ENTER to go back").await?;
    Ok(())
}

async fn compose_message<S: MailStore, T: MailTransport, I: LineSource, W: Write>(
    session: &mut MailSession<S, T>,
    config: &Config,
    terminal: &mut Terminal<I, W>,
) -> Result<()> {
    let mut compose = ComposeWorkflow::new(config.email.clone());

    let recipient = terminal.prompt("To: ").await?;
    let subject = terminal.prompt("Subject: ").await?;
    let body = terminal.edit_body()?;
    compose.enter_fields(&recipient, &subject, &body)?;

    let paths = if terminal.confirm("Attach files? (y/N)> ").await? {
        parse_paths(&terminal.prompt("Paths (comma sep)> ").await?)
    } else {
        Vec::new()
    };
    compose.attach(paths)?;

    if terminal.confirm("PGP sign? (y/N)> ").await? {
        if let Err(err) = compose.sign(session) {
            terminal.failure(&err)?;
            if !terminal.confirm("Send unsigned? (y/N)> ").await? {
                compose.cancel();
                terminal.notice("Message discarded")?;
                return Ok(());
            }
        }
    }

    compose.finalize()?;
    terminal.notice("Sending...")?;
    compose.send(session).await?;
    terminal.success("Email sent!")?;
    terminal.pause("Press ENTER to continue").await?;
    Ok(())
}

/// Splits a comma separated list of paths, dropping blanks.
pub fn parse_paths(input: &str) -> Vec<PathBuf> {
    input
        .split(',')
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .map(expand_home)
        .collect()
}

/// Expands a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix('~'), dirs::home_dir()) {
        (Some(rest), Some(home)) if rest.is_empty() || rest.starts_with('/') => {
            home.join(rest.trim_start_matches('/'))
        }
        _ => Path::new(path).to_path_buf(),
    }
}

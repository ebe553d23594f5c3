use std::env;
use std::fmt::Display;
use std::fs;
use std::io::{self, BufRead, Write};
use std::process::Command;
use std::sync::mpsc as std_mpsc;
use std::thread;

use crossterm::style::{style, Color, Stylize};
use tokio::sync::mpsc;

use crate::mail_session::{MessageSummary, SearchHit};
use crate::message_view::MessageBody;
use crate::settings::{Config, Shortcuts, Theme};

const COLUMN_WIDTH: usize = 40;
const EDITOR_SEED: &str = "# Write your message below\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    Selected(usize),
    Back,
    Quit,
    Invalid,
}

/// Where typed answers come from.
pub trait LineSource {
    /// The next line without its terminator, or `None` at end of input.
    async fn read_line(&mut self) -> io::Result<Option<String>>;
}

/// Reads stdin on a helper thread, one line per request, so a pending read
/// never blocks the runtime and never grabs keystrokes meant for `$EDITOR`.
pub struct StdinLines {
    requests: std_mpsc::Sender<()>,
    replies: mpsc::UnboundedReceiver<io::Result<Option<String>>>,
}

impl StdinLines {
    pub fn spawn() -> Self {
        let (requests, pending) = std_mpsc::channel::<()>();
        let (answer, replies) = mpsc::unbounded_channel();
        thread::spawn(move || {
            let stdin = io::stdin();
            while pending.recv().is_ok() {
                let mut line = String::new();
                let read = stdin.lock().read_line(&mut line).map(|n| (n > 0).then_some(line));
                if answer.send(read).is_err() {
                    break;
                }
            }
        });
        StdinLines { requests, replies }
    }
}

impl LineSource for StdinLines {
    async fn read_line(&mut self) -> io::Result<Option<String>> {
        let gone = || io::Error::new(io::ErrorKind::BrokenPipe, "stdin reader stopped");
        self.requests.send(()).map_err(|_| gone())?;
        let line = self.replies.recv().await.ok_or_else(gone)??;
        Ok(line.map(|line| line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

struct Palette {
    accent: Option<Color>,
    info: Option<Color>,
    success: Option<Color>,
    warning: Option<Color>,
    failure: Option<Color>,
}

impl Palette {
    fn for_theme(theme: Theme) -> Self {
        match theme {
            Theme::Monokai => Palette {
                accent: Some(Color::Magenta),
                info: Some(Color::Cyan),
                success: Some(Color::Green),
                warning: Some(Color::Yellow),
                failure: Some(Color::Red),
            },
            Theme::Light => Palette {
                accent: Some(Color::DarkBlue),
                info: Some(Color::DarkCyan),
                success: Some(Color::DarkGreen),
                warning: Some(Color::DarkYellow),
                failure: Some(Color::DarkRed),
            },
            Theme::Plain => Palette { accent: None, info: None, success: None, warning: None, failure: None },
        }
    }
}

fn paint<D: Display>(text: D, color: Option<Color>) -> String {
    match color {
        Some(color) => style(text).with(color).to_string(),
        None => text.to_string(),
    }
}

/// Line-oriented prompts and themed output.
pub struct Terminal<I = StdinLines, W = io::Stdout> {
    input: I,
    out: W,
    palette: Palette,
    shortcuts: Shortcuts,
}

impl Terminal {
    pub fn stdio(config: &Config) -> Self {
        Terminal::new(config, StdinLines::spawn(), io::stdout())
    }
}

impl<I: LineSource, W: Write> Terminal<I, W> {
    pub fn new(config: &Config, input: I, out: W) -> Self {
        Terminal {
            input,
            out,
            palette: Palette::for_theme(config.theme),
            shortcuts: config.shortcuts.clone(),
        }
    }

    /// Reads one line. End of input is an `UnexpectedEof` error so the main
    /// loop can wind down.
    pub async fn prompt(&mut self, label: &str) -> io::Result<String> {
        write!(self.out, "{}", label)?;
        self.out.flush()?;
        self.input
            .read_line()
            .await?
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "end of input"))
    }

    pub async fn confirm(&mut self, question: &str) -> io::Result<bool> {
        Ok(self.prompt(question).await?.trim().eq_ignore_ascii_case("y"))
    }

    pub async fn pause(&mut self, label: &str) -> io::Result<()> {
        self.prompt(label).await.map(|_| ())
    }

    pub fn rule(&mut self, title: &str) -> io::Result<()> {
        let bar = paint("─".repeat(8), self.palette.accent);
        writeln!(self.out, "{} {} {}", bar, style(title).bold(), bar)
    }

    /// Numbered menu. Besides a number the user may type the back or quit
    /// shortcut.
    pub async fn menu(&mut self, title: &str, options: &[(String, String)]) -> io::Result<MenuChoice> {
        self.rule(title)?;
        for (i, (name, description)) in options.iter().enumerate() {
            if description.is_empty() {
                writeln!(self.out, " {}) {}", i + 1, style(name).bold())?;
            } else {
                writeln!(self.out, " {}) {} - {}", i + 1, style(name).bold(), description)?;
            }
        }
        let keys = format!("[{}] back  [{}] quit", self.shortcuts.back, self.shortcuts.quit);
        writeln!(self.out, " {}", paint(keys, self.palette.info))?;
        let answer = self.prompt("Choose: ").await?;
        Ok(self.parse_choice(answer.trim(), options.len()))
    }

    pub fn parse_choice(&self, answer: &str, option_count: usize) -> MenuChoice {
        if answer == self.shortcuts.quit {
            return MenuChoice::Quit;
        }
        if answer == self.shortcuts.back {
            return MenuChoice::Back;
        }
        match answer.parse::<usize>() {
            Ok(n) if (1..=option_count).contains(&n) => MenuChoice::Selected(n - 1),
            _ => MenuChoice::Invalid,
        }
    }

    pub fn summaries(&mut self, folder: &str, messages: &[MessageSummary]) -> io::Result<()> {
        self.rule(&format!("{} (latest {})", folder, messages.len()))?;
        let rows: Vec<[String; 4]> = messages
            .iter()
            .enumerate()
            .map(|(i, message)| {
                [
                    (i + 1).to_string(),
                    clip(&message.date),
                    clip(&message.sender),
                    clip(&message.subject),
                ]
            })
            .collect();
        let header = ["Idx", "Date", "From", "Subject"].map(String::from);

        let mut widths = header.clone().map(|cell| cell.chars().count());
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let render = |row: &[String; 4]| {
            row.iter()
                .zip(widths)
                .map(|(cell, width)| format!("{:<width$}", cell, width = width))
                .collect::<Vec<_>>()
                .join(" │ ")
        };
        writeln!(self.out, "{}", style(render(&header)).bold())?;
        for row in &rows {
            let line = render(row);
            // Idx column in the info colour, like the listing's key column.
            let (idx, rest) = line.split_at(widths[0]);
            writeln!(self.out, "{}{}", paint(idx, self.palette.info), rest)?;
        }
        Ok(())
    }

    pub fn message_body(&mut self, body: &MessageBody) -> io::Result<()> {
        self.rule("Message Body")?;
        match &body.text {
            Some(text) => writeln!(self.out, "{}", text)?,
            None => writeln!(self.out, "{}", paint("(no plain-text part)", self.palette.warning))?,
        }
        if !body.attachments.is_empty() {
            let count = format!("{} attachments", body.attachments.len());
            writeln!(self.out, "{}", paint(count, self.palette.success))?;
            for attachment in &body.attachments {
                writeln!(
                    self.out,
                    "  {} ({}, {} bytes)",
                    attachment.filename,
                    attachment.content_type,
                    attachment.content.len()
                )?;
            }
        }
        Ok(())
    }

    pub fn search_hits(&mut self, hits: &[SearchHit]) -> io::Result<()> {
        if hits.is_empty() {
            writeln!(self.out, "{}", paint("No matches", self.palette.warning))?;
        }
        for hit in hits {
            writeln!(self.out, "{}: {} from {}", hit.uid, paint(&hit.subject, self.palette.info), hit.sender)?;
        }
        Ok(())
    }

    pub fn notice(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "{}", paint(text, self.palette.warning))
    }

    pub fn success(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "{}", paint(text, self.palette.success))
    }

    pub fn failure(&mut self, err: &dyn Display) -> io::Result<()> {
        writeln!(self.out, "{}", paint(format!("Error: {}", err), self.palette.failure))
    }

    /// Opens `$EDITOR` (vim when unset) on a temporary Markdown file and
    /// returns what was saved.
    pub fn edit_body(&mut self) -> io::Result<String> {
        let mut file = tempfile::Builder::new().prefix("postbox-").suffix(".md").tempfile()?;
        file.write_all(EDITOR_SEED.as_bytes())?;
        file.flush()?;

        let editor = env::var("EDITOR").unwrap_or_else(|_| "vim".to_string());
        let status = Command::new(&editor).arg(file.path()).status()?;
        if !status.success() {
            return Err(io::Error::new(io::ErrorKind::Other, format!("{} exited with {}", editor, status)));
        }
        fs::read_to_string(file.path())
    }
}

fn clip(text: &str) -> String {
    if text.chars().count() <= COLUMN_WIDTH {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(COLUMN_WIDTH - 1).collect();
    clipped.push('…');
    clipped
}

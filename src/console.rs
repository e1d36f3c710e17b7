use anyhow::Result;
use async_trait::async_trait;
use crossterm::style::Stylize;
use std::io::{self, Write};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

use crate::models::CommandLine;

/// Everything the launcher prints or asks goes through this sink.
#[async_trait]
pub trait Console: Send + Sync {
    fn print(&self, text: &str);
    fn info(&self, message: &str);
    fn success(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);

    fn preview(&self, cmd: &CommandLine);

    /// Numbered selection list.
    fn menu(&self, title: &str, filter: Option<&str>, labels: &[String], hints: &[&str]);

    /// One line of operator input, trimmed. `None` on end of input or Ctrl-C.
    async fn read_line(&self, prompt: &str) -> Result<Option<String>>;

    /// Yes/no question; anything but an explicit answer yields `default`.
    async fn confirm(&self, message: &str, default: bool) -> Result<bool> {
        let suffix = if default { "[Y/n]" } else { "[y/N]" };
        let answer = self
            .read_line(&format!("⚠ {} {} ", message, suffix))
            .await?;
        Ok(match answer.as_deref().map(str::to_lowercase).as_deref() {
            Some("y") | Some("yes") => true,
            Some("n") | Some("no") => false,
            _ => default,
        })
    }
}

pub struct TerminalConsole {
    stdin: Mutex<Lines<BufReader<Stdin>>>,
}

impl TerminalConsole {
    pub fn new() -> Self {
        Self {
            stdin: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

impl Default for TerminalConsole {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Console for TerminalConsole {
    fn print(&self, text: &str) {
        println!("{}", text);
    }

    fn info(&self, message: &str) {
        println!("{} {}", "ℹ".blue().bold(), message);
    }

    fn success(&self, message: &str) {
        println!("{} {}", "✓".green().bold(), message);
    }

    fn warn(&self, message: &str) {
        eprintln!("{}", message.yellow());
    }

    fn error(&self, message: &str) {
        eprintln!("{} {}", "Error:".red().bold(), message);
    }

    fn preview(&self, cmd: &CommandLine) {
        println!("\n  {}\n", format!("$ {}", cmd.preview()).dim());
    }

    fn menu(&self, title: &str, filter: Option<&str>, labels: &[String], hints: &[&str]) {
        println!();
        println!("{}", format!("── {} ──", title).cyan().bold());
        if let Some(filter) = filter {
            println!("  {}", format!("Filter: {}", filter).dim());
        }
        for (i, label) in labels.iter().enumerate() {
            println!("  {}  {}", format!("{:>3}", i + 1).green().bold(), label);
        }
        println!("\n  {}", hints.join("  ").dim());
    }

    async fn read_line(&self, prompt: &str) -> Result<Option<String>> {
        print!("  {} ", prompt.bold());
        io::stdout().flush()?;

        let mut stdin = self.stdin.lock().await;
        tokio::select! {
            line = stdin.next_line() => Ok(line?.map(|l| l.trim().to_string())),
            _ = tokio::signal::ctrl_c() => {
                println!();
                Ok(None)
            }
        }
    }
}

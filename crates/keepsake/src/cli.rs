// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `keepsake` command line: login, logout, whoami, upload, resume.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use crate::config::ClientConfig;
use crate::media::LocalFile;
use crate::upload::orchestrator::UploadOrchestrator;
use crate::upload::{BatchReport, UploadEvent, UploadStatus};
use crate::Client;

#[derive(Parser)]
#[command(name = "keepsake", version, about = "Session-aware media upload client")]
pub struct Cli {
    #[command(flatten)]
    pub config: ClientConfig,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, env = "KEEPSAKE_LOG", default_value = "info")]
    pub log_level: String,

    /// Log format (text or json).
    #[arg(long, env = "KEEPSAKE_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Log in and store the credential pair
    Login {
        #[arg(long)]
        username: String,
        #[arg(long, env = "KEEPSAKE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Log out and wipe stored credentials
    Logout,
    /// Show the logged-in user
    Whoami,
    /// Upload one or more media files
    Upload {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Title for every file (defaults to each file's name)
        #[arg(long)]
        title: Option<String>,
        /// Description (single file only)
        #[arg(long)]
        description: Option<String>,
    },
    /// Confirm uploads whose transfer finished but confirmation did not
    Resume,
}

/// Install the global subscriber. Logs go to stderr.
pub fn init_tracing(cli: &Cli) {
    use tracing_subscriber::fmt;

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match cli.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init(),
    };
    drop(result);
}

/// Run the parsed command. Returns the process exit code.
pub async fn run(cli: Cli) -> i32 {
    let client = match Client::open(&cli.config) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("error: {e:#}");
            return 2;
        }
    };

    match cli.command {
        Command::Login { username, password } => {
            match crate::auth::login(&client.gateway, &username, &password).await {
                Ok(()) => {
                    println!("logged in as {username}");
                    0
                }
                Err(e) => {
                    eprintln!("error: {e}");
                    1
                }
            }
        }
        Command::Logout => {
            crate::auth::logout(&client.gateway).await;
            println!("logged out");
            0
        }
        Command::Whoami => match crate::auth::current_user(&client.gateway).await {
            Ok(Some(user)) => {
                println!("{}", user.username);
                0
            }
            Ok(None) => {
                eprintln!("not logged in");
                1
            }
            Err(e) => {
                eprintln!("error: {e}");
                1
            }
        },
        Command::Upload { paths, title, description } => {
            upload(&client, paths, title, description).await
        }
        Command::Resume => {
            let report = client.uploads.resume_unconfirmed().await;
            for file_id in &report.confirmed {
                println!("confirmed {file_id}");
            }
            for file_id in &report.dropped {
                println!("dropped {file_id} (no longer on server)");
            }
            for file_id in &report.still_pending {
                eprintln!("still pending {file_id}");
            }
            i32::from(!report.still_pending.is_empty())
        }
    }
}

async fn upload(
    client: &Client,
    paths: Vec<PathBuf>,
    title: Option<String>,
    description: Option<String>,
) -> i32 {
    if description.is_some() && paths.len() != 1 {
        eprintln!("error: --description can only be used with a single file");
        return 2;
    }
    if !client.session.is_authenticated() {
        eprintln!("not logged in; run `keepsake login` first");
        return 1;
    }

    let mut unreadable = Vec::new();
    let mut files = Vec::new();
    for path in paths {
        match LocalFile::from_path(&path).await {
            Ok(file) => files.push(file),
            Err(e) => {
                eprintln!("{}: {e}", path.display());
                unreadable.push(path.display().to_string());
            }
        }
    }

    let uploads = &client.uploads;
    let report = match (files.len(), description) {
        (1, Some(description)) => {
            let mut files = files;
            let file = files.remove(0);
            let name = file.name.clone();
            let file_title = title.unwrap_or_else(|| name.clone());
            let outcome =
                watch(uploads, uploads.upload_file(file, &file_title, Some(&description))).await;
            match outcome {
                Ok(file_id) => BatchReport { file_ids: vec![file_id], failed: Vec::new() },
                Err(_) => BatchReport { file_ids: Vec::new(), failed: vec![name] },
            }
        }
        (0, _) => BatchReport::default(),
        _ => watch(uploads, uploads.submit(files, title.as_deref())).await,
    };

    for file_id in &report.file_ids {
        println!("{file_id}");
    }
    if let Some(msg) = report.success_message() {
        eprintln!("{msg}");
    }
    if let Some(msg) = report.failure_message() {
        eprintln!("{msg}");
    }
    if !client.session.is_authenticated() {
        eprintln!("session expired; run `keepsake login` again");
    }

    i32::from(!report.failed.is_empty() || !unreadable.is_empty())
}

/// Drive `work` while printing every status change of the records it touches.
async fn watch<F: Future>(uploads: &UploadOrchestrator, work: F) -> F::Output {
    let mut events = uploads.subscribe();
    let mut printed: HashMap<String, UploadStatus> = HashMap::new();
    tokio::pin!(work);

    let output = loop {
        tokio::select! {
            output = &mut work => break output,
            event = events.recv() => match event {
                Ok(event) => print_event(uploads, &mut printed, event),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break (&mut work).await,
            },
        }
    };
    while let Ok(event) = events.try_recv() {
        print_event(uploads, &mut printed, event);
    }
    output
}

fn print_event(
    uploads: &UploadOrchestrator,
    printed: &mut HashMap<String, UploadStatus>,
    event: UploadEvent,
) {
    let UploadEvent::Progress { id, status, .. } = event else {
        return;
    };
    if printed.get(&id) == Some(&status) {
        return;
    }
    let Some(record) = uploads.record(&id) else {
        return;
    };
    match record.error {
        Some(ref err) if status == UploadStatus::Error => eprintln!("{}: error: {err}", record.file_name),
        _ => eprintln!("{}: {status}", record.file_name),
    }
    printed.insert(id, status);
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;

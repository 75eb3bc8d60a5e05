/*
    jellyfin-library-access | Rust CLI tool to audit and grant library access.
    Copyright (C) 2025  Israel Alberto Roldan Vega

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use access_core::models::ReconciliationDecision;
use access_core::{
    AuditError, AuditReport, Auditor, GrantReport, GrantStatus, MediaServerClient, ResolveError,
    ServerConfig, User, Warning,
};
use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use serde::Serialize;
use std::path::Path;
use std::process;
use std::time::Duration;

const EXIT_FAILURE: i32 = 1;
const EXIT_NO_USERS: i32 = 2;
const EXIT_EXPORT_FAILED: i32 = 3;
const EXIT_AMBIGUOUS_TARGET: i32 = 4;
const EXIT_TARGET_NOT_FOUND: i32 = 5;
const EXIT_NO_LIBRARIES: i32 = 6;

#[derive(Parser)]
#[command(name = "library-access")]
#[command(about = "Audit and grant per-user library access on a Jellyfin server", long_about = None)]
struct Cli {
    /// Server base URL, e.g. http://10.0.0.2:8096 (default: $JELLYFIN_URL)
    #[arg(long, global = true)]
    url: Option<String>,

    /// API key sent with every request (default: $JELLYFIN_API_KEY)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Disable TLS certificate verification
    #[arg(long, global = true)]
    insecure: bool,

    /// Network timeout in seconds (default: $JELLYFIN_TIMEOUT or 20)
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists every library (ID -> Name)
    List,
    /// Shows which libraries each user can access
    Audit {
        /// Export the audit table to a CSV file
        #[arg(long, short = 'o')]
        output: Option<String>,
        /// Export the full audit report to a JSON file
        #[arg(long)]
        json: Option<String>,
    },
    /// Grants a library to every user who lacks it (dry-run unless --apply)
    Grant {
        /// Library ID, exact name, or part of a name
        #[arg(value_name = "LIBRARY")]
        library: String,
        /// Write the policy changes instead of only reporting them
        #[arg(long)]
        apply: bool,
        /// Do not run the audit after granting
        #[arg(long)]
        skip_audit: bool,
        /// Export the follow-up audit table to a CSV file
        #[arg(long, short = 'o')]
        output: Option<String>,
        /// Export the grant report to a JSON file
        #[arg(long)]
        json: Option<String>,
    },
}

impl Cli {
    /// Environment first, flags override.
    fn server_config(&self) -> ServerConfig {
        let mut config = ServerConfig::from_env();
        if let Some(url) = &self.url {
            config.base_url = url.clone();
        }
        if let Some(key) = &self.api_key {
            config.api_key = key.clone();
        }
        if self.insecure {
            config.verify_tls = false;
        }
        if let Some(secs) = self.timeout {
            config.timeout = Duration::from_secs(secs);
        }
        config
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    if dotenv().is_err() {
        // No .env file; rely on the environment and flags.
    }

    let cli = Cli::parse();
    let config = cli.server_config();
    log::debug!("Using media server at {}", config.base_url);

    match &cli.command {
        Commands::List => {
            handle_list(&config).await;
        }
        Commands::Audit { output, json } => {
            let (mut auditor, users) = prepare(&config).await;
            handle_audit(&mut auditor, &users, output.as_deref(), json.as_deref()).await;
        }
        Commands::Grant {
            library,
            apply,
            skip_audit,
            output,
            json,
        } => {
            let (mut auditor, users) = prepare(&config).await;
            handle_grant(&mut auditor, &users, library, *apply, json.as_deref()).await;
            if !*skip_audit {
                println!();
                handle_audit(&mut auditor, &users, output.as_deref(), None).await;
            }
        }
    }
}

fn get_auditor(config: &ServerConfig) -> Auditor<MediaServerClient> {
    match MediaServerClient::new(config) {
        Ok(client) => Auditor::new(client),
        Err(e) => {
            eprintln!("Error initializing media server client: {}", e);
            process::exit(EXIT_FAILURE);
        }
    }
}

/// Connects, fetches the users, then discovers the libraries. Discovery
/// problems are printed here so every command reports them exactly once.
async fn prepare(config: &ServerConfig) -> (Auditor<MediaServerClient>, Vec<User>) {
    let mut auditor = get_auditor(config);

    let users = match auditor.list_users().await {
        Ok(users) => users,
        Err(e) => {
            eprintln!("Failed to list users: {}", e);
            process::exit(EXIT_FAILURE);
        }
    };
    if users.is_empty() {
        eprintln!("No users found. Check the URL, the API key and its permissions.");
        process::exit(EXIT_NO_USERS);
    }

    auditor.discover_libraries().await;
    print_warnings(auditor.warnings());
    (auditor, users)
}

async fn handle_list(config: &ServerConfig) {
    let (auditor, _) = prepare(config).await;

    let libraries = auditor.list_libraries();
    if libraries.is_empty() {
        eprintln!("No libraries found through the API (check the URL and the API key).");
        process::exit(EXIT_NO_LIBRARIES);
    }
    for library in libraries {
        println!("{}", library);
    }
}

async fn handle_grant(
    auditor: &mut Auditor<MediaServerClient>,
    users: &[User],
    library: &str,
    apply: bool,
    json_path: Option<&str>,
) {
    let target = match auditor.resolve_target(library) {
        Ok(target) => target,
        Err(AuditError::Resolve(ResolveError::Ambiguous { input, matches })) => {
            eprintln!("Several libraries match '{}':", input);
            for m in matches {
                eprintln!("  - {}", m);
            }
            eprintln!("Use the exact ID to disambiguate.");
            process::exit(EXIT_AMBIGUOUS_TARGET);
        }
        Err(e) => {
            eprintln!("{}", e);
            process::exit(EXIT_TARGET_NOT_FOUND);
        }
    };

    println!("Target library: {}", target);

    let report = auditor.grant(&target, users, apply).await;
    for line in grant_lines(&report) {
        println!("{}", line);
    }
    print_warnings(&report.warnings);

    if let Some(path) = json_path {
        export(write_json(Path::new(path), &report), path);
    }
}

/// One line per user needing the grant, then the run summary.
fn grant_lines(report: &GrantReport) -> Vec<String> {
    let mut lines = Vec::new();
    for outcome in &report.outcomes {
        if outcome.decision != ReconciliationDecision::NeedsGrant {
            continue;
        }
        let suffix = match &outcome.status {
            GrantStatus::GrantedViaPost => " (via POST)".to_string(),
            GrantStatus::Blocked(_) => " [WARN: policy unreadable, --apply will skip]".to_string(),
            GrantStatus::Failed(reason) => format!(" [ERROR: {}]", reason),
            _ => String::new(),
        };
        lines.push(format!(
            "User: {} -> add {} ({}){}",
            outcome.user, report.target.name, report.target.id, suffix
        ));
    }
    lines.push(String::new());
    lines.push(report.to_string());
    lines
}

async fn handle_audit(
    auditor: &mut Auditor<MediaServerClient>,
    users: &[User],
    csv_path: Option<&str>,
    json_path: Option<&str>,
) {
    let report = auditor.audit_users(users).await;

    for line in render_table(&report) {
        println!("{}", line);
    }

    if !report.unresolved_ids.is_empty() {
        eprintln!();
        eprintln!("WARNING: some library IDs could not be resolved:");
        for id in &report.unresolved_ids {
            eprintln!("  - {}", id);
        }
        eprintln!("Hint: check that /Library/VirtualFolders or /Library/MediaFolders answer correctly.");
    }
    print_warnings(&report.warnings);

    if let Some(path) = csv_path {
        export(write_csv(Path::new(path), &report), path);
    }
    if let Some(path) = json_path {
        export(write_json(Path::new(path), &report), path);
    }
}

fn render_warnings(warnings: &[Warning]) -> Vec<String> {
    if warnings.is_empty() {
        return Vec::new();
    }
    let mut lines = vec![format!("Degraded results ({}):", warnings.len())];
    lines.extend(warnings.iter().map(|w| format!("  - {}", w)));
    lines
}

fn print_warnings(warnings: &[Warning]) {
    let lines = render_warnings(warnings);
    if lines.is_empty() {
        return;
    }
    eprintln!();
    for line in lines {
        eprintln!("{}", line);
    }
}

/// Console table sorted by user name.
fn render_table(report: &AuditReport) -> Vec<String> {
    const USER: &str = "User";
    const MODE: &str = "Mode";
    const LIBRARIES: &str = "Libraries";

    let rows = report.sorted_rows();
    let col_user = rows
        .iter()
        .map(|r| r.user.chars().count())
        .chain([USER.len()])
        .max()
        .unwrap_or_default();
    let col_mode = rows
        .iter()
        .map(|r| r.mode.to_string().len())
        .chain([MODE.len()])
        .max()
        .unwrap_or_default();

    let header = format!("{:<col_user$}  {:<col_mode$}  {}", USER, MODE, LIBRARIES);
    let separator = "-".repeat(header.chars().count());
    let mut lines = vec![header, separator];
    for row in rows {
        lines.push(format!(
            "{:<col_user$}  {:<col_mode$}  {}",
            row.user,
            row.mode.to_string(),
            row.libraries_label()
        ));
    }
    lines
}

#[derive(Serialize)]
struct CsvRow<'a> {
    #[serde(rename = "User")]
    user: &'a str,
    #[serde(rename = "Mode")]
    mode: String,
    #[serde(rename = "Libraries")]
    libraries: String,
}

fn write_csv(path: &Path, report: &AuditReport) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create '{}'", path.display()))?;
    for row in &report.rows {
        writer.serialize(CsvRow {
            user: &row.user,
            mode: row.mode.to_string(),
            libraries: row.libraries_label(),
        })?;
    }
    writer.flush()?;
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write '{}'", path.display()))?;
    Ok(())
}

fn export(result: anyhow::Result<()>, path: &str) {
    match result {
        Ok(()) => {
            println!();
            println!("[SAVED] Report saved to: {}", path);
        }
        Err(e) => {
            eprintln!();
            eprintln!("[ERROR] Could not write the report: {:#}", e);
            process::exit(EXIT_EXPORT_FAILED);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use access_core::models::GrantOutcome;
    use access_core::{AccessMode, AuditRow, Library};
    use std::collections::BTreeSet;

    fn report() -> AuditReport {
        let mut report = AuditReport::new();
        report.add_row(AuditRow {
            user: "bob".to_string(),
            mode: AccessMode::All,
            library_names: vec!["Kids".to_string(), "Movies".to_string()],
            unresolved_ids: BTreeSet::new(),
        });
        report.add_row(AuditRow {
            user: "Alice".to_string(),
            mode: AccessMode::Custom,
            library_names: vec![],
            unresolved_ids: BTreeSet::new(),
        });
        report
    }

    #[test]
    fn test_render_table_sorts_by_user() {
        let lines = render_table(&report());
        assert_eq!(lines[0], "User   Mode    Libraries");
        assert!(lines[1].chars().all(|c| c == '-'));
        assert_eq!(lines[2], "Alice  CUSTOM  (none)");
        assert_eq!(lines[3], "bob    ALL     Kids, Movies");
    }

    fn unreadable_grant() -> GrantReport {
        let mut report = GrantReport::new(
            Library {
                id: "L2".to_string(),
                name: "Movies".to_string(),
            },
            false,
        );
        report.outcomes.push(GrantOutcome {
            user: User {
                id: "u9".to_string(),
                name: "Ghost".to_string(),
            },
            decision: ReconciliationDecision::NeedsGrant,
            status: GrantStatus::Blocked("current policy could not be read".to_string()),
        });
        report.warnings.push(Warning::PolicyUnavailable {
            user_id: "u9".to_string(),
            reason: "Server returned HTTP 404".to_string(),
        });
        report
    }

    #[test]
    fn test_render_warnings_covers_grant_warnings() {
        let report = unreadable_grant();
        let lines = render_warnings(&report.warnings);
        assert_eq!(lines[0], "Degraded results (1):");
        assert_eq!(
            lines[1],
            "  - No policy available for user u9: Server returned HTTP 404"
        );
        assert!(render_warnings(&[]).is_empty());
    }

    #[test]
    fn test_grant_lines_flag_unreadable_policy() {
        let lines = grant_lines(&unreadable_grant());
        assert_eq!(
            lines[0],
            "User: Ghost (u9) -> add Movies (L2) [WARN: policy unreadable, --apply will skip]"
        );
        assert!(lines[2].contains("1 cannot be updated (policy unreadable)"));
    }

    #[test]
    fn test_write_csv_quotes_joined_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.csv");

        write_csv(&path, &report()).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "User,Mode,Libraries");
        assert_eq!(lines[1], "bob,ALL,\"Kids, Movies\"");
        assert_eq!(lines[2], "Alice,CUSTOM,(none)");
    }

    #[test]
    fn test_write_csv_reports_bad_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("audit.csv");
        assert!(write_csv(&path, &report()).is_err());
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        let codes = BTreeSet::from([
            EXIT_FAILURE,
            EXIT_NO_USERS,
            EXIT_EXPORT_FAILED,
            EXIT_AMBIGUOUS_TARGET,
            EXIT_TARGET_NOT_FOUND,
            EXIT_NO_LIBRARIES,
        ]);
        assert_eq!(codes.len(), 6);
    }

    #[test]
    fn test_flags_override_environment() {
        let cli = Cli::parse_from([
            "library-access",
            "--url",
            "http://media:8096",
            "--api-key",
            "k",
            "--insecure",
            "--timeout",
            "5",
            "list",
        ]);
        let config = cli.server_config();
        assert_eq!(config.base_url, "http://media:8096");
        assert_eq!(config.api_key, "k");
        assert!(!config.verify_tls);
        assert_eq!(config.timeout, Duration::from_secs(5));
    }
}

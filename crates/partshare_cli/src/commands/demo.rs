//! Demo command implementation.

use partshare_client::{
    ClientConfig, FileUserStore, Handshake, InProcessTransport, MemoryUserStore, Party,
    RetryConfig, ShareClient, UserStore,
};
use partshare_protocol::{Credential, Permissions};
use partshare_store::{StoreConfig, StoreServer};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// The fixed demo identities, owner first.
pub const DEMO_USERS: [(&str, &str); 2] = [("user1", "user1"), ("user2", "user2")];

/// Options of the demo command.
#[derive(Debug, Clone)]
pub struct DemoOptions {
    /// Number of handshake runs.
    pub runs: u32,
    /// Directory for the local user file.
    pub state_dir: Option<PathBuf>,
    /// Register both users on every run.
    pub always_register: bool,
    /// Offer read access only.
    pub read_only: bool,
    /// Store processing delay in milliseconds.
    pub processing_delay_ms: u64,
    /// Simulated latency per request in milliseconds.
    pub latency_ms: u64,
    /// Lifetime of each offer in seconds, unlimited when unset.
    pub offer_ttl_secs: Option<i64>,
    /// Seconds to wait for a record to be processed.
    pub watch_timeout_secs: u64,
    /// Authentication attempts per user.
    pub attempts: u32,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            runs: 1,
            state_dir: None,
            always_register: false,
            read_only: false,
            processing_delay_ms: 50,
            latency_ms: 0,
            offer_ttl_secs: None,
            watch_timeout_secs: 30,
            attempts: 3,
        }
    }
}

/// Outcome of one demo run.
#[derive(Debug, Serialize)]
pub struct RunReport {
    /// Run number, starting at 1.
    pub run: u32,
    /// `done`, `already-registered` or `failed`.
    pub status: &'static str,
    /// Whether each demo user registered (instead of logging in).
    pub registered: [bool; 2],
    /// Shared partition URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_url: Option<String>,
    /// Persisted shared partition path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_path: Option<String>,
    /// Dogs read from the shared partition.
    pub dogs: Vec<String>,
    /// Dogs copied into the redeemer's own partition.
    pub imported: usize,
    /// Error message of a failed run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs the demo command.
pub fn run(options: &DemoOptions, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !matches!(format, "text" | "json") {
        return Err(format!("unknown output format: {format}").into());
    }
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let reports = runtime.block_on(run_demo(options))?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&reports)?),
        _ => print_text(&reports),
    }

    if let Some(failed) = reports.iter().find(|r| r.status == "failed") {
        return Err(failed
            .error
            .clone()
            .unwrap_or_else(|| "demo run failed".into())
            .into());
    }
    Ok(())
}

/// Runs every demo handshake and reports each run.
pub async fn run_demo(options: &DemoOptions) -> Result<Vec<RunReport>, Box<dyn std::error::Error>> {
    let server = Arc::new(StoreServer::start(
        StoreConfig::default()
            .with_processing_delay(Duration::from_millis(options.processing_delay_ms)),
    )?);
    let users: Arc<dyn UserStore> = match &options.state_dir {
        Some(dir) => Arc::new(FileUserStore::open(dir)?),
        None => Arc::new(MemoryUserStore::new()),
    };
    let config = ClientConfig::new(server.host().clone())
        .with_retry(RetryConfig::new(options.attempts))
        .with_watch_timeout(Duration::from_secs(options.watch_timeout_secs));
    let transport = InProcessTransport::new(Arc::clone(&server))
        .with_latency(Duration::from_millis(options.latency_ms));
    let client = ShareClient::new(config, Arc::new(transport), Arc::clone(&users));
    let permissions = if options.read_only {
        Permissions::READ
    } else {
        Permissions::READ_WRITE
    };

    let mut reports = Vec::new();
    for run in 1..=options.runs {
        let mut registered = [false; 2];
        for (slot, (username, _)) in registered.iter_mut().zip(DEMO_USERS) {
            *slot = should_register(options, &server, users.as_ref(), username)?;
        }
        let [owner, redeemer] =
            DEMO_USERS.map(|(u, p)| Credential::with_email(u, p, format!("{u}@123.nl")));

        info!(run, ?registered, "starting handshake");
        let mut handshake = Handshake::new(
            &client,
            party(owner, registered[0]),
            party(redeemer, registered[1]),
        )
        .with_permissions(permissions);
        if let Some(ttl) = options.offer_ttl_secs {
            handshake = handshake.with_expiry(chrono::Duration::seconds(ttl));
        }

        let report = match handshake.run().await {
            Ok(outcome) => {
                let shared = outcome.session.open_partition(outcome.shared_url.clone());
                shared.synchronize().await?;
                let imported = outcome.session.import_shared_records(&shared).await?;
                outcome.session.log_out().await?;
                RunReport {
                    run,
                    status: "done",
                    registered,
                    shared_url: Some(outcome.shared_url.to_string()),
                    shared_path: Some(outcome.shared_path),
                    dogs: outcome.dogs.into_iter().map(|d| d.name).collect(),
                    imported,
                    error: None,
                }
            }
            Err(e) if e.is_already_exists() => {
                for (username, _) in DEMO_USERS {
                    users.mark_registered(username)?;
                }
                warn!("demo users were already registered; run again to log in");
                RunReport {
                    run,
                    status: "already-registered",
                    registered,
                    shared_url: None,
                    shared_path: None,
                    dogs: Vec::new(),
                    imported: 0,
                    error: Some(e.to_string()),
                }
            }
            Err(e) => RunReport {
                run,
                status: "failed",
                registered,
                shared_url: None,
                shared_path: None,
                dogs: Vec::new(),
                imported: 0,
                error: Some(e.to_string()),
            },
        };
        let failed = report.status == "failed";
        reports.push(report);
        if failed {
            break;
        }
    }

    Ok(reports)
}

/// Decides whether a demo user registers on this run.
///
/// The local flag says the user registered before. The in-process store
/// forgets accounts when the process exits, so a flag without a matching
/// account registers again.
fn should_register(
    options: &DemoOptions,
    server: &StoreServer,
    users: &dyn UserStore,
    username: &str,
) -> Result<bool, Box<dyn std::error::Error>> {
    if options.always_register {
        return Ok(true);
    }
    Ok(!users.registered(username)? || server.identity_of(username).is_none())
}

fn party(credential: Credential, register: bool) -> Party {
    if register {
        Party::register(credential)
    } else {
        Party::log_in(credential)
    }
}

fn print_text(reports: &[RunReport]) {
    for report in reports {
        println!("Run {}: {}", report.run, report.status);
        println!(
            "  user1 {}, user2 {}",
            verb(report.registered[0]),
            verb(report.registered[1])
        );
        if let Some(url) = &report.shared_url {
            println!("  Shared partition: {url}");
        }
        if let Some(path) = &report.shared_path {
            println!("  Shared path:      {path}");
        }
        if !report.dogs.is_empty() {
            println!("  Dogs:             {}", report.dogs.join(", "));
            println!("  Imported:         {}", report.imported);
        }
        if let Some(error) = &report.error {
            println!("  Error:            {error}");
        }
    }
}

fn verb(registered: bool) -> &'static str {
    if registered {
        "registered"
    } else {
        "logged in"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn options() -> DemoOptions {
        DemoOptions {
            processing_delay_ms: 1,
            ..DemoOptions::default()
        }
    }

    #[tokio::test]
    async fn single_run_shares_rex() {
        let reports = run_demo(&options()).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, "done");
        assert_eq!(reports[0].registered, [true, true]);
        assert_eq!(reports[0].dogs, vec!["Rex".to_string()]);
        assert_eq!(reports[0].imported, 1);
    }

    #[tokio::test]
    async fn later_runs_log_in() {
        let reports = run_demo(&DemoOptions {
            runs: 3,
            ..options()
        })
        .await
        .unwrap();
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.status == "done"));
        assert_eq!(reports[1].registered, [false, false]);
    }

    #[tokio::test]
    async fn always_register_collides_then_recovers() {
        let dir = tempdir().unwrap();
        let reports = run_demo(&DemoOptions {
            runs: 2,
            always_register: true,
            state_dir: Some(dir.path().to_path_buf()),
            ..options()
        })
        .await
        .unwrap();
        assert_eq!(reports[0].status, "done");
        assert_eq!(reports[1].status, "already-registered");

        let users = FileUserStore::open(dir.path()).unwrap();
        assert!(users.registered("user1").unwrap());
        assert!(users.registered("user2").unwrap());
    }

    #[test]
    fn unknown_format_fails_before_running() {
        let result = run(&options(), "yaml");
        assert!(result.unwrap_err().to_string().contains("yaml"));
    }

    #[tokio::test]
    async fn lapsed_offers_fail_the_run() {
        let reports = run_demo(&DemoOptions {
            offer_ttl_secs: Some(-1),
            ..options()
        })
        .await
        .unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, "failed");
        assert!(reports[0].error.as_deref().unwrap().contains("offer pending"));
    }

    #[tokio::test]
    async fn read_only_demo_completes() {
        let reports = run_demo(&DemoOptions {
            read_only: true,
            ..options()
        })
        .await
        .unwrap();
        assert_eq!(reports[0].status, "done");
    }
}

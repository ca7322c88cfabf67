/// Vehicle Key Fob Authentication Tool
///
/// Runs challenge-response rounds between a vehicle and its key fob,
/// rotates vehicle keys on demand, and checks security log integrity.
use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use vehicle_key_auth::hsm::crypto::verify_detailed;
use vehicle_key_auth::{
    AuthConfig, AuthError, AuthOutcome, Authenticator, KeyFob, KeyMatch, KeypairStore,
    PerformanceMetrics, RotationReport, SecurityLogger, verify_log_file,
};

const EXIT_DENIED: u8 = 1;
const EXIT_INFRASTRUCTURE: u8 = 2;

/// Challenge-response key fob authentication with rotating ECDSA P-256 keys
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Root directory of per-vehicle key sets (overrides config)
    #[arg(long, global = true)]
    keys_dir: Option<PathBuf>,

    /// Write a hash-chained security log to this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// JSON configuration file (default: VKA_* environment variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print timing statistics at the end
    #[arg(long, global = true)]
    perf: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// One full challenge → sign → verify round
    Authenticate {
        #[arg(long)]
        vehicle: String,
    },

    /// Repeated rounds, showing rotation once the threshold is reached
    Demo {
        #[arg(long)]
        vehicle: String,

        #[arg(long, default_value_t = 6)]
        attempts: u32,
    },

    /// Sign a challenge string with the vehicle's key fob
    Sign {
        #[arg(long)]
        vehicle: String,

        #[arg(long)]
        challenge: String,
    },

    /// Check a signature against the current and archived vehicle keys
    Verify {
        #[arg(long)]
        vehicle: String,

        #[arg(long)]
        challenge: String,

        #[arg(long)]
        signature: String,
    },

    /// Force a key rotation
    Rotate {
        #[arg(long)]
        vehicle: String,
    },

    /// Verify the hash chain of a security log file
    VerifyLog { path: PathBuf },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", "ERROR:".red().bold(), e);
            if e.is_infrastructure() {
                ExitCode::from(EXIT_INFRASTRUCTURE)
            } else {
                ExitCode::from(EXIT_DENIED)
            }
        }
    }
}

fn load_config(cli: &Cli) -> Result<AuthConfig, AuthError> {
    let mut config = match &cli.config {
        Some(path) => AuthConfig::from_json_file(path)?,
        None => AuthConfig::from_env(),
    };
    if let Some(dir) = &cli.keys_dir {
        config.keys_dir = dir.clone();
    }
    if let Some(dir) = &cli.log_dir {
        config.log_dir = Some(dir.clone());
    }
    config.validate()?;
    Ok(config)
}

fn run(cli: Cli) -> Result<ExitCode, AuthError> {
    let config = load_config(&cli)?;

    match &cli.command {
        Command::Authenticate { vehicle } => {
            let mut auth = open_authenticator(vehicle, &config, cli.perf)?;
            let granted = authenticate_once(&mut auth)?;
            print_perf(&auth);
            Ok(exit_for(granted))
        }
        Command::Demo { vehicle, attempts } => {
            let mut auth = open_authenticator(vehicle, &config, cli.perf)?;
            let mut all_granted = true;
            for attempt in 1..=*attempts {
                println!(
                    "\n{} Authentication Attempt {}...",
                    "🔐".bright_blue(),
                    attempt
                );
                all_granted &= authenticate_once(&mut auth)?;
            }
            println!(
                "\n{} Key rotation policy: every {} successful authentications",
                "🔄".bright_blue(),
                config.rotation.rotation_auth_threshold
            );
            println!("{} Final state: {}", "→".cyan(), auth.state());
            print_perf(&auth);
            Ok(exit_for(all_granted))
        }
        Command::Sign { vehicle, challenge } => {
            let fob = KeyFob::new(&config.keys_dir, vehicle)?;
            println!("{}", fob.sign_challenge(challenge)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Verify {
            vehicle,
            challenge,
            signature,
        } => {
            let store = KeypairStore::open(&config.keys_dir, vehicle)?;
            let current = store.public_key()?;
            let archive = store.load_archive()?;
            let outcome = verify_detailed(challenge.as_bytes(), signature, &current, &archive)?;

            for skipped in &outcome.skipped {
                println!(
                    "{} Skipped corrupt archive entry #{}: {}",
                    "⚠".yellow(),
                    skipped.sequence,
                    skipped.reason
                );
            }
            match outcome.matched {
                Some(matched) => {
                    println!("{} Signature valid ({})", "✓".green().bold(), matched);
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    println!("{} Signature rejected by all known keys", "✗".red().bold());
                    Ok(ExitCode::from(EXIT_DENIED))
                }
            }
        }
        Command::Rotate { vehicle } => {
            let mut auth = open_authenticator(vehicle, &config, cli.perf)?;
            let report = auth.force_key_generation()?;
            print_rotation(&report);
            print_perf(&auth);
            Ok(ExitCode::SUCCESS)
        }
        Command::VerifyLog { path } => verify_log(path),
    }
}

fn open_authenticator(
    vehicle: &str,
    config: &AuthConfig,
    perf: bool,
) -> Result<Authenticator, AuthError> {
    let logger = match &config.log_dir {
        Some(dir) => Some(SecurityLogger::new(vehicle, Some(dir.clone()))?),
        None => None,
    };
    let metrics = perf.then(PerformanceMetrics::shared);

    let auth = Authenticator::with_collaborators(vehicle, config, logger, metrics)?;
    let key = match auth.public_key() {
        Ok(key) => key.short_fingerprint().bright_black(),
        Err(AuthError::CorruptKeyMaterial { .. }) => "unreadable, rotate to replace".red(),
        Err(e) => return Err(e),
    };
    println!(
        "\n{} Testing Vehicle {} (key {})",
        "🚘".bright_blue(),
        vehicle.bright_white().bold(),
        key
    );
    Ok(auth)
}

fn authenticate_once(auth: &mut Authenticator) -> Result<bool, AuthError> {
    let start = Instant::now();

    let challenge = auth.issue_challenge()?;
    println!("{} Challenge: {}", "→".cyan(), challenge.id().bright_black());

    let signature = auth.pair_key_fob().sign_challenge(&challenge.id())?;
    let outcome = auth.verify_response(&challenge.id(), &signature)?;
    let elapsed = start.elapsed();

    match outcome {
        AuthOutcome::Granted { matched, rotation } => {
            let via = match matched {
                KeyMatch::Current => String::new(),
                archived => format!(" via {}", archived),
            };
            println!(
                "{} Vehicle {} unlocked{}",
                "✅".green(),
                auth.vehicle_id().bright_white().bold(),
                via
            );
            println!(
                "{} Authentication Time: {:.6} seconds",
                "⏱".bright_black(),
                elapsed.as_secs_f64()
            );
            if let Some(report) = rotation {
                print_rotation(&report);
            }
            Ok(true)
        }
        AuthOutcome::Denied(reason) => {
            println!(
                "{} Vehicle {} denied: {}",
                "❌".red(),
                auth.vehicle_id().bright_white().bold(),
                reason.to_string().red()
            );
            Ok(false)
        }
    }
}

fn print_rotation(report: &RotationReport) {
    println!(
        "{} {} ({})",
        "🔄".bright_blue(),
        "KEY ROTATED".yellow().bold(),
        report.trigger
    );
    if let Some(old) = &report.old_fingerprint {
        println!("   • Retired key: {}", &old[..old.len().min(16)]);
    }
    println!(
        "   • Active key:  {}",
        report.new_public_key.short_fingerprint()
    );
    if let Some(entry) = &report.retired {
        println!("   • Archived as: {}", entry.file_name());
    }
    if !report.pruned.is_empty() {
        println!("   • Pruned archive entries: {:?}", report.pruned);
    }
    for failure in &report.prune_failures {
        println!("   {} Prune failed: {}", "⚠".yellow(), failure);
    }
}

fn print_perf(auth: &Authenticator) {
    if let Some(metrics) = auth.metrics()
        && let Ok(m) = metrics.lock()
    {
        m.print_stats(auth.vehicle_id());
    }
}

fn exit_for(granted: bool) -> ExitCode {
    if granted {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_DENIED)
    }
}

fn verify_log(path: &Path) -> Result<ExitCode, AuthError> {
    println!("{} Analyzing log file: {}", "→".cyan(), path.display());

    let result = verify_log_file(path)?;
    println!("{} Total log entries: {}", "→".cyan(), result.total_entries);

    if result.verified {
        println!(
            "{} {}",
            "✓".green().bold(),
            "Log integrity verified".green()
        );
        Ok(ExitCode::SUCCESS)
    } else {
        println!(
            "{} {}",
            "✗".red().bold(),
            "Log integrity FAILED".red().bold()
        );
        for issue in &result.issues {
            println!("   • {}", issue.red());
        }
        Ok(ExitCode::from(EXIT_DENIED))
    }
}

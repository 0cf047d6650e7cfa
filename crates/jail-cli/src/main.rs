//! awsjail - run untrusted Python scripts with AWS credentials in a jail
//!
//! ## Commands
//!
//! - `run`: execute a script and exit with its exit code
//! - `image`: provision the execution image and show it
//! - `policy`: show the confinement rules for a work directory

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, Level};

use jail_core::sandbox::runner::SandboxRunner;
use jail_core::{
    evaluate_access, AccessVerdict, BackendKind, CredentialSet, ExecutionRequest, FileAccess,
    JailConfig,
};

#[derive(Parser, Debug)]
#[command(name = "awsjail")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sandboxed Python execution with injected AWS credentials", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Execution backend (container or interception)
    #[arg(long, global = true, env = "AWSJAIL_BACKEND")]
    backend: Option<BackendKind>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a script in the sandbox
    Run {
        /// Script file, or `-` to read it from stdin
        script: String,

        /// Work directory shared with the script (created if missing)
        #[arg(short, long)]
        work_dir: PathBuf,

        /// Extra environment variable for the script
        #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        envs: Vec<(String, String)>,

        /// Kill the script after this many milliseconds
        #[arg(long, env = "AWSJAIL_TIMEOUT_MS")]
        timeout_ms: Option<u64>,

        /// Print the execution result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Provision the execution image and print its handle
    Image {
        /// Print the handle as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the confinement policy for a work directory
    Policy {
        /// Work directory the policy is built for
        #[arg(short, long)]
        work_dir: PathBuf,

        /// Evaluate access to this path (sandbox coordinates)
        #[arg(long)]
        check: Option<PathBuf>,

        /// Evaluate `--check` as a write instead of a read
        #[arg(long, requires = "check")]
        write: bool,

        /// Print the rules as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Parse `KEY=VALUE`; the value may itself contain `=`.
fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {s:?}")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    jail_core::init_tracing(cli.json_logs, level);

    let mut config = JailConfig::from_env().context("Invalid awsjail configuration")?;
    if let Some(backend) = cli.backend {
        config = config.with_backend(backend);
    }
    debug!(backend = %config.backend, "Configuration loaded");

    match cli.command {
        Commands::Run {
            script,
            work_dir,
            envs,
            timeout_ms,
            json,
        } => {
            if let Some(timeout_ms) = timeout_ms {
                config = config.with_timeout_ms(timeout_ms);
            }
            let code = cmd_run(&config, &script, work_dir, envs, json).await?;
            std::process::exit(code);
        }
        Commands::Image { json } => cmd_image(&config, json).await,
        Commands::Policy {
            work_dir,
            check,
            write,
            json,
        } => cmd_policy(&config, work_dir, check.as_deref(), write, json).await,
    }
}

/// Run one script; returns the exit code to terminate with.
async fn cmd_run(
    config: &JailConfig,
    script: &str,
    work_dir: PathBuf,
    envs: Vec<(String, String)>,
    json: bool,
) -> Result<i32> {
    let source = read_script(script)?;
    let runner = SandboxRunner::from_config(config).context("Failed to set up sandbox")?;

    let request = ExecutionRequest::new(work_dir, source)
        .with_credentials(CredentialSet::from_env())
        .with_envs(envs);

    let result = runner.run(request).await.context("Sandboxed execution failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", result.stdout);
        std::io::stdout().flush()?;
        eprint!("{}", result.stderr);
    }
    debug!(exit_code = result.exit_code, duration_ms = result.duration_ms, "Script finished");

    Ok(result.exit_code)
}

fn read_script(script: &str) -> Result<String> {
    if script == "-" {
        let mut source = String::new();
        std::io::stdin()
            .read_to_string(&mut source)
            .context("Failed to read script from stdin")?;
        return Ok(source);
    }
    std::fs::read_to_string(script).with_context(|| format!("Failed to read script {script}"))
}

/// Provision and show the image for the selected backend
async fn cmd_image(config: &JailConfig, json: bool) -> Result<()> {
    let runner = SandboxRunner::from_config(config).context("Failed to set up sandbox")?;
    let handle = runner
        .provisioner()
        .ensure_image()
        .await
        .context("Failed to provision execution image")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&handle)?);
        return Ok(());
    }

    println!("Backend: {}", config.backend);
    println!("Image: {}", handle);
    println!("Python: {}", handle.runtime().version);
    println!("Executable: {}", handle.runtime().executable.display());
    println!("\nRead-only prefixes:");
    for prefix in handle.read_only_prefixes() {
        println!("  {}", prefix.display());
    }
    Ok(())
}

/// Print the effective policy and optionally evaluate one access
async fn cmd_policy(
    config: &JailConfig,
    work_dir: PathBuf,
    check: Option<&Path>,
    write: bool,
    json: bool,
) -> Result<()> {
    let runner = SandboxRunner::from_config(config).context("Failed to set up sandbox")?;
    let request = ExecutionRequest::new(work_dir.clone(), "")
        .with_credentials(CredentialSet::from_env());
    let policy = runner
        .preview_policy(&request)
        .await
        .context("Failed to build confinement policy")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&policy)?);
    } else {
        println!("{:<11} {:<10} PREFIX", "ACCESS", "SCOPE");
        for rule in policy.rules() {
            println!(
                "{:<11} {:<10} {}",
                format!("{:?}", rule.access),
                format!("{:?}", rule.scope),
                rule.prefix.display()
            );
        }
    }

    let Some(path) = check else {
        return Ok(());
    };
    let access = if write {
        FileAccess::write(path)
    } else {
        FileAccess::read(path)
    };
    let cwd = runner.sandbox_work_dir(&work_dir)?;
    match evaluate_access(&policy, &access, &cwd) {
        AccessVerdict::Allowed { resolved } => {
            println!("\nALLOWED {}", resolved.display());
            Ok(())
        }
        AccessVerdict::Denied(violation) => bail!("DENIED: {violation}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("TEST_VAR=Test Value").unwrap(),
            ("TEST_VAR".to_string(), "Test Value".to_string())
        );
        assert_eq!(
            parse_key_val("URL=a=b").unwrap(),
            ("URL".to_string(), "a=b".to_string())
        );
        assert!(parse_key_val("NOVALUE").is_err());
        assert!(parse_key_val("=x").is_err());
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "awsjail",
            "--backend",
            "interception",
            "run",
            "job.py",
            "--work-dir",
            "/tmp/job",
            "--env",
            "A=1",
            "-e",
            "B=2",
        ])
        .unwrap();
        assert_eq!(cli.backend, Some(BackendKind::Interception));
        match cli.command {
            Commands::Run {
                script, envs, json, ..
            } => {
                assert_eq!(script, "job.py");
                assert_eq!(envs.len(), 2);
                assert!(!json);
            }
            other => panic!("expected Run, got {:?}", other),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_backend() {
        let parsed = Cli::try_parse_from(["awsjail", "--backend", "chroot", "image"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_policy_write_requires_check() {
        let parsed = Cli::try_parse_from(["awsjail", "policy", "--work-dir", "/tmp/x", "--write"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_read_script_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.py");
        std::fs::write(&path, "print('hi')").unwrap();
        assert_eq!(read_script(path.to_str().unwrap()).unwrap(), "print('hi')");
        assert!(read_script(dir.path().join("missing.py").to_str().unwrap()).is_err());
    }
}

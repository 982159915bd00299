// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! tether - run a workload in a short-lived Kubernetes Pod and attach to it.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tether_config::{load_from_sources, Config, ConfigSource, DefaultsSource, EnvSource};
use tether_deployer::{Session, SessionError, StderrMode, TransportBrokenError, Workload};
use tether_k8s::ConnectionManager;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod logging;

/// Exit status when the session was interrupted.
const EXIT_CANCELLED: i32 = 130;
/// Exit status when the Pod never started.
const EXIT_TIMED_OUT: i32 = 124;
const EXIT_FAILURE: i32 = 1;

#[derive(Parser, Debug)]
#[command(
	name = "tether",
	about = "Run a workload in a short-lived Kubernetes Pod and attach to it",
	version
)]
struct Cli {
	/// Session configuration file (TOML, or JSON with a .json extension)
	#[arg(short, long, env = "TETHER_CONFIG", global = true)]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Start a Pod, pipe stdin/stdout through it and exit with its status
	Run(RunArgs),
	/// Load and print the resolved configuration, secrets redacted
	Validate {
		/// Also connect to the cluster and report its version
		#[arg(long)]
		connect: bool,
	},
	/// Show version information
	Version,
}

#[derive(Args, Debug, Default)]
struct RunArgs {
	/// Override the main container's image
	#[arg(long)]
	image: Option<String>,

	/// Override the Pod's namespace
	#[arg(short, long)]
	namespace: Option<String>,

	/// Send the workload's stderr to the log instead of copying it to stderr
	#[arg(long)]
	log_stderr: bool,

	/// Command to run in the main container, replacing the template's
	#[arg(last = true)]
	command: Vec<String>,
}

impl RunArgs {
	fn workload(&self) -> Workload {
		Workload {
			image: self.image.clone(),
			command: (!self.command.is_empty()).then(|| self.command.clone()),
			args: None,
			stderr: if self.log_stderr {
				StderrMode::Log
			} else {
				StderrMode::Separate
			},
		}
	}
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
	let config = match path {
		Some(path) => tether_config::load_config_with_file(path)
			.with_context(|| format!("loading {}", path.display()))?,
		None => {
			let sources: Vec<Box<dyn ConfigSource>> =
				vec![Box::new(DefaultsSource), Box::new(EnvSource)];
			load_from_sources(sources)?
		}
	};
	Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();

	if let Command::Version = cli.command {
		println!("tether {}", env!("CARGO_PKG_VERSION"));
		return Ok(());
	}

	let mut config = load_config(cli.config.as_ref())?;
	logging::init(&config.logging);

	match cli.command {
		Command::Version => Ok(()),
		Command::Validate { connect } => validate(&config, connect).await,
		Command::Run(args) => {
			if let Some(namespace) = &args.namespace {
				config.pod.metadata.namespace = namespace.clone();
			}
			let code = run(&config, args.workload()).await;
			std::process::exit(code);
		}
	}
}

async fn validate(config: &Config, connect: bool) -> anyhow::Result<()> {
	println!("{}", serde_json::to_string_pretty(config)?);
	if connect {
		let handle = ConnectionManager::new(config.connection.clone(), config.timeouts)
			.connect()
			.await?;
		let version = handle.client().server_version().await?;
		println!("connected to {} ({version})", config.connection.host);
	}
	Ok(())
}

/// Run one session to completion and return the process exit status.
async fn run(config: &Config, workload: Workload) -> i32 {
	let cancel = CancellationToken::new();
	let signals = {
		let cancel = cancel.clone();
		tokio::spawn(async move {
			if tokio::signal::ctrl_c().await.is_ok() {
				info!("interrupt received, cancelling session");
				cancel.cancel();
			}
		})
	};

	let result = attached(config, workload, cancel).await;
	signals.abort();

	match result {
		Ok(code) => code,
		Err(err) => {
			eprintln!("tether: {err}");
			exit_code(&err)
		}
	}
}

async fn attached(
	config: &Config,
	workload: Workload,
	cancel: CancellationToken,
) -> Result<i32, SessionError> {
	let separate_stderr = workload.stderr == StderrMode::Separate;
	let mut session = Session::run(config, workload, cancel).await?;
	let Some(mut channel) = session.take_channel() else {
		return Err(SessionError::Cancelled {
			phase: session.close().await,
		});
	};

	let stderr = if separate_stderr {
		channel.take_stderr().map(|mut stderr| {
			tokio::spawn(async move {
				let mut out = tokio::io::stderr();
				if let Err(e) = tokio::io::copy(&mut stderr, &mut out).await {
					debug!(error = %e, "workload stderr ended");
				}
			})
		})
	} else {
		None
	};

	let (mut reader, mut writer) = channel.into_split();
	let input = tokio::spawn(async move {
		let mut stdin = tokio::io::stdin();
		match tokio::io::copy(&mut stdin, &mut writer).await {
			Ok(_) => {
				if let Err(e) = writer.shutdown().await {
					debug!(error = %e, "closing workload stdin");
				}
			}
			Err(e) => debug!(error = %e, "forwarding stdin stopped"),
		}
	});

	let mut stdout = BufWriter::new(tokio::io::stdout());
	let copied = tokio::io::copy(&mut reader, &mut stdout).await;
	if let Err(e) = stdout.flush().await {
		warn!(error = %e, "flushing stdout");
	}
	input.abort();
	if let Some(stderr) = stderr {
		// The stderr stream ends with the container; do not outlive a failed delete.
		if tokio::time::timeout(config.timeouts.delete_grace, stderr).await.is_err() {
			debug!("gave up waiting for workload stderr");
		}
	}

	if let Err(e) = copied {
		let phase = session.close().await;
		debug!(%phase, "output stream failed");
		return Err(TransportBrokenError::from(e).into());
	}

	let outcome = session.finish().await?;
	info!(
		pod = %outcome.pod,
		phase = %outcome.phase,
		exit_code = ?outcome.exit_code,
		"session finished"
	);
	Ok(outcome.exit_code.unwrap_or(0))
}

fn exit_code(err: &SessionError) -> i32 {
	match err {
		SessionError::PodFailed {
			exit_code: Some(code),
			..
		} if *code != 0 => *code,
		SessionError::PodTimedOut { .. } => EXIT_TIMED_OUT,
		SessionError::Cancelled { .. } => EXIT_CANCELLED,
		_ => EXIT_FAILURE,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tether_deployer::{Diagnostics, Phase};

	fn diagnostics() -> Diagnostics {
		Diagnostics {
			pod: "tether-plugin-00001".to_string(),
			namespace: "default".to_string(),
			last_phase: Phase::Failed,
			containers: Vec::new(),
			reason: None,
		}
	}

	#[test]
	fn test_run_args_parse_trailing_command() {
		let cli = Cli::try_parse_from([
			"tether", "run", "--image", "alpine", "-n", "jobs", "--", "sh", "-c", "echo hi",
		])
		.unwrap();
		let Command::Run(args) = cli.command else {
			panic!("expected run");
		};
		assert_eq!(args.namespace.as_deref(), Some("jobs"));
		let workload = args.workload();
		assert_eq!(workload.image.as_deref(), Some("alpine"));
		assert_eq!(
			workload.command,
			Some(vec!["sh".to_string(), "-c".to_string(), "echo hi".to_string()])
		);
		assert_eq!(workload.stderr, StderrMode::Separate);
	}

	#[test]
	fn test_run_without_command_keeps_template() {
		let workload = RunArgs {
			log_stderr: true,
			..Default::default()
		}
		.workload();
		assert_eq!(workload.command, None);
		assert_eq!(workload.stderr, StderrMode::Log);
	}

	#[test]
	fn test_exit_code_follows_workload() {
		let failed = SessionError::PodFailed {
			exit_code: Some(3),
			diagnostics: diagnostics(),
		};
		assert_eq!(exit_code(&failed), 3);

		let unknown = SessionError::PodFailed {
			exit_code: None,
			diagnostics: diagnostics(),
		};
		assert_eq!(exit_code(&unknown), EXIT_FAILURE);

		let cancelled = SessionError::Cancelled {
			phase: Phase::Running,
		};
		assert_eq!(exit_code(&cancelled), EXIT_CANCELLED);
	}

	#[test]
	fn test_load_config_from_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("session.toml");
		std::fs::write(
			&path,
			"[[podTemplate.spec.containers]]\nname = \"main\"\nimage = \"busybox\"\n",
		)
		.unwrap();
		let config = load_config(Some(&path)).unwrap();
		assert_eq!(config.pod.spec.containers[0].name, "main");
	}

	#[test]
	fn test_load_config_missing_file_names_path() {
		let err = load_config(Some(&PathBuf::from("/nonexistent/session.toml"))).unwrap_err();
		assert!(format!("{err:#}").contains("/nonexistent/session.toml"));
	}
}

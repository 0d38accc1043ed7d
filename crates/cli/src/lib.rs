#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `exodus_cli` is the front end of exodus-rsync: it parses the rsync-style
//! command line, selects a gateway environment for the destination, and
//! drives the walk → upload → publish pipeline. Invocations that fall
//! outside the supported surface are handed to the real rsync binary so the
//! program remains a drop-in replacement.
//!
//! # Design
//!
//! [`run`] is the testable entry point: it takes the raw argv plus a
//! [`GatewayFactory`], so tests substitute an in-memory gateway while the
//! binary wires in [`HttpGatewayFactory`]. The orchestration itself lives
//! in the `sync` module; `rsync` holds the native fallback and `args` the
//! argument surface.

use std::ffi::OsString;
use std::process::ExitCode;

use exodus_conf::{Config, Environment, RsyncMode};
use exodus_gw::{CancelToken, Client, ClientBuilder};

pub mod args;
mod log;
mod rsync;
mod sync;

pub use args::{Arguments, IgnoredConfig};
pub use sync::SyncError;

use sync::SyncCommand;

/// Constructs gateway clients for a selected environment.
///
/// The seam exists so the orchestrator can be exercised end-to-end against
/// an in-memory gateway.
pub trait GatewayFactory {
    /// Builds a client for `environment`.
    fn new_client(
        &self,
        config: &Config,
        environment: &Environment,
        cancel: CancelToken,
    ) -> Result<Box<dyn Client>, SyncError>;
}

/// Production factory speaking HTTP to the configured gateway.
pub struct HttpGatewayFactory;

impl GatewayFactory for HttpGatewayFactory {
    fn new_client(
        &self,
        config: &Config,
        environment: &Environment,
        cancel: CancelToken,
    ) -> Result<Box<dyn Client>, SyncError> {
        let url = config.gateway_url(environment)?;
        Ok(Box::new(
            ClientBuilder::new(url, environment.gwenv.clone())
                .cancel_token(cancel)
                .build(),
        ))
    }
}

/// Entry point used by the binary.
pub fn run_with<I, S>(argv: I) -> ExitCode
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    let argv: Vec<OsString> = argv.into_iter().map(Into::into).collect();
    let status = run(argv, &HttpGatewayFactory);
    ExitCode::from(u8::try_from(status).unwrap_or(1))
}

/// Runs one invocation and returns the process exit status.
///
/// `argv` includes the program name. Fallback paths replace the current
/// process with the native rsync and therefore only return on exec failure.
pub fn run(argv: Vec<OsString>, gateway: &dyn GatewayFactory) -> i32 {
    let arguments = match args::parse_arguments(&argv) {
        Ok(arguments) => arguments,
        Err(error)
            if matches!(
                error.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            ) =>
        {
            let _ = error.print();
            return 0;
        }
        Err(error) => {
            // Arguments outside the supported subset belong to the real rsync.
            log::init_logging(0);
            tracing::info!("unsupported invocation ({error}); delegating to native rsync");
            let failure = rsync::exec_native(&argv[1..]);
            tracing::error!("failed to exec native rsync: {failure}");
            return 1;
        }
    };

    log::init_logging(arguments.verbose);

    let config = match &arguments.conf_path {
        Some(path) => Config::from_path(std::path::Path::new(path)),
        None => Config::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(error) => {
            tracing::error!("{error}");
            return 1;
        }
    };

    let Some((environment, _)) = config.environment_for(&arguments.dest) else {
        tracing::info!(
            "no environment matches destination '{}'; delegating to native rsync",
            arguments.dest
        );
        let failure = rsync::exec_native(&argv[1..]);
        tracing::error!("failed to exec native rsync: {failure}");
        return 1;
    };

    match environment.rsyncmode {
        RsyncMode::Rsync => {
            let failure = rsync::exec_native(&arguments.to_rsync_argv());
            tracing::error!("failed to exec native rsync: {failure}");
            return 1;
        }
        RsyncMode::Mixed => {
            match rsync::run_native(&arguments.to_rsync_argv()) {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    tracing::error!("{}", SyncError::RsyncFailed { status });
                    return 1;
                }
                Err(error) => {
                    tracing::error!("{}", SyncError::RsyncSpawn(error));
                    return 1;
                }
            }
        }
        RsyncMode::Exodus => {}
    }

    let cancel = CancelToken::new();
    #[cfg(unix)]
    if let Err(error) = signal_hook::flag::register(signal_hook::consts::SIGINT, cancel.as_flag())
    {
        tracing::warn!("failed to install SIGINT handler: {error}");
    }

    let command = SyncCommand {
        arguments: &arguments,
        config: &config,
        gateway,
        cancel: &cancel,
    };
    match command.run() {
        Ok(()) => 0,
        Err(error) => {
            tracing::error!("{error}");
            1
        }
    }
}

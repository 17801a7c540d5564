//! CLI mode for lumi-dl - command-line front end for a single transfer.

mod progress;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::{
    AppConfig, DownloadConfig, ReleaseClient, TransferEvent, TransferHandle, TransferRequest,
    start_transfer,
};

use progress::{make_progress_bar, print_failed, print_finished, print_release};

/// Parsed command-line arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliArgs {
    /// URL to download.
    pub url: Option<String>,
    /// `owner/repo` whose latest release should be downloaded.
    pub latest: Option<String>,
    /// Destination file.
    pub output: Option<PathBuf>,
    /// Install directory for release downloads.
    pub dir: Option<PathBuf>,
    /// Expected SHA-256 digest.
    pub sha256: Option<String>,
    /// Version tag enabling the pre-flight check.
    pub tag: Option<String>,
    /// Attempt budget.
    pub attempts: Option<u32>,
    /// Config file path.
    pub config: Option<PathBuf>,
    /// Show usage and exit.
    pub help: bool,
}

fn take_value(args: &[String], i: &mut usize, flag: &str) -> Result<String, String> {
    *i += 1;
    args.get(*i)
        .cloned()
        .ok_or_else(|| format!("{flag} requires a value"))
}

/// Parses arguments (without the program name).
///
/// # Errors
///
/// Returns a message describing the first invalid argument.
pub fn parse_args<I>(args: I) -> Result<CliArgs, String>
where
    I: IntoIterator<Item = String>,
{
    let args: Vec<String> = args.into_iter().collect();
    let mut parsed = CliArgs::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-o" | "--output" => parsed.output = Some(take_value(&args, &mut i, "--output")?.into()),
            "-d" | "--dir" => parsed.dir = Some(take_value(&args, &mut i, "--dir")?.into()),
            "--sha256" => parsed.sha256 = Some(take_value(&args, &mut i, "--sha256")?),
            "--tag" => parsed.tag = Some(take_value(&args, &mut i, "--tag")?),
            "--latest" => parsed.latest = Some(take_value(&args, &mut i, "--latest")?),
            "-c" | "--config" => parsed.config = Some(take_value(&args, &mut i, "--config")?.into()),
            "-a" | "--attempts" => {
                let value = take_value(&args, &mut i, "--attempts")?;
                let attempts: u32 = value
                    .parse()
                    .map_err(|_| format!("invalid attempt count: {value}"))?;
                if attempts == 0 {
                    return Err("--attempts must be at least 1".to_string());
                }
                parsed.attempts = Some(attempts);
            }
            "-h" | "--help" => parsed.help = true,
            arg if !arg.starts_with('-') => {
                if parsed.url.is_some() {
                    return Err(format!("unexpected argument: {arg}"));
                }
                parsed.url = Some(arg.to_string());
            }
            other => return Err(format!("unknown option: {other}")),
        }
        i += 1;
    }

    if parsed.url.is_some() && parsed.latest.is_some() {
        return Err("give either a URL or --latest, not both".to_string());
    }
    Ok(parsed)
}

/// Derives a file name from the last path segment of a URL.
#[must_use]
pub fn file_name_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty() && !name.contains(':'))
        .unwrap_or("download.bin")
        .to_string()
}

fn print_usage() {
    eprintln!("Usage: lumi-dl [OPTIONS] <url>");
    eprintln!("       lumi-dl [OPTIONS] --latest <owner/repo>");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -o, --output <path>     Destination file (default: name from the URL)");
    eprintln!("  -d, --dir <path>        Install directory for --latest downloads");
    eprintln!("      --sha256 <hex>      Expected SHA-256 digest");
    eprintln!("      --tag <tag>         Version tag; re-checks an existing file before resuming");
    eprintln!("  -a, --attempts <n>      Maximum attempts (default: 5)");
    eprintln!("  -c, --config <path>     Config file (default: {})", AppConfig::default_path().display());
    eprintln!("  -h, --help              Show this help");
    eprintln!();
    eprintln!("Set RUST_LOG=info (or debug) for detailed logs.");
}

/// Applies digest, tag and attempt overrides from the command line.
fn apply_overrides(mut request: TransferRequest, args: &CliArgs, config: &DownloadConfig) -> TransferRequest {
    if let Some(digest) = &args.sha256 {
        request = request.with_expected_digest(digest.clone());
    }
    if let Some(tag) = &args.tag {
        request = request.with_version_tag(tag.clone());
    }
    request.with_max_attempts(args.attempts.unwrap_or(config.max_attempts))
}

/// Builds the transfer request, looking up the release when `--latest` is given.
async fn resolve_request(args: &CliArgs, config: &AppConfig) -> crate::Result<TransferRequest> {
    if let Some(url) = &args.url {
        let output = args
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(file_name_from_url(url)));
        let request = TransferRequest::new(url.clone(), output);
        return Ok(apply_overrides(request, args, &config.download));
    }

    let mut release_config = config.release.clone();
    if let Some(spec) = &args.latest {
        release_config = release_config
            .with_repo_spec(spec)
            .ok_or_else(|| crate::Error::Config(format!("expected owner/repo, got {spec}")))?;
    }

    let client = ReleaseClient::new(release_config, &config.download.user_agent)?;
    let (release, asset) = client.latest_asset().await?;
    print_release(&release.info(), &asset.name, asset.size);

    let destination = args.output.clone().unwrap_or_else(|| {
        let dir = args.dir.clone().unwrap_or_else(|| config.paths.install_dir.clone());
        let name = client
            .config()
            .artifact_name
            .clone()
            .unwrap_or_else(|| asset.name.clone());
        dir.join(name)
    });

    let request = release.transfer_request(&asset, destination);
    Ok(apply_overrides(request, args, &config.download))
}

/// Starts the transfer and renders its events until the terminal one.
///
/// Returns true if the file was downloaded.
async fn run_transfer(request: TransferRequest, config: DownloadConfig) -> crate::Result<bool> {
    let name = request
        .destination_path
        .file_name()
        .map_or_else(|| request.source_url.clone(), |n| n.to_string_lossy().into_owned());
    log::info!(
        "Downloading {} to {}",
        request.source_url,
        request.destination_path.display()
    );

    let (handle, events) = start_transfer(request, config)?;
    render_events(handle, events, &name, tokio::signal::ctrl_c()).await
}

/// Renders events until the terminal one, cancelling the transfer once when
/// `interrupt` completes.
async fn render_events<I>(
    handle: TransferHandle,
    mut events: UnboundedReceiver<TransferEvent>,
    name: &str,
    interrupt: I,
) -> crate::Result<bool>
where
    I: Future,
{
    let started = Instant::now();
    let bar = make_progress_bar(name);
    let mut cancelled = false;
    let mut succeeded = false;
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    TransferEvent::Progress { percentage, speed } => {
                        bar.set_position(u64::from(percentage));
                        bar.set_message(speed);
                    }
                    TransferEvent::Finished { path } => {
                        bar.finish_and_clear();
                        print_finished(&path, started.elapsed());
                        succeeded = true;
                        break;
                    }
                    TransferEvent::Error { message } => {
                        bar.abandon();
                        print_failed(&message);
                        break;
                    }
                }
            }
            _ = &mut interrupt, if !cancelled => {
                log::info!("Received SIGINT, cancelling download");
                cancelled = true;
                handle.cancel();
            }
        }
    }

    handle.join().await?;
    Ok(succeeded)
}

/// Runs the CLI with the process arguments.
///
/// # Errors
///
/// Returns an error if configuration loading, release lookup, or worker
/// startup fails. Transfer failures are reported and mapped to a failing exit code.
pub async fn run() -> crate::Result<ExitCode> {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("Error: {message}");
            print_usage();
            return Ok(ExitCode::from(2));
        }
    };

    if args.help || (args.url.is_none() && args.latest.is_none() && args.config.is_none()) {
        print_usage();
        return Ok(if args.help {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(2)
        });
    }

    let config_path = args.config.clone().unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load_from(&config_path)?;

    let request = resolve_request(&args, &config).await?;
    let ok = run_transfer(request, config.download).await?;
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

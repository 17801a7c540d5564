//! Progress bar and result reporting for CLI downloads.

use std::path::Path;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::{ReleaseInfo, format_bytes, format_duration};

const SEPARATOR: &str = "────────────────────────────────────────────────────────────";

/// Creates a percentage progress bar for a single transfer.
pub fn make_progress_bar(name: &str) -> ProgressBar {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} [{bar:40.cyan/blue}] {pos:>3}% @ {msg} - {prefix}",
        )
        .expect("progress template is valid")
        .progress_chars("━━╌"),
    );
    bar.set_prefix(name.to_string());
    bar.set_message("starting");
    bar.enable_steady_tick(Duration::from_millis(250));
    bar
}

/// Prints what is about to be downloaded from a release.
pub fn print_release(info: &ReleaseInfo, asset_name: &str, asset_size: u64) {
    println!("\n{SEPARATOR}");
    println!("Release:    {} ({})", info.name, info.version);
    if let Some(published) = info.published_at {
        println!("Published:  {}", published.format("%Y-%m-%d"));
    }
    println!("Asset:      {asset_name} ({})", format_bytes(asset_size));
    println!("Downloads:  {}", info.download_count);
    println!("{SEPARATOR}\n");
}

/// Prints the line shown after a successful transfer.
pub fn print_finished(path: &Path, elapsed: Duration) {
    let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    println!(
        "{} {} ({}) in {}",
        style("✓").green().bold(),
        path.display(),
        format_bytes(size),
        format_duration(elapsed)
    );
}

/// Prints the line shown after a failed transfer.
pub fn print_failed(message: &str) {
    eprintln!("{} {message}", style("✗").red().bold());
}

//! Progress bars and summary reporting for the `rdl` command.

use std::sync::{Mutex, MutexGuard, PoisonError};

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::{
    ChecksumStatus, DownloadPlan, DownloadProgress, DownloadReport, Error, ProbeReport,
    ProgressFrame, format_bytes, format_duration, format_rate,
};

const SEPARATOR: &str = "────────────────────────────────────────────────────────────";

/// Creates a progress bar for one chunk.
fn make_chunk_bar(index: usize, size: u64) -> ProgressBar {
    let bar = ProgressBar::new(size);
    bar.set_style(
        ProgressStyle::with_template(
            "{prefix:>9} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
        )
        .expect("progress template is valid")
        .progress_chars("━━╌"),
    );
    bar.set_prefix(format!("Chunk {}", index + 1));
    bar
}

/// Creates a progress bar for the whole resource.
fn make_total_bar(size: u64) -> ProgressBar {
    let bar = ProgressBar::new(size);
    bar.set_style(
        ProgressStyle::with_template(
            "{prefix:>9} [{bar:40.green/white}] {bytes}/{total_bytes} {msg}",
        )
        .expect("template valid")
        .progress_chars("━━╌"),
    );
    bar.set_prefix("Total");
    bar
}

#[derive(Default)]
struct Bars {
    chunks: Vec<ProgressBar>,
    total: Option<ProgressBar>,
}

/// Renders aggregator frames as an `indicatif` multi-bar.
pub struct BarProgress {
    multi: MultiProgress,
    bars: Mutex<Bars>,
}

impl BarProgress {
    /// Creates the renderer. A quiet renderer draws nothing.
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        let multi = if quiet {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        } else {
            MultiProgress::new()
        };
        Self {
            multi,
            bars: Mutex::new(Bars::default()),
        }
    }

    fn bars(&self) -> MutexGuard<'_, Bars> {
        self.bars.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Leaves the bars on screen at their last position.
    pub fn abandon(&self) {
        let bars = self.bars();
        for bar in bars.chunks.iter().chain(bars.total.iter()) {
            if !bar.is_finished() {
                bar.abandon();
            }
        }
    }
}

impl DownloadProgress for BarProgress {
    fn on_probe(&self, report: &ProbeReport) {
        let _ = self.multi.println(format!(
            "Resource size {} ({:?} range support)",
            format_bytes(report.total_size),
            report.range_support
        ));
        if let Some(redirect) = report.final_redirect() {
            let _ = self.multi.println(format!("Redirected to {}", redirect.url));
        }
    }

    fn on_plan(&self, plan: &DownloadPlan) {
        let mut bars = self.bars();
        let chunks: Vec<ProgressBar> = plan
            .chunks()
            .iter()
            .map(|c| self.multi.add(make_chunk_bar(c.index, c.len)))
            .collect();
        bars.chunks = chunks;
        bars.total = Some(self.multi.add(make_total_bar(plan.total_size())));
    }

    fn on_frame(&self, frame: &ProgressFrame) {
        let bars = self.bars();
        for line in &frame.chunks {
            if let Some(bar) = bars.chunks.get(line.index) {
                bar.set_position(line.bytes_read);
                bar.set_message(format!("@ {} {}", format_rate(line.rate), line.state.label()));
            }
        }
        if let Some(total) = &bars.total {
            total.set_position(frame.bytes_read);
            total.set_message(format!("@ {}", format_rate(frame.rate)));
        }
    }

    fn on_chunk_retry(&self, chunk: usize, attempt: u32, error: &Error) {
        let _ = self.multi.println(format!(
            "{} chunk {} retry {attempt}: {error}",
            style("warning:").yellow(),
            chunk + 1
        ));
    }

    fn on_merge_chunk(&self, chunk: usize, _bytes: u64) {
        if let Some(bar) = self.bars().chunks.get(chunk) {
            bar.finish_and_clear();
        }
    }

    fn on_complete(&self, _report: &DownloadReport) {
        let bars = self.bars();
        for bar in &bars.chunks {
            bar.finish_and_clear();
        }
        if let Some(total) = &bars.total {
            total.finish();
        }
    }
}

/// Prints a summary of the finished download.
pub fn print_summary(report: &DownloadReport) {
    let stats = &report.stats;

    println!("\n{SEPARATOR}");
    println!("Download Summary");
    println!("{SEPARATOR}");
    println!("  File:              {}", report.path.display());
    println!("  Size:              {}", format_bytes(report.size));
    println!("  Chunks:            {}", report.chunks);
    println!("  Total time:        {}", format_duration(stats.elapsed));
    println!("  Average speed:     {}/s", format_bytes(stats.average_speed));
    println!("  Peak speed:        {}/s", format_bytes(stats.peak_speed));
    if let Some(ramp) = stats.ramp_up_time {
        println!("  Ramp-up:           {} to 80% of peak", format_duration(ramp));
    }
    match &report.checksum {
        ChecksumStatus::NotProvided => println!("  MD5:               not provided"),
        ChecksumStatus::Match { digest } => println!("  MD5:               {digest} (ok)"),
        ChecksumStatus::Mismatch { .. } => println!("  MD5:               mismatch"),
    }
    println!("{SEPARATOR}");
}

/// Prints the checksum warning for a finished download that failed verification.
pub fn print_checksum_warning(report: &DownloadReport) {
    if let ChecksumStatus::Mismatch { expected, actual } = &report.checksum {
        eprintln!(
            "{} MD5 mismatch for {}: expected {expected}, got {actual}",
            style("warning:").yellow().bold(),
            report.path.display()
        );
    }
}

/// Prints a fatal error with the phase it came from.
pub fn print_error(error: &Error) {
    eprintln!(
        "{} {} failed: {error}",
        style("error:").red().bold(),
        error.phase()
    );
}

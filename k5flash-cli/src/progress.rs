//! Console rendering of session progress.

use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use k5flash::{Event, Reporter};

/// Build the block progress bar (hidden when quiet or not on a terminal).
pub(crate) fn block_bar(quiet: bool, fancy: bool) -> ProgressBar {
    if quiet || !fancy {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(0);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb
}

/// Prints session events to stderr and drives a progress bar.
pub(crate) struct ConsoleReporter {
    pb: ProgressBar,
    quiet: bool,
    beacons: usize,
}

impl ConsoleReporter {
    pub(crate) fn new(pb: ProgressBar, quiet: bool) -> Self {
        Self {
            pb,
            quiet,
            beacons: 0,
        }
    }

    fn line(&self, text: String) {
        if self.quiet {
            return;
        }
        if self.pb.is_hidden() {
            eprintln!("{text}");
        } else {
            self.pb.println(text);
        }
    }
}

impl Reporter for ConsoleReporter {
    fn report(&mut self, event: &Event) {
        match event {
            Event::Status(message) => self.line(format!("{} {message}", style("→").cyan())),
            Event::BlockStarted {
                index,
                count,
                address,
                len,
            } => {
                if *index == 0 {
                    self.pb.reset();
                    self.pb.set_length(*count as u64);
                }
                self.pb
                    .set_message(format!("{address:04x}...{:04x}", address + len));
            },
            Event::BlockDone { index, .. } => {
                self.pb.set_position(*index as u64 + 1);
            },
            Event::BeaconAbsorbed => {
                self.beacons += 1;
                self.pb.set_message(format!("[beacon x{}]", self.beacons));
            },
            Event::Finished => {
                self.pb.finish_with_message("complete");
                self.line(format!("{} OK", style("✓").green()));
            },
        }
    }
}

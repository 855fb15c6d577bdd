/// Progress and result of one downloader run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloaderStatistics {
    /// Versions requested in this stage.
    pub packages_total: usize,
    pub packages_downloaded: usize,
    pub packages_already_in_cache: usize,
    pub packages_failed: usize,
    pub progress_step: usize,
    pub next_progress_update: usize,
    emitter_blocked: bool,
}

impl Default for DownloaderStatistics {
    fn default() -> Self {
        Self {
            packages_total: 0,
            packages_downloaded: 0,
            packages_already_in_cache: 0,
            packages_failed: 0,
            progress_step: usize::MAX,
            next_progress_update: usize::MAX,
            emitter_blocked: true,
        }
    }
}

impl DownloaderStatistics {
    /// Fresh counters for a stage of `total` versions. Progress is reported
    /// every `10^(ceil(log10(total)) - 2)` processed versions.
    pub fn for_total(total: usize) -> Self {
        let magnitude = (total.max(1) as f64).log10().ceil() as i32 - 2;
        let step = 10f64.powi(magnitude).max(1.0) as usize;
        Self {
            packages_total: total,
            progress_step: step,
            next_progress_update: step,
            ..Self::default()
        }
    }

    pub fn processed(&self) -> usize {
        self.packages_downloaded + self.packages_already_in_cache + self.packages_failed
    }

    /// The progress line to show now, if any. Silent until something was
    /// downloaded since the last line.
    pub fn progress_update(&mut self) -> Option<String> {
        if self.packages_downloaded == 0 {
            return None;
        }
        let processed = self.processed();
        if self.next_progress_update > processed {
            return None;
        }
        self.next_progress_update = processed.saturating_add(self.progress_step);
        if self.emitter_blocked {
            return None;
        }
        self.block();
        let percent = (processed as f64 / self.packages_total.max(1) as f64 * 10000.0).round() / 100.0;
        Some(format!("{} of {} ({}%) processed.", processed, self.packages_total, percent))
    }

    pub fn block(&mut self) {
        self.emitter_blocked = true;
    }

    pub fn unblock(&mut self) {
        self.emitter_blocked = false;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModulesGeneratorStatistics {
    pub links_created: usize,
    pub links_created_bin: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_step_scales_logarithmically() {
        assert_eq!(DownloaderStatistics::for_total(1).progress_step, 1);
        assert_eq!(DownloaderStatistics::for_total(99).progress_step, 1);
        assert_eq!(DownloaderStatistics::for_total(999).progress_step, 10);
        assert_eq!(DownloaderStatistics::for_total(4321).progress_step, 100);
    }

    #[test]
    fn progress_is_throttled_until_unblocked() {
        let mut stats = DownloaderStatistics::for_total(10);
        stats.packages_already_in_cache = 3;
        assert_eq!(stats.progress_update(), None);
        stats.unblock();
        stats.packages_downloaded = 1;
        assert_eq!(stats.progress_update().as_deref(), Some("4 of 10 (40%) processed."));
        stats.packages_downloaded = 2;
        assert_eq!(stats.progress_update(), None);
    }
}

//! Terminal progress rendering: one spinner row per conversion slot plus an
//! overall counter, driven through the engine's `SlotUi` interface.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use medex_core::{name_scroller, SlotUi};
use medex_model::MediaKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

const NAME_WIDTH: usize = 28;

struct RowState {
    name: String,
    tick: usize,
    total: Option<f64>,
}

struct SlotRow {
    bar: ProgressBar,
    state: Mutex<RowState>,
}

pub struct ProgressUi {
    rows: Vec<SlotRow>,
    overall: ProgressBar,
    settled: AtomicU64,
    // Held so the draw target stays alive as long as the UI does.
    _multi: MultiProgress,
}

impl ProgressUi {
    pub fn new(slots: usize) -> Self {
        let multi = MultiProgress::new();
        let row_style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ");
        let rows = (0..slots)
            .map(|_| {
                let bar = multi.add(ProgressBar::new_spinner());
                bar.set_style(row_style.clone());
                bar.set_message("idle");
                bar.enable_steady_tick(Duration::from_millis(120));
                SlotRow {
                    bar,
                    state: Mutex::new(RowState {
                        name: String::new(),
                        tick: 0,
                        total: None,
                    }),
                }
            })
            .collect();

        let overall = multi.add(ProgressBar::new_spinner());
        overall.set_style(
            ProgressStyle::with_template("  {msg}")
                .unwrap()
                .tick_chars("  "),
        );
        overall.set_message("0 files settled");

        ProgressUi {
            rows,
            overall,
            settled: AtomicU64::new(0),
            _multi: multi,
        }
    }

    fn render(&self, slot: usize, kind: Option<MediaKind>) {
        let Some(row) = self.rows.get(slot) else {
            return;
        };
        let state = row.state.lock().unwrap();
        let scrolled = name_scroller(&state.name, NAME_WIDTH, state.tick);
        let label = kind.map(|k| k.as_str()).unwrap_or("busy");
        row.bar.set_message(format!("{label:5} {scrolled}"));
    }

    pub fn finish(&self) {
        for row in &self.rows {
            row.bar.finish_and_clear();
        }
        self.overall.finish_and_clear();
    }
}

impl SlotUi for ProgressUi {
    fn attach(&self, slot: usize, kind: MediaKind, name: &str) {
        if let Some(row) = self.rows.get(slot) {
            let mut state = row.state.lock().unwrap();
            state.name = name.to_string();
            state.tick = 0;
            state.total = None;
        }
        self.render(slot, Some(kind));
    }

    fn set_progress_total(&self, slot: usize, total: f64) {
        if let Some(row) = self.rows.get(slot) {
            row.state.lock().unwrap().total = Some(total);
        }
    }

    fn set_progress_value(&self, slot: usize, value: f64) {
        let Some(row) = self.rows.get(slot) else {
            return;
        };
        let (name, tick, total) = {
            let mut state = row.state.lock().unwrap();
            state.tick += 1;
            (state.name.clone(), state.tick, state.total)
        };
        let scrolled = name_scroller(&name, NAME_WIDTH, tick);
        match total {
            Some(total) if total > 0.0 => {
                let percent = (value / total * 100.0).clamp(0.0, 100.0);
                row.bar.set_message(format!("video {scrolled} {percent:5.1}%"));
            }
            _ => row.bar.set_message(format!("video {scrolled}")),
        }
    }

    fn detach(&self, slot: usize) {
        if let Some(row) = self.rows.get(slot) {
            row.bar.set_message("idle");
        }
    }

    fn advance_overall(&self) {
        let settled = self.settled.fetch_add(1, Ordering::Relaxed) + 1;
        self.overall.set_message(format!("{settled} files settled"));
    }
}

// Copyright 2024 The Dx9mt Developers.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Process logger behind the `log` facade.
//!
//! Lines are formatted `[HH:MM:SS] [tid=NNNN] <target>: <message>` and
//! appended to the file named by `DX9MT_LOG_PATH`, falling back to stderr.
//! The hosted program has no console, so everything the frontend wants a
//! human to see goes through here.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use log::{Level, LevelFilter, Log, Metadata, Record};

use mutex_lock;

/// Environment variable redirecting the log to a file.
pub const LOG_PATH_ENV: &'static str = "DX9MT_LOG_PATH";

static NEXT_THREAD_ID: AtomicU32 = AtomicU32::new(0);

thread_local! {
    static THREAD_ID: u32 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed) + 1;
}

enum Sink {
    Stderr,
    File(Mutex<std::fs::File>),
}

struct DxLogger {
    sink: Sink,
}

impl DxLogger {
    fn open() -> DxLogger {
        let sink = match std::env::var(LOG_PATH_ENV) {
            Ok(ref path) if !path.is_empty() => {
                match OpenOptions::new().create(true).append(true).open(path) {
                    Ok(file) => Sink::File(Mutex::new(file)),
                    Err(_) => Sink::Stderr,
                }
            }
            _ => Sink::Stderr,
        };
        DxLogger { sink: sink }
    }

    fn write_line(&self, line: &str) {
        let result = match self.sink {
            Sink::Stderr => {
                let stderr = io::stderr();
                let mut guard = stderr.lock();
                writeln!(guard, "{}", line).and_then(|_| guard.flush())
            }
            Sink::File(ref file) => {
                let mut guard = mutex_lock(file);
                writeln!(guard, "{}", line).and_then(|_| guard.flush())
            }
        };
        // A dead log sink must never take the render thread down with it.
        let _ = result;
    }
}

fn timestamp() -> String {
    time::strftime("%H:%M:%S", &time::now()).unwrap_or_else(|_| String::from("00:00:00"))
}

impl Log for DxLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let tid = THREAD_ID.with(|id| *id);
        let line = match record.level() {
            Level::Error | Level::Warn => format!(
                "[{}] [tid={:04}] {}: {}: {}",
                timestamp(),
                tid,
                record.target(),
                record.level(),
                record.args()
            ),
            _ => format!(
                "[{}] [tid={:04}] {}: {}",
                timestamp(),
                tid,
                record.target(),
                record.args()
            ),
        };
        self.write_line(&line);
    }

    fn flush(&self) {}
}

/// Install the process logger. Idempotent; loses the race gracefully when a
/// test harness already installed one (e.g. `env_logger`).
pub fn init() {
    let logger = Box::new(DxLogger::open());
    if log::set_boxed_logger(logger).is_ok() {
        log::set_max_level(LevelFilter::Trace);
        info!("log initialized");
    }
}

/// Sampled logging for high-frequency paths: the first `first_n` hits pass,
/// then every `every_n`-th.
pub fn should_log_sample(counter: &AtomicU32, first_n: u32, every_n: u32) -> bool {
    let count = counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
    if count <= first_n {
        return true;
    }
    every_n > 0 && count % every_n == 0
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::should_log_sample;

    #[test]
    fn sampling_passes_head_then_strides() {
        let counter = AtomicU32::new(0);
        let decisions: Vec<bool> =
            (0..12).map(|_| should_log_sample(&counter, 4, 4)).collect();
        assert_eq!(
            decisions,
            vec![true, true, true, true, false, false, false, true, false, false, false, true]
        );
    }

    #[test]
    fn zero_stride_only_passes_head() {
        let counter = AtomicU32::new(0);
        let head: Vec<bool> = (0..6).map(|_| should_log_sample(&counter, 2, 0)).collect();
        assert_eq!(head, vec![true, true, false, false, false, false]);
    }
}

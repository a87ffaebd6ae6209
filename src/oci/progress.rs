//! A cosmetic terminal spinner for OCI extraction, per spec §5.3: runs on
//! its own thread, started before the operation and stopped on every exit
//! path (success, error, or panic via the `Drop` guard below). It never
//! observes or mutates domain state — grounded on nothing in the teacher
//! (no interactive terminal output at the library layer), so this is the
//! minimal primitive that satisfies the requirement without inventing a
//! larger async task-management layer.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

const FRAMES: &[char] = &['|', '/', '-', '\\'];

pub struct Spinner {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Spinner {
    pub fn start(message: &str) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let message = message.to_string();

        let handle = std::thread::spawn(move || {
            let mut frame = 0usize;
            while flag.load(Ordering::Relaxed) {
                eprint!("\r{message} {}", FRAMES[frame % FRAMES.len()]);
                let _ = std::io::stderr().flush();
                frame = frame.wrapping_add(1);
                std::thread::sleep(Duration::from_millis(80));
            }
            eprint!("\r{}\r", " ".repeat(message.len() + 2));
            let _ = std::io::stderr().flush();
        });

        Spinner {
            running,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        self.stop_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spinner_stops_on_drop() {
        let spinner = Spinner::start("extracting");
        std::thread::sleep(Duration::from_millis(10));
        drop(spinner);
    }

    #[test]
    fn spinner_stops_on_explicit_stop() {
        let spinner = Spinner::start("extracting");
        spinner.stop();
    }
}

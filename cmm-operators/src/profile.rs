//! Scoped timing records.
//!
//! A [`Profile`] guard logs one `PROFILE(event=.., duration=.., ..)` line at debug
//! level when it goes out of scope.

use std::fmt::Write;
use std::time::Instant;

#[derive(Debug)]
pub struct Profile {
    event: &'static str,
    fields: Vec<(&'static str, String)>,
    start: Instant,
}

impl Profile {
    pub fn new(event: &'static str) -> Self {
        Self {
            event,
            fields: Vec::new(),
            start: Instant::now(),
        }
    }

    /// Attaches a `key=value` pair to the record.
    pub fn field(mut self, key: &'static str, value: impl ToString) -> Self {
        self.fields.push((key, value.to_string()));
        self
    }

    fn record(&self) -> String {
        let mut msg = format!(
            "PROFILE(event={}, duration={:.6}",
            self.event,
            self.start.elapsed().as_secs_f64()
        );
        for (key, value) in &self.fields {
            let _ = write!(msg, ", {}={}", key, value);
        }
        msg.push(')');
        msg
    }
}

impl Drop for Profile {
    fn drop(&mut self) {
        if log::log_enabled!(log::Level::Debug) {
            log::debug!("{}", self.record());
        }
    }
}

use std::fs::File;
use std::io::Write;

/// A small level-gated logger: a verbosity threshold plus an optional
/// mirrored log file. Call sites pick a level; anything at or below the
/// configured verbosity is emitted.
#[derive(Debug, Default)]
pub struct Diagnostics {
    verbosity: u32,
    log_file: Option<File>,
    save_attempts: u64,
    save_failures: u64,
    sfdp_fallbacks: u64,
}

impl Diagnostics {
    pub fn new(verbosity: u32, log_file: Option<File>) -> Self
    {
        Self {
            verbosity,
            log_file,
            save_attempts: 0,
            save_failures: 0,
            sfdp_fallbacks: 0,
        }
    }

    /// Log a message at the given level. Logs also into the log file, if present.
    pub fn log(&mut self, level: u32, msg: &str)
    {
        if self.verbosity >= level {
            eprintln!("{}", msg);

            if let Some(log_file) = &mut self.log_file {
                writeln!(log_file, "{}", msg).unwrap_or_else(|_| {
                    eprintln!("error: couldn't write into the log file")
                });
            }
        }
    }

    pub fn note_save_attempt(&mut self)
    {
        self.save_attempts += 1;
    }

    pub fn note_save_failure(&mut self, reason: &str)
    {
        self.save_failures += 1;
        self.log(1, &format!("save failed, dirty bit retained: {}", reason));
    }

    pub fn note_sfdp_fallback(&mut self, reason: &str)
    {
        self.sfdp_fallbacks += 1;
        self.log(0, &format!("SFDP probe fell back to conservative defaults: {}", reason));
    }

    pub fn save_attempts(&self) -> u64 { self.save_attempts }
    pub fn save_failures(&self) -> u64 { self.save_failures }
    pub fn sfdp_fallbacks(&self) -> u64 { self.sfdp_fallbacks }
}
